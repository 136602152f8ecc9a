// smk: hierarchical state machine compiler
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use smk_core::model::{Model, Phase, build_model_observed};
use smk_core::{Machine, NodeError, format};
use tracing::{Level, debug, trace, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;

use cli::Args;

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over -v/-d
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let infile = args.infile.as_deref().unwrap_or(Path::new("-"));
            eprintln!("{}", report(infile, &e));
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if args.list_symbols {
        print!("{}", symbol_listing(args));
        return Ok(());
    }
    let infile = args.infile.as_deref().context("no input file given")?;
    let text = fs::read_to_string(infile)
        .with_context(|| format!("cannot read `{}'", infile.display()))?;

    let machine = Machine::parse(&text)?;
    debug!(
        machine = machine.name(),
        states = machine.state_count(),
        events = machine.events().len(),
        "parsed machine"
    );
    trace!("tree:\n{}", machine.tree().dump());

    let model = build_model_observed(&machine, &args.elaboration(), trace_model);
    format::generate(
        args.format,
        &machine,
        &model,
        args.output.as_deref(),
        &args.defines,
    )?;
    Ok(())
}

fn trace_model(phase: Phase, model: &Model) {
    if !tracing::enabled!(Level::TRACE) {
        return;
    }
    match model.to_json() {
        Ok(json) => trace!(%phase, "model:\n{json}"),
        Err(e) => warn!(%phase, error = %e, "cannot render model"),
    }
}

/// `INFILE:LINE: error: MESSAGE`, line `0` when unknown.
fn report(infile: &Path, error: &anyhow::Error) -> String {
    match error.downcast_ref::<NodeError>() {
        Some(e) => format!("{}:{}: error: {}", infile.display(), e.line_or_zero(), e.message),
        None => format!("{}:0: error: {error:#}", infile.display()),
    }
}

fn symbol_listing(args: &Args) -> String {
    let formatter = args.format.formatter();
    let definitions = formatter.symbol_definitions();
    if definitions.is_empty() {
        return format!("formatter `{}' has no symbols\n", args.format);
    }
    let mut out = String::new();
    for def in definitions {
        out.push_str(&format!("{} = `{}'\n    {}\n", def.name, def.default, def.help));
    }
    out
}
