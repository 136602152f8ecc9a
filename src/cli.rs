//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use smk_core::{ElaborationOptions, FormatterKind};

#[derive(Debug, Parser)]
#[command(name = "smk")]
#[command(version, about = "Nested state machine compiler")]
pub struct Args {
    /// Input XML file
    #[arg(value_name = "INFILE", required_unless_present = "list_symbols")]
    pub infile: Option<PathBuf>,

    /// Output file name
    #[arg(short = 'o', long = "out", value_name = "OUT")]
    pub output: Option<PathBuf>,

    /// Output formatter: static-isin, static or xml
    #[arg(short, long, default_value_t = FormatterKind::StaticIsIn)]
    pub format: FormatterKind,

    /// Optimisation applied to the code: 1 folds shared handlers, 2 also prunes untargeted states
    #[arg(short = 'O', long = "optimise", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub optimise: u8,

    /// Add comments to computed action code
    #[arg(short, long = "comment-actions")]
    pub comment_actions: bool,

    /// Produce some more verbose output
    #[arg(short, long, conflicts_with = "debug")]
    pub verbose: bool,

    /// Produce extremely detailed output for debugging only
    #[arg(short, long)]
    pub debug: bool,

    /// Define a symbol value
    #[arg(short = 'D', long = "define", value_name = "NAME=value")]
    pub defines: Vec<String>,

    /// List the symbols of the chosen formatter with their defaults and exit
    #[arg(long)]
    pub list_symbols: bool,
}

impl Args {
    /// Default log filter directive for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "trace"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }

    pub fn elaboration(&self) -> ElaborationOptions {
        ElaborationOptions {
            optimise: self.optimise,
            comment_actions: self.comment_actions,
        }
    }
}
