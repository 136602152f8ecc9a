//! End-to-end generation tests

use std::fs;

use anyhow::Result;
use smk_core::format::{self, WriteOutcome};
use smk_core::model::{Action, Handler, Label};
use smk_core::{CompileOptions, ElaborationOptions, FormatterKind, Machine, build_model, compile};
use tracing::debug;

use crate::common::*;

fn code(text: &str) -> Action {
    Action::Code(text.to_owned())
}

#[test]
fn start_enters_nested_initial_state() -> Result<()> {
    setup_tracing();

    let machine = Machine::parse(PLAYER)?;
    let model = build_model(&machine, &ElaborationOptions::default());
    let alternatives = model
        .handler("Idle", "START")
        .map(Handler::alternatives)
        .unwrap_or_default();
    assert_eq!(alternatives.len(), 1);
    assert_eq!(
        alternatives[0].actions,
        [
            code("idle_exit()"),
            code("running_entry()"),
            code("paused_entry()"),
            Action::ChangeState("Paused".to_owned()),
        ]
    );
    assert_eq!(alternatives[0].target.as_deref(), Some("Paused"));

    let dir = tempfile::tempdir()?;
    compile(
        PLAYER,
        &CompileOptions {
            format: FormatterKind::Static,
            output: Some(dir.path().join("player")),
            ..CompileOptions::default()
        },
    )?;
    let source = fs::read_to_string(dir.path().join("player.cpp"))?;
    assert!(source.contains(
        "        case START:\n            idle_exit();\n            running_entry();\n            paused_entry();\n            PROP(state_) = ST_PLAYER_PAUSED;\n        break;\n"
    ));
    // Paused inherits STOP from Running.
    assert!(source.contains(
        "    case ST_PLAYER_PAUSED:\n        switch((ev)) {\n        case STOP:\n            paused_exit();\n            running_exit();\n            idle_entry();\n            PROP(state_) = ST_PLAYER_IDLE;\n        break;\n"
    ));
    Ok(())
}

#[test]
fn identical_handlers_fold_into_a_jump() -> Result<()> {
    setup_tracing();

    let machine = Machine::parse(TWINS)?;
    let model = build_model(
        &machine,
        &ElaborationOptions {
            optimise: 1,
            comment_actions: false,
        },
    );
    assert_eq!(model.label("Left", "GO"), Some(Label(0)));
    assert_eq!(model.handler("Right", "GO"), Some(&Handler::Jump(Label(0))));
    assert!(matches!(model.handler("Left", "GO"), Some(Handler::Alternatives(_))));

    let dir = tempfile::tempdir()?;
    let machine_out = dir.path().join("twins");
    let defines: [&str; 0] = [];
    format::generate(
        FormatterKind::Static,
        &machine,
        &model,
        Some(machine_out.as_path()),
        &defines,
    )?;
    let source = fs::read_to_string(dir.path().join("twins.cpp"))?;
    let label_at = source.find("T000:").expect("label emitted");
    let jump_at = source.find("goto T000;").expect("jump emitted");
    assert!(label_at < jump_at);
    assert_eq!(source.matches("beep();").count(), 1);
    Ok(())
}

#[test]
fn regeneration_is_byte_identical() -> Result<()> {
    setup_tracing();

    let dir = tempfile::tempdir()?;
    let options = CompileOptions {
        output: Some(dir.path().join("player.h")),
        ..CompileOptions::default()
    };
    let first = compile(PLAYER, &options)?;
    debug!(?first, "first run");
    assert!(first.iter().all(|(_, outcome)| *outcome == WriteOutcome::Written));
    let before: Vec<Vec<u8>> = first
        .iter()
        .map(|(path, _)| fs::read(path))
        .collect::<Result<_, _>>()?;

    let second = compile(PLAYER, &options)?;
    debug!(?second, "second run");
    assert_eq!(
        second.iter().map(|(path, _)| path).collect::<Vec<_>>(),
        first.iter().map(|(path, _)| path).collect::<Vec<_>>()
    );
    assert!(second.iter().all(|(_, outcome)| *outcome == WriteOutcome::Unchanged));
    let after: Vec<Vec<u8>> = second
        .iter()
        .map(|(path, _)| fs::read(path))
        .collect::<Result<_, _>>()?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn changed_input_rewrites_only_what_differs() -> Result<()> {
    setup_tracing();

    let dir = tempfile::tempdir()?;
    let options = CompileOptions {
        output: Some(dir.path().join("player")),
        ..CompileOptions::default()
    };
    compile(PLAYER, &options)?;
    let edited = PLAYER.replace("resume()", "resume_playback()");
    let written = compile(&edited, &options)?;
    debug!(?written, "rerun after edit");
    assert_eq!(
        written,
        [
            (dir.path().join("player.h"), WriteOutcome::Unchanged),
            (dir.path().join("player.cpp"), WriteOutcome::Written),
        ]
    );
    Ok(())
}

#[test]
fn failed_symbol_expansion_leaves_no_outputs() -> Result<()> {
    setup_tracing();

    let dir = tempfile::tempdir()?;
    let options = CompileOptions {
        output: Some(dir.path().join("player")),
        defines: vec![
            "EVENT_ACCESSOR=$(SELF_REFERENCE)".to_owned(),
            "SELF_REFERENCE=$(EVENT_ACCESSOR)".to_owned(),
        ],
        ..CompileOptions::default()
    };
    let error = compile(PLAYER, &options).unwrap_err();
    debug!(%error, "expansion failed");
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn optimised_output_drops_untargeted_states() -> Result<()> {
    setup_tracing();

    let machine = Machine::parse(PLAYER)?;
    let model = build_model(
        &machine,
        &ElaborationOptions {
            optimise: 2,
            comment_actions: false,
        },
    );
    // Running is only ever entered through its initial transition.
    debug!(pruned = ?model.pruned, "optimised model");
    assert_eq!(model.pruned, ["Running"]);
    assert!(model.in_state.contains_key("Running"));

    let dir = tempfile::tempdir()?;
    let defines: [&str; 0] = [];
    format::generate(
        FormatterKind::Static,
        &machine,
        &model,
        Some(dir.path().join("player").as_path()),
        &defines,
    )?;
    let source = fs::read_to_string(dir.path().join("player.cpp"))?;
    assert!(!source.contains("case ST_PLAYER_RUNNING:"));
    assert!(source.contains("case ST_PLAYER_PAUSED:"));
    Ok(())
}
