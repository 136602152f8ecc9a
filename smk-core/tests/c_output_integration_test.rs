// smk-core/tests/c_output_integration_test.rs

#[cfg(test)]
pub mod c_output_integration_test {
    use std::fs;
    use std::path::Path;

    use smk_core::format::{self, FormatterKind, WriteOutcome};
    use smk_core::{CompileOptions, ElaborationOptions, Error, FormatError, Machine, build_model, compile};

    const DOOR: &str = r#"<machine name="door">
  <property>bool locked</property>
  <init target="Closed">locked = false</init>
  <state name="Closed">
    <transition event="OPEN" guard="!PROP(locked)" target="Opened"/>
    <transition event="LOCK">PROP(locked) = true</transition>
  </state>
  <state name="Opened">
    <entry>light_on()</entry>
    <exit>light_off()</exit>
    <transition event="CLOSE" target="Closed"/>
  </state>
</machine>
"#;

    const DOOR_HEADER: &str = "\
/* This file is auto-generated. Do not edit. */

/* Pass an event to the machine. */
void smk_process_door(t_event ev);

/* State ID declaration. */
enum {
    ST_DOOR_CLOSED = 0,
    ST_DOOR_OPENED = 1
};

/* EOF */
";

    fn door_source(header_path: &Path) -> String {
        format!(
            "\
/* This file is auto-generated. Do not edit. */



#include \"{}\"

/* Context type declaration */
typedef struct {{
    uint8_t state_;
    bool locked;
}} smk_context_door_t;

static smk_context_door_t context;

#define PROP(member_) (context.member_)



void smk_process_door(t_event ev) {{
    if (EV_SM_RESET == (ev)) {{
        PROP(state_) = ST_DOOR_CLOSED;
            locked = false;
        return;
    }}

    switch(context.state_) {{
    default:
        break;

    case ST_DOOR_CLOSED:
        switch((ev)) {{
        case OPEN:
        if(!PROP(locked)) {{
            light_on();
            PROP(state_) = ST_DOOR_OPENED;
        }}
        break;
        case LOCK:
            PROP(locked) = true;
        break;
    }}
    break;
    case ST_DOOR_OPENED:
        switch((ev)) {{
        case CLOSE:
            light_off();
            PROP(state_) = ST_DOOR_CLOSED;
        break;
    }}
    break;
    }}
}}

/* EOF */
",
            header_path.display()
        )
    }

    fn options(format: FormatterKind, output: &Path) -> CompileOptions {
        CompileOptions {
            format,
            output: Some(output.to_path_buf()),
            ..CompileOptions::default()
        }
    }

    #[test]
    fn static_formatter_renders_header_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let written = compile(DOOR, &options(FormatterKind::Static, &dir.path().join("door.c"))).unwrap();

        let header = dir.path().join("door.h");
        let source = dir.path().join("door.cpp");
        assert_eq!(
            written,
            [
                (header.clone(), WriteOutcome::Written),
                (source.clone(), WriteOutcome::Written)
            ]
        );
        assert_eq!(fs::read_to_string(&header).unwrap(), DOOR_HEADER);
        assert_eq!(fs::read_to_string(&source).unwrap(), door_source(&header));
    }

    #[test]
    fn containment_formatter_adds_is_in_function() {
        let dir = tempfile::tempdir().unwrap();
        compile(DOOR, &options(FormatterKind::StaticIsIn, &dir.path().join("door"))).unwrap();

        let header = fs::read_to_string(dir.path().join("door.h")).unwrap();
        assert!(header.ends_with("bool smk_is_in_door(uint8_t state);\n\n/* EOF */\n"));

        let source = fs::read_to_string(dir.path().join("door.cpp")).unwrap();
        assert!(source.contains("static const uint8_t is_in_data[] = {\n    0x01, 0x02\n};\n"));
        assert!(source.contains("return !!(is_in_data[(context.state_ * 1) + state/8] & (1 << state%8));"));
        assert!(source.ends_with("}\n\n/* EOF */\n"));
    }

    #[test]
    fn second_run_leaves_files_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(FormatterKind::StaticIsIn, &dir.path().join("door.h"));
        compile(DOOR, &opts).unwrap();
        let again = compile(DOOR, &opts).unwrap();
        assert!(again.iter().all(|(_, outcome)| *outcome == WriteOutcome::Unchanged));
    }

    #[test]
    fn defines_override_defaults_and_hook_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CompileOptions {
            defines: vec![
                "state_type=int".to_owned(),
                "CHANGE_STATE_HOOK = trace_state(st_)".to_owned(),
                "STATE_NAME_PREFIX=S_".to_owned(),
            ],
            ..options(FormatterKind::StaticIsIn, &dir.path().join("door"))
        };
        compile(DOOR, &opts).unwrap();
        let header = fs::read_to_string(dir.path().join("door.h")).unwrap();
        assert!(header.contains("    S_CLOSED = 0,\n    S_OPENED = 1\n"));
        assert!(header.contains("bool smk_is_in_door(int state);"));
        let source = fs::read_to_string(dir.path().join("door.cpp")).unwrap();
        assert!(source.contains("trace_state(S_OPENED); PROP(state_) = S_OPENED;"));
        assert!(source.contains("    int state_;\n"));
    }

    #[test]
    fn failed_generation_removes_stale_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("door.h");
        fs::write(&header, "stale").unwrap();
        let opts = CompileOptions {
            defines: vec!["STATE_TYPE=$(NOT_DEFINED)".to_owned()],
            ..options(FormatterKind::Static, &header)
        };
        let err = compile(DOOR, &opts).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UndefinedSymbol { ref name }) if name == "NOT_DEFINED"
        ));
        assert!(!header.exists());
        assert!(!dir.path().join("door.cpp").exists());
    }

    #[test]
    fn malformed_define_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CompileOptions {
            defines: vec!["JUSTANAME".to_owned()],
            ..options(FormatterKind::Static, &dir.path().join("door"))
        };
        let err = compile(DOOR, &opts).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::BadDefine(_))));
    }

    #[test]
    fn folded_handlers_emit_label_and_goto() {
        let text = r#"<machine name="pair">
  <init target="A"/>
  <state name="A"><transition event="GO" target="C">beep()</transition></state>
  <state name="B"><transition event="GO" target="C">beep()</transition></state>
  <state name="C"><transition event="BACK" target="A"/></state>
</machine>"#;
        let dir = tempfile::tempdir().unwrap();
        let opts = CompileOptions {
            elaboration: ElaborationOptions {
                optimise: 1,
                comment_actions: false,
            },
            ..options(FormatterKind::Static, &dir.path().join("pair"))
        };
        compile(text, &opts).unwrap();
        let source = fs::read_to_string(dir.path().join("pair.cpp")).unwrap();
        assert!(source.contains(
            "    case ST_PAIR_A:\n        switch((ev)) {\n        case GO:\n            T000:\n            beep();\n            PROP(state_) = ST_PAIR_C;\n        break;\n"
        ));
        assert!(source.contains("    case ST_PAIR_B:\n        switch((ev)) {\n        case GO:\n            goto T000;\n    }\n"));
    }

    #[test]
    fn comment_mode_emits_group_comments() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CompileOptions {
            elaboration: ElaborationOptions {
                optimise: 0,
                comment_actions: true,
            },
            ..options(FormatterKind::Static, &dir.path().join("door"))
        };
        compile(DOOR, &opts).unwrap();
        let source = fs::read_to_string(dir.path().join("door.cpp")).unwrap();
        assert!(source.contains("/* Entry/exit actions from state Closed. */\n            light_on();"));
        assert!(source.contains("/* State change actions. */"));
        assert!(source.contains("/* Explicit actions. */\n            PROP(locked) = true;"));
    }

    #[test]
    fn xml_formatter_round_trips_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let written = compile(DOOR, &options(FormatterKind::Xml, &dir.path().join("door"))).unwrap();
        assert_eq!(written[0].0, dir.path().join("door.xml"));

        let dumped = fs::read_to_string(dir.path().join("door.xml")).unwrap();
        let original = Machine::parse(DOOR).unwrap();
        let reparsed = Machine::parse(&dumped).unwrap();
        assert_eq!(
            reparsed.states().map(|s| s.name()).collect::<Vec<_>>(),
            original.states().map(|s| s.name()).collect::<Vec<_>>()
        );
        assert_eq!(reparsed.events(), original.events());
        assert_eq!(reparsed.to_xml(), dumped);
    }

    #[test]
    fn parse_errors_carry_the_source_line() {
        let text = "<machine name='m'>\n  <state name='A'>\n    <transition event='GO' target='Nowhere'/>\n  </state>\n</machine>\n";
        let err = compile(text, &CompileOptions::default()).unwrap_err();
        let Error::Node(err) = err else {
            panic!("expected a node error, got {err:?}");
        };
        assert_eq!(err.line, Some(3));
        assert!(err.message.starts_with("unknown target state Nowhere"));
    }

    #[test]
    fn generate_uses_formatter_defaults_without_output_path() {
        let machine = Machine::parse(DOOR).unwrap();
        let model = build_model(&machine, &ElaborationOptions::default());
        let formatter = FormatterKind::Static.formatter();
        assert_eq!(
            format::output_paths(formatter.default_filenames(), None),
            [Path::new("output.h"), Path::new("output.cpp")]
        );
        assert!(model.table.contains_key("Closed"));
    }
}
