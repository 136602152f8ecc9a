//! Integration and property tests for smk
//!
//! End-to-end runs that touch the filesystem and randomized checks over
//! generated machines live here, away from the unit tests in `smk-core`.

#![cfg(test)]

pub mod integration;
pub mod property_tests;

/// Common test utilities and fixtures
pub mod common {
    use std::fmt::Write as _;

    /// Setup tracing for tests
    pub fn setup_tracing() {
        use tracing_subscriber::{EnvFilter, fmt};

        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// `Idle` and `Running`, with `Paused` nested in `Running` and reached
    /// through its initial transition.
    pub const PLAYER: &str = r#"<machine name="player">
  <init target="Idle"/>
  <state name="Idle">
    <entry>idle_entry()</entry>
    <exit>idle_exit()</exit>
    <transition event="START" target="Running"/>
  </state>
  <state name="Running">
    <init target="Paused"/>
    <entry>running_entry()</entry>
    <exit>running_exit()</exit>
    <transition event="STOP" target="Idle"/>
    <state name="Paused">
      <entry>paused_entry()</entry>
      <exit>paused_exit()</exit>
      <transition event="RESUME">resume()</transition>
    </state>
  </state>
</machine>
"#;

    /// Two unrelated states handling `GO` with the same code.
    pub const TWINS: &str = r#"<machine name="twins">
  <init target="Left"/>
  <state name="Left">
    <transition event="GO" target="Done">beep()</transition>
  </state>
  <state name="Right">
    <transition event="GO" target="Done">beep()</transition>
  </state>
  <state name="Done">
    <transition event="AGAIN" target="Right"/>
  </state>
</machine>
"#;

    pub const EVENTS: [&str; 3] = ["E0", "E1", "E2"];
    pub const GUARDS: [&str; 3] = ["ready", "count < 3", "a && !b"];

    /// A transition of a generated machine, by index into the other tables.
    #[derive(Debug, Clone)]
    pub struct TransitionSpec {
        pub event: usize,
        pub guard: Option<usize>,
        pub target: Option<usize>,
        pub action: bool,
    }

    /// A state of a generated machine. `parent` always precedes the state.
    #[derive(Debug, Clone)]
    pub struct StateSpec {
        pub parent: Option<usize>,
        pub entry: bool,
        pub exit: bool,
        pub init: bool,
        pub transitions: Vec<TransitionSpec>,
    }

    /// Shape of a random but valid machine, rendered as a document with
    /// [`MachineSpec::render`]. State `i` is named `S{i}`.
    #[derive(Debug, Clone)]
    pub struct MachineSpec {
        pub states: Vec<StateSpec>,
        pub init: usize,
    }

    impl MachineSpec {
        pub fn render(&self) -> String {
            let mut out = String::from("<machine name='gen'>\n");
            let _ = writeln!(out, "  <init target='S{}'/>", self.init);
            for state in self.children(None) {
                self.render_state(state, 1, &mut out);
            }
            out.push_str("</machine>\n");
            out
        }

        fn children(&self, parent: Option<usize>) -> Vec<usize> {
            (0..self.states.len())
                .filter(|&i| self.states[i].parent == parent)
                .collect()
        }

        fn render_state(&self, index: usize, depth: usize, out: &mut String) {
            let spec = &self.states[index];
            let indent = "  ".repeat(depth);
            let children = self.children(Some(index));

            let _ = writeln!(out, "{indent}<state name='S{index}'>");
            if let (true, Some(first)) = (spec.init, children.first()) {
                let _ = writeln!(out, "{indent}  <init target='S{first}'>init_S{index}()</init>");
            }
            if spec.entry {
                let _ = writeln!(out, "{indent}  <entry>en_S{index}()</entry>");
            }
            if spec.exit {
                let _ = writeln!(out, "{indent}  <exit>ex_S{index}()</exit>");
            }

            let mut signatures = Vec::new();
            for t in &spec.transitions {
                if signatures.contains(&(t.event, t.guard)) {
                    continue;
                }
                signatures.push((t.event, t.guard));
                let _ = write!(out, "{indent}  <transition event='{}'", EVENTS[t.event]);
                if let Some(guard) = t.guard {
                    let _ = write!(out, " guard='{}'", escape(GUARDS[guard]));
                }
                if let Some(target) = t.target {
                    let _ = write!(out, " target='S{target}'");
                }
                out.push('>');
                if t.action {
                    let _ = write!(out, "act_{}()", EVENTS[t.event]);
                }
                out.push_str("</transition>\n");
            }

            for child in children {
                self.render_state(child, depth + 1, out);
            }
            let _ = writeln!(out, "{indent}</state>");
        }
    }

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;").replace('<', "&lt;")
    }
}
