//! Benchmark fixtures for generating machine documents

use std::fmt::Write as _;

use crate::common::BenchConfig;

fn state_name(group: usize, level: usize) -> String {
    format!("G{group}L{level}")
}

/// Generate a machine of `config.width` top-level states, each holding a
/// chain of `config.depth` nested substates entered through initial
/// transitions.
///
/// Every state handles a subset of the events, jumping to the top of
/// another group. Every fourth event is guarded, so most handlers carry a
/// guarded alternative and many are identical across groups.
#[must_use]
pub fn generated_machine(config: &BenchConfig) -> String {
    let mut out = String::from("<machine name=\"bench\">\n  <property>int ready</property>\n");
    let _ = writeln!(out, "  <init target=\"{}\"/>", state_name(0, 0));
    for group in 0..config.width {
        write_level(config, group, 0, &mut out);
    }
    out.push_str("</machine>\n");
    out
}

fn write_level(config: &BenchConfig, group: usize, level: usize, out: &mut String) {
    let indent = "  ".repeat(level + 1);
    let name = state_name(group, level);
    let _ = writeln!(out, "{indent}<state name=\"{name}\">");
    if level < config.depth {
        let _ = writeln!(out, "{indent}  <init target=\"{}\"/>", state_name(group, level + 1));
    }
    let _ = writeln!(out, "{indent}  <entry>enter_{name}()</entry>");
    let _ = writeln!(out, "{indent}  <exit>leave_{name}()</exit>");

    for event in 0..config.events {
        if (group + level + event) % 3 == 0 {
            continue;
        }
        let target = state_name((group + event + 1) % config.width, 0);
        let _ = write!(out, "{indent}  <transition event=\"E{event}\" target=\"{target}\"");
        if event % 4 == 0 {
            let _ = write!(out, " guard=\"PROP(ready) &gt; {event}\"");
        }
        let _ = writeln!(out, ">act_{event}()</transition>");
    }

    if level < config.depth {
        write_level(config, group, level + 1, out);
    }
    let _ = writeln!(out, "{indent}</state>");
}

/// A machine with `count` unrelated states that all handle `GO` with the
/// same code, the best case for handler folding.
#[must_use]
pub fn shared_handler_machine(count: usize) -> String {
    let mut out = String::from("<machine name=\"shared\">\n  <init target=\"S0\"/>\n");
    for i in 0..count {
        let _ = writeln!(
            out,
            "  <state name=\"S{i}\"><transition event=\"GO\" target=\"Done\">beep()</transition>\
             <transition event=\"NEXT\" target=\"S{}\"/></state>",
            (i + 1) % count
        );
    }
    out.push_str("  <state name=\"Done\"><transition event=\"GO\" target=\"S0\">rewind()</transition></state>\n");
    out.push_str("</machine>\n");
    out
}
