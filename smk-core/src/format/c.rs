//! C dispatch code with a single static context.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::symbols::{SymbolDef, substitute};
use super::{FormatError, Formatter, Session};
use crate::model::{Action, Alternative, Handler, Model};
use crate::schema::Machine;

const HEADER: usize = 0;
const SOURCE: usize = 1;

/// Maximum width of generated data tables.
const COLUMNS: usize = 120;

pub const SYMBOLS: &[SymbolDef] = &[
    SymbolDef {
        name: "EVENT_ACCESSOR",
        default: "(ev)",
        help: "Expression yielding the event ID inside the process function. The event is in variable `ev'.",
    },
    SymbolDef {
        name: "EVENT_REFERENCE_TYPE",
        default: "t_event",
        help: "Type of the event parameter of the process function.",
    },
    SymbolDef {
        name: "STATE_NAME_PREFIX",
        default: "ST_$(MACHINE_NAME_UC)_",
        help: "Prefix of the generated state IDs.",
    },
    SymbolDef {
        name: "STATE_TYPE",
        default: "uint8_t",
        help: "Integer type holding the state variable.",
    },
    SymbolDef {
        name: "RESET_EVENT_NAME",
        default: "EV_SM_RESET",
        help: "Event that resets the machine to its initial state.",
    },
    SymbolDef {
        name: "CHANGE_STATE_HOOK",
        default: "",
        help: "Statement run on every state change, with `st_' replaced by the new state ID. Typically used for logging.",
    },
];

const HEADER_TEMPLATE: &str = "\
/* This file is auto-generated. Do not edit. */

/* Pass an event to the machine. */
void smk_process_$(MACHINE_NAME)($(EVENT_REFERENCE_TYPE) ev);

/* State ID declaration. */
enum {
    $(STATE_DECL)
};

/* EOF */
";

const SOURCE_TEMPLATE: &str = "\
/* This file is auto-generated. Do not edit. */

$(VERBATIM_INCLUDE)

#include \"$(HEADER_FILE_NAME)\"

/* Context type declaration */
typedef struct {
    $(CONTEXT_DECL)
} smk_context_$(MACHINE_NAME)_t;

static smk_context_$(MACHINE_NAME)_t context;

#define PROP(member_) (context.member_)

$(VERBATIM_CODE)

void smk_process_$(MACHINE_NAME)($(EVENT_REFERENCE_TYPE) ev) {
    if ($(RESET_EVENT_NAME) == $(EVENT_ACCESSOR)) {
        $SMK_CHANGE_STATE($(INITIAL_STATE));
        $(RESET_FUNCTION_BODY)
        return;
    }

    switch(context.state_) {
    default:
        break;

    $(HANDLER_BODY)
    }
}

/* EOF */
";

const IS_IN_HEADER: &str = "\
bool smk_is_in_$(MACHINE_NAME)($(STATE_TYPE) state);

";

const IS_IN_SOURCE: &str = "\
static const uint8_t is_in_data[] = {
    $(IS_IN_DATA)
};

bool smk_is_in_$(MACHINE_NAME)($(STATE_TYPE) state) {
    return !!(is_in_data[(context.state_ * $(IS_IN_DATA_DIM)) + state/8] & (1 << state%8));
}

";

static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("valid camel-case regex"));

static CHANGE_STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$SMK_CHANGE_STATE\((\w+)\)").expect("valid change-state regex")
});

/// Header/source pair dispatching on a static context variable.
#[derive(Debug, Clone, Copy)]
pub struct CFormatter {
    containment: bool,
}

impl CFormatter {
    #[must_use]
    pub fn plain() -> Self {
        Self { containment: false }
    }

    /// Also emits `smk_is_in_<name>()` and its bitmask table.
    #[must_use]
    pub fn with_containment() -> Self {
        Self { containment: true }
    }

    fn templates(self) -> (String, String) {
        if self.containment {
            (
                insert_before_last_line(HEADER_TEMPLATE, IS_IN_HEADER),
                insert_before_last_line(SOURCE_TEMPLATE, IS_IN_SOURCE),
            )
        } else {
            (HEADER_TEMPLATE.to_owned(), SOURCE_TEMPLATE.to_owned())
        }
    }
}

impl Formatter for CFormatter {
    fn default_filenames(&self) -> &'static [&'static str] {
        &["output.h", "output.cpp"]
    }

    fn symbol_definitions(&self) -> &'static [SymbolDef] {
        SYMBOLS
    }

    fn generate(
        &self,
        session: &mut Session,
        machine: &Machine,
        model: &Model,
    ) -> Result<(), FormatError> {
        let paths: Vec<String> = session
            .paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        session.set_symbol("MACHINE_NAME", machine.name());
        session.set_symbol("MACHINE_NAME_UC", machine.name().to_uppercase());
        session.set_symbol("HEADER_FILE_NAME", paths[HEADER].as_str());
        session.set_symbol("SOURCE_FILE_NAME", paths[SOURCE].as_str());
        session.set_symbol("VERBATIM_INCLUDE", verbatim("include", machine.include()));
        session.set_symbol("VERBATIM_CODE", verbatim("code", machine.code()));

        let context: Vec<String> = std::iter::once("$(STATE_TYPE) state_")
            .chain(machine.properties().flat_map(split_code))
            .map(|decl| format!("{decl};"))
            .collect();
        session.set_symbol("CONTEXT_DECL", context.join("\n"));

        let states: Vec<String> = machine
            .states()
            .enumerate()
            .map(|(index, state)| format!("{} = {index}", state_id(state.name())))
            .collect();
        session.set_symbol("STATE_DECL", states.join(",\n"));

        let (reset_actions, reset_state) = machine.initial_actions_and_state();
        let reset_body: Vec<String> = reset_actions
            .iter()
            .flat_map(|action| split_code(action))
            .map(|stmt| format!("    {stmt};"))
            .collect();
        session.set_symbol(
            "RESET_FUNCTION_BODY",
            if reset_body.is_empty() {
                "/* empty */".to_owned()
            } else {
                reset_body.join("\n")
            },
        );
        session.set_symbol("INITIAL_STATE", state_id(reset_state.name()));

        let (data, stride) = containment_data(model);
        session.set_symbol("IS_IN_DATA", data);
        session.set_symbol("IS_IN_DATA_DIM", stride.to_string());
        session.set_symbol("HANDLER_BODY", render_handlers(model));

        let hook = substitute(
            session.symbols().get("CHANGE_STATE_HOOK").unwrap_or_default(),
            session.symbols(),
        )?;
        let (header, source) = self.templates();
        for (stream, template) in [(HEADER, header), (SOURCE, source)] {
            let text = substitute(&template, session.symbols())?;
            session.write_raw(stream, &rewrite_state_changes(&text, &hook));
        }
        Ok(())
    }
}

fn verbatim(element: &str, content: Option<&str>) -> String {
    content.map_or_else(String::new, |content| {
        format!("/* Verbatim `{element}' code. */\n{content}\n/* Verbatim `{element}' code ends. */\n")
    })
}

/// Splits action code into its non-empty `;`-separated statements.
#[must_use]
pub fn split_code(code: &str) -> Vec<&str> {
    code.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// State ID token: the prefix symbol followed by the name with camel-case
/// boundaries split by `_`, upper-cased.
#[must_use]
pub fn state_id(name: &str) -> String {
    format!(
        "$(STATE_NAME_PREFIX){}",
        CAMEL_RE.replace_all(name, "${1}_${2}").to_uppercase()
    )
}

#[must_use]
pub fn event_id(name: &str) -> String {
    name.to_uppercase()
}

/// Expands `$SMK_CHANGE_STATE(X)` into the optional hook, with `st_` replaced
/// by `X`, followed by the state assignment.
#[must_use]
pub fn rewrite_state_changes(text: &str, hook: &str) -> String {
    let replacement = [hook, "PROP(state_) = st_"]
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    CHANGE_STATE_RE
        .replace_all(text, |caps: &Captures<'_>| replacement.replace("st_", &caps[1]))
        .into_owned()
}

/// Greedy word wrap to [`COLUMNS`].
#[must_use]
pub fn pretty_fill(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > COLUMNS {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n")
}

/// Row per state of bytes with bit `i` set when state `i` contains it.
fn containment_data(model: &Model) -> (String, usize) {
    let states: Vec<&String> = model.in_state.keys().collect();
    let stride = states.len().div_ceil(8);
    let mut bytes = Vec::with_capacity(stride * states.len());
    for chain in model.in_state.values() {
        let mut row = vec![0u8; stride];
        for name in chain {
            if let Some(bit) = states.iter().position(|s| *s == name) {
                row[bit / 8] |= 1 << (bit % 8);
            }
        }
        bytes.extend(row);
    }
    let text = bytes
        .iter()
        .map(|b| format!("0x{b:02x}"))
        .collect::<Vec<_>>()
        .join(", ");
    (pretty_fill(&text), stride)
}

fn statements(actions: &[Action]) -> Vec<String> {
    let mut out = Vec::new();
    for action in actions {
        match action {
            Action::Code(code) => out.extend(split_code(code).into_iter().map(|s| format!("{s};"))),
            Action::Comment(text) => out.push(format!("/* {text} */")),
            Action::ChangeState(state) => {
                out.push(format!("$SMK_CHANGE_STATE({});", state_id(state)));
            }
        }
    }
    out
}

/// Every alternative but the last must be guarded; anything else means the
/// elaborator produced an unreachable branch.
fn assert_guarded_prefix(state: &str, event: &str, alternatives: &[Alternative]) {
    if let Some((_, leading)) = alternatives.split_last() {
        assert!(
            leading.iter().all(|alt| alt.guard.is_some()),
            "unguarded alternative before the last in handler {state}/{event}: {alternatives:?}"
        );
    }
}

fn render_handlers(model: &Model) -> String {
    let mut lines = Vec::new();
    for (state, events) in model.table.iter() {
        lines.push(format!("case {}:", state_id(state)));
        lines.push("    switch($(EVENT_ACCESSOR)) {".to_owned());
        for (event, handler) in events.iter() {
            lines.push(format!("    case {}:", event_id(event)));
            let alternatives = match handler {
                Handler::Jump(label) => {
                    lines.push(format!("        goto {label};"));
                    continue;
                }
                Handler::Alternatives(alternatives) => alternatives,
            };
            assert_guarded_prefix(state, event, alternatives);
            if let Some(label) = model.label(state, event) {
                lines.push(format!("        {label}:"));
            }
            for (index, alternative) in alternatives.iter().enumerate() {
                match (&alternative.guard, index) {
                    (Some(guard), 0) => lines.push(format!("    if({guard}) {{")),
                    (Some(guard), _) => lines.push(format!("    else if({guard}) {{")),
                    (None, 0) => {}
                    (None, _) => lines.push("    else {".to_owned()),
                }
                lines.extend(
                    statements(&alternative.actions)
                        .into_iter()
                        .map(|stmt| format!("        {stmt}")),
                );
                if alternative.guard.is_some() || index > 0 {
                    lines.push("    }".to_owned());
                }
            }
            lines.push("    break;".to_owned());
        }
        lines.push("}".to_owned());
        lines.push("break;".to_owned());
    }
    lines.join("\n")
}

/// Inserts `extra` just before the last line of `text`.
fn insert_before_last_line(text: &str, extra: &str) -> String {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    match lines.split_last() {
        Some((last, leading)) => {
            let mut out = leading.concat();
            out.push_str(extra);
            out.push_str(last);
            out
        }
        None => extra.to_owned(),
    }
}
