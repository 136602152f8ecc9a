//! The state-machine description language.
//!
//! A `<machine>` holds properties, verbatim code, an optional `<init>` and a
//! tree of `<state>` elements. States carry `<init>`, `<entry>`, `<exit>`,
//! `<transition>` and nested `<state>` children.
//!
//! [`Machine::parse`] reads a document, validates every cross reference and
//! returns a read-only view over the resulting node tree.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::NodeError;
use crate::node::{
    self, AttributeDef, Cardinality, ChildDef, ChildType, Descriptor, NodeHooks, NodeId, NodeKind,
    Tree,
};

/// Element kinds of the state-machine schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    Machine,
    State,
    Transition,
    Init,
    Entry,
    Exit,
}

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z_][a-z0-9_]*$").expect("valid name regex"));

/// Accepts a single identifier.
///
/// # Errors
/// Returns a reason when `name` is not an identifier.
pub fn validate_name(name: &str) -> Result<String, String> {
    if NAME_RE.is_match(name) {
        Ok(name.to_owned())
    } else {
        Err(format!("name `{name}' illegal"))
    }
}

/// Accepts one or more whitespace-separated identifiers, normalised to single
/// spaces.
///
/// # Errors
/// Returns a reason when the list is empty or any word is not an identifier.
pub fn validate_names(names: &str) -> Result<String, String> {
    let words: Vec<&str> = names.split_whitespace().collect();
    if words.is_empty() || words.iter().any(|w| validate_name(w).is_err()) {
        return Err(format!("names `{names}' illegal"));
    }
    Ok(words.join(" "))
}

fn strip(text: &str) -> Result<String, String> {
    Ok(text.trim().to_owned())
}

static MACHINE: Descriptor<Element> = Descriptor {
    name: "machine",
    attributes: &[AttributeDef {
        name: "name",
        required: true,
        validator: validate_name,
    }],
    children: &[
        ChildDef {
            name: "property",
            cardinality: Cardinality::Many,
            ty: ChildType::Text(strip),
        },
        ChildDef {
            name: "include",
            cardinality: Cardinality::Optional,
            ty: ChildType::Text(strip),
        },
        ChildDef {
            name: "code",
            cardinality: Cardinality::Optional,
            ty: ChildType::Text(strip),
        },
        ChildDef {
            name: "init",
            cardinality: Cardinality::Optional,
            ty: ChildType::Node(Element::Init),
        },
        ChildDef {
            name: "state",
            cardinality: Cardinality::Many,
            ty: ChildType::Node(Element::State),
        },
    ],
    content: None,
};

static STATE: Descriptor<Element> = Descriptor {
    name: "state",
    attributes: &[AttributeDef {
        name: "name",
        required: true,
        validator: validate_name,
    }],
    children: &[
        ChildDef {
            name: "init",
            cardinality: Cardinality::Optional,
            ty: ChildType::Node(Element::Init),
        },
        ChildDef {
            name: "entry",
            cardinality: Cardinality::Optional,
            ty: ChildType::Node(Element::Entry),
        },
        ChildDef {
            name: "exit",
            cardinality: Cardinality::Optional,
            ty: ChildType::Node(Element::Exit),
        },
        ChildDef {
            name: "transition",
            cardinality: Cardinality::Many,
            ty: ChildType::Node(Element::Transition),
        },
        ChildDef {
            name: "state",
            cardinality: Cardinality::Many,
            ty: ChildType::Node(Element::State),
        },
    ],
    content: None,
};

static TRANSITION: Descriptor<Element> = Descriptor {
    name: "transition",
    attributes: &[
        AttributeDef {
            name: "event",
            required: true,
            validator: validate_names,
        },
        AttributeDef {
            name: "target",
            required: false,
            validator: strip,
        },
        AttributeDef {
            name: "guard",
            required: false,
            validator: strip,
        },
    ],
    children: &[],
    content: Some(strip),
};

static INIT: Descriptor<Element> = Descriptor {
    name: "init",
    attributes: &[AttributeDef {
        name: "target",
        required: true,
        validator: validate_name,
    }],
    children: &[],
    content: Some(strip),
};

static ENTRY: Descriptor<Element> = Descriptor {
    name: "entry",
    attributes: &[],
    children: &[],
    content: Some(strip),
};

static EXIT: Descriptor<Element> = Descriptor {
    name: "exit",
    attributes: &[],
    children: &[],
    content: Some(strip),
};

impl NodeKind for Element {
    fn descriptor(self) -> &'static Descriptor<Self> {
        match self {
            Element::Machine => &MACHINE,
            Element::State => &STATE,
            Element::Transition => &TRANSITION,
            Element::Init => &INIT,
            Element::Entry => &ENTRY,
            Element::Exit => &EXIT,
        }
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}

/// Validation run while the document is read.
///
/// States are registered as their start tag is seen, which is what detects
/// duplicate names; events are collected as transitions close.
#[derive(Debug, Default)]
struct MachineHooks {
    states: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    events: Vec<String>,
}

impl MachineHooks {
    fn state_name(tree: &Tree<Element>, id: NodeId) -> &str {
        tree.node(id).attribute("name").unwrap_or_default()
    }

    fn validate_state(tree: &Tree<Element>, id: NodeId) -> Result<(), NodeError> {
        let node = tree.node(id);
        let name = Self::state_name(tree, id);

        let mut signatures = HashSet::new();
        for trans_id in node.child_nodes("transition") {
            let trans = tree.node(trans_id);
            let events = trans.attribute("event").unwrap_or_default();
            let guard = non_empty(trans.attribute("guard"));
            if !signatures.insert((events, guard)) {
                return Err(NodeError::at(
                    format!(
                        "transition with signature {events}[{}] duplicated",
                        guard.unwrap_or_default()
                    ),
                    trans.line(),
                ));
            }
        }

        if let Some(init_id) = node.child_node("init") {
            let init = tree.node(init_id);
            if init.attribute("target") == Some(name) {
                return Err(NodeError::at(
                    format!("initial transition for {name} cannot target self"),
                    init.line(),
                ));
            }
        }
        Ok(())
    }

    fn validate_machine(&self, tree: &mut Tree<Element>, id: NodeId) -> Result<(), NodeError> {
        let machine_name = Self::state_name(tree, id).to_owned();

        for &state_id in &self.states {
            let state_name = Self::state_name(tree, state_id);
            for trans_id in tree.node(state_id).child_nodes("transition") {
                let trans = tree.node(trans_id);
                if let Some(target) = non_empty(trans.attribute("target")) {
                    if !self.by_name.contains_key(target) {
                        return Err(NodeError::at(
                            format!(
                                "unknown target state {target} for state {state_name} transition {}[{}]",
                                trans.attribute("event").unwrap_or_default(),
                                trans.attribute("guard").unwrap_or_default()
                            ),
                            trans.line(),
                        ));
                    }
                }
            }
        }

        for &state_id in &self.states {
            let Some(init_id) = tree.node(state_id).child_node("init") else {
                continue;
            };
            let state_name = Self::state_name(tree, state_id);
            let init = tree.node(init_id);
            let target = init.attribute("target").unwrap_or_default();
            let Some(&target_id) = self.by_name.get(target) else {
                return Err(NodeError::at(
                    format!("initial transition for state {state_name} targeted an unknown state {target}"),
                    init.line(),
                ));
            };
            if !tree.ancestors(target_id).skip(1).any(|a| a == state_id) {
                return Err(NodeError::at(
                    format!("initial transition for state {state_name} targeted a non-substate {target}"),
                    init.line(),
                ));
            }
        }

        let machine = tree.node(id);
        match machine.child_node("init") {
            Some(init_id) => {
                let init = tree.node(init_id);
                let target = init.attribute("target").unwrap_or_default();
                if !self.by_name.contains_key(target) {
                    return Err(NodeError::at(
                        format!("initial transition for machine {machine_name} targeted an unknown state {target}"),
                        init.line(),
                    ));
                }
            }
            None => {
                let top_level: Vec<NodeId> = machine.child_nodes("state").collect();
                let [only] = top_level.as_slice() else {
                    let message = if top_level.is_empty() {
                        format!("machine {machine_name} has no states")
                    } else {
                        format!("machine {machine_name} has no initial transition specified on reset")
                    };
                    return Err(NodeError::at(message, machine.line()));
                };
                let target = Self::state_name(tree, *only).to_owned();
                tree.insert(id, Element::Init, &[("target".to_owned(), target)])?;
            }
        }
        Ok(())
    }
}

impl NodeHooks<Element> for MachineHooks {
    fn opened(&mut self, tree: &mut Tree<Element>, id: NodeId) -> Result<(), NodeError> {
        if tree.node(id).kind() != Element::State {
            return Ok(());
        }
        let name = Self::state_name(tree, id).to_owned();
        if self.by_name.contains_key(&name) {
            return Err(NodeError::new(format!("duplicate state name `{name}'")));
        }
        self.by_name.insert(name, id);
        self.states.push(id);
        Ok(())
    }

    fn closed(&mut self, tree: &mut Tree<Element>, id: NodeId) -> Result<(), NodeError> {
        match tree.node(id).kind() {
            Element::Transition => {
                let events = tree.node(id).attribute("event").unwrap_or_default();
                for event in events.split_whitespace() {
                    if !self.events.iter().any(|e| e == event) {
                        self.events.push(event.to_owned());
                    }
                }
                Ok(())
            }
            Element::State => Self::validate_state(tree, id),
            Element::Machine => self.validate_machine(tree, id),
            Element::Init | Element::Entry | Element::Exit => Ok(()),
        }
    }
}

/// A validated state machine description.
#[derive(Debug, Clone)]
pub struct Machine {
    tree: Tree<Element>,
    states: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    events: Vec<String>,
    /// State the initial transition chain settles in on reset.
    reset: NodeId,
}

impl Machine {
    /// Parses and validates a machine description.
    ///
    /// # Errors
    /// Returns the first structural or validation failure found.
    pub fn parse(text: &str) -> Result<Self, NodeError> {
        let mut hooks = MachineHooks::default();
        let tree = node::parse(text, Element::Machine, &mut hooks)?;
        let root = tree.root();
        let mut machine = Self {
            tree,
            states: hooks.states,
            by_name: hooks.by_name,
            events: hooks.events,
            reset: root,
        };
        let (_, settled) = chase_initial(&machine, root);
        if settled == root {
            return Err(NodeError::new(format!(
                "machine {} has no reset target",
                machine.name()
            )));
        }
        machine.reset = settled;
        Ok(machine)
    }

    #[must_use]
    pub fn tree(&self) -> &Tree<Element> {
        &self.tree
    }

    /// The machine rendered back into its document form.
    #[must_use]
    pub fn to_xml(&self) -> String {
        node::write_xml(&self.tree)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.root_node().attribute("name").unwrap_or_default()
    }

    /// Context declarations, in document order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.root_node().texts("property")
    }

    #[must_use]
    pub fn include(&self) -> Option<&str> {
        non_empty(self.root_node().text("include"))
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        non_empty(self.root_node().text("code"))
    }

    /// The reset transition, explicit or implied by a single top-level state.
    #[must_use]
    pub fn init(&self) -> Option<InitRef<'_>> {
        self.root_node()
            .child_node("init")
            .map(|id| InitRef { machine: self, id })
    }

    /// Every state in registration (document) order.
    pub fn states(&self) -> impl Iterator<Item = StateRef<'_>> {
        self.states.iter().map(|&id| StateRef { machine: self, id })
    }

    /// States directly below the machine.
    pub fn top_level_states(&self) -> impl Iterator<Item = StateRef<'_>> {
        self.root_node()
            .child_nodes("state")
            .map(|id| StateRef { machine: self, id })
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<StateRef<'_>> {
        self.by_name
            .get(name)
            .map(|&id| StateRef { machine: self, id })
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Position of a state in registration order.
    #[must_use]
    pub fn state_index(&self, name: &str) -> Option<usize> {
        let id = self.by_name.get(name)?;
        self.states.iter().position(|s| s == id)
    }

    /// Every event name referenced by any transition, first use first.
    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Actions run on reset and the state the machine settles in.
    #[must_use]
    pub fn initial_actions_and_state(&self) -> (Vec<String>, StateRef<'_>) {
        let (actions, _) = chase_initial(self, self.tree.root());
        (actions, StateRef { machine: self, id: self.reset })
    }

    fn root_node(&self) -> &node::Node<Element> {
        self.tree.node(self.tree.root())
    }

    fn state_ref(&self, id: NodeId) -> Option<StateRef<'_>> {
        (self.tree.node(id).kind() == Element::State).then_some(StateRef { machine: self, id })
    }
}

/// Follows initial transitions from `owner` until reaching a state without
/// one, collecting each initial action and the entry actions of every state
/// entered on the way, outermost first.
fn chase_initial(machine: &Machine, owner: NodeId) -> (Vec<String>, NodeId) {
    let tree = &machine.tree;
    let mut actions = Vec::new();
    let mut current = owner;
    loop {
        let Some(init_id) = tree.node(current).child_node("init") else {
            break;
        };
        let init = InitRef { machine, id: init_id };
        actions.extend(init.action().map(str::to_owned));
        let Some(target) = machine.state(init.target()) else {
            break;
        };
        let mut entered: Vec<String> = tree
            .ancestors(target.id)
            .take_while(|&a| a != current)
            .filter_map(|a| machine.state_ref(a))
            .filter_map(|s| s.entry_action().map(str::to_owned))
            .collect();
        entered.reverse();
        actions.extend(entered);
        current = target.id;
    }
    (actions, current)
}

#[derive(Debug, Clone, Copy)]
pub struct StateRef<'m> {
    machine: &'m Machine,
    id: NodeId,
}

impl PartialEq for StateRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.machine, other.machine)
    }
}

impl Eq for StateRef<'_> {}

impl<'m> StateRef<'m> {
    fn node(&self) -> &'m node::Node<Element> {
        self.machine.tree.node(self.id)
    }

    fn action_of(&self, slot: &str) -> Option<&'m str> {
        let id = self.node().child_node(slot)?;
        non_empty(self.machine.tree.node(id).content())
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'m str {
        self.node().attribute("name").unwrap_or_default()
    }

    #[must_use]
    pub fn line(&self) -> usize {
        self.node().line()
    }

    #[must_use]
    pub fn entry_action(&self) -> Option<&'m str> {
        self.action_of("entry")
    }

    #[must_use]
    pub fn exit_action(&self) -> Option<&'m str> {
        self.action_of("exit")
    }

    #[must_use]
    pub fn init(&self) -> Option<InitRef<'m>> {
        let machine = self.machine;
        self.node()
            .child_node("init")
            .map(|id| InitRef { machine, id })
    }

    pub fn transitions(self) -> impl Iterator<Item = TransitionRef<'m>> + 'm {
        let machine = self.machine;
        self.node()
            .child_nodes("transition")
            .map(move |id| TransitionRef { machine, id })
    }

    pub fn substates(self) -> impl Iterator<Item = StateRef<'m>> + 'm {
        let machine = self.machine;
        self.node()
            .child_nodes("state")
            .map(move |id| StateRef { machine, id })
    }

    /// Enclosing state, `None` for top-level states.
    #[must_use]
    pub fn parent(&self) -> Option<StateRef<'m>> {
        self.machine.state_ref(self.node().parent()?)
    }

    /// This state followed by every enclosing state, innermost first. The
    /// machine itself is not included.
    #[must_use]
    pub fn superstates(&self) -> Vec<StateRef<'m>> {
        std::iter::successors(Some(*self), StateRef::parent).collect()
    }

    /// True when `self` is `other` or nested somewhere inside it.
    #[must_use]
    pub fn is_within(&self, other: &StateRef<'_>) -> bool {
        self.machine.tree.ancestors(self.id).any(|a| a == other.id)
    }

    /// Actions run when entering this state without a more specific target,
    /// and the state finally settled in.
    #[must_use]
    pub fn initial_actions_and_state(&self) -> (Vec<String>, StateRef<'m>) {
        let (actions, settled) = chase_initial(self.machine, self.id);
        (actions, StateRef { machine: self.machine, id: settled })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionRef<'m> {
    machine: &'m Machine,
    id: NodeId,
}

impl<'m> TransitionRef<'m> {
    fn node(&self) -> &'m node::Node<Element> {
        self.machine.tree.node(self.id)
    }

    /// Event names handled by this transition.
    pub fn events(self) -> impl Iterator<Item = &'m str> + 'm {
        self.node()
            .attribute("event")
            .unwrap_or_default()
            .split_whitespace()
    }

    #[must_use]
    pub fn guard(&self) -> Option<&'m str> {
        non_empty(self.node().attribute("guard"))
    }

    #[must_use]
    pub fn action(&self) -> Option<&'m str> {
        non_empty(self.node().content())
    }

    /// Target state name; `None` for internal transitions.
    #[must_use]
    pub fn target(&self) -> Option<&'m str> {
        non_empty(self.node().attribute("target"))
    }

    #[must_use]
    pub fn line(&self) -> usize {
        self.node().line()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitRef<'m> {
    machine: &'m Machine,
    id: NodeId,
}

impl<'m> InitRef<'m> {
    #[must_use]
    pub fn target(&self) -> &'m str {
        self.machine
            .tree
            .node(self.id)
            .attribute("target")
            .unwrap_or_default()
    }

    #[must_use]
    pub fn action(&self) -> Option<&'m str> {
        non_empty(self.machine.tree.node(self.id).content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"<machine name="player">
  <property>uint8_t volume</property>
  <include>#include "player.h"</include>
  <init target="Idle">reset_all()</init>
  <state name="Idle">
    <entry>led_off()</entry>
    <exit>led_on()</exit>
    <transition event="START PLAY" target="Running">count = 0</transition>
  </state>
  <state name="Running">
    <init target="Paused">start_timer()</init>
    <entry>motor_on()</entry>
    <state name="Paused">
      <entry>pause_entry()</entry>
      <transition event="STOP" guard="can_stop()" target="Idle"/>
      <transition event="STOP"/>
    </state>
  </state>
</machine>
"#;

    fn parse_err(text: &str) -> NodeError {
        Machine::parse(text).expect_err("document should be rejected")
    }

    #[test]
    fn parses_machine_views() {
        let machine = Machine::parse(NESTED).expect("valid machine");
        assert_eq!(machine.name(), "player");
        assert_eq!(machine.properties().collect::<Vec<_>>(), ["uint8_t volume"]);
        assert_eq!(machine.include(), Some("#include \"player.h\""));
        assert_eq!(machine.code(), None);
        assert_eq!(
            machine.states().map(|s| s.name()).collect::<Vec<_>>(),
            ["Idle", "Running", "Paused"]
        );
        assert_eq!(machine.events(), ["START", "PLAY", "STOP"]);

        let paused = machine.state("Paused").unwrap();
        assert_eq!(paused.parent().map(|p| p.name()), Some("Running"));
        assert_eq!(
            paused.superstates().iter().map(|s| s.name()).collect::<Vec<_>>(),
            ["Paused", "Running"]
        );
        let trans: Vec<_> = paused.transitions().collect();
        assert_eq!(trans[0].guard(), Some("can_stop()"));
        assert_eq!(trans[1].target(), None);
        assert_eq!(machine.state_index("Paused"), Some(2));
    }

    #[test]
    fn initial_chase_collects_init_and_entry_actions() {
        let machine = Machine::parse(NESTED).unwrap();
        let (actions, state) = machine.initial_actions_and_state();
        assert_eq!(actions, ["reset_all()", "led_off()"]);
        assert_eq!(state.name(), "Idle");

        let running = machine.state("Running").unwrap();
        let (actions, settled) = running.initial_actions_and_state();
        assert_eq!(actions, ["start_timer()", "pause_entry()"]);
        assert_eq!(settled.name(), "Paused");
        assert!(settled.init().is_none());
    }

    #[test]
    fn single_top_level_state_is_implicit_initial() {
        let machine =
            Machine::parse("<machine name='m'><state name='Only'><state name='Leaf'/></state></machine>")
                .unwrap();
        assert_eq!(machine.init().map(|i| i.target()), Some("Only"));
        assert!(machine.to_xml().contains("<init target='Only'></init>"));
    }

    #[test]
    fn rejects_duplicate_state_name() {
        let err = parse_err("<machine name='m'>\n<state name='A'/>\n<state name='A'/>\n</machine>");
        assert_eq!(err.message, "duplicate state name `A'");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn rejects_duplicate_transition_signature() {
        let err = parse_err(
            "<machine name='m'><state name='A'>\n<transition event='E' guard='g'/>\n<transition event='E' guard='g'/>\n</state></machine>",
        );
        assert_eq!(err.message, "transition with signature E[g] duplicated");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn same_events_with_different_guards_are_allowed() {
        Machine::parse(
            "<machine name='m'><state name='A'><transition event='E' guard='g'/><transition event='E'/></state></machine>",
        )
        .expect("distinct guards make distinct signatures");
    }

    #[test]
    fn rejects_unknown_transition_target() {
        let err = parse_err(
            "<machine name='m'><state name='A'>\n<transition event='E' target='Nowhere'/>\n</state></machine>",
        );
        assert_eq!(err.message, "unknown target state Nowhere for state A transition E[]");
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn rejects_initial_transition_to_self() {
        let err = parse_err("<machine name='m'><state name='A'><init target='A'/></state></machine>");
        assert_eq!(err.message, "initial transition for A cannot target self");
    }

    #[test]
    fn rejects_initial_transition_to_non_substate() {
        let err = parse_err(
            "<machine name='m'><init target='A'/><state name='A'><init target='B'/></state><state name='B'/></machine>",
        );
        assert_eq!(err.message, "initial transition for state A targeted a non-substate B");
        let err = parse_err("<machine name='m'><state name='A'><init target='Z'/></state></machine>");
        assert_eq!(err.message, "initial transition for state A targeted an unknown state Z");
    }

    #[test]
    fn rejects_missing_machine_initial_transition() {
        let err = parse_err("<machine name='m'><state name='A'/><state name='B'/></machine>");
        assert_eq!(err.message, "machine m has no initial transition specified on reset");
        let err = parse_err("<machine name='m'><init target='Q'/><state name='A'/></machine>");
        assert_eq!(err.message, "initial transition for machine m targeted an unknown state Q");
        let err = parse_err("<machine name='m'></machine>");
        assert_eq!(err.message, "machine m has no states");
    }

    #[test]
    fn rejects_bad_names() {
        let err = parse_err("<machine name='9lives'><state name='A'/></machine>");
        assert!(err.message.starts_with("bad attribute value name=`9lives'"));
        let err = parse_err("<machine name='m'><state name='A'><transition event='A -B'/></state></machine>");
        assert!(err.message.contains("names `A -B' illegal"));
    }

    #[test]
    fn xml_round_trip_preserves_structure() {
        let machine = Machine::parse(NESTED).unwrap();
        let again = Machine::parse(&machine.to_xml()).expect("serialized form re-parses");
        assert_eq!(again.to_xml(), machine.to_xml());
        assert_eq!(again.events(), machine.events());
        assert_eq!(again.state_count(), machine.state_count());
    }
}
