//! The elaborated transition table.
//!
//! A [`Model`] maps every state to the events it handles and, per event, the
//! ordered alternatives to try. It starts as a literal transcription of the
//! machine and is refined by the [`Phase`] pipeline until every alternative
//! carries its complete action sequence and resolved target, so code
//! generation is a plain walk over the table.

mod phases;

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::schema::Machine;

/// One side effect of taking a transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "diagram", derive(serde::Serialize))]
pub enum Action {
    /// Verbatim action code from the document.
    Code(String),
    /// Human-readable separator, emitted only in comment mode.
    Comment(String),
    /// Assign the machine's state.
    ChangeState(String),
}

/// A single guarded or unguarded way of handling an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "diagram", derive(serde::Serialize))]
pub struct Alternative {
    pub guard: Option<String>,
    pub actions: Vec<Action>,
    /// Literal target before elaboration, resolved target after it.
    pub target: Option<String>,
}

/// Jump label shared by folded handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "diagram", derive(serde::Serialize))]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:03}", self.0)
    }
}

/// How one state handles one event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "diagram", derive(serde::Serialize))]
pub enum Handler {
    Alternatives(Vec<Alternative>),
    /// Same code as an earlier handler; jump to its label.
    Jump(Label),
}

impl Handler {
    /// The alternatives, empty for a jump.
    #[must_use]
    pub fn alternatives(&self) -> &[Alternative] {
        match self {
            Handler::Alternatives(alternatives) => alternatives,
            Handler::Jump(_) => &[],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Handler::Alternatives(alternatives) if alternatives.is_empty())
    }
}

/// Event name to handler, in machine event order.
pub type EventTable = IndexMap<String, Handler>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElaborationOptions {
    /// `0` none, `1` fold duplicate handlers, `2` also prune untargeted states.
    pub optimise: u8,
    /// Prefix each group of computed actions with a comment.
    pub comment_actions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "diagram", derive(serde::Serialize))]
pub struct Model {
    /// State name to event name to handler, in document order.
    pub table: IndexMap<String, EventTable>,
    /// Labels to emit before the first occurrence of a folded handler.
    pub labels: IndexMap<String, IndexMap<String, Label>>,
    /// States removed by pruning, in removal order.
    pub pruned: Vec<String>,
    /// For every state of the machine, itself and its enclosing states.
    pub in_state: IndexMap<String, Vec<String>>,
}

impl Model {
    #[must_use]
    pub fn handler(&self, state: &str, event: &str) -> Option<&Handler> {
        self.table.get(state)?.get(event)
    }

    /// Label recorded for the handler of `event` in `state`, if some later
    /// handler jumps to it.
    #[must_use]
    pub fn label(&self, state: &str, event: &str) -> Option<Label> {
        self.labels.get(state)?.get(event).copied()
    }

    /// The model as pretty-printed JSON.
    ///
    /// # Errors
    /// Only fails if serde_json does; the model holds nothing unserializable.
    #[cfg(feature = "diagram")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Elaboration phases, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BuildTransitionMap,
    ResolveInheritance,
    PruneUntargetedStates,
    FoldCommonHandlers,
    RemoveEmptyHandlers,
    BuildContainment,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::BuildTransitionMap,
        Phase::ResolveInheritance,
        Phase::PruneUntargetedStates,
        Phase::FoldCommonHandlers,
        Phase::RemoveEmptyHandlers,
        Phase::BuildContainment,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::BuildTransitionMap => "build_transition_map",
            Phase::ResolveInheritance => "resolve_inheritance",
            Phase::PruneUntargetedStates => "prune_untargeted_states",
            Phase::FoldCommonHandlers => "fold_common_handlers",
            Phase::RemoveEmptyHandlers => "remove_empty_handlers",
            Phase::BuildContainment => "build_containment",
        }
    }

    fn apply(self, model: Model, machine: &Machine, options: &ElaborationOptions) -> Model {
        match self {
            Phase::BuildTransitionMap => phases::build_transition_map(model, machine),
            Phase::ResolveInheritance => phases::resolve_inheritance(model, machine, options),
            Phase::PruneUntargetedStates if options.optimise >= 2 => {
                phases::prune_untargeted_states(model)
            }
            Phase::FoldCommonHandlers if options.optimise >= 1 => {
                phases::fold_common_handlers(model)
            }
            Phase::PruneUntargetedStates | Phase::FoldCommonHandlers => model,
            Phase::RemoveEmptyHandlers => phases::remove_empty_handlers(model),
            Phase::BuildContainment => phases::build_containment(model, machine),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs every phase over `machine`.
#[must_use]
pub fn build_model(machine: &Machine, options: &ElaborationOptions) -> Model {
    build_model_observed(machine, options, |_, _| {})
}

/// Runs every phase over `machine`, handing the model to `observe` after
/// each one.
pub fn build_model_observed(
    machine: &Machine,
    options: &ElaborationOptions,
    mut observe: impl FnMut(Phase, &Model),
) -> Model {
    let mut model = Model::default();
    for phase in Phase::ALL {
        debug!(%phase, machine = machine.name(), "running phase");
        model = phase.apply(model, machine, options);
        trace!(%phase, states = model.table.len(), labels = model.labels.len(), "phase done");
        observe(phase, &model);
    }
    model
}

/// Exit actions of the states left and entry actions of the states entered
/// when moving from `source` to `target`, not counting initial transitions.
#[must_use]
pub fn entry_exit_actions(
    source: crate::schema::StateRef<'_>,
    target: crate::schema::StateRef<'_>,
) -> Vec<String> {
    if source == target {
        return [target.exit_action(), source.entry_action()]
            .into_iter()
            .flatten()
            .map(str::to_owned)
            .collect();
    }

    let mut leaving = source.superstates();
    let mut entering = target.superstates();
    while let (Some(a), Some(b)) = (leaving.last(), entering.last()) {
        if a != b {
            break;
        }
        leaving.pop();
        entering.pop();
    }
    let exits = leaving.iter().filter_map(|s| s.exit_action());
    let entries = entering.iter().rev().filter_map(|s| s.entry_action());
    exits.chain(entries).map(str::to_owned).collect()
}
