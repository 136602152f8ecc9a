use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{Action, Alternative, ElaborationOptions, EventTable, Handler, Label, Model, entry_exit_actions};
use crate::schema::{Machine, StateRef};

// ============================================================================
// Phase 1: transition map
// ============================================================================

/// Every state gets an entry for every machine event. Guarded alternatives
/// come first so the unguarded fallback is always tried last.
pub(super) fn build_transition_map(mut model: Model, machine: &Machine) -> Model {
    for state in machine.states() {
        let mut events: EventTable = machine
            .events()
            .iter()
            .map(|event| (event.clone(), Handler::Alternatives(Vec::new())))
            .collect();
        let mut unguarded = Vec::new();

        for transition in state.transitions() {
            let alternative = Alternative {
                guard: transition.guard().map(str::to_owned),
                actions: transition
                    .action()
                    .map(|code| vec![Action::Code(code.to_owned())])
                    .unwrap_or_default(),
                target: transition.target().map(str::to_owned),
            };
            for event in transition.events() {
                if alternative.guard.is_some() {
                    push_alternative(&mut events, event, alternative.clone());
                } else {
                    unguarded.push((event, alternative.clone()));
                }
            }
        }
        for (event, alternative) in unguarded {
            push_alternative(&mut events, event, alternative);
        }
        model.table.insert(state.name().to_owned(), events);
    }
    model
}

fn push_alternative(events: &mut EventTable, event: &str, alternative: Alternative) {
    if let Some(Handler::Alternatives(alternatives)) = events.get_mut(event) {
        alternatives.push(alternative);
    }
}

// ============================================================================
// Phase 2: inheritance and target resolution
// ============================================================================

/// Fills empty handlers from the nearest superstate that handles the event,
/// then expands every targeted alternative into its full action sequence.
pub(super) fn resolve_inheritance(
    model: Model,
    machine: &Machine,
    options: &ElaborationOptions,
) -> Model {
    let mut table = IndexMap::new();
    for (name, events) in model.table.iter() {
        let Some(state) = machine.state(name) else {
            continue;
        };
        let superstates = state.superstates();
        let mut resolved = EventTable::new();
        for event in events.keys() {
            let inherited = superstates
                .iter()
                .filter_map(|s| model.handler(s.name(), event))
                .map(Handler::alternatives)
                .find(|alternatives| !alternatives.is_empty())
                .unwrap_or_default();
            let alternatives = inherited
                .iter()
                .map(|alternative| resolve_alternative(machine, state, alternative, options))
                .collect();
            resolved.insert(event.clone(), Handler::Alternatives(alternatives));
        }
        table.insert(name.clone(), resolved);
    }
    Model { table, ..model }
}

fn resolve_alternative(
    machine: &Machine,
    source: StateRef<'_>,
    alternative: &Alternative,
    options: &ElaborationOptions,
) -> Alternative {
    let mut explicit = alternative.actions.clone();
    let mut exit_entry = Vec::new();
    let mut initial = Vec::new();
    let mut change = Vec::new();
    let mut target = alternative.target.clone();

    if let Some(literal) = alternative.target.as_deref().and_then(|t| machine.state(t)) {
        exit_entry = entry_exit_actions(source, literal)
            .into_iter()
            .map(Action::Code)
            .collect();
        let (init_actions, settled) = literal.initial_actions_and_state();
        initial = init_actions.into_iter().map(Action::Code).collect();
        if settled != source {
            change.push(Action::ChangeState(settled.name().to_owned()));
        }
        target = Some(settled.name().to_owned());
    }

    if options.comment_actions {
        prefix_comment(&mut explicit, "Explicit actions.".to_owned());
        prefix_comment(
            &mut exit_entry,
            format!("Entry/exit actions from state {}.", source.name()),
        );
        prefix_comment(&mut initial, "Initial actions.".to_owned());
        prefix_comment(&mut change, "State change actions.".to_owned());
    }

    let mut actions = explicit;
    actions.extend(exit_entry);
    actions.extend(initial);
    actions.extend(change);
    Alternative {
        guard: alternative.guard.clone(),
        actions,
        target,
    }
}

fn prefix_comment(group: &mut Vec<Action>, comment: String) {
    if !group.is_empty() {
        group.insert(0, Action::Comment(comment));
    }
}

// ============================================================================
// Phase 3: dead-state pruning
// ============================================================================

/// Drops states that no alternative resolves to. The reset target gets no
/// special treatment.
pub(super) fn prune_untargeted_states(mut model: Model) -> Model {
    let targeted: HashSet<&str> = model
        .table
        .values()
        .flat_map(|events| events.values())
        .flat_map(Handler::alternatives)
        .filter_map(|alternative| alternative.target.as_deref())
        .collect();
    let untargeted: Vec<String> = model
        .table
        .keys()
        .filter(|name| !targeted.contains(name.as_str()))
        .cloned()
        .collect();

    for name in &untargeted {
        warn!(state = %name, "deleting untargeted state");
    }
    model.table.retain(|name, _| !untargeted.contains(name));
    model.pruned = untargeted;
    model
}

// ============================================================================
// Phase 4: common-handler folding
// ============================================================================

/// First place a handler body was seen, and its label once a repeat needs it.
#[derive(Debug)]
struct FirstSeen {
    label: Option<Label>,
    state: String,
    event: String,
}

/// Handler bodies keyed by their full content.
#[derive(Debug, Default)]
struct HandlerCache {
    seen: HashMap<Vec<Alternative>, FirstSeen>,
    next_label: u32,
}

impl HandlerCache {
    /// Records an occurrence. Returns the label to jump to when the same body
    /// was seen before, along with the site that must carry the label if it
    /// was only just assigned.
    fn visit(
        &mut self,
        state: &str,
        event: &str,
        alternatives: &[Alternative],
    ) -> Option<(Label, Option<(String, String)>)> {
        let Some(first) = self.seen.get_mut(alternatives) else {
            self.seen.insert(
                alternatives.to_vec(),
                FirstSeen {
                    label: None,
                    state: state.to_owned(),
                    event: event.to_owned(),
                },
            );
            return None;
        };
        if let Some(label) = first.label {
            return Some((label, None));
        }
        let label = Label(self.next_label);
        self.next_label += 1;
        first.label = Some(label);
        Some((label, Some((first.state.clone(), first.event.clone()))))
    }
}

/// Replaces repeated handler bodies with jumps to the first occurrence.
/// Labels are assigned in table order, and only when a repeat is found.
pub(super) fn fold_common_handlers(mut model: Model) -> Model {
    let mut cache = HandlerCache::default();
    let mut labels = IndexMap::new();
    for state in model.table.keys() {
        labels.insert(state.clone(), IndexMap::new());
    }

    for (state, events) in model.table.iter_mut() {
        for (event, handler) in events.iter_mut() {
            let Handler::Alternatives(alternatives) = handler else {
                continue;
            };
            if alternatives.is_empty() {
                continue;
            }
            let Some((label, site)) = cache.visit(state, event, alternatives) else {
                continue;
            };
            if let Some((first_state, first_event)) = site {
                debug!(%label, state = %first_state, event = %first_event, "labelled handler");
                if let Some(at) = labels.get_mut(&first_state) {
                    at.insert(first_event, label);
                }
            }
            *handler = Handler::Jump(label);
        }
    }

    labels.retain(|_, events| !events.is_empty());
    Model { labels, ..model }
}

// ============================================================================
// Phase 5: empty-handler cleanup
// ============================================================================

pub(super) fn remove_empty_handlers(mut model: Model) -> Model {
    for (_, events) in model.table.iter_mut() {
        events.retain(|_, handler| !handler.is_empty());
    }
    model
}

// ============================================================================
// Phase 6: containment matrix
// ============================================================================

/// Every registered state, pruned or not, with its superstate names.
pub(super) fn build_containment(mut model: Model, machine: &Machine) -> Model {
    model.in_state = machine
        .states()
        .map(|state| {
            let chain = state
                .superstates()
                .iter()
                .map(|s| s.name().to_owned())
                .collect();
            (state.name().to_owned(), chain)
        })
        .collect();
    model
}
