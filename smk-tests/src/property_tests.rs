//! Property-based tests for elaboration and serialization

use std::collections::HashSet;

use crate::common::*;
use proptest::prelude::*;
use smk_core::format::{SymbolTable, substitute};
use smk_core::model::{
    Action, ElaborationOptions, Handler, Model, Phase, build_model, build_model_observed,
    entry_exit_actions,
};
use smk_core::schema::StateRef;
use smk_core::Machine;

// Property test strategies
prop_compose! {
    fn arb_transition(states: usize)(
        event in 0..EVENTS.len(),
        guard in prop::option::of(0..GUARDS.len()),
        target in prop::option::of(0..states),
        action in any::<bool>(),
    ) -> TransitionSpec {
        TransitionSpec { event, guard, target, action }
    }
}

prop_compose! {
    fn arb_state(index: usize, states: usize)(
        parent in if index == 0 { Just(None).boxed() } else { prop::option::of(0..index).boxed() },
        entry in any::<bool>(),
        exit in any::<bool>(),
        init in any::<bool>(),
        transitions in prop::collection::vec(arb_transition(states), 0..4),
    ) -> StateSpec {
        StateSpec { parent, entry, exit, init, transitions }
    }
}

prop_compose! {
    fn arb_machine()(states in 1usize..8)(
        specs in (0..states).map(|i| arb_state(i, states)).collect::<Vec<_>>(),
        init in 0..states,
    ) -> MachineSpec {
        MachineSpec { states: specs, init }
    }
}

fn parse(spec: &MachineSpec) -> Machine {
    let text = spec.render();
    Machine::parse(&text).unwrap_or_else(|e| panic!("generated machine rejected: {e}\n{text}"))
}

fn snapshot(machine: &Machine, options: &ElaborationOptions, wanted: Phase) -> Model {
    let mut found = None;
    build_model_observed(machine, options, |phase, model| {
        if phase == wanted {
            found = Some(model.clone());
        }
    });
    found.expect("every phase is observed")
}

fn actions_of(state: StateRef<'_>) -> Vec<String> {
    [state.entry_action(), state.exit_action()]
        .into_iter()
        .flatten()
        .map(str::to_owned)
        .collect()
}

/// Comparable shape of a parsed machine.
fn summary(machine: &Machine) -> Vec<String> {
    machine
        .states()
        .map(|state| {
            let transitions: Vec<String> = state
                .transitions()
                .map(|t| {
                    format!(
                        "{:?}[{:?}]->{:?}/{:?}",
                        t.events().collect::<Vec<_>>(),
                        t.guard(),
                        t.target(),
                        t.action()
                    )
                })
                .collect();
            format!(
                "{} in {:?} entry={:?} exit={:?} init={:?} {:?}",
                state.name(),
                state.parent().map(|p| p.name()),
                state.entry_action(),
                state.exit_action(),
                state.init().map(|i| (i.target(), i.action())),
                transitions
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn inheritance_never_fabricates_handlers(spec in arb_machine()) {
        let machine = parse(&spec);
        let options = ElaborationOptions::default();
        let declared = snapshot(&machine, &options, Phase::BuildTransitionMap);
        let inherited = snapshot(&machine, &options, Phase::ResolveInheritance);

        for (name, events) in inherited.table.iter() {
            let state = machine.state(name).unwrap();
            for (event, handler) in events.iter() {
                let origin = state
                    .superstates()
                    .into_iter()
                    .filter_map(|s| declared.handler(s.name(), event))
                    .map(Handler::alternatives)
                    .find(|alternatives| !alternatives.is_empty())
                    .unwrap_or_default();
                let resolved = handler.alternatives();
                prop_assert_eq!(resolved.len(), origin.len());
                for (got, from) in resolved.iter().zip(origin) {
                    prop_assert_eq!(&got.guard, &from.guard);
                    prop_assert!(got.actions.starts_with(&from.actions));
                    if from.target.is_none() {
                        prop_assert_eq!(got, from);
                    }
                }
            }
        }
    }

    #[test]
    fn state_changes_skip_common_ancestor_actions(spec in arb_machine()) {
        let machine = parse(&spec);
        for source in machine.states() {
            for target in machine.states().filter(|t| *t != source) {
                let shared: HashSet<String> = machine
                    .states()
                    .filter(|a| source.is_within(a) && target.is_within(a))
                    .flat_map(actions_of)
                    .collect();
                let actions = entry_exit_actions(source, target);
                prop_assert!(
                    actions.iter().all(|a| !shared.contains(a)),
                    "{} -> {} ran {:?}", source.name(), target.name(), actions
                );
            }
        }
    }

    #[test]
    fn self_transition_is_exit_then_entry(spec in arb_machine()) {
        let machine = parse(&spec);
        for state in machine.states() {
            let expected: Vec<String> = [state.exit_action(), state.entry_action()]
                .into_iter()
                .flatten()
                .map(str::to_owned)
                .collect();
            prop_assert_eq!(entry_exit_actions(state, state), expected);
        }
    }

    #[test]
    fn initial_chase_reaches_a_fixed_point(spec in arb_machine()) {
        let machine = parse(&spec);
        for state in machine.states() {
            let (_, settled) = state.initial_actions_and_state();
            prop_assert!(settled.is_within(&state));
            prop_assert!(settled.init().is_none());
            let (again, still) = settled.initial_actions_and_state();
            prop_assert!(again.is_empty());
            prop_assert_eq!(still, settled);
        }
        let (_, reset) = machine.initial_actions_and_state();
        prop_assert!(reset.init().is_none());
        let declared = machine.state(&format!("S{}", spec.init)).unwrap();
        prop_assert_eq!(reset, declared.initial_actions_and_state().1);
    }

    #[test]
    fn folding_is_deterministic(spec in arb_machine()) {
        let machine = parse(&spec);
        let options = ElaborationOptions { optimise: 1, comment_actions: false };
        let first = build_model(&machine, &options);
        let second = build_model(&machine, &options);
        prop_assert_eq!(&first, &second);
        // Map equality ignores order; generated code does not.
        prop_assert!(first.table.keys().eq(second.table.keys()));
        for (a, b) in first.table.values().zip(second.table.values()) {
            prop_assert!(a.keys().eq(b.keys()));
        }
        prop_assert!(first.labels.keys().eq(second.labels.keys()));

        let labelled: Vec<_> = first
            .labels
            .iter()
            .flat_map(|(state, events)| events.iter().map(move |(event, label)| (state, event, *label)))
            .collect();
        for (state, event, _) in &labelled {
            let handler = first.handler(state, event);
            prop_assert!(matches!(handler, Some(Handler::Alternatives(a)) if !a.is_empty()));
        }
        for events in first.table.values() {
            for handler in events.values() {
                if let Handler::Jump(label) = handler {
                    prop_assert!(labelled.iter().any(|(_, _, l)| l == label));
                }
            }
        }
    }

    #[test]
    fn pruning_keeps_every_surviving_target(spec in arb_machine()) {
        let machine = parse(&spec);
        let options = ElaborationOptions { optimise: 2, comment_actions: false };
        let model = build_model(&machine, &options);

        for name in &model.pruned {
            prop_assert!(!model.table.contains_key(name));
        }
        let targets = model
            .table
            .values()
            .flat_map(|events| events.values())
            .flat_map(Handler::alternatives)
            .filter_map(|a| a.target.as_deref());
        for target in targets {
            prop_assert!(model.table.contains_key(target), "{} was pruned", target);
        }
    }

    #[test]
    fn state_changes_name_the_resolved_target(spec in arb_machine()) {
        let machine = parse(&spec);
        let model = build_model(&machine, &ElaborationOptions::default());
        for (name, events) in model.table.iter() {
            for alternative in events.values().flat_map(Handler::alternatives) {
                let changes: Vec<_> = alternative
                    .actions
                    .iter()
                    .filter_map(|a| match a {
                        Action::ChangeState(to) => Some(to.as_str()),
                        _ => None,
                    })
                    .collect();
                match alternative.target.as_deref() {
                    Some(target) if target != name => prop_assert_eq!(changes, [target]),
                    _ => prop_assert!(changes.is_empty()),
                }
            }
        }
    }

    #[test]
    fn xml_round_trip_preserves_states_and_transitions(spec in arb_machine()) {
        let machine = parse(&spec);
        let dumped = machine.to_xml();
        let reparsed = Machine::parse(&dumped).unwrap();
        prop_assert_eq!(summary(&reparsed), summary(&machine));
        prop_assert_eq!(reparsed.events(), machine.events());
        prop_assert_eq!(reparsed.to_xml(), dumped);
    }

    #[test]
    fn substitution_without_tokens_is_identity(text in "[a-zA-Z0-9 _;(){}=\n]*") {
        prop_assert_eq!(substitute(&text, &SymbolTable::new()).unwrap(), text);
    }
}
