//! Definition checks that accumulate every problem instead of stopping at
//! the first one.

use crate::builder::error::{BuildError, ConfigIssue};
use crate::builder::state::StateBuilder;
use crate::core::{Source, StateRegistry, Target, Transition};
use std::collections::HashSet;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

pub(crate) type Checked = Validation<(), NonEmptyVec<ConfigIssue>>;

/// Check declared names and nesting before anything is registered.
pub(crate) fn validate_declarations<M>(builders: &[StateBuilder<M>], separator: &str) -> Checked {
    let mut checks: Vec<Checked> = Vec::new();
    let mut seen = HashSet::new();
    for builder in builders {
        check_declaration(builder, None, separator, &mut seen, &mut checks);
    }
    Validation::all_vec(checks).map(|_| ())
}

fn check_declaration<M>(
    builder: &StateBuilder<M>,
    parent: Option<&str>,
    separator: &str,
    seen: &mut HashSet<String>,
    checks: &mut Vec<Checked>,
) {
    let qualified = match parent {
        Some(parent) => format!("{parent}{separator}{}", builder.name),
        None => builder.name.clone(),
    };

    if parent.is_some() && builder.name.contains(separator) {
        checks.push(Validation::fail(ConfigIssue::InvalidName {
            name: builder.name.clone(),
            separator: separator.to_string(),
        }));
    }
    if !seen.insert(qualified.clone()) {
        checks.push(Validation::fail(ConfigIssue::DuplicateState(qualified.clone())));
    }
    if builder.parallel && builder.children.is_empty() {
        checks.push(Validation::fail(ConfigIssue::ParallelWithoutChildren(
            qualified.clone(),
        )));
    }
    for child in &builder.initial {
        if !builder.children.iter().any(|c| &c.name == child) {
            checks.push(Validation::fail(ConfigIssue::UnknownInitial {
                state: qualified.clone(),
                child: child.clone(),
            }));
        }
    }

    for child in &builder.children {
        check_declaration(child, Some(&qualified), separator, seen, checks);
    }
}

/// Every state a transition names must be registered.
pub(crate) fn validate_transitions<M>(
    states: &StateRegistry<M>,
    transitions: &[Transition<M>],
) -> Checked {
    let checks: Vec<Checked> = transitions
        .iter()
        .flat_map(|transition| {
            let context = format!("Transition '{}'", transition.trigger());
            let source = match transition.source() {
                Source::State(name) => Some(name.clone()),
                Source::Any => None,
            };
            let target = match transition.target() {
                Target::State(name) => Some(name.clone()),
                Target::Reflexive | Target::Internal => None,
            };
            [source, target]
                .into_iter()
                .flatten()
                .map(move |name| known(states, &context, name))
        })
        .collect();
    Validation::all_vec(checks).map(|_| ())
}

/// The machine's initial states must be registered.
pub(crate) fn validate_initial<M>(states: &StateRegistry<M>, initial: &[String]) -> Checked {
    let checks: Vec<Checked> = initial
        .iter()
        .map(|name| known(states, "Initial state", name.clone()))
        .collect();
    Validation::all_vec(checks).map(|_| ())
}

fn known<M>(states: &StateRegistry<M>, context: &str, name: String) -> Checked {
    if states.contains(&name) {
        Validation::success(())
    } else {
        Validation::fail(ConfigIssue::UnknownState {
            context: context.to_string(),
            name,
        })
    }
}

pub(crate) fn into_result(checked: Checked) -> Result<(), BuildError> {
    match checked {
        Validation::Success(_) => Ok(()),
        Validation::Failure(issues) => Err(BuildError::Invalid(issues.iter().cloned().collect())),
    }
}
