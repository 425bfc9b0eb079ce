//! Build errors for machines, states and transitions.

use thiserror::Error;

/// Errors that can occur when assembling a machine or adding definitions to
/// a running one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("Transition trigger is empty")]
    MissingTrigger,

    #[error("Transition source state not specified. Call .from(state) or .from_any()")]
    MissingFromState,

    #[error("Transition target not specified. Call .to(state), .reflexive() or .internal()")]
    MissingToState,

    #[error("State '{0}' is not registered")]
    UnknownState(String),

    #[error("Invalid machine definition: {}", describe(.0))]
    Invalid(Vec<ConfigIssue>),

    #[error("Malformed configuration: {0}")]
    Json(String),
}

/// One problem found while validating definitions. Validation reports all
/// of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("{context} references unknown state '{name}'")]
    UnknownState { context: String, name: String },

    #[error("State '{0}' is declared more than once")]
    DuplicateState(String),

    #[error("State name '{name}' contains the separator '{separator}'")]
    InvalidName { name: String, separator: String },

    #[error("Initial state '{child}' is not a child of '{state}'")]
    UnknownInitial { state: String, child: String },

    #[error("Parallel state '{0}' has no children")]
    ParallelWithoutChildren(String),
}

fn describe(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_lists_every_issue() {
        let err = BuildError::Invalid(vec![
            ConfigIssue::DuplicateState("A".into()),
            ConfigIssue::ParallelWithoutChildren("P".into()),
        ]);

        let message = err.to_string();

        assert!(message.contains("'A' is declared more than once"));
        assert!(message.contains("'P' has no children"));
    }
}
