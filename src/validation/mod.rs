//! Rule-driven validation of document mutations
//!
//! A save goes through three layers. Basic rules hold for every candidate,
//! transition guards hold for a specific `source -> target` status change and
//! state rules hold for the status the candidate ends up in. After a valid
//! save the auto-transition driver moves the candidate as far along its
//! machine as the declared rules allow.
//!
//! Predicates are plain functions returning a [`Verdict`]. The layer that ran
//! a predicate decides how a bare "no" is named, the predicate can also raise
//! explicit messages attributed to a field.

pub mod basic;
pub mod complete;
pub mod driver;
pub mod guard;
pub mod machine;
pub mod rigid;
pub mod state;

pub use complete::{CompleteValidator, Outcome};
pub use machine::{AutoTarget, Machine, MachineBuilder, Transition};

use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::types::Day;
use crate::user::User;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const GENERIC_TRANSITION_FAIL: &str = "generic_transition_fail";
pub const GENERIC_STATE_FAIL: &str = "generic_state_validation_fail";
pub const ILLEGAL_TRANSITION: &str = "illegal_transition";
pub const PERMISSION_FAIL: &str = "transition_permission_fail";

/// Result of a single predicate.
pub type Verdict = Result<(), Failure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The predicate returned false, the running layer names the token.
    Declined,
    /// Explicit messages or tokens.
    Raised(Vec<Issue>),
    /// The engine itself is inconsistent (eg. a related row is missing).
    Internal(String),
}

/// A message, optionally attributed to a field. Messages that match a key of
/// the machine's error table are treated as tokens and translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub field: Option<String>,
    pub message: String,
}

impl Issue {
    pub fn token(token: &str) -> Self {
        Self {
            field: None,
            message: token.to_string(),
        }
    }
    pub fn on(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

pub fn ensure(condition: bool) -> Verdict {
    if condition {
        Ok(())
    } else {
        Err(Failure::Declined)
    }
}

pub fn raise(field: &str, message: impl Into<String>) -> Verdict {
    Err(Failure::Raised(vec![Issue::on(field, message)]))
}

pub fn raise_token(token: &str) -> Verdict {
    Err(Failure::Raised(vec![Issue::token(token)]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Basic,
    Transition,
    State,
    Permission,
    Rigid,
    Internal,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectionKind::Basic => "basic",
            RejectionKind::Transition => "transition",
            RejectionKind::State => "state",
            RejectionKind::Permission => "permission",
            RejectionKind::Rigid => "rigid field",
            RejectionKind::Internal => "internal",
        })
    }
}

/// A failed layer: what kind of failure and the raw issues behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub issues: Vec<Issue>,
}

impl Rejection {
    pub fn new(kind: RejectionKind, issues: Vec<Issue>) -> Self {
        Self { kind, issues }
    }

    pub fn token(kind: RejectionKind, token: &str) -> Self {
        Self::new(kind, vec![Issue::token(token)])
    }

    /// `declined` names the token used when the predicate simply said no.
    pub fn from_failure(kind: RejectionKind, failure: Failure, declined: &str) -> Self {
        match failure {
            Failure::Declined => Self::token(kind, declined),
            Failure::Raised(issues) => Self::new(kind, issues),
            Failure::Internal(message) => Self::token(RejectionKind::Internal, &message),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind == RejectionKind::Internal
    }

    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|issue| match &issue.field {
                Some(field) => format!("{field}: {}", issue.message),
                None => issue.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// User-facing `{field: [message, ..]}` errors. Keys are ordered so the
/// serialized form is stable for identical input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        let messages = self.0.entry(field.to_string()).or_default();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}

/// Where a token lands in the user-facing error map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEntry {
    pub field: &'static str,
    pub message: &'static str,
}

pub type ErrorTable = HashMap<&'static str, ErrorEntry>;

pub(crate) fn common_errors() -> ErrorTable {
    HashMap::from([
        (
            GENERIC_TRANSITION_FAIL,
            ErrorEntry {
                field: "status",
                message: "GENERIC TRANSITION FAIL",
            },
        ),
        (
            GENERIC_STATE_FAIL,
            ErrorEntry {
                field: "status",
                message: "GENERIC STATE VALIDATION FAIL",
            },
        ),
        (
            ILLEGAL_TRANSITION,
            ErrorEntry {
                field: "status",
                message: "This status change is not allowed",
            },
        ),
        (
            PERMISSION_FAIL,
            ErrorEntry {
                field: "status",
                message: "You do not have permission to perform this status change",
            },
        ),
    ])
}

/// Translate raw issues through the error table. Tokens the table does not
/// know are kept as top-level keys so nothing is lost.
pub fn map_errors(issues: &[Issue], table: &ErrorTable) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    for issue in issues {
        match (table.get(issue.message.as_str()), &issue.field) {
            (Some(entry), _) => errors.push(entry.field, entry.message),
            (None, Some(field)) => errors.push(field, issue.message.clone()),
            (None, None) => errors.push(&issue.message, issue.message.clone()),
        }
    }

    errors
}

/// Everything a predicate may look at besides the candidate itself.
pub struct ValidationContext<'a, E: Entity> {
    /// The persisted document before this mutation, if any.
    pub prior: Option<&'a E>,
    pub user: Option<&'a User>,
    pub related: &'a E::Related,
    pub today: Day,
    pub config: &'a EngineConfig,
}

pub type Predicate<E> = fn(&E, &ValidationContext<'_, E>) -> Verdict;
pub type PermissionCheck<E> = fn(&E, &ValidationContext<'_, E>, &User) -> Verdict;
pub type AutoUpdate<E> = fn(&mut E, &ValidationContext<'_, E>);
pub type PrepareFn<E> = fn(&mut E, &ValidationContext<'_, E>) -> Verdict;
pub type RigidFields<E> = fn(&E) -> Vec<&'static str>;

/// A named predicate. The name is the token reported when it declines.
pub struct Rule<E: Entity> {
    pub name: &'static str,
    pub check: Predicate<E>,
}

impl<E: Entity> Rule<E> {
    pub fn new(name: &'static str, check: Predicate<E>) -> Self {
        Self { name, check }
    }
}

/// Build a [`Rule`] named after the predicate function.
#[macro_export]
macro_rules! rule {
    ($f:ident) => {
        $crate::validation::Rule::new(stringify!($f), $f)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tokens_pass_through_as_keys() {
        let table = common_errors();
        let errors = map_errors(
            &[
                Issue::token(GENERIC_TRANSITION_FAIL),
                Issue::token("mystery_token"),
                Issue::on("end", "Today is not after the end date"),
            ],
            &table,
        );

        assert_eq!(errors.get("status").unwrap(), ["GENERIC TRANSITION FAIL"]);
        assert_eq!(errors.get("mystery_token").unwrap(), ["mystery_token"]);
        assert_eq!(errors.get("end").unwrap(), ["Today is not after the end date"]);
    }

    #[test]
    fn declined_failures_take_the_layer_token() {
        let rejection =
            Rejection::from_failure(RejectionKind::Basic, Failure::Declined, "start_end_dates_valid");
        assert_eq!(rejection.issues, vec![Issue::token("start_end_dates_valid")]);

        let internal = Rejection::from_failure(
            RejectionKind::State,
            Failure::Internal("agreement missing".into()),
            GENERIC_STATE_FAIL,
        );
        assert!(internal.is_internal());
    }

    #[test]
    fn serialized_errors_are_ordered() {
        let mut errors = ValidationErrors::new();
        errors.push("status", "b");
        errors.push("end", "a");
        errors.push("status", "b");

        assert_eq!(
            serde_json::to_string(&errors).unwrap(),
            r#"{"end":["a"],"status":["b"]}"#
        );
    }
}
