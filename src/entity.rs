//! The seam between concrete documents and the generic validation engine
use crate::compare::Schema;
use crate::types::Id;
use crate::validation::Machine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agreement,
    Intervention,
}

impl EntityKind {
    /// Content type tag written on activity rows.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Agreement => "partners.agreement",
            EntityKind::Intervention => "partners.intervention",
        }
    }

    /// Accepts the content type tag or the bare kind name.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "partners.agreement" | "agreement" => Some(EntityKind::Agreement),
            "partners.intervention" | "intervention" => Some(EntityKind::Intervention),
            _ => None,
        }
    }

    /// Lower-case noun used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Agreement => "agreement",
            EntityKind::Intervention => "intervention",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A document governed by a declared state machine.
///
/// `Related` carries whatever a document's predicates need to know about
/// other rows (its partner, sibling documents, ...). It is loaded before
/// validation starts so that predicates stay in-memory and pure.
pub trait Entity: Clone + PartialEq + Serialize + fmt::Debug + Sized + 'static {
    type Status: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Related;

    const KIND: EntityKind;

    fn id(&self) -> &Id;
    fn status(&self) -> Self::Status;
    fn set_status(&mut self, status: Self::Status);
    /// Status every new document starts in.
    fn initial_status() -> Self::Status;

    fn machine() -> &'static Machine<Self>;
    fn schema() -> &'static Schema;
}
