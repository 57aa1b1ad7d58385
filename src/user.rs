use crate::types::Id;
use serde::{Deserialize, Serialize};

pub const PARTNERSHIP_MANAGER: &str = "Partnership Manager";
pub const PRC_SECRETARY: &str = "PRC Secretary";

/// Which party of a negotiation a user acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Unicef,
    Partner,
}

/// The acting user of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub groups: Vec<String>,
    /// Set for partner staff, the organization they work for.
    pub partner: Option<Id>,
}

impl User {
    pub fn unicef(id: Id, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            groups: Vec::new(),
            partner: None,
        }
    }
    pub fn partner_staff(id: Id, name: &str, partner: Id) -> Self {
        Self {
            id,
            name: name.to_string(),
            groups: Vec::new(),
            partner: Some(partner),
        }
    }
    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
    pub fn side(&self) -> Side {
        match self.partner {
            Some(_) => Side::Partner,
            None => Side::Unicef,
        }
    }
}
