use crate::compare::Comparator;
use crate::snapshot::Record;
use serde_json::Value;

/// Outcome of comparing protected fields against a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidCheck<'f> {
    /// Nothing to compare against, callers skip the check.
    NoBaseline,
    Unchanged,
    /// First protected field, in declaration order, whose value moved.
    Changed(&'f str),
}

pub fn check_rigid<'f>(
    comparator: &Comparator<'_>,
    new: &Record,
    fields: &[&'f str],
    old: Option<&Record>,
) -> RigidCheck<'f> {
    let Some(old) = old else {
        return RigidCheck::NoBaseline;
    };

    fields
        .iter()
        .find(|field| {
            let after = new.get(**field).unwrap_or(&Value::Null);
            let before = old.get(**field).unwrap_or(&Value::Null);
            !comparator.equal(field, before, after)
        })
        .map_or(RigidCheck::Unchanged, |field| RigidCheck::Changed(*field))
}
