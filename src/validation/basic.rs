use super::{Failure, Issue, Rejection, RejectionKind, ValidationContext};
use crate::entity::Entity;
use tracing::debug;

/// Run every basic rule of the machine and accumulate what they report.
/// An internal failure stops the run immediately.
pub fn validate<E: Entity>(candidate: &E, ctx: &ValidationContext<'_, E>) -> Result<(), Rejection> {
    let mut issues = Vec::new();

    for rule in E::machine().basic_rules() {
        match (rule.check)(candidate, ctx) {
            Ok(()) => {}
            Err(Failure::Declined) => issues.push(Issue::token(rule.name)),
            Err(Failure::Raised(raised)) => issues.extend(raised),
            Err(Failure::Internal(message)) => {
                return Err(Rejection::token(RejectionKind::Internal, &message));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        debug!(kind = %E::KIND, id = %candidate.id(), count = issues.len(), "basic validation failed");
        Err(Rejection::new(RejectionKind::Basic, issues))
    }
}
