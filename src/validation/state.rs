//! Per-state invariants and rigid fields
use super::rigid::{RigidCheck, check_rigid};
use super::{GENERIC_STATE_FAIL, Issue, Rejection, RejectionKind, ValidationContext};
use crate::compare::Comparator;
use crate::entity::Entity;
use crate::snapshot::capture;
use tracing::debug;

/// Whether protected fields are compared against the prior document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidMode {
    Enforce,
    Skip,
}

/// Validate the candidate in the status it currently carries.
///
/// A failed basic run is returned as is, the state rule never sees a
/// candidate that is structurally broken. Rigid fields are only enforced when
/// the status did not change, leaving a state is how protected fields get
/// unlocked.
pub fn validate<E: Entity>(
    candidate: &E,
    ctx: &ValidationContext<'_, E>,
    basic: &Result<(), Rejection>,
    rigid: RigidMode,
) -> Result<(), Rejection> {
    basic.clone()?;

    let machine = E::machine();
    let status = candidate.status();

    if rigid == RigidMode::Enforce {
        check_protected(candidate, ctx)?;
    }

    let Some(rule) = machine.state_rule(status) else {
        return Ok(());
    };

    rule(candidate, ctx).map_err(|failure| {
        debug!(kind = %E::KIND, id = %candidate.id(), %status, "state validation failed");
        Rejection::from_failure(RejectionKind::State, failure, GENERIC_STATE_FAIL)
    })
}

fn check_protected<E: Entity>(candidate: &E, ctx: &ValidationContext<'_, E>) -> Result<(), Rejection> {
    let status = candidate.status();
    let Some(prior) = ctx.prior.filter(|p| p.status() == status) else {
        return Ok(());
    };

    let fields = E::machine().rigid_fields(candidate, status);
    if fields.is_empty() {
        return Ok(());
    }

    let internal = |e: crate::error::EngineError| Rejection::token(RejectionKind::Internal, &e.to_string());
    let new = capture(candidate).map_err(internal)?;
    let old = capture(prior).map_err(internal)?;
    let comparator = Comparator::new(E::schema(), ctx.config.money_rounding);

    match check_rigid(&comparator, &new, &fields, Some(&old)) {
        RigidCheck::Changed(field) => {
            debug!(kind = %E::KIND, id = %candidate.id(), field, "rigid field changed");
            Err(Rejection::new(
                RejectionKind::Rigid,
                vec![Issue::on(
                    field,
                    format!("Cannot change fields while {} is {}", E::KIND.label(), status),
                )],
            ))
        }
        RigidCheck::Unchanged | RigidCheck::NoBaseline => Ok(()),
    }
}
