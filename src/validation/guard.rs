//! Transition guards
use super::{
    GENERIC_TRANSITION_FAIL, ILLEGAL_TRANSITION, PERMISSION_FAIL, Rejection,
    RejectionKind, Transition, ValidationContext,
};
use crate::entity::Entity;
use tracing::debug;

/// Evaluate a user-requested `source -> target` change on a candidate that
/// already carries `target`. Conditions see the candidate in `source`; the
/// candidate is back in `target` whatever the outcome.
pub fn check_manual<E: Entity>(
    candidate: &mut E,
    ctx: &ValidationContext<'_, E>,
    source: E::Status,
    target: E::Status,
) -> Result<(), Rejection> {
    let machine = E::machine();

    let Some(transition) = machine.transition(source, target) else {
        debug!(kind = %E::KIND, %source, %target, "no transition declared");
        return Err(Rejection::token(RejectionKind::Transition, ILLEGAL_TRANSITION));
    };

    candidate.set_status(source);
    let result = conditions_hold(transition, candidate, ctx).and_then(|()| match ctx.user {
        Some(_) => permitted(transition, candidate, ctx),
        None => Ok(()),
    });
    candidate.set_status(target);

    if let Err(rejection) = &result {
        debug!(
            kind = %E::KIND,
            id = %candidate.id(),
            method = transition.method,
            rejection = %rejection.kind,
            "transition refused"
        );
    }
    result
}

/// Conditions stop at the first failure. A bare `false` is reported as
/// `generic_transition_fail`.
pub fn conditions_hold<E: Entity>(
    transition: &Transition<E>,
    candidate: &E,
    ctx: &ValidationContext<'_, E>,
) -> Result<(), Rejection> {
    for condition in &transition.conditions {
        (condition.check)(candidate, ctx).map_err(|failure| {
            Rejection::from_failure(RejectionKind::Transition, failure, GENERIC_TRANSITION_FAIL)
        })?;
    }
    Ok(())
}

fn permitted<E: Entity>(
    transition: &Transition<E>,
    candidate: &E,
    ctx: &ValidationContext<'_, E>,
) -> Result<(), Rejection> {
    let (Some(check), Some(user)) = (transition.permission, ctx.user) else {
        return Ok(());
    };

    check(candidate, ctx, user)
        .map_err(|failure| Rejection::from_failure(RejectionKind::Permission, failure, PERMISSION_FAIL))
}
