//! Auto-transition driver
//!
//! Moves a valid candidate along the potential auto-transitions table of its
//! machine until no potential succeeds. Auto-transitions are system actions:
//! conditions are evaluated without a permission check and failures are never
//! reported to the caller, the candidate simply stays in the last state it
//! reached.
use super::guard::conditions_hold;
use super::state::{self, RigidMode};
use super::{Rejection, ValidationContext};
use crate::entity::Entity;
use crate::error::EngineError;
use tracing::{debug, info, warn};

/// Returns whether the candidate moved at all.
pub fn run<E: Entity>(
    candidate: &mut E,
    ctx: &ValidationContext<'_, E>,
    basic: &Result<(), Rejection>,
) -> Result<bool, EngineError> {
    let machine = E::machine();
    let mut moved = false;

    // A chain can visit every state at most once unless the table has a
    // cycle, in which case we stop rather than spin.
    for _ in 0..machine.states().len() {
        match step(candidate, ctx, basic)? {
            Some(_) => moved = true,
            None => return Ok(moved),
        }
    }

    warn!(
        kind = %E::KIND,
        id = %candidate.id(),
        status = %candidate.status(),
        "auto-transition chain did not settle"
    );
    Ok(moved)
}

/// Try the potentials of the current status in priority order and take the
/// first one whose conditions and target state hold.
fn step<E: Entity>(
    candidate: &mut E,
    ctx: &ValidationContext<'_, E>,
    basic: &Result<(), Rejection>,
) -> Result<Option<E::Status>, EngineError> {
    let machine = E::machine();
    let source = candidate.status();
    if machine.is_terminal(source) {
        return Ok(None);
    }

    let potentials = machine
        .auto_targets(source)
        .iter()
        .filter(|potential| machine.is_declared(potential.target));

    for potential in potentials {
        let target = potential.target;

        // An undeclared edge has no guard and is allowed.
        if let Some(transition) = machine.transition(source, target) {
            match conditions_hold(transition, candidate, ctx) {
                Ok(()) => {}
                Err(rejection) if rejection.is_internal() => {
                    return Err(EngineError::Internal(rejection.summary()));
                }
                Err(rejection) => {
                    debug!(
                        kind = %E::KIND,
                        id = %candidate.id(),
                        %source,
                        %target,
                        reason = %rejection.summary(),
                        "auto-transition conditions not met"
                    );
                    continue;
                }
            }
        }

        candidate.set_status(target);
        match state::validate(candidate, ctx, basic, RigidMode::Skip) {
            Ok(()) => {
                for update in &potential.updates {
                    update(candidate, ctx);
                }
                info!(kind = %E::KIND, id = %candidate.id(), %source, %target, "auto-transitioned");
                return Ok(Some(target));
            }
            Err(rejection) => {
                candidate.set_status(source);
                if rejection.is_internal() {
                    return Err(EngineError::Internal(rejection.summary()));
                }
                debug!(
                    kind = %E::KIND,
                    id = %candidate.id(),
                    %source,
                    %target,
                    reason = %rejection.summary(),
                    "auto-transition target state not valid"
                );
            }
        }
    }

    Ok(None)
}
