//! The coordinator composing every validation layer for one save
use super::state::RigidMode;
use super::{
    Rejection, RejectionKind, ValidationContext, ValidationErrors, basic, driver, guard, state,
};
use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::error::EngineError;
use crate::types::Day;
use crate::user::User;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Valid {
        /// The driver moved the candidate, the caller must write it through.
        auto_transitioned: bool,
    },
    Invalid {
        kind: RejectionKind,
        errors: ValidationErrors,
    },
}

impl Outcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Outcome::Valid { .. })
    }

    pub fn errors(&self) -> Option<&ValidationErrors> {
        match self {
            Outcome::Invalid { errors, .. } => Some(errors),
            Outcome::Valid { .. } => None,
        }
    }

    /// Turn a controlled failure into [`EngineError::Rejected`].
    pub fn into_result(self) -> Result<bool, EngineError> {
        match self {
            Outcome::Valid { auto_transitioned } => Ok(auto_transitioned),
            Outcome::Invalid { kind, errors } => Err(EngineError::Rejected { kind, errors }),
        }
    }
}

pub struct CompleteValidator<'c> {
    config: &'c EngineConfig,
    today: Day,
    stateless: bool,
}

impl<'c> CompleteValidator<'c> {
    pub fn new(config: &'c EngineConfig) -> Self {
        Self {
            config,
            today: Day::today(),
            stateless: false,
        }
    }

    /// Evaluate date predicates against a fixed day instead of the clock.
    pub fn on(mut self, today: Day) -> Self {
        self.today = today;
        self
    }

    /// Skip transition and state semantics for this call only.
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Validate `candidate` against `prior`, mutating it in place with
    /// normalisation, manual side effects and auto-transitions.
    ///
    /// Controlled failures come back as [`Outcome::Invalid`]. Only an
    /// inconsistency in the engine itself is an `Err`.
    pub fn validate<E: Entity>(
        &self,
        candidate: &mut E,
        prior: Option<&E>,
        user: Option<&User>,
        related: &E::Related,
    ) -> Result<Outcome, EngineError> {
        let machine = E::machine();
        let ctx = ValidationContext {
            prior,
            user,
            related,
            today: self.today,
            config: self.config,
        };

        for step in machine.prepare_steps() {
            if let Err(failure) = (step.run)(candidate, &ctx) {
                return self.reject::<E>(Rejection::from_failure(step.kind, failure, step.name));
            }
        }

        let basic = basic::validate(candidate, &ctx);
        if let Err(rejection) = &basic {
            return self.reject::<E>(rejection.clone());
        }

        if self.stateless || self.config.is_stateless(E::KIND) {
            debug!(kind = %E::KIND, id = %candidate.id(), "stateless save");
            return Ok(Outcome::Valid {
                auto_transitioned: false,
            });
        }

        if let Some(prior) = prior {
            let (source, target) = (prior.status(), candidate.status());

            if source != target {
                if let Err(rejection) = guard::check_manual(candidate, &ctx, source, target) {
                    return self.reject::<E>(rejection);
                }
            }

            if let Err(rejection) = state::validate(candidate, &ctx, &basic, RigidMode::Enforce) {
                return self.reject::<E>(rejection);
            }

            if source != target {
                for update in machine.side_effects(source, target) {
                    update(candidate, &ctx);
                }
                info!(kind = %E::KIND, id = %candidate.id(), %source, %target, "transitioned");
            }
        }

        if self.config.disable_auto_transitions {
            return Ok(Outcome::Valid {
                auto_transitioned: false,
            });
        }

        let auto_transitioned = driver::run(candidate, &ctx, &basic)?;
        Ok(Outcome::Valid { auto_transitioned })
    }

    fn reject<E: Entity>(&self, rejection: Rejection) -> Result<Outcome, EngineError> {
        if rejection.is_internal() {
            return Err(EngineError::Internal(rejection.summary()));
        }

        let errors = E::machine().map(&rejection.issues);
        debug!(kind = %E::KIND, rejection = %rejection.kind, %errors, "save rejected");
        Ok(Outcome::Invalid {
            kind: rejection.kind,
            errors,
        })
    }
}
