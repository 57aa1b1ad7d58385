//! Service layer API for agreement and intervention lifecycles
//!
//! Every mutation follows the same path: take the row lock, read the stored
//! pre-image, apply the change, run the complete validator, snapshot the
//! difference and commit the row together with its activity.
use crate::agreement::{Agreement, AgreementStatus};
use crate::compare::Comparator;
use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::error::EngineError;
use crate::intervention::court::{self, CourtAction, ReviewDecision};
use crate::intervention::{DocumentType, Intervention, InterventionStatus, ReviewType};
use crate::partner::{CountryProgramme, Partner};
use crate::snapshot::{self, Activity, ActivityAction, capture};
use crate::store::{Repository, Staged, Stored};
use crate::types::{Day, Id};
use crate::user::User;
use crate::validation::{
    CompleteValidator, Failure, PERMISSION_FAIL, Rejection, RejectionKind, ValidationErrors,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Result of a committed save. `activity` is `None` when nothing changed.
#[derive(Debug, Clone)]
pub struct Saved<E> {
    pub entity: E,
    pub activity: Option<Activity>,
    pub auto_transitioned: bool,
}

/// Writes a document implies on other rows. They are committed in the same
/// transaction as the document itself and are not validated.
pub trait Cascade: Stored {
    fn cascade(
        &self,
        prior: Option<&Self>,
        repo: &Repository,
        user: &User,
        config: &EngineConfig,
    ) -> Result<Vec<Staged>, EngineError>;

    /// Whether other rows still point at this document.
    fn referenced(&self, repo: &Repository) -> Result<bool, EngineError>;
}

pub struct PartnershipService {
    repo: Repository,
    config: EngineConfig,
    /// Row locks of documents with a save in flight. An entry lives only
    /// while some caller holds or waits for it.
    locks: Mutex<HashMap<Id, Arc<Mutex<()>>>>,
    today: Option<Day>,
}

impl PartnershipService {
    pub fn new(instance: Arc<sled::Db>, config: EngineConfig) -> Self {
        Self {
            repo: Repository::new(instance),
            config,
            locks: Mutex::new(HashMap::new()),
            today: None,
        }
    }

    /// Pin the calendar day date predicates are evaluated against.
    pub fn with_today(mut self, today: Day) -> Self {
        self.today = Some(today);
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn today(&self) -> Day {
        self.today.unwrap_or_else(Day::today)
    }

    fn lock_table(&self) -> Result<MutexGuard<'_, HashMap<Id, Arc<Mutex<()>>>>, EngineError> {
        self.locks
            .lock()
            .map_err(|_| EngineError::Internal("row lock table poisoned".to_string()))
    }

    /// Run `f` holding the row lock of `id`.
    fn with_row<T>(&self, id: &Id, f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
        let row = self.lock_table()?.entry(id.clone()).or_default().clone();

        let result = match row.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(EngineError::Internal("row lock poisoned".to_string())),
        };

        // Only the table and this caller still reference an idle lock.
        let mut locks = self.lock_table()?;
        drop(row);
        if locks.get(id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(id);
        }
        result
    }

    pub fn register_partner(&self, partner: &Partner) -> Result<(), EngineError> {
        self.repo.register_partner(partner)
    }

    pub fn register_country_programme(&self, programme: &CountryProgramme) -> Result<(), EngineError> {
        self.repo.register_country_programme(programme)
    }

    pub fn get<E: Stored>(&self, id: &Id) -> Result<E, EngineError> {
        self.repo.load(id)
    }

    pub fn activities_for<E: Stored>(&self, id: &Id) -> Result<Vec<Activity>, EngineError> {
        self.repo.activities_for(E::KIND, id)
    }

    /// Store a new document. Whatever status the candidate carries, it starts
    /// in its machine's initial status and may auto-transition from there.
    pub fn create<E: Cascade>(&self, mut candidate: E, user: Option<&User>) -> Result<Saved<E>, EngineError> {
        let user = user.ok_or(EngineError::Anonymous)?;
        candidate.set_status(E::initial_status());
        let id = candidate.id().clone();

        self.with_row(&id, || {
            if self.repo.get::<E>(&id)?.is_some() {
                return Err(EngineError::Internal(format!("{} {id} already exists", E::KIND)));
            }
            self.save(candidate, None, user)
        })
    }

    /// Apply `patch` to the stored document and save it.
    pub fn update<E: Cascade>(
        &self,
        id: &Id,
        user: Option<&User>,
        patch: impl FnOnce(&mut E),
    ) -> Result<Saved<E>, EngineError> {
        self.mutate(id, user, |candidate, _| {
            patch(candidate);
            Ok(())
        })
    }

    /// Request a manual status change. `extra` sets whatever the transition
    /// needs alongside the status, such as a termination document.
    pub fn transition<E: Cascade>(
        &self,
        id: &Id,
        target: E::Status,
        user: Option<&User>,
        extra: impl FnOnce(&mut E),
    ) -> Result<Saved<E>, EngineError> {
        self.mutate(id, user, |candidate, _| {
            extra(candidate);
            candidate.set_status(target);
            Ok(())
        })
    }

    /// Remove a draft document. Its history stays readable.
    pub fn delete<E: Cascade>(&self, id: &Id, user: Option<&User>) -> Result<Activity, EngineError> {
        let user = user.ok_or(EngineError::Anonymous)?;
        self.with_row(id, || self.remove::<E>(id, user))
    }

    fn remove<E: Cascade>(&self, id: &Id, user: &User) -> Result<Activity, EngineError> {
        let entity = self.repo.load::<E>(id)?;
        if entity.status() != E::initial_status() {
            return Err(EngineError::Rejected {
                kind: RejectionKind::State,
                errors: ValidationErrors::single(
                    "status",
                    format!(
                        "Only a {} {} can be deleted",
                        E::initial_status(),
                        E::KIND.label()
                    ),
                ),
            });
        }
        if entity.referenced(&self.repo)? {
            return Err(EngineError::Protected {
                kind: E::KIND,
                id: id.clone(),
            });
        }

        let comparator = Comparator::new(E::schema(), self.config.money_rounding);
        let before = capture(&entity)?;
        let activity = snapshot::record(
            E::KIND,
            id,
            ActivityAction::Delete,
            Some(user),
            Some(&before),
            None,
            &comparator,
        )?;
        self.repo.commit(&[Staged::remove(&entity, activity.clone())?])?;

        info!(kind = %E::KIND, %id, by = %user.id, "deleted");
        Ok(activity)
    }

    /// Perform a negotiation action on a draft intervention.
    pub fn court(&self, id: &Id, action: CourtAction, user: Option<&User>) -> Result<Saved<Intervention>, EngineError> {
        let today = self.today();
        self.mutate(id, user, |intervention, user| {
            action.apply(intervention, user, today).map_err(refused)
        })
    }

    pub fn submit_for_review(
        &self,
        id: &Id,
        review_type: ReviewType,
        overall_approver: &Id,
        user: Option<&User>,
    ) -> Result<Saved<Intervention>, EngineError> {
        let today = self.today();
        self.mutate(id, user, |intervention, user| {
            court::submit_for_review(intervention, user, review_type, overall_approver, today).map_err(refused)
        })
    }

    pub fn review_decision(
        &self,
        id: &Id,
        decision: ReviewDecision,
        user: Option<&User>,
    ) -> Result<Saved<Intervention>, EngineError> {
        let today = self.today();
        self.mutate(id, user, |intervention, user| {
            court::decide(intervention, decision, user, today).map_err(refused)
        })
    }

    fn mutate<E: Cascade>(
        &self,
        id: &Id,
        user: Option<&User>,
        change: impl FnOnce(&mut E, &User) -> Result<(), EngineError>,
    ) -> Result<Saved<E>, EngineError> {
        let user = user.ok_or(EngineError::Anonymous)?;
        self.with_row(id, || {
            let prior = self.repo.load::<E>(id)?;
            let mut candidate = prior.clone();
            change(&mut candidate, user)?;

            self.save(candidate, Some(prior), user)
        })
    }

    /// Validate, snapshot and commit. The caller holds the row lock.
    ///
    /// Whether anything is written depends on the document itself, the
    /// snapshot diff only describes the change.
    fn save<E: Cascade>(&self, mut candidate: E, prior: Option<E>, user: &User) -> Result<Saved<E>, EngineError> {
        let related = candidate.related(&self.repo)?;
        let outcome = CompleteValidator::new(&self.config)
            .on(self.today())
            .validate(&mut candidate, prior.as_ref(), Some(user), &related)?;

        let auto_transitioned = match outcome.into_result() {
            Ok(moved) => moved,
            Err(e) => {
                warn!(kind = %E::KIND, id = %candidate.id(), error = %e, "save rejected");
                return Err(e);
            }
        };

        if prior.is_none() {
            let reference = candidate.next_reference(&self.repo, self.today())?;
            candidate.set_reference(reference);
        }

        if prior.as_ref() == Some(&candidate) {
            debug!(kind = %E::KIND, id = %candidate.id(), "nothing changed");
            return Ok(Saved {
                entity: candidate,
                activity: None,
                auto_transitioned,
            });
        }

        let comparator = Comparator::new(E::schema(), self.config.money_rounding);
        let after = capture(&candidate)?;
        let (action, before) = match &prior {
            Some(prior) => (ActivityAction::Update, Some(capture(prior)?)),
            None => (ActivityAction::Create, None),
        };

        let activity = snapshot::record(
            E::KIND,
            candidate.id(),
            action,
            Some(user),
            before.as_ref(),
            Some(&after),
            &comparator,
        )?;

        let mut staged = vec![Staged::put(&candidate, prior.as_ref(), Some(activity.clone()))?];
        staged.extend(candidate.cascade(prior.as_ref(), &self.repo, user, &self.config)?);
        self.repo.commit(&staged)?;

        info!(
            kind = %E::KIND,
            id = %candidate.id(),
            status = %candidate.status(),
            %action,
            auto_transitioned,
            cascaded = staged.len() - 1,
            "saved"
        );
        Ok(Saved {
            entity: candidate,
            activity: Some(activity),
            auto_transitioned,
        })
    }
}

/// Map a refused negotiation action to a permission rejection.
fn refused(failure: Failure) -> EngineError {
    let rejection = Rejection::from_failure(RejectionKind::Permission, failure, PERMISSION_FAIL);
    if rejection.is_internal() {
        return EngineError::Internal(rejection.summary());
    }
    EngineError::Rejected {
        kind: rejection.kind,
        errors: Intervention::machine().map(&rejection.issues),
    }
}

/// Stage a direct write of `after` with its update activity, or nothing when
/// the row is unchanged. The write only applies while the row still equals
/// `before`.
fn follow_up<E: Stored>(before: &E, after: &E, user: &User, config: &EngineConfig) -> Result<Option<Staged>, EngineError> {
    if before == after {
        return Ok(None);
    }
    let comparator = Comparator::new(E::schema(), config.money_rounding);
    let (old, new) = (capture(before)?, capture(after)?);

    let activity = snapshot::record(
        E::KIND,
        after.id(),
        ActivityAction::Update,
        Some(user),
        Some(&old),
        Some(&new),
        &comparator,
    )?;
    Ok(Some(Staged::put(after, Some(before), Some(activity))?))
}

impl Cascade for Agreement {
    /// Suspending or terminating an agreement takes its running programme
    /// documents along.
    fn cascade(
        &self,
        prior: Option<&Self>,
        repo: &Repository,
        user: &User,
        config: &EngineConfig,
    ) -> Result<Vec<Staged>, EngineError> {
        let target = match self.status {
            AgreementStatus::Suspended => InterventionStatus::Suspended,
            AgreementStatus::Terminated => InterventionStatus::Terminated,
            _ => return Ok(Vec::new()),
        };
        if prior.is_some_and(|prior| prior.status == self.status) {
            return Ok(Vec::new());
        }

        let mut staged = Vec::new();
        for document in repo.all::<Intervention>()? {
            if document.agreement != self.id
                || !document.is_pd()
                || matches!(
                    document.status,
                    InterventionStatus::Draft
                        | InterventionStatus::Closed
                        | InterventionStatus::Ended
                        | InterventionStatus::Terminated
                )
            {
                continue;
            }
            let mut updated = document.clone();
            updated.status = target;
            debug!(agreement = %self.id, intervention = %updated.id, status = %target, "cascading status");
            staged.extend(follow_up(&document, &updated, user, config)?);
        }
        Ok(staged)
    }

    fn referenced(&self, repo: &Repository) -> Result<bool, EngineError> {
        Ok(repo
            .all::<Intervention>()?
            .iter()
            .any(|document| document.agreement == self.id))
    }
}

impl Cascade for Intervention {
    /// An SSFA agreement mirrors the dates and lifecycle of its single
    /// document.
    fn cascade(
        &self,
        _prior: Option<&Self>,
        repo: &Repository,
        user: &User,
        config: &EngineConfig,
    ) -> Result<Vec<Staged>, EngineError> {
        if self.document_type != DocumentType::SSFA {
            return Ok(Vec::new());
        }
        let Some(agreement) = repo.get::<Agreement>(&self.agreement)? else {
            return Ok(Vec::new());
        };

        let mut updated = agreement.clone();
        updated.start = self.start;
        updated.end = self.end;
        updated.status = match self.status {
            InterventionStatus::Signed | InterventionStatus::Active => AgreementStatus::Signed,
            InterventionStatus::Ended | InterventionStatus::Closed => AgreementStatus::Ended,
            InterventionStatus::Suspended => AgreementStatus::Suspended,
            InterventionStatus::Terminated => AgreementStatus::Terminated,
            _ => agreement.status,
        };

        Ok(follow_up(&agreement, &updated, user, config)?.into_iter().collect())
    }

    fn referenced(&self, _repo: &Repository) -> Result<bool, EngineError> {
        Ok(false)
    }
}
