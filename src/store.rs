//! Persistence over sled
//!
//! Every document kind lives in its own tree keyed by id and encoded with
//! minicbor. Activity rows are keyed `{content_type}:{target_id}:{seq}` so a
//! prefix scan returns a document's history in insertion order, and a digest
//! of each row is kept next to it.
use crate::agreement::{self, Agreement, AgreementRelated, LinkedIntervention, SiblingAgreement};
use crate::entity::{Entity, EntityKind};
use crate::error::EngineError;
use crate::intervention::{self, Intervention, InterventionRelated};
use crate::partner::{CountryProgramme, Partner};
use crate::snapshot::Activity;
use crate::types::{Day, Id};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::sync::Arc;
use tracing::debug;

pub const AGREEMENTS: &str = "agreements";
pub const INTERVENTIONS: &str = "interventions";
pub const PARTNERS: &str = "partners";
pub const COUNTRY_PROGRAMMES: &str = "country_programmes";
pub const ACTIVITIES: &str = "activities";
pub const ACTIVITY_DIGESTS: &str = "activity_digests";
pub const COUNTERS: &str = "counters";

/// A document kind the repository knows how to persist.
pub trait Stored: Entity + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const TREE: &'static str;

    /// Everything the document's rules read about other rows.
    fn related(&self, repo: &Repository) -> Result<Self::Related, EngineError>;

    /// Reference number for a document about to be created.
    fn next_reference(&self, repo: &Repository, today: Day) -> Result<String, EngineError>;

    fn set_reference(&mut self, reference: String);
}

/// One row write of a commit, with the activity describing it.
///
/// `expected` is the encoding of the row the write was derived from, `None`
/// when the row must not exist yet. The commit aborts with
/// [`EngineError::Conflict`] when the stored row differs.
#[derive(Debug, Clone)]
pub struct Staged {
    kind: EntityKind,
    tree: &'static str,
    id: Id,
    expected: Option<Vec<u8>>,
    /// `None` removes the row.
    row: Option<Vec<u8>>,
    activity: Option<Activity>,
}

fn encode<E: Stored>(entity: &E) -> Result<Vec<u8>, EngineError> {
    minicbor::to_vec(entity).map_err(EngineError::encode)
}

impl Staged {
    /// Write `entity` over `before`, or insert it when `before` is `None`.
    pub fn put<E: Stored>(entity: &E, before: Option<&E>, activity: Option<Activity>) -> Result<Self, EngineError> {
        Ok(Self {
            kind: E::KIND,
            tree: E::TREE,
            id: entity.id().clone(),
            expected: before.map(encode).transpose()?,
            row: Some(encode(entity)?),
            activity,
        })
    }

    pub fn remove<E: Stored>(entity: &E, activity: Activity) -> Result<Self, EngineError> {
        Ok(Self {
            kind: E::KIND,
            tree: E::TREE,
            id: entity.id().clone(),
            expected: Some(encode(entity)?),
            row: None,
            activity: Some(activity),
        })
    }

    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }
}

pub struct Repository {
    instance: Arc<sled::Db>,
}

impl Repository {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, EngineError> {
        Ok(self.instance.open_tree(name)?)
    }

    pub fn get<E: Stored>(&self, id: &Id) -> Result<Option<E>, EngineError> {
        match self.tree(E::TREE)?.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load<E: Stored>(&self, id: &Id) -> Result<E, EngineError> {
        self.get(id)?.ok_or_else(|| EngineError::NotFound {
            kind: E::KIND,
            id: id.clone(),
        })
    }

    pub fn all<E: Stored>(&self) -> Result<Vec<E>, EngineError> {
        self.tree(E::TREE)?
            .iter()
            .values()
            .map(|bytes| Ok(minicbor::decode(&bytes?)?))
            .collect()
    }

    /// Write a document as is, without validation or history. Used to seed
    /// reference data and fixtures.
    pub fn insert<E: Stored>(&self, entity: &E) -> Result<(), EngineError> {
        self.tree(E::TREE)?
            .insert(entity.id().as_str().as_bytes(), encode(entity)?)?;
        Ok(())
    }

    pub fn register_partner(&self, partner: &Partner) -> Result<(), EngineError> {
        let bytes = minicbor::to_vec(partner).map_err(EngineError::encode)?;
        self.tree(PARTNERS)?.insert(partner.id.as_str().as_bytes(), bytes)?;
        Ok(())
    }

    pub fn partner(&self, id: &Id) -> Result<Option<Partner>, EngineError> {
        match self.tree(PARTNERS)?.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn register_country_programme(&self, programme: &CountryProgramme) -> Result<(), EngineError> {
        let bytes = minicbor::to_vec(programme).map_err(EngineError::encode)?;
        self.tree(COUNTRY_PROGRAMMES)?
            .insert(programme.id.as_str().as_bytes(), bytes)?;
        Ok(())
    }

    pub fn country_programme(&self, id: &Id) -> Result<Option<CountryProgramme>, EngineError> {
        match self.tree(COUNTRY_PROGRAMMES)?.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Next value of a named counter, starting at 1.
    pub fn next_sequence(&self, scope: &str) -> Result<u64, EngineError> {
        let value = self.tree(COUNTERS)?.update_and_fetch(scope.as_bytes(), |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;

        value
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| EngineError::Internal(format!("counter {scope} is corrupt")))
    }

    /// Apply every staged write and its activity in one transaction, or none
    /// of them when any row no longer holds what its write was derived from.
    pub fn commit(&self, staged: &[Staged]) -> Result<(), EngineError> {
        let mut rows = Vec::new();
        for activity in staged.iter().filter_map(Staged::activity) {
            let (hash, cbor) = activity.build()?;
            rows.push((activity_key(activity, self.instance.generate_id()?), hash, cbor));
        }

        let agreements = self.tree(AGREEMENTS)?;
        let interventions = self.tree(INTERVENTIONS)?;
        let activities = self.tree(ACTIVITIES)?;
        let digests = self.tree(ACTIVITY_DIGESTS)?;

        (&agreements, &interventions, &activities, &digests)
            .transaction(|(agreements, interventions, activities, digests)| {
                for write in staged {
                    let tree = match write.tree {
                        AGREEMENTS => agreements,
                        INTERVENTIONS => interventions,
                        other => {
                            return Err(ConflictableTransactionError::Abort(EngineError::Internal(
                                format!("no transactional tree named {other}"),
                            )));
                        }
                    };
                    let key = write.id.as_str().as_bytes();
                    let current = tree.get(key)?;
                    if current.as_deref() != write.expected.as_deref() {
                        return Err(ConflictableTransactionError::Abort(EngineError::Conflict {
                            kind: write.kind,
                            id: write.id.clone(),
                        }));
                    }
                    match &write.row {
                        Some(bytes) => {
                            tree.insert(key, bytes.as_slice())?;
                        }
                        None => {
                            tree.remove(key)?;
                        }
                    }
                }
                for (key, hash, cbor) in &rows {
                    activities.insert(key.as_bytes(), cbor.as_slice())?;
                    digests.insert(key.as_bytes(), hash.as_bytes())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<EngineError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => EngineError::Storage(e),
            })?;

        debug!(writes = staged.len(), activities = rows.len(), "commit applied");
        Ok(())
    }

    /// History of a document, oldest first. Survives deletion of the target.
    pub fn activities_for(&self, kind: EntityKind, id: &Id) -> Result<Vec<Activity>, EngineError> {
        let prefix = format!("{}:{}:", kind.tag(), id);
        self.tree(ACTIVITIES)?
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|bytes| Ok(minicbor::decode(&bytes?)?))
            .collect()
    }

    /// Whether every activity row of a document still matches its digest.
    pub fn verify_history(&self, kind: EntityKind, id: &Id) -> Result<bool, EngineError> {
        let prefix = format!("{}:{}:", kind.tag(), id);
        let digests = self.tree(ACTIVITY_DIGESTS)?;

        for entry in self.tree(ACTIVITIES)?.scan_prefix(prefix.as_bytes()) {
            let (key, cbor) = entry?;
            let expected = sha256::digest(cbor.as_ref());
            match digests.get(&key)? {
                Some(stored) if stored.as_ref() == expected.as_bytes() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

fn activity_key(activity: &Activity, seq: u64) -> String {
    format!("{}:{}:{seq:020}", activity.target_content_type, activity.target_id)
}

impl Stored for Agreement {
    const TREE: &'static str = AGREEMENTS;

    fn related(&self, repo: &Repository) -> Result<AgreementRelated, EngineError> {
        let country_programme = match &self.country_programme {
            Some(id) => repo.country_programme(id)?,
            None => None,
        };

        let siblings = repo
            .all::<Agreement>()?
            .into_iter()
            .filter(|other| {
                other.id != self.id
                    && other.partner == self.partner
                    && other.country_programme == self.country_programme
            })
            .map(|other| SiblingAgreement {
                id: other.id,
                agreement_type: other.agreement_type,
                status: other.status,
                start: other.start,
            })
            .collect();

        let interventions = repo
            .all::<Intervention>()?
            .into_iter()
            .filter(|document| document.agreement == self.id)
            .map(|document| LinkedIntervention {
                id: document.id,
                status: document.status,
                start: document.start,
                end: document.end,
            })
            .collect();

        Ok(AgreementRelated {
            partner: repo.partner(&self.partner)?,
            country_programme,
            siblings,
            interventions,
        })
    }

    fn next_reference(&self, repo: &Repository, today: Day) -> Result<String, EngineError> {
        let code = repo
            .partner(&self.partner)?
            .map(|partner| partner.short_code)
            .unwrap_or_default();
        let year = self.signed_by_unicef_date.unwrap_or(today).year();
        let seq = repo.next_sequence(&format!("agreement:{code}:{}:{year}", self.agreement_type))?;

        Ok(agreement::reference_number(&code, self.agreement_type, year, seq))
    }

    fn set_reference(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }
}

impl Stored for Intervention {
    const TREE: &'static str = INTERVENTIONS;

    fn related(&self, repo: &Repository) -> Result<InterventionRelated, EngineError> {
        let siblings = repo
            .all::<Intervention>()?
            .iter()
            .filter(|other| other.id != self.id && other.agreement == self.agreement)
            .count();

        Ok(InterventionRelated {
            agreement: repo.get::<Agreement>(&self.agreement)?,
            siblings,
        })
    }

    fn next_reference(&self, repo: &Repository, today: Day) -> Result<String, EngineError> {
        let agreement = repo.load::<Agreement>(&self.agreement)?;
        let base = agreement
            .reference_number
            .unwrap_or_else(|| agreement.id.to_string());
        let year = today.year();
        let seq = repo.next_sequence(&format!(
            "intervention:{}:{}:{year}",
            self.agreement, self.document_type
        ))?;

        Ok(intervention::reference_number(&base, self.document_type, year, seq))
    }

    fn set_reference(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::AgreementType;
    use crate::partner::PartnerType;
    use tempfile::tempdir;

    fn repository() -> anyhow::Result<(tempfile::TempDir, Repository)> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("store.db"))?;
        Ok((temp_dir, Repository::new(Arc::new(db))))
    }

    #[test]
    fn counters_start_at_one_per_scope() -> anyhow::Result<()> {
        let (_dir, repo) = repository()?;

        assert_eq!(repo.next_sequence("a")?, 1);
        assert_eq!(repo.next_sequence("a")?, 2);
        assert_eq!(repo.next_sequence("b")?, 1);
        Ok(())
    }

    #[test]
    fn raw_insert_round_trips_documents() -> anyhow::Result<()> {
        let (_dir, repo) = repository()?;
        let partner = Partner::new("Helping Hands", "HH", PartnerType::CivilSocietyOrganization)?;
        repo.register_partner(&partner)?;

        let agreement = Agreement::new(AgreementType::MOU, &partner.id)?;
        repo.insert(&agreement)?;

        assert_eq!(repo.load::<Agreement>(&agreement.id)?, agreement);
        assert_eq!(repo.partner(&partner.id)?, Some(partner));
        assert!(matches!(
            repo.load::<Intervention>(&agreement.id),
            Err(EngineError::NotFound { kind: EntityKind::Intervention, .. })
        ));
        Ok(())
    }

    #[test]
    fn stale_writes_are_refused() -> anyhow::Result<()> {
        let (_dir, repo) = repository()?;
        let partner = Partner::new("Helping Hands", "HH", PartnerType::CivilSocietyOrganization)?;
        let stored = Agreement::new(AgreementType::MOU, &partner.id)?;
        repo.insert(&stored)?;

        // Two writers derive their change from the same stored row.
        let first = stored.clone().set_attached_agreement("first.pdf");
        let second = stored.clone().set_attached_agreement("second.pdf");
        repo.commit(&[Staged::put(&first, Some(&stored), None)?])?;
        let stale = repo.commit(&[Staged::put(&second, Some(&stored), None)?]);

        assert!(matches!(stale, Err(EngineError::Conflict { kind: EntityKind::Agreement, .. })));
        assert_eq!(repo.load::<Agreement>(&stored.id)?, first);

        let duplicate = repo.commit(&[Staged::put(&stored, None, None)?]);
        assert!(duplicate.as_ref().is_err_and(EngineError::is_conflict));
        Ok(())
    }
}
