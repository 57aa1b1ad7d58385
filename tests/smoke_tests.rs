//! Smoke tests for the engine's outer surface
//!
//! Configuration loading, engine switches, error rendering and activity
//! digests, exercised through the public API only.

use partnership_engine::agreement::{Agreement, AgreementStatus, AgreementType};
use partnership_engine::config::EngineConfig;
use partnership_engine::entity::EntityKind;
use partnership_engine::error::EngineError;
use partnership_engine::partner::{CountryProgramme, Partner, PartnerType};
use partnership_engine::service::PartnershipService;
use partnership_engine::types::{Day, Id};
use partnership_engine::user::User;
use partnership_engine::validation::{RejectionKind, ValidationErrors};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

fn day(year: i32, month: u32, day: u32) -> Day {
    Day::ymd(year, month, day).unwrap()
}

/// Service over a fresh database with one partner and programme registered.
fn service_with(config: EngineConfig) -> anyhow::Result<(TempDir, PartnershipService, Agreement)> {
    let dir = tempdir()?;
    let db = sled::open(dir.path().join("smoke.db"))?;
    let service = PartnershipService::new(Arc::new(db), config).with_today(day(2024, 6, 1));

    let partner = Partner::new("Save Lives", "SL", PartnerType::CivilSocietyOrganization)?;
    let programme = CountryProgramme::new("CP 2021-2025", day(2021, 1, 1), day(2025, 12, 31))?;
    service.register_partner(&partner)?;
    service.register_country_programme(&programme)?;

    // Signed, but already past its end date.
    let agreement = Agreement::new(AgreementType::PCA, &partner.id)?
        .set_country_programme(&programme.id)
        .set_signed_by_unicef(day(2024, 1, 10), &Id::new("user")?)
        .set_signed_by_partner(day(2024, 1, 20), &Id::new("user")?)
        .set_start(day(2024, 1, 20))
        .set_end(day(2024, 5, 31))
        .set_attached_agreement("pca-signed.pdf")
        .set_status(AgreementStatus::Signed);
    service.repository().insert(&agreement)?;

    Ok((dir, service, agreement))
}

fn officer() -> anyhow::Result<User> {
    Ok(User::unicef(Id::new("user")?, "Programme Officer"))
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn yaml_config_overrides_defaults() -> anyhow::Result<()> {
        let config = EngineConfig::from_yaml_str(
            "stateless_kinds: [intervention]\ndisable_auto_transitions: true\n",
        )?;

        assert!(config.is_stateless(EntityKind::Intervention));
        assert!(!config.is_stateless(EntityKind::Agreement));
        assert!(config.disable_auto_transitions);
        assert_eq!(config.money_rounding, 2);
        Ok(())
    }

    #[test]
    fn unknown_kind_in_yaml_is_a_config_error() {
        let result = EngineConfig::from_yaml_str("stateless_kinds: [budget]\n");

        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn empty_yaml_is_the_default_config() -> anyhow::Result<()> {
        assert_eq!(EngineConfig::from_yaml_str("{}")?, EngineConfig::default());
        Ok(())
    }
}

#[cfg(test)]
mod switch_tests {
    use super::*;

    /// With auto-transitions off an expired agreement stays signed.
    #[test]
    fn disabled_auto_transitions_leave_status_alone() -> anyhow::Result<()> {
        let (_dir, service, agreement) = service_with(EngineConfig::default().without_auto_transitions())?;

        let saved = service.update::<Agreement>(&agreement.id, Some(&officer()?), |_| {})?;

        assert_eq!(saved.entity.status, AgreementStatus::Signed);
        assert!(!saved.auto_transitioned);
        assert!(saved.activity.is_none());
        Ok(())
    }

    /// A stateless kind only gets basic validation, so any status is writable.
    #[test]
    fn stateless_kind_accepts_any_status_change() -> anyhow::Result<()> {
        let (_dir, service, agreement) =
            service_with(EngineConfig::default().with_stateless(EntityKind::Agreement))?;

        let saved = service.transition::<Agreement>(&agreement.id, AgreementStatus::Draft, Some(&officer()?), |_| {})?;

        assert_eq!(saved.entity.status, AgreementStatus::Draft);
        assert!(!saved.auto_transitioned);
        assert_eq!(service.get::<Agreement>(&agreement.id)?.status, AgreementStatus::Draft);
        Ok(())
    }

    #[test]
    fn stateless_kind_still_runs_basic_rules() -> anyhow::Result<()> {
        let (_dir, service, agreement) =
            service_with(EngineConfig::default().with_stateless(EntityKind::Agreement))?;

        let result = service.update::<Agreement>(&agreement.id, Some(&officer()?), |a| {
            a.signed_by_unicef_date = Some(day(2024, 7, 1));
        });

        match result {
            Err(EngineError::Rejected { kind, errors }) => {
                assert_eq!(kind, RejectionKind::Basic);
                assert!(errors.contains_key("signed_by_unicef_date"));
            }
            other => panic!("expected a basic rejection, got {other:?}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod surface_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_errors_render_as_field_map() {
        let mut errors = ValidationErrors::single("status", "This status change is not allowed");
        errors.push("end", "too late");
        errors.push("end", "too late");

        assert_eq!(
            errors.to_json(),
            json!({"end": ["too late"], "status": ["This status change is not allowed"]})
        );
        assert_eq!(errors.to_string(), "end: too late; status: This status change is not allowed");
    }

    #[test]
    fn rejected_error_exposes_its_field_messages() {
        let err = EngineError::Rejected {
            kind: RejectionKind::Transition,
            errors: ValidationErrors::single("status", "GENERIC TRANSITION FAIL"),
        };

        assert_eq!(
            err.validation_errors().and_then(|e| e.get("status")),
            Some(&["GENERIC TRANSITION FAIL".to_string()][..])
        );
        assert!(EngineError::Anonymous.validation_errors().is_none());
    }

    /// Activities are digested on write, the digest is a sha256 hex string
    /// that stays the same for the same row.
    #[test]
    fn activity_digest_is_stable() -> anyhow::Result<()> {
        let (_dir, service, agreement) = service_with(EngineConfig::default())?;

        let saved = service.update::<Agreement>(&agreement.id, Some(&officer()?), |_| {})?;
        let activity = saved.activity.expect("auto-end records an activity");

        let (first, cbor) = activity.build()?;
        let (second, _) = activity.build()?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(!cbor.is_empty());
        assert_eq!(activity.kind(), Some(EntityKind::Agreement));
        assert_eq!(activity.target_content_type, "partners.agreement");
        assert!(service.repository().verify_history(EntityKind::Agreement, &agreement.id)?);
        Ok(())
    }
}
