use super::court::{CourtAction, ReviewDecision, decide, submit_for_review};
use super::*;
use crate::agreement::{AgreementStatus, AgreementType};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::user::{PARTNERSHIP_MANAGER, PRC_SECRETARY, User};
use crate::validation::{CompleteValidator, Outcome, RejectionKind};

fn day(year: i32, month: u32, day: u32) -> Day {
    Day::ymd(year, month, day).unwrap()
}

const TODAY: (i32, u32, u32) = (2024, 6, 1);

fn today() -> Day {
    day(TODAY.0, TODAY.1, TODAY.2)
}

struct Fixture {
    agreement: Agreement,
    config: EngineConfig,
    officer: User,
    manager: User,
    partner_user: User,
}

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        let partner = Id::from("partner-1");
        let agreement = Agreement::new(AgreementType::PCA, &partner)?
            .set_country_programme(&Id::from("cp-1"))
            .set_start(day(2024, 1, 1))
            .set_end(day(2025, 12, 31))
            .set_status(AgreementStatus::Signed);

        Ok(Self {
            agreement,
            config: EngineConfig::default(),
            officer: User::unicef(Id::from("officer-1"), "Programme Officer"),
            manager: User::unicef(Id::from("manager-1"), "Partnership Manager").with_group(PARTNERSHIP_MANAGER),
            partner_user: User::partner_staff(Id::from("partner-staff-1"), "Partner Focal Point", partner),
        })
    }

    fn related(&self) -> InterventionRelated {
        InterventionRelated {
            agreement: Some(self.agreement.clone()),
            siblings: 0,
        }
    }

    fn draft(&self) -> anyhow::Result<Intervention> {
        Ok(Intervention::new(DocumentType::PD, &self.agreement, "Nutrition support")?)
    }

    /// Everything signing and activation look for.
    fn ready(&self) -> anyhow::Result<Intervention> {
        Ok(self
            .draft()?
            .set_dates(day(2024, 2, 1), day(2024, 12, 31))
            .set_signed_by_unicef(day(2024, 1, 15), &Id::from("signatory-1"))
            .set_signed_by_partner(day(2024, 1, 20), &Id::from("officer-9"))
            .set_signed_pd_document("pd-signed.pdf")
            .set_budget(Amount::new(50_000), Amount::new(5_000), Amount::new(2_000))
            .add_fr(
                FundReservation::new("0400012345", day(2024, 2, 1), day(2024, 12, 31))?.set_amounts(
                    Amount::new(50_000),
                    Amount::new(20_000),
                    Amount::new(30_000),
                ),
            )
            .add_sector_location(&Id::from("location-1"))
            .add_unicef_focal_point(&Id::from("officer-1"))
            .add_partner_focal_point(&Id::from("partner-staff-1")))
    }

    fn validate(
        &self,
        candidate: &mut Intervention,
        prior: Option<&Intervention>,
        user: &User,
        related: &InterventionRelated,
    ) -> Result<Outcome, EngineError> {
        CompleteValidator::new(&self.config)
            .on(today())
            .validate(candidate, prior, Some(user), related)
    }
}

#[test]
fn programme_document_requires_a_pca() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut related = f.related();
    if let Some(agreement) = related.agreement.as_mut() {
        agreement.agreement_type = AgreementType::MOU;
    }
    let mut candidate = f.draft()?;

    let outcome = f.validate(&mut candidate, None, &f.officer, &related)?;

    assert_eq!(
        outcome.errors().unwrap().get("document_type"),
        Some(&["Document type PD or SHPD can only be associated with a PCA agreement.".to_string()][..])
    );
    Ok(())
}

#[test]
fn ssfa_agreement_holds_a_single_document() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut related = f.related();
    if let Some(agreement) = related.agreement.as_mut() {
        agreement.agreement_type = AgreementType::SSFA;
    }
    related.siblings = 1;
    let mut candidate = Intervention::new(DocumentType::SSFA, &f.agreement, "Small grant")?;

    let outcome = f.validate(&mut candidate, None, &f.officer, &related)?;

    assert!(outcome.errors().unwrap().contains_key("agreement"));
    Ok(())
}

#[test]
fn missing_agreement_row_is_an_internal_error() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut candidate = f.draft()?;

    let result = f.validate(&mut candidate, None, &f.officer, &InterventionRelated::default());

    assert!(matches!(result, Err(EngineError::Internal(_))));
    Ok(())
}

#[test]
fn ready_draft_chains_through_signed_to_active() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut candidate = f.ready()?;

    let outcome = f.validate(&mut candidate, None, &f.officer, &f.related())?;

    assert_eq!(outcome, Outcome::Valid { auto_transitioned: true });
    assert_eq!(candidate.status, InterventionStatus::Active);
    assert_eq!(candidate.signed_on, Some(day(2024, 1, 20)));
    assert_eq!(candidate.activated_on, Some(today()));
    assert_eq!(candidate.ended_on, None);
    Ok(())
}

#[test]
fn signing_waits_for_a_suspended_agreement() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut related = f.related();
    if let Some(agreement) = related.agreement.as_mut() {
        agreement.status = AgreementStatus::Suspended;
    }

    let mut candidate = f.ready()?;
    let outcome = f.validate(&mut candidate, None, &f.officer, &related)?;
    assert_eq!(outcome, Outcome::Valid { auto_transitioned: false });
    assert_eq!(candidate.status, InterventionStatus::Draft);

    let prior = f.ready()?;
    let mut candidate = prior.clone().set_status(InterventionStatus::Signed);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &related)?;
    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Transition, .. }));
    assert!(outcome.errors().unwrap().contains_key("agreement"));
    Ok(())
}

#[test]
fn activation_is_reserved_to_partnership_managers() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.ready()?.set_status(InterventionStatus::Signed);

    let mut candidate = prior.clone().set_status(InterventionStatus::Active);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Permission, .. }));
    assert_eq!(
        outcome.errors().unwrap().get("status"),
        Some(&["Only Partnership Managers can execute this transition".to_string()][..])
    );

    let mut candidate = prior.clone().set_status(InterventionStatus::Active);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.manager, &f.related())?;
    assert!(outcome.is_valid());
    assert_eq!(candidate.status, InterventionStatus::Active);
    assert_eq!(candidate.activated_on, Some(today()));
    Ok(())
}

#[test]
fn signature_metadata_is_rigid_while_signed() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut prior = f.ready()?.set_status(InterventionStatus::Signed);
    prior.frs.clear();

    let mut candidate = prior.clone();
    candidate.signed_pd_document = Some("other.pdf".to_string());
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;

    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Rigid, .. }));
    assert_eq!(
        outcome.errors().unwrap().get("signed_pd_document"),
        Some(&["Cannot change fields while intervention is signed".to_string()][..])
    );
    Ok(())
}

#[test]
fn budget_is_rigid_while_active_unless_a_budget_amendment_is_open() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.ready()?.set_status(InterventionStatus::Active);

    let mut candidate = prior.clone();
    candidate.planned_budget.unicef_cash = Amount::new(60_000);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(outcome.errors().unwrap().contains_key("planned_budget.unicef_cash"));

    // Sub-cent noise is not a change.
    let mut candidate = prior.clone();
    candidate.planned_budget.unicef_cash = Amount::new(50_000) + Amount::from(rust_decimal::Decimal::new(1, 3));
    assert!(f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?.is_valid());

    let mut candidate = prior.clone().add_amendment(InterventionAmendment::new(&[AmendmentKind::BudgetGt20])?);
    candidate.in_amendment = true;
    candidate.planned_budget.unicef_cash = Amount::new(60_000);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert_eq!(outcome, Outcome::Valid { auto_transitioned: false });
    Ok(())
}

#[test]
fn amendment_flag_needs_a_new_amendment() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.ready()?.set_status(InterventionStatus::Active);
    let mut candidate = prior.clone();
    candidate.in_amendment = true;

    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;

    assert_eq!(
        outcome.errors().unwrap().get("in_amendment"),
        Some(&["Amendment Flag cannot be turned on without adding an amendment".to_string()][..])
    );
    Ok(())
}

#[test]
fn closing_needs_settled_fund_reservations() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.ready()?.set_dates(day(2024, 2, 1), day(2024, 5, 1)).set_status(InterventionStatus::Ended);
    let mut candidate = prior.clone().set_status(InterventionStatus::Closed);

    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;

    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::State, .. }));
    assert_eq!(
        outcome.errors().unwrap().get("frs"),
        Some(
            &["Total FR amount needs to equal total actual amount, and Total Outstanding DCTs need to equal to 0 (FR 0400012345)".to_string()][..]
        )
    );
    Ok(())
}

#[test]
fn final_review_is_only_required_above_the_threshold() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let settled = |amount: i64| -> anyhow::Result<FundReservation> {
        Ok(FundReservation::new("0400099999", day(2024, 2, 1), day(2024, 5, 1))?
            .set_amounts(Amount::new(amount), Amount::new(amount), Amount::ZERO))
    };

    let mut prior = f.ready()?.set_dates(day(2024, 2, 1), day(2024, 5, 1)).set_status(InterventionStatus::Ended);
    prior.frs = vec![settled(100_000)?];
    let mut candidate = prior.clone().set_status(InterventionStatus::Closed);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(outcome.is_valid());
    assert_eq!(candidate.closed_on, Some(today()));

    prior.frs = vec![settled(100_001)?];
    let mut candidate = prior.clone().set_status(InterventionStatus::Closed);
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(outcome.errors().unwrap().contains_key("attachments"));
    Ok(())
}

#[test]
fn illegal_return_to_draft_is_refused() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.ready()?.set_status(InterventionStatus::Active);
    let mut candidate = prior.clone().set_status(InterventionStatus::Draft);

    let outcome = f.validate(&mut candidate, Some(&prior), &f.manager, &f.related())?;

    assert_eq!(
        outcome.errors().unwrap().get("status"),
        Some(&["GENERIC TRANSITION FAIL".to_string()][..])
    );
    Ok(())
}

#[test]
fn editing_outside_the_court_is_refused() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.draft()?;
    let mut candidate = prior.clone();
    candidate.title = "Nutrition and WASH support".to_string();

    let outcome = f.validate(&mut candidate, Some(&prior), &f.partner_user, &f.related())?;

    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Permission, .. }));
    assert!(outcome.errors().unwrap().contains_key("unicef_court"));
    Ok(())
}

#[test]
fn editing_withdraws_only_the_editors_acceptance() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.draft()?.set_accepted(true, true);
    let mut candidate = prior.clone();
    candidate.title = "Nutrition and WASH support".to_string();

    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;

    assert!(outcome.is_valid());
    assert!(!candidate.unicef_accepted);
    assert!(candidate.partner_accepted);
    Ok(())
}

#[test]
fn negotiation_fields_do_not_count_as_edits() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.draft()?.set_accepted(true, false);
    let mut candidate = prior.clone().set_unicef_court(false);

    let changed = court::substantive_changes(&prior, &candidate, 2).unwrap();
    assert!(changed.is_empty());

    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(outcome.is_valid());
    assert!(candidate.unicef_accepted);
    Ok(())
}

#[test]
fn staff_of_another_partner_cannot_negotiate() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let outsider = User::partner_staff(Id::from("outsider-1"), "Other Partner", Id::from("partner-2"));
    let mut prior = f.draft()?;
    CourtAction::SendToPartner.apply(&mut prior, &f.officer, today()).unwrap();

    let mut candidate = prior.clone();
    candidate.title = "Rewritten by someone else".to_string();
    let outcome = f.validate(&mut candidate, Some(&prior), &outsider, &f.related())?;
    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Permission, .. }));
    assert!(outcome.errors().unwrap().contains_key("unicef_court"));

    let mut document = prior.clone();
    assert!(CourtAction::Accept.apply(&mut document, &outsider, today()).is_err());
    assert!(CourtAction::SendToUnicef.apply(&mut document, &outsider, today()).is_err());
    assert_eq!(document, prior);

    CourtAction::Accept.apply(&mut document, &f.partner_user, today()).unwrap();
    assert!(document.partner_accepted);
    Ok(())
}

#[test]
fn court_actions_respect_sides() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut document = f.draft()?;

    assert!(CourtAction::SendToPartner.apply(&mut document, &f.partner_user, today()).is_err());
    CourtAction::SendToPartner.apply(&mut document, &f.officer, today()).unwrap();
    assert!(!document.unicef_court);
    assert_eq!(document.date_sent_to_partner, Some(today()));

    CourtAction::Accept.apply(&mut document, &f.partner_user, today()).unwrap();
    assert!(document.partner_accepted);
    assert!(document.unicef_court);
    assert_eq!(document.submission_date, Some(today()));

    CourtAction::Accept.apply(&mut document, &f.officer, today()).unwrap();
    assert!(document.unicef_accepted);

    CourtAction::Unlock.apply(&mut document, &f.officer, today()).unwrap();
    assert!(!document.unicef_accepted && !document.partner_accepted);
    assert!(CourtAction::Unlock.apply(&mut document, &f.officer, today()).is_err());
    Ok(())
}

#[test]
fn review_moves_to_signature_on_approval() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let approver = User::unicef(Id::from("approver-1"), "Representative");
    let prior = f.draft()?.set_accepted(true, true);

    let mut candidate = prior.clone();
    submit_for_review(&mut candidate, &f.officer, ReviewType::Prc, &approver.id, today()).unwrap();
    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;
    assert!(outcome.is_valid());
    assert_eq!(candidate.status, InterventionStatus::Review);
    assert_eq!(candidate.submission_date_prc, Some(today()));

    let in_review = candidate.clone();
    assert!(decide(&mut candidate, ReviewDecision::Approve, &f.officer, today()).is_err());
    decide(&mut candidate, ReviewDecision::Approve, &approver, today()).unwrap();
    let outcome = f.validate(&mut candidate, Some(&in_review), &approver, &f.related())?;
    assert!(outcome.is_valid());
    assert_eq!(candidate.status, InterventionStatus::Signature);
    assert_eq!(candidate.review_date_prc, Some(today()));
    Ok(())
}

#[test]
fn review_needs_both_acceptances() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let prior = f.draft()?.set_accepted(true, false);
    let mut candidate = prior.clone();
    submit_for_review(&mut candidate, &f.officer, ReviewType::NonPrc, &Id::from("approver-1"), today()).unwrap();

    let outcome = f.validate(&mut candidate, Some(&prior), &f.officer, &f.related())?;

    assert!(matches!(outcome, Outcome::Invalid { kind: RejectionKind::Transition, .. }));
    Ok(())
}

#[test]
fn only_the_prc_secretary_sends_a_review_back() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let mut document = f.draft()?.set_accepted(true, true);
    submit_for_review(&mut document, &f.officer, ReviewType::Prc, &Id::from("approver-1"), today()).unwrap();

    let comment = || ReviewDecision::SendBack {
        comment: "Budget narrative missing".to_string(),
    };
    assert!(decide(&mut document, comment(), &f.officer, today()).is_err());

    let secretary = User::unicef(Id::from("secretary-1"), "PRC Secretary").with_group(PRC_SECRETARY);
    decide(&mut document, comment(), &secretary, today()).unwrap();
    assert_eq!(document.status, InterventionStatus::Draft);
    assert!(document.unicef_court);
    assert!(!document.unicef_accepted && !document.partner_accepted);
    Ok(())
}

#[test]
fn fund_reservation_totals() -> anyhow::Result<()> {
    let f = Fixture::new()?;
    let document = f
        .draft()?
        .add_fr(
            FundReservation::new("A", day(2024, 3, 1), day(2024, 9, 30))?
                .set_amounts(Amount::new(100), Amount::new(90), Amount::new(10)),
        )
        .add_fr(
            FundReservation::new("B", day(2024, 2, 1), day(2024, 8, 31))?
                .set_amounts(Amount::new(50), Amount::new(50), Amount::ZERO)
                .set_intervention_amt(Amount::new(40)),
        );

    let totals = document.total_frs();

    assert_eq!(totals.total_frs_amt, Amount::new(150));
    assert_eq!(totals.total_actual_amt, Amount::new(140));
    assert_eq!(totals.total_outstanding_amt, Amount::new(10));
    assert_eq!(totals.total_intervention_amt, Amount::new(40));
    assert_eq!(totals.earliest_start_date, Some(day(2024, 2, 1)));
    assert_eq!(totals.latest_end_date, Some(day(2024, 9, 30)));
    Ok(())
}

#[test]
fn reference_numbers_follow_the_agreement() {
    assert_eq!(
        reference_number("SL/PCA202401", DocumentType::PD, 2024, 2),
        "SL/PCA202401/PD202402"
    );
    assert_eq!(reference_number("SL/SSFA202401", DocumentType::SSFA, 2024, 1), "SL/SSFA202401");
}
