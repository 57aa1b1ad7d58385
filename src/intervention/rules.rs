use super::{AttachmentType, DocumentType, Intervention, InterventionStatus};
use crate::agreement::{Agreement, AgreementStatus, AgreementType};
use crate::types::{Amount, Day};
use crate::user::{PARTNERSHIP_MANAGER, Side, User};
use crate::validation::{Failure, ValidationContext, Verdict, ensure, raise};

type Ctx<'a> = ValidationContext<'a, Intervention>;

const IN_AMENDMENT: &str = "Cannot Transition status while adding an amendment";
const BUDGET_NOT_ZERO: &str = "UNICEF Cash $ or UNICEF Supplies $ should not be 0";
const FINAL_REVIEW_THRESHOLD: i64 = 100_000;

fn agreement<'c>(intervention: &Intervention, ctx: &'c Ctx<'_>) -> Result<&'c Agreement, Failure> {
    ctx.related
        .agreement
        .as_ref()
        .ok_or_else(|| Failure::Internal(format!("agreement {} not loaded", intervention.agreement)))
}

fn not_in_amendment(intervention: &Intervention) -> Verdict {
    if intervention.in_amendment {
        return raise("in_amendment", IN_AMENDMENT);
    }
    Ok(())
}

pub(super) fn ssfa_agreement_has_no_other_intervention(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if intervention.document_type != DocumentType::SSFA {
        return Ok(());
    }
    if agreement(intervention, ctx)?.agreement_type != AgreementType::SSFA {
        return raise("agreement", "Agreement selected is not of type SSFA");
    }
    ensure(ctx.related.siblings == 0)
}

pub(super) fn start_end_dates_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    match (intervention.start, intervention.end) {
        (Some(start), Some(end)) => ensure(start <= end),
        _ => Ok(()),
    }
}

/// Each side signs with both a date and a signatory, never in the future.
pub(super) fn signed_date_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    let unicef = (
        intervention.signed_by_unicef_date,
        intervention.unicef_signatory.is_some(),
    );
    let partner = (
        intervention.signed_by_partner_date,
        intervention.partner_authorized_officer_signatory.is_some(),
    );

    let half_signed = |(date, signatory): (Option<Day>, bool)| date.is_some() != signatory;
    let future = |(date, _): (Option<Day>, bool)| date.is_some_and(|d| d > ctx.today);

    ensure(!(half_signed(unicef) || half_signed(partner) || future(unicef) || future(partner)))
}

pub(super) fn start_date_signed_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    let (Some(unicef), Some(partner), Some(start)) = (
        intervention.signed_by_unicef_date,
        intervention.signed_by_partner_date,
        intervention.start,
    ) else {
        return Ok(());
    };
    if intervention.signed_pd_document.is_none() {
        return Ok(());
    }
    ensure(start >= unicef.max(partner))
}

pub(super) fn start_date_related_agreement_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if !intervention.is_pd() || intervention.contingency_pd || intervention.signed_pd_document.is_none() {
        return Ok(());
    }
    let agreement = agreement(intervention, ctx)?;
    match (intervention.start, agreement.start) {
        (Some(start), Some(agreement_start)) => ensure(start >= agreement_start),
        _ => Ok(()),
    }
}

pub(super) fn document_type_pca_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if !intervention.is_pd() {
        return Ok(());
    }
    ensure(agreement(intervention, ctx)?.agreement_type == AgreementType::PCA)
}

/// The amendment flag is only turned on together with a new amendment.
pub(super) fn rigid_in_amendment_flag(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    let Some(prior) = ctx.prior else {
        return Ok(());
    };
    let switched_on = intervention.in_amendment && !prior.in_amendment;
    ensure(!switched_on || intervention.amendments.len() > prior.amendments.len())
}

pub(super) fn cp_structure_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    let Some(programme) = &intervention.country_programme else {
        return Ok(());
    };
    let agreement = agreement(intervention, ctx)?;
    if agreement.agreement_type != AgreementType::PCA {
        return Ok(());
    }
    match &agreement.country_programme {
        Some(expected) if expected != programme => raise(
            "country_programme",
            format!(
                "The Country Programme selected on this PD is not the same as the Country Programme selected on the Agreement, please select \"{expected}\""
            ),
        ),
        _ => Ok(()),
    }
}

// Both always hold. They stay declared so that the rule list matches the
// documented set of checks.
pub(super) fn amendments_ok(_: &Intervention, _: &Ctx<'_>) -> Verdict {
    Ok(())
}

pub(super) fn signed_agreement_present(_: &Intervention, _: &Ctx<'_>) -> Verdict {
    Ok(())
}

pub(super) fn transition_ok(_: &Intervention, _: &Ctx<'_>) -> Verdict {
    Ok(())
}

pub(super) fn illegal_transitions(_: &Intervention, _: &Ctx<'_>) -> Verdict {
    Err(Failure::Declined)
}

pub(super) fn unicef_only(_: &Intervention, _: &Ctx<'_>, user: &User) -> Verdict {
    ensure(user.side() == Side::Unicef)
}

pub(super) fn partnership_manager_only(_: &Intervention, _: &Ctx<'_>, user: &User) -> Verdict {
    if !user.in_group(PARTNERSHIP_MANAGER) {
        return raise("status", "Only Partnership Managers can execute this transition");
    }
    Ok(())
}

pub(super) fn transition_to_review(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    if !(intervention.unicef_accepted && intervention.partner_accepted) {
        return raise(
            "status",
            "Both UNICEF and the partner need to accept the document before it goes to review",
        );
    }
    if intervention.review.is_none() {
        return raise("review", "A review needs to be recorded before the document goes to review");
    }
    Ok(())
}

pub(super) fn transition_to_signature(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    ensure(
        intervention
            .review
            .as_ref()
            .is_some_and(|review| review.overall_approval == Some(true)),
    )
}

pub(super) fn transition_to_signed(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    not_in_amendment(intervention)?;
    if intervention.is_pd()
        && matches!(
            agreement(intervention, ctx)?.status,
            AgreementStatus::Suspended | AgreementStatus::Terminated
        )
    {
        return raise(
            "agreement",
            "The PCA related to this record is Suspended or Terminated. This Programme Document will not change status until the related PCA is in Signed status",
        );
    }
    Ok(())
}

pub(super) fn transition_to_active(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if intervention.is_pd() && agreement(intervention, ctx)?.status != AgreementStatus::Signed {
        return raise(
            "agreement",
            "PD cannot be activated if the associated Agreement is not active",
        );
    }
    if intervention.frs.is_empty() {
        return raise("frs", "A Fund Reservation is required before the document can be activated");
    }
    if !intervention.start.is_some_and(|start| start <= ctx.today) {
        return raise("start", "Today is not after the start date");
    }
    if intervention.planned_budget.unicef_cash.is_zero() {
        return raise("planned_budget", BUDGET_NOT_ZERO);
    }
    if intervention.sector_locations.is_empty() {
        return raise("sector_locations", "Locations are required before the document can be activated");
    }
    if intervention.unicef_focal_points.is_empty() || intervention.partner_focal_points.is_empty() {
        return raise(
            "unicef_focal_points",
            "UNICEF and partner focal points are required before the document can be activated",
        );
    }
    Ok(())
}

pub(super) fn transition_to_ended(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    not_in_amendment(intervention)?;
    if !intervention.end.is_some_and(|end| end < ctx.today) {
        return raise("end", "Today is not after the end date");
    }
    Ok(())
}

pub(super) fn transition_to_closed(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if intervention.end.is_some_and(|end| end > ctx.today) {
        return raise("end", "End date is in the future");
    }
    not_in_amendment(intervention)
}

pub(super) fn transition_to_suspended(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    not_in_amendment(intervention)
}

pub(super) fn transition_to_terminated(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    not_in_amendment(intervention)
}

fn missing_signature_fields(intervention: &Intervention) -> Vec<&'static str> {
    [
        ("start", intervention.start.is_none()),
        ("end", intervention.end.is_none()),
        ("signed_by_unicef_date", intervention.signed_by_unicef_date.is_none()),
        ("signed_by_partner_date", intervention.signed_by_partner_date.is_none()),
        ("unicef_signatory", intervention.unicef_signatory.is_none()),
        (
            "partner_authorized_officer_signatory",
            intervention.partner_authorized_officer_signatory.is_none(),
        ),
        ("signed_pd_document", intervention.signed_pd_document.is_none()),
    ]
    .into_iter()
    .filter_map(|(field, missing)| missing.then_some(field))
    .collect()
}

fn budget_not_zero(intervention: &Intervention) -> Verdict {
    if intervention.total_unicef_budget().is_zero() {
        return raise("planned_budget", BUDGET_NOT_ZERO);
    }
    Ok(())
}

pub(super) fn state_review_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    if intervention.review.is_none() {
        return raise("review", "A document in review needs a review record");
    }
    Ok(())
}

pub(super) fn state_signature_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    match &intervention.review {
        Some(review) if review.overall_approval == Some(true) => Ok(()),
        _ => raise("review", "The document cannot go to signature without an approved review"),
    }
}

pub(super) fn state_signed_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    let missing = missing_signature_fields(intervention);
    if !missing.is_empty() {
        return raise(
            "status",
            format!(
                "Required fields not completed in {}: {}",
                InterventionStatus::Signed,
                missing.join(", ")
            ),
        );
    }
    budget_not_zero(intervention)
}

pub(super) fn state_active_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if !intervention.start.is_some_and(|start| start <= ctx.today) {
        return raise("start", "Today is not after the start date");
    }
    budget_not_zero(intervention)
}

pub(super) fn state_ended_valid(intervention: &Intervention, ctx: &Ctx<'_>) -> Verdict {
    if !intervention.end.is_some_and(|end| ctx.today > end) {
        return raise("end", "Today is not after the end date");
    }
    Ok(())
}

/// Every fund reservation settled, and a final review on file for large
/// disbursements.
pub(super) fn state_closed_valid(intervention: &Intervention, _: &Ctx<'_>) -> Verdict {
    if let Some(fr) = intervention.frs.iter().find(|fr| !fr.is_settled()) {
        return raise(
            "frs",
            format!(
                "Total FR amount needs to equal total actual amount, and Total Outstanding DCTs need to equal to 0 (FR {})",
                fr.fr_number
            ),
        );
    }

    let transferred = intervention.total_frs().total_actual_amt;
    if transferred > Amount::new(FINAL_REVIEW_THRESHOLD)
        && !intervention.has_attachment(AttachmentType::FinalPartnershipReview)
    {
        return raise(
            "attachments",
            "Total amount transferred greater than 100,000 and no Final Partnership Review was attached",
        );
    }
    Ok(())
}
