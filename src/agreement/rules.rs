use super::{Agreement, AgreementStatus, AgreementType};
use crate::intervention::InterventionStatus;
use crate::types::Day;
use crate::validation::{Failure, Issue, ValidationContext, Verdict, ensure, raise, raise_token};

type Ctx<'a> = ValidationContext<'a, Agreement>;

pub(super) const ONE_PCA_PER_CP: &str = "You cannot have more than 1 PCA active per Partner within 1 CP";

/// PCAs starting on or before this day belong to programme cycles that
/// predate the one-PCA rule.
fn legacy_cutoff() -> Day {
    Day::ymd(2015, 7, 1).unwrap_or_else(|| Day::from(chrono::NaiveDate::MIN))
}

fn is_legacy(agreement: &Agreement) -> bool {
    agreement.start.is_some_and(|start| start <= legacy_cutoff())
}

fn signed_sibling_pca(agreement: &Agreement, ctx: &Ctx<'_>) -> bool {
    ctx.related.siblings.iter().any(|sibling| {
        sibling.id != agreement.id
            && sibling.agreement_type == AgreementType::PCA
            && sibling.status == AgreementStatus::Signed
            && !sibling.start.is_some_and(|start| start <= legacy_cutoff())
    })
}

/// Fill in what follows from other fields before anything is checked.
pub(super) fn normalize_dates(agreement: &mut Agreement, ctx: &Ctx<'_>) -> Verdict {
    if !agreement.is_pca() {
        return Ok(());
    }
    if let Some(signed_on) = agreement.signed_on() {
        agreement.start = Some(signed_on);
    }
    if agreement.end.is_none() {
        agreement.end = ctx.related.country_programme.as_ref().map(|cp| cp.to_date);
    }
    Ok(())
}

pub(super) fn start_end_dates_valid(agreement: &Agreement, _: &Ctx<'_>) -> Verdict {
    match (agreement.start, agreement.end) {
        (Some(start), Some(end)) => ensure(start <= end),
        _ => Ok(()),
    }
}

pub(super) fn signatures_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    let future = |date: Option<Day>| date.is_some_and(|d| d > ctx.today);
    let message = "None of the signatures can be dated in the future";

    let mut issues = Vec::new();
    if future(agreement.signed_by_unicef_date) {
        issues.push(Issue::on("signed_by_unicef_date", message));
    }
    if future(agreement.signed_by_partner_date) {
        issues.push(Issue::on("signed_by_partner_date", message));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Failure::Raised(issues))
    }
}

pub(super) fn partner_type_valid_cso(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if !matches!(agreement.agreement_type, AgreementType::PCA | AgreementType::SSFA) {
        return Ok(());
    }
    match &ctx.related.partner {
        Some(partner) => ensure(partner.is_cso()),
        None => Err(Failure::Internal(format!("partner {} not loaded", agreement.partner))),
    }
}

pub(super) fn one_pca_per_cp_per_partner(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if !agreement.is_pca() || is_legacy(agreement) {
        return Ok(());
    }
    ensure(!signed_sibling_pca(agreement, ctx))
}

pub(super) fn amendments_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    ensure(agreement.amendments.iter().all(|amendment| {
        amendment.signed_amendment.is_some()
            && amendment.signed_date.is_some_and(|date| date <= ctx.today)
    }))
}

pub(super) fn ssfa_static(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if agreement.agreement_type != AgreementType::SSFA {
        return Ok(());
    }
    match ctx.related.interventions.first() {
        Some(document) if document.start != agreement.start || document.end != agreement.end => raise(
            "start",
            "Start and end dates don't match the Document's start and end",
        ),
        _ => Ok(()),
    }
}

pub(super) fn transition_to_signed_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if agreement.is_pca() && !is_legacy(agreement) && signed_sibling_pca(agreement, ctx) {
        return raise_token("agreement_transition_to_active_invalid_PCA");
    }

    if agreement.agreement_type != AgreementType::SSFA
        && (agreement.signed_by_unicef_date.is_none()
            || agreement.signed_by_partner_date.is_none()
            || agreement.signed_by.is_none()
            || agreement.partner_manager.is_none())
    {
        return raise_token("transition_to_signed_invalid");
    }

    if !agreement.start.is_some_and(|start| start <= ctx.today) {
        return raise(
            "start",
            "Agreement cannot transition to signed until the start date is less than or equal to today",
        );
    }
    if agreement.end.is_none() {
        return raise(
            "end",
            "Agreement cannot transition to signed unless the end date is defined",
        );
    }
    Ok(())
}

pub(super) fn transition_to_ended_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if agreement.status == AgreementStatus::Signed && agreement.end.is_some_and(|end| end < ctx.today) {
        return Ok(());
    }
    raise_token("agreement_transition_to_ended_invalid")
}

pub(super) fn transition_to_terminated(agreement: &Agreement, _: &Ctx<'_>) -> Verdict {
    if agreement.is_pca() && agreement.termination_doc.is_none() {
        return raise("termination_doc", "Cannot Transition without termination doc attached");
    }
    Ok(())
}

pub(super) fn agreements_illegal_transition(_: &Agreement, _: &Ctx<'_>) -> Verdict {
    Err(Failure::Declined)
}

fn missing_required(agreement: &Agreement) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if agreement.start.is_none() {
        missing.push("start");
    }
    if agreement.end.is_none() {
        missing.push("end");
    }
    if agreement.agreement_type != AgreementType::SSFA {
        if agreement.signed_by_unicef_date.is_none() {
            missing.push("signed_by_unicef_date");
        }
        if agreement.signed_by_partner_date.is_none() {
            missing.push("signed_by_partner_date");
        }
        if agreement.signed_by.is_none() {
            missing.push("signed_by");
        }
        if agreement.partner_manager.is_none() {
            missing.push("partner_manager");
        }
    }
    missing
}

/// SSFA agreements follow their single document: they are signed once that
/// document left draft, never on their own.
pub(super) fn state_signed_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if agreement.agreement_type == AgreementType::SSFA {
        return ensure(
            ctx.related
                .interventions
                .first()
                .is_some_and(|document| document.status != InterventionStatus::Draft),
        );
    }

    let missing = missing_required(agreement);
    if !missing.is_empty() {
        return raise(
            "status",
            format!(
                "Required fields not completed in {}: {}",
                agreement.status,
                missing.join(", ")
            ),
        );
    }

    if agreement.attached_agreement.is_none() {
        return raise(
            "attached_agreement",
            "A signed agreement must have the signed document attached",
        );
    }

    if agreement.is_pca() {
        let Some(partner) = &ctx.related.partner else {
            return Err(Failure::Internal(format!("partner {} not loaded", agreement.partner)));
        };
        if !partner.is_cso() {
            return raise("partner", "Partner must be CSO in order to create a PCA.");
        }

        let Some(programme) = &ctx.related.country_programme else {
            return raise("country_programme", "A PCA must belong to a Country Programme");
        };
        if agreement.end.is_some_and(|end| end > programme.to_date) {
            return raise(
                "end",
                "Agreement end date cannot be later than the end of the Country Programme",
            );
        }
    }

    Ok(())
}

pub(super) fn state_ended_valid(agreement: &Agreement, ctx: &Ctx<'_>) -> Verdict {
    if agreement.agreement_type == AgreementType::SSFA {
        return Err(Failure::Declined);
    }
    if !agreement.end.is_some_and(|end| ctx.today > end) {
        return raise("end", "Today is not after the end date");
    }
    Ok(())
}

pub(super) fn state_suspended_valid(agreement: &Agreement, _: &Ctx<'_>) -> Verdict {
    if agreement.agreement_type == AgreementType::SSFA {
        return raise(
            "status",
            "Please unsuspend the SSFA on the PD/SSFA Page and the record on the Agreement page will be unsuspended automatically.",
        );
    }
    Ok(())
}
