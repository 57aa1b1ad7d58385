//! Two-party negotiation of a draft intervention
//!
//! While a document is in draft, `unicef_court` says which side holds it.
//! Only the holder may change substantive fields, and doing so withdraws the
//! holder's own acceptance. Handing the document over and accepting it are
//! explicit actions. Once both sides accepted, UNICEF submits it for review
//! and the overall approver decides.
use super::{Intervention, InterventionStatus, Review, ReviewType};
use crate::compare::Comparator;
use crate::entity::Entity;
use crate::snapshot::{capture, diff};
use crate::types::{Day, Id};
use crate::user::{PRC_SECRETARY, Side, User};
use crate::validation::{Failure, Issue, ValidationContext, Verdict, raise};
use serde::{Deserialize, Serialize};

/// Fields that belong to the negotiation itself rather than to the document.
const NEGOTIATION_FIELDS: [&str; 10] = [
    "status",
    "reference_number",
    "unicef_court",
    "unicef_accepted",
    "partner_accepted",
    "accepted_on_behalf_of_partner",
    "date_sent_to_partner",
    "submission_date",
    "submission_date_prc",
    "review_date_prc",
];

fn is_negotiation_field(field: &str) -> bool {
    NEGOTIATION_FIELDS.contains(&field) || field == "review" || field.starts_with("review.")
}

/// The side a user acts for on this document. Partner staff only act for
/// the document's own partner.
fn acting_side(intervention: &Intervention, user: &User) -> Result<Side, Failure> {
    match &user.partner {
        Some(partner) if *partner != intervention.partner => Err(Failure::Raised(vec![Issue::on(
            "unicef_court",
            "Only staff of the document's partner can act on it",
        )])),
        _ => Ok(user.side()),
    }
}

fn holds_court(intervention: &Intervention, side: Side) -> bool {
    match side {
        Side::Unicef => intervention.unicef_court,
        Side::Partner => !intervention.unicef_court,
    }
}

/// Substantive fields that differ between the stored and the edited draft.
pub fn substantive_changes(
    prior: &Intervention,
    candidate: &Intervention,
    rounding: u32,
) -> Result<Vec<String>, Failure> {
    let internal = |e: crate::error::EngineError| Failure::Internal(e.to_string());
    let before = capture(prior).map_err(internal)?;
    let after = capture(candidate).map_err(internal)?;
    let comparator = Comparator::new(Intervention::schema(), rounding);

    Ok(diff(&comparator, &before, &after)
        .into_keys()
        .filter(|field| !is_negotiation_field(field))
        .collect())
}

/// Runs before validation on every save of a draft by an identified user.
pub(super) fn arbitrate(candidate: &mut Intervention, ctx: &ValidationContext<'_, Intervention>) -> Verdict {
    let (Some(prior), Some(user)) = (ctx.prior, ctx.user) else {
        return Ok(());
    };
    if prior.status != InterventionStatus::Draft || candidate.status != InterventionStatus::Draft {
        return Ok(());
    }

    let changed = substantive_changes(prior, candidate, ctx.config.money_rounding)?;
    if changed.is_empty() {
        return Ok(());
    }

    let side = acting_side(prior, user)?;
    if !holds_court(prior, side) {
        return raise(
            "unicef_court",
            "The document is with the other party and cannot be edited until it is sent back",
        );
    }

    match side {
        Side::Unicef => candidate.unicef_accepted = false,
        Side::Partner => {
            candidate.partner_accepted = false;
            candidate.accepted_on_behalf_of_partner = false;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtAction {
    SendToPartner,
    SendToUnicef,
    Accept,
    AcceptOnBehalfOfPartner,
    Unlock,
}

impl CourtAction {
    pub fn apply(self, intervention: &mut Intervention, user: &User, today: Day) -> Verdict {
        if intervention.status != InterventionStatus::Draft {
            return raise(
                "status",
                "Negotiation actions are only available while the document is in draft",
            );
        }
        let side = acting_side(intervention, user)?;

        match self {
            CourtAction::SendToPartner => {
                if side != Side::Unicef {
                    return raise("unicef_court", "Only UNICEF can send the document to the partner");
                }
                if !intervention.unicef_court {
                    return raise("unicef_court", "The document is already with the partner");
                }
                intervention.unicef_court = false;
                intervention.date_sent_to_partner.get_or_insert(today);
            }
            CourtAction::SendToUnicef => {
                if side != Side::Partner {
                    return raise("unicef_court", "Only the partner can send the document to UNICEF");
                }
                if intervention.unicef_court {
                    return raise("unicef_court", "The document is already with UNICEF");
                }
                intervention.unicef_court = true;
                intervention.submission_date.get_or_insert(today);
            }
            CourtAction::Accept => match side {
                Side::Unicef => {
                    if intervention.unicef_accepted {
                        return raise("unicef_accepted", "The document has already been accepted");
                    }
                    intervention.unicef_accepted = true;
                }
                Side::Partner => {
                    if intervention.partner_accepted {
                        return raise("partner_accepted", "The document has already been accepted");
                    }
                    if !holds_court(intervention, Side::Partner) {
                        return raise("unicef_court", "The document is with UNICEF");
                    }
                    intervention.partner_accepted = true;
                    intervention.unicef_court = true;
                    intervention.submission_date.get_or_insert(today);
                }
            },
            CourtAction::AcceptOnBehalfOfPartner => {
                if side != Side::Unicef {
                    return raise("partner_accepted", "Only UNICEF can accept on behalf of the partner");
                }
                if !intervention.unicef_court {
                    return raise("unicef_court", "The document is with the partner");
                }
                if intervention.partner_accepted {
                    return raise("partner_accepted", "The document has already been accepted");
                }
                intervention.partner_accepted = true;
                intervention.accepted_on_behalf_of_partner = true;
                intervention.submission_date.get_or_insert(today);
            }
            CourtAction::Unlock => {
                if !(intervention.unicef_accepted || intervention.partner_accepted) {
                    return raise("status", "The document is not accepted by either party");
                }
                withdraw_acceptance(intervention);
            }
        }
        Ok(())
    }
}

fn withdraw_acceptance(intervention: &mut Intervention) {
    intervention.unicef_accepted = false;
    intervention.partner_accepted = false;
    intervention.accepted_on_behalf_of_partner = false;
}

/// Record a new review and move the draft into review.
pub fn submit_for_review(
    intervention: &mut Intervention,
    user: &User,
    review_type: ReviewType,
    overall_approver: &Id,
    today: Day,
) -> Verdict {
    if intervention.status != InterventionStatus::Draft {
        return raise("status", "Only a draft can be submitted for review");
    }
    if user.side() != Side::Unicef {
        return raise("review", "Only UNICEF can submit a document for review");
    }

    intervention.review = Some(Review {
        review_type,
        overall_approver: overall_approver.clone(),
        overall_approval: None,
        review_date: None,
        sent_back_comment: None,
        submitted_by: user.id.clone(),
    });
    if review_type == ReviewType::Prc {
        intervention.submission_date_prc.get_or_insert(today);
    }
    intervention.status = InterventionStatus::Review;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    SendBack { comment: String },
}

/// Conclude the open review. Approval moves the document to signature, any
/// other outcome returns it to UNICEF as a draft with acceptances withdrawn.
pub fn decide(
    intervention: &mut Intervention,
    decision: ReviewDecision,
    user: &User,
    today: Day,
) -> Verdict {
    if intervention.status != InterventionStatus::Review {
        return raise("status", "The document is not in review");
    }
    let Some(review) = intervention.review.as_mut() else {
        return raise("review", "The document has no review");
    };
    if review.overall_approval.is_some() {
        return raise("review", "The review has already been decided");
    }

    match decision {
        ReviewDecision::Approve | ReviewDecision::Reject => {
            if user.id != review.overall_approver {
                return raise("review", "Only the overall approver can decide on this review");
            }
            let approved = decision == ReviewDecision::Approve;
            review.overall_approval = Some(approved);
            review.review_date = Some(today);
            if review.review_type == ReviewType::Prc {
                intervention.review_date_prc = Some(today);
            }
            intervention.status = if approved {
                InterventionStatus::Signature
            } else {
                InterventionStatus::Draft
            };
        }
        ReviewDecision::SendBack { comment } => {
            if !user.in_group(PRC_SECRETARY) {
                return raise("review", "Only the PRC secretary can send a review back");
            }
            review.sent_back_comment = Some(comment);
            intervention.status = InterventionStatus::Draft;
        }
    }

    if intervention.status == InterventionStatus::Draft {
        withdraw_acceptance(intervention);
        intervention.unicef_court = true;
    }
    Ok(())
}
