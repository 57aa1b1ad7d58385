//! Interventions: programme documents negotiated under an agreement
pub mod court;
mod rules;

use crate::agreement::Agreement;
use crate::compare::{FieldKind, Schema};
use crate::entity::{Entity, EntityKind};
use crate::rule;
use crate::types::{Amount, Currency, Day, Id};
use crate::validation::{Machine, RejectionKind, Transition, ValidationContext};
use rules::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DocumentType {
    #[n(0)]
    PD,
    #[n(1)]
    SHPD,
    #[n(2)]
    SSFA,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentType::PD => "PD",
            DocumentType::SHPD => "SHPD",
            DocumentType::SSFA => "SSFA",
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum InterventionStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Signed,
    #[n(2)]
    Active,
    #[n(3)]
    Ended,
    #[n(4)]
    Implemented,
    #[n(5)]
    Closed,
    #[n(6)]
    Suspended,
    #[n(7)]
    Terminated,
    #[n(8)]
    Cancelled,
    #[n(9)]
    Review,
    #[n(10)]
    Signature,
}

impl fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterventionStatus::Draft => "draft",
            InterventionStatus::Signed => "signed",
            InterventionStatus::Active => "active",
            InterventionStatus::Ended => "ended",
            InterventionStatus::Implemented => "implemented",
            InterventionStatus::Closed => "closed",
            InterventionStatus::Suspended => "suspended",
            InterventionStatus::Terminated => "terminated",
            InterventionStatus::Cancelled => "cancelled",
            InterventionStatus::Review => "review",
            InterventionStatus::Signature => "signature",
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedBudget {
    #[n(0)]
    pub unicef_cash: Amount,
    /// UNICEF supplies.
    #[n(1)]
    pub in_kind_amount: Amount,
    #[n(2)]
    pub partner_contribution: Amount,
    #[n(3)]
    pub currency: Currency,
}

/// Fund reservation. Amounts are in USD.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundReservation {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub fr_number: String,
    #[n(2)]
    pub total_amt: Amount,
    #[n(3)]
    pub actual_amt: Amount,
    #[n(4)]
    pub outstanding_amt: Amount,
    #[n(5)]
    pub intervention_amt: Amount,
    #[n(6)]
    pub start_date: Day,
    #[n(7)]
    pub end_date: Day,
}

impl FundReservation {
    pub fn new(fr_number: &str, start_date: Day, end_date: Day) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("fr")?,
            fr_number: fr_number.to_string(),
            total_amt: Amount::ZERO,
            actual_amt: Amount::ZERO,
            outstanding_amt: Amount::ZERO,
            intervention_amt: Amount::ZERO,
            start_date,
            end_date,
        })
    }
    pub fn set_amounts(mut self, total: Amount, actual: Amount, outstanding: Amount) -> Self {
        self.total_amt = total;
        self.actual_amt = actual;
        self.outstanding_amt = outstanding;
        self
    }
    pub fn set_intervention_amt(mut self, amount: Amount) -> Self {
        self.intervention_amt = amount;
        self
    }
    /// Fully disbursed and settled.
    pub fn is_settled(&self) -> bool {
        self.total_amt == self.actual_amt && self.outstanding_amt.is_zero()
    }
}

/// Aggregate over the fund reservations of an intervention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrTotals {
    pub total_frs_amt: Amount,
    pub total_actual_amt: Amount,
    pub total_outstanding_amt: Amount,
    pub total_intervention_amt: Amount,
    pub earliest_start_date: Option<Day>,
    pub latest_end_date: Option<Day>,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AmendmentKind {
    #[n(0)]
    Dates,
    #[n(1)]
    Results,
    #[n(2)]
    BudgetLte20,
    #[n(3)]
    BudgetGt20,
    #[n(4)]
    Other,
}

impl AmendmentKind {
    pub fn is_budget(&self) -> bool {
        matches!(self, AmendmentKind::BudgetLte20 | AmendmentKind::BudgetGt20)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionAmendment {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub kinds: Vec<AmendmentKind>,
    #[n(2)]
    pub signed_date: Option<Day>,
    #[n(3)]
    pub signed_amendment: Option<String>,
    #[n(4)]
    pub other_description: Option<String>,
}

impl InterventionAmendment {
    pub fn new(kinds: &[AmendmentKind]) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("amd")?,
            kinds: kinds.to_vec(),
            signed_date: None,
            signed_amendment: None,
            other_description: None,
        })
    }
    /// Open until the signed amendment is attached.
    pub fn is_open(&self) -> bool {
        self.signed_amendment.is_none()
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    #[n(0)]
    FinalPartnershipReview,
    #[n(1)]
    Correspondence,
    #[n(2)]
    ProgressReport,
    #[n(3)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub attachment_type: AttachmentType,
    #[n(2)]
    pub file: String,
}

impl Attachment {
    pub fn new(attachment_type: AttachmentType, file: &str) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("att")?,
            attachment_type,
            file: file.to_string(),
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    #[n(0)]
    Prc,
    #[n(1)]
    NonPrc,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    #[n(0)]
    pub review_type: ReviewType,
    #[n(1)]
    pub overall_approver: Id,
    /// `None` until the approver decided.
    #[n(2)]
    pub overall_approval: Option<bool>,
    #[n(3)]
    pub review_date: Option<Day>,
    #[n(4)]
    pub sent_back_comment: Option<String>,
    #[n(5)]
    pub submitted_by: Id,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub reference_number: Option<String>,
    #[n(2)]
    pub document_type: DocumentType,
    #[n(3)]
    pub agreement: Id,
    #[n(4)]
    pub partner: Id,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub status: InterventionStatus,
    #[n(7)]
    pub country_programme: Option<Id>,
    #[n(8)]
    pub start: Option<Day>,
    #[n(9)]
    pub end: Option<Day>,
    #[n(10)]
    pub signed_by_unicef_date: Option<Day>,
    #[n(11)]
    pub signed_by_partner_date: Option<Day>,
    #[n(12)]
    pub unicef_signatory: Option<Id>,
    #[n(13)]
    pub partner_authorized_officer_signatory: Option<Id>,
    #[n(14)]
    pub signed_pd_document: Option<String>,
    #[n(15)]
    pub contingency_pd: bool,
    #[n(16)]
    pub in_amendment: bool,
    /// Whose turn it is to edit during negotiation.
    #[n(17)]
    pub unicef_court: bool,
    #[n(18)]
    pub unicef_accepted: bool,
    #[n(19)]
    pub partner_accepted: bool,
    #[n(20)]
    pub accepted_on_behalf_of_partner: bool,
    #[n(21)]
    pub date_sent_to_partner: Option<Day>,
    #[n(22)]
    pub submission_date: Option<Day>,
    #[n(23)]
    pub submission_date_prc: Option<Day>,
    #[n(24)]
    pub review_date_prc: Option<Day>,
    #[n(25)]
    pub planned_budget: PlannedBudget,
    #[n(26)]
    pub frs: Vec<FundReservation>,
    #[n(27)]
    pub amendments: Vec<InterventionAmendment>,
    #[n(28)]
    pub attachments: Vec<Attachment>,
    #[n(29)]
    pub review: Option<Review>,
    #[n(30)]
    pub sector_locations: Vec<Id>,
    #[n(31)]
    pub planned_visits: Vec<Id>,
    #[n(32)]
    pub unicef_focal_points: Vec<Id>,
    #[n(33)]
    pub partner_focal_points: Vec<Id>,
    #[n(34)]
    pub result_links: Vec<Id>,
    #[n(35)]
    pub signed_on: Option<Day>,
    #[n(36)]
    pub activated_on: Option<Day>,
    #[n(37)]
    pub ended_on: Option<Day>,
    #[n(38)]
    pub closed_on: Option<Day>,
}

impl Intervention {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new(document_type: DocumentType, agreement: &Agreement, title: &str) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("pd")?,
            reference_number: None,
            document_type,
            agreement: agreement.id.clone(),
            partner: agreement.partner.clone(),
            title: title.to_string(),
            status: InterventionStatus::Draft,
            country_programme: agreement.country_programme.clone(),
            start: None,
            end: None,
            signed_by_unicef_date: None,
            signed_by_partner_date: None,
            unicef_signatory: None,
            partner_authorized_officer_signatory: None,
            signed_pd_document: None,
            contingency_pd: false,
            in_amendment: false,
            unicef_court: true,
            unicef_accepted: false,
            partner_accepted: false,
            accepted_on_behalf_of_partner: false,
            date_sent_to_partner: None,
            submission_date: None,
            submission_date_prc: None,
            review_date_prc: None,
            planned_budget: PlannedBudget::default(),
            frs: Vec::new(),
            amendments: Vec::new(),
            attachments: Vec::new(),
            review: None,
            sector_locations: Vec::new(),
            planned_visits: Vec::new(),
            unicef_focal_points: Vec::new(),
            partner_focal_points: Vec::new(),
            result_links: Vec::new(),
            signed_on: None,
            activated_on: None,
            ended_on: None,
            closed_on: None,
        })
    }
    pub fn set_dates(mut self, start: Day, end: Day) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
    pub fn set_signed_by_unicef(mut self, date: Day, signatory: &Id) -> Self {
        self.signed_by_unicef_date = Some(date);
        self.unicef_signatory = Some(signatory.clone());
        self
    }
    pub fn set_signed_by_partner(mut self, date: Day, signatory: &Id) -> Self {
        self.signed_by_partner_date = Some(date);
        self.partner_authorized_officer_signatory = Some(signatory.clone());
        self
    }
    pub fn set_signed_pd_document(mut self, document: &str) -> Self {
        self.signed_pd_document = Some(document.to_string());
        self
    }
    pub fn set_budget(mut self, unicef_cash: Amount, in_kind_amount: Amount, partner_contribution: Amount) -> Self {
        self.planned_budget.unicef_cash = unicef_cash;
        self.planned_budget.in_kind_amount = in_kind_amount;
        self.planned_budget.partner_contribution = partner_contribution;
        self
    }
    pub fn set_status(mut self, status: InterventionStatus) -> Self {
        self.status = status;
        self
    }
    pub fn set_unicef_court(mut self, unicef_court: bool) -> Self {
        self.unicef_court = unicef_court;
        self
    }
    pub fn set_accepted(mut self, unicef: bool, partner: bool) -> Self {
        self.unicef_accepted = unicef;
        self.partner_accepted = partner;
        self
    }
    pub fn add_fr(mut self, fr: FundReservation) -> Self {
        self.frs.push(fr);
        self
    }
    pub fn add_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
    pub fn add_amendment(mut self, amendment: InterventionAmendment) -> Self {
        self.amendments.push(amendment);
        self
    }
    pub fn add_sector_location(mut self, location: &Id) -> Self {
        self.sector_locations.push(location.clone());
        self
    }
    pub fn add_unicef_focal_point(mut self, user: &Id) -> Self {
        self.unicef_focal_points.push(user.clone());
        self
    }
    pub fn add_partner_focal_point(mut self, user: &Id) -> Self {
        self.partner_focal_points.push(user.clone());
        self
    }

    pub fn total_frs(&self) -> FrTotals {
        self.frs.iter().fold(FrTotals::default(), |mut totals, fr| {
            totals.total_frs_amt = totals.total_frs_amt + fr.total_amt;
            totals.total_actual_amt = totals.total_actual_amt + fr.actual_amt;
            totals.total_outstanding_amt = totals.total_outstanding_amt + fr.outstanding_amt;
            totals.total_intervention_amt = totals.total_intervention_amt + fr.intervention_amt;
            totals.earliest_start_date = Some(
                totals
                    .earliest_start_date
                    .map_or(fr.start_date, |d| d.min(fr.start_date)),
            );
            totals.latest_end_date = Some(
                totals
                    .latest_end_date
                    .map_or(fr.end_date, |d| d.max(fr.end_date)),
            );
            totals
        })
    }

    /// UNICEF cash plus supplies.
    pub fn total_unicef_budget(&self) -> Amount {
        self.planned_budget.unicef_cash + self.planned_budget.in_kind_amount
    }

    pub fn has_open_budget_amendment(&self) -> bool {
        self.in_amendment
            && self
                .amendments
                .iter()
                .any(|a| a.is_open() && a.kinds.iter().any(AmendmentKind::is_budget))
    }

    pub fn has_attachment(&self, attachment_type: AttachmentType) -> bool {
        self.attachments
            .iter()
            .any(|a| a.attachment_type == attachment_type)
    }

    pub fn is_pd(&self) -> bool {
        matches!(self.document_type, DocumentType::PD | DocumentType::SHPD)
    }
}

/// `{agreement_ref}/{DOCTYPE}{year}{seq:02}`. SSFA documents share the
/// reference of their agreement.
pub fn reference_number(agreement_ref: &str, document_type: DocumentType, year: i32, seq: u64) -> String {
    let base = agreement_ref.split('-').next().unwrap_or(agreement_ref);
    match document_type {
        DocumentType::SSFA => base.to_string(),
        _ => format!("{base}/{document_type}{year}{seq:02}"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterventionRelated {
    pub agreement: Option<Agreement>,
    /// Number of other interventions under the same agreement.
    pub siblings: usize,
}

fn set_signed_fields(intervention: &mut Intervention, ctx: &ValidationContext<'_, Intervention>) {
    let signed_on = match (intervention.signed_by_unicef_date, intervention.signed_by_partner_date) {
        (Some(unicef), Some(partner)) => unicef.max(partner),
        _ => ctx.today,
    };
    intervention.signed_on = Some(signed_on);
}

fn activate(intervention: &mut Intervention, ctx: &ValidationContext<'_, Intervention>) {
    intervention.activated_on = Some(ctx.today);
}

fn set_end_timestamp(intervention: &mut Intervention, ctx: &ValidationContext<'_, Intervention>) {
    intervention.ended_on = Some(ctx.today);
}

fn close_out(intervention: &mut Intervention, ctx: &ValidationContext<'_, Intervention>) {
    intervention.closed_on = Some(ctx.today);
}

const SIGNATURE_FIELDS: [&str; 5] = [
    "signed_by_unicef_date",
    "signed_by_partner_date",
    "unicef_signatory",
    "partner_authorized_officer_signatory",
    "signed_pd_document",
];

fn rigid_while_signed(_: &Intervention) -> Vec<&'static str> {
    SIGNATURE_FIELDS.to_vec()
}

fn rigid_while_active(intervention: &Intervention) -> Vec<&'static str> {
    let mut fields = vec!["signed_by_unicef_date", "signed_by_partner_date"];
    if !intervention.has_open_budget_amendment() {
        fields.extend([
            "planned_budget.unicef_cash",
            "planned_budget.in_kind_amount",
            "planned_budget.partner_contribution",
        ]);
    }
    fields
}

fn machine() -> Machine<Intervention> {
    use InterventionStatus::*;

    Machine::builder(&[
        Draft,
        Signed,
        Active,
        Ended,
        Implemented,
        Closed,
        Suspended,
        Terminated,
        Cancelled,
        Review,
        Signature,
    ])
    .terminal(&[Closed, Terminated, Cancelled])
    .prepare("court_arbitration", RejectionKind::Permission, court::arbitrate)
    .basic(rule!(ssfa_agreement_has_no_other_intervention))
    .basic(rule!(start_end_dates_valid))
    .basic(rule!(signed_date_valid))
    .basic(rule!(start_date_signed_valid))
    .basic(rule!(start_date_related_agreement_valid))
    .basic(rule!(document_type_pca_valid))
    .basic(rule!(rigid_in_amendment_flag))
    .basic(rule!(cp_structure_valid))
    .basic(rule!(amendments_ok))
    .basic(rule!(signed_agreement_present))
    .transition(
        Transition::new("to_review", &[Draft], &[Review])
            .when(rule!(transition_to_review))
            .permission(unicef_only),
    )
    .transition(
        Transition::new("to_signature", &[Review], &[Signature]).when(rule!(transition_to_signature)),
    )
    .transition(Transition::new("send_back", &[Review], &[Draft]).when(rule!(transition_ok)))
    .transition(
        Transition::new("to_signed", &[Draft, Signature, Suspended], &[Signed])
            .when(rule!(transition_to_signed)),
    )
    .transition(
        Transition::new("to_active", &[Signed, Suspended], &[Active])
            .when(rule!(transition_to_active))
            .permission(partnership_manager_only),
    )
    .transition(Transition::new("to_ended", &[Active], &[Ended]).when(rule!(transition_to_ended)))
    .transition(Transition::new("to_closed", &[Ended], &[Closed]).when(rule!(transition_to_closed)))
    .transition(
        Transition::new("to_suspended", &[Active, Signed], &[Suspended])
            .when(rule!(transition_to_suspended))
            .permission(partnership_manager_only),
    )
    .transition(
        Transition::new("to_terminated", &[Active, Suspended, Signed], &[Terminated])
            .when(rule!(transition_to_terminated))
            .permission(partnership_manager_only),
    )
    .transition(Transition::new("to_cancelled", &[Draft], &[Cancelled]).when(rule!(transition_ok)))
    .transition(
        Transition::new("basic_transition", &[Active, Implemented, Suspended], &[Draft, Cancelled])
            .when(rule!(illegal_transitions)),
    )
    .auto(Draft, Signed, &[set_signed_fields])
    .auto(Signature, Signed, &[set_signed_fields])
    .auto(Signed, Active, &[activate])
    .auto(Active, Ended, &[set_end_timestamp])
    .auto(Ended, Closed, &[close_out])
    .state(Review, state_review_valid)
    .state(Signature, state_signature_valid)
    .state(Signed, state_signed_valid)
    .state(Active, state_active_valid)
    .state(Ended, state_ended_valid)
    .state(Closed, state_closed_valid)
    .rigid(Signed, rigid_while_signed)
    .rigid(Active, rigid_while_active)
    .error("start_end_dates_valid", "end", "Start date must precede end date")
    .error(
        "signed_date_valid",
        "signed_by_unicef_date",
        "Unicef signatory and partner signatory as well as dates required, signatures cannot be dated in the future",
    )
    .error(
        "document_type_pca_valid",
        "document_type",
        "Document type PD or SHPD can only be associated with a PCA agreement.",
    )
    .error(
        "ssfa_agreement_has_no_other_intervention",
        "agreement",
        "The agreement selected has at least one other SSFA Document connected",
    )
    .error(
        "start_date_signed_valid",
        "start",
        "The start date cannot be before the later of signature dates.",
    )
    .error(
        "start_date_related_agreement_valid",
        "start",
        "PD start date cannot be earlier than the Start Date of the related PCA",
    )
    .error(
        "rigid_in_amendment_flag",
        "in_amendment",
        "Amendment Flag cannot be turned on without adding an amendment",
    )
    .build()
}

static MACHINE: LazyLock<Machine<Intervention>> = LazyLock::new(machine);

static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with(
            FieldKind::Identifier,
            &[
                "agreement",
                "partner",
                "country_programme",
                "unicef_signatory",
                "partner_authorized_officer_signatory",
                "review.overall_approver",
                "review.submitted_by",
                "frs.fr_number",
            ],
        )
        .with(
            FieldKind::ToMany,
            &[
                "sector_locations",
                "planned_visits",
                "unicef_focal_points",
                "partner_focal_points",
                "result_links",
            ],
        )
        .with(FieldKind::Embedded, &["frs", "amendments", "attachments"])
        .with(FieldKind::OneToOne, &["planned_budget", "review"])
        .with(
            FieldKind::Money,
            &[
                "planned_budget.unicef_cash",
                "planned_budget.in_kind_amount",
                "planned_budget.partner_contribution",
            ],
        )
        .with(FieldKind::NonNull, &["title"])
});

impl Entity for Intervention {
    type Status = InterventionStatus;
    type Related = InterventionRelated;

    const KIND: EntityKind = EntityKind::Intervention;

    fn id(&self) -> &Id {
        &self.id
    }
    fn status(&self) -> InterventionStatus {
        self.status
    }
    fn set_status(&mut self, status: InterventionStatus) {
        self.status = status;
    }
    fn initial_status() -> InterventionStatus {
        InterventionStatus::Draft
    }
    fn machine() -> &'static Machine<Self> {
        &MACHINE
    }
    fn schema() -> &'static Schema {
        &SCHEMA
    }
}

#[cfg(test)]
mod tests;
