//! Agreements: the umbrella contracts signed with a partner
mod rules;

use crate::compare::{FieldKind, Schema};
use crate::entity::{Entity, EntityKind};
use crate::intervention::InterventionStatus;
use crate::partner::{CountryProgramme, Partner};
use crate::rule;
use crate::types::{Day, Id};
use crate::validation::{Machine, RejectionKind, Transition, ValidationContext};
use rules::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum AgreementType {
    #[n(0)]
    PCA,
    #[n(1)]
    SSFA,
    #[n(2)]
    MOU,
}

impl fmt::Display for AgreementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgreementType::PCA => "PCA",
            AgreementType::SSFA => "SSFA",
            AgreementType::MOU => "MOU",
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgreementStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Signed,
    #[n(2)]
    Ended,
    #[n(3)]
    Suspended,
    #[n(4)]
    Terminated,
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgreementStatus::Draft => "draft",
            AgreementStatus::Signed => "signed",
            AgreementStatus::Ended => "ended",
            AgreementStatus::Suspended => "suspended",
            AgreementStatus::Terminated => "terminated",
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AmendmentKind {
    #[n(0)]
    PartnerName,
    #[n(1)]
    AuthorizedOfficers,
    #[n(2)]
    BankingInfo,
    #[n(3)]
    Clause,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementAmendment {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub number: String,
    #[n(2)]
    pub signed_date: Option<Day>,
    /// Reference of the signed amendment document.
    #[n(3)]
    pub signed_amendment: Option<String>,
    #[n(4)]
    pub kinds: Vec<AmendmentKind>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub reference_number: Option<String>,
    #[n(2)]
    pub agreement_type: AgreementType,
    #[n(3)]
    pub partner: Id,
    #[n(4)]
    pub country_programme: Option<Id>,
    #[n(5)]
    pub start: Option<Day>,
    #[n(6)]
    pub end: Option<Day>,
    #[n(7)]
    pub signed_by_unicef_date: Option<Day>,
    #[n(8)]
    pub signed_by_partner_date: Option<Day>,
    /// Internal signatory.
    #[n(9)]
    pub signed_by: Option<Id>,
    /// Partner signatory.
    #[n(10)]
    pub partner_manager: Option<Id>,
    #[n(11)]
    pub attached_agreement: Option<String>,
    #[n(12)]
    pub termination_doc: Option<String>,
    #[n(13)]
    pub status: AgreementStatus,
    #[n(14)]
    pub authorized_officers: Vec<Id>,
    #[n(15)]
    pub amendments: Vec<AgreementAmendment>,
    #[n(16)]
    pub ended_on: Option<Day>,
}

impl Agreement {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new(agreement_type: AgreementType, partner: &Id) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("agr")?,
            reference_number: None,
            agreement_type,
            partner: partner.clone(),
            country_programme: None,
            start: None,
            end: None,
            signed_by_unicef_date: None,
            signed_by_partner_date: None,
            signed_by: None,
            partner_manager: None,
            attached_agreement: None,
            termination_doc: None,
            status: AgreementStatus::Draft,
            authorized_officers: Vec::new(),
            amendments: Vec::new(),
            ended_on: None,
        })
    }
    pub fn set_country_programme(mut self, country_programme: &Id) -> Self {
        self.country_programme = Some(country_programme.clone());
        self
    }
    pub fn set_start(mut self, start: Day) -> Self {
        self.start = Some(start);
        self
    }
    pub fn set_end(mut self, end: Day) -> Self {
        self.end = Some(end);
        self
    }
    pub fn set_signed_by_unicef(mut self, date: Day, signatory: &Id) -> Self {
        self.signed_by_unicef_date = Some(date);
        self.signed_by = Some(signatory.clone());
        self
    }
    pub fn set_signed_by_partner(mut self, date: Day, manager: &Id) -> Self {
        self.signed_by_partner_date = Some(date);
        self.partner_manager = Some(manager.clone());
        self
    }
    pub fn set_attached_agreement(mut self, document: &str) -> Self {
        self.attached_agreement = Some(document.to_string());
        self
    }
    pub fn set_termination_doc(mut self, document: &str) -> Self {
        self.termination_doc = Some(document.to_string());
        self
    }
    pub fn set_status(mut self, status: AgreementStatus) -> Self {
        self.status = status;
        self
    }
    pub fn add_authorized_officer(mut self, officer: &Id) -> Self {
        self.authorized_officers.push(officer.clone());
        self
    }
    pub fn add_amendment(mut self, amendment: AgreementAmendment) -> Self {
        self.amendments.push(amendment);
        self
    }

    /// Later of the two signature dates, once both are known.
    pub fn signed_on(&self) -> Option<Day> {
        match (self.signed_by_unicef_date, self.signed_by_partner_date) {
            (Some(unicef), Some(partner)) => Some(unicef.max(partner)),
            _ => None,
        }
    }

    pub fn is_pca(&self) -> bool {
        self.agreement_type == AgreementType::PCA
    }
}

/// `{partner_code}/{KIND}{year}{seq:02}`
pub fn reference_number(partner_code: &str, kind: AgreementType, year: i32, seq: u64) -> String {
    format!("{partner_code}/{kind}{year}{seq:02}")
}

/// An intervention negotiated under an agreement, as the agreement's rules
/// see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedIntervention {
    pub id: Id,
    pub status: InterventionStatus,
    pub start: Option<Day>,
    pub end: Option<Day>,
}

/// Another agreement of the same partner under the same programme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingAgreement {
    pub id: Id,
    pub agreement_type: AgreementType,
    pub status: AgreementStatus,
    pub start: Option<Day>,
}

#[derive(Debug, Clone, Default)]
pub struct AgreementRelated {
    pub partner: Option<Partner>,
    pub country_programme: Option<CountryProgramme>,
    pub siblings: Vec<SiblingAgreement>,
    pub interventions: Vec<LinkedIntervention>,
}

fn set_closure_date(agreement: &mut Agreement, ctx: &ValidationContext<'_, Agreement>) {
    agreement.ended_on = Some(ctx.today);
}

fn rigid_while_signed(_: &Agreement) -> Vec<&'static str> {
    vec![
        "signed_by_unicef_date",
        "signed_by_partner_date",
        "signed_by",
        "partner_manager",
    ]
}

fn machine() -> Machine<Agreement> {
    use AgreementStatus::*;

    Machine::builder(&[Draft, Signed, Ended, Suspended, Terminated])
        .terminal(&[Ended, Terminated])
        .prepare("normalize_dates", RejectionKind::Basic, normalize_dates)
        .basic(rule!(start_end_dates_valid))
        .basic(rule!(signatures_valid))
        .basic(rule!(partner_type_valid_cso))
        .basic(rule!(one_pca_per_cp_per_partner))
        .basic(rule!(amendments_valid))
        .basic(rule!(ssfa_static))
        .transition(
            Transition::new("to_signed", &[Draft, Suspended], &[Signed])
                .when(rule!(transition_to_signed_valid)),
        )
        .transition(
            Transition::new("to_ended", &[Signed], &[Ended]).when(rule!(transition_to_ended_valid)),
        )
        .transition(Transition::new("to_suspended", &[Signed], &[Suspended]))
        .transition(
            Transition::new("to_terminated", &[Signed, Suspended], &[Terminated])
                .when(rule!(transition_to_terminated)),
        )
        .transition(
            Transition::new("to_cancelled", &[Signed, Suspended], &[Draft])
                .when(rule!(agreements_illegal_transition)),
        )
        .auto(Draft, Signed, &[])
        .auto(Signed, Ended, &[set_closure_date])
        .state(Signed, state_signed_valid)
        .state(Ended, state_ended_valid)
        .state(Suspended, state_suspended_valid)
        .rigid(Signed, rigid_while_signed)
        .error(
            "start_end_dates_valid",
            "end",
            "Agreement start date needs to be earlier than or the same as the end date",
        )
        .error("one_pca_per_cp_per_partner", "status", ONE_PCA_PER_CP)
        .error("agreement_transition_to_active_invalid_PCA", "status", ONE_PCA_PER_CP)
        .error(
            "partner_type_valid_cso",
            "partner",
            "Partner must be CSO in order to create a PCA.",
        )
        .error(
            "amendments_valid",
            "signed_amendment",
            "Please check that the Document is attached and signatures are not in the future",
        )
        .error(
            "transition_to_signed_invalid",
            "status",
            "Agreement cannot transition to signed without both signature dates and signatories",
        )
        .error(
            "agreement_transition_to_ended_invalid",
            "end",
            "Agreement cannot transition to ended until the end date has passed",
        )
        .build()
}

static MACHINE: LazyLock<Machine<Agreement>> = LazyLock::new(machine);

static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with(
            FieldKind::Identifier,
            &["partner", "country_programme", "signed_by", "partner_manager"],
        )
        .with(FieldKind::ToMany, &["authorized_officers"])
        .with(FieldKind::Embedded, &["amendments"])
});

impl Entity for Agreement {
    type Status = AgreementStatus;
    type Related = AgreementRelated;

    const KIND: EntityKind = EntityKind::Agreement;

    fn id(&self) -> &Id {
        &self.id
    }
    fn status(&self) -> AgreementStatus {
        self.status
    }
    fn set_status(&mut self, status: AgreementStatus) {
        self.status = status;
    }
    fn initial_status() -> AgreementStatus {
        AgreementStatus::Draft
    }
    fn machine() -> &'static Machine<Self> {
        &MACHINE
    }
    fn schema() -> &'static Schema {
        &SCHEMA
    }
}
