//! Reference rows the documents point at: partner organizations and country
//! programmes. They carry no lifecycle of their own.
use crate::types::{Day, Id};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum PartnerType {
    #[n(0)]
    CivilSocietyOrganization,
    #[n(1)]
    Government,
    #[n(2)]
    BilateralMultilateral,
    #[n(3)]
    UnAgency,
}

impl fmt::Display for PartnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartnerType::CivilSocietyOrganization => "Civil Society Organization",
            PartnerType::Government => "Government",
            PartnerType::BilateralMultilateral => "Bilateral / Multilateral",
            PartnerType::UnAgency => "UN Agency",
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub name: String,
    /// Short code leading every agreement reference number.
    #[n(2)]
    pub short_code: String,
    #[n(3)]
    pub partner_type: PartnerType,
}

impl Partner {
    pub fn new(name: &str, short_code: &str, partner_type: PartnerType) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("partner")?,
            name: name.to_string(),
            short_code: short_code.to_string(),
            partner_type,
        })
    }

    pub fn is_cso(&self) -> bool {
        self.partner_type == PartnerType::CivilSocietyOrganization
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryProgramme {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub from_date: Day,
    #[n(3)]
    pub to_date: Day,
}

impl CountryProgramme {
    pub fn new(name: &str, from_date: Day, to_date: Day) -> anyhow::Result<Self> {
        Ok(Self {
            id: Id::new("cp")?,
            name: name.to_string(),
            from_date,
            to_date,
        })
    }
}
