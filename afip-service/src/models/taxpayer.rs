//! Taxpayer registry models.

use serde::{Deserialize, Serialize};
use std::fmt;

const CUIT_WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

/// An 11-digit CUIT/CUIL with a verified check digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(u64);

impl TaxId {
    /// Parse a CUIT, accepting the usual `20-12345678-6` formatting.
    pub fn parse(input: &str) -> Result<Self, String> {
        let digits: Vec<u32> = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_digit(10).ok_or_else(|| format!("'{}' is not numeric", input)))
            .collect::<Result<_, _>>()?;

        if digits.len() != 11 {
            return Err(format!("'{}' must have 11 digits", input));
        }

        let sum: u32 = digits
            .iter()
            .zip(CUIT_WEIGHTS.iter())
            .map(|(d, w)| d * w)
            .sum();
        let expected = match 11 - (sum % 11) {
            11 => 0,
            10 => return Err(format!("'{}' has no valid check digit", input)),
            n => n,
        };
        if digits[10] != expected {
            return Err(format!("'{}' has an invalid check digit", input));
        }

        let value = digits.iter().fold(0u64, |acc, d| acc * 10 + u64::from(*d));
        Ok(Self(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:011}", self.0)
    }
}

impl TryFrom<String> for TaxId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxId::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.to_string()
    }
}

/// VAT condition of a counterparty (`CondicionIVAReceptorId` codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCondition {
    Registered,
    Exempt,
    FinalConsumer,
    Monotributo,
    NotCategorized,
    ForeignSupplier,
    ForeignCustomer,
    VatReleased,
    SocialMonotributo,
    VatNotApplicable,
    PromotedIndependentWorker,
}

impl TaxCondition {
    pub fn code(&self) -> u8 {
        match self {
            TaxCondition::Registered => 1,
            TaxCondition::Exempt => 4,
            TaxCondition::FinalConsumer => 5,
            TaxCondition::Monotributo => 6,
            TaxCondition::NotCategorized => 7,
            TaxCondition::ForeignSupplier => 8,
            TaxCondition::ForeignCustomer => 9,
            TaxCondition::VatReleased => 10,
            TaxCondition::SocialMonotributo => 13,
            TaxCondition::VatNotApplicable => 15,
            TaxCondition::PromotedIndependentWorker => 16,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TaxCondition::Registered),
            4 => Some(TaxCondition::Exempt),
            5 => Some(TaxCondition::FinalConsumer),
            6 => Some(TaxCondition::Monotributo),
            7 => Some(TaxCondition::NotCategorized),
            8 => Some(TaxCondition::ForeignSupplier),
            9 => Some(TaxCondition::ForeignCustomer),
            10 => Some(TaxCondition::VatReleased),
            13 => Some(TaxCondition::SocialMonotributo),
            15 => Some(TaxCondition::VatNotApplicable),
            16 => Some(TaxCondition::PromotedIndependentWorker),
            _ => None,
        }
    }
}

/// Fiscal address as published by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub province: Option<String>,
}

/// Identity and tax condition of a registered taxpayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxpayerRecord {
    pub tax_id: TaxId,
    pub legal_name: String,
    pub address: Option<Address>,
    pub tax_condition: TaxCondition,
}
