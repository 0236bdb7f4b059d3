//! Results returned by the invoicing service.

use super::invoice::VoucherType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
    PartiallyApproved,
}

impl Outcome {
    /// Parse the authority's `Resultado` flag (`A`, `R`, `P`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(Outcome::Approved),
            "R" => Some(Outcome::Rejected),
            "P" => Some(Outcome::PartiallyApproved),
            _ => None,
        }
    }

    /// Combine per-detail outcomes: any rejection wins, unanimous approval
    /// approves, anything else is partial. `None` when there is nothing to
    /// combine.
    pub fn aggregate<I>(outcomes: I) -> Option<Self>
    where
        I: IntoIterator<Item = Outcome>,
    {
        let mut combined: Option<Outcome> = None;
        for outcome in outcomes {
            combined = Some(match (combined, outcome) {
                (_, Outcome::Rejected) | (Some(Outcome::Rejected), _) => Outcome::Rejected,
                (None, other) => other,
                (Some(Outcome::Approved), Outcome::Approved) => Outcome::Approved,
                _ => Outcome::PartiallyApproved,
            });
        }
        combined
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approved => "approved",
            Outcome::Rejected => "rejected",
            Outcome::PartiallyApproved => "partially_approved",
        }
    }
}

/// A coded observation, event or error reported by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityMessage {
    pub code: i32,
    pub message: String,
}

/// Outcome of one authorization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub assigned_voucher_number: u64,
    /// CAE; absent when the voucher was rejected.
    pub authorization_code: Option<String>,
    pub authorization_expiry: Option<NaiveDate>,
    pub outcome: Outcome,
    pub observations: Vec<AuthorityMessage>,
    pub errors: Vec<AuthorityMessage>,
}

impl AuthorizationResult {
    pub fn is_approved(&self) -> bool {
        self.outcome == Outcome::Approved
    }

    /// The authority declined the voucher; resubmitting unchanged will fail again.
    pub fn is_business_rejection(&self) -> bool {
        self.outcome == Outcome::Rejected
    }
}

/// Last number the authority has authorized for a sales point and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub sales_point: u32,
    pub voucher_type: VoucherType,
    pub last_voucher_number: u64,
}

impl SequenceState {
    pub fn next_voucher_number(&self) -> u64 {
        self.last_voucher_number + 1
    }
}

/// An already-authorized voucher as recorded by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherStatus {
    pub sales_point: u32,
    pub voucher_type: VoucherType,
    pub voucher_number: u64,
    pub authorization_code: Option<String>,
    pub authorization_expiry: Option<NaiveDate>,
    pub outcome: Outcome,
    pub issue_date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

/// `FEDummy` health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub app_server: String,
    pub db_server: String,
    pub auth_server: String,
}

impl ServerStatus {
    pub fn is_healthy(&self) -> bool {
        [&self.app_server, &self.db_server, &self.auth_server]
            .iter()
            .all(|s| s.eq_ignore_ascii_case("OK"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub number: u32,
    pub emission_type: String,
    pub blocked: bool,
    pub deactivated_on: Option<NaiveDate>,
}
