//! Invoice authorization request submitted by the application.

use super::taxpayer::{TaxCondition, TaxId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

/// Maximum accepted difference between the declared and computed totals.
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// AFIP voucher type code (`CbteTipo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoucherType(pub u16);

impl VoucherType {
    pub const INVOICE_A: VoucherType = VoucherType(1);
    pub const DEBIT_NOTE_A: VoucherType = VoucherType(2);
    pub const CREDIT_NOTE_A: VoucherType = VoucherType(3);
    pub const INVOICE_B: VoucherType = VoucherType(6);
    pub const DEBIT_NOTE_B: VoucherType = VoucherType(7);
    pub const CREDIT_NOTE_B: VoucherType = VoucherType(8);
    pub const INVOICE_C: VoucherType = VoucherType(11);
    pub const DEBIT_NOTE_C: VoucherType = VoucherType(12);
    pub const CREDIT_NOTE_C: VoucherType = VoucherType(13);

    pub fn code(&self) -> u16 {
        self.0
    }

    /// Class "C" documents carry no itemized VAT.
    pub fn is_exempt_from_itemized_tax(&self) -> bool {
        matches!(self.0, 11 | 12 | 13 | 15 | 211 | 212 | 213)
    }

    pub fn is_credit_or_debit_note(&self) -> bool {
        matches!(
            self.0,
            2 | 3 | 7 | 8 | 12 | 13 | 52 | 53 | 202 | 203 | 207 | 208 | 212 | 213
        )
    }
}

/// What the voucher bills (`Concepto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concept {
    Products,
    Services,
    ProductsAndServices,
}

impl Concept {
    pub fn code(&self) -> u8 {
        match self {
            Concept::Products => 1,
            Concept::Services => 2,
            Concept::ProductsAndServices => 3,
        }
    }

    pub fn includes_services(&self) -> bool {
        !matches!(self, Concept::Products)
    }
}

/// One VAT line: rate in percent, taxable base and tax amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAmount {
    pub rate: Decimal,
    pub base: Decimal,
    pub amount: Decimal,
}

impl TaxAmount {
    /// AFIP `AlicIva` id for the rate, if it is one the authority accepts.
    pub fn vat_rate_id(&self) -> Option<u8> {
        let rate = self.rate.normalize();
        [
            (Decimal::ZERO, 3),
            (Decimal::new(105, 1), 4),
            (Decimal::new(21, 0), 5),
            (Decimal::new(27, 0), 6),
            (Decimal::new(5, 0), 8),
            (Decimal::new(25, 1), 9),
        ]
        .into_iter()
        .find(|(known, _)| *known == rate)
        .map(|(_, id)| id)
    }
}

/// A voucher referenced by a credit or debit note (`CbteAsoc`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedVoucher {
    pub voucher_type: VoucherType,
    pub sales_point: u32,
    pub number: u64,
    #[serde(default)]
    pub issuer_tax_id: Option<String>,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
}

/// Billing period, required when the concept includes services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub payment_due: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: String,
    pub rate: Decimal,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            id: "PES".to_string(),
            rate: Decimal::ONE,
        }
    }
}

/// How the receiver is identified (`DocTipo` + `DocNro`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverDocument {
    Cuit(TaxId),
    Dni(u64),
    FinalConsumer,
}

impl ReceiverDocument {
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '0') {
            return Ok(ReceiverDocument::FinalConsumer);
        }
        let digits: String = trimmed.chars().filter(|c| *c != '-').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("receiver tax id '{}' is not numeric", input));
        }
        match digits.len() {
            11 => TaxId::parse(&digits).map(ReceiverDocument::Cuit),
            1..=8 => digits
                .parse()
                .map(ReceiverDocument::Dni)
                .map_err(|e| format!("receiver tax id '{}': {}", input, e)),
            _ => Err(format!(
                "receiver tax id '{}' is neither a CUIT nor a DNI",
                input
            )),
        }
    }

    pub fn doc_type(&self) -> u16 {
        match self {
            ReceiverDocument::Cuit(_) => 80,
            ReceiverDocument::Dni(_) => 96,
            ReceiverDocument::FinalConsumer => 99,
        }
    }

    pub fn doc_number(&self) -> u64 {
        match self {
            ReceiverDocument::Cuit(tax_id) => tax_id.value(),
            ReceiverDocument::Dni(number) => *number,
            ReceiverDocument::FinalConsumer => 0,
        }
    }
}

/// A single voucher to authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_invoice_request"))]
pub struct InvoiceRequest {
    pub voucher_type: VoucherType,
    #[validate(range(min = 1, max = 99998))]
    pub sales_point: u32,
    pub concept: Concept,
    pub receiver_tax_id: String,
    pub receiver_tax_condition: TaxCondition,
    pub net_amounts: Vec<Decimal>,
    #[serde(default)]
    pub tax_amounts: Vec<TaxAmount>,
    pub total_amount: Decimal,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub linked_vouchers: Vec<LinkedVoucher>,
    #[serde(default)]
    pub service_period: Option<ServicePeriod>,
    #[serde(default)]
    pub currency: Currency,
}

impl InvoiceRequest {
    pub fn net_total(&self) -> Decimal {
        self.net_amounts.iter().copied().sum()
    }

    pub fn tax_total(&self) -> Decimal {
        self.tax_amounts.iter().map(|t| t.amount).sum()
    }

    pub fn receiver_document(&self) -> Result<ReceiverDocument, String> {
        ReceiverDocument::parse(&self.receiver_tax_id)
    }

    /// VAT lines to transmit; empty for voucher types that must omit them.
    pub fn itemized_taxes(&self) -> &[TaxAmount] {
        if self.voucher_type.is_exempt_from_itemized_tax() {
            &[]
        } else {
            &self.tax_amounts
        }
    }

    /// Service dates sent with the voucher, defaulting to the issue date.
    pub fn effective_service_period(&self) -> Option<ServicePeriod> {
        if !self.concept.includes_services() {
            return None;
        }
        Some(self.service_period.unwrap_or(ServicePeriod {
            from: self.issue_date,
            to: self.issue_date,
            payment_due: self.issue_date,
        }))
    }
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::from(message));
    error
}

fn validate_invoice_request(request: &InvoiceRequest) -> Result<(), ValidationError> {
    if request.net_amounts.is_empty() {
        return Err(invalid(
            "net_amounts",
            "at least one net amount is required".to_string(),
        ));
    }

    let computed = request.net_total() + request.tax_total();
    if (request.total_amount - computed).abs() > AMOUNT_TOLERANCE {
        return Err(invalid(
            "total_amount",
            format!(
                "total {} does not match net plus taxes {}",
                request.total_amount, computed
            ),
        ));
    }

    if request.voucher_type.is_exempt_from_itemized_tax() {
        if request.tax_amounts.iter().any(|t| !t.amount.is_zero()) {
            return Err(invalid(
                "tax_amounts",
                format!(
                    "voucher type {} does not accept itemized taxes",
                    request.voucher_type.code()
                ),
            ));
        }
    } else if let Some(tax) = request.tax_amounts.iter().find(|t| t.vat_rate_id().is_none()) {
        return Err(invalid(
            "tax_amounts",
            format!("unsupported VAT rate {}%", tax.rate),
        ));
    }

    if request.voucher_type.is_credit_or_debit_note() && request.linked_vouchers.is_empty() {
        return Err(invalid(
            "linked_vouchers",
            format!(
                "voucher type {} requires at least one linked voucher",
                request.voucher_type.code()
            ),
        ));
    }

    if let Some(period) = request.service_period {
        if period.from > period.to {
            return Err(invalid(
                "service_period",
                "service period starts after it ends".to_string(),
            ));
        }
    }

    if request.currency.rate <= Decimal::ZERO {
        return Err(invalid(
            "currency",
            "exchange rate must be positive".to_string(),
        ));
    }

    request
        .receiver_document()
        .map_err(|message| invalid("receiver_tax_id", message))?;

    Ok(())
}
