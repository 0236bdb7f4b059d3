//! Domain models for afip-service.

mod authorization;
mod invoice;
mod taxpayer;
mod ticket;

pub use authorization::{
    AuthorityMessage, AuthorizationResult, Outcome, SalesPoint, SequenceState, ServerStatus,
    VoucherStatus,
};
pub use invoice::{
    Concept, Currency, InvoiceRequest, LinkedVoucher, ReceiverDocument, ServicePeriod,
    TaxAmount, VoucherType, AMOUNT_TOLERANCE,
};
pub use taxpayer::{Address, TaxCondition, TaxId, TaxpayerRecord};
pub use ticket::{AccessTicket, TicketState};
