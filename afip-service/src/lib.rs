//! AFIP Service - electronic invoicing against the Argentine tax authority.
//!
//! Obtains WSAA access tickets, requests voucher authorization codes from
//! WSFEv1 and queries the Padron A5 taxpayer registry.

pub mod config;
pub mod error;
pub mod facade;
pub mod models;
pub mod services;
pub mod soap;

pub use error::AfipError;
pub use facade::ElectronicInvoicing;
