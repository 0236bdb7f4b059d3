//! Error taxonomy for the AFIP integration layer.
//!
//! Business rejections are not errors: a declined voucher is returned as an
//! [`AuthorizationResult`](crate::models::AuthorizationResult) with outcome
//! `Rejected`. Everything here is an infrastructure or configuration failure.

use thiserror::Error;

/// Reasons a sequence lookup can fail without the call itself failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceLookupError {
    /// The authority has no vouchers for this sales point and type.
    #[error("no prior vouchers")]
    NoPriorVouchers,
}

#[derive(Debug, Error)]
pub enum AfipError {
    /// Timeout or connection failure. Safe to retry.
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// Bad signature, untrusted certificate or a token the authority refuses.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The certificate/key pair could not be loaded or used.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Numbering conflict persisted after the automatic retry.
    #[error("Voucher numbering conflict not resolved after {attempts} attempts")]
    Sequence { attempts: u32 },

    #[error("Sequence lookup failed: {0}")]
    SequenceLookup(#[from] SequenceLookupError),

    /// The request was rejected locally; nothing was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The response could not be understood. `raw` keeps the payload.
    #[error("Parse error: {message}")]
    Parse { message: String, raw: String },

    /// WSAA refuses to issue a new ticket because one is still live.
    #[error("Authority reports an authentication ticket is already valid")]
    TicketAlreadyValid,

    /// A SOAP fault that does not map onto any other kind.
    #[error("Remote fault {code}: {message}")]
    RemoteFault { code: String, message: String },

    #[error("Ticket persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AfipError {
    pub fn network(message: impl Into<String>) -> Self {
        AfipError::Network {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        AfipError::Parse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AfipError::Network {
                retryable: true,
                ..
            }
        )
    }

    /// Short label used for the error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AfipError::Network { .. } => "network",
            AfipError::Auth(_) => "auth",
            AfipError::Signing(_) => "signing",
            AfipError::Sequence { .. } => "sequence",
            AfipError::SequenceLookup(_) => "sequence_lookup",
            AfipError::Validation(_) => "validation",
            AfipError::NotFound(_) => "not_found",
            AfipError::Parse { .. } => "parse",
            AfipError::TicketAlreadyValid => "ticket_already_valid",
            AfipError::RemoteFault { .. } => "remote_fault",
            AfipError::Persistence(_) => "persistence",
            AfipError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for AfipError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AfipError::network(format!("request timed out: {}", err))
        } else if err.is_connect() {
            AfipError::network(format!("connection failed: {}", err))
        } else {
            AfipError::Network {
                message: err.to_string(),
                retryable: err.is_request() || err.is_body(),
            }
        }
    }
}

impl From<validator::ValidationErrors> for AfipError {
    fn from(err: validator::ValidationErrors) -> Self {
        AfipError::Validation(err.to_string())
    }
}

impl From<redis::RedisError> for AfipError {
    fn from(err: redis::RedisError) -> Self {
        AfipError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for AfipError {
    fn from(err: std::io::Error) -> Self {
        AfipError::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for AfipError {
    fn from(err: config::ConfigError) -> Self {
        AfipError::Config(err.to_string())
    }
}

impl From<service_core::error::CoreError> for AfipError {
    fn from(err: service_core::error::CoreError) -> Self {
        AfipError::Config(err.to_string())
    }
}
