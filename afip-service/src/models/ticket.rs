//! Authentication ticket issued by WSAA.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived credential required by every WSFE and Padron call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTicket {
    pub service_name: String,
    pub token: String,
    pub signature: String,
    pub generation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}

impl fmt::Debug for AccessTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTicket")
            .field("service_name", &self.service_name)
            .field("token", &"[REDACTED]")
            .field("signature", &"[REDACTED]")
            .field("generation_time", &self.generation_time)
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}

impl AccessTicket {
    pub fn state_at(&self, now: DateTime<Utc>, margin: Duration) -> TicketState {
        if now >= self.expiration_time {
            TicketState::Expired
        } else if now >= self.expiration_time - margin {
            TicketState::Expiring
        } else {
            TicketState::Valid
        }
    }

    /// Time left before the authority stops accepting the ticket.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiration_time - now
    }
}

/// Lifecycle of the cached ticket for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Absent,
    Valid,
    Expiring,
    Expired,
}

impl TicketState {
    pub fn of(ticket: Option<&AccessTicket>, now: DateTime<Utc>, margin: Duration) -> Self {
        match ticket {
            Some(ticket) => ticket.state_at(now, margin),
            None => TicketState::Absent,
        }
    }

    pub fn needs_renewal(&self) -> bool {
        !matches!(self, TicketState::Valid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::Absent => "absent",
            TicketState::Valid => "valid",
            TicketState::Expiring => "expiring",
            TicketState::Expired => "expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_expiring_at(expiration_time: DateTime<Utc>) -> AccessTicket {
        AccessTicket {
            service_name: "wsfe".to_string(),
            token: "secret-token".to_string(),
            signature: "secret-sign".to_string(),
            generation_time: expiration_time - Duration::hours(12),
            expiration_time,
        }
    }

    #[test]
    fn test_state_transitions() {
        let now = Utc::now();
        let margin = Duration::minutes(5);

        assert_eq!(TicketState::of(None, now, margin), TicketState::Absent);

        let valid = ticket_expiring_at(now + Duration::hours(1));
        assert_eq!(valid.state_at(now, margin), TicketState::Valid);

        let expiring = ticket_expiring_at(now + Duration::minutes(2));
        assert_eq!(expiring.state_at(now, margin), TicketState::Expiring);

        let expired = ticket_expiring_at(now - Duration::seconds(1));
        assert_eq!(expired.state_at(now, margin), TicketState::Expired);

        assert!(!TicketState::Valid.needs_renewal());
        assert!(TicketState::Expiring.needs_renewal());
        assert!(TicketState::Absent.needs_renewal());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let ticket = ticket_expiring_at(Utc::now());
        let debug = format!("{:?}", ticket);
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("secret-sign"));
        assert!(debug.contains("wsfe"));
    }
}
