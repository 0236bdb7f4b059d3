//! Per-service cache of access tickets with expiration-aware renewal.
//!
//! Renewal is serialized per service name. Callers that queued behind a
//! login re-check the cache once they hold the lock and reuse the ticket the
//! first caller obtained.

use super::persistence::TicketPersistence;
use super::wsaa::TicketIssuer;
use crate::error::AfipError;
use crate::models::{AccessTicket, TicketState};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct TicketStore {
    issuer: Arc<dyn TicketIssuer>,
    persistence: Arc<dyn TicketPersistence>,
    cache: DashMap<String, AccessTicket>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    margin: Duration,
}

impl TicketStore {
    pub fn new(
        issuer: Arc<dyn TicketIssuer>,
        persistence: Arc<dyn TicketPersistence>,
        margin: Duration,
    ) -> Self {
        Self {
            issuer,
            persistence,
            cache: DashMap::new(),
            locks: DashMap::new(),
            margin,
        }
    }

    /// Return a ticket that is usable for at least the renewal margin,
    /// logging in when the cached one is absent, expiring or expired.
    #[instrument(skip(self))]
    pub async fn get_valid_ticket(&self, service: &str) -> Result<AccessTicket, AfipError> {
        if let Some(ticket) = self.cached_if_valid(service) {
            return Ok(ticket);
        }

        let lock = self.lock_for(service);
        let _guard = lock.lock().await;

        if let Some(ticket) = self.cached_if_valid(service) {
            debug!(service = service, "Ticket renewed by a concurrent caller");
            return Ok(ticket);
        }

        if let Some(ticket) = self.load_persisted(service).await {
            if ticket.state_at(Utc::now(), self.margin) == TicketState::Valid {
                info!(service = service, "Reusing persisted ticket");
                self.cache.insert(service.to_string(), ticket.clone());
                return Ok(ticket);
            }
        }

        let state = self.state(service);
        info!(service = service, state = state.as_str(), "Requesting new ticket");

        match self.issuer.login(service).await {
            Ok(ticket) => {
                self.cache.insert(service.to_string(), ticket.clone());
                if let Err(e) = self.persistence.save(&ticket).await {
                    warn!(service = service, error = %e, "Failed to persist ticket");
                }
                Ok(ticket)
            }
            Err(AfipError::TicketAlreadyValid) => self.recover_live_ticket(service).await,
            Err(e) => Err(e),
        }
    }

    /// Drop the cached ticket so the next call renews it. Persisted copies
    /// are left alone.
    pub fn invalidate(&self, service: &str) {
        if self.cache.remove(service).is_some() {
            info!(service = service, "Ticket invalidated");
        }
    }

    pub fn state(&self, service: &str) -> TicketState {
        let cached = self.cache.get(service).map(|entry| entry.value().clone());
        TicketState::of(cached.as_ref(), Utc::now(), self.margin)
    }

    fn cached_if_valid(&self, service: &str) -> Option<AccessTicket> {
        let entry = self.cache.get(service)?;
        match entry.state_at(Utc::now(), self.margin) {
            TicketState::Valid => Some(entry.value().clone()),
            _ => None,
        }
    }

    fn lock_for(&self, service: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn load_persisted(&self, service: &str) -> Option<AccessTicket> {
        match self.persistence.load(service).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(service = service, error = %e, "Failed to read persisted ticket");
                None
            }
        }
    }

    /// WSAA still holds a live ticket for us. Use whatever copy we have as
    /// long as the authority would still accept it.
    async fn recover_live_ticket(&self, service: &str) -> Result<AccessTicket, AfipError> {
        let now = Utc::now();
        let cached = self.cache.get(service).map(|entry| entry.value().clone());
        let candidate = match cached {
            Some(ticket) => Some(ticket),
            None => self.load_persisted(service).await,
        };

        match candidate {
            Some(ticket) if ticket.state_at(now, self.margin) != TicketState::Expired => {
                warn!(
                    service = service,
                    expiration_time = %ticket.expiration_time,
                    "Authority reports a live ticket; reusing the stored copy"
                );
                self.cache.insert(service.to_string(), ticket.clone());
                Ok(ticket)
            }
            _ => Err(AfipError::Auth(format!(
                "authority holds a live ticket for {} but no usable copy is stored",
                service
            ))),
        }
    }
}
