//! Durable storage for access tickets so a restarted process can reuse them.

use crate::error::AfipError;
use crate::models::AccessTicket;
use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

#[async_trait]
pub trait TicketPersistence: Send + Sync {
    async fn load(&self, service: &str) -> Result<Option<AccessTicket>, AfipError>;
    async fn save(&self, ticket: &AccessTicket) -> Result<(), AfipError>;
}

/// Process-local persistence; tickets are lost on restart.
#[derive(Default)]
pub struct InMemoryTicketPersistence {
    tickets: Mutex<HashMap<String, AccessTicket>>,
}

impl InMemoryTicketPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(ticket: AccessTicket) -> Self {
        let persistence = Self::default();
        if let Ok(mut tickets) = persistence.tickets.lock() {
            tickets.insert(ticket.service_name.clone(), ticket);
        }
        persistence
    }
}

#[async_trait]
impl TicketPersistence for InMemoryTicketPersistence {
    async fn load(&self, service: &str) -> Result<Option<AccessTicket>, AfipError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| AfipError::Persistence("ticket map poisoned".to_string()))?;
        Ok(tickets.get(service).cloned())
    }

    async fn save(&self, ticket: &AccessTicket) -> Result<(), AfipError> {
        let mut tickets = self
            .tickets
            .lock()
            .map_err(|_| AfipError::Persistence("ticket map poisoned".to_string()))?;
        tickets.insert(ticket.service_name.clone(), ticket.clone());
        Ok(())
    }
}

/// One JSON file per service in a directory.
pub struct FileTicketPersistence {
    directory: PathBuf,
}

impl FileTicketPersistence {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize(service)))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn sanitize(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl TicketPersistence for FileTicketPersistence {
    async fn load(&self, service: &str) -> Result<Option<AccessTicket>, AfipError> {
        let path = self.path_for(service);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let ticket = serde_json::from_slice(&contents).map_err(|e| {
            AfipError::Persistence(format!("corrupt ticket file {}: {}", path.display(), e))
        })?;
        debug!(service = service, path = %path.display(), "Loaded persisted ticket");
        Ok(Some(ticket))
    }

    async fn save(&self, ticket: &AccessTicket) -> Result<(), AfipError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let path = self.path_for(&ticket.service_name);
        let staging = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(ticket)
            .map_err(|e| AfipError::Persistence(format!("ticket serialization: {}", e)))?;

        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(service = %ticket.service_name, path = %path.display(), "Persisted ticket");
        Ok(())
    }
}

/// Tickets stored under `afip:ticket:<service>` with a TTL matching their validity.
#[derive(Clone)]
pub struct RedisTicketPersistence {
    manager: ConnectionManager,
}

impl RedisTicketPersistence {
    pub async fn connect(url: &str) -> Result<Self, AfipError> {
        info!("Connecting to Redis for ticket persistence");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AfipError::Persistence(format!("failed to connect to Redis: {}", e))
        })?;
        Ok(Self { manager })
    }

    fn key(service: &str) -> String {
        format!("afip:ticket:{}", service)
    }
}

#[async_trait]
impl TicketPersistence for RedisTicketPersistence {
    async fn load(&self, service: &str) -> Result<Option<AccessTicket>, AfipError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::key(service))
            .query_async(&mut conn)
            .await?;

        value
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| AfipError::Persistence(format!("corrupt ticket entry: {}", e)))
            })
            .transpose()
    }

    async fn save(&self, ticket: &AccessTicket) -> Result<(), AfipError> {
        let ttl = ticket.remaining(Utc::now()).num_seconds();
        if ttl <= 0 {
            return Ok(());
        }

        let json = serde_json::to_string(ticket)
            .map_err(|e| AfipError::Persistence(format!("ticket serialization: {}", e)))?;
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(&ticket.service_name))
            .arg(json)
            .arg("EX")
            .arg(ttl)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ticket(service: &str) -> AccessTicket {
        let now = Utc::now();
        AccessTicket {
            service_name: service.to_string(),
            token: "token".to_string(),
            signature: "sign".to_string(),
            generation_time: now,
            expiration_time: now + Duration::hours(12),
        }
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let persistence = InMemoryTicketPersistence::new();
        assert!(persistence.load("wsfe").await.unwrap().is_none());

        persistence.save(&ticket("wsfe")).await.unwrap();
        let loaded = persistence.load("wsfe").await.unwrap().unwrap();
        assert_eq!(loaded.token, "token");
        assert!(persistence.load("ws_sr_constancia_inscripcion").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_persistence_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let original = ticket("wsfe");

        FileTicketPersistence::new(dir.path().join("tickets"))
            .save(&original)
            .await
            .unwrap();

        let reopened = FileTicketPersistence::new(dir.path().join("tickets"));
        let loaded = reopened.load("wsfe").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(!dir.path().join("tickets").join("wsfe.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_persistence_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileTicketPersistence::new(dir.path());
        assert!(persistence.load("wsfe").await.unwrap().is_none());

        std::fs::write(dir.path().join("wsfe.json"), b"{not json").unwrap();
        assert!(matches!(
            persistence.load("wsfe").await,
            Err(AfipError::Persistence(_))
        ));
    }

    #[test]
    fn test_file_names_are_sanitized() {
        let persistence = FileTicketPersistence::new("/tmp/t");
        assert_eq!(
            persistence.path_for("../etc/passwd"),
            PathBuf::from("/tmp/t/___etc_passwd.json")
        );
    }
}
