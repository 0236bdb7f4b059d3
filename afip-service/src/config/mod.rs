use crate::error::AfipError;
use crate::models::TaxId;
use config::{Config as Cfg, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RENEWAL_MARGIN_SECONDS: u64 = 300;
const DEFAULT_LOGIN_WINDOW_SECONDS: u64 = 600;
/// WSAA tickets live for twelve hours.
const MAX_RENEWAL_MARGIN_SECONDS: u64 = 12 * 3600;

/// Which AFIP deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfipEnvironment {
    Homologation,
    Production,
}

/// Resolved service URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub wsaa: String,
    pub wsfe: String,
    pub padron: String,
}

impl AfipEnvironment {
    pub fn default_endpoints(&self) -> Endpoints {
        match self {
            AfipEnvironment::Homologation => Endpoints {
                wsaa: "https://wsaahomo.afip.gov.ar/ws/services/LoginCms".to_string(),
                wsfe: "https://wswhomo.afip.gov.ar/wsfev1/service.asmx".to_string(),
                padron: "https://awshomo.afip.gov.ar/sr-padron/webservices/personaServiceA5"
                    .to_string(),
            },
            AfipEnvironment::Production => Endpoints {
                wsaa: "https://wsaa.afip.gov.ar/ws/services/LoginCms".to_string(),
                wsfe: "https://servicios1.afip.gov.ar/wsfev1/service.asmx".to_string(),
                padron: "https://aws.afip.gov.ar/sr-padron/webservices/personaServiceA5"
                    .to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AfipConfig {
    #[serde(skip)]
    pub common: core_config::Config,
    pub environment: AfipEnvironment,
    /// CUIT of the issuing taxpayer, sent in every `Auth` block.
    pub tax_id: String,
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub endpoints: EndpointOverrides,
    #[serde(default)]
    pub tickets: TicketConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default)]
    pub key_passphrase: Option<Secret<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverrides {
    pub wsaa: Option<String>,
    pub wsfe: Option<String>,
    pub padron: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketBackend {
    Memory,
    #[default]
    File,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketConfig {
    #[serde(default)]
    pub backend: TicketBackend,
    #[serde(default = "default_ticket_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub redis_url: Option<Secret<String>>,
    /// Tickets are renewed once they are this close to expiring.
    #[serde(default = "default_renewal_margin")]
    pub renewal_margin_seconds: u64,
    /// Validity requested in the login ticket request.
    #[serde(default = "default_login_window")]
    pub login_window_seconds: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            backend: TicketBackend::default(),
            directory: default_ticket_directory(),
            redis_url: None,
            renewal_margin_seconds: DEFAULT_RENEWAL_MARGIN_SECONDS,
            login_window_seconds: DEFAULT_LOGIN_WINDOW_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

fn default_ticket_directory() -> PathBuf {
    PathBuf::from(".afip/tickets")
}

fn default_renewal_margin() -> u64 {
    DEFAULT_RENEWAL_MARGIN_SECONDS
}

fn default_login_window() -> u64 {
    DEFAULT_LOGIN_WINDOW_SECONDS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl AfipConfig {
    /// Load from defaults, an optional `afip` file and `AFIP__*` variables.
    pub fn load() -> Result<Self, AfipError> {
        dotenvy::dotenv().ok();
        let common = core_config::Config::load()?;

        let settings = Cfg::builder()
            .set_default("environment", "homologation")?
            .add_source(File::with_name("afip").required(false))
            .add_source(Environment::with_prefix("AFIP").separator("__"))
            .build()?;

        let mut config = Self::from_settings(settings)?;
        config.common = common;
        Ok(config)
    }

    pub fn from_settings(settings: Cfg) -> Result<Self, AfipError> {
        let config: AfipConfig = settings.try_deserialize()?;

        TaxId::parse(&config.tax_id)
            .map_err(|e| AfipError::Config(format!("tax_id: {}", e)))?;

        if config.tickets.backend == TicketBackend::Redis && config.tickets.redis_url.is_none() {
            return Err(AfipError::Config(
                "tickets.redis_url is required for the redis backend".to_string(),
            ));
        }

        if config.tickets.renewal_margin_seconds >= MAX_RENEWAL_MARGIN_SECONDS {
            return Err(AfipError::Config(
                "tickets.renewal_margin_seconds must be shorter than the ticket lifetime"
                    .to_string(),
            ));
        }

        Ok(config)
    }

    pub fn endpoints(&self) -> Endpoints {
        let defaults = self.environment.default_endpoints();
        Endpoints {
            wsaa: self.endpoints.wsaa.clone().unwrap_or(defaults.wsaa),
            wsfe: self.endpoints.wsfe.clone().unwrap_or(defaults.wsfe),
            padron: self.endpoints.padron.clone().unwrap_or(defaults.padron),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn renewal_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tickets.renewal_margin_seconds as i64)
    }

    pub fn login_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tickets.login_window_seconds as i64)
    }
}
