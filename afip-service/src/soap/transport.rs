use super::{SoapFault, XmlElement, XmlNode};
use crate::error::AfipError;
use crate::services::metrics::{SOAP_REQUESTS_TOTAL, SOAP_REQUEST_DURATION};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// A remote SOAP service: metrics label plus URL.
#[derive(Debug, Clone)]
pub struct SoapEndpoint {
    pub service: &'static str,
    pub url: String,
}

impl SoapEndpoint {
    pub fn new(service: &'static str, url: impl Into<String>) -> Self {
        Self {
            service,
            url: url.into(),
        }
    }
}

/// Parsed response envelope together with the payload it came from.
#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub raw: String,
    pub root: XmlNode,
}

impl SoapResponse {
    /// Locate an element anywhere in the envelope or fail with the raw body.
    pub fn element(&self, name: &str) -> Result<&XmlNode, AfipError> {
        self.root.find(name).ok_or_else(|| {
            AfipError::parse(format!("response has no <{}> element", name), &self.raw)
        })
    }
}

/// HTTP client for SOAP calls with a fixed per-request timeout.
#[derive(Clone)]
pub struct SoapTransport {
    client: Client,
}

impl SoapTransport {
    pub fn new(timeout: Duration) -> Result<Self, AfipError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AfipError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// POST an envelope. SOAP faults come back as [`AfipError::RemoteFault`]
    /// for the caller to classify.
    pub async fn call(
        &self,
        endpoint: &SoapEndpoint,
        operation: &str,
        action: &str,
        envelope: &XmlElement,
    ) -> Result<SoapResponse, AfipError> {
        let body = envelope.to_xml()?;
        let timer = SOAP_REQUEST_DURATION
            .with_label_values(&[endpoint.service, operation])
            .start_timer();

        let result = self.send(endpoint, operation, action, body).await;
        timer.observe_duration();

        let status_label = match &result {
            Ok(_) => "ok",
            Err(AfipError::RemoteFault { .. }) => "fault",
            Err(AfipError::Network { .. }) => "network_error",
            Err(_) => "error",
        };
        SOAP_REQUESTS_TOTAL
            .with_label_values(&[endpoint.service, operation, status_label])
            .inc();

        result
    }

    async fn send(
        &self,
        endpoint: &SoapEndpoint,
        operation: &str,
        action: &str,
        body: String,
    ) -> Result<SoapResponse, AfipError> {
        debug!(
            service = endpoint.service,
            operation = operation,
            url = %endpoint.url,
            "Sending SOAP request"
        );

        let response = self
            .client
            .post(&endpoint.url)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header("SOAPAction", format!("\"{}\"", action))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    service = endpoint.service,
                    operation = operation,
                    error = %e,
                    "SOAP request failed"
                );
                AfipError::from(e)
            })?;

        let status = response.status();
        let raw = response.text().await?;

        debug!(
            service = endpoint.service,
            operation = operation,
            status = %status,
            bytes = raw.len(),
            "SOAP response received"
        );

        let root = match XmlNode::parse(&raw) {
            Ok(root) => root,
            Err(_) if !status.is_success() => {
                return Err(AfipError::Network {
                    message: format!("{} answered HTTP {}", endpoint.service, status),
                    retryable: status.is_server_error(),
                });
            }
            Err(e) => return Err(e),
        };

        if let Some(fault) = SoapFault::from_envelope(&root) {
            warn!(
                service = endpoint.service,
                operation = operation,
                fault_code = %fault.code,
                fault_message = %fault.message,
                "SOAP fault received"
            );
            return Err(AfipError::RemoteFault {
                code: fault.code,
                message: fault.message,
            });
        }

        if !status.is_success() {
            return Err(AfipError::Network {
                message: format!("{} answered HTTP {}", endpoint.service, status),
                retryable: status.is_server_error(),
            });
        }

        Ok(SoapResponse { raw, root })
    }
}
