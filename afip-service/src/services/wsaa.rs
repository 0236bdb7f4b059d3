//! WSAA client: exchanges a signed login ticket request for an access ticket.

use super::metrics::LOGINS_TOTAL;
use super::signer::LoginSigner;
use crate::error::AfipError;
use crate::models::AccessTicket;
use crate::soap::{envelope, Namespace, SoapEndpoint, SoapResponse, SoapTransport, XmlNode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

const WSAA: Namespace = Namespace::new("wsaa", "http://wsaa.view.sua.dvadac.desein.afip.gov");

/// Source of fresh tickets for the [`TicketStore`](super::tickets::TicketStore).
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn login(&self, service: &str) -> Result<AccessTicket, AfipError>;
}

pub struct AuthClient {
    transport: SoapTransport,
    endpoint: SoapEndpoint,
    signer: LoginSigner,
}

impl AuthClient {
    pub fn new(transport: SoapTransport, url: impl Into<String>, signer: LoginSigner) -> Self {
        Self {
            transport,
            endpoint: SoapEndpoint::new("wsaa", url),
            signer,
        }
    }
}

#[async_trait]
impl TicketIssuer for AuthClient {
    #[instrument(skip(self))]
    async fn login(&self, service: &str) -> Result<AccessTicket, AfipError> {
        let signed_request = self.signer.signed_request(service, Utc::now())?;

        let request = envelope(
            WSAA,
            WSAA.element("loginCms")
                .child(WSAA.leaf("in0", signed_request)),
        );

        let result = self
            .transport
            .call(&self.endpoint, "loginCms", "", &request)
            .await
            .map_err(classify_fault)
            .and_then(|response| parse_login_response(service, &response));

        match &result {
            Ok(ticket) => {
                LOGINS_TOTAL.with_label_values(&[service, "issued"]).inc();
                info!(
                    service = service,
                    expiration_time = %ticket.expiration_time,
                    "Access ticket issued"
                );
            }
            Err(AfipError::TicketAlreadyValid) => {
                LOGINS_TOTAL
                    .with_label_values(&[service, "already_valid"])
                    .inc();
                info!(service = service, "Authority reports a live ticket");
            }
            Err(e) => {
                LOGINS_TOTAL.with_label_values(&[service, "failed"]).inc();
                warn!(service = service, error = %e, "Login failed");
            }
        }

        result
    }
}

/// Map WSAA fault codes onto the error taxonomy.
pub fn classify_fault(error: AfipError) -> AfipError {
    let AfipError::RemoteFault { code, message } = error else {
        return error;
    };

    if code == "coe.alreadyAuthenticated" {
        return AfipError::TicketAlreadyValid;
    }
    if code.starts_with("cms.") || code.starts_with("cert") || code == "coe.notAuthorized" {
        return AfipError::Auth(format!("{}: {}", code, message));
    }
    if code == "wsn.unavailable" || code == "coe.unavailable" {
        return AfipError::network(format!("{}: {}", code, message));
    }
    AfipError::RemoteFault { code, message }
}

fn parse_login_response(service: &str, response: &SoapResponse) -> Result<AccessTicket, AfipError> {
    let payload = response.element("loginCmsReturn")?.text.trim();
    let ticket = XmlNode::parse(payload).map_err(|_| {
        AfipError::parse("loginCmsReturn does not hold a ticket", &response.raw)
    })?;

    let credentials = ticket
        .child("credentials")
        .ok_or_else(|| AfipError::parse("ticket has no credentials", &response.raw))?;
    let header = ticket
        .child("header")
        .ok_or_else(|| AfipError::parse("ticket has no header", &response.raw))?;

    let required = |node: &XmlNode, name: &str| -> Result<String, AfipError> {
        node.child_value(name)
            .map(str::to_string)
            .ok_or_else(|| AfipError::parse(format!("ticket has no {}", name), &response.raw))
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>, AfipError> {
        let value = required(header, name)?;
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| AfipError::parse(format!("{} '{}': {}", name, value, e), &response.raw))
    };

    Ok(AccessTicket {
        service_name: service.to_string(),
        token: required(credentials, "token")?,
        signature: required(credentials, "sign")?,
        generation_time: timestamp("generationTime")?,
        expiration_time: timestamp("expirationTime")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> SoapResponse {
        SoapResponse {
            raw: body.to_string(),
            root: XmlNode::parse(body).unwrap(),
        }
    }

    #[test]
    fn test_parse_login_response() {
        let body = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
          <soapenv:Body><loginCmsResponse><loginCmsReturn>&lt;?xml version="1.0" encoding="UTF-8" standalone="yes"?&gt;
&lt;loginTicketResponse version="1.0"&gt;&lt;header&gt;&lt;source&gt;CN=wsaahomo&lt;/source&gt;&lt;destination&gt;SERIALNUMBER=CUIT 20409378472&lt;/destination&gt;&lt;uniqueId&gt;1&lt;/uniqueId&gt;&lt;generationTime&gt;2025-03-10T12:00:00.000-03:00&lt;/generationTime&gt;&lt;expirationTime&gt;2025-03-11T00:00:00.000-03:00&lt;/expirationTime&gt;&lt;/header&gt;&lt;credentials&gt;&lt;token&gt;PD94bWwg&lt;/token&gt;&lt;sign&gt;mZq3hA==&lt;/sign&gt;&lt;/credentials&gt;&lt;/loginTicketResponse&gt;</loginCmsReturn></loginCmsResponse></soapenv:Body></soapenv:Envelope>"#;

        let ticket = parse_login_response("wsfe", &response(body)).unwrap();
        assert_eq!(ticket.service_name, "wsfe");
        assert_eq!(ticket.token, "PD94bWwg");
        assert_eq!(ticket.signature, "mZq3hA==");
        assert_eq!(
            ticket.expiration_time,
            DateTime::parse_from_rfc3339("2025-03-11T03:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_parse_login_response_without_credentials() {
        let body = "<Envelope><Body><loginCmsReturn>&lt;loginTicketResponse/&gt;</loginCmsReturn></Body></Envelope>";
        let err = parse_login_response("wsfe", &response(body)).unwrap_err();
        match err {
            AfipError::Parse { raw, .. } => assert_eq!(raw, body),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_classify_fault() {
        let fault = |code: &str| AfipError::RemoteFault {
            code: code.to_string(),
            message: "msg".to_string(),
        };

        assert!(matches!(
            classify_fault(fault("coe.alreadyAuthenticated")),
            AfipError::TicketAlreadyValid
        ));
        assert!(matches!(
            classify_fault(fault("cms.sign.invalid")),
            AfipError::Auth(_)
        ));
        assert!(matches!(
            classify_fault(fault("cms.cert.expired")),
            AfipError::Auth(_)
        ));
        assert!(classify_fault(fault("wsn.unavailable")).is_retryable());
        assert!(matches!(
            classify_fault(fault("xml.bad")),
            AfipError::RemoteFault { .. }
        ));
        assert!(classify_fault(AfipError::network("timeout")).is_retryable());
    }
}
