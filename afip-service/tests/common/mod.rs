//! Test helper module for afip-service integration tests.
//!
//! AFIP endpoints are served by a wiremock server; tickets come from a
//! counting fake issuer unless a test exercises WSAA itself.

#![allow(dead_code)]

use afip_service::error::AfipError;
use afip_service::models::{AccessTicket, TaxId};
use afip_service::services::{
    CmsSigner, InMemoryTicketPersistence, InvoiceClient, RegistryClient, TicketIssuer,
    TicketPersistence, TicketStore,
};
use afip_service::soap::{SoapTransport, XmlElement, SOAP_ENVELOPE_NS};
use afip_service::ElectronicInvoicing;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::MockServer;

pub const REQUESTER_CUIT: &str = "20409378472";
pub const SUBJECT_CUIT: &str = "20123456786";

pub fn requester() -> TaxId {
    TaxId::parse(REQUESTER_CUIT).unwrap()
}

pub fn transport() -> SoapTransport {
    transport_with_timeout(std::time::Duration::from_secs(5))
}

pub fn transport_with_timeout(timeout: std::time::Duration) -> SoapTransport {
    SoapTransport::new(timeout).unwrap()
}

pub fn ticket(service: &str, lifetime: Duration) -> AccessTicket {
    let now = Utc::now();
    AccessTicket {
        service_name: service.to_string(),
        token: format!("{}-token", service),
        signature: format!("{}-sign", service),
        generation_time: now - Duration::minutes(1),
        expiration_time: now + lifetime,
    }
}

/// Returns the document unchanged instead of a CMS envelope.
pub struct StubSigner;

impl CmsSigner for StubSigner {
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>, AfipError> {
        Ok(document.to_vec())
    }
}

/// Issues tickets locally and counts logins.
pub struct CountingIssuer {
    logins: AtomicUsize,
    lifetime: Duration,
    delay: std::time::Duration,
}

impl CountingIssuer {
    pub fn new() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            lifetime: Duration::hours(12),
            delay: std::time::Duration::ZERO,
        }
    }

    /// Each login takes `delay`, widening the window for racing callers.
    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketIssuer for CountingIssuer {
    async fn login(&self, service: &str) -> Result<AccessTicket, AfipError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut issued = ticket(service, self.lifetime);
        issued.token = format!("token-{}", n);
        Ok(issued)
    }
}

/// Persistence whose writes always fail.
pub struct FailingPersistence;

#[async_trait]
impl TicketPersistence for FailingPersistence {
    async fn load(&self, _service: &str) -> Result<Option<AccessTicket>, AfipError> {
        Ok(None)
    }

    async fn save(&self, _ticket: &AccessTicket) -> Result<(), AfipError> {
        Err(AfipError::Persistence("disk full".to_string()))
    }
}

pub struct TestHarness {
    pub server: MockServer,
    pub issuer: Arc<CountingIssuer>,
    pub tickets: Arc<TicketStore>,
    pub invoicing: ElectronicInvoicing,
}

impl TestHarness {
    pub async fn start() -> Self {
        Self::with_timeout(std::time::Duration::from_secs(5)).await
    }

    pub async fn with_timeout(timeout: std::time::Duration) -> Self {
        let server = MockServer::start().await;
        let issuer = Arc::new(CountingIssuer::new());
        let tickets = Arc::new(TicketStore::new(
            issuer.clone(),
            Arc::new(InMemoryTicketPersistence::new()),
            Duration::minutes(5),
        ));

        let invoicing = ElectronicInvoicing::new(
            InvoiceClient::new(
                transport_with_timeout(timeout),
                format!("{}/wsfe", server.uri()),
                tickets.clone(),
                requester(),
            ),
            RegistryClient::new(
                transport_with_timeout(timeout),
                format!("{}/padron", server.uri()),
                tickets.clone(),
                requester(),
            ),
        );

        Self {
            server,
            issuer,
            tickets,
            invoicing,
        }
    }

    /// Requests received so far whose body calls `operation`.
    pub async fn requests_for(&self, operation: &str) -> Vec<String> {
        let marker = format!(":{}", operation);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .filter(|body| body.contains(&marker))
            .collect()
    }
}

// Response fixtures

pub fn soap_envelope(body: XmlElement) -> String {
    XmlElement::new("soap:Envelope")
        .attr("xmlns:soap", SOAP_ENVELOPE_NS)
        .child(XmlElement::new("soap:Body").child(body))
        .to_document()
        .unwrap()
}

pub fn soap_fault(code: &str, message: &str) -> String {
    soap_envelope(
        XmlElement::new("soap:Fault")
            .child(XmlElement::leaf("faultcode", format!("ns1:{}", code)))
            .child(XmlElement::leaf("faultstring", message)),
    )
}

pub fn wsfe_response(operation: &str, result: Vec<XmlElement>) -> String {
    soap_envelope(
        XmlElement::new(format!("{}Response", operation))
            .attr("xmlns", "http://ar.gov.afip.dif.FEV1/")
            .child(XmlElement::new(format!("{}Result", operation)).children(result)),
    )
}

pub fn errors(code: i32, message: &str) -> XmlElement {
    XmlElement::new("Errors").child(
        XmlElement::new("Err")
            .child(XmlElement::leaf("Code", code))
            .child(XmlElement::leaf("Msg", message)),
    )
}

pub fn last_voucher(sales_point: u32, voucher_type: u16, number: u64) -> String {
    wsfe_response(
        "FECompUltimoAutorizado",
        vec![
            XmlElement::leaf("PtoVta", sales_point),
            XmlElement::leaf("CbteTipo", voucher_type),
            XmlElement::leaf("CbteNro", number),
        ],
    )
}

pub fn no_data(operation: &str) -> String {
    wsfe_response(
        operation,
        vec![errors(602, "Sin Resultados: - en ese punto de venta")],
    )
}

fn detail_response(
    number: u64,
    outcome: &str,
    cae: &str,
    expiry: &str,
    observations: &[(i32, &str)],
) -> XmlElement {
    XmlElement::new("FECAEDetResponse")
        .child(XmlElement::leaf("Concepto", 1))
        .child(XmlElement::leaf("DocTipo", 99))
        .child(XmlElement::leaf("DocNro", 0))
        .child(XmlElement::leaf("CbteDesde", number))
        .child(XmlElement::leaf("CbteHasta", number))
        .child(XmlElement::leaf("CbteFch", "20250601"))
        .child(XmlElement::leaf("Resultado", outcome))
        .optional_child((!observations.is_empty()).then(|| {
            XmlElement::new("Observaciones").children(observations.iter().map(|(code, msg)| {
                XmlElement::new("Obs")
                    .child(XmlElement::leaf("Code", code))
                    .child(XmlElement::leaf("Msg", msg))
            }))
        }))
        .child(XmlElement::leaf("CAE", cae))
        .child(XmlElement::leaf("CAEFchVto", expiry))
}

fn cab_response(outcome: &str) -> XmlElement {
    XmlElement::new("FeCabResp")
        .child(XmlElement::leaf("Cuit", REQUESTER_CUIT))
        .child(XmlElement::leaf("PtoVta", 1))
        .child(XmlElement::leaf("CbteTipo", 6))
        .child(XmlElement::leaf("FchProceso", "20250601103000"))
        .child(XmlElement::leaf("CantReg", 1))
        .child(XmlElement::leaf("Resultado", outcome))
        .child(XmlElement::leaf("Reproceso", "N"))
}

pub fn approved(number: u64, cae: &str, expiry: &str) -> String {
    wsfe_response(
        "FECAESolicitar",
        vec![
            cab_response("A"),
            XmlElement::new("FeDetResp").child(detail_response(number, "A", cae, expiry, &[])),
        ],
    )
}

pub fn rejected(number: u64, observations: &[(i32, &str)]) -> String {
    wsfe_response(
        "FECAESolicitar",
        vec![
            cab_response("R"),
            XmlElement::new("FeDetResp")
                .child(detail_response(number, "R", "", "", observations)),
        ],
    )
}

pub fn numbering_conflict(number: u64) -> String {
    wsfe_response(
        "FECAESolicitar",
        vec![
            cab_response("R"),
            XmlElement::new("FeDetResp").child(detail_response(number, "R", "", "", &[])),
            errors(
                10016,
                "El numero o fecha del comprobante no se corresponde con el proximo a autorizar",
            ),
        ],
    )
}

pub fn login_response(token: &str, sign: &str, generation: &str, expiration: &str) -> String {
    let ticket = XmlElement::new("loginTicketResponse")
        .attr("version", "1.0")
        .child(
            XmlElement::new("header")
                .child(XmlElement::leaf("source", "CN=wsaahomo, O=AFIP, C=AR"))
                .child(XmlElement::leaf("destination", "SERIALNUMBER=CUIT 20409378472"))
                .child(XmlElement::leaf("uniqueId", 1741608000))
                .child(XmlElement::leaf("generationTime", generation))
                .child(XmlElement::leaf("expirationTime", expiration)),
        )
        .child(
            XmlElement::new("credentials")
                .child(XmlElement::leaf("token", token))
                .child(XmlElement::leaf("sign", sign)),
        )
        .to_document()
        .unwrap();

    soap_envelope(
        XmlElement::new("loginCmsResponse")
            .attr("xmlns", "http://wsaa.view.sua.dvadac.desein.afip.gov")
            .child(XmlElement::leaf("loginCmsReturn", ticket)),
    )
}

pub fn persona_response(persona: XmlElement) -> String {
    soap_envelope(
        XmlElement::new("ns2:getPersona_v2Response")
            .attr("xmlns:ns2", "http://a5.soap.ws.server.puc.sr/")
            .child(persona),
    )
}
