//! Padron A5 ("constancia de inscripcion") taxpayer registry client.

use super::tickets::TicketStore;
use crate::error::AfipError;
use crate::models::{Address, TaxCondition, TaxId, TaxpayerRecord};
use crate::soap::{envelope, Namespace, SoapEndpoint, SoapTransport, XmlElement, XmlNode};
use std::sync::Arc;
use tracing::{info, instrument};

/// WSAA service name for the registry.
pub const PADRON_SERVICE: &str = "ws_sr_constancia_inscripcion";

const A5: Namespace = Namespace::new("a5", "http://a5.soap.ws.server.puc.sr/");

const VAT_REGISTERED_TAX: &str = "30";
const VAT_EXEMPT_TAX: &str = "32";

pub struct RegistryClient {
    transport: SoapTransport,
    endpoint: SoapEndpoint,
    tickets: Arc<TicketStore>,
    tax_id: TaxId,
}

impl RegistryClient {
    pub fn new(
        transport: SoapTransport,
        url: impl Into<String>,
        tickets: Arc<TicketStore>,
        tax_id: TaxId,
    ) -> Self {
        Self {
            transport,
            endpoint: SoapEndpoint::new("padron", url),
            tickets,
            tax_id,
        }
    }

    #[instrument(skip(self))]
    pub async fn lookup(&self, tax_id: &str) -> Result<TaxpayerRecord, AfipError> {
        let subject = TaxId::parse(tax_id).map_err(AfipError::Validation)?;
        let ticket = self.tickets.get_valid_ticket(PADRON_SERVICE).await?;

        // Children of the operation element are unqualified in this service.
        let body = A5
            .element("getPersona_v2")
            .child(XmlElement::leaf("token", &ticket.token))
            .child(XmlElement::leaf("sign", &ticket.signature))
            .child(XmlElement::leaf("cuitRepresentada", self.tax_id.value()))
            .child(XmlElement::leaf("idPersona", subject.value()));

        let response = self
            .transport
            .call(&self.endpoint, "getPersona_v2", "", &envelope(A5, body))
            .await
            .map_err(|e| self.classify_fault(subject, e))?;

        let persona = response.element("personaReturn")?;
        let record = parse_persona(subject, persona, &response.raw)?;
        info!(
            tax_id = %record.tax_id,
            tax_condition = ?record.tax_condition,
            "Taxpayer found"
        );
        Ok(record)
    }

    fn classify_fault(&self, subject: TaxId, error: AfipError) -> AfipError {
        let AfipError::RemoteFault { code, message } = error else {
            return error;
        };

        let lowered = message.to_lowercase();
        if lowered.contains("no existe persona") || lowered.contains("inexistente") {
            return AfipError::NotFound(format!("taxpayer {}", subject));
        }
        if is_credential_fault(&code, &lowered) {
            self.tickets.invalidate(PADRON_SERVICE);
            return AfipError::Auth(message);
        }
        AfipError::RemoteFault { code, message }
    }
}

/// Faults naming the ticket's token or sign as words, or carrying a token/sign code.
fn is_credential_fault(code: &str, lowered_message: &str) -> bool {
    let code = code.to_lowercase();
    let code = code.rsplit(':').next().unwrap_or_default();
    if code.starts_with("token") || code.starts_with("sign") {
        return true;
    }
    lowered_message
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| matches!(word, "token" | "sign" | "firma"))
}

fn parse_persona(
    subject: TaxId,
    persona: &XmlNode,
    raw: &str,
) -> Result<TaxpayerRecord, AfipError> {
    let Some(general) = persona.child("datosGenerales") else {
        return from_error_constancia(subject, persona, raw);
    };

    let legal_name = display_name(general)
        .ok_or_else(|| AfipError::parse("taxpayer without a name", raw))?;

    Ok(TaxpayerRecord {
        tax_id: subject,
        legal_name,
        address: general.child("domicilioFiscal").and_then(parse_address),
        tax_condition: tax_condition(persona),
    })
}

/// The registry answers with only `errorConstancia` when it cannot issue
/// the certificate; it still carries the taxpayer's identity.
fn from_error_constancia(
    subject: TaxId,
    persona: &XmlNode,
    raw: &str,
) -> Result<TaxpayerRecord, AfipError> {
    let error = persona
        .child("errorConstancia")
        .ok_or_else(|| AfipError::parse("personaReturn without taxpayer data", raw))?;

    match display_name(error) {
        Some(legal_name) => Ok(TaxpayerRecord {
            tax_id: subject,
            legal_name,
            address: None,
            tax_condition: TaxCondition::FinalConsumer,
        }),
        None => {
            let reasons: Vec<&str> = error
                .children_named("error")
                .map(|e| e.text.trim())
                .collect();
            Err(AfipError::NotFound(format!(
                "taxpayer {}: {}",
                subject,
                reasons.join("; ")
            )))
        }
    }
}

fn display_name(node: &XmlNode) -> Option<String> {
    if let Some(name) = node.child_value("razonSocial") {
        return Some(name.to_string());
    }
    let parts: Vec<&str> = ["apellido", "nombre"]
        .iter()
        .filter_map(|field| node.child_value(field))
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn parse_address(node: &XmlNode) -> Option<Address> {
    Some(Address {
        street: node.child_value("direccion")?.to_string(),
        locality: node.child_value("localidad").map(str::to_string),
        postal_code: node.child_value("codPostal").map(str::to_string),
        province: node.child_value("descripcionProvincia").map(str::to_string),
    })
}

fn tax_condition(persona: &XmlNode) -> TaxCondition {
    if persona.child("datosMonotributo").is_some() {
        return TaxCondition::Monotributo;
    }

    let taxes: Vec<&str> = persona
        .child("datosRegimenGeneral")
        .map(|regime| {
            regime
                .children_named("impuesto")
                .filter_map(|tax| tax.child_value("idImpuesto"))
                .collect()
        })
        .unwrap_or_default();

    if taxes.contains(&VAT_REGISTERED_TAX) {
        TaxCondition::Registered
    } else if taxes.contains(&VAT_EXEMPT_TAX) {
        TaxCondition::Exempt
    } else {
        TaxCondition::FinalConsumer
    }
}
