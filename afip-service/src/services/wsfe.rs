//! WSFEv1 client: sequence queries and voucher authorization (CAE requests).

use super::metrics::AUTHORIZATIONS_TOTAL;
use super::tickets::TicketStore;
use crate::error::{AfipError, SequenceLookupError};
use crate::models::{
    AuthorityMessage, AuthorizationResult, InvoiceRequest, Outcome, SalesPoint, SequenceState,
    ServerStatus, TaxId, VoucherStatus, VoucherType,
};
use crate::soap::{envelope, Namespace, SoapEndpoint, SoapResponse, SoapTransport, XmlElement, XmlNode};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

/// WSAA service name for the invoicing web service.
pub const WSFE_SERVICE: &str = "wsfe";

const FEV1: Namespace = Namespace::new("ar", "http://ar.gov.afip.dif.FEV1/");

const NO_DATA: i32 = 602;
const NUMBERING_CONFLICT: i32 = 10016;
const TOKEN_REJECTED: i32 = 600;
const REPRESENTATION_REJECTED: i32 = 601;

/// Submissions per authorization before a numbering conflict is surfaced.
const MAX_ATTEMPTS: u32 = 2;

const DATE_FORMAT: &str = "%Y%m%d";

pub struct InvoiceClient {
    transport: SoapTransport,
    endpoint: SoapEndpoint,
    tickets: Arc<TicketStore>,
    tax_id: TaxId,
}

impl InvoiceClient {
    pub fn new(
        transport: SoapTransport,
        url: impl Into<String>,
        tickets: Arc<TicketStore>,
        tax_id: TaxId,
    ) -> Self {
        Self {
            transport,
            endpoint: SoapEndpoint::new(WSFE_SERVICE, url),
            tickets,
            tax_id,
        }
    }

    /// Health check. Served without credentials.
    #[instrument(skip(self))]
    pub async fn server_status(&self) -> Result<ServerStatus, AfipError> {
        let response = self.call("FEDummy", FEV1.element("FEDummy")).await?;
        let result = response.element("FEDummyResult")?;

        let status = |name: &str| result.child_value(name).unwrap_or_default().to_string();
        Ok(ServerStatus {
            app_server: status("AppServer"),
            db_server: status("DbServer"),
            auth_server: status("AuthServer"),
        })
    }

    /// Last authorized number for the pair; `0` when nothing was issued yet.
    #[instrument(skip(self))]
    pub async fn get_last_voucher(
        &self,
        sales_point: u32,
        voucher_type: VoucherType,
    ) -> Result<SequenceState, AfipError> {
        let last_voucher_number = match self.lookup_last_voucher(sales_point, voucher_type).await {
            Ok(number) => number,
            Err(AfipError::SequenceLookup(SequenceLookupError::NoPriorVouchers)) => {
                info!(
                    sales_point = sales_point,
                    voucher_type = voucher_type.code(),
                    "No prior vouchers; numbering starts at 1"
                );
                0
            }
            Err(e) => return Err(e),
        };

        Ok(SequenceState {
            sales_point,
            voucher_type,
            last_voucher_number,
        })
    }

    async fn lookup_last_voucher(
        &self,
        sales_point: u32,
        voucher_type: VoucherType,
    ) -> Result<u64, AfipError> {
        let body = FEV1
            .element("FECompUltimoAutorizado")
            .child(self.auth_block().await?)
            .child(FEV1.leaf("PtoVta", sales_point))
            .child(FEV1.leaf("CbteTipo", voucher_type.code()));

        let response = self.call("FECompUltimoAutorizado", body).await?;
        let result = response.element("FECompUltimoAutorizadoResult")?;

        let errors = messages(result, "Errors", "Err");
        if errors.iter().any(|e| e.code == NO_DATA) {
            return Err(SequenceLookupError::NoPriorVouchers.into());
        }
        self.fail_on_errors(&errors)?;

        result
            .child_value("CbteNro")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| AfipError::parse("CbteNro missing or not numeric", &response.raw))
    }

    /// Validate, number and submit one voucher.
    ///
    /// A numbering conflict (another client took the number between lookup
    /// and submission) re-reads the sequence and submits once more.
    #[instrument(
        skip(self, request),
        fields(
            sales_point = request.sales_point,
            voucher_type = request.voucher_type.code()
        )
    )]
    pub async fn authorize_voucher(
        &self,
        request: &InvoiceRequest,
    ) -> Result<AuthorizationResult, AfipError> {
        request.validate()?;
        let type_label = request.voucher_type.code().to_string();

        for attempt in 1..=MAX_ATTEMPTS {
            let sequence = self
                .get_last_voucher(request.sales_point, request.voucher_type)
                .await?;
            let voucher_number = sequence.next_voucher_number();

            let result = self.submit(request, voucher_number).await?;
            if !has_numbering_conflict(&result) {
                AUTHORIZATIONS_TOTAL
                    .with_label_values(&[type_label.as_str(), result.outcome.as_str()])
                    .inc();
                info!(
                    voucher_number = result.assigned_voucher_number,
                    outcome = result.outcome.as_str(),
                    authorization_code = result.authorization_code.as_deref().unwrap_or(""),
                    observations = result.observations.len(),
                    "Voucher authorization completed"
                );
                return Ok(result);
            }

            warn!(
                attempt = attempt,
                voucher_number = voucher_number,
                "Voucher number already taken"
            );
        }

        AUTHORIZATIONS_TOTAL
            .with_label_values(&[type_label.as_str(), "sequence_conflict"])
            .inc();
        Err(AfipError::Sequence {
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn submit(
        &self,
        request: &InvoiceRequest,
        voucher_number: u64,
    ) -> Result<AuthorizationResult, AfipError> {
        let body = FEV1
            .element("FECAESolicitar")
            .child(self.auth_block().await?)
            .child(authorization_request(request, voucher_number)?);

        let response = self.call("FECAESolicitar", body).await?;
        let result = response.element("FECAESolicitarResult")?;

        self.reject_credentials(&messages(result, "Errors", "Err"))?;
        parse_authorization(result, voucher_number, &response.raw)
    }

    #[instrument(skip(self))]
    pub async fn get_sales_points(&self) -> Result<Vec<SalesPoint>, AfipError> {
        let body = FEV1
            .element("FEParamGetPtosVenta")
            .child(self.auth_block().await?);

        let response = self.call("FEParamGetPtosVenta", body).await?;
        let result = response.element("FEParamGetPtosVentaResult")?;

        let errors = messages(result, "Errors", "Err");
        if errors.iter().any(|e| e.code == NO_DATA) {
            return Ok(Vec::new());
        }
        self.fail_on_errors(&errors)?;

        let Some(list) = result.child("ResultGet") else {
            return Ok(Vec::new());
        };
        list.children_named("PtoVenta")
            .map(|node| -> Result<SalesPoint, AfipError> {
                let number = node
                    .child_value("Nro")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| AfipError::parse("PtoVenta without Nro", &response.raw))?;
                Ok(SalesPoint {
                    number,
                    emission_type: node.child_value("EmisionTipo").unwrap_or_default().to_string(),
                    blocked: node.child_value("Bloqueado") == Some("S"),
                    deactivated_on: node.child_value("FchBaja").and_then(parse_date),
                })
            })
            .collect()
    }

    /// Look up a voucher the authority already processed.
    #[instrument(skip(self))]
    pub async fn get_voucher(
        &self,
        sales_point: u32,
        voucher_type: VoucherType,
        voucher_number: u64,
    ) -> Result<VoucherStatus, AfipError> {
        let body = FEV1
            .element("FECompConsultar")
            .child(self.auth_block().await?)
            .child(
                FEV1.element("FeCompConsReq")
                    .child(FEV1.leaf("CbteTipo", voucher_type.code()))
                    .child(FEV1.leaf("CbteNro", voucher_number))
                    .child(FEV1.leaf("PtoVta", sales_point)),
            );

        let response = self.call("FECompConsultar", body).await?;
        let result = response.element("FECompConsultarResult")?;

        let errors = messages(result, "Errors", "Err");
        if errors.iter().any(|e| e.code == NO_DATA) {
            return Err(AfipError::NotFound(format!(
                "voucher {:05}-{:08} of type {}",
                sales_point,
                voucher_number,
                voucher_type.code()
            )));
        }
        self.fail_on_errors(&errors)?;

        let voucher = result
            .child("ResultGet")
            .ok_or_else(|| AfipError::parse("FECompConsultar without ResultGet", &response.raw))?;
        let outcome = voucher
            .child_value("Resultado")
            .and_then(Outcome::from_code)
            .ok_or_else(|| AfipError::parse("voucher without Resultado", &response.raw))?;
        let total_amount = voucher
            .child_value("ImpTotal")
            .and_then(|v| v.parse::<Decimal>().ok())
            .unwrap_or_default();

        Ok(VoucherStatus {
            sales_point,
            voucher_type,
            voucher_number,
            authorization_code: voucher.child_value("CodAutorizacion").map(str::to_string),
            authorization_expiry: voucher.child_value("FchVto").and_then(parse_date),
            outcome,
            issue_date: voucher.child_value("CbteFch").and_then(parse_date),
            total_amount,
        })
    }

    async fn auth_block(&self) -> Result<XmlElement, AfipError> {
        let ticket = self.tickets.get_valid_ticket(WSFE_SERVICE).await?;
        Ok(FEV1
            .element("Auth")
            .child(FEV1.leaf("Token", &ticket.token))
            .child(FEV1.leaf("Sign", &ticket.signature))
            .child(FEV1.leaf("Cuit", self.tax_id.value())))
    }

    async fn call(&self, operation: &str, body: XmlElement) -> Result<SoapResponse, AfipError> {
        let action = format!("{}{}", FEV1.uri, operation);
        self.transport
            .call(&self.endpoint, operation, &action, &envelope(FEV1, body))
            .await
    }

    /// Token or representation refused: drop the cached ticket and fail.
    fn reject_credentials(&self, errors: &[AuthorityMessage]) -> Result<(), AfipError> {
        match errors
            .iter()
            .find(|e| e.code == TOKEN_REJECTED || e.code == REPRESENTATION_REJECTED)
        {
            Some(error) => {
                self.tickets.invalidate(WSFE_SERVICE);
                Err(AfipError::Auth(format!("{}: {}", error.code, error.message)))
            }
            None => Ok(()),
        }
    }

    fn fail_on_errors(&self, errors: &[AuthorityMessage]) -> Result<(), AfipError> {
        self.reject_credentials(errors)?;
        match errors.first() {
            Some(error) => Err(AfipError::RemoteFault {
                code: error.code.to_string(),
                message: error.message.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn rounded(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn amount(value: Decimal) -> String {
    rounded(value).normalize().to_string()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// `Code`/`Msg` pairs under `container/item`.
fn messages(node: &XmlNode, container: &str, item: &str) -> Vec<AuthorityMessage> {
    node.child(container)
        .map(|list| {
            list.children_named(item)
                .filter_map(|entry| {
                    Some(AuthorityMessage {
                        code: entry.child_value("Code")?.parse().ok()?,
                        message: entry.child_value("Msg").unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn has_numbering_conflict(result: &AuthorizationResult) -> bool {
    result
        .errors
        .iter()
        .chain(result.observations.iter())
        .any(|m| m.code == NUMBERING_CONFLICT)
}

/// The `FeCAEReq` element for a single voucher.
fn authorization_request(
    request: &InvoiceRequest,
    voucher_number: u64,
) -> Result<XmlElement, AfipError> {
    let document = request.receiver_document().map_err(AfipError::Validation)?;
    let taxes = request.itemized_taxes();
    // Header totals are sums of the transmitted line values so they add up exactly.
    let tax_total: Decimal = taxes.iter().map(|t| rounded(t.amount)).sum();
    let net_total: Decimal = request.net_amounts.iter().copied().map(rounded).sum();
    let total = net_total + tax_total;

    let mut detail = FEV1
        .element("FECAEDetRequest")
        .child(FEV1.leaf("Concepto", request.concept.code()))
        .child(FEV1.leaf("DocTipo", document.doc_type()))
        .child(FEV1.leaf("DocNro", document.doc_number()))
        .child(FEV1.leaf("CbteDesde", voucher_number))
        .child(FEV1.leaf("CbteHasta", voucher_number))
        .child(FEV1.leaf("CbteFch", request.issue_date.format(DATE_FORMAT)))
        .child(FEV1.leaf("ImpTotal", amount(total)))
        .child(FEV1.leaf("ImpTotConc", "0"))
        .child(FEV1.leaf("ImpNeto", amount(net_total)))
        .child(FEV1.leaf("ImpOpEx", "0"))
        .child(FEV1.leaf("ImpTrib", "0"))
        .child(FEV1.leaf("ImpIVA", amount(tax_total)));

    if let Some(period) = request.effective_service_period() {
        detail = detail
            .child(FEV1.leaf("FchServDesde", period.from.format(DATE_FORMAT)))
            .child(FEV1.leaf("FchServHasta", period.to.format(DATE_FORMAT)))
            .child(FEV1.leaf("FchVtoPago", period.payment_due.format(DATE_FORMAT)));
    }

    detail = detail
        .child(FEV1.leaf("MonId", &request.currency.id))
        .child(FEV1.leaf("MonCotiz", request.currency.rate.normalize()))
        .child(FEV1.leaf(
            "CondicionIVAReceptorId",
            request.receiver_tax_condition.code(),
        ));

    if !request.linked_vouchers.is_empty() {
        detail = detail.child(FEV1.element("CbtesAsoc").children(
            request.linked_vouchers.iter().map(|linked| {
                FEV1.element("CbteAsoc")
                    .child(FEV1.leaf("Tipo", linked.voucher_type.code()))
                    .child(FEV1.leaf("PtoVta", linked.sales_point))
                    .child(FEV1.leaf("Nro", linked.number))
                    .optional_child(linked.issuer_tax_id.as_ref().map(|c| FEV1.leaf("Cuit", c)))
                    .optional_child(
                        linked
                            .issue_date
                            .map(|d| FEV1.leaf("CbteFch", d.format(DATE_FORMAT))),
                    )
            }),
        ));
    }

    if !taxes.is_empty() {
        let lines = taxes
            .iter()
            .map(|tax| -> Result<XmlElement, AfipError> {
                let id = tax.vat_rate_id().ok_or_else(|| {
                    AfipError::Validation(format!("unsupported VAT rate {}%", tax.rate))
                })?;
                Ok(FEV1
                    .element("AlicIva")
                    .child(FEV1.leaf("Id", id))
                    .child(FEV1.leaf("BaseImp", amount(tax.base)))
                    .child(FEV1.leaf("Importe", amount(tax.amount))))
            })
            .collect::<Result<Vec<_>, AfipError>>()?;
        detail = detail.child(FEV1.element("Iva").children(lines));
    }

    Ok(FEV1
        .element("FeCAEReq")
        .child(
            FEV1.element("FeCabReq")
                .child(FEV1.leaf("CantReg", 1))
                .child(FEV1.leaf("PtoVta", request.sales_point))
                .child(FEV1.leaf("CbteTipo", request.voucher_type.code())),
        )
        .child(FEV1.element("FeDetReq").child(detail)))
}

fn parse_authorization(
    result: &XmlNode,
    voucher_number: u64,
    raw: &str,
) -> Result<AuthorizationResult, AfipError> {
    let errors = messages(result, "Errors", "Err");
    let detail = result.path(&["FeDetResp", "FECAEDetResponse"]);

    let detail_outcomes = result
        .child("FeDetResp")
        .map(|d| {
            d.children_named("FECAEDetResponse")
                .filter_map(|r| r.child_value("Resultado").and_then(Outcome::from_code))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let header_outcome = result
        .path(&["FeCabResp", "Resultado"])
        .and_then(|r| Outcome::from_code(&r.text));

    let outcome = Outcome::aggregate(detail_outcomes)
        .or(header_outcome)
        .or_else(|| (!errors.is_empty()).then_some(Outcome::Rejected))
        .ok_or_else(|| AfipError::parse("authorization response carries no outcome", raw))?;

    let observations = detail
        .map(|d| messages(d, "Observaciones", "Obs"))
        .unwrap_or_default();

    Ok(AuthorizationResult {
        assigned_voucher_number: detail
            .and_then(|d| d.child_value("CbteDesde"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(voucher_number),
        authorization_code: detail
            .and_then(|d| d.child_value("CAE"))
            .map(str::to_string),
        authorization_expiry: detail
            .and_then(|d| d.child_value("CAEFchVto"))
            .and_then(parse_date),
        outcome,
        observations,
        errors,
    })
}
