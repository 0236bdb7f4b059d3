//! Single entry point for the invoicing workflow.

use crate::config::{AfipConfig, TicketBackend};
use crate::error::AfipError;
use crate::models::{
    AuthorizationResult, InvoiceRequest, SalesPoint, SequenceState, ServerStatus, TaxId,
    TaxpayerRecord, VoucherStatus, VoucherType,
};
use crate::services::metrics::record_error;
use crate::services::{
    AuthClient, FileTicketPersistence, InMemoryTicketPersistence, InvoiceClient, LoginSigner,
    OpensslCmsSigner, RedisTicketPersistence, RegistryClient, TicketPersistence, TicketStore,
};
use crate::soap::SoapTransport;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::info;

pub struct ElectronicInvoicing {
    invoices: InvoiceClient,
    registry: RegistryClient,
}

impl ElectronicInvoicing {
    pub fn new(invoices: InvoiceClient, registry: RegistryClient) -> Self {
        Self { invoices, registry }
    }

    /// Wire signer, ticket store and clients from configuration.
    pub async fn build(config: &AfipConfig) -> Result<Self, AfipError> {
        let tax_id = TaxId::parse(&config.tax_id).map_err(AfipError::Config)?;
        let endpoints = config.endpoints();
        let transport = SoapTransport::new(config.request_timeout())?;

        let passphrase = config
            .certificate
            .key_passphrase
            .as_ref()
            .map(|p| p.expose_secret().as_bytes());
        let cms = OpensslCmsSigner::from_files(
            &config.certificate.cert_path,
            &config.certificate.key_path,
            passphrase,
        )?;
        let signer = LoginSigner::new(Arc::new(cms), config.login_window());

        let persistence: Arc<dyn TicketPersistence> = match config.tickets.backend {
            TicketBackend::Memory => Arc::new(InMemoryTicketPersistence::new()),
            TicketBackend::File => Arc::new(FileTicketPersistence::new(&config.tickets.directory)),
            TicketBackend::Redis => {
                let url = config.tickets.redis_url.as_ref().ok_or_else(|| {
                    AfipError::Config("tickets.redis_url is required for the redis backend".into())
                })?;
                Arc::new(RedisTicketPersistence::connect(url.expose_secret()).await?)
            }
        };

        let issuer = Arc::new(AuthClient::new(transport.clone(), endpoints.wsaa, signer));
        let tickets = Arc::new(TicketStore::new(issuer, persistence, config.renewal_margin()));

        info!(
            environment = ?config.environment,
            tax_id = %tax_id,
            ticket_backend = ?config.tickets.backend,
            "Electronic invoicing configured"
        );

        Ok(Self::new(
            InvoiceClient::new(transport.clone(), endpoints.wsfe, tickets.clone(), tax_id),
            RegistryClient::new(transport, endpoints.padron, tickets, tax_id),
        ))
    }

    pub async fn authorize_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<AuthorizationResult, AfipError> {
        self.invoices
            .authorize_voucher(request)
            .await
            .inspect_err(record_error)
    }

    pub async fn check_authorization_status(
        &self,
        sales_point: u32,
        voucher_type: VoucherType,
        voucher_number: u64,
    ) -> Result<VoucherStatus, AfipError> {
        self.invoices
            .get_voucher(sales_point, voucher_type, voucher_number)
            .await
            .inspect_err(record_error)
    }

    pub async fn lookup_taxpayer(&self, tax_id: &str) -> Result<TaxpayerRecord, AfipError> {
        self.registry.lookup(tax_id).await.inspect_err(record_error)
    }

    pub async fn server_status(&self) -> Result<ServerStatus, AfipError> {
        self.invoices.server_status().await.inspect_err(record_error)
    }

    pub async fn sales_points(&self) -> Result<Vec<SalesPoint>, AfipError> {
        self.invoices
            .get_sales_points()
            .await
            .inspect_err(record_error)
    }

    pub async fn last_voucher(
        &self,
        sales_point: u32,
        voucher_type: VoucherType,
    ) -> Result<SequenceState, AfipError> {
        self.invoices
            .get_last_voucher(sales_point, voucher_type)
            .await
            .inspect_err(record_error)
    }
}
