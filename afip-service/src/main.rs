use afip_service::config::AfipConfig;
use afip_service::models::VoucherType;
use afip_service::services::init_metrics;
use afip_service::ElectronicInvoicing;
use anyhow::{bail, Context};
use service_core::observability::init_tracing;
use tracing::info;

const USAGE: &str = "usage: afip-service [status | sales-points | last-voucher <sales-point> <voucher-type> | taxpayer <cuit>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AfipConfig::load().context("Failed to load configuration")?;
    init_tracing(
        "afip-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )?;
    init_metrics();

    let invoicing = ElectronicInvoicing::build(&config).await?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["status"] => {
            let status = invoicing.server_status().await?;
            info!(
                app_server = %status.app_server,
                db_server = %status.db_server,
                auth_server = %status.auth_server,
                healthy = status.is_healthy(),
                "WSFE server status"
            );
        }
        ["sales-points"] => {
            let points = invoicing.sales_points().await?;
            info!(count = points.len(), "Sales points");
            for point in points {
                info!(
                    number = point.number,
                    emission_type = %point.emission_type,
                    blocked = point.blocked,
                    deactivated_on = ?point.deactivated_on,
                    "Sales point"
                );
            }
        }
        ["last-voucher", sales_point, voucher_type] => {
            let sales_point: u32 = sales_point.parse().context("invalid sales point")?;
            let voucher_type: u16 = voucher_type.parse().context("invalid voucher type")?;
            let sequence = invoicing
                .last_voucher(sales_point, VoucherType(voucher_type))
                .await?;
            info!(
                sales_point = sequence.sales_point,
                voucher_type = sequence.voucher_type.code(),
                last_voucher_number = sequence.last_voucher_number,
                "Last authorized voucher"
            );
        }
        ["taxpayer", cuit] => {
            let record = invoicing.lookup_taxpayer(cuit).await?;
            info!(
                tax_id = %record.tax_id,
                legal_name = %record.legal_name,
                tax_condition = ?record.tax_condition,
                "Taxpayer"
            );
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
