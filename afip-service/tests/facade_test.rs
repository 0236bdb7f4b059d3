mod common;

use afip_service::config::AfipConfig;
use afip_service::models::VoucherType;
use afip_service::ElectronicInvoicing;
use common::*;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use std::path::Path;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_credentials(dir: &Path) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "afip-facade-test").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    std::fs::write(dir.join("cert.pem"), builder.build().to_pem().unwrap()).unwrap();
    std::fs::write(dir.join("key.pem"), key.private_key_to_pem_pkcs8().unwrap()).unwrap();
}

fn config_for(server: &MockServer, dir: &Path) -> AfipConfig {
    let settings = config::Config::builder()
        .set_override("environment", "homologation")
        .unwrap()
        .set_override("tax_id", REQUESTER_CUIT)
        .unwrap()
        .set_override("certificate.cert_path", dir.join("cert.pem").display().to_string())
        .unwrap()
        .set_override("certificate.key_path", dir.join("key.pem").display().to_string())
        .unwrap()
        .set_override("endpoints.wsaa", format!("{}/wsaa", server.uri()))
        .unwrap()
        .set_override("endpoints.wsfe", format!("{}/wsfe", server.uri()))
        .unwrap()
        .set_override("endpoints.padron", format!("{}/padron", server.uri()))
        .unwrap()
        .set_override("tickets.backend", "file")
        .unwrap()
        .set_override("tickets.directory", dir.join("tickets").display().to_string())
        .unwrap()
        .build()
        .unwrap();
    AfipConfig::from_settings(settings).unwrap()
}

#[tokio::test]
async fn test_built_facade_signs_logs_in_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    write_credentials(dir.path());
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wsaa"))
        .and(body_string_contains("<wsaa:in0>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_response(
            "built-token",
            "built-sign",
            "2025-03-10T12:00:00-03:00",
            "2099-03-11T00:00:00-03:00",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wsfe"))
        .and(body_string_contains("<ar:Token>built-token</ar:Token>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(last_voucher(2, 11, 41)))
        .expect(1)
        .mount(&server)
        .await;

    let invoicing = ElectronicInvoicing::build(&config_for(&server, dir.path()))
        .await
        .unwrap();
    let sequence = invoicing
        .last_voucher(2, VoucherType::INVOICE_C)
        .await
        .unwrap();

    assert_eq!(sequence.last_voucher_number, 41);
    assert!(dir.path().join("tickets").join("wsfe.json").exists());
}

#[tokio::test]
async fn test_build_fails_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    let result = ElectronicInvoicing::build(&config_for(&server, dir.path())).await;
    assert!(matches!(
        result,
        Err(afip_service::AfipError::Signing(_))
    ));
}
