//! Login ticket request (TRA) construction and CMS signing.

use crate::error::AfipError;
use crate::soap::XmlElement;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use std::path::Path;
use std::sync::Arc;

/// AFIP timestamps are expressed in Argentina time (UTC-3).
const AUTHORITY_UTC_OFFSET_SECONDS: i32 = 3 * 3600;
/// WSAA refuses requests generated ahead of its clock.
const CLOCK_SKEW_SECONDS: i64 = 60;

/// Produces a signed envelope over an arbitrary document.
pub trait CmsSigner: Send + Sync {
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>, AfipError>;
}

/// PKCS#7 SignedData with the document embedded, as WSAA expects.
pub struct OpensslCmsSigner {
    certificate: X509,
    key: PKey<Private>,
}

impl OpensslCmsSigner {
    pub fn from_pem(
        certificate_pem: &[u8],
        key_pem: &[u8],
        passphrase: Option<&[u8]>,
    ) -> Result<Self, AfipError> {
        let certificate = X509::from_pem(certificate_pem)
            .map_err(|e| AfipError::Signing(format!("invalid certificate: {}", e)))?;

        let key = match passphrase {
            Some(passphrase) => PKey::private_key_from_pem_passphrase(key_pem, passphrase),
            None => PKey::private_key_from_pem(key_pem),
        }
        .map_err(|e| AfipError::Signing(format!("invalid private key: {}", e)))?;

        let public_key = certificate
            .public_key()
            .map_err(|e| AfipError::Signing(format!("unreadable certificate key: {}", e)))?;
        if !public_key.public_eq(&key) {
            return Err(AfipError::Signing(
                "certificate does not match the private key".to_string(),
            ));
        }

        Ok(Self { certificate, key })
    }

    pub fn from_files(
        certificate_path: &Path,
        key_path: &Path,
        passphrase: Option<&[u8]>,
    ) -> Result<Self, AfipError> {
        let certificate_pem = std::fs::read(certificate_path).map_err(|e| {
            AfipError::Signing(format!(
                "cannot read certificate {}: {}",
                certificate_path.display(),
                e
            ))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            AfipError::Signing(format!("cannot read key {}: {}", key_path.display(), e))
        })?;
        Self::from_pem(&certificate_pem, &key_pem, passphrase)
    }
}

impl CmsSigner for OpensslCmsSigner {
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>, AfipError> {
        let chain: Stack<X509> = Stack::new()
            .map_err(|e| AfipError::Signing(format!("certificate chain: {}", e)))?;
        let signed = Pkcs7::sign(
            &self.certificate,
            &self.key,
            &chain,
            document,
            Pkcs7Flags::BINARY,
        )
        .map_err(|e| AfipError::Signing(format!("cms signing failed: {}", e)))?;
        signed
            .to_der()
            .map_err(|e| AfipError::Signing(format!("cms encoding failed: {}", e)))
    }
}

/// Builds and signs login ticket requests for a target service.
#[derive(Clone)]
pub struct LoginSigner {
    signer: Arc<dyn CmsSigner>,
    window: Duration,
}

impl LoginSigner {
    pub fn new(signer: Arc<dyn CmsSigner>, window: Duration) -> Self {
        Self { signer, window }
    }

    /// The unsigned `loginTicketRequest` document.
    pub fn ticket_request(&self, service: &str, now: DateTime<Utc>) -> Result<String, AfipError> {
        let offset = FixedOffset::west_opt(AUTHORITY_UTC_OFFSET_SECONDS)
            .ok_or_else(|| AfipError::Signing("invalid authority offset".to_string()))?;
        let generation_time =
            (now - Duration::seconds(CLOCK_SKEW_SECONDS)).with_timezone(&offset);
        let expiration_time = generation_time + self.window;

        XmlElement::new("loginTicketRequest")
            .attr("version", "1.0")
            .child(
                XmlElement::new("header")
                    .child(XmlElement::leaf("uniqueId", now.timestamp() as u32))
                    .child(XmlElement::leaf(
                        "generationTime",
                        generation_time.to_rfc3339_opts(SecondsFormat::Secs, false),
                    ))
                    .child(XmlElement::leaf(
                        "expirationTime",
                        expiration_time.to_rfc3339_opts(SecondsFormat::Secs, false),
                    )),
            )
            .child(XmlElement::leaf("service", service))
            .to_document()
    }

    /// Signed request, base64-encoded for the `loginCms` call.
    pub fn signed_request(&self, service: &str, now: DateTime<Utc>) -> Result<String, AfipError> {
        let document = self.ticket_request(service, now)?;
        let signed = self.signer.sign(document.as_bytes())?;
        Ok(STANDARD.encode(signed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::XmlNode;
    use chrono::TimeZone;
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::store::X509StoreBuilder;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn key_pair() -> (Vec<u8>, Vec<u8>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "afip-test").unwrap();
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
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        (
            builder.build().to_pem().unwrap(),
            key.private_key_to_pem_pkcs8().unwrap(),
        )
    }

    struct EchoSigner;

    impl CmsSigner for EchoSigner {
        fn sign(&self, document: &[u8]) -> Result<Vec<u8>, AfipError> {
            Ok(document.to_vec())
        }
    }

    #[test]
    fn test_ticket_request_fields() {
        let signer = LoginSigner::new(Arc::new(EchoSigner), Duration::minutes(10));
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();

        let document = signer.ticket_request("wsfe", now).unwrap();
        let root = XmlNode::parse(&document).unwrap();

        assert_eq!(root.name, "loginTicketRequest");
        let header = root.child("header").unwrap();
        assert_eq!(
            header.child_text("uniqueId"),
            Some(now.timestamp().to_string().as_str())
        );
        assert_eq!(
            header.child_text("generationTime"),
            Some("2025-03-10T11:59:00-03:00")
        );
        assert_eq!(
            header.child_text("expirationTime"),
            Some("2025-03-10T12:09:00-03:00")
        );
        assert_eq!(root.child_text("service"), Some("wsfe"));
    }

    #[test]
    fn test_signed_request_is_base64() {
        let signer = LoginSigner::new(Arc::new(EchoSigner), Duration::minutes(10));
        let now = Utc::now();
        let encoded = signer.signed_request("wsfe", now).unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, signer.ticket_request("wsfe", now).unwrap().into_bytes());
    }

    #[test]
    fn test_openssl_signature_embeds_document() {
        let (cert, key) = key_pair();
        let signer = OpensslCmsSigner::from_pem(&cert, &key, None).unwrap();

        let der = signer.sign(b"<loginTicketRequest/>").unwrap();
        let parsed = Pkcs7::from_der(&der).unwrap();

        let store = X509StoreBuilder::new().unwrap().build();
        let certs: Stack<X509> = Stack::new().unwrap();
        let mut content = Vec::new();
        parsed
            .verify(
                &certs,
                &store,
                None,
                Some(&mut content),
                Pkcs7Flags::NOVERIFY,
            )
            .unwrap();
        assert_eq!(content, b"<loginTicketRequest/>");
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let (cert, _) = key_pair();
        let (_, other_key) = key_pair();
        let result = OpensslCmsSigner::from_pem(&cert, &other_key, None);
        assert!(matches!(result, Err(AfipError::Signing(_))));
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let (_, key) = key_pair();
        let result = OpensslCmsSigner::from_pem(b"not a certificate", &key, None);
        assert!(matches!(result, Err(AfipError::Signing(_))));
    }
}
