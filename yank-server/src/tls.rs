//! TLS material: certificate loading, self-signed generation for fresh
//! installs, and the pinned-pubkey digest embedded in curl commands.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to parse certificate: {0}")]
    CertificateParsing(String),

    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error("TLS configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type TlsResult<T> = Result<T, TlsError>;

/// Build the rustls acceptor configuration from PEM files on disk.
pub async fn rustls_config(cert_path: &Path, key_path: &Path) -> TlsResult<RustlsConfig> {
    tracing::info!(
        "loading TLS certificate from {} and key from {}",
        cert_path.display(),
        key_path.display()
    );
    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|err| TlsError::Configuration(err.to_string()))
}

/// Generate a self-signed certificate for `host`, returned as
/// `(cert_pem, key_pem)`. Used on first start when no certificate is
/// configured; clients pin the public key instead of trusting a CA.
pub fn generate_self_signed(host: &str) -> TlsResult<(String, String)> {
    use rcgen::{CertificateParams, DnType, KeyPair};

    let mut params = CertificateParams::new(vec![host.to_string()])
        .map_err(|err| TlsError::Generation(err.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, host.to_string());

    let key_pair = KeyPair::generate().map_err(|err| TlsError::Generation(err.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|err| TlsError::Generation(err.to_string()))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Ensure a certificate/key pair exists at the given paths, generating a
/// self-signed one for `host` when both are absent.
pub fn ensure_cert_files(cert_path: &Path, key_path: &Path, host: &str) -> TlsResult<()> {
    if cert_path.exists() && key_path.exists() {
        return Ok(());
    }

    tracing::warn!(
        "no certificate at {}, generating a self-signed one for {}",
        cert_path.display(),
        host
    );
    let (cert_pem, key_pem) = generate_self_signed(host)?;

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cert_path, cert_pem)?;
    std::fs::write(key_path, key_pem)?;
    yank_security::secure_file(cert_path)?;
    yank_security::secure_file(key_path)?;
    Ok(())
}

/// SHA-256 digest of the certificate's SubjectPublicKeyInfo in curl's
/// `--pinnedpubkey` format: `sha256//<base64>`.
pub fn pinned_pubkey_digest(cert_pem: &str) -> TlsResult<String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|err| TlsError::CertificateParsing(err.to_string()))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|err| TlsError::CertificateParsing(err.to_string()))?;

    let spki = cert.public_key();
    let digest = Sha256::digest(spki.raw);
    Ok(format!("sha256//{}", BASE64.encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_certificate_is_pem() {
        let (cert_pem, key_pem) = generate_self_signed("localhost").unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn pubkey_digest_is_stable_per_certificate() {
        let (cert_pem, _) = generate_self_signed("localhost").unwrap();
        let a = pinned_pubkey_digest(&cert_pem).unwrap();
        let b = pinned_pubkey_digest(&cert_pem).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256//"));

        let (other_pem, _) = generate_self_signed("localhost").unwrap();
        assert_ne!(a, pinned_pubkey_digest(&other_pem).unwrap());
    }

    #[test]
    fn ensure_cert_files_creates_and_keeps() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");

        ensure_cert_files(&cert, &key, "localhost").unwrap();
        let first = std::fs::read_to_string(&cert).unwrap();

        // A second call must not regenerate.
        ensure_cert_files(&cert, &key, "localhost").unwrap();
        assert_eq!(first, std::fs::read_to_string(&cert).unwrap());
    }
}
