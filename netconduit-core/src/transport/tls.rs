//! TLS transport using rustls

use netconduit_common::{ConduitError, Result, TlsConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn tls_error(msg: impl Into<String>) -> ConduitError {
    ConduitError::Tls(msg.into())
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| tls_error(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("invalid certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| tls_error(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| tls_error(format!("invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| tls_error(format!("no private key found in {}", path.display())))
}

pub fn create_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>> {
    config.validate_server()?;
    let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) else {
        return Err(tls_error("certificate and key files are required"));
    };

    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let server_config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(format!("TLS config error: {e}")))?;

    Ok(Arc::new(server_config))
}

pub fn create_client_config(config: &TlsConfig) -> Result<Arc<ClientConfig>> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(e.to_string()))?;

    if !config.verify_peer {
        tracing::warn!("TLS peer verification disabled");
        let client_config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
            .with_no_client_auth();
        return Ok(Arc::new(client_config));
    }

    let Some(ca_file) = &config.ca_file else {
        return Err(tls_error("CA certificate file required when verify_peer is set"));
    };
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("invalid CA cert: {e}")))?;
    }

    let client_config = builder
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(client_config))
}

pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    Ok(TlsAcceptor::from(create_server_config(config)?))
}

pub fn connector(config: &TlsConfig) -> Result<TlsConnector> {
    Ok(TlsConnector::from(create_client_config(config)?))
}

/// Name presented for SNI and certificate checks: the configured
/// `server_name`, else the host being dialed
pub fn server_name(config: &TlsConfig, host: &str) -> Result<ServerName<'static>> {
    let name = config.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name.to_string())
        .map_err(|e| tls_error(format!("invalid server name {name:?}: {e}")))
}

/// Accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_server_name_prefers_config() {
        let mut config = TlsConfig::default();
        assert_eq!(
            server_name(&config, "127.0.0.1").unwrap().to_str(),
            "127.0.0.1"
        );

        config.server_name = Some("conduit.local".into());
        assert_eq!(
            server_name(&config, "127.0.0.1").unwrap().to_str(),
            "conduit.local"
        );
    }

    #[test]
    fn test_client_requires_ca_when_verifying() {
        let config = TlsConfig {
            enabled: true,
            verify_peer: true,
            ..Default::default()
        };
        assert!(matches!(
            create_client_config(&config),
            Err(ConduitError::Tls(_))
        ));
    }

    #[test]
    fn test_client_without_verification() {
        let config = TlsConfig {
            enabled: true,
            verify_peer: false,
            ..Default::default()
        };
        assert!(create_client_config(&config).is_ok());
    }

    #[test]
    fn test_missing_cert_file() {
        let err = load_certs(&PathBuf::from("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, ConduitError::Tls(_)));
    }
}
