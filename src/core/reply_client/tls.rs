// src/core/reply_client/tls.rs

//! TLS handshake helper for the reply-code client. Peer verification is
//! informational only per spec §4.A ("TLS peer verification is informational
//! only (no reject)"): we build a real `rustls` verifier that always accepts
//! the presented chain, so a certificate oddity never blocks the handshake
//! — any TLS-level problem instead surfaces as a handshake error, which the
//! caller treats the same as any other TLS failure and falls back to
//! cleartext.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Accepts any certificate chain presented, the TLS analogue of spec §4.A's
/// "AUTO_RETRY mode": the handshake always completes on the certificate
/// front, and any certificate oddity becomes informational text rather than
/// an abort.
#[derive(Debug)]
struct InformationalVerifier;

impl ServerCertVerifier for InformationalVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InformationalVerifier))
        .with_no_client_auth();
    Arc::new(config)
}

/// Performs the TLS handshake with an alarm-gated timeout equal to
/// `tcp_timeout` (spec §4.A). Consumes `stream`; on failure the caller falls
/// back to a separately-`dup`'d plain socket rather than trying to recover
/// this one; `tokio-rustls` does not hand a failed stream back.
pub async fn handshake(
    stream: TcpStream,
    host: &str,
    tcp_timeout: Duration,
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = TlsConnector::from(client_config());
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    match timeout(tcp_timeout, connector.connect(server_name, stream)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out")),
    }
}
