use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens the transport for a push connection. Each call yields a fresh connection.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self) -> anyhow::Result<Self::Stream>;
}

/// Plain TCP, for gateways behind a TLS terminating proxy and for tests
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> TcpConnector {
        TcpConnector {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> anyhow::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        // frames are buffered before they are written
        stream.set_nodelay(true)?;
        debug!("connected to {}:{}", self.host, self.port);
        Ok(stream)
    }
}

#[cfg(feature = "tls")]
pub use tls::{ServerVerification, TlsConnector};

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;
    use async_trait::async_trait;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tracing::{debug, warn};
    use super::Connector;

    pub enum ServerVerification {
        Roots(RootCertStore),
        /// Accepts any server certificate. Only for test gateways with self-signed
        ///  certificates.
        TrustAll,
    }

    /// TLS over TCP, optionally authenticating with a client certificate as APNs requires
    pub struct TlsConnector {
        host: String,
        port: u16,
        server_name: ServerName<'static>,
        connector: tokio_rustls::TlsConnector,
    }

    impl TlsConnector {
        pub fn new(
            host: impl Into<String>,
            port: u16,
            verification: ServerVerification,
            identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
        ) -> anyhow::Result<TlsConnector> {
            let host = host.into();
            let server_name = ServerName::try_from(host.as_str())?.to_owned();

            let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?;
            let builder = match verification {
                ServerVerification::Roots(roots) => builder.with_root_certificates(roots),
                ServerVerification::TrustAll => {
                    warn!("server certificates for {} are not verified", host);
                    builder.dangerous().with_custom_certificate_verifier(Arc::new(TrustAllVerifier))
                }
            };
            let config = match identity {
                Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
                None => builder.with_no_client_auth(),
            };

            Ok(TlsConnector {
                host,
                port,
                server_name,
                connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            })
        }
    }

    #[async_trait]
    impl Connector for TlsConnector {
        type Stream = TlsStream<TcpStream>;

        async fn connect(&self) -> anyhow::Result<TlsStream<TcpStream>> {
            let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
            tcp.set_nodelay(true)?;
            let stream = self.connector.connect(self.server_name.clone(), tcp).await?;
            debug!("TLS connection to {}:{} established", self.host, self.port);
            Ok(stream)
        }
    }

    #[derive(Debug)]
    struct TrustAllVerifier;

    impl ServerCertVerifier for TrustAllVerifier {
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
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ED25519,
            ]
        }
    }

}
