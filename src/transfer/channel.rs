//! TLS channel establishment for the image service
//!
//! tonic is built without its own TLS support. The channel is created over a
//! plain `http://` endpoint whose connector performs the TCP connect and the
//! rustls handshake itself, so the trust decision (platform roots, the
//! cluster CA, or no verification at all) stays in this module.

use crate::error::handlers::TransportErrorHandler;
use crate::error::{Phase, PullError, Result};
use crate::logging::Logger;
use crate::transfer::proto::image_io_service_client::ImageIoServiceClient;
use crate::transfer::source::{Dialer, GrpcImageSource, ImageSource};
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Uri};

pub const DEFAULT_TLS_PORT: u16 = 443;
const ALPN_H2: &[u8] = b"h2";

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Skip server certificate validation
    pub insecure: bool,
    /// Trust the platform certificate store
    pub native_roots: bool,
    pub connect_timeout: Option<Duration>,
    /// Largest frame the client will decode
    pub max_message_size: Option<usize>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            insecure: false,
            native_roots: true,
            connect_timeout: Some(Duration::from_secs(30)),
            max_message_size: Some(64 * 1024 * 1024),
        }
    }
}

pub struct SecureChannelFactory {
    options: ChannelOptions,
    output: Logger,
}

impl SecureChannelFactory {
    pub fn new(options: ChannelOptions, output: Logger) -> Self {
        Self { options, output }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Build the rustls client configuration for one dial
    pub fn client_config(&self, ca_pem: Option<&[u8]>) -> Result<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| PullError::Connection(format!("unsupported TLS configuration: {}", e)))?;

        let mut config = if self.options.insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(&provider)))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(self.root_store(ca_pem)?)
                .with_no_client_auth()
        };
        config.alpn_protocols = vec![ALPN_H2.to_vec()];
        Ok(config)
    }

    fn root_store(&self, ca_pem: Option<&[u8]>) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();

        if self.options.native_roots {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                self.output
                    .debug(&format!("Skipping unreadable platform certificate: {}", error));
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            self.output.debug(&format!(
                "Loaded {} platform root certificates ({} ignored)",
                added, ignored
            ));
        }

        if let Some(mut pem) = ca_pem {
            let mut added = 0;
            for cert in rustls_pemfile::certs(&mut pem) {
                let cert = cert.map_err(|e| {
                    PullError::Connection(format!("invalid cluster CA bundle: {}", e))
                })?;
                roots.add(cert).map_err(|e| {
                    PullError::Connection(format!("invalid cluster CA certificate: {}", e))
                })?;
                added += 1;
            }
            self.output
                .debug(&format!("Trusting {} cluster CA certificate(s)", added));
        }

        if roots.is_empty() {
            return Err(PullError::Connection(
                "no trusted root certificates available (use --insecure to skip verification)"
                    .to_string(),
            ));
        }
        Ok(roots)
    }

    /// Open an HTTP/2 channel to `server`, racing the dial against `cancel`
    pub async fn connect(
        &self,
        server: &str,
        ca_pem: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Channel> {
        let (host, port) = split_server(server)?;
        if self.options.insecure {
            self.output.warning(&format!(
                "Skipping TLS certificate verification for {}",
                server
            ));
        }

        let config = Arc::new(self.client_config(ca_pem)?);
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let mut endpoint = Endpoint::from_shared(format!("http://{}", authority)).map_err(|e| {
            PullError::Connection(format!("invalid server address '{}': {}", server, e))
        })?;
        if let Some(timeout) = self.options.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        let target = server.to_string();
        let connector = tower::service_fn(move |_: Uri| {
            let config = Arc::clone(&config);
            let target = target.clone();
            async move { connect_tls(&target, config).await.map(TokioIo::new) }
        });

        self.output.verbose(&format!("Connecting to {}", server));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PullError::cancelled(Phase::Dial)),
            result = endpoint.connect_with_connector(connector) => {
                result.map_err(|e| TransportErrorHandler::handle_dial_error(&e, server))
            }
        }
    }
}

#[async_trait]
impl Dialer for SecureChannelFactory {
    async fn dial(
        &self,
        server: &str,
        ca_pem: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ImageSource>> {
        let channel = self.connect(server, ca_pem, cancel).await?;
        let mut client = ImageIoServiceClient::new(channel);
        if let Some(limit) = self.options.max_message_size {
            client = client.max_decoding_message_size(limit);
        }
        Ok(Box::new(GrpcImageSource::new(client)))
    }
}

/// TCP connect to `server` and complete a TLS handshake with `config`
pub async fn connect_tls(server: &str, config: Arc<ClientConfig>) -> io::Result<TlsStream<TcpStream>> {
    let (host, port) =
        split_server(server).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let server_name = ServerName::try_from(host.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let tcp = TcpStream::connect((host.as_str(), port)).await?;
    tcp.set_nodelay(true)?;
    TlsConnector::from(config).connect(server_name, tcp).await
}

/// Split `host:port`, `[v6]:port` or a bare host into host and port
pub fn split_server(server: &str) -> Result<(String, u16)> {
    let invalid = |reason: &str| PullError::Connection(format!("invalid server address '{}': {}", server, reason));

    let (host, port) = if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(|| invalid("expected ':' after ']'"))?)),
        }
    } else {
        match server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            // no port, or a bare IPv6 literal
            _ => (server, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("bad port"))?,
        None => DEFAULT_TLS_PORT,
    };
    Ok((host.to_string(), port))
}

/// Accepts any server certificate but still checks that the peer owns the
/// key it presented
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
