//! Observes the chain a server presents during a TLS handshake.
//!
//! Peer verification is switched off: self-signed, expired or otherwise
//! untrusted chains are exactly what this fetcher needs to see.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use openssl::ssl::{HandshakeError, Ssl, SslContext, SslMethod, SslStream, SslVerifyMode};
use tracing::{debug, warn};

use crate::chain::{ChainFetcher, ChainOrigin, ChainSnapshot, ComparisonMode};
use crate::domain::Domain;
use crate::error::{CertCheckError, FetchError};
use crate::fingerprint::{FingerprintStrategy, RawCertificate};

pub const DEFAULT_TLS_PORT: u16 = 443;
pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LiveChainFetcher {
    mode: ComparisonMode,
    strategy: FingerprintStrategy,
    port: u16,
    timeout: Duration,
}

impl LiveChainFetcher {
    pub fn new(mode: ComparisonMode, strategy: FingerprintStrategy) -> Self {
        LiveChainFetcher {
            mode,
            strategy,
            port: DEFAULT_TLS_PORT,
            timeout: DEFAULT_TLS_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bounds each connect attempt and every handshake read/write.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the DER certificates in the order the server sent them.
    pub fn fetch_certificates(&self, domain: &Domain) -> Result<Vec<RawCertificate>, CertCheckError> {
        let tcp_stream = self.dial(domain)?;
        tcp_stream.set_read_timeout(Some(self.timeout))?;
        tcp_stream.set_write_timeout(Some(self.timeout))?;

        let mut context = SslContext::builder(SslMethod::tls_client())?;
        context.set_verify(SslVerifyMode::NONE);
        let context = context.build();

        let mut connector = Ssl::new(&context)?;
        if !domain.is_ip_literal() {
            connector.set_hostname(domain.as_str())?;
        }

        let mut stream = connector.connect(tcp_stream).map_err(|e| match e {
            HandshakeError::WouldBlock(_) => CertCheckError::Timeout {
                operation: format!("TLS handshake with {}:{}", domain, self.port),
            },
            other => other.into(),
        })?;

        let chain = peer_chain(&stream);
        close(&mut stream, domain);
        chain
    }

    fn dial(&self, domain: &Domain) -> Result<TcpStream, CertCheckError> {
        let address = format!("{}:{}", domain, self.port);
        let candidates: Vec<SocketAddr> = (domain.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| CertCheckError::DnsResolution {
                hostname: domain.to_string(),
                source,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(CertCheckError::DnsResolution {
                hostname: domain.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            });
        }

        let mut last_error = None;
        for socket_addr in &candidates {
            match TcpStream::connect_timeout(socket_addr, self.timeout) {
                Ok(stream) => {
                    debug!(%domain, %socket_addr, "connected");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%domain, %socket_addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address attempted"));
        if source.kind() == io::ErrorKind::TimedOut {
            return Err(CertCheckError::Timeout {
                operation: format!("connect to {}", address),
            });
        }
        Err(CertCheckError::ConnectionFailed { address, source })
    }
}

fn peer_chain(stream: &SslStream<TcpStream>) -> Result<Vec<RawCertificate>, CertCheckError> {
    // On the client side the peer chain includes the leaf.
    let chain = stream
        .ssl()
        .peer_cert_chain()
        .ok_or_else(|| CertCheckError::CertificateError {
            reason: "server presented no certificate chain".to_string(),
        })?;

    let mut certificates = Vec::with_capacity(chain.len());
    for cert in chain {
        certificates.push(RawCertificate::from_der(cert.to_der()?));
    }
    Ok(certificates)
}

fn close(stream: &mut SslStream<TcpStream>, domain: &Domain) {
    if let Err(e) = stream.shutdown() {
        warn!(%domain, error = %e, "TLS shutdown failed");
    }
}

impl ChainFetcher for LiveChainFetcher {
    fn origin(&self) -> ChainOrigin {
        ChainOrigin::Live
    }

    fn fetch(&self, domain: &Domain) -> Result<ChainSnapshot, FetchError> {
        debug!(%domain, port = self.port, "fetching live chain");
        let wrap = |cause| FetchError::new(domain.as_str(), ChainOrigin::Live, cause);

        let certificates = self.fetch_certificates(domain).map_err(wrap)?;
        debug!(%domain, count = certificates.len(), "live chain received");
        ChainSnapshot::from_certificates(ChainOrigin::Live, self.mode, self.strategy, &certificates)
            .map_err(wrap)
    }
}
