//! Socket handling and command exchanges
//!
//! [`Connection`] wraps a plain or TLS stream and performs the two
//! exchange shapes POP3 needs: one command answered by one status line,
//! and one command answered by a status line plus a dot-terminated body.

use crate::codec::{self, Command};
use crate::config::Pop3Config;
use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Plain TCP or implicit-TLS stream.
#[derive(Debug)]
pub enum PopStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for PopStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PopStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An open POP3 connection.
#[derive(Debug)]
pub struct Connection {
    stream: BufReader<PopStream>,
    addr: String,
    timeout: Option<Duration>,
}

impl Connection {
    /// Open a socket to the configured server and read its greeting.
    ///
    /// The greeting is returned as-is; judging it is up to the caller.
    pub async fn open(config: &Pop3Config) -> Result<(Self, String)> {
        let addr = config.addr();
        debug!("Connecting to POP3 server at {}", addr);

        let tcp = within(config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|source| Error::Transport {
                addr: addr.clone(),
                command: "connect".into(),
                source,
            })?;

        let stream = if config.tls {
            let connector = tls_connector(config)?;
            let name = config
                .tls_options
                .server_name
                .clone()
                .unwrap_or_else(|| config.host.clone());
            let server_name = ServerName::try_from(name)
                .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
            let tls = within(config.timeout, connector.connect(server_name, tcp))
                .await
                .map_err(|e| Error::Tls(format!("Handshake with {addr} failed: {e}")))?;
            PopStream::Tls(Box::new(tls))
        } else {
            PopStream::Tcp(tcp)
        };

        let mut conn = Self {
            stream: BufReader::new(stream),
            addr,
            timeout: config.timeout,
        };
        let greeting = conn.read_status("greeting").await?;
        debug!("Greeting from {}: {}", conn.addr, greeting);
        Ok((conn, greeting))
    }

    /// `host:port` of the peer.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a command and return the status line, positive or not.
    pub async fn exchange(&mut self, command: Command<'_>) -> Result<String> {
        debug!("POP3 >> {}", command);
        let wire = command.to_wire();
        let label = command.to_string();
        let timeout = self.timeout;
        let writer = self.stream.get_mut();
        let sent = within(timeout, async {
            writer.write_all(wire.as_bytes()).await?;
            writer.flush().await
        })
        .await;
        sent.map_err(|source| self.transport(&label, source))?;
        self.read_status(&label).await
    }

    /// Send a command and require a positive status line.
    pub async fn exchange_ok(&mut self, command: Command<'_>) -> Result<String> {
        let reply = self.exchange(command).await?;
        if codec::is_ok(&reply) {
            Ok(reply)
        } else {
            Err(self.negative(command, reply))
        }
    }

    /// Send a multi-line command and return its unstuffed body lines.
    ///
    /// The body is only read after a positive status; a negative one
    /// fails with [`Error::ServerNegative`].
    pub async fn exchange_list(&mut self, command: Command<'_>) -> Result<Vec<Vec<u8>>> {
        self.exchange_ok(command).await?;
        self.read_body(command).await
    }

    /// Read the dot-terminated body of `command`, whose positive status
    /// line has already been consumed.
    pub async fn read_body(&mut self, command: Command<'_>) -> Result<Vec<Vec<u8>>> {
        let timeout = self.timeout;
        let body = within(timeout, codec::read_body(&mut self.stream)).await;
        body.map_err(|source| self.transport(&command.to_string(), source))
    }

    /// Close the socket, ignoring failures: the peer may already be gone.
    pub async fn close(mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }

    pub fn negative(&self, command: Command<'_>, reply: String) -> Error {
        Error::ServerNegative {
            addr: self.addr.clone(),
            command: command.to_string(),
            reply,
        }
    }

    pub fn malformed(&self, command: Command<'_>, line: impl Into<String>) -> Error {
        Error::MalformedReply {
            addr: self.addr.clone(),
            command: command.to_string(),
            line: line.into(),
        }
    }

    async fn read_status(&mut self, label: &str) -> Result<String> {
        let timeout = self.timeout;
        let line = within(timeout, codec::read_line(&mut self.stream)).await;
        let line = line.map_err(|source| self.transport(label, source))?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn transport(&self, command: &str, source: io::Error) -> Error {
        Error::Transport {
            addr: self.addr.clone(),
            command: command.to_string(),
            source,
        }
    }
}

/// Run an I/O future, failing with [`io::ErrorKind::TimedOut`] once the
/// optional limit passes.
async fn within<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "POP3 server timed out"))?,
    }
}

/// Build the TLS connector for a configuration.
///
/// Uses the webpki trust anchors, or accepts any certificate when the
/// options ask for it.
fn tls_connector(config: &Pop3Config) -> Result<TlsConnector> {
    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?;

    let tls_config = if config.tls_options.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Certificate verifier that accepts all certificates
/// (for self-signed local servers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
