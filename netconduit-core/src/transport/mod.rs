//! Transport layer: TCP with optional TLS
//!
//! Everything above this module sees a [`BoxedStream`], whether or not the
//! bytes are encrypted.

use netconduit_common::{ClientConfig, ConduitError, Result, ServerConfig};
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub mod socket_tuning;
pub mod tcp;
pub mod tls;
pub mod writer;

pub use writer::run_writer;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Server-side listener.
///
/// The TLS acceptor is built once at bind time. Upgrading is a separate
/// step ([`Upgrader`]) so the accept loop never waits on a handshake.
pub struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    buffer_size: usize,
}

impl Listener {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let tls = if config.tls.enabled {
            Some(tls::acceptor(&config.tls)?)
        } else {
            None
        };
        let inner = tcp::bind(&config.bind_addr()).await?;

        Ok(Self {
            inner,
            tls,
            buffer_size: config.limits.buffer_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        socket_tuning::configure_socket_silent(&stream, self.buffer_size);
        Ok((stream, addr))
    }

    /// Handle for upgrading accepted streams off the accept loop
    pub fn upgrader(&self) -> Upgrader {
        Upgrader {
            tls: self.tls.clone(),
        }
    }
}

/// Turns an accepted TCP stream into a [`BoxedStream`], running the TLS
/// handshake when TLS is enabled
#[derive(Clone)]
pub struct Upgrader {
    tls: Option<TlsAcceptor>,
}

impl Upgrader {
    pub async fn upgrade(&self, stream: TcpStream) -> Result<BoxedStream> {
        match &self.tls {
            None => Ok(Box::pin(stream)),
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| ConduitError::Tls(e.to_string()))?;
                Ok(Box::pin(tls_stream))
            }
        }
    }
}

/// Client-side dialer
pub struct Connector {
    addr: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    connect_timeout: Duration,
    buffer_size: usize,
}

impl Connector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls = if config.tls.enabled {
            Some((
                tls::connector(&config.tls)?,
                tls::server_name(&config.tls, &config.host)?,
            ))
        } else {
            None
        };

        Ok(Self {
            addr: config.server_addr(),
            tls,
            connect_timeout: config.timeouts.connection_timeout,
            buffer_size: config.limits.buffer_size,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open the TCP connection and run the TLS handshake, all within the
    /// connection timeout
    pub async fn connect(&self) -> Result<(BoxedStream, SocketAddr)> {
        tokio::time::timeout(self.connect_timeout, self.establish())
            .await
            .map_err(|_| ConduitError::Timeout(format!("connecting to {}", self.addr)))?
    }

    async fn establish(&self) -> Result<(BoxedStream, SocketAddr)> {
        let stream = tcp::connect(&self.addr, self.connect_timeout, self.buffer_size).await?;
        let peer = stream.peer_addr()?;

        match &self.tls {
            None => Ok((Box::pin(stream), peer)),
            Some((connector, name)) => {
                let tls_stream = connector
                    .connect(name.clone(), stream)
                    .await
                    .map_err(|e| ConduitError::Tls(e.to_string()))?;
                Ok((Box::pin(tls_stream), peer))
            }
        }
    }
}
