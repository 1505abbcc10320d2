//! Plain TCP transport

use super::socket_tuning::configure_socket_silent;
use netconduit_common::{ConduitError, Result};
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream};

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    Ok(listener)
}

/// Dial `addr`, giving up after `connect_timeout`
pub async fn connect(addr: &str, connect_timeout: Duration, buffer_size: usize) -> Result<TcpStream> {
    let resolved = lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| ConduitError::Connection(format!("{addr} did not resolve")))?;

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(resolved))
        .await
        .map_err(|_| ConduitError::Timeout(format!("connecting to {addr}")))??;
    configure_socket_silent(&stream, buffer_size);
    Ok(stream)
}
