//! TCP socket options applied to every conduit connection
//!
//! Nagle is disabled so small control frames (pings, RPC replies) leave
//! immediately; keepalive catches half-open peers between heartbeats.

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Kernel buffers are never sized below this
const MIN_SOCKET_BUFFER: usize = 256 * 1024;
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

pub fn configure_socket(stream: &TcpStream, buffer_size: usize) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let socket = SockRef::from(stream);
    let size = buffer_size.max(MIN_SOCKET_BUFFER);
    socket.set_recv_buffer_size(size)?;
    socket.set_send_buffer_size(size)?;

    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Best effort; a socket that refuses tuning still works
pub fn configure_socket_silent(stream: &TcpStream, buffer_size: usize) {
    if let Err(e) = configure_socket(stream, buffer_size) {
        tracing::debug!("Socket tuning failed: {}", e);
    }
}
