//! TCP transport
//!
//! The endpoint is resolved when the transport is created. `open` starts a
//! non-blocking connect and reports `Connecting` until the handshake is done,
//! trying each resolved address for at most `connect_timeout`. Sends that
//! would block are buffered and flushed on the next call; receives drain the
//! socket into a [`FrameBuffer`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use common::hex::frame_hex;
use errors::{PlcError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{
    FrameBuffer, FrameCheck, OpenStatus, Transport, TransportFactory, TransportStats,
    TransportTarget,
};

const READ_CHUNK: usize = 1024;

/// Connect errors that will not resolve by waiting
fn is_final_connect_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::PermissionDenied
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable
            | ErrorKind::InvalidInput
            | ErrorKind::Unsupported
    )
}

// ============================================================================
// Connection attempt
// ============================================================================

/// Non-blocking connect to one address
#[derive(Debug)]
struct PendingConnect {
    socket: Socket,
    addr: SocketAddr,
    started: Instant,
}

impl PendingConnect {
    fn start(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {},
            Err(e) if is_final_connect_error(&e) => return Err(e),
            // In progress; the outcome shows up in later polls
            Err(e) => debug!("Connect to {} pending: {}", addr, e),
        }
        Ok(Self {
            socket,
            addr,
            started: Instant::now(),
        })
    }

    /// `true` once the handshake has completed
    fn is_established(&self) -> io::Result<bool> {
        if let Some(e) = self.socket.take_error()? {
            return Err(e);
        }
        match self.socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn into_stream(self) -> TcpStream {
        if let Err(e) = self.socket.set_keepalive(true) {
            warn!("Failed to set keep-alive: {}", e);
        }
        if let Err(e) = self.socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        TcpStream::from(self.socket)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Non-blocking TCP client transport
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    addrs: Vec<SocketAddr>,
    /// Index of the next address to try
    next_addr: usize,
    pending: Option<PendingConnect>,
    last_error: Option<String>,
    stream: Option<TcpStream>,
    rx: FrameBuffer,
    tx: BytesMut,
    stats: TransportStats,
}

impl TcpTransport {
    /// Transport for already resolved `addrs`
    pub fn new(
        host: impl Into<String>,
        port: u16,
        addrs: Vec<SocketAddr>,
        connect_timeout: Duration,
        rx_limit: usize,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            addrs,
            next_addr: 0,
            pending: None,
            last_error: None,
            stream: None,
            rx: FrameBuffer::new(rx_limit),
            tx: BytesMut::new(),
            stats: TransportStats::default(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Give up on the current round of addresses
    fn connect_failed(&mut self) -> PlcError {
        self.next_addr = 0;
        let reason = self
            .last_error
            .take()
            .unwrap_or_else(|| "no address to try".to_string());
        PlcError::transport(format!("Failed to connect to {}: {}", self.endpoint(), reason))
    }

    fn drop_stream(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            warn!("TCP connection to {} lost: {}", self.endpoint(), reason);
        }
        self.rx.clear();
        self.tx.clear();
    }

    /// Write as much pending data as the socket accepts
    fn flush(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PlcError::NotConnected);
        };
        while !self.tx.is_empty() {
            match stream.write(&self.tx) {
                Ok(0) => {
                    self.drop_stream("write returned zero");
                    return Err(PlcError::transport("Connection closed while sending"));
                },
                Ok(n) => {
                    self.tx.advance(n);
                    self.stats.bytes_sent += n as u64;
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let msg = format!("Failed to send data: {}", e);
                    self.drop_stream(&msg);
                    return Err(PlcError::transport(msg));
                },
            }
        }
        Ok(())
    }

    /// Move everything readable right now into the receive buffer
    fn fill(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PlcError::NotConnected);
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.drop_stream("closed by peer");
                    return Err(PlcError::transport("Connection closed by peer"));
                },
                Ok(n) => {
                    debug!(hex_data = %frame_hex(&chunk[..n]), length = n, direction = "recv", "[TCP Transport] Raw packet");
                    self.rx.extend(&chunk[..n]);
                    self.stats.bytes_received += n as u64;
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let msg = format!("Failed to receive data: {}", e);
                    self.drop_stream(&msg);
                    return Err(PlcError::transport(msg));
                },
            }
        }
    }
}

impl Transport for TcpTransport {
    fn code(&self) -> &'static str {
        "tcp"
    }

    fn open(&mut self) -> Result<OpenStatus> {
        if self.stream.is_some() {
            return Ok(OpenStatus::Open);
        }

        loop {
            let pending = match self.pending.take() {
                Some(pending) => pending,
                None => {
                    let Some(&addr) = self.addrs.get(self.next_addr) else {
                        return Err(self.connect_failed());
                    };
                    self.next_addr += 1;
                    debug!("Connecting to {} (timeout {:?})", addr, self.connect_timeout);
                    match PendingConnect::start(addr) {
                        Ok(pending) => pending,
                        Err(e) => {
                            self.last_error = Some(format!("{}: {}", addr, e));
                            continue;
                        },
                    }
                },
            };

            match pending.is_established() {
                Ok(true) => {
                    info!("Connected to TCP endpoint {}", pending.addr);
                    self.stream = Some(pending.into_stream());
                    self.next_addr = 0;
                    self.last_error = None;
                    return Ok(OpenStatus::Open);
                },
                Ok(false) if pending.started.elapsed() < self.connect_timeout => {
                    self.pending = Some(pending);
                    return Ok(OpenStatus::Connecting);
                },
                Ok(false) => {
                    self.last_error = Some(format!(
                        "{}: timed out after {:?}",
                        pending.addr, self.connect_timeout
                    ));
                },
                Err(e) => self.last_error = Some(format!("{}: {}", pending.addr, e)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            debug!("Abandoned connect to {}", pending.addr);
        }
        self.next_addr = 0;
        self.last_error = None;
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                debug!("TCP shutdown: {}", e);
            }
            info!("Disconnected from TCP endpoint {}", self.endpoint());
        }
        self.rx.clear();
        self.tx.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn send_message(&mut self, frame: Bytes) -> Result<()> {
        if self.stream.is_none() {
            return Err(PlcError::NotConnected);
        }
        debug!(hex_data = %frame_hex(&frame), length = frame.len(), direction = "send", "[TCP Transport] Raw packet");
        self.tx.extend_from_slice(&frame);
        self.stats.frames_sent += 1;
        self.flush()
    }

    fn select_message(
        &mut self,
        min_size: usize,
        accept: &dyn Fn(&[u8]) -> FrameCheck,
    ) -> Result<Option<Bytes>> {
        self.flush()?;
        self.fill()?;

        let (frame, skipped) = self.rx.select(min_size, accept);
        self.stats.bytes_skipped += skipped as u64;
        self.stats.bytes_skipped += self.rx.enforce_limit() as u64;
        if frame.is_some() {
            self.stats.frames_received += 1;
        }
        Ok(frame)
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Addresses of `host:port`; an IP literal resolves without a lookup
fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| PlcError::transport(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(PlcError::transport(format!(
            "No address found for {}:{}",
            host, port
        )));
    }
    Ok(addrs)
}

/// Split `host[:port]`, falling back to `default_port`
fn parse_endpoint(connect_info: &str, default_port: Option<u16>) -> Result<(String, u16)> {
    if let Ok(addr) = connect_info.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }

    let (host, port) = match connect_info.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
            let port = port.parse::<u16>().map_err(|_| {
                PlcError::InvalidConnectionString(format!("Invalid port in '{}'", connect_info))
            })?;
            (host.trim_start_matches('[').trim_end_matches(']'), Some(port))
        },
        _ => (connect_info, None),
    };

    if host.is_empty() {
        return Err(PlcError::InvalidConnectionString(format!(
            "Missing host in '{}'",
            connect_info
        )));
    }
    let port = port.or(default_port).ok_or_else(|| {
        PlcError::InvalidConnectionString(format!("No port given in '{}'", connect_info))
    })?;
    Ok((host.to_string(), port))
}

/// Factory for `tcp` transports
#[derive(Debug, Default)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn code(&self) -> &'static str {
        "tcp"
    }

    fn name(&self) -> &'static str {
        "TCP"
    }

    fn create(&self, target: &TransportTarget<'_>) -> Result<Box<dyn Transport>> {
        let (host, port) = parse_endpoint(target.connect_info, target.default_port)?;
        let addrs = resolve(&host, port)?;
        debug!("Resolved {}:{} to {:?}", host, port, addrs);
        Ok(Box::new(TcpTransport::new(
            host,
            port,
            addrs,
            target.config.connect_timeout(),
            target.config.max_message_size * 4,
        )))
    }
}
