use std::net::{
    IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket,
};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Well-known external endpoint used to pick the outward-facing interface.
/// A UDP `connect` only sets the default destination; nothing is sent.
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// TCP client transport for output controllers.
pub struct TcpTransport;

impl TcpTransport {
    /// Connect to a controller (blocking, bounded by `timeout`).
    ///
    /// Read and write timeouts on the returned stream are set to the same
    /// value so every later blocking call is bounded too.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<LinkStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| TransportError::Connect { addr, source })?;
        let stream = LinkStream::from_tcp(stream);
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        debug!(%addr, ?timeout, "connected to controller");
        Ok(stream)
    }

    /// Resolve `host` and connect in one step.
    pub fn connect_host(host: &str, port: u16, timeout: Duration) -> Result<LinkStream> {
        let addr = resolve(host, port)?;
        Self::connect(addr, timeout)
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "tcp"
    }
}

/// Resolve a host name or literal address, preferring IPv4.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_err = |source| TransportError::Resolve {
        host: host.to_string(),
        port,
        source,
    };

    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(resolve_err)?.collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses returned",
            ))
        })
}

/// Single reachability probe: true if a TCP connect succeeds within `timeout`.
///
/// The probe connection is dropped immediately.
pub fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(_stream) => {
            trace!(%addr, "probe connected");
            true
        }
        Err(err) => {
            trace!(%addr, error = %err, "probe failed");
            false
        }
    }
}

/// Determine the local IPv4 address used for outbound traffic.
///
/// Falls back to resolving this host's own name when there is no default
/// route, e.g. on an isolated LAN.
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let route_err = match route_ipv4() {
        Ok(ip) => return Ok(ip),
        Err(err) => err,
    };
    debug!(error = %route_err, "no default route; resolving own host name");
    match hostname_ipv4() {
        Some(ip) => {
            debug!(%ip, "local address from host name");
            Ok(ip)
        }
        None => Err(TransportError::LocalAddress(route_err)),
    }
}

fn route_ipv4() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE_TARGET)?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no routable IPv4 interface (got {other})"),
        )),
    }
}

fn hostname_ipv4() -> Option<Ipv4Addr> {
    let name = hostname::get().ok()?;
    let name = name.to_str()?;
    let addrs = (name, 0).to_socket_addrs().ok()?;
    pick_ipv4(addrs)
}

/// First non-loopback IPv4 address, else the first IPv4 of any kind.
fn pick_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<Ipv4Addr> {
    let mut loopback = None;
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            if !ip.is_loopback() && !ip.is_unspecified() {
                return Some(ip);
            }
            loopback = loopback.or(Some(ip));
        }
    }
    loopback
}

/// TCP listener standing in for a controller.
///
/// Used by the device simulator and by tests that need a peer to talk to.
pub struct DeviceListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl DeviceListener {
    /// Bind and listen on `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!(%addr, "device listener bound");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(LinkStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted controller link");
        Ok((LinkStream::from_tcp(stream), peer))
    }

    /// Switch the listener between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// The bound address (with the real port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::Ipv6Addr;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn test_bind_accept_connect() {
        let listener = DeviceListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let handle = std::thread::spawn(move || {
            let mut client = TcpTransport::connect(addr, Duration::from_secs(2)).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let (mut server, _peer) = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = DeviceListener::bind(loopback()).unwrap();
            listener.local_addr()
        };
        let result = TcpTransport::connect(addr, Duration::from_millis(500));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_probe_reports_listener() {
        let listener = DeviceListener::bind(loopback()).unwrap();
        assert!(probe(listener.local_addr(), Duration::from_millis(200)));

        let closed = listener.local_addr();
        drop(listener);
        assert!(!probe(closed, Duration::from_millis(200)));
    }

    #[test]
    fn test_resolve_literal_and_localhost() {
        let addr = resolve("192.168.1.20", 8080).unwrap();
        assert_eq!(addr, SocketAddr::from(([192, 168, 1, 20], 8080)));

        let addr = resolve("localhost", 9000).unwrap();
        assert_eq!(addr.port(), 9000);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        let result = resolve("not a host name", 80);
        assert!(matches!(result, Err(TransportError::Resolve { .. })));
    }

    #[test]
    fn test_shutdown_unblocks_clone() {
        let listener = DeviceListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        let client = TcpTransport::connect(addr, Duration::from_secs(2)).unwrap();
        let (_server, _) = listener.accept().unwrap();

        let mut reader = client.try_clone().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        client.shutdown().unwrap();
        let read = handle.join().unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[test]
    fn test_pick_ipv4_prefers_lan_address() {
        let addrs = [
            SocketAddr::from((Ipv6Addr::LOCALHOST, 0)),
            SocketAddr::from(([127, 0, 1, 1], 0)),
            SocketAddr::from(([192, 168, 1, 10], 0)),
        ];
        assert_eq!(pick_ipv4(addrs), Some(Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn test_pick_ipv4_falls_back_to_loopback() {
        let addrs = [
            SocketAddr::from((Ipv6Addr::LOCALHOST, 0)),
            SocketAddr::from(([127, 0, 1, 1], 0)),
        ];
        assert_eq!(pick_ipv4(addrs), Some(Ipv4Addr::new(127, 0, 1, 1)));
        assert_eq!(pick_ipv4([SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))]), None);
    }
}
