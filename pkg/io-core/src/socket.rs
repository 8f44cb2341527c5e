//! Non-blocking stream sockets over three address families (spec §3/§4.5).
//!
//! A `Socket` begins `Created`, then moves to exactly one of `Connected`
//! (outbound) or `Listening` (inbound) and stays there — address family and
//! role are fixed at construction, matching the host's `ipc.rs` transport
//! which never renegotiates a connection's kind mid-life.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use vsock::{VsockAddr, VsockListener, VsockStream};

use crate::error::IoError;

/// The address a `Socket` binds, connects, or listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix(PathBuf),
    Vsock { cid: u32, port: u32 },
    Tcp(SocketAddr),
}

enum Stream {
    Unix(UnixStream),
    Vsock(VsockStream),
    Tcp(std::net::TcpStream),
}

enum Listener {
    Unix(UnixListener),
    Vsock(VsockListener),
    Tcp(std::net::TcpListener),
}

enum State {
    Created,
    Connected(Stream),
    Listening { listener: Listener, accept_stream_taken: bool },
}

/// A socket over one of the three address families this substrate supports.
/// `connect`/`listen` are one-shot: once a socket leaves `Created` it cannot
/// return to it.
pub struct Socket {
    address: Address,
    state: State,
}

impl Socket {
    pub fn new(address: Address) -> Self {
        Self { address, state: State::Created }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Connect out on `self.address`, moving `Created -> Connected`.
    pub fn connect(&mut self) -> Result<(), IoError> {
        if !matches!(self.state, State::Created) {
            return Err(IoError::InvalidOperationOnSocket);
        }
        let stream = match &self.address {
            Address::Unix(path) => Stream::Unix(UnixStream::connect(path)?),
            Address::Vsock { cid, port } => {
                let addr = VsockAddr::new(*cid, *port);
                Stream::Vsock(VsockStream::connect(&addr)?)
            }
            Address::Tcp(addr) => Stream::Tcp(std::net::TcpStream::connect(addr)?),
        };
        self.set_nonblocking(&stream)?;
        self.state = State::Connected(stream);
        Ok(())
    }

    /// Wrap an already-connected fd (e.g. one handed down by a guest agent
    /// handshake) as a `Connected` socket without dialing out.
    pub fn from_connected_fd(address: Address, fd: OwnedFd) -> Result<Self, IoError> {
        let stream = match &address {
            Address::Unix(_) => Stream::Unix(UnixStream::from(fd)),
            Address::Vsock { .. } => Stream::Vsock(VsockStream::from(std::os::fd::OwnedFd::from(fd))),
            Address::Tcp(_) => Stream::Tcp(std::net::TcpStream::from(fd)),
        };
        let socket = Self { address, state: State::Created };
        let mut socket = socket;
        socket.set_nonblocking(&stream)?;
        socket.state = State::Connected(stream);
        Ok(socket)
    }

    /// Bind and listen on `self.address`, moving `Created -> Listening`.
    pub fn listen(&mut self, backlog: i32) -> Result<(), IoError> {
        if !matches!(self.state, State::Created) {
            return Err(IoError::InvalidOperationOnSocket);
        }
        let listener = match &self.address {
            Address::Unix(path) => {
                // pre-listen hook: a stale socket file left behind by a
                // prior, uncleanly-terminated listener must not block bind.
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                // pre-bind hook: restrict the control socket to its owner
                // before any peer can possibly connect to it.
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                Listener::Unix(listener)
            }
            Address::Vsock { cid, port } => {
                let addr = VsockAddr::new(*cid, *port);
                Listener::Vsock(VsockListener::bind(&addr)?)
            }
            Address::Tcp(addr) => {
                let std_listener = std::net::TcpListener::bind(addr)?;
                let _ = backlog;
                Listener::Tcp(std_listener)
            }
        };
        self.set_listener_nonblocking(&listener)?;
        self.state = State::Listening { listener, accept_stream_taken: false };
        Ok(())
    }

    /// Accept one inbound connection. Only one accept stream may be active
    /// on a listener at a time (`AcceptStreamExists`) — mirrors a guest
    /// agent relay that hands each accepted stream to a single consumer
    /// before accepting the next.
    pub fn accept(&mut self) -> Result<Socket, IoError> {
        match &mut self.state {
            State::Listening { listener, accept_stream_taken } => {
                if *accept_stream_taken {
                    return Err(IoError::AcceptStreamExists);
                }
                *accept_stream_taken = true;
                let result = Self::do_accept(listener, &self.address);
                *accept_stream_taken = false;
                result
            }
            _ => Err(IoError::InvalidOperationOnSocket),
        }
    }

    fn do_accept(listener: &mut Listener, address: &Address) -> Result<Socket, IoError> {
        let (stream, peer_address) = match listener {
            Listener::Unix(l) => {
                let (s, _) = l.accept()?;
                (Stream::Unix(s), address.clone())
            }
            Listener::Vsock(l) => {
                let (s, peer) = l.accept()?;
                (Stream::Vsock(s), Address::Vsock { cid: peer.cid(), port: peer.port() })
            }
            Listener::Tcp(l) => {
                let (s, peer) = l.accept()?;
                (Stream::Tcp(s), Address::Tcp(peer))
            }
        };
        let mut socket = Socket { address: peer_address, state: State::Created };
        socket.set_nonblocking(&stream)?;
        socket.state = State::Connected(stream);
        Ok(socket)
    }

    fn set_nonblocking(&self, stream: &Stream) -> Result<(), IoError> {
        match stream {
            Stream::Unix(s) => s.set_nonblocking(true)?,
            Stream::Vsock(s) => s.set_nonblocking(true)?,
            Stream::Tcp(s) => s.set_nonblocking(true)?,
        }
        Ok(())
    }

    fn set_listener_nonblocking(&self, listener: &Listener) -> Result<(), IoError> {
        match listener {
            Listener::Unix(l) => l.set_nonblocking(true)?,
            Listener::Vsock(l) => l.set_nonblocking(true)?,
            Listener::Tcp(l) => l.set_nonblocking(true)?,
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening { .. })
    }

    /// The raw fd backing this socket, for registration with `Readiness`.
    pub fn as_raw_fd(&self) -> Result<RawFd, IoError> {
        match &self.state {
            State::Connected(Stream::Unix(s)) => Ok(s.as_raw_fd()),
            State::Connected(Stream::Vsock(s)) => Ok(s.as_raw_fd()),
            State::Connected(Stream::Tcp(s)) => Ok(s.as_raw_fd()),
            State::Listening { listener: Listener::Unix(l), .. } => Ok(l.as_raw_fd()),
            State::Listening { listener: Listener::Vsock(l), .. } => Ok(l.as_raw_fd()),
            State::Listening { listener: Listener::Tcp(l), .. } => Ok(l.as_raw_fd()),
            State::Created => Err(IoError::InvalidOperationOnSocket),
        }
    }

    /// Close the socket. Reading or writing afterwards is `SocketClosed`.
    pub fn close(&mut self) {
        self.state = State::Created;
    }
}

impl std::io::Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.state {
            State::Connected(Stream::Unix(s)) => s.read(buf),
            State::Connected(Stream::Vsock(s)) => s.read(buf),
            State::Connected(Stream::Tcp(s)) => s.read(buf),
            _ => Err(IoError::SocketClosed.into()),
        }
    }
}

impl std::io::Write for Socket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.state {
            State::Connected(Stream::Unix(s)) => s.write(buf),
            State::Connected(Stream::Vsock(s)) => s.write(buf),
            State::Connected(Stream::Tcp(s)) => s.write(buf),
            _ => Err(IoError::SocketClosed.into()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.state {
            State::Connected(Stream::Unix(s)) => s.flush(),
            State::Connected(Stream::Vsock(s)) => s.flush(),
            State::Connected(Stream::Tcp(s)) => s.flush(),
            _ => Err(IoError::SocketClosed.into()),
        }
    }
}

impl From<IoError> for std::io::Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Posix(io_err) => io_err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn unix_connect_accept_roundtrip() {
        let dir = std::env::temp_dir().join(format!("hypercell-io-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);

        let mut server = Socket::new(Address::Unix(dir.clone()));
        server.listen(1).unwrap();
        assert!(server.is_listening());

        let client_thread = std::thread::spawn({
            let dir = dir.clone();
            move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                let mut client = Socket::new(Address::Unix(dir));
                loop {
                    match client.connect() {
                        Ok(()) => break,
                        Err(_) => std::thread::sleep(std::time::Duration::from_millis(5)),
                    }
                }
                client.write_all(b"hi").unwrap();
                client
            }
        });

        let mut accepted = loop {
            match server.accept() {
                Ok(s) => break s,
                Err(IoError::Posix(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        };

        let mut buf = [0u8; 2];
        loop {
            match accepted.read(&mut buf) {
                Ok(2) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
        assert_eq!(&buf, b"hi");

        client_thread.join().unwrap();
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn connect_twice_is_invalid_operation() {
        let dir = std::env::temp_dir().join(format!("hypercell-io-test2-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let mut listener = Socket::new(Address::Unix(dir.clone()));
        listener.listen(1).unwrap();

        let mut client = Socket::new(Address::Unix(dir.clone()));
        let _ = client.connect();
        assert!(matches!(client.connect(), Err(IoError::InvalidOperationOnSocket)));
        let _ = std::fs::remove_file(&dir);
    }
}
