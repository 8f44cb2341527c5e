//! Stdio relay: one dedicated thread per vsock port, driven by the IO
//! substrate's non-blocking socket and readiness loop (spec §4.5) rather
//! than the tokio reactor — the relay is plain synchronous I/O bridging a
//! guest vsock connection to a caller-supplied `Read`/`Write` sink.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::thread::JoinHandle;

use hypercell_io::readiness::ReadinessHandler;
use hypercell_io::socket::{Address, Socket};
use hypercell_io::{IoError, Readiness};
use mio::Interest;

use crate::error::ContainerError;

/// Caller-supplied stdio endpoints. `None` fields correspond to ports this
/// process was not given (see `stdio_port_count` in `lifecycle.rs`).
pub struct StdioSinks {
    pub stdin: Option<Box<dyn Read + Send>>,
    pub stdout: Option<Box<dyn Write + Send>>,
    pub stderr: Option<Box<dyn Write + Send>>,
}

/// The background threads relaying one process's stdio. Dropping this
/// detaches the threads rather than joining them — they exit on their own
/// once the guest closes its end.
pub struct StdioRelay {
    threads: Vec<JoinHandle<()>>,
}

impl StdioRelay {
    pub fn spawn(
        stdin_fd: Option<OwnedFd>,
        stdout_fd: Option<OwnedFd>,
        stderr_fd: Option<OwnedFd>,
        mut sinks: StdioSinks,
    ) -> Self {
        let mut threads = Vec::new();

        if let (Some(fd), Some(source)) = (stdin_fd, sinks.stdin.take()) {
            threads.push(std::thread::spawn(move || {
                if let Err(e) = relay_in(fd, source) {
                    tracing::debug!(error = %e, "stdin relay ended");
                }
            }));
        }
        if let (Some(fd), Some(sink)) = (stdout_fd, sinks.stdout.take()) {
            threads.push(std::thread::spawn(move || {
                if let Err(e) = relay_out(fd, sink) {
                    tracing::debug!(error = %e, "stdout relay ended");
                }
            }));
        }
        if let (Some(fd), Some(sink)) = (stderr_fd, sinks.stderr.take()) {
            threads.push(std::thread::spawn(move || {
                if let Err(e) = relay_out(fd, sink) {
                    tracing::debug!(error = %e, "stderr relay ended");
                }
            }));
        }

        Self { threads }
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|t| t.is_finished())
    }
}

/// Signals its channel on every readiness event; the relay loop below reads
/// until `WouldBlock` each time, per edge-triggered semantics.
struct SignalHandler {
    tx: mpsc::Sender<()>,
}

impl ReadinessHandler for SignalHandler {
    fn on_ready(&mut self, _readable: bool, _writable: bool) -> bool {
        let _ = self.tx.send(());
        true
    }
}

/// Host source → guest. On source EOF, half-shutdown the write side so the
/// guest observes end-of-input instead of the connection hanging open.
fn relay_in(fd: OwnedFd, mut source: Box<dyn Read + Send>) -> Result<(), ContainerError> {
    let mut socket = Socket::from_connected_fd(Address::Vsock { cid: 0, port: 0 }, fd)?;
    let raw_fd = socket.as_raw_fd()?;
    let mut readiness = Readiness::new()?;
    let (tx, rx) = mpsc::channel();
    let token = readiness.register(raw_fd, Interest::WRITABLE, Box::new(SignalHandler { tx }))?;

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    'outer: loop {
        if pending.is_empty() {
            let n = source.read(&mut buf).map_err(IoError::Posix)?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);
        }
        while !pending.is_empty() {
            match socket.write(&pending) {
                Ok(0) => break 'outer,
                Ok(n) => {
                    pending.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    readiness.run_once()?;
                    let _ = rx.try_recv();
                }
                Err(e) => return Err(IoError::Posix(e).into()),
            }
        }
    }
    readiness.deregister(raw_fd, token);
    Ok(())
}

/// Guest → host sink. Ends when the guest closes its end (read returns 0).
fn relay_out(fd: OwnedFd, mut sink: Box<dyn Write + Send>) -> Result<(), ContainerError> {
    let mut socket = Socket::from_connected_fd(Address::Vsock { cid: 0, port: 0 }, fd)?;
    let raw_fd = socket.as_raw_fd()?;
    let mut readiness = Readiness::new()?;
    let (tx, rx) = mpsc::channel();
    let token = readiness.register(raw_fd, Interest::READABLE, Box::new(SignalHandler { tx }))?;

    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => sink.write_all(&buf[..n]).map_err(IoError::Posix)?,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                readiness.run_once()?;
                let _ = rx.try_recv();
            }
            Err(e) => return Err(IoError::Posix(e).into()),
        }
    }
    readiness.deregister(raw_fd, token);
    Ok(())
}
