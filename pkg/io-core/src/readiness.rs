//! Edge-triggered readiness loop over raw file descriptors (spec §4.5).
//!
//! Grounded on the host's `MioDispatcher`: an `mio::Poll` with a
//! `mio::Waker`-backed abort token, a token→handler table guarded by a
//! mutex. Registration here works on bare `RawFd`s (stdio pipes, vsock
//! connections) rather than `mio::event::Source` types, since the sources
//! this substrate multiplexes are handed to it as already-open fds.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::IoError;

/// What the readiness loop invokes when a registered fd becomes readable or
/// writable. Returning `false` deregisters the source.
pub trait ReadinessHandler: Send {
    fn on_ready(&mut self, readable: bool, writable: bool) -> bool;
}

const WAKE_TOKEN: Token = Token(usize::MAX);

/// An edge-triggered epoll (via `mio`) registrar and dispatch loop.
///
/// `run` blocks the calling thread until `shutdown` is called from another
/// thread (via the `Waker`) or every registered source has deregistered
/// itself. Idempotent deregistration swallows `ENOENT`/`EBADF`/`EPERM`,
/// since a peer may already have closed the fd by the time we ask the
/// kernel to drop it from the interest list.
pub struct Readiness {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    next_token: AtomicUsize,
    handlers: Mutex<HashMap<usize, Box<dyn ReadinessHandler>>>,
}

impl Readiness {
    pub fn new() -> Result<Self, IoError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            waker,
            next_token: AtomicUsize::new(0),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// A cloneable handle that can interrupt a blocked `run` from any thread.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Register `fd` for edge-triggered readable/writable interest.
    pub fn register(
        &self,
        fd: RawFd,
        interests: Interest,
        handler: Box<dyn ReadinessHandler>,
    ) -> Result<usize, IoError> {
        let token_id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).insert(token_id, handler);
        self.poll.registry().register(&mut SourceFd(&fd), Token(token_id), interests)?;
        Ok(token_id)
    }

    /// Deregister a previously registered fd. Idempotent: a fd already
    /// closed out from under the poller is not an error.
    pub fn deregister(&self, fd: RawFd, token_id: usize) {
        match self.poll.registry().deregister(&mut SourceFd(&fd)) {
            Ok(()) => {}
            Err(e) => match e.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EBADF) | Some(libc::EPERM) => {}
                _ => tracing::debug!(error = %e, fd, "deregister failed"),
            },
        }
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).remove(&token_id);
    }

    /// Wake a blocked `run` from another thread.
    pub fn shutdown(&self) -> Result<(), IoError> {
        self.waker.wake().map_err(IoError::from)
    }

    /// Poll once, dispatching any ready events to their handlers. Handlers
    /// returning `false` are dropped from the table (the caller is expected
    /// to have already deregistered the underlying fd).
    pub fn run_once(&mut self) -> Result<bool, IoError> {
        self.poll.poll(&mut self.events, None)?;
        let mut woken = false;
        let mut to_drop = Vec::new();

        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                woken = true;
                continue;
            }
            let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handler) = handlers.get_mut(&event.token().0) {
                let keep = handler.on_ready(event.is_readable(), event.is_writable());
                if !keep {
                    to_drop.push(event.token().0);
                }
            }
        }

        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        for token_id in to_drop {
            handlers.remove(&token_id);
        }

        Ok(woken)
    }

    /// Run until `shutdown` is called.
    pub fn run(&mut self) -> Result<(), IoError> {
        loop {
            if self.run_once()? {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::sync::mpsc;

    struct CountingHandler {
        tx: mpsc::Sender<()>,
    }

    impl ReadinessHandler for CountingHandler {
        fn on_ready(&mut self, readable: bool, _writable: bool) -> bool {
            if readable {
                let _ = self.tx.send(());
            }
            false
        }
    }

    #[test]
    fn readable_pipe_fires_handler() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let readiness = Readiness::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let token = readiness
            .register(r.as_raw_fd(), Interest::READABLE, Box::new(CountingHandler { tx }))
            .unwrap();

        nix::unistd::write(&w, b"x").unwrap();

        let mut readiness = readiness;
        readiness.run_once().unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        readiness.deregister(r.as_raw_fd(), token);
    }

    #[test]
    fn shutdown_unblocks_run() {
        let mut readiness = Readiness::new().unwrap();
        let waker = readiness.waker();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            waker.wake().unwrap();
        });
        readiness.run().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn deregister_unknown_fd_does_not_panic() {
        let readiness = Readiness::new().unwrap();
        readiness.deregister(9999, 0);
    }
}
