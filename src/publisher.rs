// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Publisher: owns the TCP listening socket and a per-connection subscriber
// registry. Each accepted connection is handed a fresh shared region; a
// single dispatch worker fans published messages out to every region.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::distributions::{Alphanumeric, DistString};
use socket2::{Domain, Socket, Type};

use crate::error::{PublishError, PublisherInitError};
use crate::region::SharedRegion;

const ACCEPT_POLL_TIMEOUT_MS: i32 = 1000;
const DISPATCH_QUEUE_TIMEOUT: Duration = Duration::from_millis(100);
const REGION_NAME_LEN: usize = 32;

struct Subscription {
    stream: TcpStream,
    region: Arc<SharedRegion>,
}

struct Registry {
    subs: Mutex<Vec<Subscription>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
        }
    }
}

struct PendingQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    cvar: Condvar,
}

impl PendingQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
        }
    }

    fn push(&self, item: Vec<u8>) {
        self.items.lock().unwrap().push_back(item);
        self.cvar.notify_one();
    }

    /// Pop the oldest item, waiting up to `timeout` if the queue is empty.
    fn pop_wait(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut guard = self.items.lock().unwrap();
        if guard.is_empty() {
            let (g, _) = self.cvar.wait_timeout(guard, timeout).unwrap();
            guard = g;
        }
        guard.pop_front()
    }
}

/// Owns the listening TCP socket, assigns a fresh shared region to each
/// subscriber connection, and fans published messages out to all current
/// regions. See SPEC §4.3.
pub struct Publisher {
    port: u16,
    buffer_size: usize,
    running: Arc<AtomicBool>,
    registry: Arc<Registry>,
    queue: Arc<PendingQueue>,
    accept_thread: Option<JoinHandle<()>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Create an inert handle. `buffer_size` becomes the payload ceiling for
    /// every subscriber region this publisher ever creates.
    pub fn new(port: u16, buffer_size: usize) -> Self {
        Self {
            port,
            buffer_size,
            running: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(Registry::new()),
            queue: Arc::new(PendingQueue::new()),
            accept_thread: None,
            dispatch_thread: None,
        }
    }

    /// `true` after a successful [`Self::init`] and before [`Self::destroy`].
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the listening socket (with address reuse) and launch the accept
    /// and dispatch workers.
    pub fn init(&mut self) -> Result<(), PublisherInitError> {
        let listener = bind_reuseaddr(self.port).map_err(PublisherInitError::NoSocket)?;
        listener
            .set_nonblocking(true)
            .map_err(PublisherInitError::NoSocket)?;

        self.running.store(true, Ordering::SeqCst);

        let accept_thread = {
            let registry = Arc::clone(&self.registry);
            let running = Arc::clone(&self.running);
            let buffer_size = self.buffer_size;
            std::thread::spawn(move || accept_worker(listener, registry, buffer_size, running))
        };
        let dispatch_thread = {
            let registry = Arc::clone(&self.registry);
            let queue = Arc::clone(&self.queue);
            let running = Arc::clone(&self.running);
            std::thread::spawn(move || dispatch_worker(queue, registry, running))
        };

        self.accept_thread = Some(accept_thread);
        self.dispatch_thread = Some(dispatch_thread);
        Ok(())
    }

    /// Enqueue `data` for fan-out to every currently registered subscriber.
    /// The payload is copied at enqueue time; the caller is free to reuse or
    /// drop its own buffer immediately after this returns.
    pub fn publish(&self, data: &[u8]) -> Result<(), PublishError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(PublishError::NotRunning);
        }
        if data.len() > self.buffer_size {
            return Err(PublishError::TooLarge {
                len: data.len(),
                max: self.buffer_size,
            });
        }
        self.queue.push(data.to_vec());
        Ok(())
    }

    /// Stop both workers, close the listener and every subscriber socket, and
    /// destroy every owned region.
    pub fn destroy(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.accept_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.dispatch_thread.take() {
            let _ = t.join();
        }
        // Dropping each Subscription closes its socket and, since the
        // publisher owns every region it hands out, destroys the region.
        self.registry.subs.lock().unwrap().clear();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Bind a TCP listener on all interfaces with `SO_REUSEADDR` set, matching
/// the publisher's `init` contract (§4.3).
fn bind_reuseaddr(port: u16) -> std::io::Result<TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

fn generate_region_name() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), REGION_NAME_LEN)
}

#[cfg(unix)]
fn poll_readable(listener_fd: std::os::unix::io::RawFd, subs: &[std::os::unix::io::RawFd]) -> std::io::Result<(bool, Vec<bool>)> {
    use crate::platform::posix::poll_readable as raw_poll;
    let mut fds = Vec::with_capacity(1 + subs.len());
    fds.push(listener_fd);
    fds.extend_from_slice(subs);
    let ready = raw_poll(&fds, ACCEPT_POLL_TIMEOUT_MS)?;
    Ok((ready[0], ready[1..].to_vec()))
}

#[cfg(windows)]
fn poll_readable(
    listener_sock: windows_sys::Win32::Networking::WinSock::SOCKET,
    subs: &[windows_sys::Win32::Networking::WinSock::SOCKET],
) -> std::io::Result<(bool, Vec<bool>)> {
    use crate::platform::windows::poll_readable as raw_poll;
    let mut socks = Vec::with_capacity(1 + subs.len());
    socks.push(listener_sock);
    socks.extend_from_slice(subs);
    let ready = raw_poll(&socks, ACCEPT_POLL_TIMEOUT_MS)?;
    Ok((ready[0], ready[1..].to_vec()))
}

fn accept_worker(
    listener: TcpListener,
    registry: Arc<Registry>,
    buffer_size: usize,
    running: Arc<AtomicBool>,
) {
    #[cfg(unix)]
    use std::os::unix::io::AsRawFd;
    #[cfg(windows)]
    use std::os::windows::io::AsRawSocket;

    while running.load(Ordering::SeqCst) {
        #[cfg(unix)]
        let listener_fd = listener.as_raw_fd();
        #[cfg(windows)]
        let listener_fd = listener.as_raw_socket() as windows_sys::Win32::Networking::WinSock::SOCKET;

        let sub_fds: Vec<_> = {
            let subs = registry.subs.lock().unwrap();
            #[cfg(unix)]
            {
                subs.iter().map(|s| s.stream.as_raw_fd()).collect()
            }
            #[cfg(windows)]
            {
                subs.iter()
                    .map(|s| s.stream.as_raw_socket() as windows_sys::Win32::Networking::WinSock::SOCKET)
                    .collect()
            }
        };

        let (listener_ready, sub_ready) = match poll_readable(listener_fd, &sub_fds) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("accept worker poll failed: {e}");
                std::thread::sleep(Duration::from_millis(ACCEPT_POLL_TIMEOUT_MS as u64));
                continue;
            }
        };

        if listener_ready {
            match listener.accept() {
                Ok((stream, _addr)) => handle_new_connection(stream, &registry, buffer_size),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => log::debug!("accept failed: {e}"),
            }
        }

        if sub_ready.iter().any(|&r| r) {
            let mut subs = registry.subs.lock().unwrap();
            // sub_fds was built from this same lock just above with no
            // intervening mutation, so positions still line up.
            let mut ready_iter = sub_ready.iter();
            subs.retain(|_| !*ready_iter.next().unwrap_or(&false));
        }
    }
}

fn handle_new_connection(mut stream: TcpStream, registry: &Arc<Registry>, buffer_size: usize) {
    let name = generate_region_name();
    let region = match SharedRegion::create(&name, buffer_size) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("failed to create shared region for new subscriber: {e}");
            return;
        }
    };

    // A clone shares the underlying descriptor (and its O_NONBLOCK flag) with
    // `stream`; the clone goes into the registry, `stream` stays here to send
    // the handshake. The registry entry must exist before the handshake is on
    // the wire (SPEC_FULL.md §3, §4.3): otherwise a subscriber can attach and
    // the dispatch worker can fan out a publish before this region is
    // registered, silently dropping it for this subscriber.
    let registry_handle = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::debug!("failed to clone subscriber socket, dropping subscriber: {e}");
            return;
        }
    };
    if let Err(e) = stream.set_nonblocking(true) {
        log::debug!("failed to set subscriber socket nonblocking: {e}");
    }

    registry.subs.lock().unwrap().push(Subscription {
        stream: registry_handle,
        region: Arc::new(region),
    });

    let handshake = format!("{name} {buffer_size}\n");
    if let Err(e) = stream.write_all(handshake.as_bytes()) {
        log::debug!("failed to send handshake to subscriber: {e}");
    }
}

fn dispatch_worker(queue: Arc<PendingQueue>, registry: Arc<Registry>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let payload = match queue.pop_wait(DISPATCH_QUEUE_TIMEOUT) {
            Some(p) => p,
            None => continue,
        };
        let subs = registry.subs.lock().unwrap();
        for sub in subs.iter() {
            if let Err(e) = sub.region.write(&payload) {
                log::debug!("fan-out write failed for region {}: {e}", sub.region.name());
            }
        }
    }
}
