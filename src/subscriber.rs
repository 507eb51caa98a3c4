// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Subscriber: connects to a publisher's TCP control channel, performs the
// handshake, attaches to the announced shared region, and runs a background
// consumer that invokes a user callback on each new message.

use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::SubscriberInitError;
use crate::region::{SharedRegion, WaitOutcome};

const CONSUMER_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

type Callback = dyn Fn(&[u8]) + Send + Sync + 'static;

/// Connects to a [`crate::Publisher`] on `127.0.0.1:port`, attaches to the
/// shared region it hands out, and invokes `callback` with every message
/// published thereafter.
///
/// `Inert -> Connecting -> Attached -> Running -> Stopping -> Stopped`; see
/// SPEC §4.2. A `Subscriber` starts `Inert` and performs no network activity
/// until [`Subscriber::init`] is called.
pub struct Subscriber {
    port: u16,
    callback: Arc<Callback>,
    stream: Option<TcpStream>,
    region: Option<Arc<SharedRegion>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Create an inert handle. No network activity occurs until [`Self::init`].
    pub fn new<F>(port: u16, callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self {
            port,
            callback: Arc::new(callback),
            stream: None,
            region: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// `true` once [`Self::init`] has attached a region and started the
    /// consumer thread.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Connect, handshake, attach to the announced region, and start the
    /// consumer thread.
    pub fn init(&mut self) -> Result<(), SubscriberInitError> {
        let stream =
            TcpStream::connect(("127.0.0.1", self.port)).map_err(SubscriberInitError::NoSocket)?;

        let (region_name, buffer_size) = read_handshake(&stream)?;

        let region = SharedRegion::attach(&region_name, buffer_size)
            .map_err(SubscriberInitError::NoSharedMem)?;
        let region = Arc::new(region);

        self.shutdown.store(false, Ordering::SeqCst);
        let worker = {
            let region = Arc::clone(&region);
            let callback = Arc::clone(&self.callback);
            let shutdown = Arc::clone(&self.shutdown);
            std::thread::spawn(move || consumer_loop(region, callback, shutdown))
        };

        self.stream = Some(stream);
        self.region = Some(region);
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the consumer, close the socket, and detach the region. Safe to
    /// call from any state, any number of times.
    pub fn destroy(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.stream = None;
        self.region = None;
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Read the handshake line and validate `<region_name> SP <buffer_size> LF`.
/// Exactly one space is required; any other shape is `BadResponse`.
fn read_handshake(stream: &TcpStream) -> Result<(String, usize), SubscriberInitError> {
    let mut reader = BufReader::new(stream.try_clone().map_err(SubscriberInitError::NoSocket)?);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(SubscriberInitError::NoSocket)?;

    let trimmed = line.strip_suffix('\n').ok_or(SubscriberInitError::BadResponse)?;
    if trimmed.matches(' ').count() != 1 {
        return Err(SubscriberInitError::BadResponse);
    }
    let (name, size_str) = trimmed.split_once(' ').ok_or(SubscriberInitError::BadResponse)?;
    if name.is_empty() {
        return Err(SubscriberInitError::BadResponse);
    }
    let buffer_size: usize = size_str
        .parse()
        .map_err(|_| SubscriberInitError::BadResponse)?;
    if buffer_size == 0 {
        return Err(SubscriberInitError::BadResponse);
    }

    Ok((name.to_string(), buffer_size))
}

fn consumer_loop(region: Arc<SharedRegion>, callback: Arc<Callback>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match region.wait_and_snapshot(CONSUMER_WAIT_TIMEOUT) {
            Ok(WaitOutcome::Timeout) => continue,
            Ok(WaitOutcome::Message { slot, len }) => {
                let bytes = region.slot_slice(slot, len);
                callback(bytes);
            }
            Err(e) => {
                log::debug!("subscriber consumer loop fault (best-effort, continuing): {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_requires_exactly_one_space() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            use std::io::Write;
            s.write_all(b"abc\n").unwrap();
        });
        let stream = TcpStream::connect(addr).unwrap();
        let result = read_handshake(&stream);
        handle.join().unwrap();
        assert!(matches!(result, Err(SubscriberInitError::BadResponse)));
    }

    #[test]
    fn handshake_parses_well_formed_line() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let name: String = "A".repeat(32);
        let expected_name = name.clone();
        let handle = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            use std::io::Write;
            s.write_all(format!("{name} 1024\n").as_bytes()).unwrap();
        });
        let stream = TcpStream::connect(addr).unwrap();
        let (got_name, got_size) = read_handshake(&stream).expect("valid handshake");
        handle.join().unwrap();
        assert_eq!(got_name, expected_name);
        assert_eq!(got_size, 1024);
    }

    #[test]
    fn handshake_rejects_multiple_spaces() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            use std::io::Write;
            s.write_all(b"name  1024\n").unwrap();
        });
        let stream = TcpStream::connect(addr).unwrap();
        let result = read_handshake(&stream);
        handle.join().unwrap();
        assert!(matches!(result, Err(SubscriberInitError::BadResponse)));
    }
}
