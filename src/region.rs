// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The shared-memory triple buffer: a named region holding a header (process-
// shared mutex, condvar, generation counter, slot indices, slot lengths)
// followed by three payload slots. One publisher creates and owns a region
// per subscriber connection; the subscriber attaches to it.

use std::io;
use std::ptr;
use std::time::{Duration, SystemTime};

use crate::{ShmHandle, ShmOpenMode};

#[cfg(unix)]
use crate::platform::posix;

/// Number of rotating payload slots in a region.
pub const NUM_SLOTS: usize = 3;

#[cfg(unix)]
#[repr(C)]
struct Header {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    generation: u64,
    read_idx: i32,
    write_idx: i32,
    lengths: [i32; NUM_SLOTS],
}

// Windows has no mapping-embeddable mutex/condvar (§10.5); the header starts
// directly at `generation` and the primitives live as named kernel objects.
#[cfg(windows)]
#[repr(C)]
struct Header {
    generation: u64,
    read_idx: i32,
    write_idx: i32,
    lengths: [i32; NUM_SLOTS],
}

fn header_size() -> usize {
    std::mem::size_of::<Header>()
}

/// Outcome of [`SharedRegion::wait_and_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A new message is available in `slot`, `len` bytes long.
    Message { slot: usize, len: usize },
    /// No new message arrived before the deadline.
    Timeout,
}

/// A named, file-backed shared memory region dedicated to one subscriber
/// connection: a header followed by [`NUM_SLOTS`] payload slots of
/// `buffer_size` bytes each.
pub struct SharedRegion {
    name: String,
    buffer_size: usize,
    owned: bool,
    shm: ShmHandle,
    #[cfg(windows)]
    win_mutex: crate::platform::windows::RegionMutex,
    #[cfg(windows)]
    win_cond: crate::platform::windows::RegionCond,
}

// The region is shared across processes/threads by construction; all access
// to its header fields is serialized through the embedded mutex.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    fn total_size(buffer_size: usize) -> usize {
        header_size() + NUM_SLOTS * buffer_size
    }

    fn header_ptr(&self) -> *mut Header {
        self.shm.get() as *mut Header
    }

    fn slot_ptr(&self, idx: usize) -> *mut u8 {
        unsafe { self.shm.get().add(header_size() + idx * self.buffer_size) }
    }

    /// The region's name, usable by an attacher to open it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The maximum payload length per slot.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// `true` if this handle created the region (and is responsible for
    /// destroying its primitives and unlinking its name).
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Create and own a fresh region, initializing its header primitives.
    pub fn create(name: &str, buffer_size: usize) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, Self::total_size(buffer_size), ShmOpenMode::Create)?;

        #[cfg(unix)]
        {
            let hdr = shm.get() as *mut Header;
            unsafe {
                ptr::write_bytes(ptr::addr_of_mut!((*hdr).mutex), 0, 1);
                ptr::write_bytes(ptr::addr_of_mut!((*hdr).cond), 0, 1);
            }
            if let Err(e) = unsafe { posix::region_init_mutex(ptr::addr_of_mut!((*hdr).mutex)) } {
                ShmHandle::clear_storage(name);
                return Err(e);
            }
            if let Err(e) = unsafe { posix::region_init_cond(ptr::addr_of_mut!((*hdr).cond)) } {
                unsafe { libc::pthread_mutex_destroy(ptr::addr_of_mut!((*hdr).mutex)) };
                ShmHandle::clear_storage(name);
                return Err(e);
            }
            unsafe {
                (*hdr).generation = 0;
                (*hdr).read_idx = 0;
                (*hdr).write_idx = 0;
                (*hdr).lengths = [0; NUM_SLOTS];
            }
        }

        #[cfg(windows)]
        let (win_mutex, win_cond) = {
            let win_mutex = crate::platform::windows::RegionMutex::open(name)?;
            let win_cond = match crate::platform::windows::RegionCond::open(name) {
                Ok(c) => c,
                Err(e) => {
                    ShmHandle::clear_storage(name);
                    return Err(e);
                }
            };
            let hdr = shm.get() as *mut Header;
            unsafe {
                (*hdr).generation = 0;
                (*hdr).read_idx = 0;
                (*hdr).write_idx = 0;
                (*hdr).lengths = [0; NUM_SLOTS];
            }
            (win_mutex, win_cond)
        };

        Ok(Self {
            name: name.to_string(),
            buffer_size,
            owned: true,
            shm,
            #[cfg(windows)]
            win_mutex,
            #[cfg(windows)]
            win_cond,
        })
    }

    /// Attach to a region the creator already set up. `buffer_size` must
    /// match the value the creator passed to [`SharedRegion::create`].
    pub fn attach(name: &str, buffer_size: usize) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, Self::total_size(buffer_size), ShmOpenMode::Open)?;

        #[cfg(windows)]
        let win_mutex = crate::platform::windows::RegionMutex::open(name)?;
        #[cfg(windows)]
        let win_cond = crate::platform::windows::RegionCond::open(name)?;

        Ok(Self {
            name: name.to_string(),
            buffer_size,
            owned: false,
            shm,
            #[cfg(windows)]
            win_mutex,
            #[cfg(windows)]
            win_cond,
        })
    }

    fn lock(&self) -> io::Result<()> {
        #[cfg(unix)]
        unsafe {
            posix::region_lock(ptr::addr_of_mut!((*self.header_ptr()).mutex))
        }
        #[cfg(windows)]
        {
            self.win_mutex.lock()
        }
    }

    fn unlock(&self) -> io::Result<()> {
        #[cfg(unix)]
        unsafe {
            posix::region_unlock(ptr::addr_of_mut!((*self.header_ptr()).mutex))
        }
        #[cfg(windows)]
        {
            self.win_mutex.unlock()
        }
    }

    fn signal(&self) -> io::Result<()> {
        #[cfg(unix)]
        unsafe {
            posix::region_signal(ptr::addr_of_mut!((*self.header_ptr()).cond))
        }
        #[cfg(windows)]
        {
            self.win_cond.signal()
        }
    }

    /// Wait on the condvar until signalled or `deadline`. The header mutex
    /// must be held by the calling thread on entry and is held again on
    /// return, in both the signalled and timed-out cases.
    fn wait_until(&self, deadline: SystemTime) -> io::Result<bool> {
        #[cfg(unix)]
        unsafe {
            posix::region_wait_until(
                ptr::addr_of_mut!((*self.header_ptr()).cond),
                ptr::addr_of_mut!((*self.header_ptr()).mutex),
                deadline,
            )
        }
        #[cfg(windows)]
        {
            self.win_mutex.unlock()?;
            let remaining = deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);
            let ms = remaining.as_millis().min(u128::from(u32::MAX)) as u32;
            let signalled = self.win_cond.wait(ms);
            self.win_mutex.lock()?;
            signalled
        }
    }

    /// Select the slot neither `read_idx` nor `write_idx`, copy `data` into
    /// it, then publish the new `write_idx` and bump `generation` under the
    /// header's mutex. `data.len()` must not exceed `buffer_size()`.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        assert!(
            data.len() <= self.buffer_size,
            "payload of {} bytes exceeds region buffer_size {}",
            data.len(),
            self.buffer_size
        );

        self.lock()?;
        let (read_idx, write_idx) = unsafe { ((*self.header_ptr()).read_idx, (*self.header_ptr()).write_idx) };
        self.unlock()?;

        let new_idx = select_write_index(read_idx, write_idx);
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.slot_ptr(new_idx), data.len());
            (*self.header_ptr()).lengths[new_idx] = data.len() as i32;
        }

        self.lock()?;
        unsafe {
            (*self.header_ptr()).write_idx = new_idx as i32;
            (*self.header_ptr()).generation = (*self.header_ptr()).generation.wrapping_add(1);
        }
        self.signal()?;
        self.unlock()?;
        Ok(())
    }

    /// Block until a new generation is published or `timeout` elapses. On
    /// success, advances `read_idx` to the published `write_idx` and returns
    /// its slot and length; the payload itself is read separately via
    /// [`SharedRegion::slot_slice`] once the mutex is released.
    pub fn wait_and_snapshot(&self, timeout: Duration) -> io::Result<WaitOutcome> {
        let deadline = SystemTime::now() + timeout;
        self.lock()?;
        let prev = unsafe { (*self.header_ptr()).generation };
        loop {
            if unsafe { (*self.header_ptr()).generation } != prev {
                break;
            }
            if !self.wait_until(deadline)? {
                self.unlock()?;
                return Ok(WaitOutcome::Timeout);
            }
        }
        let (idx, len) = unsafe {
            let hdr = self.header_ptr();
            let idx = (*hdr).write_idx;
            (*hdr).read_idx = idx;
            (idx, (*hdr).lengths[idx as usize] as usize)
        };
        self.unlock()?;
        Ok(WaitOutcome::Message {
            slot: idx as usize,
            len,
        })
    }

    /// Borrow the bytes resident in `slot`. The caller must not retain the
    /// slice beyond its immediate use — the publisher may overwrite any slot
    /// other than the one last returned by `wait_and_snapshot` at any time.
    pub fn slot_slice(&self, slot: usize, len: usize) -> &[u8] {
        debug_assert!(slot < NUM_SLOTS);
        debug_assert!(len <= self.buffer_size);
        unsafe { std::slice::from_raw_parts(self.slot_ptr(slot), len) }
    }
}

/// The single index in `{0,1,2}` that is neither `read_idx` nor `write_idx`.
/// Always exists: three slots strictly exceed two forbidden indices.
fn select_write_index(read_idx: i32, write_idx: i32) -> usize {
    (0..NUM_SLOTS as i32)
        .find(|&i| i != read_idx && i != write_idx)
        .expect("three slots always leave one free of at most two forbidden indices")
        as usize
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owned {
            #[cfg(unix)]
            unsafe {
                posix::region_destroy_primitives(
                    ptr::addr_of_mut!((*self.header_ptr()).mutex),
                    ptr::addr_of_mut!((*self.header_ptr()).cond),
                );
            }
            ShmHandle::clear_storage(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_region_{n}_{}", std::process::id())
    }

    #[test]
    fn slot_selection_law_covers_every_state() {
        for r in 0..NUM_SLOTS as i32 {
            for w in 0..NUM_SLOTS as i32 {
                let idx = select_write_index(r, w);
                assert_ne!(idx as i32, r);
                assert_ne!(idx as i32, w);
            }
        }
    }

    #[test]
    fn create_then_attach_round_trips_a_write() {
        let name = unique_name("rt");
        let publisher = SharedRegion::create(&name, 64).expect("create");
        let subscriber = SharedRegion::attach(&name, 64).expect("attach");

        publisher.write(b"hello").expect("write");
        match subscriber
            .wait_and_snapshot(Duration::from_millis(500))
            .expect("wait")
        {
            WaitOutcome::Message { slot, len } => {
                assert_eq!(subscriber.slot_slice(slot, len), b"hello");
            }
            WaitOutcome::Timeout => panic!("expected a message"),
        }
    }

    #[test]
    fn wait_times_out_with_no_publish() {
        let name = unique_name("to");
        let region = SharedRegion::create(&name, 32).expect("create");
        let outcome = region
            .wait_and_snapshot(Duration::from_millis(50))
            .expect("wait");
        assert_eq!(outcome, WaitOutcome::Timeout);
    }

    #[test]
    fn generation_is_monotonic_across_publishes() {
        let name = unique_name("mono");
        let publisher = SharedRegion::create(&name, 16).expect("create");
        let subscriber = SharedRegion::attach(&name, 16).expect("attach");

        let mut last_gen = 0u64;
        for i in 0..5u8 {
            publisher.write(&[i]).expect("write");
            subscriber
                .wait_and_snapshot(Duration::from_millis(500))
                .expect("wait");
            let gen = unsafe { (*subscriber.header_ptr()).generation };
            assert!(gen > last_gen);
            last_gen = gen;
        }
    }
}
