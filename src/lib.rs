// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-host publish/subscribe transport: a TCP control channel carries a
// one-line handshake, a shared-memory triple buffer carries the data. See
// SPEC_FULL.md for the full protocol.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod error;
pub use error::{PublishError, PublisherInitError, SubscriberInitError};

pub mod region;
pub use region::{SharedRegion, WaitOutcome};

mod subscriber;
pub use subscriber::Subscriber;

mod publisher;
pub use publisher::Publisher;
