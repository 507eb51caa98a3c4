// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Narrow, per-surface error enums (see SPEC §6, §7).

use std::io;
use thiserror::Error;

/// Failure returned by [`crate::Publisher::init`].
#[derive(Error, Debug)]
pub enum PublisherInitError {
    #[error("failed to create the listening socket: {0}")]
    NoSocket(#[source] io::Error),
}

/// Failure returned by [`crate::Publisher::publish`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    #[error("payload of {len} bytes exceeds the region's buffer size of {max} bytes")]
    TooLarge { len: usize, max: usize },
    #[error("publisher has not been initialized (or has been torn down)")]
    NotRunning,
}

/// Failure returned by [`crate::Subscriber::init`].
#[derive(Error, Debug)]
pub enum SubscriberInitError {
    #[error("failed to connect to the publisher: {0}")]
    NoSocket(#[source] io::Error),
    #[error("handshake line was malformed")]
    BadResponse,
    #[error("failed to attach the shared region: {0}")]
    NoSharedMem(#[source] io::Error),
}
