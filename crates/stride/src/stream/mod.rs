//! Streaming client for the remote phase-segmentation service.
//!
//! Each session owns one connection, driven by an actor task (see [`StreamHandle`]). Only the
//! newest landmark frame waits for the actor; it replaces any frame still pending. Frames that
//! exceed the send rate or arrive while no test is running are dropped rather than buffered.
//! Inbound messages are folded into a [`SessionState`] by a single reducer and published through
//! a watch channel.
//!
//! Connections are never re-established automatically. A lost connection shows up as
//! [`ConnectionStatus::Disconnected`].

mod client;
pub mod limiter;
pub mod protocol;
mod registry;
pub mod state;
mod transport;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use client::StreamHandle;
pub use registry::ConnectionRegistry;
pub use state::{ConnectionStatus, PhaseState, SessionState};
pub use transport::{in_memory, MemoryPeer, Transport};

/// Locally generated identifier of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration of a streaming connection.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    url: String,
    max_send_rate: f32,
    ping_interval: Duration,
    queue_depth: usize,
}

impl StreamOptions {
    pub fn new<U: Into<String>>(url: U) -> Self {
        Self {
            url: url.into(),
            max_send_rate: 20.0,
            ping_interval: Duration::from_secs(10),
            queue_depth: 8,
        }
    }

    /// Sets the maximum number of `frame_data` messages sent per second.
    pub fn max_send_rate(self, max_send_rate: f32) -> Self {
        Self {
            max_send_rate,
            ..self
        }
    }

    pub fn ping_interval(self, ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            ..self
        }
    }

    /// Sets how many control messages (`start_test`, `stop_test`, close) may wait for the
    /// connection actor before callers have to wait.
    pub fn queue_depth(self, queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            ..self
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
