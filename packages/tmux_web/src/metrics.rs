//! Server metrics for observability
//!
//! Counters are bumped from the transport and the REST handlers and served
//! as a JSON snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Connections closed with 1011 because attach returned nothing
    pub attach_failures: AtomicU64,

    // PTY metrics
    /// Attach clients that exited on their own
    pub pty_exits: AtomicU64,
    /// Connections torn down after a failed PTY write
    pub write_failures: AtomicU64,

    // Frame metrics
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,

    // Session metrics (REST only)
    pub sessions_created: AtomicU64,
    pub sessions_killed: AtomicU64,
    pub sessions_renamed: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn attach_failed(&self) {
        self.attach_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pty_exited(&self) {
        self.pty_exits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_killed(&self) {
        self.sessions_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_renamed(&self) {
        self.sessions_renamed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                attach_failures: self.attach_failures.load(Ordering::Relaxed),
            },
            pty: PtyMetrics {
                exits: self.pty_exits.load(Ordering::Relaxed),
                write_failures: self.write_failures.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                sent: self.frames_sent.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            },
            sessions: SessionMetrics {
                created: self.sessions_created.load(Ordering::Relaxed),
                killed: self.sessions_killed.load(Ordering::Relaxed),
                renamed: self.sessions_renamed.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub pty: PtyMetrics,
    pub frames: FrameMetrics,
    pub sessions: SessionMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub attach_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyMetrics {
    pub exits: u64,
    pub write_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub sent: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub created: u64,
    pub killed: u64,
    pub renamed: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// Connections currently bound to a live PTY
    pub connections: u64,
    pub uptime_secs: u64,
}
