//! Connection Module
//!
//! Per-client state and the bookkeeping around it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionRegistry                         │
//! │          DashMap<ConnectionId, Arc<Connection>>             │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │ lookup               │ purge_idle           │ remove
//!         ▼                      ▼                      ▼
//!   ┌───────────┐         ┌─────────────┐        ┌─────────────┐
//!   │  workers  │         │ IdleReaper  │        │ reader and  │
//!   │           │         │ (every 10s) │        │ writer tasks│
//!   └───────────┘         └─────────────┘        └─────────────┘
//! ```
//!
//! ## Features
//!
//! - **Read-lock**: at most one worker processes a connection's lines
//! - **Output queue**: encoded replies wait here for the writer task
//! - **Idle purge**: silent clients are closed, busy ones never are
//! - **Statistics**: connection, line and byte counters

pub mod handler;
pub mod reaper;
pub mod registry;

// Re-export commonly used types
pub use handler::{
    Connection, ConnectionError, ConnectionId, ConnectionStats, ReadLock, MAX_PENDING_LINES,
};
pub use reaper::{IdleReaper, ReaperConfig};
pub use registry::ConnectionRegistry;
