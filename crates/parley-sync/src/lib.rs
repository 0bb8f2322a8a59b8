//! Parley client synchronization core.
//!
//! Reconciles REST snapshots with the push event stream for a one-to-one chat
//! client:
//! - `session`: connection lifecycle and event routing (single event loop)
//! - `store`: per-chat message log with id dedup and monotonic seen merge
//! - `seen`: outbound read receipts, once per message per viewing session
//! - `typing`: debounced local typing signals, auto-expiring remote display
//! - `presence`: online set from snapshots plus join/leave events
//! - `timers`: cancellable delayed actions driving the above

pub mod api;
pub mod config;
pub mod error;
pub mod presence;
pub mod seen;
pub mod session;
pub mod store;
pub mod timers;
pub mod transport;
pub mod typing;

pub use api::{ChatApi, DirectoryEntry, HttpApi};
pub use config::SyncConfig;
pub use error::{ApiError, SyncError};
pub use session::{ConnectionState, SessionController, SessionHandle, SessionUpdate, UserAction};
pub use transport::{Connector, Link, TransportEvent, WsConnector};
