//! # scribe-sync: Client-side real-time document synchronization
//!
//! Keeps a local replica of a text document consistent with a remote
//! authority over one persistent WebSocket. Edits are applied
//! optimistically and transmitted; whatever the authority sends back wins.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► Session ──► SyncStore ──send──► ConnectionManager ◄──► authority
//!               │             ▲                       │
//!               │             └──── apply_inbound ◄───┘ (handler set)
//!               │
//!               └──► DocumentApi (HTTP: list documents, share tokens)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Tagged JSON wire messages
//! - [`connection`]: Debounced connect, backoff reconnect, handler fan-out
//! - [`store`]: Document replica and the inbound reducer
//! - [`session`]: Owner vs guest negotiation
//! - [`api`]: HTTP collaborator endpoints
//! - [`config`]: Defaults and environment overrides
//! - [`error`]: Error types

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use api::{DocumentApi, DocumentSummary, Permission};
pub use config::{BackoffPolicy, ClientConfig, ConnectionConfig};
pub use connection::{
    ConnectTarget, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus,
    MessageHandler, SessionRole, Subscription, NORMAL_CLOSURE,
};
pub use error::{ApiError, ConfigError, SessionError, SyncError};
pub use protocol::{
    ClientMessage, Collaborator, DocumentId, DocumentSnapshot, Image, MessageKind, ProtocolError,
    Role, ServerMessage,
};
pub use session::{GuestAccess, Session};
pub use store::{apply_inbound, DocumentState, StoreState, SyncStore};
