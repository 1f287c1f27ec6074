//! Session and connection coordination for the folio portfolio client.
//!
//! Everything the client needs to stay authenticated lives here: the token
//! store, single-flight token refresh, the request gateway that replays
//! requests after a refresh, the bootstrap guard, and the real-time channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  FolioClient                                 │
//! │                                              │
//! │  InitGuard ──► Gateway ──► HttpTransport ────┼──► REST API
//! │     │            │                           │
//! │     │            ▼ 401                       │
//! │     │       RefreshCoordinator (single-flight)│
//! │     ▼            │                           │
//! │  SessionState ◄──┴──► TokenStore ──► Storage │
//! │     ▲                     ▲                  │
//! │     └── ConnectionManager ┘──────────────────┼──► /ws/transactions/
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use folio_session::{FolioClient, storage::MemoryStorage};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = folio_config::FolioConfig::default();
//! let client = FolioClient::new(&config, Arc::new(MemoryStorage::new()))?;
//!
//! let status = client.initialize().await;
//! if status.is_authenticated() {
//!     client.realtime().connect().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod gateway;
pub mod init;
pub mod realtime;
pub mod refresh;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use {
    client::{ClientOptions, FolioClient},
    error::{ApiError, GatewayError, RealtimeError, RefreshError},
    gateway::Gateway,
    init::InitGuard,
    realtime::{ConnectionManager, ConnectionState, RealtimeConfig, RealtimeEvent},
    refresh::RefreshCoordinator,
    state::{AuthStatus, InitPhase, SessionEvent, SessionState},
    storage::{FileStorage, MemoryStorage, Storage},
    tokens::{Credentials, TokenStore},
    transport::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport},
};
