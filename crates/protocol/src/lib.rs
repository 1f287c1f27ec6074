//! Wire types for the portfolio backend.
//!
//! Two collaborators speak these types:
//!
//! - the REST API (`/users/api/...`), see [`auth`] and [`api`];
//! - the transactions real-time channel (`/ws/transactions/`), see [`realtime`].
//!
//! Everything here is plain serde data. Transport, retries and credential
//! handling live in `folio-session`.

pub mod api;
pub mod auth;
pub mod realtime;

pub use {
    api::ErrorBody,
    auth::{
        LOGIN_PATH, LOGOUT_PATH, LoginRequest, LogoutRequest, PROFILE_PATH, REFRESH_PATH,
        RefreshRequest, RefreshResponse, TokenPair, UserProfile,
    },
    realtime::{ClientMessage, ImportError, ImportUpdate, ServerMessage},
};
