//! Process-wide session state: who is logged in, the bootstrap lifecycle and
//! the selected account.

use std::sync::{Arc, Mutex, PoisonError};

use {
    folio_protocol::UserProfile,
    tokio::sync::{broadcast, watch},
    tracing::{debug, info, warn},
};

use crate::storage::{Storage, keys};

/// Bootstrap lifecycle. A single enum so "initializing and initialized" can't
/// both be true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    Initializing,
    Initialized,
}

/// What the host sees after initialization.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    Anonymous,
    Authenticated(UserProfile),
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Anonymous => None,
        }
    }
}

/// Session-level notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    LoggedOut,
    /// Tokens could not be refreshed; the host should ask for a new login.
    Ended { reason: String },
}

const EVENT_CAPACITY: usize = 32;

#[derive(Default)]
struct Inner {
    user: Option<UserProfile>,
    selected_account: Option<i64>,
}

pub struct SessionState {
    storage: Arc<dyn Storage>,
    inner: Mutex<Inner>,
    phase: watch::Sender<InitPhase>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (phase, _) = watch::channel(InitPhase::NotStarted);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            inner: Mutex::new(Inner::default()),
            phase,
            events,
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    pub fn phase(&self) -> InitPhase {
        *self.phase.borrow()
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == InitPhase::Initialized
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<InitPhase> {
        self.phase.subscribe()
    }

    /// Move `NotStarted → Initializing`. Returns `true` for exactly one caller.
    pub fn begin_initialization(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == InitPhase::NotStarted {
                *phase = InitPhase::Initializing;
                true
            } else {
                false
            }
        })
    }

    /// Mark the bootstrap as settled. `Initialized` is sticky.
    pub fn mark_initialized(&self) {
        let previous = self.phase.send_replace(InitPhase::Initialized);
        if previous != InitPhase::Initialized {
            debug!(?previous, "session initialized");
        }
    }

    // ── user ────────────────────────────────────────────────────────────────

    pub fn set_user(&self, user: UserProfile) {
        info!(user_id = user.id, username = %user.username, "session user set");
        self.inner().user = Some(user);
    }

    pub fn clear_user(&self) {
        self.inner().user = None;
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner().user.clone()
    }

    pub fn status(&self) -> AuthStatus {
        match self.user() {
            Some(user) => AuthStatus::Authenticated(user),
            None => AuthStatus::Anonymous,
        }
    }

    // ── selected account ────────────────────────────────────────────────────

    pub fn selected_account(&self) -> Option<i64> {
        self.inner().selected_account
    }

    /// Select an account and persist the choice.
    pub fn select_account(&self, account_id: Option<i64>) -> anyhow::Result<()> {
        match account_id {
            Some(id) => self.storage.set(keys::SELECTED_ACCOUNT, &id.to_string())?,
            None => self.storage.delete(keys::SELECTED_ACCOUNT)?,
        }
        self.inner().selected_account = account_id;
        debug!(?account_id, "selected account changed");
        Ok(())
    }

    /// Pick up the persisted account selection, if any.
    pub fn restore_selected_account(&self) -> Option<i64> {
        let restored = match self.storage.get(keys::SELECTED_ACCOUNT) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(value = %raw, "ignoring unparsable selected account");
                    None
                },
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read selected account");
                None
            },
        };
        self.inner().selected_account = restored;
        restored
    }

    // ── events ──────────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Drop the user and tell the host the session is over.
    pub fn end_session(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.clear_user();
        warn!(%reason, "session ended");
        self.emit(SessionEvent::Ended { reason });
    }
}
