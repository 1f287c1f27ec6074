//! Single-flight access token renewal.
//!
//! However many requests hit a 401 at the same time, only one refresh call is
//! made. The first caller starts it; everyone arriving while it runs parks a
//! oneshot sender in the queue and receives a clone of the same outcome.
//!
//! The network call runs on its own task, so the queue is drained even when
//! the caller that started it is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use {
    folio_protocol::{REFRESH_PATH, RefreshRequest, RefreshResponse},
    secrecy::{ExposeSecret, SecretString},
    tokio::sync::oneshot,
    tracing::{debug, info, instrument, warn},
};

use crate::{
    error::RefreshError,
    state::SessionState,
    tokens::TokenStore,
    transport::{ApiRequest, HttpTransport},
};

/// Result every waiter of one refresh receives.
pub type RefreshOutcome = Result<SecretString, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    session: Arc<SessionState>,
    state: Arc<Mutex<RefreshState>>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        session: Arc<SessionState>,
    ) -> Self {
        Self {
            transport,
            tokens,
            session,
            state: Arc::new(Mutex::new(RefreshState::Idle)),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*lock(&self.state), RefreshState::Refreshing { .. })
    }

    /// Obtain a new access token, joining the in-flight refresh if there is one.
    ///
    /// On failure tokens and user are already cleared and
    /// [`SessionEvent::Ended`](crate::SessionEvent::Ended) has been published,
    /// unless a logout or login replaced the tokens while the call was in
    /// flight; then nothing is written and [`RefreshError::Superseded`] or the
    /// original error is returned.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { mut waiters } => {
                    waiters.push(tx);
                    debug!(waiting = waiters.len(), "joining in-flight token refresh");
                    *state = RefreshState::Refreshing { waiters };
                    false
                },
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                },
            }
        };

        if leader {
            let task = RefreshTask {
                transport: Arc::clone(&self.transport),
                tokens: Arc::clone(&self.tokens),
                session: Arc::clone(&self.session),
                state: Arc::clone(&self.state),
            };
            tokio::spawn(task.run());
        }

        rx.await.unwrap_or(Err(RefreshError::Aborted))
    }
}

struct RefreshTask {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    session: Arc<SessionState>,
    state: Arc<Mutex<RefreshState>>,
}

impl RefreshTask {
    async fn run(self) {
        let (credentials, epoch) = self.tokens.snapshot();
        let outcome = self.renew(credentials.refresh, epoch).await;
        match &outcome {
            Ok(_) => info!("access token refreshed"),
            Err(RefreshError::Superseded) => {
                debug!("session changed while refreshing, result dropped");
            },
            Err(e) => {
                if self.tokens.clear_if_epoch(epoch) {
                    warn!(error = %e, "token refresh failed, ending session");
                    self.session.end_session(e.to_string());
                } else {
                    debug!(error = %e, "token refresh failed for a session that is already gone");
                }
            },
        }

        let waiters = match std::mem::replace(&mut *lock(&self.state), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        debug!(waiters = waiters.len(), "releasing refresh waiters");
        for waiter in waiters {
            // A waiter whose caller went away is not an error.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn renew(&self, refresh: Option<SecretString>, epoch: u64) -> RefreshOutcome {
        let refresh = refresh.ok_or(RefreshError::MissingRefreshToken)?;

        let request = ApiRequest::post(REFRESH_PATH, &RefreshRequest {
            refresh: refresh.expose_secret().clone(),
        })
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(RefreshError::Rejected(response.status));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if body.access.is_empty() {
            return Err(RefreshError::Malformed("empty access token".into()));
        }

        let access = SecretString::new(body.access);
        let refresh = body
            .refresh
            .filter(|r| !r.is_empty())
            .map(SecretString::new)
            .unwrap_or(refresh);
        if !self.tokens.set_if_epoch(epoch, access.clone(), refresh) {
            return Err(RefreshError::Superseded);
        }
        Ok(access)
    }
}
