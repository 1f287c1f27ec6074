//! One-shot session bootstrap.
//!
//! The first [`InitGuard::initialize`] call moves the session out of
//! `NotStarted`; if a token was persisted it spawns the bootstrap (load tokens,
//! fetch the profile). Every caller, including the first, then waits on the
//! phase channel until the session reads `Initialized`.

use std::{sync::Arc, time::Duration};

use {
    folio_protocol::{PROFILE_PATH, UserProfile},
    tracing::{debug, info, instrument, warn},
};

use crate::{
    gateway::Gateway,
    state::{AuthStatus, InitPhase, SessionState},
    tokens::TokenStore,
};

pub struct InitGuard {
    gateway: Arc<Gateway>,
    tokens: Arc<TokenStore>,
    session: Arc<SessionState>,
    wait_timeout: Duration,
}

impl InitGuard {
    pub fn new(
        gateway: Arc<Gateway>,
        tokens: Arc<TokenStore>,
        session: Arc<SessionState>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            tokens,
            session,
            wait_timeout,
        }
    }

    /// Bring the session to `Initialized` and report who is logged in.
    ///
    /// Safe to call from any number of tasks; at most one bootstrap ever runs.
    /// Waiting is bounded by the configured timeout, after which the session is
    /// marked initialized with whatever state is available.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> AuthStatus {
        if self.session.begin_initialization() {
            if !self.tokens.has_persisted_token() {
                debug!("no persisted token, session is anonymous");
                self.session.mark_initialized();
                return self.session.status();
            }
            info!("restoring persisted session");
            tokio::spawn(bootstrap(
                Arc::clone(&self.gateway),
                Arc::clone(&self.tokens),
                Arc::clone(&self.session),
            ));
        }

        let mut phase = self.session.subscribe_phase();
        let settled = tokio::time::timeout(
            self.wait_timeout,
            phase.wait_for(|p| *p == InitPhase::Initialized),
        )
        .await
        .map(|result| result.is_ok());

        if !matches!(settled, Ok(true)) {
            warn!(
                timeout = ?self.wait_timeout,
                "session bootstrap did not settle in time, continuing with current state"
            );
            self.session.mark_initialized();
        }
        self.session.status()
    }

    pub fn phase(&self) -> InitPhase {
        self.session.phase()
    }
}

/// Runs detached, so it may outlive a force-completed wait. Its writes are
/// tied to the token epoch it started in: once a login or logout has replaced
/// the tokens, the late result is dropped.
async fn bootstrap(gateway: Arc<Gateway>, tokens: Arc<TokenStore>, session: Arc<SessionState>) {
    let epoch = tokens.epoch();
    tokens.load();
    session.restore_selected_account();

    match gateway.get_json::<UserProfile>(PROFILE_PATH).await {
        Ok(user) if tokens.epoch() == epoch => session.set_user(user),
        Ok(_) => debug!("session changed during bootstrap, profile dropped"),
        Err(e) => {
            if tokens.clear_if_epoch(epoch) {
                warn!(error = %e, "failed to restore session, continuing anonymous");
                session.clear_user();
            } else {
                debug!(error = %e, "session changed during bootstrap, failure ignored");
            }
        },
    }
    session.mark_initialized();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        crate::{
            refresh::RefreshCoordinator,
            storage::{Storage, keys},
            test_support::{
                Fixture, ScriptedTransport, bearer, profile, profile_json, respond, secret,
            },
        },
        folio_protocol::REFRESH_PATH,
        futures::future::join_all,
        secrecy::ExposeSecret,
    };

    const WAIT: Duration = Duration::from_secs(10);

    fn guard(fixture: &Fixture, transport: Arc<ScriptedTransport>) -> InitGuard {
        let refresher = RefreshCoordinator::new(
            transport.clone(),
            fixture.tokens.clone(),
            fixture.session.clone(),
        );
        let gateway = Arc::new(Gateway::new(transport, fixture.tokens.clone(), refresher));
        InitGuard::new(gateway, fixture.tokens.clone(), fixture.session.clone(), WAIT)
    }

    /// Tokens on disk from a previous run, nothing loaded yet.
    fn persisted(access: &str, refresh: &str) -> Fixture {
        let fixture = Fixture::new();
        fixture
            .storage
            .set_many(&[(keys::ACCESS_TOKEN, access), (keys::REFRESH_TOKEN, refresh)])
            .unwrap();
        fixture
    }

    fn profile_backend(delay: Duration) -> Arc<ScriptedTransport> {
        Arc::new(
            ScriptedTransport::new(|_| respond(200, profile_json(7, "ada"))).with_delay(delay),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_fetch_profile_once() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::from_millis(100));
        let guard = guard(&fixture, transport.clone());

        let statuses = join_all((0..6).map(|_| guard.initialize())).await;

        assert_eq!(transport.calls(PROFILE_PATH), 1);
        assert_eq!(transport.requests()[0].bearer.as_deref(), Some("a1"));
        for status in &statuses {
            assert_eq!(status.user().unwrap().username, "ada");
        }
        assert_eq!(guard.phase(), InitPhase::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_within_a_few_millis_joins_the_first() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::from_millis(50));
        let guard = Arc::new(guard(&fixture, transport.clone()));

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.initialize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = guard.initialize().await;

        assert!(second.is_authenticated());
        assert_eq!(first.await.unwrap(), second);
        assert_eq!(transport.calls(PROFILE_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_token_is_anonymous_without_requests() {
        let fixture = Fixture::new();
        let transport = profile_backend(Duration::ZERO);
        let guard = guard(&fixture, transport.clone());

        let status = guard.initialize().await;

        assert_eq!(status, AuthStatus::Anonymous);
        assert!(transport.requests().is_empty());
        assert!(fixture.session.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_profile_clears_tokens_but_initializes() {
        let fixture = persisted("a1", "r1");
        let transport = Arc::new(ScriptedTransport::new(|_| {
            respond(500, serde_json::json!({"detail": "down"}))
        }));
        let guard = guard(&fixture, transport);

        let status = guard.initialize().await;

        assert_eq!(status, AuthStatus::Anonymous);
        assert!(fixture.session.is_initialized());
        assert!(fixture.tokens.access_token().is_none());
        assert!(fixture.storage.get(keys::ACCESS_TOKEN).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_refreshed_during_bootstrap() {
        let fixture = persisted("a1", "r1");
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == REFRESH_PATH {
                return respond(200, serde_json::json!({"access": "a2", "refresh": "r2"}));
            }
            match bearer(request).as_deref() {
                Some("a2") => respond(200, profile_json(7, "ada")),
                _ => respond(401, serde_json::json!({"detail": "expired"})),
            }
        }));
        let guard = guard(&fixture, transport.clone());

        let status = guard.initialize().await;

        assert!(status.is_authenticated());
        assert_eq!(transport.calls(REFRESH_PATH), 1);
        assert_eq!(fixture.storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("a2"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_during_bootstrap_is_anonymous() {
        let fixture = persisted("a1", "r1");
        let transport = Arc::new(ScriptedTransport::new(|_| {
            respond(401, serde_json::json!({"detail": "expired"}))
        }));
        let guard = guard(&fixture, transport);

        let status = guard.initialize().await;

        assert_eq!(status, AuthStatus::Anonymous);
        assert!(fixture.session.is_initialized());
        assert!(fixture.storage.get(keys::REFRESH_TOKEN).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_bootstrap_is_force_completed() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::from_secs(60));
        let guard = guard(&fixture, transport);

        let started = tokio::time::Instant::now();
        let status = guard.initialize().await;

        assert_eq!(status, AuthStatus::Anonymous);
        assert!(fixture.session.is_initialized());
        assert!(started.elapsed() >= WAIT);
        assert!(started.elapsed() < Duration::from_secs(60));

        // Nothing replaced the session meanwhile, so the late profile still applies.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(fixture.session.status().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn late_bootstrap_failure_keeps_a_newer_login() {
        let fixture = persisted("a1", "r1");
        let transport = Arc::new(
            ScriptedTransport::new(|_| respond(500, serde_json::json!({"detail": "down"})))
                .with_delay(Duration::from_secs(60)),
        );
        let guard = guard(&fixture, transport);

        assert_eq!(guard.initialize().await, AuthStatus::Anonymous);
        fixture.tokens.set(secret("b1"), secret("s1"));
        fixture.session.set_user(profile(9, "bob"));

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(fixture.tokens.access_token().unwrap().expose_secret(), "b1");
        assert_eq!(fixture.storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("b1"));
        assert_eq!(fixture.session.user().unwrap().username, "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn late_bootstrap_profile_does_not_replace_a_newer_login() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::from_secs(60));
        let guard = guard(&fixture, transport);

        guard.initialize().await;
        fixture.tokens.set(secret("b1"), secret("s1"));
        fixture.session.set_user(profile(9, "bob"));

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(fixture.session.user().unwrap().username, "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_bootstrap_stays_logged_out() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::from_secs(60));
        let guard = guard(&fixture, transport);

        guard.initialize().await;
        fixture.tokens.clear();

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(fixture.session.status(), AuthStatus::Anonymous);
        assert!(fixture.storage.get(keys::ACCESS_TOKEN).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn initialized_is_sticky() {
        let fixture = persisted("a1", "r1");
        let transport = profile_backend(Duration::ZERO);
        let guard = guard(&fixture, transport.clone());

        let first = guard.initialize().await;
        let second = guard.initialize().await;

        assert_eq!(first, second);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restores_selected_account() {
        let fixture = persisted("a1", "r1");
        fixture.storage.set(keys::SELECTED_ACCOUNT, "3").unwrap();
        let guard = guard(&fixture, profile_backend(Duration::ZERO));

        guard.initialize().await;

        assert_eq!(fixture.session.selected_account(), Some(3));
    }
}
