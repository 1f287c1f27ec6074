//! The client facade wiring the session components together.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    folio_config::FolioConfig,
    folio_protocol::{
        LOGIN_PATH, LOGOUT_PATH, LoginRequest, LogoutRequest, PROFILE_PATH, TokenPair,
        UserProfile,
    },
    secrecy::{ExposeSecret, SecretString},
    tokio::sync::broadcast,
    tracing::{info, instrument, warn},
};

use crate::{
    error::{ApiError, GatewayError},
    gateway::Gateway,
    init::InitGuard,
    realtime::{ConnectionManager, RealtimeConfig},
    refresh::RefreshCoordinator,
    state::{AuthStatus, SessionEvent, SessionState},
    storage::Storage,
    tokens::TokenStore,
    transport::{ApiRequest, HttpTransport, ReqwestTransport},
};

/// Timing knobs that don't belong to the HTTP transport.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub realtime: RealtimeConfig,
    pub init_wait_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &FolioConfig) -> anyhow::Result<Self> {
        let mut realtime = RealtimeConfig::new(config.realtime_url()?);
        realtime.connect_timeout = config.connect_timeout();
        realtime.reconnect_delay = config.reconnect_delay();
        Ok(Self {
            realtime,
            init_wait_timeout: config.init_wait_timeout(),
        })
    }
}

/// One independent client session.
///
/// Nothing here is global: every instance has its own tokens, session state,
/// refresh queue and real-time connection.
pub struct FolioClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    session: Arc<SessionState>,
    gateway: Arc<Gateway>,
    init: InitGuard,
    realtime: ConnectionManager,
}

impl FolioClient {
    /// Build a client talking to the API in `config` over HTTP.
    pub fn new(config: &FolioConfig, storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.api_url.as_str(), config.request_timeout())
            .context("failed to build HTTP client")?;
        let options = ClientOptions::from_config(config)?;
        Ok(Self::with_transport(Arc::new(transport), storage, options))
    }

    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn Storage>,
        options: ClientOptions,
    ) -> Self {
        let tokens = Arc::new(TokenStore::new(Arc::clone(&storage)));
        let session = Arc::new(SessionState::new(storage));
        let refresher = RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&tokens),
            Arc::clone(&session),
        );
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&transport),
            Arc::clone(&tokens),
            refresher,
        ));
        let init = InitGuard::new(
            Arc::clone(&gateway),
            Arc::clone(&tokens),
            Arc::clone(&session),
            options.init_wait_timeout,
        );
        let realtime =
            ConnectionManager::new(options.realtime, Arc::clone(&tokens), Arc::clone(&session));

        Self {
            transport,
            tokens,
            session,
            gateway,
            init,
            realtime,
        }
    }

    /// Restore the persisted session once; see [`InitGuard::initialize`].
    pub async fn initialize(&self) -> AuthStatus {
        self.init.initialize().await
    }

    /// Exchange credentials for a token pair and load the profile.
    ///
    /// A rejected login is an ordinary [`GatewayError::Api`]; it never goes
    /// through token refresh.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<UserProfile, GatewayError> {
        let request = ApiRequest::post(LOGIN_PATH, &LoginRequest {
            username: username.to_string(),
            password: password.expose_secret().clone(),
        })
        .map_err(GatewayError::Encode)?;
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            warn!(status = response.status, "login rejected");
            return Err(ApiError::from(response).into());
        }
        let pair: TokenPair = response.json()?;
        self.tokens
            .set(SecretString::new(pair.access), SecretString::new(pair.refresh));

        let user = match self.gateway.get_json::<UserProfile>(PROFILE_PATH).await {
            Ok(user) => user,
            Err(e) => {
                self.tokens.clear();
                return Err(e);
            },
        };
        self.session.set_user(user.clone());
        self.session.mark_initialized();
        self.realtime.reset();
        info!(user_id = user.id, "logged in");
        self.session.emit(SessionEvent::LoggedIn {
            username: user.username.clone(),
        });
        Ok(user)
    }

    /// Close the channel, tell the server (best effort) and forget the session.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.realtime.disconnect();

        let credentials = self.tokens.get();
        if let Some(refresh) = credentials.refresh {
            match ApiRequest::post(LOGOUT_PATH, &LogoutRequest {
                refresh_token: refresh.expose_secret().clone(),
            }) {
                Ok(mut request) => {
                    request.authorization = credentials.access;
                    match self.transport.execute(&request).await {
                        Ok(response) if !response.is_success() => {
                            warn!(status = response.status, "server-side logout failed");
                        },
                        Ok(_) => {},
                        Err(e) => warn!(error = %e, "server-side logout failed"),
                    }
                },
                Err(e) => warn!(error = %e, "failed to encode logout request"),
            }
        }

        self.tokens.clear();
        self.session.clear_user();
        self.realtime.reset();
        info!("logged out");
        self.session.emit(SessionEvent::LoggedOut);
    }

    pub fn status(&self) -> AuthStatus {
        self.session.status()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.session.user()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn realtime(&self) -> &ConnectionManager {
        &self.realtime
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn selected_account(&self) -> Option<i64> {
        self.session.selected_account()
    }

    pub fn select_account(&self, account_id: Option<i64>) -> anyhow::Result<()> {
        self.session.select_account(account_id)
    }

    /// Login, logout and session-ended notifications.
    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }
}
