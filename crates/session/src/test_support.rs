//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    folio_protocol::UserProfile,
    secrecy::{ExposeSecret, SecretString},
};

use crate::{
    state::SessionState,
    storage::MemoryStorage,
    tokens::TokenStore,
    transport::{ApiRequest, ApiResponse, HttpTransport, Method, TransportError},
};

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// What the scripted transport saw.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
    pub retried: bool,
}

/// An [`HttpTransport`] answering from a closure, optionally after a delay.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(Recorded {
            method: request.method,
            path: request.path.clone(),
            bearer: request.bearer().map(|t| t.expose_secret().clone()),
            body: request.body.clone(),
            retried: request.is_retry(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }
}

pub(crate) fn bearer(request: &ApiRequest) -> Option<String> {
    request.bearer().map(|t| t.expose_secret().clone())
}

pub(crate) fn respond(status: u16, body: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(status, body.to_string()))
}

pub(crate) fn profile_json(id: i64, username: &str) -> serde_json::Value {
    serde_json::json!({"id": id, "username": username, "default_currency": "EUR"})
}

pub(crate) fn profile(id: i64, username: &str) -> UserProfile {
    serde_json::from_value(profile_json(id, username)).unwrap()
}

pub(crate) fn secret(value: &str) -> SecretString {
    SecretString::new(value.to_string())
}

/// Token store and session sharing one in-memory storage.
pub(crate) struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub tokens: Arc<TokenStore>,
    pub session: Arc<SessionState>,
}

impl Fixture {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            tokens: Arc::new(TokenStore::new(storage.clone())),
            session: Arc::new(SessionState::new(storage.clone())),
            storage,
        }
    }

    /// Tokens both in memory and in storage.
    pub fn logged_in(access: &str, refresh: &str) -> Self {
        let fixture = Self::new();
        fixture.tokens.set(secret(access), secret(refresh));
        fixture
    }
}
