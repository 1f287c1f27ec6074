//! Outbound request pipeline.
//!
//! Every API call goes through [`Gateway::send`]: the current access token is
//! attached, and a 401 sends the request through the refresh coordinator and
//! replays it exactly once with the new token. Anything else comes back to the
//! caller unchanged.

use std::sync::Arc;

use {
    folio_protocol::ErrorBody,
    secrecy::{ExposeSecret, SecretString},
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, instrument},
};

use crate::{
    error::{ApiError, GatewayError, RefreshError},
    refresh::RefreshCoordinator,
    tokens::TokenStore,
    transport::{ApiRequest, ApiResponse, HttpTransport},
};

const UNAUTHORIZED: u16 = 401;

pub struct Gateway {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            tokens,
            refresher,
        }
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Send a request and return the raw success response.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        request.authorization = self.tokens.access_token();
        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }
        if response.status != UNAUTHORIZED {
            return Err(ApiError::from(response).into());
        }
        if request.is_retry() {
            debug!("unauthorized after replay, giving up");
            return Err(ApiError::from(response).into());
        }
        if ErrorBody::parse(&response.body).is_some_and(|body| body.has_error_code()) {
            // An upstream integration rejected its own credentials.
            debug!("unauthorized with error_code, not refreshing");
            return Err(ApiError::from(response).into());
        }

        let token = match self.tokens.access_token() {
            Some(current) if !same_token(request.authorization.as_ref(), &current) => {
                debug!("access token already renewed, replaying");
                current
            },
            _ => match self.refresher.refresh().await {
                Ok(token) => token,
                // A login landed mid-refresh; its token is the one to use.
                Err(RefreshError::Superseded) => self
                    .tokens
                    .access_token()
                    .ok_or(RefreshError::Superseded)?,
                Err(e) => return Err(e.into()),
            },
        };

        request.authorization = Some(token);
        request.retried = true;
        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from(response).into())
        }
    }

    /// `GET` a path and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// `POST` a JSON body and decode the JSON answer.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::post(path, body).map_err(GatewayError::Encode)?;
        self.send_json(request).await
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        Ok(response.json()?)
    }
}

fn same_token(sent: Option<&SecretString>, current: &SecretString) -> bool {
    sent.is_some_and(|sent| sent.expose_secret() == current.expose_secret())
}
