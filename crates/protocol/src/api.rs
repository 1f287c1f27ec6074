//! Error bodies returned by the REST API.

use serde::Deserialize;

/// Shape of a JSON error response.
///
/// Views answer either DRF-style (`detail`) or with the app's own
/// `{error, error_code}` pair. `error_code` is only set when an upstream
/// integration (a broker API token, say) rejected the call, which is why a 401
/// carrying it is not a session problem.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<serde_json::Value>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Parse a response body; `None` when it is not a JSON object.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    pub fn has_error_code(&self) -> bool {
        !matches!(self.error_code, None | Some(serde_json::Value::Null))
    }

    /// The most specific human-readable message in the body.
    pub fn message(&self) -> Option<&str> {
        self.error.as_deref().or(self.detail.as_deref())
    }
}
