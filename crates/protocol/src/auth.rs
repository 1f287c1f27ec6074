//! Payloads for the authentication endpoints.

use serde::{Deserialize, Serialize};

pub const LOGIN_PATH: &str = "/users/api/login/";
pub const REFRESH_PATH: &str = "/users/api/refresh-token/";
pub const PROFILE_PATH: &str = "/users/api/profile/";
pub const LOGOUT_PATH: &str = "/users/api/logout/";

/// `POST /users/api/login/` body.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Access/refresh pair returned by a successful login.
#[derive(Clone, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// `POST /users/api/refresh-token/` body.
#[derive(Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Refresh response. The backend may or may not rotate the refresh token;
/// when `refresh` is absent the previous one stays valid.
#[derive(Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// `POST /users/api/logout/` body.
#[derive(Clone, Serialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// The authenticated user's profile.
///
/// Only the fields the client relies on are typed; the rest of the payload is
/// kept in `extra` so screens can read settings without a protocol bump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digits: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Full name if the profile has one, otherwise the username.
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !first.is_empty() || !last.is_empty() => {
                format!("{first} {last}").trim().to_string()
            },
            (Some(first), None) if !first.is_empty() => first.to_string(),
            _ => self.username.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn refresh_response_without_rotation() {
        let resp: RefreshResponse = serde_json::from_str(r#"{"access":"a2"}"#).unwrap();
        assert_eq!(resp.access, "a2");
        assert!(resp.refresh.is_none());

        let resp: RefreshResponse =
            serde_json::from_str(r#"{"access":"a3","refresh":"r3"}"#).unwrap();
        assert_eq!(resp.refresh.as_deref(), Some("r3"));
    }

    #[test]
    fn profile_keeps_unknown_fields() {
        let json = r#"{
            "id": 7,
            "username": "alice",
            "email": "alice@example.com",
            "default_currency": "USD",
            "digits": 2,
            "chart_frequency": "M"
        }"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, 7);
        assert_eq!(profile.default_currency.as_deref(), Some("USD"));
        assert_eq!(profile.digits, Some(2));
        assert_eq!(profile.extra.get("chart_frequency").unwrap(), "M");
        assert_eq!(profile.display_name(), "alice");
    }

    #[test]
    fn display_name_prefers_full_name() {
        let mut profile: UserProfile =
            serde_json::from_str(r#"{"id":1,"username":"bob"}"#).unwrap();
        profile.first_name = Some("Bob".into());
        profile.last_name = Some("Stone".into());
        assert_eq!(profile.display_name(), "Bob Stone");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let login = LoginRequest {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{login:?}").contains("hunter2"));

        let pair: TokenPair = serde_json::from_str(r#"{"access":"a1","refresh":"r1"}"#).unwrap();
        let debug = format!("{pair:?}");
        assert!(!debug.contains("a1"));
        assert!(!debug.contains("r1"));
    }

    #[test]
    fn logout_body_shape() {
        let body = serde_json::to_value(LogoutRequest {
            refresh_token: "r1".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "refresh_token": "r1" }));
    }
}
