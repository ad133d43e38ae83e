//! GoTrue client: sign-up, password sign-in, sign-out and token
//! introspection. Known upstream messages are normalized to the strings the
//! product shows users; everything else passes through.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::MarketError;
use crate::http::build_client;
use crate::models::Role;
use crate::supabase::config::{ANON_KEY, AUTH_ROOT};
use crate::validate::SignUpInput;

#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    root: String,
    anon_key: String,
    http: Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl SupabaseAuth {
    pub fn from_env() -> Self {
        Self {
            root: AUTH_ROOT.clone(),
            anon_key: ANON_KEY.clone(),
            http: build_client(),
        }
    }

    pub async fn sign_up(&self, input: &SignUpInput, role: Role) -> Result<AuthSession, MarketError> {
        let url = format!("{}/signup", self.root);
        let body = json!({
            "email": input.email.trim(),
            "password": input.password,
            "data": {
                "full_name": input.name.trim(),
                "phone": input.phone.as_deref().map(str::trim),
                "role": role,
            },
        });
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| MarketError::transport("sign_up", err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            if detail.to_lowercase().contains("already registered") {
                return Err(MarketError::conflict(
                    "sign_up",
                    "An account with this email already exists. Please sign in instead.",
                ));
            }
            return Err(MarketError::transport("sign_up", detail));
        }
        response
            .json()
            .await
            .map_err(|err| MarketError::transport("sign_up", format!("invalid response: {err}")))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, MarketError> {
        let url = format!("{}/token?grant_type=password", self.root);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email.trim(), "password": password }))
            .send()
            .await
            .map_err(|err| MarketError::transport("sign_in", err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                let lowered = detail.to_lowercase();
                if lowered.contains("invalid login credentials") || lowered.contains("invalid_grant")
                {
                    return Err(MarketError::permission(
                        "sign_in",
                        "Invalid email or password. Please try again.",
                    ));
                }
            }
            return Err(MarketError::transport("sign_in", detail));
        }
        response
            .json()
            .await
            .map_err(|err| MarketError::transport("sign_in", format!("invalid response: {err}")))
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), MarketError> {
        let url = format!("{}/logout", self.root);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| MarketError::transport("sign_out", err.to_string()))?;
        if !response.status().is_success() {
            return Err(MarketError::transport(
                "sign_out",
                format!("HTTP {}", response.status()),
            ));
        }
        Ok(())
    }

    /// Resolves a bearer token to its account; the session middleware calls
    /// this once per request.
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, MarketError> {
        let url = format!("{}/user", self.root);
        let response = self
            .http
            .get(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| MarketError::transport("session", err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MarketError::permission(
                "session",
                "invalid or expired token",
            ));
        }
        if !status.is_success() {
            return Err(MarketError::transport("session", format!("HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|err| MarketError::transport("session", format!("invalid response: {err}")))
    }
}

/// GoTrue error payloads vary: `{"msg": ...}`, `{"message": ...}` or
/// `{"error_description": ...}` depending on the endpoint.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let fallback = format!("HTTP {status}");
    let Ok(body) = response.json::<serde_json::Value>().await else {
        return fallback;
    };
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or(fallback)
}
