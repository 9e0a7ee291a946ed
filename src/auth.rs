//! HTTP login against the Exnova REST API.
//!
//! The WebSocket session is activated with an `ssid` obtained from the
//! credential login endpoint. Accounts with two-step verification enabled
//! answer the first login with a challenge (`{code: "verify", method,
//! token}`); the caller completes it with [`confirm_code`].

use serde::Deserialize;
use tracing::info;

use crate::ExnovaError;
use crate::Result;

/// Successful outcomes of a credential login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Session token for the `ssid` WebSocket handshake.
    Session(String),
    /// Two-step verification is required; complete with
    /// [`confirm_code`] using this token.
    VerificationRequired { method: String, token: String },
}

/// Raw body of the login and verify endpoints.
#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Exchanges credentials for a session id (or a verification challenge).
///
/// `base_url` is the broker's REST base, e.g. `https://exnova.com/api`.
///
/// # Errors
///
/// Returns [`ExnovaError::Http`] on network failure and
/// [`ExnovaError::Auth`] when the broker rejects the credentials. Neither
/// is retried here; retry policy belongs to the caller.
pub async fn login(
    http: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<LoginOutcome> {
    let response = http
        .post(format!("{base_url}/v2/login"))
        .json(&serde_json::json!({
            "identifier": email,
            "password": password,
        }))
        .send()
        .await?;

    let body: LoginBody = response.json().await?;
    let outcome = parse_login_body(body)?;
    if let LoginOutcome::Session(_) = outcome {
        info!("login accepted, session id obtained");
    }
    Ok(outcome)
}

/// Completes a two-step verification challenge and yields the session id.
///
/// # Errors
///
/// Returns [`ExnovaError::Auth`] when the code is rejected and
/// [`ExnovaError::Http`] on network failure.
pub async fn confirm_code(
    http: &reqwest::Client,
    base_url: &str,
    code: &str,
    token: &str,
) -> Result<String> {
    let response = http
        .post(format!("{base_url}/v2/verify"))
        .json(&serde_json::json!({
            "code": code,
            "token": token,
        }))
        .send()
        .await?;

    let body: LoginBody = response.json().await?;
    match parse_login_body(body)? {
        LoginOutcome::Session(ssid) => {
            info!("verification accepted, session id obtained");
            Ok(ssid)
        }
        LoginOutcome::VerificationRequired { .. } => Err(ExnovaError::Auth(
            "verification code rejected, new challenge issued".into(),
        )),
    }
}

/// Maps a login/verify body to its outcome.
fn parse_login_body(body: LoginBody) -> Result<LoginOutcome> {
    if body.code.as_deref() == Some("verify") {
        let token = body
            .token
            .ok_or_else(|| ExnovaError::Auth("verification challenge without token".into()))?;
        return Ok(LoginOutcome::VerificationRequired {
            method: body.method.unwrap_or_else(|| "unknown".into()),
            token,
        });
    }

    if let Some(ssid) = body.ssid.filter(|s| !s.is_empty()) {
        return Ok(LoginOutcome::Session(ssid));
    }

    Err(ExnovaError::Auth(
        body.message
            .or(body.code)
            .unwrap_or_else(|| "login rejected".into()),
    ))
}
