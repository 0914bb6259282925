//! OAuth2 authorization-code flow without a redirect URI: the user opens the
//! authorize URL, approves the app, and pastes the code shown by Dropbox.

use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::RemoteError;
use super::dropbox::{build_http, classify};

const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const REVOKE_URL: &str = "https://api.dropboxapi.com/2/auth/token/revoke";

const OAUTH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    account_id: Option<String>,
}

/// URL the user opens to approve the app.
pub fn authorize_url(app_key: &str) -> Result<Url, RemoteError> {
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[("client_id", app_key), ("response_type", "code")],
    )
    .map_err(|e| RemoteError::Transport {
        path: "<oauth>".into(),
        reason: e.to_string(),
    })
}

/// Exchange an authorization code for a long-lived access token.
pub fn exchange_code(app_key: &str, app_secret: &str, code: &str) -> Result<String, RemoteError> {
    let http = build_http(OAUTH_TIMEOUT)?;
    let resp = http
        .post(TOKEN_URL)
        .basic_auth(app_key, Some(app_secret))
        .form(&[("code", code.trim()), ("grant_type", "authorization_code")])
        .send()
        .map_err(|e| transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        // The token endpoint reports a bad code as 400 invalid_grant.
        if status.as_u16() == 400 && body.contains("invalid_grant") {
            return Err(RemoteError::Auth("authorization code is invalid or expired".into()));
        }
        return Err(classify(status.as_u16(), &body, "<oauth>"));
    }

    let token: TokenResponse = resp.json().map_err(|e| transport(e.to_string()))?;
    debug!(account = ?token.account_id, "Obtained access token");
    Ok(token.access_token)
}

/// Revoke `access_token`. An already-invalid token counts as revoked.
pub fn revoke(access_token: &str) -> Result<(), RemoteError> {
    let http = build_http(OAUTH_TIMEOUT)?;
    let resp = http
        .post(REVOKE_URL)
        .bearer_auth(access_token)
        .send()
        .map_err(|e| transport(e.to_string()))?;
    let status = resp.status();
    if status.is_success() || status.as_u16() == 401 {
        return Ok(());
    }
    let body = resp.text().unwrap_or_default();
    Err(classify(status.as_u16(), &body, "<oauth>"))
}

fn transport(reason: String) -> RemoteError {
    RemoteError::Transport {
        path: "<oauth>".into(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_key_and_code_flow() {
        let url = authorize_url("abc 123").unwrap();
        assert_eq!(url.host_str(), Some("www.dropbox.com"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".into(), "abc 123".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }
}
