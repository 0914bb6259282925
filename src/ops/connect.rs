//! Linking and unlinking a Dropbox account.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, Credentials, SaveLocation};
use crate::errors::DropbackError;
use crate::output as out;
use crate::remote::dropbox::ClientOptions;
use crate::remote::{Account, DropboxClient, RemoteError, oauth};

/// The network half of the OAuth flow.
pub trait Authorizer {
    fn authorize_url(&self, app_key: &str) -> Result<String, RemoteError>;
    fn exchange_code(&self, app_key: &str, app_secret: &str, code: &str) -> Result<String, RemoteError>;
    /// Check a token by fetching the account it belongs to.
    fn verify(&self, access_token: &str) -> Result<Account, RemoteError>;
    fn revoke(&self, access_token: &str) -> Result<(), RemoteError>;
}

pub struct DropboxAuthorizer {
    options: ClientOptions,
}

impl DropboxAuthorizer {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

impl Authorizer for DropboxAuthorizer {
    fn authorize_url(&self, app_key: &str) -> Result<String, RemoteError> {
        oauth::authorize_url(app_key).map(|u| u.to_string())
    }

    fn exchange_code(&self, app_key: &str, app_secret: &str, code: &str) -> Result<String, RemoteError> {
        oauth::exchange_code(app_key, app_secret, code)
    }

    fn verify(&self, access_token: &str) -> Result<Account, RemoteError> {
        DropboxClient::new(access_token, &self.options)?.current_account()
    }

    fn revoke(&self, access_token: &str) -> Result<(), RemoteError> {
        oauth::revoke(access_token)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub location: SaveLocation,
}

/// Result of a successful `connect`.
#[derive(Debug)]
pub struct Connected {
    pub path: PathBuf,
    pub account: Account,
}

/// Run the authorization-code flow and store the resulting credentials.
///
/// App key and secret come from `opts`, then from an existing credentials
/// file, then from `input`. The code the user pastes is read from `input`.
/// An existing credentials file is overwritten in place.
pub fn connect(
    store: &CredentialStore,
    auth: &dyn Authorizer,
    opts: &ConnectOptions,
    input: &mut dyn BufRead,
) -> Result<Connected> {
    let existing = store.load().ok().map(|(c, _)| c);
    if existing.is_some() {
        info!("Existing credentials found; they will be replaced");
    }

    let app_key = match opts
        .app_key
        .clone()
        .or_else(|| existing.as_ref().map(|c| c.app_key.clone()))
    {
        Some(k) => k,
        None => prompt(input, "Dropbox app key")?,
    };
    let app_secret = match opts
        .app_secret
        .clone()
        .or_else(|| existing.as_ref().map(|c| c.app_secret.clone()))
    {
        Some(s) => s,
        None => prompt(input, "Dropbox app secret")?,
    };

    let url = auth.authorize_url(&app_key).map_err(DropbackError::from)?;
    out::print_user(&format!("1. Go to: {url}"));
    out::print_user("2. Click \"Allow\" (you might have to log in first).");
    out::print_user("3. Copy the authorization code.");
    let code = prompt(input, "Enter the authorization code here")?;

    let access_token = auth
        .exchange_code(&app_key, &app_secret, &code)
        .map_err(DropbackError::from)?;
    let account = auth.verify(&access_token).map_err(DropbackError::from)?;
    debug!(account = %account.display_name, "Token verified");

    let creds = Credentials {
        app_key,
        app_secret,
        access_token,
    };
    let path = store.save(&creds, opts.location)?;
    Ok(Connected { path, account })
}

/// Remove stored credentials, revoking the token first unless `revoke` is false.
/// Returns the removed file, or None when no credentials existed.
pub fn disconnect(store: &CredentialStore, auth: &dyn Authorizer, revoke: bool) -> Result<Option<PathBuf>> {
    if store.active_path().is_none() {
        warn!("No stored credentials; nothing to disconnect");
        return Ok(None);
    }
    if revoke {
        match store.load() {
            Ok((creds, _)) => match auth.revoke(&creds.access_token) {
                Ok(()) => info!("Access token revoked"),
                Err(e) => warn!(error = %e, "Could not revoke access token; removing it locally anyway"),
            },
            Err(e) => warn!(error = %e, "Stored credentials unreadable; skipping revoke"),
        }
    }
    store.clear()
}

fn prompt(input: &mut dyn BufRead, label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush().context("flush prompt")?;
    let mut line = String::new();
    input.read_line(&mut line).context("read from stdin")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        return Err(DropbackError::Config(format!("{label}: no value entered")).into());
    }
    Ok(value)
}
