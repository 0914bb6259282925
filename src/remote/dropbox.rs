//! Dropbox HTTP API v2 client (blocking).
//!
//! Only the handful of endpoints the walkers need are wrapped:
//! - RPC (`api.dropboxapi.com`): list_folder(+continue), get_metadata,
//!   create_folder_v2, users/get_current_account
//! - content (`content.dropboxapi.com`): upload, upload_session/*, download
//!
//! Responses are decoded into wire structs and mapped onto `RemoteEntry` /
//! `RemoteError`; nothing outside this module looks at raw JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::types::Config;
use crate::credentials::Credentials;
use crate::platform::tmp_sibling_name;

use super::{Listing, RemoteEntry, RemoteError, RemoteKind, RemoteStore};

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

/// Dropbox rejects single requests above 150 MiB.
pub const MAX_CHUNK_SIZE: u64 = 150 * 1024 * 1024;

/// Transport settings derived from Config.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Files larger than this go through an upload session, in chunks of this size.
    pub chunk_size: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            chunk_size: 100 * 1024 * 1024,
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            timeout: cfg.timeout,
            chunk_size: cfg.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }
}

/// The account a session is linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// An authenticated client plus the account it belongs to.
/// Built once per CLI invocation and handed to whichever flow runs.
pub struct Session {
    pub client: DropboxClient,
    pub account: Account,
}

pub struct DropboxClient {
    http: Client,
    token: String,
    chunk_size: u64,
}

pub(crate) fn build_http(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .user_agent(concat!("dropback/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(transport("<client>"))
}

impl DropboxClient {
    pub fn new(access_token: impl Into<String>, opts: &ClientOptions) -> Result<Self, RemoteError> {
        Ok(Self {
            http: build_http(opts.timeout)?,
            token: access_token.into(),
            chunk_size: opts.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        })
    }

    /// Build a client from stored credentials and verify the token by fetching
    /// the current account. Fails with `RemoteError::Auth` for a bad token.
    pub fn authenticate(creds: &Credentials, opts: &ClientOptions) -> Result<Session, RemoteError> {
        let client = Self::new(creds.access_token.clone(), opts)?;
        let account = client.current_account()?;
        info!(account = %account.display_name, "Linked to Dropbox account");
        Ok(Session { client, account })
    }

    pub fn current_account(&self) -> Result<Account, RemoteError> {
        // This endpoint takes no arguments; Dropbox wants a literal `null` body.
        let req = self
            .http
            .post(format!("{API_BASE}/users/get_current_account"))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .body("null");
        let wire: WireAccount = decode(send(req, "<account>")?, "<account>")?;
        Ok(Account {
            account_id: wire.account_id,
            display_name: wire.name.display_name,
            email: wire.email,
        })
    }

    fn rpc<A: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: &A,
        path: &str,
    ) -> Result<R, RemoteError> {
        trace!(endpoint, path, "Dropbox RPC");
        let req = self
            .http
            .post(format!("{API_BASE}/{endpoint}"))
            .bearer_auth(&self.token)
            .json(arg);
        decode(send(req, path)?, path)
    }

    fn content_upload<A: Serialize>(
        &self,
        endpoint: &str,
        arg: &A,
        body: Body,
        path: &str,
    ) -> Result<Response, RemoteError> {
        trace!(endpoint, path, "Dropbox content upload");
        let req = self
            .http
            .post(format!("{CONTENT_BASE}/{endpoint}"))
            .bearer_auth(&self.token)
            .header(API_ARG_HEADER, header_json(arg, path)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        send(req, path)
    }

    fn content_download(&self, remote: &str) -> Result<Response, RemoteError> {
        trace!(path = remote, "Dropbox content download");
        let req = self
            .http
            .post(format!("{CONTENT_BASE}/files/download"))
            .bearer_auth(&self.token)
            .header(API_ARG_HEADER, header_json(&json!({ "path": remote }), remote)?);
        send(req, remote)
    }

    fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<WireListPage, RemoteError> {
        match cursor {
            None => self.rpc(
                "files/list_folder",
                &json!({
                    "path": api_path(path),
                    "recursive": true,
                    "include_deleted": false,
                }),
                path,
            ),
            Some(c) => self.rpc("files/list_folder/continue", &json!({ "cursor": c }), path),
        }
    }

    fn upload_session(
        &self,
        mut file: File,
        local: &Path,
        len: u64,
        commit: &CommitInfo<'_>,
    ) -> Result<RemoteEntry, RemoteError> {
        let remote = commit.path;
        let plan = session_plan(len, self.chunk_size);
        let first = read_chunk(&mut file, plan.first, local)?;
        let mut offset = first.len() as u64;
        let started: WireSessionStart = decode(
            self.content_upload(
                "files/upload_session/start",
                &json!({ "close": false }),
                Body::from(first),
                remote,
            )?,
            remote,
        )?;
        debug!(
            path = remote,
            session = %started.session_id,
            size = len,
            appends = plan.appends.len(),
            "Started upload session"
        );

        for &(_, size) in &plan.appends {
            let chunk = read_chunk(&mut file, size, local)?;
            let n = chunk.len() as u64;
            if n == 0 {
                // Source shrank while uploading; finish with what we have.
                break;
            }
            self.content_upload(
                "files/upload_session/append_v2",
                &json!({
                    "cursor": { "session_id": started.session_id, "offset": offset },
                    "close": false,
                }),
                Body::from(chunk),
                remote,
            )?;
            offset += n;
            trace!(path = remote, offset, "Appended chunk");
        }

        let last = read_chunk(&mut file, plan.last.1, local)?;
        let finished: WireFile = decode(
            self.content_upload(
                "files/upload_session/finish",
                &json!({
                    "cursor": { "session_id": started.session_id, "offset": offset },
                    "commit": commit,
                }),
                Body::from(last),
                remote,
            )?,
            remote,
        )?;
        Ok(finished.into_entry(remote))
    }
}

impl RemoteStore for DropboxClient {
    fn list(&self, path: &str) -> Result<Listing<'_>, RemoteError> {
        let first = self.list_page(path, None)?;
        Ok(Box::new(FolderListing::new(self, path, first)))
    }

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        modified: Option<DateTime<Utc>>,
    ) -> Result<RemoteEntry, RemoteError> {
        let file = File::open(local).map_err(|e| RemoteError::io(local, e))?;
        let len = file.metadata().map_err(|e| RemoteError::io(local, e))?.len();
        let commit = CommitInfo::overwrite(remote, modified);

        if len > self.chunk_size {
            return self.upload_session(file, local, len, &commit);
        }
        let wire: WireFile = decode(
            self.content_upload("files/upload", &commit, Body::from(file), remote)?,
            remote,
        )?;
        Ok(wire.into_entry(remote))
    }

    fn upload_bytes(&self, data: &[u8], remote: &str) -> Result<RemoteEntry, RemoteError> {
        let commit = CommitInfo::overwrite(remote, None);
        let wire: WireFile = decode(
            self.content_upload("files/upload", &commit, Body::from(data.to_vec()), remote)?,
            remote,
        )?;
        Ok(wire.into_entry(remote))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<RemoteEntry, RemoteError> {
        let mut resp = self.content_download(remote)?;
        let meta = result_header(&resp);

        let tmp = tmp_sibling_name(local, "part");
        let written = (|| -> Result<u64, RemoteError> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .map_err(|e| RemoteError::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            let n = io::copy(&mut resp, &mut writer).map_err(|e| RemoteError::Transport {
                path: remote.to_string(),
                reason: e.to_string(),
            })?;
            writer.flush().map_err(|e| RemoteError::io(&tmp, e))?;
            writer.get_ref().sync_all().map_err(|e| RemoteError::io(&tmp, e))?;
            Ok(n)
        })();

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, local) {
            let _ = fs::remove_file(&tmp);
            return Err(RemoteError::io(local, e));
        }

        Ok(meta.map(|m| m.into_entry(remote)).unwrap_or(RemoteEntry {
            path: remote.to_string(),
            kind: RemoteKind::File,
            size: written,
            modified: None,
        }))
    }

    fn download_bytes(&self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self.content_download(remote)?;
        resp.bytes().map(|b| b.to_vec()).map_err(transport(remote))
    }

    fn stat(&self, remote: &str) -> Result<RemoteEntry, RemoteError> {
        let wire: WireMetadata = self.rpc("files/get_metadata", &json!({ "path": remote }), remote)?;
        wire.into_entry().ok_or_else(|| RemoteError::NotFound(remote.to_string()))
    }

    fn create_folder(&self, remote: &str) -> Result<(), RemoteError> {
        if api_path(remote).is_empty() {
            return Ok(());
        }
        let res: Result<serde_json::Value, RemoteError> = self.rpc(
            "files/create_folder_v2",
            &json!({ "path": remote, "autorename": false }),
            remote,
        );
        match res {
            Ok(_) => {
                debug!(path = remote, "Created remote folder");
                Ok(())
            }
            Err(RemoteError::Api { status: 409, ref summary, .. }) if summary.contains("conflict") => {
                trace!(path = remote, "Remote folder already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Pages through `list_folder/continue` only when the buffered page runs out.
struct FolderListing<'a> {
    client: &'a DropboxClient,
    path: String,
    buffer: VecDeque<RemoteEntry>,
    cursor: String,
    has_more: bool,
    failed: bool,
}

impl<'a> FolderListing<'a> {
    fn new(client: &'a DropboxClient, path: &str, first: WireListPage) -> Self {
        Self {
            client,
            path: path.to_string(),
            buffer: first.entries.into_iter().filter_map(WireMetadata::into_entry).collect(),
            cursor: first.cursor,
            has_more: first.has_more,
            failed: false,
        }
    }
}

impl Iterator for FolderListing<'_> {
    type Item = Result<RemoteEntry, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if !self.has_more || self.failed {
                return None;
            }
            match self.client.list_page(&self.path, Some(&self.cursor)) {
                Ok(page) => {
                    self.buffer
                        .extend(page.entries.into_iter().filter_map(WireMetadata::into_entry));
                    self.cursor = page.cursor;
                    self.has_more = page.has_more;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ---- wire types -------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CommitInfo<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    mute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_modified: Option<String>,
}

impl<'a> CommitInfo<'a> {
    fn overwrite(path: &'a str, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            mode: "overwrite",
            autorename: false,
            mute: true,
            client_modified: modified.map(format_client_modified),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    account_id: String,
    name: WireName,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireName {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WireListPage {
    entries: Vec<WireMetadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireSessionStart {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum WireMetadata {
    File {
        path_display: String,
        size: u64,
        #[serde(default)]
        client_modified: Option<String>,
    },
    Folder {
        path_display: String,
    },
    Deleted {
        #[allow(dead_code)]
        path_display: Option<String>,
    },
}

impl WireMetadata {
    fn into_entry(self) -> Option<RemoteEntry> {
        match self {
            WireMetadata::File {
                path_display,
                size,
                client_modified,
            } => Some(RemoteEntry {
                path: path_display,
                kind: RemoteKind::File,
                size,
                modified: client_modified.as_deref().and_then(parse_client_modified),
            }),
            WireMetadata::Folder { path_display } => Some(RemoteEntry {
                path: path_display,
                kind: RemoteKind::Folder,
                size: 0,
                modified: None,
            }),
            WireMetadata::Deleted { .. } => None,
        }
    }
}

/// Untagged FileMetadata as returned by upload/finish and the download result header.
#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(default)]
    path_display: Option<String>,
    size: u64,
    #[serde(default)]
    client_modified: Option<String>,
}

impl WireFile {
    fn into_entry(self, requested: &str) -> RemoteEntry {
        RemoteEntry {
            path: self.path_display.unwrap_or_else(|| requested.to_string()),
            kind: RemoteKind::File,
            size: self.size,
            modified: self.client_modified.as_deref().and_then(parse_client_modified),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    error_summary: String,
}

// ---- helpers ----------------------------------------------------------------

fn transport(path: &str) -> impl FnOnce(reqwest::Error) -> RemoteError + '_ {
    move |e| RemoteError::Transport {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

fn send(req: RequestBuilder, path: &str) -> Result<Response, RemoteError> {
    let resp = req.send().map_err(transport(path))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(classify(status.as_u16(), &body, path))
}

fn decode<R: DeserializeOwned>(resp: Response, path: &str) -> Result<R, RemoteError> {
    resp.json::<R>().map_err(transport(path))
}

fn result_header(resp: &Response) -> Option<WireFile> {
    resp.headers()
        .get(API_RESULT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| serde_json::from_str(s).ok())
}

/// Map an error response onto `RemoteError`.
pub(crate) fn classify(status: u16, body: &str, path: &str) -> RemoteError {
    let summary = serde_json::from_str::<WireError>(body)
        .map(|e| e.error_summary)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        401 => RemoteError::Auth(summary),
        409 if summary.contains("not_found") => RemoteError::NotFound(path.to_string()),
        _ => RemoteError::Api {
            path: path.to_string(),
            status,
            summary,
        },
    }
}

/// Serialize an argument for the `Dropbox-API-Arg` header. HTTP headers must be
/// ASCII, so every non-ASCII char is written as a JSON `\uXXXX` escape.
pub(crate) fn header_json<A: Serialize>(arg: &A, path: &str) -> Result<String, RemoteError> {
    let raw = serde_json::to_string(arg).map_err(|e| RemoteError::Transport {
        path: path.to_string(),
        reason: format!("encode request argument: {e}"),
    })?;
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for u in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", u));
            }
        }
    }
    Ok(out)
}

/// Dropbox addresses its root as "" rather than "/".
fn api_path(path: &str) -> &str {
    if path == "/" { "" } else { path }
}

/// Byte ranges of one upload session: the chunk sent with start, the appends,
/// then the chunk sent with finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionPlan {
    pub first: u64,
    /// `(offset, size)` of each append.
    pub appends: Vec<(u64, u64)>,
    /// `(offset, size)` of the finishing chunk; the size may be 0.
    pub last: (u64, u64),
}

pub(crate) fn session_plan(len: u64, chunk: u64) -> SessionPlan {
    let chunk = chunk.max(1);
    let first = len.min(chunk);
    let mut offset = first;
    let mut appends = Vec::new();
    while len - offset > chunk {
        appends.push((offset, chunk));
        offset += chunk;
    }
    SessionPlan {
        first,
        appends,
        last: (offset, len - offset),
    }
}

fn read_chunk(file: &mut File, size: u64, local: &Path) -> Result<Vec<u8>, RemoteError> {
    let mut buf = Vec::with_capacity(size.min(MAX_CHUNK_SIZE) as usize);
    Read::by_ref(file)
        .take(size)
        .read_to_end(&mut buf)
        .map_err(|e| RemoteError::io(local, e))?;
    Ok(buf)
}

/// Dropbox accepts client_modified at whole-second precision, UTC, `Z` suffix.
pub(crate) fn format_client_modified(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_client_modified(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
