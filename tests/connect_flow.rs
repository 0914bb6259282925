use std::cell::RefCell;
use std::io::Cursor;
use tempfile::tempdir;

use dropback::credentials::CREDENTIALS_FILE_NAME;
use dropback::ops::{Authorizer, ConnectOptions, connect, disconnect};
use dropback::remote::Account;
use dropback::{CredentialStore, RemoteError, SaveLocation};

/// Hands out numbered tokens and remembers what it was asked.
#[derive(Default)]
struct FakeAuthorizer {
    issued: RefCell<u32>,
    revoked: RefCell<Vec<String>>,
    codes: RefCell<Vec<String>>,
}

impl Authorizer for FakeAuthorizer {
    fn authorize_url(&self, app_key: &str) -> Result<String, RemoteError> {
        Ok(format!("https://example.invalid/authorize?client_id={app_key}"))
    }

    fn exchange_code(&self, _key: &str, _secret: &str, code: &str) -> Result<String, RemoteError> {
        if code == "bad" {
            return Err(RemoteError::Auth("invalid_grant".into()));
        }
        self.codes.borrow_mut().push(code.to_string());
        *self.issued.borrow_mut() += 1;
        Ok(format!("token-{}", self.issued.borrow()))
    }

    fn verify(&self, _token: &str) -> Result<Account, RemoteError> {
        Ok(Account {
            account_id: "dbid:1".into(),
            display_name: "Test User".into(),
            email: Some("test@example.invalid".into()),
        })
    }

    fn revoke(&self, token: &str) -> Result<(), RemoteError> {
        self.revoked.borrow_mut().push(token.to_string());
        Ok(())
    }
}

#[test]
fn connect_prompts_for_missing_values_and_saves() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let auth = FakeAuthorizer::default();

    let mut input = Cursor::new("my-key\nmy-secret\n  code-1  \n");
    let connected = connect(&store, &auth, &ConnectOptions::default(), &mut input).unwrap();

    assert_eq!(connected.path, local.path().join(CREDENTIALS_FILE_NAME));
    assert_eq!(connected.account.display_name, "Test User");
    assert_eq!(auth.codes.borrow().as_slice(), ["code-1"]);
    let (creds, _) = store.load().unwrap();
    assert_eq!(creds.app_key, "my-key");
    assert_eq!(creds.app_secret, "my-secret");
    assert_eq!(creds.access_token, "token-1");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&connected.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn reconnecting_overwrites_the_same_file_and_reuses_app_credentials() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let auth = FakeAuthorizer::default();
    let opts = ConnectOptions {
        app_key: Some("k".into()),
        app_secret: Some("s".into()),
        location: SaveLocation::System,
    };

    let first = connect(&store, &auth, &opts, &mut Cursor::new("c1\n")).unwrap();
    assert_eq!(first.path, system.path().join(CREDENTIALS_FILE_NAME));

    // Only the code is read: key and secret come from the stored file.
    let second = connect(&store, &auth, &ConnectOptions::default(), &mut Cursor::new("c2\n")).unwrap();
    assert_eq!(second.path, first.path);
    assert!(!local.path().join(CREDENTIALS_FILE_NAME).exists());
    let (creds, _) = store.load().unwrap();
    assert_eq!(creds.app_key, "k");
    assert_eq!(creds.access_token, "token-2");
}

#[test]
fn rejected_code_leaves_no_credentials() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let auth = FakeAuthorizer::default();

    let err = connect(&store, &auth, &ConnectOptions::default(), &mut Cursor::new("k\ns\nbad\n")).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("authentication"));
    assert!(store.active_path().is_none());
}

#[test]
fn empty_input_is_an_error() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let err = connect(&store, &FakeAuthorizer::default(), &ConnectOptions::default(), &mut Cursor::new("")).unwrap_err();
    assert!(err.to_string().contains("app key"));
}

#[test]
fn disconnect_revokes_and_removes() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let auth = FakeAuthorizer::default();
    connect(&store, &auth, &ConnectOptions::default(), &mut Cursor::new("k\ns\nc\n")).unwrap();

    let removed = disconnect(&store, &auth, true).unwrap();
    assert_eq!(removed, Some(local.path().join(CREDENTIALS_FILE_NAME)));
    assert_eq!(auth.revoked.borrow().as_slice(), ["token-1"]);
    assert!(store.active_path().is_none());

    assert_eq!(disconnect(&store, &auth, true).unwrap(), None);
}

#[test]
fn disconnect_without_revoke_only_deletes() {
    let local = tempdir().unwrap();
    let system = tempdir().unwrap();
    let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
    let auth = FakeAuthorizer::default();
    connect(&store, &auth, &ConnectOptions::default(), &mut Cursor::new("k\ns\nc\n")).unwrap();

    disconnect(&store, &auth, false).unwrap();
    assert!(auth.revoked.borrow().is_empty());
    assert!(store.active_path().is_none());
}
