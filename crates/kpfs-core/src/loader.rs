//! Loading a KeePass database into a [`CredentialStore`].
//!
//! Decryption and parsing are done by the `keepass` crate; this module only
//! builds the key from the supplied credentials and converts the decoded
//! tree into the store's arena form.

use crate::store::{CredentialStore, GroupId, StoreBuilder, Timestamps};
use keepass::db::{Entry, Group, Node, Times, Value};
use keepass::error::DatabaseOpenError;
use keepass::{Database, DatabaseKey};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Standard KeePass fields, listed first and in this order.
///
/// The decoder does not keep document order for fields, so anything not in
/// this list follows sorted by key.
pub const STANDARD_FIELDS: [&str; 5] = ["Title", "UserName", "Password", "URL", "Notes"];

/// Errors that can occur while loading a database.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Neither a password nor key file data was supplied.
    #[error("Either a password or a key file (or both) is required")]
    MissingCredentials,

    /// The database file could not be opened.
    #[error("Failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key file data could not be turned into a key.
    #[error("Failed to create database credentials: {0}")]
    KeyFile(#[source] io::Error),

    /// Wrong credentials, or a corrupt or unsupported file.
    #[error("Failed to decode database: {0}")]
    Decode(#[from] DatabaseOpenError),
}

/// Material used to unlock a database.
///
/// Empty passwords and empty key file data are treated as absent.
#[derive(Default)]
pub struct Credentials {
    password: Option<Zeroizing<String>>,
    key_file: Option<Zeroizing<Vec<u8>>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_password(mut self, password: Zeroizing<String>) -> Self {
        self.password = Some(password).filter(|p| !p.is_empty());
        self
    }

    #[must_use]
    pub fn with_key_file(mut self, data: Zeroizing<Vec<u8>>) -> Self {
        self.key_file = Some(data).filter(|d| !d.is_empty());
        self
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_key_file(&self) -> bool {
        self.key_file.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_password() && !self.has_key_file()
    }

    fn to_key(&self) -> Result<DatabaseKey, LoadError> {
        if self.is_empty() {
            return Err(LoadError::MissingCredentials);
        }
        let mut key = DatabaseKey::new();
        if let Some(password) = &self.password {
            key = key.with_password(password);
        }
        if let Some(data) = &self.key_file {
            key = key
                .with_keyfile(&mut data.as_slice())
                .map_err(LoadError::KeyFile)?;
        }
        Ok(key)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.has_password())
            .field("key_file", &self.has_key_file())
            .finish()
    }
}

/// Opens, decrypts and converts the database at `path`.
pub fn load_database(path: &Path, credentials: &Credentials) -> Result<CredentialStore, LoadError> {
    let key = credentials.to_key()?;
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(
        path = %path.display(),
        password = credentials.has_password(),
        key_file = credentials.has_key_file(),
        "Decoding database"
    );
    let db = Database::open(&mut BufReader::new(file), key)?;

    let store = from_keepass(&db.root);
    info!(
        path = %path.display(),
        groups = store.group_count(),
        entries = store.entry_count(),
        "Database loaded"
    );
    Ok(store)
}

/// Converts a decoded database tree into a store.
///
/// `root` becomes the single top-level group, so the database's root group
/// is the only directory at the mount root.
pub fn from_keepass(root: &Group) -> CredentialStore {
    let mut builder = StoreBuilder::new();
    add_group(&mut builder, GroupId::ROOT, root);
    builder.build()
}

fn add_group(builder: &mut StoreBuilder, parent: GroupId, group: &Group) {
    let id = builder.add_group(parent, group.name.clone(), timestamps(&group.times));
    for child in &group.children {
        match child {
            Node::Group(sub) => add_group(builder, id, sub),
            Node::Entry(entry) => add_entry(builder, id, entry),
        }
    }
}

fn add_entry(builder: &mut StoreBuilder, group: GroupId, entry: &Entry) {
    let id = builder.add_entry(group, entry.uuid, timestamps(&entry.times));
    let mut keys: Vec<&String> = entry.fields.keys().collect();
    keys.sort_by(|a, b| field_rank(a).cmp(&field_rank(b)).then_with(|| a.cmp(b)));
    for key in keys {
        builder.add_field(id, key.clone(), value_bytes(&entry.fields[key]));
    }
}

fn field_rank(key: &str) -> usize {
    STANDARD_FIELDS
        .iter()
        .position(|standard| *standard == key)
        .unwrap_or(STANDARD_FIELDS.len())
}

fn value_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Bytes(bytes) => bytes.clone(),
        Value::Unprotected(text) => text.as_bytes().to_vec(),
        Value::Protected(secret) => secret.unsecure().to_vec(),
    }
}

fn timestamps(times: &Times) -> Timestamps {
    Timestamps {
        last_access: times.get_last_access().map(to_system_time),
        last_modification: times.get_last_modification().map(to_system_time),
    }
}

fn to_system_time(time: &chrono::NaiveDateTime) -> SystemTime {
    SystemTime::from(time.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node as FsNode;
    use crate::projection::Projection;
    use keepass::config::{DatabaseConfig, KdfConfig};
    use secstr::SecStr;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    const KEY_FILE_DATA: &[u8] = b"kpfs test key file material";

    fn naive(secs: i64) -> chrono::NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// Writes a kdbx4 file holding "Passwords/Bank", locked with password
    /// "pw" plus `KEY_FILE_DATA`.
    fn saved_database() -> NamedTempFile {
        let mut db = Database::new(DatabaseConfig {
            kdf_config: KdfConfig::Aes { rounds: 10 },
            ..DatabaseConfig::default()
        });
        db.root.name = "Passwords".to_string();

        let mut bank = entry("Bank", &[("UserName", "alice")]);
        bank.fields.insert(
            "Password".to_string(),
            Value::Protected(SecStr::new(b"s3cr3t".to_vec())),
        );
        bank.times.set_last_access(naive(1_600_000_000));
        bank.times.set_last_modification(naive(1_700_000_000));
        db.root.children.push(Node::Entry(bank));

        let key = DatabaseKey::new()
            .with_password("pw")
            .with_keyfile(&mut &KEY_FILE_DATA[..])
            .unwrap();
        let mut file = NamedTempFile::new().unwrap();
        db.save(file.as_file_mut(), key).unwrap();
        file
    }

    fn credentials(password: &str, key_file: &[u8]) -> Credentials {
        Credentials::new()
            .with_password(Zeroizing::new(password.to_string()))
            .with_key_file(Zeroizing::new(key_file.to_vec()))
    }

    fn entry(title: &str, fields: &[(&str, &str)]) -> Entry {
        let mut entry = Entry::new();
        entry.uuid = Uuid::from_u128(42);
        entry
            .fields
            .insert("Title".to_string(), Value::Unprotected(title.to_string()));
        for (key, value) in fields {
            entry
                .fields
                .insert((*key).to_string(), Value::Unprotected((*value).to_string()));
        }
        entry
    }

    #[test]
    fn test_missing_credentials() {
        let creds = Credentials::new()
            .with_password(Zeroizing::new(String::new()))
            .with_key_file(Zeroizing::new(Vec::new()));
        assert!(creds.is_empty());
        let err = load_database(Path::new("/nonexistent.kdbx"), &creds).unwrap_err();
        assert!(matches!(err, LoadError::MissingCredentials));
    }

    #[test]
    fn test_missing_file() {
        let creds = Credentials::new().with_password(Zeroizing::new("pw".to_string()));
        let err = load_database(Path::new("/nonexistent/db.kdbx"), &creds).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/db.kdbx"));
    }

    #[test]
    fn test_garbage_file_fails_to_decode() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a keepass database").unwrap();
        let creds = Credentials::new().with_password(Zeroizing::new("pw".to_string()));
        let err = load_database(file.path(), &creds).unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn test_load_saved_database() {
        let file = saved_database();
        let store = load_database(file.path(), &credentials("pw", KEY_FILE_DATA))
            .expect("saved database should load");
        assert_eq!(store.group_count(), 1);
        assert_eq!(store.entry_count(), 1);

        let passwords = store.group(store.root().groups[0]);
        assert_eq!(passwords.name, "Passwords");

        let bank = store.entry(passwords.entries[0]);
        assert_eq!(bank.display_name(), "Bank");
        assert_eq!(bank.field("UserName"), Some(&b"alice"[..]));
        // Protected values come back revealed
        assert_eq!(bank.field("Password"), Some(&b"s3cr3t"[..]));
        assert_eq!(bank.times.last_access, Some(at(1_600_000_000)));
        assert_eq!(bank.times.last_modification, Some(at(1_700_000_000)));
    }

    #[test]
    fn test_wrong_password_fails_to_decode() {
        let file = saved_database();
        let err = load_database(file.path(), &credentials("wrong", KEY_FILE_DATA))
            .unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn test_wrong_key_file_fails_to_decode() {
        let file = saved_database();
        let err = load_database(file.path(), &credentials("pw", b"another key file"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));

        let password_only = Credentials::new().with_password(Zeroizing::new("pw".to_string()));
        let err = load_database(file.path(), &password_only).unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials::new().with_password(Zeroizing::new("hunter2".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(creds.has_password());
        assert!(!creds.has_key_file());
    }

    #[test]
    fn test_conversion_keeps_tree_shape() {
        let mut root = Group::new("Passwords");
        let mut personal = Group::new("Personal");
        let bank = entry("Bank", &[("UserName", "alice"), ("Password", "s3cr3t")]);
        personal.children.push(Node::Entry(bank));
        root.children.push(Node::Group(personal));
        root.children.push(Node::Group(Group::new("Work")));

        let store = from_keepass(&root);
        assert_eq!(store.group_count(), 3);
        assert_eq!(store.entry_count(), 1);

        let fs = Projection::new(Arc::new(store));
        let names: Vec<_> = fs.list(&fs.root()).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Passwords"]);

        let mut node = fs.root();
        for name in "Passwords/groups/Personal/entries/Bank/Password".split('/') {
            node = fs.resolve(&node, name).unwrap().node;
        }
        assert!(matches!(node, FsNode::Field(_)));
        assert_eq!(fs.read(&node, 0, 64).unwrap(), b"s3cr3t");

        let passwords = fs.resolve(&fs.root(), "Passwords").unwrap().node;
        let groups = fs.resolve(&passwords, "groups").unwrap().node;
        let listed: Vec<_> = fs.list(&groups).into_iter().map(|e| e.name).collect();
        assert_eq!(listed, vec!["Personal", "Work"]);
    }

    #[test]
    fn test_standard_fields_first() {
        let mut root = Group::new("Root");
        let fields = [
            ("zeta", "1"),
            ("Notes", "n"),
            ("Password", "p"),
            ("alpha", "2"),
            ("UserName", "u"),
            ("URL", "https://example.com"),
        ];
        root.children.push(Node::Entry(entry("Mail", &fields)));
        let store = from_keepass(&root);
        let keys: Vec<_> = store
            .entry(store.group(store.root().groups[0]).entries[0])
            .fields
            .iter()
            .map(|f| f.key.as_str())
            .collect();
        assert_eq!(keys[..5], STANDARD_FIELDS);
        assert_eq!(keys[5..], ["alpha", "zeta"]);
    }

    #[test]
    fn test_binary_field_value() {
        let mut root = Group::new("Root");
        let mut e = entry("Key", &[]);
        e.fields
            .insert("Blob".to_string(), Value::Bytes(vec![0, 159, 146, 150]));
        root.children.push(Node::Entry(e));
        let store = from_keepass(&root);
        let entry = store.entry(store.group(store.root().groups[0]).entries[0]);
        assert_eq!(entry.field("Blob"), Some(&[0u8, 159, 146, 150][..]));
    }
}
