//! In-memory credential store.
//!
//! The store is an arena of group and entry records addressed by typed
//! indices. It is built once (by the loader or by tests through
//! [`StoreBuilder`]) and never mutated afterwards, so it can be shared
//! across filesystem threads behind an `Arc` without locking.
//!
//! Group 0 is a synthetic container with no name and no timestamps. Its
//! child groups are the top-level groups of the database.

use std::borrow::Cow;
use std::time::SystemTime;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Key of the field used as an entry's display name.
pub const TITLE_FIELD: &str = "Title";

/// Index of a group record within a [`CredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    /// The synthetic top-level container.
    pub const ROOT: GroupId = GroupId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of an entry record within a [`CredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Reference to one field of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// The owning entry.
    pub entry: EntryId,
    /// Position of the field within the entry's field list.
    pub index: usize,
}

/// Last-access and last-modification times as recorded in the database.
///
/// Either may be absent; the database format has no creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub last_access: Option<SystemTime>,
    pub last_modification: Option<SystemTime>,
}

impl Timestamps {
    pub fn new(last_access: SystemTime, last_modification: SystemTime) -> Self {
        Self {
            last_access: Some(last_access),
            last_modification: Some(last_modification),
        }
    }
}

/// A named container of sub-groups and entries.
#[derive(Debug)]
pub struct GroupRecord {
    pub name: String,
    pub groups: Vec<GroupId>,
    pub entries: Vec<EntryId>,
    pub times: Timestamps,
}

/// One key/value pair of an entry.
///
/// The value is the already-revealed content; it is wiped from memory when
/// the store is dropped.
pub struct Field {
    pub key: String,
    pub value: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("key", &self.key)
            .field("len", &self.value.len())
            .finish()
    }
}

/// One stored credential.
#[derive(Debug)]
pub struct EntryRecord {
    pub uuid: Uuid,
    pub group: GroupId,
    pub fields: Vec<Field>,
    pub times: Timestamps,
}

impl EntryRecord {
    /// Returns the value of the field with the given key, if present.
    pub fn field(&self, key: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_slice())
    }

    /// Name under which the entry appears in its entry listing.
    ///
    /// This is the `Title` field when it is non-empty. Otherwise the
    /// hyphenated UUID is used, which is never empty, is stable for the
    /// same entry and never contains a path separator.
    pub fn display_name(&self) -> Cow<'_, str> {
        match self.field(TITLE_FIELD) {
            Some(title) if !title.is_empty() => String::from_utf8_lossy(title),
            _ => Cow::Owned(self.uuid.hyphenated().to_string()),
        }
    }
}

/// The decrypted database, immutable once built.
#[derive(Debug)]
pub struct CredentialStore {
    groups: Vec<GroupRecord>,
    entries: Vec<EntryRecord>,
}

impl CredentialStore {
    /// Returns the group record for an id.
    ///
    /// Ids are only handed out by the builder of this store, so the index
    /// is always in range.
    pub fn group(&self, id: GroupId) -> &GroupRecord {
        &self.groups[id.0]
    }

    pub fn entry(&self, id: EntryId) -> &EntryRecord {
        &self.entries[id.0]
    }

    /// Returns the field a reference points at, if it still exists.
    pub fn field(&self, field: FieldRef) -> Option<&Field> {
        self.entries.get(field.entry.0)?.fields.get(field.index)
    }

    /// The synthetic container holding the top-level groups.
    pub fn root(&self) -> &GroupRecord {
        self.group(GroupId::ROOT)
    }

    /// Number of real groups (the synthetic container is not counted).
    pub fn group_count(&self) -> usize {
        self.groups.len() - 1
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Incremental constructor for a [`CredentialStore`].
#[derive(Debug)]
pub struct StoreBuilder {
    groups: Vec<GroupRecord>,
    entries: Vec<EntryRecord>,
}

impl StoreBuilder {
    /// Creates a builder holding only the synthetic top-level container.
    pub fn new() -> Self {
        Self {
            groups: vec![GroupRecord {
                name: String::new(),
                groups: Vec::new(),
                entries: Vec::new(),
                times: Timestamps::default(),
            }],
            entries: Vec::new(),
        }
    }

    /// Adds a group as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` was not returned by this builder.
    pub fn add_group(
        &mut self,
        parent: GroupId,
        name: impl Into<String>,
        times: Timestamps,
    ) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(GroupRecord {
            name: name.into(),
            groups: Vec::new(),
            entries: Vec::new(),
            times,
        });
        self.groups[parent.0].groups.push(id);
        id
    }

    /// Adds an entry with no fields as the last entry of `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group` was not returned by this builder.
    pub fn add_entry(&mut self, group: GroupId, uuid: Uuid, times: Timestamps) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(EntryRecord {
            uuid,
            group,
            fields: Vec::new(),
            times,
        });
        self.groups[group.0].entries.push(id);
        id
    }

    /// Appends a field to an entry and returns a reference to it.
    ///
    /// # Panics
    ///
    /// Panics if `entry` was not returned by this builder.
    pub fn add_field(
        &mut self,
        entry: EntryId,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> FieldRef {
        let fields = &mut self.entries[entry.0].fields;
        fields.push(Field {
            key: key.into(),
            value: Zeroizing::new(value.into()),
        });
        FieldRef {
            entry,
            index: fields.len() - 1,
        }
    }

    pub fn build(self) -> CredentialStore {
        CredentialStore {
            groups: self.groups,
            entries: self.entries,
        }
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
