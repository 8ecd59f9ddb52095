//! Filesystem projection over a [`CredentialStore`].
//!
//! [`Projection`] is the context object the host filesystem driver calls
//! into: path resolution, directory listing, attribute reporting, open and
//! byte-range reads. Every operation reads the store afresh and has no side
//! effects, so concurrent calls need no synchronization.

use crate::node::{DirEntry, ENTRIES_DIR, GROUPS_DIR, Materialized, Node};
use crate::store::{CredentialStore, FieldRef, Timestamps};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::trace;

/// Errors surfaced by the projection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    /// No child with the requested name.
    #[error("No such entry: {name}")]
    NotFound { name: String },

    /// A read was requested at a negative offset.
    #[error("Invalid read offset: {0}")]
    InvalidOffset(i64),

    /// Open was requested on a directory node.
    #[error("Not a readable field")]
    NotALeaf,
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;

/// Size and timestamps of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttributes {
    pub size: u64,
    /// `None` when the node has no backing record with a recorded time.
    pub access_time: Option<SystemTime>,
    pub modify_time: Option<SystemTime>,
    /// Always the epoch; the database does not record creation time.
    pub create_time: SystemTime,
}

impl NodeAttributes {
    fn from_times(size: u64, times: Timestamps) -> Self {
        Self {
            size,
            access_time: times.last_access,
            modify_time: times.last_modification,
            create_time: SystemTime::UNIX_EPOCH,
        }
    }
}

/// How the host should treat an opened field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// Content never changes; the host may keep its page cache across opens.
    KeepCache,
}

/// Read-only filesystem view of a credential store.
#[derive(Debug, Clone)]
pub struct Projection {
    store: Arc<CredentialStore>,
}

impl Projection {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The node mounted at the filesystem root.
    pub fn root(&self) -> Node {
        Node::ROOT
    }

    /// Finds the child of `parent` named `name`.
    ///
    /// Names are compared byte-for-byte. When several children share a
    /// name the first one in store order wins.
    pub fn resolve(&self, parent: &Node, name: &str) -> ProjectionResult<Materialized> {
        let child = match *parent {
            Node::GroupList(group) => self
                .store
                .group(group)
                .groups
                .iter()
                .find(|&&child| self.store.group(child).name == name)
                .map(|&child| Node::Group(child)),
            Node::Group(group) => match name {
                GROUPS_DIR => Some(Node::GroupList(group)),
                ENTRIES_DIR => Some(Node::EntryList(group)),
                _ => None,
            },
            Node::EntryList(group) => self
                .store
                .group(group)
                .entries
                .iter()
                .find(|&&entry| self.store.entry(entry).display_name() == name)
                .map(|&entry| Node::Entry(entry)),
            Node::Entry(entry) => self
                .store
                .entry(entry)
                .fields
                .iter()
                .position(|field| field.key == name)
                .map(|index| Node::Field(FieldRef { entry, index })),
            Node::Field(_) => None,
        };

        match child {
            Some(node) => Ok(Materialized::new(node)),
            None => {
                trace!(?parent, name, "resolve miss");
                Err(ProjectionError::NotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Lists the children of `node` in store order.
    ///
    /// Field nodes have no children and list as empty.
    pub fn list(&self, node: &Node) -> Vec<DirEntry> {
        match *node {
            Node::GroupList(group) => self
                .store
                .group(group)
                .groups
                .iter()
                .map(|&child| {
                    DirEntry::new(self.store.group(child).name.clone(), Node::Group(child))
                })
                .collect(),
            Node::Group(group) => vec![
                DirEntry::new(GROUPS_DIR, Node::GroupList(group)),
                DirEntry::new(ENTRIES_DIR, Node::EntryList(group)),
            ],
            Node::EntryList(group) => self
                .store
                .group(group)
                .entries
                .iter()
                .map(|&entry| {
                    DirEntry::new(self.store.entry(entry).display_name(), Node::Entry(entry))
                })
                .collect(),
            Node::Entry(entry) => self
                .store
                .entry(entry)
                .fields
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    DirEntry::new(field.key.clone(), Node::Field(FieldRef { entry, index }))
                })
                .collect(),
            Node::Field(_) => Vec::new(),
        }
    }

    /// Reports size and timestamps of `node`.
    pub fn attributes(&self, node: &Node) -> NodeAttributes {
        match *node {
            Node::GroupList(group) | Node::Group(group) | Node::EntryList(group) => {
                NodeAttributes::from_times(0, self.store.group(group).times)
            }
            Node::Entry(entry) => NodeAttributes::from_times(0, self.store.entry(entry).times),
            Node::Field(field) => {
                let size = self.content(field).len() as u64;
                NodeAttributes::from_times(size, self.store.entry(field.entry).times)
            }
        }
    }

    /// Opens a field for reading. There is no per-open state.
    pub fn open(&self, node: &Node) -> ProjectionResult<OpenDisposition> {
        match node {
            Node::Field(_) => Ok(OpenDisposition::KeepCache),
            _ => Err(ProjectionError::NotALeaf),
        }
    }

    /// Reads up to `max_len` bytes of a field starting at `offset`.
    ///
    /// Reads past the end return an empty slice. Directory nodes read as
    /// empty.
    pub fn read(&self, node: &Node, offset: i64, max_len: usize) -> ProjectionResult<&[u8]> {
        let offset = usize::try_from(offset).map_err(|_| ProjectionError::InvalidOffset(offset))?;
        let Node::Field(field) = *node else {
            return Ok(&[]);
        };
        let content = self.content(field);
        if offset >= content.len() {
            return Ok(&[]);
        }
        let end = offset.saturating_add(max_len).min(content.len());
        Ok(&content[offset..end])
    }

    fn content(&self, field: FieldRef) -> &[u8] {
        self.store
            .field(field)
            .map_or(&[][..], |f| f.value.as_slice())
    }
}
