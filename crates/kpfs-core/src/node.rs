//! Filesystem nodes projected from the credential store.
//!
//! A [`Node`] is a small `Copy` value holding a typed index into the store.
//! Two resolutions of the same path yield equal nodes, which lets the host
//! layer key its identity cache (inode table) on the node itself.

use crate::store::{EntryId, FieldRef, GroupId};

/// Permission bits for directory nodes (r-xr-xr-x).
pub const DIR_PERM: u16 = 0o555;

/// Permission bits for field nodes (r--r--r--).
pub const LEAF_PERM: u16 = 0o444;

/// Name of the sub-listing of a group's child groups.
pub const GROUPS_DIR: &str = "groups";

/// Name of the sub-listing of a group's entries.
pub const ENTRIES_DIR: &str = "entries";

/// One node of the projected tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// Listing of a group's child groups. The filesystem root is the
    /// group-list of [`GroupId::ROOT`].
    GroupList(GroupId),
    /// A group, exposing `groups` and `entries`.
    Group(GroupId),
    /// Listing of a group's entries.
    EntryList(GroupId),
    /// An entry, exposing one file per field.
    Entry(EntryId),
    /// A field value, readable as a file.
    Field(FieldRef),
}

impl Node {
    /// The root node of the filesystem.
    pub const ROOT: Node = Node::GroupList(GroupId::ROOT);

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Field(_) => NodeKind::Leaf,
            Node::GroupList(_) | Node::Group(_) | Node::EntryList(_) | Node::Entry(_) => {
                NodeKind::Directory
            }
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == NodeKind::Directory
    }
}

/// Capability tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    Leaf,
}

impl NodeKind {
    /// Permission bits reported for nodes of this kind.
    pub fn permissions(self) -> u16 {
        match self {
            NodeKind::Directory => DIR_PERM,
            NodeKind::Leaf => LEAF_PERM,
        }
    }
}

/// A node handed back by path resolution, ready for the host to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub node: Node,
    pub kind: NodeKind,
    pub perm: u16,
}

impl Materialized {
    /// Tags a resolved node with its capability and permission bits.
    pub fn new(node: Node) -> Self {
        let kind = node.kind();
        Self {
            node,
            kind,
            perm: kind.permissions(),
        }
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub node: Node,
    pub kind: NodeKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, node: Node) -> Self {
        Self {
            name: name.into(),
            node,
            kind: node.kind(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}
