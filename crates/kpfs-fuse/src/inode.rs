//! Inode management for the FUSE filesystem.
//!
//! This module provides the mapping between FUSE inodes and projection
//! nodes. Nodes are plain values that compare equal when they refer to the
//! same record, so the table keys on the node itself: resolving the same
//! path twice yields the same inode for as long as the kernel holds it.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use kpfs_core::{Node, NodeKind};
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
///
/// Contains the projected node, its parent inode (for `..`), and the
/// FUSE `nlookup` counter for reference counting.
#[derive(Debug)]
pub struct InodeEntry {
    /// The projected node.
    pub node: Node,
    /// Inode of the directory this node was resolved from.
    pub parent: u64,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    /// Creates a new inode entry with nlookup = 1.
    pub fn new(node: Node, parent: u64) -> Self {
        Self {
            node,
            parent,
            nlookup: AtomicU64::new(1),
        }
    }

    /// Creates a new inode entry with nlookup = 0.
    /// Used for entries returned from `readdir()` which per the FUSE protocol
    /// should NOT increment the lookup count.
    pub fn new_no_lookup(node: Node, parent: u64) -> Self {
        Self {
            node,
            parent,
            nlookup: AtomicU64::new(0),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by the given amount and returns the new value.
    /// Returns `None` if the count would go negative (shouldn't happen in normal operation).
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    /// Returns the current lookup count.
    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }
}

/// Thread-safe table mapping between inodes and projection nodes.
///
/// Both directions use `DashMap` for lock-free concurrent access.
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
    by_node: DashMap<Node, u64>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a new inode table with the root node pre-allocated.
    pub fn new() -> Self {
        let entries = DashMap::new();
        let by_node = DashMap::new();
        entries.insert(ROOT_INODE, InodeEntry::new(Node::ROOT, ROOT_INODE));
        by_node.insert(Node::ROOT, ROOT_INODE);
        Self {
            entries,
            by_node,
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Allocates a new inode for the given node.
    /// If the node already has an inode, increments its lookup count and
    /// returns the existing inode.
    pub fn get_or_insert(&self, node: Node, parent: u64) -> u64 {
        let (inode, inserted) = self.insert_with(node, || InodeEntry::new(node, parent));
        if inserted {
            return inode;
        }
        if let Some(entry) = self.entries.get(&inode) {
            entry.inc_nlookup();
        }
        inode
    }

    /// Allocates a new inode for the given node WITHOUT incrementing nlookup.
    ///
    /// Per the FUSE protocol, returning entries from `readdir()` should NOT affect
    /// the lookup count.
    pub fn get_or_insert_no_lookup_inc(&self, node: Node, parent: u64) -> u64 {
        if let Some(inode) = self.get_inode(&node) {
            return inode;
        }
        let (inode, _) = self.insert_with(node, || InodeEntry::new_no_lookup(node, parent));
        inode
    }

    /// Returns the inode for `node`, creating the entry with `make` if absent,
    /// and whether it was created by this call.
    fn insert_with(&self, node: Node, make: impl FnOnce() -> InodeEntry) -> (u64, bool) {
        // The node map entry lock serializes concurrent inserts of one node.
        let mut inserted = false;
        let slot = self.by_node.entry(node).or_insert_with(|| {
            inserted = true;
            let inode = self.next_inode.fetch_add(1, Ordering::Relaxed);
            self.entries.insert(inode, make());
            inode
        });
        (*slot, inserted)
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, inode: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.entries.get(&inode)
    }

    /// Returns the node behind an inode.
    pub fn node(&self, inode: u64) -> Option<Node> {
        self.entries.get(&inode).map(|entry| entry.node)
    }

    /// Looks up an inode by node.
    pub fn get_inode(&self, node: &Node) -> Option<u64> {
        self.by_node.get(node).map(|inode| *inode)
    }

    /// Decrements the lookup count for an inode.
    /// If the count reaches zero, the inode is evicted.
    /// Returns `true` if the inode was evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        if let Some(entry) = self.entries.get(&inode)
            && let Some(remaining) = entry.dec_nlookup(nlookup)
            && remaining == 0
        {
            let node = entry.node;
            drop(entry);
            self.by_node.remove_if(&node, |_, mapped| *mapped == inode);
            return self.entries.remove(&inode).is_some();
        }
        false
    }

    /// Returns the number of inodes currently in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpfs_core::{GroupId, StoreBuilder, Timestamps};

    fn group_node() -> Node {
        let mut builder = StoreBuilder::new();
        Node::Group(builder.add_group(GroupId::ROOT, "Personal", Timestamps::default()))
    }

    #[test]
    fn test_root_inode_exists() {
        let table = InodeTable::new();
        assert_eq!(table.node(ROOT_INODE), Some(Node::ROOT));
        assert_eq!(table.get_inode(&Node::ROOT), Some(ROOT_INODE));
        assert!(table.is_empty());
    }

    #[test]
    fn test_allocate_inode() {
        let table = InodeTable::new();
        let node = group_node();

        let inode = table.get_or_insert(node, ROOT_INODE);
        assert!(inode > ROOT_INODE);

        // Second call should return same inode
        let inode2 = table.get_or_insert(node, ROOT_INODE);
        assert_eq!(inode, inode2);

        // Lookup count should be 2 now
        assert_eq!(table.get(inode).unwrap().nlookup(), 2);
        assert_eq!(table.get(inode).unwrap().parent, ROOT_INODE);
    }

    #[test]
    fn test_distinct_nodes_get_distinct_inodes() {
        let table = InodeTable::new();
        let mut builder = StoreBuilder::new();
        let a = builder.add_group(GroupId::ROOT, "a", Timestamps::default());
        let b = builder.add_group(GroupId::ROOT, "b", Timestamps::default());

        let ia = table.get_or_insert(Node::Group(a), ROOT_INODE);
        let ib = table.get_or_insert(Node::Group(b), ROOT_INODE);
        let ia_list = table.get_or_insert(Node::GroupList(a), ia);
        assert_ne!(ia, ib);
        assert_ne!(ia, ia_list);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_readdir_insert_does_not_count() {
        let table = InodeTable::new();
        let node = group_node();

        let inode = table.get_or_insert_no_lookup_inc(node, ROOT_INODE);
        assert_eq!(table.get(inode).unwrap().nlookup(), 0);

        // A later lookup reuses the inode and counts it
        assert_eq!(table.get_or_insert(node, ROOT_INODE), inode);
        assert_eq!(table.get(inode).unwrap().nlookup(), 1);
    }

    #[test]
    fn test_forget_evicts() {
        let table = InodeTable::new();
        let node = group_node();

        let inode = table.get_or_insert(node, ROOT_INODE);
        table.get_or_insert(node, ROOT_INODE);

        assert!(!table.forget(inode, 1));
        assert!(table.get(inode).is_some());

        assert!(table.forget(inode, 1));
        assert!(table.get(inode).is_none());
        assert!(table.get_inode(&node).is_none());

        // Re-resolution allocates a fresh inode
        let again = table.get_or_insert(node, ROOT_INODE);
        assert_ne!(again, inode);
    }

    #[test]
    fn test_forget_root_never_evicts() {
        let table = InodeTable::new();
        assert!(!table.forget(ROOT_INODE, 1));
        assert!(table.get(ROOT_INODE).is_some());
    }

    #[test]
    fn test_forget_underflow_is_ignored() {
        let table = InodeTable::new();
        let inode = table.get_or_insert(group_node(), ROOT_INODE);
        assert!(!table.forget(inode, 5));
        assert_eq!(table.get(inode).unwrap().nlookup(), 1);
    }

    #[test]
    fn test_concurrent_inserts_agree() {
        use std::sync::Arc;

        let table = Arc::new(InodeTable::new());
        let node = group_node();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.get_or_insert(node, ROOT_INODE))
            })
            .collect();
        let inodes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(inodes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(inodes[0]).unwrap().nlookup(), 8);
    }
}
