//! Read-only filesystem projection of decrypted KeePass databases.
//!
//! The crate has three layers:
//!
//! - [`store`]: the immutable, decrypted credential tree
//! - [`loader`]: unlocking a `.kdbx` file into a store
//! - [`projection`] and [`node`]: the mapping of that tree onto
//!   directories and files (lookup, listing, attributes, reads)
//!
//! # Usage
//!
//! ```ignore
//! use kpfs_core::{Credentials, Projection, load_database};
//!
//! let store = load_database(path, &Credentials::new().with_password(pw))?;
//! let fs = Projection::new(Arc::new(store));
//! let root = fs.root();
//! for entry in fs.list(&root) {
//!     println!("{}", entry.name);
//! }
//! ```

pub mod error;
pub mod loader;
pub mod node;
pub mod projection;
pub mod store;

pub use error::{LoadError, ProjectionError, ProjectionResult};
pub use loader::{Credentials, from_keepass, load_database};
pub use node::{DirEntry, Materialized, Node, NodeKind};
pub use projection::{NodeAttributes, OpenDisposition, Projection};
pub use store::{CredentialStore, EntryId, FieldRef, GroupId, StoreBuilder, Timestamps};
