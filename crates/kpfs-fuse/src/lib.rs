//! FUSE filesystem for KeePass databases.
//!
//! This crate mounts a [`CredentialStore`](kpfs_core::CredentialStore) as a
//! read-only native filesystem. Groups, entries and fields appear as
//! directories and files; writes of any kind fail with `EROFS`.
//!
//! # Usage
//!
//! ```ignore
//! use kpfs_fuse::{KeePassFS, MountConfig, mount};
//!
//! let config = MountConfig::default();
//! let fs = KeePassFS::with_config(store, &config);
//! let session = mount::spawn(fs, mountpoint, &config)?;
//! ```

pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod mount;

pub use config::{DEFAULT_ATTR_TTL, FS_SUBTYPE, MountConfig};
pub use error::{FuseError, FuseResult, ToErrno};
pub use filesystem::KeePassFS;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use mount::{mount_options, spawn};
