//! Mount configuration for the FUSE filesystem.

use std::time::Duration;

/// Default time-to-live for attributes and entries handed to the kernel.
///
/// The database is loaded once and never changes while mounted, so the
/// kernel may cache for a long time.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(60);

/// Filesystem subtype shown in the mount table (`fuse.keepass`).
pub const FS_SUBTYPE: &str = "keepass";

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and lookups returned to the kernel.
    ///
    /// Default: 60 seconds.
    pub attr_ttl: Duration,

    /// Source name shown in the mount table.
    ///
    /// Default: the mount point path.
    pub fs_name: Option<String>,

    /// Allow users other than the mounting user to access the filesystem.
    ///
    /// Requires `user_allow_other` in `/etc/fuse.conf`. Default: false.
    pub allow_other: bool,

    /// Unmount automatically when the process exits. Default: true.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            fs_name: None,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

impl MountConfig {
    /// Sets the cache TTL for attributes and lookups.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the source name shown in the mount table.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }
}
