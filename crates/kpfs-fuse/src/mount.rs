//! Mounting a [`KeePassFS`] in a background session.

use crate::config::{FS_SUBTYPE, MountConfig};
use crate::error::{FuseError, FuseResult};
use crate::filesystem::KeePassFS;
use fuser::{BackgroundSession, MountOption};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Builds the mount options for `config`.
///
/// The mount is always read-only.
pub fn mount_options(config: &MountConfig, mountpoint: &Path) -> Vec<MountOption> {
    let fs_name = config
        .fs_name
        .clone()
        .unwrap_or_else(|| mountpoint.display().to_string());

    let mut options = vec![
        MountOption::FSName(fs_name),
        MountOption::Subtype(FS_SUBTYPE.to_string()),
        MountOption::RO,
        // Let the kernel enforce the mode bits
        MountOption::DefaultPermissions,
    ];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    // On macOS, set the volume name shown in Finder
    #[cfg(target_os = "macos")]
    {
        options.push(MountOption::CUSTOM(format!("volname={FS_SUBTYPE}")));
    }

    options
}

/// Mounts `fs` at `mountpoint` and serves it from a background thread.
///
/// The filesystem stays mounted until the returned session is dropped.
pub fn spawn(
    fs: KeePassFS,
    mountpoint: &Path,
    config: &MountConfig,
) -> FuseResult<BackgroundSession> {
    if !mountpoint.is_dir() {
        return Err(FuseError::Io(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("mount point {} is not a directory", mountpoint.display()),
        )));
    }

    let options = mount_options(config, mountpoint);
    debug!(options = ?options, "Mount options");
    let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
    info!(mountpoint = %mountpoint.display(), "KeePass database mounted");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpfs_core::StoreBuilder;
    use std::sync::Arc;

    #[test]
    fn test_default_options() {
        let options = mount_options(&MountConfig::default(), Path::new("/mnt/keepass"));
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::Subtype("keepass".to_string())));
        assert!(options.contains(&MountOption::FSName("/mnt/keepass".to_string())));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_configured_options() {
        let config = MountConfig::default()
            .fs_name("passwords.kdbx")
            .allow_other(true)
            .auto_unmount(false);
        let options = mount_options(&config, Path::new("/mnt/keepass"));
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::FSName("passwords.kdbx".to_string())));
        assert!(options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn test_spawn_rejects_missing_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let fs = KeePassFS::new(Arc::new(StoreBuilder::new().build()));
        let err = spawn(fs, &missing, &MountConfig::default()).unwrap_err();
        assert!(matches!(err, FuseError::Io(ref e) if e.kind() == io::ErrorKind::NotADirectory));
    }
}
