//! Process exit codes.

pub const SUCCESS: u8 = 0;

/// Bad arguments, missing credentials or an unopenable database file.
pub const USAGE: u8 = 1;

/// The key file could not be read.
pub const KEY_FILE: u8 = 2;

/// The key file data could not be turned into a database key.
pub const CREDENTIALS: u8 = 3;

/// Wrong credentials or a corrupt database.
pub const DECODE: u8 = 4;

pub const MOUNT_FAILED: u8 = 6;
