#![deny(unsafe_code)]

mod exit_code;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use kpfs_core::{Credentials, LoadError, load_database};
use kpfs_fuse::{FuseError, KeePassFS, MountConfig};

/// Mounts a KeePass database as a read-only filesystem
#[derive(Parser)]
#[command(name = "kpfs")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Mount with a password from the environment
    kpfs -d ~/passwords.kdbx -m /mnt/keepass -e KEEPASS_PASSWORD

    # Mount with a key file and an interactive password prompt
    kpfs -d ~/passwords.kdbx -m /mnt/keepass -k ~/passwords.key --prompt

    # Read a password
    cat /mnt/keepass/Passwords/groups/Personal/entries/Bank/Password
")]
struct Cli {
    /// KeePass database file
    #[arg(short, long, value_name = "FILE")]
    db: PathBuf,

    /// Directory to mount the database at
    #[arg(short, long, value_name = "DIR")]
    mount_point: PathBuf,

    /// Database password (insecure, prefer --password-env or --prompt)
    #[arg(short, long)]
    password: Option<String>,

    /// Name of the environment variable to read the password from
    #[arg(short = 'e', long, value_name = "VAR")]
    password_env: Option<String>,

    /// Prompt for the password if none was given otherwise
    #[arg(long)]
    prompt: bool,

    /// Key file for the database
    #[arg(short, long, value_name = "FILE")]
    key_file: Option<PathBuf>,

    /// Allow other users to access the mount (needs user_allow_other in /etc/fuse.conf)
    #[arg(long)]
    allow_other: bool,

    /// Seconds the kernel may cache attributes and lookups
    #[arg(long, value_name = "SECONDS", default_value_t = kpfs_fuse::DEFAULT_ATTR_TTL.as_secs())]
    attr_ttl: u64,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Failures owned by the command line layer.
#[derive(Debug, Error)]
enum CliError {
    #[error("Error while reading key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also arrive here
            let code = if e.use_stderr() {
                exit_code::USAGE
            } else {
                exit_code::SUCCESS
            };
            e.print().ok();
            return ExitCode::from(code);
        }
    };

    setup_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let credentials = build_credentials(cli)?;
    let store = load_database(&cli.db, &credentials)?;
    drop(credentials);

    let config = MountConfig::default()
        .attr_ttl(Duration::from_secs(cli.attr_ttl))
        .allow_other(cli.allow_other);

    let fs = KeePassFS::with_config(Arc::new(store), &config);
    let mountpoint = cli.mount_point.display();
    let session = kpfs_fuse::spawn(fs, &cli.mount_point, &config)
        .with_context(|| format!("Error mounting keepass filesystem at {mountpoint}"))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tx.send(()).ok();
    })
    .context("Failed to set signal handler")?;

    println!("Successfully mounted keepass file");
    rx.recv().ok();

    tracing::info!(%mountpoint, "Unmounting");
    drop(session);
    Ok(())
}

/// Collects the password and key file data.
///
/// Password sources in priority order:
/// 1. --password
/// 2. The variable named by --password-env
/// 3. Interactive prompt (--prompt)
fn build_credentials(cli: &Cli) -> Result<Credentials> {
    let mut credentials = Credentials::new();

    if let Some(password) = get_password(cli)? {
        credentials = credentials.with_password(password);
    }
    if let Some(path) = &cli.key_file {
        credentials = credentials.with_key_file(read_key_file(path)?);
    }
    Ok(credentials)
}

fn get_password(cli: &Cli) -> Result<Option<Zeroizing<String>>> {
    if let Some(password) = cli.password.as_deref().filter(|p| !p.is_empty()) {
        return Ok(Some(Zeroizing::new(password.to_string())));
    }
    if let Some(var) = &cli.password_env {
        match std::env::var(var) {
            Ok(password) if !password.is_empty() => {
                return Ok(Some(Zeroizing::new(password)));
            }
            _ => tracing::debug!(var = %var, "Password variable unset or empty"),
        }
    }
    if cli.prompt {
        let password = rpassword::prompt_password("Database password: ")
            .context("Failed to read password")?;
        return Ok(Some(Zeroizing::new(password)));
    }
    Ok(None)
}

fn read_key_file(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let data = fs::read(path).map_err(|source| CliError::KeyFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Zeroizing::new(data))
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<CliError>().is_some() {
            return exit_code::KEY_FILE;
        }

        if let Some(load_err) = cause.downcast_ref::<LoadError>() {
            return match load_err {
                LoadError::MissingCredentials | LoadError::Open { .. } => exit_code::USAGE,
                LoadError::KeyFile(_) => exit_code::CREDENTIALS,
                LoadError::Decode(_) => exit_code::DECODE,
            };
        }

        if cause.downcast_ref::<FuseError>().is_some() {
            return exit_code::MOUNT_FAILED;
        }
    }
    exit_code::USAGE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("kpfs").chain(args.iter().copied());
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_parse_short_flags() {
        let cli = parse(&["-d", "db", "-m", "mnt", "-p", "pw", "-k", "key", "-vv"]);
        assert_eq!(cli.db, PathBuf::from("db"));
        assert_eq!(cli.mount_point, PathBuf::from("mnt"));
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert_eq!(cli.key_file, Some(PathBuf::from("key")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.attr_ttl, 60);
        assert!(!cli.allow_other);
    }

    #[test]
    fn test_db_and_mount_point_required() {
        assert!(Cli::try_parse_from(["kpfs", "-d", "db.kdbx"]).is_err());
        assert!(Cli::try_parse_from(["kpfs", "-m", "/mnt/kp"]).is_err());
    }

    #[test]
    fn test_password_flag_wins_over_env() {
        let cli = parse(&["-d", "db", "-m", "mnt", "-p", "flag", "-e", "KPFS_UNSET"]);
        let password = get_password(&cli).unwrap().unwrap();
        assert_eq!(password.as_str(), "flag");
    }

    #[test]
    fn test_empty_password_is_absent() {
        let cli = parse(&["-d", "db", "-m", "mnt", "-p", ""]);
        assert!(get_password(&cli).unwrap().is_none());
        assert!(build_credentials(&cli).unwrap().is_empty());
    }

    #[test]
    fn test_unset_env_var_is_absent() {
        let cli = parse(&["-d", "db", "-m", "mnt", "-e", "KPFS_UNSET"]);
        assert!(get_password(&cli).unwrap().is_none());
    }

    #[test]
    fn test_missing_key_file_categorized() {
        let cli = parse(&["-d", "db", "-m", "mnt", "-k", "/nonexistent/kpfs.key"]);
        let err = build_credentials(&cli).unwrap_err();
        assert_eq!(categorize_error(&err), exit_code::KEY_FILE);
    }

    #[test]
    fn test_load_errors_categorized() {
        let err = anyhow::Error::from(LoadError::MissingCredentials);
        assert_eq!(categorize_error(&err), exit_code::USAGE);

        let err = anyhow::Error::from(LoadError::KeyFile(io::Error::other("bad key")));
        assert_eq!(categorize_error(&err), exit_code::CREDENTIALS);
    }

    #[test]
    fn test_mount_error_categorized() {
        let err = anyhow::Error::from(FuseError::Io(io::Error::other("no fuse")))
            .context("Error mounting keepass filesystem");
        assert_eq!(categorize_error(&err), exit_code::MOUNT_FAILED);
    }
}
