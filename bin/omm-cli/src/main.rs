//! OMM CLI - admin commands against a local namespace
//!
//! Opens the metadata database in-process and performs a single
//! operation. Exit status is 0 on success, 1 when the manager reports a
//! failure and 2 for malformed arguments or an unusable config file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use omm_common::{NameKind, OmConfig, ResultCode, validate_name};
use omm_core::{LocalBlockAllocator, OzoneManager, RequestContext};
use omm_store::RedbKvStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "omm-cli")]
#[command(about = "OMM Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/omm/om.toml")]
    config: PathBuf,

    /// Directory holding the metadata database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore the newest trashed copy of a key into another bucket
    RecoverTrash {
        /// `<volume>/<bucket>/<key>` of the deleted key
        path: String,
        /// Bucket in the same volume to restore into
        dest_bucket: String,
    },
}

/// Why a command did not succeed
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    /// Malformed arguments or config; nothing was sent to the manager
    Usage(String),
    /// The manager refused or failed the request
    Rejected(ResultCode),
}

impl Failure {
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Rejected(_) => 1,
        }
    }
}

/// Split `vol/buk/key` into its three validated names
fn parse_key_path(path: &str) -> Result<(&str, &str, &str), Failure> {
    let parts: Vec<&str> = path.split('/').collect();
    let [volume, bucket, key] = parts.as_slice() else {
        return Err(Failure::Usage(format!(
            "expected <volume>/<bucket>/<key>, got '{path}'"
        )));
    };
    for (kind, name) in [
        (NameKind::Volume, volume),
        (NameKind::Bucket, bucket),
        (NameKind::Key, key),
    ] {
        validate_name(kind, name).map_err(|e| Failure::Usage(e.to_string()))?;
    }
    Ok((*volume, *bucket, *key))
}

fn recover_trash(om: &OzoneManager, path: &str, dest_bucket: &str) -> Result<(), Failure> {
    let (volume, bucket, key) = parse_key_path(path)?;
    validate_name(NameKind::Bucket, dest_bucket).map_err(|e| Failure::Usage(e.to_string()))?;
    om.recover_trash(&RequestContext::new(), volume, bucket, key, dest_bucket)
        .map(|_| ())
        .map_err(|e| Failure::Rejected(e.code()))
}

/// Load and validate the config, applying `--data-dir`
fn load_config(args: &Args) -> Result<OmConfig, Failure> {
    let mut config = OmConfig::load(Some(args.config.as_path()))
        .map_err(|e| Failure::Usage(format!("loading {}: {e}", args.config.display())))?;
    if let Some(dir) = &args.data_dir {
        config.node.data_dir.clone_from(dir);
    }
    Ok(config)
}

fn open_manager(config: OmConfig) -> Result<OzoneManager> {
    let db_path = config.db_path();
    debug!("Opening metadata database at {}", db_path.display());
    let kv = Arc::new(RedbKvStore::open(&db_path)?);
    let allocator = Arc::new(
        LocalBlockAllocator::new(config.block.size_bytes)
            .with_max_blocks_per_request(config.block.max_blocks_per_request()),
    );
    Ok(OzoneManager::open(config, kv, allocator)?)
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(failure) => {
            if let Failure::Usage(reason) = &failure {
                eprintln!("Error: {reason}");
            }
            return ExitCode::from(failure.exit_code());
        }
    };
    let om = match open_manager(config) {
        Ok(om) => om,
        Err(e) => {
            eprintln!("Error: {e:#}");
            println!("failed: {}", ResultCode::KvUnavailable);
            return ExitCode::from(1);
        }
    };

    let outcome = match &args.command {
        Commands::RecoverTrash { path, dest_bucket } => recover_trash(&om, path, dest_bucket),
    };
    match outcome {
        Ok(()) => {
            println!("recovered");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            match &failure {
                Failure::Usage(reason) => eprintln!("Error: {reason}"),
                Failure::Rejected(code) => println!("failed: {code}"),
            }
            ExitCode::from(failure.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omm_common::{BucketArgs, KeyArgs, VolumeArgs};

    fn manager(dir: &tempfile::TempDir) -> OzoneManager {
        let kv = Arc::new(RedbKvStore::open(dir.path().join("om.db")).unwrap());
        OzoneManager::open(
            OmConfig::default(),
            kv,
            Arc::new(LocalBlockAllocator::new(1024)),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_key_path() {
        assert_eq!(parse_key_path("v/b/k"), Ok(("v", "b", "k")));
        for bad in ["v/b", "v/b/k/x", "v//k", "v/b/k k", ""] {
            let err = parse_key_path(bad).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{bad}");
        }
    }

    #[test]
    fn test_recover_trash_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let om = manager(&dir);
        let ctx = RequestContext::new();
        om.create_volume(&ctx, &VolumeArgs::new("v", "alice")).unwrap();
        om.create_bucket(&ctx, &BucketArgs::new("v", "src").with_trash(true))
            .unwrap();
        om.create_bucket(&ctx, &BucketArgs::new("v", "dst")).unwrap();
        let args = KeyArgs::new("v", "src", "k").with_size(10);
        let session = om.open_key(&ctx, &args).unwrap();
        om.commit_key(&ctx, &args, session.client_id, 10).unwrap();
        om.delete_key(&ctx, &args).unwrap();

        let missing = recover_trash(&om, "v/src/k", "nope").unwrap_err();
        assert_eq!(missing, Failure::Rejected(ResultCode::BucketNotFound));
        assert_eq!(missing.exit_code(), 1);

        assert_eq!(recover_trash(&om, "v/src/k", "dst"), Ok(()));
        assert!(om.lookup_key(&ctx, &KeyArgs::new("v", "dst", "k")).is_ok());

        assert_eq!(
            recover_trash(&om, "v/src/k", "dst"),
            Err(Failure::Rejected(ResultCode::KeyNotFound))
        );
        assert_eq!(recover_trash(&om, "v/src/k", "d/st").unwrap_err().exit_code(), 2);
    }

    #[test]
    fn test_bad_config_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let invalid = dir.path().join("invalid.toml");
        std::fs::write(&invalid, "[om]\nmax_list_limit = 0\n").unwrap();
        let malformed = dir.path().join("malformed.toml");
        std::fs::write(&malformed, "[om\nmax_list_limit = ").unwrap();

        for path in [&invalid, &malformed] {
            let config = path.to_str().unwrap();
            let args = Args::parse_from(["omm-cli", "--config", config, "recover-trash", "v/b/k", "dst"]);
            let failure = load_config(&args).unwrap_err();
            assert!(matches!(failure, Failure::Usage(_)), "{config}");
            assert_eq!(failure.exit_code(), 2);
        }

        // a missing file falls back to defaults
        let absent = dir.path().join("absent.toml");
        let args = Args::parse_from([
            "omm-cli",
            "--config",
            absent.to_str().unwrap(),
            "--data-dir",
            dir.path().to_str().unwrap(),
            "recover-trash",
            "v/b/k",
            "dst",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.node.data_dir, dir.path());
        assert!(open_manager(config).is_ok());
    }

    #[test]
    fn test_cli_parses_command() {
        let args = Args::parse_from(["omm-cli", "--data-dir", "/tmp/x", "recover-trash", "v/b/k", "dst"]);
        let Commands::RecoverTrash { path, dest_bucket } = args.command;
        assert_eq!(path, "v/b/k");
        assert_eq!(dest_bucket, "dst");
        assert!(Args::try_parse_from(["omm-cli", "recover-trash", "v/b/k"]).is_err());
    }
}
