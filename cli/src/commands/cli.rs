use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use objtask_core::api::{AppConfig, VersionedKey};

#[derive(Parser, Debug)]
#[command(name = "objtask", version, about = "Bulk object uploads and deletes")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.objtask/config.toml or ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[arg(long, global = true)]
    pub retry_delay_ms: Option<u64>,

    #[arg(long, global = true)]
    pub chunk_size_mb: Option<u64>,

    /// Storage root for the local transport.
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Print the tasks that would run and exit.
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// No progress bars; print a JSON summary on stdout.
    #[arg(long, global = true, default_value_t = false)]
    pub quiet: bool,
}

impl Args {
    /// Flags take precedence over file and environment configuration.
    pub fn apply_overrides(&self, cfg: &mut AppConfig) {
        if let Some(v) = self.max_concurrent {
            cfg.tasks.max_concurrent = v;
        }
        if let Some(v) = self.max_retries {
            cfg.tasks.max_retries = v;
        }
        if let Some(v) = self.retry_delay_ms {
            cfg.tasks.retry_delay_ms = v;
        }
        if let Some(v) = self.chunk_size_mb {
            cfg.upload.chunk_size_mb = v;
        }
        if let Some(root) = &self.root {
            cfg.transport.root = Some(root.clone());
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct UploadArgs {
    #[arg(long)]
    pub bucket: String,

    /// Key prefix prepended to every uploaded object.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Files, directories or glob patterns.
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DeleteArgs {
    #[arg(long)]
    pub bucket: String,

    #[arg(long)]
    pub prefix: Option<String>,

    /// Bypass retention and legal-hold protections.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Delete one object version (KEY=VERSION). Can be specified multiple times.
    #[arg(long = "version", value_parser = parse_versioned_key, action = clap::ArgAction::Append)]
    pub versions: Vec<VersionedKey>,

    pub keys: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Upload(UploadArgs),
    Delete(DeleteArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::Delete(_) => "delete",
        }
    }
}

pub fn parse_versioned_key(raw: &str) -> Result<VersionedKey, String> {
    match raw.rsplit_once('=') {
        Some((key, version)) if !key.is_empty() && !version.is_empty() => {
            Ok(VersionedKey::new(key, version))
        }
        _ => Err(format!("expected KEY=VERSION, got '{}'", raw)),
    }
}
