use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default objtask data directory: ~/.objtask
pub fn get_objtask_data_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".objtask"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.objtask/config.toml (highest)
    let data_dir = get_objtask_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    finish(cfg, &data_dir)
}

/// Load an explicit config file, then apply the same defaults and overrides
/// as [`load_default`].
pub fn load_file(path: &Path) -> anyhow::Result<AppConfig> {
    let cfg = load_from_path(path)?;
    finish(cfg, &get_objtask_data_dir()?)
}

fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read {} failed: {e}", path.display()))?;
    Ok(toml::from_str::<AppConfig>(&s)?)
}

fn finish(mut cfg: AppConfig, data_dir: &Path) -> anyhow::Result<AppConfig> {
    if cfg
        .transport
        .root
        .as_deref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.transport.root = Some(data_dir.join("storage").to_string_lossy().to_string());
    }

    if cfg.logging.file
        && cfg
            .logging
            .directory
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok())?;
    Ok(cfg)
}

// Environment variable overrides (Priority 0: highest)
fn apply_env_overrides<F>(cfg: &mut AppConfig, var: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("OBJTASK_MAX_CONCURRENT") {
        cfg.tasks.max_concurrent = parse_env("OBJTASK_MAX_CONCURRENT", &v)?;
    }
    if let Some(v) = get("OBJTASK_MAX_RETRIES") {
        cfg.tasks.max_retries = parse_env("OBJTASK_MAX_RETRIES", &v)?;
    }
    if let Some(v) = get("OBJTASK_RETRY_DELAY_MS") {
        cfg.tasks.retry_delay_ms = parse_env("OBJTASK_RETRY_DELAY_MS", &v)?;
    }
    if let Some(v) = get("OBJTASK_CHUNK_SIZE_MB") {
        cfg.upload.chunk_size_mb = parse_env("OBJTASK_CHUNK_SIZE_MB", &v)?;
    }
    if let Some(v) = get("OBJTASK_STORAGE_ROOT") {
        cfg.transport.root = Some(v);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{name} has invalid value '{value}'"))
}
