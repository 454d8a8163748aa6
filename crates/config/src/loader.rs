use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ChatmapConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chatmap.toml",
    "chatmap.yaml",
    "chatmap.yml",
    "chatmap.json",
];

/// Load config from the given path (any supported format).
///
/// `${VAR}` placeholders are substituted before parsing and environment
/// overrides are applied afterwards.
pub fn load_config(path: &Path) -> anyhow::Result<ChatmapConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./chatmap.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/chatmap/chatmap.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus environment overrides) when no file is found
/// or the file cannot be parsed.
pub fn discover_and_load() -> ChatmapConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = ChatmapConfig::default();
    config.apply_env_overrides();
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory, `~/.config/chatmap/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("chatmap"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ChatmapConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
