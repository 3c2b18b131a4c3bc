//! Config file discovery, layered merging, and environment variable overlay.

use crate::{AceConfig, ConfigError, TrainerChoice};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns existing files in load order: system, user, then the CLI path if
/// given and present, otherwise `./acestep.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/acestep/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("acestep/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("acestep.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table, validating it against the schema.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // Reject bad types here so the error names the offending file.
    from_table(table.clone(), path)?;
    Ok(table)
}

/// Load a single config file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<AceConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, path)
}

/// Deserialize a merged table into a config, expanding `~` and `$VAR` in paths.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<AceConfig, ConfigError> {
    let mut config: AceConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    let paths = &mut config.infra.paths;
    paths.adapter_root = expand_path(&paths.adapter_root.to_string_lossy());
    paths.scratch_dir = expand_path(&paths.scratch_dir.to_string_lossy());
    paths.project_root = expand_path(&paths.project_root.to_string_lossy());
    if let Some(dir) = paths.checkpoint_dir.take() {
        paths.checkpoint_dir = Some(expand_path(&dir.to_string_lossy()));
    }

    Ok(config)
}

/// Merge two tables key by key, with `overlay` winning.
///
/// Nested tables merge recursively; any other value (arrays included) is
/// replaced wholesale.
pub fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(toml::Value::Table(base_inner)), toml::Value::Table(overlay_inner)) => {
                base.insert(key, toml::Value::Table(merge_tables(base_inner, overlay_inner)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut AceConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Override logic with an injectable lookup so tests don't touch the process env.
pub(crate) fn apply_overrides_from<F>(config: &mut AceConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = take(&lookup, sources, "ACESTEP_ADAPTER_ROOT") {
        config.infra.paths.adapter_root = expand_path(&v);
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_SCRATCH_DIR") {
        config.infra.paths.scratch_dir = expand_path(&v);
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_PROJECT_ROOT") {
        config.infra.paths.project_root = expand_path(&v);
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_CHECKPOINT_DIR") {
        config.infra.paths.checkpoint_dir = Some(expand_path(&v));
    }

    if let Some(v) = lookup("ACESTEP_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("ACESTEP_HTTP_PORT".to_string());
        }
    }

    if let Some(v) = lookup("ACESTEP_MAX_BODY_MB") {
        if let Ok(mb) = v.parse() {
            config.infra.bind.max_body_mb = mb;
            sources.env_overrides.push("ACESTEP_MAX_BODY_MB".to_string());
        }
    }

    if let Some(v) = take(&lookup, sources, "ACESTEP_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    // Also support standard OTEL env var
    if let Some(v) = take(&lookup, sources, "OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
    }
    if let Some(v) = take(&lookup, sources, "RUST_LOG") {
        config.infra.telemetry.log_level = v;
    }

    if let Some(v) = take(&lookup, sources, "ACESTEP_WORKER_URL") {
        config.model.worker_url = v;
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_DEVICE") {
        config.model.device = v;
    }
    if let Some(v) = take(&lookup, sources, "ACESTEP_LM_MODEL") {
        config.model.lm_model = v;
    }

    if let Some(v) = lookup("ACESTEP_TRAINER") {
        if let Ok(choice) = v.parse::<TrainerChoice>() {
            config.training.trainer = choice;
            sources.env_overrides.push("ACESTEP_TRAINER".to_string());
        }
    }
}

fn take<F>(lookup: &F, sources: &mut ConfigSources, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    sources.env_overrides.push(key.to_string());
    Some(value)
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        match stripped.find('/') {
            Some(slash_pos) => {
                let var_name = &stripped[..slash_pos];
                match env::var(var_name) {
                    Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                    Err(_) => PathBuf::from(path),
                }
            }
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        }
    } else {
        PathBuf::from(path)
    }
}
