//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::keys::HashAlgorithm;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "render-cache";
const ENV_PREFIX: &str = "RENDER_CACHE";
const DEFAULT_BIN: &str = "cache_render";
const DEFAULT_STORE_CAPACITY_PER_BIN: u64 = 1000;
const KNOWN_KINDS: [&str; 3] = ["entity", "block", "page"];

/// Command-line arguments for the render-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "render-cache",
    version,
    about = "Render output cache for nested content trees"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RENDER_CACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a fixture site through the cache one or more times.
    Render(RenderArgs),
    /// Print the cache ids a fixture resolves to without rendering.
    Keys(KeysArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderCacheOverrides,

    /// Fixture describing the page, blocks and entities to render.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub fixture: PathBuf,

    /// Number of passes over the same store; later passes hit the cache.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub passes: u32,

    /// Tags invalidated between passes, written `namespace:value` or `namespace`.
    #[arg(long = "invalidate", value_name = "TAG")]
    pub invalidate: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct KeysArgs {
    #[command(flatten)]
    pub overrides: RenderCacheOverrides,

    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub fixture: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderCacheOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the render cache globally.
    #[arg(
        long = "enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enabled: Option<bool>,

    /// Toggle the cache-tags response header.
    #[arg(
        long = "send-cache-tags",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub send_cache_tags: Option<bool>,

    /// Override the digest used in cache ids (sha256|sha512).
    #[arg(long = "hash-algorithm", value_name = "NAME")]
    pub hash_algorithm: Option<String>,

    /// Toggle debug comments around rendered objects.
    #[arg(
        long = "debug-output",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub debug_output: Option<bool>,

    /// Override the in-memory store capacity per bin.
    #[arg(long = "store-capacity", value_name = "COUNT")]
    pub store_capacity: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render_cache: RenderCacheSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderCacheSettings {
    pub enabled: bool,
    pub disabled_kinds: Vec<String>,
    pub disabled_scopes: Vec<String>,
    pub enabled_pages: Vec<String>,
    pub send_cache_tags: bool,
    pub hash_algorithm: HashAlgorithm,
    pub debug_output: bool,
    pub debug_output_kinds: Vec<String>,
    pub default_bin: String,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub capacity_per_bin: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("render_cache.disabled_kinds")
            .with_list_parse_key("render_cache.disabled_scopes")
            .with_list_parse_key("render_cache.enabled_pages")
            .with_list_parse_key("render_cache.debug_output_kinds")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => raw.apply_overrides(&args.overrides),
        Command::Keys(args) => raw.apply_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render_cache: RawRenderCacheSettings,
    store: RawStoreSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RenderCacheOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.enabled {
            self.render_cache.enabled = Some(enabled);
        }
        if let Some(send) = overrides.send_cache_tags {
            self.render_cache.send_cache_tags = Some(send);
        }
        if let Some(algorithm) = overrides.hash_algorithm.as_ref() {
            self.render_cache.hash_algorithm = Some(algorithm.clone());
        }
        if let Some(debug) = overrides.debug_output {
            self.render_cache.debug_output = Some(debug);
        }
        if let Some(capacity) = overrides.store_capacity {
            self.store.capacity_per_bin = Some(capacity);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render_cache,
            store,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let render_cache = build_render_cache_settings(render_cache)?;
        let store = build_store_settings(store)?;

        Ok(Self {
            logging,
            render_cache,
            store,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_cache_settings(
    render_cache: RawRenderCacheSettings,
) -> Result<RenderCacheSettings, LoadError> {
    let hash_algorithm = match render_cache.hash_algorithm {
        Some(name) => HashAlgorithm::from_str(&name)
            .map_err(|err| LoadError::invalid("render_cache.hash_algorithm", err.to_string()))?,
        None => HashAlgorithm::default(),
    };

    let default_bin = render_cache
        .default_bin
        .map(|bin| bin.trim().to_string())
        .unwrap_or_else(|| DEFAULT_BIN.to_string());
    if default_bin.is_empty() {
        return Err(LoadError::invalid(
            "render_cache.default_bin",
            "bin name must not be empty",
        ));
    }

    let disabled_kinds = normalize_list(render_cache.disabled_kinds);
    if let Some(unknown) = disabled_kinds
        .iter()
        .find(|kind| !KNOWN_KINDS.contains(&kind.as_str()))
    {
        return Err(LoadError::invalid(
            "render_cache.disabled_kinds",
            format!("unknown kind `{unknown}`"),
        ));
    }

    let disabled_scopes = normalize_list(render_cache.disabled_scopes);
    if let Some(malformed) = disabled_scopes.iter().find(|scope| {
        scope
            .split_once(':')
            .is_none_or(|(kind, scope)| kind.is_empty() || scope.is_empty())
    }) {
        return Err(LoadError::invalid(
            "render_cache.disabled_scopes",
            format!("scope `{malformed}` must be written `kind:scope`"),
        ));
    }

    Ok(RenderCacheSettings {
        enabled: render_cache.enabled.unwrap_or(true),
        disabled_kinds,
        disabled_scopes,
        enabled_pages: normalize_list(render_cache.enabled_pages),
        send_cache_tags: render_cache.send_cache_tags.unwrap_or(true),
        hash_algorithm,
        debug_output: render_cache.debug_output.unwrap_or(false),
        debug_output_kinds: normalize_list(render_cache.debug_output_kinds),
        default_bin,
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let capacity = store
        .capacity_per_bin
        .unwrap_or(DEFAULT_STORE_CAPACITY_PER_BIN);
    let capacity: usize = capacity.try_into().map_err(|_| {
        LoadError::invalid(
            "store.capacity_per_bin",
            "value exceeds supported range for usize",
        )
    })?;
    let capacity_per_bin = NonZeroUsize::new(capacity).ok_or_else(|| {
        LoadError::invalid("store.capacity_per_bin", "must be greater than zero")
    })?;

    Ok(StoreSettings { capacity_per_bin })
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderCacheSettings {
    enabled: Option<bool>,
    disabled_kinds: Vec<String>,
    disabled_scopes: Vec<String>,
    enabled_pages: Vec<String>,
    send_cache_tags: Option<bool>,
    hash_algorithm: Option<String>,
    debug_output: Option<bool>,
    debug_output_kinds: Vec<String>,
    default_bin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    capacity_per_bin: Option<u64>,
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
