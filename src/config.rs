//! Application-level configuration loading: session tuning knobs and the seed theme catalog.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::models::ThemeEntity;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ESCAPE_PARTY_CONFIG_PATH";

const DEFAULT_THEMES: [&str; 4] = ["Pirates", "Egypt", "Space", "Jungle"];

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Countdown length used when a session starts.
    pub session_duration: Duration,
    /// Score attached to every level created at session start.
    pub required_score: u32,
    /// Maximum number of memberships per group.
    pub max_members: usize,
    /// Minimum number of members required to start.
    pub min_members: usize,
    /// Lifetime of freshly issued player tokens.
    pub token_ttl: Duration,
    /// Idle period after which an unobserved session entry is evicted.
    pub idle_session_ttl: Duration,
    /// Period of the eviction sweep.
    pub eviction_interval: Duration,
    /// Optional bound on the persistence work of a single transition.
    pub transition_timeout: Option<Duration>,
    /// Upper bound accepted for explicit timer durations and corrections.
    pub max_timer: Duration,
    /// Theme catalog used to seed empty stores.
    pub themes: Vec<ThemeEntity>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        themes = app_config.themes.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Session duration in whole seconds.
    pub fn session_duration_secs(&self) -> u32 {
        u32::try_from(self.session_duration.as_secs()).unwrap_or(u32::MAX)
    }

    /// Maximum explicit timer value in whole seconds.
    pub fn max_timer_secs(&self) -> u32 {
        u32::try_from(self.max_timer.as_secs()).unwrap_or(u32::MAX)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    session_duration_secs: Option<Duration>,
    required_score: Option<u32>,
    max_members: Option<usize>,
    min_members: Option<usize>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    token_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    idle_session_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    eviction_interval_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    transition_timeout_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    max_timer_secs: Option<Duration>,
    themes: Option<Vec<RawTheme>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let themes = value
            .themes
            .map(|themes| themes.into_iter().map(Into::into).collect())
            .unwrap_or_else(default_themes);
        Self {
            session_duration: value
                .session_duration_secs
                .unwrap_or(Duration::from_secs(600)),
            required_score: value.required_score.unwrap_or(100),
            max_members: value.max_members.unwrap_or(4),
            min_members: value.min_members.unwrap_or(2),
            token_ttl: value
                .token_ttl_secs
                .unwrap_or(Duration::from_secs(7 * 24 * 3600)),
            idle_session_ttl: value
                .idle_session_ttl_secs
                .unwrap_or(Duration::from_secs(900)),
            eviction_interval: value
                .eviction_interval_secs
                .unwrap_or(Duration::from_secs(60)),
            transition_timeout: value.transition_timeout_ms,
            max_timer: value.max_timer_secs.unwrap_or(Duration::from_secs(3600)),
            themes,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a theme entry; the id is generated when omitted.
struct RawTheme {
    id: Option<Uuid>,
    name: String,
}

impl From<RawTheme> for ThemeEntity {
    fn from(value: RawTheme) -> Self {
        Self {
            id: value.id.unwrap_or_else(Uuid::new_v4),
            name: value.name,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_themes() -> Vec<ThemeEntity> {
    DEFAULT_THEMES
        .iter()
        .map(|name| ThemeEntity {
            id: Uuid::new_v4(),
            name: (*name).to_owned(),
        })
        .collect()
}
