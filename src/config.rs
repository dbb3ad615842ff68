use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::script::ScriptOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "ScriptConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "ScriptConfig::default_extension")]
    pub extension: String,
    #[serde(default)]
    pub log_warnings: bool,
    #[serde(default = "ScriptConfig::default_hot_reload")]
    pub hot_reload: bool,
    #[serde(default = "ScriptConfig::default_watch_poll_ms")]
    pub watch_poll_ms: u64,
    #[serde(default)]
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "HostConfig::default_tick_ms")]
    pub tick_ms: u64,
    /// Number of ticks to run; 0 runs until interrupted.
    #[serde(default)]
    pub ticks: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScriptingConfig {
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptingConfigOverrides {
    pub script_root: Option<PathBuf>,
    pub ticks: Option<u64>,
    pub log_warnings: Option<bool>,
    pub hot_reload: Option<bool>,
}

impl ScriptConfig {
    fn default_root() -> PathBuf {
        PathBuf::from("assets/scripts")
    }

    fn default_extension() -> String {
        "rhai".to_string()
    }

    const fn default_hot_reload() -> bool {
        true
    }

    const fn default_watch_poll_ms() -> u64 {
        300
    }

    pub fn options(&self) -> ScriptOptions {
        ScriptOptions {
            hot_reload: self.hot_reload,
            watch_poll: Duration::from_millis(self.watch_poll_ms),
            skip_unchanged: self.skip_unchanged,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            extension: Self::default_extension(),
            log_warnings: false,
            hot_reload: Self::default_hot_reload(),
            watch_poll_ms: Self::default_watch_poll_ms(),
            skip_unchanged: false,
        }
    }
}

impl HostConfig {
    const fn default_tick_ms() -> u64 {
        16
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { tick_ms: Self::default_tick_ms(), ticks: 0 }
    }
}

impl ScriptingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ScriptingConfigOverrides) {
        if let Some(root) = &overrides.script_root {
            self.scripts.root = root.clone();
        }
        if let Some(ticks) = overrides.ticks {
            self.host.ticks = ticks;
        }
        if let Some(log_warnings) = overrides.log_warnings {
            self.scripts.log_warnings = log_warnings;
        }
        if let Some(hot_reload) = overrides.hot_reload {
            self.scripts.hot_reload = hot_reload;
        }
    }
}

impl ScriptingConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.script_root.is_none() && self.ticks.is_none() && self.log_warnings.is_none() && self.hot_reload.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.script_root.is_some() {
            fields.push("script_root");
        }
        if self.ticks.is_some() {
            fields.push("ticks");
        }
        if self.log_warnings.is_some() {
            fields.push("log_warnings");
        }
        if self.hot_reload.is_some() {
            fields.push("hot_reload");
        }
        fields
    }
}
