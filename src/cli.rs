use crate::config::ScriptingConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "assets/config.json";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    script_root: Option<PathBuf>,
    ticks: Option<u64>,
    log_warnings: Option<bool>,
    hot_reload: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "script-root" => overrides.script_root = Some(PathBuf::from(value)),
                "ticks" => {
                    overrides.ticks =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid tick count '{value}'"))?);
                }
                "log-warnings" => overrides.log_warnings = Some(parse_bool_flag("log-warnings", &value)?),
                "hot-reload" => overrides.hot_reload = Some(parse_bool_flag("hot-reload", &value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --script-root, --ticks, --log-warnings, --hot-reload."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn into_config_overrides(self) -> ScriptingConfigOverrides {
        ScriptingConfigOverrides {
            script_root: self.script_root,
            ticks: self.ticks,
            log_warnings: self.log_warnings,
            hot_reload: self.hot_reload,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let args = [
            "app",
            "--config",
            "demo.json",
            "--script-root",
            "scripts",
            "--ticks",
            "120",
            "--log-warnings",
            "on",
            "--hot-reload",
            "off",
        ];
        let cli = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(cli.config_path(), PathBuf::from("demo.json"));
        let overrides = cli.into_config_overrides();
        assert_eq!(overrides.script_root, Some(PathBuf::from("scripts")));
        assert_eq!(overrides.ticks, Some(120));
        assert_eq!(overrides.log_warnings, Some(true));
        assert_eq!(overrides.hot_reload, Some(false));
    }

    #[test]
    fn config_path_defaults() {
        let cli = CliOverrides::parse(["app"]).expect("parse overrides");
        assert_eq!(cli.config_path(), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(cli.into_config_overrides().is_empty());
    }

    #[test]
    fn latest_flag_wins() {
        let cli = CliOverrides::parse(["app", "--ticks", "5", "--ticks", "9"]).expect("parse overrides");
        assert_eq!(cli.into_config_overrides().ticks, Some(9));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["app", "--ticks"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_values() {
        let err = CliOverrides::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"));
        let err = CliOverrides::parse(["app", "--hot-reload", "maybe"]).unwrap_err();
        assert!(err.to_string().contains("Invalid hot-reload value"));
    }
}
