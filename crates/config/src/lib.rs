//! Layered configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A config file: the path given explicitly, or else `fetchtrack.toml`,
//!    `fetchtrack.yaml` and `fetchtrack.json` in the user's config directory
//!    (e.g. `~/.config/fetchtrack/` on Linux), whichever exist.
//! 3. `FETCHTRACK_*` environment variables, e.g. `FETCHTRACK_WORKERS=8` or
//!    `FETCHTRACK_STORE=sqlite:/var/lib/fetchtrack/store.db`.

pub mod error;
mod store;

pub use crate::store::StoreLocation;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const APPLICATION: &str = "fetchtrack";
pub const ENV_PREFIX: &str = "FETCHTRACK_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory whose immediate subdirectories are the shared folders.
    pub work_dir: PathBuf,
    /// Folders converted concurrently during a scan.
    pub workers: usize,
    /// Public base url rendered into download pages.
    pub url: String,
    pub store: StoreLocation,
    /// Where `dump` writes the counters when no path is given.
    pub dump_file: PathBuf,
    /// Cancel a scan that takes longer than this.
    pub index_timeout_secs: Option<u64>,
    /// Re-index period of the `watch` daemon; signals only when unset.
    pub interval_secs: Option<u64>,
    /// File names never offered for download, on top of the built-in ones.
    pub skip_files: Vec<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            workers: 4,
            url: "http://localhost".to_string(),
            store: StoreLocation::Memory,
            dump_file: PathBuf::from("counters.json"),
            index_timeout_secs: None,
            interval_secs: None,
            skip_files: Vec::new(),
        }
    }
}

impl Config {
    /// Load, merge and validate every source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    /// Extract and validate a config from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// The unextracted provider stack, for callers that want to merge more.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match explicit {
            Some(path) => {
                debug!(path = %path.display(), "loading explicit config file");
                figment = match path.extension().and_then(|ext| ext.to_str()) {
                    Some("toml") => figment.merge(Toml::file_exact(path)),
                    Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                    Some("json") => figment.merge(Json::file_exact(path)),
                    _ => exn::bail!(ErrorKind::Invalid("config file extension")),
                };
            },
            None => {
                if let Some(dir) = Self::config_dir() {
                    debug!(dir = %dir.display(), "looking for config files");
                    figment = figment
                        .merge(Toml::file(dir.join("fetchtrack.toml")))
                        .merge(Yaml::file(dir.join("fetchtrack.yaml")))
                        .merge(Json::file(dir.join("fetchtrack.json")));
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", APPLICATION).map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("work_dir"));
        }
        if self.workers < 1 {
            exn::bail!(ErrorKind::Invalid("workers"));
        }
        if self.dump_file.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("dump_file"));
        }
        if self.index_timeout_secs == Some(0) {
            exn::bail!(ErrorKind::Invalid("index_timeout_secs"));
        }
        if self.interval_secs == Some(0) {
            exn::bail!(ErrorKind::Invalid("interval_secs"));
        }
        Ok(())
    }

    pub fn index_timeout(&self) -> Option<Duration> {
        self.index_timeout_secs.map(Duration::from_secs)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default()))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interval(), None);
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fetchtrack.toml",
                r#"
                    work_dir = "/srv/share"
                    workers = 2
                    store = "sqlite:/var/lib/fetchtrack.db"
                    skip_files = ["Thumbs.db"]
                "#,
            )?;
            jail.set_env("FETCHTRACK_WORKERS", "8");
            jail.set_env("FETCHTRACK_INTERVAL_SECS", "300");

            let config = Config::load(Some(Path::new("fetchtrack.toml"))).unwrap();
            assert_eq!(config.work_dir, PathBuf::from("/srv/share"));
            assert_eq!(config.workers, 8);
            assert_eq!(config.store, StoreLocation::Sqlite("/var/lib/fetchtrack.db".into()));
            assert_eq!(config.skip_files, vec!["Thumbs.db".to_string()]);
            assert_eq!(config.interval(), Some(Duration::from_secs(300)));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yml", "url: https://files.example.com\nindex_timeout_secs: 30\n")?;
            let config = Config::load(Some(Path::new("config.yml"))).unwrap();
            assert_eq!(config.url, "https://files.example.com");
            assert_eq!(config.index_timeout(), Some(Duration::from_secs(30)));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[test]
    fn test_unknown_extension_fails() {
        let err = Config::figment(Some(Path::new("fetchtrack.ini"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_invalid_store_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.create_file("fetchtrack.json", "{}")?;
            jail.set_env("FETCHTRACK_STORE", "redis://localhost");
            let err = Config::from_figment(Config::figment(Some(Path::new("fetchtrack.json"))).unwrap()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[rstest]
    #[case(Config { workers: 0, ..Config::default() }, "workers")]
    #[case(Config { work_dir: PathBuf::new(), ..Config::default() }, "work_dir")]
    #[case(Config { interval_secs: Some(0), ..Config::default() }, "interval_secs")]
    #[case(Config { index_timeout_secs: Some(0), ..Config::default() }, "index_timeout_secs")]
    fn test_validation(#[case] config: Config, #[case] field: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(f) if *f == field));
    }
}
