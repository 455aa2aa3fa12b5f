use anyhow::{Context, Result};
use directories::ProjectDirs;
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration: where the catalog lives and how the monitor behaves.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Resolve configuration from environment or the per-user data dir.
    ///
    /// Priority for the DB path:
    /// 1. `SHELF_DB_PATH` env-var (explicit override)
    /// 2. `shelf.db` under the XDG data dir (`~/.local/share/shelf/`)
    /// 3. Fallback to `./shelf.db` when we cannot locate an XDG dir
    ///
    /// Monitor tunables come from [`MonitorConfig::from_env`].
    pub fn load() -> Result<Self> {
        let monitor = MonitorConfig::from_env()?;

        if let Some(val) = std::env::var_os("SHELF_DB_PATH") {
            let p = PathBuf::from(val);
            if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            return Ok(Self { db_path: p, monitor });
        }

        if std::env::var_os("HOME").is_some() || std::env::var_os("XDG_DATA_HOME").is_some() {
            if let Some(dirs) = ProjectDirs::from("io", "Shelf", "shelf") {
                let dir = dirs.data_dir();
                std::fs::create_dir_all(dir)?;
                return Ok(Self {
                    db_path: dir.join("shelf.db"),
                    monitor,
                });
            }
        }

        Ok(Self {
            db_path: Path::new("shelf.db").to_path_buf(),
            monitor,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a delete waits for a matching create before it is acted on.
    pub debounce: Duration,
    /// Grace period between a bulk operation finishing and live monitoring
    /// resuming.
    pub resume_grace: Duration,
    /// Capacity of the dispatcher queue; overflow is dropped.
    pub queue_capacity: usize,
    /// Capacity of the channel between the OS watcher and the raw loop.
    pub raw_queue_capacity: usize,
    pub scheduler_workers: usize,
    /// Periodic full rescan of every library, if set.
    pub rescan_interval: Option<Duration>,
    /// Extra glob patterns (matched against absolute paths) to ignore.
    pub ignore: Vec<Pattern>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            resume_grace: Duration::from_secs(5),
            queue_capacity: 1_024,
            raw_queue_capacity: 4_096,
            scheduler_workers: 2,
            rescan_interval: None,
            ignore: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `SHELF_DEBOUNCE_MS`, `SHELF_RESUME_GRACE_MS`,
    /// `SHELF_QUEUE_CAPACITY`, `SHELF_RESCAN_INTERVAL_SECS` and
    /// `SHELF_IGNORE` (comma-separated globs).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(ms) = env_number("SHELF_DEBOUNCE_MS")? {
            cfg.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number("SHELF_RESUME_GRACE_MS")? {
            cfg.resume_grace = Duration::from_millis(ms);
        }
        if let Some(cap) = env_number("SHELF_QUEUE_CAPACITY")? {
            anyhow::ensure!(cap > 0, "SHELF_QUEUE_CAPACITY must be positive");
            cfg.queue_capacity = cap as usize;
        }
        if let Some(secs) = env_number("SHELF_RESCAN_INTERVAL_SECS")? {
            cfg.rescan_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(raw) = std::env::var("SHELF_IGNORE") {
            cfg.ignore = parse_ignore(&raw)?;
        }
        Ok(cfg)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.iter().any(|p| p.matches_path(path))
    }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got `{v}`")),
        Err(_) => Ok(None),
    }
}

pub fn parse_ignore(raw: &str) -> Result<Vec<Pattern>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Pattern::new(s).with_context(|| format!("Invalid glob pattern `{s}`")))
        .collect()
}
