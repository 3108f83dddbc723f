//! User configuration. Stored as a json file next to the working directory by default, so that
//! it can be edited by hand.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "./onloq_config.json";

const DEFAULT_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".cpp", ".c", ".h", ".hpp", ".java", ".kt", ".swift",
    ".go", ".rs", ".php", ".rb", ".cs", ".html", ".css", ".scss", ".less", ".json", ".xml",
    ".yaml", ".yml", ".sql", ".md", ".txt", ".sh", ".bat", ".ps1", ".dockerfile",
];

const DEFAULT_IGNORED_DIRECTORIES: &[&str] = &[
    "__pycache__",
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    ".vscode",
    ".idea",
    "build",
    "dist",
    "target",
    "bin",
    "obj",
    ".pytest_cache",
    ".mypy_cache",
    "venv",
    "env",
    ".env",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub idle_threshold_minutes: u32,
    pub poll_interval_seconds: u32,
    pub track_websites: bool,
    pub track_applications: bool,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            idle_threshold_minutes: 5,
            poll_interval_seconds: 5,
            track_websites: true,
            track_applications: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch_directories: Vec<PathBuf>,
    pub file_extensions: Vec<String>,
    pub ignored_directories: Vec<String>,
    pub activity_tracking: ActivitySettings,
    pub debounce_delay_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_directories: vec![PathBuf::from(".")],
            file_extensions: DEFAULT_EXTENSIONS.iter().map(|v| v.to_string()).collect(),
            ignored_directories: DEFAULT_IGNORED_DIRECTORIES
                .iter()
                .map(|v| v.to_string())
                .collect(),
            activity_tracking: ActivitySettings::default(),
            debounce_delay_seconds: 1.0,
        }
    }
}

impl Config {
    /// Loads configuration from `path`. A missing file is created with the defaults, a broken
    /// one is left untouched and the defaults are used instead.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => Ok(config.normalized()),
                Err(e) => {
                    warn!("Config {path:?} is not valid, using defaults: {e}");
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                info!("Created default config at {path:?}");
                Ok(config)
            }
            Err(e) => {
                warn!("Failed to read config {path:?}, using defaults: {e}");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|v| !v.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn set_watch_directories(&mut self, directories: Vec<PathBuf>) {
        self.watch_directories = directories;
    }

    /// Makes relative watch directories absolute against `base`. The daemon changes its working
    /// directory, so relative paths have to be resolved before that.
    pub fn with_absolute_watch_directories(mut self, base: &Path) -> Self {
        self.watch_directories = self
            .watch_directories
            .into_iter()
            .map(|v| if v.is_absolute() { v } else { base.join(v) })
            .collect();
        self
    }

    /// Lower-cases extensions and makes sure every one of them starts with a dot.
    pub fn normalized(mut self) -> Self {
        self.file_extensions = self
            .file_extensions
            .into_iter()
            .map(|v| {
                let v = v.trim().to_lowercase();
                if v.starts_with('.') {
                    v
                } else {
                    format!(".{v}")
                }
            })
            .collect();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.activity_tracking.poll_interval_seconds.max(1).into())
    }

    pub fn idle_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.activity_tracking.idle_threshold_minutes.into())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.debounce_delay_seconds).unwrap_or(Duration::from_secs(1))
    }
}
