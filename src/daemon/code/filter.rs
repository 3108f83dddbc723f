use std::{collections::HashSet, path::Path};

use crate::config::Config;

/// Decides which files take part in change tracking.
#[derive(Debug, Clone, Default)]
pub struct TrackingFilter {
    extensions: HashSet<String>,
    ignored_directories: HashSet<String>,
}

impl TrackingFilter {
    /// `extensions` are expected with a leading dot and are compared case-insensitively.
    pub fn new(
        extensions: impl IntoIterator<Item = impl AsRef<str>>,
        ignored_directories: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|v| v.as_ref().to_lowercase())
                .collect(),
            ignored_directories: ignored_directories
                .into_iter()
                .map(|v| v.as_ref().to_string())
                .collect(),
        }
    }

    pub fn is_ignored_directory(&self, name: &str) -> bool {
        self.ignored_directories.contains(name)
    }

    fn has_ignored_segment(&self, path: &Path) -> bool {
        path.components().any(|v| {
            v.as_os_str()
                .to_str()
                .is_some_and(|v| self.is_ignored_directory(v))
        })
    }

    fn has_tracked_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|v| v.to_str())
            .is_some_and(|v| self.extensions.contains(&format!(".{}", v.to_lowercase())))
    }

    /// A path is tracked when its extension is allowed and none of its segments is an ignored
    /// directory. Segments are matched exactly, `node_modules_backup` is not `node_modules`.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.has_tracked_extension(path) && !self.has_ignored_segment(path)
    }
}

impl From<&Config> for TrackingFilter {
    fn from(config: &Config) -> Self {
        Self::new(&config.file_extensions, &config.ignored_directories)
    }
}
