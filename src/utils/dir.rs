use std::{env, io, path::PathBuf};

use anyhow::Result;

/// Directory holding records and logs. On Windows it's `%APPDATA%/onloq`, elsewhere
/// `$XDG_STATE_HOME/onloq` or `$HOME/.local/state/onloq`.
pub fn create_application_default_path() -> Result<PathBuf> {
    let path = {
        #[cfg(windows)]
        {
            let mut path = PathBuf::from(
                env::var("APPDATA")
                    .map_err(|_| anyhow::anyhow!("APPDATA should be present on Windows"))?,
            );
            path.push("onloq");
            path
        }
        #[cfg(not(windows))]
        {
            let mut path = env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    env::var("HOME").map(|home| {
                        let mut path = PathBuf::from(home);
                        path.push(".local/state");
                        path
                    })
                })
                .map_err(|_| anyhow::anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))?;
            path.push("onloq");
            path
        }
    };

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}
