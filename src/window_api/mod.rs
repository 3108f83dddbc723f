//! Contains logic for sampling the foreground window in different environments.
//! [GenericWindowSampler] is the main artifact of this module that abstracts
//! the operations.

pub mod domain;
#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{sync::Arc, time::Duration};

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSample {
    /// Executable name of the focused process. For example 'firefox.exe' or 'nvim'
    pub application: Arc<str>,
    /// Name of the window. For example 'bash in hello' or 'Document 1' or 'Vibing in YouTube -
    /// Chrome'
    pub window_title: Arc<str>,
}

/// Intended to serve as a contract every supported platform must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSampler: Send {
    /// Returns the window currently receiving input. `None` means nothing has focus.
    fn current_foreground_window(&mut self) -> Result<Option<WindowSample>>;
}

/// Sampler for platforms without a window api. Never observes anything.
pub struct NoopWindowSampler;

impl WindowSampler for NoopWindowSampler {
    fn current_foreground_window(&mut self) -> Result<Option<WindowSample>> {
        Ok(None)
    }
}

/// Serves as a cross-compatible WindowSampler implementation.
pub struct GenericWindowSampler {
    inner: Box<dyn WindowSampler>,
}

impl GenericWindowSampler {
    pub fn new() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWindowSampler;
                Self {
                    inner: Box::new(WindowsWindowSampler::new()),
                }
            }
            else if #[cfg(feature = "x11")] {
                use x11::LinuxWindowSampler;
                match LinuxWindowSampler::new() {
                    Ok(sampler) => Self { inner: Box::new(sampler) },
                    Err(e) => {
                        tracing::error!("Failed to connect to X11, window tracking is disabled {e:?}");
                        Self { inner: Box::new(NoopWindowSampler) }
                    }
                }
            }
            else {
                tracing::warn!("No window api was enabled, window tracking is disabled");
                Self {
                    inner: Box::new(NoopWindowSampler),
                }
            }
        }
    }
}

impl Default for GenericWindowSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSampler for GenericWindowSampler {
    fn current_foreground_window(&mut self) -> Result<Option<WindowSample>> {
        self.inner.current_foreground_window()
    }
}

/// Time since the last user input as reported by the platform.
#[cfg_attr(test, mockall::automock)]
pub trait IdleSource: Send {
    fn idle_time(&mut self) -> Result<Duration>;
}

/// The platform idle source of this build, if there is one.
pub fn platform_idle_source() -> Option<Box<dyn IdleSource>> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "win")] {
            Some(Box::new(win::WindowsIdleSource))
        }
        else if #[cfg(feature = "x11")] {
            match x11::LinuxIdleSource::new() {
                Ok(source) => Some(Box::new(source)),
                Err(e) => {
                    tracing::error!("Failed to connect to X11 for idle time {e:?}");
                    None
                }
            }
        }
        else {
            None
        }
    }
}

/// Strips directories from an executable path. `/usr/lib/firefox/firefox` becomes `firefox`.
pub fn executable_name(path: &str) -> Arc<str> {
    std::path::Path::new(path)
        .file_name()
        .map(|v| v.to_string_lossy().into())
        .unwrap_or_else(|| path.into())
}
