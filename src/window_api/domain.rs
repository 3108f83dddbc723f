//! Heuristic extraction of the visited website from a browser window title. Browsers don't
//! expose the current url, so the title is the best we can get.

use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Processes whose titles are inspected. Compared case-insensitively against the executable name.
const BROWSERS: &[&str] = &[
    "chrome.exe",
    "firefox.exe",
    "msedge.exe",
    "safari.exe",
    "opera.exe",
    "brave.exe",
    "chrome",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "firefox",
    "firefox-esr",
    "msedge",
    "microsoft-edge",
    "safari",
    "opera",
    "brave",
    "brave-browser",
];

/// Tried in order, the first match wins.
static DOMAIN_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        // Full url
        Regex::new(r"https?://([^/\s]+)").unwrap(),
        // label.tld anywhere in the title
        Regex::new(r"([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").unwrap(),
        // Token after a dash
        Regex::new(r"- ([^-\s]+\.[a-zA-Z]{2,})").unwrap(),
    ]
});

pub fn is_browser(application: &str) -> bool {
    let application = application.to_lowercase();
    BROWSERS.iter().any(|v| *v == application)
}

/// Returns the lower-cased domain without `www.`, or `None` for non browsers and titles without a
/// recognizable domain.
pub fn extract_domain(window_title: &str, application: &str) -> Option<Arc<str>> {
    if window_title.is_empty() || !is_browser(application) {
        return None;
    }

    DOMAIN_PATTERNS.iter().find_map(|pattern| {
        let captured = pattern.captures(window_title)?.get(1)?;
        let domain = captured.as_str().trim().to_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain);
        Some(domain.into())
    })
}
