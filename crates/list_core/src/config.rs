use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

use crate::controller::SelectionPolicy;

pub const DEFAULT_SETTINGS_FILE: &str = "list_view.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListViewSettings {
    pub server_url: String,
    pub resource: String,
    pub page_size: u32,
    /// Per-request limit for batch calls; unset means wait indefinitely.
    pub request_timeout_ms: Option<u64>,
    pub clear_selection_on_page_change: bool,
    pub clear_selection_on_filter_change: bool,
}

impl Default for ListViewSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            resource: "expenses".into(),
            page_size: 20,
            request_timeout_ms: None,
            clear_selection_on_page_change: true,
            clear_selection_on_filter_change: true,
        }
    }
}

/// Every key optional so a file only needs the values it changes.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    resource: Option<String>,
    page_size: Option<u32>,
    request_timeout_ms: Option<u64>,
    clear_selection_on_page_change: Option<bool>,
    clear_selection_on_filter_change: Option<bool>,
}

impl ListViewSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            clear_on_page_change: self.clear_selection_on_page_change,
            clear_on_filter_change: self.clear_selection_on_filter_change,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.resource.trim().is_empty() {
            bail!("resource must not be empty");
        }
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("server_url must start with http:// or https://");
        }
        Ok(())
    }

    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.server_url {
            self.server_url = v;
        }
        if let Some(v) = file_cfg.resource {
            self.resource = v;
        }
        if let Some(v) = file_cfg.page_size {
            self.page_size = v;
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout_ms = Some(v);
        }
        if let Some(v) = file_cfg.clear_selection_on_page_change {
            self.clear_selection_on_page_change = v;
        }
        if let Some(v) = file_cfg.clear_selection_on_filter_change {
            self.clear_selection_on_filter_change = v;
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("LIST_VIEW_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("APP__RESOURCE") {
            self.resource = v;
        }
        if let Some(v) = var("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }
        if let Some(v) = var("APP__REQUEST_TIMEOUT_MS") {
            if v.trim().is_empty() || v.trim() == "0" {
                self.request_timeout_ms = None;
            } else if let Ok(parsed) = v.trim().parse::<u64>() {
                self.request_timeout_ms = Some(parsed);
            }
        }
        if let Some(v) = var("APP__CLEAR_SELECTION_ON_PAGE_CHANGE").and_then(|v| parse_flag(&v)) {
            self.clear_selection_on_page_change = v;
        }
        if let Some(v) = var("APP__CLEAR_SELECTION_ON_FILTER_CHANGE").and_then(|v| parse_flag(&v))
        {
            self.clear_selection_on_filter_change = v;
        }
    }
}

/// Defaults, then `path` (if it exists), then environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ListViewSettings> {
    let mut settings = ListViewSettings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        settings.apply_file(file_cfg);
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
