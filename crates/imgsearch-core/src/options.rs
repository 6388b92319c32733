//! User options as read from the extension's settings storage.
//!
//! The core never caches these: every decision point calls
//! [`OptionsSource::load`] so a change takes effect on the next event.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::engines::EngineTable;
use crate::error::CoreError;
use crate::host::HostFuture;

/// Where the "all engines" entry goes in a multi-engine UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllEnginesPlacement {
    /// Replaces the per-engine entries.
    #[serde(rename = "main")]
    Main,
    /// Listed first inside the submenu/popup.
    #[serde(rename = "sub")]
    Sub,
    #[serde(rename = "false")]
    Off,
}

/// What the toolbar action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Arm an in-page pointer and wait for the user to click an image.
    Select,
    /// Open the upload page.
    Upload,
    /// Search the page URL itself.
    Url,
}

/// Browser family the extension runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Firefox,
    #[default]
    Chrome,
}

impl Platform {
    /// `url` search mode needs a tabs API only Firefox exposes to the action.
    pub fn supports_url_mode(self) -> bool {
        matches!(self, Platform::Firefox)
    }

    /// Whether content scripts can reach `file:` pages.
    pub fn scripts_file_pages(self) -> bool {
        matches!(self, Platform::Firefox)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Engine ids in display order.
    pub engines: Vec<String>,
    pub disabled_engines: Vec<String>,
    pub show_in_context_menu: bool,
    pub search_all_engines_context_menu: AllEnginesPlacement,
    pub search_all_engines_action: AllEnginesPlacement,
    pub search_mode_action: SearchMode,
    // The stored key carries the historical misspelling.
    #[serde(rename = "tabInBackgound")]
    pub tab_in_background: bool,
    pub local_google: bool,
    pub img_full_parse: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            engines: EngineTable::builtin().ids().map(String::from).collect(),
            disabled_engines: vec![],
            show_in_context_menu: true,
            search_all_engines_context_menu: AllEnginesPlacement::Sub,
            search_all_engines_action: AllEnginesPlacement::Sub,
            search_mode_action: SearchMode::Select,
            tab_in_background: false,
            local_google: false,
            img_full_parse: false,
        }
    }
}

impl Options {
    /// Enabled engines in display order. Ids missing from `table` are skipped.
    pub fn enabled_engines(&self, table: &EngineTable) -> Vec<String> {
        self.engines
            .iter()
            .filter(|id| !self.disabled_engines.iter().any(|d| d == *id))
            .filter(|id| table.contains(id))
            .cloned()
            .collect()
    }
}

/// The configuration collaborator.
pub trait OptionsSource: Send + Sync {
    fn load(&self) -> HostFuture<'_, Options>;
}

/// Options held in memory; `set` replaces them wholesale.
#[derive(Debug, Default)]
pub struct StaticOptions {
    options: Mutex<Options>,
}

impl StaticOptions {
    pub fn new(options: Options) -> Self {
        Self {
            options: Mutex::new(options),
        }
    }

    pub fn set(&self, options: Options) {
        *self.options.lock().unwrap_or_else(|e| e.into_inner()) = options;
    }

    pub fn current(&self) -> Options {
        self.options
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl OptionsSource for StaticOptions {
    fn load(&self) -> HostFuture<'_, Options> {
        let options = self.current();
        Box::pin(async move { Ok::<_, CoreError>(options) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_takes_defaults() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
        assert!(options.show_in_context_menu);
        assert_eq!(options.search_mode_action, SearchMode::Select);
    }

    #[test]
    fn storage_key_names() {
        let options: Options = serde_json::from_str(
            r#"{
                "engines": ["bing", "google"],
                "disabledEngines": ["google"],
                "searchAllEnginesContextMenu": "main",
                "searchAllEnginesAction": "false",
                "searchModeAction": "url",
                "tabInBackgound": true,
                "localGoogle": true
            }"#,
        )
        .unwrap();
        assert_eq!(options.disabled_engines, ["google"]);
        assert_eq!(
            options.search_all_engines_context_menu,
            AllEnginesPlacement::Main
        );
        assert_eq!(options.search_all_engines_action, AllEnginesPlacement::Off);
        assert_eq!(options.search_mode_action, SearchMode::Url);
        assert!(options.tab_in_background);
        assert!(options.local_google);
    }

    #[test]
    fn enabled_engines_keep_order_and_skip_unknown() {
        let options = Options {
            engines: vec![
                "tineye".into(),
                "nosuch".into(),
                "bing".into(),
                "google".into(),
            ],
            disabled_engines: vec!["bing".into()],
            ..Options::default()
        };
        assert_eq!(
            options.enabled_engines(&EngineTable::builtin()),
            ["tineye", "google"]
        );
    }

    #[tokio::test]
    async fn static_options_reflect_set() {
        let source = StaticOptions::default();
        let mut changed = source.current();
        changed.local_google = true;
        source.set(changed);
        assert!(source.load().await.unwrap().local_google);
    }

    #[test]
    fn platform_gates() {
        assert!(Platform::Firefox.supports_url_mode());
        assert!(!Platform::Chrome.supports_url_mode());
        assert!(!Platform::Chrome.scripts_file_pages());
    }
}
