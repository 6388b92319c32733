use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::host::HostFuture;
use crate::options::{AllEnginesPlacement, Options, OptionsSource, SearchMode};

/// On-disk TOML options.
/// All fields are optional so partial files work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsFile {
    pub engines: Option<EnginesSection>,
    pub menu: Option<MenuSection>,
    pub action: Option<ActionSection>,
    pub search: Option<SearchSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginesSection {
    pub order: Option<Vec<String>>,
    pub disabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuSection {
    pub show: Option<bool>,
    pub all_engines: Option<AllEnginesPlacement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSection {
    pub all_engines: Option<AllEnginesPlacement>,
    pub search_mode: Option<SearchMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSection {
    pub tab_in_background: Option<bool>,
    pub local_google: Option<bool>,
    pub full_parse: Option<bool>,
}

/// Platform options path: `<config_dir>/imgsearch/options.toml`.
pub fn options_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("imgsearch").join("options.toml"))
}

/// Load options by cascading CWD `.imgsearch.toml` over the platform file.
/// CWD values override platform values.
pub fn load_options() -> OptionsFile {
    let platform = options_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".imgsearch.toml"));

    match (platform, cwd) {
        (None, None) => OptionsFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load from a specific path. Returns `None` if the file doesn't exist or
/// can't be parsed.
pub fn load_from_path(path: &Path) -> Option<OptionsFile> {
    read_from_path(path).ok()
}

/// Like [`load_from_path`] but reports why the file could not be used.
pub fn read_from_path(path: &Path) -> Result<OptionsFile, CoreError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Options(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| CoreError::Options(format!("{}: {}", path.display(), e)))
}

/// Merge two files: `overlay` values take precedence over `base`.
pub fn merge(base: OptionsFile, overlay: OptionsFile) -> OptionsFile {
    OptionsFile {
        engines: Some(EnginesSection {
            order: overlay
                .engines
                .as_ref()
                .and_then(|e| e.order.clone())
                .or_else(|| base.engines.as_ref().and_then(|e| e.order.clone())),
            disabled: overlay
                .engines
                .as_ref()
                .and_then(|e| e.disabled.clone())
                .or_else(|| base.engines.as_ref().and_then(|e| e.disabled.clone())),
        }),
        menu: Some(MenuSection {
            show: overlay
                .menu
                .as_ref()
                .and_then(|m| m.show)
                .or_else(|| base.menu.as_ref().and_then(|m| m.show)),
            all_engines: overlay
                .menu
                .as_ref()
                .and_then(|m| m.all_engines)
                .or_else(|| base.menu.as_ref().and_then(|m| m.all_engines)),
        }),
        action: Some(ActionSection {
            all_engines: overlay
                .action
                .as_ref()
                .and_then(|a| a.all_engines)
                .or_else(|| base.action.as_ref().and_then(|a| a.all_engines)),
            search_mode: overlay
                .action
                .as_ref()
                .and_then(|a| a.search_mode)
                .or_else(|| base.action.as_ref().and_then(|a| a.search_mode)),
        }),
        search: Some(SearchSection {
            tab_in_background: overlay
                .search
                .as_ref()
                .and_then(|s| s.tab_in_background)
                .or_else(|| base.search.as_ref().and_then(|s| s.tab_in_background)),
            local_google: overlay
                .search
                .as_ref()
                .and_then(|s| s.local_google)
                .or_else(|| base.search.as_ref().and_then(|s| s.local_google)),
            full_parse: overlay
                .search
                .as_ref()
                .and_then(|s| s.full_parse)
                .or_else(|| base.search.as_ref().and_then(|s| s.full_parse)),
        }),
    }
}

impl OptionsFile {
    /// Resolve into [`Options`], filling unset fields with defaults.
    pub fn into_options(self) -> Options {
        let defaults = Options::default();
        let engines = self.engines.unwrap_or_default();
        let menu = self.menu.unwrap_or_default();
        let action = self.action.unwrap_or_default();
        let search = self.search.unwrap_or_default();
        Options {
            engines: engines.order.unwrap_or(defaults.engines),
            disabled_engines: engines.disabled.unwrap_or(defaults.disabled_engines),
            show_in_context_menu: menu.show.unwrap_or(defaults.show_in_context_menu),
            search_all_engines_context_menu: menu
                .all_engines
                .unwrap_or(defaults.search_all_engines_context_menu),
            search_all_engines_action: action
                .all_engines
                .unwrap_or(defaults.search_all_engines_action),
            search_mode_action: action.search_mode.unwrap_or(defaults.search_mode_action),
            tab_in_background: search
                .tab_in_background
                .unwrap_or(defaults.tab_in_background),
            local_google: search.local_google.unwrap_or(defaults.local_google),
            img_full_parse: search.full_parse.unwrap_or(defaults.img_full_parse),
        }
    }
}

/// [`OptionsSource`] backed by TOML files, re-read on every load.
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Fixed file; `None` uses the platform/CWD cascade.
    path: Option<PathBuf>,
}

impl FileOptions {
    pub fn cascade() -> Self {
        Self { path: None }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn read(&self) -> Result<Options, CoreError> {
        let file = match &self.path {
            Some(path) => read_from_path(path)?,
            None => load_options(),
        };
        Ok(file.into_options())
    }
}

impl OptionsSource for FileOptions {
    fn load(&self) -> HostFuture<'_, Options> {
        let result = self.read();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn overlay_wins_field_by_field() {
        let base = OptionsFile {
            engines: Some(EnginesSection {
                order: Some(vec!["bing".into(), "google".into()]),
                disabled: Some(vec!["bing".into()]),
            }),
            search: Some(SearchSection {
                local_google: Some(true),
                ..SearchSection::default()
            }),
            ..OptionsFile::default()
        };
        let overlay = OptionsFile {
            engines: Some(EnginesSection {
                order: None,
                disabled: Some(vec![]),
            }),
            ..OptionsFile::default()
        };

        let merged = merge(base, overlay);
        let engines = merged.engines.clone().unwrap();
        assert_eq!(engines.order.unwrap(), ["bing", "google"]);
        assert!(engines.disabled.unwrap().is_empty());
        assert_eq!(merged.search.unwrap().local_google, Some(true));
    }

    #[test]
    fn into_options_fills_defaults() {
        let options = OptionsFile {
            menu: Some(MenuSection {
                show: Some(false),
                all_engines: None,
            }),
            ..OptionsFile::default()
        }
        .into_options();
        assert!(!options.show_in_context_menu);
        assert_eq!(
            options.search_all_engines_context_menu,
            Options::default().search_all_engines_context_menu
        );
        assert_eq!(options.engines, Options::default().engines);
    }

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[engines]
order = ["tineye", "yandex"]

[action]
all_engines = "main"
search_mode = "upload"

[search]
tab_in_background = true
"#
        )
        .unwrap();

        let options = FileOptions::at(file.path()).read().unwrap();
        assert_eq!(options.engines, ["tineye", "yandex"]);
        assert_eq!(options.search_all_engines_action, AllEnginesPlacement::Main);
        assert_eq!(options.search_mode_action, SearchMode::Upload);
        assert!(options.tab_in_background);
    }

    #[test]
    fn bad_file_is_an_options_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[menu]\nshow = \"maybe\"").unwrap();
        assert!(matches!(
            FileOptions::at(file.path()).read(),
            Err(CoreError::Options(_))
        ));
        assert!(load_from_path(file.path()).is_none());
    }

    #[test]
    fn missing_file_is_none() {
        assert!(load_from_path(Path::new("/nonexistent/imgsearch/options.toml")).is_none());
    }
}
