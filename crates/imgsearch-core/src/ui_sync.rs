//! Context menu and toolbar action derived from the options.
//!
//! Both surfaces are rebuilt from scratch on every sync: all menu items are
//! removed, the plan is recomputed from freshly loaded options, and the
//! result is installed. Nothing is patched incrementally.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::engines::{ALL_ENGINES, EngineTable};
use crate::error::CoreError;
use crate::host::Host;
use crate::options::{AllEnginesPlacement, Options, Platform};

pub const MENU_GROUP_ID: &str = "par-1";
pub const MENU_SEPARATOR_ID: &str = "sep-1";
pub const ACTION_POPUP: &str = "/src/action/index.html";

const MENU_CONTEXTS: [&str; 8] = [
    "audio",
    "editable",
    "frame",
    "image",
    "link",
    "page",
    "selection",
    "video",
];

/// A localization key, optionally with one localized argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_key: Option<String>,
}

impl Text {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            arg_key: None,
        }
    }

    pub fn with_arg(key: impl Into<String>, arg_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            arg_key: Some(arg_key.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuItemKind {
    Normal,
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Text>,
    pub kind: MenuItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub contexts: Vec<String>,
    pub url_patterns: Vec<String>,
}

/// Toolbar button behavior. `popup` and `click_handler` are mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub title: Text,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup: Option<String>,
    pub click_handler: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPlan {
    /// Whether menu clicks are handled at all.
    pub menu_enabled: bool,
    pub menu: Vec<MenuItem>,
    pub action: ActionState,
}

fn engine_title_key(engine: &str) -> String {
    format!("menuItemTitle_{engine}")
}

fn url_patterns(platform: Platform) -> Vec<String> {
    let mut patterns = vec![
        "http://*/*".to_string(),
        "https://*/*".to_string(),
        "ftp://*/*".to_string(),
    ];
    if platform.scripts_file_pages() {
        patterns.push("file:///*".to_string());
    }
    patterns
}

/// Menu entries for the enabled engines, parents before children.
pub fn plan_context_menu(
    options: &Options,
    enabled: &[String],
    platform: Platform,
) -> Vec<MenuItem> {
    let contexts: Vec<String> = MENU_CONTEXTS.iter().map(|c| c.to_string()).collect();
    let patterns = url_patterns(platform);
    let item = |id: &str, title: Option<Text>, kind: MenuItemKind, parent: Option<&str>| MenuItem {
        id: id.to_string(),
        title,
        kind,
        parent: parent.map(String::from),
        contexts: contexts.clone(),
        url_patterns: patterns.clone(),
    };

    match enabled {
        [] => vec![],
        [engine] => vec![item(
            engine.as_str(),
            Some(Text::with_arg(
                "mainMenuItemTitle_engine",
                engine_title_key(engine),
            )),
            MenuItemKind::Normal,
            None,
        )],
        engines => {
            if options.search_all_engines_context_menu == AllEnginesPlacement::Main {
                return vec![item(
                    ALL_ENGINES,
                    Some(Text::new("mainMenuItemTitle_allEngines")),
                    MenuItemKind::Normal,
                    None,
                )];
            }

            let mut items = vec![item(
                MENU_GROUP_ID,
                Some(Text::new("mainMenuGroupTitle_searchImage")),
                MenuItemKind::Normal,
                None,
            )];
            if options.search_all_engines_context_menu == AllEnginesPlacement::Sub {
                items.push(item(
                    ALL_ENGINES,
                    Some(Text::new("menuItemTitle_allEngines")),
                    MenuItemKind::Normal,
                    Some(MENU_GROUP_ID),
                ));
                items.push(item(
                    MENU_SEPARATOR_ID,
                    None,
                    MenuItemKind::Separator,
                    Some(MENU_GROUP_ID),
                ));
            }
            items.extend(engines.iter().map(|engine| {
                item(
                    engine.as_str(),
                    Some(Text::new(engine_title_key(engine))),
                    MenuItemKind::Normal,
                    Some(MENU_GROUP_ID),
                )
            }));
            items
        }
    }
}

pub fn plan_action(options: &Options, enabled: &[String]) -> ActionState {
    match enabled {
        [engine] => ActionState {
            title: Text::with_arg("actionTitle_engine", engine_title_key(engine)),
            popup: None,
            click_handler: true,
        },
        [_, _, ..] if options.search_all_engines_action == AllEnginesPlacement::Main => {
            ActionState {
                title: Text::new("actionTitle_allEngines"),
                popup: None,
                click_handler: true,
            }
        }
        // The click handler reports that every engine is disabled.
        [] => ActionState {
            title: Text::new("extensionName"),
            popup: None,
            click_handler: true,
        },
        _ => ActionState {
            title: Text::new("extensionName"),
            popup: Some(ACTION_POPUP.to_string()),
            click_handler: false,
        },
    }
}

pub fn plan(options: &Options, engines: &EngineTable, platform: Platform) -> UiPlan {
    let enabled = options.enabled_engines(engines);
    let menu_enabled = options.show_in_context_menu;
    UiPlan {
        menu_enabled,
        menu: if menu_enabled {
            plan_context_menu(options, &enabled, platform)
        } else {
            vec![]
        },
        action: plan_action(options, &enabled),
    }
}

/// Installs UI plans and remembers which click sources are live.
#[derive(Debug, Default)]
pub struct UiSynchronizer {
    menu_clicks: AtomicBool,
    action_clicks: AtomicBool,
    /// Held across a whole rebuild so concurrent syncs never interleave.
    rebuild: Mutex<()>,
}

impl UiSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn menu_clicks_enabled(&self) -> bool {
        self.menu_clicks.load(Ordering::SeqCst)
    }

    pub fn action_clicks_enabled(&self) -> bool {
        self.action_clicks.load(Ordering::SeqCst)
    }

    /// Reload options and rebuild both surfaces.
    pub async fn sync(
        &self,
        host: &Host,
        engines: &EngineTable,
        platform: Platform,
    ) -> Result<UiPlan, CoreError> {
        let _rebuild = self.rebuild.lock().await;
        let options = host.options.load().await?;
        let plan = plan(&options, engines, platform);

        host.ui.remove_all_menu_items().await?;
        self.menu_clicks.store(plan.menu_enabled, Ordering::SeqCst);
        for item in &plan.menu {
            host.ui.create_menu_item(item.clone()).await?;
        }

        self.action_clicks
            .store(plan.action.click_handler, Ordering::SeqCst);
        host.ui.set_action(plan.action.clone()).await?;

        tracing::info!(
            menu_items = plan.menu.len(),
            menu_enabled = plan.menu_enabled,
            popup = plan.action.popup.is_some(),
            "ui rebuilt"
        );
        Ok(plan)
    }
}
