//! Browser-side collaborators: tabs, script injection, messaging, context
//! menu, toolbar action and notifications.
//!
//! The core never talks to a browser directly. Every side effect goes through
//! one of the traits here so the orchestration can run against a real
//! extension host or against [`recording::RecordingHost`] in tests and in the
//! CLI.

pub mod recording;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Notice};
use crate::options::OptionsSource;
use crate::ui_sync::{ActionState, MenuItem};

pub type TabId = u32;
pub type FrameId = u32;

/// Frame id of a tab's top-level document.
pub const TOP_FRAME: FrameId = 0;

/// Boxed future returned by every host call.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'a>>;

/// A browser tab as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub index: u32,
    #[serde(default)]
    pub url: Option<String>,
}

/// Who sent an inbound message. Popup and options pages have no tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default)]
    pub tab: Option<Tab>,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
}

impl MessageSender {
    pub fn from_frame(tab: Tab, frame_id: FrameId) -> Self {
        Self {
            tab: Some(tab),
            frame_id: Some(frame_id),
        }
    }

    pub fn frame(&self) -> FrameId {
        self.frame_id.unwrap_or(TOP_FRAME)
    }
}

/// Parameters for opening a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTab {
    pub url: String,
    pub index: u32,
    pub active: bool,
    pub opener_tab_id: Option<TabId>,
}

/// Where a script or stylesheet is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "scope")]
pub enum ScriptTarget {
    Frame { tab_id: TabId, frame_id: FrameId },
    AllFrames { tab_id: TabId },
}

impl ScriptTarget {
    pub fn frame(tab_id: TabId, frame_id: FrameId) -> Self {
        ScriptTarget::Frame { tab_id, frame_id }
    }

    pub fn top(tab_id: TabId) -> Self {
        ScriptTarget::Frame {
            tab_id,
            frame_id: TOP_FRAME,
        }
    }

    pub fn tab_id(&self) -> TabId {
        match self {
            ScriptTarget::Frame { tab_id, .. } | ScriptTarget::AllFrames { tab_id } => *tab_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    DocumentStart,
    DocumentIdle,
}

/// Tab, scripting, messaging and blob-URL primitives of the extension host.
pub trait BrowserHost: Send + Sync {
    fn create_tab(&self, tab: CreateTab) -> HostFuture<'_, Tab>;

    fn remove_tab(&self, tab_id: TabId) -> HostFuture<'_, ()>;

    /// The active tab of the last focused window.
    fn active_tab(&self) -> HostFuture<'_, Tab>;

    /// Run a code snippet, returning one result per frame the target covers.
    fn execute_code<'a>(
        &'a self,
        target: ScriptTarget,
        code: &'a str,
    ) -> HostFuture<'a, Vec<Value>>;

    fn execute_file<'a>(
        &'a self,
        target: ScriptTarget,
        path: &'a str,
        run_at: RunAt,
    ) -> HostFuture<'a, ()>;

    fn insert_css<'a>(
        &'a self,
        target: ScriptTarget,
        path: &'a str,
        run_at: RunAt,
    ) -> HostFuture<'a, ()>;

    /// Whether content scripts may run in the frame (false on store pages,
    /// internal pages and the like).
    fn scripts_allowed(&self, tab_id: TabId, frame_id: FrameId) -> HostFuture<'_, bool>;

    /// Post a message to a tab; `None` delivers to every frame.
    fn send_message(
        &self,
        tab_id: TabId,
        frame_id: Option<FrameId>,
        message: Value,
    ) -> HostFuture<'_, ()>;

    /// Turn a `data:` URI into a local blob reference.
    fn create_object_url<'a>(&'a self, data_uri: &'a str) -> HostFuture<'a, String>;

    fn revoke_object_url<'a>(&'a self, object_url: &'a str) -> HostFuture<'a, ()>;

    /// Absolute URL of a file packaged with the extension.
    fn extension_url(&self, path: &str) -> String;
}

/// Context menu and toolbar action.
pub trait UiSurface: Send + Sync {
    fn remove_all_menu_items(&self) -> HostFuture<'_, ()>;

    fn create_menu_item(&self, item: MenuItem) -> HostFuture<'_, ()>;

    fn set_action(&self, state: ActionState) -> HostFuture<'_, ()>;
}

pub trait Notifier: Send + Sync {
    /// Fire-and-forget; the key is localized by the host.
    fn show_notification<'a>(
        &'a self,
        message_key: &'a str,
        kind: Option<&'a str>,
    ) -> HostFuture<'a, ()>;
}

/// Bundle of collaborators shared by every component.
#[derive(Clone)]
pub struct Host {
    pub browser: Arc<dyn BrowserHost>,
    pub ui: Arc<dyn UiSurface>,
    pub notifier: Arc<dyn Notifier>,
    pub options: Arc<dyn OptionsSource>,
}

impl Host {
    /// Report a notice. Notification failures are logged, never propagated.
    pub async fn notify(&self, notice: Notice) {
        tracing::info!(notice = %notice, "reporting notice");
        if let Err(e) = self
            .notifier
            .show_notification(notice.message_key(), None)
            .await
        {
            tracing::warn!(notice = %notice, error = %e, "notification failed");
        }
    }

    /// Send a JSON message, logging instead of failing. Used for UI teardown
    /// messages whose loss only leaves an overlay behind.
    pub async fn send_best_effort(
        &self,
        tab_id: TabId,
        frame_id: Option<FrameId>,
        message: Value,
    ) {
        if let Err(e) = self.browser.send_message(tab_id, frame_id, message).await {
            tracing::warn!(tab = tab_id, error = %e, "message delivery failed");
        }
    }
}
