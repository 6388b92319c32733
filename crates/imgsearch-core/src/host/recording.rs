//! In-memory host that records every call.
//!
//! Used by the unit and integration tests and by the `imgsearch replay`
//! command. Responses are scripted per tab/frame:
//! - scripts are allowed everywhere unless denied with
//!   [`deny_scripts`](RecordingHost::deny_scripts) or
//!   [`deny_all_scripts`](RecordingHost::deny_all_scripts);
//! - `parseDocument()` answers with the [`Extraction`] set for the frame,
//!   falling back to the default (no images);
//! - tab ids are handed out sequentially from 100;
//! - object URLs look like `blob:imgsearch/<n>`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use super::{
    BrowserHost, CreateTab, FrameId, Host, HostFuture, Notifier, RunAt, ScriptTarget, Tab, TabId,
    UiSurface,
};
use crate::error::CoreError;
use crate::options::OptionsSource;
use crate::ui_sync::{ActionState, MenuItem};

const EXTENSION_ORIGIN: &str = "moz-extension://imgsearch";
const FIRST_TAB_ID: TabId = 100;

/// One recorded side effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostCall {
    CreateTab {
        tab_id: TabId,
        url: String,
        index: u32,
        active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        opener_tab_id: Option<TabId>,
    },
    RemoveTab {
        tab_id: TabId,
    },
    ExecuteCode {
        target: ScriptTarget,
        code: String,
    },
    ExecuteFile {
        target: ScriptTarget,
        path: String,
        run_at: RunAt,
    },
    InsertCss {
        target: ScriptTarget,
        path: String,
        run_at: RunAt,
    },
    SendMessage {
        tab_id: TabId,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_id: Option<FrameId>,
        message: Value,
    },
    CreateObjectUrl {
        object_url: String,
    },
    RevokeObjectUrl {
        object_url: String,
    },
    Notify {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    RemoveAllMenuItems,
    CreateMenuItem {
        item: MenuItem,
    },
    SetAction {
        state: ActionState,
    },
}

/// Scripted answer to an in-page `parseDocument()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Images(Vec<Value>),
    /// The page runtime answered with nothing.
    Null,
    /// The execution itself failed.
    Fail,
}

/// A hand-rolled host implementing [`BrowserHost`], [`UiSurface`] and
/// [`Notifier`].
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    next_tab_id: AtomicU32,
    next_blob: AtomicU32,
    deny_all: AtomicBool,
    denied_tabs: Mutex<HashSet<TabId>>,
    extractions: Mutex<HashMap<(TabId, FrameId), Extraction>>,
    default_extraction: Mutex<Extraction>,
    active_tab: Mutex<Tab>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_tab_id: AtomicU32::new(FIRST_TAB_ID),
            next_blob: AtomicU32::new(1),
            deny_all: AtomicBool::new(false),
            denied_tabs: Mutex::new(HashSet::new()),
            extractions: Mutex::new(HashMap::new()),
            default_extraction: Mutex::new(Extraction::Images(Vec::new())),
            active_tab: Mutex::new(Tab {
                id: 1,
                index: 0,
                url: Some("https://example.com/".into()),
            }),
        }
    }

    /// Bundle this recorder as every collaborator of a [`Host`].
    pub fn host(self: &Arc<Self>, options: Arc<dyn OptionsSource>) -> Host {
        Host {
            browser: self.clone(),
            ui: self.clone(),
            notifier: self.clone(),
            options,
        }
    }

    pub fn deny_scripts(&self, tab_id: TabId) {
        lock(&self.denied_tabs).insert(tab_id);
    }

    pub fn deny_all_scripts(&self) {
        self.deny_all.store(true, Ordering::SeqCst);
    }

    pub fn set_extraction(&self, tab_id: TabId, frame_id: FrameId, extraction: Extraction) {
        lock(&self.extractions).insert((tab_id, frame_id), extraction);
    }

    pub fn set_default_extraction(&self, extraction: Extraction) {
        *lock(&self.default_extraction) = extraction;
    }

    pub fn set_active_tab(&self, tab: Tab) {
        *lock(&self.active_tab) = tab;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    /// Drain the recorded calls.
    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    pub fn created_tabs(&self) -> Vec<CreateTab> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::CreateTab {
                    url,
                    index,
                    active,
                    opener_tab_id,
                    ..
                } => Some(CreateTab {
                    url,
                    index,
                    active,
                    opener_tab_id,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn removed_tabs(&self) -> Vec<TabId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::RemoveTab { tab_id } => Some(tab_id),
                _ => None,
            })
            .collect()
    }

    /// Message keys shown, in order.
    pub fn notices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Notify { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<(TabId, Option<FrameId>, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::SendMessage {
                    tab_id,
                    frame_id,
                    message,
                } => Some((tab_id, frame_id, message)),
                _ => None,
            })
            .collect()
    }

    pub fn code_runs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::ExecuteCode { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn revoked_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::RevokeObjectUrl { object_url } => Some(object_url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        tracing::trace!(?call, "host call");
        lock(&self.calls).push(call);
    }

    fn extraction_for(&self, tab_id: TabId, frame_id: FrameId) -> Extraction {
        lock(&self.extractions)
            .get(&(tab_id, frame_id))
            .cloned()
            .unwrap_or_else(|| lock(&self.default_extraction).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BrowserHost for RecordingHost {
    fn create_tab(&self, tab: CreateTab) -> HostFuture<'_, Tab> {
        let id = self.next_tab_id.fetch_add(1, Ordering::SeqCst);
        let index = tab.index;
        let url = tab.url.clone();
        self.record(HostCall::CreateTab {
            tab_id: id,
            url: tab.url,
            index: tab.index,
            active: tab.active,
            opener_tab_id: tab.opener_tab_id,
        });
        Box::pin(async move {
            Ok(Tab {
                id,
                index,
                url: Some(url),
            })
        })
    }

    fn remove_tab(&self, tab_id: TabId) -> HostFuture<'_, ()> {
        self.record(HostCall::RemoveTab { tab_id });
        Box::pin(async { Ok(()) })
    }

    fn active_tab(&self) -> HostFuture<'_, Tab> {
        let tab = lock(&self.active_tab).clone();
        Box::pin(async move { Ok(tab) })
    }

    fn execute_code<'a>(
        &'a self,
        target: ScriptTarget,
        code: &'a str,
    ) -> HostFuture<'a, Vec<Value>> {
        self.record(HostCall::ExecuteCode {
            target,
            code: code.to_string(),
        });
        let result = match target {
            ScriptTarget::Frame { tab_id, frame_id } if code.contains("parseDocument()") => {
                match self.extraction_for(tab_id, frame_id) {
                    Extraction::Images(images) => Ok(vec![Value::Array(images)]),
                    Extraction::Null => Ok(vec![Value::Null]),
                    Extraction::Fail => Err(CoreError::Host(format!(
                        "script execution failed in tab {tab_id} frame {frame_id}"
                    ))),
                }
            }
            _ => Ok(vec![Value::Null]),
        };
        Box::pin(async move { result })
    }

    fn execute_file<'a>(
        &'a self,
        target: ScriptTarget,
        path: &'a str,
        run_at: RunAt,
    ) -> HostFuture<'a, ()> {
        self.record(HostCall::ExecuteFile {
            target,
            path: path.to_string(),
            run_at,
        });
        Box::pin(async { Ok(()) })
    }

    fn insert_css<'a>(
        &'a self,
        target: ScriptTarget,
        path: &'a str,
        run_at: RunAt,
    ) -> HostFuture<'a, ()> {
        self.record(HostCall::InsertCss {
            target,
            path: path.to_string(),
            run_at,
        });
        Box::pin(async { Ok(()) })
    }

    fn scripts_allowed(&self, tab_id: TabId, _frame_id: FrameId) -> HostFuture<'_, bool> {
        let allowed =
            !self.deny_all.load(Ordering::SeqCst) && !lock(&self.denied_tabs).contains(&tab_id);
        Box::pin(async move { Ok(allowed) })
    }

    fn send_message(
        &self,
        tab_id: TabId,
        frame_id: Option<FrameId>,
        message: Value,
    ) -> HostFuture<'_, ()> {
        self.record(HostCall::SendMessage {
            tab_id,
            frame_id,
            message,
        });
        Box::pin(async { Ok(()) })
    }

    fn create_object_url<'a>(&'a self, _data_uri: &'a str) -> HostFuture<'a, String> {
        let n = self.next_blob.fetch_add(1, Ordering::SeqCst);
        let object_url = format!("blob:imgsearch/{n}");
        self.record(HostCall::CreateObjectUrl {
            object_url: object_url.clone(),
        });
        Box::pin(async move { Ok(object_url) })
    }

    fn revoke_object_url<'a>(&'a self, object_url: &'a str) -> HostFuture<'a, ()> {
        self.record(HostCall::RevokeObjectUrl {
            object_url: object_url.to_string(),
        });
        Box::pin(async { Ok(()) })
    }

    fn extension_url(&self, path: &str) -> String {
        format!("{EXTENSION_ORIGIN}{path}")
    }
}

impl UiSurface for RecordingHost {
    fn remove_all_menu_items(&self) -> HostFuture<'_, ()> {
        self.record(HostCall::RemoveAllMenuItems);
        Box::pin(async { Ok(()) })
    }

    fn create_menu_item(&self, item: MenuItem) -> HostFuture<'_, ()> {
        self.record(HostCall::CreateMenuItem { item });
        Box::pin(async { Ok(()) })
    }

    fn set_action(&self, state: ActionState) -> HostFuture<'_, ()> {
        self.record(HostCall::SetAction { state });
        Box::pin(async { Ok(()) })
    }
}

impl Notifier for RecordingHost {
    fn show_notification<'a>(
        &'a self,
        message_key: &'a str,
        kind: Option<&'a str>,
    ) -> HostFuture<'a, ()> {
        self.record(HostCall::Notify {
            key: message_key.to_string(),
            kind: kind.map(String::from),
        });
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn tab_ids_are_sequential() {
        let host = RecordingHost::new();
        let request = |index| CreateTab {
            url: "https://a/".into(),
            index,
            active: false,
            opener_tab_id: None,
        };
        let first = host.create_tab(request(1)).await.unwrap();
        let second = host.create_tab(request(2)).await.unwrap();
        assert_eq!((first.id, second.id), (FIRST_TAB_ID, FIRST_TAB_ID + 1));
        assert_eq!(host.created_tabs().len(), 2);
    }

    #[tokio::test]
    async fn scripted_extraction_per_frame() {
        let host = RecordingHost::new();
        host.set_extraction(3, 1, Extraction::Images(vec![json!({"data": "x"})]));
        host.set_extraction(3, 2, Extraction::Fail);

        let found = host
            .execute_code(ScriptTarget::frame(3, 1), "parseDocument();")
            .await
            .unwrap();
        assert_eq!(found, vec![json!([{"data": "x"}])]);

        let default = host
            .execute_code(ScriptTarget::frame(3, 0), "parseDocument();")
            .await
            .unwrap();
        assert_eq!(default, vec![json!([])]);

        assert!(
            host.execute_code(ScriptTarget::frame(3, 2), "parseDocument();")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn script_denial() {
        let host = RecordingHost::new();
        host.deny_scripts(4);
        assert!(!host.scripts_allowed(4, 0).await.unwrap());
        assert!(host.scripts_allowed(5, 0).await.unwrap());
        host.deny_all_scripts();
        assert!(!host.scripts_allowed(5, 0).await.unwrap());
    }

    #[tokio::test]
    async fn take_calls_drains() {
        let host = RecordingHost::new();
        host.show_notification("error_imageNotFound", Some("info"))
            .await
            .unwrap();
        assert_eq!(host.notices(), ["error_imageNotFound"]);
        assert_eq!(host.take_calls().len(), 1);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn host_call_wire_shape() {
        let call = HostCall::SendMessage {
            tab_id: 2,
            frame_id: Some(0),
            message: json!({"id": "imageConfirmationClose"}),
        };
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "call": "sendMessage",
                "tabId": 2,
                "frameId": 0,
                "message": {"id": "imageConfirmationClose"}
            })
        );
    }
}
