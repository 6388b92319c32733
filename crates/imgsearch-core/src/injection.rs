//! Per-frame registry of installed content-script modules.
//!
//! The core owns the record for every (tab, frame). A freshly loaded page
//! runtime reports in with a `frameRegister` handshake, which resets the
//! record; navigation and tab removal drop it. [`InjectionRegistry::ensure`]
//! installs a module only when the record says it is missing and flips the
//! flag after the files went in, so a failure leaves the module eligible for
//! the next attempt. Two concurrent `ensure` calls for the same frame may both
//! inject; module scripts tolerate re-execution.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::host::{BrowserHost, FrameId, RunAt, ScriptTarget, TabId};

/// Optional in-page capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Parse,
    Confirm,
    Select,
}

impl Module {
    pub fn script(self) -> &'static str {
        match self {
            Module::Parse => "/src/content/parse.js",
            Module::Confirm => "/src/content/confirm.js",
            Module::Select => "/src/content/select.js",
        }
    }

    pub fn stylesheet(self) -> Option<&'static str> {
        match self {
            Module::Parse => None,
            Module::Confirm => Some("/src/confirm/frame.css"),
            Module::Select => Some("/src/select/frame.css"),
        }
    }
}

/// Which modules a frame has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionRecord {
    pub parse: bool,
    pub confirm: bool,
    pub select: bool,
}

impl InjectionRecord {
    pub fn has(&self, module: Module) -> bool {
        match module {
            Module::Parse => self.parse,
            Module::Confirm => self.confirm,
            Module::Select => self.select,
        }
    }

    pub fn set(&mut self, module: Module) {
        match module {
            Module::Parse => self.parse = true,
            Module::Confirm => self.confirm = true,
            Module::Select => self.select = true,
        }
    }
}

#[derive(Debug, Default)]
pub struct InjectionRegistry {
    records: DashMap<(TabId, FrameId), InjectionRecord>,
}

impl InjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record; an unknown frame has nothing installed.
    pub fn probe(&self, tab_id: TabId, frame_id: FrameId) -> InjectionRecord {
        self.records
            .get(&(tab_id, frame_id))
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    /// Handshake from a page runtime: replace whatever was known.
    pub fn register(&self, tab_id: TabId, frame_id: FrameId, record: InjectionRecord) {
        tracing::debug!(tab = tab_id, frame = frame_id, ?record, "frame registered");
        self.records.insert((tab_id, frame_id), record);
    }

    /// Set a module flag. Returns `true` if it was not set before.
    pub fn mark(&self, tab_id: TabId, frame_id: FrameId, module: Module) -> bool {
        let mut record = self.records.entry((tab_id, frame_id)).or_default();
        let newly = !record.has(module);
        record.set(module);
        newly
    }

    /// Forget every frame of a tab. Returns how many records were dropped.
    pub fn forget_tab(&self, tab_id: TabId) -> usize {
        let before = self.records.len();
        self.records.retain(|(tab, _), _| *tab != tab_id);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Install `module` into the frame unless it is already there. Returns
    /// whether anything was injected.
    pub async fn ensure(
        &self,
        browser: &dyn BrowserHost,
        tab_id: TabId,
        frame_id: FrameId,
        module: Module,
    ) -> Result<bool, CoreError> {
        if self.probe(tab_id, frame_id).has(module) {
            tracing::trace!(tab = tab_id, frame = frame_id, ?module, "module present");
            return Ok(false);
        }

        let target = ScriptTarget::frame(tab_id, frame_id);
        if let Some(css) = module.stylesheet() {
            browser.insert_css(target, css, RunAt::DocumentStart).await?;
        }
        browser
            .execute_file(target, module.script(), RunAt::DocumentStart)
            .await?;
        self.mark(tab_id, frame_id, module);
        tracing::debug!(tab = tab_id, frame = frame_id, ?module, "module injected");
        Ok(true)
    }
}
