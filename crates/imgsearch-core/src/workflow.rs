//! Suspended workflows and the outcomes every handler reports.
//!
//! A confirmation or selection workflow that needs the user parks its state
//! here under a fresh [`WorkflowToken`]. The token goes out with the message
//! that opens the in-page UI and comes back with the submit/cancel reply,
//! which resumes or drops exactly that state.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchReport;
use crate::engines::EngineSelector;
use crate::error::Notice;
use crate::host::{Tab, TabId};
use crate::message::ImageSource;
use crate::store::StoreKey;
use crate::ui_sync::UiPlan;

const TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowToken(String);

impl WorkflowToken {
    pub fn generate() -> Self {
        Self(
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(TOKEN_LEN)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkflowToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WorkflowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Confirmation,
    Selection,
}

/// State of a workflow waiting on the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Suspended {
    /// Several candidates were found; the confirmation overlay is open.
    AwaitingConfirmation {
        engine: EngineSelector,
        tab: Tab,
        images: Vec<ImageSource>,
    },
    /// The point-and-select pointer is armed.
    AwaitingSelection { engine: EngineSelector, tab: Tab },
}

impl Suspended {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Suspended::AwaitingConfirmation { .. } => WorkflowKind::Confirmation,
            Suspended::AwaitingSelection { .. } => WorkflowKind::Selection,
        }
    }

    pub fn engine(&self) -> &EngineSelector {
        match self {
            Suspended::AwaitingConfirmation { engine, .. }
            | Suspended::AwaitingSelection { engine, .. } => engine,
        }
    }

    pub fn tab(&self) -> &Tab {
        match self {
            Suspended::AwaitingConfirmation { tab, .. } | Suspended::AwaitingSelection { tab, .. } => {
                tab
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    pending: DashMap<WorkflowToken, Suspended>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self, state: Suspended) -> WorkflowToken {
        loop {
            let token = WorkflowToken::generate();
            if !self.pending.contains_key(&token) {
                tracing::debug!(
                    token = %token,
                    kind = ?state.kind(),
                    tab = state.tab().id,
                    "workflow suspended"
                );
                self.pending.insert(token.clone(), state);
                return token;
            }
        }
    }

    /// Remove and return the state if it is of the expected kind. A token of
    /// the wrong kind is left in place.
    pub fn resume(&self, token: &WorkflowToken, kind: WorkflowKind) -> Option<Suspended> {
        self.pending
            .remove_if(token, |_, state| state.kind() == kind)
            .map(|(_, state)| state)
    }

    pub fn peek(&self, token: &WorkflowToken) -> Option<Suspended> {
        self.pending.get(token).map(|s| s.value().clone())
    }

    /// Drop every workflow suspended on a tab.
    pub fn forget_tab(&self, tab_id: TabId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, state| state.tab().id != tab_id);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// How a handled event ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// Engine tabs were opened.
    Dispatched(DispatchReport),
    AwaitingConfirmation(WorkflowToken),
    AwaitingSelection(WorkflowToken),
    UploadPageOpened(Tab),
    /// Every image of an upload batch went through the dispatcher.
    UploadDispatched {
        session: StoreKey,
        reports: Vec<DispatchReport>,
    },
    ReceiptCounted { receipts: u32, total: u32 },
    /// The last receipt arrived and the upload tab was closed.
    SessionClosed { tab_id: TabId },
    Reported(Notice),
    /// A direct reply went back to the sender.
    Replied,
    /// An in-page overlay was torn down without a search.
    Closed,
    Relayed,
    Registered,
    UiSynced(UiPlan),
    TabForgotten { records: usize, workflows: usize },
    Ignored,
}
