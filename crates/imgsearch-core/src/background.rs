//! The background core: owns the store and registries, wires the components
//! together, and turns browser events into handler calls.
//!
//! Events arrive on an `async_channel` and each one runs in its own task, so
//! a workflow waiting on a page round trip never holds up unrelated events.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::engines::EngineTable;
use crate::error::CoreError;
use crate::host::{Host, MessageSender, Tab, TabId};
use crate::injection::InjectionRegistry;
use crate::options::Platform;
use crate::orchestrate::{MenuClick, Orchestrator};
use crate::router::Router;
use crate::store::{DEFAULT_TTL, EphemeralStore};
use crate::ui_sync::{UiPlan, UiSynchronizer};
use crate::workflow::{Outcome, WorkflowRegistry};

/// A browser-side event delivered to the core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BackgroundEvent {
    MenuClicked {
        info: MenuClick,
        tab: Tab,
    },
    ActionClicked {
        tab: Tab,
    },
    Message {
        message: Value,
        #[serde(default)]
        sender: MessageSender,
    },
    /// The options storage changed.
    OptionsChanged,
    /// A tab loaded a new document; its frames start over.
    TabNavigated {
        tab_id: TabId,
    },
    TabRemoved {
        tab_id: TabId,
    },
}

impl BackgroundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackgroundEvent::MenuClicked { .. } => "menuClicked",
            BackgroundEvent::ActionClicked { .. } => "actionClicked",
            BackgroundEvent::Message { .. } => "message",
            BackgroundEvent::OptionsChanged => "optionsChanged",
            BackgroundEvent::TabNavigated { .. } => "tabNavigated",
            BackgroundEvent::TabRemoved { .. } => "tabRemoved",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub platform: Platform,
    /// Lifetime of stored payloads and upload sessions.
    pub data_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            data_ttl: DEFAULT_TTL,
        }
    }
}

pub struct Background {
    host: Host,
    config: RuntimeConfig,
    engines: Arc<EngineTable>,
    store: Arc<EphemeralStore>,
    injections: Arc<InjectionRegistry>,
    workflows: Arc<WorkflowRegistry>,
    ui: UiSynchronizer,
    orchestrator: Arc<Orchestrator>,
    router: Router,
}

impl Background {
    pub fn new(host: Host, config: RuntimeConfig) -> Self {
        Self::with_engines(host, config, EngineTable::builtin())
    }

    pub fn with_engines(host: Host, config: RuntimeConfig, engines: EngineTable) -> Self {
        let engines = Arc::new(engines);
        let store = Arc::new(EphemeralStore::new(config.data_ttl));
        let injections = Arc::new(InjectionRegistry::new());
        let workflows = Arc::new(WorkflowRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            host.clone(),
            Arc::clone(&store),
            Arc::clone(&engines),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            host.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&injections),
            Arc::clone(&workflows),
            config.platform,
        ));
        let router = Router::new(
            host.clone(),
            Arc::clone(&store),
            dispatcher,
            Arc::clone(&orchestrator),
            Arc::clone(&injections),
        );

        Self {
            host,
            config,
            engines,
            store,
            injections,
            workflows,
            ui: UiSynchronizer::new(),
            orchestrator,
            router,
        }
    }

    /// Install the initial context menu and action state.
    pub async fn start(&self) -> Result<UiPlan, CoreError> {
        self.ui
            .sync(&self.host, &self.engines, self.config.platform)
            .await
    }

    pub async fn handle(&self, event: BackgroundEvent) -> Result<Outcome, CoreError> {
        match event {
            BackgroundEvent::MenuClicked { info, tab } => {
                if !self.ui.menu_clicks_enabled() {
                    tracing::debug!("menu click while the menu is hidden");
                    return Ok(Outcome::Ignored);
                }
                self.orchestrator.on_menu_click(&info, &tab).await
            }
            BackgroundEvent::ActionClicked { tab } => {
                // with a popup bound the browser never delivers clicks
                if !self.ui.action_clicks_enabled() {
                    return Ok(Outcome::Ignored);
                }
                self.orchestrator.on_action_button(&tab).await
            }
            BackgroundEvent::Message { message, sender } => {
                self.router.route_value(message, &sender).await
            }
            BackgroundEvent::OptionsChanged => {
                let plan = self
                    .ui
                    .sync(&self.host, &self.engines, self.config.platform)
                    .await?;
                Ok(Outcome::UiSynced(plan))
            }
            BackgroundEvent::TabNavigated { tab_id } | BackgroundEvent::TabRemoved { tab_id } => {
                let records = self.injections.forget_tab(tab_id);
                let workflows = self.workflows.forget_tab(tab_id);
                tracing::debug!(tab = tab_id, records, workflows, "tab state dropped");
                Ok(Outcome::TabForgotten { records, workflows })
            }
        }
    }

    async fn handle_logged(&self, event: BackgroundEvent) {
        let name = event.name();
        match self.handle(event).await {
            Ok(outcome) => tracing::debug!(event = name, ?outcome, "event handled"),
            Err(e) => tracing::warn!(event = name, error = %e, "event failed"),
        }
    }

    /// Consume events until the channel closes or `cancel` fires. In-flight
    /// handlers are awaited on close and aborted on cancel.
    pub async fn run(
        self: Arc<Self>,
        events: async_channel::Receiver<BackgroundEvent>,
        cancel: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(in_flight = tasks.len(), "background cancelled");
                    tasks.abort_all();
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        let background = Arc::clone(&self);
                        tasks.spawn(async move { background.handle_logged(event).await });
                    }
                    Err(_) => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "event task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::warn!(error = %e, "event task panicked");
            }
        }
    }

    /// Stop all store timers and drop stored data.
    pub fn shutdown(&self) {
        tracing::debug!(entries = self.store.len(), "background shutting down");
        self.store.shutdown();
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engines(&self) -> &EngineTable {
        &self.engines
    }

    pub fn store(&self) -> &EphemeralStore {
        &self.store
    }

    pub fn injections(&self) -> &InjectionRegistry {
        &self.injections
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }
}
