//! Menu click, toolbar action, point-and-select and confirmation workflows.
//!
//! Every workflow ends in one of three ways: a dispatch, a reported
//! [`Notice`], or a suspension registered in the [`WorkflowRegistry`] that a
//! later submit/cancel message picks up by token.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::{Dispatcher, SearchRequest};
use crate::engines::{EngineSelector, EngineTable};
use crate::error::{CoreError, Notice};
use crate::host::{CreateTab, FrameId, Host, MessageSender, ScriptTarget, TOP_FRAME, Tab};
use crate::injection::{InjectionRegistry, Module};
use crate::message::{ImageSource, OutboundMessage};
use crate::options::{AllEnginesPlacement, Platform, SearchMode};
use crate::workflow::{Outcome, Suspended, WorkflowKind, WorkflowRegistry, WorkflowToken};

/// Extension page that lets the user pick files to upload.
pub const BROWSE_PAGE: &str = "/src/browse/index.html";

const SELECTION_TEARDOWN: &str = "removeClickListener();\nhidePointer();";

/// Context-menu click details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuClick {
    /// Engine id or `allEngines`.
    pub menu_item_id: String,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    /// Source URL of the clicked element (image, video, audio).
    #[serde(default)]
    pub src_url: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub frame_url: Option<String>,
}

impl MenuClick {
    pub fn frame(&self) -> FrameId {
        self.frame_id.unwrap_or(TOP_FRAME)
    }
}

/// Compatibility shim for old browsers that reported subframe clicks as
/// top-frame clicks: a top-frame click whose frame URL differs from the page
/// URL cannot be targeted by script injection.
pub fn is_legacy_frame_mismatch(click: &MenuClick) -> bool {
    click.frame() == TOP_FRAME
        && click
            .frame_url
            .as_deref()
            .is_some_and(|frame_url| click.page_url.as_deref() != Some(frame_url))
}

/// Collapse candidates with identical `data`, keeping first-seen order.
pub fn dedupe_images(images: Vec<ImageSource>) -> Vec<ImageSource> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| seen.insert(image.data.clone()))
        .collect()
}

pub struct Orchestrator {
    host: Host,
    dispatcher: Arc<Dispatcher>,
    injections: Arc<InjectionRegistry>,
    workflows: Arc<WorkflowRegistry>,
    platform: Platform,
}

impl Orchestrator {
    pub fn new(
        host: Host,
        dispatcher: Arc<Dispatcher>,
        injections: Arc<InjectionRegistry>,
        workflows: Arc<WorkflowRegistry>,
        platform: Platform,
    ) -> Self {
        Self {
            host,
            dispatcher,
            injections,
            workflows,
            platform,
        }
    }

    fn engines(&self) -> &EngineTable {
        self.dispatcher.engines()
    }

    async fn report(&self, notice: Notice) -> Outcome {
        self.host.notify(notice).await;
        Outcome::Reported(notice)
    }

    async fn search_url(
        &self,
        url: &str,
        engine: EngineSelector,
        tab: &Tab,
    ) -> Result<Outcome, CoreError> {
        self.dispatcher
            .search(SearchRequest::new(
                ImageSource::from_url(url),
                engine,
                tab.index,
            ))
            .await
    }

    pub async fn on_menu_click(&self, click: &MenuClick, tab: &Tab) -> Result<Outcome, CoreError> {
        let engine = EngineSelector::from(click.menu_item_id.as_str());
        let frame_id = click.frame();
        tracing::debug!(tab = tab.id, frame = frame_id, engine = %engine, "menu click");

        if !self.host.browser.scripts_allowed(tab.id, frame_id).await? {
            return match &click.src_url {
                Some(src) => self.search_url(src, engine, tab).await,
                None => Ok(self.report(Notice::ScriptsNotAllowed).await),
            };
        }

        if is_legacy_frame_mismatch(click) {
            tracing::debug!(tab = tab.id, "frame url differs from page url on top frame");
            return match &click.src_url {
                Some(src) => self.search_url(src, engine, tab).await,
                None => Ok(self.report(Notice::ImageNotFound).await),
            };
        }

        self.search_click_target(engine, tab, frame_id).await
    }

    /// Run in-page extraction in a frame, then dispatch or ask for
    /// confirmation.
    pub async fn search_click_target(
        &self,
        engine: EngineSelector,
        tab: &Tab,
        frame_id: FrameId,
    ) -> Result<Outcome, CoreError> {
        let images = match self.extract(tab, frame_id).await {
            Ok(Some(images)) => images,
            Ok(None) => return Ok(self.report(Notice::InternalError).await),
            Err(e) => {
                tracing::warn!(tab = tab.id, frame = frame_id, error = %e, "extraction failed");
                return Ok(self.report(Notice::InternalError).await);
            }
        };
        if images.is_empty() {
            return Ok(self.report(Notice::ImageNotFound).await);
        }

        let mut images = dedupe_images(images);
        tracing::debug!(tab = tab.id, candidates = images.len(), "images extracted");
        if images.len() == 1 {
            let image = images.remove(0);
            return self
                .dispatcher
                .search(SearchRequest::new(image, engine, tab.index))
                .await;
        }

        self.open_confirmation(engine, tab, images).await
    }

    /// `None` when the page runtime answered without a result.
    async fn extract(
        &self,
        tab: &Tab,
        frame_id: FrameId,
    ) -> Result<Option<Vec<ImageSource>>, CoreError> {
        let options = self.host.options.load().await?;
        let target = ScriptTarget::frame(tab.id, frame_id);
        let browser = self.host.browser.as_ref();

        browser
            .execute_code(
                target,
                &format!("frameStore.options.imgFullParse = {};", options.img_full_parse),
            )
            .await?;
        self.injections
            .ensure(browser, tab.id, frame_id, Module::Parse)
            .await?;

        let result = browser
            .execute_code(target, "parseDocument();")
            .await?
            .into_iter()
            .next()
            .unwrap_or(Value::Null);
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    async fn open_confirmation(
        &self,
        engine: EngineSelector,
        tab: &Tab,
        images: Vec<ImageSource>,
    ) -> Result<Outcome, CoreError> {
        self.injections
            .ensure(self.host.browser.as_ref(), tab.id, TOP_FRAME, Module::Confirm)
            .await?;

        let token = self.workflows.suspend(Suspended::AwaitingConfirmation {
            engine: engine.clone(),
            tab: tab.clone(),
            images: images.clone(),
        });
        let open = OutboundMessage::ImageConfirmationOpen {
            images,
            engine,
            token: token.clone(),
        };
        if let Err(e) = self.send_top(tab, &open).await {
            self.workflows.resume(&token, WorkflowKind::Confirmation);
            return Err(e);
        }
        Ok(Outcome::AwaitingConfirmation(token))
    }

    async fn send_top(&self, tab: &Tab, message: &OutboundMessage) -> Result<(), CoreError> {
        self.host
            .browser
            .send_message(tab.id, Some(TOP_FRAME), message.to_value()?)
            .await
    }

    /// Toolbar button clicked while it has a click handler.
    pub async fn on_action_button(&self, tab: &Tab) -> Result<Outcome, CoreError> {
        let options = self.host.options.load().await?;
        let mode = options.search_mode_action;

        if mode == SearchMode::Url && !self.platform.supports_url_mode() {
            return Ok(self.report(Notice::InvalidSearchModeUrl).await);
        }

        let enabled = options.enabled_engines(self.engines());
        let engine = match enabled.as_slice() {
            [] => return Ok(self.report(Notice::AllEnginesDisabled).await),
            [_, _, ..] if options.search_all_engines_action == AllEnginesPlacement::Main => {
                EngineSelector::All
            }
            [first, ..] => EngineSelector::Engine(first.clone()),
        };

        self.on_action(tab, engine, mode).await
    }

    /// The action popup picked an engine.
    pub async fn on_popup_submit(
        &self,
        engine: EngineSelector,
        image_url: Option<&str>,
    ) -> Result<Outcome, CoreError> {
        let options = self.host.options.load().await?;
        let tab = self.host.browser.active_tab().await?;

        if options.search_mode_action == SearchMode::Url {
            return match image_url {
                Some(url) if !url.is_empty() => self.search_url(url, engine, &tab).await,
                _ => Ok(self.report(Notice::ImageNotFound).await),
            };
        }
        self.on_action(&tab, engine, options.search_mode_action).await
    }

    pub async fn on_action(
        &self,
        tab: &Tab,
        engine: EngineSelector,
        mode: SearchMode,
    ) -> Result<Outcome, CoreError> {
        match mode {
            SearchMode::Upload => {
                let url = format!(
                    "{}?engine={}",
                    self.host.browser.extension_url(BROWSE_PAGE),
                    engine
                );
                let page = self
                    .host
                    .browser
                    .create_tab(CreateTab {
                        url,
                        index: tab.index + 1,
                        active: true,
                        opener_tab_id: Some(tab.id),
                    })
                    .await?;
                tracing::info!(tab = page.id, engine = %engine, "upload page opened");
                Ok(Outcome::UploadPageOpened(page))
            }
            SearchMode::Select => self.arm_selection(tab, engine).await,
            SearchMode::Url => {
                if !self.platform.supports_url_mode() {
                    return Ok(self.report(Notice::InvalidSearchModeUrl).await);
                }
                match &tab.url {
                    Some(url) => self.search_url(url, engine, tab).await,
                    None => Ok(self.report(Notice::ImageNotFound).await),
                }
            }
        }
    }

    async fn arm_selection(&self, tab: &Tab, engine: EngineSelector) -> Result<Outcome, CoreError> {
        if tab.url.as_deref().is_some_and(|u| u.starts_with("file:"))
            && !self.platform.scripts_file_pages()
        {
            return Ok(self.report(Notice::InvalidFileUrl).await);
        }
        if !self.host.browser.scripts_allowed(tab.id, TOP_FRAME).await? {
            return Ok(self.report(Notice::ScriptsNotAllowed).await);
        }

        let browser = self.host.browser.as_ref();
        self.injections
            .ensure(browser, tab.id, TOP_FRAME, Module::Select)
            .await?;

        let token = self.workflows.suspend(Suspended::AwaitingSelection {
            engine: engine.clone(),
            tab: tab.clone(),
        });
        let armed: Result<(), CoreError> = async {
            let code = format!(
                "addClickListener();\nshowPointer();\nframeStore.data.engine = {};\nframeStore.data.token = {};",
                serde_json::to_string(&engine)?,
                serde_json::to_string(&token)?,
            );
            browser
                .execute_code(ScriptTarget::AllFrames { tab_id: tab.id }, &code)
                .await?;
            self.send_top(
                tab,
                &OutboundMessage::ImageSelectionOpen {
                    token: token.clone(),
                },
            )
            .await
        }
        .await;

        if let Err(e) = armed {
            self.workflows.resume(&token, WorkflowKind::Selection);
            return Err(e);
        }
        Ok(Outcome::AwaitingSelection(token))
    }

    /// Token state wins; the message's own engine is the fallback.
    fn resume_engine(
        &self,
        token: Option<&WorkflowToken>,
        kind: WorkflowKind,
        fallback: Option<EngineSelector>,
    ) -> Option<EngineSelector> {
        let resumed = token.and_then(|t| self.workflows.resume(t, kind));
        if token.is_some() && resumed.is_none() {
            tracing::debug!(?kind, "stale or unknown workflow token");
        }
        resumed.map(|state| state.engine().clone()).or(fallback)
    }

    async fn tear_down_selection(&self, tab: &Tab, message_frame: bool) {
        if let Err(e) = self
            .host
            .browser
            .execute_code(ScriptTarget::AllFrames { tab_id: tab.id }, SELECTION_TEARDOWN)
            .await
        {
            tracing::warn!(tab = tab.id, error = %e, "selection teardown failed");
        }
        self.close_overlay(
            tab,
            OutboundMessage::ImageSelectionClose {
                message_frame: message_frame.then_some(true),
            },
        )
        .await;
    }

    async fn close_overlay(&self, tab: &Tab, message: OutboundMessage) {
        match message.to_value() {
            Ok(value) => {
                self.host
                    .send_best_effort(tab.id, Some(TOP_FRAME), value)
                    .await
            }
            Err(e) => tracing::warn!(error = %e, "close message not encodable"),
        }
    }

    pub async fn on_selection_submit(
        &self,
        sender: &MessageSender,
        engine: Option<EngineSelector>,
        token: Option<&WorkflowToken>,
    ) -> Result<Outcome, CoreError> {
        let tab = sender
            .tab
            .as_ref()
            .ok_or(CoreError::NoSenderTab("imageSelectionSubmit"))?;
        self.tear_down_selection(tab, true).await;

        let Some(engine) = self.resume_engine(token, WorkflowKind::Selection, engine) else {
            tracing::warn!(tab = tab.id, "selection submitted without engine");
            return Ok(Outcome::Ignored);
        };
        self.search_click_target(engine, tab, sender.frame()).await
    }

    pub async fn on_selection_cancel(
        &self,
        sender: &MessageSender,
        token: Option<&WorkflowToken>,
    ) -> Result<Outcome, CoreError> {
        let tab = sender
            .tab
            .as_ref()
            .ok_or(CoreError::NoSenderTab("imageSelectionCancel"))?;
        if let Some(token) = token {
            self.workflows.resume(token, WorkflowKind::Selection);
        }
        self.tear_down_selection(tab, false).await;
        Ok(Outcome::Closed)
    }

    pub async fn on_confirmation_submit(
        &self,
        sender: &MessageSender,
        image: ImageSource,
        engine: Option<EngineSelector>,
        token: Option<&WorkflowToken>,
    ) -> Result<Outcome, CoreError> {
        let tab = sender
            .tab
            .as_ref()
            .ok_or(CoreError::NoSenderTab("imageConfirmationSubmit"))?;
        self.close_overlay(tab, OutboundMessage::ImageConfirmationClose)
            .await;

        let Some(engine) = self.resume_engine(token, WorkflowKind::Confirmation, engine) else {
            tracing::warn!(tab = tab.id, "confirmation submitted without engine");
            return Ok(Outcome::Ignored);
        };
        self.dispatcher
            .search(SearchRequest::new(image, engine, tab.index))
            .await
    }

    pub async fn on_confirmation_cancel(
        &self,
        sender: &MessageSender,
        token: Option<&WorkflowToken>,
    ) -> Result<Outcome, CoreError> {
        let tab = sender
            .tab
            .as_ref()
            .ok_or(CoreError::NoSenderTab("imageConfirmationCancel"))?;
        if let Some(token) = token {
            self.workflows.resume(token, WorkflowKind::Confirmation);
        }
        self.close_overlay(tab, OutboundMessage::ImageConfirmationClose)
            .await;
        Ok(Outcome::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::host::recording::{Extraction, HostCall, RecordingHost};
    use crate::options::{Options, StaticOptions};
    use crate::store::EphemeralStore;

    struct Fixture {
        recorder: Arc<RecordingHost>,
        workflows: Arc<WorkflowRegistry>,
        orchestrator: Orchestrator,
    }

    fn fixture_on(options: Options, platform: Platform) -> Fixture {
        let recorder = Arc::new(RecordingHost::new());
        let host = recorder.host(Arc::new(StaticOptions::new(options)));
        let dispatcher = Arc::new(Dispatcher::new(
            host.clone(),
            Arc::new(EphemeralStore::default()),
            Arc::new(EngineTable::builtin()),
        ));
        let workflows = Arc::new(WorkflowRegistry::new());
        let orchestrator = Orchestrator::new(
            host,
            dispatcher,
            Arc::new(InjectionRegistry::new()),
            workflows.clone(),
            platform,
        );
        Fixture {
            recorder,
            workflows,
            orchestrator,
        }
    }

    fn fixture(options: Options) -> Fixture {
        fixture_on(options, Platform::Chrome)
    }

    fn two_engines() -> Options {
        Options {
            engines: vec!["bing".into(), "yandex".into()],
            ..Options::default()
        }
    }

    fn page_tab() -> Tab {
        Tab {
            id: 7,
            index: 3,
            url: Some("https://page.example/".into()),
        }
    }

    fn click(engine: &str) -> MenuClick {
        MenuClick {
            menu_item_id: engine.into(),
            ..MenuClick::default()
        }
    }

    #[tokio::test]
    async fn disallowed_scripts_fall_back_to_link_url() {
        let f = fixture(two_engines());
        f.recorder.deny_scripts(7);
        let click = MenuClick {
            src_url: Some("https://img.example/cat.jpg".into()),
            ..click("allEngines")
        };

        let outcome = f.orchestrator.on_menu_click(&click, &page_tab()).await.unwrap();
        assert!(matches!(outcome, Outcome::Dispatched(ref r) if r.tabs.len() == 2));
        assert!(f.recorder.code_runs().is_empty());
    }

    #[tokio::test]
    async fn disallowed_scripts_without_link_are_reported() {
        let f = fixture(two_engines());
        f.recorder.deny_scripts(7);
        let outcome = f
            .orchestrator
            .on_menu_click(&click("bing"), &page_tab())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reported(Notice::ScriptsNotAllowed));
        assert!(f.recorder.created_tabs().is_empty());
    }

    #[test]
    fn legacy_mismatch_conditions() {
        let mismatch = MenuClick {
            page_url: Some("https://a/".into()),
            frame_url: Some("https://b/".into()),
            ..click("bing")
        };
        assert!(is_legacy_frame_mismatch(&mismatch));

        let subframe = MenuClick {
            frame_id: Some(4),
            ..mismatch.clone()
        };
        assert!(!is_legacy_frame_mismatch(&subframe));

        let same = MenuClick {
            frame_url: Some("https://a/".into()),
            ..mismatch.clone()
        };
        assert!(!is_legacy_frame_mismatch(&same));
        assert!(!is_legacy_frame_mismatch(&click("bing")));
    }

    #[tokio::test]
    async fn legacy_mismatch_without_link_is_image_not_found() {
        let f = fixture(two_engines());
        let click = MenuClick {
            page_url: Some("https://a/".into()),
            frame_url: Some("https://b/".into()),
            ..click("bing")
        };
        let outcome = f.orchestrator.on_menu_click(&click, &page_tab()).await.unwrap();
        assert_eq!(outcome, Outcome::Reported(Notice::ImageNotFound));
        assert!(f.recorder.code_runs().is_empty());
    }

    #[tokio::test]
    async fn duplicate_candidates_dispatch_directly() {
        let f = fixture(two_engines());
        f.recorder.set_extraction(
            7,
            0,
            Extraction::Images(vec![
                json!({"data": "https://img.example/a.png"}),
                json!({"data": "https://img.example/a.png"}),
            ]),
        );

        let outcome = f
            .orchestrator
            .on_menu_click(&click("bing"), &page_tab())
            .await
            .unwrap();
        match outcome {
            Outcome::Dispatched(report) => {
                assert_eq!(report.tabs.len(), 1);
                assert_eq!(report.tabs[0].index, 4);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(f.workflows.is_empty());
    }

    #[tokio::test]
    async fn extraction_failures_are_distinct() {
        let f = fixture(two_engines());
        f.recorder.set_extraction(7, 0, Extraction::Null);
        f.recorder.set_extraction(7, 1, Extraction::Fail);
        let tab = page_tab();

        let null = f.orchestrator.on_menu_click(&click("bing"), &tab).await.unwrap();
        let fail = f
            .orchestrator
            .on_menu_click(
                &MenuClick {
                    frame_id: Some(1),
                    ..click("bing")
                },
                &tab,
            )
            .await
            .unwrap();
        let empty = f
            .orchestrator
            .on_menu_click(
                &MenuClick {
                    frame_id: Some(2),
                    ..click("bing")
                },
                &tab,
            )
            .await
            .unwrap();

        assert_eq!(null, Outcome::Reported(Notice::InternalError));
        assert_eq!(fail, Outcome::Reported(Notice::InternalError));
        assert_eq!(empty, Outcome::Reported(Notice::ImageNotFound));
    }

    #[tokio::test]
    async fn parse_module_injected_once_per_frame() {
        let f = fixture(two_engines());
        let tab = page_tab();
        f.orchestrator.on_menu_click(&click("bing"), &tab).await.unwrap();
        f.orchestrator.on_menu_click(&click("bing"), &tab).await.unwrap();

        let parse_loads = f
            .recorder
            .calls()
            .iter()
            .filter(|c| matches!(c, HostCall::ExecuteFile { path, .. } if path == Module::Parse.script()))
            .count();
        assert_eq!(parse_loads, 1);
        assert_eq!(
            f.recorder
                .code_runs()
                .iter()
                .filter(|c| c.as_str() == "frameStore.options.imgFullParse = false;")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn several_candidates_suspend_for_confirmation() {
        let f = fixture(two_engines());
        f.recorder.set_extraction(
            7,
            0,
            Extraction::Images(vec![
                json!({"data": "https://img.example/a.png"}),
                json!({"data": "https://img.example/b.png"}),
            ]),
        );
        let tab = page_tab();

        let outcome = f
            .orchestrator
            .on_menu_click(&click("yandex"), &tab)
            .await
            .unwrap();
        let token = match outcome {
            Outcome::AwaitingConfirmation(token) => token,
            other => panic!("expected confirmation, got {other:?}"),
        };
        assert!(f.recorder.created_tabs().is_empty());

        let (tab_id, frame, open) = f.recorder.sent_messages().pop().unwrap();
        assert_eq!((tab_id, frame), (7, Some(TOP_FRAME)));
        assert_eq!(open["id"], "imageConfirmationOpen");
        assert_eq!(open["engine"], "yandex");
        assert_eq!(open["token"], token.as_str());
        assert_eq!(open["images"].as_array().unwrap().len(), 2);

        // the reply carries only the token; the engine comes from the state
        let sender = MessageSender::from_frame(tab, 0);
        let resumed = f
            .orchestrator
            .on_confirmation_submit(
                &sender,
                ImageSource::from_url("https://img.example/b.png"),
                None,
                Some(&token),
            )
            .await
            .unwrap();
        match resumed {
            Outcome::Dispatched(report) => assert_eq!(report.tabs[0].engine, "yandex"),
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(f.workflows.is_empty());
        assert!(
            f.recorder
                .sent_messages()
                .iter()
                .any(|(_, _, m)| m == &json!({"id": "imageConfirmationClose"}))
        );
    }

    #[tokio::test]
    async fn confirmation_cancel_drops_workflow() {
        let f = fixture(two_engines());
        let tab = page_tab();
        let token = f.workflows.suspend(Suspended::AwaitingConfirmation {
            engine: "bing".into(),
            tab: tab.clone(),
            images: vec![],
        });
        let outcome = f
            .orchestrator
            .on_confirmation_cancel(&MessageSender::from_frame(tab, 0), Some(&token))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Closed);
        assert!(f.workflows.is_empty());
        assert!(f.recorder.created_tabs().is_empty());
    }

    #[tokio::test]
    async fn url_mode_needs_platform_support() {
        let options = Options {
            search_mode_action: SearchMode::Url,
            ..two_engines()
        };
        let chrome = fixture(options.clone());
        assert_eq!(
            chrome.orchestrator.on_action_button(&page_tab()).await.unwrap(),
            Outcome::Reported(Notice::InvalidSearchModeUrl)
        );

        let firefox = fixture_on(options, Platform::Firefox);
        let outcome = firefox.orchestrator.on_action_button(&page_tab()).await.unwrap();
        assert!(matches!(outcome, Outcome::Dispatched(_)));
        assert!(
            firefox.recorder.created_tabs()[0]
                .url
                .contains(&*urlencoding::encode("https://page.example/"))
        );
    }

    #[tokio::test]
    async fn action_without_engines_is_reported() {
        let f = fixture(Options {
            engines: vec![],
            ..Options::default()
        });
        assert_eq!(
            f.orchestrator.on_action_button(&page_tab()).await.unwrap(),
            Outcome::Reported(Notice::AllEnginesDisabled)
        );
    }

    #[tokio::test]
    async fn upload_mode_opens_browse_page() {
        let f = fixture(Options {
            search_mode_action: SearchMode::Upload,
            search_all_engines_action: AllEnginesPlacement::Main,
            ..two_engines()
        });
        let outcome = f.orchestrator.on_action_button(&page_tab()).await.unwrap();
        assert!(matches!(outcome, Outcome::UploadPageOpened(_)));
        assert_eq!(
            f.recorder.created_tabs(),
            [CreateTab {
                url: "moz-extension://imgsearch/src/browse/index.html?engine=allEngines".into(),
                index: 4,
                active: true,
                opener_tab_id: Some(7),
            }]
        );
    }

    #[tokio::test]
    async fn select_mode_rejects_file_pages_off_firefox() {
        let f = fixture(two_engines());
        let tab = Tab {
            url: Some("file:///home/me/pic.html".into()),
            ..page_tab()
        };
        assert_eq!(
            f.orchestrator.on_action_button(&tab).await.unwrap(),
            Outcome::Reported(Notice::InvalidFileUrl)
        );
    }

    #[tokio::test]
    async fn selection_round_trip() {
        let f = fixture(two_engines());
        let tab = page_tab();
        f.recorder.set_extraction(
            7,
            2,
            Extraction::Images(vec![json!({"data": "https://img.example/sel.png"})]),
        );

        let outcome = f.orchestrator.on_action_button(&tab).await.unwrap();
        let token = match outcome {
            Outcome::AwaitingSelection(token) => token,
            other => panic!("expected selection, got {other:?}"),
        };
        let arm = f
            .recorder
            .code_runs()
            .into_iter()
            .find(|c| c.starts_with("addClickListener();"))
            .unwrap();
        assert!(arm.contains(&format!("frameStore.data.token = \"{token}\";")));
        assert!(arm.contains("frameStore.data.engine = \"bing\";"));
        assert_eq!(
            f.recorder.sent_messages().last().unwrap().2,
            json!({"id": "imageSelectionOpen", "token": token.as_str()})
        );

        let sender = MessageSender::from_frame(tab, 2);
        let outcome = f
            .orchestrator
            .on_selection_submit(&sender, None, Some(&token))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Dispatched(_)));
        assert!(f.recorder.code_runs().iter().any(|c| c == SELECTION_TEARDOWN));
        assert!(
            f.recorder
                .sent_messages()
                .iter()
                .any(|(_, _, m)| m == &json!({"id": "imageSelectionClose", "messageFrame": true}))
        );
        assert!(f.workflows.is_empty());
    }

    #[tokio::test]
    async fn selection_submit_without_engine_is_ignored() {
        let f = fixture(two_engines());
        let sender = MessageSender::from_frame(page_tab(), 0);
        let stale = WorkflowToken::from("gone");
        assert_eq!(
            f.orchestrator
                .on_selection_submit(&sender, None, Some(&stale))
                .await
                .unwrap(),
            Outcome::Ignored
        );
    }

    #[tokio::test]
    async fn popup_submit_in_url_mode_searches_given_url() {
        let f = fixture(Options {
            search_mode_action: SearchMode::Url,
            ..two_engines()
        });
        let outcome = f
            .orchestrator
            .on_popup_submit("bing".into(), Some("https://img.example/p.png"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Dispatched(_)));
        // active tab of the recorder sits at index 0
        assert_eq!(f.recorder.created_tabs()[0].index, 1);
    }

    #[tokio::test]
    async fn messages_without_sender_tab_are_errors() {
        let f = fixture(two_engines());
        let result = f
            .orchestrator
            .on_confirmation_cancel(&MessageSender::default(), None)
            .await;
        assert!(matches!(result, Err(CoreError::NoSenderTab(_))));
    }
}
