//! Search dispatcher: one image, one or more engine tabs.

use std::sync::{Arc, Weak};

use serde::Serialize;

use crate::engines::{
    COMMON_SCRIPT, ENGINE_STYLESHEET, EngineConfig, EngineSelector, EngineTable,
    data_uri_mime_type, extension_for_mime,
};
use crate::error::{CoreError, Notice};
use crate::host::{BrowserHost, CreateTab, Host, RunAt, ScriptTarget, TabId};
use crate::message::ImageSource;
use crate::options::Options;
use crate::store::{EphemeralStore, ImagePayload, StoreKey, StoreValue};
use crate::workflow::Outcome;

/// The unit of work the dispatcher consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub image: ImageSource,
    pub engine: EngineSelector,
    /// Index of the tab the search was started from. Engine tabs open right
    /// after it.
    pub source_tab_index: u32,
    /// Upload session this image belongs to, if any.
    pub receipt_key: Option<StoreKey>,
}

impl SearchRequest {
    pub fn new(image: ImageSource, engine: EngineSelector, source_tab_index: u32) -> Self {
        Self {
            image,
            engine,
            source_tab_index,
            receipt_key: None,
        }
    }

    pub fn with_receipt(mut self, receipt_key: StoreKey) -> Self {
        self.receipt_key = Some(receipt_key);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedTab {
    pub engine: String,
    pub tab_id: TabId,
    pub index: u32,
    pub active: bool,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Store key of the payload, for blob searches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_key: Option<StoreKey>,
    pub tabs: Vec<OpenedTab>,
}

/// Random alphanumeric stem of 5 to 20 characters, plus the extension of the
/// data URI's MIME type when one is known.
pub fn random_filename(data: &str) -> String {
    let len = fastrand::usize(5..=20);
    let stem: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(len)
        .collect();
    match data_uri_mime_type(data).and_then(extension_for_mime) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

pub struct Dispatcher {
    host: Host,
    store: Arc<EphemeralStore>,
    engines: Arc<EngineTable>,
}

impl Dispatcher {
    pub fn new(host: Host, store: Arc<EphemeralStore>, engines: Arc<EngineTable>) -> Self {
        Self {
            host,
            store,
            engines,
        }
    }

    pub fn engines(&self) -> &EngineTable {
        &self.engines
    }

    /// Open one tab per resolved engine, in order, after the source tab.
    ///
    /// Engine resolution runs before anything is stored or opened, so a
    /// reported notice leaves no side effects behind.
    pub async fn search(&self, request: SearchRequest) -> Result<Outcome, CoreError> {
        let options = self.host.options.load().await?;

        let targets = match self.resolve(&request.engine, &options) {
            Ok(targets) => targets,
            Err(notice) => {
                self.host.notify(notice).await;
                return Ok(Outcome::Reported(notice));
            }
        };

        let data_key = if request.image.is_blob() {
            Some(self.store_blob(&request).await?)
        } else {
            None
        };

        let mut index = request.source_tab_index + 1;
        let mut active = !options.tab_in_background;
        let mut tabs = Vec::with_capacity(targets.len());

        for engine in targets {
            let Some(url) = self.destination(engine, &request.image, data_key.as_ref(), &options)
            else {
                tracing::warn!(engine = %engine.id, "engine has no upload endpoint, skipping");
                continue;
            };

            let tab = self
                .host
                .browser
                .create_tab(CreateTab {
                    url: url.clone(),
                    index,
                    active,
                    opener_tab_id: None,
                })
                .await?;
            tracing::info!(engine = %engine.id, tab = tab.id, index, active, "engine tab opened");

            if let Some(key) = &data_key {
                self.hand_off(engine, tab.id, key).await;
            }

            tabs.push(OpenedTab {
                engine: engine.id.clone(),
                tab_id: tab.id,
                index,
                active,
                url,
            });
            index += 1;
            active = false;
        }

        Ok(Outcome::Dispatched(DispatchReport { data_key, tabs }))
    }

    fn resolve<'a>(
        &'a self,
        selector: &EngineSelector,
        options: &Options,
    ) -> Result<Vec<&'a EngineConfig>, Notice> {
        match selector {
            EngineSelector::All => {
                let enabled: Vec<_> = options
                    .enabled_engines(&self.engines)
                    .iter()
                    .filter_map(|id| self.engines.get(id))
                    .collect();
                if enabled.is_empty() {
                    Err(Notice::AllEnginesDisabled)
                } else {
                    Ok(enabled)
                }
            }
            EngineSelector::Engine(id) => match self.engines.get(id) {
                Some(engine) => Ok(vec![engine]),
                None => {
                    tracing::warn!(engine = %id, "unknown engine requested");
                    Err(Notice::InternalError)
                }
            },
        }
    }

    /// Register a blob payload. The expiry hook releases the blob, or passes
    /// it to the payload's upload session while that session is alive.
    async fn store_blob(&self, request: &SearchRequest) -> Result<StoreKey, CoreError> {
        let image = &request.image;
        let filename = match image.filename() {
            Some(name) => name.to_string(),
            None => random_filename(&image.data),
        };
        let object_url = match &image.object_url {
            Some(url) => url.clone(),
            None => self.host.browser.create_object_url(&image.data).await?,
        };

        let payload = ImagePayload::blob(object_url, filename, request.receipt_key.clone());
        let browser = Arc::clone(&self.host.browser);
        let store = Arc::downgrade(&self.store);
        let key = self
            .store
            .put_with_expiry(StoreValue::Image(payload), move |value| {
                release_payload(browser, store, value)
            });
        tracing::debug!(key = %key, "blob payload stored");
        Ok(key)
    }

    fn destination(
        &self,
        engine: &EngineConfig,
        image: &ImageSource,
        data_key: Option<&StoreKey>,
        options: &Options,
    ) -> Option<String> {
        match data_key {
            Some(key) => {
                let url = engine.upload_url_for(key)?;
                if url.starts_with('/') {
                    Some(self.host.browser.extension_url(&url))
                } else {
                    Some(url)
                }
            }
            None => Some(engine.search_url_for(&image.data, options.local_google)),
        }
    }

    /// Inject the engine's content scripts into a freshly opened tab. Each
    /// step is best-effort.
    async fn hand_off(&self, engine: &EngineConfig, tab_id: TabId, key: &StoreKey) {
        if !engine.needs_handoff() {
            return;
        }
        let browser = &self.host.browser;
        let target = ScriptTarget::top(tab_id);

        if engine.features.needs_css {
            log_failure(
                "stylesheet",
                tab_id,
                browser
                    .insert_css(target, ENGINE_STYLESHEET, RunAt::DocumentStart)
                    .await,
            );
        }
        if engine.features.needs_common_script {
            log_failure(
                "common script",
                tab_id,
                browser
                    .execute_file(target, COMMON_SCRIPT, RunAt::DocumentIdle)
                    .await,
            );
        }
        if engine.features.needs_engine_script {
            let code = format!("var dataKey = '{key}';");
            log_failure(
                "data key",
                tab_id,
                browser.execute_code(target, &code).await.map(drop),
            );
            let script = engine.engine_script();
            log_failure(
                "engine script",
                tab_id,
                browser
                    .execute_file(target, &script, RunAt::DocumentIdle)
                    .await,
            );
        }
        tracing::debug!(engine = %engine.id, tab = tab_id, "content scripts handed off");
    }
}

fn log_failure(step: &str, tab_id: TabId, result: Result<(), CoreError>) {
    if let Err(e) = result {
        tracing::warn!(tab = tab_id, step, error = %e, "hand-off step failed");
    }
}

async fn release_payload(
    browser: Arc<dyn BrowserHost>,
    store: Weak<EphemeralStore>,
    value: StoreValue,
) {
    let StoreValue::Image(payload) = value else {
        return;
    };
    let Some(object_url) = payload.object_url() else {
        return;
    };

    if let Some(session) = payload.receipt_key()
        && let Some(store) = store.upgrade()
        && store.hand_off_blob(session, object_url)
    {
        tracing::debug!(session = %session, "blob handed to upload session");
        return;
    }

    if let Err(e) = browser.revoke_object_url(object_url).await {
        tracing::warn!(error = %e, "blob release failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::host::recording::{HostCall, RecordingHost};
    use crate::options::StaticOptions;
    use crate::store::UploadSession;

    struct Fixture {
        recorder: Arc<RecordingHost>,
        store: Arc<EphemeralStore>,
        dispatcher: Dispatcher,
    }

    fn fixture(options: Options) -> Fixture {
        let recorder = Arc::new(RecordingHost::new());
        let host = recorder.host(Arc::new(StaticOptions::new(options)));
        let store = Arc::new(EphemeralStore::default());
        let dispatcher = Dispatcher::new(host, store.clone(), Arc::new(EngineTable::builtin()));
        Fixture {
            recorder,
            store,
            dispatcher,
        }
    }

    fn three_engines() -> Options {
        Options {
            engines: vec!["tineye".into(), "google".into(), "yandex".into()],
            ..Options::default()
        }
    }

    fn report(outcome: Outcome) -> DispatchReport {
        match outcome {
            Outcome::Dispatched(report) => report,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_engines_open_in_order_after_source() {
        let f = fixture(three_engines());
        let request = SearchRequest::new(
            ImageSource::from_url("https://img.example/a.jpg"),
            EngineSelector::All,
            4,
        );

        let report = report(f.dispatcher.search(request).await.unwrap());
        assert!(report.data_key.is_none());

        let tabs = f.recorder.created_tabs();
        let placed: Vec<_> = tabs.iter().map(|t| (t.index, t.active)).collect();
        assert_eq!(placed, [(5, true), (6, false), (7, false)]);
        let engines: Vec<_> = report.tabs.iter().map(|t| t.engine.as_str()).collect();
        assert_eq!(engines, ["tineye", "google", "yandex"]);
        assert!(tabs[0].url.starts_with("https://www.tineye.com/"));
    }

    #[tokio::test]
    async fn background_option_focuses_nothing() {
        let f = fixture(Options {
            tab_in_background: true,
            ..three_engines()
        });
        let request = SearchRequest::new(
            ImageSource::from_url("https://img.example/a.jpg"),
            EngineSelector::All,
            0,
        );
        f.dispatcher.search(request).await.unwrap();
        assert!(f.recorder.created_tabs().iter().all(|t| !t.active));
    }

    #[tokio::test]
    async fn no_enabled_engines_is_reported_before_side_effects() {
        let f = fixture(Options {
            disabled_engines: EngineTable::builtin().ids().map(String::from).collect(),
            ..Options::default()
        });
        let request = SearchRequest::new(
            ImageSource::from_url("data:image/png;base64,iVBO"),
            EngineSelector::All,
            0,
        );

        let outcome = f.dispatcher.search(request).await.unwrap();
        assert_eq!(outcome, Outcome::Reported(Notice::AllEnginesDisabled));
        assert_eq!(f.recorder.notices(), ["error_allEnginesDisabled"]);
        assert!(f.recorder.created_tabs().is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn unknown_engine_is_internal_error() {
        let f = fixture(Options::default());
        let request =
            SearchRequest::new(ImageSource::from_url("https://x/y.png"), "altavista".into(), 0);
        let outcome = f.dispatcher.search(request).await.unwrap();
        assert_eq!(outcome, Outcome::Reported(Notice::InternalError));
        assert!(f.recorder.created_tabs().is_empty());
    }

    #[tokio::test]
    async fn png_blob_gets_png_filename() {
        let f = fixture(Options::default());
        let request = SearchRequest::new(
            ImageSource::from_url("data:image/png;base64,iVBO"),
            "google".into(),
            0,
        );

        let report = report(f.dispatcher.search(request).await.unwrap());
        let key = report.data_key.unwrap();
        let payload = f.store.get_image(&key).unwrap();
        assert!(payload.is_blob());
        assert_eq!(payload.object_url(), Some("blob:imgsearch/1"));

        let name = payload.filename().unwrap();
        let stem = name.strip_suffix(".png").unwrap();
        assert!((5..=20).contains(&stem.len()));
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn unmapped_mime_has_no_extension() {
        for _ in 0..20 {
            let name = random_filename("data:image/avif;base64,AAAA");
            assert!(!name.contains('.'));
            assert!((5..=20).contains(&name.len()));
        }
    }

    #[tokio::test]
    async fn keyed_engine_gets_extension_upload_page() {
        let f = fixture(Options::default());
        let request = SearchRequest::new(
            ImageSource::from_url("data:image/jpeg;base64,/9j/"),
            "tineye".into(),
            0,
        );

        let report = report(f.dispatcher.search(request).await.unwrap());
        let key = report.data_key.unwrap();
        assert_eq!(
            report.tabs[0].url,
            format!("moz-extension://imgsearch/src/upload/index.html?engine=tineye&dataKey={key}")
        );
        // the upload page fetches the payload itself
        assert!(
            !f.recorder
                .calls()
                .iter()
                .any(|c| matches!(c, HostCall::ExecuteFile { .. }))
        );
    }

    #[tokio::test]
    async fn scripted_engine_hand_off_order() {
        let f = fixture(Options::default());
        let request = SearchRequest::new(
            ImageSource {
                object_url: Some("blob:page/7".into()),
                ..ImageSource::default()
            },
            "bing".into(),
            2,
        );

        let report = report(f.dispatcher.search(request).await.unwrap());
        let key = report.data_key.unwrap();
        let tab_id = report.tabs[0].tab_id;
        let target = ScriptTarget::top(tab_id);

        let calls = f.recorder.calls();
        // existing blob reference is reused
        assert!(
            !calls
                .iter()
                .any(|c| matches!(c, HostCall::CreateObjectUrl { .. }))
        );
        assert_eq!(
            &calls[1..],
            [
                HostCall::InsertCss {
                    target,
                    path: ENGINE_STYLESHEET.into(),
                    run_at: RunAt::DocumentStart,
                },
                HostCall::ExecuteFile {
                    target,
                    path: COMMON_SCRIPT.into(),
                    run_at: RunAt::DocumentIdle,
                },
                HostCall::ExecuteCode {
                    target,
                    code: format!("var dataKey = '{key}';"),
                },
                HostCall::ExecuteFile {
                    target,
                    path: "/src/content/engines/bing.js".into(),
                    run_at: RunAt::DocumentIdle,
                },
            ]
        );
    }

    #[tokio::test]
    async fn remote_google_gets_region_suffix_unless_local() {
        let f = fixture(Options::default());
        let request =
            SearchRequest::new(ImageSource::from_url("https://x/y.png"), "google".into(), 0);
        let remote = report(f.dispatcher.search(request.clone()).await.unwrap());
        assert!(remote.tabs[0].url.ends_with("&gws_rd=cr"));

        let f = fixture(Options {
            local_google: true,
            ..Options::default()
        });
        let local = report(f.dispatcher.search(request).await.unwrap());
        assert!(!local.tabs[0].url.contains("gws_rd"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_payload_releases_its_blob() {
        let f = fixture(Options::default());
        let request = SearchRequest::new(
            ImageSource::from_url("data:image/gif;base64,R0lG"),
            "google".into(),
            0,
        );
        f.dispatcher.search(request).await.unwrap();

        tokio::time::sleep(f.store.ttl() + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(f.store.is_empty());
        assert_eq!(f.recorder.revoked_urls(), ["blob:imgsearch/1"]);
    }

    #[tokio::test]
    async fn batch_payload_hands_blob_to_live_session() {
        let f = fixture(Options::default());
        let session_key = f.store.put(StoreValue::Session(UploadSession::new(2, 9)));
        let payload = ImagePayload::blob("blob:imgsearch/3", "a.gif", Some(session_key.clone()));
        let browser: Arc<dyn BrowserHost> = f.recorder.clone();

        release_payload(
            browser.clone(),
            Arc::downgrade(&f.store),
            StoreValue::Image(payload.clone()),
        )
        .await;

        assert!(f.recorder.revoked_urls().is_empty());
        match f.store.take(&session_key) {
            Some(StoreValue::Session(session)) => {
                assert_eq!(session.handed_off_blobs(), ["blob:imgsearch/3".to_string()]);
            }
            other => panic!("session missing: {other:?}"),
        }

        // session gone: the payload releases its own blob
        release_payload(browser, Arc::downgrade(&f.store), StoreValue::Image(payload)).await;
        assert_eq!(f.recorder.revoked_urls(), ["blob:imgsearch/3"]);
    }
}
