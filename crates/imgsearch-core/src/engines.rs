//! Static search-engine table and MIME helpers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoreKey;

/// Menu/message id that expands to every enabled engine.
pub const ALL_ENGINES: &str = "allEngines";

/// Stylesheet shared by engine scripts that draw an upload overlay.
pub const ENGINE_STYLESHEET: &str = "/src/content/engines/style.css";

/// Helper script loaded before an engine script.
pub const COMMON_SCRIPT: &str = "/src/content/common.js";

const IMG_URL_PLACEHOLDER: &str = "{imgUrl}";
const DATA_KEY_PLACEHOLDER: &str = "{dataKey}";

/// Which engines a search goes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineSelector {
    All,
    Engine(String),
}

impl From<String> for EngineSelector {
    fn from(id: String) -> Self {
        if id == ALL_ENGINES {
            EngineSelector::All
        } else {
            EngineSelector::Engine(id)
        }
    }
}

impl From<&str> for EngineSelector {
    fn from(id: &str) -> Self {
        EngineSelector::from(id.to_string())
    }
}

impl From<EngineSelector> for String {
    fn from(selector: EngineSelector) -> Self {
        match selector {
            EngineSelector::All => ALL_ENGINES.to_string(),
            EngineSelector::Engine(id) => id,
        }
    }
}

impl fmt::Display for EngineSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineSelector::All => f.write_str(ALL_ENGINES),
            EngineSelector::Engine(id) => f.write_str(id),
        }
    }
}

/// Content-script hand-off an engine needs when it receives a local blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineFeatures {
    pub needs_css: bool,
    pub needs_common_script: bool,
    pub needs_engine_script: bool,
    /// The upload template carries `{dataKey}` and the target page fetches
    /// the payload itself.
    pub takes_data_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub id: String,
    /// Search endpoint; `{imgUrl}` is replaced with the percent-encoded URL.
    pub search_url: String,
    /// Upload endpoint for blobs. A leading `/` marks an extension page.
    pub upload_url: Option<String>,
    /// Appended to search URLs unless the "use local variant" option is set.
    pub region_suffix: Option<String>,
    pub features: EngineFeatures,
}

impl EngineConfig {
    /// Destination for a remote image.
    pub fn search_url_for(&self, image_url: &str, use_local_variant: bool) -> String {
        let mut url = self
            .search_url
            .replace(IMG_URL_PLACEHOLDER, &urlencoding::encode(image_url));
        if !use_local_variant && let Some(ref suffix) = self.region_suffix {
            url.push_str(suffix);
        }
        url
    }

    /// Destination for a stored blob. Only engines that take the data key
    /// get it substituted; the rest receive the payload via content script.
    pub fn upload_url_for(&self, data_key: &StoreKey) -> Option<String> {
        let template = self.upload_url.as_ref()?;
        if self.features.takes_data_key {
            Some(template.replace(DATA_KEY_PLACEHOLDER, data_key.as_str()))
        } else {
            Some(template.clone())
        }
    }

    pub fn engine_script(&self) -> String {
        format!("/src/content/engines/{}.js", self.id)
    }

    /// Whether any content script must follow the tab open.
    pub fn needs_handoff(&self) -> bool {
        self.features.needs_css
            || self.features.needs_common_script
            || self.features.needs_engine_script
    }
}

/// Immutable engine table, in default display order.
#[derive(Debug, Clone)]
pub struct EngineTable {
    engines: Vec<EngineConfig>,
}

impl Default for EngineTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EngineTable {
    pub fn new(engines: Vec<EngineConfig>) -> Self {
        Self { engines }
    }

    pub fn builtin() -> Self {
        let scripted = EngineFeatures {
            needs_css: false,
            needs_common_script: true,
            needs_engine_script: true,
            takes_data_key: false,
        };
        let keyed = EngineFeatures {
            takes_data_key: true,
            ..EngineFeatures::default()
        };
        Self::new(vec![
            EngineConfig {
                id: "google".into(),
                search_url: "https://www.google.com/searchbyimage?site=search&sa=X&image_url={imgUrl}"
                    .into(),
                upload_url: Some("/src/upload/index.html?engine=google&dataKey={dataKey}".into()),
                region_suffix: Some("&gws_rd=cr".into()),
                features: keyed,
            },
            EngineConfig {
                id: "bing".into(),
                search_url:
                    "https://www.bing.com/images/search?q=imgurl:{imgUrl}&view=detailv2&iss=sbi"
                        .into(),
                upload_url: Some("https://www.bing.com/images/explore?FORM=ILPSTR".into()),
                region_suffix: None,
                features: EngineFeatures {
                    needs_css: true,
                    ..scripted
                },
            },
            EngineConfig {
                id: "yandex".into(),
                search_url: "https://yandex.com/images/search?url={imgUrl}&rpt=imageview".into(),
                upload_url: Some("https://yandex.com/images/".into()),
                region_suffix: None,
                features: scripted,
            },
            EngineConfig {
                id: "baidu".into(),
                search_url: "https://image.baidu.com/n/pc_search?queryImageUrl={imgUrl}".into(),
                upload_url: Some("https://image.baidu.com/".into()),
                region_suffix: None,
                features: scripted,
            },
            EngineConfig {
                id: "tineye".into(),
                search_url: "https://www.tineye.com/search/?&url={imgUrl}".into(),
                upload_url: Some("/src/upload/index.html?engine=tineye&dataKey={dataKey}".into()),
                region_suffix: None,
                features: keyed,
            },
            EngineConfig {
                id: "sogou".into(),
                search_url: "https://pic.sogou.com/ris?query={imgUrl}&flag=1".into(),
                upload_url: Some("https://pic.sogou.com/".into()),
                region_suffix: None,
                features: scripted,
            },
        ])
    }

    pub fn get(&self, id: &str) -> Option<&EngineConfig> {
        self.engines.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(|e| e.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// MIME type of a `data:` URI, e.g. `image/png` for `data:image/png;base64,...`.
pub fn data_uri_mime_type(data: &str) -> Option<&str> {
    let rest = data.strip_prefix("data:")?;
    let end = rest.find([';', ',']).unwrap_or(rest.len());
    let mime = &rest[..end];
    if mime.is_empty() { None } else { Some(mime) }
}

/// File extension for an image MIME type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.to_ascii_lowercase().as_str() {
        "image/bmp" => Some("bmp"),
        "image/gif" => Some("gif"),
        "image/vnd.microsoft.icon" | "image/x-icon" => Some("ico"),
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/svg+xml" => Some("svg"),
        "image/tiff" => Some("tif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
