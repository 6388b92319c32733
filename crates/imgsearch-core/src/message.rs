//! Frame ↔ background message protocol.
//!
//! Both directions are closed enums tagged by the `id` field. Inbound kinds
//! that this build does not know decode to [`InboundMessage::Unknown`] and are
//! ignored by the router.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engines::EngineSelector;
use crate::error::CoreError;
use crate::host::{FrameId, TabId};
use crate::injection::InjectionRecord;
use crate::store::{ImagePayload, StoreKey};
use crate::workflow::WorkflowToken;

/// An image as extracted by the page or submitted by the upload page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    /// Remote URL or `data:` URI.
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ImageInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ImageSource {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            data: url.into(),
            ..Self::default()
        }
    }

    /// Local data: an existing blob reference or an inline `data:` URI.
    pub fn is_blob(&self) -> bool {
        self.object_url.is_some() || self.data.starts_with("data:")
    }

    /// Caller-supplied filename, ignoring empty strings.
    pub fn filename(&self) -> Option<&str> {
        self.info
            .as_ref()
            .and_then(|i| i.filename.as_deref())
            .filter(|f| !f.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    /// An engine content script asks for its payload.
    ImageDataRequest { data_key: StoreKey },
    /// The toolbar popup picked an engine (and, in `url` mode, a URL).
    ActionPopupSubmit {
        engine: EngineSelector,
        #[serde(default)]
        image_url: Option<String>,
    },
    /// The upload page submits a batch.
    ImageUploadSubmit {
        engine: EngineSelector,
        images: Vec<ImageSource>,
        search_count: u32,
    },
    /// An engine tab confirms it consumed one upload.
    ImageUploadReceipt { receipt_key: StoreKey },
    ImageSelectionSubmit {
        #[serde(default)]
        engine: Option<EngineSelector>,
        #[serde(default)]
        token: Option<WorkflowToken>,
    },
    ImageSelectionCancel {
        #[serde(default)]
        token: Option<WorkflowToken>,
    },
    ImageConfirmationSubmit {
        img: ImageSource,
        #[serde(default)]
        engine: Option<EngineSelector>,
        #[serde(default)]
        token: Option<WorkflowToken>,
    },
    ImageConfirmationCancel {
        #[serde(default)]
        token: Option<WorkflowToken>,
    },
    Notification {
        message_id: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
    /// Forward `data` unchanged; defaults to the sender tab.
    RouteMessage {
        #[serde(default)]
        tab_id: Option<TabId>,
        #[serde(default)]
        frame_id: Option<FrameId>,
        data: Value,
    },
    /// A page runtime starting up reports what it already has.
    FrameRegister {
        #[serde(default)]
        modules: InjectionRecord,
    },
    /// Any `...FrameId` kind: the asker wants its frame id echoed to the top
    /// frame under the same id.
    #[serde(skip_deserializing)]
    FrameIdQuery { query: String },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn decode(value: Value) -> Result<Self, CoreError> {
        if let Some(id) = value.get("id").and_then(Value::as_str)
            && id.ends_with("FrameId")
        {
            return Ok(InboundMessage::FrameIdQuery {
                query: id.to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The wire id, for logging.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::ImageDataRequest { .. } => "imageDataRequest",
            InboundMessage::ActionPopupSubmit { .. } => "actionPopupSubmit",
            InboundMessage::ImageUploadSubmit { .. } => "imageUploadSubmit",
            InboundMessage::ImageUploadReceipt { .. } => "imageUploadReceipt",
            InboundMessage::ImageSelectionSubmit { .. } => "imageSelectionSubmit",
            InboundMessage::ImageSelectionCancel { .. } => "imageSelectionCancel",
            InboundMessage::ImageConfirmationSubmit { .. } => "imageConfirmationSubmit",
            InboundMessage::ImageConfirmationCancel { .. } => "imageConfirmationCancel",
            InboundMessage::Notification { .. } => "notification",
            InboundMessage::RouteMessage { .. } => "routeMessage",
            InboundMessage::FrameRegister { .. } => "frameRegister",
            InboundMessage::FrameIdQuery { query } => query,
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// Why a data lookup came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataError {
    #[serde(rename = "sessionExpired")]
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "id", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    ImageDataResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        img_data: Option<ImagePayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<DataError>,
    },
    ImageConfirmationOpen {
        images: Vec<ImageSource>,
        engine: EngineSelector,
        token: WorkflowToken,
    },
    ImageConfirmationClose,
    ImageSelectionOpen { token: WorkflowToken },
    ImageSelectionClose {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_frame: Option<bool>,
    },
}

impl OutboundMessage {
    pub fn to_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Reply to a `...FrameId` query.
pub fn frame_id_echo(id: &str, frame_id: FrameId) -> Value {
    json!({ "id": id, "frameId": frame_id })
}
