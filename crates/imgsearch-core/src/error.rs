use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("host error: {0}")]
    Host(String),
    #[error("options error: {0}")]
    Options(String),
    #[error("malformed message: {0}")]
    Message(#[from] serde_json::Error),
    #[error("message `{0}` requires a sender tab")]
    NoSenderTab(&'static str),
}

/// A user-visible failure. Each variant maps to a localization key that the
/// [`Notifier`](crate::host::Notifier) resolves into text.
///
/// Reporting a notice ends the triggering workflow; nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    /// No engine is enabled (or the requested engine is unknown).
    AllEnginesDisabled,
    /// The page forbids script execution and no link URL was available.
    ScriptsNotAllowed,
    /// Extraction found nothing to search.
    ImageNotFound,
    /// The extraction round trip itself broke.
    InternalError,
    /// `url` search mode is not available on this platform.
    InvalidSearchModeUrl,
    /// `select` mode on a `file:` page where the platform cannot inject.
    InvalidFileUrl,
}

impl Notice {
    pub fn message_key(self) -> &'static str {
        match self {
            Notice::AllEnginesDisabled => "error_allEnginesDisabled",
            Notice::ScriptsNotAllowed => "error_scriptsNotAllowed",
            Notice::ImageNotFound => "error_imageNotFound",
            Notice::InternalError => "error_InternalError",
            Notice::InvalidSearchModeUrl => "error_invalidSearchMode_url",
            Notice::InvalidFileUrl => "error_invalidImageUrl_fileUrl",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message_key())
    }
}

impl Serialize for Notice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_keys_match_locale_names() {
        assert_eq!(Notice::InternalError.message_key(), "error_InternalError");
        assert_eq!(
            Notice::InvalidFileUrl.to_string(),
            "error_invalidImageUrl_fileUrl"
        );
    }

    #[test]
    fn core_error_display() {
        let err = CoreError::NoSenderTab("imageDataRequest");
        assert_eq!(
            err.to_string(),
            "message `imageDataRequest` requires a sender tab"
        );
    }
}
