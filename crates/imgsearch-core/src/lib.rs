//! Background orchestration core of a reverse-image-search browser extension.
//!
//! A search starts from a context-menu click, the toolbar action, the upload
//! page or an in-page selection, and ends with one engine tab per selected
//! search engine. This crate holds everything between those two points:
//!
//! - [`store`]: short-lived payloads and upload sessions with a TTL
//! - [`injection`]: which content-script modules each frame already has
//! - [`dispatch`]: engine resolution, destination URLs and tab opening
//! - [`orchestrate`]: menu/action/selection/confirmation workflows
//! - [`router`]: the inbound message entry point
//! - [`ui_sync`]: context menu and toolbar action rebuilt from the options
//! - [`background`]: wiring plus the event loop
//!
//! All browser access goes through the traits in [`host`].

pub mod background;
pub mod dispatch;
pub mod engines;
pub mod error;
pub mod host;
pub mod injection;
pub mod message;
pub mod options;
pub mod options_file;
pub mod orchestrate;
pub mod router;
pub mod store;
pub mod ui_sync;
pub mod workflow;

// Re-export for convenience
pub use background::{Background, BackgroundEvent, RuntimeConfig};
pub use dispatch::{DispatchReport, Dispatcher, OpenedTab, SearchRequest};
pub use engines::{ALL_ENGINES, EngineConfig, EngineSelector, EngineTable};
pub use error::{CoreError, Notice};
pub use host::{BrowserHost, Host, MessageSender, Notifier, Tab, TabId, UiSurface};
pub use message::{ImageSource, InboundMessage, OutboundMessage};
pub use options::{Options, OptionsSource, Platform, SearchMode, StaticOptions};
pub use options_file::FileOptions;
pub use store::{DEFAULT_TTL, EphemeralStore, StoreKey};
pub use ui_sync::{UiPlan, UiSynchronizer};
pub use workflow::{Outcome, WorkflowToken};
