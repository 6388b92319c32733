//! Single entry point for frame and UI-surface messages.

use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::{Dispatcher, SearchRequest};
use crate::engines::EngineSelector;
use crate::error::CoreError;
use crate::host::{BrowserHost, Host, MessageSender, TOP_FRAME, Tab};
use crate::injection::InjectionRegistry;
use crate::message::{DataError, ImageSource, InboundMessage, OutboundMessage, frame_id_echo};
use crate::orchestrate::Orchestrator;
use crate::store::{EphemeralStore, ReceiptOutcome, StoreKey, StoreValue, UploadSession};
use crate::workflow::Outcome;

pub struct Router {
    host: Host,
    store: Arc<EphemeralStore>,
    dispatcher: Arc<Dispatcher>,
    orchestrator: Arc<Orchestrator>,
    injections: Arc<InjectionRegistry>,
}

fn sender_tab<'a>(sender: &'a MessageSender, kind: &'static str) -> Result<&'a Tab, CoreError> {
    sender.tab.as_ref().ok_or(CoreError::NoSenderTab(kind))
}

/// Close an upload session's page and release the blobs it took over.
async fn tear_down_session(browser: &dyn BrowserHost, session: &UploadSession) {
    for object_url in session.handed_off_blobs() {
        if let Err(e) = browser.revoke_object_url(object_url).await {
            tracing::warn!(error = %e, "blob release failed");
        }
    }
    if let Err(e) = browser.remove_tab(session.tab_id()).await {
        tracing::warn!(tab = session.tab_id(), error = %e, "upload tab close failed");
    }
}

impl Router {
    pub fn new(
        host: Host,
        store: Arc<EphemeralStore>,
        dispatcher: Arc<Dispatcher>,
        orchestrator: Arc<Orchestrator>,
        injections: Arc<InjectionRegistry>,
    ) -> Self {
        Self {
            host,
            store,
            dispatcher,
            orchestrator,
            injections,
        }
    }

    /// Decode a raw JSON message and route it.
    pub async fn route_value(
        &self,
        message: Value,
        sender: &MessageSender,
    ) -> Result<Outcome, CoreError> {
        self.route(InboundMessage::decode(message)?, sender).await
    }

    pub async fn route(
        &self,
        message: InboundMessage,
        sender: &MessageSender,
    ) -> Result<Outcome, CoreError> {
        tracing::debug!(
            kind = message.kind(),
            tab = sender.tab.as_ref().map(|t| t.id),
            frame = sender.frame(),
            "inbound message"
        );

        match message {
            InboundMessage::ImageDataRequest { data_key } => {
                self.answer_data_request(&data_key, sender).await
            }
            InboundMessage::ActionPopupSubmit { engine, image_url } => {
                self.orchestrator
                    .on_popup_submit(engine, image_url.as_deref())
                    .await
            }
            InboundMessage::ImageUploadSubmit {
                engine,
                images,
                search_count,
            } => {
                let tab = sender_tab(sender, "imageUploadSubmit")?;
                self.start_upload(tab, engine, images, search_count).await
            }
            InboundMessage::ImageUploadReceipt { receipt_key } => {
                self.count_receipt(&receipt_key).await
            }
            InboundMessage::ImageSelectionSubmit { engine, token } => {
                self.orchestrator
                    .on_selection_submit(sender, engine, token.as_ref())
                    .await
            }
            InboundMessage::ImageSelectionCancel { token } => {
                self.orchestrator
                    .on_selection_cancel(sender, token.as_ref())
                    .await
            }
            InboundMessage::ImageConfirmationSubmit { img, engine, token } => {
                self.orchestrator
                    .on_confirmation_submit(sender, img, engine, token.as_ref())
                    .await
            }
            InboundMessage::ImageConfirmationCancel { token } => {
                self.orchestrator
                    .on_confirmation_cancel(sender, token.as_ref())
                    .await
            }
            InboundMessage::Notification { message_id, kind } => {
                self.host
                    .notifier
                    .show_notification(&message_id, kind.as_deref())
                    .await?;
                Ok(Outcome::Relayed)
            }
            InboundMessage::RouteMessage {
                tab_id,
                frame_id,
                data,
            } => {
                let tab_id = match tab_id {
                    Some(id) => id,
                    None => sender_tab(sender, "routeMessage")?.id,
                };
                self.host.browser.send_message(tab_id, frame_id, data).await?;
                Ok(Outcome::Relayed)
            }
            InboundMessage::FrameRegister { modules } => {
                let tab = sender_tab(sender, "frameRegister")?;
                self.injections.register(tab.id, sender.frame(), modules);
                Ok(Outcome::Registered)
            }
            InboundMessage::FrameIdQuery { query } => {
                let tab = sender_tab(sender, "frameIdQuery")?;
                self.host
                    .browser
                    .send_message(
                        tab.id,
                        Some(TOP_FRAME),
                        frame_id_echo(&query, sender.frame()),
                    )
                    .await?;
                Ok(Outcome::Replied)
            }
            InboundMessage::Unknown => {
                tracing::debug!("ignoring unknown message kind");
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn answer_data_request(
        &self,
        data_key: &StoreKey,
        sender: &MessageSender,
    ) -> Result<Outcome, CoreError> {
        let tab = sender_tab(sender, "imageDataRequest")?;
        let response = match self.store.get_image(data_key) {
            Some(payload) => OutboundMessage::ImageDataResponse {
                img_data: Some(payload),
                error: None,
            },
            None => {
                tracing::debug!(key = %data_key, "data request for expired key");
                OutboundMessage::ImageDataResponse {
                    img_data: None,
                    error: Some(DataError::SessionExpired),
                }
            }
        };
        self.host
            .browser
            .send_message(tab.id, Some(TOP_FRAME), response.to_value()?)
            .await?;
        Ok(Outcome::Replied)
    }

    /// Open a receipt session for the batch and dispatch every image in
    /// order. The session closes the upload tab when the last receipt
    /// arrives or when it times out.
    async fn start_upload(
        &self,
        tab: &Tab,
        engine: EngineSelector,
        images: Vec<ImageSource>,
        search_count: u32,
    ) -> Result<Outcome, CoreError> {
        let browser = Arc::clone(&self.host.browser);
        let session = self.store.put_with_expiry(
            StoreValue::Session(UploadSession::new(search_count, tab.id)),
            move |value| async move {
                if let StoreValue::Session(session) = value {
                    tracing::debug!(tab = session.tab_id(), "upload session timed out");
                    tear_down_session(browser.as_ref(), &session).await;
                }
            },
        );
        tracing::info!(
            session = %session,
            tab = tab.id,
            images = images.len(),
            search_count,
            "upload batch started"
        );

        let mut reports = Vec::with_capacity(images.len());
        for image in images {
            let request = SearchRequest::new(image, engine.clone(), tab.index)
                .with_receipt(session.clone());
            match self.dispatcher.search(request).await? {
                Outcome::Dispatched(report) => reports.push(report),
                // a notice ends the batch; the session expires on its own
                other => return Ok(other),
            }
        }
        Ok(Outcome::UploadDispatched { session, reports })
    }

    async fn count_receipt(&self, receipt_key: &StoreKey) -> Result<Outcome, CoreError> {
        match self.store.record_receipt(receipt_key) {
            ReceiptOutcome::Pending { receipts, total } => {
                tracing::debug!(session = %receipt_key, receipts, total, "receipt counted");
                Ok(Outcome::ReceiptCounted { receipts, total })
            }
            ReceiptOutcome::Complete(session) => {
                tracing::info!(session = %receipt_key, tab = session.tab_id(), "upload complete");
                tear_down_session(self.host.browser.as_ref(), &session).await;
                Ok(Outcome::SessionClosed {
                    tab_id: session.tab_id(),
                })
            }
            ReceiptOutcome::Unknown => {
                tracing::debug!(session = %receipt_key, "receipt for unknown session");
                Ok(Outcome::Ignored)
            }
        }
    }
}
