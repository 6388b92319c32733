//! In-memory store for short-lived image payloads and upload sessions.
//!
//! Every entry gets a fresh random key and a one-shot expiry timer. An entry
//! leaves the store exactly once: either through [`EphemeralStore::delete`] /
//! [`EphemeralStore::take`], through a completed receipt count, or through its
//! timer. Whichever path actually removes the entry is the one that runs the
//! owner's cleanup; every other path sees `false`/`None` and does nothing.
//!
//! Timers are tokio tasks raced against a [`CancellationToken`] owned by the
//! store, so [`EphemeralStore::shutdown`] silences all of them at once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::host::TabId;

/// Default lifetime of a stored entry: 2 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Opaque 128-bit random key, rendered in the 8-4-4-4-12 hex layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn generate() -> Self {
        let hex = format!("{:032x}", fastrand::u128(..));
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoreKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image data handed to an engine tab.
///
/// Exactly one of `url` (remote image) and `object_url` (local blob) is set,
/// matching `is_blob`. The constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    is_blob: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receipt_key: Option<StoreKey>,
}

impl ImagePayload {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            is_blob: false,
            url: Some(url.into()),
            object_url: None,
            filename: None,
            receipt_key: None,
        }
    }

    pub fn blob(
        object_url: impl Into<String>,
        filename: impl Into<String>,
        receipt_key: Option<StoreKey>,
    ) -> Self {
        Self {
            is_blob: true,
            url: None,
            object_url: Some(object_url.into()),
            filename: Some(filename.into()),
            receipt_key,
        }
    }

    pub fn is_blob(&self) -> bool {
        self.is_blob
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn object_url(&self) -> Option<&str> {
        self.object_url.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn receipt_key(&self) -> Option<&StoreKey> {
        self.receipt_key.as_ref()
    }
}

/// Receipt counter for a batch upload opened from an upload page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    total: u32,
    receipts: u32,
    tab_id: TabId,
    /// Blobs whose payload entry expired while this session was still alive.
    /// Released when the session itself is torn down.
    handed_off: Vec<String>,
}

impl UploadSession {
    pub fn new(total: u32, tab_id: TabId) -> Self {
        Self {
            total,
            receipts: 0,
            tab_id,
            handed_off: Vec::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn receipts(&self) -> u32 {
        self.receipts
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn handed_off_blobs(&self) -> &[String] {
        &self.handed_off
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Image(ImagePayload),
    Session(UploadSession),
}

/// Result of [`EphemeralStore::record_receipt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Counted; the session is still waiting for more.
    Pending { receipts: u32, total: u32 },
    /// The last receipt arrived. The session has been removed and is handed
    /// back so the caller can run its teardown.
    Complete(UploadSession),
    /// No live session under this key (expired, completed, or never existed).
    Unknown,
}

/// Keyed store with per-entry TTL. See the module docs for the cleanup rule.
pub struct EphemeralStore {
    entries: Arc<DashMap<StoreKey, StoreValue>>,
    ttl: Duration,
    shutdown: CancellationToken,
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl fmt::Debug for EphemeralStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralStore")
            .field("len", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl EphemeralStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value` under a fresh key. It expires after the TTL with no
    /// further cleanup. Must be called from within a tokio runtime.
    pub fn put(&self, value: StoreValue) -> StoreKey {
        self.put_with_expiry(value, |_| std::future::ready(()))
    }

    /// Store `value` and run `on_expire` with it if, and only if, the timer is
    /// the path that removes the entry.
    pub fn put_with_expiry<H, F>(&self, value: StoreValue, on_expire: H) -> StoreKey
    where
        H: FnOnce(StoreValue) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = self.insert_fresh(value);

        let entries = Arc::clone(&self.entries);
        let shutdown = self.shutdown.clone();
        let ttl = self.ttl;
        let timer_key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    if let Some((_, value)) = entries.remove(&timer_key) {
                        tracing::debug!(key = %timer_key, "store entry expired");
                        on_expire(value).await;
                    }
                }
            }
        });

        key
    }

    fn insert_fresh(&self, value: StoreValue) -> StoreKey {
        loop {
            let key = StoreKey::generate();
            if !self.entries.contains_key(&key) {
                tracing::trace!(key = %key, "store insert");
                self.entries.insert(key.clone(), value);
                return key;
            }
        }
    }

    /// A copy of the stored value. Callers can never mutate stored state.
    pub fn get(&self, key: &StoreKey) -> Option<StoreValue> {
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        tracing::trace!(key = %key, hit = value.is_some(), "store lookup");
        value
    }

    /// The stored image payload, if the key holds one.
    pub fn get_image(&self, key: &StoreKey) -> Option<ImagePayload> {
        match self.get(key)? {
            StoreValue::Image(payload) => Some(payload),
            StoreValue::Session(_) => None,
        }
    }

    /// Remove an entry. `true` only for the call that actually removed it.
    pub fn delete(&self, key: &StoreKey) -> bool {
        self.take(key).is_some()
    }

    /// Remove an entry and hand back its value.
    pub fn take(&self, key: &StoreKey) -> Option<StoreValue> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Count one receipt against an upload session. The entry is removed in
    /// the same call that records the final receipt.
    pub fn record_receipt(&self, key: &StoreKey) -> ReceiptOutcome {
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return ReceiptOutcome::Unknown;
            };
            let StoreValue::Session(session) = entry.value_mut() else {
                return ReceiptOutcome::Unknown;
            };
            session.receipts += 1;
            if session.receipts < session.total {
                return ReceiptOutcome::Pending {
                    receipts: session.receipts,
                    total: session.total,
                };
            }
        }

        match self.take(key) {
            Some(StoreValue::Session(session)) => ReceiptOutcome::Complete(session),
            _ => ReceiptOutcome::Unknown,
        }
    }

    /// Transfer ownership of a blob to a live upload session. Returns `false`
    /// when the session is gone, in which case the caller keeps ownership.
    pub fn hand_off_blob(&self, session_key: &StoreKey, object_url: &str) -> bool {
        match self.entries.get_mut(session_key) {
            Some(mut entry) => match entry.value_mut() {
                StoreValue::Session(session) => {
                    session.handed_off.push(object_url.to_string());
                    true
                }
                StoreValue::Image(_) => false,
            },
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel every pending expiry timer and drop all entries. No cleanup
    /// hooks run.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.entries.clear();
    }
}

impl Drop for EphemeralStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
