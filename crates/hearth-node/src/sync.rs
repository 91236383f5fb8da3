//! Pull-based reconciliation of channel messages.
//!
//! A peer advertises the ids it holds for a channel. We ask that peer for
//! the ones we lack, correlate its response by request id and append each
//! returned message through the regular validation path. A response that
//! arrives after the wait expired is still ingested by the bridge.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use hearth_shared::protocol::PeerMessage;
use hearth_shared::types::{ChannelAddress, CommunityId};
use hearth_store::AppendOutcome;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::storage::Storage;

/// What one reconciliation round achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Ids we asked the peer for.
    pub requested: usize,
    pub accepted: usize,
    pub duplicate: usize,
    pub rejected: usize,
}

/// Outstanding message requests keyed by request id.
#[derive(Default)]
pub(crate) struct Reconciler {
    pending: Mutex<HashMap<String, oneshot::Sender<Vec<Value>>>>,
}

impl Reconciler {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Vec<Value>>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self) -> (String, oneshot::Receiver<Vec<Value>>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(request_id.clone(), tx);
        (request_id, rx)
    }

    /// Hand a response to its waiting request. Gives the messages back when
    /// nobody waits for them any more.
    pub(crate) fn complete(&self, request_id: &str, messages: Vec<Value>) -> Option<Vec<Value>> {
        let waiter = self.pending().remove(request_id);
        match waiter {
            Some(tx) => tx.send(messages).err(),
            None => Some(messages),
        }
    }

    pub(crate) fn abandon(&self, request_id: &str) {
        self.pending().remove(request_id);
    }

    pub(crate) fn abandon_all(&self) {
        self.pending().clear();
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.pending().len()
    }
}

impl Storage {
    /// Fetch the messages of `channel_address` that `peer_id` holds and we
    /// do not.
    ///
    /// Each returned message is validated on its own; rejected ones are
    /// counted and skipped without failing the round. Fails with
    /// [`EngineError::PeerUnresponsive`] when the peer does not answer within
    /// the reconcile timeout, leaving already-held messages untouched.
    pub async fn reconcile_missing_messages(
        &self,
        known_ids: &[String],
        peer_id: &str,
        channel_address: &ChannelAddress,
        community_id: &CommunityId,
    ) -> Result<ReconcileReport> {
        if community_id != self.community_id() {
            return Err(EngineError::UnknownCommunity(community_id.clone()));
        }
        let store = self.store()?;

        let missing = store.missing_message_ids(known_ids).await;
        let mut report = ReconcileReport {
            requested: missing.len(),
            ..Default::default()
        };
        if missing.is_empty() {
            return Ok(report);
        }

        let (request_id, response) = self.reconciler.register();
        let ask = PeerMessage::AskForMessages {
            request_id: request_id.clone(),
            ids: missing.clone(),
            peer_id: self.local_peer_id(),
            target_peer: peer_id.to_string(),
            channel_address: channel_address.clone(),
            community_id: community_id.clone(),
        };
        if let Err(e) = self.publish(&community_id.to_topic(), &ask).await {
            self.reconciler.abandon(&request_id);
            return Err(e);
        }
        debug!(peer = %peer_id, channel = %channel_address, count = missing.len(), "Asked for missing messages");

        let messages =
            match tokio::time::timeout(self.options().reconcile_timeout, response).await {
                Ok(Ok(messages)) => messages,
                _ => {
                    self.reconciler.abandon(&request_id);
                    warn!(peer = %peer_id, channel = %channel_address, "Message request timed out");
                    return Err(EngineError::PeerUnresponsive(peer_id.to_string()));
                }
            };

        let wanted: HashSet<&str> = missing.iter().map(String::as_str).collect();
        for value in &messages {
            let id = value.get("id").and_then(Value::as_str);
            let channel = value.get("channelAddress").and_then(Value::as_str);
            if !id.is_some_and(|id| wanted.contains(id)) || channel != Some(channel_address.as_str())
            {
                debug!(peer = %peer_id, ?id, "Unrequested message in response, skipping");
                report.rejected += 1;
                continue;
            }
            match store.append_message_value(value).await? {
                AppendOutcome::Accepted => report.accepted += 1,
                AppendOutcome::Duplicate => report.duplicate += 1,
                AppendOutcome::Rejected(reason) => {
                    debug!(peer = %peer_id, ?id, %reason, "Reconciled message rejected");
                    report.rejected += 1;
                }
            }
        }

        info!(
            peer = %peer_id,
            channel = %channel_address,
            requested = report.requested,
            accepted = report.accepted,
            rejected = report.rejected,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Answer a peer's request with the messages we hold from `ids`.
    /// Returns how many were sent.
    pub(crate) async fn answer_message_request(
        &self,
        request_id: &str,
        ids: &[String],
        requester: &str,
        channel_address: &ChannelAddress,
    ) -> Result<usize> {
        let store = self.store()?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(mut message) = store.message(id).await else {
                continue;
            };
            if message.channel_address != *channel_address {
                continue;
            }
            if let Some(media) = message.media.as_mut() {
                media.path = None;
            }
            messages.push(serde_json::to_value(&message)?);
        }

        let count = messages.len();
        let response = PeerMessage::MessagesResponse {
            request_id: request_id.to_string(),
            target_peer: requester.to_string(),
            channel_address: channel_address.clone(),
            community_id: self.community_id().clone(),
            messages,
        };
        self.publish(&self.community_id().to_topic(), &response)
            .await?;
        debug!(peer = %requester, count, "Answered message request");
        Ok(count)
    }
}
