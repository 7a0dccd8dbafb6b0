use crate::dbactor::DBActorHandle;
use crate::protocol::{prop, ChangesResponseEntry};
use crate::router::Router;
use crate::status::{Activity, ActivityHandle, ErrorSlot, TransferTracker};
use crossbeam_channel::RecvTimeoutError;
use replicator_base::Bitmap256;
use replicator_net::{Msg, Profile, Properties};
use replicator_store::{Checkpoint, DocId, RevId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drives local->remote revision flow (§4.2). One `Pusher` per
/// replication; owns nothing the Puller or DBActor don't also have a
/// handle to, per §3 Ownership.
#[derive(Clone)]
pub struct PusherConfig {
    /// Identifies the peer for checkpoint keying and the `skip_foreign`
    /// "don't ship it straight back" filter.
    pub remote_id: String,
    pub doc_ids: Option<HashSet<DocId>>,
    pub skip_deleted: bool,
    /// Entries requested per `changes` batch (§4.2: "typical: 200").
    pub batch_limit: usize,
    pub continuous: bool,
    /// Drop changes whose tip revision was itself just pulled from
    /// `remote_id` (§4.1 `get_changes`'s `skipForeign`).
    pub skip_foreign: bool,
    /// Outstanding-send window size (§4.2 Backpressure), at most 256 since
    /// it's tracked with a `Bitmap256`.
    pub window_size: u8,
}

impl Default for PusherConfig {
    fn default() -> Self {
        PusherConfig {
            remote_id: String::new(),
            doc_ids: None,
            skip_deleted: false,
            batch_limit: 200,
            continuous: false,
            skip_foreign: true,
            window_size: 32,
        }
    }
}

pub struct Pusher {
    dbactor: DBActorHandle,
    router: Arc<Router>,
    config: PusherConfig,
    checkpoint_key: String,
    stop: Arc<AtomicBool>,
    activity: ActivityHandle,
    transfer: TransferTracker,
    errors: ErrorSlot,
}

impl Pusher {
    pub fn new(
        dbactor: DBActorHandle,
        router: Arc<Router>,
        config: PusherConfig,
        checkpoint_key: String,
        stop: Arc<AtomicBool>,
        activity: ActivityHandle,
        transfer: TransferTracker,
        errors: ErrorSlot,
    ) -> Pusher {
        Pusher {
            dbactor,
            router,
            config,
            checkpoint_key,
            stop,
            activity,
            transfer,
            errors,
        }
    }

    /// Attaches the current cookie jar's `Cookie:`-style header to an
    /// outgoing request's properties (§4.5), if the jar has anything to
    /// send for this remote.
    fn attach_cookie(&self, properties: &mut Properties) {
        match self.dbactor.cookies_for_request(&self.config.remote_id) {
            Ok(header) if !header.is_empty() => {
                properties.insert(prop::COOKIE.to_string(), header);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "replicator", "could not read cookie jar: {e:?}"),
        }
    }

    /// Records any `Set-Cookie`-style property the peer attached to its
    /// reply into the local cookie store.
    fn store_cookie_from(&self, msg: &Msg) {
        if let Some(header) = msg.properties.get(prop::SET_COOKIE) {
            if let Err(e) = self.dbactor.set_cookie(header, &self.config.remote_id) {
                tracing::warn!(target: "replicator", "could not store cookie from peer: {e:?}");
            }
        }
    }

    /// Runs the push side to completion: for a one-shot push, until the
    /// change feed is exhausted; for continuous, until `stop` is set.
    /// Errors reading from the local database are fatal and stop the
    /// push; transport errors on an individual batch are logged and
    /// retried on the next loop iteration (§7 transient transport).
    pub fn run(mut self) {
        let watch = if self.config.continuous {
            self.dbactor.watch().ok()
        } else {
            None
        };

        let (mut checkpoint, _is_empty) = match self.dbactor.get_checkpoint(&self.checkpoint_key) {
            Ok(v) => v,
            Err(e) => {
                let message = format!("pusher could not load checkpoint: {e:?}");
                tracing::error!(target: "replicator", "{message}");
                self.errors.set(message);
                self.activity.set(Activity::Stopped);
                return;
            }
        };

        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.activity.set(Activity::Stopped);
                return;
            }
            self.activity.set(Activity::Busy);

            let skip_foreign_remote = self.config.skip_foreign.then(|| self.config.remote_id.clone());
            let changes = match self.dbactor.get_changes_filtered(
                checkpoint.last_pushed,
                self.config.doc_ids.clone(),
                self.config.batch_limit,
                self.config.skip_deleted,
                skip_foreign_remote,
            ) {
                Ok(c) => c,
                Err(e) => {
                    let message = format!("pusher could not read changes: {e:?}");
                    tracing::error!(target: "replicator", "{message}");
                    self.errors.set(message);
                    self.activity.set(Activity::Stopped);
                    return;
                }
            };

            if changes.is_empty() {
                self.activity.set(Activity::Idle);
                if !self.config.continuous {
                    return;
                }
                match &watch {
                    Some(rx) => match rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(_) => continue,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            self.activity.set(Activity::Stopped);
                            return;
                        }
                    },
                    None => {
                        std::thread::sleep(Duration::from_millis(50));
                        continue;
                    }
                }
            }

            let max_sequence = changes.iter().map(|c| c.sequence).max().unwrap_or(checkpoint.last_pushed);

            let request_sequence = self.router.next_sequence();
            let mut changes_properties = Properties::new();
            self.attach_cookie(&mut changes_properties);
            let changes_msg = match Msg::request(Profile::Changes, request_sequence, changes_properties, None)
                .with_json_body(&changes)
            {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(target: "replicator", "pusher could not encode changes body: {e:?}");
                    continue;
                }
            };

            let reply = match self.router.request(changes_msg, Duration::from_secs(10)) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "replicator", "transient error proposing changes, will retry: {e:?}");
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
            };
            self.store_cookie_from(&reply);

            let wanted: Vec<ChangesResponseEntry> = match reply.body_json() {
                Ok(Some(v)) => v,
                Ok(None) => {
                    tracing::error!(target: "replicator", "peer sent no body in reply to changes");
                    continue;
                }
                Err(e) => {
                    tracing::error!(target: "replicator", "malformed changes reply: {e:?}");
                    continue;
                }
            };

            self.send_wanted_revisions(&changes, &wanted);

            checkpoint.last_pushed = max_sequence;
            if let Err(e) = self.dbactor.set_checkpoint(&self.checkpoint_key, checkpoint.clone()) {
                tracing::error!(target: "replicator", "pusher could not persist local checkpoint: {e:?}");
            }
            self.mirror_checkpoint_to_peer(&checkpoint);
        }
    }

    /// Sends the body for every entry the peer marked wanted, keeping up
    /// to `window_size` sends outstanding at once (§4.2 Backpressure): a
    /// `Bitmap256` bit per window slot tracks which are still
    /// unacknowledged, and issuing the next send for a slot blocks until
    /// that slot's previous occupant has acked.
    fn send_wanted_revisions(
        &self,
        changes: &[replicator_store::ChangeEntry],
        wanted: &[ChangesResponseEntry],
    ) {
        let window = self.config.window_size.max(1);
        let mut slots: Vec<Option<(u64, crossbeam_channel::Receiver<Msg>)>> = (0..window).map(|_| None).collect();
        let mut occupied = Bitmap256::new();
        let mut sent = 0usize;

        for (entry, response) in changes.iter().zip(wanted.iter()) {
            if !response.is_wanted() {
                continue;
            }
            let slot = (sent % window as usize) as u8;
            if occupied.get(slot) {
                if let Some((seq, rx)) = slots[slot as usize].take() {
                    self.await_ack(seq, rx);
                }
                occupied.set(slot, false);
            }

            match self.build_rev_message(&entry.doc_id, &entry.rev_id, entry.sequence) {
                Ok(Some(msg)) => {
                    let seq = msg.sequence;
                    match self.router.send_tracked(msg) {
                        Ok(rx) => {
                            self.transfer.track(seq);
                            slots[slot as usize] = Some((seq, rx));
                            occupied.set(slot, true);
                        }
                        Err(e) => tracing::warn!(target: "replicator", "failed to send rev {}: {e:?}", entry.rev_id),
                    }
                }
                Ok(None) => {
                    tracing::warn!(target: "replicator", "revision {} vanished before it could be sent", entry.rev_id);
                }
                Err(e) => tracing::error!(target: "replicator", "could not read revision {}: {e:?}", entry.rev_id),
            }
            sent += 1;
        }

        for slot in slots.iter_mut() {
            if let Some((seq, rx)) = slot.take() {
                self.await_ack(seq, rx);
            }
        }
    }

    fn await_ack(&self, sequence: u64, rx: crossbeam_channel::Receiver<Msg>) {
        if let Ok(reply) = rx.recv_timeout(Duration::from_secs(10)) {
            self.store_cookie_from(&reply);
        }
        self.transfer.untrack(sequence);
    }

    fn build_rev_message(&self, doc_id: &DocId, rev_id: &RevId, sequence: u64) -> replicator_base::Result<Option<Msg>> {
        let Some(stored) = self.dbactor.send_revision(doc_id.clone(), rev_id.clone())? else {
            return Ok(None);
        };
        let mut properties = Properties::new();
        properties.insert(prop::ID.to_string(), doc_id.to_string());
        properties.insert(prop::REV.to_string(), rev_id.to_string());
        properties.insert(prop::SEQUENCE.to_string(), sequence.to_string());
        if stored.deleted {
            properties.insert(prop::DELETED.to_string(), "1".to_string());
        }
        if !stored.history.is_empty() {
            let history = stored
                .history
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(",");
            properties.insert(prop::HISTORY.to_string(), history);
        }
        self.attach_cookie(&mut properties);
        let sequence = self.router.next_sequence();
        Ok(Some(Msg::request(Profile::Rev, sequence, properties, Some(stored.body))))
    }

    /// Mirrors the new checkpoint to the peer's copy (§4.4: checkpoints
    /// exist in two mirrored copies). Best-effort: a failure here doesn't
    /// undo the local advance, since the next session's reconciliation
    /// (§4.4) resets from the peer if the two disagree.
    fn mirror_checkpoint_to_peer(&self, checkpoint: &Checkpoint) {
        let sequence = self.router.next_sequence();
        let mut properties = Properties::new();
        properties.insert(prop::CLIENT.to_string(), self.checkpoint_key.clone());
        self.attach_cookie(&mut properties);
        let msg = match Msg::request(Profile::SetCheckpoint, sequence, properties, None).with_json_body(checkpoint) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "replicator", "could not encode checkpoint for peer: {e:?}");
                return;
            }
        };
        match self.router.request(msg, Duration::from_secs(5)) {
            Ok(reply) => self.store_cookie_from(&reply),
            Err(e) => tracing::warn!(target: "replicator", "could not mirror checkpoint to peer: {e:?}"),
        }
    }
}
