use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use replicator_net::{Connection, Msg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Demultiplexes one [`Connection`]'s incoming messages between the
/// Pusher (which is waiting on a specific request's reply) and the Puller
/// (which handles every other incoming request). Needed because Pusher
/// and Puller share a single connection handle: without a single reader
/// thread routing by sequence, both actors racing `Connection::recv`
/// could each steal a message meant for the other.
pub struct Router {
    conn: Arc<dyn Connection>,
    pending: Arc<Mutex<HashMap<u64, Sender<Msg>>>>,
    sequence: Arc<AtomicU64>,
}

impl Router {
    pub fn new(conn: Arc<dyn Connection>) -> Router {
        Router {
            conn,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Sends `msg` and blocks for its reply (matched by sequence), up to
    /// `timeout`. Used by the Pusher for `changes` round trips and by the
    /// Replicator coordinator for the startup `getCheckpoint`/`setCheckpoint`
    /// exchange.
    pub fn request(&self, msg: Msg, timeout: Duration) -> replicator_base::Result<Msg> {
        let rx = self.send_tracked(msg)?;
        let sequence_timed_out = rx.recv_timeout(timeout);
        sequence_timed_out.map_err(|_| replicator_base::err("timed out waiting for peer reply"))
    }

    /// Sends `msg` and returns immediately with a receiver for its reply,
    /// without blocking. Used by the Pusher's outstanding-send window
    /// (§4.2 backpressure), which keeps several `rev` sends in flight at
    /// once rather than waiting for each ack before issuing the next.
    pub fn send_tracked(&self, msg: Msg) -> replicator_base::Result<Receiver<Msg>> {
        let sequence = msg.sequence;
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(sequence, tx);
        if let Err(e) = self.conn.send(msg) {
            self.pending.lock().remove(&sequence);
            return Err(e);
        }
        Ok(rx)
    }

    /// Spawns the dispatcher thread: replies go to whoever is waiting in
    /// `pending`, every other incoming message goes to `requests`. Stops
    /// once `stop` is set and the connection has nothing left buffered.
    pub fn spawn_dispatcher(&self, requests: Sender<Msg>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let conn = self.conn.clone();
        let pending = self.pending.clone();
        std::thread::spawn(move || loop {
            match conn.recv() {
                Ok(Some(msg)) => {
                    if msg.response {
                        if let Some(tx) = pending.lock().remove(&msg.sequence) {
                            let _ = tx.send(msg);
                        }
                        // A reply nobody's waiting for (e.g. a duplicate, or
                        // the waiter already timed out) is simply dropped.
                    } else if requests.send(msg).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => {
                    tracing::warn!(target: "replicator", "connection read failed: {e:?}");
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use replicator_net::{LoopbackConnection, Profile, Properties};
    use test_log::test;

    #[test]
    fn test_request_matches_reply_by_sequence() {
        let (a, b) = LoopbackConnection::pair();
        let router_a = Router::new(Arc::new(a));
        let (discard_tx, _discard_rx) = bounded(8);
        let stop = Arc::new(AtomicBool::new(false));
        let _dispatcher = router_a.spawn_dispatcher(discard_tx, stop.clone());

        let seq = router_a.next_sequence();
        let msg = Msg::request(Profile::GetCheckpoint, seq, Properties::new(), None);
        let rx = router_a.send_tracked(msg).unwrap();

        let received = b.recv().unwrap().unwrap();
        assert_eq!(received.sequence, seq);
        b.send(received.reply(Properties::new(), Some(b"pong".to_vec()))).unwrap();

        let reply = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.body, Some(b"pong".to_vec()));
        stop.store(true, Ordering::Relaxed);
    }

    #[test]
    fn test_dispatcher_routes_non_response_messages_to_requests_channel() {
        let (a, b) = LoopbackConnection::pair();
        let router_a = Router::new(Arc::new(a));
        let (requests_tx, requests_rx) = bounded(8);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = router_a.spawn_dispatcher(requests_tx, stop.clone());

        let seq = 42;
        b.send(Msg::request(Profile::Changes, seq, Properties::new(), None)).unwrap();

        let routed = requests_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(routed.sequence, seq);
        assert!(!routed.response);

        stop.store(true, Ordering::Relaxed);
        drop(requests_rx);
        handle.join().unwrap();
    }

    #[test]
    fn test_next_sequence_is_monotonic() {
        let (a, _b) = LoopbackConnection::pair();
        let router = Router::new(Arc::new(a));
        let first = router.next_sequence();
        let second = router.next_sequence();
        assert!(second > first);
    }
}
