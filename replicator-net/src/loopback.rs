use crate::connection::{Connection, Progress};
use crate::envelope::{decode_msg, encode_msg};
use crate::msg::Msg;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// An in-memory `Connection` wired directly to a peer's inbox, used to
/// exercise the replicator end to end without a real socket. Same
/// full-duplex, queue-backed shape as a real `ioqueues`-based transport,
/// but the queue lives in a `crossbeam_channel` pair instead of a
/// manually polled `VecDeque`.
pub struct LoopbackConnection {
    outgoing: Sender<Vec<u8>>,
    incoming: Receiver<Vec<u8>>,
    progress: Mutex<HashMap<u64, Progress>>,
    cancelled: Mutex<HashSet<u64>>,
}

impl LoopbackConnection {
    /// Builds a connected pair: bytes sent on one side arrive on the
    /// other's `recv`.
    pub fn pair() -> (LoopbackConnection, LoopbackConnection) {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        (
            LoopbackConnection {
                outgoing: tx_a,
                incoming: rx_b,
                progress: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(HashSet::new()),
            },
            LoopbackConnection {
                outgoing: tx_b,
                incoming: rx_a,
                progress: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(HashSet::new()),
            },
        )
    }
}

impl Connection for LoopbackConnection {
    fn send(&self, msg: Msg) -> crate::Result<()> {
        if self.cancelled.lock().contains(&msg.sequence) {
            return Err(replicator_base::err("message was cancelled"));
        }
        let sequence = msg.sequence;
        let body_len = msg.body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        let bytes = encode_msg(&msg)?;
        self.outgoing
            .send(bytes)
            .map_err(|_| replicator_base::err("peer connection closed"))?;
        self.progress.lock().insert(sequence, Progress::done(body_len));
        Ok(())
    }

    fn recv(&self) -> crate::Result<Option<Msg>> {
        match self.incoming.try_recv() {
            Ok(bytes) => Ok(Some(decode_msg(&bytes)?)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn progress(&self, sequence: u64) -> Progress {
        self.progress.lock().get(&sequence).copied().unwrap_or_default()
    }

    fn cancel(&self, sequence: u64) {
        self.cancelled.lock().insert(sequence);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msg::{Profile, Properties};
    use test_log::test;

    #[test]
    fn test_send_recv_round_trip() {
        let (a, b) = LoopbackConnection::pair();
        let msg = Msg::request(Profile::GetCheckpoint, 1, Properties::new(), Some(b"hi".to_vec()));
        a.send(msg.clone()).unwrap();
        let received = b.recv().unwrap().unwrap();
        assert_eq!(received, msg);
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn test_progress_reflects_body_size() {
        let (a, _b) = LoopbackConnection::pair();
        let msg = Msg::request(Profile::Rev, 9, Properties::new(), Some(vec![0; 100]));
        a.send(msg).unwrap();
        assert_eq!(a.progress(9), Progress { completed: 100, total: 100 });
    }

    #[test]
    fn test_cancel_blocks_further_sends_of_that_sequence() {
        let (a, _b) = LoopbackConnection::pair();
        a.cancel(3);
        let msg = Msg::request(Profile::NoRev, 3, Properties::new(), None);
        assert!(a.send(msg).is_err());
    }
}
