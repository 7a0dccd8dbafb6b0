use crate::msg::Msg;

/// Transfer progress for a single in-flight message, reported by
/// `Connection::progress`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub fn done(total: u64) -> Progress {
        Progress {
            completed: total,
            total,
        }
    }
}

/// The stand-in for the out-of-scope framed transport: full-duplex,
/// message-ordered, byte-oriented. `Pusher`/`Puller` drive replication
/// through this trait alone; nothing in `replicator-core` opens a socket
/// or otherwise depends on a concrete network stack.
pub trait Connection: Send + Sync {
    /// Enqueues `msg` for sending. Returns once the message is handed to
    /// the transport, not once it's acknowledged.
    fn send(&self, msg: Msg) -> crate::Result<()>;

    /// Returns the next received message, if one is available, without
    /// blocking.
    fn recv(&self) -> crate::Result<Option<Msg>>;

    /// Reports how much of an outstanding send identified by `sequence`
    /// has completed.
    fn progress(&self, sequence: u64) -> Progress;

    /// Cancels an outstanding message. Cooperative: the peer may still
    /// observe a partially-sent body, but no further progress is reported.
    fn cancel(&self, sequence: u64);
}
