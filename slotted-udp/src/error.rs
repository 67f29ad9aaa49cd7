//! The closed set of result codes the core runtime can produce.
//!
//! Every outcome a [`crate::Channel`] or free function in this crate can
//! reach is one of these variants — there is no catch-all "other" case, so
//! a `match` over [`Error`] that handles every variant is exhaustive by
//! construction. [`thiserror`] derives the `Display` impl, which doubles as
//! the error-string table spec'd for `error_string()`.

/// Result type used throughout the core runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed enumeration of everything a channel operation can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Internal re-try signal: a master-sync packet was consumed, or sync
    /// is not yet established. Receive callers may call again.
    #[error("try again")]
    TryAgain,

    /// A send was attempted on a receiver-role channel.
    #[error("not sender")]
    NotSender,

    /// Reserved for a future enforcement layer; never emitted today.
    #[error("frequency violation")]
    FrequencyViolation,

    /// Reserved for a future enforcement layer; never emitted today.
    #[error("latency violation")]
    LatencyViolation,

    /// The multicast address or port supplied at `init` was invalid.
    #[error("illegal address")]
    IllegalAddress,

    /// Joining the multicast group, binding, or setting socket options
    /// failed during `attach`.
    #[error("subscription failure")]
    SubscriptionFailure,

    /// Caller misuse: a null/empty argument where one isn't allowed.
    #[error("illegal argument")]
    IllegalArgument,

    /// The underlying socket send/receive failed.
    #[error("network error")]
    NetworkError(#[from] std::io::Error),

    /// The channel has no socket attached.
    #[error("not connected")]
    NotConnected,

    /// The caller's receive buffer is smaller than the incoming datagram.
    #[error("buffer too small")]
    BufferTooSmall,

    /// The datagram was shorter than the 20-byte header.
    #[error("malformed packet")]
    MalformedPacket,

    /// The datagram's slot did not match this channel's owned slot (and
    /// was not a slot-0 sync). Advisory: callers may still want to observe
    /// such packets.
    #[error("slot mismatch")]
    SlotMismatch,

    /// The datagram arrived outside its slot's transmit window.
    #[error("out of sync")]
    OutOfSync,
}

impl Error {
    /// The human-readable string for this result code.
    ///
    /// Equivalent to the abstract `error_string(code)` entry point: since
    /// `Error` derives `Display` via `thiserror`, this is just a thin,
    /// explicitly-named wrapper for callers translating the C API's
    /// `error_string` naming.
    pub fn error_string(&self) -> String {
        self.to_string()
    }
}
