/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer is gone or the stream was shut down.
    #[error("connection closed")]
    Closed,

    /// The bounded outbound queue was full on a non-blocking send.
    #[error("outbound queue full")]
    QueueFull,

    /// A frame length did not decode as a ULEB128 u32.
    #[error("invalid frame length")]
    InvalidLength,

    /// A frame announced a payload above the 2 MiB cap.
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u32),

    /// An underlying read or write failed.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
