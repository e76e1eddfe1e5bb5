//! Transport layer for Cadenza.
//!
//! Carries [`cadenza_protocol`] commands over any async byte stream as
//! length-prefixed frames, with a one-byte protocol-version handshake in
//! front. See [`ServerStream`] and [`ClientStream`].

mod error;
mod framed;

pub use error::TransportError;
pub use framed::{ClientStream, ServerStream, MAX_FRAME_LEN, PROTOCOL_VERSION};
