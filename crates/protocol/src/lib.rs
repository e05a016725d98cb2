//! Wire protocol for the RSA chat: key-exchange framing, the handshake state
//! machine, and the steady-state encrypted channel.
//!
//! Everything is generic over `AsyncRead`/`AsyncWrite` so tests drive the
//! protocol over `tokio::io::duplex` with paused time instead of a real link.

pub mod channel;
pub mod frame;
pub mod handshake;

pub use channel::EncryptedChannel;
pub use handshake::{HandshakeConfig, HandshakeError, HandshakeOutcome, HandshakeState, Role};
