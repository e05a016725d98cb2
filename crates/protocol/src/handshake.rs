//! Public-key exchange state machine.
//!
//! One state object, advanced by a single driver loop; the states that have
//! learned the peer key carry it with them. Transitions follow the original
//! protocol exactly, including the `ServerWaitKey2`/`ServerWaitAck2` path
//! that resolves the race where both ends believe they are initiators. That
//! branch is a behavioral contract, not something to re-derive.
//!
//! No authentication anywhere: any well-formed frame from any sender is
//! accepted at face value.

use crate::frame::{read_public_key, write_ack, write_key_frame, TAG_ACK, TAG_HELLO};
use keying::PublicKey;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Bounded-wait deadline for every handshake reply. The server's initial
/// listen is the one unbounded wait.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Which side of the exchange this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Handshake machine states. `DataExchange` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Announce ourselves: send `'C'` plus our key, then wait for the reply.
    ClientStart,
    /// Waiting up to the reply timeout for `'A'` plus the peer key.
    ClientWaitAck,
    /// Waiting indefinitely for a `'C'` announcement.
    ServerListen,
    /// `'C'` seen; waiting for the peer key fields.
    ServerWaitKey,
    /// Key recorded and our own sent; waiting for the final ack.
    ServerWaitAck { peer: PublicKey },
    /// The peer re-announced mid-handshake (double initiation); take its key
    /// again without re-sending ours.
    ServerWaitKey2,
    /// Final ack wait on the double-initiation path.
    ServerWaitAck2 { peer: PublicKey },
    /// Both sides hold each other's public key; hand off to the channel.
    DataExchange { peer: PublicKey },
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline for every bounded wait. 1000 ms in the original.
    pub reply_timeout: Duration,
    /// Cap on start/listen entries. `None` retries forever, which is the
    /// original behavior; tests set a cap to assert termination.
    pub max_attempts: Option<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            reply_timeout: REPLY_TIMEOUT,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake gave up after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
    #[error("transport error during handshake")]
    Io(#[from] io::Error),
}

/// What the machine hands back once it reaches `DataExchange`.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeOutcome {
    pub peer: PublicKey,
    /// How many times the machine entered its start/listen state. 1 means
    /// the first exchange went through clean.
    pub attempts: u32,
}

/// Drive the handshake to completion on the given stream.
///
/// Transient noise (unexpected tags, short frames, timeouts) resets the
/// machine to an earlier state and is never surfaced; only transport errors
/// and attempt exhaustion come back as `Err`.
pub async fn run<S>(
    stream: &mut S,
    role: Role,
    local: PublicKey,
    cfg: &HandshakeConfig,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = match role {
        Role::Client => HandshakeState::ClientStart,
        Role::Server => HandshakeState::ServerListen,
    };
    let mut attempts = 0u32;

    loop {
        state = match state {
            HandshakeState::ClientStart => {
                attempts += 1;
                check_attempts(cfg, attempts)?;
                debug!(attempt = attempts, "announcing key to peer");
                write_key_frame(stream, TAG_HELLO, &local).await?;
                HandshakeState::ClientWaitAck
            }

            HandshakeState::ClientWaitAck => {
                // 9 bytes expected: the ack tag plus the peer key. Unlike
                // an availability check, the read may have consumed the tag
                // by the time the deadline fires on a fragmented reply;
                // the retry re-announces and the tag checks of the next
                // wait absorb whatever the slow peer sends late.
                let deadline = Instant::now() + cfg.reply_timeout;
                match timeout_at(deadline, read_ack_reply(stream)).await {
                    Ok(Ok(Some(peer))) => {
                        write_ack(stream).await?;
                        HandshakeState::DataExchange { peer }
                    }
                    Ok(Ok(None)) => {
                        warn!("unexpected reply tag, re-announcing");
                        HandshakeState::ClientStart
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        debug!("no reply before deadline, re-announcing");
                        HandshakeState::ClientStart
                    }
                }
            }

            HandshakeState::ServerListen => {
                attempts += 1;
                check_attempts(cfg, attempts)?;
                debug!(attempt = attempts, "listening for an announcement");
                // Unbounded wait; bytes that are not an announcement are
                // discarded without leaving this state.
                loop {
                    let tag = stream.read_u8().await.map_err(HandshakeError::Io)?;
                    if tag == TAG_HELLO {
                        break;
                    }
                    trace!(tag, "ignoring stray byte while listening");
                }
                HandshakeState::ServerWaitKey
            }

            HandshakeState::ServerWaitKey => {
                let deadline = Instant::now() + cfg.reply_timeout;
                match timeout_at(deadline, read_public_key(stream)).await {
                    Ok(Ok(peer)) => {
                        write_key_frame(stream, TAG_ACK, &local).await?;
                        HandshakeState::ServerWaitAck { peer }
                    }
                    Ok(Err(e)) => return Err(HandshakeError::Io(e)),
                    Err(_) => {
                        debug!("announcement not followed by a key, back to listening");
                        HandshakeState::ServerListen
                    }
                }
            }

            HandshakeState::ServerWaitAck { peer } => {
                let deadline = Instant::now() + cfg.reply_timeout;
                match timeout_at(deadline, stream.read_u8()).await {
                    Ok(Ok(TAG_ACK)) => HandshakeState::DataExchange { peer },
                    // The peer also started as an initiator and re-announced;
                    // take its key again without re-sending ours.
                    Ok(Ok(TAG_HELLO)) => HandshakeState::ServerWaitKey2,
                    Ok(Ok(tag)) => {
                        warn!(tag, "unexpected tag while awaiting ack, back to listening");
                        HandshakeState::ServerListen
                    }
                    Ok(Err(e)) => return Err(HandshakeError::Io(e)),
                    Err(_) => {
                        debug!("no ack before deadline, back to listening");
                        HandshakeState::ServerListen
                    }
                }
            }

            HandshakeState::ServerWaitKey2 => {
                let deadline = Instant::now() + cfg.reply_timeout;
                match timeout_at(deadline, read_public_key(stream)).await {
                    Ok(Ok(peer)) => HandshakeState::ServerWaitAck2 { peer },
                    Ok(Err(e)) => return Err(HandshakeError::Io(e)),
                    Err(_) => HandshakeState::ServerListen,
                }
            }

            HandshakeState::ServerWaitAck2 { peer } => {
                let deadline = Instant::now() + cfg.reply_timeout;
                match timeout_at(deadline, stream.read_u8()).await {
                    Ok(Ok(TAG_ACK)) => HandshakeState::DataExchange { peer },
                    Ok(Ok(TAG_HELLO)) => HandshakeState::ServerWaitKey2,
                    Ok(Ok(tag)) => {
                        warn!(tag, "unexpected tag while awaiting ack, back to listening");
                        HandshakeState::ServerListen
                    }
                    Ok(Err(e)) => return Err(HandshakeError::Io(e)),
                    Err(_) => HandshakeState::ServerListen,
                }
            }

            HandshakeState::DataExchange { peer } => {
                debug!(
                    exponent = peer.exponent,
                    modulus = peer.modulus,
                    attempts,
                    "handshake complete"
                );
                return Ok(HandshakeOutcome { peer, attempts });
            }
        };
    }
}

fn check_attempts(cfg: &HandshakeConfig, attempts: u32) -> Result<(), HandshakeError> {
    match cfg.max_attempts {
        Some(cap) if attempts > cap => Err(HandshakeError::AttemptsExhausted { attempts: cap }),
        _ => Ok(()),
    }
}

/// Read the ack tag and, when it really is an ack, the peer key behind it.
/// A wrong tag returns `None` without consuming any further bytes; the
/// machine restarts and whatever follows is dealt with by the next wait.
async fn read_ack_reply<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<PublicKey>> {
    let tag = stream.read_u8().await?;
    if tag != TAG_ACK {
        return Ok(None);
    }
    let peer = read_public_key(stream).await?;
    Ok(Some(peer))
}
