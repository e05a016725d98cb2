//! Steady-state encrypted conversation.
//!
//! Each iteration services two independent directions: a complete 4-byte
//! ciphertext unit from the transport is decrypted with the local private
//! key and emitted locally; one locally typed byte is echoed, encrypted with
//! the peer's public key, and transmitted. Typed bytes go out in the order
//! typed, one unit per byte, with no batching.

use crate::frame::write_unit;
use keying::{decrypt_unit, encrypt_byte, KeyPair, PublicKey};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// The byte-wise encrypted conversation loop.
pub struct EncryptedChannel {
    local: KeyPair,
    peer: PublicKey,
}

impl EncryptedChannel {
    pub fn new(local: KeyPair, peer: PublicKey) -> Self {
        Self { local, peer }
    }

    /// Run the conversation.
    ///
    /// On an interactive input this never returns; it is the terminal service
    /// state of the process. When the local input does reach end-of-file
    /// (piped input, or a test), the transport writer is shut down and the
    /// inbound side is drained until the peer closes, then the loop ends
    /// cleanly.
    pub async fn run<T, U, I, O>(
        &self,
        transport_rx: &mut T,
        transport_tx: &mut U,
        local_in: &mut I,
        local_out: &mut O,
    ) -> io::Result<()>
    where
        T: AsyncRead + Unpin,
        U: AsyncWrite + Unpin,
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut inbound_open = true;
        let mut input_open = true;
        // Inbound units accumulate here, outside the select. A losing
        // select branch is cancelled, and a cancelled multi-byte read
        // would discard whatever it had buffered; frames carry no length
        // prefix beyond their fixed size, so one lost byte would
        // desynchronize the 4-byte framing for the rest of the session.
        // The single `read` into the unfilled tail is cancellation-safe.
        let mut unit_buf = [0u8; 4];
        let mut unit_filled = 0usize;

        while inbound_open || input_open {
            tokio::select! {
                read = transport_rx.read(&mut unit_buf[unit_filled..]), if inbound_open => match read {
                    Ok(0) => {
                        if unit_filled > 0 {
                            warn!(buffered = unit_filled, "peer closed mid-unit");
                        } else {
                            debug!("peer closed the transport");
                        }
                        inbound_open = false;
                    }
                    Ok(n) => {
                        unit_filled += n;
                        if unit_filled == unit_buf.len() {
                            unit_filled = 0;
                            let unit = u32::from_le_bytes(unit_buf);
                            let plain = decrypt_unit(unit, &self.local);
                            trace!(unit, plain, "decrypted inbound unit");
                            local_out.write_all(&[plain]).await?;
                            local_out.flush().await?;
                        }
                    }
                    Err(e) => return Err(e),
                },
                byte = local_in.read_u8(), if input_open => match byte {
                    Ok(byte) => {
                        // Enter always produces a CR/LF pair on the far side.
                        for out in expansion(byte) {
                            local_out.write_all(&[out]).await?;
                            write_unit(transport_tx, encrypt_byte(out, &self.peer)).await?;
                        }
                        local_out.flush().await?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("local input closed, shutting down transport writer");
                        input_open = false;
                        transport_tx.shutdown().await?;
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }
}

/// Bytes to echo and transmit for one typed byte: carriage return expands to
/// CR then LF, everything else passes through alone.
fn expansion(byte: u8) -> Vec<u8> {
    if byte == b'\r' {
        vec![b'\r', b'\n']
    } else {
        vec![byte]
    }
}
