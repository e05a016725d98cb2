//! Fixed-layout wire frames.
//!
//! Handshake phase: `tag:u8` optionally followed by `exponent:u32-LE` and
//! `modulus:u32-LE` (9 bytes), or a bare 1-byte ack. Data phase: one
//! `u32-LE` ciphertext unit per plaintext byte. Nothing is length-prefixed
//! beyond these fixed sizes.

use bytes::{BufMut, BytesMut};
use keying::PublicKey;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A peer announcing itself as an initiator.
pub const TAG_HELLO: u8 = b'C';
/// Acknowledgement, with or without a trailing key.
pub const TAG_ACK: u8 = b'A';

/// Size of a tagged key frame on the wire.
pub const KEY_FRAME_LEN: usize = 9;

/// Encode a tagged key frame: tag, exponent LE, modulus LE.
pub fn encode_key_frame(tag: u8, key: &PublicKey) -> BytesMut {
    let mut b = BytesMut::with_capacity(KEY_FRAME_LEN);
    b.put_u8(tag);
    b.put_u32_le(key.exponent);
    b.put_u32_le(key.modulus);
    b
}

/// Write a tagged key frame and flush it.
pub async fn write_key_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    tag: u8,
    key: &PublicKey,
) -> io::Result<()> {
    w.write_all(&encode_key_frame(tag, key)).await?;
    w.flush().await
}

/// Write a bare 1-byte ack.
pub async fn write_ack<W: AsyncWrite + Unpin>(w: &mut W) -> io::Result<()> {
    w.write_u8(TAG_ACK).await?;
    w.flush().await
}

/// Read the two key fields (exponent, modulus), least-significant byte first.
pub async fn read_public_key<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<PublicKey> {
    let exponent = r.read_u32_le().await?;
    let modulus = r.read_u32_le().await?;
    Ok(PublicKey { exponent, modulus })
}

/// Write one data-phase ciphertext unit and flush it.
pub async fn write_unit<W: AsyncWrite + Unpin>(w: &mut W, unit: u32) -> io::Result<()> {
    w.write_u32_le(unit).await?;
    w.flush().await
}

/// Read one data-phase ciphertext unit.
pub async fn read_unit<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u32> {
    r.read_u32_le().await
}
