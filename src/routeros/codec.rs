// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Length-prefixed word encoding of the RouterOS API.
//!
//! Each word is preceded by its byte length in a variable-width prefix; a
//! sentence is terminated by a zero-length word.
//!
//! | Length            | Prefix bytes | Encoding                 |
//! |-------------------|--------------|--------------------------|
//! | `< 0x80`          | 1            | `len`                    |
//! | `< 0x4000`        | 2            | `len \| 0x8000`          |
//! | `< 0x200000`      | 3            | `len \| 0xC00000`        |
//! | `< 0x10000000`    | 4            | `len \| 0xE0000000`      |
//! | otherwise         | 5            | `0xF0` then `len` (BE)   |
//!
//! Decoding is done on a byte buffer ([`decode_sentence`]) so the same code
//! path serves the async [`SentenceReader`] and the fuzz targets.

use super::sentence::Sentence;
use crate::error::{MirrorError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Words longer than this are treated as stream corruption.
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Append the length prefix for `len` to `out`.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    let len = len as u64;
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x4000 {
        out.extend_from_slice(&((len | 0x8000) as u16).to_be_bytes());
    } else if len < 0x20_0000 {
        let bytes = ((len | 0xC0_0000) as u32).to_be_bytes();
        out.extend_from_slice(&bytes[1..]);
    } else if len < 0x1000_0000 {
        out.extend_from_slice(&((len | 0xE000_0000) as u32).to_be_bytes());
    } else {
        out.push(0xF0);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Decode a length prefix at the start of `buf`.
///
/// Returns `(length, prefix_size)`, or `None` if more bytes are needed.
pub fn decode_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let (extra, initial) = match first {
        b if b & 0x80 == 0x00 => (0, u32::from(b)),
        b if b & 0xC0 == 0x80 => (1, u32::from(b & 0x3F)),
        b if b & 0xE0 == 0xC0 => (2, u32::from(b & 0x1F)),
        b if b & 0xF0 == 0xE0 => (3, u32::from(b & 0x0F)),
        0xF0 => (4, 0),
        b => {
            return Err(MirrorError::MalformedSentence(format!(
                "invalid length prefix byte 0x{b:02X}"
            )))
        }
    };
    if buf.len() < 1 + extra {
        return Ok(None);
    }
    let len = buf[1..=extra]
        .iter()
        .fold(initial, |acc, &b| (acc << 8) | u32::from(b));
    Ok(Some((len as usize, 1 + extra)))
}

/// Encode one sentence, including the terminating empty word.
pub fn encode_sentence(sentence: &Sentence) -> Vec<u8> {
    let mut out = Vec::new();
    for word in sentence.words() {
        encode_length(word.len(), &mut out);
        out.extend_from_slice(word.as_bytes());
    }
    out.push(0);
    out
}

/// Decode one sentence from the start of `buf`.
///
/// Returns the sentence and the number of bytes it occupied, or `None` if
/// the buffer ends before the terminating empty word. A bare terminator
/// decodes to an empty sentence.
pub fn decode_sentence(buf: &[u8]) -> Result<Option<(Sentence, usize)>> {
    let mut words = Vec::new();
    let mut pos = 0;
    loop {
        let Some((len, prefix)) = decode_length(&buf[pos..])? else {
            return Ok(None);
        };
        pos += prefix;
        if len == 0 {
            return Ok(Some((Sentence::new(words), pos)));
        }
        if len > MAX_WORD_LEN {
            return Err(MirrorError::MalformedSentence(format!(
                "word of {len} bytes exceeds limit"
            )));
        }
        if buf.len() - pos < len {
            return Ok(None);
        }
        // Devices may send non-UTF-8 comments; keep them readable.
        words.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len;
    }
}

// =============================================================================
// Async halves
// =============================================================================

/// Reads sentences from the receiving half of a session.
pub struct SentenceReader<R> {
    inner: R,
    buf: Vec<u8>,
    target: String,
}

impl<R: AsyncRead + Unpin> SentenceReader<R> {
    pub fn new(inner: R, target: impl Into<String>) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            target: target.into(),
        }
    }

    /// Next non-empty sentence. End of stream is a connection error.
    pub async fn next(&mut self) -> Result<Sentence> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((sentence, used)) = decode_sentence(&self.buf)? {
                self.buf.drain(..used);
                if sentence.is_empty() {
                    continue;
                }
                return Ok(sentence);
            }
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(|e| MirrorError::connection(&self.target, e))?;
            if n == 0 {
                return Err(MirrorError::connection_msg(&self.target, "connection closed by peer"));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Writes sentences to the sending half of a session.
pub struct SentenceWriter<W> {
    inner: W,
    target: String,
}

impl<W: AsyncWrite + Unpin> SentenceWriter<W> {
    pub fn new(inner: W, target: impl Into<String>) -> Self {
        Self {
            inner,
            target: target.into(),
        }
    }

    pub async fn write(&mut self, sentence: &Sentence) -> Result<()> {
        let bytes = encode_sentence(sentence);
        self.inner
            .write_all(&bytes)
            .await
            .map_err(|e| MirrorError::connection(&self.target, e))?;
        self.inner
            .flush()
            .await
            .map_err(|e| MirrorError::connection(&self.target, e))
    }

    pub async fn shutdown(&mut self) {
        // The peer may already be gone.
        let _ = self.inner.shutdown().await;
    }
}
