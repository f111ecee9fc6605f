//! Replicated deck operations and their wire frame
//!
//! Frame layout:
//! ```text
//! magic "IDCK" (4) | version u16 LE | flags u8 | payload_len u32 LE | payload
//! ```
//! The payload is the bincode encoding of a [`DeckOperation`], zstd
//! compressed when flag bit `0x01` is set.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::deck::Deck;
use crate::error::{DeckError, Result};
use crate::ids::{ContentHash, EntryId, SlideId};
use crate::poll::{PollRecord, PollResult};
use crate::slide::{SlideRecord, SlideRef};

pub const OPERATION_MAGIC: &[u8; 4] = b"IDCK";

/// Current frame version
pub const OPERATION_FORMAT_VERSION: u16 = 1;

/// Bytes before the payload
pub const FRAME_HEADER_LEN: usize = 11;

/// Payload is zstd compressed
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Bytes of one shared asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub hash: ContentHash,
    pub data: Bytes,
}

/// Where a table-of-contents entry goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPlacement {
    pub parent: Option<EntryId>,
    pub sequence: u64,
    pub entry: EntryId,
    pub slide: Option<SlideId>,
}

/// An edit exchanged between replicas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeckOperation {
    /// Add or replace a slide, shipping the content its layers cite
    InsertSlide {
        slide: SlideRecord,
        content: Vec<ContentRecord>,
        entry: Option<EntryPlacement>,
    },
    DeleteSlide {
        slide: SlideId,
    },
    InsertAtSequence {
        placement: EntryPlacement,
    },
    RemoveBySequence {
        parent: Option<EntryId>,
        sequence: u64,
    },
    /// Merge a poll result, creating the poll on first sight
    AddPollResult {
        poll: PollRecord,
        result: PollResult,
    },
    SetCurrentEntry {
        entry: EntryId,
    },
}

impl DeckOperation {
    /// Build an `InsertSlide` for a member of `deck`, attaching the bytes of
    /// every blob the slide cites.
    pub fn insert_slide(
        deck: &Deck,
        slide: &SlideRef,
        entry: Option<EntryPlacement>,
    ) -> Result<Self> {
        let content = slide
            .content_hashes()
            .into_iter()
            .map(|hash| {
                deck.content(&hash)
                    .map(|blob| ContentRecord {
                        hash,
                        data: blob.data().clone(),
                    })
                    .ok_or(DeckError::MissingContent(hash))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DeckOperation::InsertSlide {
            slide: slide.record(),
            content,
            entry,
        })
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            DeckOperation::InsertSlide { .. } => "insert_slide",
            DeckOperation::DeleteSlide { .. } => "delete_slide",
            DeckOperation::InsertAtSequence { .. } => "insert_at_sequence",
            DeckOperation::RemoveBySequence { .. } => "remove_by_sequence",
            DeckOperation::AddPollResult { .. } => "add_poll_result",
            DeckOperation::SetCurrentEntry { .. } => "set_current_entry",
        }
    }

    /// Encode with the default codec
    pub fn encode(&self) -> Result<Vec<u8>> {
        FrameCodec::default().encode(self)
    }

    /// Decode a single frame with the default codec
    pub fn decode(data: &[u8]) -> Result<Self> {
        FrameCodec::default().decode(data)
    }
}

/// Frame encoder/decoder with size and compression limits
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_size: usize,
    compress_threshold: usize,
    compression_level: i32,
}

impl FrameCodec {
    pub fn new(max_message_size: usize, compress_threshold: usize, compression_level: i32) -> Self {
        Self {
            max_message_size,
            compress_threshold,
            compression_level,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.max_message_size,
            config.compress_threshold,
            config.compression_level,
        )
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode one operation into a frame
    pub fn encode(&self, op: &DeckOperation) -> Result<Vec<u8>> {
        let payload = bincode::serialize(op)?;
        if payload.len() > self.max_message_size {
            return Err(DeckError::MessageTooLarge(payload.len()));
        }

        let (flags, body) = if payload.len() >= self.compress_threshold {
            let compressed = zstd::encode_all(&payload[..], self.compression_level)
                .map_err(|e| DeckError::Codec(format!("Compression failed: {}", e)))?;
            (FLAG_COMPRESSED, compressed)
        } else {
            (0, payload)
        };

        if body.len() > self.max_message_size {
            return Err(DeckError::MessageTooLarge(body.len()));
        }
        let body_len =
            u32::try_from(body.len()).map_err(|_| DeckError::MessageTooLarge(body.len()))?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        buf.extend_from_slice(OPERATION_MAGIC);
        buf.extend_from_slice(&OPERATION_FORMAT_VERSION.to_le_bytes());
        buf.push(flags);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Check the header at the start of `data` and return the length of the
    /// whole frame. The payload itself is not decoded.
    pub fn frame_len(&self, data: &[u8]) -> Result<usize> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(DeckError::Codec("Frame too short".to_string()));
        }
        if &data[0..4] != OPERATION_MAGIC {
            return Err(DeckError::Codec("Invalid magic".to_string()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != OPERATION_FORMAT_VERSION {
            return Err(DeckError::UnsupportedVersion(version));
        }
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        if len > self.max_message_size {
            return Err(DeckError::MessageTooLarge(len));
        }
        let end = FRAME_HEADER_LEN + len;
        if data.len() < end {
            return Err(DeckError::Codec(format!(
                "Truncated frame: expected {} payload bytes, got {}",
                len,
                data.len() - FRAME_HEADER_LEN
            )));
        }
        Ok(end)
    }

    /// Decode a buffer holding exactly one frame
    pub fn decode(&self, data: &[u8]) -> Result<DeckOperation> {
        let (op, used) = self.decode_prefix(data)?;
        if used != data.len() {
            return Err(DeckError::Codec(format!(
                "{} trailing bytes after frame",
                data.len() - used
            )));
        }
        Ok(op)
    }

    /// Decode the frame at the start of `data`, returning the operation and
    /// the number of bytes consumed
    pub fn decode_prefix(&self, data: &[u8]) -> Result<(DeckOperation, usize)> {
        let end = self.frame_len(data)?;
        let flags = data[6];
        let body = &data[FRAME_HEADER_LEN..end];
        let op = if flags & FLAG_COMPRESSED != 0 {
            let payload = zstd::bulk::decompress(body, self.max_message_size)
                .map_err(|e| DeckError::Codec(format!("Decompression failed: {}", e)))?;
            bincode::deserialize(&payload)?
        } else {
            bincode::deserialize(body)?
        };
        Ok((op, end))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}
