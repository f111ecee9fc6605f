//! Replica session: the seam between a deck and the transport
//!
//! The transport hands remote operations to [`ReplicaSession`] and ships
//! whatever [`ReplicaSession::serialize_local_operation`] produces. A failing
//! remote operation is reported to the caller; batch entry points log it and
//! carry on with the rest.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::cursor::TraversalCursor;
use crate::deck::Deck;
use crate::error::Result;
use crate::ids::PollId;
use crate::operation::{DeckOperation, FrameCodec};
use crate::poll::{PollRecord, QuickPoll};
use crate::publisher::{Guarded, LockLevel};
use crate::slide::Slide;

/// Outcome of applying several operations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    pub dropped: usize,
}

pub struct ReplicaSession {
    deck: Arc<Deck>,
    cursor: Arc<TraversalCursor>,
    polls: Guarded<HashMap<PollId, Arc<QuickPoll>>>,
    codec: FrameCodec,
}

impl ReplicaSession {
    pub fn new(deck: Arc<Deck>, config: &SessionConfig) -> Self {
        let cursor = TraversalCursor::with_kind(Arc::clone(&deck), config.filter);
        cursor.set_track_visited(config.track_visited);
        Self {
            deck,
            cursor,
            polls: Guarded::new(LockLevel::Poll, HashMap::new()),
            codec: FrameCodec::from_config(config),
        }
    }

    pub fn deck(&self) -> &Arc<Deck> {
        &self.deck
    }

    pub fn cursor(&self) -> &Arc<TraversalCursor> {
        &self.cursor
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn poll(&self, id: &PollId) -> Option<Arc<QuickPoll>> {
        self.polls.acquire().get(id).cloned()
    }

    /// Known polls, in no particular order
    pub fn polls(&self) -> Vec<Arc<QuickPoll>> {
        self.polls.acquire().values().cloned().collect()
    }

    fn poll_for(&self, record: &PollRecord) -> Result<Arc<QuickPoll>> {
        let poll = {
            let mut polls = self.polls.acquire();
            Arc::clone(
                polls
                    .entry(record.id)
                    .or_insert_with(|| Arc::new(QuickPoll::from_record(record.clone()))),
            )
        };
        poll.check_record(record)?;
        Ok(poll)
    }

    /// Apply one operation received from a peer
    pub fn apply_remote_operation(&self, op: &DeckOperation) -> Result<()> {
        debug!("Applying {} to deck {}", op.kind(), self.deck.id());
        match op {
            DeckOperation::InsertSlide {
                slide,
                content,
                entry,
            } => self
                .deck
                .insert_shipped_slide(
                    Slide::from_record(slide.clone()).into_ref(),
                    content,
                    entry.as_ref(),
                )
                .map(|_| ()),
            DeckOperation::DeleteSlide { slide } => self.deck.delete_slide(slide).map(|_| ()),
            DeckOperation::InsertAtSequence { placement: p } => self
                .deck
                .insert_entry_at_sequence(p.parent, p.sequence, p.entry, p.slide),
            DeckOperation::RemoveBySequence { parent, sequence } => {
                self.deck.remove_entry_by_sequence(*parent, *sequence)
            }
            DeckOperation::AddPollResult { poll, result } => {
                self.poll_for(poll)?.add_result(result.clone());
                Ok(())
            }
            DeckOperation::SetCurrentEntry { entry } => self.cursor.set_current(*entry),
        }
    }

    /// Encode an operation for the wire or the journal
    pub fn serialize_local_operation(&self, op: &DeckOperation) -> Result<Vec<u8>> {
        self.codec.encode(op)
    }

    /// Apply a local edit and return its encoding
    pub fn apply_local_operation(&self, op: &DeckOperation) -> Result<Vec<u8>> {
        let frame = self.serialize_local_operation(op)?;
        self.apply_remote_operation(op)?;
        Ok(frame)
    }

    /// Decode one frame and apply it
    pub fn apply_encoded(&self, frame: &[u8]) -> Result<DeckOperation> {
        let op = self.codec.decode(frame)?;
        self.apply_remote_operation(&op)?;
        Ok(op)
    }

    /// Apply operations in order, dropping (and logging) any that fail
    pub fn apply_batch<'a>(&self, ops: impl IntoIterator<Item = &'a DeckOperation>) -> BatchReport {
        let mut report = BatchReport::default();
        for op in ops {
            self.apply_logged(op, &mut report);
        }
        report
    }

    /// Apply a buffer of concatenated frames. A frame whose header is intact
    /// but whose payload fails is dropped; a broken header ends the stream.
    pub fn apply_stream(&self, mut data: &[u8]) -> BatchReport {
        let mut report = BatchReport::default();
        while !data.is_empty() {
            let len = match self.codec.frame_len(data) {
                Ok(len) => len,
                Err(e) => {
                    warn!("Unreadable frame, dropping {} bytes (ignored): {}", data.len(), e);
                    report.dropped += 1;
                    break;
                }
            };
            match self.codec.decode(&data[..len]) {
                Ok(op) => self.apply_logged(&op, &mut report),
                Err(e) => {
                    warn!("Malformed operation (ignored): {}", e);
                    report.dropped += 1;
                }
            }
            data = &data[len..];
        }
        report
    }

    pub(crate) fn apply_logged(&self, op: &DeckOperation, report: &mut BatchReport) {
        match self.apply_remote_operation(op) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                warn!("Remote {} failed (ignored): {}", op.kind(), e);
                report.dropped += 1;
            }
        }
    }
}

impl std::fmt::Debug for ReplicaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSession")
            .field("deck", &self.deck.id())
            .finish_non_exhaustive()
    }
}
