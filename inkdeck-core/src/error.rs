//! Error taxonomy for the document model
//!
//! Invariant violations are returned to the direct caller as typed failures.
//! Ambiguous content references and transient ordering gaps are modelled as
//! states elsewhere and never show up here.

use crate::ids::{ContentHash, EntryId, PollId, SlideId};

/// Result type for document model operations
pub type Result<T> = std::result::Result<T, DeckError>;

/// Errors raised by deck, tree, cursor, poll and codec operations
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("Slide is not a member of this deck: {0}")]
    NotMember(SlideId),

    #[error("Entry {entry} already has parent {parent:?}")]
    AlreadyParented {
        entry: EntryId,
        parent: Option<EntryId>,
    },

    #[error("Entry already present in tree: {0}")]
    DuplicateEntry(EntryId),

    #[error("Entry not found: {0}")]
    UnknownEntry(EntryId),

    #[error("Entry does not belong to this tree: {0}")]
    ForeignEntry(EntryId),

    #[error("Entry cannot be placed inside its own subtree: {0}")]
    CyclicEntry(EntryId),

    #[error("No entry with sequence {sequence} under {parent:?}")]
    NoSuchSequence {
        parent: Option<EntryId>,
        sequence: u64,
    },

    #[error("Sequence {sequence} under {parent:?} cannot be shifted past u64::MAX")]
    SequenceOverflow {
        parent: Option<EntryId>,
        sequence: u64,
    },

    #[error("Content not available: {0}")]
    MissingContent(ContentHash),

    #[error("Poll {0} does not match the locally known poll")]
    PollMismatch(PollId),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unsupported operation format version: {0}")]
    UnsupportedVersion(u16),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeckError {
    /// True for failures that indicate an upstream logic bug rather than a
    /// transport or environment problem.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            DeckError::NotMember(_)
                | DeckError::AlreadyParented { .. }
                | DeckError::DuplicateEntry(_)
                | DeckError::UnknownEntry(_)
                | DeckError::ForeignEntry(_)
                | DeckError::CyclicEntry(_)
                | DeckError::NoSuchSequence { .. }
                | DeckError::SequenceOverflow { .. }
                | DeckError::MissingContent(_)
                | DeckError::PollMismatch(_)
        )
    }
}

impl From<bincode::Error> for DeckError {
    fn from(e: bincode::Error) -> Self {
        DeckError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for DeckError {
    fn from(e: serde_json::Error) -> Self {
        DeckError::Config(e.to_string())
    }
}
