//! InkDeck Core Library
//!
//! Replicated slide-deck document model:
//! - Guarded objects with ordered change listeners
//! - Content-addressed asset sharing (weak pool + per-deck overlays)
//! - Table-of-contents tree with sequence reconciliation
//! - Deck aggregate with invariant-preserving edits
//! - Filtered traversal cursor
//! - Quick polls
//! - Versioned operation codec, replica session and on-disk journal

pub mod publisher;
pub mod ids;
pub mod error;
pub mod content;
pub mod slide;
pub mod toc;
pub mod deck;
pub mod cursor;
pub mod poll;
pub mod operation;
pub mod session;
pub mod journal;
pub mod config;

pub use publisher::{
    ChangePublisher, CollectionChange, Guarded, ListenerId, LockLevel, Permit, PropertyChange,
    PropertyValue,
};
pub use ids::{ContentHash, DeckId, EntryId, LayerId, ParticipantId, PollId, SlideId};
pub use error::{DeckError, Result};
pub use content::{ContentBlob, ContentPool, ContentStore};
pub use slide::{Bounds, Layer, LayerKind, LayerRecord, Slide, SlideDisposition, SlideRecord, SlideRef};
pub use toc::{EntryNode, OutlineEntry, Toc, TocChange, TocTree};
pub use deck::{Deck, DeckDisposition, DeckSnapshot};
pub use cursor::{TraversalCursor, TraversalFilter, TraversalFilterKind};
pub use poll::{PollRecord, PollResult, PollStyle, QuickPoll};
pub use operation::{
    ContentRecord, DeckOperation, EntryPlacement, FrameCodec, OPERATION_FORMAT_VERSION,
    OPERATION_MAGIC,
};
pub use session::{BatchReport, ReplicaSession};
pub use journal::{JournalRecord, OperationJournal};
pub use config::SessionConfig;
