//! On-disk journal of encoded operations
//!
//! The journal is a plain concatenation of operation frames. Appends go to
//! the end of the file; reads decode every frame and report each record's
//! outcome separately so that one bad record does not hide the rest.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::Result;
use crate::operation::{DeckOperation, FrameCodec};
use crate::session::{BatchReport, ReplicaSession};

/// One frame read back from a journal
#[derive(Debug)]
pub struct JournalRecord {
    /// Byte offset of the frame in the file
    pub offset: u64,
    /// Frame length including the header
    pub len: usize,
    pub operation: Result<DeckOperation>,
}

#[derive(Debug, Clone)]
pub struct OperationJournal {
    path: PathBuf,
    codec: FrameCodec,
}

impl OperationJournal {
    pub fn new(path: impl Into<PathBuf>, codec: FrameCodec) -> Self {
        Self {
            path: path.into(),
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one operation; returns the offset it was written at
    pub async fn append(&self, op: &DeckOperation) -> Result<u64> {
        let frame = self.codec.encode(op)?;
        self.append_frame(&frame).await
    }

    /// Append an already encoded frame
    pub async fn append_frame(&self, frame: &[u8]) -> Result<u64> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let offset = file.metadata().await?.len();
        file.write_all(frame).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(offset)
    }

    /// Decode every frame. A missing file reads as empty. A record whose
    /// header cannot be parsed ends the listing, since nothing after it can
    /// be located.
    pub async fn read_all(&self) -> Result<Vec<JournalRecord>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let rest = &data[offset..];
            match self.codec.frame_len(rest) {
                Ok(len) => {
                    records.push(JournalRecord {
                        offset: offset as u64,
                        len,
                        operation: self.codec.decode(&rest[..len]),
                    });
                    offset += len;
                }
                Err(e) => {
                    records.push(JournalRecord {
                        offset: offset as u64,
                        len: rest.len(),
                        operation: Err(e),
                    });
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Apply every decodable record to `session`, dropping failures
    pub async fn replay(&self, session: &ReplicaSession) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for record in self.read_all().await? {
            match record.operation {
                Ok(op) => session.apply_logged(&op, &mut report),
                Err(e) => {
                    warn!("Journal record at {} unreadable (ignored): {}", record.offset, e);
                    report.dropped += 1;
                }
            }
        }
        info!(
            "Replayed {}: {} applied, {} dropped",
            self.path.display(),
            report.applied,
            report.dropped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::content::ContentPool;
    use crate::deck::Deck;
    use crate::ids::{EntryId, SlideId};
    use crate::operation::EntryPlacement;
    use crate::slide::Slide;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn insert(n: u128) -> DeckOperation {
        DeckOperation::InsertSlide {
            slide: Slide::new(SlideId::from_u128(n), "journal").record(),
            content: Vec::new(),
            entry: Some(EntryPlacement {
                parent: None,
                sequence: n as u64,
                entry: EntryId::from_u128(n),
                slide: Some(SlideId::from_u128(n)),
            }),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let journal = OperationJournal::new(dir.path().join("ops.journal"), FrameCodec::default());

        assert!(journal.read_all().await.unwrap().is_empty());
        assert_eq!(journal.append(&insert(0)).await.unwrap(), 0);
        let second = journal.append(&insert(1)).await.unwrap();
        assert!(second > 0);

        let records = journal.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].offset, second);
        assert_eq!(records[0].operation.as_ref().unwrap(), &insert(0));
    }

    #[tokio::test]
    async fn test_replay_into_session() {
        let dir = TempDir::new().unwrap();
        let journal = OperationJournal::new(dir.path().join("ops.journal"), FrameCodec::default());
        journal.append(&insert(0)).await.unwrap();
        journal
            .append(&DeckOperation::DeleteSlide {
                slide: SlideId::from_u128(50),
            })
            .await
            .unwrap();
        journal.append(&insert(1)).await.unwrap();
        journal.append_frame(b"IDCK\x07\x00").await.unwrap();

        let deck = Arc::new(Deck::new(Arc::new(ContentPool::new()), "Replayed"));
        let session = ReplicaSession::new(Arc::clone(&deck), &SessionConfig::default());
        let report = journal.replay(&session).await.unwrap();

        assert_eq!(report, BatchReport { applied: 2, dropped: 2 });
        assert_eq!(deck.len(), 2);
        assert_eq!(session.cursor().current(), Some(EntryId::from_u128(0)));
    }
}
