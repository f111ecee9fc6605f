//! Journal subcommands

use anyhow::{Context, Result};
use inkdeck_core::{
    BatchReport, ContentPool, Deck, DeckSnapshot, EntryId, OperationJournal, PollId,
    ReplicaSession, SessionConfig, SlideId,
};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// Outcome of `verify`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub total: usize,
    pub malformed: usize,
}

#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub id: PollId,
    pub slide: SlideId,
    pub tally: Vec<(String, usize)>,
}

/// JSON document printed by `replay`
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub journal: String,
    pub replayed_at: String,
    pub report: BatchReport,
    pub current_entry: Option<EntryId>,
    pub deck: DeckSnapshot,
    pub polls: Vec<PollSummary>,
}

/// Print one line per record: offset, length and operation kind.
pub async fn inspect(journal: &OperationJournal, writer: &mut dyn Write) -> Result<()> {
    let records = journal
        .read_all()
        .await
        .with_context(|| format!("Failed to read journal {:?}", journal.path()))?;

    if records.is_empty() {
        writeln!(writer, "No records found.")?;
        return Ok(());
    }

    writeln!(writer, "Journal {} ({} records):", journal.path().display(), records.len())?;
    writeln!(writer, "{}", "-".repeat(60))?;
    for (index, record) in records.iter().enumerate() {
        let what = match &record.operation {
            Ok(op) => op.kind().to_string(),
            Err(e) => format!("MALFORMED ({})", e),
        };
        writeln!(
            writer,
            "  #{:<4} @{:<8} {:>6} bytes  {}",
            index, record.offset, record.len, what
        )?;
    }
    writeln!(writer, "{}", "-".repeat(60))?;
    Ok(())
}

/// Decode every record, reporting malformed ones.
pub async fn verify(
    journal: &OperationJournal,
    quiet: bool,
    writer: &mut dyn Write,
) -> Result<VerifyReport> {
    let records = journal
        .read_all()
        .await
        .with_context(|| format!("Failed to read journal {:?}", journal.path()))?;

    let mut report = VerifyReport {
        total: records.len(),
        malformed: 0,
    };
    for record in &records {
        if let Err(e) = &record.operation {
            report.malformed += 1;
            if !quiet {
                writeln!(writer, "  ERROR: record at {}: {}", record.offset, e)?;
            }
        }
    }

    if !quiet {
        writeln!(
            writer,
            "Verified {} records: {} ok, {} malformed",
            report.total,
            report.total - report.malformed,
            report.malformed
        )?;
    }
    Ok(report)
}

/// Replay into a fresh deck and summarise the result.
pub async fn replay(
    journal: &OperationJournal,
    config: &SessionConfig,
    name: &str,
) -> Result<ReplaySummary> {
    let deck = Arc::new(Deck::new(Arc::new(ContentPool::new()), name));
    let session = ReplicaSession::new(Arc::clone(&deck), config);
    let report = journal
        .replay(&session)
        .await
        .with_context(|| format!("Failed to replay journal {:?}", journal.path()))?;

    let mut polls: Vec<PollSummary> = session
        .polls()
        .iter()
        .map(|p| PollSummary {
            id: p.id(),
            slide: p.slide(),
            tally: p.tally(),
        })
        .collect();
    polls.sort_by_key(|p| p.id);

    Ok(ReplaySummary {
        journal: journal.path().display().to_string(),
        replayed_at: chrono::Utc::now().to_rfc3339(),
        report,
        current_entry: session.cursor().current(),
        deck: deck.snapshot(),
        polls,
    })
}
