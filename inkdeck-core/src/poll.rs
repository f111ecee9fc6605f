//! Quick polls
//!
//! A poll attached to one slide, holding at most one result per participant.
//! Results merge idempotently: a second result from the same participant
//! replaces the first in place.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeckError, Result};
use crate::ids::{ParticipantId, PollId, SlideId};
use crate::publisher::{
    ChangePublisher, CollectionChange, Guarded, LockLevel, Permit, PropertyChange, set_property,
};

/// Fixed choice set of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollStyle {
    YesNo,
    YesNoBoth,
    YesNoNeither,
    ChooseAToC,
    ChooseAToD,
    ChooseAToE,
    ChooseAToF,
    Custom(Vec<String>),
}

impl PollStyle {
    /// Choices in display order
    pub fn choices(&self) -> Vec<String> {
        let fixed: &[&str] = match self {
            PollStyle::YesNo => &["Yes", "No"],
            PollStyle::YesNoBoth => &["Yes", "No", "Both"],
            PollStyle::YesNoNeither => &["Yes", "No", "Neither"],
            PollStyle::ChooseAToC => &["A", "B", "C"],
            PollStyle::ChooseAToD => &["A", "B", "C", "D"],
            PollStyle::ChooseAToE => &["A", "B", "C", "D", "E"],
            PollStyle::ChooseAToF => &["A", "B", "C", "D", "E", "F"],
            PollStyle::Custom(choices) => return choices.clone(),
        };
        fixed.iter().map(|c| c.to_string()).collect()
    }
}

/// One participant's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    pub participant: ParticipantId,
    pub choice: String,
}

impl PollResult {
    pub fn new(participant: ParticipantId, choice: impl Into<String>) -> Self {
        Self {
            participant,
            choice: choice.into(),
        }
    }
}

/// Identity and shape of a poll, enough to create it on first result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    pub id: PollId,
    pub slide: SlideId,
    pub style: PollStyle,
}

/// Guarded fields of a poll
#[derive(Debug, Default)]
pub struct PollState {
    results: Vec<PollResult>,
    updated: bool,
}

impl PollState {
    pub fn results(&self) -> &[PollResult] {
        &self.results
    }

    pub fn updated(&self) -> bool {
        self.updated
    }
}

pub struct QuickPoll {
    id: PollId,
    slide: SlideId,
    style: PollStyle,
    state: Guarded<PollState>,
    properties: ChangePublisher<PollState, PropertyChange>,
    result_events: ChangePublisher<PollState, CollectionChange<ParticipantId>>,
}

impl QuickPoll {
    pub fn new(id: PollId, slide: SlideId, style: PollStyle) -> Self {
        Self {
            id,
            slide,
            style,
            state: Guarded::new(LockLevel::Poll, PollState::default()),
            properties: ChangePublisher::new(),
            result_events: ChangePublisher::new(),
        }
    }

    pub fn from_record(record: PollRecord) -> Self {
        Self::new(record.id, record.slide, record.style)
    }

    pub fn id(&self) -> PollId {
        self.id
    }

    pub fn slide(&self) -> SlideId {
        self.slide
    }

    pub fn style(&self) -> &PollStyle {
        &self.style
    }

    pub fn state(&self) -> Permit<'_, PollState> {
        self.state.acquire()
    }

    /// Fires for the `updated` flag
    pub fn properties(&self) -> &ChangePublisher<PollState, PropertyChange> {
        &self.properties
    }

    /// Added for a new participant, Set for an in-place update
    pub fn result_events(&self) -> &ChangePublisher<PollState, CollectionChange<ParticipantId>> {
        &self.result_events
    }

    pub fn record(&self) -> PollRecord {
        PollRecord {
            id: self.id,
            slide: self.slide,
            style: self.style.clone(),
        }
    }

    /// Fail with `PollMismatch` unless `record` describes this poll
    pub fn check_record(&self, record: &PollRecord) -> Result<()> {
        if record.id != self.id || record.slide != self.slide || record.style != self.style {
            return Err(DeckError::PollMismatch(record.id));
        }
        Ok(())
    }

    /// Merge a result. Returns `true` when the participant is new.
    ///
    /// An existing participant's result is overwritten in place and the
    /// `updated` flag toggles, even if the choice is unchanged.
    pub fn add_result(&self, result: PollResult) -> bool {
        let mut state = self.state.acquire();
        let existing = state
            .results
            .iter()
            .position(|r| r.participant == result.participant);
        match existing {
            Some(index) => {
                let participant = result.participant;
                state.results[index] = result;
                let flipped = !state.updated;
                set_property(&mut *state, &self.properties, "updated", |s| &mut s.updated, flipped);
                self.result_events.publish(
                    &state,
                    &CollectionChange::Set {
                        index,
                        old: participant,
                        new: participant,
                    },
                );
                debug!("Updated result of {} in poll {}", participant, self.id);
                false
            }
            None => {
                let index = state.results.len();
                let participant = result.participant;
                state.results.push(result);
                self.result_events.publish(
                    &state,
                    &CollectionChange::Added {
                        index,
                        item: participant,
                    },
                );
                true
            }
        }
    }

    pub fn result_for(&self, participant: &ParticipantId) -> Option<PollResult> {
        self.state
            .acquire()
            .results
            .iter()
            .find(|r| r.participant == *participant)
            .cloned()
    }

    pub fn results(&self) -> Vec<PollResult> {
        self.state.acquire().results.clone()
    }

    pub fn len(&self) -> usize {
        self.state.acquire().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn updated(&self) -> bool {
        self.state.acquire().updated
    }

    /// Votes per choice, in the style's order. Results naming a choice
    /// outside the style are not counted.
    pub fn tally(&self) -> Vec<(String, usize)> {
        let state = self.state.acquire();
        self.style
            .choices()
            .into_iter()
            .map(|choice| {
                let count = state.results.iter().filter(|r| r.choice == choice).count();
                (choice, count)
            })
            .collect()
    }
}

impl std::fmt::Debug for QuickPoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickPoll")
            .field("id", &self.id)
            .field("slide", &self.slide)
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}
