//! Filtered traversal over a deck's table of contents
//!
//! A [`TraversalCursor`] tracks a current entry plus its filtered pre-order
//! neighbours. It listens to the tree and re-settles after every edit so that
//! `current`, when set, is always accepted by the filter.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::deck::Deck;
use crate::error::{DeckError, Result};
use crate::ids::{EntryId, SlideId};
use crate::publisher::{
    ChangePublisher, CollectionChange, Guarded, ListenerId, LockLevel, PropertyChange,
    set_property,
};
use crate::slide::SlideDisposition;
use crate::toc::{EntryNode, TocChange, TocTree};

/// Predicate selecting the entries navigation may land on
pub type TraversalFilter = Arc<dyn Fn(&EntryNode) -> bool + Send + Sync>;

/// Built-in traversal filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalFilterKind {
    /// Every entry, headings included
    All,
    /// Entries wrapping a slide
    #[default]
    SlidesOnly,
    /// Slide entries, except student submissions
    SkipStudentSubmissions,
}

impl TraversalFilterKind {
    pub fn predicate(self) -> TraversalFilter {
        match self {
            TraversalFilterKind::All => Arc::new(|_: &EntryNode| true),
            TraversalFilterKind::SlidesOnly => Arc::new(|n: &EntryNode| n.slide().is_some()),
            TraversalFilterKind::SkipStudentSubmissions => Arc::new(|n: &EntryNode| {
                n.slide().is_some_and(|s| {
                    !s.disposition()
                        .contains(SlideDisposition::STUDENT_SUBMISSION)
                })
            }),
        }
    }
}

/// Guarded fields of a cursor
#[derive(Debug, Default)]
pub struct CursorState {
    pub current: Option<EntryId>,
    pub previous: Option<EntryId>,
    pub next: Option<EntryId>,
    pub absolute_index: Option<usize>,
    track_visited: bool,
    visited: Vec<SlideId>,
    /// Position vacated by the last child-list removal
    gap: Option<(Option<EntryId>, usize)>,
}

impl CursorState {
    pub fn visited(&self) -> &[SlideId] {
        &self.visited
    }
}

/// Current/next/previous cursor over one deck
pub struct TraversalCursor {
    deck: Arc<Deck>,
    filter: TraversalFilter,
    state: Guarded<CursorState>,
    properties: ChangePublisher<CursorState, PropertyChange>,
    listener: ListenerId,
}

impl TraversalCursor {
    /// Bind a cursor to `deck` and settle it on the first accepted entry
    pub fn new(deck: Arc<Deck>, filter: TraversalFilter) -> Arc<Self> {
        let cursor = Arc::new_cyclic(|weak: &Weak<TraversalCursor>| {
            let weak = weak.clone();
            let listener = deck.toc().changes().subscribe(move |tree, change| {
                if let Some(cursor) = weak.upgrade() {
                    cursor.on_change(tree, change);
                }
            });
            TraversalCursor {
                deck,
                filter,
                state: Guarded::new(
                    LockLevel::Cursor,
                    CursorState {
                        track_visited: true,
                        ..CursorState::default()
                    },
                ),
                properties: ChangePublisher::new(),
                listener,
            }
        });
        cursor.refresh();
        cursor
    }

    pub fn with_kind(deck: Arc<Deck>, kind: TraversalFilterKind) -> Arc<Self> {
        Self::new(deck, kind.predicate())
    }

    pub fn deck(&self) -> &Arc<Deck> {
        &self.deck
    }

    /// Events for `current`, `previous`, `next` and `absolute_index`
    pub fn properties(&self) -> &ChangePublisher<CursorState, PropertyChange> {
        &self.properties
    }

    pub fn current(&self) -> Option<EntryId> {
        self.state.acquire().current
    }

    pub fn previous(&self) -> Option<EntryId> {
        self.state.acquire().previous
    }

    pub fn next(&self) -> Option<EntryId> {
        self.state.acquire().next
    }

    /// Position of the current slide among all slides of the tree
    pub fn absolute_index(&self) -> Option<usize> {
        self.state.acquire().absolute_index
    }

    pub fn set_track_visited(&self, track: bool) {
        self.state.acquire().track_visited = track;
    }

    pub fn has_visited(&self, slide: &SlideId) -> bool {
        self.state.acquire().visited.contains(slide)
    }

    /// Slides landed on so far, in first-visit order
    pub fn visited(&self) -> Vec<SlideId> {
        self.state.acquire().visited.clone()
    }

    /// Move to `entry`. An entry rejected by the filter resolves to the
    /// nearest accepted one, forwards first.
    pub fn set_current(&self, entry: EntryId) -> Result<()> {
        self.deck.toc().view(|tree| {
            if !tree.contains(&entry) {
                return Err(DeckError::ForeignEntry(entry));
            }
            let mut state = self.state.acquire();
            self.settle(tree, &mut state, Some(entry));
            Ok(())
        })
    }

    /// Step forward; returns the new current entry if there was a next one
    pub fn go_next(&self) -> Option<EntryId> {
        let next = self.next()?;
        self.set_current(next).ok()?;
        self.current()
    }

    /// Step back; returns the new current entry if there was a previous one
    pub fn go_previous(&self) -> Option<EntryId> {
        let previous = self.previous()?;
        self.set_current(previous).ok()?;
        self.current()
    }

    /// Re-settle against the current tree
    pub fn refresh(&self) {
        self.deck.toc().view(|tree| {
            let mut state = self.state.acquire();
            let current = state.current;
            self.settle(tree, &mut state, current);
        });
    }

    fn on_change(&self, tree: &TocTree, change: &TocChange) {
        let mut state = self.state.acquire();
        match change {
            TocChange::Children {
                parent,
                change: CollectionChange::Removed { index, .. },
            } => {
                state.gap = Some((*parent, *index));
                return;
            }
            TocChange::Detached { entries } => {
                let gap = state.gap.take();
                let Some(current) = state.current else {
                    self.settle(tree, &mut state, None);
                    return;
                };
                if !entries.contains(&current) {
                    self.settle(tree, &mut state, Some(current));
                    return;
                }
                let replacement = gap.and_then(|(parent, index)| {
                    tree.find_from(tree.after_gap(parent, index), &*self.filter)
                        .or_else(|| tree.find_back_from(tree.before_gap(parent, index), &*self.filter))
                });
                debug!("Current entry {} removed, moving to {:?}", current, replacement);
                self.settle(tree, &mut state, replacement);
                return;
            }
            _ => {}
        }
        let current = state.current;
        self.settle(tree, &mut state, current);
    }

    /// Pick an accepted current entry and recompute its neighbours
    fn settle(&self, tree: &TocTree, state: &mut CursorState, from: Option<EntryId>) {
        let filter: &dyn Fn(&EntryNode) -> bool = &*self.filter;
        let current = match from.and_then(|id| tree.get(&id)) {
            None => tree.find_first(filter),
            Some(node) if filter(node) => Some(node.id()),
            Some(node) => tree
                .find_next(node.id(), filter)
                .or_else(|| tree.find_previous(node.id(), filter)),
        };
        let (previous, next, absolute_index) = match current {
            Some(id) => (
                tree.find_previous(id, filter),
                tree.find_next(id, filter),
                tree.absolute_index(id),
            ),
            None => (None, None, None),
        };

        set_property(state, &self.properties, "current", |s| &mut s.current, current);
        set_property(state, &self.properties, "previous", |s| &mut s.previous, previous);
        set_property(state, &self.properties, "next", |s| &mut s.next, next);
        set_property(
            state,
            &self.properties,
            "absolute_index",
            |s| &mut s.absolute_index,
            absolute_index,
        );

        if state.track_visited {
            if let Some(slide) = current.and_then(|id| tree.get(&id)).and_then(|n| n.slide_id()) {
                if !state.visited.contains(&slide) {
                    state.visited.push(slide);
                }
            }
        }
    }
}

impl Drop for TraversalCursor {
    fn drop(&mut self) {
        self.deck.toc().changes().unsubscribe(self.listener);
    }
}

impl std::fmt::Debug for TraversalCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraversalCursor")
            .field("deck", &self.deck.id())
            .field("state", &*self.state.acquire())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentPool;
    use crate::publisher::PropertyValue;
    use crate::slide::Slide;

    fn deck() -> Arc<Deck> {
        Arc::new(Deck::new(Arc::new(ContentPool::new()), "Cursor deck"))
    }

    fn e(n: u128) -> EntryId {
        EntryId::from_u128(n)
    }

    fn add_slide_entry(deck: &Deck, parent: Option<EntryId>, entry: EntryId) -> SlideId {
        let slide = Slide::new(SlideId::new(), format!("slide {}", entry)).into_ref();
        let id = slide.id();
        deck.insert_slide(slide).unwrap();
        deck.add_entry(parent, entry, Some(id)).unwrap();
        id
    }

    #[test]
    fn test_filter_skips_rejected_sibling() {
        let d = deck();
        let (a, b, c) = (e(1), e(2), e(3));
        for id in [a, b, c] {
            d.add_entry(None, id, None).unwrap();
        }
        let cursor = TraversalCursor::new(Arc::clone(&d), Arc::new(move |n: &EntryNode| n.id() != b));

        cursor.set_current(a).unwrap();
        assert_eq!(cursor.current(), Some(a));
        assert_eq!(cursor.next(), Some(c));
        assert_eq!(cursor.previous(), None);
    }

    #[test]
    fn test_empty_tree_then_first_entry() {
        let d = deck();
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        assert_eq!(cursor.current(), None);

        d.add_entry(None, e(1), None).unwrap();
        assert_eq!(cursor.current(), None);

        add_slide_entry(&d, None, e(2));
        assert_eq!(cursor.current(), Some(e(2)));
        assert_eq!(cursor.absolute_index(), Some(0));
    }

    #[test]
    fn test_foreign_entry_rejected() {
        let d = deck();
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::All);
        assert!(matches!(
            cursor.set_current(e(99)),
            Err(DeckError::ForeignEntry(_))
        ));
    }

    #[test]
    fn test_removed_current_moves_to_following_entry() {
        let d = deck();
        for n in 1..=3 {
            add_slide_entry(&d, None, e(n));
        }
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        cursor.set_current(e(2)).unwrap();

        d.remove_entry(e(2)).unwrap();
        assert_eq!(cursor.current(), Some(e(3)));
        assert_eq!(cursor.previous(), Some(e(1)));

        d.remove_entry(e(3)).unwrap();
        assert_eq!(cursor.current(), Some(e(1)));
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn test_released_slide_heading_is_skipped() {
        let d = deck();
        let heading_slide = add_slide_entry(&d, None, e(1));
        add_slide_entry(&d, Some(e(1)), e(2));
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        cursor.set_current(e(1)).unwrap();

        // Entry 1 keeps its child but loses its slide
        d.delete_slide(&heading_slide).unwrap();
        assert_eq!(cursor.current(), Some(e(2)));
        assert_eq!(cursor.absolute_index(), Some(0));
    }

    #[test]
    fn test_absolute_index_and_navigation() {
        let d = deck();
        add_slide_entry(&d, None, e(1));
        add_slide_entry(&d, Some(e(1)), e(2));
        add_slide_entry(&d, Some(e(1)), e(3));
        add_slide_entry(&d, None, e(4));
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);

        assert_eq!(cursor.current(), Some(e(1)));
        assert_eq!(cursor.go_next(), Some(e(2)));
        assert_eq!(cursor.go_next(), Some(e(3)));
        assert_eq!(cursor.absolute_index(), Some(2));
        assert_eq!(cursor.go_next(), Some(e(4)));
        assert_eq!(cursor.go_next(), None);
        assert_eq!(cursor.go_previous(), Some(e(3)));
        assert_eq!(cursor.visited().len(), 4);
    }

    #[test]
    fn test_visited_tracking_can_be_disabled() {
        let d = deck();
        add_slide_entry(&d, None, e(1));
        let second = add_slide_entry(&d, None, e(2));
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        cursor.set_track_visited(false);
        cursor.set_current(e(2)).unwrap();
        assert!(!cursor.has_visited(&second));
        assert_eq!(cursor.visited().len(), 1);
    }

    #[test]
    fn test_property_events_on_move() {
        let d = deck();
        add_slide_entry(&d, None, e(1));
        add_slide_entry(&d, None, e(2));
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            cursor
                .properties()
                .subscribe(move |_, change| seen.lock().push(change.property));
        }
        cursor.set_current(e(2)).unwrap();
        assert_eq!(*seen.lock(), vec!["current", "previous", "next", "absolute_index"]);
    }

    #[test]
    fn test_set_current_lands_on_requested_entry() {
        let d = deck();
        for n in 1..=3 {
            add_slide_entry(&d, None, e(n));
        }
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::SlidesOnly);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            cursor.properties().subscribe(move |_, change| {
                if change.property == "current" {
                    seen.lock().push(change.clone());
                }
            });
        }

        cursor.set_current(e(2)).unwrap();
        assert_eq!(cursor.current(), Some(e(2)));
        assert_eq!(cursor.previous(), Some(e(1)));
        assert_eq!(cursor.next(), Some(e(3)));
        assert_eq!(cursor.absolute_index(), Some(1));

        cursor.set_current(e(3)).unwrap();
        assert_eq!(cursor.current(), Some(e(3)));
        assert_eq!(
            *seen.lock(),
            vec![
                PropertyChange {
                    property: "current",
                    old: PropertyValue::Entry(Some(e(1))),
                    new: PropertyValue::Entry(Some(e(2))),
                },
                PropertyChange {
                    property: "current",
                    old: PropertyValue::Entry(Some(e(2))),
                    new: PropertyValue::Entry(Some(e(3))),
                },
            ]
        );
    }

    #[test]
    fn test_drop_unsubscribes() {
        let d = deck();
        let before = d.toc().changes().listener_count();
        let cursor = TraversalCursor::with_kind(Arc::clone(&d), TraversalFilterKind::All);
        assert_eq!(d.toc().changes().listener_count(), before + 1);
        drop(cursor);
        assert_eq!(d.toc().changes().listener_count(), before);
    }
}
