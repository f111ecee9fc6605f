//! Deck aggregate
//!
//! A deck owns its slides (keyed by a deck-local index), a content overlay, a
//! table of contents and the derived hash→slide index. All slide and content
//! edits go through the deck so these stay consistent:
//! - every hash cited by a member slide's content layers is in the overlay
//! - the hash index holds `h` iff exactly one member slide cites `h`
//!
//! Guards are taken top-down: table of contents, then deck, then slides.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::content::{ContentBlob, ContentPool, ContentStore};
use crate::error::{DeckError, Result};
use crate::ids::{ContentHash, DeckId, EntryId, LayerId, SlideId};
use crate::operation::{ContentRecord, EntryPlacement};
use crate::publisher::{
    ChangePublisher, CollectionChange, Guarded, LockLevel, Permit, PropertyChange, PropertyValue,
    acquire_ordered, set_property,
};
use crate::slide::{Layer, SlideRecord, SlideRef};
use crate::toc::{OutlineEntry, Toc};

bitflags! {
    /// Classification of a deck
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DeckDisposition: u32 {
        /// Received from a remote peer
        const REMOTE = 0x0001;
        /// Whiteboard deck created during the session
        const WHITEBOARD = 0x0002;
        /// Holds student submissions
        const STUDENT_SUBMISSION = 0x0004;
        /// Holds quick poll slides
        const QUICK_POLL = 0x0008;
        /// Holds submissions shown to the class
        const PUBLIC_SUBMISSION = 0x0010;
    }
}

impl From<DeckDisposition> for PropertyValue {
    fn from(v: DeckDisposition) -> Self {
        PropertyValue::Flags(v.bits())
    }
}

/// Guarded fields of a deck
pub struct DeckState {
    pub name: String,
    pub dirty: bool,
    /// ARGB
    pub background: u32,
    pub disposition: DeckDisposition,
    slides: BTreeMap<u32, SlideRef>,
    by_id: HashMap<SlideId, u32>,
    next_index: u32,
    content: ContentStore,
    hash_index: HashMap<ContentHash, SlideId>,
}

impl DeckState {
    /// Member slides in local-index order
    pub fn slides(&self) -> impl Iterator<Item = (&u32, &SlideRef)> {
        self.slides.iter()
    }

    pub fn slide(&self, id: &SlideId) -> Option<&SlideRef> {
        self.by_id.get(id).and_then(|idx| self.slides.get(idx))
    }

    /// Index this deck assigned to slide `id`
    pub fn local_index_of(&self, id: &SlideId) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Unique slide citing `hash`, if exactly one does
    pub fn slide_with_content(&self, hash: &ContentHash) -> Option<SlideId> {
        self.hash_index.get(hash).copied()
    }

    /// Recount the member slides citing `hash` and fix up the overlay and
    /// index accordingly. Returns the count.
    fn reindex(&mut self, hash: &ContentHash) -> usize {
        let mut count = 0;
        let mut sole = None;
        for slide in self.slides.values() {
            if slide.references(hash) {
                count += 1;
                sole = Some(slide.id());
            }
        }
        match (count, sole) {
            (0, _) => {
                self.content.remove(hash);
                self.hash_index.remove(hash);
            }
            (1, Some(id)) => {
                self.hash_index.insert(*hash, id);
            }
            _ => {
                self.hash_index.remove(hash);
            }
        }
        count
    }

    /// Make sure every hash is held by the overlay, pulling shared instances
    /// from the pool or from `source`. Nothing is kept on failure.
    fn stage_content(
        &mut self,
        hashes: &[ContentHash],
        source: Option<&ContentStore>,
    ) -> Result<()> {
        let mut staged = Vec::new();
        for hash in hashes {
            if self.content.contains(hash) {
                continue;
            }
            let found = match self.content.adopt(*hash) {
                Some(blob) => Some(blob),
                None => source
                    .and_then(|s| s.get(hash))
                    .map(|blob| self.content.put(*hash, blob.data().clone())),
            };
            if found.is_none() {
                for h in staged {
                    self.content.remove(&h);
                }
                return Err(DeckError::MissingContent(*hash));
            }
            staged.push(*hash);
        }
        Ok(())
    }
}

/// Value-level picture of a deck for structural comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSnapshot {
    pub name: String,
    pub disposition: DeckDisposition,
    pub background: u32,
    pub slides: Vec<(u32, SlideRecord)>,
    pub content: Vec<ContentHash>,
    pub hash_index: Vec<(ContentHash, SlideId)>,
    pub outline: Vec<OutlineEntry>,
}

/// A slide deck
pub struct Deck {
    id: DeckId,
    toc: Arc<Toc>,
    state: Guarded<DeckState>,
    properties: ChangePublisher<DeckState, PropertyChange>,
    slide_events: ChangePublisher<DeckState, CollectionChange<SlideId>>,
}

impl Deck {
    /// Create an empty deck whose content is shared through `pool`
    pub fn new(pool: Arc<ContentPool>, name: impl Into<String>) -> Self {
        Self::with_id(DeckId::new(), pool, name, DeckDisposition::empty())
    }

    pub fn with_id(
        id: DeckId,
        pool: Arc<ContentPool>,
        name: impl Into<String>,
        disposition: DeckDisposition,
    ) -> Self {
        Self {
            id,
            toc: Arc::new(Toc::new()),
            state: Guarded::new(
                LockLevel::Deck,
                DeckState {
                    name: name.into(),
                    dirty: false,
                    background: 0xFFFF_FFFF,
                    disposition,
                    slides: BTreeMap::new(),
                    by_id: HashMap::new(),
                    next_index: 0,
                    content: ContentStore::new(pool),
                    hash_index: HashMap::new(),
                },
            ),
            properties: ChangePublisher::new(),
            slide_events: ChangePublisher::new(),
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn toc(&self) -> &Arc<Toc> {
        &self.toc
    }

    /// Acquire the deck guard
    pub fn state(&self) -> Permit<'_, DeckState> {
        self.state.acquire()
    }

    /// Scalar-property events for this deck
    pub fn properties(&self) -> &ChangePublisher<DeckState, PropertyChange> {
        &self.properties
    }

    /// Slide collection events; the index is the slide's local index
    pub fn slide_events(&self) -> &ChangePublisher<DeckState, CollectionChange<SlideId>> {
        &self.slide_events
    }

    pub fn name(&self) -> String {
        self.state.acquire().name.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.acquire().dirty
    }

    pub fn disposition(&self) -> DeckDisposition {
        self.state.acquire().disposition
    }

    pub fn set_name(&self, name: impl Into<String>) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "name", |s| &mut s.name, name.into())
    }

    pub fn set_background(&self, argb: u32) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "background", |s| &mut s.background, argb)
    }

    pub fn set_disposition(&self, disposition: DeckDisposition) -> bool {
        let mut state = self.state.acquire();
        set_property(
            &mut *state,
            &self.properties,
            "disposition",
            |s| &mut s.disposition,
            disposition,
        )
    }

    pub fn mark_clean(&self) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "dirty", |s| &mut s.dirty, false)
    }

    fn mark_dirty(&self, state: &mut DeckState) {
        set_property(state, &self.properties, "dirty", |s| &mut s.dirty, true);
    }

    pub fn len(&self) -> usize {
        self.state.acquire().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.acquire().is_empty()
    }

    pub fn contains(&self, id: &SlideId) -> bool {
        self.state.acquire().by_id.contains_key(id)
    }

    pub fn slide(&self, id: &SlideId) -> Option<SlideRef> {
        self.state.acquire().slide(id).cloned()
    }

    /// Index this deck assigned to slide `id`. The same slide may sit at a
    /// different index in another deck.
    pub fn local_index_of(&self, id: &SlideId) -> Option<u32> {
        self.state.acquire().local_index_of(id)
    }

    pub fn slide_at(&self, local_index: u32) -> Option<SlideRef> {
        self.state.acquire().slides.get(&local_index).cloned()
    }

    /// Member slides in local-index order
    pub fn slides(&self) -> Vec<SlideRef> {
        self.state.acquire().slides.values().cloned().collect()
    }

    /// Deck-local content for `hash`
    pub fn content(&self, hash: &ContentHash) -> Option<Arc<ContentBlob>> {
        self.state.acquire().content.get(hash)
    }

    /// Fast lookup of the unique slide citing `hash`. `None` when no slide
    /// or more than one slide cites it; use [`Deck::slides_with_content`]
    /// for the full answer.
    pub fn slide_with_content(&self, hash: &ContentHash) -> Option<SlideId> {
        self.state.acquire().slide_with_content(hash)
    }

    /// Every member slide citing `hash` (full scan)
    pub fn slides_with_content(&self, hash: &ContentHash) -> Vec<SlideId> {
        let state = self.state.acquire();
        state
            .slides
            .values()
            .filter(|s| s.references(hash))
            .map(|s| s.id())
            .collect()
    }

    /// Add or replace a slide, returning its local index.
    ///
    /// Inserting the same instance again is a no-op. Inserting a different
    /// instance with a known id replaces the old one at the same index.
    pub fn insert_slide(&self, slide: SlideRef) -> Result<u32> {
        let mut state = self.state.acquire();
        self.insert_locked(&mut state, slide, None)
    }

    fn insert_locked(
        &self,
        state: &mut DeckState,
        slide: SlideRef,
        source: Option<&ContentStore>,
    ) -> Result<u32> {
        let id = slide.id();
        let replaced = match state.by_id.get(&id).copied() {
            Some(idx) => match state.slides.get(&idx) {
                Some(existing) if Arc::ptr_eq(existing, &slide) => return Ok(idx),
                Some(existing) => Some((idx, Arc::clone(existing))),
                None => None,
            },
            None => None,
        };

        let hashes = slide.content_hashes();
        state.stage_content(&hashes, source)?;

        let (index, change) = match replaced {
            Some((idx, old)) => {
                state.slides.insert(idx, Arc::clone(&slide));
                for hash in old.content_hashes() {
                    state.reindex(&hash);
                }
                debug!("Replaced slide {} at index {} in deck {}", id, idx, self.id);
                (
                    idx,
                    CollectionChange::Set {
                        index: idx as usize,
                        old: id,
                        new: id,
                    },
                )
            }
            None => {
                let idx = state.next_index;
                state.next_index += 1;
                state.slides.insert(idx, Arc::clone(&slide));
                state.by_id.insert(id, idx);
                debug!("Inserted slide {} at index {} in deck {}", id, idx, self.id);
                (
                    idx,
                    CollectionChange::Added {
                        index: idx as usize,
                        item: id,
                    },
                )
            }
        };

        for hash in &hashes {
            state.reindex(hash);
        }
        self.mark_dirty(state);
        self.slide_events.publish(state, &change);
        Ok(index)
    }

    /// Insert a slide shipped by a peer along with the bytes it cites and an
    /// optional table-of-contents placement. On failure the deck and tree are
    /// left as they were; content the overlay already held stays put.
    pub fn insert_shipped_slide(
        &self,
        slide: SlideRef,
        content: &[ContentRecord],
        placement: Option<&EntryPlacement>,
    ) -> Result<u32> {
        let id = slide.id();
        self.toc.edit(|tree| {
            let placed = match placement {
                Some(p) => {
                    tree.check_insert_at_sequence(p.parent, p.sequence, p.entry)?;
                    let wrapped = match p.slide {
                        Some(s) if s == id => Some(Arc::clone(&slide)),
                        other => self.resolve(other)?,
                    };
                    Some((p, wrapped))
                }
                None => None,
            };

            let index = {
                let mut state = self.state.acquire();
                let mut staged = Vec::new();
                for record in content {
                    if !state.content.contains(&record.hash) {
                        state.content.put(record.hash, record.data.clone());
                        staged.push(record.hash);
                    }
                }
                match self.insert_locked(&mut state, Arc::clone(&slide), None) {
                    Ok(index) => index,
                    Err(e) => {
                        for hash in &staged {
                            state.content.remove(hash);
                        }
                        return Err(e);
                    }
                }
            };

            let events = match placed {
                Some((p, wrapped)) => {
                    tree.insert_at_sequence(p.parent, p.sequence, p.entry, wrapped)?
                }
                None => Vec::new(),
            };
            Ok((index, events))
        })
    }

    /// Remove a member slide. Content no longer cited by any remaining slide
    /// is dropped from the overlay; table-of-contents entries wrapping the
    /// slide are released.
    pub fn delete_slide(&self, id: &SlideId) -> Result<SlideRef> {
        self.toc.edit(|tree| {
            let slide = {
                let mut state = self.state.acquire();
                let idx = state.by_id.remove(id).ok_or(DeckError::NotMember(*id))?;
                let slide = state
                    .slides
                    .remove(&idx)
                    .ok_or(DeckError::NotMember(*id))?;
                for hash in slide.content_hashes() {
                    state.reindex(&hash);
                }
                self.mark_dirty(&mut state);
                self.slide_events.publish(
                    &state,
                    &CollectionChange::Removed {
                        index: idx as usize,
                        item: *id,
                    },
                );
                debug!("Deleted slide {} from deck {}", id, self.id);
                slide
            };
            let events = tree.release_slide(id)?;
            Ok((slide, events))
        })
    }

    /// Insert every slide of `other`, in its local-index order. Both deck
    /// guards are held for the whole operation, taken in deck-id order.
    pub fn insert_deck(&self, other: &Deck) -> Result<usize> {
        if std::ptr::eq(self, other) {
            return Ok(0);
        }
        let (mut mine, theirs) =
            acquire_ordered((&self.state, self.id), (&other.state, other.id));
        let incoming: Vec<SlideRef> = theirs.slides.values().cloned().collect();
        for slide in &incoming {
            self.insert_locked(&mut mine, Arc::clone(slide), Some(&theirs.content))?;
        }
        Ok(incoming.len())
    }

    /// Shallow structural copy: the same slides, content instances and table
    /// of contents, with independent scalar attributes and listeners.
    pub fn copy(&self) -> Deck {
        let state = self.state.acquire();
        Deck {
            id: DeckId::new(),
            toc: Arc::clone(&self.toc),
            state: Guarded::new(
                LockLevel::Deck,
                DeckState {
                    name: state.name.clone(),
                    dirty: state.dirty,
                    background: state.background,
                    disposition: state.disposition,
                    slides: state.slides.clone(),
                    by_id: state.by_id.clone(),
                    next_index: state.next_index,
                    content: state.content.clone(),
                    hash_index: state.hash_index.clone(),
                },
            ),
            properties: ChangePublisher::new(),
            slide_events: ChangePublisher::new(),
        }
    }

    /// Stage content in the overlay ahead of the slides that will cite it
    pub fn insert_content(&self, hash: ContentHash, data: Bytes) -> Arc<ContentBlob> {
        self.state.acquire().content.put(hash, data)
    }

    /// Drop content from the overlay. Refused (returns `false`) while any
    /// member slide still cites it.
    pub fn delete_content(&self, hash: &ContentHash) -> bool {
        let mut state = self.state.acquire();
        if state.slides.values().any(|s| s.references(hash)) {
            return false;
        }
        state.hash_index.remove(hash);
        state.content.remove(hash)
    }

    /// Append a content layer to a member slide
    pub fn add_layer(&self, slide: &SlideId, layer: Layer) -> Result<LayerId> {
        let mut state = self.state.acquire();
        let target = state.slide(slide).cloned().ok_or(DeckError::NotMember(*slide))?;
        let hash = layer.content_hash();
        if let Some(h) = hash {
            state.stage_content(&[h], None)?;
        }
        let id = layer.id();
        target.push_content(Arc::new(layer));
        if let Some(h) = hash {
            state.reindex(&h);
        }
        self.mark_dirty(&mut state);
        Ok(id)
    }

    /// Remove a content layer from a member slide
    pub fn remove_layer(&self, slide: &SlideId, layer: LayerId) -> Result<Option<Arc<Layer>>> {
        let mut state = self.state.acquire();
        let target = state.slide(slide).cloned().ok_or(DeckError::NotMember(*slide))?;
        let removed = target.take_content(layer);
        if let Some(h) = removed.as_ref().and_then(|l| l.content_hash()) {
            state.reindex(&h);
        }
        if removed.is_some() {
            self.mark_dirty(&mut state);
        }
        Ok(removed)
    }

    fn resolve(&self, slide: Option<SlideId>) -> Result<Option<SlideRef>> {
        match slide {
            Some(id) => self
                .slide(&id)
                .map(Some)
                .ok_or(DeckError::NotMember(id)),
            None => Ok(None),
        }
    }

    /// Append a table-of-contents entry, optionally wrapping a member slide
    pub fn add_entry(
        &self,
        parent: Option<EntryId>,
        entry: EntryId,
        slide: Option<SlideId>,
    ) -> Result<()> {
        self.toc.edit(|tree| {
            let slide = self.resolve(slide)?;
            Ok(((), tree.add(parent, entry, slide)?))
        })
    }

    /// Insert a table-of-contents entry at an explicit sibling sequence
    pub fn insert_entry_at_sequence(
        &self,
        parent: Option<EntryId>,
        sequence: u64,
        entry: EntryId,
        slide: Option<SlideId>,
    ) -> Result<()> {
        self.toc.edit(|tree| {
            let slide = self.resolve(slide)?;
            Ok(((), tree.insert_at_sequence(parent, sequence, entry, slide)?))
        })
    }

    /// Remove a table-of-contents entry and its subtree
    pub fn remove_entry(&self, entry: EntryId) -> Result<()> {
        self.toc.edit(|tree| Ok(((), tree.remove(entry)?)))
    }

    /// Remove the entry at `sequence` under `parent`, closing the gap
    pub fn remove_entry_by_sequence(&self, parent: Option<EntryId>, sequence: u64) -> Result<()> {
        self.toc
            .edit(|tree| Ok(((), tree.remove_by_sequence(parent, sequence)?)))
    }

    /// Structural picture of the deck
    pub fn snapshot(&self) -> DeckSnapshot {
        self.toc.view(|tree| {
            let state = self.state.acquire();
            let mut content: Vec<ContentHash> = state.content.hashes().copied().collect();
            content.sort();
            let mut hash_index: Vec<(ContentHash, SlideId)> =
                state.hash_index.iter().map(|(h, s)| (*h, *s)).collect();
            hash_index.sort();
            DeckSnapshot {
                name: state.name.clone(),
                disposition: state.disposition,
                background: state.background,
                slides: state
                    .slides
                    .iter()
                    .map(|(idx, slide)| (*idx, slide.record()))
                    .collect(),
                content,
                hash_index,
                outline: tree.outline(),
            }
        })
    }
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::Slide;
    use parking_lot::Mutex;

    const H: ContentHash = ContentHash::from_u128(0xABCD);

    fn deck(pool: &Arc<ContentPool>) -> Deck {
        Deck::new(Arc::clone(pool), "Lecture 1")
    }

    fn plain(title: &str) -> SlideRef {
        Slide::new(SlideId::new(), title).into_ref()
    }

    fn with_image(title: &str, hash: ContentHash) -> SlideRef {
        Slide::new(SlideId::new(), title)
            .with_content(Layer::image(hash, 100, 100))
            .into_ref()
    }

    #[test]
    fn test_insert_assigns_local_indices() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        let a = plain("a");
        let b = plain("b");
        assert_eq!(d.insert_slide(Arc::clone(&a)).unwrap(), 0);
        assert_eq!(d.insert_slide(Arc::clone(&b)).unwrap(), 1);
        assert_eq!(d.local_index_of(&a.id()), Some(0));
        assert_eq!(d.slide_at(1).unwrap().id(), b.id());
        assert!(d.is_dirty());
    }

    #[test]
    fn test_local_index_is_per_deck() {
        let pool = Arc::new(ContentPool::new());
        let a = deck(&pool);
        let b = deck(&pool);
        let s = plain("shared");
        b.insert_slide(plain("b0")).unwrap();
        b.insert_slide(plain("b1")).unwrap();
        a.insert_slide(Arc::clone(&s)).unwrap();

        b.insert_deck(&a).unwrap();
        assert_eq!(a.local_index_of(&s.id()), Some(0));
        assert_eq!(b.local_index_of(&s.id()), Some(2));

        b.delete_slide(&s.id()).unwrap();
        assert_eq!(b.local_index_of(&s.id()), None);
        assert_eq!(a.local_index_of(&s.id()), Some(0));
        assert!(Arc::ptr_eq(&a.slide_at(0).unwrap(), &s));
    }

    #[test]
    fn test_insert_same_instance_is_idempotent() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        let events = Arc::new(Mutex::new(0));
        {
            let events = Arc::clone(&events);
            d.slide_events().subscribe(move |_, _| *events.lock() += 1);
        }
        let a = plain("a");
        d.insert_slide(Arc::clone(&a)).unwrap();
        d.insert_slide(Arc::clone(&a)).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(*events.lock(), 1);
    }

    #[test]
    fn test_insert_different_instance_replaces() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"old image"));
        let old = Slide::new(SlideId::from_u128(1), "v1")
            .with_content(Layer::image(H, 1, 1))
            .into_ref();
        let new = Slide::new(SlideId::from_u128(1), "v2").into_ref();

        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            d.slide_events().subscribe(move |_, e| events.lock().push(e.clone()));
        }

        assert_eq!(d.insert_slide(Arc::clone(&old)).unwrap(), 0);
        assert_eq!(d.insert_slide(Arc::clone(&new)).unwrap(), 0);
        assert_eq!(d.len(), 1);
        assert_eq!(d.slide(&new.id()).unwrap().title(), "v2");
        assert_eq!(d.local_index_of(&new.id()), Some(0));
        // The replacement no longer cites H
        assert!(d.content(&H).is_none());
        assert!(matches!(events.lock()[1], CollectionChange::Set { index: 0, .. }));
    }

    #[test]
    fn test_missing_content_is_rejected() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        let s = with_image("orphan", ContentHash::from_data(b"never stored"));
        assert!(matches!(d.insert_slide(s), Err(DeckError::MissingContent(_))));
        assert!(d.is_empty());
    }

    #[test]
    fn test_delete_scenario() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"only on s2"));
        let s1 = plain("S1");
        let s2 = with_image("S2", H);
        let s3 = plain("S3");
        for s in [&s1, &s2, &s3] {
            d.insert_slide(Arc::clone(s)).unwrap();
        }
        assert_eq!(d.slide_with_content(&H), Some(s2.id()));

        d.delete_slide(&s2.id()).unwrap();

        let remaining: Vec<SlideId> = d.slides().iter().map(|s| s.id()).collect();
        assert_eq!(remaining, vec![s1.id(), s3.id()]);
        assert!(d.content(&H).is_none());
        assert_eq!(d.slide_with_content(&H), None);
    }

    #[test]
    fn test_delete_non_member_fails() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        let stranger = SlideId::new();
        assert!(matches!(
            d.delete_slide(&stranger),
            Err(DeckError::NotMember(id)) if id == stranger
        ));
    }

    #[test]
    fn test_hash_index_tracks_uniqueness() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"logo"));
        let a = with_image("a", H);
        let b = with_image("b", H);

        d.insert_slide(Arc::clone(&a)).unwrap();
        assert_eq!(d.slide_with_content(&H), Some(a.id()));

        d.insert_slide(Arc::clone(&b)).unwrap();
        assert_eq!(d.slide_with_content(&H), None);
        assert_eq!(d.slides_with_content(&H).len(), 2);

        d.delete_slide(&a.id()).unwrap();
        assert_eq!(d.slide_with_content(&H), Some(b.id()));
        assert!(d.content(&H).is_some());
    }

    #[test]
    fn test_layer_edits_keep_index() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"chart"));
        let s = plain("s");
        d.insert_slide(Arc::clone(&s)).unwrap();

        let layer = d.add_layer(&s.id(), Layer::image(H, 5, 5)).unwrap();
        assert_eq!(d.slide_with_content(&H), Some(s.id()));

        assert!(d.remove_layer(&s.id(), layer).unwrap().is_some());
        assert_eq!(d.slide_with_content(&H), None);
        assert!(d.content(&H).is_none());

        assert!(matches!(
            d.add_layer(&SlideId::new(), Layer::text("x")),
            Err(DeckError::NotMember(_))
        ));
    }

    #[test]
    fn test_delete_content_refused_while_cited() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"cited"));
        let s = with_image("s", H);
        d.insert_slide(s).unwrap();
        assert!(!d.delete_content(&H));

        let loose = ContentHash::from_data(b"loose");
        d.insert_content(loose, Bytes::from_static(b"loose"));
        assert!(d.delete_content(&loose));
        assert!(d.content(&loose).is_none());
    }

    #[test]
    fn test_two_decks_share_content_instance() {
        let pool = Arc::new(ContentPool::new());
        let d1 = deck(&pool);
        let d2 = deck(&pool);
        d1.insert_content(H, Bytes::from_static(b"shared pixels"));
        d1.insert_slide(with_image("a", H)).unwrap();
        // d2 never stored the bytes; the live pooled instance is adopted
        d2.insert_slide(with_image("b", H)).unwrap();

        assert!(Arc::ptr_eq(&d1.content(&H).unwrap(), &d2.content(&H).unwrap()));
    }

    #[test]
    fn test_insert_deck_pulls_content_from_source() {
        let pool_a = Arc::new(ContentPool::new());
        let pool_b = Arc::new(ContentPool::new());
        let source = deck(&pool_a);
        let target = deck(&pool_b);
        source.insert_content(H, Bytes::from_static(b"submission ink"));
        source.insert_slide(with_image("a", H)).unwrap();
        source.insert_slide(plain("b")).unwrap();

        assert_eq!(target.insert_deck(&source).unwrap(), 2);
        assert_eq!(target.len(), 2);
        assert_eq!(
            target.content(&H).unwrap().data(),
            &Bytes::from_static(b"submission ink")
        );
        assert_eq!(target.insert_deck(&target).unwrap(), 0);
    }

    #[test]
    fn test_copy_is_shallow() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        d.insert_content(H, Bytes::from_static(b"bg"));
        let s = with_image("s", H);
        d.insert_slide(Arc::clone(&s)).unwrap();

        let c = d.copy();
        assert_ne!(c.id(), d.id());
        assert!(Arc::ptr_eq(&c.slide(&s.id()).unwrap(), &s));
        assert!(Arc::ptr_eq(&c.content(&H).unwrap(), &d.content(&H).unwrap()));
        assert!(Arc::ptr_eq(c.toc(), d.toc()));

        c.set_background(0xFF00_0000);
        c.mark_clean();
        assert_ne!(c.snapshot().background, d.snapshot().background);
        assert!(d.is_dirty());
    }

    #[test]
    fn test_entries_require_membership() {
        let pool = Arc::new(ContentPool::new());
        let d = deck(&pool);
        let s = plain("s");
        let entry = EntryId::new();
        assert!(matches!(
            d.add_entry(None, entry, Some(s.id())),
            Err(DeckError::NotMember(_))
        ));
        d.insert_slide(Arc::clone(&s)).unwrap();
        d.add_entry(None, entry, Some(s.id())).unwrap();
        assert_eq!(d.toc().view(|t| t.entry_for_slide(&s.id())), Some(entry));

        d.delete_slide(&s.id()).unwrap();
        assert!(d.toc().view(|t| t.is_empty()));
    }

    #[test]
    fn test_snapshot_equality() {
        let pool = Arc::new(ContentPool::new());
        let a = deck(&pool);
        let b = deck(&pool);
        let slide_id = SlideId::from_u128(42);
        for d in [&a, &b] {
            d.insert_slide(Slide::new(slide_id, "same").into_ref()).unwrap();
            d.add_entry(None, EntryId::from_u128(1), Some(slide_id)).unwrap();
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
