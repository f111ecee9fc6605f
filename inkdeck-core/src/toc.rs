//! Table-of-contents tree
//!
//! An ordered n-ary tree of navigable entries, stored as an arena keyed by
//! [`EntryId`]. Parents are back-references by id, so entries can be detached
//! and reattached without ownership cycles.
//!
//! Each entry caches `slide_count`, the number of slide-bearing entries in its
//! subtree (itself included). Every structural edit adjusts the counts along
//! the ancestor chain; reads never walk the subtree.
//!
//! Entries inserted by a remote peer carry a `sequence`: their position among
//! siblings. Locally appended entries have none. A remote entry whose parent
//! has not arrived yet is parked and adopted once the parent shows up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DeckError, Result};
use crate::ids::{EntryId, SlideId};
use crate::publisher::{
    ChangePublisher, CollectionChange, Guarded, LockLevel, PropertyChange, PropertyValue,
};
use crate::slide::SlideRef;

/// A node of the tree
pub struct EntryNode {
    id: EntryId,
    slide: Option<SlideRef>,
    parent: Option<EntryId>,
    awaiting: Option<EntryId>,
    children: Vec<EntryId>,
    sequence: Option<u64>,
    slide_count: usize,
}

impl EntryNode {
    fn new(id: EntryId, slide: Option<SlideRef>, sequence: Option<u64>) -> Self {
        let slide_count = usize::from(slide.is_some());
        Self {
            id,
            slide,
            parent: None,
            awaiting: None,
            children: Vec::new(),
            sequence,
            slide_count,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn slide(&self) -> Option<&SlideRef> {
        self.slide.as_ref()
    }

    pub fn slide_id(&self) -> Option<SlideId> {
        self.slide.as_ref().map(|s| s.id())
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Sibling position assigned by a remote peer; `None` when unassigned
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Slide-bearing entries in this subtree, this entry included
    pub fn slide_count(&self) -> usize {
        self.slide_count
    }

    /// Waiting for a parent that has not arrived yet
    pub fn is_pending(&self) -> bool {
        self.awaiting.is_some()
    }
}

impl std::fmt::Debug for EntryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryNode")
            .field("id", &self.id)
            .field("slide", &self.slide_id())
            .field("parent", &self.parent)
            .field("sequence", &self.sequence)
            .field("slide_count", &self.slide_count)
            .finish()
    }
}

/// Tree change event
#[derive(Debug, Clone, PartialEq)]
pub enum TocChange {
    /// A child list (or the root list when `parent` is `None`) changed
    Children {
        parent: Option<EntryId>,
        change: CollectionChange<EntryId>,
    },
    /// A scalar field of an entry changed (`sequence` or `slide`)
    Property {
        entry: EntryId,
        change: PropertyChange,
    },
    /// An entry arrived before its parent
    Parked { entry: EntryId, awaiting: EntryId },
    /// Entries that left the tree, subtree root first
    Detached { entries: Vec<EntryId> },
}

/// One line of a pre-order listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub id: EntryId,
    pub slide: Option<SlideId>,
    pub depth: usize,
    pub sequence: Option<u64>,
}

/// Arena-backed table of contents
#[derive(Default)]
pub struct TocTree {
    nodes: HashMap<EntryId, EntryNode>,
    roots: Vec<EntryId>,
    by_slide: HashMap<SlideId, Vec<EntryId>>,
    pending: HashMap<EntryId, Vec<EntryId>>,
}

impl TocTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntryId) -> Option<&EntryNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn roots(&self) -> &[EntryId] {
        &self.roots
    }

    /// Number of entries, pending ones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Slide-bearing entries reachable from the roots
    pub fn total_slides(&self) -> usize {
        self.roots
            .iter()
            .filter_map(|r| self.nodes.get(r))
            .map(|n| n.slide_count)
            .sum()
    }

    /// First entry wrapping `slide`
    pub fn entry_for_slide(&self, slide: &SlideId) -> Option<EntryId> {
        self.by_slide.get(slide).and_then(|ids| ids.first().copied())
    }

    /// Entries parked while waiting for `parent`
    pub fn pending_for(&self, parent: &EntryId) -> &[EntryId] {
        self.pending.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    fn siblings(&self, parent: Option<EntryId>) -> Option<&Vec<EntryId>> {
        match parent {
            None => Some(&self.roots),
            Some(p) => self.nodes.get(&p).map(|n| &n.children),
        }
    }

    fn siblings_mut(&mut self, parent: Option<EntryId>) -> Option<&mut Vec<EntryId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(p) => self.nodes.get_mut(&p).map(|n| &mut n.children),
        }
    }

    fn check_new(&self, id: EntryId, parent: Option<EntryId>) -> Result<()> {
        if parent == Some(id) {
            return Err(DeckError::CyclicEntry(id));
        }
        match self.nodes.get(&id) {
            Some(existing) => {
                let claimed = existing.parent.or(existing.awaiting);
                if claimed != parent {
                    Err(DeckError::AlreadyParented {
                        entry: id,
                        parent: claimed,
                    })
                } else {
                    Err(DeckError::DuplicateEntry(id))
                }
            }
            None => Ok(()),
        }
    }

    fn register(&mut self, node: EntryNode) {
        if let Some(slide) = node.slide_id() {
            self.by_slide.entry(slide).or_default().push(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    fn adjust_counts(&mut self, from: Option<EntryId>, delta: isize) {
        let mut cur = from;
        while let Some(id) = cur {
            match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.slide_count = node.slide_count.saturating_add_signed(delta);
                    cur = node.parent;
                }
                None => break,
            }
        }
    }

    /// Link an already registered node into `parent`'s child list
    fn attach(&mut self, id: EntryId, parent: Option<EntryId>, index: usize) -> Result<TocChange> {
        let count = {
            let node = self.nodes.get_mut(&id).ok_or(DeckError::UnknownEntry(id))?;
            node.parent = parent;
            node.awaiting = None;
            node.slide_count
        };
        let siblings = match self.siblings_mut(parent) {
            Some(s) => s,
            None => return Err(DeckError::UnknownEntry(parent.unwrap_or(id))),
        };
        let index = index.min(siblings.len());
        siblings.insert(index, id);
        self.adjust_counts(parent, count as isize);
        Ok(TocChange::Children {
            parent,
            change: CollectionChange::Added { index, item: id },
        })
    }

    fn sequence_event(entry: EntryId, old: u64, new: u64) -> TocChange {
        TocChange::Property {
            entry,
            change: PropertyChange {
                property: "sequence",
                old: PropertyValue::Int(old as i64),
                new: PropertyValue::Int(new as i64),
            },
        }
    }

    /// Fail when shifting siblings at or past `sequence` would push one
    /// past `u64::MAX`
    fn check_shift_up(&self, parent: Option<EntryId>, sequence: u64) -> Result<()> {
        let saturated = self.siblings(parent).is_some_and(|siblings| {
            siblings.iter().any(|c| {
                self.nodes
                    .get(c)
                    .and_then(|n| n.sequence)
                    .is_some_and(|s| s.checked_add(1).is_none())
            })
        });
        if saturated {
            return Err(DeckError::SequenceOverflow { parent, sequence });
        }
        Ok(())
    }

    /// Move every sibling at or past `sequence` up by one. Callers run
    /// [`Self::check_shift_up`] first.
    fn shift_up(&mut self, parent: Option<EntryId>, sequence: u64) -> Vec<TocChange> {
        let siblings = self.siblings(parent).cloned().unwrap_or_default();
        let mut events = Vec::new();
        for sibling in siblings {
            if let Some(node) = self.nodes.get_mut(&sibling) {
                if let Some(seq) = node.sequence.filter(|s| *s >= sequence) {
                    let shifted = seq.saturating_add(1);
                    node.sequence = Some(shifted);
                    events.push(Self::sequence_event(sibling, seq, shifted));
                }
            }
        }
        events
    }

    /// Move every sibling past `sequence` down by one
    fn shift_down(&mut self, parent: Option<EntryId>, sequence: u64) -> Vec<TocChange> {
        let siblings = self.siblings(parent).cloned().unwrap_or_default();
        let mut events = Vec::new();
        for sibling in siblings {
            if let Some(node) = self.nodes.get_mut(&sibling) {
                if let Some(seq) = node.sequence.filter(|s| *s > sequence) {
                    node.sequence = Some(seq - 1);
                    events.push(Self::sequence_event(sibling, seq, seq - 1));
                }
            }
        }
        events
    }

    /// Child-list index for a new entry at `sequence`: before the first
    /// sibling with a greater sequence, or at the end.
    fn position_for(&self, parent: Option<EntryId>, sequence: u64) -> usize {
        let siblings = match self.siblings(parent) {
            Some(s) => s,
            None => return 0,
        };
        siblings
            .iter()
            .position(|c| {
                self.nodes
                    .get(c)
                    .and_then(|n| n.sequence)
                    .is_some_and(|s| s > sequence)
            })
            .unwrap_or(siblings.len())
    }

    /// True when `id` is `root` or one of its attached descendants
    fn is_within(&self, id: EntryId, root: EntryId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == root {
                return true;
            }
            cur = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }

    /// Attach entries that were waiting for `parent`
    fn adopt(&mut self, parent: EntryId) -> Result<Vec<TocChange>> {
        let waiting = match self.pending.remove(&parent) {
            Some(w) => w,
            None => return Ok(Vec::new()),
        };
        let mut events = Vec::new();
        for child in waiting {
            let sequence = match self.nodes.get(&child) {
                Some(node) => node.sequence,
                None => continue,
            };
            if self.is_within(parent, child) {
                // The parent sits inside the parked subtree; stay parked
                self.pending.entry(parent).or_default().push(child);
                debug!("Entry {} left parked: {} is its descendant", child, parent);
                continue;
            }
            if let Some(seq) = sequence {
                if self.check_shift_up(Some(parent), seq).is_err() {
                    self.pending.entry(parent).or_default().push(child);
                    debug!("Entry {} left parked: sequence {} overflows under {}", child, seq, parent);
                    continue;
                }
            }
            let index = match sequence {
                Some(seq) => {
                    events.extend(self.shift_up(Some(parent), seq));
                    self.position_for(Some(parent), seq)
                }
                None => self.siblings(Some(parent)).map_or(0, Vec::len),
            };
            events.push(self.attach(child, Some(parent), index)?);
            debug!("Adopted parked entry {} under {}", child, parent);
        }
        Ok(events)
    }

    /// Append an entry without a sequence
    pub(crate) fn add(
        &mut self,
        parent: Option<EntryId>,
        id: EntryId,
        slide: Option<SlideRef>,
    ) -> Result<Vec<TocChange>> {
        self.check_new(id, parent)?;
        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                return Err(DeckError::UnknownEntry(p));
            }
        }
        self.register(EntryNode::new(id, slide, None));
        let index = self.siblings(parent).map_or(0, Vec::len);
        let mut events = vec![self.attach(id, parent, index)?];
        events.extend(self.adopt(id)?);
        Ok(events)
    }

    /// Fail exactly when [`Self::insert_at_sequence`] would, without
    /// touching the tree
    pub(crate) fn check_insert_at_sequence(
        &self,
        parent: Option<EntryId>,
        sequence: u64,
        id: EntryId,
    ) -> Result<()> {
        self.check_new(id, parent)?;
        match parent {
            Some(p) if !self.nodes.contains_key(&p) => Ok(()),
            _ => self.check_shift_up(parent, sequence),
        }
    }

    /// Insert an entry at an explicit sibling sequence. Siblings already at
    /// or past `sequence` shift up by one. An unknown parent parks the entry.
    pub(crate) fn insert_at_sequence(
        &mut self,
        parent: Option<EntryId>,
        sequence: u64,
        id: EntryId,
        slide: Option<SlideRef>,
    ) -> Result<Vec<TocChange>> {
        self.check_insert_at_sequence(parent, sequence, id)?;
        let mut node = EntryNode::new(id, slide, Some(sequence));

        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                node.awaiting = Some(p);
                self.register(node);
                self.pending.entry(p).or_default().push(id);
                debug!("Parked entry {} until {} arrives", id, p);
                let mut events = vec![TocChange::Parked {
                    entry: id,
                    awaiting: p,
                }];
                events.extend(self.adopt(id)?);
                return Ok(events);
            }
        }

        self.register(node);
        let mut events = self.shift_up(parent, sequence);
        let index = self.position_for(parent, sequence);
        events.push(self.attach(id, parent, index)?);
        events.extend(self.adopt(id)?);
        Ok(events)
    }

    /// Remove an entry and its subtree
    pub(crate) fn remove(&mut self, id: EntryId) -> Result<Vec<TocChange>> {
        let (parent, awaiting, count) = match self.nodes.get(&id) {
            Some(node) => (node.parent, node.awaiting, node.slide_count),
            None => return Err(DeckError::UnknownEntry(id)),
        };
        let mut events = Vec::new();

        if let Some(waiting_for) = awaiting {
            if let Some(list) = self.pending.get_mut(&waiting_for) {
                list.retain(|c| *c != id);
                if list.is_empty() {
                    self.pending.remove(&waiting_for);
                }
            }
        } else {
            if let Some(siblings) = self.siblings_mut(parent) {
                if let Some(index) = siblings.iter().position(|c| *c == id) {
                    siblings.remove(index);
                    events.push(TocChange::Children {
                        parent,
                        change: CollectionChange::Removed { index, item: id },
                    });
                }
            }
            self.adjust_counts(parent, -(count as isize));
        }

        let entries = self.unregister_subtree(id);
        debug!("Removed {} entries rooted at {}", entries.len(), id);
        events.push(TocChange::Detached { entries });
        Ok(events)
    }

    /// Remove the sibling at `sequence` and close the gap it leaves
    pub(crate) fn remove_by_sequence(
        &mut self,
        parent: Option<EntryId>,
        sequence: u64,
    ) -> Result<Vec<TocChange>> {
        let siblings = self
            .siblings(parent)
            .ok_or(DeckError::NoSuchSequence { parent, sequence })?;
        let target = siblings
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).and_then(|n| n.sequence) == Some(sequence))
            .ok_or(DeckError::NoSuchSequence { parent, sequence })?;
        let mut events = self.remove(target)?;
        events.extend(self.shift_down(parent, sequence));
        Ok(events)
    }

    /// Drop every reference to `slide`. Leaf entries go away entirely; entries
    /// with children stay as plain headings.
    pub(crate) fn release_slide(&mut self, slide: &SlideId) -> Result<Vec<TocChange>> {
        let entries = self.by_slide.remove(slide).unwrap_or_default();
        let mut events = Vec::new();
        for id in entries {
            let (has_children, parent) = match self.nodes.get(&id) {
                Some(node) => (!node.children.is_empty(), node.parent),
                None => continue,
            };
            if !has_children {
                events.extend(self.remove(id)?);
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.slide = None;
                node.slide_count -= 1;
            }
            self.adjust_counts(parent, -1);
            events.push(TocChange::Property {
                entry: id,
                change: PropertyChange {
                    property: "slide",
                    old: PropertyValue::Slide(Some(*slide)),
                    new: PropertyValue::Slide(None),
                },
            });
        }
        Ok(events)
    }

    fn unregister_subtree(&mut self, root: EntryId) -> Vec<EntryId> {
        let mut removed = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = match self.nodes.remove(&id) {
                Some(n) => n,
                None => continue,
            };
            if let Some(slide) = node.slide_id() {
                if let Some(ids) = self.by_slide.get_mut(&slide) {
                    ids.retain(|e| *e != id);
                    if ids.is_empty() {
                        self.by_slide.remove(&slide);
                    }
                }
            }
            stack.extend(node.children.iter().rev().copied());
            removed.push(id);
        }
        removed
    }

    /// Pre-order successor, ignoring any filter
    pub fn next_preorder(&self, id: EntryId) -> Option<EntryId> {
        let node = self.nodes.get(&id)?;
        if let Some(first) = node.children.first() {
            return Some(*first);
        }
        self.next_skipping_children(id)
    }

    /// Next entry in pre-order that is not inside `id`'s subtree
    fn next_skipping_children(&self, id: EntryId) -> Option<EntryId> {
        let mut cur = id;
        loop {
            let node = self.nodes.get(&cur)?;
            if node.awaiting.is_some() {
                return None;
            }
            let siblings = self.siblings(node.parent)?;
            if let Some(pos) = siblings.iter().position(|c| *c == cur) {
                if let Some(next) = siblings.get(pos + 1) {
                    return Some(*next);
                }
            }
            cur = node.parent?;
        }
    }

    /// Pre-order predecessor, ignoring any filter. An entry that is not (yet)
    /// in its parent's child list has no previous sibling.
    pub fn prev_preorder(&self, id: EntryId) -> Option<EntryId> {
        let node = self.nodes.get(&id)?;
        if node.awaiting.is_some() {
            return None;
        }
        let siblings = self.siblings(node.parent)?;
        match siblings.iter().position(|c| *c == id) {
            Some(pos) if pos > 0 => Some(self.deepest_last(siblings[pos - 1])),
            _ => node.parent,
        }
    }

    fn deepest_last(&self, id: EntryId) -> EntryId {
        let mut cur = id;
        while let Some(last) = self.nodes.get(&cur).and_then(|n| n.children.last()) {
            cur = *last;
        }
        cur
    }

    /// First accepted entry at or after `start` in pre-order
    pub fn find_from(
        &self,
        start: Option<EntryId>,
        accept: &dyn Fn(&EntryNode) -> bool,
    ) -> Option<EntryId> {
        let mut cur = start;
        while let Some(id) = cur {
            let node = self.nodes.get(&id)?;
            if accept(node) {
                return Some(id);
            }
            cur = self.next_preorder(id);
        }
        None
    }

    /// First accepted entry at or before `start` in pre-order
    pub fn find_back_from(
        &self,
        start: Option<EntryId>,
        accept: &dyn Fn(&EntryNode) -> bool,
    ) -> Option<EntryId> {
        let mut cur = start;
        while let Some(id) = cur {
            let node = self.nodes.get(&id)?;
            if accept(node) {
                return Some(id);
            }
            cur = self.prev_preorder(id);
        }
        None
    }

    /// First accepted entry of the whole tree
    pub fn find_first(&self, accept: &dyn Fn(&EntryNode) -> bool) -> Option<EntryId> {
        self.find_from(self.roots.first().copied(), accept)
    }

    /// Next accepted entry after `id`
    pub fn find_next(&self, id: EntryId, accept: &dyn Fn(&EntryNode) -> bool) -> Option<EntryId> {
        self.find_from(self.next_preorder(id), accept)
    }

    /// Previous accepted entry before `id`
    pub fn find_previous(
        &self,
        id: EntryId,
        accept: &dyn Fn(&EntryNode) -> bool,
    ) -> Option<EntryId> {
        self.find_back_from(self.prev_preorder(id), accept)
    }

    /// Entry now occupying a position that was just vacated, or the next one
    /// in pre-order after it
    pub fn after_gap(&self, parent: Option<EntryId>, index: usize) -> Option<EntryId> {
        let siblings = self.siblings(parent)?;
        match siblings.get(index) {
            Some(id) => Some(*id),
            None => self.next_skipping_children(parent?),
        }
    }

    /// Pre-order predecessor of a vacated position
    pub fn before_gap(&self, parent: Option<EntryId>, index: usize) -> Option<EntryId> {
        let siblings = self.siblings(parent)?;
        if index > 0 {
            siblings.get(index - 1).map(|id| self.deepest_last(*id))
        } else {
            parent
        }
    }

    /// Number of slide-bearing entries before `id` in pre-order, computed
    /// from the cached subtree counts. `None` for unknown or parked entries.
    pub fn absolute_index(&self, id: EntryId) -> Option<usize> {
        let mut index = 0;
        let mut cur = id;
        loop {
            let node = self.nodes.get(&cur)?;
            if node.awaiting.is_some() {
                return None;
            }
            let siblings = self.siblings(node.parent)?;
            let pos = siblings.iter().position(|c| *c == cur)?;
            index += siblings[..pos]
                .iter()
                .filter_map(|s| self.nodes.get(s))
                .map(|n| n.slide_count)
                .sum::<usize>();
            match node.parent {
                Some(p) => {
                    if self.nodes.get(&p).is_some_and(|n| n.slide.is_some()) {
                        index += 1;
                    }
                    cur = p;
                }
                None => return Some(index),
            }
        }
    }

    /// Entries reachable from the roots, in pre-order
    pub fn preorder(&self) -> Vec<EntryId> {
        self.outline().into_iter().map(|o| o.id).collect()
    }

    /// Pre-order listing with depths
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(EntryId, usize)> = self.roots.iter().rev().map(|r| (*r, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                out.push(OutlineEntry {
                    id,
                    slide: node.slide_id(),
                    depth,
                    sequence: node.sequence,
                });
                stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
            }
        }
        out
    }
}

/// Guarded, observable table of contents
pub struct Toc {
    tree: Guarded<TocTree>,
    changes: ChangePublisher<TocTree, TocChange>,
}

impl Toc {
    pub fn new() -> Self {
        Self {
            tree: Guarded::new(LockLevel::Toc, TocTree::new()),
            changes: ChangePublisher::new(),
        }
    }

    /// Structural change events
    pub fn changes(&self) -> &ChangePublisher<TocTree, TocChange> {
        &self.changes
    }

    /// Read the tree under its guard
    pub fn view<R>(&self, f: impl FnOnce(&TocTree) -> R) -> R {
        let tree = self.tree.acquire();
        f(&tree)
    }

    /// Apply an edit under the guard, then publish its events in order
    pub(crate) fn edit<R>(
        &self,
        f: impl FnOnce(&mut TocTree) -> Result<(R, Vec<TocChange>)>,
    ) -> Result<R> {
        let mut tree = self.tree.acquire();
        let (result, events) = f(&mut tree)?;
        for event in &events {
            self.changes.publish(&tree, event);
        }
        Ok(result)
    }
}

impl Default for Toc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::Slide;

    fn slide() -> Option<SlideRef> {
        Some(Slide::new(SlideId::new(), "s").into_ref())
    }

    fn all(_: &EntryNode) -> bool {
        true
    }

    fn sequences(tree: &TocTree, parent: Option<EntryId>) -> Vec<(EntryId, Option<u64>)> {
        tree.siblings(parent)
            .unwrap()
            .iter()
            .map(|id| (*id, tree.get(id).unwrap().sequence()))
            .collect()
    }

    #[test]
    fn test_add_appends_unassigned() {
        let mut tree = TocTree::new();
        let a = EntryId::new();
        let b = EntryId::new();
        tree.add(None, a, slide()).unwrap();
        tree.add(None, b, None).unwrap();

        assert_eq!(tree.roots(), &[a, b]);
        assert_eq!(tree.get(&a).unwrap().sequence(), None);
        assert_eq!(tree.total_slides(), 1);
    }

    #[test]
    fn test_insert_at_sequence_shifts_trailing() {
        let mut tree = TocTree::new();
        let ids: Vec<EntryId> = (0..3).map(|_| EntryId::new()).collect();
        for (seq, id) in ids.iter().enumerate() {
            tree.insert_at_sequence(None, seq as u64, *id, slide()).unwrap();
        }

        let x = EntryId::new();
        tree.insert_at_sequence(None, 1, x, slide()).unwrap();

        assert_eq!(
            sequences(&tree, None),
            vec![
                (ids[0], Some(0)),
                (x, Some(1)),
                (ids[1], Some(2)),
                (ids[2], Some(3)),
            ]
        );
    }

    #[test]
    fn test_remove_by_sequence_shifts_down() {
        let mut tree = TocTree::new();
        let ids: Vec<EntryId> = (0..4).map(|_| EntryId::new()).collect();
        for (seq, id) in ids.iter().enumerate() {
            tree.insert_at_sequence(None, seq as u64, *id, slide()).unwrap();
        }

        tree.remove_by_sequence(None, 1).unwrap();
        assert_eq!(
            sequences(&tree, None),
            vec![(ids[0], Some(0)), (ids[2], Some(1)), (ids[3], Some(2))]
        );
        assert!(matches!(
            tree.remove_by_sequence(None, 7),
            Err(DeckError::NoSuchSequence { sequence: 7, .. })
        ));
    }

    #[test]
    fn test_slide_counts_follow_edits() {
        let mut tree = TocTree::new();
        let section = EntryId::new();
        let child = EntryId::new();
        let grandchild = EntryId::new();
        tree.add(None, section, None).unwrap();
        tree.add(Some(section), child, slide()).unwrap();
        tree.add(Some(child), grandchild, slide()).unwrap();

        assert_eq!(tree.get(&section).unwrap().slide_count(), 2);
        assert_eq!(tree.get(&child).unwrap().slide_count(), 2);

        tree.remove(grandchild).unwrap();
        assert_eq!(tree.get(&section).unwrap().slide_count(), 1);
        assert_eq!(tree.total_slides(), 1);
    }

    #[test]
    fn test_remove_drops_subtree_and_index() {
        let mut tree = TocTree::new();
        let parent = EntryId::new();
        let child = EntryId::new();
        let s = slide();
        let slide_id = s.as_ref().unwrap().id();
        tree.add(None, parent, None).unwrap();
        tree.add(Some(parent), child, s).unwrap();
        assert_eq!(tree.entry_for_slide(&slide_id), Some(child));

        let events = tree.remove(parent).unwrap();
        assert!(events.contains(&TocChange::Detached {
            entries: vec![parent, child]
        }));
        assert!(tree.is_empty());
        assert_eq!(tree.entry_for_slide(&slide_id), None);
    }

    #[test]
    fn test_reinserting_under_other_parent_is_rejected() {
        let mut tree = TocTree::new();
        let a = EntryId::new();
        let b = EntryId::new();
        let c = EntryId::new();
        tree.add(None, a, None).unwrap();
        tree.add(None, b, None).unwrap();
        tree.add(Some(a), c, None).unwrap();

        assert!(matches!(
            tree.add(Some(b), c, None),
            Err(DeckError::AlreadyParented { parent: Some(p), .. }) if p == a
        ));
        assert!(matches!(
            tree.add(Some(a), c, None),
            Err(DeckError::DuplicateEntry(_))
        ));
        assert!(matches!(
            tree.add(Some(EntryId::new()), EntryId::new(), None),
            Err(DeckError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_preorder_walks() {
        // a
        // ├─ a1
        // │  └─ a1x
        // └─ a2
        // b
        let mut tree = TocTree::new();
        let [a, a1, a1x, a2, b] = [(); 5].map(|_| EntryId::new());
        tree.add(None, a, None).unwrap();
        tree.add(Some(a), a1, None).unwrap();
        tree.add(Some(a1), a1x, None).unwrap();
        tree.add(Some(a), a2, None).unwrap();
        tree.add(None, b, None).unwrap();

        assert_eq!(tree.preorder(), vec![a, a1, a1x, a2, b]);
        assert_eq!(tree.next_preorder(a1x), Some(a2));
        assert_eq!(tree.next_preorder(a2), Some(b));
        assert_eq!(tree.next_preorder(b), None);
        assert_eq!(tree.prev_preorder(b), Some(a2));
        assert_eq!(tree.prev_preorder(a2), Some(a1x));
        assert_eq!(tree.prev_preorder(a1), Some(a));
        assert_eq!(tree.prev_preorder(a), None);
        assert_eq!(tree.find_previous(b, &all), Some(a2));
    }

    #[test]
    fn test_filtered_walks_skip_rejected() {
        let mut tree = TocTree::new();
        let [a, b, c] = [(); 3].map(|_| EntryId::new());
        tree.add(None, a, None).unwrap();
        tree.add(None, b, None).unwrap();
        tree.add(None, c, None).unwrap();

        let not_b = move |n: &EntryNode| n.id() != b;
        assert_eq!(tree.find_next(a, &not_b), Some(c));
        assert_eq!(tree.find_previous(c, &not_b), Some(a));
        assert_eq!(tree.find_previous(a, &not_b), None);
        assert_eq!(tree.find_next(c, &not_b), None);
    }

    #[test]
    fn test_absolute_index_uses_counts() {
        let mut tree = TocTree::new();
        let [s1, sec, s2, s3, s4] = [(); 5].map(|_| EntryId::new());
        tree.add(None, s1, slide()).unwrap();
        tree.add(None, sec, None).unwrap();
        tree.add(Some(sec), s2, slide()).unwrap();
        tree.add(Some(sec), s3, slide()).unwrap();
        tree.add(None, s4, slide()).unwrap();

        assert_eq!(tree.absolute_index(s1), Some(0));
        assert_eq!(tree.absolute_index(sec), Some(1));
        assert_eq!(tree.absolute_index(s2), Some(1));
        assert_eq!(tree.absolute_index(s3), Some(2));
        assert_eq!(tree.absolute_index(s4), Some(3));
    }

    #[test]
    fn test_parked_entry_is_adopted() {
        let mut tree = TocTree::new();
        let parent = EntryId::new();
        let early = EntryId::new();

        let events = tree
            .insert_at_sequence(Some(parent), 0, early, slide())
            .unwrap();
        assert_eq!(
            events,
            vec![TocChange::Parked {
                entry: early,
                awaiting: parent
            }]
        );
        assert!(tree.get(&early).unwrap().is_pending());
        assert_eq!(tree.prev_preorder(early), None);
        assert_eq!(tree.next_preorder(early), None);
        assert_eq!(tree.absolute_index(early), None);
        assert_eq!(tree.total_slides(), 0);

        tree.insert_at_sequence(None, 0, parent, None).unwrap();
        let node = tree.get(&early).unwrap();
        assert!(!node.is_pending());
        assert_eq!(node.parent(), Some(parent));
        assert_eq!(tree.get(&parent).unwrap().slide_count(), 1);
        assert!(tree.pending_for(&parent).is_empty());
    }

    #[test]
    fn test_release_slide_keeps_headings() {
        let mut tree = TocTree::new();
        let heading = EntryId::new();
        let leaf = EntryId::new();
        let s = Slide::new(SlideId::new(), "shared").into_ref();
        tree.add(None, heading, Some(s.clone())).unwrap();
        tree.add(Some(heading), leaf, slide()).unwrap();
        let other = EntryId::new();
        tree.add(None, other, Some(s.clone())).unwrap();

        tree.release_slide(&s.id()).unwrap();
        assert!(tree.contains(&heading));
        assert!(tree.get(&heading).unwrap().slide().is_none());
        assert_eq!(tree.get(&heading).unwrap().slide_count(), 1);
        assert!(!tree.contains(&other));
        assert_eq!(tree.entry_for_slide(&s.id()), None);
    }

    #[test]
    fn test_gap_helpers() {
        let mut tree = TocTree::new();
        let [a, b, c] = [(); 3].map(|_| EntryId::new());
        tree.add(None, a, None).unwrap();
        tree.add(None, b, None).unwrap();
        tree.add(None, c, None).unwrap();
        tree.remove(b).unwrap();

        assert_eq!(tree.after_gap(None, 1), Some(c));
        assert_eq!(tree.before_gap(None, 1), Some(a));
        tree.remove(c).unwrap();
        assert_eq!(tree.after_gap(None, 1), None);
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let mut tree = TocTree::new();
        let x = EntryId::new();
        assert!(matches!(
            tree.insert_at_sequence(Some(x), 0, x, None),
            Err(DeckError::CyclicEntry(_))
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_parked_entry_never_adopts_its_descendant() {
        let mut tree = TocTree::new();
        let (x, y) = (EntryId::new(), EntryId::new());
        // x waits for y, then y arrives underneath x
        tree.insert_at_sequence(Some(y), 0, x, None).unwrap();
        tree.insert_at_sequence(Some(x), 0, y, None).unwrap();

        assert!(tree.get(&x).unwrap().is_pending());
        assert_eq!(tree.get(&y).unwrap().parent(), Some(x));
        assert_eq!(tree.pending_for(&y), &[x]);
        assert_eq!(tree.next_preorder(y), None);
        assert_eq!(tree.absolute_index(y), None);
    }

    #[test]
    fn test_sequence_overflow_is_rejected_before_insert() {
        let mut tree = TocTree::new();
        let (top, low) = (EntryId::new(), EntryId::new());
        tree.insert_at_sequence(None, u64::MAX, top, None).unwrap();

        let err = tree.insert_at_sequence(None, 0, low, None).unwrap_err();
        assert!(matches!(err, DeckError::SequenceOverflow { parent: None, sequence: 0 }));
        assert!(!tree.contains(&low));
        assert_eq!(tree.get(&top).unwrap().sequence(), Some(u64::MAX));
        assert_eq!(tree.roots(), &[top]);

        // Appending without a sequence never shifts
        tree.add(None, low, None).unwrap();
        assert_eq!(tree.roots(), &[top, low]);
    }

    #[test]
    fn test_parked_entry_stays_parked_on_sequence_overflow() {
        let mut tree = TocTree::new();
        let (parent, top, low) = (EntryId::new(), EntryId::new(), EntryId::new());
        tree.insert_at_sequence(Some(parent), u64::MAX, top, None).unwrap();
        tree.insert_at_sequence(Some(parent), 0, low, None).unwrap();

        tree.add(None, parent, None).unwrap();
        assert_eq!(tree.get(&parent).unwrap().children(), &[top]);
        assert_eq!(tree.get(&top).unwrap().sequence(), Some(u64::MAX));
        assert!(tree.get(&low).unwrap().is_pending());
        assert_eq!(tree.pending_for(&parent), &[low]);
    }

    #[test]
    fn test_toc_publishes_after_commit() {
        let toc = Toc::new();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = std::sync::Arc::clone(&seen);
            toc.changes().subscribe(move |tree, change| {
                if let TocChange::Children { change: CollectionChange::Added { item, .. }, .. } = change {
                    seen.lock().push(tree.contains(item));
                }
            });
        }
        let id = EntryId::new();
        toc.edit(|tree| Ok(((), tree.add(None, id, None)?))).unwrap();
        assert_eq!(*seen.lock(), vec![true]);
        assert_eq!(toc.view(|tree| tree.len()), 1);
    }
}
