//! Guards and change notification
//!
//! Every mutable model object keeps its fields behind a [`Guarded`] value and
//! announces changes through one or more [`ChangePublisher`]s. Listeners run
//! synchronously while the publishing object's permit is still held, and they
//! receive the committed state alongside the event so they never need to
//! re-acquire the object they are observing.
//!
//! Guards are not reentrant. Composite operations acquire guards top-down:
//!
//! ```text
//! Toc -> Cursor -> Deck -> Slide -> Layer -> Poll -> Pool
//! ```
//!
//! Debug builds record the levels held by each thread and panic on an
//! out-of-order acquisition. Release builds do not check.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ids::{EntryId, SlideId};

/// Position of a guard in the global acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    Toc,
    Cursor,
    Deck,
    Slide,
    Layer,
    Poll,
    Pool,
}

#[cfg(debug_assertions)]
mod order {
    use super::LockLevel;
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) fn enter(level: LockLevel) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(top) = held.iter().max() {
                assert!(
                    level >= *top,
                    "lock order violation: acquiring {:?} while holding {:?}",
                    level,
                    top
                );
            }
            held.push(level);
        });
    }

    pub(super) fn leave(level: LockLevel) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|l| *l == level) {
                held.remove(pos);
            }
        });
    }
}

#[cfg(not(debug_assertions))]
mod order {
    use super::LockLevel;

    #[inline]
    pub(super) fn enter(_level: LockLevel) {}

    #[inline]
    pub(super) fn leave(_level: LockLevel) {}
}

/// Mutual-exclusion guard around one model object's fields
pub struct Guarded<S> {
    level: LockLevel,
    state: Mutex<S>,
}

impl<S> Guarded<S> {
    /// Wrap `state` in a guard at the given level
    pub fn new(level: LockLevel, state: S) -> Self {
        Self {
            level,
            state: Mutex::new(state),
        }
    }

    /// Level of this guard in the acquisition order
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Acquire the guard. The permit releases it when dropped, including
    /// during unwinding.
    pub fn acquire(&self) -> Permit<'_, S> {
        order::enter(self.level);
        Permit {
            guard: self.state.lock(),
            level: self.level,
        }
    }

    /// Exclusive access without locking, for objects not yet shared
    pub fn get_mut(&mut self) -> &mut S {
        self.state.get_mut()
    }

    /// Consume the guard and return the state
    pub fn into_inner(self) -> S {
        self.state.into_inner()
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Guarded<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Scoped access to a guarded object
pub struct Permit<'a, S> {
    guard: MutexGuard<'a, S>,
    level: LockLevel,
}

impl<S> Deref for Permit<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for Permit<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S> Drop for Permit<'_, S> {
    fn drop(&mut self) {
        order::leave(self.level);
    }
}

/// Acquire two guards of the same level in key order, returning the permits
/// in argument order.
pub fn acquire_ordered<'a, S, K: Ord>(
    first: (&'a Guarded<S>, K),
    second: (&'a Guarded<S>, K),
) -> (Permit<'a, S>, Permit<'a, S>) {
    if first.1 <= second.1 {
        let a = first.0.acquire();
        let b = second.0.acquire();
        (a, b)
    } else {
        let b = second.0.acquire();
        let a = first.0.acquire();
        (a, b)
    }
}

/// Handle returned by [`ChangePublisher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback receiving the committed state and the event
pub type Listener<S, E> = Arc<dyn Fn(&S, &E) + Send + Sync>;

/// Ordered registry of change listeners
pub struct ChangePublisher<S, E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<S, E>)>>,
}

impl<S, E> ChangePublisher<S, E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners fire in registration order.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&S, &E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver an event to every listener. Callers hold the permit that
    /// protects `state`; the registry itself is snapshotted first so
    /// listeners may subscribe or unsubscribe while being called.
    pub fn publish(&self, state: &S, event: &E) {
        let snapshot: Vec<Listener<S, E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(state, event);
        }
    }
}

impl<S, E> Default for ChangePublisher<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Value carried by a scalar property change
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Flags(u32),
    Rect(f32, f32, f32, f32),
    Entry(Option<EntryId>),
    Slide(Option<SlideId>),
    Index(Option<usize>),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float(v as f64)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Option<EntryId>> for PropertyValue {
    fn from(v: Option<EntryId>) -> Self {
        PropertyValue::Entry(v)
    }
}

impl From<Option<SlideId>> for PropertyValue {
    fn from(v: Option<SlideId>) -> Self {
        PropertyValue::Slide(v)
    }
}

impl From<Option<u32>> for PropertyValue {
    fn from(v: Option<u32>) -> Self {
        PropertyValue::Index(v.map(|i| i as usize))
    }
}

impl From<Option<usize>> for PropertyValue {
    fn from(v: Option<usize>) -> Self {
        PropertyValue::Index(v)
    }
}

/// A published scalar field changed
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub property: &'static str,
    pub old: PropertyValue,
    pub new: PropertyValue,
}

/// A guarded collection changed
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    Added { index: usize, item: T },
    Removed { index: usize, item: T },
    Set { index: usize, old: T, new: T },
}

/// Write `value` into the field selected by `field` and publish a
/// [`PropertyChange`] when it differs from the current value.
///
/// Returns whether the field changed.
pub fn set_property<S, T>(
    state: &mut S,
    publisher: &ChangePublisher<S, PropertyChange>,
    property: &'static str,
    field: impl FnOnce(&mut S) -> &mut T,
    value: T,
) -> bool
where
    T: PartialEq + Clone + Into<PropertyValue>,
{
    let slot = field(state);
    if *slot == value {
        return false;
    }
    let old = std::mem::replace(slot, value.clone());
    publisher.publish(
        state,
        &PropertyChange {
            property,
            old: old.into(),
            new: value.into(),
        },
    );
    true
}
