//! Slides and their layers
//!
//! A slide owns two ordered layer lists: content layers (the deck material,
//! possibly citing shared content by hash) and annotation layers (ink, text
//! and polls added during the session). Layers never copy shared bytes; an
//! image layer only carries the [`ContentHash`] of its asset.
//!
//! Content layers of a slide that belongs to a deck are edited through the
//! deck so its hash index stays in step.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::{ContentHash, LayerId, PollId, SlideId};
use crate::publisher::{
    ChangePublisher, CollectionChange, Guarded, LockLevel, Permit, PropertyChange, PropertyValue,
    set_property,
};

bitflags! {
    /// Classification of a slide
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SlideDisposition: u32 {
        /// Received from a remote peer
        const REMOTE = 0x0001;
        /// Submitted by a student
        const STUDENT_SUBMISSION = 0x0002;
        /// Submission shown to the whole class
        const PUBLIC_SUBMISSION = 0x0004;
        /// Blank whiteboard slide
        const WHITEBOARD = 0x0008;
        /// Carries a quick poll
        const QUICK_POLL = 0x0010;
        /// Hidden from navigation
        const HIDDEN = 0x0020;
    }
}

impl From<SlideDisposition> for PropertyValue {
    fn from(v: SlideDisposition) -> Self {
        PropertyValue::Flags(v.bits())
    }
}

/// Slide rectangle in presentation units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 720.0,
            height: 540.0,
        }
    }
}

impl From<Bounds> for PropertyValue {
    fn from(v: Bounds) -> Self {
        PropertyValue::Rect(v.x, v.y, v.width, v.height)
    }
}

/// Immutable part of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    /// Picture backed by shared content
    Image {
        hash: ContentHash,
        width: u32,
        height: u32,
    },
    /// Free text; the text itself is mutable layer state
    Text,
    /// Ink strokes in an opaque encoding owned by the renderer
    Ink { strokes: Bytes },
    /// Quick poll display
    Poll { poll: PollId },
}

impl LayerKind {
    /// Hash of the shared content this layer cites, if any
    pub fn content_hash(&self) -> Option<ContentHash> {
        match self {
            LayerKind::Image { hash, .. } => Some(*hash),
            _ => None,
        }
    }
}

/// Mutable part of a layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerState {
    pub visible: bool,
    pub origin_x: i32,
    pub origin_y: i32,
    pub text: String,
}

impl Default for LayerState {
    fn default() -> Self {
        Self {
            visible: true,
            origin_x: 0,
            origin_y: 0,
            text: String::new(),
        }
    }
}

/// One layer of a slide
pub struct Layer {
    id: LayerId,
    kind: LayerKind,
    state: Guarded<LayerState>,
    properties: ChangePublisher<LayerState, PropertyChange>,
}

impl Layer {
    /// Create a layer with a fresh id
    pub fn new(kind: LayerKind) -> Self {
        Self::with_id(LayerId::new(), kind)
    }

    pub fn with_id(id: LayerId, kind: LayerKind) -> Self {
        Self {
            id,
            kind,
            state: Guarded::new(LockLevel::Layer, LayerState::default()),
            properties: ChangePublisher::new(),
        }
    }

    /// Image layer citing `hash`
    pub fn image(hash: ContentHash, width: u32, height: u32) -> Self {
        Self::new(LayerKind::Image {
            hash,
            width,
            height,
        })
    }

    /// Text layer with initial text
    pub fn text(text: impl Into<String>) -> Self {
        let mut layer = Self::new(LayerKind::Text);
        layer.state.get_mut().text = text.into();
        layer
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn content_hash(&self) -> Option<ContentHash> {
        self.kind.content_hash()
    }

    /// Acquire the layer guard
    pub fn state(&self) -> Permit<'_, LayerState> {
        self.state.acquire()
    }

    /// Scalar-property events for this layer
    pub fn properties(&self) -> &ChangePublisher<LayerState, PropertyChange> {
        &self.properties
    }

    pub fn set_visible(&self, visible: bool) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "visible", |s| &mut s.visible, visible)
    }

    pub fn set_origin(&self, x: i32, y: i32) -> bool {
        let mut state = self.state.acquire();
        let moved_x = set_property(&mut *state, &self.properties, "origin_x", |s| &mut s.origin_x, x);
        let moved_y = set_property(&mut *state, &self.properties, "origin_y", |s| &mut s.origin_y, y);
        moved_x || moved_y
    }

    pub fn set_text(&self, text: impl Into<String>) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "text", |s| &mut s.text, text.into())
    }

    /// Serializable copy of this layer
    pub fn record(&self) -> LayerRecord {
        let state = self.state.acquire();
        LayerRecord {
            id: self.id,
            kind: self.kind.clone(),
            visible: state.visible,
            origin_x: state.origin_x,
            origin_y: state.origin_y,
            text: state.text.clone(),
        }
    }

    /// Rebuild a layer from its record
    pub fn from_record(record: LayerRecord) -> Self {
        let mut layer = Self::with_id(record.id, record.kind);
        *layer.state.get_mut() = LayerState {
            visible: record.visible,
            origin_x: record.origin_x,
            origin_y: record.origin_y,
            text: record.text,
        };
        layer
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Serializable layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: LayerId,
    pub kind: LayerKind,
    pub visible: bool,
    pub origin_x: i32,
    pub origin_y: i32,
    pub text: String,
}

/// Which of a slide's layer lists changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerList {
    Content,
    Annotation,
}

/// Layer list change event
#[derive(Debug, Clone, PartialEq)]
pub struct LayerChange {
    pub list: LayerList,
    pub change: CollectionChange<LayerId>,
}

/// Guarded fields of a slide
pub struct SlideState {
    pub title: String,
    pub zoom: f32,
    pub bounds: Bounds,
    /// ARGB
    pub background: u32,
    pub disposition: SlideDisposition,
    content_layers: Vec<Arc<Layer>>,
    annotation_layers: Vec<Arc<Layer>>,
}

impl SlideState {
    pub fn content_layers(&self) -> &[Arc<Layer>] {
        &self.content_layers
    }

    pub fn annotation_layers(&self) -> &[Arc<Layer>] {
        &self.annotation_layers
    }

    /// Hashes cited by content layers, in layer order (may repeat)
    pub fn content_hashes(&self) -> impl Iterator<Item = ContentHash> + '_ {
        self.content_layers.iter().filter_map(|l| l.content_hash())
    }

    fn list_mut(&mut self, list: LayerList) -> &mut Vec<Arc<Layer>> {
        match list {
            LayerList::Content => &mut self.content_layers,
            LayerList::Annotation => &mut self.annotation_layers,
        }
    }
}

/// Shared handle to a slide
pub type SlideRef = Arc<Slide>;

/// A slide with its layers
pub struct Slide {
    id: SlideId,
    state: Guarded<SlideState>,
    properties: ChangePublisher<SlideState, PropertyChange>,
    layers: ChangePublisher<SlideState, LayerChange>,
}

impl Slide {
    pub fn new(id: SlideId, title: impl Into<String>) -> Self {
        Self {
            id,
            state: Guarded::new(
                LockLevel::Slide,
                SlideState {
                    title: title.into(),
                    zoom: 1.0,
                    bounds: Bounds::default(),
                    background: 0xFFFF_FFFF,
                    disposition: SlideDisposition::empty(),
                    content_layers: Vec::new(),
                    annotation_layers: Vec::new(),
                },
            ),
            properties: ChangePublisher::new(),
            layers: ChangePublisher::new(),
        }
    }

    /// Append a content layer while the slide is still unshared
    pub fn with_content(mut self, layer: Layer) -> Self {
        self.state.get_mut().content_layers.push(Arc::new(layer));
        self
    }

    /// Append an annotation layer while the slide is still unshared
    pub fn with_annotation(mut self, layer: Layer) -> Self {
        self.state.get_mut().annotation_layers.push(Arc::new(layer));
        self
    }

    pub fn with_disposition(mut self, disposition: SlideDisposition) -> Self {
        self.state.get_mut().disposition = disposition;
        self
    }

    /// Finish construction
    pub fn into_ref(self) -> SlideRef {
        Arc::new(self)
    }

    pub fn id(&self) -> SlideId {
        self.id
    }

    /// Acquire the slide guard
    pub fn state(&self) -> Permit<'_, SlideState> {
        self.state.acquire()
    }

    /// Scalar-property events for this slide
    pub fn properties(&self) -> &ChangePublisher<SlideState, PropertyChange> {
        &self.properties
    }

    /// Layer list events for this slide
    pub fn layer_events(&self) -> &ChangePublisher<SlideState, LayerChange> {
        &self.layers
    }

    pub fn title(&self) -> String {
        self.state.acquire().title.clone()
    }

    pub fn disposition(&self) -> SlideDisposition {
        self.state.acquire().disposition
    }

    pub fn set_title(&self, title: impl Into<String>) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "title", |s| &mut s.title, title.into())
    }

    pub fn set_zoom(&self, zoom: f32) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "zoom", |s| &mut s.zoom, zoom)
    }

    pub fn set_bounds(&self, bounds: Bounds) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "bounds", |s| &mut s.bounds, bounds)
    }

    pub fn set_background(&self, argb: u32) -> bool {
        let mut state = self.state.acquire();
        set_property(&mut *state, &self.properties, "background", |s| &mut s.background, argb)
    }

    pub fn set_disposition(&self, disposition: SlideDisposition) -> bool {
        let mut state = self.state.acquire();
        set_property(
            &mut *state,
            &self.properties,
            "disposition",
            |s| &mut s.disposition,
            disposition,
        )
    }

    /// Hashes cited by this slide's content layers, deduplicated
    pub fn content_hashes(&self) -> Vec<ContentHash> {
        let state = self.state.acquire();
        let mut hashes: Vec<ContentHash> = state.content_hashes().collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    /// Whether any content layer cites `hash`
    pub fn references(&self, hash: &ContentHash) -> bool {
        self.state.acquire().content_hashes().any(|h| h == *hash)
    }

    pub fn content_layers(&self) -> Vec<Arc<Layer>> {
        self.state.acquire().content_layers.clone()
    }

    pub fn annotation_layers(&self) -> Vec<Arc<Layer>> {
        self.state.acquire().annotation_layers.clone()
    }

    /// Append an annotation layer, returning its index
    pub fn add_annotation(&self, layer: Layer) -> usize {
        self.push_layer(LayerList::Annotation, Arc::new(layer))
    }

    /// Remove an annotation layer by id
    pub fn remove_annotation(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.take_layer(LayerList::Annotation, id)
    }

    pub(crate) fn push_content(&self, layer: Arc<Layer>) -> usize {
        self.push_layer(LayerList::Content, layer)
    }

    pub(crate) fn take_content(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.take_layer(LayerList::Content, id)
    }

    fn push_layer(&self, list: LayerList, layer: Arc<Layer>) -> usize {
        let mut state = self.state.acquire();
        let id = layer.id();
        let layers = state.list_mut(list);
        layers.push(layer);
        let index = layers.len() - 1;
        self.layers.publish(
            &state,
            &LayerChange {
                list,
                change: CollectionChange::Added { index, item: id },
            },
        );
        index
    }

    fn take_layer(&self, list: LayerList, id: LayerId) -> Option<Arc<Layer>> {
        let mut state = self.state.acquire();
        let layers = state.list_mut(list);
        let index = layers.iter().position(|l| l.id() == id)?;
        let layer = layers.remove(index);
        self.layers.publish(
            &state,
            &LayerChange {
                list,
                change: CollectionChange::Removed { index, item: id },
            },
        );
        Some(layer)
    }

    /// Serializable copy of this slide (the deck-scoped index is not included)
    pub fn record(&self) -> SlideRecord {
        let state = self.state.acquire();
        SlideRecord {
            id: self.id,
            title: state.title.clone(),
            zoom: state.zoom,
            bounds: state.bounds,
            background: state.background,
            disposition: state.disposition,
            content_layers: state.content_layers.iter().map(|l| l.record()).collect(),
            annotation_layers: state.annotation_layers.iter().map(|l| l.record()).collect(),
        }
    }

    /// Rebuild a slide from its record
    pub fn from_record(record: SlideRecord) -> Self {
        let mut slide = Self::new(record.id, record.title);
        let state = slide.state.get_mut();
        state.zoom = record.zoom;
        state.bounds = record.bounds;
        state.background = record.background;
        state.disposition = record.disposition;
        state.content_layers = record
            .content_layers
            .into_iter()
            .map(|r| Arc::new(Layer::from_record(r)))
            .collect();
        state.annotation_layers = record
            .annotation_layers
            .into_iter()
            .map(|r| Arc::new(Layer::from_record(r)))
            .collect();
        slide
    }
}

impl std::fmt::Debug for Slide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slide").field("id", &self.id).finish()
    }
}

/// Serializable slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideRecord {
    pub id: SlideId,
    pub title: String,
    pub zoom: f32,
    pub bounds: Bounds,
    pub background: u32,
    pub disposition: SlideDisposition,
    pub content_layers: Vec<LayerRecord>,
    pub annotation_layers: Vec<LayerRecord>,
}
