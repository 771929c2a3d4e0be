//! Handle to a local or remote media track
//!
//! A [`MediaTrack`] is a cheap, cloneable handle. The producer owning a send
//! track toggles `enabled` on pause/resume and stops it on close; the engine
//! creates the tracks handed out by consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::rtp::MediaKind;

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// Shared handle to a media track
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// New live, enabled track with a random id
    pub fn new(kind: MediaKind) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// End the track; ended tracks cannot be produced or swapped in
    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same underlying track
    pub fn same_as(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
