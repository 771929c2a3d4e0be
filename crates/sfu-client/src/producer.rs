//! Producer: a local track sent to the server
//!
//! # State
//!
//! ```text
//! open(paused | resumed) --close()------------> closed   (emits Closed)
//!        \______________ transport.close() ---> closed   (emits TransportClosed)
//! ```
//!
//! Pause and resume are local and synchronous: they flip the `paused` flag,
//! optionally disable the track and, when configured to, deactivate the
//! sender's encodings in the background. Telling the server about the pause
//! is the application's business.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::engine::{EncodingParametersUpdate, StatsReport};
use crate::error::{Error, Result};
use crate::events::{EventChannel, ProducerEvent};
use crate::media_track::MediaTrack;
use crate::rtp::{MediaKind, RtpParameters};
use crate::scalability::ScalabilityModeGrammar;
use crate::signaling::AppData;
use crate::transport::TransportInner;

pub(crate) struct ProducerInit {
    pub id: String,
    pub local_id: String,
    pub kind: MediaKind,
    pub track: MediaTrack,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub stop_tracks: bool,
    pub disable_track_on_pause: bool,
    pub zero_rtp_on_pause: bool,
    pub app_data: AppData,
    pub grammar: ScalabilityModeGrammar,
    pub event_capacity: usize,
}

struct ProducerInner {
    id: String,
    local_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    track: Mutex<Option<MediaTrack>>,
    paused: AtomicBool,
    closed: AtomicBool,
    max_spatial_layer: Mutex<Option<u8>>,
    stop_tracks: bool,
    disable_track_on_pause: bool,
    zero_rtp_on_pause: bool,
    app_data: AppData,
    grammar: ScalabilityModeGrammar,
    transport: Weak<TransportInner>,
    events: EventChannel<ProducerEvent>,
}

/// Handle to a producer; clones share state
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    pub(crate) fn new(init: ProducerInit, transport: Weak<TransportInner>) -> Self {
        if init.paused && init.disable_track_on_pause {
            init.track.set_enabled(false);
        }

        Self {
            inner: Arc::new(ProducerInner {
                id: init.id,
                local_id: init.local_id,
                kind: init.kind,
                rtp_parameters: init.rtp_parameters,
                track: Mutex::new(Some(init.track)),
                paused: AtomicBool::new(init.paused),
                closed: AtomicBool::new(false),
                max_spatial_layer: Mutex::new(None),
                stop_tracks: init.stop_tracks,
                disable_track_on_pause: init.disable_track_on_pause,
                zero_rtp_on_pause: init.zero_rtp_on_pause,
                app_data: init.app_data,
                grammar: init.grammar,
                transport,
                events: EventChannel::new(init.event_capacity),
            }),
        }
    }

    /// Server-assigned id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Engine-local id of the sender
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn track(&self) -> Option<MediaTrack> {
        self.inner.track.lock().clone()
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn max_spatial_layer(&self) -> Option<u8> {
        *self.inner.max_spatial_layer.lock()
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProducerEvent> {
        self.inner.events.subscribe()
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    fn set_paused(&self, paused: bool) {
        if self.closed() {
            debug!(producer_id = %self.inner.id, "pause/resume on closed producer ignored");
            return;
        }

        self.inner.paused.store(paused, Ordering::SeqCst);

        if self.inner.disable_track_on_pause {
            if let Some(track) = self.inner.track.lock().as_ref() {
                track.set_enabled(!paused);
            }
        }

        if self.inner.zero_rtp_on_pause {
            if let Some(transport) = self.inner.transport.upgrade() {
                let engine = transport.engine.clone();
                let local_id = self.inner.local_id.clone();
                transport.queue.push_detached("set_encodings_active", async move {
                    engine.set_encodings_active(&local_id, !paused).await
                });
            }
        }

        self.inner.events.emit(if paused {
            ProducerEvent::Paused
        } else {
            ProducerEvent::Resumed
        });
    }

    /// Swap the sent track, keeping the paused state
    ///
    /// Passing the current track only re-applies the enabled state. The
    /// previous track is stopped when the producer stops its tracks.
    pub async fn replace_track(&self, track: Option<MediaTrack>) -> Result<()> {
        self.ensure_open()?;
        if track.as_ref().map_or(false, MediaTrack::is_ended) {
            return Err(Error::invalid_state("track ended"));
        }

        let current = self.track();
        let unchanged = match (&current, &track) {
            (Some(current), Some(new)) => current.same_as(new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            self.sync_track_enabled(track.as_ref());
            return Ok(());
        }

        let transport = self.transport()?;
        let engine = transport.engine.clone();
        let local_id = self.inner.local_id.clone();
        let new_track = track.clone();
        transport
            .queue
            .push("replace_track", async move { engine.replace_track(&local_id, new_track).await })
            .await?;

        if self.closed() {
            if let Some(track) = &track {
                if self.inner.stop_tracks {
                    track.stop();
                }
            }
            return Err(Error::invalid_state("producer closed while replacing its track"));
        }

        let previous = std::mem::replace(&mut *self.inner.track.lock(), track.clone());
        if self.inner.stop_tracks {
            if let Some(previous) = previous {
                previous.stop();
            }
        }
        self.sync_track_enabled(track.as_ref());

        Ok(())
    }

    fn sync_track_enabled(&self, track: Option<&MediaTrack>) {
        if let Some(track) = track {
            if self.inner.disable_track_on_pause {
                track.set_enabled(!self.paused());
            }
        }
    }

    /// Limit sending to spatial layers `0..=spatial_layer`
    pub async fn set_max_spatial_layer(&self, spatial_layer: u8) -> Result<()> {
        self.ensure_open()?;
        if self.inner.kind == MediaKind::Audio {
            return Err(Error::unsupported("not a video producer"));
        }

        let layers = self.spatial_layer_count();
        if usize::from(spatial_layer) >= layers {
            return Err(Error::invalid_argument(format!(
                "spatial layer {} out of range (producer has {})",
                spatial_layer, layers
            )));
        }
        if self.max_spatial_layer() == Some(spatial_layer) {
            return Ok(());
        }

        let transport = self.transport()?;
        let engine = transport.engine.clone();
        let local_id = self.inner.local_id.clone();
        transport
            .queue
            .push("set_max_spatial_layer", async move {
                engine.set_max_spatial_layer(&local_id, spatial_layer).await
            })
            .await?;

        *self.inner.max_spatial_layer.lock() = Some(spatial_layer);
        Ok(())
    }

    /// Spatial layers: one per simulcast encoding, or those of an SVC mode
    fn spatial_layer_count(&self) -> usize {
        let encodings = &self.inner.rtp_parameters.encodings;
        let svc_layers = encodings
            .first()
            .map(|e| self.inner.grammar.parse(e.scalability_mode.as_deref()).spatial_layers)
            .unwrap_or(1);
        encodings.len().max(svc_layers as usize)
    }

    pub async fn set_rtp_encoding_parameters(&self, update: EncodingParametersUpdate) -> Result<()> {
        self.ensure_open()?;

        let transport = self.transport()?;
        let engine = transport.engine.clone();
        let local_id = self.inner.local_id.clone();
        transport
            .queue
            .push("set_rtp_encoding_parameters", async move {
                engine.set_rtp_encoding_parameters(&local_id, update).await
            })
            .await
    }

    pub async fn get_stats(&self) -> Result<StatsReport> {
        self.ensure_open()?;
        let transport = self.transport()?;
        transport.engine.sender_stats(&self.inner.local_id).await
    }

    /// Close the producer and stop sending
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(producer_id = %self.inner.id, "closing producer");

        self.stop_track_if_owned();
        if let Some(transport) = self.inner.transport.upgrade() {
            transport.producer_closed(&self.inner.id, &self.inner.local_id);
        }
        self.inner.events.emit(ProducerEvent::Closed);
    }

    pub(crate) fn transport_closed(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(producer_id = %self.inner.id, "transport closed, closing producer");

        self.stop_track_if_owned();
        self.inner.events.emit(ProducerEvent::TransportClosed);
    }

    pub(crate) fn track_ended(&self) {
        if self.closed() {
            return;
        }
        warn!(producer_id = %self.inner.id, "producer track ended");
        self.inner.events.emit(ProducerEvent::TrackEnded);
    }

    fn stop_track_if_owned(&self) {
        if self.inner.stop_tracks {
            if let Some(track) = self.inner.track.lock().as_ref() {
                track.stop();
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed() {
            return Err(Error::invalid_state(format!("producer {} is closed", self.inner.id)));
        }
        Ok(())
    }

    fn transport(&self) -> Result<Arc<TransportInner>> {
        self.inner
            .transport
            .upgrade()
            .ok_or_else(|| Error::invalid_state("transport no longer exists"))
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("paused", &self.paused())
            .field("closed", &self.closed())
            .finish()
    }
}
