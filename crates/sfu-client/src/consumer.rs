//! Consumer: a remote producer received through a receive transport

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::StatsReport;
use crate::error::{Error, Result};
use crate::events::{ConsumerEvent, EventChannel};
use crate::media_track::MediaTrack;
use crate::rtp::{MediaKind, RtpParameters};
use crate::signaling::AppData;
use crate::transport::TransportInner;

pub(crate) struct ConsumerInit {
    pub id: String,
    pub local_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub track: MediaTrack,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
    pub event_capacity: usize,
}

struct ConsumerInner {
    id: String,
    local_id: String,
    producer_id: String,
    kind: MediaKind,
    track: MediaTrack,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    app_data: AppData,
    transport: Weak<TransportInner>,
    events: EventChannel<ConsumerEvent>,
}

/// Handle to a consumer; clones share state
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub(crate) fn new(init: ConsumerInit, transport: Weak<TransportInner>) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                id: init.id,
                local_id: init.local_id,
                producer_id: init.producer_id,
                kind: init.kind,
                track: init.track,
                rtp_parameters: init.rtp_parameters,
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                app_data: init.app_data,
                transport,
                events: EventChannel::new(init.event_capacity),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Track created by the engine for this stream
    pub fn track(&self) -> &MediaTrack {
        &self.inner.track
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

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
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
            debug!(consumer_id = %self.inner.id, "pause/resume on closed consumer ignored");
            return;
        }

        self.inner.paused.store(paused, Ordering::SeqCst);
        self.inner.track.set_enabled(!paused);

        if let Some(transport) = self.inner.transport.upgrade() {
            let engine = transport.engine.clone();
            let local_ids = vec![self.inner.local_id.clone()];
            if paused {
                transport.queue.push_detached("pause_receiving", async move {
                    engine.pause_receiving(local_ids).await
                });
            } else {
                transport.queue.push_detached("resume_receiving", async move {
                    engine.resume_receiving(local_ids).await
                });
            }
        }

        self.inner.events.emit(if paused {
            ConsumerEvent::Paused
        } else {
            ConsumerEvent::Resumed
        });
    }

    pub async fn get_stats(&self) -> Result<StatsReport> {
        if self.closed() {
            return Err(Error::invalid_state(format!("consumer {} is closed", self.inner.id)));
        }
        let transport = self
            .inner
            .transport
            .upgrade()
            .ok_or_else(|| Error::invalid_state("transport no longer exists"))?;
        transport.engine.receiver_stats(&self.inner.local_id).await
    }

    /// Close the consumer, stop its track and stop receiving
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(consumer_id = %self.inner.id, "closing consumer");

        self.inner.track.stop();
        if let Some(transport) = self.inner.transport.upgrade() {
            transport.consumer_closed(
                &self.inner.id,
                &self.inner.local_id,
                self.inner.kind,
                &self.inner.rtp_parameters,
            );
        }
        self.inner.events.emit(ConsumerEvent::Closed);
    }

    pub(crate) fn transport_closed(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(consumer_id = %self.inner.id, "transport closed, closing consumer");

        self.inner.track.stop();
        self.inner.events.emit(ConsumerEvent::TransportClosed);
    }

    pub(crate) fn track_ended(&self) {
        if self.closed() {
            return;
        }
        debug!(consumer_id = %self.inner.id, "consumer track ended");
        self.inner.events.emit(ConsumerEvent::TrackEnded);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.closed())
            .finish()
    }
}
