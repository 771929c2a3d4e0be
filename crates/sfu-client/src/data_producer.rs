//! Data producer: an outgoing SCTP data channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::{DataChannel, DataPayload};
use crate::error::{Error, Result};
use crate::events::{DataStreamEvent, EventChannel};
use crate::sctp::SctpStreamParameters;
use crate::signaling::AppData;
use crate::transport::TransportInner;

pub(crate) struct DataProducerInit {
    pub id: String,
    pub channel: Arc<dyn DataChannel>,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
    pub app_data: AppData,
    pub event_capacity: usize,
}

struct DataProducerInner {
    id: String,
    channel: Arc<dyn DataChannel>,
    sctp_stream_parameters: SctpStreamParameters,
    label: String,
    protocol: String,
    closed: AtomicBool,
    app_data: AppData,
    transport: Weak<TransportInner>,
    events: EventChannel<DataStreamEvent>,
}

#[derive(Clone)]
pub struct DataProducer {
    inner: Arc<DataProducerInner>,
}

impl DataProducer {
    pub(crate) fn new(init: DataProducerInit, transport: Weak<TransportInner>) -> Self {
        Self {
            inner: Arc::new(DataProducerInner {
                id: init.id,
                channel: init.channel,
                sctp_stream_parameters: init.sctp_stream_parameters,
                label: init.label,
                protocol: init.protocol,
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

    pub fn sctp_stream_parameters(&self) -> &SctpStreamParameters {
        &self.inner.sctp_stream_parameters
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataStreamEvent> {
        self.inner.events.subscribe()
    }

    pub fn buffered_amount(&self) -> u64 {
        self.inner.channel.buffered_amount()
    }

    pub fn send(&self, payload: DataPayload) -> Result<()> {
        if self.closed() {
            return Err(Error::invalid_state(format!("data producer {} is closed", self.inner.id)));
        }
        self.inner.channel.send(payload)
    }

    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(data_producer_id = %self.inner.id, "closing data producer");

        self.inner.channel.close();
        if let Some(transport) = self.inner.transport.upgrade() {
            transport.data_producer_closed(&self.inner.id);
        }
        self.inner.events.emit(DataStreamEvent::Closed);
    }

    pub(crate) fn transport_closed(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.channel.close();
        self.inner.events.emit(DataStreamEvent::TransportClosed);
    }
}

impl std::fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProducer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("closed", &self.closed())
            .finish()
    }
}
