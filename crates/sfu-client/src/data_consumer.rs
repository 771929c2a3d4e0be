//! Data consumer: an incoming SCTP data channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::DataChannel;
use crate::events::{DataStreamEvent, EventChannel};
use crate::sctp::SctpStreamParameters;
use crate::signaling::AppData;
use crate::transport::TransportInner;

pub(crate) struct DataConsumerInit {
    pub id: String,
    pub data_producer_id: String,
    pub channel: Arc<dyn DataChannel>,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
    pub app_data: AppData,
    pub event_capacity: usize,
}

struct DataConsumerInner {
    id: String,
    data_producer_id: String,
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
pub struct DataConsumer {
    inner: Arc<DataConsumerInner>,
}

impl DataConsumer {
    pub(crate) fn new(init: DataConsumerInit, transport: Weak<TransportInner>) -> Self {
        Self {
            inner: Arc::new(DataConsumerInner {
                id: init.id,
                data_producer_id: init.data_producer_id,
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

    pub fn data_producer_id(&self) -> &str {
        &self.inner.data_producer_id
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

    /// The engine's channel, for reading incoming messages
    pub fn channel(&self) -> Arc<dyn DataChannel> {
        self.inner.channel.clone()
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

    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(data_consumer_id = %self.inner.id, "closing data consumer");

        self.inner.channel.close();
        if let Some(transport) = self.inner.transport.upgrade() {
            transport.data_consumer_closed(&self.inner.id);
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

impl std::fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConsumer")
            .field("id", &self.inner.id)
            .field("data_producer_id", &self.inner.data_producer_id)
            .field("closed", &self.closed())
            .finish()
    }
}
