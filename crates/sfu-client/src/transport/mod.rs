//! Transports: one engine connection to the media server
//!
//! A [`Transport`] is created by a loaded [`Device`](crate::Device) in one
//! [`TransportDirection`]. It owns:
//!
//! - the engine instance and the task draining its [`EngineEvent`]s
//! - the [`OperationQueue`] every mutating operation goes through
//! - the id -> handle maps of the producers / consumers / data producers /
//!   data consumers it created
//! - for Plan-B engines, the [`RemoteSdp`] it synthesizes
//!
//! # Lifecycle
//!
//! ```text
//! New -> Connecting -> Connected/Completed <-> Disconnected -> Failed
//!   \__________________________ close() ___________________> Closed
//! ```
//!
//! Only the engine moves the connection state, except for `close()`, which
//! forces `Closed`. After that, engine notifications are dropped.
//!
//! The DTLS handshake is started lazily by the first operation that needs it
//! and is attempted exactly once; its outcome is shared by every later
//! operation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, OnceCell};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::connectivity::{DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceServer};
use crate::consumer::Consumer;
use crate::data_consumer::DataConsumer;
use crate::data_producer::DataProducer;
use crate::engine::{EngineEvent, EngineFactory, EngineOptions, EngineVariant, MediaEngine, StatsReport};
use crate::error::{Error, Result};
use crate::events::{ConnectionState, EventChannel, IceGatheringState, TransportEvent};
use crate::producer::Producer;
use crate::queue::OperationQueue;
use crate::rtp::{ExtendedRtpCapabilities, MediaKind, RtpParameters};
use crate::sctp::SctpParameters;
use crate::sdp::RemoteSdp;
use crate::signaling::{AppData, SignalingChannel};

mod recv;
mod send;

pub use recv::{ConsumerOptions, DataConsumerOptions};
pub use send::{DataProducerOptions, ProducerCodecOptions, ProducerOptions};

use recv::ConsumeBatch;

/// Direction of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportDirection {
    Send,
    Recv,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Recv => write!(f, "recv"),
        }
    }
}

/// Server-side transport parameters handed to `create_*_transport`
///
/// Deserializes from the JSON the server returns when it creates its side of
/// the transport.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Option<IceParameters>,
    pub ice_candidates: Option<Vec<IceCandidate>>,
    pub dtls_parameters: Option<DtlsParameters>,
    pub sctp_parameters: Option<SctpParameters>,
    pub ice_servers: Vec<IceServer>,
    pub app_data: Option<Value>,
}

#[derive(Debug, Clone, Copy)]
struct TransportStates {
    connection: ConnectionState,
    ice_gathering: IceGatheringState,
}

/// Everything a transport needs, resolved and validated by the device
pub(crate) struct TransportInit {
    pub id: String,
    pub direction: TransportDirection,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    pub sctp_parameters: Option<SctpParameters>,
    pub ice_servers: Vec<IceServer>,
    pub app_data: AppData,
    pub extended: Arc<ExtendedRtpCapabilities>,
    pub config: DeviceConfig,
}

pub(crate) struct TransportInner {
    pub(crate) id: String,
    pub(crate) direction: TransportDirection,
    pub(crate) variant: EngineVariant,
    closed: AtomicBool,
    states: Mutex<TransportStates>,
    app_data: AppData,
    pub(crate) queue: OperationQueue,
    pub(crate) engine: Arc<dyn MediaEngine>,
    signaling: Arc<dyn SignalingChannel>,
    pub(crate) extended: Arc<ExtendedRtpCapabilities>,
    pub(crate) remote_sdp: Option<Mutex<RemoteSdp>>,
    sctp_parameters: Option<SctpParameters>,
    remote_dtls_role: DtlsRole,
    connected: OnceCell<Result<()>>,
    data_stream_ids: Mutex<BTreeSet<u16>>,
    pub(crate) producers: DashMap<String, Producer>,
    pub(crate) consumers: DashMap<String, Consumer>,
    pub(crate) data_producers: DashMap<String, DataProducer>,
    pub(crate) data_consumers: DashMap<String, DataConsumer>,
    consume_batch: Mutex<ConsumeBatch>,
    pub(crate) config: DeviceConfig,
    events: EventChannel<TransportEvent>,
}

/// Handle to a send or receive transport
///
/// Cloning is cheap; all clones refer to the same transport.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub(crate) fn new(
        init: TransportInit,
        factory: &dyn EngineFactory,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::invalid_state("transports require a tokio runtime"))?;

        let queue = OperationQueue::new(format!("transport-{}", init.id))?;
        let variant = factory.variant();
        let (engine, engine_events) = factory.create(EngineOptions {
            direction: init.direction,
            ice_parameters: init.ice_parameters.clone(),
            ice_candidates: init.ice_candidates.clone(),
            dtls_parameters: init.dtls_parameters.clone(),
            sctp_parameters: init.sctp_parameters,
            ice_servers: init.ice_servers,
            extended_rtp_capabilities: init.extended.clone(),
        })?;

        let remote_dtls_role = init.dtls_parameters.role;
        let remote_sdp = variant.needs_remote_sdp().then(|| {
            Mutex::new(RemoteSdp::new(
                init.ice_parameters,
                init.ice_candidates,
                init.dtls_parameters,
                init.sctp_parameters,
            ))
        });

        let capacity = init.config.event_channel_capacity;

        let inner = Arc::new(TransportInner {
            id: init.id,
            direction: init.direction,
            variant,
            closed: AtomicBool::new(false),
            states: Mutex::new(TransportStates {
                connection: ConnectionState::New,
                ice_gathering: IceGatheringState::New,
            }),
            app_data: init.app_data,
            queue,
            engine,
            signaling,
            extended: init.extended,
            remote_sdp,
            sctp_parameters: init.sctp_parameters,
            remote_dtls_role,
            connected: OnceCell::new(),
            data_stream_ids: Mutex::new(BTreeSet::new()),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            data_producers: DashMap::new(),
            data_consumers: DashMap::new(),
            consume_batch: Mutex::new(ConsumeBatch::default()),
            config: init.config,
            events: EventChannel::new(capacity),
        });

        handle.spawn(pump_engine_events(Arc::downgrade(&inner), engine_events));

        info!(
            transport_id = %inner.id,
            direction = %inner.direction,
            variant = %variant,
            "transport created"
        );

        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn direction(&self) -> TransportDirection {
        self.inner.direction
    }

    pub fn closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.states.lock().connection
    }

    pub fn ice_gathering_state(&self) -> IceGatheringState {
        self.inner.states.lock().ice_gathering
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn engine_variant(&self) -> EngineVariant {
        self.inner.variant
    }

    /// Subscribe to connection, gathering and close events
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Operations queued or running on this transport
    pub fn pending_operations(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn producer(&self, id: &str) -> Option<Producer> {
        self.inner.producers.get(id).map(|p| p.value().clone())
    }

    pub fn consumer(&self, id: &str) -> Option<Consumer> {
        self.inner.consumers.get(id).map(|c| c.value().clone())
    }

    pub fn data_producer(&self, id: &str) -> Option<DataProducer> {
        self.inner.data_producers.get(id).map(|p| p.value().clone())
    }

    pub fn data_consumer(&self, id: &str) -> Option<DataConsumer> {
        self.inner.data_consumers.get(id).map(|c| c.value().clone())
    }

    /// Serialized remote description (Plan-B engines only)
    pub fn remote_description(&self) -> Option<String> {
        self.inner.remote_sdp.as_ref().map(|sdp| sdp.lock().serialize())
    }

    /// Restart ICE with new remote ICE parameters
    pub async fn restart_ice(&self, ice_parameters: IceParameters) -> Result<()> {
        self.inner.ensure_open()?;
        if ice_parameters.username_fragment.is_empty() || ice_parameters.password.is_empty() {
            return Err(Error::invalid_argument("missing iceParameters"));
        }

        let inner = self.inner.clone();
        self.inner
            .queue
            .push("restart_ice", async move {
                let remote_description = inner.remote_sdp.as_ref().map(|sdp| {
                    let mut sdp = sdp.lock();
                    sdp.update_ice_parameters(ice_parameters.clone());
                    sdp.serialize()
                });
                inner.engine.restart_ice(ice_parameters, remote_description).await
            })
            .await
    }

    /// Replace the STUN/TURN servers used by the engine
    pub async fn update_ice_servers(&self, ice_servers: Vec<IceServer>) -> Result<()> {
        self.inner.ensure_open()?;
        if ice_servers.iter().any(|server| server.urls.is_empty()) {
            return Err(Error::invalid_argument("ICE server without urls"));
        }

        let engine = self.inner.engine.clone();
        self.inner
            .queue
            .push("update_ice_servers", async move { engine.update_ice_servers(ice_servers).await })
            .await
    }

    pub async fn get_stats(&self) -> Result<StatsReport> {
        self.inner.ensure_open()?;
        self.inner.engine.transport_stats().await
    }

    /// Close the transport and every entity it owns
    ///
    /// Owned entities are notified with a transport-closed event; entities
    /// that were already closed are not. Calling it again does nothing.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl TransportInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::invalid_state(format!("transport {} is closed", self.id)));
        }
        Ok(())
    }

    fn ensure_direction(&self, direction: TransportDirection, operation: &str) -> Result<()> {
        if self.direction != direction {
            return Err(Error::unsupported(format!(
                "{}() is not supported on a {} transport",
                operation, self.direction
            )));
        }
        Ok(())
    }

    fn sctp_parameters(&self) -> Result<SctpParameters> {
        self.sctp_parameters
            .ok_or_else(|| Error::unsupported("SCTP is not enabled on this transport"))
    }

    /// Run the DTLS handshake once; later calls get the cached outcome
    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        self.connected
            .get_or_init(|| async { self.connect().await })
            .await
            .clone()
    }

    async fn connect(&self) -> Result<()> {
        let local_role = self.remote_dtls_role.local_counterpart();
        debug!(transport_id = %self.id, role = %local_role, "connecting transport");

        let dtls_parameters = self.engine.local_dtls_parameters(local_role).await?;

        if let Some(sdp) = &self.remote_sdp {
            sdp.lock().update_dtls_role(local_role.local_counterpart());
        }

        match self.signaling.connect(&self.id, dtls_parameters).await {
            Ok(()) => {
                info!(transport_id = %self.id, "transport connected");
                Ok(())
            }
            Err(err) => {
                warn!(transport_id = %self.id, error = %err, "transport connect failed");
                Err(err)
            }
        }
    }

    fn handle_engine_event(&self, event: EngineEvent) {
        if self.is_closed() {
            warn!(transport_id = %self.id, ?event, "dropping engine notification on closed transport");
            return;
        }

        match event {
            EngineEvent::ConnectionStateChange(state) => {
                let changed = {
                    let mut states = self.states.lock();
                    std::mem::replace(&mut states.connection, state) != state
                };
                if changed {
                    debug!(transport_id = %self.id, %state, "connection state changed");
                    self.events.emit(TransportEvent::ConnectionStateChange(state));
                }
            }
            EngineEvent::IceGatheringStateChange(state) => {
                let changed = {
                    let mut states = self.states.lock();
                    std::mem::replace(&mut states.ice_gathering, state) != state
                };
                if changed {
                    debug!(transport_id = %self.id, %state, "ICE gathering state changed");
                    self.events.emit(TransportEvent::IceGatheringStateChange(state));
                }
            }
            EngineEvent::TrackEnded { local_id } => {
                let producer = self
                    .producers
                    .iter()
                    .find(|p| p.value().local_id() == local_id)
                    .map(|p| p.value().clone());
                if let Some(producer) = producer {
                    producer.track_ended();
                    return;
                }

                let consumer = self
                    .consumers
                    .iter()
                    .find(|c| c.value().local_id() == local_id)
                    .map(|c| c.value().clone());
                match consumer {
                    Some(consumer) => consumer.track_ended(),
                    None => warn!(transport_id = %self.id, %local_id, "track ended for unknown local id"),
                }
            }
        }
    }

    /// A producer closed itself: forget it and stop its sender
    pub(crate) fn producer_closed(&self, id: &str, local_id: &str) {
        self.producers.remove(id);
        if self.is_closed() {
            return;
        }

        let engine = self.engine.clone();
        let local_id = local_id.to_string();
        self.queue
            .push_detached("stop_sending", async move { engine.stop_sending(&local_id).await });
    }

    /// A consumer closed itself: forget it and stop its receiver
    pub(crate) fn consumer_closed(
        self: &Arc<Self>,
        id: &str,
        local_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) {
        self.consumers.remove(id);
        if self.is_closed() {
            return;
        }

        let inner = self.clone();
        let local_id = local_id.to_string();
        let rtp_parameters = rtp_parameters.clone();
        self.queue.push_detached("stop_receiving", async move {
            let remote_description = inner.remote_sdp.as_ref().map(|sdp| {
                let mut sdp = sdp.lock();
                sdp.stop_receiving(kind.as_str(), &rtp_parameters);
                sdp.serialize()
            });
            inner
                .engine
                .stop_receiving(vec![local_id], remote_description)
                .await
        });
    }

    pub(crate) fn data_producer_closed(&self, id: &str) {
        if let Some((_, data_producer)) = self.data_producers.remove(id) {
            if let Some(stream_id) = data_producer.sctp_stream_parameters().stream_id {
                self.release_data_stream_id(stream_id);
            }
        }
    }

    /// Take the lowest SCTP stream id below `limit` that no open data
    /// producer holds
    pub(crate) fn reserve_data_stream_id(&self, limit: u16) -> Result<u16> {
        let mut used = self.data_stream_ids.lock();
        let stream_id = (0..limit)
            .find(|candidate| !used.contains(candidate))
            .ok_or_else(|| Error::invalid_state("no SCTP stream id available"))?;
        used.insert(stream_id);
        Ok(stream_id)
    }

    pub(crate) fn release_data_stream_id(&self, stream_id: u16) {
        self.data_stream_ids.lock().remove(&stream_id);
    }

    pub(crate) fn data_consumer_closed(&self, id: &str) {
        self.data_consumers.remove(id);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(transport_id = %self.id, "closing transport");

        let producers = drain(&self.producers);
        let consumers = drain(&self.consumers);
        let data_producers = drain(&self.data_producers);
        let data_consumers = drain(&self.data_consumers);
        self.data_stream_ids.lock().clear();

        for producer in producers {
            producer.transport_closed();
        }
        for consumer in consumers {
            consumer.transport_closed();
        }
        for data_producer in data_producers {
            data_producer.transport_closed();
        }
        for data_consumer in data_consumers {
            data_consumer.transport_closed();
        }

        self.engine.close();
        self.states.lock().connection = ConnectionState::Closed;
        self.events.emit(TransportEvent::Closed);
    }
}

fn drain<T: Clone>(map: &DashMap<String, T>) -> Vec<T> {
    let handles = map.iter().map(|entry| entry.value().clone()).collect();
    map.clear();
    handles
}

async fn pump_engine_events(transport: Weak<TransportInner>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        let Some(transport) = transport.upgrade() else {
            break;
        };
        transport.handle_engine_event(event);
    }
    debug!("engine event stream ended");
}
