//! # rvoip-sfu-client
//!
//! Client-side session orchestration for ORTC-style selective forwarding
//! units. The crate does not move media; it coordinates a media engine
//! (behind [`MediaEngine`]) and the application's signaling channel
//! (behind [`SignalingChannel`]) so that local tracks can be sent to, and
//! remote tracks received from, a media server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ load()  ┌─────────────────────────────┐
//! │  Device  │────────▶│ negotiated RTP capabilities │ (ortc)
//! └────┬─────┘         └─────────────────────────────┘
//!      │ create_send_transport / create_recv_transport
//!      ▼
//! ┌───────────┐  OperationQueue   ┌──────────────┐
//! │ Transport │──────────────────▶│ MediaEngine  │
//! └────┬──────┘                   └──────────────┘
//!      │ produce / consume / produce_data / consume_data
//!      ▼
//! Producer · Consumer · DataProducer · DataConsumer
//! ```
//!
//! - [`Device`] negotiates once, then creates transports
//! - [`Transport`] serializes every mutating operation, connects lazily and
//!   batches consecutive `consume()` calls into one engine dispatch
//! - [`sdp::RemoteSdp`] synthesizes the remote description for Plan-B engines
//! - [`scalability`] parses `L<s>T<t>` / `S<s>T<t>` scalability modes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let device = Device::new(Arc::new(MyEngineFactory::default()));
//! device.load(router_rtp_capabilities).await?;
//!
//! let transport = device.create_send_transport(server_transport_options, signaling)?;
//! let producer = transport
//!     .produce(ProducerOptions::new(MediaTrack::new(MediaKind::Audio)))
//!     .await?;
//! producer.pause();
//! ```

pub mod config;
pub mod connectivity;
pub mod consumer;
pub mod data_consumer;
pub mod data_producer;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod media_track;
pub mod ortc;
pub mod producer;
pub mod queue;
pub mod rtp;
pub mod scalability;
pub mod sctp;
pub mod sdp;
pub mod signaling;
pub mod transport;

// Re-export main types
pub use config::{DeviceConfig, ProducerDefaults};
pub use connectivity::{DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceServer};
pub use consumer::Consumer;
pub use data_consumer::DataConsumer;
pub use data_producer::DataProducer;
pub use device::Device;
pub use engine::{
    DataChannel, DataPayload, EngineEvent, EngineFactory, EngineOptions, EngineVariant, MediaEngine,
};
pub use error::{Error, Result};
pub use events::{
    ConnectionState, ConsumerEvent, DataStreamEvent, IceGatheringState, ProducerEvent, TransportEvent,
};
pub use media_track::MediaTrack;
pub use producer::Producer;
pub use rtp::{
    ExtendedRtpCapabilities, MediaKind, RtpCapabilities, RtpCodecCapability, RtpEncodingParameters,
    RtpParameters,
};
pub use scalability::{parse_scalability_mode, ScalabilityMode, ScalabilityModeGrammar};
pub use sctp::{SctpCapabilities, SctpParameters, SctpStreamParameters};
pub use signaling::{AppData, ProduceDataRequest, ProduceRequest, SignalingChannel};
pub use transport::{
    ConsumerOptions, DataConsumerOptions, DataProducerOptions, ProducerCodecOptions, ProducerOptions,
    Transport, TransportDirection, TransportOptions,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
