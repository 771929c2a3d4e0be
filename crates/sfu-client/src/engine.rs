//! Media engine collaborator contract
//!
//! The crate never touches media, sockets or DTLS itself. Everything that
//! does is behind [`MediaEngine`], one instance per transport, created by an
//! [`EngineFactory`] that also reports the engine's native capabilities and
//! which session-description flavour it needs ([`EngineVariant`]).
//!
//! Engine instances report connectivity changes and ended tracks through the
//! [`EngineEvent`] channel returned by [`EngineFactory::create`]; the owning
//! transport drains it for as long as it is open.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connectivity::{DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceServer};
use crate::error::Result;
use crate::events::{ConnectionState, IceGatheringState};
use crate::media_track::MediaTrack;
use crate::rtp::{ExtendedRtpCapabilities, MediaKind, RtpCapabilities, RtpEncodingParameters, RtpParameters};
use crate::sctp::{SctpCapabilities, SctpParameters, SctpStreamParameters};
use crate::transport::TransportDirection;

/// Session-description flavour the engine requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineVariant {
    /// One media section per stream; the engine builds its own descriptions
    UnifiedPlan,
    /// Legacy multiplexed descriptions, built by the transport through
    /// [`RemoteSdp`](crate::sdp::RemoteSdp)
    PlanB,
}

impl EngineVariant {
    pub fn needs_remote_sdp(&self) -> bool {
        matches!(self, Self::PlanB)
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnifiedPlan => write!(f, "unified-plan"),
            Self::PlanB => write!(f, "plan-b"),
        }
    }
}

/// Notifications from an engine instance to its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    ConnectionStateChange(ConnectionState),
    IceGatheringStateChange(IceGatheringState),
    /// The track of the sender/receiver with this local id ended
    TrackEnded { local_id: String },
}

/// Everything an engine instance needs to set up its side of a transport
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub direction: TransportDirection,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    pub sctp_parameters: Option<SctpParameters>,
    pub ice_servers: Vec<IceServer>,
    pub extended_rtp_capabilities: Arc<ExtendedRtpCapabilities>,
}

/// Start sending a track
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub track: MediaTrack,
    pub encodings: Vec<RtpEncodingParameters>,
    /// Parameters with local payload types, reduced to the chosen codec
    pub rtp_parameters: RtpParameters,
    /// Parameters as the server will receive them
    pub remote_rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    /// Engine-local identifier of the sender (its mid)
    pub local_id: String,
    /// Final parameters (mid, encodings, SSRCs) to announce to the server
    pub rtp_parameters: RtpParameters,
}

/// One remote stream to receive
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    /// Id of the consumer, used as the receiving track id
    pub track_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub stream_id: Option<String>,
}

/// All streams coalesced into one receive dispatch
#[derive(Debug, Clone)]
pub struct ReceiveBatch {
    pub items: Vec<ReceiveRequest>,
    /// Serialized remote description, for engines that need one
    pub remote_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceiveResult {
    pub local_id: String,
    pub track: MediaTrack,
}

/// Partial update of the encodings of an active sender
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingParametersUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Open one data channel on the transport's SCTP association
#[derive(Debug, Clone)]
pub struct DataChannelRequest {
    pub stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

#[derive(Clone)]
pub struct DataChannelResult {
    pub channel: Arc<dyn DataChannel>,
    /// Parameters of the opened stream, with the stream id assigned
    pub sctp_stream_parameters: SctpStreamParameters,
}

impl fmt::Debug for DataChannelResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannelResult")
            .field("sctp_stream_parameters", &self.sctp_stream_parameters)
            .finish_non_exhaustive()
    }
}

/// Message carried on a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPayload {
    Text(String),
    Binary(Bytes),
}

impl DataPayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An open data channel owned by the engine
pub trait DataChannel: Send + Sync {
    fn send(&self, payload: DataPayload) -> Result<()>;

    /// Bytes queued but not yet handed to the network
    fn buffered_amount(&self) -> u64;

    fn close(&self);
}

/// Statistics report as produced by the engine
pub type StatsReport = Vec<Value>;

/// One media engine instance bound to one transport
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Local DTLS parameters, taking the given role
    async fn local_dtls_parameters(&self, role: DtlsRole) -> Result<DtlsParameters>;

    async fn send(&self, request: SendRequest) -> Result<SendResult>;

    async fn stop_sending(&self, local_id: &str) -> Result<()>;

    async fn replace_track(&self, local_id: &str, track: Option<MediaTrack>) -> Result<()>;

    async fn set_max_spatial_layer(&self, local_id: &str, spatial_layer: u8) -> Result<()>;

    /// Activate or deactivate every encoding of a sender
    async fn set_encodings_active(&self, local_id: &str, active: bool) -> Result<()>;

    async fn set_rtp_encoding_parameters(&self, local_id: &str, update: EncodingParametersUpdate) -> Result<()>;

    /// Receive every stream of the batch in one negotiation
    ///
    /// Results are returned in request order.
    async fn receive(&self, batch: ReceiveBatch) -> Result<Vec<ReceiveResult>>;

    async fn stop_receiving(&self, local_ids: Vec<String>, remote_description: Option<String>) -> Result<()>;

    async fn pause_receiving(&self, local_ids: Vec<String>) -> Result<()>;

    async fn resume_receiving(&self, local_ids: Vec<String>) -> Result<()>;

    async fn send_data_channel(&self, request: DataChannelRequest) -> Result<DataChannelResult>;

    async fn receive_data_channel(
        &self,
        request: DataChannelRequest,
        remote_description: Option<String>,
    ) -> Result<DataChannelResult>;

    async fn restart_ice(&self, ice_parameters: IceParameters, remote_description: Option<String>) -> Result<()>;

    async fn update_ice_servers(&self, ice_servers: Vec<IceServer>) -> Result<()>;

    async fn transport_stats(&self) -> Result<StatsReport>;

    async fn sender_stats(&self, local_id: &str) -> Result<StatsReport>;

    async fn receiver_stats(&self, local_id: &str) -> Result<StatsReport>;

    /// Tear the engine instance down; must not fail
    fn close(&self);
}

/// Creates engine instances and reports the engine's native capabilities
#[async_trait]
pub trait EngineFactory: Send + Sync {
    fn variant(&self) -> EngineVariant;

    async fn native_rtp_capabilities(&self) -> Result<RtpCapabilities>;

    async fn native_sctp_capabilities(&self) -> Result<SctpCapabilities>;

    fn create(
        &self,
        options: EngineOptions,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<EngineEvent>)>;
}
