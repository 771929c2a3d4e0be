//! Shared fakes for the integration tests
//!
//! `FakeEngineFactory` hands out `FakeEngine`s that record every call made
//! by a transport; `FakeSignaling` answers the signaling callbacks and can be
//! told to fail.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use rvoip_sfu_client::connectivity::{DtlsFingerprint, IceParameters, IceServer};
use rvoip_sfu_client::engine::{
    DataChannelRequest, DataChannelResult, EncodingParametersUpdate, ReceiveBatch, ReceiveResult, SendRequest,
    SendResult, StatsReport,
};
use rvoip_sfu_client::rtp::{RtcpParameters, RtpEncodingParameters, RtxParameters};
use rvoip_sfu_client::{
    ConsumerOptions, DataChannel, DataPayload, Device, DtlsParameters, DtlsRole, EngineEvent, EngineFactory,
    EngineOptions, EngineVariant, Error, MediaEngine, MediaKind, ProduceDataRequest, ProduceRequest, Result,
    RtpCapabilities, RtpParameters, SctpCapabilities, SignalingChannel, Transport, TransportOptions,
};

/// Capabilities of the local engine: opus/111, VP8/96, rtx/97
pub fn native_rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities::from_json(json!({
        "codecs": [
            {
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 111,
                "clockRate": 48000,
                "channels": 2,
                "parameters": { "minptime": 10, "useinbandfec": 1 },
                "rtcpFeedback": [{ "type": "transport-cc" }]
            },
            {
                "kind": "video",
                "mimeType": "video/VP8",
                "preferredPayloadType": 96,
                "clockRate": 90000,
                "rtcpFeedback": [
                    { "type": "goog-remb" },
                    { "type": "transport-cc" },
                    { "type": "ccm", "parameter": "fir" },
                    { "type": "nack" },
                    { "type": "nack", "parameter": "pli" }
                ]
            },
            {
                "kind": "video",
                "mimeType": "video/rtx",
                "preferredPayloadType": 97,
                "clockRate": 90000,
                "parameters": { "apt": 96 }
            }
        ],
        "headerExtensions": [
            { "kind": "audio", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 4 },
            { "kind": "video", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 4 },
            {
                "kind": "video",
                "uri": "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
                "preferredId": 3
            }
        ]
    }))
    .expect("native capabilities")
}

/// Capabilities of the media server: opus/100, VP8/101, rtx/102
pub fn router_rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities::from_json(json!({
        "codecs": [
            {
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 100,
                "clockRate": 48000,
                "channels": 2,
                "rtcpFeedback": [{ "type": "transport-cc" }]
            },
            {
                "kind": "video",
                "mimeType": "video/VP8",
                "preferredPayloadType": 101,
                "clockRate": 90000,
                "rtcpFeedback": [
                    { "type": "nack" },
                    { "type": "nack", "parameter": "pli" },
                    { "type": "ccm", "parameter": "fir" },
                    { "type": "goog-remb" },
                    { "type": "transport-cc" }
                ]
            },
            {
                "kind": "video",
                "mimeType": "video/rtx",
                "preferredPayloadType": 102,
                "clockRate": 90000,
                "parameters": { "apt": 101 }
            }
        ],
        "headerExtensions": [
            { "kind": "audio", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 1 },
            { "kind": "video", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 1 },
            {
                "kind": "video",
                "uri": "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
                "preferredId": 5
            }
        ]
    }))
    .expect("router capabilities")
}

/// Server-side transport parameters, with or without SCTP
pub fn transport_options(id: &str, with_sctp: bool) -> TransportOptions {
    let mut value = json!({
        "id": id,
        "iceParameters": {
            "usernameFragment": "ufrag-1",
            "password": "pwd-1",
            "iceLite": true
        },
        "iceCandidates": [{
            "foundation": "udpcandidate",
            "priority": 1076302079,
            "ip": "10.0.0.1",
            "protocol": "udp",
            "port": 40533,
            "type": "host"
        }],
        "dtlsParameters": {
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
        }
    });
    if with_sctp {
        value["sctpParameters"] = json!({ "port": 5000, "OS": 1024, "MIS": 1024, "maxMessageSize": 262144 });
    }
    serde_json::from_value(value).expect("transport options")
}

/// RTP parameters the server sends for a consumer of `kind`
pub fn remote_rtp_parameters(kind: MediaKind, ssrc: u32) -> RtpParameters {
    match kind {
        MediaKind::Audio => RtpParameters {
            mid: None,
            codecs: serde_json::from_value(json!([{
                "mimeType": "audio/opus",
                "payloadType": 100,
                "clockRate": 48000,
                "channels": 2,
                "rtcpFeedback": [{ "type": "transport-cc" }]
            }]))
            .expect("audio codecs"),
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(ssrc),
                ..Default::default()
            }],
            rtcp: RtcpParameters {
                cname: Some("remote-cname".into()),
                reduced_size: true,
            },
        },
        MediaKind::Video => RtpParameters {
            mid: None,
            codecs: serde_json::from_value(json!([
                {
                    "mimeType": "video/VP8",
                    "payloadType": 101,
                    "clockRate": 90000,
                    "rtcpFeedback": [{ "type": "nack" }, { "type": "nack", "parameter": "pli" }]
                },
                {
                    "mimeType": "video/rtx",
                    "payloadType": 102,
                    "clockRate": 90000,
                    "parameters": { "apt": 101 }
                }
            ]))
            .expect("video codecs"),
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(ssrc),
                rtx: Some(RtxParameters { ssrc: ssrc + 1 }),
                ..Default::default()
            }],
            rtcp: RtcpParameters {
                cname: Some("remote-cname".into()),
                reduced_size: true,
            },
        },
    }
}

pub fn consumer_options(id: &str, kind: MediaKind, ssrc: u32) -> ConsumerOptions {
    ConsumerOptions {
        id: id.to_string(),
        producer_id: format!("producer-{}", id),
        kind,
        rtp_parameters: remote_rtp_parameters(kind, ssrc),
        stream_id: None,
        app_data: None,
    }
}

/// Poll the runtime until the transport's queue is idle
pub async fn settle(transport: &Transport) {
    for _ in 0..100 {
        tokio::task::yield_now().await;
        if transport.pending_operations() == 0 {
            break;
        }
    }
    tokio::task::yield_now().await;
}

/// Loaded device backed by a fake engine of the given flavour
pub async fn loaded_device(variant: EngineVariant) -> (Device, Arc<FakeEngineFactory>) {
    let factory = Arc::new(FakeEngineFactory::new(variant));
    let device = Device::new(factory.clone());
    device
        .load(router_rtp_capabilities())
        .await
        .expect("device loads");
    (device, factory)
}

pub struct FakeEngineFactory {
    variant: EngineVariant,
    pub native: Mutex<RtpCapabilities>,
    pub engines: Mutex<Vec<Arc<FakeEngine>>>,
    pub fail_create: AtomicBool,
}

impl FakeEngineFactory {
    pub fn new(variant: EngineVariant) -> Self {
        Self {
            variant,
            native: Mutex::new(native_rtp_capabilities()),
            engines: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
        }
    }

    pub fn last_engine(&self) -> Arc<FakeEngine> {
        self.engines.lock().last().cloned().expect("an engine was created")
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    fn variant(&self) -> EngineVariant {
        self.variant
    }

    async fn native_rtp_capabilities(&self) -> Result<RtpCapabilities> {
        Ok(self.native.lock().clone())
    }

    async fn native_sctp_capabilities(&self) -> Result<SctpCapabilities> {
        Ok(SctpCapabilities::default())
    }

    fn create(
        &self,
        options: EngineOptions,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<EngineEvent>)> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::engine("engine creation refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(FakeEngine::new(options, tx));
        self.engines.lock().push(engine.clone());
        Ok((engine, rx))
    }
}

/// Recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    LocalDtls(DtlsRole),
    Send { kind: MediaKind, local_id: String },
    StopSending(String),
    ReplaceTrack { local_id: String, track_id: Option<String> },
    SetMaxSpatialLayer { local_id: String, layer: u8 },
    SetEncodingsActive { local_id: String, active: bool },
    SetRtpEncodingParameters { local_id: String, update: EncodingParametersUpdate },
    Receive { track_ids: Vec<String> },
    StopReceiving(Vec<String>),
    PauseReceiving(Vec<String>),
    ResumeReceiving(Vec<String>),
    SendDataChannel(Option<u16>),
    ReceiveDataChannel(Option<u16>),
    RestartIce(String),
    UpdateIceServers(usize),
}

pub struct FakeEngine {
    pub options: EngineOptions,
    events: mpsc::UnboundedSender<EngineEvent>,
    next_local_id: AtomicU32,
    next_ssrc: AtomicU32,
    pub calls: Mutex<Vec<EngineCall>>,
    pub send_requests: Mutex<Vec<SendRequest>>,
    pub receive_batches: Mutex<Vec<ReceiveBatch>>,
    pub remote_descriptions: Mutex<Vec<String>>,
    pub channels: Mutex<Vec<Arc<FakeDataChannel>>>,
    pub closed: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_receive: AtomicBool,
}

impl FakeEngine {
    fn new(options: EngineOptions, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            options,
            events,
            next_local_id: AtomicU32::new(0),
            next_ssrc: AtomicU32::new(1000),
            calls: Mutex::new(Vec::new()),
            send_requests: Mutex::new(Vec::new()),
            receive_batches: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_receive: AtomicBool::new(false),
        }
    }

    /// Deliver a notification to the owning transport
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn receive_batch_sizes(&self) -> Vec<usize> {
        self.receive_batches.lock().iter().map(|b| b.items.len()).collect()
    }

    pub fn last_remote_description(&self) -> Option<String> {
        self.remote_descriptions.lock().last().cloned()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn record_description(&self, description: &Option<String>) {
        if let Some(description) = description {
            self.remote_descriptions.lock().push(description.clone());
        }
    }

    fn open_channel(&self, request: &DataChannelRequest) -> DataChannelResult {
        let channel = Arc::new(FakeDataChannel::default());
        self.channels.lock().push(channel.clone());
        DataChannelResult {
            channel,
            sctp_stream_parameters: request.stream_parameters,
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn local_dtls_parameters(&self, role: DtlsRole) -> Result<DtlsParameters> {
        self.record(EngineCall::LocalDtls(role));
        Ok(DtlsParameters {
            role,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "01:02:03".into(),
            }],
        })
    }

    async fn send(&self, request: SendRequest) -> Result<SendResult> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::engine("sender refused"));
        }
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.record(EngineCall::Send {
            kind: request.track.kind(),
            local_id: local_id.clone(),
        });

        let mut rtp_parameters = request.remote_rtp_parameters.clone();
        rtp_parameters.mid = Some(local_id.clone());
        rtp_parameters.encodings = request
            .encodings
            .iter()
            .cloned()
            .map(|mut encoding| {
                encoding.ssrc = Some(self.next_ssrc.fetch_add(1, Ordering::SeqCst));
                encoding
            })
            .collect();
        self.send_requests.lock().push(request);

        Ok(SendResult {
            local_id,
            rtp_parameters,
        })
    }

    async fn stop_sending(&self, local_id: &str) -> Result<()> {
        self.record(EngineCall::StopSending(local_id.to_string()));
        Ok(())
    }

    async fn replace_track(&self, local_id: &str, track: Option<rvoip_sfu_client::MediaTrack>) -> Result<()> {
        self.record(EngineCall::ReplaceTrack {
            local_id: local_id.to_string(),
            track_id: track.map(|t| t.id().to_string()),
        });
        Ok(())
    }

    async fn set_max_spatial_layer(&self, local_id: &str, spatial_layer: u8) -> Result<()> {
        self.record(EngineCall::SetMaxSpatialLayer {
            local_id: local_id.to_string(),
            layer: spatial_layer,
        });
        Ok(())
    }

    async fn set_encodings_active(&self, local_id: &str, active: bool) -> Result<()> {
        self.record(EngineCall::SetEncodingsActive {
            local_id: local_id.to_string(),
            active,
        });
        Ok(())
    }

    async fn set_rtp_encoding_parameters(&self, local_id: &str, update: EncodingParametersUpdate) -> Result<()> {
        self.record(EngineCall::SetRtpEncodingParameters {
            local_id: local_id.to_string(),
            update,
        });
        Ok(())
    }

    async fn receive(&self, batch: ReceiveBatch) -> Result<Vec<ReceiveResult>> {
        self.record(EngineCall::Receive {
            track_ids: batch.items.iter().map(|i| i.track_id.clone()).collect(),
        });
        self.record_description(&batch.remote_description);
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(Error::engine("receive refused"));
        }

        let results = batch
            .items
            .iter()
            .map(|item| ReceiveResult {
                local_id: format!("r{}", self.next_local_id.fetch_add(1, Ordering::SeqCst)),
                track: rvoip_sfu_client::MediaTrack::with_id(item.track_id.clone(), item.kind),
            })
            .collect();
        self.receive_batches.lock().push(batch);
        Ok(results)
    }

    async fn stop_receiving(&self, local_ids: Vec<String>, remote_description: Option<String>) -> Result<()> {
        self.record_description(&remote_description);
        self.record(EngineCall::StopReceiving(local_ids));
        Ok(())
    }

    async fn pause_receiving(&self, local_ids: Vec<String>) -> Result<()> {
        self.record(EngineCall::PauseReceiving(local_ids));
        Ok(())
    }

    async fn resume_receiving(&self, local_ids: Vec<String>) -> Result<()> {
        self.record(EngineCall::ResumeReceiving(local_ids));
        Ok(())
    }

    async fn send_data_channel(&self, request: DataChannelRequest) -> Result<DataChannelResult> {
        self.record(EngineCall::SendDataChannel(request.stream_parameters.stream_id));
        Ok(self.open_channel(&request))
    }

    async fn receive_data_channel(
        &self,
        request: DataChannelRequest,
        remote_description: Option<String>,
    ) -> Result<DataChannelResult> {
        self.record_description(&remote_description);
        self.record(EngineCall::ReceiveDataChannel(request.stream_parameters.stream_id));
        Ok(self.open_channel(&request))
    }

    async fn restart_ice(&self, ice_parameters: IceParameters, remote_description: Option<String>) -> Result<()> {
        self.record_description(&remote_description);
        self.record(EngineCall::RestartIce(ice_parameters.username_fragment));
        Ok(())
    }

    async fn update_ice_servers(&self, ice_servers: Vec<IceServer>) -> Result<()> {
        self.record(EngineCall::UpdateIceServers(ice_servers.len()));
        Ok(())
    }

    async fn transport_stats(&self) -> Result<StatsReport> {
        Ok(vec![json!({ "type": "transport" })])
    }

    async fn sender_stats(&self, local_id: &str) -> Result<StatsReport> {
        Ok(vec![json!({ "type": "outbound-rtp", "mid": local_id })])
    }

    async fn receiver_stats(&self, local_id: &str) -> Result<StatsReport> {
        Ok(vec![json!({ "type": "inbound-rtp", "mid": local_id })])
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDataChannel {
    pub sent: Mutex<Vec<DataPayload>>,
    pub closed: AtomicBool,
}

impl DataChannel for FakeDataChannel {
    fn send(&self, payload: DataPayload) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::invalid_state("channel closed"));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.sent.lock().iter().map(|p| p.len() as u64).sum()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Signaling channel that assigns sequential ids
#[derive(Default)]
pub struct FakeSignaling {
    pub connects: Mutex<Vec<(String, DtlsParameters)>>,
    pub produces: Mutex<Vec<ProduceRequest>>,
    pub produce_datas: Mutex<Vec<ProduceDataRequest>>,
    pub fail_connect: AtomicBool,
    pub fail_produce: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn connect(&self, transport_id: &str, dtls_parameters: DtlsParameters) -> Result<()> {
        self.connects
            .lock()
            .push((transport_id.to_string(), dtls_parameters));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::signaling("connect rejected"));
        }
        Ok(())
    }

    async fn produce(&self, _transport_id: &str, request: ProduceRequest) -> Result<String> {
        self.produces.lock().push(request);
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(Error::signaling("produce rejected"));
        }
        Ok(format!("producer-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn produce_data(&self, _transport_id: &str, request: ProduceDataRequest) -> Result<String> {
        self.produce_datas.lock().push(request);
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(Error::signaling("produce_data rejected"));
        }
        Ok(format!("data-producer-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}
