//! Sending side: produce and produce_data

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Transport, TransportDirection, TransportInner};
use crate::data_producer::{DataProducer, DataProducerInit};
use crate::engine::{DataChannelRequest, SendRequest};
use crate::error::{Error, Result};
use crate::media_track::MediaTrack;
use crate::ortc;
use crate::producer::{Producer, ProducerInit};
use crate::rtp::{MediaKind, RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters};
use crate::sctp::SctpStreamParameters;
use crate::signaling::{app_data_from, AppData, ProduceDataRequest, ProduceRequest};

/// Codec tuning applied to the first negotiated codec of a producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProducerCodecOptions {
    pub opus_stereo: Option<bool>,
    pub opus_fec: Option<bool>,
    pub opus_dtx: Option<bool>,
    pub opus_max_playback_rate: Option<u32>,
    pub opus_ptime: Option<u32>,
    pub video_google_start_bitrate: Option<u32>,
    pub video_google_max_bitrate: Option<u32>,
    pub video_google_min_bitrate: Option<u32>,
}

impl ProducerCodecOptions {
    fn apply(&self, codec: &mut RtpCodecParameters) {
        let mime_type = codec.mime_type.to_ascii_lowercase();
        let params = &mut codec.parameters;
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                params.insert(key.to_string(), value);
            }
        };

        match mime_type.as_str() {
            "audio/opus" => {
                let flag = |v: Option<bool>| v.map(|b| json!(u8::from(b)));
                set("stereo", flag(self.opus_stereo));
                set("sprop-stereo", flag(self.opus_stereo));
                set("useinbandfec", flag(self.opus_fec));
                set("usedtx", flag(self.opus_dtx));
                set("maxplaybackrate", self.opus_max_playback_rate.map(|v| json!(v)));
                set("ptime", self.opus_ptime.map(|v| json!(v)));
            }
            "video/vp8" | "video/vp9" | "video/h264" | "video/h265" | "video/av1" => {
                set("x-google-start-bitrate", self.video_google_start_bitrate.map(|v| json!(v)));
                set("x-google-max-bitrate", self.video_google_max_bitrate.map(|v| json!(v)));
                set("x-google-min-bitrate", self.video_google_min_bitrate.map(|v| json!(v)));
            }
            _ => {}
        }
    }
}

/// Options of [`Transport::produce`]
///
/// `stop_tracks`, `disable_track_on_pause` and `zero_rtp_on_pause` fall back
/// to the device's [`ProducerDefaults`](crate::config::ProducerDefaults).
#[derive(Debug, Clone, Default)]
pub struct ProducerOptions {
    pub track: Option<MediaTrack>,
    /// `None` sends a single encoding; an empty list is rejected
    pub encodings: Option<Vec<RtpEncodingParameters>>,
    pub codec_options: Option<ProducerCodecOptions>,
    /// Preferred codec, one of the device's RTP capabilities
    pub codec: Option<RtpCodecCapability>,
    pub stop_tracks: Option<bool>,
    pub disable_track_on_pause: Option<bool>,
    pub zero_rtp_on_pause: Option<bool>,
    pub paused: bool,
    pub app_data: Option<Value>,
}

impl ProducerOptions {
    pub fn new(track: MediaTrack) -> Self {
        Self {
            track: Some(track),
            ..Default::default()
        }
    }

    pub fn with_encodings(mut self, encodings: Vec<RtpEncodingParameters>) -> Self {
        self.encodings = Some(encodings);
        self
    }

    pub fn with_codec(mut self, codec: RtpCodecCapability) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_codec_options(mut self, codec_options: ProducerCodecOptions) -> Self {
        self.codec_options = Some(codec_options);
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn with_app_data(mut self, app_data: Value) -> Self {
        self.app_data = Some(app_data);
        self
    }
}

/// Options of [`Transport::produce_data`]
#[derive(Debug, Clone, Default)]
pub struct DataProducerOptions {
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub label: String,
    pub protocol: String,
    pub app_data: Option<Value>,
}

struct ProduceJob {
    track: MediaTrack,
    encodings: Vec<RtpEncodingParameters>,
    codec: Option<RtpCodecCapability>,
    codec_options: Option<ProducerCodecOptions>,
    stop_tracks: bool,
    disable_track_on_pause: bool,
    zero_rtp_on_pause: bool,
    paused: bool,
    app_data: AppData,
}

impl Transport {
    /// Send a track to the server
    ///
    /// Connects the transport first if needed, asks the engine to start
    /// sending and announces the producer through the signaling channel. If
    /// the server rejects it, the engine sender is stopped again.
    pub async fn produce(&self, options: ProducerOptions) -> Result<Producer> {
        let inner = &self.inner;
        inner.ensure_direction(TransportDirection::Send, "produce")?;
        inner.ensure_open()?;

        let track = options
            .track
            .ok_or_else(|| Error::invalid_argument("missing track"))?;
        if track.is_ended() {
            return Err(Error::invalid_argument("track ended"));
        }
        let app_data = app_data_from(options.app_data)?;

        let encodings = match options.encodings {
            None => vec![RtpEncodingParameters::default()],
            Some(encodings) if encodings.is_empty() => {
                return Err(Error::invalid_argument("encodings must not be empty"))
            }
            Some(encodings) => encodings,
        };
        validate_encodings(&encodings, inner)?;

        if !ortc::can_send(track.kind(), &inner.extended) {
            return Err(Error::unsupported(format!("cannot produce {}", track.kind())));
        }

        let defaults = inner.config.producer_defaults;
        let job = ProduceJob {
            track,
            encodings,
            codec: options.codec,
            codec_options: options.codec_options,
            stop_tracks: options.stop_tracks.unwrap_or(defaults.stop_tracks),
            disable_track_on_pause: options
                .disable_track_on_pause
                .unwrap_or(defaults.disable_track_on_pause),
            zero_rtp_on_pause: options.zero_rtp_on_pause.unwrap_or(defaults.zero_rtp_on_pause),
            paused: options.paused,
            app_data,
        };

        let queued = inner.clone();
        inner
            .queue
            .push("produce", async move { queued.produce_queued(job).await })
            .await
    }

    /// Open a data channel towards the server
    pub async fn produce_data(&self, options: DataProducerOptions) -> Result<DataProducer> {
        let inner = &self.inner;
        inner.ensure_direction(TransportDirection::Send, "produce_data")?;
        inner.ensure_open()?;
        let sctp = inner.sctp_parameters()?;
        let app_data = app_data_from(options.app_data)?;

        let stream_id = inner.reserve_data_stream_id(sctp.os)?;
        let mut stream_parameters = SctpStreamParameters {
            stream_id: Some(stream_id),
            ordered: options.ordered,
            max_packet_life_time: options.max_packet_life_time,
            max_retransmits: options.max_retransmits,
        };
        if let Err(err) = ortc::validate_sctp_stream_parameters(&mut stream_parameters) {
            inner.release_data_stream_id(stream_id);
            return Err(err);
        }

        let request = DataChannelRequest {
            stream_parameters,
            label: options.label,
            protocol: options.protocol,
        };

        let queued = inner.clone();
        inner
            .queue
            .push("produce_data", async move {
                let result = queued.clone().produce_data_queued(request, app_data).await;
                if result.is_err() {
                    queued.release_data_stream_id(stream_id);
                }
                result
            })
            .await
    }
}

fn validate_encodings(encodings: &[RtpEncodingParameters], inner: &TransportInner) -> Result<()> {
    let mut rids = HashSet::new();
    for encoding in encodings {
        if let Some(rid) = &encoding.rid {
            if !rids.insert(rid.as_str()) {
                return Err(Error::invalid_argument(format!("duplicated rid '{}'", rid)));
            }
        }
        if let Some(mode) = &encoding.scalability_mode {
            if inner.config.scalability.try_parse(mode).is_none() {
                return Err(Error::invalid_argument(format!("invalid scalabilityMode '{}'", mode)));
            }
        }
    }
    Ok(())
}

impl TransportInner {
    async fn produce_queued(self: Arc<Self>, job: ProduceJob) -> Result<Producer> {
        self.ensure_connected().await?;

        let kind: MediaKind = job.track.kind();

        let mut rtp_parameters = ortc::get_sending_rtp_parameters(kind, &self.extended);
        rtp_parameters.codecs = ortc::reduce_codecs(&rtp_parameters.codecs, job.codec.as_ref())?;

        let mut remote_rtp_parameters = ortc::get_sending_remote_rtp_parameters(kind, &self.extended);
        remote_rtp_parameters.codecs =
            ortc::reduce_codecs(&remote_rtp_parameters.codecs, job.codec.as_ref())?;
        if let (Some(codec_options), Some(first)) =
            (&job.codec_options, remote_rtp_parameters.codecs.first_mut())
        {
            codec_options.apply(first);
        }

        let sent = self
            .engine
            .send(SendRequest {
                track: job.track.clone(),
                encodings: job.encodings,
                rtp_parameters,
                remote_rtp_parameters,
            })
            .await?;

        let request = ProduceRequest {
            kind,
            rtp_parameters: sent.rtp_parameters.clone(),
            app_data: job.app_data.clone(),
        };
        let id = match self.signaling.produce(&self.id, request).await {
            Ok(id) => id,
            Err(err) => {
                if let Err(stop_err) = self.engine.stop_sending(&sent.local_id).await {
                    warn!(transport_id = %self.id, error = %stop_err, "failed to stop rejected sender");
                }
                return Err(err);
            }
        };

        if job.paused && job.zero_rtp_on_pause {
            self.engine.set_encodings_active(&sent.local_id, false).await?;
        }

        let producer = Producer::new(
            ProducerInit {
                id: id.clone(),
                local_id: sent.local_id,
                kind,
                track: job.track,
                rtp_parameters: sent.rtp_parameters,
                paused: job.paused,
                stop_tracks: job.stop_tracks,
                disable_track_on_pause: job.disable_track_on_pause,
                zero_rtp_on_pause: job.zero_rtp_on_pause,
                app_data: job.app_data,
                grammar: self.config.scalability,
                event_capacity: self.config.event_channel_capacity,
            },
            Arc::downgrade(&self),
        );

        self.producers.insert(id.clone(), producer.clone());
        if self.is_closed() {
            self.producers.remove(&id);
            producer.transport_closed();
        }

        debug!(transport_id = %self.id, producer_id = %id, %kind, "producer created");
        Ok(producer)
    }

    async fn produce_data_queued(
        self: Arc<Self>,
        request: DataChannelRequest,
        app_data: AppData,
    ) -> Result<DataProducer> {
        self.ensure_connected().await?;

        let label = request.label.clone();
        let protocol = request.protocol.clone();
        let opened = self.engine.send_data_channel(request).await?;

        let announce = ProduceDataRequest {
            sctp_stream_parameters: opened.sctp_stream_parameters,
            label: label.clone(),
            protocol: protocol.clone(),
            app_data: app_data.clone(),
        };
        let id = match self.signaling.produce_data(&self.id, announce).await {
            Ok(id) => id,
            Err(err) => {
                opened.channel.close();
                return Err(err);
            }
        };

        let data_producer = DataProducer::new(
            DataProducerInit {
                id: id.clone(),
                channel: opened.channel,
                sctp_stream_parameters: opened.sctp_stream_parameters,
                label,
                protocol,
                app_data,
                event_capacity: self.config.event_channel_capacity,
            },
            Arc::downgrade(&self),
        );

        self.data_producers.insert(id.clone(), data_producer.clone());
        if self.is_closed() {
            self.data_producers.remove(&id);
            data_producer.transport_closed();
        }

        debug!(transport_id = %self.id, data_producer_id = %id, "data producer created");
        Ok(data_producer)
    }
}
