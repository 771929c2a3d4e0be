//! ORTC capability negotiation
//!
//! Computes the intersection of the local engine's RTP capabilities with the
//! remote server's ([`get_extended_rtp_capabilities`]) and derives from that
//! negotiated set everything a transport needs later on:
//!
//! - the capabilities announced to the server for receiving
//!   ([`get_recv_rtp_capabilities`])
//! - the parameters used to send a track of a given kind
//!   ([`get_sending_rtp_parameters`], [`get_sending_remote_rtp_parameters`])
//! - whether a kind can be sent or remote parameters can be received
//!   ([`can_send`], [`can_receive`])
//!
//! # Matching rules
//!
//! Primary codecs match on mime type (case-insensitive), clock rate and
//! channel count; H264 additionally on `packetization-mode` and, when strict,
//! on the profile of `profile-level-id`; VP9 on `profile-id` when strict.
//! Retransmission codecs are attached through their `apt` parameter to an
//! already matched primary codec. Header extensions match on kind and URI and
//! keep the more restrictive of both declared directions.

mod validate;

pub use validate::{
    validate_rtp_capabilities, validate_rtp_codec_capability, validate_rtp_codec_parameters,
    validate_rtp_header_extension, validate_rtp_parameters, validate_sctp_capabilities,
    validate_sctp_stream_parameters,
};

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::rtp::{
    apt_of, CodecParameters, ExtendedCodec, ExtendedHeaderExtension, ExtendedRtpCapabilities,
    MediaKind, RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpHeaderExtension, RtpHeaderExtensionParameters, RtpParameters,
};

const TRANSPORT_WIDE_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";

/// Borrowed view of the fields codec matching looks at
#[derive(Clone, Copy)]
struct CodecView<'a> {
    mime_type: &'a str,
    clock_rate: u32,
    channels: Option<u8>,
    parameters: &'a CodecParameters,
}

impl<'a> From<&'a RtpCodecCapability> for CodecView<'a> {
    fn from(c: &'a RtpCodecCapability) -> Self {
        Self {
            mime_type: &c.mime_type,
            clock_rate: c.clock_rate,
            channels: c.channels,
            parameters: &c.parameters,
        }
    }
}

impl<'a> From<&'a RtpCodecParameters> for CodecView<'a> {
    fn from(c: &'a RtpCodecParameters) -> Self {
        Self {
            mime_type: &c.mime_type,
            clock_rate: c.clock_rate,
            channels: c.channels,
            parameters: &c.parameters,
        }
    }
}

fn param_u64(parameters: &CodecParameters, key: &str) -> Option<u64> {
    match parameters.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn param_str<'a>(parameters: &'a CodecParameters, key: &str) -> Option<&'a str> {
    parameters.get(key).and_then(Value::as_str)
}

fn match_codecs(a: CodecView<'_>, b: CodecView<'_>, strict: bool) -> bool {
    if !a.mime_type.eq_ignore_ascii_case(b.mime_type)
        || a.clock_rate != b.clock_rate
        || a.channels != b.channels
    {
        return false;
    }

    let mime_type = a.mime_type.to_ascii_lowercase();
    match mime_type.as_str() {
        "video/h264" => {
            let a_mode = param_u64(a.parameters, "packetization-mode").unwrap_or(0);
            let b_mode = param_u64(b.parameters, "packetization-mode").unwrap_or(0);
            if a_mode != b_mode {
                return false;
            }
            if strict && h264_profile(a.parameters) != h264_profile(b.parameters) {
                return false;
            }
        }
        "video/vp9" if strict => {
            let a_profile = param_u64(a.parameters, "profile-id").unwrap_or(0);
            let b_profile = param_u64(b.parameters, "profile-id").unwrap_or(0);
            if a_profile != b_profile {
                return false;
            }
        }
        _ => {}
    }

    true
}

/// `profile_idc` byte of an H264 `profile-level-id` (defaults to baseline `42e01f`)
fn h264_profile(parameters: &CodecParameters) -> String {
    let profile_level_id = param_str(parameters, "profile-level-id").unwrap_or("42e01f");
    profile_level_id
        .get(..2)
        .unwrap_or(profile_level_id)
        .to_ascii_lowercase()
}

fn reduce_rtcp_feedback(a: &[RtcpFeedback], b: &[RtcpFeedback]) -> Vec<RtcpFeedback> {
    a.iter().filter(|fb| b.contains(fb)).cloned().collect()
}

/// Intersect local and remote RTP capabilities
///
/// Remote codec order is kept, so the server's preference decides which codec
/// comes first. Both inputs are expected to have been validated.
pub fn get_extended_rtp_capabilities(
    local: &RtpCapabilities,
    remote: &RtpCapabilities,
) -> ExtendedRtpCapabilities {
    let mut extended = ExtendedRtpCapabilities::default();

    for remote_codec in remote.codecs.iter().filter(|c| !c.is_rtx()) {
        let Some(remote_payload_type) = remote_codec.preferred_payload_type else {
            continue;
        };

        let matched = local.codecs.iter().filter(|c| !c.is_rtx()).find(|local_codec| {
            let already_used = extended
                .codecs
                .iter()
                .any(|e| Some(e.local_payload_type) == local_codec.preferred_payload_type);
            !already_used && match_codecs((*local_codec).into(), remote_codec.into(), true)
        });

        let Some(local_codec) = matched else {
            debug!("remote codec {} has no local counterpart", remote_codec.mime_type);
            continue;
        };
        let Some(local_payload_type) = local_codec.preferred_payload_type else {
            continue;
        };

        extended.codecs.push(ExtendedCodec {
            kind: local_codec.kind,
            mime_type: local_codec.mime_type.clone(),
            clock_rate: local_codec.clock_rate,
            channels: local_codec.channels,
            local_payload_type,
            local_rtx_payload_type: None,
            remote_payload_type,
            remote_rtx_payload_type: None,
            local_parameters: local_codec.parameters.clone(),
            remote_parameters: remote_codec.parameters.clone(),
            rtcp_feedback: reduce_rtcp_feedback(&local_codec.rtcp_feedback, &remote_codec.rtcp_feedback),
        });
    }

    for codec in extended.codecs.iter_mut() {
        let local_rtx = local
            .codecs
            .iter()
            .find(|c| c.is_rtx() && apt_of(&c.parameters) == Some(codec.local_payload_type));
        let remote_rtx = remote
            .codecs
            .iter()
            .find(|c| c.is_rtx() && apt_of(&c.parameters) == Some(codec.remote_payload_type));

        if let (Some(local_rtx), Some(remote_rtx)) = (local_rtx, remote_rtx) {
            codec.local_rtx_payload_type = local_rtx.preferred_payload_type;
            codec.remote_rtx_payload_type = remote_rtx.preferred_payload_type;
        }
    }

    for remote_ext in remote.header_extensions.iter() {
        let local_ext = local
            .header_extensions
            .iter()
            .find(|l| l.kind == remote_ext.kind && l.uri == remote_ext.uri);

        if let Some(local_ext) = local_ext {
            extended.header_extensions.push(ExtendedHeaderExtension {
                kind: remote_ext.kind,
                uri: remote_ext.uri.clone(),
                send_id: local_ext.preferred_id,
                recv_id: remote_ext.preferred_id,
                encrypt: local_ext.preferred_encrypt,
                // remote directions are declared from the server's side
                direction: local_ext.direction.restrict(remote_ext.direction.reversed()),
            });
        }
    }

    extended
}

/// Capabilities announced to the server for receiving media
pub fn get_recv_rtp_capabilities(extended: &ExtendedRtpCapabilities) -> RtpCapabilities {
    let mut caps = RtpCapabilities::default();

    for codec in extended.codecs.iter() {
        caps.codecs.push(RtpCodecCapability {
            kind: codec.kind,
            mime_type: codec.mime_type.clone(),
            preferred_payload_type: Some(codec.remote_payload_type),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: codec.local_parameters.clone(),
            rtcp_feedback: codec.rtcp_feedback.clone(),
        });

        if let Some(rtx_payload_type) = codec.remote_rtx_payload_type {
            caps.codecs.push(RtpCodecCapability {
                kind: codec.kind,
                mime_type: format!("{}/rtx", codec.kind),
                preferred_payload_type: Some(rtx_payload_type),
                clock_rate: codec.clock_rate,
                channels: None,
                parameters: apt_parameters(codec.remote_payload_type),
                rtcp_feedback: Vec::new(),
            });
        }
    }

    caps.header_extensions = extended
        .header_extensions
        .iter()
        .filter(|ext| ext.direction.can_receive())
        .map(|ext| RtpHeaderExtension {
            kind: ext.kind,
            uri: ext.uri.clone(),
            preferred_id: ext.recv_id,
            preferred_encrypt: ext.encrypt,
            direction: ext.direction,
        })
        .collect();

    caps
}

#[derive(Clone, Copy)]
enum Side {
    Local,
    Remote,
}

fn sending_parameters(kind: MediaKind, extended: &ExtendedRtpCapabilities, side: Side) -> RtpParameters {
    let mut params = RtpParameters {
        mid: None,
        codecs: Vec::new(),
        header_extensions: Vec::new(),
        encodings: Vec::new(),
        rtcp: RtcpParameters::default(),
    };

    for codec in extended.codecs_of_kind(kind) {
        let (payload_type, rtx_payload_type, parameters) = match side {
            Side::Local => (codec.local_payload_type, codec.local_rtx_payload_type, &codec.local_parameters),
            Side::Remote => (codec.remote_payload_type, codec.remote_rtx_payload_type, &codec.remote_parameters),
        };

        params.codecs.push(RtpCodecParameters {
            mime_type: codec.mime_type.clone(),
            payload_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: parameters.clone(),
            rtcp_feedback: codec.rtcp_feedback.clone(),
        });

        if let Some(rtx_payload_type) = rtx_payload_type {
            params.codecs.push(RtpCodecParameters {
                mime_type: format!("{}/rtx", kind),
                payload_type: rtx_payload_type,
                clock_rate: codec.clock_rate,
                channels: None,
                parameters: apt_parameters(payload_type),
                rtcp_feedback: Vec::new(),
            });
        }
    }

    params.header_extensions = extended
        .header_extensions
        .iter()
        .filter(|ext| ext.kind == kind && ext.direction.can_send())
        .map(|ext| RtpHeaderExtensionParameters {
            uri: ext.uri.clone(),
            id: ext.send_id,
            encrypt: ext.encrypt,
            parameters: CodecParameters::new(),
        })
        .collect();

    params
}

/// Parameters for sending a track of `kind`, with local payload types
pub fn get_sending_rtp_parameters(kind: MediaKind, extended: &ExtendedRtpCapabilities) -> RtpParameters {
    sending_parameters(kind, extended, Side::Local)
}

/// Parameters describing what the server will receive for a sent track
///
/// Uses remote payload types and parameters, and keeps only the congestion
/// control feedback matching the negotiated header extensions
/// (transport-cc wins over REMB).
pub fn get_sending_remote_rtp_parameters(
    kind: MediaKind,
    extended: &ExtendedRtpCapabilities,
) -> RtpParameters {
    let mut params = sending_parameters(kind, extended, Side::Remote);

    let has_uri = |uri: &str| params.header_extensions.iter().any(|ext| ext.uri == uri);
    let dropped: &[&str] = if has_uri(TRANSPORT_WIDE_CC_URI) {
        &["goog-remb"]
    } else if has_uri(ABS_SEND_TIME_URI) {
        &["transport-cc"]
    } else {
        &["transport-cc", "goog-remb"]
    };

    for codec in params.codecs.iter_mut() {
        codec
            .rtcp_feedback
            .retain(|fb| !dropped.contains(&fb.feedback_type.as_str()));
    }

    params
}

/// Keep the first codec (or the one matching `capability`) plus its RTX codec
pub fn reduce_codecs(
    codecs: &[RtpCodecParameters],
    capability: Option<&RtpCodecCapability>,
) -> Result<Vec<RtpCodecParameters>> {
    let index = match capability {
        None if codecs.is_empty() => return Ok(Vec::new()),
        None => 0,
        Some(capability) => codecs
            .iter()
            .position(|c| !c.is_rtx() && match_codecs(c.into(), capability.into(), false))
            .ok_or_else(|| {
                Error::unsupported(format!("no negotiated codec matches '{}'", capability.mime_type))
            })?,
    };

    let primary = &codecs[index];
    let mut reduced = vec![primary.clone()];

    if let Some(rtx) = codecs.get(index + 1) {
        if rtx.is_rtx() && rtx.apt() == Some(primary.payload_type) {
            reduced.push(rtx.clone());
        }
    }

    Ok(reduced)
}

/// Whether at least one codec of `kind` survived negotiation
pub fn can_send(kind: MediaKind, extended: &ExtendedRtpCapabilities) -> bool {
    extended.codecs_of_kind(kind).next().is_some()
}

/// Whether remote `params` can be received with the negotiated capabilities
pub fn can_receive(params: &RtpParameters, extended: &ExtendedRtpCapabilities) -> bool {
    let Some(first) = params.codecs.first() else {
        return false;
    };
    extended
        .codecs
        .iter()
        .any(|c| c.remote_payload_type == first.payload_type)
}

fn apt_parameters(payload_type: u8) -> CodecParameters {
    let mut parameters = CodecParameters::new();
    parameters.insert("apt".to_string(), json!(payload_type));
    parameters
}
