//! RTP capability and parameter model
//!
//! These types mirror the JSON shape exchanged with an ORTC-style selective
//! forwarding unit (camelCase field names), so remote capabilities can be
//! deserialized directly from the signaling payload.
//!
//! - [`RtpCapabilities`] - what a party can send/receive (codecs, header extensions)
//! - [`RtpParameters`] - the concrete parameters of one stream
//! - [`ExtendedRtpCapabilities`] - the negotiated intersection, see [`crate::ortc`]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Codec specific parameters (`a=fmtp` content), kept sorted for stable output
pub type CodecParameters = BTreeMap<String, Value>;

/// Media kind of a track, codec or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(Error::invalid_argument(format!("invalid media kind '{}'", other))),
        }
    }
}

/// Direction of an RTP header extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderExtensionDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Default for HeaderExtensionDirection {
    fn default() -> Self {
        Self::SendRecv
    }
}

impl HeaderExtensionDirection {
    pub fn can_send(&self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }

    /// The same direction seen from the other party
    pub fn reversed(self) -> Self {
        match self {
            Self::SendOnly => Self::RecvOnly,
            Self::RecvOnly => Self::SendOnly,
            other => other,
        }
    }

    /// The more restrictive of two directions declared from the same side
    ///
    /// `sendrecv` yields to anything, `inactive` wins over anything, and
    /// `sendonly` combined with `recvonly` leaves nothing usable.
    pub fn restrict(self, other: Self) -> Self {
        let send = self.can_send() && other.can_send();
        let recv = self.can_receive() && other.can_receive();
        match (send, recv) {
            (true, true) => Self::SendRecv,
            (true, false) => Self::SendOnly,
            (false, true) => Self::RecvOnly,
            (false, false) => Self::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }
}

/// RTCP feedback mechanism supported by a codec
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub feedback_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

impl RtcpFeedback {
    pub fn new(feedback_type: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            feedback_type: feedback_type.into(),
            parameter: parameter.into(),
        }
    }
}

/// A codec a party is able to send or receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    /// `type/subtype`, e.g. `audio/opus` or `video/rtx`
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: CodecParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Whether this is a retransmission codec (`*/rtx`)
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime_type(&self.mime_type)
    }
}

/// An RTP header extension a party supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    pub kind: MediaKind,
    #[serde(default)]
    pub uri: String,
    pub preferred_id: u8,
    #[serde(default)]
    pub preferred_encrypt: bool,
    #[serde(default)]
    pub direction: HeaderExtensionDirection,
}

/// Complete RTP capabilities of a party
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl RtpCapabilities {
    /// Deserialize capabilities received from the signaling channel
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Codec of one concrete RTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    #[serde(default)]
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: CodecParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime_type(&self.mime_type)
    }

    /// The `apt` parameter of an RTX codec
    pub fn apt(&self) -> Option<u8> {
        apt_of(&self.parameters)
    }
}

/// Header extension of one concrete RTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    #[serde(default)]
    pub uri: String,
    pub id: u8,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub parameters: CodecParameters,
}

/// RTX stream associated with an encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtxParameters {
    pub ssrc: u32,
}

/// One encoding (simulcast layer or single stream) of an RTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtxParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Default for RtpEncodingParameters {
    fn default() -> Self {
        Self {
            ssrc: None,
            rid: None,
            codec_payload_type: None,
            rtx: None,
            dtx: None,
            scalability_mode: None,
            scale_resolution_down_by: None,
            max_bitrate: None,
            max_framerate: None,
            active: true,
        }
    }
}

/// RTCP settings of an RTP stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_true")]
    pub reduced_size: bool,
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
        }
    }
}

/// Concrete parameters of one RTP stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
}

impl RtpParameters {
    /// Every SSRC (primary and RTX) carried by the encodings, in encoding order
    pub fn ssrcs(&self) -> Vec<u32> {
        self.encodings
            .iter()
            .flat_map(|e| e.ssrc.into_iter().chain(e.rtx.map(|r| r.ssrc)))
            .collect()
    }
}

/// Negotiated codec: the pairing of one local and one remote codec
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedCodec {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub local_payload_type: u8,
    pub local_rtx_payload_type: Option<u8>,
    pub remote_payload_type: u8,
    pub remote_rtx_payload_type: Option<u8>,
    pub local_parameters: CodecParameters,
    pub remote_parameters: CodecParameters,
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// Negotiated header extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedHeaderExtension {
    pub kind: MediaKind,
    pub uri: String,
    pub send_id: u8,
    pub recv_id: u8,
    pub encrypt: bool,
    pub direction: HeaderExtensionDirection,
}

/// The intersection of local and remote RTP capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedRtpCapabilities {
    pub codecs: Vec<ExtendedCodec>,
    pub header_extensions: Vec<ExtendedHeaderExtension>,
}

impl ExtendedRtpCapabilities {
    pub fn codecs_of_kind(&self, kind: MediaKind) -> impl Iterator<Item = &ExtendedCodec> {
        self.codecs.iter().filter(move |c| c.kind == kind)
    }
}

pub(crate) fn is_rtx_mime_type(mime_type: &str) -> bool {
    mime_type
        .split_once('/')
        .map(|(_, subtype)| subtype.eq_ignore_ascii_case("rtx"))
        .unwrap_or(false)
}

/// `apt` may arrive as a JSON number or a numeric string
pub(crate) fn apt_of(parameters: &CodecParameters) -> Option<u8> {
    match parameters.get("apt")? {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_kind_parsing() {
        assert_eq!("audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("data".parse::<MediaKind>().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_direction_restrict() {
        use HeaderExtensionDirection::*;
        assert_eq!(SendRecv.restrict(SendRecv), SendRecv);
        assert_eq!(SendRecv.restrict(RecvOnly), RecvOnly);
        assert_eq!(SendOnly.restrict(SendRecv), SendOnly);
        assert_eq!(SendOnly.restrict(RecvOnly), Inactive);
        assert_eq!(Inactive.restrict(SendRecv), Inactive);
    }

    #[test]
    fn test_direction_reversed() {
        use HeaderExtensionDirection::*;
        assert_eq!(SendOnly.reversed(), RecvOnly);
        assert_eq!(RecvOnly.reversed(), SendOnly);
        assert_eq!(SendRecv.reversed(), SendRecv);
        assert_eq!(Inactive.reversed(), Inactive);
    }

    #[test]
    fn test_capabilities_from_json() {
        let caps = RtpCapabilities::from_json(json!({
            "codecs": [
                { "kind": "video", "mimeType": "video/VP8", "preferredPayloadType": 101, "clockRate": 90000 },
                { "kind": "video", "mimeType": "video/rtx", "preferredPayloadType": 102, "clockRate": 90000,
                  "parameters": { "apt": 101 } }
            ],
            "headerExtensions": [
                { "kind": "video", "uri": "urn:3gpp:video-orientation", "preferredId": 4 }
            ]
        }))
        .unwrap();

        assert_eq!(caps.codecs.len(), 2);
        assert!(caps.codecs[1].is_rtx());
        assert_eq!(apt_of(&caps.codecs[1].parameters), Some(101));
        assert_eq!(caps.header_extensions[0].direction, HeaderExtensionDirection::SendRecv);
    }

    #[test]
    fn test_parameters_ssrcs() {
        let params = RtpParameters {
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(1111),
                rtx: Some(RtxParameters { ssrc: 2222 }),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(params.ssrcs(), vec![1111, 2222]);
    }
}
