//! Structural validation (and light normalization) of capabilities and parameters
//!
//! Validators take `&mut` because they also fill in defaults: audio codecs
//! without `channels` get one channel, video codecs never carry `channels`,
//! SCTP streams get their `ordered` flag resolved.

use crate::error::{Error, Result};
use crate::rtp::{
    apt_of, MediaKind, RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpHeaderExtension, RtpHeaderExtensionParameters, RtpParameters,
};
use crate::sctp::{SctpCapabilities, SctpStreamParameters};

/// Split a mime type into its kind and subtype (`video/VP8` -> (Video, "VP8"))
pub(crate) fn split_mime_type(mime_type: &str) -> Result<(MediaKind, &str)> {
    if mime_type.is_empty() {
        return Err(Error::invalid_argument("missing codec mimeType"));
    }

    let (kind, subtype) = mime_type
        .split_once('/')
        .ok_or_else(|| Error::invalid_argument(format!("invalid codec mimeType '{}'", mime_type)))?;

    if subtype.is_empty() {
        return Err(Error::invalid_argument(format!("invalid codec mimeType '{}'", mime_type)));
    }

    let kind = kind
        .parse::<MediaKind>()
        .map_err(|_| Error::invalid_argument(format!("invalid codec mimeType '{}'", mime_type)))?;

    Ok((kind, subtype))
}

pub fn validate_rtp_capabilities(caps: &mut RtpCapabilities) -> Result<()> {
    for codec in caps.codecs.iter_mut() {
        validate_rtp_codec_capability(codec)?;
    }
    for ext in caps.header_extensions.iter() {
        validate_rtp_header_extension(ext)?;
    }
    Ok(())
}

pub fn validate_rtp_codec_capability(codec: &mut RtpCodecCapability) -> Result<()> {
    let (kind, _) = split_mime_type(&codec.mime_type)?;

    if kind != codec.kind {
        return Err(Error::invalid_argument(format!(
            "codec kind '{}' does not match mimeType '{}'",
            codec.kind, codec.mime_type
        )));
    }

    if codec.clock_rate == 0 {
        return Err(Error::invalid_argument(format!("codec '{}' has no clockRate", codec.mime_type)));
    }

    normalize_channels(kind, &mut codec.channels);

    if codec.is_rtx() && apt_of(&codec.parameters).is_none() {
        return Err(Error::invalid_argument(format!(
            "RTX codec '{}' lacks a numeric apt parameter",
            codec.mime_type
        )));
    }

    codec.rtcp_feedback.iter().try_for_each(validate_rtcp_feedback)
}

pub fn validate_rtp_header_extension(ext: &RtpHeaderExtension) -> Result<()> {
    if ext.uri.is_empty() {
        return Err(Error::invalid_argument("header extension without uri"));
    }
    if ext.preferred_id == 0 {
        return Err(Error::invalid_argument(format!(
            "header extension '{}' has invalid preferredId 0",
            ext.uri
        )));
    }
    Ok(())
}

fn validate_rtcp_feedback(fb: &RtcpFeedback) -> Result<()> {
    if fb.feedback_type.is_empty() {
        return Err(Error::invalid_argument("RTCP feedback without type"));
    }
    Ok(())
}

/// Validate RTP parameters received for a consumer
///
/// Besides structure, a consumer needs at least one codec and one encoding
/// carrying an SSRC.
pub fn validate_rtp_parameters(params: &mut RtpParameters) -> Result<()> {
    if params.codecs.is_empty() {
        return Err(Error::invalid_argument("rtpParameters without codecs"));
    }

    for codec in params.codecs.iter_mut() {
        validate_rtp_codec_parameters(codec)?;
    }

    for ext in params.header_extensions.iter() {
        validate_rtp_header_extension_parameters(ext)?;
    }

    if params.encodings.is_empty() {
        return Err(Error::invalid_argument("rtpParameters without encodings"));
    }
    if params.encodings.iter().any(|e| e.ssrc.is_none()) {
        return Err(Error::invalid_argument("rtpParameters encoding without ssrc"));
    }

    Ok(())
}

pub fn validate_rtp_codec_parameters(codec: &mut RtpCodecParameters) -> Result<()> {
    let (kind, _) = split_mime_type(&codec.mime_type)?;

    if codec.clock_rate == 0 {
        return Err(Error::invalid_argument(format!("codec '{}' has no clockRate", codec.mime_type)));
    }

    normalize_channels(kind, &mut codec.channels);

    if codec.is_rtx() && codec.apt().is_none() {
        return Err(Error::invalid_argument(format!(
            "RTX codec '{}' lacks a numeric apt parameter",
            codec.mime_type
        )));
    }

    codec.rtcp_feedback.iter().try_for_each(validate_rtcp_feedback)
}

fn validate_rtp_header_extension_parameters(ext: &RtpHeaderExtensionParameters) -> Result<()> {
    if ext.uri.is_empty() {
        return Err(Error::invalid_argument("header extension without uri"));
    }
    if ext.id == 0 {
        return Err(Error::invalid_argument(format!("header extension '{}' has invalid id 0", ext.uri)));
    }
    Ok(())
}

pub fn validate_sctp_capabilities(caps: &SctpCapabilities) -> Result<()> {
    if caps.num_streams.os == 0 || caps.num_streams.mis == 0 {
        return Err(Error::invalid_argument("SCTP capabilities with zero streams"));
    }
    Ok(())
}

pub fn validate_sctp_stream_parameters(params: &mut SctpStreamParameters) -> Result<()> {
    if params.stream_id.is_none() {
        return Err(Error::invalid_argument("SCTP stream parameters without streamId"));
    }

    let limited = params.max_packet_life_time.is_some() || params.max_retransmits.is_some();

    if params.max_packet_life_time.is_some() && params.max_retransmits.is_some() {
        return Err(Error::invalid_argument(
            "cannot set both maxPacketLifeTime and maxRetransmits",
        ));
    }

    match params.ordered {
        Some(true) if limited => {
            return Err(Error::invalid_argument(
                "ordered streams cannot have maxPacketLifeTime or maxRetransmits",
            ))
        }
        Some(_) => {}
        None => params.ordered = Some(!limited),
    }

    Ok(())
}

fn normalize_channels(kind: MediaKind, channels: &mut Option<u8>) {
    match kind {
        MediaKind::Audio => {
            if channels.is_none() {
                *channels = Some(1);
            }
        }
        MediaKind::Video => *channels = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{RtpEncodingParameters, RtcpParameters};

    fn codec(kind: MediaKind, mime: &str) -> RtpCodecCapability {
        RtpCodecCapability {
            kind,
            mime_type: mime.to_string(),
            preferred_payload_type: Some(100),
            clock_rate: 90000,
            channels: None,
            parameters: Default::default(),
            rtcp_feedback: vec![],
        }
    }

    #[test]
    fn test_missing_mime_type_is_invalid_argument() {
        let mut caps = RtpCapabilities {
            codecs: vec![codec(MediaKind::Video, "")],
            header_extensions: vec![],
        };
        assert!(validate_rtp_capabilities(&mut caps).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_kind_mismatch_is_invalid_argument() {
        let mut c = codec(MediaKind::Audio, "video/VP8");
        assert!(validate_rtp_codec_capability(&mut c).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_rtx_requires_apt() {
        let mut c = codec(MediaKind::Video, "video/rtx");
        assert!(validate_rtp_codec_capability(&mut c).is_err());

        c.parameters.insert("apt".into(), serde_json::json!(100));
        assert!(validate_rtp_codec_capability(&mut c).is_ok());
    }

    #[test]
    fn test_channels_normalization() {
        let mut audio = codec(MediaKind::Audio, "audio/opus");
        audio.clock_rate = 48000;
        validate_rtp_codec_capability(&mut audio).unwrap();
        assert_eq!(audio.channels, Some(1));

        let mut video = codec(MediaKind::Video, "video/VP8");
        video.channels = Some(2);
        validate_rtp_codec_capability(&mut video).unwrap();
        assert_eq!(video.channels, None);
    }

    #[test]
    fn test_rtp_parameters_need_ssrc() {
        let mut params = RtpParameters {
            mid: None,
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 100,
                clock_rate: 48000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters::default()],
            rtcp: RtcpParameters::default(),
        };
        assert!(validate_rtp_parameters(&mut params).is_err());

        params.encodings[0].ssrc = Some(1234);
        assert!(validate_rtp_parameters(&mut params).is_ok());
    }

    #[test]
    fn test_sctp_stream_ordering_resolution() {
        let mut reliable = SctpStreamParameters {
            stream_id: Some(1),
            ..Default::default()
        };
        validate_sctp_stream_parameters(&mut reliable).unwrap();
        assert_eq!(reliable.ordered, Some(true));

        let mut lossy = SctpStreamParameters {
            stream_id: Some(2),
            max_retransmits: Some(0),
            ..Default::default()
        };
        validate_sctp_stream_parameters(&mut lossy).unwrap();
        assert_eq!(lossy.ordered, Some(false));

        let mut both = SctpStreamParameters {
            stream_id: Some(3),
            max_retransmits: Some(1),
            max_packet_life_time: Some(100),
            ..Default::default()
        };
        assert!(validate_sctp_stream_parameters(&mut both).is_err());

        let mut missing = SctpStreamParameters::default();
        assert!(validate_sctp_stream_parameters(&mut missing).is_err());
    }
}
