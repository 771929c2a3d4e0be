//! Incremental remote session description for Plan-B engines
//!
//! Plan-B engines multiplex every stream of one kind into a single media
//! section, told apart only by SSRC lines. The media server never sends a
//! description, so the receiving transport synthesizes the remote offer
//! itself, growing it one stream at a time:
//!
//! ```text
//! m=video ...            <- written once, when the mid first appears
//! a=mid / a=rtpmap ...   <- description block, never rewritten
//! a=ssrc:1111 cname:..   \
//! a=ssrc:1111 msid:s t1   > one grouping per (stream_id, track_id)
//! a=ssrc-group:FID ..    /
//! a=ssrc:3333 ...        <- next grouping
//! ```
//!
//! Sections live in an arena (`Vec`) indexed by mid, so serialization order
//! is the order in which mids first appeared.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use super::{Attribute, MediaDescription, Origin, SessionDescription};
use crate::connectivity::{DtlsParameters, DtlsRole, IceCandidate, IceParameters};
use crate::error::{Error, Result};
use crate::rtp::{MediaKind, RtpParameters};
use crate::sctp::SctpParameters;

const DATA_CHANNEL_MID: &str = "datachannel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Media(MediaKind),
    Application,
}

/// SSRC lines of one remote stream
#[derive(Debug, Clone)]
struct StreamGrouping {
    stream_id: String,
    track_id: String,
    fingerprint: BTreeSet<u32>,
    lines: Vec<Attribute>,
}

#[derive(Debug, Clone)]
struct MediaSection {
    kind: SectionKind,
    port: u16,
    protocol: &'static str,
    formats: Vec<String>,
    description: Vec<Attribute>,
    groupings: Vec<StreamGrouping>,
}

/// Remote description of one Plan-B transport
#[derive(Debug, Clone)]
pub struct RemoteSdp {
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    dtls_parameters: DtlsParameters,
    sctp_parameters: Option<SctpParameters>,
    session_id: u64,
    version: u64,
    sections: Vec<MediaSection>,
    mids: Vec<String>,
    index: HashMap<String, usize>,
}

impl RemoteSdp {
    pub fn new(
        ice_parameters: IceParameters,
        ice_candidates: Vec<IceCandidate>,
        dtls_parameters: DtlsParameters,
        sctp_parameters: Option<SctpParameters>,
    ) -> Self {
        Self {
            ice_parameters,
            ice_candidates,
            dtls_parameters,
            sctp_parameters,
            session_id: rand::thread_rng().gen_range(1_000_000..u64::from(u32::MAX)),
            version: 0,
            sections: Vec::new(),
            mids: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add one remote stream to the section of `mid`
    ///
    /// The section and its description block are created from
    /// `offer_rtp_parameters` on first use of the mid only. A stream already
    /// present with the same `(stream_id, track_id)` has its SSRC lines
    /// replaced.
    pub fn receive(
        &mut self,
        mid: &str,
        kind: MediaKind,
        offer_rtp_parameters: &RtpParameters,
        stream_id: &str,
        track_id: &str,
    ) {
        let idx = match self.index.get(mid) {
            Some(&idx) => idx,
            None => {
                debug!(mid, %kind, "creating remote media section");
                self.push_section(mid, media_section(mid, kind, offer_rtp_parameters))
            }
        };

        let grouping = stream_grouping(offer_rtp_parameters, stream_id, track_id);
        let section = &mut self.sections[idx];
        match section
            .groupings
            .iter_mut()
            .find(|g| g.stream_id == stream_id && g.track_id == track_id)
        {
            Some(existing) => *existing = grouping,
            None => section.groupings.push(grouping),
        }

        self.version += 1;
    }

    /// Remove the streams of `mid` whose SSRC set equals the parameters' SSRCs
    pub fn stop_receiving(&mut self, mid: &str, offer_rtp_parameters: &RtpParameters) {
        let Some(&idx) = self.index.get(mid) else {
            debug!(mid, "stop_receiving for unknown mid ignored");
            return;
        };

        let fingerprint: BTreeSet<u32> = offer_rtp_parameters.ssrcs().into_iter().collect();
        let section = &mut self.sections[idx];
        let before = section.groupings.len();
        section.groupings.retain(|g| g.fingerprint != fingerprint);

        if section.groupings.len() != before {
            self.version += 1;
        }
    }

    /// Add the SCTP association section; a no-op once present
    pub fn receive_sctp_association(&mut self) -> Result<()> {
        if self.index.contains_key(DATA_CHANNEL_MID) {
            return Ok(());
        }
        let sctp = self
            .sctp_parameters
            .ok_or_else(|| Error::unsupported("transport has no SCTP parameters"))?;

        let section = MediaSection {
            kind: SectionKind::Application,
            port: 9,
            protocol: "DTLS/SCTP",
            formats: vec![sctp.port.to_string()],
            description: vec![
                Attribute::value("mid", DATA_CHANNEL_MID),
                Attribute::value("sctpmap", format!("{} webrtc-datachannel {}", sctp.port, sctp.os)),
                Attribute::value("max-message-size", sctp.max_message_size.to_string()),
            ],
            groupings: Vec::new(),
        };
        self.push_section(DATA_CHANNEL_MID, section);
        self.version += 1;
        Ok(())
    }

    pub fn update_ice_parameters(&mut self, ice_parameters: IceParameters) {
        self.ice_parameters = ice_parameters;
        self.version += 1;
    }

    /// Set the DTLS role announced for the remote side
    pub fn update_dtls_role(&mut self, role: DtlsRole) {
        if self.dtls_parameters.role != role {
            self.dtls_parameters.role = role;
            self.version += 1;
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mids in section order
    pub fn mids(&self) -> &[String] {
        &self.mids
    }

    /// Number of streams currently described in the section of `mid`
    pub fn stream_count(&self, mid: &str) -> usize {
        self.index
            .get(mid)
            .map(|&idx| self.sections[idx].groupings.len())
            .unwrap_or(0)
    }

    /// Render the description; calling it twice without mutation yields the
    /// same text
    pub fn serialize(&self) -> String {
        self.session().to_string()
    }

    fn push_section(&mut self, mid: &str, section: MediaSection) -> usize {
        let idx = self.sections.len();
        self.sections.push(section);
        self.mids.push(mid.to_string());
        self.index.insert(mid.to_string(), idx);
        idx
    }

    fn session(&self) -> SessionDescription {
        let mut attributes = Vec::new();
        if self.ice_parameters.ice_lite {
            attributes.push(Attribute::flag("ice-lite"));
        }
        if !self.mids.is_empty() {
            attributes.push(Attribute::value("group", format!("BUNDLE {}", self.mids.join(" "))));
        }
        attributes.push(Attribute::value("msid-semantic", " WMS *"));
        for fingerprint in &self.dtls_parameters.fingerprints {
            attributes.push(Attribute::value(
                "fingerprint",
                format!("{} {}", fingerprint.algorithm, fingerprint.value),
            ));
        }

        let media = self
            .sections
            .iter()
            .map(|section| self.render_section(section))
            .collect();

        SessionDescription {
            origin: Origin {
                username: "rvoip-sfu-client".to_string(),
                session_id: self.session_id,
                session_version: self.version,
                address: "0.0.0.0".to_string(),
            },
            session_name: "-".to_string(),
            attributes,
            media,
        }
    }

    fn render_section(&self, section: &MediaSection) -> MediaDescription {
        let mut attributes = vec![
            Attribute::value("ice-ufrag", self.ice_parameters.username_fragment.clone()),
            Attribute::value("ice-pwd", self.ice_parameters.password.clone()),
        ];
        attributes.extend(
            self.ice_candidates
                .iter()
                .map(|c| Attribute::value("candidate", c.to_sdp_value())),
        );
        attributes.push(Attribute::flag("end-of-candidates"));
        attributes.push(Attribute::value("ice-options", "renomination"));
        attributes.push(Attribute::value("setup", self.dtls_parameters.role.setup_attribute()));
        attributes.extend(section.description.iter().cloned());
        for grouping in &section.groupings {
            attributes.extend(grouping.lines.iter().cloned());
        }

        let media = match section.kind {
            SectionKind::Media(kind) => kind.as_str(),
            SectionKind::Application => "application",
        };

        MediaDescription {
            media: media.to_string(),
            port: section.port,
            protocol: section.protocol.to_string(),
            formats: section.formats.clone(),
            connection: Some("127.0.0.1".to_string()),
            attributes,
        }
    }
}

fn media_section(mid: &str, kind: MediaKind, params: &RtpParameters) -> MediaSection {
    let mut description = vec![Attribute::value("mid", mid), Attribute::flag("sendonly")];

    for codec in &params.codecs {
        let (_, name) = codec.mime_type.split_once('/').unwrap_or(("", codec.mime_type.as_str()));
        let rtpmap = match codec.channels {
            Some(channels) if channels > 1 => {
                format!("{} {}/{}/{}", codec.payload_type, name, codec.clock_rate, channels)
            }
            _ => format!("{} {}/{}", codec.payload_type, name, codec.clock_rate),
        };
        description.push(Attribute::value("rtpmap", rtpmap));

        for fb in &codec.rtcp_feedback {
            let value = if fb.parameter.is_empty() {
                format!("{} {}", codec.payload_type, fb.feedback_type)
            } else {
                format!("{} {} {}", codec.payload_type, fb.feedback_type, fb.parameter)
            };
            description.push(Attribute::value("rtcp-fb", value));
        }

        if !codec.parameters.is_empty() {
            let fmtp = codec
                .parameters
                .iter()
                .map(|(key, value)| format!("{}={}", key, fmtp_value(value)))
                .collect::<Vec<_>>()
                .join(";");
            description.push(Attribute::value("fmtp", format!("{} {}", codec.payload_type, fmtp)));
        }
    }

    for ext in &params.header_extensions {
        description.push(Attribute::value("extmap", format!("{} {}", ext.id, ext.uri)));
    }

    description.push(Attribute::flag("rtcp-mux"));
    if params.rtcp.reduced_size {
        description.push(Attribute::flag("rtcp-rsize"));
    }

    MediaSection {
        kind: SectionKind::Media(kind),
        port: 7,
        protocol: "UDP/TLS/RTP/SAVPF",
        formats: params.codecs.iter().map(|c| c.payload_type.to_string()).collect(),
        description,
        groupings: Vec::new(),
    }
}

fn stream_grouping(params: &RtpParameters, stream_id: &str, track_id: &str) -> StreamGrouping {
    let cname = params.rtcp.cname.as_deref().unwrap_or(stream_id);
    let mut lines = Vec::new();

    let ssrc_lines = |ssrc: u32, lines: &mut Vec<Attribute>| {
        lines.push(Attribute::value("ssrc", format!("{} cname:{}", ssrc, cname)));
        lines.push(Attribute::value("ssrc", format!("{} msid:{} {}", ssrc, stream_id, track_id)));
    };

    for encoding in &params.encodings {
        let Some(ssrc) = encoding.ssrc else {
            continue;
        };
        ssrc_lines(ssrc, &mut lines);
        if let Some(rtx) = encoding.rtx {
            ssrc_lines(rtx.ssrc, &mut lines);
            lines.push(Attribute::value("ssrc-group", format!("FID {} {}", ssrc, rtx.ssrc)));
        }
    }

    StreamGrouping {
        stream_id: stream_id.to_string(),
        track_id: track_id.to_string(),
        fingerprint: params.ssrcs().into_iter().collect(),
        lines,
    }
}

fn fmtp_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        other => other.to_string(),
    }
}
