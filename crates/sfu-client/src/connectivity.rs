//! ICE and DTLS parameters of a transport
//!
//! The connectivity (ICE) and security (DTLS) parameters are produced by the
//! remote server when it creates its side of a transport and are handed to
//! the client verbatim. They are only stored, forwarded to the engine and,
//! for Plan-B engines, written into the remote session description.

use std::fmt;

use serde::{Deserialize, Serialize};

/// ICE credentials of the remote transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTcpType {
    Active,
    Passive,
    So,
}

/// One remote ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    #[serde(alias = "ip")]
    pub address: String,
    pub protocol: IceProtocol,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: IceCandidateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<IceTcpType>,
}

impl IceCandidate {
    /// Value of an `a=candidate` line (component 1, RTP/RTCP muxed)
    pub fn to_sdp_value(&self) -> String {
        let protocol = match self.protocol {
            IceProtocol::Udp => "udp",
            IceProtocol::Tcp => "tcp",
        };
        let candidate_type = match self.candidate_type {
            IceCandidateType::Host => "host",
            IceCandidateType::Srflx => "srflx",
            IceCandidateType::Prflx => "prflx",
            IceCandidateType::Relay => "relay",
        };
        let mut value = format!(
            "{} 1 {} {} {} {} typ {}",
            self.foundation, protocol, self.priority, self.address, self.port, candidate_type
        );
        if let Some(tcp_type) = self.tcp_type {
            let tcp_type = match tcp_type {
                IceTcpType::Active => "active",
                IceTcpType::Passive => "passive",
                IceTcpType::So => "so",
            };
            value.push_str(" tcptype ");
            value.push_str(tcp_type);
        }
        value
    }
}

/// STUN/TURN server handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// DTLS role of one side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

impl Default for DtlsRole {
    fn default() -> Self {
        Self::Auto
    }
}

impl DtlsRole {
    /// Role the local side must take given the remote role
    pub fn local_counterpart(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
            Self::Auto => Self::Client,
        }
    }

    /// `a=setup` value describing this role
    pub fn setup_attribute(self) -> &'static str {
        match self {
            Self::Client => "active",
            Self::Server => "passive",
            Self::Auto => "actpass",
        }
    }
}

impl fmt::Display for DtlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Certificate fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS (security) parameters of one side of a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}
