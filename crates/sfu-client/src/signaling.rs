//! Signaling collaborator contract
//!
//! The application owns the channel to the media server. Transports call it
//! when the server has to learn about something: the local DTLS parameters
//! (once per transport) and every new producer / data producer, for which
//! the server answers with the id it assigned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connectivity::DtlsParameters;
use crate::error::{Error, Result};
use crate::rtp::{MediaKind, RtpParameters};
use crate::sctp::SctpStreamParameters;

/// Application data attached to transports and entities
pub type AppData = Map<String, Value>;

/// Accept absent app data or a JSON object; anything else is rejected
pub(crate) fn app_data_from(value: Option<Value>) -> Result<AppData> {
    match value {
        None | Some(Value::Null) => Ok(AppData::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(Error::invalid_argument(format!(
            "appData must be an object, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceDataRequest {
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
    pub app_data: AppData,
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send the local DTLS parameters of a transport to the server
    async fn connect(&self, transport_id: &str, dtls_parameters: DtlsParameters) -> Result<()>;

    /// Announce a producer; returns the server-assigned producer id
    async fn produce(&self, transport_id: &str, request: ProduceRequest) -> Result<String>;

    /// Announce a data producer; returns the server-assigned id
    async fn produce_data(&self, transport_id: &str, request: ProduceDataRequest) -> Result<String>;
}
