//! Device: capability negotiation and transport factory
//!
//! A [`Device`] represents the local endpoint. It is loaded exactly once with
//! the server's RTP capabilities; loading intersects them with the engine's
//! native capabilities and freezes the result. Every transport the device
//! creates afterwards shares that negotiated set.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rvoip_sfu_client::{Device, RtpCapabilities, TransportOptions};
//!
//! let device = Device::new(engine_factory);
//! device.load(RtpCapabilities::from_json(router_caps_json)?).await?;
//!
//! if device.can_produce("video")? {
//!     let transport = device.create_send_transport(options, signaling)?;
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::engine::{EngineFactory, EngineVariant};
use crate::error::{Error, Result};
use crate::ortc;
use crate::rtp::{ExtendedRtpCapabilities, MediaKind, RtpCapabilities};
use crate::sctp::SctpCapabilities;
use crate::signaling::{app_data_from, SignalingChannel};
use crate::transport::{Transport, TransportDirection, TransportInit, TransportOptions};

/// Everything computed by a successful load
#[derive(Debug, Clone)]
struct LoadedState {
    extended: Arc<ExtendedRtpCapabilities>,
    recv_rtp_capabilities: RtpCapabilities,
    can_produce_by_kind: HashMap<MediaKind, bool>,
    sctp_capabilities: SctpCapabilities,
}

/// The local endpoint
pub struct Device {
    factory: Arc<dyn EngineFactory>,
    config: DeviceConfig,
    /// Set while loading or once loaded; reset if loading fails
    loading: AtomicBool,
    state: RwLock<Option<LoadedState>>,
}

impl Device {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self::with_config(factory, DeviceConfig::default())
    }

    pub fn with_config(factory: Arc<dyn EngineFactory>, config: DeviceConfig) -> Self {
        Self {
            factory,
            config,
            loading: AtomicBool::new(false),
            state: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Session-description flavour of the engine
    pub fn engine_variant(&self) -> EngineVariant {
        self.factory.variant()
    }

    pub fn loaded(&self) -> bool {
        self.state.read().is_some()
    }

    /// Negotiate with the server's RTP capabilities
    ///
    /// Fails with an invalid-state error if the device is already loaded (or
    /// being loaded), whatever the input.
    pub async fn load(&self, remote_capabilities: RtpCapabilities) -> Result<()> {
        if self.loading.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_state("device already loaded"));
        }

        match self.negotiate(remote_capabilities).await {
            Ok(state) => {
                info!(
                    variant = %self.factory.variant(),
                    codecs = state.extended.codecs.len(),
                    header_extensions = state.extended.header_extensions.len(),
                    "device loaded"
                );
                *self.state.write() = Some(state);
                Ok(())
            }
            Err(err) => {
                self.loading.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn negotiate(&self, mut remote: RtpCapabilities) -> Result<LoadedState> {
        ortc::validate_rtp_capabilities(&mut remote)?;

        let mut native = self.factory.native_rtp_capabilities().await?;
        ortc::validate_rtp_capabilities(&mut native)?;
        debug!(?native, "native RTP capabilities");

        let extended = ortc::get_extended_rtp_capabilities(&native, &remote);
        let recv_rtp_capabilities = ortc::get_recv_rtp_capabilities(&extended);

        let can_produce_by_kind = [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .map(|kind| (kind, ortc::can_send(kind, &extended)))
            .collect();

        let sctp_capabilities = self.factory.native_sctp_capabilities().await?;
        ortc::validate_sctp_capabilities(&sctp_capabilities)?;

        Ok(LoadedState {
            extended: Arc::new(extended),
            recv_rtp_capabilities,
            can_produce_by_kind,
            sctp_capabilities,
        })
    }

    fn loaded_state(&self) -> Result<LoadedState> {
        self.state
            .read()
            .clone()
            .ok_or_else(|| Error::invalid_state("device not loaded"))
    }

    /// RTP capabilities to announce to the server for receiving
    pub fn rtp_capabilities(&self) -> Result<RtpCapabilities> {
        Ok(self.loaded_state()?.recv_rtp_capabilities)
    }

    pub fn sctp_capabilities(&self) -> Result<SctpCapabilities> {
        Ok(self.loaded_state()?.sctp_capabilities)
    }

    pub fn extended_rtp_capabilities(&self) -> Result<Arc<ExtendedRtpCapabilities>> {
        Ok(self.loaded_state()?.extended)
    }

    /// Whether media of `kind` (`"audio"` or `"video"`) can be sent
    pub fn can_produce(&self, kind: &str) -> Result<bool> {
        let state = self.loaded_state()?;
        let kind: MediaKind = kind.parse()?;
        Ok(state.can_produce_by_kind.get(&kind).copied().unwrap_or(false))
    }

    pub fn can_produce_kind(&self, kind: MediaKind) -> Result<bool> {
        let state = self.loaded_state()?;
        Ok(state.can_produce_by_kind.get(&kind).copied().unwrap_or(false))
    }

    pub fn create_send_transport(
        &self,
        options: TransportOptions,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Result<Transport> {
        self.create_transport(TransportDirection::Send, options, signaling)
    }

    pub fn create_recv_transport(
        &self,
        options: TransportOptions,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Result<Transport> {
        self.create_transport(TransportDirection::Recv, options, signaling)
    }

    fn create_transport(
        &self,
        direction: TransportDirection,
        options: TransportOptions,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Result<Transport> {
        let state = self.loaded_state()?;

        if options.id.is_empty() {
            return Err(Error::invalid_argument("missing transport id"));
        }
        let ice_parameters = options
            .ice_parameters
            .ok_or_else(|| Error::invalid_argument("missing iceParameters"))?;
        let ice_candidates = options
            .ice_candidates
            .ok_or_else(|| Error::invalid_argument("missing iceCandidates"))?;
        let dtls_parameters = options
            .dtls_parameters
            .ok_or_else(|| Error::invalid_argument("missing dtlsParameters"))?;
        let app_data = app_data_from(options.app_data)?;

        Transport::new(
            TransportInit {
                id: options.id,
                direction,
                ice_parameters,
                ice_candidates,
                dtls_parameters,
                sctp_parameters: options.sctp_parameters,
                ice_servers: options.ice_servers,
                app_data,
                extended: state.extended,
                config: self.config.clone(),
            },
            self.factory.as_ref(),
            signaling,
        )
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("variant", &self.factory.variant())
            .field("loaded", &self.loaded())
            .finish()
    }
}
