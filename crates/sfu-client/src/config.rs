//! Device configuration
//!
//! Configuration is plain data: it can be built in code with the `with_*`
//! builder methods or loaded from JSON, and is handed to
//! [`Device::with_config`](crate::Device::with_config). Every transport the
//! device creates inherits a copy.
//!
//! # Key Components
//!
//! - **DeviceConfig** - top-level configuration
//! - **ProducerDefaults** - track handling defaults applied to every producer
//!   unless the produce call overrides them
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_sfu_client::config::{DeviceConfig, ProducerDefaults};
//!
//! let config = DeviceConfig::new()
//!     .with_producer_defaults(ProducerDefaults {
//!         stop_tracks: false,
//!         ..Default::default()
//!     })
//!     .with_event_channel_capacity(64);
//!
//! assert!(!config.producer_defaults.stop_tracks);
//! assert!(config.producer_defaults.disable_track_on_pause);
//! assert_eq!(config.event_channel_capacity, 64);
//! ```
//!
//! ## Loading from JSON
//!
//! ```rust
//! use rvoip_sfu_client::config::DeviceConfig;
//!
//! let config = DeviceConfig::from_json_str(r#"{ "scalability": { "maxDigits": 3 } }"#).unwrap();
//! assert_eq!(config.scalability.max_digits, 3);
//! assert_eq!(config.event_channel_capacity, 256);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scalability::ScalabilityModeGrammar;

/// Default capacity of every broadcast event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Track handling applied to producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProducerDefaults {
    /// Stop the track when the producer is closed or its track is replaced
    pub stop_tracks: bool,
    /// Disable the track while the producer is paused
    pub disable_track_on_pause: bool,
    /// Deactivate the sender's encodings while paused so no RTP is sent
    pub zero_rtp_on_pause: bool,
}

impl Default for ProducerDefaults {
    fn default() -> Self {
        Self {
            stop_tracks: true,
            disable_track_on_pause: true,
            zero_rtp_on_pause: false,
        }
    }
}

/// Configuration of a [`Device`](crate::Device) and the transports it creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
    pub producer_defaults: ProducerDefaults,
    /// Grammar used to validate `scalability_mode` of produced encodings
    pub scalability: ScalabilityModeGrammar,
    /// Capacity of each transport/entity event channel
    pub event_channel_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            producer_defaults: ProducerDefaults::default(),
            scalability: ScalabilityModeGrammar::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_producer_defaults(mut self, defaults: ProducerDefaults) -> Self {
        self.producer_defaults = defaults;
        self
    }

    pub fn with_scalability_grammar(mut self, grammar: ScalabilityModeGrammar) -> Self {
        self.scalability = grammar;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Load a configuration from JSON; absent fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the device unusable
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(Error::invalid_argument("event_channel_capacity must be at least 1"));
        }
        if self.scalability.max_digits == 0 {
            return Err(Error::invalid_argument("scalability max_digits must be at least 1"));
        }
        Ok(())
    }
}
