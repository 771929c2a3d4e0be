//! Scalability mode parsing
//!
//! A scalability mode is a compact token describing how many spatial and
//! temporal layers a layered (simulcast or SVC) encoding carries, e.g.
//! `L3T3`, `S2T1` or `L3T2_KEY`.
//!
//! Grammar: `("L" | "S") <spatial> "T" <temporal> ["_KEY"]`, where both
//! counts are decimal numbers of at most [`ScalabilityModeGrammar::max_digits`]
//! digits. Anything after the optional `_KEY` suffix is ignored so that
//! extended tokens such as `L2T2_KEY_SHIFT` still yield their layer counts.
//!
//! Parsing never fails: absent or malformed input falls back to a single
//! spatial and temporal layer.
//!
//! ```rust
//! use rvoip_sfu_client::scalability::parse_scalability_mode;
//!
//! let mode = parse_scalability_mode(Some("L3T2_KEY"));
//! assert_eq!((mode.spatial_layers, mode.temporal_layers), (3, 2));
//! assert!(mode.ksvc);
//!
//! let fallback = parse_scalability_mode(Some("S200T3"));
//! assert_eq!((fallback.spatial_layers, fallback.temporal_layers), (1, 1));
//! ```

use nom::{
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, one_of, satisfy},
    combinator::{map_res, not, opt},
    sequence::{terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

/// Default digit-width bound for layer counts (`L20T3` is valid, `S200T3` is not)
pub const DEFAULT_MAX_LAYER_DIGITS: usize = 2;

/// Layer counts described by a scalability mode token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalabilityMode {
    /// Number of spatial layers (>= 1)
    pub spatial_layers: u32,
    /// Number of temporal layers (>= 1)
    pub temporal_layers: u32,
    /// Whether the `_KEY` suffix was present (K-SVC)
    pub ksvc: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self {
            spatial_layers: 1,
            temporal_layers: 1,
            ksvc: false,
        }
    }
}

/// Configurable grammar bound for scalability mode tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScalabilityModeGrammar {
    /// Maximum number of decimal digits accepted for a layer count
    pub max_digits: usize,
}

impl Default for ScalabilityModeGrammar {
    fn default() -> Self {
        Self {
            max_digits: DEFAULT_MAX_LAYER_DIGITS,
        }
    }
}

impl ScalabilityModeGrammar {
    /// Grammar with a custom digit-width bound
    pub fn with_max_digits(max_digits: usize) -> Self {
        Self { max_digits }
    }

    /// Parse a token, returning `None` when it does not match the grammar or
    /// a layer count is below one
    pub fn try_parse(&self, token: &str) -> Option<ScalabilityMode> {
        if self.max_digits == 0 {
            return None;
        }

        let (_, (_, spatial, _, temporal, key)) = self.mode(token).ok()?;
        if spatial < 1 || temporal < 1 {
            return None;
        }

        Some(ScalabilityMode {
            spatial_layers: spatial,
            temporal_layers: temporal,
            ksvc: key.is_some(),
        })
    }

    /// Parse a token, falling back to one spatial and one temporal layer
    pub fn parse(&self, token: Option<&str>) -> ScalabilityMode {
        token
            .and_then(|t| self.try_parse(t))
            .unwrap_or_default()
    }

    fn mode<'a>(&self, input: &'a str) -> IResult<&'a str, (char, u32, char, u32, Option<&'a str>)> {
        let max_digits = self.max_digits;
        tuple((
            one_of("LS"),
            move |i: &'a str| layer_count(i, max_digits),
            char('T'),
            move |i: &'a str| layer_count(i, max_digits),
            opt(tag("_KEY")),
        ))(input)
    }
}

/// Parser for a bounded run of decimal digits; a longer run is rejected
/// rather than truncated
fn layer_count(input: &str, max_digits: usize) -> IResult<&str, u32> {
    terminated(
        map_res(
            take_while_m_n(1, max_digits, |c: char| c.is_ascii_digit()),
            |digits: &str| digits.parse::<u32>(),
        ),
        not(satisfy(|c: char| c.is_ascii_digit())),
    )(input)
}

/// Parse a scalability mode with the default grammar bound
pub fn parse_scalability_mode(token: Option<&str>) -> ScalabilityMode {
    ScalabilityModeGrammar::default().parse(token)
}
