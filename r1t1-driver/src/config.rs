//! Driver-wide options, set once before any card is probed.

use bitflags::bitflags;
use tracing::Level;

use crate::chanmap::LineMode;
use crate::error::{Error, Result};

bitflags! {
    /// Debug output selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugMask: u32 {
        const MAIN = 1 << 0;
        const DSP = 1 << 7;
    }
}

/// Set of logical channels, bit `n` for channel index `n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    pub const ALL: ChannelMask = ChannelMask(0xffff_ffff);

    pub fn contains(self, chan: usize) -> bool {
        chan < 32 && (self.0 >> chan) & 1 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Echo canceller non-linear processor behaviour.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NlpType {
    Off = 0,
    Mute = 1,
    RandomNoise = 2,
    Hoth = 3,
    Suppress = 4,
}

impl TryFrom<u8> for NlpType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(NlpType::Off),
            1 => Ok(NlpType::Mute),
            2 => Ok(NlpType::RandomNoise),
            3 => Ok(NlpType::Hoth),
            4 => Ok(NlpType::Suppress),
            _ => Err(Error::InvalidParameter("nlp_type must be 0..=4")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// Bit `n` selects E1 for card index `n`; clear means T1.
    pub e1: u32,
    pub debug: DebugMask,
    /// Channels whose echo canceller is never enabled.
    pub ec_disable: ChannelMask,
    /// Written to the card's echo-can A routing register after bring-up.
    pub ec_enable: ChannelMask,
    /// Skip DSP bring-up entirely.
    pub no_ec: bool,
    pub nlp_type: NlpType,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            e1: 0,
            debug: DebugMask::empty(),
            ec_disable: ChannelMask(0),
            ec_enable: ChannelMask::ALL,
            no_ec: false,
            nlp_type: NlpType::Hoth,
        }
    }
}

impl DriverConfig {
    pub fn line_mode(&self, card: usize) -> LineMode {
        if card < 32 && (self.e1 >> card) & 1 != 0 {
            LineMode::E1
        } else {
            LineMode::T1
        }
    }

    pub fn log_level(&self) -> Level {
        if self.debug.is_empty() {
            Level::INFO
        } else {
            Level::DEBUG
        }
    }

    /// Install the global `fmt` subscriber. A subscriber installed earlier
    /// (by the embedding application or a previous call) is left in place.
    pub fn init_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(self.log_level())
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.nlp_type, NlpType::Hoth);
        assert_eq!(config.ec_enable.bits(), 0xffff_ffff);
        assert!(!config.no_ec);
        assert_eq!(config.line_mode(0), LineMode::T1);
        assert_eq!(config.log_level(), Level::INFO);
    }

    #[test]
    fn e1_mask_is_per_card() {
        let config = DriverConfig { e1: 0b10, ..Default::default() };
        assert_eq!(config.line_mode(0), LineMode::T1);
        assert_eq!(config.line_mode(1), LineMode::E1);
        assert_eq!(config.line_mode(40), LineMode::T1);
    }

    #[test]
    fn nlp_type_range() {
        assert_eq!(NlpType::try_from(4).unwrap(), NlpType::Suppress);
        assert!(matches!(NlpType::try_from(5), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn debug_mask_selects_level() {
        let config = DriverConfig { debug: DebugMask::DSP, ..Default::default() };
        assert_eq!(config.log_level(), Level::DEBUG);
        assert_eq!(DebugMask::from_bits_truncate(0x81), DebugMask::MAIN | DebugMask::DSP);
    }

    #[test]
    fn channel_mask_bounds() {
        assert!(ChannelMask::ALL.contains(31));
        assert!(!ChannelMask::ALL.contains(32));
        assert!(!ChannelMask(0b100).contains(1));
    }
}
