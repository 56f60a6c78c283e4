//! G.PAK configuration values and their mailbox word encoding.

use crate::config::NlpType;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SerialPort {
    Port1 = 0,
    Port2 = 1,
    Port3 = 2,
    Null = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Companding {
    Pcmu = 0,
    Pcma = 1,
    None = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Activation {
    Disabled = 0,
    Enabled = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SlotConfig {
    None = 0,
    TwoGroups = 1,
    EightGroups = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum WordSize {
    Bits8 = 0,
    Bits16 = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Polarity {
    ActiveHigh = 0,
    ActiveLow = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum DataDelay {
    Bits0 = 0,
    Bits1 = 1,
    Bits2 = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameRate {
    Ms1 = 0,
    Ms2 = 1,
    Ms10 = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ChannelType {
    Inactive = 0,
    TdmToTdm = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum AlgControl {
    BypassEcanA = 0,
    EnableEcanA = 1,
    BypassEcanB = 2,
    EnableEcanB = 3,
    ResetEcanA = 4,
    ResetEcanB = 5,
}

///////////////////////////////////////////////////////////////////////
// Serial ports

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialPortConfig {
    pub slots_select: SlotConfig,
    pub first_block: u16,
    /// Slot masks for the eight slot groups.
    pub slot_masks: [u16; 8],
    pub second_block: u16,
    pub word_size: WordSize,
    pub companding: Companding,
    pub tx_frame_sync: Polarity,
    pub rx_frame_sync: Polarity,
    pub tx_clock: Polarity,
    pub rx_clock: Polarity,
    pub tx_delay: DataDelay,
    pub rx_delay: DataDelay,
    pub dx_delay: Activation,
}

impl SerialPortConfig {
    pub const WORDS: usize = 20;

    fn unused() -> Self {
        Self {
            slots_select: SlotConfig::None,
            first_block: 0,
            slot_masks: [0; 8],
            second_block: 0,
            word_size: WordSize::Bits8,
            companding: Companding::None,
            tx_frame_sync: Polarity::ActiveHigh,
            rx_frame_sync: Polarity::ActiveHigh,
            tx_clock: Polarity::ActiveHigh,
            rx_clock: Polarity::ActiveHigh,
            tx_delay: DataDelay::Bits1,
            rx_delay: DataDelay::Bits1,
            dx_delay: Activation::Disabled,
        }
    }

    /// All 32 timeslots of one E1/T1 frame, 4 DSP slots per timeslot,
    /// timeslot 0 excluded.
    fn all_timeslots() -> Self {
        Self {
            slots_select: SlotConfig::EightGroups,
            first_block: 0,
            slot_masks: [0x1110, 0x1111, 0x1111, 0x1111, 0x1111, 0x1111, 0x1111, 0x1111],
            second_block: 1,
            ..Self::unused()
        }
    }

    fn encode(&self, out: &mut Vec<u16>) {
        out.extend_from_slice(&[
            self.slots_select as u16,
            self.first_block,
            self.slot_masks[0],
            self.second_block,
            self.slot_masks[1],
            self.word_size as u16,
            self.companding as u16,
            self.tx_frame_sync as u16,
            self.rx_frame_sync as u16,
            self.tx_clock as u16,
            self.rx_clock as u16,
            self.tx_delay as u16,
            self.rx_delay as u16,
            self.dx_delay as u16,
        ]);
        out.extend_from_slice(&self.slot_masks[2..]);
    }
}

/// Configuration of the DSP's three serial ports. Port 1 is unused on this
/// card; ports 2 and 3 carry the line and host sides of every channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortConfig {
    pub ports: [SerialPortConfig; 3],
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            ports: [
                SerialPortConfig::unused(),
                SerialPortConfig::all_timeslots(),
                SerialPortConfig::all_timeslots(),
            ],
        }
    }
}

impl PortConfig {
    pub fn to_words(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(SerialPortConfig::WORDS * 3);
        for port in &self.ports {
            port.encode(&mut out);
        }
        out
    }
}

///////////////////////////////////////////////////////////////////////
// Echo canceller

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EcanParams {
    pub tap_length: u16,
    pub nlp_type: NlpType,
    pub adapt_enable: bool,
    pub g165_detect_enable: bool,
    pub double_talk_threshold: u16,
    pub nlp_threshold: u16,
    pub nlp_converged_limit: u16,
    pub nlp_unconverged_limit: u16,
    pub nlp_max_suppress: u16,
    pub cng_threshold: u16,
    pub adapt_limit: u16,
    pub cross_correlation_limit: u16,
    pub fir_segments: u16,
    pub fir_segment_length: u16,
}

impl Default for EcanParams {
    fn default() -> Self {
        Self {
            tap_length: 1024,
            nlp_type: NlpType::Hoth,
            adapt_enable: true,
            g165_detect_enable: true,
            double_talk_threshold: 4,
            nlp_threshold: 21,
            nlp_converged_limit: 17,
            nlp_unconverged_limit: 12,
            nlp_max_suppress: 0,
            cng_threshold: 50,
            adapt_limit: 40,
            cross_correlation_limit: 20,
            fir_segments: 3,
            fir_segment_length: 64,
        }
    }
}

impl EcanParams {
    pub const WORDS: usize = 14;

    fn encode(&self, out: &mut Vec<u16>) {
        out.extend_from_slice(&[
            self.tap_length,
            self.nlp_type as u16,
            self.adapt_enable as u16,
            self.g165_detect_enable as u16,
            self.double_talk_threshold,
            self.nlp_threshold,
            self.nlp_converged_limit,
            self.nlp_unconverged_limit,
            self.nlp_max_suppress,
            self.cng_threshold,
            self.adapt_limit,
            self.cross_correlation_limit,
            self.fir_segments,
            self.fir_segment_length,
        ]);
    }
}

///////////////////////////////////////////////////////////////////////
// Channel

/// One side of a channel's PCM routing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PcmRoute {
    pub port: SerialPort,
    pub slot: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub pcm_in_a: PcmRoute,
    pub pcm_out_a: PcmRoute,
    pub pcm_in_b: PcmRoute,
    pub pcm_out_b: PcmRoute,
    pub tone_types_a: u16,
    pub tone_types_b: u16,
    pub ecan_enable_a: Activation,
    pub ecan_enable_b: Activation,
    pub ecan_params_a: EcanParams,
    pub ecan_params_b: EcanParams,
    pub software_compand: Companding,
    pub frame_rate: FrameRate,
    pub mute_tone_a: Activation,
    pub mute_tone_b: Activation,
    pub fax_cng_a: Activation,
    pub fax_cng_b: Activation,
}

impl ChannelConfig {
    pub const WORDS: usize = 8 + 2 + 2 + 2 * EcanParams::WORDS + 6;

    /// Line side on port 2 through canceller B, host side on port 3, both at
    /// `slot`.
    pub fn line_echo(slot: u16, companding: Companding, nlp_type: NlpType) -> Self {
        let params = EcanParams {
            nlp_type,
            ..EcanParams::default()
        };
        Self {
            pcm_in_a: PcmRoute { port: SerialPort::Port2, slot },
            pcm_out_a: PcmRoute { port: SerialPort::Port3, slot },
            pcm_in_b: PcmRoute { port: SerialPort::Port3, slot },
            pcm_out_b: PcmRoute { port: SerialPort::Null, slot },
            tone_types_a: 0,
            tone_types_b: 0,
            ecan_enable_a: Activation::Disabled,
            ecan_enable_b: Activation::Enabled,
            ecan_params_a: params,
            ecan_params_b: params,
            software_compand: companding,
            frame_rate: FrameRate::Ms2,
            mute_tone_a: Activation::Disabled,
            mute_tone_b: Activation::Disabled,
            fax_cng_a: Activation::Disabled,
            fax_cng_b: Activation::Disabled,
        }
    }

    pub fn to_words(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(Self::WORDS);
        for route in [self.pcm_in_a, self.pcm_out_a, self.pcm_in_b, self.pcm_out_b] {
            out.push(route.port as u16);
            out.push(route.slot);
        }
        out.push(self.tone_types_a);
        out.push(self.tone_types_b);
        out.push(self.ecan_enable_a as u16);
        out.push(self.ecan_enable_b as u16);
        self.ecan_params_a.encode(&mut out);
        self.ecan_params_b.encode(&mut out);
        out.extend_from_slice(&[
            self.software_compand as u16,
            self.frame_rate as u16,
            self.mute_tone_a as u16,
            self.mute_tone_b as u16,
            self.fax_cng_a as u16,
            self.fax_cng_b as u16,
        ]);
        out
    }

    /// Slot numbers of the four routes, as laid out by [`ChannelConfig::to_words`].
    pub fn slots_from_words(words: &[u16]) -> Option<[u16; 4]> {
        if words.len() < 8 {
            return None;
        }
        Some([words[1], words[3], words[5], words[7]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_leave_port1_unused() {
        let config = PortConfig::default();
        assert_eq!(config.ports[0].slots_select, SlotConfig::None);
        assert_eq!(config.ports[1].slot_masks[0], 0x1110);
        assert_eq!(config.ports[2].second_block, 1);
        assert_eq!(config.to_words().len(), 3 * SerialPortConfig::WORDS);
    }

    #[test]
    fn line_echo_routing() {
        let config = ChannelConfig::line_echo(20, Companding::Pcmu, NlpType::Suppress);
        assert_eq!(config.pcm_out_b.port, SerialPort::Null);
        assert_eq!(config.ecan_enable_b, Activation::Enabled);
        assert_eq!(config.ecan_params_b.nlp_type, NlpType::Suppress);

        let words = config.to_words();
        assert_eq!(words.len(), ChannelConfig::WORDS);
        assert_eq!(ChannelConfig::slots_from_words(&words), Some([20; 4]));
    }
}
