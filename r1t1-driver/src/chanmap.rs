//! Mapping from logical channel index to hardware timeslot.

use crate::dsp::types::Companding;

/// Samples per channel per half-buffer.
pub const CHUNKSIZE: usize = 8;

/// Timeslots carried by the DMA engine regardless of line mode.
pub const TIMESLOTS: usize = 32;

/// DSP serial port slot stride per timeslot.
const DSP_SLOT_STRIDE: usize = 4;

/// E1 channel index that carries timeslot 16 and is never companded.
const E1_SIGNALING_CHANNEL: usize = 15;

const T1_MAP: [u8; 24] = [
    1, 2, 3,
    5, 6, 7,
    9, 10, 11,
    13, 14, 15,
    17, 18, 19,
    21, 22, 23,
    25, 26, 27,
    29, 30, 31,
];

const E1_MAP: [u8; 31] = [
    1, 2, 3,
    4, 5, 6, 7,
    8, 9, 10, 11,
    12, 13, 14, 15,
    16, 17, 18, 19,
    20, 21, 22, 23,
    24, 25, 26, 27,
    28, 29, 30, 31,
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LineMode {
    T1,
    E1,
}

impl LineMode {
    pub fn channels(self) -> usize {
        self.map().len()
    }

    fn map(self) -> &'static [u8] {
        match self {
            LineMode::T1 => &T1_MAP,
            LineMode::E1 => &E1_MAP,
        }
    }

    /// Hardware timeslot carrying logical channel `chan` (0-based).
    pub fn timeslot(self, chan: usize) -> usize {
        let map = self.map();
        assert!(chan < map.len());
        map[chan] as usize
    }

    /// DSP serial port slot for logical channel `chan`.
    pub fn dsp_slot(self, chan: usize) -> usize {
        self.timeslot(chan) * DSP_SLOT_STRIDE
    }

    pub fn companding(self, chan: usize) -> Companding {
        match self {
            LineMode::E1 if chan == E1_SIGNALING_CHANNEL => Companding::None,
            _ => Companding::Pcmu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LineMode::T1 => "Rhino R1T1 T1/PRI",
            LineMode::E1 => "Rhino R1T1 E1/PRA",
        }
    }
}
