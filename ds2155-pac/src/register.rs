#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use modular_bitfield_msb::prelude::*;

///////////////////////////////////////////////////////////////////////
//

#[derive(Copy, Clone, BitfieldSpecifier, Debug, PartialEq, Eq)]
#[bits=1]
pub enum LineModeSelect {
    T1 = 0b0,
    E1 = 0b1,
}

/// Master Mode Register (MSTRREG) - 0x00
///
/// * T1E1: selects the operating mode of the framer, LIU and elastic stores.
/// * SFTRST: Software Issued Reset. A 0 to 1 transition clears all internal
///   registers except MSTRREG itself. Must be cleared again by software.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct MSTRREG {
    #[skip] __: B6,
    pub T1E1: LineModeSelect,
    pub SFTRST: B1,
}

/// I/O Configuration Register 2 (IOCR2) - 0x02
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct IOCR2 {
    #[skip] __: B6,
    pub RSCLKM: B1,
    pub TSCLKM: B1,
}

/// T1 Receive Control Register 1 (T1RCR1) - 0x03
///
/// * SYNCC: Sync Criteria. Cross-couple Ft and Fs bits when searching for
///   D4 alignment, or validate CRC6 when searching for ESF alignment.
/// * SYNCT: Sync Time. Qualify 24 bits instead of 10 before declaring sync.
/// * SYNCE: Sync Enable. 0 = auto resync enabled.
/// * RESYNC: a 0 to 1 transition forces a receive frame resynchronization.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct T1RCR1 {
    #[skip] __: B4,
    pub SYNCC: B1,
    pub SYNCT: B1,
    pub SYNCE: B1,
    pub RESYNC: B1,
}

/// T1 Receive Control Register 2 (T1RCR2) - 0x04
///
/// * RFM: Receive Frame Mode Select. 0 = D4, 1 = ESF.
/// * RB8ZS: Receive B8ZS Enable.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct T1RCR2 {
    #[skip] __: B1,
    pub RFM: B1,
    pub RB8ZS: B1,
    #[skip] __: B5,
}

/// T1 Transmit Control Register 1 (T1TCR1) - 0x05
///
/// * TSSE: Software Signaling Insertion Enable. Signaling is taken from the
///   TS1..TS12 registers for the channels selected in SSIE1..SSIE3.
/// * TYEL: Transmit Yellow Alarm.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct T1TCR1 {
    #[skip] __: B3,
    pub TSSE: B1,
    #[skip] __: B3,
    pub TYEL: B1,
}

/// T1 Transmit Control Register 2 (T1TCR2) - 0x06
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct T1TCR2 {
    pub TB8ZS: B1,
    pub TSLC96: B1,
    #[skip] __: B6,
}

/// T1 Common Control Register 1 (T1CCR1) - 0x07
///
/// * TFM: Transmit Frame Mode Select. 0 = D4, 1 = ESF.
/// * TICE: Transmit In-band Code Enable. Sends the pattern programmed in
///   TCD1/TCD2 with the length selected by IBCC.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct T1CCR1 {
    #[skip] __: B5,
    pub TFM: B1,
    #[skip] __: B1,
    pub TICE: B1,
}

/// Status Register 2 (SR2) - 0x18
///
/// Latched status, cleared by writing a one to the bit. Bits reassert while
/// the condition persists.
///
/// * RLVL_LO, RLVL_HI: receive level range indication.
/// * RRAI: receive remote alarm indication (yellow).
/// * RAIS: receive alarm indication signal (blue, unframed all ones).
/// * RLOS: receive loss of signal (no carrier).
/// * RLOF: receive loss of frame (no sync).
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SR2 {
    #[skip] __: B2,
    pub RLVL_LO: B1,
    pub RLVL_HI: B1,
    pub RRAI: B1,
    pub RAIS: B1,
    pub RLOS: B1,
    pub RLOF: B1,
}

/// Status Register 3 (SR3) - 0x1a
///
/// * LDN: loop-down code detected.
/// * LUP: loop-up code detected.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SR3 {
    #[skip] __: B1,
    pub LDN: B1,
    pub LUP: B1,
    #[skip] __: B5,
}

/// E1 Receive Control Register 1 (E1RCR1) - 0x33
///
/// * RSIGM: Receive Signaling Mode Select. 0 = CAS, 1 = CCS.
/// * RHDB3: Receive HDB3 Enable.
/// * RCRC4: Receive CRC4 Enable.
/// * RESYNC: a 0 to 1 transition forces a receive frame resynchronization.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct E1RCR1 {
    #[skip] __: B1,
    pub RSIGM: B1,
    pub RHDB3: B1,
    #[skip] __: B1,
    pub RCRC4: B1,
    #[skip] __: B2,
    pub RESYNC: B1,
}

/// E1 Transmit Control Register 1 (E1TCR1) - 0x35
///
/// * T16S: Transmit Timeslot 16 Data Select. 0 = pass timeslot 16 through
///   from the backplane (CCS), 1 = CAS sourced from TS1..TS16.
/// * TSiS: Transmit International Bit Select, taken from TAF/TNAF.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct E1TCR1 {
    #[skip] __: B1,
    pub T16S: B1,
    #[skip] __: B1,
    pub TSiS: B1,
    #[skip] __: B1,
    pub THDB3: B1,
    #[skip] __: B1,
    pub TCRC4: B1,
}

/// E1 Transmit Control Register 2 (E1TCR2) - 0x36
///
/// * AEBE: Automatic E-Bit Enable.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct E1TCR2 {
    #[skip] __: B5,
    pub AEBE: B1,
    #[skip] __: B2,
}

/// Signaling Control Register (SIGCR) - 0x40
///
/// * GRSRE: Global Receive Signaling Reinsertion Enable.
/// * CCS: Common Channel Signaling select for the receive and transmit
///   signaling engines.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SIGCR {
    pub GRSRE: B1,
    #[skip] __: B4,
    pub CCS: B1,
    #[skip] __: B2,
}

/// Loopback Control Register (LBCR) - 0x4a
///
/// * LLB: Local Loopback.
/// * RLB: Remote Loopback. Received data is retransmitted toward the line.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct LBCR {
    #[skip] __: B4,
    pub LLB: B1,
    pub RLB: B1,
    #[skip] __: B2,
}

/// Elastic Store Control Register (ESCR) - 0x4f
///
/// The ALGN bits realign the store on a 0 to 1 transition.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct ESCR {
    #[skip] __: B1,
    pub TSALGN: B1,
    #[skip] __: B1,
    pub TESE: B1,
    #[skip] __: B1,
    pub RSALGN: B1,
    #[skip] __: B1,
    pub RESE: B1,
}

/// Transmit Signaling (TS1..TS16) - 0x50..0x5f,
/// Receive Signaling (RS1..RS16) - 0x60..0x6f
///
/// Each register carries the ABCD bits of two channels. The lower nibble
/// holds the lower-numbered channel.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SIG {
    pub Upper: B4,
    pub Lower: B4,
}

#[derive(Copy, Clone, BitfieldSpecifier, Debug, PartialEq, Eq)]
#[bits=2]
pub enum Termination {
    Ohm75 = 0b00,
    Ohm100 = 0b01,
    Ohm110 = 0b10,
    Ohm120 = 0b11,
}

/// Line Interface Control 1 (LIC1) - 0x78
///
/// * L: Line Build Out select, 0..7.
/// * TPD: Transmit Power Down. 0 = powered down.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct LIC1 {
    pub L: B3,
    #[skip] __: B4,
    pub TPD: B1,
}

/// Line Interface Control 2 (LIC2) - 0x79
///
/// * ETS: E1/T1 Select for the LIU.
/// * LIRST: Line Interface Reset. A 0 to 1 transition resets the LIU.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct LIC2 {
    pub ETS: B1,
    pub LIRST: B1,
    #[skip] __: B1,
    pub TUA1: B1,
    pub JAMUX: B1,
    #[skip] __: B3,
}

/// Line Interface Control 4 (LIC4) - 0x7b
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct LIC4 {
    #[skip] __: B4,
    pub TT: Termination,
    pub RT: Termination,
}

/// Transmit Non-Align Frame (TNAF) - 0xd1
///
/// * A: remote alarm (E1 yellow).
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct TNAF {
    pub Si: B1,
    pub One: B1,
    pub A: B1,
    pub Sa: B5,
}

/// Registers without sub-fields: clock control, in-band code patterns and
/// lengths, per-channel enable banks, FDL and align-frame bytes.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct OCTET {
    pub Value: B8,
}

impl OCTET {
    pub fn of(value: u8) -> Self {
        Self::new().with_Value(value)
    }
}
