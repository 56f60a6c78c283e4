//! Span alarm and maintenance state as exchanged with the host layer.

use bitflags::bitflags;

use crate::error::Error;

bitflags! {
    /// Standing alarm conditions of a span.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Alarms: u32 {
        const RECOVER = 1 << 0;
        const LOOPBACK = 1 << 1;
        const YELLOW = 1 << 2;
        const RED = 1 << 3;
        const BLUE = 1 << 4;
        const NOTOPEN = 1 << 5;
    }
}

impl Alarms {
    /// Conditions that make the received clock unusable as a sync source.
    pub const SYNC_LOSS: Alarms = Alarms::RED.union(Alarms::BLUE).union(Alarms::LOOPBACK);

    /// Conditions carried from one poll to the next.
    pub const CARRIER: Alarms = Alarms::RED.union(Alarms::BLUE).union(Alarms::NOTOPEN);
}

/// Interrupt ticks (1 ms each) an alarm must stay clear before RECOVER drops.
pub const ALARM_SETTLE_TICKS: u32 = 5000;

/// Interrupt ticks loop code detection stays suppressed after we start
/// sending a loop code ourselves.
pub const LOOP_CODE_TICKS: u32 = 10000;

/// Consecutive alarm polls a loop code must be seen before it is acted on.
pub const LOOP_CODE_DEBOUNCE: u32 = 80;

/// Robbed-bit signaling bits as handed to and from the host.
pub mod sig {
    pub const A: u8 = 1 << 3;
    pub const B: u8 = 1 << 2;
    pub const C: u8 = 1 << 1;
    pub const D: u8 = 1 << 0;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Maintenance {
    #[default]
    None,
    LocalLoop,
    RemoteLoop,
    LoopUp,
    LoopDown,
    LoopStop,
}

impl TryFrom<i32> for Maintenance {
    type Error = Error;

    fn try_from(cmd: i32) -> Result<Self, Error> {
        Ok(match cmd {
            0 => Maintenance::None,
            1 => Maintenance::LocalLoop,
            2 => Maintenance::RemoteLoop,
            3 => Maintenance::LoopUp,
            4 => Maintenance::LoopDown,
            5 => Maintenance::LoopStop,
            _ => return Err(Error::InvalidParameter("unknown maintenance command")),
        })
    }
}

/// Front panel state codes written to the card's STATE register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LedState {
    Normal = 0x10,
    NoSync = 0x20,
    NoCarrier = 0x30,
    Yellow = 0x40,
    Recover = 0x50,
    LoopUp = 0xd0,
}
