//! Control plane for the Rhino R1T1 single-span T1/E1 adapter: DS2155
//! framer, DMA interrupt pump, G.PAK echo canceller and the span operations
//! a host telephony layer drives.

pub mod alarms;
pub mod card;
pub mod chanmap;
pub mod config;
pub mod dsp;
pub mod echocan;
pub mod error;
pub mod framer;
pub mod pump;
pub mod registry;
pub mod regs;
pub mod span;

#[cfg(test)]
mod sim;

pub use alarms::{Alarms, Maintenance};
pub use card::{Card, ChannelState};
pub use chanmap::LineMode;
pub use config::{ChannelMask, DebugMask, DriverConfig, NlpType};
pub use error::{Error, Result};
pub use pump::{DmaRegion, IrqReturn};
pub use registry::{CardRegistry, PciDevice, Platform};
pub use regs::{CardBus, Mmio};
pub use span::{EchoParam, LineConfig, LineSettings, Signaling, SpanHost};
