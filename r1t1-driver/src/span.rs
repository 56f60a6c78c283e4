//! The card as a host telephony span: the operations the host calls into
//! and the [`SpanHost`] callbacks the card makes.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::alarms::{Alarms, Maintenance};
use crate::card::Card;
use crate::chanmap::{LineMode, CHUNKSIZE};
use crate::error::{Error, Result};
use crate::regs::{CardBus, CONTROL_RUN, CONTROL_STOP};

/// Maximum line build-out selection.
pub const MAX_LBO: u8 = 7;

/// Wait between starting the framer and starting DMA.
const DMA_START_DELAY: Duration = Duration::from_millis(1);

/// Host telephony layer as seen from the card. All calls come from the
/// interrupt path.
pub trait SpanHost {
    /// Receive samples for every channel, in channel order.
    fn receive(&mut self, span: usize, chunks: &[[u8; CHUNKSIZE]]);
    /// Fill transmit samples for every channel, in channel order.
    fn transmit(&mut self, span: usize, chunks: &mut [[u8; CHUNKSIZE]]);
    /// Software echo cancellation, used while the DSP is not up.
    fn echo_cancel(&mut self, span: usize, chunks: &mut [[u8; CHUNKSIZE]]);
    /// Received ABCD bits changed on `chan`.
    fn signaling(&mut self, span: usize, chan: usize, bits: u8);
    fn alarms(&mut self, span: usize, alarms: Alarms);
}

bitflags! {
    /// Line coding and framing options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineConfig: u32 {
        const AMI = 1 << 0;
        const B8ZS = 1 << 1;
        const HDB3 = 1 << 2;
        const D4 = 1 << 4;
        const ESF = 1 << 5;
        const CRC4 = 1 << 6;
        const CCS = 1 << 8;
        /// Raise a NOTOPEN alarm while no channel is open.
        const NOTOPEN = 1 << 16;
    }
}

impl LineConfig {
    /// Options a span in `mode` accepts.
    pub fn supported(mode: LineMode) -> LineConfig {
        match mode {
            LineMode::T1 => LineConfig::AMI | LineConfig::B8ZS | LineConfig::D4 | LineConfig::ESF | LineConfig::NOTOPEN,
            LineMode::E1 => LineConfig::AMI | LineConfig::HDB3 | LineConfig::CCS | LineConfig::CRC4 | LineConfig::NOTOPEN,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LineSettings {
    pub config: LineConfig,
    /// Line build-out, 0..=7.
    pub lbo: u8,
    /// Non-zero to offer the received clock as timing source.
    pub sync: u8,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Signaling {
    /// Clear channel: no robbed-bit signaling.
    Clear,
    #[default]
    Robbed,
}

/// Echo canceller tuning parameter supplied on attach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoParam {
    pub name: String,
    pub value: i32,
}

impl<B: CardBus + 'static> Card<B> {
    fn check_channel(&self, chan: usize) -> Result<()> {
        if chan >= self.mode.channels() {
            return Err(Error::InvalidParameter("channel out of range"));
        }
        Ok(())
    }

    pub fn open(&self, chan: usize) -> Result<()> {
        self.check_channel(chan)?;
        let users = self.usecount.fetch_add(1, Ordering::SeqCst) + 1;
        if self.dead.load(Ordering::SeqCst) {
            // Removal may have seen our count and deferred to us.
            if self.usecount.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.release();
            }
            return Err(Error::NoDevice);
        }
        self.state.lock().channels[chan].open = true;
        debug!(card = self.index, chan, users, "open");
        Ok(())
    }

    pub fn close(&self, chan: usize) -> Result<()> {
        self.check_channel(chan)?;
        self.state.lock().channels[chan].open = false;
        let users = match self.usecount.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!(card = self.index, chan, "close without open");
                return Ok(());
            }
        };
        debug!(card = self.index, chan, users, "close");
        if users == 0 && self.dead.load(Ordering::SeqCst) {
            self.release();
        }
        Ok(())
    }

    pub fn ioctl(&self, chan: usize, cmd: u32) -> Result<()> {
        debug!(card = self.index, chan, cmd, "unhandled ioctl");
        Err(Error::UnknownIoctl(cmd))
    }

    /// Start the framer with the stored line settings and, on first start,
    /// the DMA engine.
    pub fn startup(&self) -> Result<()> {
        let already_running = self.is_running();
        self.start_framer()?;

        if !already_running {
            thread::sleep(DMA_START_DELAY);
            self.regs.control(CONTROL_RUN)?;
            info!(card = self.index, "span started");
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        self.state.lock().running = false;
        self.regs.control(CONTROL_STOP)?;
        self.hard_reset()?;
        info!(card = self.index, "span stopped");
        Ok(())
    }

    pub fn spanconfig(&self, settings: LineSettings) -> Result<()> {
        if !LineConfig::supported(self.mode).contains(settings.config) {
            return Err(Error::InvalidParameter("line option not available in this line mode"));
        }
        if settings.lbo > MAX_LBO {
            return Err(Error::InvalidParameter("line build-out must be 0..=7"));
        }

        let running = {
            let mut state = self.state.lock();
            state.settings = settings;
            state.rx_level = 0;
            state.running
        };
        debug!(card = self.index, ?settings, "span config");

        if running {
            self.startup()?;
        }
        Ok(())
    }

    pub fn chanconfig(&self, chan: usize, signaling: Signaling) -> Result<()> {
        self.check_channel(chan)?;
        let mut state = self.state.lock();
        state.channels[chan].signaling = signaling;
        if state.running && self.mode == LineMode::T1 {
            self.set_clear(&state)?;
        }
        Ok(())
    }

    /// Host maintenance command by its numeric code.
    pub fn maint(&self, cmd: i32) -> Result<()> {
        let cmd = Maintenance::try_from(cmd).map_err(|e| {
            warn!(card = self.index, cmd, "unknown maintenance command");
            e
        })?;
        self.set_maintenance(cmd)
    }

    /// Attach the hardware echo canceller to `chan`. `Ok(false)` when the
    /// DSP is not up and the host should fall back to its own.
    pub fn echocan_create(&self, chan: usize, params: &[EchoParam]) -> Result<bool> {
        self.check_channel(chan)?;
        if !params.is_empty() {
            warn!(card = self.index, chan, ?params, "echo canceller parameters not supported");
            return Err(Error::InvalidParameter("echo canceller parameters not supported"));
        }
        if !self.dsp_up() {
            return Ok(false);
        }
        if let Some(echo) = self.scheduler() {
            echo.set(chan, true);
        }
        Ok(true)
    }

    pub fn echocan_free(&self, chan: usize) -> Result<()> {
        self.check_channel(chan)?;
        if let Some(echo) = self.scheduler() {
            echo.set(chan, false);
        }
        Ok(())
    }
}
