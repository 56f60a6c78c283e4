//! DS2155 framer control: reset, line start, transmit signaling,
//! loopback maintenance and the periodic alarm poll.
//!
//! Functions taking `&mut CardState` expect the card lock to be held by
//! the caller; the guard is the proof.

use std::thread;
use std::time::Duration;

use ds2155_pac::register::*;
use tracing::{debug, info, warn};

use crate::alarms::{Alarms, LedState, Maintenance, ALARM_SETTLE_TICKS, LOOP_CODE_DEBOUNCE, LOOP_CODE_TICKS};
use crate::card::{Card, CardState};
use crate::chanmap::LineMode;
use crate::error::{Error, Result};
use crate::regs::CardBus;
use crate::span::{LineConfig, Signaling, SpanHost};

/// Time the framer needs after reset before the elastic stores can be
/// realigned.
pub const FRAMER_SETTLE: Duration = Duration::from_millis(100);

/// Channels covered by one SSIE register.
const SSIE_CHANNELS: usize = 8;

///////////////////////////////////////////////////////////////////////
// Reset and start

impl<B: CardBus + 'static> Card<B> {
    /// Return the framer to the line mode's defaults. Transmit is left
    /// sending idle signaling with every channel blocked.
    pub fn hard_reset(&self) -> Result<()> {
        {
            let _state = self.state.lock();
            let f = &self.framer;
            debug!(card = self.index, mode = ?self.mode, "framer hard reset");

            f.mstrreg().write(|w| w.with_SFTRST(1))?;
            f.iocr2().write(|w| w.with_RSCLKM(1).with_TSCLKM(1))?;
            // Transmit clock from recovered receive clock, backplane at 8.192 MHz.
            f.ccr1().write(|_| OCTET::of(0x06))?;
            f.ccr2().write(|_| OCTET::of(0x03))?;
            f.iboc().write(|_| OCTET::of(0x28))?;

            match self.mode {
                LineMode::E1 => self.e1_defaults()?,
                LineMode::T1 => self.t1_defaults()?,
            }
        }

        thread::sleep(FRAMER_SETTLE);

        let _state = self.state.lock();
        self.framer.escr().write(|w| w.with_TSALGN(1).with_TESE(1).with_RSALGN(1).with_RESE(1))?;
        self.framer.escr().write(|w| w.with_TESE(1).with_RESE(1))?;
        Ok(())
    }

    fn e1_defaults(&self) -> Result<()> {
        let f = &self.framer;
        f.mstrreg().write(|w| w.with_T1E1(LineModeSelect::E1))?;
        f.e1tcr1().write(|w| w.with_TSiS(1))?;
        f.sigcr().write(|w| w.with_GRSRE(1))?;
        f.lic1().write(|w| w.with_L(1).with_TPD(1))?;
        f.lic4().write(|w| w.with_TT(Termination::Ohm120).with_RT(Termination::Ohm120))?;
        f.lic2().write(|w| w.with_ETS(1).with_LIRST(1).with_TUA1(1).with_JAMUX(1))?;
        f.lic2().write(|w| w.with_ETS(1).with_TUA1(1).with_JAMUX(1))?;
        f.taf().write(|_| OCTET::of(0x1b))?;
        f.tnaf().write(|w| w.with_One(1).with_Sa(0x1f))?;

        // Multiframe alignment in TS1, idle ABCD elsewhere.
        f.ts(0).write(|w| w.with_Upper(0x5))?;
        for index in 1..16 {
            f.ts(index).write(|w| w.with_Upper(0x5).with_Lower(0x5))?;
        }
        for index in 0..4 {
            f.tcbr(index).write(|_| OCTET::of(0xff))?;
        }
        Ok(())
    }

    fn t1_defaults(&self) -> Result<()> {
        let f = &self.framer;
        f.t1rcr1().write(|w| w.with_SYNCC(1).with_SYNCT(1))?;
        f.t1tcr1().write(|w| w.with_TSSE(1))?;

        // Receive loop up / loop down code detection.
        f.ibcc().write(|_| OCTET::of(0x22))?;
        f.rupcd1().write(|_| OCTET::of(0x80))?;
        f.rupcd2().write(|_| OCTET::of(0x00))?;
        f.rdncd1().write(|_| OCTET::of(0x80))?;
        f.rdncd2().write(|_| OCTET::of(0x00))?;

        f.lic1().write(|w| w.with_TPD(1))?;
        f.lic4().write(|w| w.with_TT(Termination::Ohm100).with_RT(Termination::Ohm100))?;
        f.lic2().write(|w| w.with_LIRST(1).with_TUA1(1).with_JAMUX(1))?;
        f.lic2().write(|w| w.with_TUA1(1).with_JAMUX(1))?;
        Ok(())
    }

    /// Apply the stored line configuration and mark the span running.
    pub(crate) fn start_framer(&self) -> Result<()> {
        let mut state = self.state.lock();
        match self.mode {
            LineMode::T1 => self.start_t1(&state)?,
            LineMode::E1 => self.start_e1(&state)?,
        }
        state.running = true;
        Ok(())
    }

    fn start_t1(&self, state: &CardState) -> Result<()> {
        let f = &self.framer;
        let config = state.settings.config;

        let esf = config.contains(LineConfig::ESF) as u8;
        f.t1ccr1().modify(|m| m.with_TFM(esf))?;
        f.t1rcr2().modify(|m| m.with_RFM(esf))?;
        f.t1tcr2().modify(|m| m.with_TSLC96(esf ^ 1))?;
        f.tfdl().write(|_| OCTET::of(if esf != 0 { 0x00 } else { 0x1c }))?;

        let b8zs = config.contains(LineConfig::B8ZS) as u8;
        f.t1tcr2().modify(|m| m.with_TB8ZS(b8zs))?;
        f.t1rcr2().modify(|m| m.with_RB8ZS(b8zs))?;

        f.t1rcr1().modify(|m| m.with_RESYNC(1))?;
        f.t1rcr1().modify(|m| m.with_RESYNC(0))?;

        f.lic1().modify(|m| m.with_L(state.settings.lbo))?;
        self.set_clear(state)?;

        info!(
            card = self.index,
            coding = if b8zs != 0 { "B8ZS" } else { "AMI" },
            framing = if esf != 0 { "ESF" } else { "D4" },
            "T1 framer started",
        );
        Ok(())
    }

    fn start_e1(&self, state: &CardState) -> Result<()> {
        let f = &self.framer;
        let config = state.settings.config;

        let ccs = config.contains(LineConfig::CCS) as u8;
        f.sigcr().modify(|m| m.with_GRSRE(ccs ^ 1))?;
        f.sigcr().modify(|m| m.with_CCS(ccs))?;
        f.e1rcr1().modify(|m| m.with_RSIGM(ccs))?;
        f.e1tcr1().modify(|m| m.with_T16S(ccs ^ 1))?;

        let hdb3 = config.contains(LineConfig::HDB3) as u8;
        f.e1rcr1().modify(|m| m.with_RHDB3(hdb3))?;
        f.e1tcr1().modify(|m| m.with_THDB3(hdb3))?;

        let crc4 = config.contains(LineConfig::CRC4) as u8;
        f.e1rcr1().modify(|m| m.with_RCRC4(crc4))?;
        f.e1tcr1().modify(|m| m.with_TCRC4(crc4))?;
        f.e1tcr2().modify(|m| m.with_AEBE(crc4))?;

        f.lic1().modify(|m| m.with_L(state.settings.lbo))?;

        f.e1rcr1().modify(|m| m.with_RESYNC(1))?;
        f.e1rcr1().modify(|m| m.with_RESYNC(0))?;

        info!(
            card = self.index,
            coding = if hdb3 != 0 { "HDB3" } else { "AMI" },
            framing = if ccs != 0 { "CCS" } else { "CAS" },
            crc4 = crc4 != 0,
            "E1 framer started",
        );
        Ok(())
    }

    /// Enable software signaling insertion on every T1 channel that is not
    /// clear-channel.
    pub(crate) fn set_clear(&self, state: &CardState) -> Result<()> {
        if self.mode == LineMode::E1 {
            warn!(card = self.index, "clear channel mode does not apply to E1");
            return Ok(());
        }

        for (index, group) in state.channels.chunks(SSIE_CHANNELS).enumerate() {
            let mask = group
                .iter()
                .enumerate()
                .filter(|(_, chan)| chan.signaling != Signaling::Clear)
                .fold(0u8, |mask, (bit, _)| mask | (1 << bit));
            self.framer.ssie(index).write(|_| OCTET::of(mask))?;
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////
// Signaling and maintenance

impl<B: CardBus + 'static> Card<B> {
    /// Transmit ABCD bits on a channel.
    pub fn rbsbits(&self, chan: usize, bits: u8) -> Result<()> {
        if chan >= self.mode.channels() {
            return Err(Error::InvalidParameter("channel out of range"));
        }
        let bits = bits & 0x0f;

        let mut state = self.state.lock();
        state.channels[chan].txsig = bits;

        match self.mode {
            LineMode::T1 => {
                let index = chan / 2;
                let byte = if chan % 2 == 1 {
                    (state.txsig[index] & 0x0f) | (bits << 4)
                } else {
                    (state.txsig[index] & 0xf0) | bits
                };
                state.txsig[index] = byte;
                self.framer.ts(index).write(|_| SIG::from(byte))?;
            }
            LineMode::E1 => {
                // TS1 carries the multiframe word; channel pairs start at TS2.
                let index = 1 + chan / 2;
                if index >= 16 {
                    debug!(card = self.index, chan, "no transmit signaling register for channel");
                    return Ok(());
                }
                let byte = if chan % 2 == 0 {
                    bits | (state.channels[chan + 1].txsig << 4)
                } else {
                    (bits << 4) | state.channels[chan - 1].txsig
                };
                state.txsig[index] = byte;
                self.framer.ts(index).write(|_| SIG::from(byte))?;
            }
        }
        Ok(())
    }

    /// Switch loopback or send an in-band loop code.
    pub fn set_maintenance(&self, cmd: Maintenance) -> Result<()> {
        let mut state = self.state.lock();
        let f = &self.framer;

        match (self.mode, cmd) {
            (_, Maintenance::None) => f.lbcr().write(|w| w)?,
            (_, Maintenance::LocalLoop) => f.lbcr().write(|w| w.with_LLB(1))?,
            (_, Maintenance::RemoteLoop) => f.lbcr().write(|w| w.with_RLB(1))?,
            (LineMode::E1, _) => return Err(Error::NotSupported(LineMode::E1)),
            (LineMode::T1, Maintenance::LoopUp) => {
                f.t1ccr1().modify(|m| m.with_TICE(1))?;
                f.ibcc().write(|_| OCTET::of(0x22))?;
                f.tcd1().write(|_| OCTET::of(0x80))?;
                f.tcd2().write(|_| OCTET::of(0x00))?;
            }
            (LineMode::T1, Maintenance::LoopDown) => {
                f.t1ccr1().modify(|m| m.with_TICE(1))?;
                f.ibcc().write(|_| OCTET::of(0x62))?;
                f.tcd1().write(|_| OCTET::of(0x90))?;
                f.tcd2().write(|_| OCTET::of(0x00))?;
            }
            (LineMode::T1, Maintenance::LoopStop) => f.t1ccr1().modify(|m| m.with_TICE(0))?,
        }

        state.maint_timer = match cmd {
            Maintenance::LoopUp | Maintenance::LoopDown => LOOP_CODE_TICKS,
            _ => 0,
        };
        state.maint = match cmd {
            Maintenance::LoopStop => Maintenance::None,
            cmd => cmd,
        };
        info!(card = self.index, ?cmd, "maintenance");
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////
// Periodic polls

impl<B: CardBus + 'static> Card<B> {
    /// Re-read one third of the receive signaling registers and report
    /// changed ABCD bits. `group` is 0, 1 or 2.
    pub(crate) fn check_sigbits(&self, state: &mut CardState, group: usize, host: &mut dyn SpanHost) -> Result<()> {
        let (stride, first_register) = match self.mode {
            LineMode::T1 => (8, 0),
            LineMode::E1 => (10, 1),
        };

        for pair in (0..stride).step_by(2) {
            let chan = group * stride + pair;
            let rs = self.framer.rs(first_register + chan / 2).read()?;
            for (chan, bits) in [(chan, rs.Lower()), (chan + 1, rs.Upper())] {
                let channel = &mut state.channels[chan];
                if channel.signaling == Signaling::Clear || channel.rxsig == bits {
                    continue;
                }
                channel.rxsig = bits;
                host.signaling(self.span(), chan, bits);
            }
        }
        Ok(())
    }

    fn read_status(&self, state: &mut CardState) -> Result<(SR2, SR3)> {
        let f = &self.framer;
        f.sr2().write(|w| w)?;
        let level = f.sr2().read()?;
        state.rx_level = (level.RLVL_HI() << 1) | level.RLVL_LO();

        f.sr3().write(|w| w.with_LDN(1).with_LUP(1))?;
        let sr3 = f.sr3().read()?;

        f.sr2().write(|_| SR2::from(0xff))?;
        let sr2 = f.sr2().read()?;
        Ok((sr2, sr3))
    }

    /// Derive the span alarms from the framer status, follow loop codes on
    /// T1 and drive the front panel.
    pub(crate) fn check_alarms(&self, state: &mut CardState, host: &mut dyn SpanHost) -> Result<()> {
        let f = &self.framer;
        let (sr2, sr3) = self.read_status(state).unwrap_or_else(|e| {
            warn!(card = self.index, "framer status unreadable: {e}");
            (SR2::new().with_RLOS(1), SR3::new())
        });

        let mut led = LedState::Normal;
        let mut alarms = Alarms::empty();
        state.alarms &= Alarms::CARRIER;

        if self.mode == LineMode::T1 {
            if state.maint_timer == 0 && sr3.LUP() != 0 {
                led = LedState::LoopUp;
                state.loop_up_count += 1;
                if state.loop_up_count > LOOP_CODE_DEBOUNCE && state.maint != Maintenance::RemoteLoop {
                    f.lbcr().write(|w| w.with_RLB(1))?;
                    state.maint = Maintenance::RemoteLoop;
                    info!(card = self.index, "loop up code received, remote loopback on");
                }
            } else {
                state.loop_up_count = 0;
            }

            if state.maint_timer == 0 && sr3.LDN() != 0 {
                led = LedState::Normal;
                state.loop_down_count += 1;
                if state.loop_down_count > LOOP_CODE_DEBOUNCE && state.maint == Maintenance::RemoteLoop {
                    f.lbcr().write(|w| w)?;
                    state.maint = Maintenance::None;
                    info!(card = self.index, "loop down code received, remote loopback off");
                }
            } else {
                state.loop_down_count = 0;
            }
        }

        if state.settings.config.contains(LineConfig::NOTOPEN) && !state.channels.iter().any(|c| c.open) {
            alarms |= Alarms::NOTOPEN;
        }

        if sr2.RAIS() != 0 {
            led = LedState::Yellow;
            alarms |= Alarms::BLUE;
        }
        if sr2.RLOS() != 0 {
            led = LedState::NoCarrier;
            alarms |= Alarms::RED;
        }
        if sr2.RLOF() != 0 {
            led = LedState::NoSync;
            alarms |= Alarms::RED;
        }

        if alarms.is_empty() && !state.alarms.is_empty() {
            state.alarm_timer = ALARM_SETTLE_TICKS;
        }

        let entering = !alarms.is_empty() && state.alarms.is_empty();

        if state.alarms != alarms {
            state.sync_source = if !alarms.intersects(Alarms::SYNC_LOSS) && state.settings.sync != 0 {
                self.span()
            } else {
                0
            };
        }

        if state.alarm_timer != 0 {
            alarms |= Alarms::RECOVER;
            led = LedState::Recover;
        }
        if self.mode == LineMode::T1 && sr2.RRAI() != 0 {
            alarms |= Alarms::YELLOW;
            led = LedState::Yellow;
        }

        state.alarms = alarms;
        self.notify_alarms(state, host);

        // Entering alarm: tell the far end.
        if entering {
            match self.mode {
                LineMode::E1 => f.tnaf().write(|w| w.with_One(1).with_A(1).with_Sa(0x1f))?,
                LineMode::T1 => f.t1tcr1().write(|w| w.with_TSSE(1).with_TYEL(1))?,
            }
        }

        if self.regs.led_state()? != led as u8 {
            debug!(card = self.index, ?led, "front panel state");
            self.regs.set_led_state(led as u8)?;
        }
        Ok(())
    }

    /// Tick the maintenance code timer and the alarm settle timer once per
    /// interrupt.
    pub(crate) fn do_counters(&self, state: &mut CardState, host: &mut dyn SpanHost) -> Result<()> {
        state.maint_timer = state.maint_timer.saturating_sub(1);

        if state.alarm_timer == 0 {
            return Ok(());
        }
        state.alarm_timer -= 1;
        if state.alarm_timer == 0 {
            state.alarms.remove(Alarms::RECOVER);
            match self.mode {
                LineMode::E1 => self.framer.tnaf().write(|w| w.with_One(1).with_Sa(0x1f))?,
                LineMode::T1 => self.framer.t1tcr1().write(|w| w.with_TSSE(1))?,
            }
            self.notify_alarms(state, host);
        }
        Ok(())
    }

    fn notify_alarms(&self, state: &mut CardState, host: &mut dyn SpanHost) {
        if state.alarms != state.reported {
            debug!(card = self.index, alarms = ?state.alarms, "alarm change");
            state.reported = state.alarms;
            host.alarms(self.span(), state.alarms);
        }
    }
}
