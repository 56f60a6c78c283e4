//! DSP bring-up: reset, download, start, then configure the serial ports
//! and every channel for line echo cancellation.
//!
//! Any failure leaves the DSP marked down. The card keeps pumping TDM data
//! without echo cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use spin::Mutex;
use tracing::{debug, error, info, warn};

use crate::chanmap::LineMode;
use crate::config::{DebugMask, DriverConfig};
use crate::regs::{hpic, CardBus, CardRegisters, TargetRegister};

use super::firmware::FirmwareStore;
use super::protocol::DspClient;
use super::types::{AlgControl, ChannelConfig, ChannelType, PortConfig};
use super::DspError;

/// Time the DSP is held in reset.
pub const RESET_HOLD: Duration = Duration::from_millis(100);

/// Interface block polls after the program is started.
pub const IFBLK_POLLS: usize = 4;
const IFBLK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Every timeslot translated except timeslot 15 (E1 channel 16 signaling).
const E1_XLATE_MASK: u32 = 0xffff_7fff;

pub struct BringUp<'a> {
    pub card: usize,
    pub mode: LineMode,
    pub config: &'a DriverConfig,
    pub firmware: &'a dyn FirmwareStore,
}

/// Pulse the DSP reset line. The card lock is held for the register
/// writes only, never across the hold time.
pub fn reset<B: CardBus, T>(regs: &CardRegisters<B>, lock: &Mutex<T>) -> Result<(), DspError> {
    {
        let _guard = lock.lock();
        regs.hpic_clear(hpic::DSP_RST)?;
        regs.hpic_clear(hpic::DSP_RST)?;
    }
    thread::sleep(RESET_HOLD);
    let _guard = lock.lock();
    regs.target_write(TargetRegister::Hcs, 0)?;
    regs.hpic_set(hpic::DSP_RST)?;
    Ok(())
}

impl BringUp<'_> {
    /// Run the full sequence. `up` is raised once every channel is
    /// configured.
    pub fn run<B: CardBus, T>(&self, client: &mut DspClient<B>, lock: &Mutex<T>, up: &AtomicBool) -> Result<(), DspError> {
        let regs = CardRegisters::new(Arc::clone(client.transport().registers().bus()));

        reset(&regs, lock)?;
        regs.target_write(TargetRegister::Ecb1, 0)?;
        regs.target_write(TargetRegister::Eca1, 0)?;

        if self.config.no_ec {
            info!(card = self.card, "echo cancellation disabled");
            return Err(DspError::Disabled);
        }

        regs.hpic_clear(hpic::EC_ON)?;
        client.download(self.firmware)?;
        client.run()?;
        self.await_interface_block(client)?;
        self.ping(client);

        let ports = PortConfig::default();
        client.configure_ports(&ports).map_err(|e| {
            error!(card = self.card, status = e.code(), detail = e.detail(), ?ports, "DSP port configuration failed");
            e
        })?;
        self.ping(client);

        if self.mode == LineMode::E1 {
            regs.hpic_set(hpic::XLATE)?;
            regs.target_write(TargetRegister::XlateEn, E1_XLATE_MASK)?;
        }

        for chan in 0..self.mode.channels() {
            self.configure_channel(client, chan)?;
        }

        up.store(true, Ordering::Release);
        if self.config.debug.contains(DebugMask::DSP) {
            self.diagnostics(client);
        }

        regs.hpic_set(hpic::EC_ON)?;
        regs.target_write(TargetRegister::Ecb1, 0)?;
        regs.target_write(TargetRegister::Eca1, self.config.ec_enable.bits())?;
        self.ping(client);

        info!(card = self.card, channels = self.mode.channels(), "DSP echo cancellation up");
        Ok(())
    }

    fn await_interface_block<B: CardBus>(&self, client: &mut DspClient<B>) -> Result<(), DspError> {
        for _ in 0..IFBLK_POLLS {
            thread::sleep(IFBLK_POLL_INTERVAL);
            if let Some(address) = client.poll_interface_block()? {
                debug!(card = self.card, ifblk = address, "DSP interface block ready");
                return Ok(());
            }
            thread::yield_now();
        }
        error!(card = self.card, polls = IFBLK_POLLS, "DSP interface block never became ready");
        Err(DspError::NotResponding)
    }

    fn configure_channel<B: CardBus>(&self, client: &mut DspClient<B>, chan: usize) -> Result<(), DspError> {
        let slot = self.mode.dsp_slot(chan) as u16;
        let config = ChannelConfig::line_echo(slot, self.mode.companding(chan), self.config.nlp_type);

        client
            .configure_channel(chan as u16, ChannelType::TdmToTdm, &config)
            .map_err(|source| {
                error!(card = self.card, chan, status = source.code(), detail = source.detail(), ?config, "DSP channel configuration failed");
                DspError::ConfigChannel { chan, source }
            })?;

        // Channels start bypassed until a call attaches an echo canceller.
        if client.alg_control_retry(chan as u16, AlgControl::BypassEcanB).is_err() {
            warn!(card = self.card, chan, "channel left with echo canceller active");
        }
        Ok(())
    }

    fn ping<B: CardBus>(&self, client: &mut DspClient<B>) {
        match client.ping() {
            Ok(version) => debug!(card = self.card, version, "DSP ping"),
            Err(e) => warn!(card = self.card, status = e.code(), "DSP ping failed: {e}"),
        }
    }

    fn diagnostics<B: CardBus>(&self, client: &mut DspClient<B>) {
        match client.read_cpu_usage() {
            Ok(usage) => debug!(card = self.card, ?usage, "DSP cpu usage"),
            Err(e) => warn!(card = self.card, status = e.code(), "unable to read DSP cpu usage: {e}"),
        }
        match client.read_framing_stats() {
            Ok(stats) => debug!(card = self.card, ?stats, "DSP framing stats"),
            Err(e) => warn!(card = self.card, status = e.code(), "unable to read DSP framing stats: {e}"),
        }
        if let Err(e) = client.reset_framing_stats() {
            warn!(card = self.card, status = e.code(), "unable to reset DSP framing stats: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelMask, NlpType};
    use crate::dsp::protocol::ConfigChannelError;
    use crate::dsp::transport::DspTransport;
    use crate::dsp::types::Companding;
    use crate::sim::{SimCard, SimFirmware, CHANNEL_CONFIG_TABLE};

    fn client(sim: &Arc<SimCard>) -> DspClient<SimCard> {
        DspClient::new(DspTransport::new(CardRegisters::new(sim.clone())), 0)
    }

    fn bring_up(sim: &Arc<SimCard>, mode: LineMode, config: &DriverConfig) -> (Result<(), DspError>, bool, DspClient<SimCard>) {
        let mut client = client(sim);
        let lock = Mutex::new(());
        let up = AtomicBool::new(false);
        let firmware = SimFirmware::valid();
        let result = BringUp { card: 0, mode, config, firmware: &firmware }.run(&mut client, &lock, &up);
        (result, up.load(Ordering::Acquire), client)
    }

    fn channel_words(client: &mut DspClient<SimCard>, chan: usize) -> Vec<u16> {
        let address = CHANNEL_CONFIG_TABLE + (chan * ChannelConfig::WORDS) as u32;
        client.read_memory(address, ChannelConfig::WORDS).unwrap()
    }

    #[test]
    fn t1_bring_up_configures_every_channel() {
        let sim = Arc::new(SimCard::new());
        let config = DriverConfig { ec_enable: ChannelMask(0x00ff_ffff), ..Default::default() };

        let (result, up, mut client) = bring_up(&sim, LineMode::T1, &config);

        result.unwrap();
        assert!(up);
        for chan in 0..24 {
            let words = channel_words(&mut client, chan);
            let slot = LineMode::T1.dsp_slot(chan) as u16;
            assert_eq!(ChannelConfig::slots_from_words(&words), Some([slot; 4]));
        }
        let bypassed: Vec<u16> = sim.dsp(|dsp| dsp.alg_log.iter().map(|&(chan, _)| chan).collect());
        assert_eq!(bypassed, (0..24).collect::<Vec<u16>>());

        let hpic_now = sim.peek32(TargetRegister::Hpic.offset());
        assert_eq!(hpic_now & (hpic::EC_ON | hpic::DSP_RST | hpic::XLATE), hpic::EC_ON | hpic::DSP_RST);
        assert_eq!(sim.peek32(TargetRegister::Eca1.offset()), 0x00ff_ffff);
        assert_eq!(sim.peek32(TargetRegister::Ecb1.offset()), 0);
        assert_eq!(sim.peek32(TargetRegister::Hcs.offset()), 0);
    }

    #[test]
    fn e1_translates_all_but_signaling_timeslot() {
        let sim = Arc::new(SimCard::new());
        let config = DriverConfig { nlp_type: NlpType::Mute, ..Default::default() };

        let (result, _, mut client) = bring_up(&sim, LineMode::E1, &config);

        result.unwrap();
        assert_ne!(sim.peek32(TargetRegister::Hpic.offset()) & hpic::XLATE, 0);
        assert_eq!(sim.peek32(TargetRegister::XlateEn.offset()), 0xffff_7fff);

        let expected = ChannelConfig::line_echo(16 * 4, Companding::None, NlpType::Mute);
        assert_eq!(channel_words(&mut client, 15), expected.to_words());
        let expected = ChannelConfig::line_echo(17 * 4, Companding::Pcmu, NlpType::Mute);
        assert_eq!(channel_words(&mut client, 16), expected.to_words());
    }

    #[test]
    fn no_ec_resets_and_stops() {
        let sim = Arc::new(SimCard::new());
        let config = DriverConfig { no_ec: true, ..Default::default() };

        let (result, up, _) = bring_up(&sim, LineMode::T1, &config);

        assert!(matches!(result, Err(DspError::Disabled)));
        assert!(!up);
        assert!(!sim.dsp(|dsp| dsp.booted));
        assert_ne!(sim.peek32(TargetRegister::Hpic.offset()) & hpic::DSP_RST, 0);
    }

    #[test]
    fn silent_interface_block_is_fatal() {
        let sim = Arc::new(SimCard::new());
        sim.dsp_mut(|dsp| dsp.boots = false);

        let (result, up, _) = bring_up(&sim, LineMode::T1, &DriverConfig::default());

        assert!(matches!(result, Err(DspError::NotResponding)));
        assert!(!up);
        assert_eq!(sim.peek32(TargetRegister::Eca1.offset()), 0);
    }

    #[test]
    fn port_failure_aborts_before_channels() {
        let sim = Arc::new(SimCard::new());
        sim.dsp_mut(|dsp| dsp.port_status = 5);

        let (result, up, _) = bring_up(&sim, LineMode::T1, &DriverConfig::default());

        assert!(matches!(result, Err(DspError::ConfigPorts(_))));
        assert!(!up);
        assert!(sim.dsp(|dsp| dsp.alg_log.is_empty()));
    }

    #[test]
    fn channel_failure_names_the_channel() {
        let sim = Arc::new(SimCard::new());
        sim.dsp_mut(|dsp| dsp.channel_status = 9);

        let (result, up, _) = bring_up(&sim, LineMode::T1, &DriverConfig::default());

        match result {
            Err(DspError::ConfigChannel { chan, source }) => {
                assert_eq!(chan, 0);
                assert_eq!(source, ConfigChannelError::ParmError { detail: 9 });
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!up);
    }

    #[test]
    fn missing_firmware_is_a_download_failure() {
        let sim = Arc::new(SimCard::new());
        let mut client = client(&sim);
        let lock = Mutex::new(());
        let up = AtomicBool::new(false);
        let config = DriverConfig::default();
        let firmware = SimFirmware::missing();

        let result = BringUp { card: 0, mode: LineMode::T1, config: &config, firmware: &firmware }.run(&mut client, &lock, &up);

        assert!(matches!(result, Err(DspError::Download(_))));
    }

    #[test]
    fn debug_diagnostics_reset_framing() {
        let sim = Arc::new(SimCard::new());
        sim.dsp_mut(|dsp| dsp.framing = [1; 10]);
        let config = DriverConfig { debug: DebugMask::DSP, ..Default::default() };

        let (result, _, mut client) = bring_up(&sim, LineMode::T1, &config);

        result.unwrap();
        assert!(client.read_framing_stats().unwrap().is_clean());
    }
}
