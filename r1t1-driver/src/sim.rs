//! Simulated card for unit tests: the register window, a scripted G.PAK
//! DSP behind the host port, and recording doubles for the host telephony
//! layer and the platform.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use ds2155_pac::device::{Error as BusError, Result};

use crate::alarms::Alarms;
use crate::card::Card;
use crate::chanmap::{LineMode, CHUNKSIZE};
use crate::config::DriverConfig;
use crate::dsp::firmware::{FileId, FirmwareImage, FirmwareStore, Section};
use crate::dsp::protocol::{
    Opcode, CMD_BUF, CMD_LEN, IFBLK_ADDRESS, MAX_CHANNELS, REPLY_BUF, REPLY_FLAG, REPLY_LEN,
    STATUS_INVALID_CHANNEL,
};
use crate::dsp::types::ChannelConfig;
use crate::error::{Error, Result as DriverResult};
use crate::pump::DmaRegion;
use crate::registry::Platform;
use crate::regs::{hpic, CardBus, TargetRegister, REGION_SIZE, VERSION};
use crate::span::SpanHost;

/// Where the simulated DSP keeps channel configurations, one
/// [`ChannelConfig::WORDS`] record per channel.
pub const CHANNEL_CONFIG_TABLE: u32 = 0x4000;

/// Interface block the simulated program publishes.
const SIM_IFBLK: u32 = 0x0001_2000;

const SIM_VERSION: u16 = 40;

const FRAMER_SR2: usize = 0x18 << 2;
const FRAMER_SR3: usize = 0x1a << 2;

///////////////////////////////////////////////////////////////////////
// DSP

pub struct SimDsp {
    pub memory: HashMap<u32, u16>,
    pub booted: bool,
    /// Publish the interface block when started.
    pub boots: bool,
    /// Answer mailbox commands.
    pub responsive: bool,
    pub version: u16,
    pub ping_status: u16,
    pub port_status: u16,
    pub channel_status: u16,
    /// Number of upcoming algorithm control requests to fail.
    pub alg_failures: usize,
    /// Every algorithm control request received, as (channel, code).
    pub alg_log: Vec<(u16, u16)>,
    pub framing: [u16; 10],
    pub cpu: [u16; 2],
}

impl SimDsp {
    fn new() -> Self {
        Self {
            memory: HashMap::new(),
            booted: false,
            boots: true,
            responsive: true,
            version: 0x0206,
            ping_status: 0,
            port_status: 0,
            channel_status: 0,
            alg_failures: 0,
            alg_log: Vec::new(),
            framing: [0; 10],
            cpu: [0; 2],
        }
    }

    fn get(&self, address: u32) -> u16 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    fn set(&mut self, address: u32, value: u16) {
        self.memory.insert(address, value);
    }

    fn reset(&mut self) {
        self.memory.clear();
        self.booted = false;
    }

    fn start(&mut self) {
        if self.boots {
            self.booted = true;
            self.set(IFBLK_ADDRESS, (SIM_IFBLK >> 16) as u16);
            self.set(IFBLK_ADDRESS + 1, SIM_IFBLK as u16);
        }
    }

    fn host_write(&mut self, address: u32, value: u16) {
        self.set(address, value);
        if self.booted && self.responsive && address == SIM_IFBLK + CMD_LEN && value != 0 {
            self.execute(value as usize);
        }
    }

    fn execute(&mut self, length: usize) {
        let command: Vec<u16> = (0..length as u32).map(|i| self.get(SIM_IFBLK + CMD_BUF + i)).collect();
        let (opcode, arg, payload) = (command[0], command[1], &command[2..]);

        let (status, reply): (u16, Vec<u16>) = match Opcode::from_word(opcode) {
            Some(Opcode::Ping) => (self.ping_status, vec![self.version]),
            Some(Opcode::ConfigurePorts) => (self.port_status, vec![]),
            Some(Opcode::ConfigureChannel) if arg >= MAX_CHANNELS => (STATUS_INVALID_CHANNEL, vec![]),
            Some(Opcode::ConfigureChannel) if self.channel_status != 0 => (self.channel_status, vec![]),
            Some(Opcode::ConfigureChannel) => {
                let base = CHANNEL_CONFIG_TABLE + arg as u32 * ChannelConfig::WORDS as u32;
                for (i, word) in payload[1..].iter().enumerate() {
                    self.set(base + i as u32, *word);
                }
                (0, vec![])
            }
            Some(Opcode::TearDownChannel) if arg >= MAX_CHANNELS => (STATUS_INVALID_CHANNEL, vec![]),
            Some(Opcode::TearDownChannel) => (0, vec![]),
            Some(Opcode::AlgControl) if arg >= MAX_CHANNELS => (STATUS_INVALID_CHANNEL, vec![]),
            Some(Opcode::AlgControl) => {
                self.alg_log.push((arg, payload[0]));
                if self.alg_failures > 0 {
                    self.alg_failures -= 1;
                    (1, vec![])
                } else {
                    (0, vec![])
                }
            }
            Some(Opcode::ReadFramingStats) => (0, self.framing.to_vec()),
            Some(Opcode::ResetFramingStats) => {
                self.framing = [0; 10];
                (0, vec![])
            }
            Some(Opcode::ReadCpuUsage) => (0, self.cpu.to_vec()),
            Some(Opcode::ResetCpuUsage) => {
                self.cpu = [0; 2];
                (0, vec![])
            }
            None => (0xfffe, vec![]),
        };

        let mut words = vec![opcode | REPLY_FLAG, status];
        words.extend(reply);
        for (i, word) in words.iter().enumerate() {
            self.set(SIM_IFBLK + REPLY_BUF + i as u32, *word);
        }
        self.set(SIM_IFBLK + CMD_LEN, 0);
        self.set(SIM_IFBLK + REPLY_LEN, words.len() as u16);
    }
}

///////////////////////////////////////////////////////////////////////
// Card

struct SimState {
    bytes: Vec<u8>,
    status: HashMap<usize, u8>,
    reads: HashMap<usize, usize>,
    writes: Vec<(usize, u32)>,
    unmapped: bool,
    dsp: SimDsp,
}

impl SimState {
    fn word(&self, offset: usize) -> u32 {
        u32::from_le_bytes([self.bytes[offset], self.bytes[offset + 1], self.bytes[offset + 2], self.bytes[offset + 3]])
    }

    fn set_word(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

pub struct SimCard {
    state: Mutex<SimState>,
}

impl SimCard {
    pub fn new() -> Self {
        let mut state = SimState {
            bytes: vec![0; REGION_SIZE],
            status: HashMap::new(),
            reads: HashMap::new(),
            writes: Vec::new(),
            unmapped: false,
            dsp: SimDsp::new(),
        };
        state.set_word(VERSION, SIM_VERSION as u32);
        // Framer status latches read back clear until a test raises them.
        for register in [FRAMER_SR2, FRAMER_SR3] {
            state.status.insert(register, 0);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn peek8(&self, offset: usize) -> u8 {
        let state = self.state.lock().unwrap();
        state.status.get(&offset).copied().unwrap_or(state.bytes[offset])
    }

    pub fn poke8(&self, offset: usize, value: u8) {
        self.state.lock().unwrap().bytes[offset] = value;
    }

    /// Pin a status register: reads return `value`, writes are ignored.
    pub fn set_status(&self, offset: usize, value: u8) {
        self.state.lock().unwrap().status.insert(offset, value);
    }

    pub fn peek32(&self, offset: usize) -> u32 {
        self.state.lock().unwrap().word(offset)
    }

    pub fn poke32(&self, offset: usize, value: u32) {
        self.state.lock().unwrap().set_word(offset, value);
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.state.lock().unwrap().reads.get(&offset).copied().unwrap_or(0)
    }

    /// Values written at `offset`, oldest first.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state.writes.iter().filter(|(o, _)| *o == offset).map(|(_, v)| *v).collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.reads.clear();
        state.writes.clear();
    }

    /// Fail every later bus access, as after the window is unmapped.
    pub fn unmap(&self) {
        self.state.lock().unwrap().unmapped = true;
    }

    pub fn dsp<R>(&self, f: impl FnOnce(&SimDsp) -> R) -> R {
        f(&self.state.lock().unwrap().dsp)
    }

    pub fn dsp_mut<R>(&self, f: impl FnOnce(&mut SimDsp) -> R) -> R {
        f(&mut self.state.lock().unwrap().dsp)
    }

    pub fn dsp_version(&self) -> u16 {
        self.dsp(|dsp| dsp.version)
    }
}

impl CardBus for SimCard {
    fn read8(&self, offset: usize) -> Result<u8> {
        let mut state = self.state.lock().unwrap();
        if state.unmapped {
            return Err(BusError::Unmapped);
        }
        *state.reads.entry(offset).or_default() += 1;
        Ok(state.status.get(&offset).copied().unwrap_or(state.bytes[offset]))
    }

    fn write8(&self, offset: usize, value: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unmapped {
            return Err(BusError::Unmapped);
        }
        state.writes.push((offset, value as u32));
        if !state.status.contains_key(&offset) {
            state.bytes[offset] = value;
        }
        Ok(())
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        if state.unmapped {
            return Err(BusError::Unmapped);
        }
        *state.reads.entry(offset).or_default() += 1;
        if offset == TargetRegister::Hpid.offset() {
            let address = state.word(TargetRegister::Hpia.offset());
            return Ok(state.dsp.get(address) as u32);
        }
        Ok(state.word(offset))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unmapped {
            return Err(BusError::Unmapped);
        }
        state.writes.push((offset, value));
        let previous = state.word(offset);
        state.set_word(offset, value);

        if offset == TargetRegister::Hpid.offset() {
            let address = state.word(TargetRegister::Hpia.offset());
            state.dsp.host_write(address, value as u16);
        } else if offset == TargetRegister::Hpic.offset() {
            if previous & hpic::DSP_RST != 0 && value & hpic::DSP_RST == 0 {
                state.dsp.reset();
                state.set_word(offset, value & !hpic::BL_GO);
            } else if value & hpic::BL_GO != 0 && previous & hpic::BL_GO == 0 {
                state.dsp.start();
            }
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////
// Firmware

pub struct SimFirmware {
    loader: Option<Vec<u8>>,
    application: Option<Vec<u8>>,
}

impl SimFirmware {
    fn image(address: u32, words: &[u16]) -> Vec<u8> {
        FirmwareImage::from_sections(vec![Section { address, words: words.to_vec() }]).to_bytes()
    }

    pub fn valid() -> Self {
        Self {
            loader: Some(Self::image(0x8000, &[0x1234, 0x5678])),
            application: Some(Self::image(0x0001_0000, &[0xaaaa, 0xbbbb, 0xcccc])),
        }
    }

    pub fn missing() -> Self {
        Self {
            loader: None,
            application: None,
        }
    }

    pub fn truncated() -> Self {
        let mut application = Self::image(0x0001_0000, &[1, 2, 3]);
        application.truncate(application.len() - 1);
        Self {
            application: Some(application),
            ..Self::valid()
        }
    }
}

impl FirmwareStore for SimFirmware {
    fn load(&self, file: FileId) -> io::Result<Vec<u8>> {
        let image = match file {
            FileId::Loader => &self.loader,
            FileId::Application => &self.application,
        };
        image.clone().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, file.file_name()))
    }
}

///////////////////////////////////////////////////////////////////////
// Host

/// Host double: records everything the card hands up and transmits a
/// per-channel fill byte (`chan + 1`).
#[derive(Default)]
pub struct RecordingHost {
    pub received: Vec<Vec<[u8; CHUNKSIZE]>>,
    pub transmits: usize,
    pub echo_cancelled: usize,
    pub signaling: Vec<(usize, u8)>,
    pub alarms: Vec<Alarms>,
}

impl SpanHost for RecordingHost {
    fn receive(&mut self, _span: usize, chunks: &[[u8; CHUNKSIZE]]) {
        self.received.push(chunks.to_vec());
    }

    fn transmit(&mut self, _span: usize, chunks: &mut [[u8; CHUNKSIZE]]) {
        self.transmits += 1;
        for (chan, chunk) in chunks.iter_mut().enumerate() {
            chunk.fill(chan as u8 + 1);
        }
    }

    fn echo_cancel(&mut self, _span: usize, _chunks: &mut [[u8; CHUNKSIZE]]) {
        self.echo_cancelled += 1;
    }

    fn signaling(&mut self, _span: usize, chan: usize, bits: u8) {
        self.signaling.push((chan, bits));
    }

    fn alarms(&mut self, _span: usize, alarms: Alarms) {
        self.alarms.push(alarms);
    }
}

///////////////////////////////////////////////////////////////////////
// Platform

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    ClaimRegion,
    Map,
    AllocDma,
    RequestIrq,
    FreeIrq,
    FreeDma,
    Unmap,
    ReleaseRegion,
}

pub struct SimPlatform {
    pub card: Arc<SimCard>,
    events: Mutex<Vec<PlatformEvent>>,
    fail: Mutex<Option<PlatformEvent>>,
}

impl SimPlatform {
    pub fn new(card: Arc<SimCard>) -> Self {
        Self {
            card,
            events: Mutex::new(Vec::new()),
            fail: Mutex::new(None),
        }
    }

    pub fn fail_at(&self, event: PlatformEvent) {
        *self.fail.lock().unwrap() = Some(event);
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: PlatformEvent) -> DriverResult<()> {
        if *self.fail.lock().unwrap() == Some(event) {
            return Err(match event {
                PlatformEvent::ClaimRegion => Error::Busy("register region"),
                PlatformEvent::RequestIrq => Error::Interrupt,
                _ => Error::Resource("simulated failure"),
            });
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl Platform for SimPlatform {
    type Bus = SimCard;

    fn claim_region(&self, _base: u64, _len: usize) -> DriverResult<()> {
        self.record(PlatformEvent::ClaimRegion)
    }

    fn release_region(&self, _base: u64, _len: usize) {
        let _ = self.record(PlatformEvent::ReleaseRegion);
    }

    fn map(&self, _base: u64, _len: usize) -> DriverResult<Arc<SimCard>> {
        self.record(PlatformEvent::Map)?;
        Ok(self.card.clone())
    }

    fn unmap(&self, _bus: &Arc<SimCard>) {
        let _ = self.record(PlatformEvent::Unmap);
    }

    fn alloc_dma(&self) -> DriverResult<DmaRegion> {
        self.record(PlatformEvent::AllocDma)?;
        Ok(DmaRegion::new(0x1000_0000))
    }

    fn free_dma(&self, _region: DmaRegion) {
        let _ = self.record(PlatformEvent::FreeDma);
    }

    fn request_irq(&self, _irq: u32, _card: usize) -> DriverResult<()> {
        self.record(PlatformEvent::RequestIrq)
    }

    fn free_irq(&self, _irq: u32, _card: usize) {
        let _ = self.record(PlatformEvent::FreeIrq);
    }
}

///////////////////////////////////////////////////////////////////////
// Cards

/// A card on a fresh simulated window. Nothing has been written to the
/// hardware yet.
pub fn card(mode: LineMode) -> (Arc<SimCard>, Card<SimCard>) {
    let sim = Arc::new(SimCard::new());
    let config = DriverConfig {
        e1: if mode == LineMode::E1 { 1 } else { 0 },
        ..DriverConfig::default()
    };
    let card = Card::new(0, &config, sim.clone(), DmaRegion::new(0x1000_0000));
    (sim, card)
}
