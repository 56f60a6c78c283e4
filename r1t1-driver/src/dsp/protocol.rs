//! G.PAK host API: one request/reply exchange per operation through the
//! DSP's interface block.
//!
//! After the program starts, the DSP publishes the address of its interface
//! block at [`IFBLK_ADDRESS`]. The block holds a command length word, a reply
//! length word and the two message buffers. The host writes a command then
//! its length; the DSP answers by filling the reply buffer and writing the
//! reply length.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::regs::CardBus;

use super::firmware::{FileId, FirmwareImage, FirmwareStore};
use super::transport::{DspAddress, DspTransport, SelectError, Selected};
use super::types::{AlgControl, ChannelConfig, ChannelType, PortConfig};

/// DSP word address of the interface block pointer (high word, low word).
pub const IFBLK_ADDRESS: DspAddress = 0x0100;

pub const MAX_DSP_CORES: u16 = 8;
pub const MAX_CHANNELS: u16 = 32;

/// Lowest address reachable through the host port.
pub const HPI_MIN_ADDRESS: DspAddress = 0x60;
pub const MAX_READ_WORDS: usize = 256;

pub(crate) const CMD_LEN: DspAddress = 0x00;
pub(crate) const REPLY_LEN: DspAddress = 0x01;
pub(crate) const CMD_BUF: DspAddress = 0x10;
pub(crate) const REPLY_BUF: DspAddress = 0x50;
pub(crate) const MAX_MSG_WORDS: usize = 0x40;

pub(crate) const REPLY_FLAG: u16 = 0x8000;
pub(crate) const STATUS_OK: u16 = 0;
pub(crate) const STATUS_INVALID_CHANNEL: u16 = 0xffff;

/// Tries per algorithm control request before the failure is reported.
pub const ALG_CONTROL_ATTEMPTS: usize = 3;

const REPLY_POLLS: usize = 100;
const REPLY_POLL_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum Opcode {
    Ping = 0x01,
    ConfigurePorts = 0x02,
    ConfigureChannel = 0x03,
    TearDownChannel = 0x04,
    AlgControl = 0x05,
    ReadFramingStats = 0x06,
    ResetFramingStats = 0x07,
    ReadCpuUsage = 0x08,
    ResetCpuUsage = 0x09,
}

impl Opcode {
    pub(crate) fn from_word(word: u16) -> Option<Self> {
        Some(match word {
            0x01 => Opcode::Ping,
            0x02 => Opcode::ConfigurePorts,
            0x03 => Opcode::ConfigureChannel,
            0x04 => Opcode::TearDownChannel,
            0x05 => Opcode::AlgControl,
            0x06 => Opcode::ReadFramingStats,
            0x07 => Opcode::ResetFramingStats,
            0x08 => Opcode::ReadCpuUsage,
            0x09 => Opcode::ResetCpuUsage,
            _ => return None,
        })
    }
}

///////////////////////////////////////////////////////////////////////
// Status

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PingError {
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("unable to read download file {0:?}")]
    FileReadError(FileId),
    #[error("invalid download file {0:?}")]
    InvalidFile(FileId),
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigPortsError {
    #[error("port parameter error (detail {detail})")]
    ParmError { detail: u16 },
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigChannelError {
    #[error("channel parameter error (detail {detail})")]
    ParmError { detail: u16 },
    #[error("invalid channel")]
    InvalidChannel,
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TearDownError {
    #[error("tear down error (detail {detail})")]
    Error { detail: u16 },
    #[error("invalid channel")]
    InvalidChannel,
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AlgControlError {
    #[error("invalid channel")]
    InvalidChannel,
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("control parameter error (detail {detail})")]
    ParmError { detail: u16 },
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramingStatsError {
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuUsageError {
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("DSP communication failure")]
    DspCommFailure,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadMemoryError {
    #[error("invalid DSP")]
    InvalidDsp,
    #[error("read of {0} words is too big")]
    SizeTooBig(usize),
    #[error("memory read failed")]
    Failure,
    #[error("address {0:#x} is not reachable through the host port")]
    InvalidAddress(DspAddress),
}

macro_rules! comm_failure {
    ($($t:ty),*) => {
        $(impl From<LinkError> for $t {
            fn from(_: LinkError) -> Self {
                <$t>::DspCommFailure
            }
        })*
    };
}

comm_failure!(PingError, DownloadError, ConfigPortsError, ConfigChannelError,
              TearDownError, AlgControlError, FramingStatsError, CpuUsageError);

// Numeric status values as reported by the G.PAK host API.

impl PingError {
    pub fn code(&self) -> u16 {
        match self {
            PingError::InvalidDsp => 1,
            PingError::DspCommFailure => 2,
        }
    }
}

impl DownloadError {
    pub fn code(&self) -> u16 {
        match self {
            DownloadError::FileReadError(_) => 1,
            DownloadError::InvalidFile(_) => 2,
            DownloadError::InvalidDsp => 3,
            DownloadError::DspCommFailure => 4,
        }
    }
}

impl ConfigPortsError {
    pub fn code(&self) -> u16 {
        match self {
            ConfigPortsError::ParmError { .. } => 1,
            ConfigPortsError::InvalidDsp => 2,
            ConfigPortsError::DspCommFailure => 3,
        }
    }

    pub fn detail(&self) -> u16 {
        match self {
            ConfigPortsError::ParmError { detail } => *detail,
            _ => 0,
        }
    }
}

impl ConfigChannelError {
    pub fn code(&self) -> u16 {
        match self {
            ConfigChannelError::ParmError { .. } => 1,
            ConfigChannelError::InvalidChannel => 2,
            ConfigChannelError::InvalidDsp => 3,
            ConfigChannelError::DspCommFailure => 4,
        }
    }

    pub fn detail(&self) -> u16 {
        match self {
            ConfigChannelError::ParmError { detail } => *detail,
            _ => 0,
        }
    }
}

impl TearDownError {
    pub fn code(&self) -> u16 {
        match self {
            TearDownError::Error { .. } => 1,
            TearDownError::InvalidChannel => 2,
            TearDownError::InvalidDsp => 3,
            TearDownError::DspCommFailure => 4,
        }
    }
}

impl AlgControlError {
    pub fn code(&self) -> u16 {
        match self {
            AlgControlError::InvalidChannel => 1,
            AlgControlError::InvalidDsp => 2,
            AlgControlError::ParmError { .. } => 3,
            AlgControlError::DspCommFailure => 4,
        }
    }
}

impl FramingStatsError {
    pub fn code(&self) -> u16 {
        match self {
            FramingStatsError::InvalidDsp => 1,
            FramingStatsError::DspCommFailure => 2,
        }
    }
}

impl CpuUsageError {
    pub fn code(&self) -> u16 {
        match self {
            CpuUsageError::InvalidDsp => 1,
            CpuUsageError::DspCommFailure => 2,
        }
    }
}

impl ReadMemoryError {
    pub fn code(&self) -> u16 {
        match self {
            ReadMemoryError::InvalidDsp => 1,
            ReadMemoryError::SizeTooBig(_) => 2,
            ReadMemoryError::Failure => 3,
            ReadMemoryError::InvalidAddress(_) => 4,
        }
    }
}

/// Anything that prevents a request/reply exchange from completing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum LinkError {
    NotRunning,
    Select(SelectError),
    Bus(ds2155_pac::device::Error),
    Timeout,
    Malformed,
}

impl From<SelectError> for LinkError {
    fn from(e: SelectError) -> Self {
        LinkError::Select(e)
    }
}

impl From<ds2155_pac::device::Error> for LinkError {
    fn from(e: ds2155_pac::device::Error) -> Self {
        LinkError::Bus(e)
    }
}

///////////////////////////////////////////////////////////////////////
// Results

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FramingStats {
    pub framing_errors: [u16; 3],
    pub dma_stops: u16,
    pub slips: [u16; 6],
}

impl FramingStats {
    const WORDS: usize = 10;

    pub fn is_clean(&self) -> bool {
        self.framing_errors.iter().chain(self.slips.iter()).all(|&n| n == 0) && self.dma_stops == 0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuUsage {
    pub peak: u16,
    pub previous_second_peak: u16,
}

struct Reply {
    status: u16,
    payload: Vec<u16>,
}

///////////////////////////////////////////////////////////////////////
// Client

pub struct DspClient<B> {
    transport: DspTransport<B>,
    dsp_id: u16,
    ifblk: Option<DspAddress>,
}

impl<B: CardBus> DspClient<B> {
    pub fn new(transport: DspTransport<B>, dsp_id: u16) -> Self {
        Self {
            transport,
            dsp_id,
            ifblk: None,
        }
    }

    pub fn dsp_id(&self) -> u16 {
        self.dsp_id
    }

    pub fn transport(&self) -> &DspTransport<B> {
        &self.transport
    }

    fn valid_dsp(&self) -> bool {
        self.dsp_id < MAX_DSP_CORES
    }

    /// Push the loader then the program image, and clear the interface
    /// block pointer so a fresh one can be detected after [`DspClient::run`].
    pub fn download(&mut self, store: &dyn FirmwareStore) -> Result<(), DownloadError> {
        if !self.valid_dsp() {
            return Err(DownloadError::InvalidDsp);
        }
        let loader = Self::image(store, FileId::Loader)?;
        let program = Self::image(store, FileId::Application)?;

        self.ifblk = None;
        let port = self.transport.select().map_err(LinkError::from)?;
        let push = |image: &FirmwareImage| -> Result<(), LinkError> {
            for section in image.sections() {
                port.write_block(section.address, &section.words)?;
            }
            Ok(())
        };
        push(&loader)?;
        push(&program)?;
        port.set(IFBLK_ADDRESS, 0).map_err(LinkError::from)?;
        port.set(IFBLK_ADDRESS + 1, 0).map_err(LinkError::from)?;
        debug!(dsp = self.dsp_id, loader = loader.words(), program = program.words(), "DSP image downloaded");
        Ok(())
    }

    fn image(store: &dyn FirmwareStore, file: FileId) -> Result<FirmwareImage, DownloadError> {
        let bytes = store.load(file).map_err(|e| {
            warn!(?file, %e, "unable to read DSP image");
            DownloadError::FileReadError(file)
        })?;
        FirmwareImage::parse(&bytes).ok_or(DownloadError::InvalidFile(file))
    }

    pub fn run(&mut self) -> Result<(), SelectError> {
        let port = self.transport.select()?;
        port.run()?;
        Ok(())
    }

    /// Read the interface block pointer; `None` until the program is up.
    pub fn poll_interface_block(&mut self) -> Result<Option<DspAddress>, SelectError> {
        let port = self.transport.select()?;
        let high = port.get(IFBLK_ADDRESS)? as DspAddress;
        let low = port.get(IFBLK_ADDRESS + 1)? as DspAddress;
        drop(port);

        let address = (high << 16) | low;
        self.ifblk = (address != 0).then_some(address);
        Ok(self.ifblk)
    }

    fn exchange(&mut self, opcode: Opcode, arg: u16, payload: &[u16]) -> Result<Reply, LinkError> {
        let ifblk = self.ifblk.ok_or(LinkError::NotRunning)?;
        let length = payload.len() + 2;
        if length > MAX_MSG_WORDS {
            return Err(LinkError::Malformed);
        }

        let port = self.transport.select()?;
        port.set(ifblk + REPLY_LEN, 0)?;
        port.write_block(ifblk + CMD_BUF, &[opcode as u16, arg])?;
        port.write_block(ifblk + CMD_BUF + 2, payload)?;
        port.set(ifblk + CMD_LEN, length as u16)?;

        let reply_length = Self::await_reply(&port, ifblk)?;
        if !(2..=MAX_MSG_WORDS).contains(&reply_length) {
            return Err(LinkError::Malformed);
        }
        let mut reply = vec![0u16; reply_length];
        port.read_block(ifblk + REPLY_BUF, &mut reply)?;
        port.set(ifblk + REPLY_LEN, 0)?;
        drop(port);

        if reply[0] != opcode as u16 | REPLY_FLAG {
            warn!(?opcode, reply = reply[0], "mismatched DSP reply");
            return Err(LinkError::Malformed);
        }
        Ok(Reply {
            status: reply[1],
            payload: reply.split_off(2),
        })
    }

    fn await_reply(port: &Selected<'_, B>, ifblk: DspAddress) -> Result<usize, LinkError> {
        for _ in 0..REPLY_POLLS {
            let length = port.get(ifblk + REPLY_LEN)?;
            if length != 0 {
                return Ok(length as usize);
            }
            thread::sleep(REPLY_POLL_INTERVAL);
        }
        Err(LinkError::Timeout)
    }

    pub fn ping(&mut self) -> Result<u16, PingError> {
        if !self.valid_dsp() {
            return Err(PingError::InvalidDsp);
        }
        let reply = self.exchange(Opcode::Ping, 0, &[])?;
        if reply.status != STATUS_OK {
            debug!(dsp = self.dsp_id, status = reply.status, "ping refused");
            return Err(PingError::DspCommFailure);
        }
        reply.payload.first().copied().ok_or(PingError::DspCommFailure)
    }

    pub fn configure_ports(&mut self, config: &PortConfig) -> Result<(), ConfigPortsError> {
        if !self.valid_dsp() {
            return Err(ConfigPortsError::InvalidDsp);
        }
        debug!(dsp = self.dsp_id, ?config, "configuring serial ports");
        let reply = self.exchange(Opcode::ConfigurePorts, 0, &config.to_words())?;
        match reply.status {
            STATUS_OK => Ok(()),
            detail => Err(ConfigPortsError::ParmError { detail }),
        }
    }

    pub fn configure_channel(&mut self, chan: u16, kind: ChannelType, config: &ChannelConfig) -> Result<(), ConfigChannelError> {
        if !self.valid_dsp() {
            return Err(ConfigChannelError::InvalidDsp);
        }
        if chan >= MAX_CHANNELS {
            return Err(ConfigChannelError::InvalidChannel);
        }
        debug!(dsp = self.dsp_id, chan, ?kind, ?config, "configuring channel");
        let mut payload = vec![kind as u16];
        payload.extend(config.to_words());
        let reply = self.exchange(Opcode::ConfigureChannel, chan, &payload)?;
        match reply.status {
            STATUS_OK => Ok(()),
            STATUS_INVALID_CHANNEL => Err(ConfigChannelError::InvalidChannel),
            detail => Err(ConfigChannelError::ParmError { detail }),
        }
    }

    pub fn tear_down_channel(&mut self, chan: u16) -> Result<(), TearDownError> {
        if !self.valid_dsp() {
            return Err(TearDownError::InvalidDsp);
        }
        if chan >= MAX_CHANNELS {
            return Err(TearDownError::InvalidChannel);
        }
        let reply = self.exchange(Opcode::TearDownChannel, chan, &[])?;
        match reply.status {
            STATUS_OK => Ok(()),
            STATUS_INVALID_CHANNEL => Err(TearDownError::InvalidChannel),
            detail => Err(TearDownError::Error { detail }),
        }
    }

    pub fn alg_control(&mut self, chan: u16, control: AlgControl) -> Result<(), AlgControlError> {
        if !self.valid_dsp() {
            return Err(AlgControlError::InvalidDsp);
        }
        if chan >= MAX_CHANNELS {
            return Err(AlgControlError::InvalidChannel);
        }
        let reply = self.exchange(Opcode::AlgControl, chan, &[control as u16])?;
        match reply.status {
            STATUS_OK => Ok(()),
            STATUS_INVALID_CHANNEL => Err(AlgControlError::InvalidChannel),
            detail => Err(AlgControlError::ParmError { detail }),
        }
    }

    /// Algorithm control with up to [`ALG_CONTROL_ATTEMPTS`] tries; only the
    /// last failure is reported.
    pub fn alg_control_retry(&mut self, chan: u16, control: AlgControl) -> Result<(), AlgControlError> {
        let mut attempt = 1;
        loop {
            match self.alg_control(chan, control) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= ALG_CONTROL_ATTEMPTS => {
                    error!(dsp = self.dsp_id, chan, ?control, status = e.code(), "algorithm control failed: {e}");
                    return Err(e);
                }
                Err(e) => {
                    debug!(dsp = self.dsp_id, chan, ?control, attempt, "algorithm control retry: {e}");
                    attempt += 1;
                }
            }
        }
    }

    pub fn read_framing_stats(&mut self) -> Result<FramingStats, FramingStatsError> {
        if !self.valid_dsp() {
            return Err(FramingStatsError::InvalidDsp);
        }
        let reply = self.exchange(Opcode::ReadFramingStats, 0, &[])?;
        let w = &reply.payload;
        if w.len() < FramingStats::WORDS {
            return Err(FramingStatsError::DspCommFailure);
        }
        Ok(FramingStats {
            framing_errors: [w[0], w[1], w[2]],
            dma_stops: w[3],
            slips: [w[4], w[5], w[6], w[7], w[8], w[9]],
        })
    }

    pub fn reset_framing_stats(&mut self) -> Result<(), FramingStatsError> {
        if !self.valid_dsp() {
            return Err(FramingStatsError::InvalidDsp);
        }
        self.exchange(Opcode::ResetFramingStats, 0, &[])?;
        Ok(())
    }

    pub fn read_cpu_usage(&mut self) -> Result<CpuUsage, CpuUsageError> {
        if !self.valid_dsp() {
            return Err(CpuUsageError::InvalidDsp);
        }
        let reply = self.exchange(Opcode::ReadCpuUsage, 0, &[])?;
        match reply.payload[..] {
            [peak, previous_second_peak, ..] => Ok(CpuUsage { peak, previous_second_peak }),
            _ => Err(CpuUsageError::DspCommFailure),
        }
    }

    pub fn reset_cpu_usage(&mut self) -> Result<(), CpuUsageError> {
        if !self.valid_dsp() {
            return Err(CpuUsageError::InvalidDsp);
        }
        self.exchange(Opcode::ResetCpuUsage, 0, &[])?;
        Ok(())
    }

    /// Diagnostic read of DSP memory through the host port.
    pub fn read_memory(&mut self, address: DspAddress, words: usize) -> Result<Vec<u16>, ReadMemoryError> {
        if !self.valid_dsp() {
            return Err(ReadMemoryError::InvalidDsp);
        }
        if words > MAX_READ_WORDS {
            return Err(ReadMemoryError::SizeTooBig(words));
        }
        if address < HPI_MIN_ADDRESS {
            return Err(ReadMemoryError::InvalidAddress(address));
        }
        let port = self.transport.select().map_err(|_| ReadMemoryError::Failure)?;
        let mut out = vec![0u16; words];
        port.read_block(address, &mut out).map_err(|_| ReadMemoryError::Failure)?;
        Ok(out)
    }
}
