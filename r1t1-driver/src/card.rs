//! One R1T1 adapter: register window, framer, DMA ring, span state and
//! the echo canceller worker.
//!
//! `state` is the card lock. Everything that touches framer registers or
//! span state at run time takes it; nothing sleeps or talks to the DSP
//! while holding it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;
use tracing::{info, warn};

use crate::alarms::{Alarms, Maintenance};
use crate::chanmap::LineMode;
use crate::config::DriverConfig;
use crate::dsp::bringup::BringUp;
use crate::dsp::firmware::FirmwareStore;
use crate::dsp::{DspClient, DspError, DspTransport};
use crate::echocan::EchoScheduler;
use crate::error::{Error, Result};
use crate::pump::{DmaRegion, PumpState, BUFLEN_WORDS};
use crate::regs::{framer, CardBus, CardRegisters, Framer};
use crate::span::{LineSettings, Signaling};

/// DSP core serving the card's single span.
const DSP_ID: u16 = 0;

type Release<B> = Box<dyn FnOnce(&Card<B>) + Send>;

#[derive(Clone, Debug, Default)]
pub struct ChannelState {
    pub signaling: Signaling,
    pub open: bool,
    /// Last receive ABCD bits reported to the host.
    pub rxsig: u8,
    /// Last transmit ABCD bits requested by the host.
    pub txsig: u8,
}

/// Span state guarded by the card lock.
pub struct CardState {
    pub(crate) running: bool,
    pub(crate) settings: LineSettings,
    pub(crate) alarms: Alarms,
    /// Alarms as last handed to the host.
    pub(crate) reported: Alarms,
    pub(crate) maint: Maintenance,
    pub(crate) maint_timer: u32,
    pub(crate) alarm_timer: u32,
    pub(crate) loop_up_count: u32,
    pub(crate) loop_down_count: u32,
    pub(crate) sync_source: usize,
    pub(crate) rx_level: u8,
    /// Transmit signaling register images, T1 packs two channels per byte.
    pub(crate) txsig: [u8; 16],
    pub(crate) channels: Vec<ChannelState>,
}

impl CardState {
    fn new(mode: LineMode) -> Self {
        Self {
            running: false,
            settings: LineSettings::default(),
            alarms: Alarms::empty(),
            reported: Alarms::empty(),
            maint: Maintenance::None,
            maint_timer: 0,
            alarm_timer: 0,
            loop_up_count: 0,
            loop_down_count: 0,
            sync_source: 0,
            rx_level: 0,
            txsig: [0; 16],
            channels: vec![ChannelState::default(); mode.channels()],
        }
    }
}

pub struct Card<B: CardBus + 'static> {
    pub(crate) index: usize,
    pub(crate) mode: LineMode,
    pub(crate) config: DriverConfig,
    pub(crate) regs: CardRegisters<B>,
    pub(crate) framer: Framer<B>,
    pub(crate) state: Mutex<CardState>,
    pub(crate) pump: Mutex<PumpState>,
    pub(crate) dsp_up: AtomicBool,
    pub(crate) usecount: AtomicUsize,
    pub(crate) dead: AtomicBool,
    pub(crate) echo: Mutex<Option<Arc<EchoScheduler<B>>>>,
    release: Mutex<Option<Release<B>>>,
}

impl<B: CardBus + 'static> Card<B> {
    pub fn new(index: usize, config: &DriverConfig, bus: Arc<B>, dma: DmaRegion) -> Self {
        let mode = config.line_mode(index);
        Self {
            index,
            mode,
            config: config.clone(),
            regs: CardRegisters::new(bus.clone()),
            framer: framer(bus),
            state: Mutex::new(CardState::new(mode)),
            pump: Mutex::new(PumpState::new(dma, mode)),
            dsp_up: AtomicBool::new(false),
            usecount: AtomicUsize::new(0),
            dead: AtomicBool::new(false),
            echo: Mutex::new(None),
            release: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Host span number, 1-based.
    pub fn span(&self) -> usize {
        self.index + 1
    }

    pub fn line_mode(&self) -> LineMode {
        self.mode
    }

    pub fn name(&self) -> String {
        format!("R1T1/{}", self.index)
    }

    pub fn bus(&self) -> &Arc<B> {
        self.regs.bus()
    }

    pub fn registers(&self) -> &CardRegisters<B> {
        &self.regs
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn alarms(&self) -> Alarms {
        self.state.lock().alarms
    }

    pub fn maintenance(&self) -> Maintenance {
        self.state.lock().maint
    }

    pub fn sync_source(&self) -> usize {
        self.state.lock().sync_source
    }

    pub fn rx_level(&self) -> u8 {
        self.state.lock().rx_level
    }

    pub fn settings(&self) -> LineSettings {
        self.state.lock().settings
    }

    pub fn channel(&self, chan: usize) -> Option<ChannelState> {
        self.state.lock().channels.get(chan).cloned()
    }

    pub fn dsp_up(&self) -> bool {
        self.dsp_up.load(Ordering::Acquire)
    }

    pub fn use_count(&self) -> usize {
        self.usecount.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Echo canceller state confirmed by the worker, bit per channel.
    pub fn echo_mask(&self) -> u32 {
        self.echo.lock().as_ref().map_or(0, |echo| echo.current())
    }

    /// Point the DMA engine at the ring and put the framer in its reset
    /// state. DMA stays stopped until the span starts.
    pub fn hardware_init(&self) -> Result<()> {
        let (tx, rx) = {
            let pump = self.pump.lock();
            match pump.dma.as_ref() {
                Some(dma) => (dma.write_address(), dma.read_address()),
                None => return Err(Error::NoDevice),
            }
        };
        self.regs.program_dma(tx, rx, BUFLEN_WORDS)?;
        self.hard_reset()
    }

    /// Load and configure the DSP, then start the echo canceller worker.
    /// A card whose DSP fails to come up keeps running without echo
    /// cancellation.
    pub fn start_echo(&self, firmware: &dyn FirmwareStore) {
        let mut client = DspClient::new(DspTransport::new(CardRegisters::new(self.bus().clone())), DSP_ID);
        let bring_up = BringUp {
            card: self.index,
            mode: self.mode,
            config: &self.config,
            firmware,
        };

        match bring_up.run(&mut client, &self.state, &self.dsp_up) {
            Ok(()) => {}
            Err(DspError::Disabled) => return,
            Err(e) => {
                self.dsp_up.store(false, Ordering::Release);
                warn!(card = self.index, "echo cancellation unavailable: {e}");
                return;
            }
        }

        match EchoScheduler::start(self.index, client, self.mode, self.config.ec_disable) {
            Ok(echo) => *self.echo.lock() = Some(Arc::new(echo)),
            Err(e) => {
                self.dsp_up.store(false, Ordering::Release);
                warn!(card = self.index, "echo canceller worker not started: {e}");
            }
        }
    }

    /// Run `f` against the DSP on the worker thread, after any queued
    /// echo canceller changes. `None` when the DSP is not up.
    pub fn with_dsp<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DspClient<B>) -> R + Send + 'static,
    {
        self.scheduler()?.call(f)
    }

    pub(crate) fn scheduler(&self) -> Option<Arc<EchoScheduler<B>>> {
        self.echo.lock().clone()
    }

    pub(crate) fn set_release(&self, release: Release<B>) {
        *self.release.lock() = Some(release);
    }

    /// Tear the card down on device removal. Resources are released now
    /// if no channel is open, otherwise on the last close.
    pub fn remove(&self) {
        let echo = self.echo.lock().take();
        if let Some(echo) = echo {
            echo.shutdown();
        }
        self.dsp_up.store(false, Ordering::Release);

        if let Err(e) = self.shutdown() {
            warn!(card = self.index, "shutdown on removal failed: {e}");
        }

        self.dead.store(true, Ordering::SeqCst);
        let users = self.usecount.load(Ordering::SeqCst);
        if users == 0 {
            self.release();
        } else {
            info!(card = self.index, users, "release deferred until last close");
        }
    }

    pub(crate) fn release(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release(self);
            info!(card = self.index, "freed");
        }
    }

    pub(crate) fn take_dma(&self) -> Option<DmaRegion> {
        self.pump.lock().dma.take()
    }
}
