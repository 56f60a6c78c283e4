//! Interrupt-time TDM pump.
//!
//! The card DMAs one 32-timeslot half-buffer of `CHUNKSIZE` frames in each
//! direction per interrupt, alternating between two halves. Each interrupt
//! hands the completed receive half up to the host, fills the matching
//! transmit half, and spreads the slow framer work (signaling scan, alarm
//! poll, timers) over a 16-interrupt cycle.

use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};

use crate::chanmap::{LineMode, CHUNKSIZE, TIMESLOTS};
use crate::card::Card;
use crate::regs::{CardBus, IRQ_HALF, IRQ_NEW_DATA};
use crate::span::SpanHost;

/// Bytes in one half of one direction of the ring.
pub const HALF: usize = CHUNKSIZE * TIMESLOTS;

/// DMA transfer length programmed into BUFLEN, in 32-bit words per
/// direction.
pub const BUFLEN_WORDS: u16 = ((HALF * 2) >> 2) as u16;

/// Marker left at the end of the second receive half. The DMA engine
/// overwrites it on its first pass.
pub const CANARY: u32 = (0xca1e << 16) | 0xffff;

/// Initial value of the clock timeout counter.
pub const CLOCK_TIMEOUT: u32 = 100;

/// Interrupts per slow-work cycle.
const SLOW_CYCLE: u32 = 16;
const ALARM_SLOT: u32 = 4;
const ALARM_GATE: u32 = 0x30;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not raised by this card.
    None,
    Handled,
}

/// Ring layout as seen by the card: both transmit halves, then both
/// receive halves.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct DmaRing {
    pub write: [[u8; HALF]; 2],
    pub read: [[u8; HALF]; 2],
}

/// DMA-coherent memory holding the ring.
pub struct DmaRegion {
    bus_address: u32,
    ring: Box<DmaRing>,
}

impl DmaRegion {
    pub fn new(bus_address: u32) -> Self {
        let mut ring = Box::new(DmaRing::zeroed());
        ring.read[1][HALF - 4..].copy_from_slice(&CANARY.to_le_bytes());
        Self {
            bus_address,
            ring,
        }
    }

    pub fn bus_address(&self) -> u32 {
        self.bus_address
    }

    /// Transmit (host to line) half-buffers.
    pub fn write_address(&self) -> u32 {
        self.bus_address
    }

    /// Receive (line to host) half-buffers.
    pub fn read_address(&self) -> u32 {
        self.bus_address + (2 * HALF) as u32
    }

    pub fn ring(&self) -> &DmaRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut DmaRing {
        &mut self.ring
    }

    fn canary_intact(&self) -> bool {
        self.ring.read[1][HALF - 4..] == CANARY.to_le_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&*self.ring)
    }
}

/// Pump state, owned by the interrupt path.
pub struct PumpState {
    pub(crate) dma: Option<DmaRegion>,
    next_buf: usize,
    intcount: u32,
    clock_timeout: u32,
    canary_checked: bool,
    timeslots: Vec<usize>,
    rx: Vec<[u8; CHUNKSIZE]>,
    tx: Vec<[u8; CHUNKSIZE]>,
}

impl PumpState {
    pub fn new(dma: DmaRegion, mode: LineMode) -> Self {
        let channels = mode.channels();
        Self {
            dma: Some(dma),
            next_buf: 0,
            intcount: 0,
            clock_timeout: CLOCK_TIMEOUT,
            canary_checked: false,
            timeslots: (0..channels).map(|chan| mode.timeslot(chan)).collect(),
            rx: vec![[0; CHUNKSIZE]; channels],
            tx: vec![[0; CHUNKSIZE]; channels],
        }
    }

    pub fn intcount(&self) -> u32 {
        self.intcount
    }

    pub fn clock_timeout(&self) -> u32 {
        self.clock_timeout
    }

    pub fn next_buf(&self) -> usize {
        self.next_buf
    }

    /// Move the completed half-buffer `half` each way. Returns the
    /// interrupt count for the slow-work schedule, or `None` once the ring
    /// has been released.
    fn exchange(&mut self, half: usize, host: &mut dyn SpanHost, span: usize, cancel_echo: bool) -> Option<u32> {
        let dma = self.dma.as_mut()?;
        self.intcount = self.intcount.wrapping_add(1);
        self.clock_timeout = self.clock_timeout.saturating_sub(1);

        if half != self.next_buf {
            debug!(span, half, expected = self.next_buf, "DMA half slipped");
        }
        for (chunk, &ts) in self.rx.iter_mut().zip(&self.timeslots) {
            chunk.copy_from_slice(&dma.ring.read[half][ts * CHUNKSIZE..(ts + 1) * CHUNKSIZE]);
        }

        if cancel_echo {
            host.echo_cancel(span, &mut self.rx);
        }
        host.receive(span, &self.rx);
        host.transmit(span, &mut self.tx);

        for (chunk, &ts) in self.tx.iter().zip(&self.timeslots) {
            dma.ring.write[half][ts * CHUNKSIZE..(ts + 1) * CHUNKSIZE].copy_from_slice(chunk);
        }

        if !self.canary_checked && half == 1 {
            self.canary_checked = true;
            if dma.canary_intact() {
                warn!(span, "receive DMA has not written the ring");
            }
        }

        self.next_buf = half ^ 1;
        Some(self.intcount)
    }
}

impl<B: CardBus + 'static> Card<B> {
    /// Service one card interrupt. Safe to call for a shared line: a card
    /// that did not raise it returns [`IrqReturn::None`].
    pub fn interrupt(&self, host: &mut dyn SpanHost) -> IrqReturn {
        let status = match self.regs.irq_status() {
            Ok(status) => status,
            Err(_) => return IrqReturn::None,
        };
        if status & IRQ_NEW_DATA == 0 {
            return IrqReturn::None;
        }

        let half = (status & IRQ_HALF) as usize;
        let cancel_echo = !self.dsp_up();
        let intcount = match self.pump.lock().exchange(half, host, self.span(), cancel_echo) {
            Some(intcount) => intcount,
            None => return IrqReturn::None,
        };

        let mut state = self.state.lock();
        if let Err(e) = self.regs.acknowledge() {
            warn!(card = self.index, "interrupt acknowledge failed: {e}");
        }
        if let Err(e) = self.do_counters(&mut state, host) {
            debug!(card = self.index, "timer update failed: {e}");
        }

        let result = match intcount % SLOW_CYCLE {
            group @ 0..=2 => self.check_sigbits(&mut state, group as usize, host),
            ALARM_SLOT if intcount & ALARM_GATE == 0 => self.check_alarms(&mut state, host),
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(card = self.index, intcount, "slow poll failed: {e}");
        }

        IrqReturn::Handled
    }
}
