//! Card discovery and teardown.
//!
//! The registry owns every bound card. Probing a device walks the platform
//! acquisitions in a fixed order and unwinds them in reverse on any failure;
//! a bound card carries a release closure that performs the same unwind when
//! the card is finally freed.

use std::sync::Arc;

use spin::Mutex;
use tracing::{debug, info, warn};

use crate::card::Card;
use crate::config::DriverConfig;
use crate::dsp::firmware::FirmwareStore;
use crate::error::{Error, Result};
use crate::pump::{DmaRegion, IrqReturn};
use crate::regs::{CardBus, CardRegisters, CONTROL_STOP, MIN_VERSION, REGION_SIZE};
use crate::span::SpanHost;

/// Cards one registry can hold.
pub const MAX_CARDS: usize = 32;

/// Bus-level services the registry needs from the host platform.
pub trait Platform: Send + Sync + 'static {
    type Bus: CardBus + 'static;

    fn claim_region(&self, base: u64, len: usize) -> Result<()>;
    fn release_region(&self, base: u64, len: usize);
    fn map(&self, base: u64, len: usize) -> Result<Arc<Self::Bus>>;
    fn unmap(&self, bus: &Arc<Self::Bus>);
    /// Coherent memory for one DMA ring.
    fn alloc_dma(&self) -> Result<DmaRegion>;
    fn free_dma(&self, region: DmaRegion);
    /// Route `irq` to [`CardRegistry::interrupt`] for `card`. The line may
    /// be shared.
    fn request_irq(&self, irq: u32, card: usize) -> Result<()>;
    fn free_irq(&self, irq: u32, card: usize);
}

/// A discovered adapter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PciDevice {
    /// Bus address of the register window.
    pub base: u64,
    pub irq: u32,
}

enum Slot<B: CardBus + 'static> {
    Free,
    Probing,
    Bound(Arc<Card<B>>),
}

type Slots<B> = Arc<Mutex<Vec<Slot<B>>>>;

fn free_slot<B: CardBus + 'static>(slots: &Mutex<Vec<Slot<B>>>, index: usize) {
    if let Some(slot) = slots.lock().get_mut(index) {
        *slot = Slot::Free;
    }
}

/// Resources taken so far by one probe. Dropping it gives them back in
/// reverse order.
struct Acquisition<'a, P: Platform> {
    platform: &'a P,
    slots: &'a Mutex<Vec<Slot<P::Bus>>>,
    index: usize,
    device: PciDevice,
    region: bool,
    bus: Option<Arc<P::Bus>>,
    dma: Option<DmaRegion>,
    irq: bool,
    committed: bool,
}

impl<'a, P: Platform> Acquisition<'a, P> {
    /// Hand the ring over to the card. Everything else acquired so far now
    /// belongs to the card's release closure and the slot stays reserved.
    fn commit(mut self) -> Result<DmaRegion> {
        let dma = self.dma.take().ok_or(Error::Resource("DMA ring"))?;
        self.region = false;
        self.bus = None;
        self.irq = false;
        self.committed = true;
        Ok(dma)
    }
}

impl<'a, P: Platform> Drop for Acquisition<'a, P> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.irq {
            self.platform.free_irq(self.device.irq, self.index);
        }
        if let Some(dma) = self.dma.take() {
            self.platform.free_dma(dma);
        }
        if let Some(bus) = self.bus.take() {
            self.platform.unmap(&bus);
        }
        if self.region {
            self.platform.release_region(self.device.base, REGION_SIZE);
        }
        free_slot(self.slots, self.index);
        debug!(card = self.index, "probe unwound");
    }
}

pub struct CardRegistry<P: Platform> {
    platform: Arc<P>,
    config: DriverConfig,
    firmware: Arc<dyn FirmwareStore>,
    slots: Slots<P::Bus>,
}

impl<P: Platform> CardRegistry<P> {
    pub fn new(platform: Arc<P>, config: DriverConfig, firmware: Arc<dyn FirmwareStore>) -> Self {
        let slots = (0..MAX_CARDS).map(|_| Slot::Free).collect();
        Self {
            platform,
            config,
            firmware,
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn reserve(&self) -> Result<usize> {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(|slot| matches!(slot, Slot::Free)).ok_or(Error::NoSlot)?;
        slots[index] = Slot::Probing;
        Ok(index)
    }

    /// Bring up a newly discovered adapter in the lowest free slot.
    pub fn probe(&self, device: PciDevice) -> Result<Arc<Card<P::Bus>>> {
        let index = self.reserve()?;
        let mut acquired = Acquisition {
            platform: &*self.platform,
            slots: &self.slots,
            index,
            device,
            region: false,
            bus: None,
            dma: None,
            irq: false,
            committed: false,
        };

        self.platform.claim_region(device.base, REGION_SIZE)?;
        acquired.region = true;

        let bus = self.platform.map(device.base, REGION_SIZE)?;
        acquired.bus = Some(bus.clone());

        acquired.dma = Some(self.platform.alloc_dma()?);

        let regs = CardRegisters::new(bus.clone());
        regs.control(CONTROL_STOP)?;

        self.platform.request_irq(device.irq, index)?;
        acquired.irq = true;

        let version = regs.version()?;
        if version < MIN_VERSION {
            warn!(card = index, version, "hardware too old, need version {MIN_VERSION}");
            return Err(Error::HardwareVersion(version));
        }

        let dma = acquired.commit()?;
        let card = Arc::new(Card::new(index, &self.config, bus.clone(), dma));
        card.set_release(self.releaser(device, bus));

        if let Err(e) = card.hardware_init() {
            warn!(card = index, "hardware init failed: {e}");
            card.release();
            return Err(e);
        }

        info!(card = index, version, "Spotted a {}", card.line_mode().name());
        card.start_echo(&*self.firmware);

        self.slots.lock()[index] = Slot::Bound(card.clone());
        Ok(card)
    }

    /// Closure that gives back everything `probe` acquired for a card.
    fn releaser(&self, device: PciDevice, bus: Arc<P::Bus>) -> Box<dyn FnOnce(&Card<P::Bus>) + Send> {
        let platform = self.platform.clone();
        let slots = self.slots.clone();
        Box::new(move |card: &Card<P::Bus>| {
            let index = card.index();
            platform.free_irq(device.irq, index);
            if let Some(dma) = card.take_dma() {
                platform.free_dma(dma);
            }
            platform.unmap(&bus);
            platform.release_region(device.base, REGION_SIZE);
            free_slot(&slots, index);
        })
    }

    pub fn get(&self, index: usize) -> Option<Arc<Card<P::Bus>>> {
        match self.slots.lock().get(index)? {
            Slot::Bound(card) => Some(card.clone()),
            _ => None,
        }
    }

    pub fn cards(&self) -> Vec<Arc<Card<P::Bus>>> {
        self.slots
            .lock()
            .iter()
            .filter_map(|slot| match slot {
                Slot::Bound(card) => Some(card.clone()),
                _ => None,
            })
            .collect()
    }

    /// Entry point for the interrupt line requested for card `index`.
    pub fn interrupt(&self, index: usize, host: &mut dyn SpanHost) -> IrqReturn {
        match self.get(index) {
            Some(card) => card.interrupt(host),
            None => IrqReturn::None,
        }
    }

    /// Device removal. The slot is freed when the card is released, which
    /// waits for the last open channel to close.
    pub fn remove(&self, index: usize) -> Result<()> {
        let card = self.get(index).ok_or(Error::NoDevice)?;
        info!(card = index, "removing");
        card.remove();
        Ok(())
    }
}
