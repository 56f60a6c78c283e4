//! Card register space: the FPGA control block, the DS2155 framer window
//! and the DSP host-port target registers, all behind one memory mapping.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use ds2155_pac::device::{Device, DeviceAccess, Error, RegisterAddress, RegisterValue, Result};

/// Size of the register window claimed from the platform.
pub const REGION_SIZE: usize = 0x1000;

pub const CONTROL: usize = 0x800;
pub const STATE: usize = 0x804;
pub const IRQ_STATUS: usize = 0x805;
pub const VERSION: usize = 0x808;
pub const TXBUFSTART: usize = 0x810;
pub const RXBUFSTART: usize = 0x814;
pub const BUFLEN: usize = 0x818;

pub const CONTROL_STOP: u8 = 0x00;
pub const CONTROL_RUN: u8 = 0x01;
pub const CONTROL_ACK: u8 = 0x03;

pub const IRQ_NEW_DATA: u8 = 0x02;
pub const IRQ_HALF: u8 = 0x01;

pub const MIN_VERSION: u16 = 36;

/// DSP target register block.
pub const TARG_REGS: usize = 0xc00;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetRegister {
    Hpic = 0x00,
    Hpia = 0x04,
    Hpid = 0x08,
    Hcs = 0x0c,
    Eca1 = 0x10,
    Ecb1 = 0x14,
    XlateEn = 0x18,
}

impl TargetRegister {
    pub fn offset(self) -> usize {
        TARG_REGS + self as usize
    }
}

/// HPIC control bits.
pub mod hpic {
    pub const DSP_RST: u32 = 1 << 0;
    pub const EC_ON: u32 = 1 << 1;
    pub const XLATE: u32 = 1 << 2;
    pub const BL_GO: u32 = 1 << 3;
}

///////////////////////////////////////////////////////////////////////
// Bus

/// Raw access to the mapped card window. Offsets are in bytes.
pub trait CardBus: Send + Sync {
    fn read8(&self, offset: usize) -> Result<u8>;
    fn write8(&self, offset: usize, value: u8) -> Result<()>;
    fn read32(&self, offset: usize) -> Result<u32>;
    fn write32(&self, offset: usize, value: u32) -> Result<()>;
}

/// Memory-mapped card window.
pub struct Mmio {
    base: AtomicPtr<u8>,
    len: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must point at a device mapping of at least `len` bytes that
    /// stays valid until [`Mmio::unmap`] returns.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            base: AtomicPtr::new(base),
            len,
        }
    }

    /// Detach the mapping. Later accesses fail with [`Error::Unmapped`].
    pub fn unmap(&self) -> *mut u8 {
        self.base.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    fn at(&self, offset: usize, width: usize) -> Result<*mut u8> {
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            return Err(Error::Unmapped);
        }
        assert!(offset + width <= self.len);
        assert!(offset % width == 0);
        Ok(unsafe { base.add(offset) })
    }
}

impl CardBus for Mmio {
    fn read8(&self, offset: usize) -> Result<u8> {
        let p = self.at(offset, 1)?;
        Ok(unsafe { p.read_volatile() })
    }

    fn write8(&self, offset: usize, value: u8) -> Result<()> {
        let p = self.at(offset, 1)?;
        unsafe { p.write_volatile(value) };
        Ok(())
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        let p = self.at(offset, 4)? as *const u32;
        Ok(unsafe { p.read_volatile() })
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let p = self.at(offset, 4)? as *mut u32;
        unsafe { p.write_volatile(value) };
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////
// Framer window

/// DS2155 parallel port as seen through the card: one byte register every
/// four bytes. Writes are posted, so each one is followed by a read back.
pub struct FramerPort<B> {
    bus: Arc<B>,
}

impl<B: CardBus> DeviceAccess for FramerPort<B> {
    fn read(&self, address: RegisterAddress) -> Result<RegisterValue> {
        self.bus.read8((address as usize) << 2)
    }

    fn write(&self, address: RegisterAddress, value: RegisterValue) -> Result<()> {
        let offset = (address as usize) << 2;
        self.bus.write8(offset, value)?;
        self.bus.read8(offset)?;
        Ok(())
    }
}

pub type Framer<B> = Device<FramerPort<B>>;

pub fn framer<B: CardBus>(bus: Arc<B>) -> Framer<B> {
    Device::new(FramerPort { bus })
}

///////////////////////////////////////////////////////////////////////
// Card control block

pub struct CardRegisters<B> {
    bus: Arc<B>,
}

impl<B: CardBus> CardRegisters<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    fn set(&self, offset: usize, value: u8) -> Result<()> {
        self.bus.write8(offset, value)?;
        self.bus.read8(offset)?;
        Ok(())
    }

    pub fn control(&self, value: u8) -> Result<()> {
        self.set(CONTROL, value)
    }

    /// Pulse the run bit to acknowledge a DMA interrupt.
    pub fn acknowledge(&self) -> Result<()> {
        self.set(CONTROL, CONTROL_ACK)?;
        self.set(CONTROL, CONTROL_RUN)
    }

    pub fn irq_status(&self) -> Result<u8> {
        self.bus.read8(IRQ_STATUS)
    }

    pub fn led_state(&self) -> Result<u8> {
        self.bus.read8(STATE)
    }

    pub fn set_led_state(&self, value: u8) -> Result<()> {
        self.set(STATE, value)
    }

    pub fn version(&self) -> Result<u16> {
        Ok((self.bus.read32(VERSION)? & 0xffff) as u16)
    }

    pub fn program_dma(&self, tx: u32, rx: u32, buflen: u16) -> Result<()> {
        self.bus.write32(TXBUFSTART, tx)?;
        self.bus.read32(TXBUFSTART)?;
        self.bus.write32(RXBUFSTART, rx)?;
        self.bus.read32(RXBUFSTART)?;
        self.bus.write32(BUFLEN, buflen as u32)?;
        self.bus.read32(BUFLEN)?;
        Ok(())
    }

    pub fn target_read(&self, register: TargetRegister) -> Result<u32> {
        self.bus.read32(register.offset())
    }

    /// Write a target register and flush it with a read back. The data
    /// port is not read back: a read there is a DSP memory access.
    pub fn target_write(&self, register: TargetRegister, value: u32) -> Result<()> {
        self.bus.write32(register.offset(), value)?;
        if register != TargetRegister::Hpid {
            self.bus.read32(register.offset())?;
        }
        Ok(())
    }

    pub fn hpic_set(&self, bits: u32) -> Result<()> {
        let value = self.target_read(TargetRegister::Hpic)?;
        self.target_write(TargetRegister::Hpic, value | bits)
    }

    pub fn hpic_clear(&self, bits: u32) -> Result<()> {
        let value = self.target_read(TargetRegister::Hpic)?;
        self.target_write(TargetRegister::Hpic, value & !bits)
    }
}
