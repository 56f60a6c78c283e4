#![allow(non_snake_case)]

use core::marker::PhantomData;

use crate::register::*;

pub type RegisterAddress = u8;
pub type RegisterValue = u8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The register window is no longer mapped (device removed).
    Unmapped,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Unmapped => f.write_str("register window unmapped"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

pub trait RegisterAccess {
    fn register_read(&self, address: RegisterAddress) -> Result<RegisterValue>;
    fn register_write(&self, address: RegisterAddress, value: RegisterValue) -> Result<()>;
}

pub struct Access<'a, D, T>
where D: RegisterAccess,
{
    device: &'a D,
    address: usize,
    t: PhantomData<T>,
}

impl<'a, D, T> Access<'a, D, T>
where D: RegisterAccess,
{
    fn new(device: &'a D, address: usize) -> Self {
        Self {
            device,
            address,
            t: PhantomData,
        }
    }

    pub fn address(&self) -> RegisterAddress {
        self.address as RegisterAddress
    }
}

impl<D, T> Access<'_, D, T>
where D: RegisterAccess,
      T: From<u8>,
{
    fn get_typed(&self, address: usize) -> Result<T> {
        assert!(address < 0x100);
        Ok(T::from(self.device.register_read(address as RegisterAddress)?))
    }

    pub fn read(&self) -> Result<T> {
        self.get_typed(self.address)
    }
}

impl<D, T> Access<'_, D, T>
where D: RegisterAccess,
      T: From<u8> + Into<u8>,
{
    fn set_typed(&self, address: usize, value: T) -> Result<()> {
        assert!(address < 0x100);
        self.device.register_write(address as RegisterAddress, value.into())
    }

    pub fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(T) -> T,
    {
        let value = T::from(0);
        let new_value = f(value);
        self.set_typed(self.address, new_value)
    }

    pub fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(T) -> T,
    {
        let value = self.read()?;
        let new_value = f(value);
        self.set_typed(self.address, new_value)
    }
}

///////////////////////////////////////////////////////////////////////
// Device

pub trait DeviceAccess {
    fn read(&self, address: RegisterAddress) -> Result<RegisterValue>;
    fn write(&self, address: RegisterAddress, value: RegisterValue) -> Result<()>;
}

/// DS2155 device interface
///
/// Abstracts the DS2155 parallel microprocessor port. Each register is one
/// byte; the port has an 8-bit address space.
///
pub struct Device<A>
where A: DeviceAccess
{
    access: A,
}

impl<A> Device<A>
where A: DeviceAccess
{
    pub fn new(access: A) -> Self {
        Self {
            access,
        }
    }

    pub fn bus(&self) -> &A {
        &self.access
    }

    fn access<T>(&self, address: usize) -> Access<'_, Self, T> {
        Access::new(self, Addressing::global(address))
    }

    // Master mode and clocking

    pub fn mstrreg(&self) -> Access<Self, MSTRREG> { self.access(0x00) }
    pub fn iocr2  (&self) -> Access<Self, IOCR2>   { self.access(0x02) }
    pub fn ccr1   (&self) -> Access<Self, OCTET>   { self.access(0x70) }
    pub fn ccr2   (&self) -> Access<Self, OCTET>   { self.access(0x71) }

    // T1 framer

    pub fn t1rcr1 (&self) -> Access<Self, T1RCR1>  { self.access(0x03) }
    pub fn t1rcr2 (&self) -> Access<Self, T1RCR2>  { self.access(0x04) }
    pub fn t1tcr1 (&self) -> Access<Self, T1TCR1>  { self.access(0x05) }
    pub fn t1tcr2 (&self) -> Access<Self, T1TCR2>  { self.access(0x06) }
    pub fn t1ccr1 (&self) -> Access<Self, T1CCR1>  { self.access(0x07) }
    pub fn tfdl   (&self) -> Access<Self, OCTET>   { self.access(0xc1) }

    // Status

    pub fn sr2    (&self) -> Access<Self, SR2>     { self.access(0x18) }
    pub fn sr3    (&self) -> Access<Self, SR3>     { self.access(0x1a) }

    // E1 framer

    pub fn e1rcr1 (&self) -> Access<Self, E1RCR1>  { self.access(0x33) }
    pub fn e1tcr1 (&self) -> Access<Self, E1TCR1>  { self.access(0x35) }
    pub fn e1tcr2 (&self) -> Access<Self, E1TCR2>  { self.access(0x36) }
    pub fn taf    (&self) -> Access<Self, OCTET>   { self.access(0xd0) }
    pub fn tnaf   (&self) -> Access<Self, TNAF>    { self.access(0xd1) }

    // Signaling, loopback and elastic store

    pub fn sigcr  (&self) -> Access<Self, SIGCR>   { self.access(0x40) }
    pub fn lbcr   (&self) -> Access<Self, LBCR>    { self.access(0x4a) }
    pub fn escr   (&self) -> Access<Self, ESCR>    { self.access(0x4f) }

    // Line interface

    pub fn lic1   (&self) -> Access<Self, LIC1>    { self.access(0x78) }
    pub fn lic2   (&self) -> Access<Self, LIC2>    { self.access(0x79) }
    pub fn lic4   (&self) -> Access<Self, LIC4>    { self.access(0x7b) }

    // In-band loop code generation and detection

    pub fn ibcc   (&self) -> Access<Self, OCTET>   { self.access(0xb6) }
    pub fn tcd1   (&self) -> Access<Self, OCTET>   { self.access(0xb7) }
    pub fn tcd2   (&self) -> Access<Self, OCTET>   { self.access(0xb8) }
    pub fn rupcd1 (&self) -> Access<Self, OCTET>   { self.access(0xb9) }
    pub fn rupcd2 (&self) -> Access<Self, OCTET>   { self.access(0xba) }
    pub fn rdncd1 (&self) -> Access<Self, OCTET>   { self.access(0xbb) }
    pub fn rdncd2 (&self) -> Access<Self, OCTET>   { self.access(0xbc) }
    pub fn iboc   (&self) -> Access<Self, OCTET>   { self.access(0xc5) }

    /// Software Signaling Insertion Enable (SSIE1..SSIE4)
    pub fn ssie(&self, index: usize) -> Access<Self, OCTET> {
        Access::new(self, Addressing::ssie(index))
    }

    /// Transmit Signaling (TS1..TS16)
    pub fn ts(&self, index: usize) -> Access<Self, SIG> {
        Access::new(self, Addressing::ts(index))
    }

    /// Receive Signaling (RS1..RS16)
    pub fn rs(&self, index: usize) -> Access<Self, SIG> {
        Access::new(self, Addressing::rs(index))
    }

    /// Transmit Channel Blocking (TCBR1..TCBR4)
    pub fn tcbr(&self, index: usize) -> Access<Self, OCTET> {
        Access::new(self, Addressing::tcbr(index))
    }
}

impl<A> RegisterAccess for Device<A>
where A: DeviceAccess {
    fn register_read(&self, address: RegisterAddress) -> Result<RegisterValue> {
        self.access.read(address)
    }

    fn register_write(&self, address: RegisterAddress, value: RegisterValue) -> Result<()> {
        self.access.write(address, value)
    }
}

/// DS2155 register map addressing abstraction
///
struct Addressing {}

impl Addressing {
    fn global(offset: usize) -> usize {
        assert!(offset < 0x100);
        offset
    }

    fn ssie(index: usize) -> usize {
        assert!(index < 4);
        Self::global(0x08 + index)
    }

    fn ts(index: usize) -> usize {
        assert!(index < 16);
        Self::global(0x50 + index)
    }

    fn rs(index: usize) -> usize {
        assert!(index < 16);
        Self::global(0x60 + index)
    }

    fn tcbr(index: usize) -> usize {
        assert!(index < 4);
        Self::global(0x8c + index)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    struct Registers {
        cells: [Cell<u8>; 256],
    }

    impl Registers {
        fn new() -> Self {
            Self {
                cells: [(); 256].map(|_| Cell::new(0)),
            }
        }
    }

    impl DeviceAccess for &Registers {
        fn read(&self, address: RegisterAddress) -> Result<RegisterValue> {
            Ok(self.cells[address as usize].get())
        }

        fn write(&self, address: RegisterAddress, value: RegisterValue) -> Result<()> {
            self.cells[address as usize].set(value);
            Ok(())
        }
    }

    #[test]
    fn addressing_banks() {
        assert_eq!(Addressing::ssie(0), 0x08);
        assert_eq!(Addressing::ssie(3), 0x0b);
        assert_eq!(Addressing::ts(0), 0x50);
        assert_eq!(Addressing::ts(15), 0x5f);
        assert_eq!(Addressing::rs(1), 0x61);
        assert_eq!(Addressing::tcbr(3), 0x8f);
    }

    #[test]
    #[should_panic(expected="index < 16")]
    fn addressing_ts_bad_index() {
        let _ = Addressing::ts(16);
    }

    #[test]
    #[should_panic(expected="index < 4")]
    fn addressing_ssie_bad_index() {
        let _ = Addressing::ssie(4);
    }

    #[test]
    #[should_panic(expected="offset < 0x100")]
    fn addressing_global_bad_offset() {
        let _ = Addressing::global(0x100);
    }

    #[test]
    fn modify_preserves_other_bits() {
        let registers = Registers::new();
        let device = Device::new(&registers);
        registers.cells[0x04].set(0x9f);

        device.t1rcr2().modify(|m| m.with_RFM(0).with_RB8ZS(1)).unwrap();

        assert_eq!(registers.cells[0x04].get(), 0xbf & !0x40);
    }

    #[test]
    fn write_starts_from_zero() {
        let registers = Registers::new();
        let device = Device::new(&registers);
        registers.cells[0x4a].set(0xff);

        device.lbcr().write(|w| w.with_RLB(1)).unwrap();

        assert_eq!(registers.cells[0x4a].get(), 0x04);
    }

    #[test]
    fn indexed_signaling_access() {
        let registers = Registers::new();
        let device = Device::new(&registers);

        device.ts(2).write(|w| w.with_Upper(0xa).with_Lower(0x5)).unwrap();
        registers.cells[0x63].set(0x3c);

        assert_eq!(registers.cells[0x52].get(), 0xa5);
        let rs = device.rs(3).read().unwrap();
        assert_eq!((rs.Upper(), rs.Lower()), (0x3, 0xc));
    }
}
