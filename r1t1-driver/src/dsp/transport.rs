//! Host-port access to the echo-canceller DSP.
//!
//! The DSP's memory is reached through the card's HPI address and data
//! registers. The port is shared with the card's own logic and must be
//! claimed through the HCS register before use; [`Selected`] releases the
//! claim when dropped.

use crossbeam::utils::Backoff;
use tracing::error;

use ds2155_pac::device::Result;

use crate::regs::{hpic, CardBus, CardRegisters, TargetRegister};

/// Select attempts before giving up on the host port.
pub const SELECT_RETRIES: usize = 100_000;

pub type DspAddress = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    Timeout,
    Bus(ds2155_pac::device::Error),
}

impl From<ds2155_pac::device::Error> for SelectError {
    fn from(e: ds2155_pac::device::Error) -> Self {
        SelectError::Bus(e)
    }
}

pub struct DspTransport<B> {
    regs: CardRegisters<B>,
}

impl<B: CardBus> DspTransport<B> {
    pub fn new(regs: CardRegisters<B>) -> Self {
        Self {
            regs,
        }
    }

    pub fn registers(&self) -> &CardRegisters<B> {
        &self.regs
    }

    /// Claim the host port if nobody holds it.
    fn try_select(&self) -> Result<bool> {
        if self.regs.target_read(TargetRegister::Hcs)? == 0 {
            self.regs.target_write(TargetRegister::Hcs, 1)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn select(&mut self) -> core::result::Result<Selected<'_, B>, SelectError> {
        let backoff = Backoff::new();
        for _ in 0..SELECT_RETRIES {
            if self.try_select()? {
                return Ok(Selected { transport: self });
            }
            backoff.spin();
        }
        error!(retries = SELECT_RETRIES, "DSP host port never became free");
        Err(SelectError::Timeout)
    }

    fn unselect(&self) -> Result<()> {
        self.regs.target_write(TargetRegister::Hcs, 0)
    }
}

/// Exclusive claim on the DSP host port.
pub struct Selected<'a, B: CardBus> {
    transport: &'a mut DspTransport<B>,
}

impl<B: CardBus> Selected<'_, B> {
    fn regs(&self) -> &CardRegisters<B> {
        &self.transport.regs
    }

    pub fn get(&self, address: DspAddress) -> Result<u16> {
        self.regs().target_write(TargetRegister::Hpia, address)?;
        Ok(self.regs().target_read(TargetRegister::Hpid)? as u16)
    }

    pub fn set(&self, address: DspAddress, value: u16) -> Result<()> {
        self.regs().target_write(TargetRegister::Hpia, address)?;
        self.regs().target_write(TargetRegister::Hpid, value as u32)
    }

    pub fn read_block(&self, address: DspAddress, out: &mut [u16]) -> Result<()> {
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.get(address + i as DspAddress)?;
        }
        Ok(())
    }

    pub fn write_block(&self, address: DspAddress, words: &[u16]) -> Result<()> {
        for (i, word) in words.iter().enumerate() {
            self.set(address + i as DspAddress, *word)?;
        }
        Ok(())
    }

    /// Release the DSP bootloader into the downloaded program.
    pub fn run(&self) -> Result<()> {
        self.regs().hpic_set(hpic::BL_GO)
    }
}

impl<B: CardBus> Drop for Selected<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.unselect() {
            error!(?e, "unable to release DSP host port");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sim::SimCard;

    fn transport(sim: &Arc<SimCard>) -> DspTransport<SimCard> {
        DspTransport::new(CardRegisters::new(sim.clone()))
    }

    #[test]
    fn select_is_released_on_drop() {
        let sim = Arc::new(SimCard::new());
        let mut first = transport(&sim);
        let second = transport(&sim);

        {
            let port = first.select().unwrap();
            port.set(0x200, 0xbeef).unwrap();
            assert!(!second.try_select().unwrap());
            assert_eq!(port.get(0x200).unwrap(), 0xbeef);
        }

        assert_eq!(sim.peek32(TargetRegister::Hcs.offset()), 0);
        assert!(second.try_select().unwrap());
    }

    #[test]
    fn select_gives_up_when_port_held() {
        let sim = Arc::new(SimCard::new());
        sim.poke32(TargetRegister::Hcs.offset(), 1);
        let mut transport = transport(&sim);

        assert_eq!(transport.select().err(), Some(SelectError::Timeout));
        assert_eq!(sim.peek32(TargetRegister::Hcs.offset()), 1);
    }

    #[test]
    fn block_transfer() {
        let sim = Arc::new(SimCard::new());
        let mut transport = transport(&sim);
        let port = transport.select().unwrap();

        port.write_block(0x1000, &[1, 2, 3]).unwrap();
        let mut out = [0u16; 3];
        port.read_block(0x1000, &mut out).unwrap();

        assert_eq!(out, [1, 2, 3]);
    }
}
