use std::os::raw::c_int;

use thiserror::Error;

use crate::chanmap::LineMode;
use crate::dsp::DspError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("not supported in {0:?} mode")]
    NotSupported(LineMode),
    #[error("unknown ioctl {0:#x}")]
    UnknownIoctl(u32),
    #[error("no such device")]
    NoDevice,
    #[error("no free card slot")]
    NoSlot,
    #[error("{0} already in use")]
    Busy(&'static str),
    #[error("unable to acquire {0}")]
    Resource(&'static str),
    #[error("unable to request interrupt line")]
    Interrupt,
    #[error("unsupported hardware version {0}")]
    HardwareVersion(u16),
    #[error("register access: {0}")]
    Bus(ds2155_pac::device::Error),
    #[error(transparent)]
    Dsp(#[from] DspError),
}

impl From<ds2155_pac::device::Error> for Error {
    fn from(e: ds2155_pac::device::Error) -> Self {
        Error::Bus(e)
    }
}

impl Error {
    /// Negative errno for the host span contract.
    pub fn errno(&self) -> c_int {
        let code = match self {
            Error::InvalidParameter(_) => libc::EINVAL,
            Error::NotSupported(_) => libc::ENOSYS,
            Error::UnknownIoctl(_) => libc::ENOTTY,
            Error::NoDevice => libc::ENODEV,
            Error::NoSlot => libc::ENODEV,
            Error::Busy(_) => libc::EBUSY,
            Error::Resource(_) => libc::ENOMEM,
            Error::Interrupt => libc::EIO,
            Error::HardwareVersion(_) => libc::EIO,
            Error::Bus(_) => libc::EIO,
            Error::Dsp(_) => libc::EIO,
        };
        -code
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Collapse an operation result into the host's 0 / negative errno form.
pub fn to_errno(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(to_errno(Ok(())), 0);
        assert_eq!(to_errno(Err(Error::InvalidParameter("x"))), -libc::EINVAL);
        assert_eq!(to_errno(Err(Error::NotSupported(LineMode::E1))), -libc::ENOSYS);
        assert_eq!(to_errno(Err(Error::UnknownIoctl(0x4004))), -libc::ENOTTY);
        assert_eq!(to_errno(Err(ds2155_pac::device::Error::Unmapped.into())), -libc::EIO);
    }
}
