//! Echo-canceller co-processor: host-port transport, G.PAK request/reply
//! client and the bring-up sequence that loads and configures it.

pub mod bringup;
pub mod firmware;
pub mod protocol;
pub mod transport;
pub mod types;

use thiserror::Error;

pub use protocol::{DspClient, IFBLK_ADDRESS, MAX_DSP_CORES};
pub use transport::{DspTransport, SelectError};

use protocol::{ConfigChannelError, ConfigPortsError, DownloadError};

/// Failures that leave the DSP unusable for the card.
#[derive(Error, Debug)]
pub enum DspError {
    #[error("echo cancellation disabled by configuration")]
    Disabled,
    #[error("DSP host port select failed: {0:?}")]
    Select(SelectError),
    #[error("DSP never published its interface block")]
    NotResponding,
    #[error("firmware download failed (status {}): {0}", .0.code())]
    Download(#[from] DownloadError),
    #[error("port configuration failed (status {}, detail {}): {0}", .0.code(), .0.detail())]
    ConfigPorts(#[from] ConfigPortsError),
    #[error("channel {chan} configuration failed (status {}, detail {}): {source}", .source.code(), .source.detail())]
    ConfigChannel {
        chan: usize,
        source: ConfigChannelError,
    },
    #[error("register access: {0}")]
    Bus(ds2155_pac::device::Error),
}

impl From<ds2155_pac::device::Error> for DspError {
    fn from(e: ds2155_pac::device::Error) -> Self {
        DspError::Bus(e)
    }
}

impl From<SelectError> for DspError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::Bus(e) => DspError::Bus(e),
            e => DspError::Select(e),
        }
    }
}
