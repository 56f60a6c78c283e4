//! Register access for the Dallas/Maxim DS2155 single-chip T1/E1 transceiver.

#![no_std]

pub mod device;
pub mod register;
