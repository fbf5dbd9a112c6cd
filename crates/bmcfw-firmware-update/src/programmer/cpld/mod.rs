//! CPLD programmers.
//!
//! Both families are reached as I2C slave [`CPLD_ADDR`] behind a bridge:
//! Lattice MachXO parts through their configuration command set, Altera
//! MAX10 parts through the on-chip flash controller registers plus the
//! bridge's own `UPDATE_FW` streaming command.

pub mod altera;
pub mod lattice;

use super::I2cDevice;

/// Update address of every CPLD.
pub const CPLD_ADDR: u8 = 0x80;
/// Bus selector of the CPLD next to a server-board bridge.
pub const SB_CPLD_SELECTOR: u8 = 0x05;
/// Bus selector of the CPLD next to a baseboard or expansion bridge.
pub const BB_CPLD_SELECTOR: u8 = 0x01;

/// Server-board CPLD.
pub const SB_CPLD: I2cDevice = I2cDevice::new(SB_CPLD_SELECTOR, CPLD_ADDR);
/// Baseboard or expansion-board CPLD.
pub const BB_CPLD: I2cDevice = I2cDevice::new(BB_CPLD_SELECTOR, CPLD_ADDR);

/// Flag register of the baseboard CPLD that holds the board revision.
pub const BOARD_REV_DEV: I2cDevice = I2cDevice::new(BB_CPLD_SELECTOR, 0x1F);
/// Board revision register.
pub const REG_BOARD_REV: u8 = 0x08;
