//! Device programmers.
//!
//! One programmer per vendor family, all behind [`Programmer`]. The
//! coordinator picks the variant once per session, from the component table
//! and, for regulators, from the device-id probe, and wraps it in
//! [`DeviceProgrammer`].

pub mod bios;
pub mod cpld;
pub mod pcie;
pub mod vr;

use std::time::Duration;

use bmcfw_errors::{Result, TransportError, UpdateError};
use bmcfw_image::{FirmwareImage, Vendor};

use crate::context::ProgramContext;

pub use bios::BiosProgrammer;
pub use cpld::altera::AlteraProgrammer;
pub use cpld::lattice::LatticeProgrammer;
pub use pcie::PcieProgrammer;
pub use vr::ifx::IfxProgrammer;
pub use vr::isl::IslProgrammer;
pub use vr::pxe::PxeProgrammer;
pub use vr::ti::{TI_NVM_WRITE_BUDGET, TiProgrammer, ti_remaining_writes_key};

/// Drives one device through unlock, write, lock and verify.
pub trait Programmer {
    /// Vendor family handled.
    fn vendor(&self) -> Vendor;

    /// Program `image` into the device.
    ///
    /// The context's session records the states visited. On success the
    /// device reports the image's checksum, or the vendor's equivalent
    /// completion status.
    ///
    /// # Errors
    ///
    /// Any [`bmcfw_errors::UpdateError`]; the device may be left partially
    /// written.
    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()>;
}

/// Device on an I2C bus behind the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct I2cDevice {
    selector: u8,
    addr: u8,
}

impl I2cDevice {
    /// Device at 8-bit `addr`, reached with the raw bus `selector` byte.
    pub const fn new(selector: u8, addr: u8) -> Self {
        Self { selector, addr }
    }

    /// Bus selector byte.
    pub const fn selector(&self) -> u8 {
        self.selector
    }

    /// 8-bit slave address.
    pub const fn addr(&self) -> u8 {
        self.addr
    }

    /// Write `data` without reading anything back.
    ///
    /// # Errors
    ///
    /// Transport failure after retries.
    pub fn write(&self, ctx: &mut ProgramContext<'_, '_>, data: &[u8]) -> Result<()> {
        ctx.channel().master_write_read(self.selector, self.addr, data, 0)?;
        Ok(())
    }

    /// Write `data`, then read `len` bytes.
    ///
    /// # Errors
    ///
    /// Transport failure after retries, or a response shorter than `len`.
    pub fn read(&self, ctx: &mut ProgramContext<'_, '_>, data: &[u8], len: u8) -> Result<Vec<u8>> {
        Ok(ctx.channel().master_write_read(self.selector, self.addr, data, len)?)
    }
}

impl core::fmt::Display for I2cDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#04x}@{:#04x}", self.addr, self.selector)
    }
}

pub(crate) fn byte_at(resp: &[u8], index: usize) -> Result<u8> {
    resp.get(index)
        .copied()
        .ok_or_else(|| TransportError::short(index + 1, resp.len()).into())
}

pub(crate) fn le_u16_at(resp: &[u8], index: usize) -> Result<u16> {
    Ok(u16::from_le_bytes([byte_at(resp, index)?, byte_at(resp, index + 1)?]))
}

pub(crate) fn le_u32_at(resp: &[u8], index: usize) -> Result<u32> {
    let bytes = resp
        .get(index..index + 4)
        .ok_or_else(|| TransportError::short(index + 4, resp.len()))?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(word))
}

pub(crate) fn wire_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| UpdateError::config(format!("{value} does not fit 32 bits")))
}

pub(crate) fn wire_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| UpdateError::config(format!("{value} does not fit 16 bits")))
}

/// Poll `ready` until it returns `true`, at most `status_poll_limit` times,
/// sleeping `interval` after every negative answer.
pub(crate) fn poll_until(
    ctx: &mut ProgramContext<'_, '_>,
    what: &str,
    interval: Duration,
    mut ready: impl FnMut(&mut ProgramContext<'_, '_>) -> Result<bool>,
) -> Result<()> {
    let limit = ctx.config().status_poll_limit;
    for _ in 0..limit {
        if ready(ctx)? {
            return Ok(());
        }
        ctx.sleep(interval);
    }
    Err(UpdateError::poll_timeout(what, limit))
}

/// Vendor programmer selected for a session.
#[derive(Debug, Clone)]
pub enum DeviceProgrammer {
    /// Renesas ISL regulator
    Isl(IslProgrammer),
    /// PXE (E1110C) regulator
    Pxe(PxeProgrammer),
    /// TI TPS regulator
    Ti(TiProgrammer),
    /// Infineon XDPE regulator
    Infineon(IfxProgrammer),
    /// Lattice CPLD
    Lattice(LatticeProgrammer),
    /// Altera MAX10 CPLD
    Altera(AlteraProgrammer),
    /// Host BIOS
    Bios(BiosProgrammer),
    /// PCIe switch sub-image
    PcieSwitch(PcieProgrammer),
}

impl DeviceProgrammer {
    fn inner(&self) -> &dyn Programmer {
        match self {
            DeviceProgrammer::Isl(p) => p,
            DeviceProgrammer::Pxe(p) => p,
            DeviceProgrammer::Ti(p) => p,
            DeviceProgrammer::Infineon(p) => p,
            DeviceProgrammer::Lattice(p) => p,
            DeviceProgrammer::Altera(p) => p,
            DeviceProgrammer::Bios(p) => p,
            DeviceProgrammer::PcieSwitch(p) => p,
        }
    }
}

impl Programmer for DeviceProgrammer {
    fn vendor(&self) -> Vendor {
        self.inner().vendor()
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        if image.vendor() != self.vendor() {
            return Err(UpdateError::unsupported_image(format!(
                "{} image cannot be written by the {} programmer",
                image.vendor(),
                self.vendor()
            )));
        }
        self.inner().program(ctx, image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accessors() {
        let resp = [0x04, 0x78, 0x56, 0x34, 0x12];
        assert!(matches!(byte_at(&resp, 0), Ok(0x04)));
        assert!(matches!(le_u16_at(&resp, 1), Ok(0x5678)));
        assert!(matches!(le_u32_at(&resp, 1), Ok(0x1234_5678)));
        assert!(le_u32_at(&resp, 2).is_err());
        assert!(byte_at(&[], 0).is_err());
    }

    #[test]
    fn test_device_display() {
        assert_eq!(I2cDevice::new(0x09, 0xC0).to_string(), "0xc0@0x09");
    }
}
