//! TI TPS regulators.
//!
//! The user NVM is written as nine 32-byte blocks through `USER_NVM_EXECUTE`
//! after resetting the NVM index. The part keeps a CRC-16 of the stored
//! block that must match the one sealed into the image.
//!
//! TI parts expose no NVM write counter, so the BMC keeps one per part in
//! its key-value store. An absent entry means a fresh part with the full
//! [`TI_NVM_WRITE_BUDGET`]. A programming pass spends one write as soon as
//! the NVM index is reset.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{ExpectedChecksum, FirmwareImage, Vendor};
use tracing::{info, warn};

use super::check_remaining_writes;
use crate::context::ProgramContext;
use crate::programmer::{I2cDevice, Programmer, le_u16_at};
use crate::state::ProgramState;

const REG_USER_NVM_INDEX: u8 = 0xF5;
const REG_NVM_CHECKSUM: u8 = 0xF0;
const NVM_INDEX_START: u8 = 0x00;

const COMMIT_SETTLE: Duration = Duration::from_millis(200);

/// NVM writes a TI part is assumed to have left when the BMC has no record.
pub const TI_NVM_WRITE_BUDGET: u32 = 1000;

/// Key of the BMC-side write counter of the TI part at `addr` in `slot`.
pub fn ti_remaining_writes_key(slot: u8, addr: u8) -> String {
    format!("slot{slot}_vr_{addr:02x}h_remaining_wr")
}

/// Programmer for TI parts.
#[derive(Debug, Clone, Copy)]
pub struct TiProgrammer {
    dev: I2cDevice,
}

impl TiProgrammer {
    /// Programmer for the part at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    /// CRC-16 of the stored user NVM.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn device_crc(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<u16> {
        le_u16_at(&self.dev.read(ctx, &[REG_NVM_CHECKSUM], 2)?, 0)
    }

    /// Writes left on the part according to the BMC's counter.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] without a key-value store,
    /// [`UpdateError::Io`] if the store fails, or
    /// [`UpdateError::DeviceFault`] for a counter that is not a number.
    pub fn remaining_writes(&self, ctx: &ProgramContext<'_, '_>) -> Result<u32> {
        let store = ctx
            .store()
            .ok_or_else(|| UpdateError::config("TI write counter needs a key-value store"))?;
        let key = ti_remaining_writes_key(ctx.route().slot_id(), self.dev.addr());
        match store.get(&key)? {
            None => Ok(TI_NVM_WRITE_BUDGET),
            Some(value) => value.trim().parse().map_err(|_| {
                UpdateError::device_fault(self.dev.to_string(), format!("write counter {value:?}"))
            }),
        }
    }

    fn spend_write(&self, ctx: &ProgramContext<'_, '_>, remaining: u32) {
        let Some(store) = ctx.store() else {
            return;
        };
        let key = ti_remaining_writes_key(ctx.route().slot_id(), self.dev.addr());
        let left = remaining.saturating_sub(1);
        if let Err(e) = store.set(&key, &left.to_string(), None) {
            warn!(key = %key, error = %e, "failed to record TI write counter");
        }
    }
}

impl Programmer for TiProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Ti
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let ExpectedChecksum::Crc16(expected) = image.expected_checksum() else {
            return Err(UpdateError::unsupported_image("TI image without CRC16"));
        };

        let remaining = self.remaining_writes(ctx)?;
        check_remaining_writes(ctx, remaining)?;

        self.dev.write(ctx, &[REG_USER_NVM_INDEX, NVM_INDEX_START])?;
        ctx.enter(ProgramState::Unlocked);

        self.spend_write(ctx, remaining);

        let total = image.records().len();
        for (i, record) in image.records().iter().enumerate() {
            self.dev.write(ctx, &record.to_bytes())?;
            ctx.wrote(i + 1, total)?;
        }
        ctx.sleep(COMMIT_SETTLE);

        ctx.enter(ProgramState::Verifying);
        let actual = self.device_crc(ctx)?;
        if actual != expected {
            return Err(UpdateError::checksum_mismatch(
                ctx.component(),
                u32::from(expected),
                u32::from(actual),
            ));
        }
        info!(dev = %self.dev, crc = %format!("{actual:04X}"), "TI programming verified");
        Ok(())
    }
}
