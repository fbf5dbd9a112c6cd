//! Infineon XDPE regulators.
//!
//! Sections are staged in the scratchpad one DWORD at a time through the
//! AHB window, then stored to OTP with `OTP_CONF_STO`. Firmware commands go
//! through `MFR_FW_CMD` (`0xFE`) with a 4-byte argument and result block in
//! `MFR_FW_CMD_DATA` (`0xFD`). Bridge sensor polling is suspended for the
//! whole write.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{ExpectedChecksum, FirmwareImage, ProgramRecord, Vendor};
use tracing::{debug, info};

use super::check_remaining_writes;
use crate::context::ProgramContext;
use crate::monitor::MonitorGuard;
use crate::programmer::{I2cDevice, Programmer, byte_at, le_u16_at, le_u32_at};
use crate::state::ProgramState;

const REG_STS_CML: u8 = 0x7E;
const REG_AHB_ADDR: u8 = 0xCE;
const REG_REG_WRITE: u8 = 0xDE;
const REG_REG_READ: u8 = 0xDF;
const REG_FW_CMD_DATA: u8 = 0xFD;
const REG_FW_CMD: u8 = 0xFE;

const FW_RESET: u8 = 0x0E;
const OTP_PTN_RMNG: u8 = 0x10;
const OTP_CONF_STO: u8 = 0x11;
const OTP_FILE_INVD: u8 = 0x12;
const GET_CRC: u8 = 0x2D;

/// Bytes of OTP consumed by one full configuration.
pub const CONF_SIZE: u32 = 1344;
const SCRATCHPAD: [u8; 4] = [0x00, 0xE0, 0x05, 0x20];
const BLOCK_LEN: u8 = 4;
const CML_MEMORY_FAULT: u8 = 0x01;

const MONITOR_SETTLE: Duration = Duration::from_secs(2);
const CMD_SETTLE: Duration = Duration::from_millis(10);
const SOAK_TICK: Duration = Duration::from_millis(100);
const RESET_SETTLE: Duration = Duration::from_millis(500);

/// Programmer for Infineon parts.
#[derive(Debug, Clone, Copy)]
pub struct IfxProgrammer {
    dev: I2cDevice,
}

impl IfxProgrammer {
    /// Programmer for the part at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    /// Run firmware command `code`, returning its 4-byte result if asked.
    fn mfr_fw(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        code: u8,
        arg: Option<[u8; 4]>,
        want_result: bool,
    ) -> Result<Option<[u8; 4]>> {
        if let Some([a0, a1, a2, a3]) = arg {
            self.dev.write(ctx, &[REG_FW_CMD_DATA, BLOCK_LEN, a0, a1, a2, a3])?;
        }
        self.dev.write(ctx, &[REG_FW_CMD, code])?;
        if !want_result {
            return Ok(None);
        }
        let resp = self.dev.read(ctx, &[REG_FW_CMD_DATA], 6)?;
        let count = byte_at(&resp, 0)?;
        if count != BLOCK_LEN {
            return Err(UpdateError::device_fault(
                ctx.component(),
                format!("firmware command {code:#04x} returned {count} bytes"),
            ));
        }
        Ok(Some(le_u32_at(&resp, 1)?.to_le_bytes()))
    }

    fn query(&self, ctx: &mut ProgramContext<'_, '_>, code: u8) -> Result<[u8; 4]> {
        self.mfr_fw(ctx, code, Some([0; 4]), true)?
            .ok_or_else(|| {
                UpdateError::device_fault(ctx.component(), format!("no result for {code:#04x}"))
            })
    }

    /// CRC of the configuration the part runs.
    ///
    /// # Errors
    ///
    /// Transport failure or a malformed result block.
    pub fn device_crc(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<u32> {
        Ok(u32::from_le_bytes(self.query(ctx, GET_CRC)?))
    }

    /// Full configurations the remaining OTP space can hold.
    ///
    /// # Errors
    ///
    /// Transport failure or a malformed result block.
    pub fn remaining_writes(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<u32> {
        let free = le_u16_at(&self.query(ctx, OTP_PTN_RMNG)?, 0)?;
        Ok(u32::from(free) / CONF_SIZE)
    }

    fn set_scratchpad(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        let [s0, s1, s2, s3] = SCRATCHPAD;
        self.dev.write(ctx, &[REG_AHB_ADDR, BLOCK_LEN, s0, s1, s2, s3])?;
        ctx.sleep(CMD_SETTLE);
        Ok(())
    }

    fn dwords(record: &ProgramRecord) -> impl Iterator<Item = [u8; 4]> + '_ {
        record.payload().chunks_exact(4).map(|c| {
            let mut dword = [0u8; 4];
            dword.copy_from_slice(c);
            dword
        })
    }

    fn program_section(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        record: &ProgramRecord,
        written: &mut usize,
        total: usize,
    ) -> Result<()> {
        let kind = record.command();
        self.dev.write(ctx, &[REG_STS_CML, CML_MEMORY_FAULT])?;
        self.mfr_fw(ctx, OTP_FILE_INVD, Some([kind, 0, 0, 0]), false)?;
        ctx.sleep(CMD_SETTLE);
        self.set_scratchpad(ctx)?;

        for [d0, d1, d2, d3] in Self::dwords(record) {
            self.dev.write(ctx, &[REG_REG_WRITE, BLOCK_LEN, d0, d1, d2, d3])?;
            ctx.sleep(CMD_SETTLE);
            *written += 1;
            ctx.wrote(*written, total)?;
        }

        self.set_scratchpad(ctx)?;
        for (i, dword) in Self::dwords(record).enumerate() {
            let resp = self.dev.read(ctx, &[REG_REG_READ], 6)?;
            if resp.get(1..5) != Some(&dword[..]) {
                return Err(UpdateError::device_fault(
                    ctx.component(),
                    format!("scratchpad dword {i} of section {kind:#04x} differs"),
                ));
            }
        }

        let size = u16::try_from(record.payload().len()).map_err(|_| {
            UpdateError::unsupported_image(format!("section {kind:#04x} exceeds OTP transfer size"))
        })?;
        let [s0, s1] = size.to_le_bytes();
        self.mfr_fw(ctx, OTP_CONF_STO, Some([s0, s1, 0, 0]), false)?;
        let ticks = u32::from(size) / 50 + 2;
        debug!(dev = %self.dev, section = kind, size, ticks, "OTP soak");
        ctx.sleep(SOAK_TICK.saturating_mul(ticks));

        let cml = byte_at(&self.dev.read(ctx, &[REG_STS_CML], 1)?, 0)?;
        if cml & CML_MEMORY_FAULT != 0 {
            return Err(UpdateError::device_fault(
                ctx.component(),
                format!("CML memory fault {cml:#04x} storing section {kind:#04x}"),
            ));
        }
        Ok(())
    }
}

impl Programmer for IfxProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Infineon
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let ExpectedChecksum::Crc32(expected) = image.expected_checksum() else {
            return Err(UpdateError::unsupported_image("Infineon image without CRC32"));
        };

        let current = self.device_crc(ctx)?;
        if current == expected {
            let err = UpdateError::RedundantUpdate {
                device: ctx.component(),
                checksum: format!("{current:08X}"),
            };
            if !ctx.force() {
                return Err(err);
            }
            info!(error = %err, "reprogramming with force");
        }
        let remaining = self.remaining_writes(ctx)?;
        check_remaining_writes(ctx, remaining)?;

        {
            let mut guard = MonitorGuard::disable_here(ctx)?;
            guard.sleep(MONITOR_SETTLE);
            guard.enter(ProgramState::Unlocked);

            let total = image.records().iter().map(|r| r.payload().len() / 4).sum();
            let mut written = 0;
            for record in image.records() {
                self.program_section(&mut guard, record, &mut written, total)?;
            }
            guard.enter(ProgramState::Locked);
        }

        self.mfr_fw(ctx, FW_RESET, None, false)?;
        ctx.sleep(RESET_SETTLE);
        ctx.enter(ProgramState::Activated);

        ctx.enter(ProgramState::Verifying);
        let actual = self.device_crc(ctx)?;
        if actual != expected {
            return Err(UpdateError::checksum_mismatch(ctx.component(), expected, actual));
        }
        info!(dev = %self.dev, crc = %format!("{actual:08X}"), "Infineon programming verified");
        Ok(())
    }
}
