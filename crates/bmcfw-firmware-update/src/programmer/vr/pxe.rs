//! PXE (E1110C) regulators.
//!
//! Register access is paged through register `0x00`. Each record selects its
//! page, writes a word and reads it back. The configuration is then locked,
//! saved to NVM and verified by reading the NVM CRC from page `0x6F`.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::parser::pxe::record_page;
use bmcfw_image::{ExpectedChecksum, FirmwareImage, Vendor};
use tracing::{debug, info};

use super::check_remaining_writes;
use crate::context::ProgramContext;
use crate::programmer::{I2cDevice, Programmer, byte_at, le_u16_at};
use crate::state::ProgramState;

const REG_PAGE: u8 = 0x00;
const PAGE_WEAR: u8 = 0x50;
const PAGE_DEFAULT: u8 = 0x20;
const PAGE_CONTROL: u8 = 0x3F;
const PAGE_STATUS: u8 = 0x60;
const PAGE_CRC: u8 = 0x6F;

const REG_WEAR: u8 = 0x82;
const REG_UNLOCK_A: u8 = 0x27;
const REG_SAVE: u8 = 0x29;
const REG_UNLOCK_B: u8 = 0x2A;
const REG_CLEAR_FAULT: u8 = 0x2C;
const REG_CRC_CALC: u8 = 0x32;
const REG_UPLOAD: u8 = 0x34;
const REG_CRC_LO: u8 = 0x3D;
const REG_CRC_HI: u8 = 0x3E;

const UNLOCK_A: [u8; 2] = [0x7C, 0xB3];
const UNLOCK_B: [u8; 2] = [0xB2, 0x8A];
const SAVE_KEY: [u8; 2] = [0xD7, 0xEF];

const UPLOAD_SETTLE: Duration = Duration::from_millis(500);
const STATUS_SETTLE: Duration = Duration::from_secs(1);
const SAVE_RELEASE_SETTLE: Duration = Duration::from_secs(2);

/// Programmer for PXE parts.
#[derive(Debug, Clone, Copy)]
pub struct PxeProgrammer {
    dev: I2cDevice,
}

impl PxeProgrammer {
    /// Programmer for the part at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    fn page(&self, ctx: &mut ProgramContext<'_, '_>, page: u8) -> Result<()> {
        self.dev.write(ctx, &[REG_PAGE, page])
    }

    fn confirm_page(&self, ctx: &mut ProgramContext<'_, '_>, page: u8) -> Result<()> {
        self.page(ctx, page)?;
        let current = byte_at(&self.dev.read(ctx, &[REG_PAGE], 1)?, 0)?;
        if current != page {
            debug!(dev = %self.dev, page, current, "page readback differs");
        }
        Ok(())
    }

    fn word(&self, ctx: &mut ProgramContext<'_, '_>, reg: u8) -> Result<[u8; 2]> {
        let resp = self.dev.read(ctx, &[reg], 2)?;
        Ok([byte_at(&resp, 0)?, byte_at(&resp, 1)?])
    }

    /// NVM writes left on the part.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn remaining_writes(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<u32> {
        self.page(ctx, PAGE_WEAR)?;
        let raw = le_u16_at(&self.dev.read(ctx, &[REG_WEAR], 2)?, 0)?;
        self.page(ctx, PAGE_DEFAULT)?;
        Ok(u32::from((raw >> 6) & 0x3F))
    }

    fn unlock(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        self.page(ctx, PAGE_CONTROL)?;
        let [a0, a1] = UNLOCK_A;
        self.dev.write(ctx, &[REG_UNLOCK_A, a0, a1])?;
        let [b0, b1] = UNLOCK_B;
        self.dev.write(ctx, &[REG_UNLOCK_B, b0, b1])?;
        ctx.enter(ProgramState::Unlocked);
        Ok(())
    }

    fn write_record(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        page_select: u8,
        payload: &[u8],
    ) -> Result<()> {
        let &[reg, lo, hi] = payload else {
            return Err(UpdateError::unsupported_image(format!(
                "PXE record of {} bytes",
                payload.len()
            )));
        };
        self.page(ctx, record_page(page_select))?;
        self.dev.write(ctx, &[reg, lo, hi])?;
        let [r0, r1] = self.word(ctx, reg)?;
        if [r0, r1] != [lo, hi] {
            return Err(UpdateError::device_fault(
                ctx.component(),
                format!(
                    "page {:#04x} reg {reg:#04x} wrote {lo:02X}{hi:02X}, read {r0:02X}{r1:02X}",
                    record_page(page_select),
                ),
            ));
        }
        Ok(())
    }

    fn lock(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        self.page(ctx, PAGE_CONTROL)?;
        self.dev.write(ctx, &[REG_UNLOCK_B, 0x00, 0x00])?;
        self.word(ctx, REG_UNLOCK_B)?;
        ctx.enter(ProgramState::Locked);
        Ok(())
    }

    fn save(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        self.confirm_page(ctx, PAGE_CONTROL)?;
        let [k0, k1] = SAVE_KEY;
        self.dev.write(ctx, &[REG_SAVE, k0, k1])?;
        self.word(ctx, REG_SAVE)?;
        self.dev.write(ctx, &[REG_CLEAR_FAULT])?;
        self.dev.write(ctx, &[REG_UPLOAD])?;
        ctx.sleep(UPLOAD_SETTLE);

        self.confirm_page(ctx, PAGE_STATUS)?;
        let status = [self.word(ctx, 0x01)?, self.word(ctx, 0x02)?];
        debug!(dev = %self.dev, ?status, "PXE upload status");
        ctx.sleep(STATUS_SETTLE);

        self.confirm_page(ctx, PAGE_CONTROL)?;
        self.dev.write(ctx, &[REG_SAVE, 0x00, 0x00])?;
        ctx.sleep(SAVE_RELEASE_SETTLE);
        self.word(ctx, REG_SAVE)?;
        ctx.enter(ProgramState::Activated);
        Ok(())
    }

    /// CRC of the configuration held in NVM.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn device_crc(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<u32> {
        self.confirm_page(ctx, PAGE_CONTROL)?;
        ctx.sleep(STATUS_SETTLE);
        let [a0, a1] = UNLOCK_A;
        self.dev.write(ctx, &[REG_UNLOCK_A, a0, a1])?;
        self.word(ctx, REG_UNLOCK_A)?;
        self.dev.write(ctx, &[REG_CRC_CALC])?;
        self.confirm_page(ctx, PAGE_CRC)?;
        let [r0, r1] = self.word(ctx, REG_CRC_LO)?;
        let [r2, r3] = self.word(ctx, REG_CRC_HI)?;
        Ok(u32::from_le_bytes([r0, r1, r2, r3]))
    }
}

impl Programmer for PxeProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Pxe
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let ExpectedChecksum::Crc32(expected) = image.expected_checksum() else {
            return Err(UpdateError::unsupported_image("PXE image without CRC32"));
        };
        let remaining = self.remaining_writes(ctx)?;
        check_remaining_writes(ctx, remaining)?;

        self.unlock(ctx)?;
        let total = image.records().len();
        for (i, record) in image.records().iter().enumerate() {
            self.write_record(ctx, record.command(), record.payload())?;
            ctx.wrote(i + 1, total)?;
        }
        self.lock(ctx)?;
        self.save(ctx)?;

        ctx.enter(ProgramState::Verifying);
        let actual = self.device_crc(ctx)?;
        if actual != expected {
            return Err(UpdateError::checksum_mismatch(ctx.component(), expected, actual));
        }
        info!(dev = %self.dev, crc = %format!("{actual:08X}"), "PXE programming verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bmcfw_image::ImageFormat;
    use bmcfw_test_helpers::prelude::*;
    use bmcfw_transport::{Channel, RetryPolicy, Route};

    use super::*;
    use crate::config::UpdateConfig;
    use crate::progress::NoProgress;
    use crate::state::UpdateSession;

    const DEV: I2cDevice = I2cDevice::new(0x09, 0xC8);

    /// Register file keyed by (page, reg); the wear and CRC registers are
    /// preloaded.
    fn device(wear: u16, crc: u32) -> impl FnMut(&Request) -> Reply + Send + 'static {
        let mut page = 0u8;
        let mut regs: HashMap<(u8, u8), [u8; 2]> = HashMap::new();
        regs.insert((PAGE_WEAR, REG_WEAR), wear.to_le_bytes());
        let [c0, c1, c2, c3] = crc.to_le_bytes();
        regs.insert((PAGE_CRC, REG_CRC_LO), [c0, c1]);
        regs.insert((PAGE_CRC, REG_CRC_HI), [c2, c3]);
        move |req: &Request| {
            let Some(i2c) = req.i2c() else {
                return Reply::empty_for(req);
            };
            match (i2c.write, i2c.read_len) {
                ([REG_PAGE, p], 0) => {
                    page = *p;
                    Reply::empty()
                }
                ([REG_PAGE], 1) => Reply::Ok(vec![page]),
                ([reg, lo, hi], 0) => {
                    regs.insert((page, *reg), [*lo, *hi]);
                    Reply::empty()
                }
                ([reg], 2) => {
                    Reply::Ok(regs.get(&(page, *reg)).copied().unwrap_or_default().to_vec())
                }
                _ => Reply::empty(),
            }
        }
    }

    fn run(mock: &MockTransport, dump: &PxeDump) -> Result<UpdateSession> {
        let image = ImageFormat::Pxe.parse(dump.to_text().as_bytes())?;
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let config = UpdateConfig::default();
        let mut session = UpdateSession::new("VCCD");
        let mut sink = NoProgress;
        let channel = Channel::new(&mut transport, &clock, Route::slot(1), RetryPolicy::none());
        let mut ctx = ProgramContext::new(channel, &config, &mut session, &mut sink);
        PxeProgrammer::new(DEV).program(&mut ctx, &image)?;
        Ok(session)
    }

    #[test]
    fn test_program_and_verify() -> Result<()> {
        let dump = PxeDump::new(0x64);
        let mock = MockTransport::with_handler(device(20 << 6, dump.crc()));
        let session = run(&mock, &dump)?;

        assert_eq!(session.done, 510);
        assert!(session.states.contains(&ProgramState::Unlocked));
        assert!(session.states.contains(&ProgramState::Locked));
        assert_eq!(session.state(), ProgramState::Verifying);
        Ok(())
    }

    #[test]
    fn test_crc_mismatch_after_write() {
        let dump = PxeDump::new(0x64);
        let mock = MockTransport::with_handler(device(20 << 6, dump.crc() ^ 1));
        assert!(matches!(run(&mock, &dump), Err(UpdateError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_worn_out_part_is_not_unlocked() {
        let dump = PxeDump::new(0x64);
        let mock = MockTransport::with_handler(device(0, dump.crc()));
        assert!(matches!(
            run(&mock, &dump),
            Err(UpdateError::RemainingWritesExhausted { .. })
        ));
        let unlocks = mock
            .requests()
            .iter()
            .filter_map(Request::i2c)
            .filter(|i2c| i2c.write.first() == Some(&REG_UNLOCK_A))
            .count();
        assert_eq!(unlocks, 0);
    }

    #[test]
    fn test_readback_mismatch_is_a_fault() {
        let dump = PxeDump::new(0x64);
        let mock = MockTransport::with_handler(device(20 << 6, dump.crc()));
        let mut inner = device(20 << 6, dump.crc());
        mock.set_handler(move |req: &Request| match req.i2c() {
            Some(i2c) if i2c.read_len == 2 && i2c.write == [0x20] => Reply::Ok(vec![0xDE, 0xAD]),
            _ => inner(req),
        });
        assert!(matches!(run(&mock, &dump), Err(UpdateError::DeviceFault { .. })));
    }
}
