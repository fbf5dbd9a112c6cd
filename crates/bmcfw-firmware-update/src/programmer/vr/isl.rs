//! Renesas ISL69xxx regulators.
//!
//! Records from the hex export are replayed verbatim; the part stages them
//! and commits to NVM on its own. Completion is read back through the DMA
//! window (`C7` address, `C5` data).

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{FirmwareImage, Vendor};
use tracing::{debug, info};

use super::check_remaining_writes;
use crate::context::ProgramContext;
use crate::programmer::{I2cDevice, Programmer, byte_at};
use crate::state::ProgramState;

const REG_DMA_ADDR: u8 = 0xC7;
const REG_DMA_DATA: u8 = 0xC5;
const DMA_NVM_SLOTS: [u8; 2] = [0x35, 0x00];
const DMA_PROGRAMMER_STATUS: [u8; 2] = [0x7E, 0x00];

const RECORD_SETTLE: Duration = Duration::from_millis(100);
const STATUS_POLLS: u32 = 3;
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

fn dma_read(ctx: &mut ProgramContext<'_, '_>, dev: I2cDevice, window: [u8; 2]) -> Result<Vec<u8>> {
    let [lo, hi] = window;
    dev.write(ctx, &[REG_DMA_ADDR, lo, hi])?;
    dev.read(ctx, &[REG_DMA_DATA], 4)
}

/// NVM slots left on the part.
///
/// # Errors
///
/// Transport failure.
pub fn remaining_writes(ctx: &mut ProgramContext<'_, '_>, dev: I2cDevice) -> Result<u32> {
    let resp = dma_read(ctx, dev, DMA_NVM_SLOTS)?;
    Ok(u32::from(byte_at(&resp, 0)?))
}

/// Programmer for ISL parts.
#[derive(Debug, Clone, Copy)]
pub struct IslProgrammer {
    dev: I2cDevice,
}

impl IslProgrammer {
    /// Programmer for the part at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    fn programmed(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<bool> {
        let resp = dma_read(ctx, self.dev, DMA_PROGRAMMER_STATUS)?;
        Ok(byte_at(&resp, 0)? & 0x01 != 0)
    }
}

impl Programmer for IslProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Isl
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let remaining = remaining_writes(ctx, self.dev)?;
        check_remaining_writes(ctx, remaining)?;

        let total = image.records().len();
        for (i, record) in image.records().iter().enumerate() {
            self.dev.write(ctx, &record.to_bytes())?;
            ctx.sleep(RECORD_SETTLE);
            ctx.wrote(i + 1, total)?;
        }

        ctx.enter(ProgramState::Verifying);
        for poll in 1..=STATUS_POLLS {
            if self.programmed(ctx)? {
                info!(dev = %self.dev, records = total, "ISL programming complete");
                return Ok(());
            }
            debug!(dev = %self.dev, poll, "ISL programmer busy");
            ctx.sleep(STATUS_INTERVAL);
        }
        Err(UpdateError::poll_timeout("ISL programmer status", STATUS_POLLS))
    }
}

#[cfg(test)]
mod tests {
    use bmcfw_image::ImageFormat;
    use bmcfw_test_helpers::prelude::*;
    use bmcfw_transport::{Channel, RetryPolicy, Route};

    use super::*;
    use crate::config::UpdateConfig;
    use crate::progress::NoProgress;
    use crate::state::UpdateSession;

    const DEV: I2cDevice = I2cDevice::new(0x09, 0xC0);

    fn handler(slots: u8, status: u8) -> impl FnMut(&Request) -> Reply + Send + 'static {
        let mut window = [0u8; 2];
        move |req: &Request| {
            let Some(i2c) = req.i2c() else {
                return Reply::empty_for(req);
            };
            match i2c.write {
                [REG_DMA_ADDR, lo, hi] => {
                    window = [*lo, *hi];
                    Reply::empty()
                }
                [REG_DMA_DATA] if window == DMA_NVM_SLOTS => Reply::Ok(vec![slots, 0, 0, 0]),
                [REG_DMA_DATA] => Reply::Ok(vec![status, 0, 0, 0]),
                _ => Reply::empty(),
            }
        }
    }

    fn image() -> Result<FirmwareImage> {
        Ok(ImageFormat::Isl.parse(IslHex::new(0xC0).to_text().as_bytes())?)
    }

    fn run(mock: &MockTransport, clock: &ManualClock, force: bool) -> Result<UpdateSession> {
        let image = image()?;
        let mut transport = mock.clone();
        let config = UpdateConfig::default();
        let mut session = UpdateSession::new("VCCIN");
        let mut sink = NoProgress;
        let channel = Channel::new(&mut transport, clock, Route::slot(1), RetryPolicy::none());
        let mut ctx =
            ProgramContext::new(channel, &config, &mut session, &mut sink).with_force(force);
        IslProgrammer::new(DEV).program(&mut ctx, &image)?;
        Ok(session)
    }

    fn record_writes(mock: &MockTransport) -> usize {
        mock.requests()
            .iter()
            .filter_map(Request::i2c)
            .filter(|i2c| i2c.read_len == 0 && !matches!(i2c.write, [REG_DMA_ADDR, _, _]))
            .count()
    }

    #[test]
    fn test_program_writes_every_record() -> Result<()> {
        let mock = MockTransport::with_handler(handler(20, 0x01));
        let clock = ManualClock::new();
        let session = run(&mock, &clock, false)?;

        let records = image()?.records().len();
        assert_eq!(record_writes(&mock), records);
        assert_eq!(session.done, records);
        assert_eq!(session.state(), ProgramState::Verifying);
        Ok(())
    }

    #[test]
    fn test_zero_writes_never_writes() {
        let mock = MockTransport::with_handler(handler(0, 0x01));
        let clock = ManualClock::new();
        assert!(matches!(
            run(&mock, &clock, true),
            Err(UpdateError::RemainingWritesExhausted { .. })
        ));
        assert_eq!(record_writes(&mock), 0);
    }

    #[test]
    fn test_status_never_set_times_out() {
        let mock = MockTransport::with_handler(handler(20, 0x00));
        let clock = ManualClock::new();
        assert!(matches!(
            run(&mock, &clock, false),
            Err(UpdateError::PollTimeout { attempts: 3, .. })
        ));
        let polls = clock.sleeps().iter().filter(|d| **d == STATUS_INTERVAL).count();
        assert_eq!(polls, 3);
    }
}
