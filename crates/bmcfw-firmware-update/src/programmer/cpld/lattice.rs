//! Lattice MachXO CPLDs.
//!
//! Configuration flash is programmed one 128-bit row at a time through the
//! slave configuration port, then read back row by row. A readback mismatch
//! restarts the whole sequence from the device-id probe.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{FirmwareImage, ImageMetadata, Vendor};
use tracing::{debug, info, warn};

use crate::context::ProgramContext;
use crate::programmer::{I2cDevice, Programmer, byte_at, poll_until};
use crate::state::ProgramState;

const CMD_READ_DEVICE_ID: [u8; 4] = [0xE0, 0x00, 0x00, 0x00];
const CMD_ENABLE_TRANSPARENT: [u8; 3] = [0x74, 0x08, 0x00];
const CMD_ERASE_CF: [u8; 4] = [0x0E, 0x04, 0x00, 0x00];
const CMD_RESET_ADDRESS: [u8; 4] = [0x46, 0x00, 0x00, 0x00];
const PAGE_OPERANDS: [u8; 3] = [0x00, 0x00, 0x01];
const CMD_READ_PAGE: [u8; 4] = [0x73, 0x00, 0x00, 0x01];
const CMD_PROGRAM_USERCODE: [u8; 4] = [0xC2, 0x00, 0x00, 0x00];
const CMD_PROGRAM_DONE: [u8; 4] = [0x5E, 0x00, 0x00, 0x00];
const CMD_DISABLE_INTERFACE: [u8; 3] = [0x26, 0x00, 0x00];
const CMD_READ_BUSY: [u8; 4] = [0xF0, 0x00, 0x00, 0x00];
const CMD_READ_STATUS: [u8; 4] = [0x3C, 0x00, 0x00, 0x00];

const BUSY_BIT: u8 = 0x80;
const PAGE_LEN: u8 = 16;

const DETECT_TRIES: u32 = 100;
const DETECT_INTERVAL: Duration = Duration::from_millis(10);
const SEQUENCE_ATTEMPTS: u32 = 3;

/// Programmer for Lattice parts.
#[derive(Debug, Clone, Copy)]
pub struct LatticeProgrammer {
    dev: I2cDevice,
}

impl LatticeProgrammer {
    /// Programmer for the CPLD at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    /// Read the JTAG device id, retrying while the part wakes up.
    ///
    /// # Errors
    ///
    /// [`UpdateError::DeviceNotFound`] if the part never answers.
    pub fn detect(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<[u8; 4]> {
        for attempt in 1..=DETECT_TRIES {
            match self.dev.read(ctx, &CMD_READ_DEVICE_ID, 4) {
                Ok(resp) => {
                    let mut id = [0u8; 4];
                    for (dst, src) in id.iter_mut().zip(&resp) {
                        *dst = *src;
                    }
                    info!(dev = %self.dev, id = %hex::encode(id), "CPLD detected");
                    return Ok(id);
                }
                Err(e) => {
                    debug!(dev = %self.dev, attempt, error = %e, "CPLD not answering");
                    ctx.sleep(DETECT_INTERVAL);
                }
            }
        }
        Err(UpdateError::device_not_found(format!("Lattice CPLD {}", self.dev)))
    }

    fn wait_idle(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        let interval = ctx.config().status_poll_interval;
        poll_until(ctx, "CPLD busy flag", interval, |ctx| {
            let resp = self.dev.read(ctx, &CMD_READ_BUSY, 1)?;
            Ok(byte_at(&resp, 0)? & BUSY_BIT == 0)
        })
    }

    fn check_status(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        let resp = self.dev.read(ctx, &CMD_READ_STATUS, 4)?;
        let fail = (byte_at(&resp, 2)? >> 4) & 0x03;
        if fail != 0 {
            return Err(UpdateError::device_fault(
                self.dev.to_string(),
                format!("configuration status error {fail:#x}"),
            ));
        }
        Ok(())
    }

    fn run_once(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        image: &FirmwareImage,
        usercode: u32,
    ) -> Result<()> {
        self.detect(ctx)?;

        self.dev.write(ctx, &CMD_ENABLE_TRANSPARENT)?;
        self.wait_idle(ctx)?;
        ctx.enter(ProgramState::Unlocked);

        ctx.enter(ProgramState::Erasing);
        self.dev.write(ctx, &CMD_ERASE_CF)?;
        self.wait_idle(ctx)?;
        self.check_status(ctx)?;
        self.dev.write(ctx, &CMD_RESET_ADDRESS)?;

        let rows = image.records();
        let total = rows.len();
        for (i, row) in rows.iter().enumerate() {
            let mut cmd = Vec::with_capacity(row.payload().len() + 4);
            cmd.push(row.command());
            cmd.extend_from_slice(&PAGE_OPERANDS);
            cmd.extend_from_slice(row.payload());
            self.dev.write(ctx, &cmd)?;
            self.wait_idle(ctx)?;
            ctx.wrote(i + 1, total)?;
        }

        let mut cmd = CMD_PROGRAM_USERCODE.to_vec();
        cmd.extend_from_slice(&usercode.to_le_bytes());
        self.dev.write(ctx, &cmd)?;
        self.wait_idle(ctx)?;

        ctx.enter(ProgramState::Verifying);
        self.dev.write(ctx, &CMD_RESET_ADDRESS)?;
        for (i, row) in rows.iter().enumerate() {
            let readback = self.dev.read(ctx, &CMD_READ_PAGE, PAGE_LEN)?;
            if readback.get(..usize::from(PAGE_LEN)) != Some(row.payload()) {
                return Err(UpdateError::ChecksumMismatch {
                    target: ctx.component(),
                    expected: format!("row {i} {}", hex::encode(row.payload())),
                    actual: format!("row {i} {}", hex::encode(&readback)),
                });
            }
            self.wait_idle(ctx)?;
            ctx.report("Verifying", i + 1, total)?;
        }
        Ok(())
    }
}

impl Programmer for LatticeProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Lattice
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let ImageMetadata::Lattice { usercode, .. } = image.metadata() else {
            return Err(UpdateError::unsupported_image("JEDEC image without usercode"));
        };

        let mut attempt = 1;
        loop {
            ctx.next_attempt();
            match self.run_once(ctx, image, *usercode) {
                Err(e @ UpdateError::ChecksumMismatch { .. }) if attempt < SEQUENCE_ATTEMPTS => {
                    warn!(
                        dev = %self.dev,
                        attempt,
                        error = %e,
                        "CPLD verify failed, starting over"
                    );
                    attempt += 1;
                }
                result => {
                    result?;
                    break;
                }
            }
        }

        self.dev.write(ctx, &CMD_PROGRAM_DONE)?;
        ctx.enter(ProgramState::Activated);
        if let Err(e) = self.dev.write(ctx, &CMD_DISABLE_INTERFACE) {
            warn!(dev = %self.dev, error = %e, "failed to leave transparent mode");
        }
        ctx.enter(ProgramState::Locked);
        info!(
            dev = %self.dev,
            rows = image.records().len(),
            usercode = %format!("{usercode:08X}"),
            "CPLD programmed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bmcfw_image::ImageFormat;
    use bmcfw_test_helpers::prelude::*;
    use bmcfw_transport::{Channel, RetryPolicy, Route};

    use super::*;
    use crate::config::UpdateConfig;
    use crate::programmer::cpld::BB_CPLD;
    use crate::progress::NoProgress;
    use crate::state::UpdateSession;

    /// Configuration flash that stores programmed rows and replays them.
    fn flash(
        mut corrupt_reads: usize,
        status: u8,
    ) -> impl FnMut(&Request) -> Reply + Send + 'static {
        let mut rows: Vec<Vec<u8>> = Vec::new();
        let mut cursor = 0usize;
        move |req: &Request| {
            let Some(i2c) = req.i2c() else {
                return Reply::empty_for(req);
            };
            match i2c.write {
                [0xE0, ..] => Reply::Ok(vec![0x01, 0x2B, 0xA0, 0x43]),
                [0xF0, ..] => Reply::Ok(vec![0x00]),
                [0x3C, ..] => Reply::Ok(vec![0x00, 0x00, status, 0x00]),
                [0x0E, ..] => {
                    rows.clear();
                    Reply::empty()
                }
                [0x46, ..] => {
                    cursor = 0;
                    Reply::empty()
                }
                [0x70, _, _, _, data @ ..] => {
                    rows.push(data.to_vec());
                    Reply::empty()
                }
                [0x73, ..] => {
                    let mut row = rows.get(cursor).cloned().unwrap_or_default();
                    cursor += 1;
                    if corrupt_reads > 0 {
                        corrupt_reads -= 1;
                        if let Some(b) = row.first_mut() {
                            *b ^= 0xFF;
                        }
                    }
                    Reply::Ok(row)
                }
                _ => Reply::empty(),
            }
        }
    }

    fn jed() -> JedFile {
        JedFile::new(vec![
            [0x0123_4567, 0x89AB_CDEF, 0x0F0F_0F0F, 0xF0F0_F0F0],
            [0xDEAD_BEEF, 0x0000_0001, 0x8000_0000, 0x5555_AAAA],
            [0x1111_2222, 0x3333_4444, 0x5555_6666, 0x7777_8888],
        ])
    }

    fn run(mock: &MockTransport) -> Result<UpdateSession> {
        let image = ImageFormat::Lattice.parse(jed().to_text().as_bytes())?;
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let config = UpdateConfig::default();
        let mut session = UpdateSession::new("2OU CPLD");
        let mut sink = NoProgress;
        let channel = Channel::new(&mut transport, &clock, Route::slot(1), RetryPolicy::none());
        let mut ctx = ProgramContext::new(channel, &config, &mut session, &mut sink);
        LatticeProgrammer::new(BB_CPLD).program(&mut ctx, &image)?;
        Ok(session)
    }

    fn writes_starting(mock: &MockTransport, cmd: u8) -> Vec<Vec<u8>> {
        mock.requests()
            .iter()
            .filter_map(Request::i2c)
            .filter(|i2c| i2c.write.first() == Some(&cmd))
            .map(|i2c| i2c.write.to_vec())
            .collect()
    }

    #[test]
    fn test_rows_programmed_and_verified() -> Result<()> {
        let mock = MockTransport::with_handler(flash(0, 0x00));
        let session = run(&mock)?;

        let rows = writes_starting(&mock, 0x70);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.first().map(|r| r.get(..8).map(<[u8]>::to_vec)),
            Some(Some(vec![0x70, 0x00, 0x00, 0x01, 0x01, 0x23, 0x45, 0x67]))
        );
        assert_eq!(
            writes_starting(&mock, 0xC2),
            vec![vec![0xC2, 0x00, 0x00, 0x00, 0xEE, 0xFF, 0xC0, 0x00]]
        );
        assert_eq!(writes_starting(&mock, 0x5E).len(), 1);
        assert_eq!(writes_starting(&mock, 0x26).len(), 1);
        assert_eq!(session.attempts, 1);
        assert_eq!(
            session.states,
            vec![
                ProgramState::Idle,
                ProgramState::Unlocked,
                ProgramState::Erasing,
                ProgramState::Writing { done: 3, total: 3 },
                ProgramState::Verifying,
                ProgramState::Activated,
                ProgramState::Locked,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_verify_mismatch_restarts_sequence() -> Result<()> {
        let mock = MockTransport::with_handler(flash(1, 0x00));
        let session = run(&mock)?;
        assert_eq!(session.attempts, 2);
        assert_eq!(writes_starting(&mock, 0x0E).len(), 2);
        Ok(())
    }

    #[test]
    fn test_persistent_mismatch_gives_up_after_three() {
        let mock = MockTransport::with_handler(flash(usize::MAX, 0x00));
        assert!(matches!(run(&mock), Err(UpdateError::ChecksumMismatch { .. })));
        assert_eq!(writes_starting(&mock, 0x0E).len(), 3);
        assert!(writes_starting(&mock, 0x5E).is_empty());
    }

    #[test]
    fn test_erase_failure_is_device_fault() {
        let mock = MockTransport::with_handler(flash(0, 0x10));
        assert!(matches!(run(&mock), Err(UpdateError::DeviceFault { .. })));
        assert!(writes_starting(&mock, 0x70).is_empty());
    }
}
