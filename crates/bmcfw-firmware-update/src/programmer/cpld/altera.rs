//! Altera MAX10 CPLDs.
//!
//! The configuration flash (CFM1) is unprotected and erased through the
//! on-chip flash controller's CSR registers, then refilled by the bridge,
//! which accepts the image in 128-byte `UPDATE_FW` writes. Registers are
//! addressed with a big-endian 32-bit address; values are little-endian.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::parser::altera::COMPONENT_BASEBOARD;
use bmcfw_image::{AlteraSignature, BoardClass, Chunker, FirmwareImage, ImageMetadata, Vendor};
use bmcfw_transport::ipmi::CMD_OEM_1S_UPDATE_FW;
use tracing::{debug, info, warn};

use super::{BOARD_REV_DEV, REG_BOARD_REV};
use crate::context::ProgramContext;
use crate::programmer::{I2cDevice, Programmer, byte_at, le_u32_at, poll_until};
use crate::state::ProgramState;

const REG_CSR_STATUS: u32 = 0x0020_0020;
const REG_CSR_CTRL: u32 = 0x0020_0024;

const STATUS_BUSY_ERASE: u32 = 0x01;
const STATUS_ERASE_SUCCESS: u32 = 0x10;

const CTRL_WP_CFM1: u32 = 1 << 26;
const CTRL_WP_ALL: u32 = 0x1F << 23;
const CTRL_ERASE_MASK: u32 = 0x7 << 20;
const CTRL_ERASE_CFM1: u32 = 0b100 << 20;
const CTRL_ERASE_NONE: u32 = 0b111 << 20;

const ERASE_POLL: Duration = Duration::from_millis(500);

/// `UPDATE_FW` target byte of the CPLD.
pub const TARGET_CPLD: u8 = 0x01;

/// Programmer for MAX10 parts.
#[derive(Debug, Clone, Copy)]
pub struct AlteraProgrammer {
    dev: I2cDevice,
}

impl AlteraProgrammer {
    /// Programmer for the CPLD at `dev`.
    pub fn new(dev: I2cDevice) -> Self {
        Self { dev }
    }

    fn read_reg(&self, ctx: &mut ProgramContext<'_, '_>, reg: u32) -> Result<u32> {
        le_u32_at(&self.dev.read(ctx, &reg.to_be_bytes(), 4)?, 0)
    }

    fn write_reg(&self, ctx: &mut ProgramContext<'_, '_>, reg: u32, value: u32) -> Result<()> {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&reg.to_be_bytes());
        data.extend_from_slice(&value.to_le_bytes());
        self.dev.write(ctx, &data)
    }

    /// Revision class of the board, from the baseboard CPLD flag register.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn board_class(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<BoardClass> {
        let resp = BOARD_REV_DEV.read(ctx, &[REG_BOARD_REV], 1)?;
        let raw = byte_at(&resp, 0)?;
        let class = BoardClass::from_register(raw);
        debug!(raw, ?class, "board revision");
        Ok(class)
    }

    /// Decide whether the image may be written to this board.
    ///
    /// Without `force` only signed baseboard images built for the board's
    /// revision class are accepted. With `force` nothing is checked.
    fn check_signature(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        signature: Option<AlteraSignature>,
    ) -> Result<()> {
        if ctx.force() {
            if signature.is_none() {
                warn!(dev = %self.dev, "writing unsigned CPLD image, forced");
            }
            return Ok(());
        }
        let Some(signature) = signature else {
            return Err(UpdateError::unsupported_image(
                "unsigned CPLD image; use force to write it anyway",
            ));
        };
        let class = self.board_class(ctx)?;
        if signature.component != COMPONENT_BASEBOARD || !signature.is_compatible(class) {
            return Err(UpdateError::DeviceMismatch {
                device: ctx.component(),
                expected: format!("component {COMPONENT_BASEBOARD:#x} for a {class:?} board"),
                actual: format!(
                    "component {:#x} revision {}",
                    signature.component, signature.revision
                ),
            });
        }
        Ok(())
    }

    fn erase(&self, ctx: &mut ProgramContext<'_, '_>, field: u32) -> Result<()> {
        let ctrl = (self.read_reg(ctx, REG_CSR_CTRL)? & !CTRL_ERASE_MASK) | field;
        self.write_reg(ctx, REG_CSR_CTRL, ctrl)?;
        poll_until(ctx, "MAX10 sector erase", ERASE_POLL, |ctx| {
            let status = self.read_reg(ctx, REG_CSR_STATUS)?;
            if status & STATUS_BUSY_ERASE != 0 {
                return Ok(false);
            }
            if status & STATUS_ERASE_SUCCESS != 0 {
                return Ok(true);
            }
            Err(UpdateError::device_fault(
                self.dev.to_string(),
                format!("erase failed, status {status:#010x}"),
            ))
        })
    }

    fn send_chunk(ctx: &mut ProgramContext<'_, '_>, offset: usize, data: &[u8]) -> Result<()> {
        let offset = u32::try_from(offset)
            .map_err(|_| UpdateError::unsupported_image("CPLD image offset exceeds 32 bits"))?;
        let len = u16::try_from(data.len())
            .map_err(|_| UpdateError::unsupported_image("CPLD chunk exceeds 16 bits"))?;
        let mut body = Vec::with_capacity(data.len() + 7);
        body.push(TARGET_CPLD);
        body.extend_from_slice(&offset.to_le_bytes());
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(data);
        ctx.channel().oem(CMD_OEM_1S_UPDATE_FW, &body)?;
        Ok(())
    }
}

impl Programmer for AlteraProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Altera
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let ImageMetadata::Altera { signature } = image.metadata() else {
            return Err(UpdateError::unsupported_image("not a MAX10 image"));
        };
        self.check_signature(ctx, *signature)?;

        let ctrl = self.read_reg(ctx, REG_CSR_CTRL)?;
        self.write_reg(ctx, REG_CSR_CTRL, ctrl & !CTRL_WP_CFM1)?;
        ctx.enter(ProgramState::Unlocked);

        ctx.enter(ProgramState::Erasing);
        self.erase(ctx, CTRL_ERASE_CFM1)?;
        self.erase(ctx, CTRL_ERASE_NONE)?;

        let payload = image.payload();
        let chunker = Chunker::ALTERA;
        let total = chunker.count(payload.len());
        for chunk in chunker.chunks(payload) {
            Self::send_chunk(ctx, chunk.offset(), chunk.data())?;
            ctx.wrote(chunk.index() + 1, total)?;
        }

        let ctrl = self.read_reg(ctx, REG_CSR_CTRL)?;
        self.write_reg(ctx, REG_CSR_CTRL, ctrl | CTRL_WP_ALL)?;
        ctx.enter(ProgramState::Locked);
        info!(dev = %self.dev, bytes = payload.len(), "MAX10 configuration flash written");
        Ok(())
    }
}
