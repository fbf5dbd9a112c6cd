//! PCIe switch sub-image download.
//!
//! A sub-image is streamed to the switch in 1008-byte blocks, either as one
//! padded USB bulk packet per block or, over the IPMB relay, as 224-byte
//! `UPDATE_FW` chunks where the chunk that closes a block carries
//! [`BLOCK_END`]. After every block the switch's download status is polled
//! until it settles.
//!
//! This module only moves bytes. Entering recovery mode, activation and
//! power cycling live in [`crate::recovery`].

use core::fmt;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::chunk::IPMB_CHUNK;
use bmcfw_image::parser::pcie::kind_of;
use bmcfw_image::{Chunk, Chunker, FirmwareImage, Vendor};
use bmcfw_transport::Link;
use bmcfw_transport::ipmi::{
    CMD_OEM_1S_GET_PCIE_SWITCH_STATUS, CMD_OEM_1S_UPDATE_FW, IANA_ID, NETFN_OEM_1S,
};
use tracing::{debug, info};

use crate::context::ProgramContext;
use crate::programmer::{Programmer, byte_at, poll_until, wire_u16, wire_u32};

/// Update target of the PCIe switch.
pub const TARGET_PCIE: u8 = 0x05;
/// Flag on the target of the chunk that closes a block.
pub const BLOCK_END: u8 = 0x80;
/// USB packet header: netfn/lun, cmd, IANA, target, offset, length, image size.
pub const USB_HEADER_LEN: usize = 16;

const STATUS_SELECTOR: u8 = 0x01;

/// Switch state while it swallows a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgress {
    /// Still busy
    Pending,
    /// Block accepted
    Done,
    /// Download rejected
    Failed,
}

/// Download status register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStatus {
    /// Download state machine
    pub dlstat: u8,
    /// Flash operation state
    pub stat: u8,
}

impl DownloadStatus {
    /// Interpret the register pair.
    ///
    /// While the download is ready or in progress the flash state must go
    /// idle/busy → done. Once the download completed (or activated firmware
    /// or data) only a busy flash state means waiting. Any other `dlstat`,
    /// such as a header, offset, CRC or length error, fails the download.
    pub fn progress(&self) -> DownloadProgress {
        match (self.dlstat, self.stat) {
            (0 | 1, 0 | 1) => DownloadProgress::Pending,
            (0 | 1, 2) => DownloadProgress::Done,
            (7..=9, 1) => DownloadProgress::Pending,
            (7..=9, 0 | 2) => DownloadProgress::Done,
            _ => DownloadProgress::Failed,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dlstat={:#04x} stat={:#04x}", self.dlstat, self.stat)
    }
}

/// Read the download status.
///
/// # Errors
///
/// Transport failure, or a response shorter than two bytes.
pub fn download_status(ctx: &mut ProgramContext<'_, '_>) -> Result<DownloadStatus> {
    let resp = ctx
        .channel()
        .oem(CMD_OEM_1S_GET_PCIE_SWITCH_STATUS, &[STATUS_SELECTOR])?;
    Ok(DownloadStatus {
        dlstat: byte_at(&resp, 0)?,
        stat: byte_at(&resp, 1)?,
    })
}

/// Poll the download status until the switch has taken the last block.
///
/// # Errors
///
/// [`UpdateError::DeviceFault`] when the switch rejects the download,
/// [`UpdateError::PollTimeout`] when it stays busy.
pub fn wait_download(ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
    let interval = ctx.config().status_poll_interval;
    poll_until(ctx, "PCIe switch download", interval, |ctx| {
        let status = download_status(ctx)?;
        match status.progress() {
            DownloadProgress::Pending => Ok(false),
            DownloadProgress::Done => Ok(true),
            DownloadProgress::Failed => Err(UpdateError::device_fault(
                ctx.component(),
                status.to_string(),
            )),
        }
    })
}

/// Streams one sub-image to the PCIe switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcieProgrammer;

impl PcieProgrammer {
    /// Programmer picking USB or IPMB from the session route.
    pub fn new() -> Self {
        Self
    }

    fn send_usb(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        block: &Chunk<'_>,
        image_len: u32,
    ) -> Result<()> {
        let wire = block.wire_bytes();
        let mut packet = Vec::with_capacity(USB_HEADER_LEN + wire.len());
        packet.push(NETFN_OEM_1S << 2);
        packet.push(CMD_OEM_1S_UPDATE_FW);
        packet.extend_from_slice(&IANA_ID);
        packet.push(TARGET_PCIE);
        packet.extend_from_slice(&wire_u32(block.offset())?.to_le_bytes());
        packet.extend_from_slice(&wire_u16(block.valid_len())?.to_le_bytes());
        packet.extend_from_slice(&image_len.to_le_bytes());
        packet.extend_from_slice(&wire);
        ctx.channel().bulk(&packet)?;
        Ok(())
    }

    /// Relay one block as IPMB chunks. Every chunk carries the block's
    /// offset; the switch places them by arrival order.
    fn send_ipmb(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        block: &Chunk<'_>,
        image_len: u32,
    ) -> Result<()> {
        let block_offset = wire_u32(block.offset())?;
        for chunk in Chunker::IPMB.chunks(block.data()) {
            let target = if chunk.is_last() {
                TARGET_PCIE | BLOCK_END
            } else {
                TARGET_PCIE
            };
            let mut req = Vec::with_capacity(11 + IPMB_CHUNK);
            req.push(target);
            req.extend_from_slice(&block_offset.to_le_bytes());
            req.extend_from_slice(&wire_u16(chunk.valid_len())?.to_le_bytes());
            req.extend_from_slice(&image_len.to_le_bytes());
            req.extend_from_slice(chunk.data());
            ctx.channel().oem(CMD_OEM_1S_UPDATE_FW, &req)?;
        }
        Ok(())
    }
}

impl Programmer for PcieProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::PcieSwitch
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let kind = kind_of(image)
            .ok_or_else(|| UpdateError::unsupported_image("PCIe image without a sub-image type"))?;
        let payload = image.payload();
        let image_len = wire_u32(payload.len())?;
        let link = ctx.route().link();
        info!(%kind, size = payload.len(), ?link, "sending PCIe switch sub-image");

        let total = Chunker::USB.count(payload.len());
        for block in Chunker::USB.chunks(payload) {
            match link {
                Link::Usb => self.send_usb(ctx, &block, image_len)?,
                Link::Ipmb => self.send_ipmb(ctx, &block, image_len)?,
            }
            wait_download(ctx)?;
            debug!(offset = block.offset(), "block accepted");
            ctx.wrote(block.index() + 1, total)?;
        }
        Ok(())
    }
}
