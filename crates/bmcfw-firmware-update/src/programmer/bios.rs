//! Host BIOS over the bridge's USB endpoint.
//!
//! The SPI image goes out in 64 KiB blocks, each padded with `0xFF` and cut
//! into bulk packets. Before a block is written the bridge can be asked for
//! its digest of the same flash range; equal digests mean the block is
//! already in place and is skipped.
//!
//! Bridges that implement the SHA-256 digest command also accept larger
//! packets. Older ones only return two additive sums per block.

use bmcfw_checksum::{BlockFingerprint, FingerprintKind, SIMPLE_HALF_BLOCK};
use bmcfw_errors::{Result, TransportError, UpdateError};
use bmcfw_image::{Chunk, Chunker, FirmwareImage, Vendor};
use bmcfw_transport::ipmi::{
    CMD_OEM_1S_GET_FW_CKSUM, CMD_OEM_1S_GET_FW_CKSUM_SHA256, CMD_OEM_1S_UPDATE_FW, IANA_ID,
    NETFN_OEM_1S,
};
use tracing::{debug, info, warn};

use crate::context::ProgramContext;
use crate::programmer::{Programmer, wire_u16, wire_u32};
use crate::state::ProgramState;

/// Update target of the BIOS flash.
pub const TARGET_BIOS: u8 = 0x00;
/// Flag on `target` of the final packet of the image.
pub const TARGET_LAST: u8 = 0x80;

/// Bulk packet header: netfn/lun, cmd, IANA, target, offset, length.
pub const PACKET_HEADER_LEN: usize = 12;
/// Packet data limit on bridges with SHA-256 block digests.
pub const DATA_LIMIT_STRONG: usize = 0x1000 - 11;
/// Packet data limit on older bridges.
pub const DATA_LIMIT_SIMPLE: usize = 0x200 - 11;

const BLOCK_ATTEMPTS: u32 = 3;

/// Programmer for the host BIOS.
#[derive(Debug, Clone, Copy)]
pub struct BiosProgrammer {
    target: u8,
}

impl Default for BiosProgrammer {
    fn default() -> Self {
        Self::new()
    }
}

impl BiosProgrammer {
    /// Programmer for the primary BIOS flash.
    pub fn new() -> Self {
        Self {
            target: TARGET_BIOS,
        }
    }

    /// Digest flavour the bridge supports.
    ///
    /// Probes the SHA-256 command on the first block; any failure means
    /// the bridge only knows the additive sums.
    pub fn fingerprint_kind(&self, ctx: &mut ProgramContext<'_, '_>) -> FingerprintKind {
        match self.device_fingerprint(ctx, FingerprintKind::Strong, 0) {
            Ok(_) => FingerprintKind::Strong,
            Err(e) => {
                debug!(error = %e, "SHA-256 block digest unsupported");
                FingerprintKind::Simple
            }
        }
    }

    /// Bridge's digest of the flash block at `offset`.
    ///
    /// # Errors
    ///
    /// Transport failure, or a response of the wrong length.
    pub fn device_fingerprint(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        kind: FingerprintKind,
        offset: usize,
    ) -> Result<BlockFingerprint> {
        let raw = match kind {
            FingerprintKind::Strong => ctx.channel().oem(
                CMD_OEM_1S_GET_FW_CKSUM_SHA256,
                &self.digest_request(offset, Chunker::BIOS.size())?,
            )?,
            FingerprintKind::Simple => {
                let mut raw = ctx.channel().oem(
                    CMD_OEM_1S_GET_FW_CKSUM,
                    &self.digest_request(offset, SIMPLE_HALF_BLOCK)?,
                )?;
                raw.extend(ctx.channel().oem(
                    CMD_OEM_1S_GET_FW_CKSUM,
                    &self.digest_request(offset + SIMPLE_HALF_BLOCK, SIMPLE_HALF_BLOCK)?,
                )?);
                raw
            }
        };
        BlockFingerprint::from_device_bytes(kind, &raw)
            .ok_or_else(|| TransportError::short(kind.device_len(), raw.len()).into())
    }

    fn digest_request(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut req = Vec::with_capacity(9);
        req.push(self.target);
        req.extend_from_slice(&wire_u32(offset)?.to_le_bytes());
        req.extend_from_slice(&wire_u32(len)?.to_le_bytes());
        Ok(req)
    }

    fn send_block(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        chunk: &Chunk<'_>,
        data_limit: usize,
    ) -> Result<()> {
        let block = chunk.wire_bytes();
        let pieces = block.chunks(data_limit);
        let count = pieces.len();
        for (i, piece) in pieces.enumerate() {
            let offset = chunk.offset() + i * data_limit;
            let mut target = self.target;
            if chunk.is_last() && i + 1 == count {
                target |= TARGET_LAST;
            }
            let len = wire_u16(piece.len())?;

            let mut packet = Vec::with_capacity(PACKET_HEADER_LEN + piece.len());
            packet.push(NETFN_OEM_1S << 2);
            packet.push(CMD_OEM_1S_UPDATE_FW);
            packet.extend_from_slice(&IANA_ID);
            packet.push(target);
            packet.extend_from_slice(&wire_u32(offset)?.to_le_bytes());
            packet.extend_from_slice(&len.to_le_bytes());
            packet.extend_from_slice(piece);
            ctx.channel().bulk(&packet)?;
        }
        Ok(())
    }

    fn write_block(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        chunk: &Chunk<'_>,
        data_limit: usize,
        expected: Option<&BlockFingerprint>,
    ) -> Result<()> {
        self.send_block(ctx, chunk, data_limit)?;
        let Some(expected) = expected else {
            return Ok(());
        };
        ctx.enter(ProgramState::Verifying);
        let actual = self.device_fingerprint(ctx, expected.kind(), chunk.offset())?;
        if &actual != expected {
            return Err(UpdateError::ChecksumMismatch {
                target: format!("{} block {:#x}", ctx.component(), chunk.offset()),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl Programmer for BiosProgrammer {
    fn vendor(&self) -> Vendor {
        Vendor::Bios
    }

    fn program(&self, ctx: &mut ProgramContext<'_, '_>, image: &FirmwareImage) -> Result<()> {
        let kind = self.fingerprint_kind(ctx);
        let dedup = ctx.config().bios_dedup && kind == FingerprintKind::Strong;
        let verify = ctx.config().bios_verify;
        let data_limit = match kind {
            FingerprintKind::Strong => DATA_LIMIT_STRONG,
            FingerprintKind::Simple => DATA_LIMIT_SIMPLE,
        };
        info!(?kind, dedup, verify, size = image.payload().len(), "updating BIOS");

        let chunker = Chunker::BIOS;
        let total = chunker.count(image.payload().len());
        let mut skipped = 0usize;
        for chunk in chunker.chunks(image.payload()) {
            let host = (dedup || verify)
                .then(|| BlockFingerprint::compute(kind, &chunk.wire_bytes()));

            if dedup && let Some(host) = &host {
                match self.device_fingerprint(ctx, kind, chunk.offset()) {
                    Ok(device) if &device == host => {
                        debug!(offset = chunk.offset(), "block unchanged, skipped");
                        skipped += 1;
                        ctx.wrote(chunk.index() + 1, total)?;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(offset = chunk.offset(), error = %e, "block digest unavailable")
                    }
                }
            }

            let expected = if verify { host.as_ref() } else { None };
            let mut attempt = 1;
            loop {
                match self.write_block(ctx, &chunk, data_limit, expected) {
                    Ok(()) => break,
                    Err(e) if attempt < BLOCK_ATTEMPTS && block_retryable(&e) => {
                        warn!(offset = chunk.offset(), attempt, error = %e, "retrying BIOS block");
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            ctx.wrote(chunk.index() + 1, total)?;
        }

        info!(blocks = total, skipped, "BIOS image written");
        Ok(())
    }
}

fn block_retryable(error: &UpdateError) -> bool {
    error.is_retryable() || matches!(error, UpdateError::ChecksumMismatch { .. })
}
