//! Voltage regulators.
//!
//! All four families sit on a PMBus segment behind a bridge controller and
//! keep their configuration in wear-limited NVM. Shared here:
//!
//! - the device-id probe that picks the vendor programmer
//! - the image/device identity check
//! - the remaining-writes gate every programmer runs before its first write

pub mod ifx;
pub mod isl;
pub mod pxe;
pub mod ti;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{FirmwareImage, ImageFormat, ImageMetadata, IslRevision, Vendor};
use tracing::{info, warn};

use super::{I2cDevice, byte_at};
use crate::context::ProgramContext;

/// PMBus `IC_DEVICE_ID`.
pub const REG_IC_DEVICE_ID: u8 = 0xAD;
/// PMBus `IC_DEVICE_REV`.
pub const REG_IC_DEVICE_REV: u8 = 0xAE;

const DEVICE_ID_READ_LEN: u8 = 7;
const IFX_ID_LEN: usize = 2;
const TI_ID_LEN: usize = 6;

/// What a regulator reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrIdentity {
    /// Vendor family inferred from the id length
    pub vendor: Vendor,
    /// Device id bytes, in the order the device sends them
    pub device_id: Vec<u8>,
    /// Silicon revision, ISL parts only
    pub revision: Option<IslRevision>,
}

impl VrIdentity {
    /// Image format written by this family's tools.
    pub fn format(&self) -> ImageFormat {
        match self.vendor {
            Vendor::Ti => ImageFormat::Ti,
            Vendor::Infineon => ImageFormat::Ifx,
            Vendor::Pxe => ImageFormat::Pxe,
            _ => ImageFormat::Isl,
        }
    }
}

/// Read `IC_DEVICE_ID` and classify the regulator.
///
/// The first response byte is the id length: 2 bytes is Infineon, 6 is TI,
/// anything else is an ISL part, whose silicon revision is then read from
/// `IC_DEVICE_REV`.
///
/// # Errors
///
/// Transport failure, or a length byte that runs past the response.
pub fn probe(ctx: &mut ProgramContext<'_, '_>, dev: I2cDevice) -> Result<VrIdentity> {
    let resp = dev.read(ctx, &[REG_IC_DEVICE_ID], DEVICE_ID_READ_LEN)?;
    let len = usize::from(byte_at(&resp, 0)?);
    let device_id = resp
        .get(1..1 + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            UpdateError::device_fault(dev.to_string(), format!("device id length {len}"))
        })?;

    let (vendor, revision) = match len {
        IFX_ID_LEN => (Vendor::Infineon, None),
        TI_ID_LEN => (Vendor::Ti, None),
        _ => {
            let rev = dev.read(ctx, &[REG_IC_DEVICE_REV], 4)?;
            (Vendor::Isl, Some(IslRevision::from_raw(byte_at(&rev, 3)?)))
        }
    };
    info!(%dev, %vendor, device_id = %hex::encode(&device_id), ?revision, "regulator probed");
    Ok(VrIdentity {
        vendor,
        device_id,
        revision,
    })
}

fn mismatch(ctx: &ProgramContext<'_, '_>, expected: String, actual: String) -> Result<()> {
    let err = UpdateError::DeviceMismatch {
        device: ctx.component(),
        expected,
        actual,
    };
    if ctx.force() {
        warn!(error = %err, "ignored with force");
        return Ok(());
    }
    Err(err)
}

/// Compare the image's declared identity with the probed device.
///
/// Covers slave address, device id and silicon revision. With `force` a
/// mismatch is logged and programming goes ahead.
///
/// # Errors
///
/// [`UpdateError::DeviceMismatch`] without `force`.
pub fn check_identity(
    ctx: &ProgramContext<'_, '_>,
    dev: I2cDevice,
    image: &FirmwareImage,
    identity: &VrIdentity,
) -> Result<()> {
    if image.address() != 0 && image.address() != dev.addr() {
        mismatch(
            ctx,
            format!("addr {:#04x}", image.address()),
            format!("addr {:#04x}", dev.addr()),
        )?;
    }
    if let Some(expected) = image.device_id()
        && expected != identity.device_id.as_slice()
    {
        mismatch(
            ctx,
            format!("id {}", hex::encode(expected)),
            format!("id {}", hex::encode(&identity.device_id)),
        )?;
    }
    if let ImageMetadata::Isl {
        revision: Some(expected),
    } = image.metadata()
        && identity.revision.is_some_and(|actual| actual != *expected)
    {
        mismatch(
            ctx,
            format!("revision {expected:?}"),
            format!("revision {:?}", identity.revision),
        )?;
    }
    Ok(())
}

/// Refuse to write a part that is out of, or nearly out of, NVM writes.
///
/// Zero is fatal even with `force`. At or below the configured warning
/// threshold the update needs `force`.
///
/// # Errors
///
/// [`UpdateError::RemainingWritesExhausted`] or
/// [`UpdateError::InsufficientRemainingWrites`].
pub fn check_remaining_writes(ctx: &ProgramContext<'_, '_>, remaining: u32) -> Result<()> {
    let device = ctx.component();
    info!(%device, remaining, "remaining writes");
    if remaining == 0 {
        return Err(UpdateError::remaining_writes_exhausted(device));
    }
    let threshold = ctx.config().remaining_writes_warning;
    if remaining <= threshold {
        if !ctx.force() {
            return Err(UpdateError::InsufficientRemainingWrites {
                device,
                remaining,
                threshold,
            });
        }
        warn!(%device, remaining, threshold, "remaining writes below threshold, forced");
    }
    Ok(())
}
