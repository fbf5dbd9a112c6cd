//! `bmcfw inspect`: parse and validate an image offline
//!
//! Every format goes through the same parser the update engine uses, so an
//! image that inspects cleanly will pass the engine's pre-check. A PCIe
//! switch input may be a flash blob, a single sub-image or a directory of
//! sub-images.

use std::path::Path;

use anyhow::{Context, Result};
use bmcfw_errors::UpdateError;
use bmcfw_image::{ImageFormat, ImageSummary, PcieBundle, SubImageKind};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CliError;
use crate::output;

/// Inspection result for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    /// Format the input was parsed as
    pub format: ImageFormat,
    /// Input path
    pub file: String,
    /// One entry per image found in the input
    pub images: Vec<ImageEntry>,
    /// PCIe switch bundle details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleInfo>,
}

/// One parsed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    /// Sub-image kind, for PCIe switch inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SubImageKind>,
    /// Parsed fields
    pub summary: ImageSummary,
}

/// How the engine would apply a PCIe switch bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BundleInfo {
    /// Carries a recovery bootloader, so the recovery sequence runs
    pub recovery: bool,
    /// Activation mask of the sub-images present
    pub mask: u8,
    /// Payload bytes across all sub-images
    pub total_len: usize,
}

/// Parse `path` as `format`, guessing it from the name and content if absent.
///
/// # Errors
///
/// I/O failure, an undeterminable format, or any parse error.
pub fn inspect(path: &Path, format: Option<ImageFormat>) -> Result<InspectReport> {
    let file = path.display().to_string();

    if format == Some(ImageFormat::Pcie) || (format.is_none() && path.is_dir()) {
        let bundle = PcieBundle::from_path(path)
            .map_err(UpdateError::from)
            .with_context(|| format!("parsing PCIe switch image {file}"))?;
        return Ok(bundle_report(file, &bundle));
    }

    let bytes = std::fs::read(path).with_context(|| format!("reading {file}"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = match format.or_else(|| ImageFormat::guess(&name, &bytes)) {
        Some(f) => f,
        None => return Err(CliError::UnknownFormat(file).into()),
    };
    debug!(%format, size = bytes.len(), "parsing image");

    if format == ImageFormat::Pcie {
        let bundle = PcieBundle::from_bytes(&name, &bytes)
            .map_err(UpdateError::from)
            .with_context(|| format!("parsing PCIe switch image {file}"))?;
        return Ok(bundle_report(file, &bundle));
    }

    let images = format
        .parse_all(&bytes)
        .map_err(UpdateError::from)
        .with_context(|| format!("parsing {file} as {format}"))?;
    info!(%format, images = images.len(), "image is valid");

    Ok(InspectReport {
        format,
        file,
        images: images
            .iter()
            .map(|image| ImageEntry {
                kind: None,
                summary: image.summary(),
            })
            .collect(),
        bundle: None,
    })
}

fn bundle_report(file: String, bundle: &PcieBundle) -> InspectReport {
    info!(kinds = ?bundle.kinds(), recovery = bundle.is_recovery(), "PCIe switch image is valid");
    InspectReport {
        format: ImageFormat::Pcie,
        file,
        images: bundle
            .images()
            .map(|(kind, image)| ImageEntry {
                kind: Some(kind),
                summary: image.summary(),
            })
            .collect(),
        bundle: Some(BundleInfo {
            recovery: bundle.is_recovery(),
            mask: bundle.mask(),
            total_len: bundle.total_len(),
        }),
    }
}

/// Execute the inspect command.
pub fn execute(file: &Path, format: Option<ImageFormat>, json: bool) -> Result<()> {
    let report = inspect(file, format)?;
    output::print_inspect(&report, json)
}
