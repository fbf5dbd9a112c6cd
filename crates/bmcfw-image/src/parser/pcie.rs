//! Microchip PCIe switch firmware.
//!
//! Input arrives in one of three shapes:
//!
//! - a single sub-image file (bootloader, partition map, config, main ...)
//! - a directory holding several sub-image files
//! - an 8 MiB flash blob with sub-images at fixed offsets
//!
//! Every sub-image carries its type byte at [`TYPE_OFFSET`]. Sub-images
//! inside a blob additionally start with [`MAGIC`] and record their header
//! and data lengths as big-endian words at `0x20` and `0x24`.

use core::fmt;
use std::path::Path;

use bmcfw_errors::{ImageError, ImageResult};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cursor::ByteCursor;
use crate::image::{FirmwareImage, ImageMetadata, Vendor};
use crate::parser::{ImageFormat, ImageParser};

/// Offset of the sub-image type byte.
pub const TYPE_OFFSET: usize = 0x1C;
/// Smallest plausible sub-image file.
pub const MIN_FILE_SIZE: usize = 1024;
/// Size of a full flash blob.
pub const BLOB_SIZE: usize = 8 * 1024 * 1024;
/// Signature at the start of every sub-image inside a blob.
pub const MAGIC: [u8; 8] = *b"PSWFWIMG";
const HEADER_LEN_OFFSET: usize = 0x20;
const DATA_LEN_OFFSET: usize = 0x24;
const RECOVERY_NAME_TAG: &str = "rcvry";

/// Sub-image kind. The discriminant is the bit used in activation masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubImageKind {
    /// Recovery bootloader
    Rcvry = 0,
    /// Partition map; applying it invalidates every other partition
    PartMap = 1,
    /// Second-stage bootloader
    Bl2 = 2,
    /// Configuration
    Cfg = 3,
    /// Main firmware
    Main = 4,
    /// Key manager
    KeyMgr = 5,
    /// Bootloader initialisation step (status only, never flashed)
    InitBl = 6,
}

impl SubImageKind {
    /// Order in which sub-images are written during recovery.
    pub const FLASH_ORDER: [SubImageKind; 6] = [
        SubImageKind::Rcvry,
        SubImageKind::PartMap,
        SubImageKind::KeyMgr,
        SubImageKind::Bl2,
        SubImageKind::Cfg,
        SubImageKind::Main,
    ];

    /// Decode the on-image type byte.
    ///
    /// Bootloader images share type 2; `recovery` selects the recovery
    /// variant, which is only distinguishable by name or blob position.
    pub fn from_type_byte(raw: u8, recovery: bool) -> Option<Self> {
        match raw {
            0 => Some(SubImageKind::PartMap),
            2 if recovery => Some(SubImageKind::Rcvry),
            2 => Some(SubImageKind::Bl2),
            3 => Some(SubImageKind::Cfg),
            4 => Some(SubImageKind::Main),
            5 => Some(SubImageKind::KeyMgr),
            6 => Some(SubImageKind::InitBl),
            _ => None,
        }
    }

    /// Activation mask bit.
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            SubImageKind::Rcvry => "RCVRY",
            SubImageKind::PartMap => "PARTMAP",
            SubImageKind::Bl2 => "BOOTLOADER2",
            SubImageKind::Cfg => "CFG",
            SubImageKind::Main => "MAIN FW",
            SubImageKind::KeyMgr => "KEYMGR",
            SubImageKind::InitBl => "INIT_BL",
        }
    }
}

impl fmt::Display for SubImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where each sub-image lives inside a blob.
pub const BLOB_REGIONS: [(SubImageKind, usize); 6] = [
    (SubImageKind::Bl2, 0x0000_0000),
    (SubImageKind::Rcvry, 0x0002_0000),
    (SubImageKind::PartMap, 0x0004_0000),
    (SubImageKind::KeyMgr, 0x0006_0000),
    (SubImageKind::Cfg, 0x0008_0000),
    (SubImageKind::Main, 0x0010_0000),
];

fn sub_image(kind: SubImageKind, bytes: &[u8], raw: &[u8]) -> FirmwareImage {
    FirmwareImage::builder(Vendor::PcieSwitch, raw)
        .payload(bytes.to_vec())
        .metadata(ImageMetadata::Pcie { kind })
        .build()
}

/// Kind recorded in a parsed sub-image.
pub fn kind_of(image: &FirmwareImage) -> Option<SubImageKind> {
    match image.metadata() {
        ImageMetadata::Pcie { kind } => Some(*kind),
        _ => None,
    }
}

/// Parser for PCIe switch images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcieParser;

impl PcieParser {
    /// Parse one sub-image file; `name` disambiguates recovery bootloaders.
    ///
    /// # Errors
    ///
    /// [`ImageError::InvalidSize`] below [`MIN_FILE_SIZE`],
    /// [`ImageError::Unsupported`] for an unknown type byte.
    pub fn parse_named(&self, name: &str, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        if bytes.len() < MIN_FILE_SIZE {
            return Err(ImageError::invalid_size(
                bytes.len(),
                format!("at least {MIN_FILE_SIZE} bytes"),
            ));
        }
        let mut cursor = ByteCursor::new(bytes);
        cursor.seek(TYPE_OFFSET)?;
        let raw = cursor.read_u8()?;
        let recovery = name.to_ascii_lowercase().contains(RECOVERY_NAME_TAG);
        let kind = SubImageKind::from_type_byte(raw, recovery)
            .filter(|k| *k != SubImageKind::InitBl)
            .ok_or_else(|| ImageError::unsupported(format!("sub-image type {raw:#04x}")))?;
        if kind == SubImageKind::PartMap {
            warn!("partition map image invalidates every other image on the switch");
        }
        Ok(sub_image(kind, bytes, bytes))
    }

    /// Split a flash blob into its present sub-images, in blob order.
    ///
    /// A region whose signature is erased flash (`0xFF`) is absent.
    ///
    /// # Errors
    ///
    /// [`ImageError::BadMagic`] for a region with a foreign signature,
    /// [`ImageError::Truncated`] when a sub-image overruns its region.
    pub fn parse_blob(&self, bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        if bytes.len() != BLOB_SIZE {
            return Err(ImageError::invalid_size(bytes.len(), format!("{BLOB_SIZE} bytes")));
        }

        let mut images = Vec::new();
        for (i, &(kind, offset)) in BLOB_REGIONS.iter().enumerate() {
            let end = BLOB_REGIONS
                .iter()
                .map(|&(_, o)| o)
                .filter(|&o| o > offset)
                .min()
                .unwrap_or(BLOB_SIZE);
            let region = bytes.get(offset..end).ok_or(ImageError::Truncated {
                offset,
                needed: end.saturating_sub(offset),
                available: bytes.len().saturating_sub(offset),
            })?;

            let mut cursor = ByteCursor::new(region);
            let magic: [u8; 8] = cursor.read_array()?;
            if magic.iter().all(|&b| b == 0xFF) {
                debug!(region = i, %kind, "region erased");
                continue;
            }
            if magic != MAGIC {
                return Err(ImageError::BadMagic { offset });
            }

            cursor.seek(TYPE_OFFSET)?;
            let raw = cursor.read_u8()?;
            if SubImageKind::from_type_byte(raw, kind == SubImageKind::Rcvry) != Some(kind) {
                return Err(ImageError::unsupported(format!(
                    "region at {offset:#x} holds type {raw:#04x}, expected {kind}"
                )));
            }
            cursor.seek(HEADER_LEN_OFFSET)?;
            let header_len = cursor.read_u32_be()?;
            cursor.seek(DATA_LEN_OFFSET)?;
            let data_len = cursor.read_u32_be()?;
            let size = usize::try_from(u64::from(header_len) + u64::from(data_len))
                .unwrap_or(usize::MAX);

            cursor.seek(0)?;
            let body = cursor.read_bytes(size).map_err(|_| ImageError::Truncated {
                offset,
                needed: size,
                available: region.len(),
            })?;
            debug!(%kind, offset, size, "blob sub-image");
            images.push(sub_image(kind, body, bytes));
        }

        if images.is_empty() {
            return Err(ImageError::MissingField("sub-image"));
        }
        Ok(images)
    }

    fn looks_like_blob(bytes: &[u8]) -> bool {
        bytes.len() == BLOB_SIZE
            && BLOB_REGIONS
                .iter()
                .any(|&(_, o)| bytes.get(o..o + MAGIC.len()) == Some(&MAGIC[..]))
    }
}

impl ImageParser for PcieParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Pcie
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        self.parse_named("", bytes)
    }

    fn parse_all(&self, bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        if Self::looks_like_blob(bytes) {
            self.parse_blob(bytes)
        } else {
            self.parse(bytes).map(|image| vec![image])
        }
    }
}

/// Set of sub-images for one switch update, in flash order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcieBundle {
    images: Vec<(SubImageKind, FirmwareImage)>,
}

impl PcieBundle {
    fn from_images(images: impl IntoIterator<Item = FirmwareImage>) -> ImageResult<Self> {
        let mut by_kind: Vec<(SubImageKind, FirmwareImage)> = Vec::new();
        for image in images {
            let Some(kind) = kind_of(&image) else {
                continue;
            };
            if let Some(slot) = by_kind.iter_mut().find(|(k, _)| *k == kind) {
                warn!(%kind, "duplicate sub-image, keeping the later one");
                slot.1 = image;
            } else {
                by_kind.push((kind, image));
            }
        }
        if by_kind.is_empty() {
            return Err(ImageError::MissingField("sub-image"));
        }
        by_kind.sort_by_key(|(kind, _)| {
            SubImageKind::FLASH_ORDER
                .iter()
                .position(|k| k == kind)
                .unwrap_or(usize::MAX)
        });
        Ok(Self { images: by_kind })
    }

    /// Bundle every sub-image of a flash blob.
    ///
    /// # Errors
    ///
    /// As [`PcieParser::parse_blob`].
    pub fn from_blob(bytes: &[u8]) -> ImageResult<Self> {
        Self::from_images(PcieParser.parse_blob(bytes)?)
    }

    /// Bundle a single file, which may itself be a blob.
    ///
    /// # Errors
    ///
    /// [`ImageError::Io`] or any parse error for the file.
    pub fn from_file(path: &Path) -> ImageResult<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(&name, &bytes)
    }

    /// Bundle the contents of a file called `name`, which may be a blob.
    ///
    /// # Errors
    ///
    /// Any parse error for the contents.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> ImageResult<Self> {
        if PcieParser::looks_like_blob(bytes) {
            return Self::from_blob(bytes);
        }
        Self::from_images([PcieParser.parse_named(name, bytes)?])
    }

    /// Bundle every valid sub-image file in `dir`, ignoring hidden entries.
    ///
    /// Files that are not sub-images are skipped; at least one must be valid.
    ///
    /// # Errors
    ///
    /// [`ImageError::Io`] if the directory cannot be read,
    /// [`ImageError::MissingField`] if it holds no sub-image.
    pub fn from_dir(dir: &Path) -> ImageResult<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut images = Vec::new();
        for path in paths {
            let bytes = std::fs::read(&path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match PcieParser.parse_named(&name, &bytes) {
                Ok(image) => {
                    debug!(file = %name, "found sub-image");
                    images.push(image);
                }
                Err(e) => debug!(file = %name, error = %e, "not a sub-image"),
            }
        }
        Self::from_images(images)
    }

    /// Bundle a file or a directory.
    ///
    /// # Errors
    ///
    /// As [`PcieBundle::from_dir`] or [`PcieBundle::from_file`].
    pub fn from_path(path: &Path) -> ImageResult<Self> {
        if path.is_dir() {
            Self::from_dir(path)
        } else {
            Self::from_file(path)
        }
    }

    /// Sub-images in flash order.
    pub fn images(&self) -> impl Iterator<Item = (SubImageKind, &FirmwareImage)> {
        self.images.iter().map(|(k, image)| (*k, image))
    }

    /// Sub-image of `kind`, if present.
    pub fn get(&self, kind: SubImageKind) -> Option<&FirmwareImage> {
        self.images.iter().find(|(k, _)| *k == kind).map(|(_, image)| image)
    }

    /// Kinds present, in flash order.
    pub fn kinds(&self) -> Vec<SubImageKind> {
        self.images.iter().map(|(k, _)| *k).collect()
    }

    /// Bit mask of the kinds present.
    pub fn mask(&self) -> u8 {
        self.images.iter().fold(0, |acc, (k, _)| acc | k.bit())
    }

    /// A bundle carrying a recovery bootloader runs the recovery sequence.
    pub fn is_recovery(&self) -> bool {
        self.get(SubImageKind::Rcvry).is_some()
    }

    /// Total payload bytes across all sub-images.
    pub fn total_len(&self) -> usize {
        self.images.iter().map(|(_, image)| image.payload().len()).sum()
    }
}
