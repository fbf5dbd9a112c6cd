//! Parsed firmware image model.

use core::fmt;

use serde::Serialize;

use crate::parser::altera::AlteraSignature;
use crate::parser::pcie::SubImageKind;

/// Device family an image targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    /// Renesas/Intersil digital multiphase VR
    Isl,
    /// Infineon PXE VR programmed from an E1110C register dump
    Pxe,
    /// Texas Instruments TPS VR
    Ti,
    /// Infineon XDPE VR
    Infineon,
    /// Lattice MachXO2/XO3 CPLD
    Lattice,
    /// Intel/Altera MAX10 CPLD
    Altera,
    /// Microchip PCIe switch
    PcieSwitch,
    /// Host BIOS SPI flash
    Bios,
}

impl Vendor {
    /// Check if the device keeps its firmware in wear-limited NVM.
    pub fn is_wear_limited(&self) -> bool {
        matches!(self, Vendor::Isl | Vendor::Pxe | Vendor::Ti | Vendor::Infineon)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Isl => write!(f, "ISL"),
            Vendor::Pxe => write!(f, "PXE"),
            Vendor::Ti => write!(f, "TI"),
            Vendor::Infineon => write!(f, "Infineon"),
            Vendor::Lattice => write!(f, "Lattice"),
            Vendor::Altera => write!(f, "Altera"),
            Vendor::PcieSwitch => write!(f, "PCIe switch"),
            Vendor::Bios => write!(f, "BIOS"),
        }
    }
}

/// Checksum the device must report once the image is programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedChecksum {
    /// No whole-image checksum; integrity is per block or per record
    None,
    /// MSB-first CRC-32
    Crc32(u32),
    /// CRC-16/0x8005
    Crc16(u16),
    /// 32-bit additive sum of the payload bytes
    Sum32(u32),
    /// Lattice JEDEC fuse checksum
    Jedec(u16),
    /// SHA-256 of the whole payload
    Sha256([u8; 32]),
}

impl ExpectedChecksum {
    /// Value widened to 32 bits, when the checksum has a numeric form.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            ExpectedChecksum::Crc32(v) | ExpectedChecksum::Sum32(v) => Some(v),
            ExpectedChecksum::Crc16(v) | ExpectedChecksum::Jedec(v) => Some(u32::from(v)),
            ExpectedChecksum::None | ExpectedChecksum::Sha256(_) => None,
        }
    }
}

impl fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedChecksum::None => write!(f, "none"),
            ExpectedChecksum::Crc32(v) => write!(f, "crc32:{v:08X}"),
            ExpectedChecksum::Crc16(v) => write!(f, "crc16:{v:04X}"),
            ExpectedChecksum::Sum32(v) => write!(f, "sum32:{v:08X}"),
            ExpectedChecksum::Jedec(v) => write!(f, "jedec:{v:04X}"),
            ExpectedChecksum::Sha256(d) => write!(f, "sha256:{}", hex::encode(d)),
        }
    }
}

/// One device write in the order it appeared in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramRecord {
    index: usize,
    command: u8,
    payload: Vec<u8>,
}

impl ProgramRecord {
    /// Create a record.
    pub fn new(index: usize, command: u8, payload: Vec<u8>) -> Self {
        Self {
            index,
            command,
            payload,
        }
    }

    /// Position in the parsed sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Command code or register.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Bytes following the command.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `[command, payload...]`, the bytes placed on the bus.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 1);
        out.push(self.command);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// ISL silicon revision class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IslRevision {
    /// Revision byte 0..=5
    RevD,
    /// Revision byte 6 and later
    RevF,
}

impl IslRevision {
    /// Classify a raw revision byte.
    pub fn from_raw(raw: u8) -> Self {
        if raw <= 5 { IslRevision::RevD } else { IslRevision::RevF }
    }
}

/// Vendor-specific fields that do not fit the common model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMetadata {
    /// Nothing beyond the common fields
    None,
    /// ISL image
    Isl {
        /// Silicon revision class, if the image declares one
        revision: Option<IslRevision>,
    },
    /// Lattice JEDEC file
    Lattice {
        /// Fuse count from the `QF` field
        fuse_count: u64,
        /// User code programmed after the CF rows
        usercode: u32,
        /// Feature row bits
        feature_row: u64,
        /// FEA row bits
        fear: u32,
        /// Number of UFM rows present
        ufm_rows: usize,
    },
    /// Altera RPD file
    Altera {
        /// Trailing signature of a signed image
        signature: Option<AlteraSignature>,
    },
    /// PCIe switch sub-image
    Pcie {
        /// Sub-image kind
        kind: SubImageKind,
    },
}

/// An immutable, validated firmware image.
///
/// Record-based formats (VR dumps, Lattice rows) fill [`records`](Self::records);
/// stream formats (Altera, PCIe switch, BIOS) fill [`payload`](Self::payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    vendor: Vendor,
    raw: Vec<u8>,
    records: Vec<ProgramRecord>,
    payload: Vec<u8>,
    expected: ExpectedChecksum,
    device_id: Option<Vec<u8>>,
    address: u8,
    metadata: ImageMetadata,
}

impl FirmwareImage {
    pub(crate) fn builder(vendor: Vendor, raw: &[u8]) -> FirmwareImageBuilder {
        FirmwareImageBuilder {
            image: FirmwareImage {
                vendor,
                raw: raw.to_vec(),
                records: Vec::new(),
                payload: Vec::new(),
                expected: ExpectedChecksum::None,
                device_id: None,
                address: 0,
                metadata: ImageMetadata::None,
            },
        }
    }

    /// Target device family.
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// File bytes the image was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Ordered device writes.
    pub fn records(&self) -> &[ProgramRecord] {
        &self.records
    }

    /// Byte stream for stream formats.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum the device must report after programming.
    pub fn expected_checksum(&self) -> ExpectedChecksum {
        self.expected
    }

    /// Device identity the image was built for.
    pub fn device_id(&self) -> Option<&[u8]> {
        self.device_id.as_deref()
    }

    /// 8-bit slave address, 0 when the target is addressed in-band.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Vendor-specific fields.
    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    /// Amount of work units for progress: records, or payload bytes.
    pub fn work_units(&self) -> usize {
        if self.records.is_empty() {
            self.payload.len()
        } else {
            self.records.len()
        }
    }

    /// Serializable overview for inspection tools.
    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            vendor: self.vendor,
            file_size: self.raw.len(),
            records: self.records.len(),
            payload_size: self.payload.len(),
            checksum: self.expected.to_string(),
            device_id: self.device_id.as_deref().map(hex::encode),
            address: self.address,
            metadata: self.metadata.clone(),
        }
    }
}

/// Summary of a parsed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    /// Target device family
    pub vendor: Vendor,
    /// Source size in bytes
    pub file_size: usize,
    /// Record count
    pub records: usize,
    /// Stream payload size in bytes
    pub payload_size: usize,
    /// Expected checksum, formatted
    pub checksum: String,
    /// Device id, hex
    pub device_id: Option<String>,
    /// 8-bit slave address
    pub address: u8,
    /// Vendor-specific fields
    pub metadata: ImageMetadata,
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vendor:   {}", self.vendor)?;
        writeln!(f, "size:     {} bytes", self.file_size)?;
        if self.records > 0 {
            writeln!(f, "records:  {}", self.records)?;
        }
        if self.payload_size > 0 {
            writeln!(f, "payload:  {} bytes", self.payload_size)?;
        }
        if self.address != 0 {
            writeln!(f, "address:  {:#04x}", self.address)?;
        }
        if let Some(id) = &self.device_id {
            writeln!(f, "device:   {id}")?;
        }
        write!(f, "checksum: {}", self.checksum)
    }
}

pub(crate) struct FirmwareImageBuilder {
    image: FirmwareImage,
}

impl FirmwareImageBuilder {
    #[must_use]
    pub(crate) fn records(mut self, records: Vec<ProgramRecord>) -> Self {
        self.image.records = records;
        self
    }

    #[must_use]
    pub(crate) fn payload(mut self, payload: Vec<u8>) -> Self {
        self.image.payload = payload;
        self
    }

    #[must_use]
    pub(crate) fn expected(mut self, expected: ExpectedChecksum) -> Self {
        self.image.expected = expected;
        self
    }

    #[must_use]
    pub(crate) fn device_id(mut self, id: Vec<u8>) -> Self {
        self.image.device_id = Some(id);
        self
    }

    #[must_use]
    pub(crate) fn address(mut self, address: u8) -> Self {
        self.image.address = address;
        self
    }

    #[must_use]
    pub(crate) fn metadata(mut self, metadata: ImageMetadata) -> Self {
        self.image.metadata = metadata;
        self
    }

    pub(crate) fn build(self) -> FirmwareImage {
        self.image
    }
}
