//! Fixed-size chunking of image payloads.
//!
//! Offsets are contiguous and strictly increasing, and the valid bytes of all
//! chunks add up to the payload length. When padding is enabled the final
//! short chunk is filled with [`PAD_BYTE`] up to the chunk size on the wire.

use std::borrow::Cow;

use bmcfw_errors::{ImageError, ImageResult};

/// USB bulk data payload to the PCIe switch.
pub const USB_BLOCK: usize = 1008;
/// IPMB-relayed data payload.
pub const IPMB_CHUNK: usize = 224;
/// BIOS SPI block.
pub const BIOS_BLOCK: usize = 64 * 1024;
/// MAX10 CFM write.
pub const ALTERA_CHUNK: usize = 128;
/// Erased-flash fill byte.
pub const PAD_BYTE: u8 = 0xFF;

/// One slice of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    index: usize,
    offset: usize,
    data: &'a [u8],
    wire_len: usize,
    last: bool,
}

impl<'a> Chunk<'a> {
    /// Position in the chunk sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Payload offset of the first byte.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload bytes, without padding.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of payload bytes.
    pub fn valid_len(&self) -> usize {
        self.data.len()
    }

    /// Offset one past the last payload byte.
    pub fn end(&self) -> usize {
        self.offset + self.data.len()
    }

    /// Final chunk of the payload.
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Bytes to transmit, padded when the chunker pads.
    pub fn wire_bytes(&self) -> Cow<'a, [u8]> {
        if self.wire_len <= self.data.len() {
            return Cow::Borrowed(self.data);
        }
        let mut padded = Vec::with_capacity(self.wire_len);
        padded.extend_from_slice(self.data);
        padded.resize(self.wire_len, PAD_BYTE);
        Cow::Owned(padded)
    }
}

/// Splits payloads into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    pad: bool,
}

impl Chunker {
    /// USB transfers to the PCIe switch, padded.
    pub const USB: Chunker = Chunker {
        size: USB_BLOCK,
        pad: true,
    };
    /// IPMB relay transfers, unpadded.
    pub const IPMB: Chunker = Chunker {
        size: IPMB_CHUNK,
        pad: false,
    };
    /// BIOS blocks, padded.
    pub const BIOS: Chunker = Chunker {
        size: BIOS_BLOCK,
        pad: true,
    };
    /// MAX10 writes, unpadded.
    pub const ALTERA: Chunker = Chunker {
        size: ALTERA_CHUNK,
        pad: false,
    };

    /// Unpadded chunker of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`ImageError::InvalidSize`] when `size` is zero.
    pub fn new(size: usize) -> ImageResult<Self> {
        if size == 0 {
            return Err(ImageError::invalid_size(0, "a nonzero chunk size"));
        }
        Ok(Self { size, pad: false })
    }

    /// Same chunk size, padding the final chunk.
    #[must_use]
    pub fn padded(self) -> Self {
        Self { pad: true, ..self }
    }

    /// Chunk size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the final chunk is padded.
    pub fn pads(&self) -> bool {
        self.pad
    }

    /// Number of chunks for a payload of `len` bytes.
    pub fn count(&self, len: usize) -> usize {
        len.div_ceil(self.size)
    }

    /// Iterate the chunks of `payload`.
    pub fn chunks<'a>(&self, payload: &'a [u8]) -> Chunks<'a> {
        Chunks {
            inner: payload.chunks(self.size),
            total: self.count(payload.len()),
            size: self.size,
            pad: self.pad,
            index: 0,
            offset: 0,
        }
    }
}

/// Iterator returned by [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    inner: core::slice::Chunks<'a, u8>,
    total: usize,
    size: usize,
    pad: bool,
    index: usize,
    offset: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.inner.next()?;
        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            data,
            wire_len: if self.pad { self.size } else { data.len() },
            last: self.index + 1 == self.total,
        };
        self.index += 1;
        self.offset += data.len();
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}
