//! Bounds-checked readers over image bytes and text lines.
//!
//! Every read either returns the requested value or an [`ImageError`]; no
//! reader ever yields a partial value or reads past the end of its input.

use bmcfw_errors::{ImageError, ImageResult};

/// Forward-only reader over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Start reading at offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Move to an absolute offset. Seeking to the end is allowed.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if `offset` is past the end.
    pub fn seek(&mut self, offset: usize) -> ImageResult<()> {
        if offset > self.data.len() {
            return Err(ImageError::Truncated {
                offset,
                needed: 0,
                available: 0,
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Read `len` bytes.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> ImageResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(ImageError::Truncated {
            offset: self.pos,
            needed: len,
            available: self.remaining(),
        })?;
        let bytes = self.data.get(self.pos..end).ok_or(ImageError::Truncated {
            offset: self.pos,
            needed: len,
            available: self.remaining(),
        })?;
        self.pos = end;
        Ok(bytes)
    }

    /// Read a fixed-size array.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than `N` bytes remain.
    pub fn read_array<const N: usize>(&mut self) -> ImageResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Skip `len` bytes.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than `len` bytes remain.
    pub fn skip(&mut self, len: usize) -> ImageResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] at end of input.
    pub fn read_u8(&mut self) -> ImageResult<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than 2 bytes remain.
    pub fn read_u16_le(&mut self) -> ImageResult<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than 4 bytes remain.
    pub fn read_u32_le(&mut self) -> ImageResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Truncated`] if fewer than 4 bytes remain.
    pub fn read_u32_be(&mut self) -> ImageResult<u32> {
        self.read_array().map(u32::from_be_bytes)
    }
}

/// Parse the two hex digits starting at character `pos` of `line`.
///
/// `line_no` is only used to label the error.
///
/// # Errors
///
/// [`ImageError::Syntax`] if the line is too short or the digits are not hex.
pub fn hex_byte_at(line: &str, pos: usize, line_no: usize) -> ImageResult<u8> {
    let digits = pos
        .checked_add(2)
        .and_then(|end| line.get(pos..end))
        .ok_or_else(|| {
            ImageError::syntax(line_no, format!("line too short for byte at column {pos}"))
        })?;
    u8::from_str_radix(digits, 16)
        .map_err(|e| ImageError::syntax(line_no, format!("bad hex byte {digits:?}: {e}")))
}

/// Parse a hex number, with or without a `0x` prefix.
///
/// # Errors
///
/// [`ImageError::Syntax`] if `token` is not a hex number that fits in `u32`.
pub fn parse_hex_u32(token: &str, line_no: usize) -> ImageResult<u32> {
    let digits = token
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .map_err(|e| ImageError::syntax(line_no, format!("bad hex value {token:?}: {e}")))
}

/// Decode a run of hex digit pairs into bytes.
///
/// # Errors
///
/// [`ImageError::Syntax`] on an odd digit count or a non-hex digit.
pub fn decode_hex(digits: &str, line_no: usize) -> ImageResult<Vec<u8>> {
    hex::decode(digits.trim())
        .map_err(|e| ImageError::syntax(line_no, format!("bad hex data: {e}")))
}
