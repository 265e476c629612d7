//! Big-endian reader and writer for class file structures
//!
//! Every multi-byte quantity in a class file is stored high byte first.

use crate::error::{ClassFormatError, ClassResult};

/// Cursor over a borrowed byte slice
pub struct ClassReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ClassReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether any bytes remain
    pub fn has_more(&self) -> bool {
        self.position < self.data.len()
    }

    /// Read `len` bytes as a borrowed slice
    pub fn read_bytes(&mut self, len: usize) -> ClassResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::UnexpectedEnd(self.position))?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Skip `len` bytes
    pub fn skip(&mut self, len: usize) -> ClassResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> ClassResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> ClassResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a big-endian `u16`
    pub fn read_u16(&mut self) -> ClassResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian `i16`
    pub fn read_i16(&mut self) -> ClassResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Read a big-endian `u32`
    pub fn read_u32(&mut self) -> ClassResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian `i32`
    pub fn read_i32(&mut self) -> ClassResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a big-endian `u64`
    pub fn read_u64(&mut self) -> ClassResult<u64> {
        let high = self.read_u32()? as u64;
        let low = self.read_u32()? as u64;
        Ok((high << 32) | low)
    }
}

/// Growable big-endian output buffer
#[derive(Debug, Default)]
pub struct ClassWriter {
    buffer: Vec<u8>,
}

impl ClassWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a writer with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Write one byte
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a signed byte
    pub fn write_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Write a big-endian `u16`
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `i16`
    pub fn write_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `u32`
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `i32`
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `u64`
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrite a previously written `u16`
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Overwrite a previously written `u32`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_roundtrip() {
        let mut writer = ClassWriter::new();
        writer.write_u16(0xCAFE);
        writer.write_i32(-2);
        writer.write_u64(0x0102_0304_0506_0708);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..2], &[0xCA, 0xFE]);

        let mut reader = ClassReader::new(&bytes);
        assert_eq!(reader.read_u16().unwrap(), 0xCAFE);
        assert_eq!(reader.read_i32().unwrap(), -2);
        assert_eq!(reader.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_unexpected_end() {
        let mut reader = ClassReader::new(&[0x01]);
        assert_eq!(reader.read_u16(), Err(ClassFormatError::UnexpectedEnd(0)));
    }

    #[test]
    fn test_patch() {
        let mut writer = ClassWriter::new();
        writer.write_u32(0);
        writer.patch_u32(0, 7);
        assert_eq!(writer.buffer(), &[0, 0, 0, 7]);
    }
}
