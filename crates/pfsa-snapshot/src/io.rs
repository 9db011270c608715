//! Little-endian primitives shared by every section codec.

use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};

/// Longest string the decoder accepts (workload identifiers are short).
const MAX_STRING_LEN: usize = 64 * 1024;

fn emit<W: Write + ?Sized, const N: usize>(w: &mut W, bytes: [u8; N]) -> Result<()> {
    w.write_all(&bytes)?;
    Ok(())
}

fn fill<R: Read + ?Sized, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub trait WireWrite: Write {
    fn put_u8(&mut self, v: u8) -> Result<()> {
        emit(self, [v])
    }

    fn put_u16(&mut self, v: u16) -> Result<()> {
        emit(self, v.to_le_bytes())
    }

    fn put_u32(&mut self, v: u32) -> Result<()> {
        emit(self, v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> Result<()> {
        emit(self, v.to_le_bytes())
    }

    /// `u32` byte length followed by the UTF-8 bytes.
    fn put_str(&mut self, s: &str) -> Result<()> {
        let len = u32::try_from(s.len()).map_err(|_| SnapshotError::TooLarge("string"))?;
        self.put_u32(len)?;
        self.write_all(s.as_bytes())?;
        Ok(())
    }
}

impl<T: Write + ?Sized> WireWrite for T {}

pub trait WireRead: Read {
    fn get_u8(&mut self) -> Result<u8> {
        let [b] = fill(self)?;
        Ok(b)
    }

    fn get_u16(&mut self) -> Result<u16> {
        fill(self).map(u16::from_le_bytes)
    }

    fn get_u32(&mut self) -> Result<u32> {
        fill(self).map(u32::from_le_bytes)
    }

    fn get_u64(&mut self) -> Result<u64> {
        fill(self).map(u64::from_le_bytes)
    }

    /// Reads `len` bytes, reporting allocation failure instead of aborting.
    fn get_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| SnapshotError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn get_str(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(SnapshotError::TooLarge("string"));
        }
        Ok(String::from_utf8(self.get_vec(len)?)?)
    }
}

impl<T: Read + ?Sized> WireRead for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn huge_allocation_is_an_error() {
        let err = Cursor::new(Vec::new()).get_vec(usize::MAX).unwrap_err();
        assert!(matches!(err, SnapshotError::OutOfMemory { .. }));
    }

    #[test]
    fn long_string_is_rejected_before_reading() {
        let mut cursor = Cursor::new(u32::MAX.to_le_bytes().to_vec());
        assert!(matches!(
            cursor.get_str(),
            Err(SnapshotError::TooLarge("string"))
        ));
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        buf.put_u16(0x0102).unwrap();
        buf.put_u64(0x0a0b_0c0d_0e0f_1011).unwrap();
        assert_eq!(&buf[..2], &[0x02, 0x01]);
        let mut r = Cursor::new(buf);
        assert_eq!(r.get_u16().unwrap(), 0x0102);
        assert_eq!(r.get_u64().unwrap(), 0x0a0b_0c0d_0e0f_1011);
    }
}
