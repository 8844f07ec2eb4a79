//! Log codec: primitive byte/word/dword/qword/array encoding over a
//! seekable byte stream.
//!
//! Grounded on `replay-internal.c`'s `replay_put_*`/`replay_get_*`
//! family. The source writes host-native byte order and a host
//! `size_t` length prefix (DESIGN NOTES section 9 calls this out as
//! the accepted, non-portable limitation of the original format).
//! This port commits to one explicit encoding instead: little-endian
//! integers, a fixed `u64` length prefix for arrays.
//!
//! Truncation is reported as a plain `io::Error` (`UnexpectedEof`);
//! callers that have step context (the framer, the controller) wrap
//! it into [`crate::error::ReplayError::TruncatedLog`].

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Wraps a seekable stream with the primitive put/get operations.
pub struct Codec<S> {
    stream: S,
}

impl<S> Codec<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Seek> Codec<S> {
    /// Current byte offset in the underlying stream.
    pub fn position(&mut self) -> io::Result<u64> {
        self.stream.stream_position()
    }

    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.stream.seek(SeekFrom::Start(pos))
    }

    pub fn seek_end(&mut self) -> io::Result<u64> {
        self.stream.seek(SeekFrom::End(0))
    }
}

impl<S: Write> Codec<S> {
    pub fn put_byte(&mut self, v: u8) -> io::Result<()> {
        self.stream.write_all(&[v])
    }

    pub fn put_word(&mut self, v: u16) -> io::Result<()> {
        self.stream.write_all(&v.to_le_bytes())
    }

    pub fn put_dword(&mut self, v: u32) -> io::Result<()> {
        self.stream.write_all(&v.to_le_bytes())
    }

    pub fn put_qword(&mut self, v: i64) -> io::Result<()> {
        self.stream.write_all(&v.to_le_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> io::Result<()> {
        self.stream.write_all(&v.to_le_bytes())
    }

    pub fn put_array(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(&(buf.len() as u64).to_le_bytes())?;
        self.stream.write_all(buf)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<S: Read> Codec<S> {
    pub fn get_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.stream.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn get_word(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.stream.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn get_dword(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn get_qword(&mut self) -> io::Result<i64> {
        let mut buf = [0u8; 8];
        self.stream.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn get_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Reads a size-prefixed blob into a freshly allocated buffer.
    pub fn get_array_alloc(&mut self) -> io::Result<Vec<u8>> {
        let mut len_buf = [0u8; 8];
        self.stream.read_exact(&mut len_buf)?;
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_codec() -> Codec<Cursor<Vec<u8>>> {
        Codec::new(Cursor::new(Vec::new()))
    }

    #[test]
    fn byte_word_dword_qword_roundtrip() {
        let mut c = roundtrip_codec();
        c.put_byte(0xAB).unwrap();
        c.put_word(0x1234).unwrap();
        c.put_dword(0xDEAD_BEEF).unwrap();
        c.put_qword(-42).unwrap();
        c.seek(0).unwrap();

        assert_eq!(c.get_byte().unwrap(), 0xAB);
        assert_eq!(c.get_word().unwrap(), 0x1234);
        assert_eq!(c.get_dword().unwrap(), 0xDEAD_BEEF);
        assert_eq!(c.get_qword().unwrap(), -42);
    }

    #[test]
    fn array_roundtrip_preserves_length_and_bytes() {
        let mut c = roundtrip_codec();
        let payload = vec![1u8, 2, 3, 4, 5, 6, 7];
        c.put_array(&payload).unwrap();
        c.seek(0).unwrap();

        let back = c.get_array_alloc().unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn empty_array_roundtrips() {
        let mut c = roundtrip_codec();
        c.put_array(&[]).unwrap();
        c.seek(0).unwrap();
        assert_eq!(c.get_array_alloc().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn short_read_is_an_error() {
        let mut c = roundtrip_codec();
        c.put_byte(1).unwrap();
        c.seek(0).unwrap();
        assert!(c.get_qword().is_err());
    }
}
