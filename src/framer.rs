//! Event framer: typed event tags and dispatch over the codec.
//!
//! Holds the "current data kind" peek/consume discipline described in
//! spec section 4.2, grounded on `replay_fetch_data_kind` /
//! `replay_has_unread_data` in `replay-internal.c`: `fetch_data_kind`
//! is idempotent while a tag is still unread, so a caller can look
//! ahead at the next event without committing to consume it.

use std::io::{Read, Seek, Write};

use crate::codec::Codec;
use crate::error::{ReplayError, Result};

pub struct Framer<S> {
    codec: Codec<S>,
    data_kind: Option<u8>,
}

impl<S> Framer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            codec: Codec::new(stream),
            data_kind: None,
        }
    }

    pub fn codec(&mut self) -> &mut Codec<S> {
        &mut self.codec
    }

    pub fn into_inner(self) -> S {
        self.codec.into_inner()
    }

    /// True while a tag has been peeked but not yet consumed.
    pub fn has_unread_data(&self) -> bool {
        self.data_kind.is_some()
    }

    /// The last peeked tag, if any, without reading from the stream.
    pub fn peeked_kind(&self) -> Option<u8> {
        self.data_kind
    }

    /// Marks the peeked tag as consumed; the next `fetch_data_kind`
    /// will read a fresh byte from the stream.
    pub fn consume(&mut self) {
        self.data_kind = None;
    }
}

impl<S: Read> Framer<S> {
    /// Reads the next tag into `data_kind`, unless one is already
    /// pending (idempotent while unread).
    pub fn fetch_data_kind(&mut self, step: u64) -> Result<u8> {
        if self.data_kind.is_none() {
            let byte = self.codec.get_byte().map_err(|e| truncated(e, step, 1))?;
            self.data_kind = Some(byte);
        }
        Ok(self.data_kind.unwrap())
    }
}

impl<S: Read + Seek> Framer<S> {
    /// Checks that the next data is the desired kind; consumes it on
    /// success. Grounded on `validate_data_kind`.
    pub fn validate_kind(&mut self, step: u64, expected: u8) -> Result<()> {
        let found = self.fetch_data_kind(step)?;
        if found != expected {
            return Err(ReplayError::UnexpectedKind {
                expected,
                found,
                step,
            });
        }
        self.consume();
        Ok(())
    }
}

impl<S: Write> Framer<S> {
    pub fn put_event(&mut self, tag: u8) -> Result<()> {
        self.codec.put_byte(tag)?;
        Ok(())
    }
}

pub(crate) fn truncated(e: std::io::Error, step: u64, wanted: usize) -> ReplayError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ReplayError::TruncatedLog {
            step,
            wanted,
            got: 0,
        }
    } else {
        ReplayError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fetch_is_idempotent_until_consumed() {
        let mut f = Framer::new(Cursor::new(vec![5u8, 9u8]));
        assert_eq!(f.fetch_data_kind(0).unwrap(), 5);
        // second call without consume() must not advance the stream
        assert_eq!(f.fetch_data_kind(0).unwrap(), 5);
        f.consume();
        assert_eq!(f.fetch_data_kind(0).unwrap(), 9);
    }

    #[test]
    fn validate_kind_rejects_mismatch() {
        let mut f = Framer::new(Cursor::new(vec![7u8]));
        let err = f.validate_kind(3, 8).unwrap_err();
        match err {
            ReplayError::UnexpectedKind {
                expected,
                found,
                step,
            } => {
                assert_eq!((expected, found, step), (8, 7, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
