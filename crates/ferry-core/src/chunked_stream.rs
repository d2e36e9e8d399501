//! Non-contiguous pooled buffers presented as one seekable stream.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::errors::ConfigError;

/// An ordered list of buffers viewed as a single logical byte range.
///
/// The view starts `start` bytes into the first buffer and is exactly
/// `length` bytes long; slack past that length is never read or written.
#[derive(Debug)]
pub struct ChunkedBufferStream {
    buffers: Vec<Vec<u8>>,
    /// Absolute offset of each buffer within the concatenation.
    offsets: Vec<usize>,
    start: usize,
    length: usize,
    position: usize,
}

impl ChunkedBufferStream {
    pub fn new(buffers: Vec<Vec<u8>>, start: usize, length: usize) -> Result<Self, ConfigError> {
        let mut offsets = Vec::with_capacity(buffers.len());
        let mut total = 0usize;
        for buf in &buffers {
            offsets.push(total);
            total += buf.len();
        }
        if start > total || length > total - start {
            return Err(ConfigError::InvalidStreamRange {
                offset: start,
                length,
                available: total,
            });
        }
        Ok(Self {
            buffers,
            offsets,
            start,
            length,
            position: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Give the underlying buffers back, e.g. to return them to the pool.
    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }

    /// Buffer index and offset inside it for a logical position < length.
    fn locate(&self, logical: usize) -> (usize, usize) {
        let absolute = self.start + logical;
        let idx = self.offsets.partition_point(|&o| o <= absolute) - 1;
        (idx, absolute - self.offsets[idx])
    }

    /// Copy bytes starting at `pos` into `out` without moving the cursor.
    pub fn read_at(&self, pos: usize, out: &mut [u8]) -> usize {
        if pos >= self.length {
            return 0;
        }
        let wanted = out.len().min(self.length - pos);
        let mut copied = 0;
        while copied < wanted {
            let (idx, offset) = self.locate(pos + copied);
            let chunk = &self.buffers[idx][offset..];
            let n = chunk.len().min(wanted - copied);
            out[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
        }
        copied
    }

    /// Copy `data` into the stream at `pos` without moving the cursor.
    /// Bytes past the logical length are dropped.
    pub fn write_at(&mut self, pos: usize, data: &[u8]) -> usize {
        if pos >= self.length {
            return 0;
        }
        let wanted = data.len().min(self.length - pos);
        let mut written = 0;
        while written < wanted {
            let (idx, offset) = self.locate(pos + written);
            let chunk = &mut self.buffers[idx][offset..];
            let n = chunk.len().min(wanted - written);
            chunk[..n].copy_from_slice(&data[written..written + n]);
            written += n;
        }
        written
    }
}

impl Read for ChunkedBufferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.position, buf);
        self.position += n;
        Ok(n)
    }
}

impl Write for ChunkedBufferStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(self.position, buf);
        self.position += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ChunkedBufferStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => self.length as i128 + i128::from(delta),
            SeekFrom::Current(delta) => self.position as i128 + i128::from(delta),
        };
        if target < 0 || target > self.length as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {target} outside stream of length {}", self.length),
            ));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_span_buffer_boundary() -> io::Result<()> {
        let mut stream = ChunkedBufferStream::new(vec![vec![0u8; 10], vec![0u8; 20]], 0, 30)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let payload: Vec<u8> = (1..=20).collect();

        stream.seek(SeekFrom::Start(5))?;
        stream.write_all(&payload)?;
        assert_eq!(stream.position(), 25);

        stream.seek(SeekFrom::Start(5))?;
        let mut back = vec![0u8; 20];
        stream.read_exact(&mut back)?;
        assert_eq!(back, payload);

        let buffers = stream.into_buffers();
        assert_eq!(&buffers[0][5..], &payload[..5]);
        assert_eq!(&buffers[1][..15], &payload[5..]);
        Ok(())
    }

    #[test]
    fn start_offset_shifts_the_view() {
        let mut stream =
            ChunkedBufferStream::new(vec![vec![0u8; 4], vec![0u8; 4], vec![0u8; 4]], 3, 6).unwrap();
        assert_eq!(stream.write_at(0, b"abcdef"), 6);
        let buffers = stream.into_buffers();
        assert_eq!(buffers[0], b"\0\0\0a");
        assert_eq!(buffers[1], b"bcde");
        assert_eq!(buffers[2], b"f\0\0\0");
    }

    #[test]
    fn slack_past_length_is_inaccessible() {
        let mut stream = ChunkedBufferStream::new(vec![vec![7u8; 8]], 0, 5).unwrap();
        assert_eq!(stream.write_at(3, b"xyzw"), 2);
        let mut out = [0u8; 8];
        assert_eq!(stream.read_at(0, &mut out), 5);
        assert_eq!(&out[..5], b"\x07\x07\x07xy");

        stream.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(stream.write(b"more").unwrap(), 0);
        assert!(stream.write_all(b"more").is_err());
        assert!(stream.seek(SeekFrom::Start(6)).is_err());
        assert!(stream.seek(SeekFrom::Current(-10)).is_err());
    }

    #[test]
    fn range_beyond_buffers_is_rejected() {
        assert!(ChunkedBufferStream::new(vec![vec![0u8; 4]], 2, 3).is_err());
        assert!(ChunkedBufferStream::new(vec![vec![0u8; 4]], 5, 0).is_err());
        assert!(ChunkedBufferStream::new(Vec::new(), 0, 0).unwrap().is_empty());
    }

    #[test]
    fn read_to_end_stops_at_length() {
        let mut stream = ChunkedBufferStream::new(vec![b"hello".to_vec(), b" world!!".to_vec()], 0, 11).unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
    }
}
