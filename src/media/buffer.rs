//! The unit of media data exchange between pipeline stages
//!
//! A [`Buffer`] carries exactly one chunk of media data in flight: payload,
//! format, flags, rational timing, and an optional header side record (for
//! example a palette change preceding an indexed-color frame). Buffers are
//! mutable and designed to be reused by callers that want to avoid per-sample
//! allocation: [`Buffer::set_meta_to`] copies all metadata without touching
//! the payload, [`Buffer::set_data_to`] copies the payload alone, so a pool
//! never aliases payload memory between stages.

use crate::error::{Error, Result};
use crate::media::format::Format;
use crate::media::picture::Picture;
use crate::util::Rational;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;

/// Processing flags attached to a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// The buffer carries no usable data and must be skipped
    pub discard: bool,
    /// The sample is a key frame
    pub keyframe: bool,
    /// No more samples follow this one
    pub end_of_media: bool,
    /// The payload is identical to the previous sample's payload
    pub same_data: bool,
}

/// Buffer payload
#[derive(Clone, Default)]
pub enum BufferData {
    /// No payload
    #[default]
    Empty,
    /// Raw byte payload; reference counted, so metadata-only copies stay
    /// cheap
    Bytes(Bytes),
    /// Uncompressed raster image
    Picture(Picture),
    /// A foreign payload passed through by reference; cannot be copied
    /// by [`Buffer::set_data_to`]
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl BufferData {
    /// Length in bytes, where meaningful
    pub fn len(&self) -> usize {
        match self {
            BufferData::Empty => 0,
            BufferData::Bytes(b) => b.len(),
            BufferData::Picture(p) => p.pixels.len(),
            BufferData::Opaque(_) => 0,
        }
    }

    /// Whether there is no payload
    pub fn is_empty(&self) -> bool {
        matches!(self, BufferData::Empty)
    }

    /// Byte view of the payload, if it is byte-shaped
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BufferData::Bytes(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    /// Picture view of the payload, if it is an image
    pub fn as_picture(&self) -> Option<&Picture> {
        match self {
            BufferData::Picture(p) => Some(p),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BufferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferData::Empty => write!(f, "Empty"),
            BufferData::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            BufferData::Picture(p) => write!(f, "Picture({}x{})", p.width, p.height),
            BufferData::Opaque(_) => write!(f, "Opaque"),
        }
    }
}

/// A mutable carrier of exactly one chunk of media data
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    /// Format of the payload
    pub format: Format,

    /// Processing flags
    pub flags: BufferFlags,

    /// Payload
    pub data: BufferData,

    /// Offset of the payload within `data`, in bytes
    pub offset: usize,

    /// Length of the payload from `offset`, in bytes
    pub length: usize,

    /// Optional header side record preceding the payload
    /// (e.g. a palette change)
    pub header: Option<Vec<u8>>,

    /// Time stamp of the first sample
    pub time_stamp: Rational,

    /// Duration of one sample
    pub sample_duration: Rational,

    /// Number of samples in the payload
    pub sample_count: u64,

    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,

    /// Error carried along with the buffer instead of aborting the pipeline
    pub error: Option<String>,
}

impl Buffer {
    /// Create an empty buffer marked for discard
    pub fn new() -> Self {
        Buffer {
            flags: BufferFlags {
                discard: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Total duration of the buffer: `sample_duration * sample_count`
    pub fn buffer_duration(&self) -> Rational {
        self.sample_duration.mul_int(self.sample_count as i64)
    }

    /// Time stamp just past the last sample:
    /// `time_stamp + buffer_duration()`
    pub fn buffer_end_timestamp(&self) -> Rational {
        self.time_stamp + self.buffer_duration()
    }

    /// Whether the discard flag is set
    pub fn is_discard(&self) -> bool {
        self.flags.discard
    }

    /// Whether the buffer marks a key frame
    pub fn is_keyframe(&self) -> bool {
        self.flags.keyframe
    }

    /// Copy all metadata from another buffer, leaving payload and header
    /// untouched
    pub fn set_meta_to(&mut self, other: &Buffer) {
        self.format = other.format.clone();
        self.flags = other.flags;
        self.offset = other.offset;
        self.length = other.length;
        self.time_stamp = other.time_stamp;
        self.sample_duration = other.sample_duration;
        self.sample_count = other.sample_count;
        self.sequence = other.sequence;
        self.error = other.error.clone();
    }

    /// Copy the payload (and header record) from another buffer, leaving
    /// metadata untouched.
    ///
    /// Fails with [`Error::Unsupported`] when the payload is an opaque
    /// reference that cannot be duplicated.
    pub fn set_data_to(&mut self, other: &Buffer) -> Result<()> {
        self.data = match &other.data {
            BufferData::Empty => BufferData::Empty,
            BufferData::Bytes(b) => BufferData::Bytes(b.clone()),
            BufferData::Picture(p) => BufferData::Picture(p.clone()),
            BufferData::Opaque(_) => {
                return Err(Error::unsupported(
                    "cannot copy an opaque buffer payload",
                ))
            }
        };
        self.header = other.header.clone();
        Ok(())
    }

    /// Payload bytes honoring offset/length, when the payload is byte-shaped
    pub fn payload(&self) -> Option<&[u8]> {
        let bytes = self.data.as_bytes()?;
        let end = (self.offset + self.length).min(bytes.len());
        bytes.get(self.offset..end)
    }

    /// Replace the payload with a byte vector and set offset/length to
    /// cover it
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.offset = 0;
        self.length = bytes.len();
        self.data = BufferData::Bytes(Bytes::from(bytes));
        self.flags.discard = false;
    }

    /// Replace the payload with a picture
    pub fn set_picture(&mut self, picture: Picture) {
        self.offset = 0;
        self.length = picture.pixels.len();
        self.data = BufferData::Picture(picture);
        self.flags.discard = false;
    }

    /// Reset the buffer to the empty, discard state, keeping allocations out
    /// of the hot path where possible
    pub fn clear(&mut self) {
        self.flags = BufferFlags {
            discard: true,
            ..Default::default()
        };
        self.data = BufferData::Empty;
        self.offset = 0;
        self.length = 0;
        self.header = None;
        self.time_stamp = Rational::ZERO;
        self.sample_duration = Rational::ZERO;
        self.sample_count = 0;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::{ENCODING, ENCODING_RAW};

    #[test]
    fn test_duration_identity() {
        let mut buf = Buffer::new();
        buf.time_stamp = Rational::new(3, 10);
        buf.sample_duration = Rational::new(1, 30);
        buf.sample_count = 5;

        assert_eq!(buf.buffer_duration(), Rational::new(1, 6));
        assert_eq!(buf.buffer_end_timestamp(), Rational::new(7, 15));
    }

    #[test]
    fn test_duration_identity_is_exact() {
        // 1001/30000 per sample (NTSC), 2997 samples: exactly 99.9999 s / ...
        let mut buf = Buffer::new();
        buf.time_stamp = Rational::ZERO;
        buf.sample_duration = Rational::new(1001, 30000);
        buf.sample_count = 2997;
        assert_eq!(
            buf.buffer_end_timestamp(),
            Rational::new(1001 * 2997, 30000)
        );
    }

    #[test]
    fn test_set_meta_to_leaves_payload() {
        let mut src = Buffer::new();
        src.format = Format::new().with(&ENCODING, ENCODING_RAW);
        src.set_bytes(vec![1, 2, 3]);
        src.sequence = 9;

        let mut dst = Buffer::new();
        dst.set_bytes(vec![7, 7]);
        dst.set_meta_to(&src);

        assert_eq!(dst.sequence, 9);
        assert_eq!(dst.format.get(&ENCODING), Some(&ENCODING_RAW));
        // payload untouched
        assert_eq!(dst.data.as_bytes(), Some(&[7u8, 7][..]));
    }

    #[test]
    fn test_set_data_to_copies_payload_only() {
        let mut src = Buffer::new();
        src.set_bytes(vec![1, 2, 3]);
        src.sequence = 9;

        let mut dst = Buffer::new();
        dst.set_data_to(&src).unwrap();

        assert_eq!(dst.data.as_bytes(), Some(&[1u8, 2, 3][..]));
        assert_eq!(dst.sequence, 0); // metadata untouched
    }

    #[test]
    fn test_set_data_to_rejects_opaque() {
        let mut src = Buffer::new();
        src.data = BufferData::Opaque(Arc::new(5u32));

        let mut dst = Buffer::new();
        assert!(matches!(
            dst.set_data_to(&src),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_payload_respects_offset_length() {
        let mut buf = Buffer::new();
        buf.data = BufferData::Bytes(Bytes::from(vec![0, 1, 2, 3, 4, 5]));
        buf.offset = 2;
        buf.length = 3;
        assert_eq!(buf.payload(), Some(&[2u8, 3, 4][..]));
    }
}
