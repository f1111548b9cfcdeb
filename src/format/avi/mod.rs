//! AVI (Audio Video Interleave) container format
//!
//! RIFF-chunked: a `hdrl` LIST with the `avih` main header and one `strl`
//! LIST per stream (`strh` header, `strf` format, optional `strn` name), a
//! `movi` LIST of interleaved `##db`/`##dc`/`##wb`/`##pc` sample chunks
//! whose two-digit prefix is the stream number, and an optional flat `idx1`
//! index with per-entry `(chunkId, flags, offset, size)`.

pub mod demuxer;
pub mod muxer;

pub use demuxer::AviReader;
pub use muxer::AviWriter;

use crate::media::format::{
    self, Format, CHANNELS, DEPTH, ENCODING, FRAME_RATE, HEIGHT, MEDIA_TYPE, MIME_TYPE,
    SAMPLE_RATE, WIDTH,
};
use crate::util::{MediaType, Rational};

/// `idx1` keyframe flag (AVIIF_KEYFRAME)
pub const AVIIF_KEYFRAME: u32 = 0x10;

/// `avih` flag: the file carries an `idx1` index (AVIF_HASINDEX)
pub const AVIF_HASINDEX: u32 = 0x10;

/// AVI main header (avih)
#[derive(Debug, Clone, Default)]
pub struct MainHeader {
    pub microsec_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub initial_frames: u32,
    pub streams: u32,
    pub suggested_buffer_size: u32,
    pub width: u32,
    pub height: u32,
}

/// AVI stream header (strh)
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    pub fcc_type: [u8; 4],
    pub fcc_handler: [u8; 4],
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    pub quality: u32,
    pub sample_size: u32,
}

/// Media-specific track description parsed from `strf`
#[derive(Debug, Clone)]
pub enum TrackMedia {
    Video {
        width: u32,
        height: u32,
        depth: u16,
        compression: [u8; 4],
        /// Palette of an indexed-color stream, from the strf color table
        palette: Option<Vec<[u8; 3]>>,
    },
    Audio {
        format_tag: u16,
        channels: u16,
        sample_rate: u32,
        block_align: u16,
        bits_per_sample: u16,
    },
}

impl TrackMedia {
    pub fn media_type(&self) -> MediaType {
        match self {
            TrackMedia::Video { .. } => MediaType::Video,
            TrackMedia::Audio { .. } => MediaType::Audio,
        }
    }
}

/// Chunk id of stream `index` with the given two-letter type suffix
pub fn stream_chunk_id(index: usize, suffix: &[u8; 2]) -> [u8; 4] {
    [
        b'0' + (index / 10) as u8,
        b'0' + (index % 10) as u8,
        suffix[0],
        suffix[1],
    ]
}

/// Stream number encoded in the first two characters of a sample chunk id,
/// or `None` for non-sample chunks
pub fn stream_of_chunk_id(id: &[u8; 4]) -> Option<usize> {
    if id[0].is_ascii_digit() && id[1].is_ascii_digit() {
        Some(((id[0] - b'0') as usize) * 10 + (id[1] - b'0') as usize)
    } else {
        None
    }
}

/// Map a video compression fourcc to an encoding name
pub fn fourcc_to_encoding(fourcc: &[u8; 4]) -> &'static str {
    match fourcc {
        b"\0\0\0\0" | b"DIB " | b"RGB " | b"RAW " => format::ENCODING_RAW,
        b"H264" | b"h264" | b"avc1" | b"X264" | b"x264" => format::ENCODING_H264,
        _ => "unknown",
    }
}

/// Build the track [`Format`] advertised for a parsed stream
pub fn track_format(media: &TrackMedia, scale: u32, rate: u32) -> Format {
    match media {
        TrackMedia::Video {
            width,
            height,
            depth,
            compression,
            ..
        } => {
            let frame_rate = if scale > 0 {
                Rational::new(rate as i64, scale as i64)
            } else {
                Rational::new(30, 1)
            };
            Format::new()
                .with(&MEDIA_TYPE, MediaType::Video)
                .with(&MIME_TYPE, "video/x-msvideo")
                .with(&ENCODING, fourcc_to_encoding(compression))
                .with(&WIDTH, *width)
                .with(&HEIGHT, *height)
                .with(&DEPTH, *depth as u32)
                .with(&FRAME_RATE, frame_rate)
        }
        TrackMedia::Audio {
            channels,
            sample_rate,
            bits_per_sample,
            ..
        } => Format::new()
            .with(&MEDIA_TYPE, MediaType::Audio)
            .with(&MIME_TYPE, "video/x-msvideo")
            .with(&ENCODING, format::ENCODING_PCM)
            .with(&SAMPLE_RATE, *sample_rate)
            .with(&CHANNELS, *channels)
            .with(&DEPTH, *bits_per_sample as u32),
    }
}
