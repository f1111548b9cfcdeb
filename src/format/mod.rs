//! Container format handling (demuxing and muxing)
//!
//! A [`Demultiplexer`] parses a container exactly once into an in-memory
//! index of samples and then serves them one per [`Demultiplexer::read`]
//! call without ever decoding payloads. A [`Multiplexer`] accepts samples in
//! append-only order, optionally routing them through a codec when the
//! incoming format does not match the track, and maintains the compact group
//! index described in [`index`].

pub mod anim;
pub mod avi;
pub mod index;
pub mod qtff;
pub mod riff;

pub use index::{Chunk, KeyframeIndex, Sample, SampleSizeGroup, TimeToSampleGroup};

use crate::error::Result;
use crate::media::format::MEDIA_TYPE;
use crate::media::{Buffer, Format};
use crate::util::{MediaType, Rational};

/// Reads samples out of a container
///
/// Readers hold mutable per-track cursors and no internal locking; one
/// thread drives a reader at a time.
pub trait Demultiplexer {
    /// Number of tracks in the movie
    fn track_count(&self) -> usize;

    /// Format of a track
    fn track_format(&self, track: usize) -> Result<Format>;

    /// Number of samples in a track
    fn sample_count(&self, track: usize) -> Result<u64>;

    /// Total duration of a track
    fn track_duration(&self, track: usize) -> Result<Rational>;

    /// Duration of the whole movie: the longest track
    fn movie_duration(&self) -> Rational {
        (0..self.track_count())
            .filter_map(|t| self.track_duration(t).ok())
            .max()
            .unwrap_or(Rational::ZERO)
    }

    /// First track carrying the given media type
    fn find_track(&self, media_type: MediaType) -> Option<usize> {
        (0..self.track_count()).find(|&track| {
            self.track_format(track)
                .ok()
                .and_then(|format| format.get(&MEDIA_TYPE).copied())
                == Some(media_type)
        })
    }

    /// Read the next sample of the track into the buffer.
    ///
    /// Exactly one sample is delivered per call. When the track is
    /// exhausted the buffer comes back flagged `end_of_media` + `discard`.
    fn read(&mut self, track: usize, buffer: &mut Buffer) -> Result<()>;

    /// The track whose next unread sample has the smallest time stamp;
    /// `None` when every track is exhausted. Reading tracks in this order
    /// reproduces the interleaved presentation order of the file.
    fn next_track(&self) -> Option<usize>;

    /// Index of the sample covering `time`, clamped to the valid range
    fn time_to_sample(&self, track: usize, time: Rational) -> u64;

    /// Start time of the sample at `index`, clamped to the valid range
    fn sample_to_time(&self, track: usize, index: u64) -> Rational;

    /// Position every track's read cursor on the nearest keyframe at or
    /// before `time`
    fn set_movie_read_time(&mut self, time: Rational) -> Result<()>;

    /// Release the underlying stream. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Writes samples into a container
pub trait Multiplexer {
    /// Add a track for the given format, returning its index.
    /// Tracks cannot be added once sample data has been written.
    fn add_track(&mut self, format: &Format) -> Result<usize>;

    /// Append one sample to the track.
    ///
    /// A buffer whose format does not match the track format is routed
    /// through a codec obtained from the registry. Fails with
    /// [`crate::error::Error::DataLimitReached`] once the container's 32-bit
    /// size fields are exhausted.
    fn write(&mut self, track: usize, buffer: &mut Buffer) -> Result<()>;

    /// Whether the 32-bit data size limit has been reached
    fn is_data_limit_reached(&self) -> bool;

    /// Whether no sample has been written to the track yet
    fn is_empty(&self, track: usize) -> bool;

    /// Write trailing index structures and patch header size fields
    fn finish(&mut self) -> Result<()>;

    /// Finish (if needed) and release the sink. Idempotent.
    fn close(&mut self) -> Result<()>;
}
