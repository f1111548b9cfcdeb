//! ANIM demultiplexer
//!
//! One pass over the `FORM ANIM` tree indexes every frame (payload offset,
//! animation header, attached sound commands) without decoding deltas.
//! Decoding against the previous frame's bitmap is the
//! [`crate::codec::anim::AnimCodec`]'s job; the reader serves raw `BODY`/
//! `DLTA` payloads whose per-sample format carries the frame's operation
//! code and bit flags.

use super::{
    add_audio_command, read_iff_chunk, AnimationHeader, AudioCommand, BitmapHeader,
    ANIM_BITS, ANIM_OPERATION, JIFFIES_PER_SECOND, OP_DIRECT,
};
use crate::error::{Error, Result};
use crate::format::Demultiplexer;
use crate::media::format::{
    self, Format, DEPTH, ENCODING, HEIGHT, MEDIA_TYPE, MIME_TYPE, PLANES, WIDTH,
};
use crate::media::{Buffer, PaletteEntry};
use crate::util::{MediaType, Rational};
use byteorder::ReadBytesExt;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

#[derive(Debug, Clone)]
struct FrameEntry {
    header: AnimationHeader,
    /// Absolute offset of the BODY/DLTA payload
    offset: u64,
    length: u64,
    /// Start time in jiffies
    start_time: u64,
    /// Duration in jiffies
    duration: u64,
    audio_commands: Vec<AudioCommand>,
}

/// ANIM demultiplexer over a seekable byte source
pub struct AnimReader<R: Read + Seek> {
    reader: Option<R>,
    bitmap_header: BitmapHeader,
    palette: Option<Vec<PaletteEntry>>,
    frames: Vec<FrameEntry>,
    format: Format,
    read_index: u64,
    total_duration: u64,
}

impl<R: Read + Seek> AnimReader<R> {
    /// Open an ANIM stream, indexing all frames up front
    pub fn new(mut reader: R) -> Result<Self> {
        let form = read_iff_chunk(&mut reader)?;
        if &form.id != b"FORM" {
            return Err(Error::format("not an IFF file"));
        }
        let mut form_type = [0u8; 4];
        reader.read_exact(&mut form_type)?;
        if &form_type != b"ANIM" {
            return Err(Error::format("not an ANIM file"));
        }
        let form_end = 8 + form.size as u64;

        let mut bitmap_header: Option<BitmapHeader> = None;
        let mut palette: Option<Vec<PaletteEntry>> = None;
        let mut frames: Vec<FrameEntry> = Vec::new();
        let mut pending_commands: Vec<AudioCommand> = Vec::new();
        let mut total_duration = 0u64;

        while reader.stream_position()? < form_end {
            let chunk = read_iff_chunk(&mut reader)?;
            let payload_start = reader.stream_position()?;

            if &chunk.id == b"FORM" {
                let mut inner_type = [0u8; 4];
                reader.read_exact(&mut inner_type)?;
                if &inner_type == b"ILBM" {
                    parse_ilbm(
                        &mut reader,
                        payload_start + chunk.size as u64,
                        &mut bitmap_header,
                        &mut palette,
                        &mut frames,
                        &mut pending_commands,
                        &mut total_duration,
                    )?;
                }
            } else {
                debug!(
                    "skipping chunk {:?} at ANIM top level",
                    String::from_utf8_lossy(&chunk.id)
                );
            }

            reader.seek(SeekFrom::Start(payload_start + chunk.padded_size()))?;
        }

        let bitmap_header =
            bitmap_header.ok_or_else(|| Error::format("ANIM file has no BMHD header"))?;
        if frames.is_empty() {
            return Err(Error::format("ANIM file has no frames"));
        }

        let format = Format::new()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&MIME_TYPE, "video/x-anim")
            .with(&ENCODING, format::ENCODING_ANIM_OP)
            .with(&WIDTH, bitmap_header.width as u32)
            .with(&HEIGHT, bitmap_header.height as u32)
            .with(&PLANES, bitmap_header.nb_planes as u32)
            .with(&DEPTH, bitmap_header.nb_planes as u32);

        Ok(AnimReader {
            reader: Some(reader),
            bitmap_header,
            palette,
            frames,
            format,
            read_index: 0,
            total_duration,
        })
    }

    /// Parsed bitmap header of the first frame
    pub fn bitmap_header(&self) -> &BitmapHeader {
        &self.bitmap_header
    }

    /// The CMAP palette, when present
    pub fn palette(&self) -> Option<&[PaletteEntry]> {
        self.palette.as_deref()
    }

    /// Sound commands attached to a frame
    pub fn audio_commands(&self, frame: u64) -> &[AudioCommand] {
        self.frames
            .get(frame as usize)
            .map_or(&[], |f| f.audio_commands.as_slice())
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_ilbm<R: Read + Seek>(
    reader: &mut R,
    form_end: u64,
    bitmap_header: &mut Option<BitmapHeader>,
    palette: &mut Option<Vec<PaletteEntry>>,
    frames: &mut Vec<FrameEntry>,
    pending_commands: &mut Vec<AudioCommand>,
    total_duration: &mut u64,
) -> Result<()> {
    let mut anhd: Option<AnimationHeader> = None;

    while reader.stream_position()? < form_end {
        let chunk = read_iff_chunk(reader)?;
        let payload_start = reader.stream_position()?;

        match &chunk.id {
            b"BMHD" => *bitmap_header = Some(BitmapHeader::read(reader)?),
            b"CMAP" => {
                let count = chunk.size as usize / 3;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let r = reader.read_u8()?;
                    let g = reader.read_u8()?;
                    let b = reader.read_u8()?;
                    entries.push([r, g, b]);
                }
                *palette = Some(entries);
            }
            b"ANHD" => anhd = Some(AnimationHeader::read(reader)?),
            b"SCTL" => {
                let command = AudioCommand::read(reader)?;
                add_audio_command(pending_commands, command);
            }
            b"BODY" | b"DLTA" => {
                let header = anhd.take().unwrap_or(AnimationHeader {
                    operation: OP_DIRECT,
                    ..Default::default()
                });
                let duration = header.rel_time.max(1) as u64;
                frames.push(FrameEntry {
                    header,
                    offset: payload_start,
                    length: chunk.size as u64,
                    start_time: *total_duration,
                    duration,
                    audio_commands: std::mem::take(pending_commands),
                });
                *total_duration += duration;
            }
            _ => {}
        }

        reader.seek(SeekFrom::Start(payload_start + chunk.padded_size()))?;
    }
    Ok(())
}

impl<R: Read + Seek> Demultiplexer for AnimReader<R> {
    fn track_count(&self) -> usize {
        1
    }

    fn track_format(&self, track: usize) -> Result<Format> {
        if track != 0 {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        Ok(self.format.clone())
    }

    fn sample_count(&self, track: usize) -> Result<u64> {
        if track != 0 {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        Ok(self.frames.len() as u64)
    }

    fn track_duration(&self, track: usize) -> Result<Rational> {
        if track != 0 {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        Ok(Rational::new(
            self.total_duration as i64,
            JIFFIES_PER_SECOND,
        ))
    }

    fn read(&mut self, track: usize, buffer: &mut Buffer) -> Result<()> {
        if track != 0 {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::invalid_state("reader is closed"))?;

        let index = self.read_index;
        if index >= self.frames.len() as u64 {
            buffer.clear();
            buffer.flags.end_of_media = true;
            return Ok(());
        }
        let frame = &self.frames[index as usize];

        reader.seek(SeekFrom::Start(frame.offset))?;
        let mut data = vec![0u8; frame.length as usize];
        reader.read_exact(&mut data)?;

        buffer.clear();
        buffer.format = self
            .format
            .clone()
            .with(&ANIM_OPERATION, frame.header.operation as u32)
            .with(&ANIM_BITS, frame.header.bits);
        buffer.set_bytes(data);
        buffer.time_stamp = Rational::new(frame.start_time as i64, JIFFIES_PER_SECOND);
        buffer.sample_duration = Rational::new(frame.duration as i64, JIFFIES_PER_SECOND);
        buffer.sample_count = 1;
        buffer.sequence = index;
        buffer.flags.keyframe = frame.header.operation == OP_DIRECT;
        if index + 1 == self.frames.len() as u64 {
            buffer.flags.end_of_media = true;
        }

        self.read_index += 1;
        Ok(())
    }

    fn next_track(&self) -> Option<usize> {
        if self.read_index < self.frames.len() as u64 {
            Some(0)
        } else {
            None
        }
    }

    fn time_to_sample(&self, track: usize, time: Rational) -> u64 {
        if track != 0 || self.frames.is_empty() {
            return 0;
        }
        let ticks = time.floor_to(JIFFIES_PER_SECOND).max(0) as u64;
        let after = self
            .frames
            .partition_point(|frame| frame.start_time <= ticks);
        after.saturating_sub(1) as u64
    }

    fn sample_to_time(&self, track: usize, index: u64) -> Rational {
        if track != 0 || self.frames.is_empty() {
            return Rational::ZERO;
        }
        let clamped = (index as usize).min(self.frames.len() - 1);
        Rational::new(self.frames[clamped].start_time as i64, JIFFIES_PER_SECOND)
    }

    fn set_movie_read_time(&mut self, time: Rational) -> Result<()> {
        let mut index = self.time_to_sample(0, time);
        // Deltas only decode forward from a key frame
        while index > 0 && self.frames[index as usize].header.operation != OP_DIRECT {
            index -= 1;
        }
        self.read_index = index;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
