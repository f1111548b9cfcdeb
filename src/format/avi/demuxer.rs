//! AVI demultiplexer
//!
//! One forward scan of the RIFF tree builds the complete sample index
//! (tracks, offsets, lengths, durations, keyframe flags) without touching
//! payload bytes; `read` then seeks and copies exactly one sample per call.
//! When the file carries an `idx1` table it is used as-is, otherwise the
//! `movi` list is scanned chunk by chunk and per-track timestamps are
//! reconstructed by accumulating running durations.

use super::{
    stream_of_chunk_id, track_format, MainHeader, StreamHeader, TrackMedia, AVIIF_KEYFRAME,
};
use crate::error::{Error, Result};
use crate::format::index::{KeyframeIndex, Sample};
use crate::format::riff::{read_chunk_header, read_list_type, skip_chunk};
use crate::format::Demultiplexer;
use crate::media::{Buffer, Format};
use crate::util::Rational;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// Raw entry of the `idx1` chunk
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    chunk_id: [u8; 4],
    flags: u32,
    offset: u32,
    size: u32,
}

#[derive(Debug)]
struct ReaderTrack {
    media: TrackMedia,
    header: StreamHeader,
    format: Format,
    /// Sample offsets are absolute payload positions
    samples: Vec<Sample>,
    /// Start time of each sample in track time-scale units
    start_times: Vec<u64>,
    keyframes: KeyframeIndex,
    /// Palette-change records attached to the sample that follows them
    palettes: HashMap<u64, Vec<u8>>,
    read_index: u64,
    total_duration: u64,
}

impl ReaderTrack {
    fn time_scale(&self) -> u64 {
        self.header.rate.max(1) as u64
    }

    fn chunk_duration(&self, length: u64) -> u64 {
        let scale = self.header.scale.max(1) as u64;
        match &self.media {
            TrackMedia::Video { .. } => scale,
            TrackMedia::Audio { block_align, .. } => {
                let block = (*block_align).max(1) as u64;
                (length / block) * scale
            }
        }
    }

    fn push_sample(&mut self, offset: u64, length: u64, keyframe: bool, palette: Option<Vec<u8>>) {
        let index = self.samples.len() as u64;
        let duration = self.chunk_duration(length);
        self.samples.push(Sample::new(offset, length, duration));
        self.start_times.push(self.total_duration);
        // The first sample of a track is always a sync point
        self.keyframes.push(index, keyframe || index == 0);
        if let Some(palette) = palette {
            self.palettes.insert(index, palette);
        }
        self.total_duration += duration;
    }
}

/// AVI demultiplexer over a seekable byte source
pub struct AviReader<R: Read + Seek> {
    reader: Option<R>,
    main_header: MainHeader,
    tracks: Vec<ReaderTrack>,
}

impl<R: Read + Seek> AviReader<R> {
    /// Open an AVI stream, parsing the whole index up front
    pub fn new(mut reader: R) -> Result<Self> {
        let mut parser = Parser {
            reader: &mut reader,
            main_header: None,
            tracks: Vec::new(),
            movi_list_pos: 0,
            movi_data_start: 0,
            movi_end: 0,
            index: Vec::new(),
        };
        parser.parse()?;

        let main_header = parser
            .main_header
            .take()
            .ok_or_else(|| Error::format("AVI file has no avih main header"))?;
        let mut tracks = parser.tracks;
        let movi_list_pos = parser.movi_list_pos;
        let movi_data_start = parser.movi_data_start;
        let movi_end = parser.movi_end;
        let index = parser.index;

        if !index.is_empty() {
            build_index_from_idx1(&mut reader, &mut tracks, &index, movi_list_pos)?;
        } else {
            debug!("AVI file has no idx1 index, scanning movi list");
            scan_movi(&mut reader, &mut tracks, movi_data_start, movi_end)?;
        }

        Ok(AviReader {
            reader: Some(reader),
            main_header,
            tracks,
        })
    }

    /// Parsed main header
    pub fn main_header(&self) -> &MainHeader {
        &self.main_header
    }

    /// Track by index
    fn track(&self, track: usize) -> Result<&ReaderTrack> {
        self.tracks
            .get(track)
            .ok_or_else(|| Error::invalid_input(format!("no such track: {}", track)))
    }
}

struct Parser<'a, R: Read + Seek> {
    reader: &'a mut R,
    main_header: Option<MainHeader>,
    tracks: Vec<ReaderTrack>,
    /// Position of the `movi` fourcc itself
    movi_list_pos: u64,
    /// Position of the first chunk inside the movi list
    movi_data_start: u64,
    movi_end: u64,
    index: Vec<IndexEntry>,
}

impl<R: Read + Seek> Parser<'_, R> {
    fn parse(&mut self) -> Result<()> {
        let riff = read_chunk_header(self.reader)?;
        if &riff.id != b"RIFF" {
            return Err(Error::format("not a RIFF file"));
        }
        let form_type = read_list_type(self.reader)?;
        if &form_type != b"AVI " {
            return Err(Error::format("not an AVI file"));
        }
        let file_end = 8 + riff.size as u64;

        while self.reader.stream_position()? < file_end {
            let chunk = match read_chunk_header(self.reader) {
                Ok(chunk) => chunk,
                // Trailing garbage after the last chunk is tolerated
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let payload_start = self.reader.stream_position()?;

            match &chunk.id {
                b"LIST" => {
                    let list_type = read_list_type(self.reader)?;
                    match &list_type {
                        b"hdrl" => self.parse_hdrl(payload_start + chunk.size as u64)?,
                        b"movi" => {
                            self.movi_list_pos = payload_start;
                            self.movi_data_start = payload_start + 4;
                            self.movi_end = payload_start + chunk.size as u64;
                        }
                        _ => {}
                    }
                }
                b"idx1" => self.parse_idx1(chunk.size)?,
                _ => skip_chunk(self.reader, &chunk)?,
            }

            // Re-align in case an inner parser stopped short
            let expected_end = payload_start + chunk.padded_size();
            let pos = self.reader.stream_position()?;
            if pos < expected_end {
                self.reader.seek(SeekFrom::Start(expected_end))?;
            }
        }

        Ok(())
    }

    fn parse_hdrl(&mut self, list_end: u64) -> Result<()> {
        while self.reader.stream_position()? < list_end {
            let chunk = read_chunk_header(self.reader)?;
            let payload_start = self.reader.stream_position()?;

            match &chunk.id {
                b"avih" => self.parse_avih(chunk.size)?,
                b"LIST" => {
                    let list_type = read_list_type(self.reader)?;
                    if &list_type == b"strl" {
                        self.parse_strl(payload_start + chunk.size as u64)?;
                    }
                }
                _ => {}
            }

            self.reader
                .seek(SeekFrom::Start(payload_start + chunk.padded_size()))?;
        }
        Ok(())
    }

    fn parse_avih(&mut self, size: u32) -> Result<()> {
        if size < 56 {
            return Err(Error::format("avih chunk too small"));
        }
        let r = &mut self.reader;
        let microsec_per_frame = r.read_u32::<LittleEndian>()?;
        let max_bytes_per_sec = r.read_u32::<LittleEndian>()?;
        let _padding = r.read_u32::<LittleEndian>()?;
        let flags = r.read_u32::<LittleEndian>()?;
        let total_frames = r.read_u32::<LittleEndian>()?;
        let initial_frames = r.read_u32::<LittleEndian>()?;
        let streams = r.read_u32::<LittleEndian>()?;
        let suggested_buffer_size = r.read_u32::<LittleEndian>()?;
        let width = r.read_u32::<LittleEndian>()?;
        let height = r.read_u32::<LittleEndian>()?;

        self.main_header = Some(MainHeader {
            microsec_per_frame,
            max_bytes_per_sec,
            flags,
            total_frames,
            initial_frames,
            streams,
            suggested_buffer_size,
            width,
            height,
        });
        Ok(())
    }

    fn parse_strl(&mut self, list_end: u64) -> Result<()> {
        let mut header: Option<StreamHeader> = None;
        let mut media: Option<TrackMedia> = None;

        while self.reader.stream_position()? < list_end {
            let chunk = read_chunk_header(self.reader)?;
            let payload_start = self.reader.stream_position()?;

            match &chunk.id {
                b"strh" => header = Some(self.parse_strh(chunk.size)?),
                b"strf" => {
                    if let Some(ref h) = header {
                        media = self.parse_strf(h, chunk.size)?;
                    }
                }
                _ => {}
            }

            self.reader
                .seek(SeekFrom::Start(payload_start + chunk.padded_size()))?;
        }

        if let (Some(header), Some(media)) = (header, media) {
            let format = track_format(&media, header.scale, header.rate);
            self.tracks.push(ReaderTrack {
                media,
                header,
                format,
                samples: Vec::new(),
                start_times: Vec::new(),
                keyframes: KeyframeIndex::new(),
                palettes: HashMap::new(),
                read_index: 0,
                total_duration: 0,
            });
        }
        Ok(())
    }

    fn parse_strh(&mut self, size: u32) -> Result<StreamHeader> {
        if size < 56 {
            return Err(Error::format("strh chunk too small"));
        }
        let r = &mut self.reader;
        let mut fcc_type = [0u8; 4];
        let mut fcc_handler = [0u8; 4];
        r.read_exact(&mut fcc_type)?;
        r.read_exact(&mut fcc_handler)?;

        Ok(StreamHeader {
            fcc_type,
            fcc_handler,
            flags: r.read_u32::<LittleEndian>()?,
            priority: r.read_u16::<LittleEndian>()?,
            language: r.read_u16::<LittleEndian>()?,
            initial_frames: r.read_u32::<LittleEndian>()?,
            scale: r.read_u32::<LittleEndian>()?,
            rate: r.read_u32::<LittleEndian>()?,
            start: r.read_u32::<LittleEndian>()?,
            length: r.read_u32::<LittleEndian>()?,
            suggested_buffer_size: r.read_u32::<LittleEndian>()?,
            quality: r.read_u32::<LittleEndian>()?,
            sample_size: r.read_u32::<LittleEndian>()?,
        })
    }

    fn parse_strf(&mut self, header: &StreamHeader, size: u32) -> Result<Option<TrackMedia>> {
        match &header.fcc_type {
            b"vids" => {
                if size < 40 {
                    return Err(Error::format("video strf too small"));
                }
                let r = &mut self.reader;
                let _bi_size = r.read_u32::<LittleEndian>()?;
                let width = r.read_i32::<LittleEndian>()?;
                let height = r.read_i32::<LittleEndian>()?;
                let _planes = r.read_u16::<LittleEndian>()?;
                let bit_count = r.read_u16::<LittleEndian>()?;
                let mut compression = [0u8; 4];
                r.read_exact(&mut compression)?;
                let _size_image = r.read_u32::<LittleEndian>()?;
                let _x_ppm = r.read_i32::<LittleEndian>()?;
                let _y_ppm = r.read_i32::<LittleEndian>()?;
                let clr_used = r.read_u32::<LittleEndian>()?;
                let _clr_important = r.read_u32::<LittleEndian>()?;

                // Indexed-color streams carry an RGBQUAD color table after
                // the fixed 40-byte header
                let palette = if bit_count <= 8 && size > 40 {
                    let entries = if clr_used > 0 {
                        clr_used as usize
                    } else {
                        1usize << bit_count
                    };
                    let available = ((size - 40) / 4) as usize;
                    let count = entries.min(available);
                    let mut palette = Vec::with_capacity(count);
                    for _ in 0..count {
                        let b = r.read_u8()?;
                        let g = r.read_u8()?;
                        let rr = r.read_u8()?;
                        let _reserved = r.read_u8()?;
                        palette.push([rr, g, b]);
                    }
                    Some(palette)
                } else {
                    None
                };

                Ok(Some(TrackMedia::Video {
                    width: width.unsigned_abs(),
                    height: height.unsigned_abs(),
                    depth: bit_count,
                    compression,
                    palette,
                }))
            }
            b"auds" => {
                if size < 16 {
                    return Err(Error::format("audio strf too small"));
                }
                let r = &mut self.reader;
                Ok(Some(TrackMedia::Audio {
                    format_tag: r.read_u16::<LittleEndian>()?,
                    channels: r.read_u16::<LittleEndian>()?,
                    sample_rate: r.read_u32::<LittleEndian>()?,
                    block_align: {
                        let _avg_bytes = r.read_u32::<LittleEndian>()?;
                        r.read_u16::<LittleEndian>()?
                    },
                    bits_per_sample: r.read_u16::<LittleEndian>()?,
                }))
            }
            _ => Ok(None),
        }
    }

    fn parse_idx1(&mut self, size: u32) -> Result<()> {
        let entries = size / 16;
        self.index.reserve(entries as usize);
        for _ in 0..entries {
            let mut chunk_id = [0u8; 4];
            self.reader.read_exact(&mut chunk_id)?;
            let flags = self.reader.read_u32::<LittleEndian>()?;
            let offset = self.reader.read_u32::<LittleEndian>()?;
            let entry_size = self.reader.read_u32::<LittleEndian>()?;
            self.index.push(IndexEntry {
                chunk_id,
                flags,
                offset,
                size: entry_size,
            });
        }
        Ok(())
    }
}

/// Build the sample index from a parsed `idx1` table.
///
/// Offsets are normally relative to the position of the `movi` fourcc; some
/// writers store absolute file offsets instead, detected by comparing the
/// first entry against the movi position.
fn build_index_from_idx1<R: Read + Seek>(
    reader: &mut R,
    tracks: &mut [ReaderTrack],
    index: &[IndexEntry],
    movi_list_pos: u64,
) -> Result<()> {
    let base = match index.first() {
        Some(first) if (first.offset as u64) >= movi_list_pos => 0,
        _ => movi_list_pos,
    };

    let mut pending_palettes: Vec<Option<Vec<u8>>> = vec![None; tracks.len()];

    for entry in index {
        let Some(stream) = stream_of_chunk_id(&entry.chunk_id) else {
            continue;
        };
        if stream >= tracks.len() {
            continue;
        }
        let payload_offset = base + entry.offset as u64 + 8;
        let suffix = [entry.chunk_id[2], entry.chunk_id[3]];

        if &suffix == b"pc" {
            // Palette change: read the record now (it is tiny) and attach it
            // to the next sample of the stream
            let mut record = vec![0u8; entry.size as usize];
            reader.seek(SeekFrom::Start(payload_offset))?;
            reader.read_exact(&mut record)?;
            pending_palettes[stream] = Some(record);
            continue;
        }

        let keyframe = entry.flags & AVIIF_KEYFRAME != 0 || &suffix == b"db";
        tracks[stream].push_sample(
            payload_offset,
            entry.size as u64,
            keyframe,
            pending_palettes[stream].take(),
        );
    }
    Ok(())
}

/// Fallback when the file has no index: walk the movi list chunk by chunk
fn scan_movi<R: Read + Seek>(
    reader: &mut R,
    tracks: &mut [ReaderTrack],
    movi_data_start: u64,
    movi_end: u64,
) -> Result<()> {
    let mut pending_palettes: Vec<Option<Vec<u8>>> = vec![None; tracks.len()];
    reader.seek(SeekFrom::Start(movi_data_start))?;

    while reader.stream_position()? < movi_end {
        let chunk = read_chunk_header(reader)?;
        let payload_start = reader.stream_position()?;

        if &chunk.id == b"LIST" {
            // 'rec ' grouping lists: descend into them
            let _list_type = read_list_type(reader)?;
            continue;
        }

        if let Some(stream) = stream_of_chunk_id(&chunk.id) {
            if stream < tracks.len() {
                let suffix = [chunk.id[2], chunk.id[3]];
                if &suffix == b"pc" {
                    let mut record = vec![0u8; chunk.size as usize];
                    reader.read_exact(&mut record)?;
                    pending_palettes[stream] = Some(record);
                } else {
                    // Without an index only uncompressed chunks are known
                    // sync points; the first sample is forced by push_sample
                    let keyframe = &suffix == b"db";
                    tracks[stream].push_sample(
                        payload_start,
                        chunk.size as u64,
                        keyframe,
                        pending_palettes[stream].take(),
                    );
                }
            }
        } else {
            debug!(
                "skipping unknown chunk {:?} in movi list",
                String::from_utf8_lossy(&chunk.id)
            );
        }

        reader.seek(SeekFrom::Start(payload_start + chunk.padded_size()))?;
    }
    Ok(())
}

impl<R: Read + Seek> Demultiplexer for AviReader<R> {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> Result<Format> {
        Ok(self.track(track)?.format.clone())
    }

    fn sample_count(&self, track: usize) -> Result<u64> {
        Ok(self.track(track)?.samples.len() as u64)
    }

    fn track_duration(&self, track: usize) -> Result<Rational> {
        let track = self.track(track)?;
        Ok(Rational::new(
            track.total_duration as i64,
            track.time_scale() as i64,
        ))
    }

    fn read(&mut self, track: usize, buffer: &mut Buffer) -> Result<()> {
        if track >= self.tracks.len() {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::invalid_state("reader is closed"))?;

        let t = &mut self.tracks[track];
        let index = t.read_index;
        if index >= t.samples.len() as u64 {
            buffer.clear();
            buffer.flags.end_of_media = true;
            return Ok(());
        }
        let sample = t.samples[index as usize];

        reader.seek(SeekFrom::Start(sample.offset))?;
        let mut data = vec![0u8; sample.length as usize];
        reader.read_exact(&mut data)?;

        buffer.clear();
        buffer.format = t.format.clone();
        buffer.set_bytes(data);
        buffer.header = t.palettes.get(&index).cloned();
        buffer.time_stamp = Rational::new(t.start_times[index as usize] as i64, t.time_scale() as i64);
        buffer.sample_duration = Rational::new(sample.duration as i64, t.time_scale() as i64);
        buffer.sample_count = 1;
        buffer.sequence = index;
        buffer.flags.keyframe = t.keyframes.is_keyframe(index);
        if index + 1 == t.samples.len() as u64 {
            buffer.flags.end_of_media = true;
        }

        t.read_index += 1;
        Ok(())
    }

    fn next_track(&self) -> Option<usize> {
        let mut best: Option<(usize, Rational)> = None;
        for (i, track) in self.tracks.iter().enumerate() {
            let index = track.read_index;
            if index >= track.samples.len() as u64 {
                continue;
            }
            let time = Rational::new(
                track.start_times[index as usize] as i64,
                track.time_scale() as i64,
            );
            match best {
                Some((_, best_time)) if best_time <= time => {}
                _ => best = Some((i, time)),
            }
        }
        best.map(|(i, _)| i)
    }

    fn time_to_sample(&self, track: usize, time: Rational) -> u64 {
        let Ok(t) = self.track(track) else { return 0 };
        if t.start_times.is_empty() {
            return 0;
        }
        let ticks = time.floor_to(t.time_scale() as i64).max(0) as u64;
        let after = t.start_times.partition_point(|&start| start <= ticks);
        (after.saturating_sub(1)) as u64
    }

    fn sample_to_time(&self, track: usize, index: u64) -> Rational {
        let Ok(t) = self.track(track) else {
            return Rational::ZERO;
        };
        if t.start_times.is_empty() {
            return Rational::ZERO;
        }
        let clamped = (index as usize).min(t.start_times.len() - 1);
        Rational::new(t.start_times[clamped] as i64, t.time_scale() as i64)
    }

    fn set_movie_read_time(&mut self, time: Rational) -> Result<()> {
        for track in 0..self.tracks.len() {
            let mut index = self.time_to_sample(track, time);
            // Back up to the nearest preceding key frame
            while index > 0 && !self.tracks[track].keyframes.is_keyframe(index) {
                index -= 1;
            }
            self.tracks[track].read_index = index;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
