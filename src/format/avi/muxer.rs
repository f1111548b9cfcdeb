//! AVI multiplexer
//!
//! Samples are accepted in append-only order per track and streamed straight
//! into the `movi` list; header size fields, the `avih` frame count and the
//! `idx1` index are patched/written on finish. Palette changes of
//! indexed-color streams are detected by diffing against the previous
//! frame's color table and emitted as `##pc` side records ahead of the
//! sample payload.

use super::{stream_chunk_id, MainHeader, TrackMedia, AVIF_HASINDEX, AVIIF_KEYFRAME};
use crate::codec::{Codec, Registry};
use crate::error::{Error, Result};
use crate::format::index::{
    push_chunk, push_sample_size, push_time_to_sample, Chunk, KeyframeIndex, Sample,
    SampleSizeGroup, TimeToSampleGroup,
};
use crate::format::riff::write_chunk_header;
use crate::format::Multiplexer;
use crate::media::format::{
    self, Format, CHANNELS, DEPTH, ENCODING, FRAME_RATE, HEIGHT, MEDIA_TYPE, SAMPLE_RATE, WIDTH,
};
use crate::media::{Buffer, BufferData, PaletteEntry};
use crate::util::{MediaType, Rational};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};
use tracing::warn;

/// Headroom kept below the 4 GiB RIFF ceiling for the index and trailing
/// header patches
const DATA_LIMIT: u64 = u32::MAX as u64 - (1 << 20);

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    chunk_id: [u8; 4],
    flags: u32,
    /// Offset of the chunk header relative to the `movi` fourcc
    offset: u32,
    size: u32,
}

struct WriterTrack {
    format: Format,
    media: TrackMedia,
    fourcc: [u8; 4],
    scale: u32,
    rate: u32,
    samples: Vec<Sample>,
    time_to_samples: Vec<TimeToSampleGroup>,
    sample_sizes: Vec<SampleSizeGroup>,
    chunks: Vec<Chunk>,
    keyframes: KeyframeIndex,
    previous_palette: Option<Vec<PaletteEntry>>,
    codec: Option<Box<dyn Codec>>,
}

impl WriterTrack {
    fn depth(&self) -> u16 {
        match &self.media {
            TrackMedia::Video { depth, .. } => *depth,
            TrackMedia::Audio { bits_per_sample, .. } => *bits_per_sample,
        }
    }
}

/// AVI multiplexer over a seekable byte sink
pub struct AviWriter<W: Write + Seek> {
    writer: Option<W>,
    registry: Registry,
    tracks: Vec<WriterTrack>,
    started: bool,
    finished: bool,
    data_limit_reached: bool,
    index: Vec<IndexEntry>,
    riff_size_pos: u64,
    movi_size_pos: u64,
    /// Position of the `movi` fourcc; idx1 offsets are relative to it
    movi_list_pos: u64,
    avih_frames_pos: u64,
    strh_length_positions: Vec<u64>,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Create a writer with the default codec registry
    pub fn new(writer: W) -> Self {
        Self::with_registry(writer, Registry::with_defaults())
    }

    /// Create a writer using a caller-supplied registry for codec lookup
    pub fn with_registry(writer: W, registry: Registry) -> Self {
        AviWriter {
            writer: Some(writer),
            registry,
            tracks: Vec::new(),
            started: false,
            finished: false,
            data_limit_reached: false,
            index: Vec::new(),
            riff_size_pos: 0,
            movi_size_pos: 0,
            movi_list_pos: 0,
            avih_frames_pos: 0,
            strh_length_positions: Vec::new(),
        }
    }

    /// Group lists of a track, for index inspection
    pub fn time_to_sample_groups(&self, track: usize) -> &[TimeToSampleGroup] {
        &self.tracks[track].time_to_samples
    }

    pub fn sample_size_groups(&self, track: usize) -> &[SampleSizeGroup] {
        &self.tracks[track].sample_sizes
    }

    pub fn sample_chunks(&self, track: usize) -> &[Chunk] {
        &self.tracks[track].chunks
    }

    fn writer(&mut self) -> Result<&mut W> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("writer is closed"))
    }

    /// Finish (if needed) and hand the underlying sink back
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        self.writer
            .take()
            .ok_or_else(|| Error::invalid_state("writer is closed"))
    }

    fn encoding_fourcc(encoding: &str) -> [u8; 4] {
        match encoding {
            format::ENCODING_RAW => *b"DIB ",
            format::ENCODING_H264 => *b"H264",
            other => {
                let mut fourcc = [b' '; 4];
                for (dst, src) in fourcc.iter_mut().zip(other.bytes()) {
                    *dst = src.to_ascii_uppercase();
                }
                fourcc
            }
        }
    }

    fn write_headers(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(Error::invalid_state("no tracks added"));
        }

        let (width, height, frame_scale, frame_rate) = self
            .tracks
            .iter()
            .find_map(|t| match &t.media {
                TrackMedia::Video { width, height, .. } => {
                    Some((*width, *height, t.scale, t.rate))
                }
                _ => None,
            })
            .unwrap_or((0, 0, 1, 30));

        let main_header = MainHeader {
            microsec_per_frame: if frame_rate > 0 {
                ((1_000_000u64 * frame_scale as u64) / frame_rate as u64) as u32
            } else {
                33_333
            },
            flags: AVIF_HASINDEX,
            streams: self.tracks.len() as u32,
            width,
            height,
            ..Default::default()
        };

        let strf_sizes: Vec<u32> = self
            .tracks
            .iter()
            .map(|t| match &t.media {
                TrackMedia::Video { .. } => {
                    40 + 4 * t.previous_palette.as_ref().map_or(0, |p| p.len() as u32)
                }
                TrackMedia::Audio { .. } => 18,
            })
            .collect();

        let w = self.writer()?;
        w.write_all(b"RIFF")?;
        let riff_size_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?;
        w.write_all(b"AVI ")?;

        // LIST hdrl
        let avih_chunk = 8 + 56u32;
        let strl_total: u32 = strf_sizes.iter().map(|s| 12 + 8 + 56 + 8 + s).sum();
        write_chunk_header(w, b"LIST", 4 + avih_chunk + strl_total)?;
        w.write_all(b"hdrl")?;

        // avih
        write_chunk_header(w, b"avih", 56)?;
        w.write_u32::<LittleEndian>(main_header.microsec_per_frame)?;
        w.write_u32::<LittleEndian>(main_header.max_bytes_per_sec)?;
        w.write_u32::<LittleEndian>(0)?; // padding granularity
        w.write_u32::<LittleEndian>(main_header.flags)?;
        let avih_frames_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // total_frames, patched on finish
        w.write_u32::<LittleEndian>(main_header.initial_frames)?;
        w.write_u32::<LittleEndian>(main_header.streams)?;
        w.write_u32::<LittleEndian>(main_header.suggested_buffer_size)?;
        w.write_u32::<LittleEndian>(main_header.width)?;
        w.write_u32::<LittleEndian>(main_header.height)?;
        for _ in 0..4 {
            w.write_u32::<LittleEndian>(0)?; // reserved
        }

        self.avih_frames_pos = avih_frames_pos;
        self.riff_size_pos = riff_size_pos;

        for i in 0..self.tracks.len() {
            self.write_strl(i, strf_sizes[i])?;
        }

        // LIST movi, size patched on finish
        let w = self.writer()?;
        write_chunk_header(w, b"LIST", 0)?;
        let movi_size_pos = w.stream_position()? - 4;
        let movi_list_pos = w.stream_position()?;
        w.write_all(b"movi")?;
        self.movi_size_pos = movi_size_pos;
        self.movi_list_pos = movi_list_pos;

        self.started = true;
        Ok(())
    }

    fn write_strl(&mut self, track: usize, strf_size: u32) -> Result<()> {
        let (fcc_type, fourcc, scale, rate, depth) = {
            let t = &self.tracks[track];
            let fcc_type = match t.media.media_type() {
                MediaType::Video => *b"vids",
                _ => *b"auds",
            };
            (fcc_type, t.fourcc, t.scale, t.rate, t.depth())
        };

        let w = self.writer.as_mut().expect("checked by caller");
        write_chunk_header(w, b"LIST", 4 + 8 + 56 + 8 + strf_size)?;
        w.write_all(b"strl")?;

        // strh
        write_chunk_header(w, b"strh", 56)?;
        w.write_all(&fcc_type)?;
        w.write_all(&fourcc)?;
        w.write_u32::<LittleEndian>(0)?; // flags
        w.write_u16::<LittleEndian>(0)?; // priority
        w.write_u16::<LittleEndian>(0)?; // language
        w.write_u32::<LittleEndian>(0)?; // initial_frames
        w.write_u32::<LittleEndian>(scale)?;
        w.write_u32::<LittleEndian>(rate)?;
        w.write_u32::<LittleEndian>(0)?; // start
        self.strh_length_positions.push(w.stream_position()?);
        w.write_u32::<LittleEndian>(0)?; // length, patched on finish
        w.write_u32::<LittleEndian>(1024 * 1024)?; // suggested_buffer_size
        w.write_u32::<LittleEndian>(10_000)?; // quality
        w.write_u32::<LittleEndian>(0)?; // sample_size
        w.write_u16::<LittleEndian>(0)?; // rcFrame
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(0)?;

        // strf
        write_chunk_header(w, b"strf", strf_size)?;
        let t = &self.tracks[track];
        match &t.media {
            TrackMedia::Video { width, height, .. } => {
                w.write_u32::<LittleEndian>(40)?; // biSize
                w.write_i32::<LittleEndian>(*width as i32)?;
                w.write_i32::<LittleEndian>(*height as i32)?;
                w.write_u16::<LittleEndian>(1)?; // biPlanes
                w.write_u16::<LittleEndian>(depth)?;
                w.write_all(&t.fourcc)?; // biCompression
                w.write_u32::<LittleEndian>(width * height * (depth as u32 / 8).max(1))?;
                w.write_i32::<LittleEndian>(0)?; // biXPelsPerMeter
                w.write_i32::<LittleEndian>(0)?; // biYPelsPerMeter
                let palette_len = t.previous_palette.as_ref().map_or(0, |p| p.len() as u32);
                w.write_u32::<LittleEndian>(palette_len)?; // biClrUsed
                w.write_u32::<LittleEndian>(0)?; // biClrImportant
                if let Some(palette) = &t.previous_palette {
                    for entry in palette {
                        // RGBQUAD: blue, green, red, reserved
                        w.write_all(&[entry[2], entry[1], entry[0], 0])?;
                    }
                }
            }
            TrackMedia::Audio {
                format_tag,
                channels,
                sample_rate,
                block_align,
                bits_per_sample,
            } => {
                w.write_u16::<LittleEndian>(*format_tag)?;
                w.write_u16::<LittleEndian>(*channels)?;
                w.write_u32::<LittleEndian>(*sample_rate)?;
                w.write_u32::<LittleEndian>(*sample_rate * *block_align as u32)?;
                w.write_u16::<LittleEndian>(*block_align)?;
                w.write_u16::<LittleEndian>(*bits_per_sample)?;
                w.write_u16::<LittleEndian>(0)?; // cbSize
            }
        }

        Ok(())
    }

    /// Build the AVIPALCHANGE record for the entries that differ from the
    /// previous palette.
    ///
    /// 4-bit streams always carry the full map; only 8-bit streams diff per
    /// entry. Returns `None` when nothing changed and no record is due.
    fn palette_change_record(
        depth: u16,
        previous: Option<&[PaletteEntry]>,
        current: &[PaletteEntry],
        force: bool,
    ) -> Option<Vec<u8>> {
        let (first, last) = match previous {
            Some(prev) if prev.len() == current.len() => {
                if depth == 4 {
                    // Intentional asymmetry with the 8-bit path: 4-bit maps
                    // are always emitted whole
                    if prev == current && !force {
                        return None;
                    }
                    (0, current.len() - 1)
                } else {
                    let first = current.iter().zip(prev).position(|(c, p)| c != p);
                    match first {
                        None if !force => return None,
                        None => (0, current.len() - 1),
                        Some(first) => {
                            let last = current
                                .iter()
                                .zip(prev)
                                .rposition(|(c, p)| c != p)
                                .unwrap_or(first);
                            (first, last)
                        }
                    }
                }
            }
            _ => (0, current.len() - 1),
        };

        let count = last - first + 1;
        let mut record = Vec::with_capacity(4 + count * 4);
        record.push(first as u8);
        record.push(if count == 256 { 0 } else { count as u8 });
        record.extend_from_slice(&0u16.to_le_bytes()); // wFlags
        for entry in &current[first..=last] {
            // PALETTEENTRY: red, green, blue, flags
            record.extend_from_slice(&[entry[0], entry[1], entry[2], 0]);
        }
        Some(record)
    }

    fn write_movi_chunk(&mut self, chunk_id: [u8; 4], payload: &[u8]) -> Result<u64> {
        let movi_list_pos = self.movi_list_pos;
        let w = self.writer.as_mut().expect("checked by caller");
        let chunk_pos = w.stream_position()?;
        write_chunk_header(w, &chunk_id, payload.len() as u32)?;
        let payload_pos = w.stream_position()?;
        w.write_all(payload)?;
        if payload.len() % 2 != 0 {
            w.write_all(&[0])?;
        }
        self.index.push(IndexEntry {
            chunk_id,
            flags: 0,
            offset: (chunk_pos - movi_list_pos) as u32,
            size: payload.len() as u32,
        });
        Ok(payload_pos)
    }
}

impl<W: Write + Seek> Multiplexer for AviWriter<W> {
    fn add_track(&mut self, format: &Format) -> Result<usize> {
        if self.started {
            return Err(Error::invalid_state(
                "cannot add a track after sample data has been written",
            ));
        }
        format.require_keys(&[&MEDIA_TYPE])?;

        let media = match format.get(&MEDIA_TYPE) {
            Some(MediaType::Video) => {
                format.require_keys(&[&WIDTH, &HEIGHT])?;
                let depth = format.get_or(&DEPTH, 24) as u16;
                TrackMedia::Video {
                    width: *format.get(&WIDTH).expect("required above"),
                    height: *format.get(&HEIGHT).expect("required above"),
                    depth,
                    compression: Self::encoding_fourcc(
                        format.get_or(&ENCODING, format::ENCODING_RAW),
                    ),
                    palette: None,
                }
            }
            Some(MediaType::Audio) => {
                format.require_keys(&[&SAMPLE_RATE, &CHANNELS])?;
                let channels = *format.get(&CHANNELS).expect("required above");
                let bits = format.get_or(&DEPTH, 16) as u16;
                TrackMedia::Audio {
                    format_tag: 0x0001, // WAVE_FORMAT_PCM
                    channels,
                    sample_rate: *format.get(&SAMPLE_RATE).expect("required above"),
                    block_align: channels * (bits / 8).max(1),
                    bits_per_sample: bits,
                }
            }
            _ => {
                return Err(Error::unsupported(
                    "AVI tracks must be video or audio",
                ))
            }
        };

        let (scale, rate) = match &media {
            TrackMedia::Video { .. } => {
                let fps = format.get_or(&FRAME_RATE, Rational::new(30, 1));
                (fps.den as u32, fps.num as u32)
            }
            TrackMedia::Audio { sample_rate, .. } => (1, *sample_rate),
        };

        let fourcc = match &media {
            TrackMedia::Video { compression, .. } => *compression,
            TrackMedia::Audio { .. } => [0; 4],
        };

        self.tracks.push(WriterTrack {
            format: format.clone(),
            media,
            fourcc,
            scale,
            rate,
            samples: Vec::new(),
            time_to_samples: Vec::new(),
            sample_sizes: Vec::new(),
            chunks: Vec::new(),
            keyframes: KeyframeIndex::new(),
            previous_palette: None,
            codec: None,
        });
        Ok(self.tracks.len() - 1)
    }

    fn write(&mut self, track: usize, buffer: &mut Buffer) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_state("writer is finished"));
        }
        if track >= self.tracks.len() {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        if buffer.is_discard() {
            return Ok(());
        }
        if self.data_limit_reached {
            return Err(Error::DataLimitReached);
        }

        // Route non-matching formats through a codec from the registry
        let mut transcoded = Buffer::new();
        let source: &Buffer = if buffer.format.matches(&self.tracks[track].format) {
            buffer
        } else {
            if self.tracks[track].codec.is_none() {
                let codec = self
                    .registry
                    .find_codec(&buffer.format, &self.tracks[track].format)
                    .ok_or_else(|| {
                        Error::unsupported(format!(
                            "no codec from {:?} to track format",
                            buffer.format
                        ))
                    })?;
                self.tracks[track].codec = Some(codec);
            }
            let codec = self.tracks[track].codec.as_mut().expect("set above");
            let result = codec.process(buffer, &mut transcoded);
            if result.failed || transcoded.is_discard() {
                buffer.flags.discard = true;
                return Err(Error::codec("sample could not be encoded"));
            }
            &transcoded
        };

        // An indexed-color frame may update the palette; captured before the
        // header is written so the initial table lands in strf
        let palette_update = match (&source.data, &self.tracks[track].media) {
            (BufferData::Picture(picture), TrackMedia::Video { depth, .. })
                if *depth <= 8 && picture.palette.is_some() =>
            {
                picture.palette.clone()
            }
            _ => None,
        };
        if !self.started {
            if let Some(palette) = &palette_update {
                self.tracks[track].previous_palette = Some(palette.clone());
            }
            self.write_headers()?;
        }

        // Palette side record: diff against the previous frame's table
        let mut side_record: Option<Vec<u8>> = source.header.clone();
        if side_record.is_none() {
            if let Some(current) = &palette_update {
                let t = &self.tracks[track];
                let record = Self::palette_change_record(
                    t.depth(),
                    t.previous_palette.as_deref(),
                    current,
                    false,
                );
                if record.is_some() {
                    self.tracks[track].previous_palette = Some(current.clone());
                }
                side_record = record;
            }
        }

        let payload: Vec<u8> = match &source.data {
            BufferData::Bytes(_) => source
                .payload()
                .ok_or_else(|| Error::invalid_input("buffer payload out of range"))?
                .to_vec(),
            BufferData::Picture(picture) => picture.pixels.clone(),
            _ => return Err(Error::invalid_input("buffer carries no payload")),
        };

        let is_video = self.tracks[track].media.media_type() == MediaType::Video;
        let uncompressed = self.tracks[track]
            .format
            .get(&ENCODING)
            .map_or(true, |e| *e == format::ENCODING_RAW);
        let keyframe = !is_video || uncompressed || source.flags.keyframe;

        if let Some(record) = &side_record {
            let pc_id = stream_chunk_id(track, b"pc");
            self.write_movi_chunk(pc_id, record)?;
        }

        let suffix: &[u8; 2] = if !is_video {
            b"wb"
        } else if uncompressed {
            b"db"
        } else {
            b"dc"
        };
        let chunk_id = stream_chunk_id(track, suffix);
        let payload_pos = self.write_movi_chunk(chunk_id, &payload)?;
        if keyframe {
            self.index.last_mut().expect("just pushed").flags = AVIIF_KEYFRAME;
        }

        // Index bookkeeping
        let t = &mut self.tracks[track];
        let duration = match &t.media {
            TrackMedia::Video { .. } => t.scale.max(1) as u64 * source.sample_count.max(1),
            TrackMedia::Audio { block_align, .. } => {
                (payload.len() as u64 / (*block_align).max(1) as u64) * t.scale.max(1) as u64
            }
        };
        let sample = Sample::new(payload_pos, payload.len() as u64, duration);
        let index = t.samples.len() as u64;
        t.samples.push(sample);
        t.keyframes.push(index, keyframe);
        push_time_to_sample(&mut t.time_to_samples, sample);
        push_sample_size(&mut t.sample_sizes, sample);
        push_chunk(&mut t.chunks, sample, track as u32);

        let pos = self.writer()?.stream_position()?;
        if pos + (self.index.len() as u64 + 1) * 16 > DATA_LIMIT {
            warn!("AVI 32-bit size limit reached, refusing further samples");
            self.data_limit_reached = true;
        }
        Ok(())
    }

    fn is_data_limit_reached(&self) -> bool {
        self.data_limit_reached
    }

    fn is_empty(&self, track: usize) -> bool {
        self.tracks
            .get(track)
            .map_or(true, |t| t.samples.is_empty())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            self.write_headers()?;
        }

        let index = std::mem::take(&mut self.index);
        let movi_size_pos = self.movi_size_pos;
        let movi_list_pos = self.movi_list_pos;
        let riff_size_pos = self.riff_size_pos;
        let avih_frames_pos = self.avih_frames_pos;
        let total_frames: u32 = self
            .tracks
            .iter()
            .filter(|t| t.media.media_type() == MediaType::Video)
            .map(|t| t.samples.len() as u32)
            .max()
            .unwrap_or(0);
        let track_lengths: Vec<u32> = self
            .tracks
            .iter()
            .map(|t| t.samples.len() as u32)
            .collect();
        let strh_length_positions = self.strh_length_positions.clone();

        let w = self.writer()?;
        let movi_end = w.stream_position()?;

        // idx1
        write_chunk_header(w, b"idx1", (index.len() * 16) as u32)?;
        for entry in &index {
            w.write_all(&entry.chunk_id)?;
            w.write_u32::<LittleEndian>(entry.flags)?;
            w.write_u32::<LittleEndian>(entry.offset)?;
            w.write_u32::<LittleEndian>(entry.size)?;
        }
        let file_end = w.stream_position()?;

        // Patch size fields
        w.seek(SeekFrom::Start(riff_size_pos))?;
        w.write_u32::<LittleEndian>((file_end - riff_size_pos - 4) as u32)?;
        w.seek(SeekFrom::Start(movi_size_pos))?;
        w.write_u32::<LittleEndian>((movi_end - movi_list_pos) as u32)?;
        w.seek(SeekFrom::Start(avih_frames_pos))?;
        w.write_u32::<LittleEndian>(total_frames)?;
        for (pos, length) in strh_length_positions.iter().zip(&track_lengths) {
            w.seek(SeekFrom::Start(*pos))?;
            w.write_u32::<LittleEndian>(*length)?;
        }

        w.seek(SeekFrom::Start(file_end))?;
        w.flush()?;
        self.finished = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.finish()?;
            self.writer = None;
        }
        Ok(())
    }
}
