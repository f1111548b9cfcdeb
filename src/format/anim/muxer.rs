//! ANIM multiplexer
//!
//! Frames arrive as already-encoded `BODY`/`DLTA` payloads and are wrapped
//! into one `FORM ILBM` each. Display durations are counted in jiffies
//! (1/60 s); incoming buffer durations are arbitrary rationals, so each
//! frame's tick count is derived from the *accumulated* input time minus the
//! ticks already written, keeping the rounding error bounded by half a tick
//! over any number of frames. All of this arithmetic is exact rational
//! arithmetic; floating point would drift across long sequences.

use super::{
    AnimationHeader, BitmapHeader, IffWriter, ANIM_BITS, ANIM_OPERATION, JIFFIES_PER_SECOND,
    OP_DIRECT,
};
use crate::error::{Error, Result};
use crate::format::Multiplexer;
use crate::media::format::{self, Format, DEPTH, ENCODING, HEIGHT, MEDIA_TYPE, PLANES, WIDTH};
use crate::media::{Buffer, PaletteEntry};
use crate::util::{MediaType, Rational};

/// ANIM multiplexer over a seekable byte sink
pub struct AnimWriter<W: std::io::Write + std::io::Seek> {
    writer: Option<IffWriter<W>>,
    track: Option<WriterTrack>,
    started: bool,
    finished: bool,
}

struct WriterTrack {
    format: Format,
    width: u16,
    height: u16,
    nb_planes: u8,
    palette: Option<Vec<PaletteEntry>>,
    frame_count: u64,
    /// Exact input time accumulated from written buffers
    input_time: Rational,
    /// Jiffies already committed to the file
    written_ticks: i64,
}

impl<W: std::io::Write + std::io::Seek> AnimWriter<W> {
    pub fn new(writer: W) -> Self {
        AnimWriter {
            writer: Some(IffWriter::new(writer)),
            track: None,
            started: false,
            finished: false,
        }
    }

    /// Set the palette written into the first frame's CMAP chunk
    pub fn set_palette(&mut self, palette: Vec<PaletteEntry>) -> Result<()> {
        if self.started {
            return Err(Error::invalid_state(
                "cannot set the palette after frames have been written",
            ));
        }
        let track = self
            .track
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no track added"))?;
        track.palette = Some(palette);
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut IffWriter<W>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("writer is closed"))
    }

    /// Finish (if needed) and hand the underlying sink back
    pub fn into_inner(mut self) -> Result<W> {
        if self.started && !self.finished {
            self.finish()?;
        }
        self.writer
            .take()
            .ok_or_else(|| Error::invalid_state("writer is closed"))?
            .finish()
    }
}

impl<W: std::io::Write + std::io::Seek> Multiplexer for AnimWriter<W> {
    fn add_track(&mut self, format: &Format) -> Result<usize> {
        if self.track.is_some() {
            return Err(Error::unsupported("ANIM files hold a single video track"));
        }
        if format.get(&MEDIA_TYPE) != Some(&MediaType::Video) {
            return Err(Error::unsupported("ANIM tracks must be video"));
        }
        format.require_keys(&[&WIDTH, &HEIGHT])?;
        let nb_planes = format
            .get(&PLANES)
            .copied()
            .or_else(|| format.get(&DEPTH).copied())
            .unwrap_or(8) as u8;

        self.track = Some(WriterTrack {
            format: format.clone(),
            width: *format.get(&WIDTH).expect("required above") as u16,
            height: *format.get(&HEIGHT).expect("required above") as u16,
            nb_planes,
            palette: None,
            frame_count: 0,
            input_time: Rational::ZERO,
            written_ticks: 0,
        });
        Ok(0)
    }

    fn write(&mut self, track: usize, buffer: &mut Buffer) -> Result<()> {
        if track != 0 {
            return Err(Error::invalid_input(format!("no such track: {}", track)));
        }
        if self.finished {
            return Err(Error::invalid_state("writer is finished"));
        }
        if self.track.is_none() {
            return Err(Error::invalid_state("no track added"));
        }
        if buffer.is_discard() {
            return Ok(());
        }
        if buffer.format.get(&ENCODING).map_or(false, |e| {
            *e != format::ENCODING_ANIM_OP
        }) {
            return Err(Error::unsupported(
                "ANIM frames must arrive as encoded BODY/DLTA payloads",
            ));
        }

        let payload = buffer
            .payload()
            .ok_or_else(|| Error::invalid_input("buffer carries no payload"))?
            .to_vec();
        let operation = buffer.format.get_or(&ANIM_OPERATION, OP_DIRECT as u32) as u8;
        let bits = buffer.format.get_or(&ANIM_BITS, 0);
        let buffer_duration = buffer.buffer_duration();

        // Duration bookkeeping: the frame's tick count is the accumulated
        // input time rounded to jiffies, minus what earlier frames already
        // consumed. Per-frame rounding never compounds.
        let (rel_time, abs_time) = {
            let t = self.track.as_mut().expect("checked above");
            t.input_time = t.input_time + buffer_duration;
            let target_ticks = t.input_time.mul_int(JIFFIES_PER_SECOND).round_to(1);
            let rel = (target_ticks - t.written_ticks).max(1);
            t.written_ticks += rel;
            (rel as u32, t.written_ticks as u32)
        };

        let first_frame = {
            let t = self.track.as_ref().expect("checked above");
            t.frame_count == 0
        };

        if !self.started {
            let (width, height, nb_planes, palette) = {
                let t = self.track.as_ref().expect("checked above");
                (t.width, t.height, t.nb_planes, t.palette.clone())
            };
            let writer = self.writer()?;
            writer.open_form(b"ANIM")?;
            // The first ILBM carries the bitmap header and palette
            writer.open_form(b"ILBM")?;
            let mut bmhd = Vec::new();
            BitmapHeader {
                width,
                height,
                nb_planes,
                page_width: width as i16,
                page_height: height as i16,
                ..Default::default()
            }
            .write(&mut bmhd)?;
            writer.write_chunk(b"BMHD", &bmhd)?;
            if let Some(palette) = palette {
                let mut cmap = Vec::with_capacity(palette.len() * 3);
                for entry in palette {
                    cmap.extend_from_slice(&entry);
                }
                writer.write_chunk(b"CMAP", &cmap)?;
            }
            self.started = true;
        } else {
            self.writer()?.open_form(b"ILBM")?;
        }

        let (width, height) = {
            let t = self.track.as_ref().expect("checked above");
            (t.width, t.height)
        };
        let writer = self.writer()?;
        let mut anhd = Vec::new();
        AnimationHeader {
            operation,
            bits,
            width,
            height,
            abs_time,
            rel_time,
            interleave: 1,
            ..Default::default()
        }
        .write(&mut anhd)?;
        writer.write_chunk(b"ANHD", &anhd)?;
        let chunk_id: &[u8; 4] = if first_frame && operation == OP_DIRECT {
            b"BODY"
        } else {
            b"DLTA"
        };
        writer.write_chunk(chunk_id, &payload)?;
        writer.close_form()?;

        self.track.as_mut().expect("checked above").frame_count += 1;
        Ok(())
    }

    fn is_data_limit_reached(&self) -> bool {
        // IFF FORM sizes are 32-bit as well, but ANIM files stay far below
        // the ceiling in practice; the writer does not enforce it
        false
    }

    fn is_empty(&self, track: usize) -> bool {
        track != 0
            || self
                .track
                .as_ref()
                .map_or(true, |t| t.frame_count == 0)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            return Err(Error::invalid_state("no frames written"));
        }
        self.writer()?.close_form()?;
        self.finished = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        if self.started && !self.finished {
            self.finish()?;
        }
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::anim::{AnimReader, OP_BYTE_VERTICAL};
    use crate::format::Demultiplexer;
    use std::io::Cursor;

    fn frame_format(width: u32, height: u32, operation: u8) -> Format {
        Format::new()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, format::ENCODING_ANIM_OP)
            .with(&WIDTH, width)
            .with(&HEIGHT, height)
            .with(&PLANES, 1u32)
            .with(&ANIM_OPERATION, operation as u32)
            .with(&ANIM_BITS, 0u32)
    }

    #[test]
    fn test_duration_accumulation_has_no_drift() {
        // 1/30 s per frame over 3000 frames: exactly 2 jiffies each
        let mut writer = AnimWriter::new(Cursor::new(Vec::new()));
        writer.add_track(&frame_format(16, 4, OP_DIRECT)).unwrap();
        for i in 0..3000u32 {
            let mut buffer = Buffer::new();
            buffer.format = frame_format(
                16,
                4,
                if i == 0 { OP_DIRECT } else { OP_BYTE_VERTICAL },
            );
            buffer.set_bytes(vec![0; 8]);
            buffer.sample_duration = Rational::new(1, 30);
            buffer.sample_count = 1;
            writer.write(0, &mut buffer).unwrap();
        }
        let t = writer.track.as_ref().unwrap();
        assert_eq!(t.written_ticks, 3000 * 2);
        // Accumulated input time matches the written ticks exactly
        assert_eq!(
            t.input_time.mul_int(JIFFIES_PER_SECOND),
            Rational::from_int(t.written_ticks)
        );
    }

    #[test]
    fn test_uneven_durations_stay_within_half_a_tick() {
        // 1/24 s per frame: 2.5 jiffies, unrepresentable per frame
        let mut writer = AnimWriter::new(Cursor::new(Vec::new()));
        writer.add_track(&frame_format(16, 4, OP_DIRECT)).unwrap();
        for i in 0..999u32 {
            let mut buffer = Buffer::new();
            buffer.format = frame_format(
                16,
                4,
                if i == 0 { OP_DIRECT } else { OP_BYTE_VERTICAL },
            );
            buffer.set_bytes(vec![0; 8]);
            buffer.sample_duration = Rational::new(1, 24);
            buffer.sample_count = 1;
            writer.write(0, &mut buffer).unwrap();

            let t = writer.track.as_ref().unwrap();
            let target = t.input_time.mul_int(JIFFIES_PER_SECOND);
            let error = target - Rational::from_int(t.written_ticks);
            assert!(
                error <= Rational::new(1, 2) && error >= Rational::new(-1, 2),
                "drift exceeded half a tick at frame {}",
                i
            );
        }
    }

    #[test]
    fn test_roundtrip_through_reader() {
        let mut writer = AnimWriter::new(Cursor::new(Vec::new()));
        writer.add_track(&frame_format(16, 4, OP_DIRECT)).unwrap();
        writer.set_palette(vec![[0, 0, 0], [255, 255, 255]]).unwrap();

        let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i + 1; 8]).collect();
        for (i, payload) in payloads.iter().enumerate() {
            let mut buffer = Buffer::new();
            buffer.format = frame_format(
                16,
                4,
                if i == 0 { OP_DIRECT } else { OP_BYTE_VERTICAL },
            );
            buffer.set_bytes(payload.clone());
            buffer.sample_duration = Rational::new(1, 20); // 3 jiffies
            buffer.sample_count = 1;
            writer.write(0, &mut buffer).unwrap();
        }
        writer.finish().unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let mut reader = AnimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.track_count(), 1);
        assert_eq!(reader.sample_count(0).unwrap(), 4);
        assert_eq!(reader.palette().unwrap().len(), 2);
        assert_eq!(
            reader.track_duration(0).unwrap(),
            Rational::new(4 * 3, JIFFIES_PER_SECOND)
        );

        for (i, payload) in payloads.iter().enumerate() {
            let mut buffer = Buffer::new();
            reader.read(0, &mut buffer).unwrap();
            assert_eq!(buffer.payload(), Some(payload.as_slice()));
            assert_eq!(buffer.sequence, i as u64);
            assert_eq!(buffer.flags.keyframe, i == 0);
            assert_eq!(
                buffer.time_stamp,
                Rational::new(3 * i as i64, JIFFIES_PER_SECOND)
            );
        }
    }
}
