//! IFF ANIM (Amiga cel animation) container format
//!
//! An ANIM file is an IFF `FORM ANIM` holding one `FORM ILBM` per frame.
//! The first frame carries a `BMHD` bitmap header, an optional `CMAP`
//! palette and a `BODY` key frame; subsequent frames carry an `ANHD`
//! animation header (operation code + bit flags selecting the delta
//! encoding) and a `DLTA` delta payload. Sound commands (`SCTL`) attach to
//! the frame they precede. IFF chunks are big-endian and word-aligned.

pub mod demuxer;
pub mod muxer;

pub use demuxer::AnimReader;
pub use muxer::AnimWriter;

use crate::error::{Error, Result};
use crate::media::format::FormatKey;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

/// Jiffies per second: ANIM timing is counted in 1/60 s ticks
pub const JIFFIES_PER_SECOND: i64 = 60;

// Delta operation codes carried in ANHD
pub const OP_DIRECT: u8 = 0;
pub const OP_BYTE_VERTICAL: u8 = 5;
pub const OP_SHORT_LONG_VERTICAL: u8 = 7;
pub const OP_GENERAL_VERTICAL: u8 = 8;
pub const OP_J: u8 = 74;

// ANHD bit flags
pub const BIT_LONG_DATA: u32 = 1 << 0;
pub const BIT_XOR: u32 = 1 << 1;
pub const BIT_ONE_INFO_LIST: u32 = 1 << 2;
pub const BIT_RLC: u32 = 1 << 3;
pub const BIT_VERTICAL: u32 = 1 << 4;

/// Per-frame delta operation code, attached to sample formats by the reader
pub const ANIM_OPERATION: FormatKey<u32> = FormatKey::new("animOperation");

/// Per-frame ANHD bit flags, attached to sample formats by the reader
pub const ANIM_BITS: FormatKey<u32> = FormatKey::new("animBits");

/// ILBM bitmap header (BMHD)
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapHeader {
    pub width: u16,
    pub height: u16,
    pub x: i16,
    pub y: i16,
    pub nb_planes: u8,
    pub masking: u8,
    pub compression: u8,
    pub transparent_color: u16,
    pub x_aspect: u8,
    pub y_aspect: u8,
    pub page_width: i16,
    pub page_height: i16,
}

impl BitmapHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let width = reader.read_u16::<BigEndian>()?;
        let height = reader.read_u16::<BigEndian>()?;
        let x = reader.read_i16::<BigEndian>()?;
        let y = reader.read_i16::<BigEndian>()?;
        let nb_planes = reader.read_u8()?;
        let masking = reader.read_u8()?;
        let compression = reader.read_u8()?;
        let _pad = reader.read_u8()?;
        let transparent_color = reader.read_u16::<BigEndian>()?;
        let x_aspect = reader.read_u8()?;
        let y_aspect = reader.read_u8()?;
        let page_width = reader.read_i16::<BigEndian>()?;
        let page_height = reader.read_i16::<BigEndian>()?;
        Ok(BitmapHeader {
            width,
            height,
            x,
            y,
            nb_planes,
            masking,
            compression,
            transparent_color,
            x_aspect,
            y_aspect,
            page_width,
            page_height,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.width)?;
        writer.write_u16::<BigEndian>(self.height)?;
        writer.write_i16::<BigEndian>(self.x)?;
        writer.write_i16::<BigEndian>(self.y)?;
        writer.write_u8(self.nb_planes)?;
        writer.write_u8(self.masking)?;
        writer.write_u8(self.compression)?;
        writer.write_u8(0)?;
        writer.write_u16::<BigEndian>(self.transparent_color)?;
        writer.write_u8(self.x_aspect)?;
        writer.write_u8(self.y_aspect)?;
        writer.write_i16::<BigEndian>(self.page_width)?;
        writer.write_i16::<BigEndian>(self.page_height)?;
        Ok(())
    }
}

/// Animation header (ANHD)
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimationHeader {
    pub operation: u8,
    pub mask: u8,
    pub width: u16,
    pub height: u16,
    pub x: i16,
    pub y: i16,
    /// Absolute display time in jiffies
    pub abs_time: u32,
    /// Display duration relative to the previous frame, in jiffies
    pub rel_time: u32,
    pub interleave: u8,
    pub bits: u32,
}

impl AnimationHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let operation = reader.read_u8()?;
        let mask = reader.read_u8()?;
        let width = reader.read_u16::<BigEndian>()?;
        let height = reader.read_u16::<BigEndian>()?;
        let x = reader.read_i16::<BigEndian>()?;
        let y = reader.read_i16::<BigEndian>()?;
        let abs_time = reader.read_u32::<BigEndian>()?;
        let rel_time = reader.read_u32::<BigEndian>()?;
        let interleave = reader.read_u8()?;
        let _pad = reader.read_u8()?;
        let bits = reader.read_u32::<BigEndian>()?;
        let mut pad = [0u8; 16];
        reader.read_exact(&mut pad)?;
        Ok(AnimationHeader {
            operation,
            mask,
            width,
            height,
            x,
            y,
            abs_time,
            rel_time,
            interleave,
            bits,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.operation)?;
        writer.write_u8(self.mask)?;
        writer.write_u16::<BigEndian>(self.width)?;
        writer.write_u16::<BigEndian>(self.height)?;
        writer.write_i16::<BigEndian>(self.x)?;
        writer.write_i16::<BigEndian>(self.y)?;
        writer.write_u32::<BigEndian>(self.abs_time)?;
        writer.write_u32::<BigEndian>(self.rel_time)?;
        writer.write_u8(self.interleave)?;
        writer.write_u8(0)?;
        writer.write_u32::<BigEndian>(self.bits)?;
        writer.write_all(&[0u8; 16])?;
        Ok(())
    }

    /// Size of the serialized header
    pub const SIZE: u32 = 40;
}

/// Per-frame sound command (SCTL)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCommand {
    /// Command code (play, stop, set volume, ...)
    pub command: u16,
    pub volume: u16,
    /// Amiga audio channels the command drives, one bit per channel
    pub channel_mask: u32,
    /// Sound identifier the command refers to
    pub sound: u32,
}

impl AudioCommand {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(AudioCommand {
            command: reader.read_u16::<BigEndian>()?,
            volume: reader.read_u16::<BigEndian>()?,
            channel_mask: reader.read_u32::<BigEndian>()?,
            sound: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.command)?;
        writer.write_u16::<BigEndian>(self.volume)?;
        writer.write_u32::<BigEndian>(self.channel_mask)?;
        writer.write_u32::<BigEndian>(self.sound)?;
        Ok(())
    }

    pub const SIZE: u32 = 12;
}

/// Attach a command to a frame's command list, dropping it when its channel
/// mask overlaps a command already present. Earlier commands win; a frame
/// cannot drive one audio channel twice.
pub fn add_audio_command(commands: &mut Vec<AudioCommand>, command: AudioCommand) {
    let taken: u32 = commands.iter().map(|c| c.channel_mask).fold(0, |a, m| a | m);
    if taken & command.channel_mask == 0 {
        commands.push(command);
    }
}

// ---------------------------------------------------------------------------
// IFF chunk primitives (big-endian cousins of the RIFF helpers)
// ---------------------------------------------------------------------------

/// Header of one IFF chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IffChunk {
    pub id: [u8; 4],
    pub size: u32,
}

impl IffChunk {
    pub fn padded_size(&self) -> u64 {
        (self.size as u64 + 1) & !1
    }
}

pub fn read_iff_chunk<R: Read>(reader: &mut R) -> Result<IffChunk> {
    let mut id = [0u8; 4];
    reader.read_exact(&mut id)?;
    let size = reader.read_u32::<BigEndian>()?;
    Ok(IffChunk { id, size })
}

pub fn write_iff_chunk<W: Write>(writer: &mut W, id: &[u8; 4], payload: &[u8]) -> Result<()> {
    writer.write_all(id)?;
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    if payload.len() % 2 != 0 {
        writer.write_all(&[0])?;
    }
    Ok(())
}

/// Stack-based IFF group writer; sizes are patched on close
pub struct IffWriter<W: Write + Seek> {
    writer: W,
    stack: Vec<u64>,
}

impl<W: Write + Seek> IffWriter<W> {
    pub fn new(writer: W) -> Self {
        IffWriter {
            writer,
            stack: Vec::new(),
        }
    }

    /// Open a `FORM` group of the given type
    pub fn open_form(&mut self, form_type: &[u8; 4]) -> Result<()> {
        self.writer.write_all(b"FORM")?;
        self.stack.push(self.writer.stream_position()?);
        self.writer.write_u32::<BigEndian>(0)?;
        self.writer.write_all(form_type)?;
        Ok(())
    }

    /// Close the innermost group, patching its size field
    pub fn close_form(&mut self) -> Result<()> {
        let size_pos = self
            .stack
            .pop()
            .ok_or_else(|| Error::invalid_state("no open FORM to close"))?;
        let end = self.writer.stream_position()?;
        let size = end - size_pos - 4;
        self.writer.seek(SeekFrom::Start(size_pos))?;
        self.writer.write_u32::<BigEndian>(size as u32)?;
        self.writer.seek(SeekFrom::Start(end))?;
        if size % 2 != 0 {
            self.writer.write_all(&[0])?;
        }
        Ok(())
    }

    /// Write a leaf chunk into the current group
    pub fn write_chunk(&mut self, id: &[u8; 4], payload: &[u8]) -> Result<()> {
        write_iff_chunk(&mut self.writer, id, payload)
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn finish(mut self) -> Result<W> {
        if !self.stack.is_empty() {
            return Err(Error::invalid_state(format!(
                "{} FORM group(s) left open",
                self.stack.len()
            )));
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_iff_chunk_roundtrip() {
        let mut sink = Cursor::new(Vec::new());
        write_iff_chunk(&mut sink, b"BODY", &[1, 2, 3]).unwrap();
        assert_eq!(sink.get_ref().len(), 12); // header + payload + pad

        sink.set_position(0);
        let chunk = read_iff_chunk(&mut sink).unwrap();
        assert_eq!(&chunk.id, b"BODY");
        assert_eq!(chunk.size, 3);
        assert_eq!(chunk.padded_size(), 4);
    }

    #[test]
    fn test_anhd_roundtrip() {
        let header = AnimationHeader {
            operation: OP_BYTE_VERTICAL,
            bits: BIT_XOR,
            width: 320,
            height: 200,
            rel_time: 3,
            ..Default::default()
        };
        let mut sink = Vec::new();
        header.write(&mut sink).unwrap();
        assert_eq!(sink.len(), AnimationHeader::SIZE as usize);

        let parsed = AnimationHeader::read(&mut Cursor::new(sink)).unwrap();
        assert_eq!(parsed.operation, OP_BYTE_VERTICAL);
        assert_eq!(parsed.bits, BIT_XOR);
        assert_eq!(parsed.width, 320);
        assert_eq!(parsed.rel_time, 3);
    }

    #[test]
    fn test_audio_command_dedup_by_channel_mask() {
        let mut commands = Vec::new();
        add_audio_command(
            &mut commands,
            AudioCommand {
                command: 1,
                volume: 64,
                channel_mask: 0b0011,
                sound: 1,
            },
        );
        // Overlapping mask: dropped
        add_audio_command(
            &mut commands,
            AudioCommand {
                command: 1,
                volume: 64,
                channel_mask: 0b0010,
                sound: 2,
            },
        );
        // Disjoint mask: kept
        add_audio_command(
            &mut commands,
            AudioCommand {
                command: 1,
                volume: 64,
                channel_mask: 0b1100,
                sound: 3,
            },
        );
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].sound, 3);
    }

    #[test]
    fn test_form_writer_patches_sizes() {
        let mut writer = IffWriter::new(Cursor::new(Vec::new()));
        writer.open_form(b"ANIM").unwrap();
        writer.write_chunk(b"BODY", &[0; 6]).unwrap();
        writer.close_form().unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert_eq!(&bytes[0..4], b"FORM");
        // form type + chunk header + payload
        assert_eq!(&bytes[4..8], &(4u32 + 8 + 6).to_be_bytes());
        assert_eq!(&bytes[8..12], b"ANIM");
    }
}
