//! RIFF chunk primitives shared by the AVI reader and writer
//!
//! RIFF files are a tree of `fourcc|u32 size|payload` chunks with
//! little-endian size fields; `RIFF` and `LIST` chunks carry a nested list
//! of chunks after a 4-byte list type. Chunks are word-aligned: an odd-sized
//! payload is followed by one pad byte that is not counted in the size.

use crate::error::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

/// Four-character chunk id
pub type FourCc = [u8; 4];

/// Header of one RIFF chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: FourCc,
    pub size: u32,
}

impl ChunkHeader {
    /// Size of the payload including the trailing pad byte
    pub fn padded_size(&self) -> u64 {
        (self.size as u64 + 1) & !1
    }
}

/// Read a chunk header at the current position
pub fn read_chunk_header<R: Read>(reader: &mut R) -> Result<ChunkHeader> {
    let mut id = [0u8; 4];
    reader.read_exact(&mut id)?;
    let size = reader.read_u32::<LittleEndian>()?;
    Ok(ChunkHeader { id, size })
}

/// Read the 4-byte list type following a `RIFF`/`LIST` header
pub fn read_list_type<R: Read>(reader: &mut R) -> Result<FourCc> {
    let mut list_type = [0u8; 4];
    reader.read_exact(&mut list_type)?;
    Ok(list_type)
}

/// Skip the payload of the chunk, honoring word alignment
pub fn skip_chunk<R: Read + Seek>(reader: &mut R, header: &ChunkHeader) -> Result<()> {
    reader.seek(SeekFrom::Current(header.padded_size() as i64))?;
    Ok(())
}

/// Write a chunk header
pub fn write_chunk_header<W: Write>(writer: &mut W, id: &FourCc, size: u32) -> Result<()> {
    writer.write_all(id)?;
    writer.write_u32::<LittleEndian>(size)?;
    Ok(())
}

/// Write a chunk id, payload and pad byte
pub fn write_chunk<W: Write>(writer: &mut W, id: &FourCc, payload: &[u8]) -> Result<()> {
    write_chunk_header(writer, id, payload.len() as u32)?;
    writer.write_all(payload)?;
    if payload.len() % 2 != 0 {
        writer.write_all(&[0])?;
    }
    Ok(())
}

/// Bytes a chunk occupies on disk: header + word-aligned payload
pub fn chunk_disk_size(payload_len: u64) -> u64 {
    8 + ((payload_len + 1) & !1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_chunk_roundtrip() {
        let mut sink = Cursor::new(Vec::new());
        write_chunk(&mut sink, b"data", &[1, 2, 3]).unwrap();
        // 8-byte header + 3 payload + 1 pad
        assert_eq!(sink.get_ref().len(), 12);

        sink.set_position(0);
        let header = read_chunk_header(&mut sink).unwrap();
        assert_eq!(&header.id, b"data");
        assert_eq!(header.size, 3);
        assert_eq!(header.padded_size(), 4);
    }

    #[test]
    fn test_even_payload_not_padded() {
        let mut sink = Cursor::new(Vec::new());
        write_chunk(&mut sink, b"data", &[1, 2]).unwrap();
        assert_eq!(sink.get_ref().len(), 10);
        assert_eq!(chunk_disk_size(2), 10);
        assert_eq!(chunk_disk_size(3), 12);
    }
}
