//! QuickTime file format (QTFF) atom streams
//!
//! A QuickTime file is a tree of atoms: a 32-bit size (counting the header),
//! a four-character type, and the payload. A size of 1 switches to a 64-bit
//! extended size stored after the type; a `wide` placeholder atom written
//! immediately before a data atom reserves the 8 bytes needed to upgrade it
//! to the extended form in place once its payload grows past 4 GiB.
//!
//! [`AtomWriter`] keeps a stack of open atoms whose size fields are patched
//! on [`AtomWriter::close_atom`]; [`AtomReader`] mirrors it with a
//! [`AtomReader::push_atom`]/[`AtomReader::pop_atom`] cursor stack.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

/// Four-character atom type
pub type AtomType = [u8; 4];

/// Payloads larger than this need the 64-bit extended size
const EXTENDED_SIZE_THRESHOLD: u64 = u32::MAX as u64;

/// A parsed atom header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom {
    pub atom_type: AtomType,
    /// Total size including the header
    pub size: u64,
    /// Absolute offset of the payload
    pub data_offset: u64,
    /// Size of the header (8, or 16 with an extended size)
    pub header_size: u64,
}

impl Atom {
    /// Payload size in bytes
    pub fn data_size(&self) -> u64 {
        self.size - self.header_size
    }

    /// Absolute offset just past the atom
    pub fn end_offset(&self) -> u64 {
        self.data_offset + self.data_size()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenAtom {
    /// Offset of the size field
    header_offset: u64,
    /// The atom was preceded by a `wide` placeholder
    has_wide_placeholder: bool,
    atom_type: AtomType,
}

/// Stack-based atom writer
pub struct AtomWriter<W: Write + Seek> {
    writer: W,
    stack: Vec<OpenAtom>,
}

impl<W: Write + Seek> AtomWriter<W> {
    pub fn new(writer: W) -> Self {
        AtomWriter {
            writer,
            stack: Vec::new(),
        }
    }

    /// Open an atom; its size field is patched when the matching
    /// [`close_atom`](Self::close_atom) runs
    pub fn open_atom(&mut self, atom_type: AtomType) -> Result<()> {
        let header_offset = self.writer.stream_position()?;
        self.writer.write_u32::<BigEndian>(0)?;
        self.writer.write_all(&atom_type)?;
        self.stack.push(OpenAtom {
            header_offset,
            has_wide_placeholder: false,
            atom_type,
        });
        Ok(())
    }

    /// Open an atom preceded by a `wide` placeholder so it can grow past
    /// 4 GiB without rewriting the file
    pub fn open_wide_atom(&mut self, atom_type: AtomType) -> Result<()> {
        let header_offset = self.writer.stream_position()?;
        // The placeholder is a complete, valid atom of size 8
        self.writer.write_u32::<BigEndian>(8)?;
        self.writer.write_all(b"wide")?;
        self.writer.write_u32::<BigEndian>(0)?;
        self.writer.write_all(&atom_type)?;
        self.stack.push(OpenAtom {
            header_offset,
            has_wide_placeholder: true,
            atom_type,
        });
        Ok(())
    }

    /// Close the innermost open atom, patching its size field.
    ///
    /// An atom opened with [`open_wide_atom`](Self::open_wide_atom) whose
    /// payload outgrew the 32-bit field is upgraded in place: the header
    /// slides into the placeholder and the size moves to the 64-bit
    /// extended form.
    pub fn close_atom(&mut self) -> Result<()> {
        let open = self
            .stack
            .pop()
            .ok_or_else(|| Error::invalid_state("no open atom to close"))?;
        let end = self.writer.stream_position()?;

        if open.has_wide_placeholder {
            let content_size = end - open.header_offset - 8;
            if content_size > EXTENDED_SIZE_THRESHOLD {
                // Upgrade: size=1 marker plus 64-bit size, consuming the
                // placeholder bytes
                self.writer.seek(SeekFrom::Start(open.header_offset))?;
                self.writer.write_u32::<BigEndian>(1)?;
                self.writer.write_all(&open.atom_type)?;
                self.writer.write_u64::<BigEndian>(content_size + 8)?;
            } else {
                self.writer.seek(SeekFrom::Start(open.header_offset + 8))?;
                self.writer.write_u32::<BigEndian>(content_size as u32)?;
            }
        } else {
            let size = end - open.header_offset;
            if size > EXTENDED_SIZE_THRESHOLD {
                return Err(Error::format(
                    "atom outgrew its 32-bit size field; open it with open_wide_atom",
                ));
            }
            self.writer.seek(SeekFrom::Start(open.header_offset))?;
            self.writer.write_u32::<BigEndian>(size as u32)?;
        }

        self.writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Write a complete leaf atom in one call
    pub fn write_atom(&mut self, atom_type: AtomType, payload: &[u8]) -> Result<()> {
        self.open_atom(atom_type)?;
        self.writer.write_all(payload)?;
        self.close_atom()
    }

    /// Write payload bytes into the currently open atom
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Depth of the open-atom stack
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Finish writing; all atoms must be closed
    pub fn finish(mut self) -> Result<W> {
        if !self.stack.is_empty() {
            return Err(Error::invalid_state(format!(
                "{} atom(s) left open",
                self.stack.len()
            )));
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Stack-based atom reader
pub struct AtomReader<R: Read + Seek> {
    reader: R,
    stack: Vec<Atom>,
}

impl<R: Read + Seek> AtomReader<R> {
    pub fn new(reader: R) -> Self {
        AtomReader {
            reader,
            stack: Vec::new(),
        }
    }

    /// Read the atom header at the cursor and descend into its payload
    pub fn push_atom(&mut self) -> Result<Atom> {
        let header_offset = self.reader.stream_position()?;
        let size32 = self.reader.read_u32::<BigEndian>()?;
        let mut atom_type = [0u8; 4];
        self.reader.read_exact(&mut atom_type)?;

        // A 'wide' placeholder just precedes the atom it reserves space
        // for; step over it transparently
        if &atom_type == b"wide" && size32 == 8 {
            return self.push_atom();
        }

        let (size, header_size) = match size32 {
            1 => (self.reader.read_u64::<BigEndian>()?, 16),
            0 => {
                // Size 0 means "to end of file"
                let pos = self.reader.stream_position()?;
                let end = self.reader.seek(SeekFrom::End(0))?;
                self.reader.seek(SeekFrom::Start(pos))?;
                (end - header_offset, 8)
            }
            n => (n as u64, 8),
        };

        if size < header_size {
            return Err(Error::format("atom size smaller than its header"));
        }

        let atom = Atom {
            atom_type,
            size,
            data_offset: header_offset + header_size,
            header_size,
        };
        self.stack.push(atom);
        Ok(atom)
    }

    /// Leave the innermost atom, seeking past its payload
    pub fn pop_atom(&mut self) -> Result<()> {
        let atom = self
            .stack
            .pop()
            .ok_or_else(|| Error::invalid_state("no atom to pop"))?;
        self.reader.seek(SeekFrom::Start(atom.end_offset()))?;
        Ok(())
    }

    /// The innermost atom, if any
    pub fn current(&self) -> Option<&Atom> {
        self.stack.last()
    }

    /// Whether the cursor still has bytes left inside the innermost atom
    pub fn has_remaining(&mut self) -> Result<bool> {
        match self.stack.last() {
            Some(atom) => Ok(self.reader.stream_position()? < atom.end_offset()),
            None => Ok(true),
        }
    }

    /// Read the payload of the innermost atom from the cursor to its end
    pub fn read_data(&mut self) -> Result<Vec<u8>> {
        let atom = *self
            .stack
            .last()
            .ok_or_else(|| Error::invalid_state("no atom to read from"))?;
        let pos = self.reader.stream_position()?;
        let remaining = atom.end_offset().saturating_sub(pos);
        let mut data = vec![0u8; remaining as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Give the inner reader back
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_nested_atoms_roundtrip() {
        let mut writer = AtomWriter::new(Cursor::new(Vec::new()));
        writer.open_atom(*b"moov").unwrap();
        writer.open_atom(*b"trak").unwrap();
        writer.write_data(&[1, 2, 3, 4]).unwrap();
        writer.close_atom().unwrap();
        writer.write_atom(*b"free", &[0; 4]).unwrap();
        writer.close_atom().unwrap();
        let cursor = writer.finish().unwrap();

        let mut reader = AtomReader::new(Cursor::new(cursor.into_inner()));
        let moov = reader.push_atom().unwrap();
        assert_eq!(&moov.atom_type, b"moov");
        assert_eq!(moov.data_size(), 12 + 12);

        let trak = reader.push_atom().unwrap();
        assert_eq!(&trak.atom_type, b"trak");
        assert_eq!(reader.read_data().unwrap(), vec![1, 2, 3, 4]);
        reader.pop_atom().unwrap();

        let free = reader.push_atom().unwrap();
        assert_eq!(&free.atom_type, b"free");
        reader.pop_atom().unwrap();
        reader.pop_atom().unwrap();
    }

    #[test]
    fn test_close_patches_size() {
        let mut writer = AtomWriter::new(Cursor::new(Vec::new()));
        writer.open_atom(*b"mdat").unwrap();
        writer.write_data(&[0u8; 100]).unwrap();
        writer.close_atom().unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(&bytes[0..4], &108u32.to_be_bytes());
        assert_eq!(&bytes[4..8], b"mdat");
    }

    #[test]
    fn test_wide_placeholder_small_payload() {
        let mut writer = AtomWriter::new(Cursor::new(Vec::new()));
        writer.open_wide_atom(*b"mdat").unwrap();
        writer.write_data(&[7u8; 10]).unwrap();
        writer.close_atom().unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        // Placeholder survives as a free-standing wide atom
        assert_eq!(&bytes[0..4], &8u32.to_be_bytes());
        assert_eq!(&bytes[4..8], b"wide");
        assert_eq!(&bytes[8..12], &18u32.to_be_bytes());
        assert_eq!(&bytes[12..16], b"mdat");

        // The reader steps over the placeholder transparently
        let mut reader = AtomReader::new(Cursor::new(bytes));
        let atom = reader.push_atom().unwrap();
        assert_eq!(&atom.atom_type, b"mdat");
        assert_eq!(reader.read_data().unwrap(), vec![7u8; 10]);
    }

    #[test]
    fn test_unbalanced_close_fails() {
        let mut writer = AtomWriter::new(Cursor::new(Vec::new()));
        assert!(writer.close_atom().is_err());

        writer.open_atom(*b"moov").unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_extended_size_parsing() {
        // Hand-built atom with a 64-bit size
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&(16u64 + 4).to_be_bytes());
        bytes.extend_from_slice(&[9, 9, 9, 9]);

        let mut reader = AtomReader::new(Cursor::new(bytes));
        let atom = reader.push_atom().unwrap();
        assert_eq!(atom.header_size, 16);
        assert_eq!(atom.data_size(), 4);
        assert_eq!(reader.read_data().unwrap(), vec![9, 9, 9, 9]);
    }
}
