//! ANIM delta decoding
//!
//! All delta variants patch the previous frame's planar bitmap in place.
//! Vertical formats process one byte (or word) column of a bitplane at a
//! time: each column starts with an op count, and ops encode skip /
//! literal-copy / repeat-run instructions down the column. The payload
//! starts with a 16-entry table of per-plane offsets locating each plane's
//! op stream.
//!
//! Corrupt deltas (an op stream running past the plane buffer) are handled
//! by a leniency policy: by default the first occurrence is logged and the
//! frame decode stops where it is, letting playback continue, since legacy
//! capture files are full of mildly malformed tails. Strict mode turns the
//! same condition into a codec error.

use super::BitmapImage;
use crate::error::{Error, Result};
use crate::format::anim::{
    BIT_LONG_DATA, BIT_XOR, OP_BYTE_VERTICAL, OP_DIRECT, OP_GENERAL_VERTICAL, OP_J,
    OP_SHORT_LONG_VERTICAL,
};
use tracing::warn;

/// How the decoder treats corrupt delta payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Leniency {
    /// Log the first corrupt frame, silently ignore subsequent ones, and
    /// keep whatever part of the frame decoded
    #[default]
    LogOnce,
    /// Fail the decode with a codec error
    Strict,
}

/// Bounds of the pixels a decode actually touched, for partial redraws.
/// Starts maximally inverted and is narrowed by each touched column/block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl DirtyRect {
    fn inverted(width: u32, height: u32) -> Self {
        DirtyRect {
            left: width,
            top: height,
            right: 0,
            bottom: 0,
        }
    }

    fn full(width: u32, height: u32) -> Self {
        DirtyRect {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    fn touch(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        self.left = self.left.min(x0);
        self.top = self.top.min(y0);
        self.right = self.right.max(x1);
        self.bottom = self.bottom.max(y1);
    }

    /// Whether the decode touched no pixels at all
    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }
}

/// Signals an op stream running past its plane buffer
struct Corrupt;

/// Bounds-checked cursor over a delta payload
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    fn u8(&mut self) -> std::result::Result<u8, Corrupt> {
        let byte = *self.data.get(self.pos).ok_or(Corrupt)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> std::result::Result<u16, Corrupt> {
        let hi = self.u8()? as u16;
        let lo = self.u8()? as u16;
        Ok(hi << 8 | lo)
    }

    fn u32(&mut self) -> std::result::Result<u32, Corrupt> {
        let hi = self.u16()? as u32;
        let lo = self.u16()? as u32;
        Ok(hi << 16 | lo)
    }

    fn bytes(&mut self, count: usize) -> std::result::Result<&'a [u8], Corrupt> {
        let slice = self.data.get(self.pos..self.pos + count).ok_or(Corrupt)?;
        self.pos += count;
        Ok(slice)
    }
}

/// Whether a frame of the given encoding can be decoded against either its
/// predecessor or its successor, enabling reverse playback.
///
/// Key frames stand alone; XOR-based deltas are their own inverse; the "J"
/// format always applies by XOR. Stored-value deltas only decode forward.
pub fn is_bidirectional(operation: u8, bits: u32) -> bool {
    match operation {
        OP_DIRECT => true,
        OP_BYTE_VERTICAL => bits & BIT_XOR != 0,
        OP_J => true,
        _ => false,
    }
}

/// Stateful delta decoder; owns the leniency policy and the log-once flag
pub struct AnimDeltaDecoder {
    leniency: Leniency,
    corruption_logged: bool,
    last_dirty: Option<DirtyRect>,
}

impl AnimDeltaDecoder {
    pub fn new(leniency: Leniency) -> Self {
        AnimDeltaDecoder {
            leniency,
            corruption_logged: false,
            last_dirty: None,
        }
    }

    /// Dirty rectangle computed by the most recent decode
    pub fn last_dirty_rect(&self) -> Option<&DirtyRect> {
        self.last_dirty.as_ref()
    }

    /// Forget decode history; the log-once flag survives a reset, the
    /// policy is per decoder instance
    pub fn reset(&mut self) {
        self.last_dirty = None;
    }

    /// Apply one frame's payload to the bitmap in place and return the
    /// dirty rectangle.
    ///
    /// The decoder has exclusive mutable access to `bitmap` while decoding;
    /// callers that hand frames elsewhere must clone them first.
    pub fn decode(
        &mut self,
        operation: u8,
        bits: u32,
        payload: &[u8],
        bitmap: &mut BitmapImage,
    ) -> Result<DirtyRect> {
        let mut dirty = DirtyRect::inverted(bitmap.width, bitmap.height);

        let outcome = match operation {
            OP_DIRECT => {
                decode_body(payload, bitmap).map(|_| {
                    dirty = DirtyRect::full(bitmap.width, bitmap.height);
                })
            }
            OP_BYTE_VERTICAL => {
                decode_byte_vertical(payload, bitmap, bits & BIT_XOR != 0, &mut dirty)
            }
            OP_SHORT_LONG_VERTICAL => {
                let word = if bits & BIT_LONG_DATA != 0 { 4 } else { 2 };
                decode_split_vertical(payload, bitmap, word, &mut dirty)
            }
            OP_GENERAL_VERTICAL => {
                let word = if bits & BIT_LONG_DATA != 0 { 4 } else { 2 };
                decode_word_vertical(payload, bitmap, word, &mut dirty)
            }
            OP_J => decode_j(payload, bitmap, &mut dirty),
            other => {
                return Err(Error::codec(format!(
                    "unknown ANIM delta operation: {}",
                    other
                )))
            }
        };

        if outcome.is_err() {
            match self.leniency {
                Leniency::LogOnce => {
                    if !self.corruption_logged {
                        warn!(
                            operation,
                            "corrupt ANIM delta, continuing with a partial frame"
                        );
                        self.corruption_logged = true;
                    }
                }
                Leniency::Strict => {
                    return Err(Error::codec("corrupt ANIM delta payload"));
                }
            }
        }

        self.last_dirty = Some(dirty);
        Ok(dirty)
    }
}

/// Key frame: uncompressed ILBM BODY, rows interleaved across planes
fn decode_body(payload: &[u8], bitmap: &mut BitmapImage) -> std::result::Result<(), Corrupt> {
    let bpr = bitmap.bytes_per_row;
    let height = bitmap.height as usize;
    let depth = bitmap.depth;
    let mut cursor = Cursor::new(payload, 0);
    for y in 0..height {
        for plane in 0..depth {
            let src = cursor.bytes(bpr)?;
            let dst = &mut bitmap.plane_mut(plane)[y * bpr..y * bpr + bpr];
            dst.copy_from_slice(src);
        }
    }
    Ok(())
}

/// Byte-vertical run length (operation 5): per plane, per byte column, an
/// op count followed by skip / literal / repeat ops walking down the column
fn decode_byte_vertical(
    payload: &[u8],
    bitmap: &mut BitmapImage,
    xor: bool,
    dirty: &mut DirtyRect,
) -> std::result::Result<(), Corrupt> {
    let plane_offsets = read_plane_offsets(payload)?;
    let bpr = bitmap.bytes_per_row;
    let height = bitmap.height as usize;
    let width = bitmap.width as usize;

    for plane in 0..bitmap.depth.min(8) {
        let offset = plane_offsets[plane as usize] as usize;
        if offset == 0 {
            continue;
        }
        let mut cursor = Cursor::new(payload, offset);
        let data = bitmap.plane_mut(plane);

        for col in 0..bpr {
            let op_count = cursor.u8()?;
            if op_count == 0 {
                continue;
            }
            let mut y = 0usize;
            let mut col_top = height;
            let mut col_bottom = 0usize;

            for _ in 0..op_count {
                let op = cursor.u8()?;
                if op == 0 {
                    // Repeat run: count byte + data byte
                    let count = cursor.u8()? as usize;
                    let value = cursor.u8()?;
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    for row in y..y + count {
                        let index = row * bpr + col;
                        if xor {
                            data[index] ^= value;
                        } else {
                            data[index] = value;
                        }
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else if op & 0x80 != 0 {
                    // Literal copy
                    let count = (op & 0x7F) as usize;
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    let values = cursor.bytes(count)?;
                    for (i, value) in values.iter().enumerate() {
                        let index = (y + i) * bpr + col;
                        if xor {
                            data[index] ^= value;
                        } else {
                            data[index] = *value;
                        }
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else {
                    // Skip down the column
                    y += op as usize;
                    if y > height {
                        return Err(Corrupt);
                    }
                }
            }

            if col_bottom > col_top {
                dirty.touch(
                    (col * 8) as u32,
                    col_top as u32,
                    ((col + 1) * 8).min(width) as u32,
                    col_bottom as u32,
                );
            }
        }
    }
    Ok(())
}

/// Short/long vertical delta (operation 7): op lists and data lists are
/// split; offsets 0-7 locate per-plane op streams, offsets 8-15 the word
/// data streams
fn decode_split_vertical(
    payload: &[u8],
    bitmap: &mut BitmapImage,
    word: usize,
    dirty: &mut DirtyRect,
) -> std::result::Result<(), Corrupt> {
    let offsets = read_plane_offsets(payload)?;
    let bpr = bitmap.bytes_per_row;
    let height = bitmap.height as usize;
    let width = bitmap.width as usize;

    for plane in 0..bitmap.depth.min(8) {
        let op_offset = offsets[plane as usize] as usize;
        let data_offset = offsets[plane as usize + 8] as usize;
        if op_offset == 0 {
            continue;
        }
        let mut ops = Cursor::new(payload, op_offset);
        let mut words = Cursor::new(payload, data_offset);
        let data = bitmap.plane_mut(plane);

        let mut col_byte = 0usize;
        while col_byte < bpr {
            let col_width = word.min(bpr - col_byte);
            let op_count = ops.u8()?;
            let mut y = 0usize;
            let mut col_top = height;
            let mut col_bottom = 0usize;

            for _ in 0..op_count {
                let op = ops.u8()?;
                if op == 0 {
                    let count = ops.u8()? as usize;
                    let value = words.bytes(col_width)?;
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    for row in y..y + count {
                        let index = row * bpr + col_byte;
                        data[index..index + col_width].copy_from_slice(value);
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else if op & 0x80 != 0 {
                    let count = (op & 0x7F) as usize;
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    for row in y..y + count {
                        let value = words.bytes(col_width)?;
                        let index = row * bpr + col_byte;
                        data[index..index + col_width].copy_from_slice(value);
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else {
                    y += op as usize;
                    if y > height {
                        return Err(Corrupt);
                    }
                }
            }

            if col_bottom > col_top {
                dirty.touch(
                    (col_byte * 8) as u32,
                    col_top as u32,
                    ((col_byte + col_width) * 8).min(width) as u32,
                    col_bottom as u32,
                );
            }
            col_byte += col_width;
        }
    }
    Ok(())
}

/// General word-vertical delta (operation 8): like the byte-vertical format
/// with op counts, ops and data all widened to 16- or 32-bit words inline
fn decode_word_vertical(
    payload: &[u8],
    bitmap: &mut BitmapImage,
    word: usize,
    dirty: &mut DirtyRect,
) -> std::result::Result<(), Corrupt> {
    let offsets = read_plane_offsets(payload)?;
    let bpr = bitmap.bytes_per_row;
    let height = bitmap.height as usize;
    let width = bitmap.width as usize;

    for plane in 0..bitmap.depth.min(8) {
        let offset = offsets[plane as usize] as usize;
        if offset == 0 {
            continue;
        }
        let mut cursor = Cursor::new(payload, offset);
        let data = bitmap.plane_mut(plane);

        let mut col_byte = 0usize;
        while col_byte < bpr {
            let col_width = word.min(bpr - col_byte);
            let op_count = read_word(&mut cursor, word)?;
            let mut y = 0usize;
            let mut col_top = height;
            let mut col_bottom = 0usize;

            for _ in 0..op_count {
                let op = read_word(&mut cursor, word)?;
                let msb = 1u64 << (word * 8 - 1);
                if op == 0 {
                    let count = read_word(&mut cursor, word)? as usize;
                    let value = cursor.bytes(col_width)?;
                    if word > col_width {
                        cursor.bytes(word - col_width)?;
                    }
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    for row in y..y + count {
                        let index = row * bpr + col_byte;
                        data[index..index + col_width].copy_from_slice(value);
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else if op & msb != 0 {
                    let count = (op & !msb) as usize;
                    if y + count > height {
                        return Err(Corrupt);
                    }
                    for row in y..y + count {
                        let value = cursor.bytes(col_width)?;
                        if word > col_width {
                            cursor.bytes(word - col_width)?;
                        }
                        let index = row * bpr + col_byte;
                        data[index..index + col_width].copy_from_slice(value);
                    }
                    col_top = col_top.min(y);
                    y += count;
                    col_bottom = col_bottom.max(y);
                } else {
                    y += op as usize;
                    if y > height {
                        return Err(Corrupt);
                    }
                }
            }

            if col_bottom > col_top {
                dirty.touch(
                    (col_byte * 8) as u32,
                    col_top as u32,
                    ((col_byte + col_width) * 8).min(width) as u32,
                    col_bottom as u32,
                );
            }
            col_byte += col_width;
        }
    }
    Ok(())
}

/// "J" format: a list of wall (single byte column) and pile (rectangular
/// block) records, each XORed onto every plane. The terminator is a zero
/// record kind.
fn decode_j(
    payload: &[u8],
    bitmap: &mut BitmapImage,
    dirty: &mut DirtyRect,
) -> std::result::Result<(), Corrupt> {
    let bpr = bitmap.bytes_per_row;
    let height = bitmap.height as usize;
    let width = bitmap.width as usize;
    let mut cursor = Cursor::new(payload, 0);

    loop {
        let kind = cursor.u16()?;
        match kind {
            0 => return Ok(()),
            1 => {
                // Wall: one byte column, all planes
                let offset = cursor.u16()? as usize;
                let rows = cursor.u16()? as usize;
                let col = offset % bpr;
                let y0 = offset / bpr;
                if y0 + rows > height {
                    return Err(Corrupt);
                }
                for plane in 0..bitmap.depth {
                    let values = cursor.bytes(rows)?;
                    let data = bitmap.plane_mut(plane);
                    for (i, value) in values.iter().enumerate() {
                        data[(y0 + i) * bpr + col] ^= value;
                    }
                }
                dirty.touch(
                    (col * 8) as u32,
                    y0 as u32,
                    ((col + 1) * 8).min(width) as u32,
                    (y0 + rows) as u32,
                );
            }
            2 => {
                // Pile: a rectangular block of byte columns, all planes
                let offset = cursor.u16()? as usize;
                let cols = cursor.u16()? as usize;
                let rows = cursor.u16()? as usize;
                let col = offset % bpr;
                let y0 = offset / bpr;
                if y0 + rows > height || col + cols > bpr {
                    return Err(Corrupt);
                }
                for plane in 0..bitmap.depth {
                    let values = cursor.bytes(cols * rows)?;
                    let data = bitmap.plane_mut(plane);
                    for row in 0..rows {
                        for c in 0..cols {
                            data[(y0 + row) * bpr + col + c] ^= values[row * cols + c];
                        }
                    }
                }
                dirty.touch(
                    (col * 8) as u32,
                    y0 as u32,
                    ((col + cols) * 8).min(width) as u32,
                    (y0 + rows) as u32,
                );
            }
            _ => return Err(Corrupt),
        }
    }
}

fn read_plane_offsets(payload: &[u8]) -> std::result::Result<[u32; 16], Corrupt> {
    let mut cursor = Cursor::new(payload, 0);
    let mut offsets = [0u32; 16];
    for offset in &mut offsets {
        *offset = cursor.u32()?;
    }
    Ok(offsets)
}

fn read_word(cursor: &mut Cursor<'_>, word: usize) -> std::result::Result<u64, Corrupt> {
    Ok(match word {
        4 => cursor.u32()? as u64,
        _ => cursor.u16()? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets_with(plane0: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&plane0.to_be_bytes());
        payload.extend_from_slice(&[0u8; 15 * 4]);
        payload
    }

    #[test]
    fn test_bidirectionality_table() {
        assert!(is_bidirectional(OP_DIRECT, 0));
        assert!(is_bidirectional(OP_BYTE_VERTICAL, BIT_XOR));
        assert!(!is_bidirectional(OP_BYTE_VERTICAL, 0));
        assert!(is_bidirectional(OP_J, 0));
        assert!(is_bidirectional(OP_J, BIT_LONG_DATA));
        assert!(!is_bidirectional(OP_SHORT_LONG_VERTICAL, 0));
        assert!(!is_bidirectional(OP_GENERAL_VERTICAL, BIT_LONG_DATA));
    }

    #[test]
    fn test_body_decode_fills_planes() {
        let mut bitmap = BitmapImage::new(16, 2, 2);
        // Row-interleaved: y0p0, y0p1, y1p0, y1p1 at 2 bytes per row
        let payload = vec![
            0xFF, 0x00, // y0 plane0
            0x0F, 0x00, // y0 plane1
            0x00, 0xFF, // y1 plane0
            0x00, 0xF0, // y1 plane1
        ];
        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        let dirty = decoder.decode(OP_DIRECT, 0, &payload, &mut bitmap).unwrap();

        assert_eq!(dirty, DirtyRect::full(16, 2));
        assert_eq!(bitmap.plane(0), &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(bitmap.plane(1), &[0x0F, 0x00, 0x00, 0xF0]);
    }

    #[test]
    fn test_byte_vertical_skip_copy_run() {
        let mut bitmap = BitmapImage::new(16, 8, 1);
        // Column 0: skip 2, copy 1 literal (0xAA), run of 3 x 0x55
        let mut payload = offsets_with(64);
        payload.push(3); // op count for column 0
        payload.push(2); // skip 2 rows
        payload.push(0x81); // literal, 1 byte
        payload.push(0xAA);
        payload.push(0); // run
        payload.push(3); // count
        payload.push(0x55); // value
        payload.push(0); // op count for column 1

        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        let dirty = decoder
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .unwrap();

        let plane = bitmap.plane(0);
        assert_eq!(plane[0 * 2], 0x00);
        assert_eq!(plane[1 * 2], 0x00);
        assert_eq!(plane[2 * 2], 0xAA);
        assert_eq!(plane[3 * 2], 0x55);
        assert_eq!(plane[4 * 2], 0x55);
        assert_eq!(plane[5 * 2], 0x55);
        assert_eq!(plane[6 * 2], 0x00);

        // Only column 0 touched, rows 2..6
        assert_eq!(
            dirty,
            DirtyRect {
                left: 0,
                top: 2,
                right: 8,
                bottom: 6
            }
        );
    }

    #[test]
    fn test_byte_vertical_xor_is_its_own_inverse() {
        let mut bitmap = BitmapImage::new(16, 4, 1);
        bitmap.plane_mut(0).copy_from_slice(&[0x11; 8]);
        let before = bitmap.clone();

        let mut payload = offsets_with(64);
        payload.push(1); // column 0: one op
        payload.push(0); // run
        payload.push(4);
        payload.push(0xFF);
        payload.push(0); // column 1: no ops

        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        decoder
            .decode(OP_BYTE_VERTICAL, BIT_XOR, &payload, &mut bitmap)
            .unwrap();
        assert_eq!(bitmap.plane(0)[0], 0x11 ^ 0xFF);

        // Applying the same delta again restores the previous frame
        decoder
            .decode(OP_BYTE_VERTICAL, BIT_XOR, &payload, &mut bitmap)
            .unwrap();
        assert_eq!(bitmap, before);
    }

    #[test]
    fn test_untouched_planes_keep_content() {
        let mut bitmap = BitmapImage::new(16, 4, 2);
        bitmap.plane_mut(1).copy_from_slice(&[0x77; 8]);

        // Offset table: plane 0 changes, plane 1 offset stays zero
        let mut payload = offsets_with(64);
        payload.push(1);
        payload.push(0);
        payload.push(2);
        payload.push(0x0F);
        payload.push(0);

        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        decoder
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .unwrap();
        assert_eq!(bitmap.plane(1), &[0x77; 8]);
    }

    #[test]
    fn test_truncated_delta_strict_fails_lenient_continues() {
        let mut payload = offsets_with(64);
        payload.push(1); // one op in column 0
        payload.push(0); // run ...
        payload.push(200); // ... of 200 rows in a 4-row bitmap

        let mut bitmap = BitmapImage::new(16, 4, 1);
        let mut strict = AnimDeltaDecoder::new(Leniency::Strict);
        assert!(strict
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .is_err());

        let mut lenient = AnimDeltaDecoder::new(Leniency::LogOnce);
        // First and second corrupt frames both come back Ok; the first is
        // logged, the second silently ignored
        assert!(lenient
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .is_ok());
        assert!(lenient.corruption_logged);
        assert!(lenient
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .is_ok());
    }

    #[test]
    fn test_split_vertical_short_words() {
        let mut bitmap = BitmapImage::new(32, 4, 1);
        // bpr = 4: two 2-byte columns. Op list at 64, data list at 80.
        let mut payload = Vec::new();
        payload.extend_from_slice(&64u32.to_be_bytes()); // plane 0 ops
        payload.extend_from_slice(&[0u8; 7 * 4]);
        payload.extend_from_slice(&80u32.to_be_bytes()); // plane 0 data
        payload.extend_from_slice(&[0u8; 7 * 4]);
        // ops (column 0): 1 op: run of 2 words; (column 1): none
        payload.extend_from_slice(&[1, 0, 2, 0]);
        payload.resize(80, 0);
        // data: one word for the run
        payload.extend_from_slice(&[0xDE, 0xAD]);

        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        let dirty = decoder
            .decode(OP_SHORT_LONG_VERTICAL, 0, &payload, &mut bitmap)
            .unwrap();

        let plane = bitmap.plane(0);
        assert_eq!(&plane[0..2], &[0xDE, 0xAD]);
        assert_eq!(&plane[4..6], &[0xDE, 0xAD]);
        assert_eq!(&plane[8..10], &[0x00, 0x00]);
        assert_eq!(dirty.top, 0);
        assert_eq!(dirty.bottom, 2);
        assert_eq!(dirty.left, 0);
        assert_eq!(dirty.right, 16);
    }

    #[test]
    fn test_j_wall_and_pile_xor() {
        let mut bitmap = BitmapImage::new(16, 4, 1);
        let mut payload = Vec::new();
        // Wall at byte offset 2 (row 1, column 0), 2 rows
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&[0xF0, 0x0F]);
        // Pile at offset 1 (row 0, column 1), 1 column x 2 rows
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&[0xAA, 0xBB]);
        // Terminator
        payload.extend_from_slice(&0u16.to_be_bytes());

        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        let dirty = decoder.decode(OP_J, 0, &payload, &mut bitmap).unwrap();

        let plane = bitmap.plane(0);
        assert_eq!(plane[1 * 2], 0xF0); // wall row 1
        assert_eq!(plane[2 * 2], 0x0F); // wall row 2
        assert_eq!(plane[0 * 2 + 1], 0xAA); // pile row 0
        assert_eq!(plane[1 * 2 + 1], 0xBB); // pile row 1
        assert!(!dirty.is_empty());

        // J is XOR-based: applying the same payload restores the frame
        decoder.decode(OP_J, 0, &payload, &mut bitmap).unwrap();
        assert!(bitmap.plane(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dirty_rect_empty_when_no_ops() {
        let mut bitmap = BitmapImage::new(16, 4, 1);
        // All plane offsets zero: nothing changes
        let payload = offsets_with(0);
        let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);
        let dirty = decoder
            .decode(OP_BYTE_VERTICAL, 0, &payload, &mut bitmap)
            .unwrap();
        assert!(dirty.is_empty());
    }
}
