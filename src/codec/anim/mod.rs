//! ANIM delta-frame codec
//!
//! Amiga cel animations store one key frame (`BODY`) followed by delta
//! frames (`DLTA`) that patch the previous frame's planar bitmap in place.
//! The delta encoding is selected per frame by the ANHD operation code and
//! bit flags; [`delta::AnimDeltaDecoder`] implements the byte-vertical
//! run-length family (XOR or direct), the short/long word-vertical formats
//! and the "J" wall/pile block format. [`AnimCodec`] wraps the decoder
//! behind the [`Codec`](crate::codec::Codec) trait, turning raw op-stream
//! payloads from the ANIM reader into chunky [`Picture`] frames.

pub mod delta;

pub use delta::{AnimDeltaDecoder, DirtyRect, Leniency};

use crate::codec::{Codec, ProcessResult};
use crate::format::anim::{ANIM_BITS, ANIM_OPERATION, OP_DIRECT};
use crate::media::format::{
    self, Format, DEPTH, ENCODING, HEIGHT, MEDIA_TYPE, PLANES, WIDTH,
};
use crate::media::{Buffer, Picture};
use crate::util::MediaType;

/// A planar Amiga bitmap: `depth` bitplanes of `bytes_per_row * height`
/// bytes each, stored plane after plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapImage {
    pub width: u32,
    pub height: u32,
    /// Number of bitplanes
    pub depth: u32,
    /// Row stride; rows are padded to 16-pixel words
    pub bytes_per_row: usize,
    pub bits: Vec<u8>,
}

impl BitmapImage {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        let bytes_per_row = ((width as usize + 15) / 16) * 2;
        BitmapImage {
            width,
            height,
            depth,
            bytes_per_row,
            bits: vec![0; bytes_per_row * height as usize * depth as usize],
        }
    }

    /// Size of one bitplane in bytes
    pub fn plane_size(&self) -> usize {
        self.bytes_per_row * self.height as usize
    }

    /// The bytes of one bitplane
    pub fn plane(&self, plane: u32) -> &[u8] {
        let size = self.plane_size();
        let start = plane as usize * size;
        &self.bits[start..start + size]
    }

    /// Mutable bytes of one bitplane
    pub fn plane_mut(&mut self, plane: u32) -> &mut [u8] {
        let size = self.plane_size();
        let start = plane as usize * size;
        &mut self.bits[start..start + size]
    }

    /// Convert the planar bitmap to chunky 8-bit pixels, one palette index
    /// per pixel
    pub fn to_chunky(&self) -> Vec<u8> {
        let mut chunky = vec![0u8; self.width as usize * self.height as usize];
        for plane in 0..self.depth {
            let bit = 1u8 << plane;
            let data = self.plane(plane);
            for y in 0..self.height as usize {
                let row = &data[y * self.bytes_per_row..];
                let out = &mut chunky[y * self.width as usize..(y + 1) * self.width as usize];
                for (x, pixel) in out.iter_mut().enumerate() {
                    if row[x / 8] & (0x80 >> (x % 8)) != 0 {
                        *pixel |= bit;
                    }
                }
            }
        }
        chunky
    }
}

/// Decodes ANIM op-stream payloads into chunky frames.
///
/// The codec owns the working bitmap and mutates it in place as deltas
/// arrive; every output buffer receives a fresh chunky copy, so callers
/// never alias the decoder's internal state.
pub struct AnimCodec {
    decoder: AnimDeltaDecoder,
    bitmap: Option<BitmapImage>,
    input_format: Option<Format>,
    output_format: Option<Format>,
}

impl AnimCodec {
    pub fn new() -> Self {
        Self::with_leniency(Leniency::LogOnce)
    }

    pub fn with_leniency(leniency: Leniency) -> Self {
        AnimCodec {
            decoder: AnimDeltaDecoder::new(leniency),
            bitmap: None,
            input_format: None,
            output_format: None,
        }
    }

    /// Dirty rectangle of the most recent decode
    pub fn last_dirty_rect(&self) -> Option<&DirtyRect> {
        self.decoder.last_dirty_rect()
    }
}

impl Default for AnimCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for AnimCodec {
    fn name(&self) -> &str {
        "anim"
    }

    fn supported_input_formats(&self) -> Vec<Format> {
        vec![Format::new()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, format::ENCODING_ANIM_OP)]
    }

    fn supported_output_formats(&self) -> Vec<Format> {
        vec![Format::new()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, format::ENCODING_BITMAP)]
    }

    fn set_input_format(&mut self, proposed: &Format) -> Option<Format> {
        if proposed.get(&ENCODING).map_or(false, |e| *e != format::ENCODING_ANIM_OP) {
            return None;
        }
        let refined = proposed
            .clone()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, format::ENCODING_ANIM_OP);
        self.input_format = Some(refined.clone());
        Some(refined)
    }

    fn set_output_format(&mut self, proposed: &Format) -> Option<Format> {
        if proposed.get(&ENCODING).map_or(false, |e| *e != format::ENCODING_BITMAP) {
            return None;
        }
        let refined = proposed
            .clone()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, format::ENCODING_BITMAP);
        self.output_format = Some(refined.clone());
        Some(refined)
    }

    fn process(&mut self, input: &mut Buffer, output: &mut Buffer) -> ProcessResult {
        output.set_meta_to(input);
        if input.is_discard() {
            output.flags.discard = true;
            return ProcessResult::ok();
        }

        let Some(payload) = input.payload() else {
            output.flags.discard = true;
            return ProcessResult::failed();
        };
        let width = input.format.get_or(&WIDTH, 0);
        let height = input.format.get_or(&HEIGHT, 0);
        let depth = input
            .format
            .get(&PLANES)
            .copied()
            .unwrap_or_else(|| input.format.get_or(&DEPTH, 1));
        if width == 0 || height == 0 || depth == 0 || depth > 8 {
            output.flags.discard = true;
            return ProcessResult::failed();
        }
        let operation = input.format.get_or(&ANIM_OPERATION, OP_DIRECT as u32) as u8;
        let bits = input.format.get_or(&ANIM_BITS, 0);

        let bitmap = match &mut self.bitmap {
            Some(bitmap)
                if bitmap.width == width && bitmap.height == height && bitmap.depth == depth =>
            {
                bitmap
            }
            slot => {
                *slot = Some(BitmapImage::new(width, height, depth));
                slot.as_mut().expect("just set")
            }
        };

        if self.decoder.decode(operation, bits, payload, bitmap).is_err() {
            // Strict leniency: the frame is dropped, the stream continues
            output.flags.discard = true;
            return ProcessResult::failed();
        }

        let picture = Picture {
            width,
            height,
            depth,
            pixels: bitmap.to_chunky(),
            palette: None,
        };
        output.format = input
            .format
            .clone()
            .with(&ENCODING, format::ENCODING_BITMAP);
        output.set_picture(picture);
        output.flags.keyframe = operation == OP_DIRECT as u8;
        ProcessResult::ok()
    }

    fn reset(&mut self) {
        self.bitmap = None;
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_chunky_conversion() {
        let mut bitmap = BitmapImage::new(16, 2, 2);
        // Pixel 0: plane 0 set -> index 1; pixel 1: both planes -> index 3
        bitmap.plane_mut(0)[0] = 0b1100_0000;
        bitmap.plane_mut(1)[0] = 0b0100_0000;
        let chunky = bitmap.to_chunky();
        assert_eq!(chunky[0], 1);
        assert_eq!(chunky[1], 3);
        assert_eq!(chunky[2], 0);
        assert_eq!(chunky.len(), 32);
    }

    #[test]
    fn test_bitmap_row_padding() {
        // 17 pixels pad to 32 (two 16-bit words)
        let bitmap = BitmapImage::new(17, 1, 1);
        assert_eq!(bitmap.bytes_per_row, 4);
    }
}
