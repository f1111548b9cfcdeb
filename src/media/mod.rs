//! Core media data model: formats, buffers and raster images

pub mod buffer;
pub mod format;
pub mod picture;

pub use buffer::{Buffer, BufferData, BufferFlags};
pub use format::{Format, FormatKey, KeyName};
pub use picture::{PaletteEntry, Picture};
