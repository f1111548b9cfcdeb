//! avpipe - a media container and codec pipeline library
//!
//! avpipe implements the data path between media containers and codecs in
//! pure Rust: typed format negotiation, a buffer-centric transform
//! protocol, and bit-exact container and codec state machines.
//!
//! # Architecture
//!
//! - `media`: the data model - typed [`media::Format`] descriptors, the
//!   [`media::Buffer`] sample carrier and raster [`media::Picture`]s
//! - `codec`: the [`codec::Codec`] transform protocol, codec chaining, the
//!   explicit [`codec::Registry`], the ANIM delta-frame decoder and the
//!   H.264 macroblock encode path
//! - `format`: container demuxing/muxing - the shared sample/group/chunk
//!   index model, AVI, QuickTime atom streams and IFF ANIM
//! - `util`: exact rational arithmetic and shared leaf types
//!
//! The core is single-threaded and synchronous: readers and writers keep
//! mutable cursor state without locking, so one thread drives an instance
//! at a time, and no component here spawns threads or blocks on anything
//! but its own file I/O.

pub mod codec;
pub mod error;
pub mod format;
pub mod media;
pub mod util;

pub use error::{Error, Result};
pub use media::{Buffer, Format, FormatKey};

/// avpipe version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the avpipe library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the avpipe library with the given configuration.
///
/// Wires up the tracing subscriber when verbose or debug output is
/// requested. Calling this is optional; embedding applications that manage
/// their own subscriber should skip it.
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .try_init()
            .map_err(|e| Error::Init(format!("failed to initialize logging: {}", e)))?;
    }
    Ok(())
}
