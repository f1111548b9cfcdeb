//! Codec implementations and the buffer transform protocol
//!
//! A [`Codec`] transforms one [`Buffer`] into another: compressed bytes into a
//! raster image, raw samples into an encoded payload, or any intermediate
//! step. Codecs are driven by a push/pull protocol with four observable
//! outcomes captured by [`ProcessResult`]:
//!
//! - everything consumed and produced (`ok`),
//! - unrecoverable failure (the caller marks the buffer discard and moves on),
//! - input not consumed (call again with the *same* input buffer),
//! - output not filled (call again to drain more output).
//!
//! The two pending conditions are independent booleans, not exclusive states:
//! a [`chain::CodecChain`] can be both waiting on its input and holding back
//! output at once.

pub mod anim;
pub mod chain;
pub mod h264;
pub mod raw;
pub mod registry;

pub use chain::{create_codec_chain, CodecChain};
pub use raw::RawCodec;
pub use registry::Registry;

use crate::media::{Buffer, Format};

/// Outcome of one [`Codec::process`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Unrecoverable failure; the caller must discard the buffer and must
    /// not retry with it
    pub failed: bool,
    /// The input buffer was not (fully) consumed; call again with the same
    /// input
    pub input_not_consumed: bool,
    /// More output is pending; call again to drain it
    pub output_not_filled: bool,
}

impl ProcessResult {
    /// Fully consumed and produced
    pub const OK: ProcessResult = ProcessResult {
        failed: false,
        input_not_consumed: false,
        output_not_filled: false,
    };

    /// Fully consumed and produced
    pub fn ok() -> Self {
        Self::OK
    }

    /// Unrecoverable failure
    pub fn failed() -> Self {
        ProcessResult {
            failed: true,
            ..Default::default()
        }
    }

    /// Whether the call fully consumed its input and produced all output
    pub fn is_ok(&self) -> bool {
        !self.failed && !self.input_not_consumed && !self.output_not_filled
    }
}

/// A buffer transform with format negotiation
pub trait Codec {
    /// Short name for diagnostics
    fn name(&self) -> &str;

    /// Formats this codec accepts as input
    fn supported_input_formats(&self) -> Vec<Format>;

    /// Formats this codec can produce
    fn supported_output_formats(&self) -> Vec<Format>;

    /// Propose an input format. Returns the closest supported refinement of
    /// the proposal, or `None` when the codec cannot accept it. The returned
    /// format becomes the codec's input format.
    fn set_input_format(&mut self, format: &Format) -> Option<Format>;

    /// Propose an output format. Returns the closest supported refinement of
    /// the proposal, or `None` when the codec cannot produce it. The returned
    /// format becomes the codec's output format.
    fn set_output_format(&mut self, format: &Format) -> Option<Format>;

    /// Transform `input` into `output`.
    ///
    /// Implementations must honor the discard flag on `input` (producing a
    /// discard `output`) and must set `output`'s metadata from `input` via
    /// [`Buffer::set_meta_to`] semantics before overriding what they change.
    fn process(&mut self, input: &mut Buffer, output: &mut Buffer) -> ProcessResult;

    /// Drop all internal state, returning the codec to its freshly
    /// constructed condition (negotiated formats are kept)
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_result_flags_are_independent() {
        let r = ProcessResult {
            failed: false,
            input_not_consumed: true,
            output_not_filled: true,
        };
        assert!(!r.is_ok());
        assert!(r.input_not_consumed && r.output_not_filled);
        assert!(ProcessResult::ok().is_ok());
        assert!(ProcessResult::failed().failed);
    }
}
