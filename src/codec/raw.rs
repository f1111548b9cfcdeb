//! Identity codec: byte-for-byte passthrough
//!
//! Used as the degenerate case of [`super::create_codec_chain`] and wherever
//! a pipeline stage needs a codec slot but the formats already agree.

use super::{Codec, ProcessResult};
use crate::media::{Buffer, Format};

/// Passes buffers through unchanged
#[derive(Debug, Default)]
pub struct RawCodec {
    input_format: Option<Format>,
    output_format: Option<Format>,
}

impl RawCodec {
    pub fn new() -> Self {
        RawCodec::default()
    }
}

impl Codec for RawCodec {
    fn name(&self) -> &str {
        "raw"
    }

    fn supported_input_formats(&self) -> Vec<Format> {
        vec![Format::new()]
    }

    fn supported_output_formats(&self) -> Vec<Format> {
        vec![Format::new()]
    }

    fn set_input_format(&mut self, format: &Format) -> Option<Format> {
        self.input_format = Some(format.clone());
        self.input_format.clone()
    }

    fn set_output_format(&mut self, format: &Format) -> Option<Format> {
        self.output_format = Some(format.clone());
        self.output_format.clone()
    }

    fn process(&mut self, input: &mut Buffer, output: &mut Buffer) -> ProcessResult {
        output.set_meta_to(input);
        if input.is_discard() {
            output.flags.discard = true;
            return ProcessResult::ok();
        }
        if output.set_data_to(input).is_err() {
            output.flags.discard = true;
            return ProcessResult::failed();
        }
        ProcessResult::ok()
    }

    fn reset(&mut self) {}
}
