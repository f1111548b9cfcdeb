//! Codec composition
//!
//! [`CodecChain`] runs two codecs back to back through an internal scratch
//! buffer, presenting the pair as a single [`Codec`]. The four-state process
//! protocol is preserved across the pair: pending input/output signals from
//! either side surface in the combined result without ever losing buffered
//! intermediate data.

use super::{Codec, ProcessResult};
use crate::media::{Buffer, Format};

/// Two codecs composed through a scratch buffer
pub struct CodecChain {
    first: Box<dyn Codec>,
    second: Box<dyn Codec>,
    scratch: Buffer,
    /// The scratch buffer holds data the second codec has not finished with
    scratch_pending: bool,
    /// The first codec has not consumed the caller's input
    first_pending_input: bool,
    /// The first codec holds more output for already-consumed input
    first_pending_output: bool,
    name: String,
}

impl CodecChain {
    pub fn new(first: Box<dyn Codec>, second: Box<dyn Codec>) -> Self {
        let name = format!("{}+{}", first.name(), second.name());
        CodecChain {
            first,
            second,
            scratch: Buffer::new(),
            scratch_pending: false,
            first_pending_input: false,
            first_pending_output: false,
            name,
        }
    }
}

impl Codec for CodecChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_input_formats(&self) -> Vec<Format> {
        self.first.supported_input_formats()
    }

    fn supported_output_formats(&self) -> Vec<Format> {
        self.second.supported_output_formats()
    }

    fn set_input_format(&mut self, format: &Format) -> Option<Format> {
        self.first.set_input_format(format)
    }

    fn set_output_format(&mut self, format: &Format) -> Option<Format> {
        self.second.set_output_format(format)
    }

    fn process(&mut self, input: &mut Buffer, output: &mut Buffer) -> ProcessResult {
        // Pending intermediate data gets drained before the first codec is
        // fed again; the caller's input is untouched on this path. A codec
        // that reported output-not-filled retains its own state and ignores
        // re-presented input until drained, so re-offering the scratch is
        // safe.
        if self.scratch_pending {
            let r2 = self.second.process(&mut self.scratch, output);
            if r2.failed {
                output.flags.discard = true;
                return ProcessResult::failed();
            }
            self.scratch_pending = r2.input_not_consumed || r2.output_not_filled;
            return ProcessResult {
                failed: false,
                input_not_consumed: self.first_pending_input,
                output_not_filled: self.scratch_pending || self.first_pending_output,
            };
        }

        self.scratch.clear();
        let r1 = self.first.process(input, &mut self.scratch);
        if r1.failed {
            output.flags.discard = true;
            return ProcessResult::failed();
        }
        self.first_pending_input = r1.input_not_consumed;
        self.first_pending_output = r1.output_not_filled;

        if self.scratch.is_discard() {
            // First stage produced nothing this round
            output.flags.discard = true;
            return ProcessResult {
                failed: false,
                input_not_consumed: self.first_pending_input,
                output_not_filled: self.first_pending_output,
            };
        }

        let r2 = self.second.process(&mut self.scratch, output);
        if r2.failed {
            output.flags.discard = true;
            return ProcessResult::failed();
        }
        self.scratch_pending = r2.input_not_consumed || r2.output_not_filled;

        ProcessResult {
            failed: false,
            input_not_consumed: self.first_pending_input,
            output_not_filled: self.first_pending_output || self.scratch_pending,
        }
    }

    fn reset(&mut self) {
        self.scratch.clear();
        self.scratch_pending = false;
        self.first_pending_input = false;
        self.first_pending_output = false;
        self.first.reset();
        self.second.reset();
    }
}

/// Compose a list of codecs into one.
///
/// Zero codecs degenerate to the identity codec, a single codec is returned
/// as-is, and longer lists right-fold into nested chains.
pub fn create_codec_chain(mut codecs: Vec<Box<dyn Codec>>) -> Box<dyn Codec> {
    match codecs.len() {
        0 => Box::new(super::RawCodec::new()),
        1 => codecs.remove(0),
        _ => {
            let mut chain = codecs.pop().expect("len checked above");
            while let Some(codec) = codecs.pop() {
                chain = Box::new(CodecChain::new(codec, chain));
            }
            chain
        }
    }
}
