//! Codec and container discovery
//!
//! The [`Registry`] is an explicitly constructed lookup table: callers build
//! one (or start from [`Registry::with_defaults`]) and pass it to the
//! components that need codec discovery. There is deliberately no global
//! instance; hidden registry state makes format negotiation untestable.

use super::Codec;
use crate::media::Format;

type CodecConstructor = Box<dyn Fn() -> Box<dyn Codec> + Send + Sync>;

struct CodecEntry {
    name: &'static str,
    constructor: CodecConstructor,
}

/// Container format information used for (mime type, file) lookup
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// Short name, e.g. "avi"
    pub name: &'static str,
    /// File extensions without the dot
    pub extensions: &'static [&'static str],
    /// MIME type
    pub mime_type: &'static str,
}

/// Explicit, caller-owned codec and container registry
#[derive(Default)]
pub struct Registry {
    codecs: Vec<CodecEntry>,
    containers: Vec<ContainerInfo>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Registry::default()
    }

    /// Create a registry with the built-in codecs and containers registered
    pub fn with_defaults() -> Self {
        let mut registry = Registry::new();
        registry.register_codec("raw", || Box::new(super::RawCodec::new()));
        registry.register_codec("anim", || {
            Box::new(super::anim::AnimCodec::new())
        });
        registry.register_container(ContainerInfo {
            name: "avi",
            extensions: &["avi"],
            mime_type: "video/x-msvideo",
        });
        registry.register_container(ContainerInfo {
            name: "quicktime",
            extensions: &["mov", "qt"],
            mime_type: "video/quicktime",
        });
        registry.register_container(ContainerInfo {
            name: "anim",
            extensions: &["anim", "iff"],
            mime_type: "video/x-anim",
        });
        registry
    }

    /// Register a codec constructor
    pub fn register_codec<F>(&mut self, name: &'static str, constructor: F)
    where
        F: Fn() -> Box<dyn Codec> + Send + Sync + 'static,
    {
        self.codecs.push(CodecEntry {
            name,
            constructor: Box::new(constructor),
        });
    }

    /// Register a container format
    pub fn register_container(&mut self, info: ContainerInfo) {
        self.containers.push(info);
    }

    /// Find a codec accepting `input` and producing `output`.
    ///
    /// Returns the first registered codec whose negotiation succeeds for
    /// both formats, already configured with the refined formats. `None`
    /// is a negotiation failure, not an error: callers try alternatives
    /// or give up.
    pub fn find_codec(&self, input: &Format, output: &Format) -> Option<Box<dyn Codec>> {
        for entry in &self.codecs {
            let mut codec = (entry.constructor)();
            let input_ok = codec
                .supported_input_formats()
                .iter()
                .any(|f| f.matches(input));
            let output_ok = codec
                .supported_output_formats()
                .iter()
                .any(|f| f.matches(output));
            if !input_ok || !output_ok {
                continue;
            }
            if codec.set_input_format(input).is_none() {
                continue;
            }
            if codec.set_output_format(output).is_none() {
                continue;
            }
            return Some(codec);
        }
        None
    }

    /// Look up container information by file extension
    pub fn container_for_extension(&self, path: &str) -> Option<&ContainerInfo> {
        let ext = path.rsplit('.').next()?.to_lowercase();
        self.containers
            .iter()
            .find(|c| c.extensions.contains(&ext.as_str()))
    }

    /// Look up container information by MIME type
    pub fn container_for_mime_type(&self, mime: &str) -> Option<&ContainerInfo> {
        self.containers.iter().find(|c| c.mime_type == mime)
    }

    /// Names of all registered codecs
    pub fn codec_names(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|e| e.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::{ENCODING, ENCODING_RAW};

    #[test]
    fn test_find_codec_negotiates() {
        let registry = Registry::with_defaults();
        let format = Format::new().with(&ENCODING, ENCODING_RAW);
        let codec = registry.find_codec(&format, &format);
        assert!(codec.is_some());
    }

    #[test]
    fn test_empty_registry_finds_nothing() {
        let registry = Registry::new();
        let format = Format::new();
        assert!(registry.find_codec(&format, &format).is_none());
    }

    #[test]
    fn test_container_lookup() {
        let registry = Registry::with_defaults();
        assert_eq!(
            registry.container_for_extension("clip.AVI").unwrap().name,
            "avi"
        );
        assert_eq!(
            registry
                .container_for_mime_type("video/quicktime")
                .unwrap()
                .name,
            "quicktime"
        );
        assert!(registry.container_for_extension("clip.xyz").is_none());
    }
}
