//! Typed media format descriptors
//!
//! A [`Format`] is an immutable, order-irrelevant mapping from typed keys to
//! values. It is the negotiation currency of the pipeline: codecs advertise the
//! formats they support, tracks describe the formats they carry, and the
//! registry picks codecs whose declared formats match a request.
//!
//! Two formats *match* iff every key present in both has an equal value; keys
//! present in only one side are ignored, so a more specific format still
//! matches a less specific request. Keys flagged as comments never take part
//! in matching.

use crate::util::{MediaType, Rational};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed format key, identified by a name string and a value type.
///
/// The value type is enforced at compile time: `get`/`with` on a
/// `FormatKey<T>` only accept and produce `T`.
pub struct FormatKey<T> {
    name: &'static str,
    comment: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FormatKey<T> {
    /// Create a new format key
    pub const fn new(name: &'static str) -> Self {
        FormatKey {
            name,
            comment: false,
            _marker: PhantomData,
        }
    }

    /// Create a comment key, excluded from matching
    pub const fn comment(name: &'static str) -> Self {
        FormatKey {
            name,
            comment: true,
            _marker: PhantomData,
        }
    }

    /// The key's name string
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this key is excluded from matching
    pub const fn is_comment(&self) -> bool {
        self.comment
    }
}

impl<T> fmt::Debug for FormatKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormatKey({})", self.name)
    }
}

/// Name-only view of a key, for operations that take key lists
/// irrespective of value type
pub trait KeyName {
    fn key_name(&self) -> &'static str;
}

impl<T> KeyName for FormatKey<T> {
    fn key_name(&self) -> &'static str {
        self.name
    }
}

/// Values storable in a format. Blanket-implemented for any comparable,
/// printable, thread-safe type.
pub trait FormatValue: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn eq_value(&self, other: &dyn FormatValue) -> bool;
}

impl<T: PartialEq + fmt::Debug + Send + Sync + 'static> FormatValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_value(&self, other: &dyn FormatValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |o| self == o)
    }
}

#[derive(Clone)]
struct Entry {
    value: Arc<dyn FormatValue>,
    comment: bool,
}

/// An immutable mapping from typed keys to values describing a media format.
///
/// All operations are pure and return new formats; a `Format` is never
/// mutated in place. Formats are cheap and frequently reconstructed during
/// negotiation.
#[derive(Clone, Default)]
pub struct Format {
    entries: BTreeMap<&'static str, Entry>,
}

impl Format {
    /// Create an empty format
    pub fn new() -> Self {
        Format::default()
    }

    /// Return a new format with `key` set to `value`.
    ///
    /// The value's type is the key's declared type; mismatches are rejected
    /// at compile time.
    pub fn with<T: FormatValue>(mut self, key: &FormatKey<T>, value: T) -> Self {
        self.entries.insert(
            key.name,
            Entry {
                value: Arc::new(value),
                comment: key.comment,
            },
        );
        self
    }

    /// Get the value for a key
    pub fn get<T: FormatValue>(&self, key: &FormatKey<T>) -> Option<&T> {
        self.entries
            .get(key.name)
            .and_then(|e| e.value.as_any().downcast_ref::<T>())
    }

    /// Get the value for a key, or a default when absent
    pub fn get_or<T: FormatValue + Clone>(&self, key: &FormatKey<T>, default: T) -> T {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Whether the format contains a value for the key
    pub fn contains_key(&self, key: &dyn KeyName) -> bool {
        self.entries.contains_key(key.key_name())
    }

    /// Number of entries, comment keys included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the format has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the key names present in this format
    pub fn key_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Two formats match iff every key present in both has an equal value.
    ///
    /// Keys present in only one format are ignored, as are comment keys.
    pub fn matches(&self, other: &Format) -> bool {
        self.matches_excluding(other, &[])
    }

    /// As [`matches`](Self::matches), additionally ignoring the listed keys
    pub fn matches_without(&self, other: &Format, excluded: &[&dyn KeyName]) -> bool {
        let names: Vec<&'static str> = excluded.iter().map(|k| k.key_name()).collect();
        self.matches_excluding(other, &names)
    }

    fn matches_excluding(&self, other: &Format, excluded: &[&'static str]) -> bool {
        for (name, entry) in &self.entries {
            if entry.comment || excluded.contains(name) {
                continue;
            }
            if let Some(other_entry) = other.entries.get(name) {
                if other_entry.comment {
                    continue;
                }
                if !entry.value.eq_value(other_entry.value.as_ref()) {
                    return false;
                }
            }
        }
        true
    }

    /// Merge, with self winning on keys defined in both
    pub fn append(&self, other: &Format) -> Format {
        let mut entries = self.entries.clone();
        for (name, entry) in &other.entries {
            entries.entry(*name).or_insert_with(|| entry.clone());
        }
        Format { entries }
    }

    /// Merge, with other winning on keys defined in both
    pub fn prepend(&self, other: &Format) -> Format {
        other.append(self)
    }

    /// Reduced format containing only the listed keys
    pub fn intersect_keys(&self, keys: &[&dyn KeyName]) -> Format {
        let names: Vec<&'static str> = keys.iter().map(|k| k.key_name()).collect();
        Format {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, entry)| (*name, entry.clone()))
                .collect(),
        }
    }

    /// Reduced format with the listed keys removed
    pub fn remove_keys(&self, keys: &[&dyn KeyName]) -> Format {
        let names: Vec<&'static str> = keys.iter().map(|k| k.key_name()).collect();
        Format {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| !names.contains(name))
                .map(|(name, entry)| (*name, entry.clone()))
                .collect(),
        }
    }

    /// Fail with an invalid-input error naming the first missing key
    pub fn require_keys(&self, keys: &[&dyn KeyName]) -> crate::error::Result<()> {
        for key in keys {
            if !self.entries.contains_key(key.key_name()) {
                return Err(crate::error::Error::invalid_input(format!(
                    "format is missing required key: {}",
                    key.key_name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, entry) in &self.entries {
            map.entry(name, &entry.value);
        }
        map.finish()
    }
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(name, entry)| {
            other
                .entries
                .get(name)
                .map_or(false, |o| entry.value.eq_value(o.value.as_ref()))
        })
    }
}

// ---------------------------------------------------------------------------
// Well-known keys
// ---------------------------------------------------------------------------

/// Media type of the stream (video, audio, ...)
pub const MEDIA_TYPE: FormatKey<MediaType> = FormatKey::new("mediaType");

/// Encoding name, e.g. "raw", "anim", "h264"
pub const ENCODING: FormatKey<&'static str> = FormatKey::new("encoding");

/// MIME type of the enclosing container
pub const MIME_TYPE: FormatKey<&'static str> = FormatKey::new("mimeType");

/// Frames (or samples) per second
pub const FRAME_RATE: FormatKey<Rational> = FormatKey::new("frameRate");

/// Video frame width in pixels
pub const WIDTH: FormatKey<u32> = FormatKey::new("width");

/// Video frame height in pixels
pub const HEIGHT: FormatKey<u32> = FormatKey::new("height");

/// Bits per pixel (video) or per sample (audio)
pub const DEPTH: FormatKey<u32> = FormatKey::new("depth");

/// Interval between forced key frames, in frames
pub const KEY_FRAME_INTERVAL: FormatKey<u32> = FormatKey::new("keyFrameInterval");

/// Audio sample rate in Hz
pub const SAMPLE_RATE: FormatKey<u32> = FormatKey::new("sampleRate");

/// Audio channel count
pub const CHANNELS: FormatKey<u16> = FormatKey::new("channels");

/// Audio samples are signed
pub const SIGNED: FormatKey<bool> = FormatKey::new("signed");

/// Multi-byte values are big-endian
pub const BIG_ENDIAN: FormatKey<bool> = FormatKey::new("bigEndian");

/// Number of bitplanes of a planar (Amiga-style) frame
pub const PLANES: FormatKey<u32> = FormatKey::new("planes");

/// Free-form name of the producing component; never used for matching
pub const PRODUCER: FormatKey<String> = FormatKey::comment("producer");

// Encoding name constants
pub const ENCODING_RAW: &str = "raw";
pub const ENCODING_ANIM_OP: &str = "animOp";
pub const ENCODING_BITMAP: &str = "bitmap";
pub const ENCODING_H264: &str = "h264";
pub const ENCODING_PCM: &str = "pcm";

#[cfg(test)]
mod tests {
    use super::*;

    fn video_format() -> Format {
        Format::new()
            .with(&MEDIA_TYPE, MediaType::Video)
            .with(&ENCODING, ENCODING_RAW)
            .with(&WIDTH, 640)
            .with(&HEIGHT, 480)
    }

    #[test]
    fn test_get_and_contains() {
        let f = video_format();
        assert_eq!(f.get(&WIDTH), Some(&640));
        assert_eq!(f.get(&DEPTH), None);
        assert!(f.contains_key(&WIDTH));
        assert!(!f.contains_key(&DEPTH));
        assert_eq!(f.get_or(&DEPTH, 24), 24);
    }

    #[test]
    fn test_matching_is_reflexive_and_ignores_absent_keys() {
        let a = video_format();
        let b = video_format().with(&DEPTH, 24);
        assert!(a.matches(&a));
        assert!(a.matches(&b));
        assert!(b.matches(&a));

        // Adding a key to only one side never breaks a previously-true match
        let c = a.clone().with(&FRAME_RATE, Rational::new(30, 1));
        assert!(c.matches(&b));
    }

    #[test]
    fn test_matching_detects_conflicts() {
        let a = video_format();
        let b = video_format().with(&WIDTH, 320);
        assert!(!a.matches(&b));
        assert!(a.matches_without(&b, &[&WIDTH]));
    }

    #[test]
    fn test_comment_keys_excluded_from_matching() {
        let a = video_format().with(&PRODUCER, "one".to_string());
        let b = video_format().with(&PRODUCER, "two".to_string());
        assert!(a.matches(&b));
    }

    #[test]
    fn test_append_prepend_precedence() {
        let a = Format::new().with(&WIDTH, 640);
        let b = Format::new().with(&WIDTH, 320).with(&HEIGHT, 240);

        let ab = a.append(&b);
        assert_eq!(ab.get(&WIDTH), Some(&640)); // self wins
        assert_eq!(ab.get(&HEIGHT), Some(&240)); // other fills gaps

        let pre = a.prepend(&b);
        assert_eq!(pre.get(&WIDTH), Some(&320)); // other wins
        assert_eq!(pre.get(&HEIGHT), Some(&240));
    }

    #[test]
    fn test_intersect_and_remove_keys() {
        let f = video_format();
        let reduced = f.intersect_keys(&[&WIDTH, &HEIGHT]);
        assert_eq!(reduced.len(), 2);
        assert!(reduced.contains_key(&WIDTH));
        assert!(!reduced.contains_key(&ENCODING));

        let removed = f.remove_keys(&[&WIDTH]);
        assert!(!removed.contains_key(&WIDTH));
        assert!(removed.contains_key(&HEIGHT));
    }

    #[test]
    fn test_require_keys() {
        let f = video_format();
        assert!(f.require_keys(&[&WIDTH, &HEIGHT]).is_ok());
        let err = f.require_keys(&[&WIDTH, &SAMPLE_RATE]).unwrap_err();
        assert!(err.to_string().contains("sampleRate"));
    }

    #[test]
    fn test_operations_do_not_mutate() {
        let a = video_format();
        let before = a.len();
        let _ = a.append(&Format::new().with(&DEPTH, 8));
        let _ = a.remove_keys(&[&WIDTH]);
        assert_eq!(a.len(), before);
        assert_eq!(a.get(&WIDTH), Some(&640));
    }
}
