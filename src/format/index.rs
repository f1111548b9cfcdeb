//! Container sample index entities
//!
//! Containers keep their on-disk index compact by coalescing runs of samples
//! that share a property: consecutive samples with the same duration form a
//! [`TimeToSampleGroup`], consecutive samples with the same length form a
//! [`SampleSizeGroup`], and consecutive samples that sit back-to-back on disk
//! within the same stream form a [`Chunk`]. Groups are append-only while
//! open and are closed implicitly by the arrival of a sample they cannot
//! absorb.

/// Upper bound on the samples one group may hold; the on-disk counters are
/// 32-bit
pub const MAX_GROUP_SAMPLES: u64 = u32::MAX as u64;

/// One media sample: a compressed frame, an audio block, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Offset relative to the container's media-data region
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// Duration in track time-scale units
    pub duration: u64,
}

impl Sample {
    pub fn new(offset: u64, length: u64, duration: u64) -> Self {
        Sample {
            offset,
            length,
            duration,
        }
    }
}

/// Run of consecutive samples sharing the same duration
#[derive(Debug, Clone)]
pub struct TimeToSampleGroup {
    first: Sample,
    last: Sample,
    sample_count: u64,
}

impl TimeToSampleGroup {
    pub fn new(sample: Sample) -> Self {
        TimeToSampleGroup {
            first: sample,
            last: sample,
            sample_count: 1,
        }
    }

    /// Whether the sample can be merged into this group
    pub fn may_be_added(&self, sample: &Sample) -> bool {
        self.first.duration == sample.duration && self.sample_count < MAX_GROUP_SAMPLES
    }

    /// Append a sample; the caller checked [`may_be_added`](Self::may_be_added)
    pub fn add(&mut self, sample: Sample) {
        debug_assert!(self.may_be_added(&sample));
        self.last = sample;
        self.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Duration of one sample in this group
    pub fn sample_duration(&self) -> u64 {
        self.first.duration
    }

    /// Total duration of the group
    pub fn duration(&self) -> u64 {
        self.first.duration * self.sample_count
    }
}

/// Run of consecutive samples sharing the same length
#[derive(Debug, Clone)]
pub struct SampleSizeGroup {
    first: Sample,
    sample_count: u64,
}

impl SampleSizeGroup {
    pub fn new(sample: Sample) -> Self {
        SampleSizeGroup {
            first: sample,
            sample_count: 1,
        }
    }

    pub fn may_be_added(&self, sample: &Sample) -> bool {
        self.first.length == sample.length && self.sample_count < MAX_GROUP_SAMPLES
    }

    pub fn add(&mut self, sample: Sample) {
        debug_assert!(self.may_be_added(&sample));
        self.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn sample_length(&self) -> u64 {
        self.first.length
    }
}

/// Run of consecutive samples of one stream sitting back-to-back on disk
#[derive(Debug, Clone)]
pub struct Chunk {
    first: Sample,
    last: Sample,
    sample_count: u64,
    /// Stream / sample-description id shared by all samples of the chunk
    pub description_id: u32,
}

impl Chunk {
    pub fn new(sample: Sample, description_id: u32) -> Self {
        Chunk {
            first: sample,
            last: sample,
            sample_count: 1,
            description_id,
        }
    }

    /// A sample extends the chunk when it belongs to the same stream and its
    /// payload starts exactly where the previous one ended
    pub fn may_be_added(&self, sample: &Sample, description_id: u32) -> bool {
        self.description_id == description_id
            && self.last.offset + self.last.length == sample.offset
            && self.sample_count < MAX_GROUP_SAMPLES
    }

    pub fn add(&mut self, sample: Sample) {
        self.last = sample;
        self.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Offset of the chunk's first byte
    pub fn offset(&self) -> u64 {
        self.first.offset
    }

    /// Total bytes covered by the chunk
    pub fn length(&self) -> u64 {
        self.last.offset + self.last.length - self.first.offset
    }
}

/// Append a sample to a group list, merging into the open (last) group when
/// the merge rules allow and opening a new group otherwise
pub fn push_time_to_sample(groups: &mut Vec<TimeToSampleGroup>, sample: Sample) {
    match groups.last_mut() {
        Some(group) if group.may_be_added(&sample) => group.add(sample),
        _ => groups.push(TimeToSampleGroup::new(sample)),
    }
}

/// See [`push_time_to_sample`]
pub fn push_sample_size(groups: &mut Vec<SampleSizeGroup>, sample: Sample) {
    match groups.last_mut() {
        Some(group) if group.may_be_added(&sample) => group.add(sample),
        _ => groups.push(SampleSizeGroup::new(sample)),
    }
}

/// See [`push_time_to_sample`]
pub fn push_chunk(chunks: &mut Vec<Chunk>, sample: Sample, description_id: u32) {
    match chunks.last_mut() {
        Some(chunk) if chunk.may_be_added(&sample, description_id) => chunk.add(sample),
        _ => chunks.push(Chunk::new(sample, description_id)),
    }
}

/// Keyframe bookkeeping that stays allocation-free for all-keyframe tracks.
///
/// Most tracks (raw video, PCM audio) consist entirely of sync samples; the
/// exception list is only materialized once the first non-keyframe arrives.
#[derive(Debug, Clone, Default)]
pub struct KeyframeIndex {
    /// Sorted indices of samples that are NOT keyframes; `None` until the
    /// first non-keyframe is seen
    non_keyframes: Option<Vec<u64>>,
}

impl KeyframeIndex {
    pub fn new() -> Self {
        KeyframeIndex::default()
    }

    /// Record the keyframe flag of the sample at `index`. Samples must be
    /// recorded in increasing index order.
    pub fn push(&mut self, index: u64, keyframe: bool) {
        if !keyframe {
            self.non_keyframes.get_or_insert_with(Vec::new).push(index);
        }
    }

    /// Whether the sample at `index` is a keyframe
    pub fn is_keyframe(&self, index: u64) -> bool {
        match &self.non_keyframes {
            None => true,
            Some(list) => list.binary_search(&index).is_err(),
        }
    }

    /// Whether the exception list was ever allocated
    pub fn has_exceptions(&self) -> bool {
        self.non_keyframes.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_to_sample_merging() {
        let mut groups = Vec::new();
        for i in 0..5 {
            push_time_to_sample(&mut groups, Sample::new(i * 100, 100, 33));
        }
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].sample_count(), 5);
        assert_eq!(groups[0].duration(), 165);

        // A different duration closes the group
        push_time_to_sample(&mut groups, Sample::new(500, 100, 40));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_sample_size_runs() {
        let mut groups = Vec::new();
        for length in [10, 10, 10, 20, 20, 10] {
            push_sample_size(&mut groups, Sample::new(0, length, 1));
        }
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].sample_count(), 3);
        assert_eq!(groups[1].sample_count(), 2);
        assert_eq!(groups[2].sample_count(), 1);
    }

    #[test]
    fn test_chunk_requires_contiguity_and_same_stream() {
        let mut chunks = Vec::new();
        push_chunk(&mut chunks, Sample::new(0, 10, 1), 1);
        push_chunk(&mut chunks, Sample::new(10, 10, 1), 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sample_count(), 2);
        assert_eq!(chunks[0].length(), 20);

        // Gap on disk
        push_chunk(&mut chunks, Sample::new(30, 10, 1), 1);
        assert_eq!(chunks.len(), 2);

        // Contiguous but different stream
        push_chunk(&mut chunks, Sample::new(40, 10, 1), 2);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_keyframe_index_stays_lazy_for_all_keyframe_tracks() {
        let mut index = KeyframeIndex::new();
        for i in 0..100 {
            index.push(i, true);
        }
        assert!(!index.has_exceptions());
        assert!(index.is_keyframe(50));

        index.push(100, false);
        assert!(index.has_exceptions());
        assert!(!index.is_keyframe(100));
        assert!(index.is_keyframe(99));
    }
}
