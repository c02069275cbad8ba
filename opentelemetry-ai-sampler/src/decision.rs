use opentelemetry::trace::SamplingDecision;
use opentelemetry::{Key, KeyValue};
use std::sync::Arc;

/// Span attribute holding the number of spans a sampled span represents.
pub const ITEM_COUNT: Key = Key::from_static_str("applicationinsights.internal.item_count");

/// The verdict of the sampler for a single span.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// The span is neither recorded nor exported.
    Drop,
    /// The span is recorded and exported, standing in for
    /// [`ItemCountSample::item_count`] spans.
    RecordAndSample(ItemCountSample),
}

impl Decision {
    /// Returns `true` for [`Decision::RecordAndSample`].
    pub fn is_sampled(&self) -> bool {
        matches!(self, Decision::RecordAndSample(_))
    }

    /// The item count of a sampled span, `None` when dropped.
    pub fn item_count(&self) -> Option<u64> {
        match self {
            Decision::Drop => None,
            Decision::RecordAndSample(sample) => Some(sample.item_count()),
        }
    }

    /// Attributes to merge into the span.
    pub fn attributes(&self) -> &[KeyValue] {
        match self {
            Decision::Drop => &[],
            Decision::RecordAndSample(sample) => sample.attributes(),
        }
    }
}

impl From<&Decision> for SamplingDecision {
    fn from(decision: &Decision) -> Self {
        match decision {
            Decision::Drop => SamplingDecision::Drop,
            Decision::RecordAndSample(_) => SamplingDecision::RecordAndSample,
        }
    }
}

/// An immutable "record and sample" result for one item count.
///
/// Cloning is cheap: the attribute list is shared, which lets the
/// [`ItemCountResultCache`] hand the same allocation to every span sampled
/// with this item count.
///
/// [`ItemCountResultCache`]: crate::ItemCountResultCache
#[derive(Clone, Debug)]
pub struct ItemCountSample {
    item_count: u64,
    attributes: Arc<[KeyValue]>,
}

impl ItemCountSample {
    pub(crate) fn new(item_count: u64) -> Self {
        debug_assert!(item_count >= 1, "item count must be at least 1");
        let value = i64::try_from(item_count).unwrap_or(i64::MAX);
        ItemCountSample {
            item_count,
            attributes: Arc::new([KeyValue::new(ITEM_COUNT, value)]),
        }
    }

    /// Number of spans this sampled span represents, always at least `1`.
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// The item count as span attributes.
    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }
}

impl PartialEq for ItemCountSample {
    fn eq(&self, other: &Self) -> bool {
        self.item_count == other.item_count
    }
}

impl Eq for ItemCountSample {}
