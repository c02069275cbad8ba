use crate::cache::ItemCountResultCache;
use crate::config::SamplerConfig;
use crate::decision::Decision;
use crate::error::{check_percentage, SamplerResult};
use crate::parent::{resolve_local_parent, ParentContext};
use crate::percentage::{FixedPercentage, PercentageSource};
use crate::score::sampling_score;
use crate::trace_state::{LogOnce, TraceStateCodec};
use opentelemetry::otel_warn;
use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;
use std::fmt;
use std::sync::Arc;

static TRACE_STATE_UPDATE_FAILURE_LOGGED: LogOnce = LogOnce::new();

/// Samples traces the way every Application Insights SDK does and records the
/// item count of each sampled span.
///
/// A span is sampled when the [`sampling_score`] of its trace is below the
/// current sampling percentage, so all services of a trace reach the same
/// verdict. Sampled spans get an [`ITEM_COUNT`] attribute of
/// `round(100 / percentage)`, and the percentage is written into the trace
/// state under [`SAMPLING_PERCENTAGE_TRACE_STATE`].
///
/// When local parent based sampling is on (the default), children of a span
/// started in the same process reuse the parent's decision and item count
/// instead of computing their own. Remote parents are ignored, because their
/// item count does not travel with the trace context.
///
/// Clones share the percentage source and the item count cache.
///
/// [`ITEM_COUNT`]: crate::ITEM_COUNT
/// [`SAMPLING_PERCENTAGE_TRACE_STATE`]: crate::SAMPLING_PERCENTAGE_TRACE_STATE
#[derive(Clone)]
pub struct AiSampler {
    local_parent_based: bool,
    percentage: Arc<dyn PercentageSource>,
    cache: Arc<ItemCountResultCache>,
}

impl AiSampler {
    /// Creates a local parent based sampler reading its percentage from
    /// `percentage`.
    pub fn new<P>(percentage: P) -> Self
    where
        P: PercentageSource + 'static,
    {
        Self::with_local_parent_based(percentage, true)
    }

    /// Creates a sampler, choosing whether local parents are followed.
    pub fn with_local_parent_based<P>(percentage: P, local_parent_based: bool) -> Self
    where
        P: PercentageSource + 'static,
    {
        AiSampler {
            local_parent_based,
            percentage: Arc::new(percentage),
            cache: Arc::new(ItemCountResultCache::new()),
        }
    }

    /// Creates a [`AiSamplerBuilder`] to configure a sampler.
    pub fn builder() -> AiSamplerBuilder {
        AiSamplerBuilder::default()
    }

    /// Creates a sampler configured from the environment. See
    /// [`SamplerConfig`] for the supported variables.
    pub fn from_env() -> Self {
        AiSamplerBuilder::from_config(SamplerConfig::default()).build_infallible()
    }

    /// Name of the sampling algorithm, for diagnostics.
    pub fn description(&self) -> &'static str {
        "AiSampler"
    }

    /// Whether children of local spans inherit their parent's decision.
    pub fn is_local_parent_based(&self) -> bool {
        self.local_parent_based
    }

    /// Decides whether a span of trace `trace_id` is sampled.
    ///
    /// `parent` is the span's parent, if any; see [`resolve_local_parent`] for
    /// how it is used.
    pub fn decide<P>(&self, parent: Option<&P>, trace_id: TraceId) -> Decision
    where
        P: ParentContext + ?Sized,
    {
        self.decide_with_percentage(parent, trace_id).0
    }

    /// Returns the decision and, unless it was inherited from the parent, the
    /// percentage it was computed with.
    fn decide_with_percentage<P>(
        &self,
        parent: Option<&P>,
        trace_id: TraceId,
    ) -> (Decision, Option<f64>)
    where
        P: ParentContext + ?Sized,
    {
        if self.local_parent_based {
            if let Some(decision) = resolve_local_parent(parent, &self.cache) {
                return (decision, None);
            }
        }

        let percentage = clamp_percentage(self.percentage.percentage());
        if !should_record_and_sample(trace_id, percentage) {
            return (Decision::Drop, Some(percentage));
        }

        // percentage is not 0 here
        let item_count = (100.0 / percentage).round() as u64;
        let sample = self.cache.get_or_create(item_count);
        (Decision::RecordAndSample(sample), Some(percentage))
    }
}

/// Keeps a percentage from a dynamic source within `[0, 100]`.
fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

fn should_record_and_sample(trace_id: TraceId, percentage: f64) -> bool {
    if percentage >= 100.0 {
        return true;
    }
    if percentage <= 0.0 {
        return false;
    }
    sampling_score(trace_id) < percentage
}

impl ShouldSample for AiSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        let (decision, percentage) = self.decide_with_percentage(parent_context, trace_id);

        let parent_trace_state = match parent_context {
            Some(ctx) => ctx.span().span_context().trace_state().clone(),
            None => TraceState::default(),
        };
        let trace_state = match percentage {
            Some(percentage) => TraceStateCodec::global()
                .with_sampling_percentage(&parent_trace_state, percentage as f32)
                .unwrap_or_else(|err| {
                    if TRACE_STATE_UPDATE_FAILURE_LOGGED.first() {
                        otel_warn!(
                            name: "AiSampler.TraceState.UpdateFailed",
                            message = "Could not record the sampling percentage in trace state",
                            error = err.to_string()
                        );
                    }
                    parent_trace_state
                }),
            None => parent_trace_state,
        };

        SamplingResult {
            decision: SamplingDecision::from(&decision),
            attributes: decision.attributes().to_vec(),
            trace_state,
        }
    }
}

impl fmt::Debug for AiSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.description())
            .field("local_parent_based", &self.local_parent_based)
            .field("cached_item_counts", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AiSampler`].
///
/// Defaults to sampling everything and following local parents.
pub struct AiSamplerBuilder {
    local_parent_based: bool,
    percentage: PercentageSetting,
    cache: Option<Arc<ItemCountResultCache>>,
}

enum PercentageSetting {
    Fixed(f64),
    Source(Arc<dyn PercentageSource>),
}

impl Default for AiSamplerBuilder {
    fn default() -> Self {
        AiSamplerBuilder {
            local_parent_based: true,
            percentage: PercentageSetting::Fixed(100.0),
            cache: None,
        }
    }
}

impl AiSamplerBuilder {
    /// Creates a builder initialized from `config`.
    pub fn from_config(config: SamplerConfig) -> Self {
        AiSamplerBuilder {
            local_parent_based: config.local_parent_based(),
            percentage: PercentageSetting::Fixed(config.sampling_percentage()),
            cache: None,
        }
    }

    /// Samples with a fixed percentage in `[0, 100]`.
    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = PercentageSetting::Fixed(percentage);
        self
    }

    /// Reads the percentage from `source` on every decision.
    pub fn with_percentage_source<P>(mut self, source: P) -> Self
    where
        P: PercentageSource + 'static,
    {
        self.percentage = PercentageSetting::Source(Arc::new(source));
        self
    }

    /// Whether children of local spans inherit their parent's decision.
    pub fn with_local_parent_based(mut self, local_parent_based: bool) -> Self {
        self.local_parent_based = local_parent_based;
        self
    }

    /// Uses `cache` instead of a new cache, e.g. to share it between
    /// samplers.
    pub fn with_item_count_cache(mut self, cache: Arc<ItemCountResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the sampler, failing if the fixed percentage is outside
    /// `[0, 100]`.
    pub fn build(self) -> SamplerResult<AiSampler> {
        if let PercentageSetting::Fixed(percentage) = self.percentage {
            check_percentage(percentage)?;
        }
        Ok(self.build_infallible())
    }

    /// Builds without validating; percentages are clamped when read.
    fn build_infallible(self) -> AiSampler {
        let percentage: Arc<dyn PercentageSource> = match self.percentage {
            PercentageSetting::Fixed(percentage) => {
                Arc::new(FixedPercentage(clamp_percentage(percentage)))
            }
            PercentageSetting::Source(source) => source,
        };
        AiSampler {
            local_parent_based: self.local_parent_based,
            percentage,
            cache: self.cache.unwrap_or_default(),
        }
    }
}

impl fmt::Debug for AiSamplerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("AiSamplerBuilder");
        debug.field("local_parent_based", &self.local_parent_based);
        match &self.percentage {
            PercentageSetting::Fixed(percentage) => debug.field("percentage", percentage),
            PercentageSetting::Source(_) => debug.field("percentage", &"<dynamic>"),
        };
        debug.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ITEM_COUNT;
    use crate::percentage::DynamicPercentage;
    use crate::trace_state::SAMPLING_PERCENTAGE_TRACE_STATE;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags};
    use opentelemetry::{Key, Value};
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // scores 2.339..., sampled at any percentage above that
    const LOW_SCORE_TRACE_ID: &str = "00000000000000000000000000000001";
    // scores 52.788...
    const MID_SCORE_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn trace_id(hex: &str) -> TraceId {
        TraceId::from_hex(hex).unwrap()
    }

    fn sampler(percentage: f64) -> AiSampler {
        AiSampler::builder()
            .with_percentage(percentage)
            .build()
            .unwrap()
    }

    /// A percentage source that counts how often it was read.
    #[derive(Clone)]
    struct CountingPercentage {
        percentage: f64,
        reads: Arc<AtomicUsize>,
    }

    impl CountingPercentage {
        fn new(percentage: f64) -> Self {
            CountingPercentage {
                percentage,
                reads: Arc::default(),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::Relaxed)
        }
    }

    impl PercentageSource for CountingPercentage {
        fn percentage(&self) -> f64 {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.percentage
        }
    }

    struct TestParent {
        remote: bool,
        sampled: bool,
        item_count: Option<i64>,
    }

    impl ParentContext for TestParent {
        fn is_valid(&self) -> bool {
            true
        }

        fn is_remote(&self) -> bool {
            self.remote
        }

        fn is_sampled(&self) -> bool {
            self.sampled
        }

        fn attribute(&self, key: &Key) -> Option<Value> {
            if *key == ITEM_COUNT {
                self.item_count.map(Value::I64)
            } else {
                None
            }
        }
    }

    fn parent_context(sampled: bool, remote: bool, trace_state: &str) -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            trace_id(MID_SCORE_TRACE_ID),
            SpanId::from(1u64),
            if sampled {
                TraceFlags::SAMPLED
            } else {
                TraceFlags::default()
            },
            remote,
            trace_state.parse::<TraceState>().unwrap(),
        ))
    }

    #[test]
    fn sampling() {
        let total = 10_000;
        let mut rng = rand::rng();
        for percentage in [0.0, 10.0, 25.0, 50.0, 75.0, 100.0] {
            let sampler = sampler(percentage);
            let mut sampled = 0;
            for _ in 0..total {
                let trace_id = TraceId::from(rng.random::<u128>());
                if sampler.decide::<Context>(None, trace_id).is_sampled() {
                    sampled += 1;
                }
            }

            let expectation = percentage / 100.0;
            let got = sampled as f64 / total as f64;
            let mut tolerance = 0.0;
            if expectation > 0.0 && expectation < 1.0 {
                // See https://en.wikipedia.org/wiki/Binomial_proportion_confidence_interval
                let z = 4.75342; // This should succeed 99.9999% of the time
                tolerance = z * (got * (1.0 - got) / total as f64).sqrt();
            }

            let diff = (got - expectation).abs();
            assert!(
                diff <= tolerance,
                "{}% got {:?} (diff: {}), expected {} (w/tolerance: {})",
                percentage,
                got,
                diff,
                expectation,
                tolerance
            );
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let mut rng = rand::rng();
        for percentage in [1.0, 33.3, 50.0, 99.0] {
            let sampler = sampler(percentage);
            for _ in 0..1_000 {
                let trace_id = TraceId::from(rng.random::<u128>());
                assert_eq!(
                    sampler.decide::<Context>(None, trace_id),
                    sampler.decide::<Context>(None, trace_id)
                );
            }
        }
    }

    #[test]
    fn decisions_are_monotonic_in_percentage() {
        let percentages = [0.0, 0.5, 1.0, 5.0, 10.0, 25.0, 33.3, 50.0, 75.0, 99.9, 100.0];
        let samplers = percentages.map(sampler);
        let mut rng = rand::rng();

        for _ in 0..1_000 {
            let trace_id = TraceId::from(rng.random::<u128>());
            let verdicts = samplers
                .iter()
                .map(|s| s.decide::<Context>(None, trace_id).is_sampled())
                .collect::<Vec<_>>();
            assert!(
                verdicts.windows(2).all(|w| !w[0] || w[1]),
                "{:?} for {}",
                verdicts,
                trace_id
            );
        }
    }

    #[test]
    fn boundary_percentages() {
        let never = sampler(0.0);
        let always = sampler(100.0);
        let mut rng = rand::rng();

        for _ in 0..1_000 {
            let trace_id = TraceId::from(rng.random::<u128>());
            assert_eq!(never.decide::<Context>(None, trace_id), Decision::Drop);
            assert_eq!(
                always.decide::<Context>(None, trace_id).item_count(),
                Some(1)
            );
        }
    }

    #[test]
    fn item_count_is_inverse_of_percentage() {
        // percentage, expected item count
        let test_cases = vec![(100.0, 1), (50.0, 2), (25.0, 4), (33.3, 3), (10.0, 10), (3.0, 33)];

        for (percentage, expected) in test_cases {
            let decision = sampler(percentage).decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));
            assert_eq!(decision.item_count(), Some(expected), "{}%", percentage);
        }
    }

    #[test]
    fn score_threshold_is_exclusive_of_higher_scores() {
        let sampler = sampler(50.0);

        assert!(sampler
            .decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID))
            .is_sampled());
        assert_eq!(
            sampler.decide::<Context>(None, trace_id(MID_SCORE_TRACE_ID)),
            Decision::Drop
        );
    }

    #[test]
    fn equal_item_counts_reuse_cached_sample() {
        let cache = Arc::new(ItemCountResultCache::new());
        let first = AiSampler::builder()
            .with_percentage(25.0)
            .with_item_count_cache(Arc::clone(&cache))
            .build()
            .unwrap();
        // rounds to the same item count
        let second = AiSampler::builder()
            .with_percentage(24.0)
            .with_item_count_cache(Arc::clone(&cache))
            .build()
            .unwrap();

        let a = first.decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));
        let b = second.decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));

        assert_eq!(a, b);
        assert_eq!(a.attributes(), b.attributes());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn local_parent_decision_is_inherited_without_scoring() {
        let percentage = CountingPercentage::new(0.0);
        let sampler = AiSampler::new(percentage.clone());

        let sampled_parent = TestParent {
            remote: false,
            sampled: true,
            item_count: Some(4),
        };
        let decision = sampler.decide(Some(&sampled_parent), trace_id(MID_SCORE_TRACE_ID));
        assert_eq!(decision.item_count(), Some(4));

        let unsampled_parent = TestParent {
            remote: false,
            sampled: false,
            item_count: None,
        };
        let decision = sampler.decide(Some(&unsampled_parent), trace_id(LOW_SCORE_TRACE_ID));
        assert_eq!(decision, Decision::Drop);

        assert_eq!(percentage.reads(), 0);
    }

    #[test]
    fn sampled_local_parent_without_item_count_falls_through() {
        let percentage = CountingPercentage::new(100.0);
        let sampler = AiSampler::new(percentage.clone());
        let parent = TestParent {
            remote: false,
            sampled: true,
            item_count: None,
        };

        let decision = sampler.decide(Some(&parent), trace_id(MID_SCORE_TRACE_ID));

        assert_eq!(decision.item_count(), Some(1));
        assert_eq!(percentage.reads(), 1);
    }

    #[test]
    fn remote_parent_is_not_inherited() {
        let percentage = CountingPercentage::new(0.0);
        let sampler = AiSampler::new(percentage.clone());
        let parent = TestParent {
            remote: true,
            sampled: true,
            item_count: Some(4),
        };

        let decision = sampler.decide(Some(&parent), trace_id(LOW_SCORE_TRACE_ID));

        assert_eq!(decision, Decision::Drop);
        assert_eq!(percentage.reads(), 1);
    }

    #[test]
    fn local_parent_is_ignored_when_disabled() {
        let sampler = AiSampler::with_local_parent_based(FixedPercentage(100.0), false);
        let parent = TestParent {
            remote: false,
            sampled: false,
            item_count: None,
        };

        let decision = sampler.decide(Some(&parent), trace_id(MID_SCORE_TRACE_ID));

        assert_eq!(decision.item_count(), Some(1));
        assert!(!sampler.is_local_parent_based());
    }

    #[test]
    fn percentage_changes_apply_to_next_decision() {
        let percentage = DynamicPercentage::new(100.0).unwrap();
        let sampler = AiSampler::new(percentage.clone());
        let trace_id = trace_id(MID_SCORE_TRACE_ID);

        assert!(sampler.decide::<Context>(None, trace_id).is_sampled());
        percentage.set(50.0).unwrap();
        assert_eq!(sampler.decide::<Context>(None, trace_id), Decision::Drop);
        percentage.set(60.0).unwrap();
        assert_eq!(
            sampler.decide::<Context>(None, trace_id).item_count(),
            Some(2)
        );
    }

    #[test]
    fn out_of_range_sources_are_clamped() {
        let test_cases: Vec<(f64, Option<u64>)> = vec![
            (-5.0, None),
            (f64::NAN, None),
            (150.0, Some(1)),
            (f64::INFINITY, Some(1)),
        ];

        for (raw, expected) in test_cases {
            let sampler = AiSampler::builder()
                .with_percentage_source(move || raw)
                .build()
                .unwrap();
            let decision = sampler.decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));
            assert_eq!(decision.item_count(), expected, "{}", raw);
        }
    }

    #[test]
    fn builder_rejects_invalid_fixed_percentage() {
        assert!(AiSampler::builder().with_percentage(120.0).build().is_err());
        assert!(AiSampler::builder().with_percentage(-1.0).build().is_err());
    }

    #[test]
    fn should_sample_records_item_count_and_percentage() {
        let result = sampler(25.0).should_sample(
            None,
            trace_id(LOW_SCORE_TRACE_ID),
            "root",
            &SpanKind::Server,
            &[],
            &[],
        );

        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
        assert_eq!(result.attributes, vec![KeyValue::new(ITEM_COUNT, 4i64)]);
        assert_eq!(
            result.trace_state.get(SAMPLING_PERCENTAGE_TRACE_STATE),
            Some("25.0")
        );
    }

    #[test]
    fn should_sample_dropped_root() {
        let result = sampler(0.0).should_sample(
            Some(&Context::new()),
            trace_id(LOW_SCORE_TRACE_ID),
            "root",
            &SpanKind::Internal,
            &[],
            &[],
        );

        assert_eq!(result.decision, SamplingDecision::Drop);
        assert!(result.attributes.is_empty());
        assert_eq!(
            result.trace_state.get(SAMPLING_PERCENTAGE_TRACE_STATE),
            Some("0.0")
        );
    }

    #[test]
    fn should_sample_keeps_local_parent_trace_state() {
        let parent = parent_context(true, false, "foo=bar,ai-internal-sp=25.0");

        let result = sampler(100.0).should_sample(
            Some(&parent),
            trace_id(MID_SCORE_TRACE_ID),
            "child",
            &SpanKind::Client,
            &[],
            &[],
        );

        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
        assert_eq!(result.attributes, vec![KeyValue::new(ITEM_COUNT, 4i64)]);
        assert_eq!(result.trace_state.header(), "foo=bar,ai-internal-sp=25.0");
    }

    #[test]
    fn should_sample_recomputes_for_remote_parent() {
        let parent = parent_context(true, true, "foo=bar,ai-internal-sp=25.0");

        let result = sampler(50.0).should_sample(
            Some(&parent),
            trace_id(LOW_SCORE_TRACE_ID),
            "server",
            &SpanKind::Server,
            &[],
            &[],
        );

        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
        assert_eq!(result.attributes, vec![KeyValue::new(ITEM_COUNT, 2i64)]);
        assert_eq!(result.trace_state.get("foo"), Some("bar"));
        assert_eq!(
            result.trace_state.get(SAMPLING_PERCENTAGE_TRACE_STATE),
            Some("50.0")
        );
    }

    #[test]
    fn debug_output_does_not_read_percentage_source() {
        let percentage = CountingPercentage::new(25.0);
        let builder = AiSampler::builder().with_percentage_source(percentage.clone());

        let formatted = format!("{:?}", builder);
        assert!(formatted.contains("<dynamic>"), "{}", formatted);

        let sampler = builder.build().unwrap();
        let _ = format!("{:?}", sampler);
        assert_eq!(percentage.reads(), 0);

        let fixed = format!("{:?}", AiSampler::builder().with_percentage(25.0));
        assert!(fixed.contains("25.0"), "{}", fixed);
    }

    #[test]
    fn clone_a_sampler() {
        let sampler = sampler(25.0);
        #[allow(clippy::redundant_clone)]
        let cloned = sampler.clone();

        let decision = sampler.decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));
        let cloned_decision = cloned.decide::<Context>(None, trace_id(LOW_SCORE_TRACE_ID));

        assert_eq!(decision, cloned_decision);
        assert_eq!(cloned.cache.len(), 1);
        assert_eq!(format!("{:?}", cloned).split_whitespace().next(), Some("AiSampler"));
    }
}
