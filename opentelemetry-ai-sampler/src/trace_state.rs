//! Propagation of the sampling percentage in the W3C `tracestate` header.
//!
//! The sampler records the percentage it sampled with under
//! [`SAMPLING_PERCENTAGE_TRACE_STATE`]. Exporters and downstream services read
//! it back to compute the item count of the spans they report.
use crate::cache::BoundedCache;
use crate::error::{SamplerError, SamplerResult};
use opentelemetry::otel_warn;
use opentelemetry::trace::TraceState;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Trace state key holding the sampling percentage.
pub const SAMPLING_PERCENTAGE_TRACE_STATE: &str = "ai-internal-sp";

const PARSED_PERCENTAGE_CACHE_CAPACITY: usize = 100;

/// A flag that lets exactly one caller emit a diagnostic.
#[derive(Debug)]
pub(crate) struct LogOnce(AtomicBool);

impl LogOnce {
    pub(crate) const fn new() -> Self {
        LogOnce(AtomicBool::new(false))
    }

    /// Returns `true` for the first caller only.
    pub(crate) fn first(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}

/// Encodes and decodes the sampling percentage trace state value.
///
/// The same few tokens show up on a very large number of spans, so decoded
/// values are memoized by token. Each diagnostic is emitted at most once per
/// codec, which makes it once per process for [`TraceStateCodec::global`].
pub struct TraceStateCodec {
    parsed: BoundedCache<String, Option<f32>>,
    missing_logged: LogOnce,
    invalid_logged: LogOnce,
}

impl TraceStateCodec {
    /// Creates a codec with an empty decode cache.
    pub fn new() -> Self {
        TraceStateCodec {
            parsed: BoundedCache::new(PARSED_PERCENTAGE_CACHE_CAPACITY),
            missing_logged: LogOnce::new(),
            invalid_logged: LogOnce::new(),
        }
    }

    /// The codec shared by the whole process.
    pub fn global() -> &'static TraceStateCodec {
        static GLOBAL: OnceLock<TraceStateCodec> = OnceLock::new();
        GLOBAL.get_or_init(TraceStateCodec::new)
    }

    /// Formats a percentage as a trace state value, e.g. `50.0`.
    pub fn encode(&self, percentage: f32) -> String {
        format!("{:?}", percentage)
    }

    /// Parses a trace state value back into a percentage.
    ///
    /// Trace state comes from other processes and is not trusted: a value that
    /// is not a number yields `None`. The first such value is logged.
    pub fn decode(&self, token: &str) -> Option<f32> {
        self.parsed.get_or_insert_with(token, || {
            token
                .trim()
                .parse::<f32>()
                .map_err(|err| {
                    if self.invalid_logged.first() {
                        otel_warn!(
                            name: "AiSampler.TraceState.InvalidSamplingPercentage",
                            message = "Error parsing the sampling percentage in trace state, using the default percentage instead",
                            sampling_percentage = token.to_string(),
                            error = err.to_string()
                        );
                    }
                })
                .ok()
        })
    }

    /// Reads the sampling percentage from `trace_state`.
    ///
    /// Falls back to `default` when the key is absent or its value is not a
    /// number. With `warn_on_missing`, the first trace state without the key
    /// is logged.
    pub fn sampling_percentage(
        &self,
        trace_state: &TraceState,
        default: f32,
        warn_on_missing: bool,
    ) -> f32 {
        match trace_state.get(SAMPLING_PERCENTAGE_TRACE_STATE) {
            Some(token) => self.decode(token).unwrap_or(default),
            None => {
                if warn_on_missing && self.missing_logged.first() {
                    otel_warn!(
                        name: "AiSampler.TraceState.MissingSamplingPercentage",
                        message = "Did not find the sampling percentage in trace state, using the default percentage instead",
                        trace_state = trace_state.header()
                    );
                }
                default
            }
        }
    }

    /// Returns a copy of `trace_state` carrying `percentage`, replacing any
    /// previous value.
    pub fn with_sampling_percentage(
        &self,
        trace_state: &TraceState,
        percentage: f32,
    ) -> SamplerResult<TraceState> {
        trace_state
            .insert(SAMPLING_PERCENTAGE_TRACE_STATE, self.encode(percentage))
            .map_err(|err| SamplerError::TraceState(err.to_string()))
    }
}

impl Default for TraceStateCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceStateCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceStateCodec")
            .field("cached_tokens", &self.parsed.len())
            .finish()
    }
}

/// Reads the sampling percentage from `trace_state` with the process wide
/// codec. See [`TraceStateCodec::sampling_percentage`].
pub fn sampling_percentage(trace_state: &TraceState, default: f32, warn_on_missing: bool) -> f32 {
    TraceStateCodec::global().sampling_percentage(trace_state, default, warn_on_missing)
}

/// Records `percentage` in `trace_state` with the process wide codec. See
/// [`TraceStateCodec::with_sampling_percentage`].
pub fn with_sampling_percentage(
    trace_state: &TraceState,
    percentage: f32,
) -> SamplerResult<TraceState> {
    TraceStateCodec::global().with_sampling_percentage(trace_state, percentage)
}
