use crate::cache::ItemCountResultCache;
use crate::decision::{Decision, ITEM_COUNT};
use crate::trace_state::{TraceStateCodec, SAMPLING_PERCENTAGE_TRACE_STATE};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::{Context, Key, Value};

/// Read access to the parent of the span being sampled.
///
/// This is the only thing the sampler needs to know about the tracing
/// runtime's parent span. It is implemented for [`Context`] and
/// [`SpanContext`].
pub trait ParentContext {
    /// Returns `true` if the parent has a valid trace id and span id.
    fn is_valid(&self) -> bool;

    /// Returns `true` if the parent was started in another process.
    fn is_remote(&self) -> bool;

    /// Returns `true` if the parent was sampled.
    fn is_sampled(&self) -> bool;

    /// Returns the value of one of the parent's attributes, if known.
    fn attribute(&self, key: &Key) -> Option<Value>;
}

/// [`SpanContext`] does not carry span attributes, so the item count is
/// recovered from the sampling percentage the parent recorded in its trace
/// state.
impl ParentContext for SpanContext {
    fn is_valid(&self) -> bool {
        SpanContext::is_valid(self)
    }

    fn is_remote(&self) -> bool {
        SpanContext::is_remote(self)
    }

    fn is_sampled(&self) -> bool {
        SpanContext::is_sampled(self)
    }

    fn attribute(&self, key: &Key) -> Option<Value> {
        if *key != ITEM_COUNT {
            return None;
        }
        let token = self.trace_state().get(SAMPLING_PERCENTAGE_TRACE_STATE)?;
        let percentage = TraceStateCodec::global().decode(token)?;
        if !(percentage > 0.0 && percentage.is_finite()) {
            return None;
        }
        let item_count = (100.0 / f64::from(percentage)).round();
        Some(Value::I64(item_count as i64))
    }
}

impl ParentContext for Context {
    fn is_valid(&self) -> bool {
        self.span().span_context().is_valid()
    }

    fn is_remote(&self) -> bool {
        self.span().span_context().is_remote()
    }

    fn is_sampled(&self) -> bool {
        self.span().span_context().is_sampled()
    }

    fn attribute(&self, key: &Key) -> Option<Value> {
        ParentContext::attribute(self.span().span_context(), key)
    }
}

/// Decides a span from its local parent, if that is possible.
///
/// Returns `None` when there is no usable parent and the sampler must decide
/// on its own:
///
/// * there is no parent, or its context is invalid;
/// * the parent is remote. Item counts are not propagated across processes,
///   so following a remote parent would lose them;
/// * the parent is sampled but its item count is unknown.
///
/// An unsampled local parent yields [`Decision::Drop`] and a sampled one
/// yields its own item count.
pub fn resolve_local_parent<P>(
    parent: Option<&P>,
    cache: &ItemCountResultCache,
) -> Option<Decision>
where
    P: ParentContext + ?Sized,
{
    let parent = parent?;
    if !parent.is_valid() || parent.is_remote() {
        return None;
    }
    if !parent.is_sampled() {
        return Some(Decision::Drop);
    }
    match parent.attribute(&ITEM_COUNT)? {
        Value::I64(item_count) if item_count >= 1 => Some(Decision::RecordAndSample(
            cache.get_or_create(item_count as u64),
        )),
        _ => None,
    }
}
