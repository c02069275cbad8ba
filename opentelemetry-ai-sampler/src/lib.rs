//! # OpenTelemetry Application Insights Sampler
//!
//! A [`ShouldSample`] implementation that makes the same sampling decision as
//! the other Application Insights SDKs for a given trace, and annotates every
//! sampled span with the number of real-world spans it statistically stands
//! in for (its *item count*).
//!
//! The sampler is made of a few small pieces:
//!
//! * [`sampling_score`] maps a [`TraceId`] to a stable score in `[0, 100]`
//!   using the hash shared by every Application Insights SDK, so every node
//!   of a distributed trace agrees on the verdict.
//! * [`PercentageSource`] supplies the current sampling percentage. It is read
//!   on every decision and may change at runtime.
//! * [`ItemCountResultCache`] keeps one immutable [`ItemCountSample`] per item
//!   count in use, so repeated decisions share a single attribute allocation.
//! * [`ParentContext`] abstracts the local parent span. A sampled local parent
//!   passes its decision and item count down to its children unchanged.
//! * [`TraceStateCodec`] carries the sampling percentage in the W3C
//!   `tracestate` header under [`SAMPLING_PERCENTAGE_TRACE_STATE`].
//!
//! # Example
//!
//! ```
//! use opentelemetry::trace::{Tracer, TracerProvider as _};
//! use opentelemetry_ai_sampler::AiSampler;
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//!
//! let sampler = AiSampler::builder()
//!     .with_percentage(25.0)
//!     .build()
//!     .expect("25 is a valid sampling percentage");
//!
//! let provider = SdkTracerProvider::builder().with_sampler(sampler).build();
//! let tracer = provider.tracer("example");
//! tracer.in_span("operation", |_cx| {
//!     // sampled spans carry `applicationinsights.internal.item_count = 4`
//! });
//! ```
//!
//! [`ShouldSample`]: opentelemetry_sdk::trace::ShouldSample
//! [`TraceId`]: opentelemetry::trace::TraceId
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]

mod cache;
mod config;
mod decision;
mod error;
mod parent;
mod percentage;
mod sampler;
mod score;
mod trace_state;

pub use cache::{ItemCountResultCache, ITEM_COUNT_CACHE_CAPACITY};
pub use config::{
    SamplerConfig, SamplerConfigBuilder, APPLICATIONINSIGHTS_SAMPLING_LOCAL_PARENT_BASED,
    APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE,
};
pub use decision::{Decision, ItemCountSample, ITEM_COUNT};
pub use error::{SamplerError, SamplerResult};
pub use parent::{resolve_local_parent, ParentContext};
pub use percentage::{round_to_nearest, DynamicPercentage, FixedPercentage, PercentageSource};
pub use sampler::{AiSampler, AiSamplerBuilder};
pub use score::{sampling_score, sampling_score_for_id};
pub use trace_state::{
    sampling_percentage, with_sampling_percentage, TraceStateCodec,
    SAMPLING_PERCENTAGE_TRACE_STATE,
};
