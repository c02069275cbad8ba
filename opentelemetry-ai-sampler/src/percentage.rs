use crate::error::{check_percentage, SamplerResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Supplies the sampling percentage, a value in `[0, 100]`.
///
/// The sampler reads the percentage once per decision and never caches it,
/// so implementations may change the value at any time. Reads happen on the
/// span start hot path and must not block.
///
/// Any `Fn() -> f64` closure is a percentage source.
pub trait PercentageSource: Send + Sync {
    /// Returns the current sampling percentage.
    fn percentage(&self) -> f64;
}

impl<F> PercentageSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn percentage(&self) -> f64 {
        self()
    }
}

/// A sampling percentage that never changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedPercentage(pub(crate) f64);

impl FixedPercentage {
    /// Creates a fixed percentage, rejecting values outside `[0, 100]`.
    pub fn new(percentage: f64) -> SamplerResult<Self> {
        check_percentage(percentage).map(FixedPercentage)
    }
}

impl PercentageSource for FixedPercentage {
    fn percentage(&self) -> f64 {
        self.0
    }
}

/// A sampling percentage that can be updated while spans are being sampled.
///
/// Clones share the same value, so one handle can be kept by whatever drives
/// the updates while another is given to the sampler.
#[derive(Clone)]
pub struct DynamicPercentage {
    bits: Arc<AtomicU64>,
}

impl DynamicPercentage {
    /// Creates a dynamic percentage with the given initial value.
    pub fn new(percentage: f64) -> SamplerResult<Self> {
        let percentage = check_percentage(percentage)?;
        Ok(DynamicPercentage {
            bits: Arc::new(AtomicU64::new(percentage.to_bits())),
        })
    }

    /// Replaces the current percentage. Decisions already in flight may still
    /// observe the previous value.
    pub fn set(&self, percentage: f64) -> SamplerResult<()> {
        let percentage = check_percentage(percentage)?;
        self.bits.store(percentage.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Returns the current percentage.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl PercentageSource for DynamicPercentage {
    fn percentage(&self) -> f64 {
        self.get()
    }
}

impl fmt::Debug for DynamicPercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPercentage")
            .field("percentage", &self.get())
            .finish()
    }
}

/// Rounds a percentage to the nearest value whose item count is a whole
/// number, e.g. `33.0` becomes `33.333...` (item count 3). `0` is returned
/// unchanged.
pub fn round_to_nearest(percentage: f64) -> f64 {
    if percentage == 0.0 {
        return 0.0;
    }
    let item_count = (100.0 / percentage).round();
    100.0 / item_count
}
