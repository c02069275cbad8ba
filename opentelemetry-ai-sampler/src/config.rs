//! Sampler configuration
//!
//! Defaults can be overridden by environment variables, see
//! [`SamplerConfigBuilder::default`].
use crate::error::{check_percentage, SamplerResult};
use crate::percentage::round_to_nearest;
use opentelemetry::{otel_debug, otel_warn};
use std::env;
use std::str::FromStr;

/// Sampling percentage, a number between 0 and 100.
pub const APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE: &str = "APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE";
/// Whether children of local spans inherit their parent's decision, `true` or `false`.
pub const APPLICATIONINSIGHTS_SAMPLING_LOCAL_PARENT_BASED: &str =
    "APPLICATIONINSIGHTS_SAMPLING_LOCAL_PARENT_BASED";

/// Default sampling percentage: everything is sampled.
const SAMPLING_PERCENTAGE_DEFAULT: f64 = 100.0;
const LOCAL_PARENT_BASED_DEFAULT: bool = true;

/// Sampler configuration.
/// Use [`SamplerConfigBuilder`] to configure your own instance of [`SamplerConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    /// The sampling percentage, rounded so that it maps to a whole item count.
    /// The default value is 100.
    sampling_percentage: f64,

    /// Whether children of local spans inherit their parent's decision. The
    /// default value is `true`.
    local_parent_based: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfigBuilder::default().build_lossy()
    }
}

impl SamplerConfig {
    /// The sampling percentage.
    pub fn sampling_percentage(&self) -> f64 {
        self.sampling_percentage
    }

    /// Whether children of local spans inherit their parent's decision.
    pub fn local_parent_based(&self) -> bool {
        self.local_parent_based
    }
}

/// A builder for creating [`SamplerConfig`] instances.
#[derive(Debug)]
pub struct SamplerConfigBuilder {
    sampling_percentage: f64,
    local_parent_based: bool,
}

impl Default for SamplerConfigBuilder {
    /// Create a new [`SamplerConfigBuilder`] initialized with the default values.
    /// The values are overridden by environment variables if set.
    /// The supported environment variables are:
    /// * `APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE`
    /// * `APPLICATIONINSIGHTS_SAMPLING_LOCAL_PARENT_BASED`
    fn default() -> Self {
        SamplerConfigBuilder {
            sampling_percentage: SAMPLING_PERCENTAGE_DEFAULT,
            local_parent_based: LOCAL_PARENT_BASED_DEFAULT,
        }
        .init_from_env_vars()
    }
}

impl SamplerConfigBuilder {
    /// Set the sampling percentage for [`SamplerConfigBuilder`].
    /// It must be between 0 and 100. It is rounded to the nearest percentage
    /// with a whole item count when the config is built, e.g. 30 becomes
    /// 33.33 (item count 3).
    pub fn with_sampling_percentage(mut self, sampling_percentage: f64) -> Self {
        self.sampling_percentage = sampling_percentage;
        self
    }

    /// Set whether children of local spans inherit their parent's decision.
    pub fn with_local_parent_based(mut self, local_parent_based: bool) -> Self {
        self.local_parent_based = local_parent_based;
        self
    }

    /// Builds a [`SamplerConfig`], failing if the sampling percentage is not
    /// between 0 and 100.
    pub fn build(self) -> SamplerResult<SamplerConfig> {
        let sampling_percentage = check_percentage(self.sampling_percentage)?;
        Ok(SamplerConfig {
            sampling_percentage: rounded(sampling_percentage),
            local_parent_based: self.local_parent_based,
        })
    }

    /// Builds a [`SamplerConfig`], falling back to the default percentage if
    /// the configured one is invalid.
    fn build_lossy(self) -> SamplerConfig {
        let local_parent_based = self.local_parent_based;
        self.build().unwrap_or_else(|err| {
            otel_warn!(
                name: "AiSampler.Config.InvalidSamplingPercentage",
                message = "Falling back to the default sampling percentage",
                error = err.to_string(),
                default = SAMPLING_PERCENTAGE_DEFAULT
            );
            SamplerConfig {
                sampling_percentage: SAMPLING_PERCENTAGE_DEFAULT,
                local_parent_based,
            }
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Ok(sampling_percentage) = env::var(APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE) {
            match f64::from_str(sampling_percentage.trim()) {
                Ok(sampling_percentage) => self.sampling_percentage = sampling_percentage,
                Err(_) => {
                    otel_warn!(
                        name: "AiSampler.Config.InvalidSamplingPercentage",
                        message = format!(
                            "{} must be a number between 0 and 100. Falling back to default sampling percentage: {}",
                            APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE, SAMPLING_PERCENTAGE_DEFAULT
                        ),
                        value = sampling_percentage.as_str()
                    );
                }
            }
        }

        if let Some(local_parent_based) = env::var(APPLICATIONINSIGHTS_SAMPLING_LOCAL_PARENT_BASED)
            .ok()
            .and_then(|value| bool::from_str(value.trim().to_ascii_lowercase().as_str()).ok())
        {
            self.local_parent_based = local_parent_based;
        }

        self
    }
}

fn rounded(sampling_percentage: f64) -> f64 {
    let rounded = round_to_nearest(sampling_percentage);
    if rounded != sampling_percentage {
        otel_debug!(
            name: "AiSampler.Config.SamplingPercentageRounded",
            configured = sampling_percentage,
            rounded = rounded
        );
    }
    rounded
}
