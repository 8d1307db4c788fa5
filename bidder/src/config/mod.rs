use rama::{
    error::{BoxError, ErrorExt as _},
    telemetry::tracing,
};

use crate::bid::{DelayPolicy, MAX_TMAX_MS};

mod scenario;
mod tuning;

pub use self::{scenario::Scenario, tuning::TuningArgs};

pub const DEFAULT_MIN_DELAY_MS: u64 = 120;
pub const DEFAULT_HEADROOM_MS: u64 = 3;
pub const DEFAULT_LATE_FRACTION: f64 = 0.20;
pub const DEFAULT_BLOB_BYTES: usize = 2048;
pub const DEFAULT_FALLBACK_TMAX: u64 = 300;
pub const DEFAULT_UPSTREAM_TAG: &str = "rust";

/// Process-wide tuning of the bid endpoint.
///
/// Resolved once at startup and never mutated afterwards,
/// request handlers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningConfig {
    pub min_delay_ms: u64,
    pub headroom_ms: u64,
    pub late_fraction: f64,
    pub late_span_ms: Option<u64>,
    pub blob_bytes: usize,
    pub gzip_enabled: bool,
    pub fallback_tmax: u64,
    pub upstream: String,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            headroom_ms: DEFAULT_HEADROOM_MS,
            late_fraction: DEFAULT_LATE_FRACTION,
            late_span_ms: None,
            blob_bytes: DEFAULT_BLOB_BYTES,
            gzip_enabled: false,
            fallback_tmax: DEFAULT_FALLBACK_TMAX,
            upstream: DEFAULT_UPSTREAM_TAG.to_owned(),
        }
    }
}

impl TuningConfig {
    /// Resolve the tuning config from an optional scenario preset
    /// and the knobs defined manually by the operator.
    ///
    /// Manually defined knobs overwrite scenario knobs,
    /// knobs defined by neither use the built-in default.
    pub fn try_resolve(
        scenario: Option<Scenario>,
        overwrite: TuningArgs,
    ) -> Result<Self, BoxError> {
        let scenario_args = scenario
            .map(|s| {
                tracing::info!("use scenario to define base tuning: {s:?}");
                s.tuning_args()
            })
            .unwrap_or_else(|| {
                tracing::info!("no scenario defined, use defaults as base tuning");
                Default::default()
            });

        let merged = merge_tuning_args(scenario_args, overwrite);
        Self::try_from_args(merged)
    }

    fn try_from_args(args: TuningArgs) -> Result<Self, BoxError> {
        let cfg = Self {
            min_delay_ms: args.min_delay_ms.unwrap_or(DEFAULT_MIN_DELAY_MS),
            headroom_ms: args.headroom_ms.unwrap_or(DEFAULT_HEADROOM_MS),
            late_fraction: args.late_fraction.unwrap_or(DEFAULT_LATE_FRACTION),
            late_span_ms: args.late_span_ms,
            blob_bytes: args.blob_bytes.unwrap_or(DEFAULT_BLOB_BYTES),
            gzip_enabled: args.gzip.unwrap_or_default(),
            fallback_tmax: args.fallback_tmax.unwrap_or(DEFAULT_FALLBACK_TMAX),
            upstream: args
                .upstream
                .unwrap_or_else(|| DEFAULT_UPSTREAM_TAG.to_owned()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), BoxError> {
        if !(0.0..=1.0).contains(&self.late_fraction) {
            return Err(BoxError::from("late fraction must be within 0.0 ..= 1.0")
                .context_field("late_fraction", self.late_fraction));
        }
        if self.fallback_tmax == 0 {
            return Err(BoxError::from("fallback tmax must be at least 1ms"));
        }
        if self.fallback_tmax > MAX_TMAX_MS {
            return Err(BoxError::from(format!(
                "fallback tmax must be at most {MAX_TMAX_MS}ms"
            ))
            .context_field("fallback_tmax", self.fallback_tmax));
        }
        Ok(())
    }

    pub fn delay_policy(&self) -> DelayPolicy {
        DelayPolicy {
            min_delay_ms: self.min_delay_ms,
            headroom_ms: self.headroom_ms,
            late_fraction: self.late_fraction,
            late_span_ms: self.late_span_ms,
        }
    }
}

fn merge_tuning_args(scenario: TuningArgs, overwrite: TuningArgs) -> TuningArgs {
    macro_rules! merge_tuning {
        ($scenario:ident, $overwrite:ident, {$($property:ident),+ $(,)?}) => {
            TuningArgs {
                $(
                    $property: if let Some(value) = $overwrite.$property {
                        tracing::info!("property '{}': use overwrite: {value}", stringify!($property));
                        Some(value)
                    } else if let Some(value) = $scenario.$property {
                        tracing::info!("property '{}': use scenario: {value}", stringify!($property));
                        Some(value)
                    } else {
                        tracing::info!("property '{}': use default", stringify!($property));
                        None
                    },
                )+
            }
        };
    }

    merge_tuning!(
        scenario, overwrite,
        {
            min_delay_ms,
            headroom_ms,
            late_fraction,
            late_span_ms,
            blob_bytes,
            gzip,
            fallback_tmax,
            upstream,
        }
    )
}

/// Parse a single listener port, tolerating surrounding whitespace
/// as found in hand written `PORTS` lists (e.g. `9100, 9101`).
pub fn parse_port(input: &str) -> Result<u16, String> {
    input
        .trim()
        .parse()
        .map_err(|err| format!("invalid port '{input}': {err}"))
}
