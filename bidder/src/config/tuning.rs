use clap::builder::BoolishValueParser;

/// Tuning knobs of the bid endpoint, as provided by the operator.
///
/// Every knob is optional so that a manually defined value can overwrite
/// the value of the selected [`super::Scenario`]. Each knob can be set
/// using a cli flag or its environment variable.
#[derive(Debug, Clone, clap::Args, Default)]
pub struct TuningArgs {
    /// Minimum delay before a bid response is sent.
    #[arg(long, env = "MIN_DELAY_MS", value_name = "MS")]
    pub min_delay_ms: Option<u64>,

    /// Margin subtracted from tmax for a response to still count as on-time.
    #[arg(long, env = "HEADROOM_MS", value_name = "MS")]
    pub headroom_ms: Option<u64>,

    /// Probability (0.0 ..= 1.0) that a response is deliberately late.
    #[arg(long, env = "LATE_FRACTION", value_name = "RATIO")]
    pub late_fraction: Option<f64>,

    /// Spread of late delays beyond tmax.
    /// Derived from tmax (`max(20, tmax / 2)`) when not defined.
    #[arg(long, env = "LATE_SPAN_MS", value_name = "MS")]
    pub late_span_ms: Option<u64>,

    /// Size of the synthetic filler blob in the response payload.
    #[arg(long, env = "BLOB_BYTES", value_name = "BYTES")]
    pub blob_bytes: Option<usize>,

    /// Gzip the response when the client accepts it.
    #[arg(
        long,
        env = "GZIP",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
    )]
    pub gzip: Option<bool>,

    /// Deadline used when a bid request carries no (valid) tmax.
    #[arg(long, env = "FALLBACK_TMAX", value_name = "MS")]
    pub fallback_tmax: Option<u64>,

    /// Tag echoed in the `upstream` field of every bid response.
    #[arg(long, env = "UPSTREAM_TAG", value_name = "TAG")]
    pub upstream: Option<String>,
}
