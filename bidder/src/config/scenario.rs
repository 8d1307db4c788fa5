use super::TuningArgs;

/// Load-test scenarios.
/// Each scenario is a preset of the tuning knobs.
#[derive(Debug, Clone, Copy, clap::ValueEnum, Default, PartialEq, Eq)]
pub enum Scenario {
    /// Mostly punctual upstream with one in five bids arriving late.
    #[default]
    Default,

    /// Every bid is answered well within its deadline.
    /// Used to measure the overhead of the auction caller itself.
    Punctual,

    /// Slow upstream close to its deadline, with a heavier late tail
    /// and bigger payloads.
    Congested,

    /// Almost every bid misses its deadline.
    /// Used to exercise timeout and cancellation paths of the caller.
    TimeoutStorm,
}

impl Scenario {
    /// Construct the tuning knobs associated with this scenario.
    ///
    /// Knobs left undefined fall back to the built-in defaults.
    pub fn tuning_args(self) -> TuningArgs {
        match self {
            Scenario::Default => TuningArgs::default(),

            Scenario::Punctual => TuningArgs {
                min_delay_ms: Some(5),
                headroom_ms: Some(10),
                late_fraction: Some(0.0),
                ..Default::default()
            },

            Scenario::Congested => TuningArgs {
                min_delay_ms: Some(200),
                headroom_ms: Some(1),
                late_fraction: Some(0.35),
                late_span_ms: Some(150),
                blob_bytes: Some(8192),
                ..Default::default()
            },

            Scenario::TimeoutStorm => TuningArgs {
                late_fraction: Some(0.9),
                late_span_ms: Some(500),
                ..Default::default()
            },
        }
    }
}
