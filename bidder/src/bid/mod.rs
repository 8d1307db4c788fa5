//! Bid endpoint domain: from an untrusted request body
//! to a deliberately delayed synthetic bid response.

mod delay;
mod encode;
mod lifecycle;
mod sniff;

pub use self::{
    delay::{DelayDecision, DelayPolicy, DelaySampler, ThreadRngSampler},
    encode::{BidResponse, ResponseEncoder, ResponseFraming, accepts_gzip},
    lifecycle::{
        BidEndpoint, BidLifecycle, BidStats, BodyPrefix, LifecycleOutcome, Phase, RequestState,
    },
    sniff::{BidRequestHint, MAX_SNIFF_PREFIX, MAX_TMAX_MS, sniff_bid_request},
};
