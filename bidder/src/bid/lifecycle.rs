//! Per request lifecycle of a bid.
//!
//! A lifecycle runs as its own task and hands its response over a oneshot
//! channel to the connection serving the request. The connection drops its
//! end of that channel when the client goes away, which is how an abort is
//! observed: at any point before the response is claimed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{
    http::{Body, Response, body::util::BodyExt as _},
    telemetry::tracing,
};
use tokio::sync::oneshot;

use crate::config::TuningConfig;

use super::{
    BidRequestHint, DelayDecision, DelayPolicy, DelaySampler, MAX_SNIFF_PREFIX, ResponseEncoder,
    ResponseFraming, ThreadRngSampler, sniff_bid_request,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Body is still being read.
    Receiving,
    /// Body fully read, delay not yet scheduled.
    Buffered,
    /// Delay timer is running.
    Waiting,
    /// Response is claimed and handed over, terminal.
    Responded,
}

/// Mutable state of a single bid request.
///
/// Owned by exactly one [`BidLifecycle`], never shared.
#[derive(Debug)]
pub struct RequestState {
    phase: Phase,
    aborted: bool,
    responded: bool,
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Receiving,
            aborted: false,
            responded: false,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    #[inline]
    pub fn is_responded(&self) -> bool {
        self.responded
    }

    /// Record that the client went away.
    ///
    /// Has no effect once the response is claimed.
    pub fn abort(&mut self) {
        if !self.responded {
            self.aborted = true;
        }
    }

    pub fn body_complete(&mut self) {
        if self.phase == Phase::Receiving {
            self.phase = Phase::Buffered;
        }
    }

    pub fn start_waiting(&mut self) {
        if self.phase == Phase::Buffered {
            self.phase = Phase::Waiting;
        }
    }

    /// Record that a claimed response never reached the connection.
    ///
    /// The request counts as aborted during its [`Phase::Waiting`].
    pub fn handover_failed(&mut self) {
        if self.responded {
            self.responded = false;
            self.aborted = true;
            self.phase = Phase::Waiting;
        }
    }

    /// Claim the one and only right to write the response.
    ///
    /// Returns `false` if the request was aborted or already answered.
    pub fn try_claim_response(&mut self) -> bool {
        if self.aborted || self.responded {
            return false;
        }
        self.responded = true;
        self.phase = Phase::Responded;
        true
    }
}

/// Bounded prefix of a request body.
///
/// Bytes beyond the limit are counted and dropped.
#[derive(Debug)]
pub struct BodyPrefix {
    bytes: Vec<u8>,
    limit: usize,
    total: u64,
}

impl BodyPrefix {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.limit - self.bytes.len();
        if room > 0 {
            self.bytes
                .extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total amount of body bytes seen, retained or not.
    #[inline]
    pub fn total_len(&self) -> u64 {
        self.total
    }
}

/// Process-wide part of the bid endpoint, shared by all lifecycles.
///
/// Only the outcome counters change after creation.
#[derive(Debug)]
pub struct BidEndpoint {
    policy: DelayPolicy,
    encoder: ResponseEncoder,
    fallback_tmax: u64,
    responded: AtomicU64,
    aborted: AtomicU64,
}

/// Snapshot of the lifecycle outcomes seen by a [`BidEndpoint`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BidStats {
    pub responded: u64,
    pub aborted: u64,
}

impl BidEndpoint {
    pub fn new(cfg: &TuningConfig) -> Self {
        Self {
            policy: cfg.delay_policy(),
            encoder: ResponseEncoder::new(cfg),
            fallback_tmax: cfg.fallback_tmax,
            responded: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> BidStats {
        BidStats {
            responded: self.responded.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &LifecycleOutcome) {
        let counter = match outcome {
            LifecycleOutcome::Responded { .. } => &self.responded,
            LifecycleOutcome::Aborted { .. } => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Response was handed over to the connection.
    Responded {
        hint: BidRequestHint,
        decision: DelayDecision,
    },
    /// Client went away, nothing was written.
    ///
    /// `phase` is the phase reached when the abort was observed.
    Aborted { phase: Phase },
}

#[derive(Debug)]
pub struct BidLifecycle<S = ThreadRngSampler> {
    endpoint: Arc<BidEndpoint>,
    framing: ResponseFraming,
    sampler: S,
    state: RequestState,
}

impl BidLifecycle {
    pub fn new(endpoint: Arc<BidEndpoint>, framing: ResponseFraming) -> Self {
        Self::with_sampler(endpoint, framing, ThreadRngSampler)
    }
}

impl<S: DelaySampler> BidLifecycle<S> {
    pub fn with_sampler(endpoint: Arc<BidEndpoint>, framing: ResponseFraming, sampler: S) -> Self {
        Self {
            endpoint,
            framing,
            sampler,
            state: RequestState::new(),
        }
    }

    /// Drive the bid from body to response.
    ///
    /// The response is sent over `reply` unless the receiver
    /// was dropped first, in which case nothing is sent at all.
    /// The outcome is recorded in the endpoint stats.
    pub async fn run(self, body: Body, reply: oneshot::Sender<Response>) -> LifecycleOutcome {
        let endpoint = self.endpoint.clone();
        let outcome = self.drive(body, reply).await;
        endpoint.record(&outcome);
        outcome
    }

    async fn drive(
        mut self,
        mut body: Body,
        mut reply: oneshot::Sender<Response>,
    ) -> LifecycleOutcome {
        let mut prefix = BodyPrefix::new(MAX_SNIFF_PREFIX);
        loop {
            tokio::select! {
                biased;

                _ = reply.closed() => return self.aborted(),

                frame = body.frame() => match frame {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            prefix.push(&data);
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!("bid request body failed: continue with buffered prefix: {err}");
                        break;
                    }
                    None => break,
                },
            }
        }
        drop(body);
        self.state.body_complete();

        let retained = prefix.as_bytes().len() as u64;
        if prefix.total_len() > retained {
            tracing::trace!(
                body.size = prefix.total_len(),
                body.discarded = prefix.total_len() - retained,
                "bid request body drained beyond retained prefix"
            );
        }

        let hint = sniff_bid_request(prefix.as_bytes(), self.endpoint.fallback_tmax);
        let decision = self.endpoint.policy.decide(hint.tmax, &mut self.sampler);
        tracing::debug!(
            bid.id = %hint.id,
            bid.tmax = hint.tmax,
            bid.body_size = prefix.total_len(),
            delay.ms = decision.delay_ms,
            delay.on_time = decision.on_time,
            "bid delay decided",
        );

        self.state.start_waiting();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(decision.delay_ms)) => (),
            _ = reply.closed() => return self.aborted(),
        }

        let response = self
            .endpoint
            .encoder
            .encode(&hint, decision, self.framing)
            .await;

        if reply.is_closed() {
            return self.aborted();
        }
        match self.hand_over(reply, response) {
            Ok(()) => LifecycleOutcome::Responded { hint, decision },
            Err(outcome) => outcome,
        }
    }

    /// Claim the response and send it to the connection.
    ///
    /// A receiver dropped after the claim still fails the handover,
    /// in which case the response is dropped unwritten.
    fn hand_over(
        &mut self,
        reply: oneshot::Sender<Response>,
        response: Response,
    ) -> Result<(), LifecycleOutcome> {
        if !self.state.try_claim_response() {
            return Err(self.aborted());
        }
        reply.send(response).map_err(|_| {
            self.state.handover_failed();
            self.aborted()
        })
    }

    fn aborted(&mut self) -> LifecycleOutcome {
        self.state.abort();
        tracing::debug!(
            phase = ?self.state.phase(),
            "bid client disconnected: response suppressed"
        );
        LifecycleOutcome::Aborted {
            phase: self.state.phase(),
        }
    }
}
