// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CUBIC congestion control with multi-stream scaling.
//!
//! The window update functions follow "CUBIC: A New TCP-Friendly High-Speed
//! TCP Variant" (Rhee, Xu), with one extension: a connection carrying `n`
//! concurrent streams backs off like an ensemble of `n` independent CUBIC
//! flows would in aggregate, and grows its TCP-friendly reference window `n`
//! times as fast.

use crate::{
    recovery::{
        congestion_controller::{CongestionController, Notification, PathView, Publisher},
        cubic::State::*,
        DEFAULT_MSS, MICROSEC_PER_SEC, MINIMUM_WINDOW,
    },
    time::Timestamp,
};
#[cfg(not(feature = "std"))]
use num_traits::Float as _;
use tracing::{debug, trace};

/// The identifier under which the algorithm is registered
pub const CUBIC_ALGORITHM_ID: u32 = 0x0f0f_0f0f;

// The cubic curve is evaluated in 2^-10 fractions of a second instead of
// milliseconds so a 10-bit right shift can stand in for a divide.
const CUBE_SCALE: u32 = 40;
const CUBE_CWND_SCALE: u64 = 410;

/// The cube factor for windows in bytes
const CUBE_FACTOR: u64 = (1u64 << CUBE_SCALE) / CUBE_CWND_SCALE / DEFAULT_MSS as u64;

/// Multiplicative decrease factor of a single CUBIC flow
const BETA: f32 = 0.7;

/// W_max backoff factor of a single flow when fast convergence detects a
/// competing flow
const BETA_LAST_MAX: f32 = 0.85;

/// The aggregate behavior of `n` concurrent CUBIC flows sharing one path.
///
/// A zero stream count is treated as one flow, so every factor is well
/// defined for any path state.
#[derive(Clone, Copy, Debug)]
struct FlowEnsemble {
    streams: u64,
}

impl FlowEnsemble {
    fn new(total_stream_count: u64) -> Self {
        Self {
            streams: total_stream_count.max(1),
        }
    }

    /// The window decrease factor after a single loss event.
    ///
    /// One of `n` flows backs off by `BETA` while the other `n - 1` keep
    /// their windows, so the aggregate retains `((n - 1) + BETA) / n` of its
    /// window. Reduces to `BETA` for a single stream and approaches 1 as the
    /// stream count grows.
    fn beta(self) -> f32 {
        let n = self.streams as f32;
        (n - 1.0 + BETA) / n
    }

    /// The aggregate `W_max` backoff applied by fast convergence
    fn beta_last_max(self) -> f32 {
        let n = self.streams as f32;
        (n - 1.0 + BETA_LAST_MAX) / n
    }

    /// The additive-increase coefficient of the TCP-friendly reference
    /// window, per section 3.3 of the CUBIC paper.
    fn alpha(self) -> f32 {
        let n = self.streams as f32;
        let beta = self.beta();
        3.0 * n * n * (1.0 - beta) / (1.0 + beta)
    }
}

/// Evaluates the cubic window function.
///
/// `elapsed` and `time_of_origin` are in 2^-10 second units; the returned
/// window is in bytes and saturates at zero on the concave side of the
/// curve.
fn cubic_target(elapsed: u64, time_of_origin: u64, origin_cwnd: u64) -> u64 {
    let offset = elapsed.abs_diff(time_of_origin);

    let delta = (CUBE_CWND_SCALE as u128 * (offset as u128).pow(3) * DEFAULT_MSS as u128)
        >> CUBE_SCALE;
    let delta = u64::try_from(delta).unwrap_or(u64::MAX);

    if elapsed > time_of_origin {
        origin_cwnd.saturating_add(delta)
    } else {
        origin_cwnd.saturating_sub(delta)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    SlowStart,
    CongestionAvoidance,
}

/// A congestion controller that approximates the aggregate behavior of `n`
/// parallel CUBIC flows inside a single connection.
///
/// Slow start has no threshold and terminates only on the first loss signal;
/// from then on the cubic function is the authoritative source of the
/// congestion window, subject to the New Reno floor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CubicCongestionController {
    state: State,
    /// Start of the current cubic epoch; `None` while the clock is frozen
    epoch_start: Option<Timestamp>,
    /// Running estimate of the window a New Reno flow would have under the
    /// same conditions, used as a TCP-friendliness floor
    estimated_nr_cwnd: u64,
    /// W_max: the window at the last loss event, possibly scaled down by
    /// fast convergence
    last_max_cwnd: u64,
    /// K: the time at which the cubic curve reaches `origin_cwnd`, measured
    /// from the epoch start in 2^-10 second units
    time_of_origin: u64,
    /// The window at the origin point of the current epoch's curve
    origin_cwnd: u64,
    /// The most recent cubic target, before the New Reno floor was applied
    last_target_cwnd: u64,
}

impl Default for CubicCongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CubicCongestionController {
    pub fn new() -> Self {
        Self {
            state: SlowStart,
            epoch_start: None,
            estimated_nr_cwnd: 0,
            last_max_cwnd: 0,
            time_of_origin: 0,
            origin_cwnd: 0,
            last_target_cwnd: 0,
        }
    }

    fn on_acknowledgement(
        &mut self,
        path: &mut PathView,
        bytes_acked: u64,
        now: Timestamp,
        publisher: &mut dyn Publisher,
    ) {
        if path.bytes_in_transit < *path.cwnd {
            // The sender could not fill the window before this ACK arrived.
            // Freeze the cubic clock so idle periods do not let the curve
            // race ahead of what the path has actually carried.
            //
            // `bytes_in_transit` reflects window usage after the *previous*
            // ACK, which is the most recent observation available here.
            self.epoch_start = None;
            trace!(cwnd = *path.cwnd, bytes_in_transit = path.bytes_in_transit, "window underutilized, freezing epoch");
            return;
        }

        let epoch_start = match self.epoch_start {
            Some(epoch_start) => epoch_start,
            None => {
                // The ACK reports a state that is one round trip old, so the
                // epoch actually began one `rtt_min` ago.
                let epoch_start = now.saturating_sub(path.rtt_min);

                // Re-anchor the New Reno estimate to the cubic window.
                self.estimated_nr_cwnd = *path.cwnd;

                if self.last_max_cwnd <= *path.cwnd {
                    // The window already exceeds W_max; the current point is
                    // the origin and the curve rises from here.
                    self.time_of_origin = 0;
                    self.origin_cwnd = *path.cwnd;
                } else {
                    // General case: at t = 0 the origin point is at (K, W_max)
                    self.time_of_origin = ((CUBE_FACTOR as u128
                        * (self.last_max_cwnd - *path.cwnd) as u128)
                        as f64)
                        .cbrt() as u64;
                    self.origin_cwnd = self.last_max_cwnd;
                }

                trace!(
                    time_of_origin = self.time_of_origin,
                    origin_cwnd = self.origin_cwnd,
                    "starting new epoch"
                );
                self.epoch_start = Some(epoch_start);
                epoch_start
            }
        };

        // Elapsed time since epoch start, in 2^-10 second units
        let elapsed_us = now.saturating_duration_since(epoch_start).as_micros() as u64;
        let elapsed = (((elapsed_us as u128) << 10) / MICROSEC_PER_SEC as u128) as u64;

        let mut target = cubic_target(elapsed, self.time_of_origin, self.origin_cwnd);

        // Limit the per-ACK increase to half the acknowledged bytes, so a
        // large ACK uncovering a steep part of the curve cannot overshoot.
        target = target.min(*path.cwnd + bytes_acked / 2);
        self.last_target_cwnd = target;

        // Grow the New Reno estimate by roughly alpha * MSS bytes per
        // estimated window of acknowledged bytes.
        let ensemble = FlowEnsemble::new(path.total_stream_count);
        let estimate = self.estimated_nr_cwnd.max(MINIMUM_WINDOW);
        self.estimated_nr_cwnd = estimate
            + (bytes_acked as f64 * (ensemble.alpha() as f64 * DEFAULT_MSS as f64)
                / estimate as f64) as u64;

        // TCP friendliness: never commit less than the New Reno estimate.
        if target < self.estimated_nr_cwnd {
            target = self.estimated_nr_cwnd;
        }

        *path.cwnd = target;
        publisher.on_window_updated(target);
    }

    fn on_loss(&mut self, path: &mut PathView, publisher: &mut dyn Publisher) {
        let ensemble = FlowEnsemble::new(path.total_stream_count);
        let cwnd = *path.cwnd;

        // Fast convergence: losing again before W_max was re-attained (with
        // one MSS of slack for estimation noise over a round trip) means
        // another flow is competing for the bottleneck, so back W_max off
        // further to release bandwidth sooner.
        if cwnd + (DEFAULT_MSS as u64) < self.last_max_cwnd {
            self.last_max_cwnd = (ensemble.beta_last_max() * cwnd as f32) as u64;
        } else {
            self.last_max_cwnd = cwnd;
        }

        self.epoch_start = None;

        *path.cwnd = ((ensemble.beta() * cwnd as f32) as u64).max(MINIMUM_WINDOW);
        debug!(
            cwnd = *path.cwnd,
            last_max_cwnd = self.last_max_cwnd,
            streams = ensemble.streams,
            "congestion event"
        );
        publisher.on_congestion_event(*path.cwnd);
    }
}

impl CongestionController for CubicCongestionController {
    fn on_notification(
        &mut self,
        path: &mut PathView,
        notification: Notification,
        now: Timestamp,
        publisher: &mut dyn Publisher,
    ) {
        match self.state {
            SlowStart => match notification {
                Notification::Acknowledgement { bytes_acked } => {
                    // Traditional slow start, without a threshold: the phase
                    // only ends on the first loss signal.
                    *path.cwnd += bytes_acked;
                    publisher.on_window_updated(*path.cwnd);
                }
                Notification::Repeat { .. } | Notification::Timeout => {
                    self.state = CongestionAvoidance;
                    self.on_loss(path, publisher);
                    publisher.on_slow_start_exited(*path.cwnd);
                }
                _ => {}
            },
            CongestionAvoidance => match notification {
                Notification::Acknowledgement { bytes_acked } => {
                    self.on_acknowledgement(path, bytes_acked, now, publisher);
                }
                Notification::Repeat { .. } | Notification::Timeout => {
                    self.on_loss(path, publisher);
                }
                _ => {}
            },
        }
    }

    fn is_slow_start(&self) -> bool {
        matches!(self.state, SlowStart)
    }
}

/// The registration record for the CUBIC algorithm
#[derive(Debug, Default)]
pub struct Cubic;

#[cfg(feature = "alloc")]
impl crate::recovery::congestion_controller::Algorithm for Cubic {
    fn id(&self) -> u32 {
        CUBIC_ALGORITHM_ID
    }

    fn new_controller(&self) -> alloc::boxed::Box<dyn CongestionController> {
        alloc::boxed::Box::new(CubicCongestionController::new())
    }
}
