// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-path congestion state owned by the transport.
//!
//! The transport maintains every field of a [`Path`]; an attached congestion
//! controller only ever sees the narrow view brokered by [`Path::notify`] and
//! only ever writes the congestion window.

use crate::{
    recovery::{
        congestion_controller::{Algorithm, CongestionController, Notification, PathView, Publisher},
        Pacing, INITIAL_WINDOW,
    },
    time::Timestamp,
};
use alloc::{boxed::Box, sync::Arc};
use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.
const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// Shared handle to a connection's live stream counter.
///
/// The connection updates the count as streams open and close; the path
/// re-reads it on every congestion event, so the controller always scales to
/// the current multiplicity.
#[derive(Clone, Debug, Default)]
pub struct StreamCount(Arc<AtomicU64>);

impl StreamCount {
    pub fn new(count: u64) -> Self {
        Self(Arc::new(AtomicU64::new(count)))
    }

    pub fn set(&self, count: u64) {
        self.0.store(count, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One network path of a connection.
#[derive(Debug)]
pub struct Path {
    congestion_window: u64,
    bytes_in_transit: u64,
    rtt_min: Duration,
    total_stream_count: StreamCount,
    pacing: Pacing,
    /// The attached congestion controller, if any. While empty, every
    /// notification is a no-op and the window keeps its last value.
    congestion_alg_state: Option<Box<dyn CongestionController>>,
}

impl Default for Path {
    fn default() -> Self {
        Self::new(StreamCount::default())
    }
}

impl Path {
    /// Creates a path sharing the given stream counter with its connection
    pub fn new(total_stream_count: StreamCount) -> Self {
        Self {
            congestion_window: INITIAL_WINDOW,
            bytes_in_transit: 0,
            rtt_min: DEFAULT_INITIAL_RTT,
            total_stream_count,
            pacing: Pacing::default(),
            congestion_alg_state: None,
        }
    }

    /// Attaches a fresh controller instance for `algorithm` to this path and
    /// resets the congestion window to the initial window.
    ///
    /// Replaces any previously attached controller.
    pub fn select_congestion_algorithm(&mut self, algorithm: &dyn Algorithm) {
        self.congestion_alg_state = Some(algorithm.new_controller());
        self.congestion_window = INITIAL_WINDOW;
    }

    /// Detaches the controller. Safe to call repeatedly.
    pub fn unset_congestion_algorithm(&mut self) {
        self.congestion_alg_state = None;
    }

    /// Returns `true` while a congestion controller is attached
    pub fn has_congestion_algorithm(&self) -> bool {
        self.congestion_alg_state.is_some()
    }

    /// Delivers a path event to the attached controller and rederives the
    /// pacing data from the committed window.
    pub fn notify(
        &mut self,
        notification: Notification,
        now: Timestamp,
        publisher: &mut dyn Publisher,
    ) {
        let Some(controller) = self.congestion_alg_state.as_deref_mut() else {
            return;
        };

        let mut view = PathView {
            cwnd: &mut self.congestion_window,
            bytes_in_transit: self.bytes_in_transit,
            rtt_min: self.rtt_min,
            total_stream_count: self.total_stream_count.get(),
        };
        controller.on_notification(&mut view, notification, now, publisher);

        self.pacing
            .on_window_update(self.congestion_window, self.rtt_min, controller.is_slow_start());
        publisher.on_pacing_rate_updated(self.pacing.bytes_per_second());
    }

    /// The current congestion window, in bytes
    pub fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    /// The current pacing data
    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Updated by the transport's loss recovery whenever packets are sent,
    /// acknowledged, or declared lost
    pub fn set_bytes_in_transit(&mut self, bytes_in_transit: u64) {
        self.bytes_in_transit = bytes_in_transit;
    }

    /// Updated by the transport's RTT estimator
    pub fn set_rtt_min(&mut self, rtt_min: Duration) {
        self.rtt_min = rtt_min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        recovery::{congestion_controller, cubic, MINIMUM_WINDOW},
        time::{Clock as _, NoopClock},
    };

    fn cubic_path() -> Path {
        let mut path = Path::default();
        let algorithm =
            congestion_controller::algorithm(cubic::CUBIC_ALGORITHM_ID).expect("registered");
        path.select_congestion_algorithm(algorithm);
        path
    }

    #[test]
    fn notify_is_a_noop_without_a_controller() {
        let mut path = Path::default();
        let mut publisher = congestion_controller::testing::Publisher::default();
        let now = NoopClock.get_time();

        path.notify(
            Notification::Acknowledgement { bytes_acked: 1500 },
            now,
            &mut publisher,
        );

        assert_eq!(path.congestion_window(), INITIAL_WINDOW);
        assert!(publisher.window_updates.is_empty());
        assert!(publisher.pacing_rates.is_empty());
    }

    #[test]
    fn unset_is_idempotent() {
        let mut path = cubic_path();
        assert!(path.has_congestion_algorithm());

        path.unset_congestion_algorithm();
        assert!(!path.has_congestion_algorithm());

        // A second unset and subsequent notifies are harmless
        path.unset_congestion_algorithm();
        let before = path.congestion_window();
        path.notify(
            Notification::Timeout,
            NoopClock.get_time(),
            &mut congestion_controller::NoopPublisher,
        );
        assert_eq!(path.congestion_window(), before);
    }

    #[test]
    fn select_resets_the_window() {
        let mut path = cubic_path();
        let now = NoopClock.get_time();
        path.notify(
            Notification::Acknowledgement { bytes_acked: 3000 },
            now,
            &mut congestion_controller::NoopPublisher,
        );
        assert_eq!(path.congestion_window(), INITIAL_WINDOW + 3000);

        let algorithm =
            congestion_controller::algorithm(cubic::CUBIC_ALGORITHM_ID).expect("registered");
        path.select_congestion_algorithm(algorithm);
        assert_eq!(path.congestion_window(), INITIAL_WINDOW);
    }

    #[test]
    fn notify_recomputes_pacing() {
        let mut path = cubic_path();
        let mut publisher = congestion_controller::testing::Publisher::default();
        path.set_rtt_min(Duration::from_millis(100));

        path.notify(
            Notification::Acknowledgement { bytes_acked: 1460 },
            NoopClock.get_time(),
            &mut publisher,
        );

        // Slow start: rate = 2 * cwnd / rtt_min
        let cwnd = path.congestion_window();
        assert_eq!(publisher.pacing_rates, vec![cwnd * 2 * 10]);
        assert_eq!(path.pacing().bytes_per_second(), cwnd * 2 * 10);
    }

    #[test]
    fn stream_count_is_reread_on_every_event() {
        let streams = StreamCount::new(1);
        let mut path = Path::new(streams.clone());
        let algorithm =
            congestion_controller::algorithm(cubic::CUBIC_ALGORITHM_ID).expect("registered");
        path.select_congestion_algorithm(algorithm);
        let now = NoopClock.get_time();
        let mut publisher = congestion_controller::NoopPublisher;

        // Grow a bit, then lose with a single stream: full BETA backoff
        path.notify(
            Notification::Acknowledgement {
                bytes_acked: 100_000 - INITIAL_WINDOW,
            },
            now,
            &mut publisher,
        );
        path.notify(
            Notification::Repeat {
                lost_packet_number: 1,
            },
            now,
            &mut publisher,
        );
        assert_eq!(path.congestion_window(), 70_000);

        // The connection opens more streams; the next loss backs off like an
        // ensemble of four flows
        streams.set(4);
        path.notify(
            Notification::Acknowledgement {
                bytes_acked: 2 * (100_000 - 70_000),
            },
            now,
            &mut publisher,
        );
        let cwnd = path.congestion_window();
        path.notify(Notification::Timeout, now, &mut publisher);
        let expected = ((4.0f32 - 1.0 + 0.7) / 4.0 * cwnd as f32) as u64;
        assert_eq!(path.congestion_window(), expected.max(MINIMUM_WINDOW));
    }
}
