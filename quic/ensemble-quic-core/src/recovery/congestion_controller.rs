// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::{fmt::Debug, time::Duration};

/// A path event delivered to the congestion controller.
///
/// The payload carries everything the transport knows about the event;
/// individual algorithms are free to ignore fields they have no use for.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// One or more packets were newly acknowledged
    Acknowledgement { bytes_acked: u64 },
    /// A packet was declared lost through repeated acknowledgements
    Repeat { lost_packet_number: u64 },
    /// The retransmission timer fired
    Timeout,
    /// A packet previously declared lost was acknowledged after all
    SpuriousRepeat,
    /// A new round trip time sample was taken
    RttMeasurement { rtt: Duration },
}

/// The subset of a path a congestion controller may observe and mutate.
///
/// The only field a controller writes is `cwnd`. `total_stream_count` is
/// re-read from the owning connection on every event, so two consecutive
/// notifications may see different values.
#[derive(Debug)]
pub struct PathView<'a> {
    /// The congestion window, in bytes
    pub cwnd: &'a mut u64,
    /// Bytes sent but neither acknowledged nor declared lost, as of the
    /// previous event
    pub bytes_in_transit: u64,
    /// The minimum round trip time observed on the path
    pub rtt_min: Duration,
    /// The number of streams currently multiplexed onto the connection
    pub total_stream_count: u64,
}

/// Receives telemetry from the congestion controller and the pacing hook.
///
/// Implementations must never block: events are emitted from the datapath.
pub trait Publisher {
    /// Invoked when the congestion controller has exited the Slow Start phase
    fn on_slow_start_exited(&mut self, congestion_window: u64);
    /// Invoked when a loss signal has reduced the congestion window
    fn on_congestion_event(&mut self, congestion_window: u64);
    /// Invoked when an acknowledgement has committed a new congestion window
    fn on_window_updated(&mut self, congestion_window: u64);
    /// Invoked when the pacing rate has been recomputed
    fn on_pacing_rate_updated(&mut self, bytes_per_second: u64);
}

/// A `Publisher` that discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn on_slow_start_exited(&mut self, _congestion_window: u64) {}
    fn on_congestion_event(&mut self, _congestion_window: u64) {}
    fn on_window_updated(&mut self, _congestion_window: u64) {}
    fn on_pacing_rate_updated(&mut self, _bytes_per_second: u64) {}
}

/// An algorithm for controlling congestion on a single path.
///
/// NOTE: This trait is considered unstable and can only be implemented by
///       including the `unstable-congestion-controller` feature.
pub trait CongestionController: 'static + Debug + Send + private::Sealed {
    /// Processes a single path event, possibly committing a new congestion
    /// window through the view.
    ///
    /// Events for one path are never delivered concurrently; each invocation
    /// observes the window exactly as the previous one left it.
    fn on_notification(
        &mut self,
        path: &mut PathView,
        notification: Notification,
        now: Timestamp,
        publisher: &mut dyn Publisher,
    );

    /// Returns `true` while the controller is in its initial slow start phase
    fn is_slow_start(&self) -> bool;
}

#[cfg(feature = "alloc")]
pub use registry::*;

#[cfg(feature = "alloc")]
mod registry {
    use super::CongestionController;
    use alloc::boxed::Box;
    use core::fmt::Debug;

    /// A registerable congestion control algorithm.
    ///
    /// This is the typed equivalent of a {id, init, notify, delete} record:
    /// `new_controller` is init, the returned instance handles notify, and
    /// dropping the instance is delete.
    pub trait Algorithm: 'static + Debug + Send + Sync {
        /// The 32-bit identifier the transport uses to select this algorithm
        fn id(&self) -> u32;

        /// Creates a fresh controller instance for one path
        fn new_controller(&self) -> Box<dyn CongestionController>;
    }

    static ALGORITHMS: &[&'static dyn Algorithm] = &[&crate::recovery::cubic::Cubic];

    /// Looks an algorithm up by its registered identifier
    pub fn algorithm(id: u32) -> Option<&'static dyn Algorithm> {
        ALGORITHMS.iter().copied().find(|alg| alg.id() == id)
    }
}

// Prevent implementation of the `CongestionController` trait if the
// `unstable-congestion-controller` feature is not turned on.
mod private {
    use cfg_if::cfg_if;

    pub trait Sealed {}

    cfg_if!(
        if #[cfg(any(test, feature = "unstable-congestion-controller", feature = "testing"))] {
            // If `unstable-congestion-controller` is enabled, implement Sealed for any type that
            // otherwise implements `CongestionController`
            impl<T: crate::recovery::CongestionController> Sealed for T {}
        } else {
            // Otherwise only allow the included CUBIC congestion controller
            impl Sealed for crate::recovery::CubicCongestionController {}
        }
    );
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A `Publisher` that records every event it receives
    #[derive(Clone, Debug, Default)]
    pub struct Publisher {
        pub slow_start_exits: Vec<u64>,
        pub congestion_events: Vec<u64>,
        pub window_updates: Vec<u64>,
        pub pacing_rates: Vec<u64>,
    }

    impl super::Publisher for Publisher {
        fn on_slow_start_exited(&mut self, congestion_window: u64) {
            self.slow_start_exits.push(congestion_window);
        }

        fn on_congestion_event(&mut self, congestion_window: u64) {
            self.congestion_events.push(congestion_window);
        }

        fn on_window_updated(&mut self, congestion_window: u64) {
            self.window_updates.push(congestion_window);
        }

        fn on_pacing_rate_updated(&mut self, bytes_per_second: u64) {
            self.pacing_rates.push(bytes_per_second);
        }
    }

    /// A controller that counts the notifications it receives
    #[derive(Debug, Default)]
    pub struct CongestionController {
        pub notifications: u32,
    }

    impl super::CongestionController for CongestionController {
        fn on_notification(
            &mut self,
            _path: &mut PathView,
            _notification: Notification,
            _now: Timestamp,
            _publisher: &mut dyn super::Publisher,
        ) {
            self.notifications += 1;
        }

        fn is_slow_start(&self) -> bool {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::cubic;

    #[test]
    fn registry_resolves_cubic_by_id() {
        let alg = algorithm(cubic::CUBIC_ALGORITHM_ID).expect("cubic is registered");
        assert_eq!(alg.id(), 0x0f0f_0f0f);

        let controller = alg.new_controller();
        assert!(controller.is_slow_start());
    }

    #[test]
    fn registry_rejects_unknown_ids() {
        assert!(algorithm(0).is_none());
        assert!(algorithm(0xdead_beef).is_none());
    }
}
