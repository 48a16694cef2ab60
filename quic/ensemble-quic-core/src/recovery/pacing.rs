// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::recovery::{DEFAULT_MSS, K_GRANULARITY, MAX_BURST_PACKETS, MICROSEC_PER_SEC};
use core::time::Duration;

struct Fraction(u32, u32);

//= https://www.rfc-editor.org/rfc/rfc9002.txt#7.7
//# Using a value for "N" that is small, but at least 1 (for example, 1.25) ensures
//# that variations in RTT do not result in underutilization of the congestion window.
const N: Fraction = Fraction(5, 4); // 5/4 = 1.25

// The window grows rapidly in slow start, so a higher multiplier is used to
// keep pacing from underutilizing it, as Linux does:
// https://github.com/torvalds/linux/blob/fc02cb2b37fe2cbf1d3334b9f0f0eab9431766c4/net/ipv4/tcp_input.c#L905-L906
const SLOW_START_N: Fraction = Fraction(2, 1); // 2/1 = 2.00

/// Pacing data derived from the congestion window.
///
/// The transport recomputes this after every congestion controller
/// notification, averaging the committed window over the minimum round trip
/// time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pacing {
    bytes_per_second: u64,
}

impl Pacing {
    /// Rederives the pacing rate from a newly committed congestion window
    //= https://www.rfc-editor.org/rfc/rfc9002.txt#7.7
    //# A perfectly paced sender spreads packets exactly evenly over time.
    //# For a window-based congestion controller, such as the one in this
    //# document, that rate can be computed by averaging the congestion
    //# window over the RTT. Expressed as a rate in units of bytes per time,
    //# where congestion_window is in bytes:
    //#
    //# rate = N * congestion_window / smoothed_rtt
    #[inline]
    pub fn on_window_update(&mut self, cwnd: u64, rtt_min: Duration, slow_start: bool) {
        let n = if slow_start { SLOW_START_N } else { N };
        let rtt = rtt_min.max(K_GRANULARITY);

        self.bytes_per_second = (cwnd as u128 * n.0 as u128 * MICROSEC_PER_SEC as u128
            / (n.1 as u128 * rtt.as_micros())) as u64;
    }

    /// The current pacing rate
    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Returns the time one maximum-sized burst takes at the current rate.
    ///
    /// Packets released within this interval of the previous burst must be
    /// held back by the sender.
    #[inline]
    pub fn burst_interval(&self) -> Duration {
        //= https://www.rfc-editor.org/rfc/rfc9002.txt#7.7
        //# Senders SHOULD limit bursts to the initial congestion window
        let quantum = (MAX_BURST_PACKETS * DEFAULT_MSS as u32) as u64;
        let rate = self.bytes_per_second.max(1);

        Duration::from_micros(quantum * MICROSEC_PER_SEC / rate)
    }
}
