// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub use congestion_controller::{CongestionController, Notification, Publisher};
pub use cubic::CubicCongestionController;
pub use pacing::Pacing;

pub mod congestion_controller;
pub mod cubic;
pub mod pacing;

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1 millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

/// The maximum segment size assumed by the congestion controller, in bytes.
///
/// All window arithmetic is performed in bytes; this constant only scales the
/// additive terms of the window update functions.
pub const DEFAULT_MSS: u16 = 1460;

pub const MICROSEC_PER_SEC: u64 = 1_000_000;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# Senders SHOULD limit bursts to the initial congestion window; see
//# Section 7.2.
pub const MAX_BURST_PACKETS: u32 = 10;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion
//# window of ten times the maximum datagram size (max_datagram_size),
//# while limiting the window to the larger of 14,720 bytes or twice the
//# maximum datagram size.
pub const fn initial_window(max_datagram_size: u16) -> u64 {
    const INITIAL_WINDOW_LIMIT: u64 = 14_720;
    let max_datagram_size = max_datagram_size as u64;

    let upper = if INITIAL_WINDOW_LIMIT > 2 * max_datagram_size {
        INITIAL_WINDOW_LIMIT
    } else {
        2 * max_datagram_size
    };
    if 10 * max_datagram_size < upper {
        10 * max_datagram_size
    } else {
        upper
    }
}

/// The congestion window installed when a congestion controller is attached
/// to a path.
pub const INITIAL_WINDOW: u64 = initial_window(DEFAULT_MSS);

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The minimum congestion window is the smallest value the congestion
//# window can attain in response to loss, an increase in the peer-
//# reported ECN-CE count, or persistent congestion.  The RECOMMENDED
//# value is 2 * max_datagram_size.
pub const MINIMUM_WINDOW: u64 = 2 * DEFAULT_MSS as u64;
