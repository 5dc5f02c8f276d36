// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Resource tracking around a measured code region.
//!
//! A tracker is started before inference and stopped after it, yielding the energy,
//! emissions and duration of the window. [`TrackingSession`] owns the pairing so that
//! every `start()` is matched by exactly one `stop()`, also when the region unwinds.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) mod powercap;

pub(crate) use powercap::*;

/// Snapshot returned when a measurement window is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsData {
    pub duration_seconds: f64,
    pub energy_consumed_kwh: f64,
    pub cpu_energy_kwh: f64,
    pub ram_energy_kwh: f64,
    pub emissions_kg: f64,
}

/// Measures energy use over a start/stop window.
pub trait ResourceTracker: Send {
    /// Opens a measurement window.
    fn start(&mut self);

    /// Closes the current window and returns its measurements.
    fn stop(&mut self) -> EmissionsData;
}

impl<T: ResourceTracker + ?Sized> ResourceTracker for Box<T> {
    fn start(&mut self) {
        (**self).start()
    }

    fn stop(&mut self) -> EmissionsData {
        (**self).stop()
    }
}

/// An open measurement window. Dropping it without [`TrackingSession::finish`] still stops
/// the tracker and discards the snapshot.
pub struct TrackingSession<'a, T: ResourceTracker + ?Sized> {
    tracker: &'a mut T,
    open: bool,
}

impl<'a, T: ResourceTracker + ?Sized> TrackingSession<'a, T> {
    pub fn start(tracker: &'a mut T) -> Self {
        tracker.start();
        TrackingSession {
            tracker,
            open: true,
        }
    }

    pub fn finish(mut self) -> EmissionsData {
        self.open = false;
        self.tracker.stop()
    }
}

impl<T: ResourceTracker + ?Sized> Drop for TrackingSession<'_, T> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            let discarded = self.tracker.stop();
            warn!(
                duration_seconds = discarded.duration_seconds,
                "Tracking session closed without a result, measurements discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::Sequence;

    mock! {
        pub Tracker {}
        impl ResourceTracker for Tracker {
            fn start(&mut self);
            fn stop(&mut self) -> EmissionsData;
        }
    }

    #[test]
    fn test_finish_stops_once() {
        let mut seq = Sequence::new();
        let mut tracker = MockTracker::new();
        tracker.expect_start().times(1).in_sequence(&mut seq).return_const(());
        tracker
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| EmissionsData {
                duration_seconds: 1.5,
                ..Default::default()
            });

        let session = TrackingSession::start(&mut tracker);
        let data = session.finish();

        assert_eq!(data.duration_seconds, 1.5);
    }

    #[test]
    fn test_drop_stops_once() {
        let mut tracker = MockTracker::new();
        tracker.expect_start().times(1).return_const(());
        tracker
            .expect_stop()
            .times(1)
            .returning(EmissionsData::default);

        {
            let _session = TrackingSession::start(&mut tracker);
        }
        tracker.checkpoint();
    }

    #[test]
    fn test_unwind_stops_once() {
        let mut tracker = MockTracker::new();
        tracker.expect_start().times(1).return_const(());
        tracker
            .expect_stop()
            .times(1)
            .returning(EmissionsData::default);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _session = TrackingSession::start(&mut tracker);
            panic!("inference blew up");
        }));

        assert!(outcome.is_err());
        tracker.checkpoint();
    }
}
