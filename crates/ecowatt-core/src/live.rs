//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Rolling per-device windows for live Z-score detection."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use ecowatt_analytics::ZScoreDetector;
use ecowatt_common::DetectionConfig;
use ecowatt_model::{Anomaly, Reading};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Keeps the newest readings of every device and checks each arrival against them.
#[derive(Debug)]
pub struct LiveDetector {
    detector: ZScoreDetector,
    window_size: usize,
    min_samples: usize,
    windows: Mutex<HashMap<String, VecDeque<Reading>>>,
}

impl LiveDetector {
    pub fn new(window_size: usize, min_samples: usize) -> Self {
        Self {
            detector: ZScoreDetector::default(),
            window_size: window_size.max(1),
            min_samples,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.window_size, config.min_samples)
    }

    /// Readings currently held for `device_id`.
    pub fn window_len(&self, device_id: &str) -> usize {
        self.windows.lock().get(device_id).map_or(0, VecDeque::len)
    }

    /// Add `reading` to its device window and return a Z-SCORE anomaly when the
    /// reading itself is an outlier of that window.
    ///
    /// Nothing is evaluated until the window holds `min_samples` readings.
    pub fn observe(&self, reading: &Reading, detected_at: DateTime<Utc>) -> Option<Anomaly> {
        let flagged = {
            let mut windows = self.windows.lock();
            let window = windows.entry(reading.device_id.clone()).or_default();
            if window.len() == self.window_size {
                window.pop_front();
            }
            window.push_back(reading.clone());
            if window.len() < self.min_samples {
                return None;
            }
            let newest = window.len() - 1;
            self.detector
                .outlier_indices(window.make_contiguous())
                .contains(&newest)
        };
        if !flagged {
            return None;
        }

        match reading.device_uuid() {
            Ok(device_id) => {
                debug!(%device_id, power = reading.power, "live reading flagged");
                Some(Anomaly::z_score(device_id, reading.power, detected_at))
            }
            Err(err) => {
                warn!(device_id = %reading.device_id, error = %err, "flagged reading has an invalid device id; dropping");
                None
            }
        }
    }
}
