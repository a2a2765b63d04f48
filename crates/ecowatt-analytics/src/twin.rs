//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Short-term consumption forecasting from recent history."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use ecowatt_model::{PowerConsumption, Reading};

use crate::stats::summarize;

/// Forecasts a device's power from its recent readings.
pub trait PowerPredictor: Send + Sync {
    /// Label written into [`PowerConsumption::prediction_method`].
    fn method(&self) -> &'static str;

    /// Forecast from `history`, stamped `at`. An empty history yields the
    /// "No Data" sentinel.
    fn predict(&self, history: &[Reading], at: DateTime<Utc>) -> PowerConsumption;
}

/// Mean of the window as the prediction, population deviation as the interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAveragePredictor;

impl PowerPredictor for SimpleAveragePredictor {
    fn method(&self) -> &'static str {
        PowerConsumption::SIMPLE_AVERAGE
    }

    fn predict(&self, history: &[Reading], at: DateTime<Utc>) -> PowerConsumption {
        match summarize(history.iter().map(|reading| reading.power)) {
            Some(summary) => PowerConsumption {
                predicted_value: summary.mean,
                timestamp: at,
                confidence_interval: summary.std_dev,
                prediction_method: self.method().to_owned(),
            },
            None => PowerConsumption::no_data(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_no_data() {
        let now = Utc::now();
        let prediction = SimpleAveragePredictor.predict(&[], now);
        assert_eq!(prediction.prediction_method, "No Data");
        assert_eq!(prediction.predicted_value, 0.0);
        assert_eq!(prediction.confidence_interval, 0.0);
        assert_eq!(prediction.timestamp, now);
    }

    #[test]
    fn averages_history() {
        let now = Utc::now();
        let history: Vec<Reading> = [2000.0, 2200.0, 2400.0]
            .into_iter()
            .map(|power| Reading::power_only("dev", power, now))
            .collect();
        let prediction = SimpleAveragePredictor.predict(&history, now);
        assert_eq!(prediction.prediction_method, "SimpleAverage");
        assert!((prediction.predicted_value - 2200.0).abs() < 1e-9);
        assert!((prediction.confidence_interval - (80_000.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }
}
