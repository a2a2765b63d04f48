//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "What-if scenarios applied to the latest reading."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use ecowatt_model::{Reading, SimulationResult};

pub const VOLTAGE: &str = "voltage";
pub const CURRENT: &str = "current";
pub const TEMPERATURE: &str = "temperature";

/// Project the power of `latest` under percentage adjustments.
///
/// `voltage` and `current` scale their quantity by `1 + delta/100`; a
/// `temperature` rise of `delta` degrees derates current by `delta/500`.
/// Other keys are echoed back and described but do not affect the result.
pub fn simulate(latest: Option<&Reading>, parameters: BTreeMap<String, f64>) -> SimulationResult {
    let Some(reading) = latest else {
        return SimulationResult::no_data(parameters);
    };

    let original = reading.power;
    let mut voltage = reading.voltage;
    let mut current = reading.current;
    if let Some(delta) = parameters.get(VOLTAGE) {
        voltage *= 1.0 + delta / 100.0;
    }
    if let Some(delta) = parameters.get(CURRENT) {
        current *= 1.0 + delta / 100.0;
    }
    if let Some(delta) = parameters.get(TEMPERATURE) {
        current *= 1.0 - delta / 500.0;
    }

    let simulated = voltage * current;
    let impact = if original == 0.0 {
        0.0
    } else {
        (simulated - original) / original * 100.0
    };

    SimulationResult {
        original_power: original,
        simulated_power: simulated,
        scenario: describe(&parameters),
        parameters,
        impact,
    }
}

/// `"key: +v%"` entries in key order, or `"No change"` when empty.
pub fn describe(parameters: &BTreeMap<String, f64>) -> String {
    if parameters.is_empty() {
        return "No change".to_owned();
    }
    parameters
        .iter()
        .map(|(key, value)| {
            let sign = if *value >= 0.0 { "+" } else { "" };
            format!("{key}: {sign}{value}%")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn latest() -> Reading {
        Reading::derived("dev", 220.0, 15.0, 45.0, Utc::now())
    }

    fn params(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn no_history_is_no_data() {
        let parameters = params(&[("voltage", 5.0)]);
        let result = simulate(None, parameters.clone());
        assert_eq!(result.scenario, "No Data");
        assert_eq!(result.original_power, 0.0);
        assert_eq!(result.simulated_power, 0.0);
        assert_eq!(result.impact, 0.0);
        assert_eq!(result.parameters, parameters);
    }

    #[test]
    fn empty_parameters_change_nothing() {
        let reading = latest();
        let result = simulate(Some(&reading), BTreeMap::new());
        assert_eq!(result.scenario, "No change");
        assert_eq!(result.impact, 0.0);
        assert_eq!(result.simulated_power, result.original_power);
    }

    #[test]
    fn voltage_rise_scales_power() {
        let reading = latest();
        let result = simulate(Some(&reading), params(&[("voltage", 10.0)]));
        assert_eq!(result.original_power, 3300.0);
        assert_eq!(result.simulated_power, 1.1 * result.original_power);
        assert!((result.impact - 10.0).abs() < 1e-9);
        assert_eq!(result.scenario, "voltage: +10%");
    }

    #[test]
    fn temperature_derates_adjusted_current() {
        let reading = latest();
        let result = simulate(
            Some(&reading),
            params(&[("current", -20.0), ("temperature", 50.0)]),
        );
        // 15 A * 0.8 * 0.9 = 10.8 A
        assert!((result.simulated_power - 220.0 * 10.8).abs() < 1e-9);
        assert_eq!(result.scenario, "current: -20%, temperature: +50%");
    }

    #[test]
    fn unknown_keys_are_described_but_ignored() {
        let reading = latest();
        let result = simulate(Some(&reading), params(&[("humidity", 30.0), ("voltage", 0.0)]));
        assert_eq!(result.simulated_power, result.original_power);
        assert_eq!(result.scenario, "humidity: +30%, voltage: +0%");
        assert!(result.parameters.contains_key("humidity"));
    }

    #[test]
    fn zero_original_power_has_zero_impact() {
        let reading = Reading::derived("dev", 220.0, 0.0, 45.0, Utc::now());
        let result = simulate(Some(&reading), params(&[("current", 50.0)]));
        assert_eq!(result.original_power, 0.0);
        assert_eq!(result.impact, 0.0);
    }
}
