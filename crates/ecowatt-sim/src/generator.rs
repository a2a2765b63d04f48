//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Seeded synthetic telemetry generator with fault injection."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use ecowatt_common::time::local_time_of_day;
use ecowatt_model::{AnomalyKind, Device, Reading};
use rand::prelude::*;
use rand_distr::Normal;
use tracing::trace;

use crate::baseline::{baseline_for, daily_pattern};

/// Tunables for [`TelemetryGenerator`].
#[derive(Debug, Clone, Copy)]
pub struct GeneratorSettings {
    pub anomaly_probability: f64,
    pub utc_offset: FixedOffset,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            anomaly_probability: 0.05,
            utc_offset: Utc.fix(),
        }
    }
}

/// A synthetic reading plus the fault applied to it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReading {
    pub reading: Reading,
    pub injected: Option<AnomalyKind>,
}

/// Produces one noisy reading per device and call.
///
/// All randomness comes from the owned `StdRng`, so two generators built from
/// the same seed and fed the same devices and timestamps agree exactly.
#[derive(Debug)]
pub struct TelemetryGenerator {
    settings: GeneratorSettings,
    rng: StdRng,
    voltage_noise: Normal<f64>,
    current_noise: Normal<f64>,
    temperature: Normal<f64>,
}

impl TelemetryGenerator {
    pub fn new(seed: u64, settings: GeneratorSettings) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&settings.anomaly_probability),
            "anomaly probability must lie within [0, 1], got {}",
            settings.anomaly_probability
        );
        Ok(Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
            voltage_noise: Normal::new(0.0, 0.05).context("voltage noise distribution")?,
            current_noise: Normal::new(0.0, 0.10).context("current noise distribution")?,
            temperature: Normal::new(45.0, 5.0).context("temperature distribution")?,
        })
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Generate a reading for `device` stamped `at`.
    pub fn generate(&mut self, device: &Device, at: DateTime<Utc>) -> GeneratedReading {
        let base = baseline_for(&device.device_type);
        let time_of_day = local_time_of_day(at, self.settings.utc_offset);

        let mut voltage = base.voltage * (1.0 + self.voltage_noise.sample(&mut self.rng));
        let pattern = daily_pattern(time_of_day, &mut self.rng);
        let mut current = base.current * pattern * (1.0 + self.current_noise.sample(&mut self.rng));
        let mut temperature = self.temperature.sample(&mut self.rng).max(20.0);

        let injected = if self.rng.gen_bool(self.settings.anomaly_probability) {
            let kind = AnomalyKind::ALL[self.rng.gen_range(0..AnomalyKind::ALL.len())];
            (voltage, current, temperature) = inject(kind, voltage, current, temperature);
            Some(kind)
        } else {
            None
        };

        let reading = Reading::derived(device.id.to_string(), voltage, current, temperature, at);
        trace!(device_id = %device.id, power = reading.power, injected = ?injected, "reading generated");
        GeneratedReading { reading, injected }
    }
}

/// Apply a fault to raw electrical values.
pub(crate) fn inject(kind: AnomalyKind, voltage: f64, current: f64, temperature: f64) -> (f64, f64, f64) {
    match kind {
        AnomalyKind::Spike => (voltage, current * 1.5, temperature),
        AnomalyKind::Sag => (voltage * 0.8, current, temperature),
        AnomalyKind::Overheat => (voltage, current, temperature + 20.0),
        AnomalyKind::Cutoff => (voltage, 0.0, temperature),
    }
}
