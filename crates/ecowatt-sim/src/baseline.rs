//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Nominal operating points and daily load curve."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveTime;
use rand::Rng;

/// Nominal operating point of a device type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub voltage: f64,
    pub current: f64,
}

/// Nominal voltage and current for a device type, matched case-insensitively.
pub fn baseline_for(device_type: &str) -> Baseline {
    let (voltage, current) = match device_type.to_ascii_lowercase().as_str() {
        "motor" => (220.0, 15.0),
        "pump" => (380.0, 25.0),
        "compressor" => (440.0, 35.0),
        _ => (220.0, 10.0),
    };
    Baseline { voltage, current }
}

/// Load multiplier for a local time of day.
///
/// Night (before 06:00) runs at 0.6, evening (from 19:00) at 0.8. Daytime
/// draws a fresh value in `[1.0, 1.2)` on every call.
pub fn daily_pattern<R: Rng + ?Sized>(time_of_day: NaiveTime, rng: &mut R) -> f64 {
    let morning = NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN);
    let evening = NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN);
    if time_of_day < morning {
        0.6
    } else if time_of_day < evening {
        1.0 + rng.gen::<f64>() * 0.2
    } else {
        0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn known_types_are_case_insensitive() {
        assert_eq!(
            baseline_for("Motor"),
            Baseline {
                voltage: 220.0,
                current: 15.0
            }
        );
        assert_eq!(baseline_for("PUMP").voltage, 380.0);
        assert_eq!(baseline_for("compressor").current, 35.0);
        assert_eq!(
            baseline_for("heat-exchanger"),
            Baseline {
                voltage: 220.0,
                current: 10.0
            }
        );
    }

    #[test]
    fn pattern_boundaries() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(daily_pattern(at(0, 0), &mut rng), 0.6);
        assert_eq!(daily_pattern(at(5, 59), &mut rng), 0.6);
        assert_eq!(daily_pattern(at(19, 0), &mut rng), 0.8);
        assert_eq!(daily_pattern(at(23, 59), &mut rng), 0.8);
        for _ in 0..100 {
            let day = daily_pattern(at(6, 0), &mut rng);
            assert!((1.0..1.2).contains(&day), "daytime factor {day}");
        }
    }
}
