use anyhow::{bail, Context};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::f64::consts::PI;
use windowcore::patient_interface::RawRecord;
use windowcore::prelude::{MS_PER_DAY, MS_PER_HOUR};

const MS_PER_MINUTE: i64 = 60 * 1000;

/// Meal times as minutes after midnight UTC.
const MEAL_MINUTES: [i64; 3] = [7 * 60 + 30, 12 * 60 + 30, 19 * 60];

const NOTES: [&str; 5] = [
    "Changed infusion site",
    "Felt low after running",
    "Pizza night, extended bolus",
    "Sensor warm-up",
    "Forgot lunch bolus",
];

/// Configuration for generating a synthetic patient history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientProfile {
    pub patient: String,
    pub days: u32,
    /// Timestamp of the newest reading, epoch milliseconds.
    pub end_ms: i64,
    pub seed: u64,
    pub cgm_interval_minutes: u32,
    /// Chance that a given day carries a note.
    pub message_rate: f64,
}

impl Default for PatientProfile {
    fn default() -> Self {
        Self {
            patient: "synthetic-001".to_string(),
            days: 60,
            // 2024-03-13T15:30:00Z
            end_ms: 1_710_343_800_000,
            seed: 0,
            cgm_interval_minutes: 5,
            message_rate: 0.3,
        }
    }
}

/// Generated device records and clinical notes, each sorted by time.
#[derive(Debug, Clone, Default)]
pub struct SyntheticHistory {
    pub records: Vec<RawRecord>,
    pub messages: Vec<RawRecord>,
}

impl SyntheticHistory {
    pub fn len(&self) -> usize {
        self.records.len() + self.messages.len()
    }
}

fn glucose_at(time: i64, rng: &mut StdRng) -> f64 {
    let day_fraction = time.rem_euclid(MS_PER_DAY) as f64 / MS_PER_DAY as f64;
    // dawn rise peaking mid-morning, trough overnight
    let diurnal = (2.0 * PI * (day_fraction - 0.1)).sin();
    let jitter = rng.gen_range(-0.4..0.4);
    ((7.0 + 2.5 * diurnal + jitter) * 10.0).round() / 10.0
}

pub fn build_history(profile: &PatientProfile) -> anyhow::Result<SyntheticHistory> {
    if profile.days == 0 {
        bail!("patient profile must span at least one day");
    }
    if profile.cgm_interval_minutes == 0 {
        bail!("cgm interval must be positive");
    }
    let span = i64::from(profile.days)
        .checked_mul(MS_PER_DAY)
        .context("overflow computing history span")?;
    let start = profile
        .end_ms
        .checked_sub(span)
        .context("history starts before the representable range")?;
    let step = i64::from(profile.cgm_interval_minutes) * MS_PER_MINUTE;
    let message_rate = profile.message_rate.clamp(0.0, 1.0);

    let mut rng = StdRng::seed_from_u64(profile.seed);
    let mut records = Vec::new();
    let mut messages = Vec::new();

    // newest reading lands exactly on end_ms
    let mut time = profile.end_ms - ((profile.end_ms - start) / step) * step;
    while time <= profile.end_ms {
        let value = glucose_at(time, &mut rng);
        records.push(RawRecord::new(
            format!("cbg-{}", time),
            "cbg",
            time,
            json!({ "value": value }),
        ));
        time += step;
    }

    let first_day = start.div_euclid(MS_PER_DAY) * MS_PER_DAY;
    let mut day = first_day;
    while day <= profile.end_ms {
        if day >= start {
            records.push(RawRecord::new(
                format!("basal-{}", day),
                "basal",
                day,
                json!({ "value": 0.8, "duration": MS_PER_DAY }),
            ));
        }
        for minutes in MEAL_MINUTES {
            let at = day + minutes * MS_PER_MINUTE;
            if at < start || at > profile.end_ms {
                continue;
            }
            let carbs: f64 = rng.gen_range(30..90) as f64;
            records.push(RawRecord::new(
                format!("meal-{}", at),
                "food",
                at,
                json!({ "value": carbs }),
            ));
            records.push(RawRecord::new(
                format!("bolus-{}", at),
                "bolus",
                at + 5 * MS_PER_MINUTE,
                json!({ "value": carbs / 10.0 }),
            ));
        }
        if rng.gen_bool(message_rate) {
            let at = day + rng.gen_range(8..22) * MS_PER_HOUR;
            if at >= start && at <= profile.end_ms {
                let text = NOTES[rng.gen_range(0..NOTES.len())];
                messages.push(RawRecord::new(
                    format!("message-{}", at),
                    "message",
                    at,
                    json!({ "text": text }),
                ));
            }
        }
        day += MS_PER_DAY;
    }

    records.sort_by_key(|record| record.time);
    messages.sort_by_key(|record| record.time);
    Ok(SyntheticHistory { records, messages })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_profile() -> PatientProfile {
        PatientProfile {
            days: 3,
            seed: 7,
            message_rate: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn history_spans_requested_days_at_cgm_cadence() {
        let profile = small_profile();
        let history = build_history(&profile).unwrap();
        let cbg: Vec<_> = history
            .records
            .iter()
            .filter(|record| record.kind == "cbg")
            .collect();
        assert_eq!(cbg.len(), 3 * 24 * 12 + 1);
        assert_eq!(cbg.last().unwrap().time, profile.end_ms);
        assert!(cbg[0].time >= profile.end_ms - 3 * MS_PER_DAY);
        assert!(history.records.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn every_meal_has_a_bolus() {
        let history = build_history(&small_profile()).unwrap();
        let meals = history.records.iter().filter(|r| r.kind == "food").count();
        let boluses = history.records.iter().filter(|r| r.kind == "bolus").count();
        assert!(meals > 0);
        assert_eq!(meals, boluses);
    }

    #[test]
    fn same_seed_gives_same_history() {
        let a = build_history(&small_profile()).unwrap();
        let b = build_history(&small_profile()).unwrap();
        assert_eq!(a.records, b.records);
        assert_eq!(a.messages, b.messages);
        assert!(!a.messages.is_empty());
    }

    #[test]
    fn empty_profile_is_rejected() {
        let profile = PatientProfile {
            days: 0,
            ..Default::default()
        };
        assert!(build_history(&profile).is_err());
    }
}
