use serde::{Deserialize, Serialize};
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseEvent {
    pub time_min: f64,
    pub kind: DoseKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseKind {
    Bolus { amount_mg: f64 },
    InfusionStart { rate_mg_per_min: f64 },
    InfusionStop,
}

/// Immutable dosing schedule for one run. Events are sorted by time at
/// construction; the integrator's right-hand side reads the active infusion
/// rate through `infusion_rate_at`.
#[derive(Debug, Clone)]
pub struct DoseSchedule {
    events: Vec<DoseEvent>,
}

impl DoseSchedule {
    pub fn new(mut events: Vec<DoseEvent>) -> SimResult<Self> {
        for event in &events {
            if !event.time_min.is_finite() || event.time_min < 0.0 {
                return Err(SimError::InvalidDosing(format!(
                    "Dose time must be finite and non-negative, got {}",
                    event.time_min
                )));
            }
            match event.kind {
                DoseKind::Bolus { amount_mg } => {
                    if !amount_mg.is_finite() || amount_mg <= 0.0 {
                        return Err(SimError::InvalidDosing(format!(
                            "Bolus amount must be positive, got {}",
                            amount_mg
                        )));
                    }
                }
                DoseKind::InfusionStart { rate_mg_per_min } => {
                    if !rate_mg_per_min.is_finite() || rate_mg_per_min <= 0.0 {
                        return Err(SimError::InvalidDosing(format!(
                            "Infusion rate must be positive, got {}",
                            rate_mg_per_min
                        )));
                    }
                }
                DoseKind::InfusionStop => {}
            }
        }

        events.sort_by(|a, b| a.time_min.partial_cmp(&b.time_min).unwrap());

        // A stop without a running infusion indicates a malformed schedule.
        let mut running = false;
        for event in &events {
            match event.kind {
                DoseKind::InfusionStart { .. } => running = true,
                DoseKind::InfusionStop => {
                    if !running {
                        return Err(SimError::InvalidDosing(format!(
                            "Infusion stop at t = {} min without an active infusion",
                            event.time_min
                        )));
                    }
                    running = false;
                }
                DoseKind::Bolus { .. } => {}
            }
        }

        Ok(Self { events })
    }

    pub fn events(&self) -> &[DoseEvent] {
        &self.events
    }

    /// Active continuous infusion rate at time t (mg/min).
    pub fn infusion_rate_at(&self, time_min: f64) -> f64 {
        let mut rate = 0.0;
        for event in &self.events {
            if event.time_min > time_min {
                break;
            }
            match event.kind {
                DoseKind::InfusionStart { rate_mg_per_min } => rate = rate_mg_per_min,
                DoseKind::InfusionStop => rate = 0.0,
                DoseKind::Bolus { .. } => {}
            }
        }
        rate
    }

    /// Total bolus mass (mg) scheduled exactly at time t.
    pub fn bolus_at(&self, time_min: f64) -> f64 {
        self.events
            .iter()
            .filter(|e| e.time_min == time_min)
            .map(|e| match e.kind {
                DoseKind::Bolus { amount_mg } => amount_mg,
                _ => 0.0,
            })
            .sum()
    }

    /// Distinct event times in (t_from, t_to], used to segment the
    /// integration timeline at dose discontinuities.
    pub fn event_times_between(&self, t_from: f64, t_to: f64) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .events
            .iter()
            .map(|e| e.time_min)
            .filter(|&t| t > t_from && t <= t_to)
            .collect();
        times.dedup();
        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_sorts_events() {
        let schedule = DoseSchedule::new(vec![
            DoseEvent {
                time_min: 30.0,
                kind: DoseKind::InfusionStop,
            },
            DoseEvent {
                time_min: 0.0,
                kind: DoseKind::Bolus { amount_mg: 12.0 },
            },
            DoseEvent {
                time_min: 5.0,
                kind: DoseKind::InfusionStart {
                    rate_mg_per_min: 1.2,
                },
            },
        ])
        .unwrap();

        let times: Vec<f64> = schedule.events().iter().map(|e| e.time_min).collect();
        assert_eq!(times, vec![0.0, 5.0, 30.0]);
    }

    #[test]
    fn test_infusion_rate_lookup() {
        let schedule = DoseSchedule::new(vec![
            DoseEvent {
                time_min: 5.0,
                kind: DoseKind::InfusionStart {
                    rate_mg_per_min: 1.2,
                },
            },
            DoseEvent {
                time_min: 30.0,
                kind: DoseKind::InfusionStop,
            },
        ])
        .unwrap();

        assert_eq!(schedule.infusion_rate_at(0.0), 0.0);
        assert_eq!(schedule.infusion_rate_at(5.0), 1.2);
        assert_eq!(schedule.infusion_rate_at(29.9), 1.2);
        assert_eq!(schedule.infusion_rate_at(30.0), 0.0);
    }

    #[test]
    fn test_bolus_lookup_sums_coincident_doses() {
        let schedule = DoseSchedule::new(vec![
            DoseEvent {
                time_min: 0.0,
                kind: DoseKind::Bolus { amount_mg: 12.0 },
            },
            DoseEvent {
                time_min: 0.0,
                kind: DoseKind::Bolus { amount_mg: 3.0 },
            },
        ])
        .unwrap();

        assert_eq!(schedule.bolus_at(0.0), 15.0);
        assert_eq!(schedule.bolus_at(1.0), 0.0);
    }

    #[test]
    fn test_negative_bolus_rejected() {
        let result = DoseSchedule::new(vec![DoseEvent {
            time_min: 0.0,
            kind: DoseKind::Bolus { amount_mg: -1.0 },
        }]);
        assert!(matches!(result, Err(SimError::InvalidDosing(_))));
    }

    #[test]
    fn test_orphan_infusion_stop_rejected() {
        let result = DoseSchedule::new(vec![DoseEvent {
            time_min: 10.0,
            kind: DoseKind::InfusionStop,
        }]);
        assert!(matches!(result, Err(SimError::InvalidDosing(_))));
    }

    #[test]
    fn test_event_times_between() {
        let schedule = DoseSchedule::new(vec![
            DoseEvent {
                time_min: 0.0,
                kind: DoseKind::Bolus { amount_mg: 12.0 },
            },
            DoseEvent {
                time_min: 5.0,
                kind: DoseKind::InfusionStart {
                    rate_mg_per_min: 1.2,
                },
            },
            DoseEvent {
                time_min: 30.0,
                kind: DoseKind::InfusionStop,
            },
        ])
        .unwrap();

        assert_eq!(schedule.event_times_between(0.0, 240.0), vec![5.0, 30.0]);
        assert_eq!(schedule.event_times_between(5.0, 10.0), Vec::<f64>::new());
    }
}
