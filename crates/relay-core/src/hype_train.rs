use crate::events::PayloadError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const COMPLETED_REASON: &str = "COMPLETED";
pub const FINAL_LEVEL: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HypeTrainLevel {
    pub value: u32,
    #[serde(default)]
    pub goal: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HypeTrainProgress {
    pub level: HypeTrainLevel,
    pub value: u64,
    pub goal: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HypeTrainEvent {
    Start(HypeTrainProgress),
    Progression(HypeTrainProgress),
    LevelUp(HypeTrainProgress),
    End { reason: String },
    /// Conductor updates, cooldown expirations and anything newer.
    Other(String),
}

#[derive(Deserialize)]
struct RawHypeTrain {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl HypeTrainEvent {
    pub fn from_json(raw: &str) -> Result<Self, PayloadError> {
        let raw: RawHypeTrain =
            serde_json::from_str(raw).map_err(|err| PayloadError::Decode(err.to_string()))?;
        match raw.kind.as_str() {
            "hype-train-start" => Ok(Self::Start(progress_of(&raw.data)?)),
            "hype-train-progression" => Ok(Self::Progression(progress_of(&raw.data)?)),
            "hype-train-level-up" => Ok(Self::LevelUp(progress_of(&raw.data)?)),
            "hype-train-end" => {
                let reason = raw
                    .data
                    .get("ending_reason")
                    .and_then(Value::as_str)
                    .ok_or(PayloadError::Missing("data.ending_reason"))?;
                Ok(Self::End {
                    reason: reason.to_string(),
                })
            }
            _ => Ok(Self::Other(raw.kind)),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Start(_) => "start",
            Self::Progression(_) => "progression",
            Self::LevelUp(_) => "level_up",
            Self::End { .. } => "end",
            Self::Other(kind) => kind.as_str(),
        }
    }
}

fn progress_of(data: &Value) -> Result<HypeTrainProgress, PayloadError> {
    let progress = data
        .get("progress")
        .ok_or(PayloadError::Missing("data.progress"))?;
    HypeTrainProgress::deserialize(progress).map_err(|err| PayloadError::Decode(err.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MeterError {
    #[error("hype train goal must be positive")]
    ZeroGoal,
}

/// Last known hype-train progress. Owned by whoever dispatches hype-train
/// events and only changed through [`aggregate`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ProgressMeter {
    pub level: u32,
    pub value: u64,
    pub goal: u64,
    pub total: u64,
    pub percent: u64,
}

impl Default for ProgressMeter {
    fn default() -> Self {
        Self {
            level: 1,
            value: 0,
            goal: 2000,
            total: 0,
            percent: 0,
        }
    }
}

impl ProgressMeter {
    /// Overwrites every field from `progress`. Leaves the meter untouched when
    /// the goal is zero.
    pub fn apply(&mut self, progress: &HypeTrainProgress) -> Result<(), MeterError> {
        let percent = percent_of(progress.value, progress.goal)?;
        self.level = progress.level.value;
        self.value = progress.value;
        self.goal = progress.goal;
        self.total = progress.total;
        self.percent = percent;
        Ok(())
    }

    pub fn is_final_level_complete(&self) -> bool {
        self.level >= FINAL_LEVEL && self.percent >= 100
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub fn percent_of(value: u64, goal: u64) -> Result<u64, MeterError> {
    if goal == 0 {
        return Err(MeterError::ZeroGoal);
    }
    Ok(value.saturating_mul(100) / goal)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HypeTrainOutcome {
    Started(ProgressMeter),
    Progressed(ProgressMeter),
    LeveledUp {
        completed_level: u32,
        meter: ProgressMeter,
    },
    Ended {
        reason: String,
        completed: bool,
        last: ProgressMeter,
    },
    Ignored(String),
}

/// Folds one hype-train event into `meter`.
///
/// `start` clears the meter before applying its progress and `end` judges
/// completion from the last known values, then clears the meter so a later
/// train never inherits stale progress.
pub fn aggregate(
    meter: &mut ProgressMeter,
    event: &HypeTrainEvent,
) -> Result<HypeTrainOutcome, MeterError> {
    match event {
        HypeTrainEvent::Start(progress) => {
            let mut next = ProgressMeter::default();
            next.apply(progress)?;
            *meter = next;
            Ok(HypeTrainOutcome::Started(*meter))
        }
        HypeTrainEvent::Progression(progress) => {
            meter.apply(progress)?;
            Ok(HypeTrainOutcome::Progressed(*meter))
        }
        HypeTrainEvent::LevelUp(progress) => {
            meter.apply(progress)?;
            Ok(HypeTrainOutcome::LeveledUp {
                completed_level: meter.level.saturating_sub(1),
                meter: *meter,
            })
        }
        HypeTrainEvent::End { reason } => {
            let last = *meter;
            let completed = reason == COMPLETED_REASON && last.is_final_level_complete();
            meter.reset();
            Ok(HypeTrainOutcome::Ended {
                reason: reason.clone(),
                completed,
                last,
            })
        }
        HypeTrainEvent::Other(kind) => Ok(HypeTrainOutcome::Ignored(kind.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(level: u32, value: u64, goal: u64, total: u64) -> HypeTrainProgress {
        HypeTrainProgress {
            level: HypeTrainLevel { value: level, goal },
            value,
            goal,
            total,
        }
    }

    #[test]
    fn percent_is_floored() {
        let mut meter = ProgressMeter::default();
        meter.apply(&progress(1, 1000, 2000, 1000)).expect("apply");
        assert_eq!(meter.percent, 50);
        meter.apply(&progress(1, 1999, 2000, 1999)).expect("apply");
        assert_eq!(meter.percent, 99);
        meter.apply(&progress(3, 2600, 2500, 9000)).expect("apply");
        assert_eq!(meter.percent, 104);
    }

    #[test]
    fn zero_goal_leaves_meter_unchanged() {
        let mut meter = ProgressMeter::default();
        meter.apply(&progress(2, 10, 100, 10)).expect("apply");
        let before = meter;
        assert_eq!(meter.apply(&progress(3, 5, 0, 5)), Err(MeterError::ZeroGoal));
        assert_eq!(meter, before);
    }

    #[test]
    fn end_before_final_level_is_generic() {
        let mut meter = ProgressMeter::default();
        let events = [
            HypeTrainEvent::Start(progress(1, 100, 2000, 100)),
            HypeTrainEvent::Progression(progress(1, 500, 2000, 500)),
            HypeTrainEvent::LevelUp(progress(2, 0, 2500, 2000)),
        ];
        for event in &events {
            aggregate(&mut meter, event).expect("aggregate");
        }
        let outcome = aggregate(
            &mut meter,
            &HypeTrainEvent::End {
                reason: "COMPLETED".to_string(),
            },
        )
        .expect("end");
        match outcome {
            HypeTrainOutcome::Ended {
                completed, last, ..
            } => {
                assert!(!completed);
                assert_eq!(last.level, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(meter, ProgressMeter::default());
    }

    #[test]
    fn end_after_full_final_level_is_completed() {
        let mut meter = ProgressMeter::default();
        aggregate(
            &mut meter,
            &HypeTrainEvent::Progression(progress(5, 4000, 4000, 20000)),
        )
        .expect("progress");
        let outcome = aggregate(
            &mut meter,
            &HypeTrainEvent::End {
                reason: "COMPLETED".to_string(),
            },
        )
        .expect("end");
        assert!(matches!(
            outcome,
            HypeTrainOutcome::Ended {
                completed: true,
                ..
            }
        ));

        aggregate(
            &mut meter,
            &HypeTrainEvent::Progression(progress(5, 4000, 4000, 20000)),
        )
        .expect("progress");
        let expired = aggregate(
            &mut meter,
            &HypeTrainEvent::End {
                reason: "EXPIRE".to_string(),
            },
        )
        .expect("end");
        assert!(matches!(
            expired,
            HypeTrainOutcome::Ended {
                completed: false,
                ..
            }
        ));
    }

    #[test]
    fn level_up_reports_previous_level() {
        let mut meter = ProgressMeter::default();
        let outcome = aggregate(&mut meter, &HypeTrainEvent::LevelUp(progress(3, 0, 3000, 5000)))
            .expect("level up");
        assert_eq!(
            outcome,
            HypeTrainOutcome::LeveledUp {
                completed_level: 2,
                meter,
            }
        );
    }

    #[test]
    fn parses_wire_sub_types() {
        let start = HypeTrainEvent::from_json(
            r#"{"type":"hype-train-start","data":{"channel_id":"1","progress":{"level":{"value":1,"goal":1600},"value":100,"goal":1600,"total":100,"remaining_seconds":299}}}"#,
        )
        .expect("start");
        assert!(matches!(start, HypeTrainEvent::Start(p) if p.value == 100 && p.level.value == 1));

        let end = HypeTrainEvent::from_json(
            r#"{"type":"hype-train-end","data":{"ending_reason":"EXPIRE"}}"#,
        )
        .expect("end");
        assert_eq!(
            end,
            HypeTrainEvent::End {
                reason: "EXPIRE".to_string()
            }
        );

        let conductor =
            HypeTrainEvent::from_json(r#"{"type":"hype-train-conductor-update","data":{}}"#)
                .expect("other");
        assert_eq!(
            conductor,
            HypeTrainEvent::Other("hype-train-conductor-update".to_string())
        );

        let missing = HypeTrainEvent::from_json(r#"{"type":"hype-train-progression","data":{}}"#);
        assert_eq!(missing, Err(PayloadError::Missing("data.progress")));
    }
}
