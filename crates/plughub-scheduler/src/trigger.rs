//! Trigger definitions and fire-time planning.
//!
//! Everything in this module is a pure function of the trigger definition
//! and a supplied clock value, so misfire behavior is testable without a
//! running scheduler loop.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use plughub_core::error::PlatformError;
use plughub_core::result::PlatformResult;

/// Upper bound on counted missed occurrences; anything beyond this is
/// treated the same (a backlog this deep is only replayable over hours
/// anyway).
const MAX_COUNTED_OCCURRENCES: u32 = 1_000;

/// How the trigger computes fire times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSchedule {
    /// Cron expression (Quartz-style 6/7-field; 5-field accepted and padded
    /// with a seconds field), optionally evaluated in a named time zone.
    Cron {
        /// The cron expression.
        expression: String,
        /// IANA time zone name; UTC when absent.
        time_zone: Option<String>,
    },
    /// Fixed-interval repetition anchored at the trigger's start time.
    Simple {
        /// Number of repeats after the first fire; `-1` repeats forever.
        repeat_count: i32,
        /// Interval between fires in milliseconds.
        repeat_interval_ms: u64,
    },
}

/// What to do when a fire time has passed by more than the misfire threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfireInstruction {
    /// Fire immediately when only a single occurrence was missed, otherwise
    /// skip to the next regular fire time.
    #[default]
    SmartPolicy,
    /// Fire every missed occurrence, replayed as capacity allows.
    IgnoreMisfirePolicy,
    /// Fire exactly once immediately, however many occurrences were missed.
    FireNow,
    /// Discard missed occurrences and wait for the next regular fire time.
    DoNothing,
}

/// A trigger attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Trigger name.
    pub trigger_name: String,
    /// Trigger group.
    pub trigger_group: String,
    /// The fire-time schedule.
    pub schedule: TriggerSchedule,
    /// Earliest instant the trigger may fire. Defaults to the moment of
    /// scheduling; simple triggers fire at this instant first.
    pub start_time: Option<DateTime<Utc>>,
    /// Instant after which the trigger never fires again.
    pub end_time: Option<DateTime<Utc>>,
    /// Tie-break among triggers due at the same instant; higher fires first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Misfire handling instruction.
    #[serde(default)]
    pub misfire_instruction: MisfireInstruction,
}

fn default_priority() -> i32 {
    5
}

impl TriggerDefinition {
    /// Create a cron trigger with defaults.
    pub fn cron(name: impl Into<String>, group: impl Into<String>, expression: &str) -> Self {
        Self {
            trigger_name: name.into(),
            trigger_group: group.into(),
            schedule: TriggerSchedule::Cron {
                expression: expression.to_string(),
                time_zone: None,
            },
            start_time: None,
            end_time: None,
            priority: default_priority(),
            misfire_instruction: MisfireInstruction::default(),
        }
    }

    /// Create a fixed-interval trigger with defaults.
    pub fn simple(
        name: impl Into<String>,
        group: impl Into<String>,
        repeat_count: i32,
        repeat_interval_ms: u64,
    ) -> Self {
        Self {
            trigger_name: name.into(),
            trigger_group: group.into(),
            schedule: TriggerSchedule::Simple {
                repeat_count,
                repeat_interval_ms,
            },
            start_time: None,
            end_time: None,
            priority: default_priority(),
            misfire_instruction: MisfireInstruction::default(),
        }
    }

    /// Set the misfire instruction.
    pub fn with_misfire(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    /// Set the fire window.
    pub fn with_window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Validate the trigger specification.
    pub fn validate(&self) -> PlatformResult<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(PlatformError::InvalidTriggerSpec(format!(
                    "start time {start} is not before end time {end}"
                )));
            }
        }
        match &self.schedule {
            TriggerSchedule::Cron {
                expression,
                time_zone,
            } => {
                parse_cron(expression)?;
                if let Some(zone) = time_zone {
                    parse_zone(zone)?;
                }
            }
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval_ms,
            } => {
                if *repeat_count < -1 {
                    return Err(PlatformError::InvalidTriggerSpec(format!(
                        "repeat count {repeat_count} is below -1"
                    )));
                }
                if *repeat_interval_ms == 0 && *repeat_count != 0 {
                    return Err(PlatformError::InvalidTriggerSpec(
                        "repeating trigger requires a non-zero interval".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The first fire time at or after `now`, honoring the fire window.
    ///
    /// Simple triggers fire at their start time itself; cron triggers at the
    /// next matching occurrence.
    pub fn first_fire(&self, now: DateTime<Utc>) -> PlatformResult<Option<DateTime<Utc>>> {
        let anchor = self.start_time.unwrap_or(now);
        match &self.schedule {
            // A simple trigger's first occurrence is the anchor itself.
            TriggerSchedule::Simple { .. } if anchor >= now => Ok(self.bounded(anchor)),
            _ => self.next_occurrence(anchor.max(now) - Duration::milliseconds(1)),
        }
    }

    /// The next occurrence strictly after `after`, honoring repeat bounds and
    /// the end time. `None` means the trigger is exhausted.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> PlatformResult<Option<DateTime<Utc>>> {
        let candidate = match &self.schedule {
            TriggerSchedule::Cron {
                expression,
                time_zone,
            } => {
                let schedule = parse_cron(expression)?;
                match time_zone {
                    Some(zone) => {
                        let tz = parse_zone(zone)?;
                        schedule
                            .after(&after.with_timezone(&tz))
                            .next()
                            .map(|dt| dt.with_timezone(&Utc))
                    }
                    None => schedule.after(&after).next(),
                }
            }
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval_ms,
            } => {
                let anchor = self.start_time.unwrap_or(after);
                simple_occurrence_after(anchor, *repeat_count, *repeat_interval_ms, after)
            }
        };
        Ok(candidate.and_then(|at| self.bounded(at)))
    }

    /// Count occurrences strictly after `after` and at or before `until`.
    pub fn occurrences_within(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> PlatformResult<u32> {
        let mut count = 0u32;
        let mut cursor = after;
        while count < MAX_COUNTED_OCCURRENCES {
            match self.next_occurrence(cursor)? {
                Some(at) if at <= until => {
                    count += 1;
                    cursor = at;
                }
                _ => break,
            }
        }
        Ok(count)
    }

    /// Clamp an occurrence against the end time.
    fn bounded(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.end_time {
            Some(end) if at > end => None,
            _ => Some(at),
        }
    }
}

/// Next fire of a fixed-interval schedule, strictly after `after`.
fn simple_occurrence_after(
    anchor: DateTime<Utc>,
    repeat_count: i32,
    interval_ms: u64,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if anchor > after {
        return Some(anchor);
    }
    if interval_ms == 0 {
        // One-shot at the anchor; already past.
        return None;
    }
    let interval = interval_ms as i64;
    let elapsed_ms = (after - anchor).num_milliseconds();
    let index = elapsed_ms / interval + 1;
    if repeat_count >= 0 && index > repeat_count as i64 {
        return None;
    }
    Some(anchor + Duration::milliseconds(index * interval))
}

/// Normalize and parse a cron expression.
///
/// Accepts Quartz-style 6/7-field expressions (`?` treated as `*`) and
/// standard 5-field expressions, which get a seconds field prepended.
fn parse_cron(expression: &str) -> PlatformResult<Schedule> {
    let normalized = expression.replace('?', "*");
    let field_count = normalized.split_whitespace().count();
    let padded = if field_count == 5 {
        format!("0 {normalized}")
    } else {
        normalized
    };
    padded.parse::<Schedule>().map_err(|e| {
        PlatformError::InvalidTriggerSpec(format!("invalid cron expression '{expression}': {e}"))
    })
}

fn parse_zone(zone: &str) -> PlatformResult<chrono_tz::Tz> {
    zone.parse::<chrono_tz::Tz>()
        .map_err(|_| PlatformError::InvalidTriggerSpec(format!("unknown time zone '{zone}'")))
}

/// Outcome of evaluating one due trigger at one instant.
#[derive(Debug, Clone, PartialEq)]
pub enum FireDecision {
    /// Not yet due.
    Wait,
    /// Dispatch one execution for `scheduled`, then advance to `next`.
    Fire {
        /// The occurrence being honored.
        scheduled: DateTime<Utc>,
        /// The following regular fire time; `None` exhausts the trigger.
        next: Option<DateTime<Utc>>,
        /// Additional missed occurrences banked for later replay
        /// (IGNORE_MISFIRE_POLICY only).
        banked: u32,
    },
    /// Advance to `next` without firing; `None` exhausts the trigger.
    Skip {
        /// The following regular fire time.
        next: Option<DateTime<Utc>>,
    },
}

/// Decide what a due trigger should do at `now`.
///
/// A fire time that has passed by no more than `misfire_threshold` fires
/// normally. Beyond that the trigger has misfired and its instruction
/// applies.
pub fn plan_fire(
    definition: &TriggerDefinition,
    next_fire: DateTime<Utc>,
    now: DateTime<Utc>,
    misfire_threshold: Duration,
) -> PlatformResult<FireDecision> {
    if next_fire > now {
        return Ok(FireDecision::Wait);
    }
    if let Some(end) = definition.end_time {
        if next_fire > end {
            return Ok(FireDecision::Skip { next: None });
        }
    }

    let delay = now - next_fire;
    if delay <= misfire_threshold {
        let next = definition.next_occurrence(next_fire)?;
        return Ok(FireDecision::Fire {
            scheduled: next_fire,
            next,
            banked: 0,
        });
    }

    // Misfired: the occurrence at `next_fire` plus everything that came due
    // while the scheduler could not act.
    let missed = 1 + definition.occurrences_within(next_fire, now)?;
    let next = definition.next_occurrence(now)?;

    let decision = match definition.misfire_instruction {
        MisfireInstruction::SmartPolicy => {
            if missed <= 1 {
                FireDecision::Fire {
                    scheduled: next_fire,
                    next,
                    banked: 0,
                }
            } else {
                FireDecision::Skip { next }
            }
        }
        MisfireInstruction::IgnoreMisfirePolicy => FireDecision::Fire {
            scheduled: next_fire,
            next,
            banked: missed - 1,
        },
        MisfireInstruction::FireNow => FireDecision::Fire {
            scheduled: next_fire,
            next,
            banked: 0,
        },
        MisfireInstruction::DoNothing => FireDecision::Skip { next },
    };
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .expect("valid test timestamp")
            .and_utc()
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let trigger = TriggerDefinition::cron("t", "g", "not a cron");
        assert!(matches!(
            trigger.validate(),
            Err(PlatformError::InvalidTriggerSpec(_))
        ));
    }

    #[test]
    fn test_validate_accepts_quartz_and_five_field() {
        assert!(TriggerDefinition::cron("t", "g", "0 0 2 * * ?").validate().is_ok());
        assert!(TriggerDefinition::cron("t", "g", "*/5 * * * *").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_zone() {
        let mut trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?");
        trigger.schedule = TriggerSchedule::Cron {
            expression: "0 0 2 * * ?".to_string(),
            time_zone: Some("Mars/Olympus".to_string()),
        };
        assert!(trigger.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let trigger = TriggerDefinition::simple("t", "g", -1, 1000)
            .with_window(Some(at("2025-01-02 00:00:00")), Some(at("2025-01-01 00:00:00")));
        assert!(trigger.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_repeat_count() {
        assert!(TriggerDefinition::simple("t", "g", -2, 1000).validate().is_err());
        assert!(TriggerDefinition::simple("t", "g", 5, 0).validate().is_err());
        assert!(TriggerDefinition::simple("t", "g", 0, 0).validate().is_ok());
    }

    #[test]
    fn test_simple_first_fire_is_start_time() {
        let start = at("2025-03-01 12:00:00");
        let trigger =
            TriggerDefinition::simple("t", "g", -1, 60_000).with_window(Some(start), None);
        let first = trigger.first_fire(at("2025-03-01 11:00:00")).unwrap();
        assert_eq!(first, Some(start));
    }

    #[test]
    fn test_simple_next_occurrence_arithmetic() {
        let start = at("2025-03-01 12:00:00");
        let trigger =
            TriggerDefinition::simple("t", "g", -1, 60_000).with_window(Some(start), None);
        let next = trigger
            .next_occurrence(at("2025-03-01 12:02:30"))
            .unwrap()
            .unwrap();
        assert_eq!(next, at("2025-03-01 12:03:00"));
    }

    #[test]
    fn test_simple_repeat_count_exhausts() {
        let start = at("2025-03-01 12:00:00");
        // First fire plus two repeats: occurrences at 12:00, 12:01, 12:02.
        let trigger =
            TriggerDefinition::simple("t", "g", 2, 60_000).with_window(Some(start), None);
        assert_eq!(
            trigger.next_occurrence(at("2025-03-01 12:01:00")).unwrap(),
            Some(at("2025-03-01 12:02:00"))
        );
        assert_eq!(
            trigger.next_occurrence(at("2025-03-01 12:02:00")).unwrap(),
            None
        );
    }

    #[test]
    fn test_end_time_exhausts() {
        let start = at("2025-03-01 12:00:00");
        let trigger = TriggerDefinition::simple("t", "g", -1, 60_000)
            .with_window(Some(start), Some(at("2025-03-01 12:02:00")));
        assert_eq!(
            trigger.next_occurrence(at("2025-03-01 12:01:30")).unwrap(),
            Some(at("2025-03-01 12:02:00"))
        );
        assert_eq!(
            trigger.next_occurrence(at("2025-03-01 12:02:00")).unwrap(),
            None
        );
    }

    #[test]
    fn test_cron_daily_next_occurrence() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?");
        let next = trigger
            .next_occurrence(at("2025-03-01 02:10:00"))
            .unwrap()
            .unwrap();
        assert_eq!(next, at("2025-03-02 02:00:00"));
    }

    #[test]
    fn test_cron_with_time_zone() {
        let mut trigger = TriggerDefinition::cron("t", "g", "0 0 9 * * ?");
        trigger.schedule = TriggerSchedule::Cron {
            expression: "0 0 9 * * ?".to_string(),
            time_zone: Some("Europe/Paris".to_string()),
        };
        // 09:00 Paris in winter (CET, UTC+1) is 08:00 UTC.
        let next = trigger
            .next_occurrence(at("2025-02-01 00:00:00"))
            .unwrap()
            .unwrap();
        assert_eq!(next, at("2025-02-01 08:00:00"));
    }

    #[test]
    fn test_plan_fire_not_due() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?");
        let plan = plan_fire(
            &trigger,
            at("2025-03-02 02:00:00"),
            at("2025-03-01 12:00:00"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(plan, FireDecision::Wait);
    }

    #[test]
    fn test_plan_fire_within_threshold() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?");
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 02:00:00"),
            at("2025-03-01 02:00:30"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(
            plan,
            FireDecision::Fire {
                scheduled: at("2025-03-01 02:00:00"),
                next: Some(at("2025-03-02 02:00:00")),
                banked: 0,
            }
        );
    }

    #[test]
    fn test_smart_policy_single_missed_fires_once() {
        // Daily 02:00 cron, scheduler wakes ten minutes late: exactly one
        // fire, then normal cadence.
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?")
            .with_misfire(MisfireInstruction::SmartPolicy);
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 02:00:00"),
            at("2025-03-01 02:10:00"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(
            plan,
            FireDecision::Fire {
                scheduled: at("2025-03-01 02:00:00"),
                next: Some(at("2025-03-02 02:00:00")),
                banked: 0,
            }
        );
    }

    #[test]
    fn test_smart_policy_multiple_missed_skips() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?")
            .with_misfire(MisfireInstruction::SmartPolicy);
        // Three days of downtime: occurrences on the 1st, 2nd, and 3rd missed.
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 02:00:00"),
            at("2025-03-03 12:00:00"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(
            plan,
            FireDecision::Skip {
                next: Some(at("2025-03-04 02:00:00")),
            }
        );
    }

    #[test]
    fn test_ignore_policy_banks_backlog() {
        let start = at("2025-03-01 12:00:00");
        let trigger = TriggerDefinition::simple("t", "g", -1, 60_000)
            .with_window(Some(start), None)
            .with_misfire(MisfireInstruction::IgnoreMisfirePolicy);
        // Five minutes late: occurrences 12:00..12:05 all came due.
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 12:00:00"),
            at("2025-03-01 12:05:00"),
            Duration::seconds(60),
        )
        .unwrap();
        match plan {
            FireDecision::Fire {
                scheduled, banked, ..
            } => {
                assert_eq!(scheduled, at("2025-03-01 12:00:00"));
                assert_eq!(banked, 5);
            }
            other => panic!("expected Fire, got {other:?}"),
        }
    }

    #[test]
    fn test_fire_now_fires_exactly_once() {
        let start = at("2025-03-01 12:00:00");
        let trigger = TriggerDefinition::simple("t", "g", -1, 60_000)
            .with_window(Some(start), None)
            .with_misfire(MisfireInstruction::FireNow);
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 12:00:00"),
            at("2025-03-01 12:05:00"),
            Duration::seconds(60),
        )
        .unwrap();
        match plan {
            FireDecision::Fire { banked, next, .. } => {
                assert_eq!(banked, 0);
                assert_eq!(next, Some(at("2025-03-01 12:06:00")));
            }
            other => panic!("expected Fire, got {other:?}"),
        }
    }

    #[test]
    fn test_do_nothing_skips_to_next_regular() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?")
            .with_misfire(MisfireInstruction::DoNothing);
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 02:00:00"),
            at("2025-03-01 02:10:00"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(
            plan,
            FireDecision::Skip {
                next: Some(at("2025-03-02 02:00:00")),
            }
        );
    }

    #[test]
    fn test_plan_fire_past_end_time_exhausts() {
        let trigger = TriggerDefinition::cron("t", "g", "0 0 2 * * ?")
            .with_window(None, Some(at("2025-03-01 00:00:00")));
        let plan = plan_fire(
            &trigger,
            at("2025-03-01 02:00:00"),
            at("2025-03-01 02:00:10"),
            Duration::seconds(60),
        )
        .unwrap();
        assert_eq!(plan, FireDecision::Skip { next: None });
    }
}
