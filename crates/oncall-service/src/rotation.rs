//! Rotation arithmetic: which roster member is on duty at a given instant.
//!
//! Deliberately calendar-based rather than epoch-based — `Daily` rotates on
//! day-of-year, `Weekly` on ISO week number, `Biweekly` on ISO week number
//! halved — so the schedule is stable across process restarts and readable
//! from the timestamp alone, matching the style of the deterministic
//! canonical hashing used elsewhere in this workspace.

use chrono::{DateTime, Datelike, Utc};
use incident_core::types::oncall::{Member, RotationType, Schedule};

#[derive(Debug, Clone, Default)]
pub struct CurrentOnCall {
    pub primary: Option<Member>,
    pub secondary: Option<Member>,
}

fn rotation_index(rotation_type: RotationType, now: DateTime<Utc>) -> u32 {
    match rotation_type {
        RotationType::Daily => now.ordinal(),
        RotationType::Weekly => now.iso_week().week(),
        RotationType::Biweekly => now.iso_week().week() / 2,
    }
}

/// The member on duty for `schedule` at `now`, ignoring overrides. Primary
/// and secondary slots rotate independently through their own role's roster
/// using the same index, so exactly one of each role is on duty at a time.
pub fn current_on_call(schedule: &Schedule, now: DateTime<Utc>) -> CurrentOnCall {
    let index = rotation_index(schedule.rotation_type, now);
    let primaries = schedule.primaries();
    let secondaries = schedule.secondaries();
    CurrentOnCall {
        primary: (!primaries.is_empty()).then(|| primaries[(index as usize) % primaries.len()].clone()),
        secondary: (!secondaries.is_empty()).then(|| secondaries[(index as usize) % secondaries.len()].clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use incident_core::types::oncall::Role;

    fn member(name: &str, role: Role) -> Member {
        Member { name: name.into(), email: format!("{name}@example.com"), role }
    }

    fn schedule(rotation_type: RotationType) -> Schedule {
        Schedule::new(
            "frontend-api".into(),
            rotation_type,
            vec![member("Ada", Role::Primary), member("Ben", Role::Primary), member("Cleo", Role::Secondary)],
        )
        .unwrap()
    }

    #[test]
    fn daily_rotation_advances_with_day_of_year() {
        let schedule = schedule(RotationType::Daily);
        let day1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let on_call_1 = current_on_call(&schedule, day1);
        let on_call_2 = current_on_call(&schedule, day2);
        assert_ne!(on_call_1.primary.unwrap().name, on_call_2.primary.unwrap().name);
    }

    #[test]
    fn single_primary_is_always_on_call() {
        let schedule = Schedule::new("billing".into(), RotationType::Weekly, vec![member("Ada", Role::Primary)]).unwrap();
        let on_call = current_on_call(&schedule, Utc::now());
        assert_eq!(on_call.primary.unwrap().name, "Ada");
        assert!(on_call.secondary.is_none());
    }

    #[test]
    fn biweekly_rotation_holds_for_two_consecutive_weeks() {
        let schedule = schedule(RotationType::Biweekly);
        let week1 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let week2 = Utc.with_ymd_and_hms(2026, 1, 12, 0, 0, 0).unwrap();
        let on_call_1 = current_on_call(&schedule, week1);
        let on_call_2 = current_on_call(&schedule, week2);
        assert_eq!(on_call_1.primary.unwrap().name, on_call_2.primary.unwrap().name);
    }
}
