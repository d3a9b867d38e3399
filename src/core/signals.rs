//! Signal derivation from a session's run and error events.
//!
//! Signals are descriptive facts about what happened during a session. They
//! never grade, rank or infer intent. Derivation is a pure function of the
//! session snapshot and its two ordered event sequences: no I/O, no clock,
//! no randomness, so the same input always yields the same list in the same
//! order.

use crate::core::types::{ErrorEvent, RunEvent, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RUN_COUNT: &str = "run_count";
pub const REPEATED_EXECUTION: &str = "repeated_execution";
pub const ERRORS_PRESENT: &str = "errors_present";
pub const ERROR_FOLLOWED_BY_RUN: &str = "error_followed_by_run";
pub const SESSION_DURATION_MINUTES: &str = "session_duration_minutes";
pub const TIME_TO_FIRST_RUN_MINUTES: &str = "time_to_first_run_minutes";

/// Scalar carried by a signal.
///
/// Serialized untagged so consumers see a bare JSON number or boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Integer(i64),
    Boolean(bool),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{v}"),
            SignalValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// A single descriptive fact about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Stable short identifier, e.g. `run_count`
    pub key: String,
    pub value: SignalValue,
    /// Human-readable sentence
    pub description: String,
}

impl Signal {
    fn integer(key: &str, value: i64, description: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: SignalValue::Integer(value),
            description: description.into(),
        }
    }

    fn flag(key: &str, description: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: SignalValue::Boolean(true),
            description: description.into(),
        }
    }
}

/// Borrowed view over everything a rule may read.
#[derive(Debug, Clone, Copy)]
pub struct SignalInput<'a> {
    pub session: &'a Session,
    /// Ascending by occurrence time
    pub runs: &'a [RunEvent],
    /// Ascending by occurrence time
    pub errors: &'a [ErrorEvent],
}

/// A derivation rule: reads the shared input, yields at most one signal.
///
/// Rules never see each other's output.
pub type SignalRule = fn(&SignalInput<'_>) -> Option<Signal>;

/// Rules in emission order. New rules go at the end.
pub const RULES: &[SignalRule] = &[
    run_count,
    repeated_execution,
    errors_present,
    error_followed_by_run,
    session_duration_minutes,
    time_to_first_run_minutes,
];

/// Derive the ordered signal list for a session.
///
/// Both event slices must already be sorted ascending by occurrence time.
/// Empty slices are valid and simply suppress the rules that need them.
pub fn derive_signals(session: &Session, runs: &[RunEvent], errors: &[ErrorEvent]) -> Vec<Signal> {
    let input = SignalInput {
        session,
        runs,
        errors,
    };

    RULES.iter().filter_map(|rule| rule(&input)).collect()
}

fn run_count(input: &SignalInput<'_>) -> Option<Signal> {
    let count = input.runs.len();
    let description = match count {
        0 => return None,
        1 => "You ran your code once during this session.",
        _ => "You ran your code multiple times during this session.",
    };

    Some(Signal::integer(RUN_COUNT, count as i64, description))
}

fn repeated_execution(input: &SignalInput<'_>) -> Option<Signal> {
    (input.runs.len() > 1).then(|| {
        Signal::flag(
            REPEATED_EXECUTION,
            "The code was executed more than once during this session.",
        )
    })
}

fn errors_present(input: &SignalInput<'_>) -> Option<Signal> {
    (!input.errors.is_empty())
        .then(|| Signal::flag(ERRORS_PRESENT, "Errors occurred during this session."))
}

fn error_followed_by_run(input: &SignalInput<'_>) -> Option<Signal> {
    let first_error_at = input.errors.first()?.occurred_at;

    // Strictly after: a run stamped at the same instant is not a retry.
    input
        .runs
        .iter()
        .any(|run| run.occurred_at > first_error_at)
        .then(|| {
            Signal::flag(
                ERROR_FOLLOWED_BY_RUN,
                "After an error occurred, the code was run again.",
            )
        })
}

fn session_duration_minutes(input: &SignalInput<'_>) -> Option<Signal> {
    let ended_at = input.session.ended_at?;
    let minutes = rounded_minutes_between(input.session.started_at, ended_at);

    Some(Signal::integer(
        SESSION_DURATION_MINUTES,
        minutes,
        format!("This session lasted {minutes} minutes."),
    ))
}

fn time_to_first_run_minutes(input: &SignalInput<'_>) -> Option<Signal> {
    let first_run = input.runs.first()?;
    let minutes = rounded_minutes_between(input.session.started_at, first_run.occurred_at);

    Some(Signal::integer(
        TIME_TO_FIRST_RUN_MINUTES,
        minutes,
        format!("The first code execution occurred after {minutes} minutes."),
    ))
}

/// Whole minutes from `from` to `to`, rounded half away from zero.
///
/// Negative when `to` precedes `from`; the value is reported as-is.
fn rounded_minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let millis = (to - from).num_milliseconds() as f64;
    (millis / 60_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn session(ended_after_secs: Option<i64>) -> Session {
        Session {
            id: 1,
            user_id: 7,
            prompt_text: "Reverse a string".to_string(),
            started_at: t0(),
            ended_at: ended_after_secs.map(|s| t0() + Duration::seconds(s)),
        }
    }

    fn runs_at(offsets_secs: &[i64]) -> Vec<RunEvent> {
        offsets_secs
            .iter()
            .enumerate()
            .map(|(i, &s)| RunEvent {
                id: i as i64 + 1,
                session_id: 1,
                occurred_at: t0() + Duration::seconds(s),
            })
            .collect()
    }

    fn errors_at(offsets_secs: &[i64]) -> Vec<ErrorEvent> {
        offsets_secs
            .iter()
            .enumerate()
            .map(|(i, &s)| ErrorEvent {
                id: i as i64 + 1,
                run_id: i as i64 + 1,
                message: "NameError: name 'x' is not defined".to_string(),
                occurred_at: t0() + Duration::seconds(s),
            })
            .collect()
    }

    fn keys(signals: &[Signal]) -> Vec<&str> {
        signals.iter().map(|s| s.key.as_str()).collect()
    }

    fn find<'a>(signals: &'a [Signal], key: &str) -> Option<&'a Signal> {
        signals.iter().find(|s| s.key == key)
    }

    #[test]
    fn test_no_activity_yields_nothing() {
        let signals = derive_signals(&session(None), &[], &[]);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_single_run() {
        let signals = derive_signals(&session(None), &runs_at(&[30]), &[]);

        assert_eq!(keys(&signals), vec![RUN_COUNT, TIME_TO_FIRST_RUN_MINUTES]);
        let count = find(&signals, RUN_COUNT).unwrap();
        assert_eq!(count.value, SignalValue::Integer(1));
        assert_eq!(
            count.description,
            "You ran your code once during this session."
        );
    }

    #[test]
    fn test_run_count_and_repetition_by_cardinality() {
        for k in 0..5usize {
            let offsets: Vec<i64> = (0..k as i64).map(|i| i * 10).collect();
            let signals = derive_signals(&session(None), &runs_at(&offsets), &[]);

            let count = find(&signals, RUN_COUNT);
            assert_eq!(count.is_some(), k >= 1, "run_count for k={k}");
            if let Some(count) = count {
                assert_eq!(count.value, SignalValue::Integer(k as i64));
            }

            let repeated = find(&signals, REPEATED_EXECUTION);
            assert_eq!(repeated.is_some(), k > 1, "repeated_execution for k={k}");
            if let Some(repeated) = repeated {
                assert_eq!(repeated.value, SignalValue::Boolean(true));
            }
        }
    }

    #[test]
    fn test_multiple_runs_description() {
        let signals = derive_signals(&session(None), &runs_at(&[10, 20, 30]), &[]);
        assert_eq!(
            find(&signals, RUN_COUNT).unwrap().description,
            "You ran your code multiple times during this session."
        );
        assert_eq!(
            find(&signals, REPEATED_EXECUTION).unwrap().description,
            "The code was executed more than once during this session."
        );
    }

    #[test]
    fn test_errors_present_without_retry() {
        let signals = derive_signals(&session(None), &runs_at(&[10]), &errors_at(&[10]));

        assert!(find(&signals, ERRORS_PRESENT).is_some());
        // Run shares the error's timestamp: not after it.
        assert!(find(&signals, ERROR_FOLLOWED_BY_RUN).is_none());
    }

    #[test]
    fn test_error_followed_by_run_is_strict() {
        let signals = derive_signals(&session(None), &runs_at(&[10, 11]), &errors_at(&[10]));

        let retry = find(&signals, ERROR_FOLLOWED_BY_RUN).unwrap();
        assert_eq!(retry.value, SignalValue::Boolean(true));
        assert_eq!(
            retry.description,
            "After an error occurred, the code was run again."
        );
    }

    #[test]
    fn test_error_followed_by_run_uses_first_error() {
        // Second error is later than every run, but the first one is not.
        let signals = derive_signals(&session(None), &runs_at(&[5, 20]), &errors_at(&[5, 30]));
        assert!(find(&signals, ERROR_FOLLOWED_BY_RUN).is_some());
    }

    #[test]
    fn test_errors_without_runs() {
        let signals = derive_signals(&session(None), &[], &errors_at(&[5]));
        assert_eq!(keys(&signals), vec![ERRORS_PRESENT]);
    }

    #[test]
    fn test_session_duration_rounds_to_nearest_minute() {
        let signals = derive_signals(&session(Some(125)), &[], &[]);

        let duration = find(&signals, SESSION_DURATION_MINUTES).unwrap();
        assert_eq!(duration.value, SignalValue::Integer(2));
        assert_eq!(duration.description, "This session lasted 2 minutes.");
    }

    #[test]
    fn test_active_session_has_no_duration() {
        let signals = derive_signals(&session(None), &runs_at(&[60]), &[]);
        assert!(find(&signals, SESSION_DURATION_MINUTES).is_none());
    }

    #[test]
    fn test_time_to_first_run_rounds_halves_up() {
        let signals = derive_signals(&session(None), &runs_at(&[90, 400]), &[]);

        let first = find(&signals, TIME_TO_FIRST_RUN_MINUTES).unwrap();
        assert_eq!(first.value, SignalValue::Integer(2));
        assert_eq!(
            first.description,
            "The first code execution occurred after 2 minutes."
        );
    }

    #[test]
    fn test_time_to_first_run_can_be_negative() {
        let signals = derive_signals(&session(None), &runs_at(&[-180]), &[]);

        let first = find(&signals, TIME_TO_FIRST_RUN_MINUTES).unwrap();
        assert_eq!(first.value, SignalValue::Integer(-3));
        assert_eq!(
            first.description,
            "The first code execution occurred after -3 minutes."
        );
    }

    #[test]
    fn test_end_before_start_is_reported_as_is() {
        let signals = derive_signals(&session(Some(-120)), &[], &[]);
        assert_eq!(
            find(&signals, SESSION_DURATION_MINUTES).unwrap().value,
            SignalValue::Integer(-2)
        );
    }

    #[test]
    fn test_full_output_order() {
        let signals = derive_signals(
            &session(Some(600)),
            &runs_at(&[60, 120, 180]),
            &errors_at(&[120]),
        );

        assert_eq!(
            keys(&signals),
            vec![
                RUN_COUNT,
                REPEATED_EXECUTION,
                ERRORS_PRESENT,
                ERROR_FOLLOWED_BY_RUN,
                SESSION_DURATION_MINUTES,
                TIME_TO_FIRST_RUN_MINUTES,
            ]
        );
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let s = session(Some(300));
        let runs = runs_at(&[30, 90, 150]);
        let errors = errors_at(&[90]);

        let first = serde_json::to_string(&derive_signals(&s, &runs, &errors)).unwrap();
        let second = serde_json::to_string(&derive_signals(&s, &runs, &errors)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rounding_helper() {
        let start = t0();
        assert_eq!(rounded_minutes_between(start, start + Duration::seconds(29)), 0);
        assert_eq!(rounded_minutes_between(start, start + Duration::seconds(30)), 1);
        assert_eq!(rounded_minutes_between(start, start + Duration::seconds(150)), 3);
        assert_eq!(rounded_minutes_between(start, start - Duration::seconds(90)), -2);
    }

    #[test]
    fn test_signal_value_serializes_as_bare_scalar() {
        let json = serde_json::to_value(Signal::integer(RUN_COUNT, 3, "x")).unwrap();
        assert_eq!(json["value"], 3);

        let json = serde_json::to_value(Signal::flag(ERRORS_PRESENT, "y")).unwrap();
        assert_eq!(json["value"], true);
    }
}
