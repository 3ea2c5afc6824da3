//! Substitution and evaluation of a conditional statement

use crate::types::{EvaluationResult, Outcome, ResolvedCondition};
use chrono::{DateTime, Local};
use verdant_expr::{evaluate_str, substitute};

/// Render the template with resolved values and evaluate it
///
/// Never fails: syntax errors, type mismatches and leftover placeholders all
/// produce [`Outcome::Error`].
pub fn evaluate_condition(template: &str, values: &[ResolvedCondition]) -> EvaluationResult {
    let rendered = render(template, values);
    let outcome = match evaluate_str(&rendered) {
        Ok(true) => Outcome::True,
        Ok(false) => Outcome::False,
        Err(e) => Outcome::Error(e.to_string()),
    };
    EvaluationResult { outcome, rendered }
}

/// Replace every `{short_id}` placeholder with its resolved value
pub fn render(template: &str, values: &[ResolvedCondition]) -> String {
    substitute(template, values.iter().map(|v| (v.placeholder(), v.value)))
}

/// Message handed to the action dispatcher when a conditional triggers
pub fn trigger_message(
    at: DateTime<Local>,
    rule_id: &str,
    name: &str,
    template: &str,
    rendered: &str,
) -> String {
    format!(
        "{}\n[Conditional {} ({})]\n[Conditional Statement:\n{}\n\nReplaced:\n{}\n]",
        at.format("%Y-%m-%d %H:%M:%S"),
        rule_id,
        name,
        template,
        rendered
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::ResolvedValue;
    use chrono::TimeZone;

    fn value(id: &str, value: ResolvedValue) -> ResolvedCondition {
        ResolvedCondition {
            condition_id: id.to_string(),
            value,
        }
    }

    #[test]
    fn test_two_measurements_true() {
        let result = evaluate_condition(
            "{c1} > 20 and {c2} < 50",
            &[
                value("c1-aaaa", ResolvedValue::Number(25.0)),
                value("c2-bbbb", ResolvedValue::Number(40.0)),
            ],
        );
        assert_eq!(result.rendered, "25 > 20 and 40 < 50");
        assert!(result.is_true());
    }

    #[test]
    fn test_unavailable_pin_is_false() {
        let result = evaluate_condition("{c1}", &[value("c1", ResolvedValue::Unavailable)]);
        assert_eq!(result.rendered, "false");
        assert_eq!(result.outcome, Outcome::False);
    }

    #[test]
    fn test_no_data_comparison_is_error() {
        let result = evaluate_condition("{c1} > 20", &[value("c1", ResolvedValue::NoData)]);
        assert_eq!(result.rendered, "unknown > 20");
        assert!(matches!(result.outcome, Outcome::Error(_)));
    }

    #[test]
    fn test_no_data_can_be_tested_explicitly() {
        let result = evaluate_condition(
            "{c1} == unknown",
            &[value("c1", ResolvedValue::NoData)],
        );
        assert!(result.is_true());
    }

    #[test]
    fn test_absent_identifier_is_error() {
        let result = evaluate_condition(
            "{c1} > 20 and {c9} < 50",
            &[value("c1", ResolvedValue::Number(25.0))],
        );
        assert_eq!(result.rendered, "25 > 20 and {c9} < 50");
        assert!(matches!(result.outcome, Outcome::Error(ref e) if e.contains("c9")));
    }

    #[test]
    fn test_every_occurrence_replaced() {
        let rendered = render(
            "{a} > 1 and {a} < 9 and not {b}",
            &[
                value("a", ResolvedValue::Number(5.0)),
                value("b", ResolvedValue::Bool(false)),
            ],
        );
        assert_eq!(rendered, "5 > 1 and 5 < 9 and not false");
    }

    #[test]
    fn test_trigger_message_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let message = trigger_message(at, "r1-x", "Heater", "{c1} > 20", "25 > 20");
        assert_eq!(
            message,
            "2024-03-09 14:05:00\n[Conditional r1-x (Heater)]\n\
             [Conditional Statement:\n{c1} > 20\n\nReplaced:\n25 > 20\n]"
        );
    }
}
