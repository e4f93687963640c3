//! LLM response parsing — fault-tolerant JSON-array extraction
//!
//! The model is asked for a JSON array, but responses routinely arrive with
//! prose around the payload or with partially-wrong element shapes. The
//! parser takes the first complete `[...]` substring, requires it to parse
//! to an array, and then keeps only the elements that carry the required
//! fields, normalizing the rest. An unparseable response yields an empty
//! result.

use serde_json::Value;
use tracing::debug;

use crate::types::InsightScores;

/// One validated, normalized insight from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInsight {
    pub topic: String,
    pub pillar: Option<String>,
    pub hook: String,
    pub excerpt: String,
    pub scores: InsightScores,
    pub formats: Vec<String>,
}

/// Parse an LLM response into validated insights.
pub fn parse_insights(response: &str) -> Vec<ParsedInsight> {
    let Some(array_text) = first_array_substring(response) else {
        debug!("No JSON array found in LLM response");
        return Vec::new();
    };

    let Ok(Value::Array(elements)) = serde_json::from_str::<Value>(array_text) else {
        debug!("LLM response array did not parse");
        return Vec::new();
    };

    elements.iter().filter_map(validate_element).collect()
}

/// The first complete JSON array in the response: from the first `[` to
/// its matching `]`, tracking bracket depth and string/escape state so
/// brackets inside string values or in trailing prose don't confuse the
/// boundary.
fn first_array_substring(response: &str) -> Option<&str> {
    let start = response.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in response.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    // `]` is ASCII, so this slice ends on a char boundary.
                    return Some(&response[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_element(element: &Value) -> Option<ParsedInsight> {
    let topic = element.get("topic")?.as_str()?;
    if topic.is_empty() {
        return None;
    }
    let hook = element.get("hook")?.as_str()?;
    let excerpt = element.get("excerpt")?.as_str()?;
    let scores = element.get("scores")?.as_object()?;
    let formats = element.get("formats")?.as_array()?;

    let pillar = element
        .get("pillar")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(ParsedInsight {
        topic: topic.to_string(),
        pillar,
        hook: hook.to_string(),
        excerpt: excerpt.to_string(),
        scores: InsightScores {
            topic_clarity: coerce_score(scores.get("topicClarity")),
            publish_ready: coerce_score(scores.get("publishReady")),
            novelty: coerce_score(scores.get("novelty")),
        },
        formats: formats
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    })
}

/// Loose numeric coercion: numbers pass through, numeric strings parse,
/// booleans map to 0/1, everything else is 0. Clamped to `[0, 1]`.
fn coerce_score(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Null) => 0.0,
        _ => f64::NAN,
    };
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"Here are the insights:
[
  {"topic": "Deep work", "pillar": "craft", "hook": "h", "excerpt": "e",
   "scores": {"topicClarity": 0.9, "publishReady": 0.4, "novelty": 0.7},
   "formats": ["thread", "essay"]}
]
Hope that helps!"#;

    #[test]
    fn parses_array_embedded_in_prose() {
        let insights = parse_insights(VALID);
        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.topic, "Deep work");
        assert_eq!(insight.pillar.as_deref(), Some("craft"));
        assert_eq!(insight.formats, vec!["thread", "essay"]);
        assert!((insight.scores.topic_clarity - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unparseable_response_yields_nothing() {
        assert!(parse_insights("no array here").is_empty());
        assert!(parse_insights("[not json").is_empty());
        assert!(parse_insights("[1, 2, }").is_empty());
    }

    #[test]
    fn trailing_prose_with_stray_brackets_does_not_break_the_array() {
        let response = format!(
            "{VALID}\nThese work well as formats like [thread, essay]. Use [1] as a citation."
        );
        let insights = parse_insights(&response);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].topic, "Deep work");
    }

    #[test]
    fn first_complete_array_wins_over_later_ones() {
        let response = r#"[{"topic": "first", "hook": "h", "excerpt": "e", "scores": {}, "formats": []}]
Some commentary.
[{"topic": "second", "hook": "h", "excerpt": "e", "scores": {}, "formats": []}]"#;
        let insights = parse_insights(response);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].topic, "first");
    }

    #[test]
    fn brackets_inside_string_values_are_ignored() {
        let response = r#"[{"topic": "t", "hook": "uses ] and [ freely", "excerpt": "also \" quoted",
                           "scores": {}, "formats": []}] trailing ]"#;
        let insights = parse_insights(response);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].hook, "uses ] and [ freely");
    }

    #[test]
    fn elements_missing_required_fields_are_dropped() {
        let response = r#"[
          {"topic": "", "hook": "h", "excerpt": "e", "scores": {}, "formats": []},
          {"hook": "h", "excerpt": "e", "scores": {}, "formats": []},
          {"topic": "kept", "hook": "h", "excerpt": "e", "scores": {}, "formats": []},
          {"topic": "t", "hook": 5, "excerpt": "e", "scores": {}, "formats": []},
          {"topic": "t", "hook": "h", "excerpt": "e", "scores": "bad", "formats": []},
          {"topic": "t", "hook": "h", "excerpt": "e", "scores": {}, "formats": "bad"}
        ]"#;
        let insights = parse_insights(response);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].topic, "kept");
    }

    #[test]
    fn scores_are_coerced_and_clamped() {
        let response = r#"[
          {"topic": "t", "hook": "h", "excerpt": "e",
           "scores": {"topicClarity": "0.5", "publishReady": 7, "novelty": "garbage"},
           "formats": []}
        ]"#;
        let insights = parse_insights(response);
        let scores = insights[0].scores;
        assert!((scores.topic_clarity - 0.5).abs() < 1e-9);
        assert!((scores.publish_ready - 1.0).abs() < 1e-9, "clamped to 1");
        assert!((scores.novelty - 0.0).abs() < 1e-9, "NaN coerced to 0");
    }

    #[test]
    fn missing_pillar_becomes_none_and_formats_keep_strings_only() {
        let response = r#"[
          {"topic": "t", "pillar": null, "hook": "h", "excerpt": "e",
           "scores": {}, "formats": ["a", 1, null, "b"]}
        ]"#;
        let insights = parse_insights(response);
        assert_eq!(insights[0].pillar, None);
        assert_eq!(insights[0].formats, vec!["a", "b"]);
    }
}
