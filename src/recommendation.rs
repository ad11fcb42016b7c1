// Turns free-text assistant replies into typed recommendations.
//
// The assistant answers in prose that may carry one JSON object. Everything here is pure and
// total: malformed, truncated or partial payloads come back as `None` / plain text and are
// never surfaced as errors.

use crate::catalog::parse_leading_number;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// Wire keys the assistant is prompted to produce
const RANKED_KEY: &str = "top_3_asic_models";
const METRICS_KEY: &str = "key_metrics";
// Flat shape: one object per model, best first
const LIST_KEY: &str = "recommendations";
const MODEL_KEY: &str = "model";
const TRADE_OFFS_KEY: &str = "summary_of_trade_offs";
const DURATION_KEYS: &[&str] = &["recommended_rental_duration", "recommended_duration"];
const BUDGET_KEYS: &[&str] = &["budget_envelope", "budget"];
const ERROR_KEY: &str = "error";

const COST_KEYS: &[&str] = &["cost_per_th", "cost_per_unit"];
const ENERGY_KEYS: &[&str] = &["joules_per_th", "energy_per_unit", "power_efficiency"];
const PROFIT_KEYS: &[&str] = &["estimated_daily_profit", "estimated_profit"];
const TAGS_KEY: &str = "tags";
const POOL_KEYS: &[&str] = &["pool_advice", "recommended_pool", "pool"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub cost_per_unit: Option<f64>,
    pub energy_per_unit: Option<f64>,
    pub estimated_daily_profit: Option<f64>,
    pub tags: BTreeSet<String>,
    pub pool_advice: Option<String>,
}

// A validated recommendation: every ranked model has a metrics entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub ranked_model_names: Vec<String>,
    pub metrics_by_model: BTreeMap<String, ModelMetrics>,
    pub trade_offs_by_model: BTreeMap<String, String>,
    pub recommended_duration: Option<String>,
    pub budget_envelope: Option<String>,
}

impl Recommendation {
    pub fn top_pick(&self) -> Option<&str> {
        self.ranked_model_names.first().map(String::as_str)
    }

    pub fn metrics_for(&self, model: &str) -> Option<&ModelMetrics> {
        self.metrics_by_model.get(model)
    }

    pub fn trade_off_for(&self, model: &str) -> Option<&str> {
        self.trade_offs_by_model.get(model).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReplyContent {
    Recommendation(Recommendation),
    // The assistant declined, e.g. {"error": "Budget is required"}
    Notice(String),
    PlainText,
}

// What a chat bubble needs: the prose line and whatever structured content came with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub summary: Option<String>,
    pub content: ReplyContent,
}

impl AssistantReply {
    pub fn recommendation(&self) -> Option<&Recommendation> {
        match &self.content {
            ReplyContent::Recommendation(recommendation) => Some(recommendation),
            _ => None,
        }
    }
}

pub fn extract(raw_text: &str) -> Option<Recommendation> {
    let (start, end) = find_json_span(raw_text)?;
    let value = parse_span(&raw_text[start..end])?;
    validate(&value)
}

pub fn parse_reply(raw_text: &str) -> AssistantReply {
    let plain = || AssistantReply {
        summary: non_empty(raw_text.trim()),
        content: ReplyContent::PlainText,
    };

    let Some((start, end)) = find_json_span(raw_text) else {
        return plain();
    };
    let Some(value) = parse_span(&raw_text[start..end]) else {
        return plain();
    };

    let summary = non_empty(strip_code_fence(&raw_text[..start]));
    if let Some(recommendation) = validate(&value) {
        return AssistantReply {
            summary,
            content: ReplyContent::Recommendation(recommendation),
        };
    }
    if let Some(notice) = value.get(ERROR_KEY).and_then(Value::as_str) {
        return AssistantReply {
            summary,
            content: ReplyContent::Notice(notice.trim().to_string()),
        };
    }
    plain()
}

// Byte range of the first balanced top-level `{...}` in `text`.
//
// Nested objects are kept whole; braces inside JSON string literals (including escaped quotes)
// do not count.
pub fn find_json_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + c.len_utf8()));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_span(span: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(span) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "assistant payload is not valid JSON");
            None
        }
    }
}

fn validate(value: &Value) -> Option<Recommendation> {
    let object = value.as_object()?;

    let (ranked_model_names, metrics_by_model) = match object.get(RANKED_KEY) {
        Some(ranked) => ranked_with_metrics(ranked, object.get(METRICS_KEY)?)?,
        None => recommendation_list(object.get(LIST_KEY)?)?,
    };
    if ranked_model_names.is_empty() {
        return None;
    }

    // Keyed by the ranked name so lookups agree with metrics_by_model
    let trade_offs_by_model: BTreeMap<String, String> = object
        .get(TRADE_OFFS_KEY)
        .and_then(Value::as_object)
        .map(|trade_offs| {
            ranked_model_names
                .iter()
                .filter_map(|name| {
                    let caveat = display_text(lookup_model(trade_offs, name)?)?;
                    Some((name.clone(), caveat))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Recommendation {
        ranked_model_names,
        metrics_by_model,
        trade_offs_by_model,
        recommended_duration: first_text(object, DURATION_KEYS),
        budget_envelope: first_text(object, BUDGET_KEYS),
    })
}

type RankedMetrics = (Vec<String>, BTreeMap<String, ModelMetrics>);

// {"top_3_asic_models": [...], "key_metrics": {name: {...}}}
fn ranked_with_metrics(ranked: &Value, metrics: &Value) -> Option<RankedMetrics> {
    let ranked_model_names = ranked
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::trim).and_then(non_empty))
        .collect::<Option<Vec<String>>>()?;

    let metrics = metrics.as_object()?;
    let mut metrics_by_model = BTreeMap::new();
    for name in &ranked_model_names {
        let entry = lookup_model(metrics, name)?.as_object()?;
        metrics_by_model.insert(name.clone(), parse_metrics(entry));
    }
    Some((ranked_model_names, metrics_by_model))
}

// {"recommendations": [{"model": ..., "cost_per_th": ..., ...}]}, ranked in array order
fn recommendation_list(list: &Value) -> Option<RankedMetrics> {
    let mut ranked_model_names = Vec::new();
    let mut metrics_by_model = BTreeMap::new();
    for item in list.as_array()? {
        let entry = item.as_object()?;
        let name = entry
            .get(MODEL_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .and_then(non_empty)?;
        metrics_by_model.insert(name.clone(), parse_metrics(entry));
        ranked_model_names.push(name);
    }
    Some((ranked_model_names, metrics_by_model))
}

// Exact key first; models often come back with different casing between the list and the map
fn lookup_model<'a>(metrics: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    metrics.get(name).or_else(|| {
        metrics
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn parse_metrics(entry: &Map<String, Value>) -> ModelMetrics {
    ModelMetrics {
        cost_per_unit: first_number(entry, COST_KEYS),
        energy_per_unit: first_number(entry, ENERGY_KEYS),
        estimated_daily_profit: first_number(entry, PROFIT_KEYS),
        tags: entry.get(TAGS_KEY).map(parse_tags).unwrap_or_default(),
        pool_advice: first_text(entry, POOL_KEYS),
    }
}

fn parse_tags(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|tag| non_empty(tag.trim()))
            .collect(),
        Value::String(s) => s.split(',').filter_map(|tag| non_empty(tag.trim())).collect(),
        _ => BTreeSet::new(),
    }
}

fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_leading_number(s),
            _ => None,
        })
}

fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(display_text)
}

// Advisory fields are free text, but the assistant sometimes answers with numbers or objects
fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s.trim()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(display_text).collect();
            non_empty(&parts.join(", "))
        }
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .filter_map(|(key, value)| Some(format!("{}: {}", key, display_text(value)?)))
                .collect();
            non_empty(&parts.join(", "))
        }
        Value::Null => None,
    }
}

fn strip_code_fence(prefix: &str) -> &str {
    let trimmed = prefix.trim_end();
    let without_lang = trimmed
        .strip_suffix("json")
        .or_else(|| trimmed.strip_suffix("JSON"))
        .unwrap_or(trimmed);
    match without_lang.strip_suffix("```") {
        Some(rest) => rest.trim(),
        None => trimmed.trim(),
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const FULL_REPLY: &str = r#"Based on your budget, here are my picks:
```json
{
  "top_3_asic_models": ["Antminer S21", "Whatsminer M60", "Avalon A1466"],
  "key_metrics": {
    "Antminer S21": {"cost_per_th": 0.052, "joules_per_th": 17.5, "estimated_daily_profit": "$4.10", "tags": ["High Efficiency", "Premium"], "pool_advice": "Use a PPS+ pool"},
    "Whatsminer M60": {"cost_per_th": "0.048", "joules_per_th": 18.5, "estimated_daily_profit": 3.7, "tags": "Budget-Friendly, Mining Optimized"},
    "Avalon A1466": {"cost_per_th": 0.041, "joules_per_th": 21.5, "estimated_daily_profit": 3.1, "tags": []}
  },
  "summary_of_trade_offs": {
    "Antminer S21": "Highest upfront rental cost, lowest power draw",
    "Avalon A1466": "Cheapest, but {noisy} and hot"
  },
  "recommended_rental_duration": "30 days",
  "budget_envelope": {"min": 120, "max": 150}
}
```
Let me know if you want alternatives."#;

    #[test]
    fn test_minimal_example() {
        let raw = r#"Here you go: {"top_3_asic_models":["A"],"key_metrics":{"A":{"cost_per_th":1}},"summary_of_trade_offs":{"A":"..."}}"#;
        let recommendation = extract(raw).unwrap();

        assert_eq!(recommendation.ranked_model_names, vec!["A"]);
        assert_eq!(recommendation.metrics_for("A").unwrap().cost_per_unit, Some(1.0));
        assert_eq!(recommendation.trade_off_for("A"), Some("..."));
        assert!(recommendation.recommended_duration.is_none());
    }

    #[test]
    fn test_full_reply() {
        let reply = parse_reply(FULL_REPLY);
        assert_eq!(
            reply.summary.as_deref(),
            Some("Based on your budget, here are my picks:")
        );

        let recommendation = reply.recommendation().unwrap();
        assert_eq!(recommendation.top_pick(), Some("Antminer S21"));
        assert_eq!(recommendation.ranked_model_names.len(), 3);

        let s21 = recommendation.metrics_for("Antminer S21").unwrap();
        assert_eq!(s21.cost_per_unit, Some(0.052));
        assert_eq!(s21.energy_per_unit, Some(17.5));
        assert_eq!(s21.estimated_daily_profit, Some(4.10));
        assert!(s21.tags.contains("Premium"));
        assert_eq!(s21.pool_advice.as_deref(), Some("Use a PPS+ pool"));

        let m60 = recommendation.metrics_for("Whatsminer M60").unwrap();
        assert_eq!(m60.cost_per_unit, Some(0.048));
        assert_eq!(m60.tags.len(), 2);
        assert!(m60.pool_advice.is_none());

        assert_eq!(
            recommendation.trade_off_for("Avalon A1466"),
            Some("Cheapest, but {noisy} and hot")
        );
        assert!(recommendation.trade_off_for("Whatsminer M60").is_none());
        assert_eq!(recommendation.recommended_duration.as_deref(), Some("30 days"));
        assert_eq!(recommendation.budget_envelope.as_deref(), Some("max: 150, min: 120"));
    }

    #[test_case(""; "empty")]
    #[test_case("Sorry, I don't understand."; "plain prose")]
    #[test_case(r#"Here: {"top_3_asic_models": ["A"], "key_metrics": {"A": {"#; "truncated json")]
    #[test_case(r#"{"top_3_asic_models": ["A"], "key_metrics": {}}"#; "missing metrics entry")]
    #[test_case(r#"{"key_metrics": {"A": {}}}"#; "missing ranked list")]
    #[test_case(r#"{"top_3_asic_models": [], "key_metrics": {}}"#; "empty ranked list")]
    #[test_case(r#"{"top_3_asic_models": [42], "key_metrics": {"42": {}}}"#; "non-string model name")]
    #[test_case(r#"{"top_3_asic_models": ["A"], "key_metrics": {"A": "cheap"}}"#; "metrics entry not an object")]
    #[test_case(r#"{"top_3_asic_models": ["A"], "key_metrics": ["A"]}"#; "metrics not a map")]
    #[test_case(r#"Use {braces} like {"top_3_asic_models": ["A"], "key_metrics": {"A": {}}}"#; "first span is not json")]
    #[test_case(r#"{"recommendations": [{"cost_per_th": "0.05"}]}"#; "list entry without model")]
    #[test_case(r#"{"recommendations": [{"model": "A"}, {"model": 7}]}"#; "list entry with non-string model")]
    #[test_case(r#"{"recommendations": []}"#; "empty list")]
    #[test_case(r#"{"recommendations": {"model": "A"}}"#; "list not an array")]
    #[test_case("}}}{{{"; "unbalanced")]
    #[test_case("{\"a\": \"\\\"}\"}"; "escaped quote inside string")]
    fn test_extract_returns_none(raw: &str) {
        assert!(extract(raw).is_none());
    }

    #[test_case(
        r#"{"recommendations":[{"model":"Antminer S19","cost_per_th":"0.05","power_efficiency":"29.5","estimated_profit":"4.1"}]}"#,
        vec!["Antminer S19"],
        Some(0.05), Some(29.5), Some(4.1);
        "flat list as the agent is prompted to answer"
    )]
    #[test_case(
        r#"Here you go: {"recommendations":[{"model":" Whatsminer M60 ","cost_per_th":0.048},{"model":"Avalon A1466","joules_per_th":21.5}]}"#,
        vec!["Whatsminer M60", "Avalon A1466"],
        Some(0.048), None, None;
        "flat list keeps array order"
    )]
    #[test_case(
        r#"{"top_3_asic_models":["A"],"key_metrics":{"A":{"cost_per_th":1,"joules_per_th":"20 J/TH"}},"recommendations":[{"model":"B"}]}"#,
        vec!["A"],
        Some(1.0), Some(20.0), None;
        "ranked shape wins over flat list"
    )]
    fn test_extract_shapes(
        raw: &str,
        ranked: Vec<&str>,
        top_cost: Option<f64>,
        top_energy: Option<f64>,
        top_profit: Option<f64>,
    ) {
        let recommendation = extract(raw).unwrap();
        assert_eq!(recommendation.ranked_model_names, ranked);
        for name in &recommendation.ranked_model_names {
            assert!(recommendation.metrics_for(name).is_some());
        }

        let top = recommendation
            .metrics_for(recommendation.top_pick().unwrap())
            .unwrap();
        assert_eq!(top.cost_per_unit, top_cost);
        assert_eq!(top.energy_per_unit, top_energy);
        assert_eq!(top.estimated_daily_profit, top_profit);
    }

    #[test]
    fn test_trade_offs_follow_ranked_names() {
        let raw = r#"{"top_3_asic_models": ["antminer s21"],
                      "key_metrics": {"Antminer S21": {"cost_per_th": 0.05}},
                      "summary_of_trade_offs": {"Antminer S21": "Loud", "Other Model": "Unranked"}}"#;
        let recommendation = extract(raw).unwrap();

        assert_eq!(recommendation.trade_off_for("antminer s21"), Some("Loud"));
        assert_eq!(recommendation.trade_offs_by_model.len(), 1);
    }

    #[test]
    fn test_deeply_nested_payload_is_absorbed() {
        let depth = 10_000;
        let raw = format!("deep: {}{}", "{\"a\":".repeat(depth), "}".repeat(depth));
        assert!(extract(&raw).is_none());
        assert_eq!(parse_reply(&raw).content, ReplyContent::PlainText);
    }

    #[test]
    fn test_span_ignores_braces_in_strings() {
        let text = r#"note {"a": "}{", "b": {"c": "\"}"}} trailing }"#;
        let (start, end) = find_json_span(text).unwrap();
        assert_eq!(&text[start..end], r#"{"a": "}{", "b": {"c": "\"}"}}"#);
    }

    #[test]
    fn test_span_handles_multibyte_text() {
        let text = "Voilà → {\"é\": \"ü\"} fin";
        let (start, end) = find_json_span(text).unwrap();
        assert_eq!(&text[start..end], "{\"é\": \"ü\"}");
    }

    #[test]
    fn test_model_lookup_ignores_case() {
        let raw = r#"{"top_3_asic_models": ["antminer s21"], "key_metrics": {"Antminer S21": {"joules_per_th": "17.5 J/TH"}}}"#;
        let recommendation = extract(raw).unwrap();
        assert_eq!(
            recommendation.metrics_for("antminer s21").unwrap().energy_per_unit,
            Some(17.5)
        );
    }

    #[test]
    fn test_error_payload_becomes_notice() {
        let reply = parse_reply(r#"```json
{"error": "Budget is required"}
```"#);
        assert_eq!(reply.summary, None);
        assert_eq!(
            reply.content,
            ReplyContent::Notice("Budget is required".to_string())
        );
    }

    #[test]
    fn test_invalid_payload_falls_back_to_plain_text() {
        let raw = r#"I think {"top_3_asic_models": ["A"]} is best"#;
        let reply = parse_reply(raw);
        assert_eq!(reply.content, ReplyContent::PlainText);
        assert_eq!(reply.summary.as_deref(), Some(raw));
    }

    #[test]
    fn test_plain_reply_keeps_text() {
        let reply = parse_reply("  Sorry, I don't understand.  ");
        assert_eq!(reply.summary.as_deref(), Some("Sorry, I don't understand."));
        assert!(reply.recommendation().is_none());

        assert_eq!(parse_reply("   ").summary, None);
    }
}
