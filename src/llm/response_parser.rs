//! Tolerant conversion of raw model output into an [`AiDecision`].
//!
//! Models answer in several shapes: fenced JSON, bare JSON, the older flat
//! layout (`action` as a string with sibling `coordinates` and
//! `type_information`), or loose prose. Everything is reconciled into the
//! canonical record here; nothing untyped leaves this module. Parsing is
//! total: unusable input becomes a `wait` decision with status in-progress.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::agent_engine::state::{ActionKind, ActionSpec, ActionTarget, AiDecision, DecisionStatus};
use crate::perception::types::NormalizedPoint;

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*(\{.*?\})\s*```").expect("fenced regex must compile")
});
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\baction\b["']?\s*[:=]?\s*["']?([A-Za-z_\-]+)"#)
        .expect("action regex must compile")
});
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\b["']?\s*[:=]\s*["']?([A-Za-z_\-]+)"#)
        .expect("type regex must compile")
});
static COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcoordinates?\b["']?\s*[:=]?\s*"?\["#)
        .expect("coordinate regex must compile")
});
static TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:text|type_information)\b["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("text regex must compile")
});
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bdescription\b["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("description regex must compile")
});
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bstatus\b["']?\s*[:=]\s*["']?([A-Za-z_]+)"#)
        .expect("status regex must compile")
});
static COMPLETED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bwhether_completed\b["']?\s*[:=]?\s*["']?([A-Za-z0-9_]+)"#)
        .expect("completion regex must compile")
});
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex must compile"));

/// Parses a raw model reply. Never fails.
pub fn parse(raw: &str) -> AiDecision {
    if let Some(record) = extract_record(raw) {
        return decision_from_record(&record);
    }
    if let Some(decision) = scrape_fields(raw) {
        tracing::debug!("reply was not JSON; fields recovered by pattern match");
        return decision;
    }
    tracing::warn!(raw = %raw, "unparseable model reply; defaulting to wait");
    AiDecision::default()
}

/// Fenced block first, then a reply that is itself a JSON object.
fn extract_record(raw: &str) -> Option<Map<String, Value>> {
    for caps in FENCED_RE.captures_iter(raw) {
        if let Some(obj) = caps.get(1).and_then(|m| parse_object(m.as_str())) {
            return Some(obj);
        }
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return parse_object(trimmed);
    }
    None
}

/// First JSON value in `text`, if it is a non-empty object. Trailing prose is ignored.
fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) if !map.is_empty() => Some(map),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "embedded JSON did not parse");
            None
        }
        _ => None,
    }
}

fn decision_from_record(record: &Map<String, Value>) -> AiDecision {
    let status = match record.get("status").and_then(Value::as_str) {
        Some(s) => DecisionStatus::parse(s),
        None if record.get("whether_completed").is_some_and(is_truthy) => DecisionStatus::Completed,
        None => DecisionStatus::InProgress,
    };

    let description = first_non_empty(record, &["description", "current_status", "reasoning"]);
    let target = first_non_empty(record, &["target", "element_info"]);
    let sibling_text = first_payload(record);
    let sibling_coords = record.get("coordinates").or_else(|| record.get("coordinate"));

    let action = match record.get("action") {
        Some(Value::String(name)) if !name.trim().is_empty() => build_action(
            name,
            sibling_coords.map(parse_target).unwrap_or(ActionTarget::None),
            sibling_text,
        ),
        Some(Value::Object(obj)) if !obj.is_empty() => {
            let name = obj.get("type").and_then(Value::as_str).unwrap_or("wait");
            let target = obj
                .get("coordinates")
                .or_else(|| obj.get("coordinate"))
                .or(sibling_coords)
                .map(parse_target)
                .unwrap_or(ActionTarget::None);
            let mut text = first_payload(obj);
            if text.is_empty() {
                text = sibling_text;
            }
            build_action(name, target, text)
        }
        _ => ActionSpec::wait(),
    };

    AiDecision {
        status,
        description,
        target,
        action,
    }
}

fn build_action(name: &str, target: ActionTarget, text: String) -> ActionSpec {
    let kind = ActionKind::from_name(name).unwrap_or_else(|| {
        tracing::warn!(action = %name, "unknown action name; treating as pointer move");
        ActionKind::Move
    });
    ActionSpec::new(kind, target, text)
}

/// Shape-based target detection: a list whose first element is itself a
/// list is a two-point span, a flat list is one point. String-encoded
/// lists are decoded first; anything unusable yields no target.
fn parse_target(value: &Value) -> ActionTarget {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(inner @ (Value::Array(_) | Value::Object(_))) => parse_target(&inner),
            _ => ActionTarget::None,
        },
        Value::Array(items) => match items.first() {
            Some(Value::Array(_)) => {
                let points: Vec<NormalizedPoint> = items.iter().filter_map(point_from).collect();
                match points.as_slice() {
                    [start, end, ..] => ActionTarget::Span {
                        start: *start,
                        end: *end,
                    },
                    [only] => ActionTarget::Point(*only),
                    [] => ActionTarget::None,
                }
            }
            _ => point_from(value).map(ActionTarget::Point).unwrap_or(ActionTarget::None),
        },
        Value::Object(_) => point_from(value)
            .map(ActionTarget::Point)
            .unwrap_or(ActionTarget::None),
        _ => ActionTarget::None,
    }
}

fn point_from(value: &Value) -> Option<NormalizedPoint> {
    let (x, y) = match value {
        Value::Array(xy) if xy.len() >= 2 => (number(&xy[0])?, number(&xy[1])?),
        Value::Object(obj) => (number(obj.get("x")?)?, number(obj.get("y")?)?),
        _ => return None,
    };
    Some(NormalizedPoint::new(x, y))
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "completed" | "done"
        ),
        _ => false,
    }
}

fn first_non_empty(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Text payloads are pasted verbatim; blank ones count as absent.
fn first_payload(map: &Map<String, Value>) -> String {
    ["text", "type_information"]
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

// ── Unstructured fallback ────────────────────────────────────────────────────

fn scrape_fields(raw: &str) -> Option<AiDecision> {
    let action_name = ACTION_RE
        .captures(raw)
        .or_else(|| TYPE_RE.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let target = scrape_target(raw);
    let text = quoted_capture(&TEXT_RE, raw);
    let description = quoted_capture(&DESCRIPTION_RE, raw);
    let status = STATUS_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| DecisionStatus::parse(m.as_str()));
    let completed = COMPLETED_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .is_some_and(|m| is_truthy(&Value::String(m.as_str().to_string())));

    let found_anything = action_name.is_some()
        || target.is_some()
        || text.is_some()
        || status.is_some()
        || completed;
    if !found_anything {
        return None;
    }

    let status = status.unwrap_or(if completed {
        DecisionStatus::Completed
    } else {
        DecisionStatus::InProgress
    });
    let action = match action_name {
        Some(name) => build_action(
            &name,
            target.unwrap_or(ActionTarget::None),
            text.unwrap_or_default(),
        ),
        None => ActionSpec::wait(),
    };

    Some(AiDecision {
        status,
        description: description.unwrap_or_default(),
        target: String::new(),
        action,
    })
}

fn quoted_capture(re: &Regex, raw: &str) -> Option<String> {
    let caps = re.captures(raw)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

/// Finds the bracketed list after a `coordinate(s)` key and decodes it.
fn scrape_target(raw: &str) -> Option<ActionTarget> {
    let m = COORD_RE.find(raw)?;
    // The match ends just past the opening bracket.
    let open = m.end() - 1;
    let slice = balanced_brackets(&raw[open..])?;

    if let Ok(value) = serde_json::from_str::<Value>(slice) {
        let target = parse_target(&value);
        if target.point_count() > 0 {
            return Some(target);
        }
    }

    let nums: Vec<f64> = NUMBER_RE
        .find_iter(slice)
        .filter_map(|n| n.as_str().parse::<f64>().ok())
        .collect();
    let nested = slice[1..].contains('[');
    match nums.as_slice() {
        [x1, y1, x2, y2, ..] if nested => Some(ActionTarget::Span {
            start: NormalizedPoint::new(*x1, *y1),
            end: NormalizedPoint::new(*x2, *y2),
        }),
        [x, y, ..] => Some(ActionTarget::Point(NormalizedPoint::new(*x, *y))),
        _ => None,
    }
}

/// `text` starts with `[`; returns the slice up to its matching `]`.
fn balanced_brackets(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
