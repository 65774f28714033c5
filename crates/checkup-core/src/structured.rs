//! Typed views over the JSON text columns.
//!
//! Questionnaire answers and checklists have been written in more than one
//! shape over the application's lifetime. Each shape is resolved here, once,
//! into a tagged union; nothing downstream inspects raw JSON to guess which
//! form it holds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Which typed view a structured column must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnShape {
  Answers,
  Checklist,
  /// Any well-formed JSON document.
  Json,
}

// ─── Answers ─────────────────────────────────────────────────────────────────

/// One entry of the legacy answer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAnswer {
  pub question_id: String,
  pub answer:      String,
}

/// Questionnaire answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", content = "value", rename_all = "snake_case")]
pub enum Answers {
  /// `{"q1": "yes", "q2": "sometimes"}`
  StringMap(BTreeMap<String, String>),
  /// `{"answers": [{"questionId": "q1", "answer": "yes"}]}`
  Legacy(Vec<LegacyAnswer>),
  Null,
}

impl Answers {
  pub fn resolve(value: &Value) -> Result<Self, String> {
    match value {
      Value::Null => Ok(Self::Null),
      Value::Object(obj) => {
        if let Some(list) = obj.get("answers")
          && obj.len() == 1
          && list.is_array()
        {
          let entries: Vec<LegacyAnswer> = serde_json::from_value(list.clone())
            .map_err(|e| format!("legacy answer list: {e}"))?;
          return Ok(Self::Legacy(entries));
        }
        let mut map = BTreeMap::new();
        for (question, answer) in obj {
          let Value::String(answer) = answer else {
            return Err(format!("answer to {question:?} is not a string"));
          };
          map.insert(question.clone(), answer.clone());
        }
        Ok(Self::StringMap(map))
      }
      other => Err(format!("expected an object or null, found {}", kind_of(other))),
    }
  }
}

// ─── Checklist ───────────────────────────────────────────────────────────────

/// A symptom checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", content = "value", rename_all = "snake_case")]
pub enum Checklist {
  /// `["headache", "fatigue"]`: the ticked items.
  Items(Vec<String>),
  /// `{"headache": true, "fatigue": false}`
  Flags(BTreeMap<String, bool>),
  Null,
}

impl Checklist {
  pub fn resolve(value: &Value) -> Result<Self, String> {
    match value {
      Value::Null => Ok(Self::Null),
      Value::Array(_) => serde_json::from_value(value.clone())
        .map(Self::Items)
        .map_err(|e| format!("checklist items: {e}")),
      Value::Object(_) => serde_json::from_value(value.clone())
        .map(Self::Flags)
        .map_err(|e| format!("checklist flags: {e}")),
      other => Err(format!("expected an array, object or null, found {}", kind_of(other))),
    }
  }
}

// ─── Column validation ───────────────────────────────────────────────────────

/// Check that a stored column value resolves to `shape`.
///
/// Text is parsed as JSON; SQL `NULL` is accepted for every shape. Bundles
/// produced by older tooling may carry the document inline rather than as
/// text, so an inline object or array is validated as-is.
pub fn validate_column(
  table: &str,
  column: &str,
  shape: ColumnShape,
  value: &Value,
) -> Result<()> {
  let fail = |reason: String| Error::UnrecognisedShape {
    table:  table.to_owned(),
    column: column.to_owned(),
    reason,
  };

  let parsed = match value {
    Value::Null => return Ok(()),
    Value::String(text) => {
      serde_json::from_str::<Value>(text).map_err(|e| fail(format!("not JSON: {e}")))?
    }
    Value::Object(_) | Value::Array(_) => value.clone(),
    other => return Err(fail(format!("unexpected {}", kind_of(other)))),
  };

  match shape {
    ColumnShape::Answers => Answers::resolve(&parsed).map(drop).map_err(fail),
    ColumnShape::Checklist => Checklist::resolve(&parsed).map(drop).map_err(fail),
    ColumnShape::Json => Ok(()),
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn string_map_answers() {
    let answers = Answers::resolve(&json!({ "q1": "yes", "q2": "no" })).unwrap();
    let Answers::StringMap(map) = answers else { panic!("expected a string map") };
    assert_eq!(map.get("q2").map(String::as_str), Some("no"));
  }

  #[test]
  fn legacy_answers_keep_question_order() {
    let legacy = Answers::resolve(&json!({
      "answers": [
        { "questionId": "q1", "answer": "yes" },
        { "questionId": "q2", "answer": "no" },
      ]
    }))
    .unwrap();
    let Answers::Legacy(entries) = legacy else { panic!("expected legacy answers") };
    let ids: Vec<&str> = entries.iter().map(|e| e.question_id.as_str()).collect();
    assert_eq!(ids, vec!["q1", "q2"]);
  }

  #[test]
  fn numeric_answers_are_rejected() {
    assert!(Answers::resolve(&json!({ "q1": 3 })).is_err());
    assert!(Answers::resolve(&json!([1, 2])).is_err());
  }

  #[test]
  fn checklist_forms_are_told_apart() {
    let items = Checklist::resolve(&json!(["fatigue", "headache"])).unwrap();
    assert_eq!(items, Checklist::Items(vec!["fatigue".into(), "headache".into()]));

    let flags = Checklist::resolve(&json!({ "fatigue": true, "cough": false })).unwrap();
    assert!(matches!(flags, Checklist::Flags(ref f) if f.len() == 2 && f["fatigue"]));
    assert!(Checklist::resolve(&json!("fatigue")).is_err());
  }

  #[test]
  fn validate_accepts_text_and_null() {
    validate_column("requirements", "answers", ColumnShape::Answers, &json!("{\"q1\":\"yes\"}"))
      .unwrap();
    validate_column("requirements", "answers", ColumnShape::Answers, &Value::Null).unwrap();
    validate_column("courses", "metadata", ColumnShape::Json, &json!("[1,2,3]")).unwrap();
  }

  #[test]
  fn validate_names_the_offending_column() {
    let err = validate_column(
      "symptom_checks",
      "checklist",
      ColumnShape::Checklist,
      &json!("\"just a string\""),
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("symptom_checks.checklist"), "{msg}");
  }

  #[test]
  fn validate_rejects_malformed_json_text() {
    assert!(
      validate_column("audit_logs", "detail", ColumnShape::Json, &json!("{not json"))
        .is_err()
    );
  }
}
