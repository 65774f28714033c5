//! The `{success, message, details}` shape handed to callers.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
  pub success: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
}

impl OperationReport {
  pub fn ok<T: Serialize>(
    message: impl Into<String>,
    details: &T,
  ) -> Result<Self, serde_json::Error> {
    Ok(Self {
      success: true,
      message: message.into(),
      details: Some(serde_json::to_value(details)?),
    })
  }

  /// Report a failure with operator-facing text for `kind`.
  ///
  /// The raw error text is attached only when `include_error` is set, which
  /// callers reserve for development builds.
  pub fn failure(kind: ErrorKind, error: impl Display, include_error: bool) -> Self {
    let details = if include_error {
      json!({ "kind": kind, "error": error.to_string() })
    } else {
      json!({ "kind": kind })
    };
    Self {
      success: false,
      message: kind.operator_message().to_owned(),
      details: Some(details),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn failure_hides_raw_error_by_default() {
    let r = OperationReport::failure(
      ErrorKind::Connection,
      "no such table: users (SELECT * FROM users)",
      false,
    );
    let text = serde_json::to_string(&r).unwrap();
    assert!(!r.success);
    assert!(!text.contains("SELECT"));
    assert!(text.contains("connection"));
  }

  #[test]
  fn failure_includes_raw_error_in_development() {
    let r = OperationReport::failure(ErrorKind::NotFound, "backup abc not found", true);
    assert_eq!(r.details.unwrap()["error"], "backup abc not found");
  }
}
