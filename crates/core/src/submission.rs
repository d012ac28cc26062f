//! Submission validation: raw request fields -> a complete submission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CalcError;

/// Message returned when any required field is missing or empty.
pub const MISSING_FIELDS_MESSAGE: &str =
    "Missing required fields: project_id, branch_type, formula_version, inputs";

/// A submission as received, before validation. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDraft {
    pub project_id: Option<String>,
    pub branch_type: Option<String>,
    pub formula_version: Option<String>,
    pub inputs: Option<Value>,
}

/// A validated submission: all four fields present and non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSubmission {
    pub project_id: String,
    pub branch_type: String,
    pub formula_version: String,
    pub inputs: Map<String, Value>,
}

impl RunDraft {
    /// Extract the draft fields from an arbitrary JSON body.
    ///
    /// A string field holding a non-string value counts as missing.
    pub fn from_body(body: &Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        RunDraft {
            project_id: text("project_id"),
            branch_type: text("branch_type"),
            formula_version: text("formula_version"),
            inputs: body.get("inputs").cloned(),
        }
    }

    /// Check presence of all four fields. Only `""` counts as empty.
    ///
    /// `inputs` must be a JSON object; an empty object is accepted.
    pub fn validate(self) -> Result<RunSubmission, CalcError> {
        let non_empty = |field: Option<String>| field.filter(|s| !s.is_empty());

        let (Some(project_id), Some(branch_type), Some(formula_version), Some(inputs)) = (
            non_empty(self.project_id),
            non_empty(self.branch_type),
            non_empty(self.formula_version),
            self.inputs.filter(|v| !v.is_null()),
        ) else {
            return Err(CalcError::validation(MISSING_FIELDS_MESSAGE));
        };

        let Value::Object(inputs) = inputs else {
            return Err(CalcError::validation("inputs must be a JSON object"));
        };

        Ok(RunSubmission {
            project_id,
            branch_type,
            formula_version,
            inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn full() -> Value {
        json!({
            "project_id": "p1",
            "branch_type": "urban",
            "formula_version": "v1",
            "inputs": {"x": 1},
        })
    }

    #[test]
    fn complete_body_validates() {
        let submission = RunDraft::from_body(&full()).validate().unwrap();
        assert_eq!(submission.project_id, "p1");
        assert_eq!(submission.branch_type, "urban");
        assert_eq!(submission.formula_version, "v1");
        assert_eq!(submission.inputs.get("x"), Some(&json!(1)));
    }

    #[test]
    fn each_missing_field_is_rejected() {
        for field in ["project_id", "branch_type", "formula_version", "inputs"] {
            let mut body = full();
            body.as_object_mut().unwrap().remove(field);
            let err = RunDraft::from_body(&body).validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "field {field}");
            assert_eq!(err.to_string(), MISSING_FIELDS_MESSAGE);
        }
    }

    #[test]
    fn empty_strings_are_missing() {
        let mut body = full();
        body["branch_type"] = json!("");
        assert!(RunDraft::from_body(&body).validate().is_err());

        let mut body = full();
        body["formula_version"] = json!("");
        let err = RunDraft::from_body(&body).validate().unwrap_err();
        assert_eq!(err.to_string(), MISSING_FIELDS_MESSAGE);
    }

    #[test]
    fn whitespace_strings_are_present() {
        let mut body = full();
        body["project_id"] = json!("   ");
        let submission = RunDraft::from_body(&body).validate().unwrap();
        assert_eq!(submission.project_id, "   ");
    }

    #[test]
    fn null_inputs_are_missing() {
        let mut body = full();
        body["inputs"] = Value::Null;
        let err = RunDraft::from_body(&body).validate().unwrap_err();
        assert_eq!(err.to_string(), MISSING_FIELDS_MESSAGE);
    }

    #[test]
    fn non_object_inputs_rejected() {
        let mut body = full();
        body["inputs"] = json!([1, 2, 3]);
        let err = RunDraft::from_body(&body).validate().unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "inputs must be a JSON object");
    }

    #[test]
    fn empty_inputs_object_accepted() {
        let mut body = full();
        body["inputs"] = json!({});
        let submission = RunDraft::from_body(&body).validate().unwrap();
        assert!(submission.inputs.is_empty());
    }

    #[test]
    fn non_string_project_id_is_missing() {
        let mut body = full();
        body["project_id"] = json!(42);
        assert!(RunDraft::from_body(&body).validate().is_err());
    }
}
