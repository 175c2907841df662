//! Builds outbound payloads from mappings

use crate::formula::{DEFAULT_STEP_BUDGET, Formula};
use crate::{ExtractedFields, FieldExtractor, TransformError};
use relay_webhooks::MappingDefinition;
use serde_json::Value;
use tracing::debug;

/// Evaluates mapping formulas.
///
/// [`process`](Self::process) runs against a real inbound body and
/// [`test`](Self::test) against placeholder fields; both go through
/// [`transform`](Self::transform). Callers that need the two halves apart
/// use [`fields`](Self::fields) or [`sample_fields`](Self::sample_fields)
/// followed by `transform`.
#[derive(Debug, Clone, Copy)]
pub struct PayloadTransformer {
    step_budget: usize,
    extractor: FieldExtractor,
}

impl Default for PayloadTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_BUDGET)
    }
}

impl PayloadTransformer {
    pub fn new(step_budget: usize) -> Self {
        Self {
            step_budget,
            extractor: FieldExtractor::new(),
        }
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    /// Parse and evaluate `formula` over `fields`
    pub fn transform(&self, formula: &str, fields: &ExtractedFields) -> Result<Value, TransformError> {
        let formula = Formula::parse(formula)?;
        let payload = formula.evaluate(fields, self.step_budget)?;
        debug!(fields = fields.len(), "Formula evaluated");
        Ok(payload)
    }

    /// The mapping's fields as found in `body`
    pub fn fields(&self, body: &Value, mapping: &MappingDefinition) -> ExtractedFields {
        self.extractor.extract(body, &mapping.incoming_fields)
    }

    /// The mapping's fields, each set to the sample placeholder
    pub fn sample_fields(&self, mapping: &MappingDefinition) -> ExtractedFields {
        ExtractedFields::sample(&mapping.incoming_fields)
    }

    /// Extract the mapping's fields from `body`, then transform
    pub fn process(&self, body: &Value, mapping: &MappingDefinition) -> Result<Value, TransformError> {
        self.transform(&mapping.formula, &self.fields(body, mapping))
    }

    /// Transform with every field set to the sample placeholder
    pub fn test(&self, mapping: &MappingDefinition) -> Result<Value, TransformError> {
        self.transform(&mapping.formula, &self.sample_fields(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvalError;
    use serde_json::json;

    fn teams_mapping() -> MappingDefinition {
        MappingDefinition::new("OpenPhone to Teams", r#"{ text: "Message: " + msg }"#)
            .with_field("msg", "$.object.data.object.body")
    }

    #[test]
    fn test_process() {
        let body = json!({"object": {"data": {"object": {"body": "hi"}}}});
        let payload = PayloadTransformer::default()
            .process(&body, &teams_mapping())
            .unwrap();
        assert_eq!(payload, json!({"text": "Message: hi"}));
        assert_eq!(payload.to_string(), r#"{"text":"Message: hi"}"#);
    }

    #[test]
    fn test_process_with_absent_field() {
        let payload = PayloadTransformer::default()
            .process(&json!({}), &teams_mapping())
            .unwrap();
        assert_eq!(payload, json!({"text": "Message: "}));
    }

    #[test]
    fn test_mode_uses_placeholders() {
        let payload = PayloadTransformer::default().test(&teams_mapping()).unwrap();
        assert_eq!(payload, json!({"text": "Message: sample_value"}));
    }

    #[test]
    fn test_process_and_test_share_evaluation() {
        let transformer = PayloadTransformer::default();
        let mapping = teams_mapping();
        let body = json!({"object": {"data": {"object": {"body": "sample_value"}}}});
        assert_eq!(
            transformer.process(&body, &mapping).unwrap(),
            transformer.test(&mapping).unwrap()
        );
    }

    #[test]
    fn test_errors() {
        let transformer = PayloadTransformer::new(10);
        let fields = ExtractedFields::new();

        assert!(matches!(
            transformer.transform("{ text: ", &fields),
            Err(TransformError::Parse(_))
        ));
        assert!(matches!(
            transformer.transform("[1,2,3,4,5,6,7,8,9,10,11]", &fields),
            Err(TransformError::Eval(EvalError::BudgetExceeded(10)))
        ));
        assert!(matches!(
            transformer.transform("missing", &fields),
            Err(TransformError::Eval(EvalError::NotSerializable(_)))
        ));
    }
}
