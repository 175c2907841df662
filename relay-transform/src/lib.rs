//! Payload reshaping for the webhook relay
//!
//! - [`JsonPath`]: path expressions over JSON documents
//! - [`FieldExtractor`]: named first-match extraction with explicit absence
//! - [`formula`]: a sandboxed expression language with a step budget
//! - [`PayloadTransformer`]: runs a mapping's formula over extracted fields
//!
//! # Example
//!
//! ```rust
//! use relay_transform::PayloadTransformer;
//! use relay_webhooks::MappingDefinition;
//!
//! let mapping = MappingDefinition::new("teams", r#"{ text: "Message: " + msg }"#)
//!     .with_field("msg", "$.object.data.object.body");
//! let body = serde_json::json!({"object": {"data": {"object": {"body": "hi"}}}});
//!
//! let payload = PayloadTransformer::default().process(&body, &mapping).unwrap();
//! assert_eq!(payload, serde_json::json!({"text": "Message: hi"}));
//! ```

mod error;
mod extract;
pub mod formula;
mod path;
mod transformer;

pub use error::{EvalError, ParseError, PathError, TransformError};
pub use extract::{ExtractedFields, FieldExtractor, FieldValue, SAMPLE_VALUE};
pub use formula::Formula;
pub use path::JsonPath;
pub use transformer::PayloadTransformer;

/// Result type for transformation operations
pub type Result<T> = std::result::Result<T, TransformError>;
