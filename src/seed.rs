//! Store seed files
//!
//! A seed file is a JSON [`StoreSnapshot`]. Loading it checks every record
//! up front so a broken mapping is reported at startup instead of on the
//! first inbound call.

use relay_transform::{FieldExtractor, Formula};
use relay_webhooks::{InMemoryStore, MappingDefinition, StoreSnapshot};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// A single invalid record in a seed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedProblem {
    /// `endpoint` or `mapping`
    pub record: &'static str,
    pub id: String,
    pub message: String,
}

impl fmt::Display for SeedProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.record, self.id, self.message)
    }
}

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read store file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {path} is not a valid snapshot: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store file has {} invalid record(s):\n  {}", .0.len(), join_problems(.0))]
    Invalid(Vec<SeedProblem>),
}

fn join_problems(problems: &[SeedProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// Read a snapshot without validating it
pub fn read_snapshot(path: &Path) -> Result<StoreSnapshot, SeedError> {
    let content = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SeedError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Check endpoints, path expressions and formulas.
///
/// Endpoints whose mapping is missing are only warned about: they answer
/// `NOT_FOUND` at request time, which is a valid configuration.
pub fn validate_snapshot(snapshot: &StoreSnapshot) -> Result<(), SeedError> {
    let mut problems = Vec::new();
    let extractor = FieldExtractor::new();

    let mut endpoint_ids = HashSet::new();
    for endpoint in &snapshot.endpoints {
        let problem = |message: String| SeedProblem {
            record: "endpoint",
            id: endpoint.id.clone(),
            message,
        };
        if !endpoint_ids.insert(endpoint.id.as_str()) {
            problems.push(problem("duplicate id".to_string()));
        }
        if let Err(e) = endpoint.validate() {
            problems.push(problem(e.to_string()));
        }
    }

    let mut mapping_ids = HashSet::new();
    for mapping in &snapshot.mappings {
        let problem = |message: String| SeedProblem {
            record: "mapping",
            id: mapping.id.clone(),
            message,
        };
        if !mapping_ids.insert(mapping.id.as_str()) {
            problems.push(problem("duplicate id".to_string()));
        }
        for (field, err) in extractor.validate(&mapping.incoming_fields) {
            problems.push(problem(format!("field `{field}`: {err}")));
        }
        match Formula::parse(&mapping.formula) {
            Ok(formula) => {
                let undeclared = undeclared_fields(mapping, &formula);
                if !undeclared.is_empty() {
                    warn!(
                        mapping = %mapping.id,
                        fields = ?undeclared,
                        "Formula reads fields the mapping never extracts"
                    );
                }
            }
            Err(e) => problems.push(problem(format!("formula: {e}"))),
        }
    }

    for endpoint in &snapshot.endpoints {
        if let Some(mapping_id) = &endpoint.mapping_id
            && !mapping_ids.contains(mapping_id.as_str())
        {
            warn!(endpoint = %endpoint.id, mapping = %mapping_id, "Endpoint references a missing mapping");
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SeedError::Invalid(problems))
    }
}

/// Names the formula reads that are not in the mapping's field list.
///
/// They always evaluate as absent.
pub fn undeclared_fields(mapping: &MappingDefinition, formula: &Formula) -> Vec<String> {
    formula
        .referenced_fields()
        .into_iter()
        .filter(|name| !mapping.incoming_fields.contains_key(name))
        .collect()
}

/// Read, validate and load a seed file into a fresh store
pub fn load_store(path: &Path) -> Result<InMemoryStore, SeedError> {
    let snapshot = read_snapshot(path)?;
    validate_snapshot(&snapshot)?;
    let store = InMemoryStore::from_snapshot(snapshot);
    info!(
        path = %path.display(),
        endpoints = store.endpoint_count(),
        mappings = store.mapping_count(),
        "Loaded mapping store"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_webhooks::WebhookEndpoint;
    use std::io::Write;

    fn snapshot() -> StoreSnapshot {
        StoreSnapshot {
            endpoints: vec![
                WebhookEndpoint::builder("sms", "https://example.com/hook")
                    .id("e1")
                    .mapping("m1")
                    .build(),
            ],
            mappings: vec![
                MappingDefinition::new("teams", "{ text: msg }")
                    .with_id("m1")
                    .with_field("msg", "$.text"),
            ],
        }
    }

    #[test]
    fn test_valid_snapshot() {
        assert!(validate_snapshot(&snapshot()).is_ok());
    }

    #[test]
    fn test_problems_name_the_record() {
        let mut snapshot = snapshot();
        snapshot.mappings.push(
            MappingDefinition::new("bad", "{ text: ")
                .with_id("m2")
                .with_field("x", "$[?("),
        );
        snapshot
            .endpoints
            .push(WebhookEndpoint::builder("ftp", "ftp://example.com").id("e2").build());
        snapshot.endpoints.push(snapshot.endpoints[0].clone());

        let Err(SeedError::Invalid(problems)) = validate_snapshot(&snapshot) else {
            panic!("expected invalid snapshot");
        };
        let described: Vec<String> = problems.iter().map(ToString::to_string).collect();

        assert_eq!(problems.len(), 4, "{described:?}");
        assert!(described.iter().any(|p| p.starts_with("endpoint e1: duplicate id")));
        assert!(described.iter().any(|p| p.starts_with("endpoint e2:")));
        assert!(described.iter().any(|p| p.starts_with("mapping m2: field `x`")));
        assert!(described.iter().any(|p| p.starts_with("mapping m2: formula:")));
    }

    #[test]
    fn test_dangling_mapping_is_allowed() {
        let mut snapshot = snapshot();
        snapshot.mappings.clear();
        assert!(validate_snapshot(&snapshot).is_ok());
    }

    #[test]
    fn test_undeclared_fields() {
        let mapping = MappingDefinition::new("sms", "{ text: msg + sender, ok: exists(msg) }")
            .with_field("msg", "$.text");
        let formula = Formula::parse(&mapping.formula).unwrap();

        assert_eq!(undeclared_fields(&mapping, &formula), vec!["sender"]);

        let mut snapshot = snapshot();
        snapshot.mappings.push(mapping.with_id("m2"));
        assert!(validate_snapshot(&snapshot).is_ok());
    }

    #[test]
    fn test_load_store_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&snapshot()).unwrap().as_bytes())
            .unwrap();

        let store = load_store(file.path()).unwrap();
        assert_eq!(store.endpoint_count(), 1);
        assert_eq!(store.mapping_count(), 1);
    }

    #[test]
    fn test_read_errors() {
        let missing = read_snapshot(Path::new("/nonexistent/store.json"));
        assert!(matches!(missing, Err(SeedError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(read_snapshot(file.path()), Err(SeedError::Parse { .. })));
    }
}
