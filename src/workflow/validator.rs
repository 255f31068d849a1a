//! Definition Validation
//!
//! Checks a batch of workflow definitions before any of them is saved:
//! - every definition has a key and a trigger type
//! - explicit ids are unique
//! - at most one definition per key is enabled
//! - the trigger type is registered

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use super::model::Workflow;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyKey { index: usize },
    EmptyType { key: String },
    DuplicateId(u64),
    MultipleEnabled { key: String },
    UnknownTrigger { key: String, trigger_type: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey { index } => write!(f, "Workflow definition #{} has no key", index),
            Self::EmptyType { key } => write!(f, "Workflow '{}' has no trigger type", key),
            Self::DuplicateId(id) => write!(f, "Duplicate workflow id: {}", id),
            Self::MultipleEnabled { key } => {
                write!(f, "More than one version of '{}' is enabled", key)
            }
            Self::UnknownTrigger { key, trigger_type } => write!(
                f,
                "Workflow '{}' uses unknown trigger type '{}'",
                key, trigger_type
            ),
        }
    }
}

/// Validates a batch of definitions against the registered trigger types.
///
/// Collects every problem instead of stopping at the first one.
pub fn validate_definitions(
    workflows: &[Workflow],
    known_types: &[String],
) -> Result<(), Vec<ValidationError>> {
    info!("Validating {} workflow definitions", workflows.len());

    let mut errors = Vec::new();
    let mut seen_ids: HashSet<u64> = HashSet::new();
    let mut enabled_per_key: HashMap<&str, usize> = HashMap::new();

    for (index, workflow) in workflows.iter().enumerate() {
        if workflow.key.trim().is_empty() {
            errors.push(ValidationError::EmptyKey { index });
            continue;
        }

        if workflow.id != 0 && !seen_ids.insert(workflow.id) {
            errors.push(ValidationError::DuplicateId(workflow.id));
        }

        if workflow.trigger_type.trim().is_empty() {
            errors.push(ValidationError::EmptyType {
                key: workflow.key.clone(),
            });
        } else if !known_types.contains(&workflow.trigger_type) {
            errors.push(ValidationError::UnknownTrigger {
                key: workflow.key.clone(),
                trigger_type: workflow.trigger_type.clone(),
            });
        }

        if workflow.enabled {
            let count = enabled_per_key.entry(workflow.key.as_str()).or_insert(0);
            *count += 1;
            if *count == 2 {
                errors.push(ValidationError::MultipleEnabled {
                    key: workflow.key.clone(),
                });
            }
        }

        debug!("Checked definition {}", workflow.label());
    }

    if errors.is_empty() {
        info!("Definitions validated successfully");
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["interval".to_string()]
    }

    #[test]
    fn test_valid_definitions() {
        let workflows = vec![
            Workflow::new("a", "interval").with_id(1).enabled(true),
            Workflow::new("a", "interval").with_id(2),
            Workflow::new("b", "interval"),
        ];
        assert!(validate_definitions(&workflows, &known()).is_ok());
    }

    #[test]
    fn test_empty_key() {
        let workflows = vec![Workflow::new("  ", "interval")];
        let errors = validate_definitions(&workflows, &known()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::EmptyKey { index: 0 }]);
    }

    #[test]
    fn test_duplicate_ids() {
        let workflows = vec![
            Workflow::new("a", "interval").with_id(3),
            Workflow::new("b", "interval").with_id(3),
        ];
        let errors = validate_definitions(&workflows, &known()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateId(3)]);
    }

    #[test]
    fn test_multiple_enabled_versions() {
        let workflows = vec![
            Workflow::new("a", "interval").enabled(true),
            Workflow::new("a", "interval").enabled(true),
            Workflow::new("a", "interval").enabled(true),
        ];
        let errors = validate_definitions(&workflows, &known()).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::MultipleEnabled { key: "a".into() }]
        );
    }

    #[test]
    fn test_unknown_and_empty_types() {
        let workflows = vec![Workflow::new("a", "webhook"), Workflow::new("b", "")];
        let errors = validate_definitions(&workflows, &known()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("unknown trigger type 'webhook'"));
        assert_eq!(errors[1], ValidationError::EmptyType { key: "b".into() });
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ValidationError::EmptyKey { index: 0 }.to_string(),
            "Workflow definition #0 has no key"
        );
        assert_eq!(
            ValidationError::DuplicateId(3).to_string(),
            "Duplicate workflow id: 3"
        );
    }
}
