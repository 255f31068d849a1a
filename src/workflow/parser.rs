//! Definitions Parser
//!
//! Loads workflow definitions from a YAML file of the form
//! `workflows: [ ... ]` and validates them as a batch.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::Workflow;
use super::validator::validate_definitions;
use crate::error::DefinitionError;

#[derive(Serialize, Deserialize, Debug, Default)]
struct DefinitionsFile {
    #[serde(default)]
    workflows: Vec<Workflow>,
}

/// Parses and validates definitions from YAML text.
pub fn parse_definitions(
    yaml: &str,
    known_types: &[String],
) -> Result<Vec<Workflow>, DefinitionError> {
    let file: DefinitionsFile = serde_yaml::from_str(yaml)?;
    validate_definitions(&file.workflows, known_types).map_err(DefinitionError::Invalid)?;
    Ok(file.workflows)
}

/// Loads workflow definitions from a YAML file.
///
/// `known_types` lists the registered trigger types; a definition naming any
/// other type is rejected.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::workflow::load_definitions;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflows = load_definitions("workflows.yaml", &["interval".to_string()])?;
///     println!("Loaded {} definitions", workflows.len());
///     Ok(())
/// }
/// ```
pub fn load_definitions(
    path: impl AsRef<Path>,
    known_types: &[String],
) -> Result<Vec<Workflow>, DefinitionError> {
    let path = path.as_ref();
    info!("Loading workflow definitions from: {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.display().to_string(),
        source,
    })?;
    debug!("YAML content loaded ({} bytes)", yaml.len());

    let workflows = parse_definitions(&yaml, known_types)?;
    info!("Loaded {} workflow definitions", workflows.len());
    Ok(workflows)
}

/// Writes definitions back to a YAML file.
pub fn save_definitions(
    workflows: &[Workflow],
    path: impl AsRef<Path>,
) -> Result<(), DefinitionError> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(&DefinitionsFile {
        workflows: workflows.to_vec(),
    })?;
    fs::write(path, yaml).map_err(|source| DefinitionError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!("Definitions saved to: {}", path.display());
    Ok(())
}
