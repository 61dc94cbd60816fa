// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Definition fingerprints
//!
//! Uses BLAKE3 over the serialized task list. A run remembers the
//! fingerprint it started with so a resume against an edited graph is
//! refused instead of silently mixing two definitions.

use blake3::Hasher;

use crate::errors::GateflowError;
use crate::pipeline::TaskSpec;

/// Incremental hasher for task definitions
pub struct DefinitionHasher {
    hasher: Hasher,
}

impl DefinitionHasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash one task, including its resolved retry policy and edges
    pub fn hash_task(&mut self, task: &TaskSpec) -> Result<(), GateflowError> {
        let json = serde_json::to_string(task)?;
        self.hasher.update(&(json.len() as u64).to_le_bytes());
        self.hasher.update(json.as_bytes());
        Ok(())
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for DefinitionHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of a task list, order-sensitive
pub fn fingerprint(tasks: &[TaskSpec]) -> Result<String, GateflowError> {
    let mut hasher = DefinitionHasher::new();
    for task in tasks {
        hasher.hash_task(task)?;
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TaskKind;

    fn task(id: &str, model: &str) -> TaskSpec {
        TaskSpec {
            id: id.into(),
            description: None,
            kind: TaskKind::Transform {
                model: model.into(),
            },
            depends_on: vec![],
            retry: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let tasks = vec![task("a", "m1"), task("b", "m2")];
        assert_eq!(fingerprint(&tasks).unwrap(), fingerprint(&tasks).unwrap());
        assert_eq!(fingerprint(&tasks).unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_definition() {
        let original = vec![task("a", "m1")];
        let edited = vec![task("a", "m2")];
        assert_ne!(fingerprint(&original).unwrap(), fingerprint(&edited).unwrap());
    }
}
