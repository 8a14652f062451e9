//! # JMESPath Sub-Extraction
//!
//! Derives additional artifacts from a fetched secret by evaluating each
//! descriptor's JMESPath entries against the secret's JSON value. Every
//! entry must resolve to a string; sub-artifacts inherit the parent's
//! position and version for rotation purposes.

use anyhow::{anyhow, bail, Result};

use crate::backend::SecretArtifact;
use crate::descriptor::SecretDescriptor;

/// Evaluate a descriptor's JMESPath entries against its fetched value.
///
/// Returns one artifact per entry. The parent value must be valid JSON and
/// each path must land on a string; anything else is an input error for
/// that descriptor.
pub fn sub_artifacts(
    descriptor: &SecretDescriptor,
    parent: &SecretArtifact,
) -> Result<Vec<SecretArtifact>> {
    if descriptor.jmes_entries.is_empty() {
        return Ok(Vec::new());
    }

    let text = std::str::from_utf8(&parent.data).map_err(|_| {
        anyhow!(
            "secret {} is not UTF-8 and cannot be used with jmesPath",
            descriptor.object_name
        )
    })?;
    let document = jmespath::Variable::from_json(text).map_err(|err| {
        anyhow!(
            "secret {} is not valid JSON: {err}",
            descriptor.object_name
        )
    })?;

    let mut artifacts = Vec::with_capacity(descriptor.jmes_entries.len());
    for entry in &descriptor.jmes_entries {
        let expression = jmespath::compile(&entry.path)
            .map_err(|err| anyhow!("invalid JMESPath expression '{}': {err}", entry.path))?;
        let result = expression
            .search(document.clone())
            .map_err(|err| anyhow!("evaluating '{}' failed: {err}", entry.path))?;

        let Some(value) = result.as_string() else {
            if result.is_null() {
                bail!(
                    "JMESPath expression '{}' matches nothing in secret {}",
                    entry.path,
                    descriptor.object_name
                );
            }
            bail!(
                "JMESPath expression '{}' in secret {} must select a string",
                entry.path,
                descriptor.object_name
            );
        };

        artifacts.push(SecretArtifact {
            index: descriptor.index,
            file_name: entry.alias.clone(),
            mode: entry.mode,
            data: value.clone().into_bytes(),
        });
    }
    Ok(artifacts)
}
