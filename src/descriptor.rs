//! # Secret Descriptors
//!
//! Parses the mount's `objects` attribute (a YAML list) into typed,
//! validated descriptors grouped by backend. Validation covers object
//! naming, ARN/region consistency, alias uniqueness, file-name safety
//! under the path-translation rule, and per-file permission overrides.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::arn::Arn;
use crate::constants::DEFAULT_PATH_TRANSLATION;

/// The two cloud backends a descriptor can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SSM Parameter Store (`ssmparameter`)
    ParameterStore,
    /// Secrets Manager (`secretsmanager`)
    SecretsManager,
}

impl BackendKind {
    fn parse(object_type: &str) -> Result<Self> {
        match object_type {
            "secretsmanager" => Ok(Self::SecretsManager),
            "ssmparameter" => Ok(Self::ParameterStore),
            other => Err(anyhow!(
                "unknown objectType '{other}', expected 'secretsmanager' or 'ssmparameter'"
            )),
        }
    }

    fn from_arn_service(service: &str) -> Option<Self> {
        match service {
            "secretsmanager" => Some(Self::SecretsManager),
            "ssm" => Some(Self::ParameterStore),
            _ => None,
        }
    }
}

/// Path separator handling for derived file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTranslation {
    /// Replace every separator with this character
    Char(char),
    /// Keep names verbatim; separators are rejected unless the driver
    /// performs the writes
    Disabled,
}

impl PathTranslation {
    /// Parse the `pathTranslation` attribute: empty selects the default
    /// `_`, the literal `False` disables translation, anything else must be
    /// a single character.
    pub fn parse(attr: &str) -> Result<Self> {
        let trimmed = attr.trim();
        if trimmed.is_empty() {
            return Ok(Self::Char(DEFAULT_PATH_TRANSLATION));
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Ok(Self::Disabled);
        }
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Self::Char(c)),
            _ => Err(anyhow!(
                "pathTranslation must be a single character or 'False', got '{trimmed}'"
            )),
        }
    }
}

/// One JMESPath sub-extraction from a descriptor's JSON value.
#[derive(Debug, Clone)]
pub struct JmesEntry {
    pub path: String,
    pub alias: String,
    pub mode: u32,
}

/// A single requested artifact with its fetch parameters, validated and
/// ready for the backends.
#[derive(Debug, Clone)]
pub struct SecretDescriptor {
    /// Position in the request's object list; drives output ordering
    pub index: usize,
    pub kind: BackendKind,
    pub object_name: String,
    /// Resolved on-disk file name; doubles as the rotation bookkeeping id
    pub alias: String,
    pub object_version: Option<String>,
    pub version_stage: Option<String>,
    pub mode: u32,
    pub jmes_entries: Vec<JmesEntry>,
    failover_name: Option<String>,
    failover_version: Option<String>,
}

impl SecretDescriptor {
    /// Object name to use when operating on the region at `region_idx`.
    /// The failover view substitutes the alternate name only on the
    /// secondary region.
    #[must_use]
    pub fn name_for_region(&self, region_idx: usize) -> &str {
        if region_idx > 0 {
            self.failover_name.as_deref().unwrap_or(&self.object_name)
        } else {
            &self.object_name
        }
    }

    /// Version pin to use when operating on the region at `region_idx`.
    #[must_use]
    pub fn version_for_region(&self, region_idx: usize) -> Option<&str> {
        if region_idx > 0 && self.kind == BackendKind::ParameterStore && self.failover_name.is_some()
        {
            self.failover_version.as_deref()
        } else {
            self.object_version.as_deref()
        }
    }
}

/// Descriptors grouped by backend, in request order within each group.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    pub parameters: Vec<SecretDescriptor>,
    pub secrets: Vec<SecretDescriptor>,
}

impl DescriptorSet {
    /// Total number of descriptors across both backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len() + self.secrets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.secrets.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecretObject {
    object_name: Option<String>,
    object_type: Option<String>,
    object_alias: Option<String>,
    object_version: Option<String>,
    object_version_label: Option<String>,
    file_permission: Option<String>,
    #[serde(default)]
    jmes_path: Vec<RawJmesEntry>,
    failover_object: Option<RawFailoverObject>,
    backup_arn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJmesEntry {
    path: Option<String>,
    object_alias: Option<String>,
    file_permission: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFailoverObject {
    object_name: Option<String>,
    object_version: Option<String>,
}

/// Parse an octal mode string such as `"0640"`. Anything outside
/// `0..=0o777` is rejected.
pub fn parse_octal_mode(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| anyhow!("invalid octal file permission '{raw}'"))?;
    if mode > 0o777 {
        bail!("file permission '{raw}' is outside the range 0 to 0777");
    }
    Ok(mode)
}

/// Parse and validate the mount object list.
///
/// `regions` is the resolved region list (primary first); ARN-form object
/// names must name one of them. `driver_writes` loosens the separator rule
/// because the driver writes relative paths itself.
pub fn parse_descriptors(
    objects_yaml: &str,
    regions: &[String],
    translation: PathTranslation,
    default_mode: u32,
    driver_writes: bool,
) -> Result<DescriptorSet> {
    let raw_objects: Vec<RawSecretObject> =
        serde_yaml::from_str(objects_yaml).context("Failed to parse objects attribute as YAML")?;
    if raw_objects.is_empty() {
        bail!("objects attribute lists no secrets to mount");
    }

    let mut seen_aliases: HashSet<String> = HashSet::new();
    let mut set = DescriptorSet::default();

    for (index, raw) in raw_objects.into_iter().enumerate() {
        let descriptor = build_descriptor(
            index,
            raw,
            regions,
            translation,
            default_mode,
            driver_writes,
            &mut seen_aliases,
        )
        .with_context(|| format!("object at index {index} is invalid"))?;
        match descriptor.kind {
            BackendKind::ParameterStore => set.parameters.push(descriptor),
            BackendKind::SecretsManager => set.secrets.push(descriptor),
        }
    }
    Ok(set)
}

fn build_descriptor(
    index: usize,
    raw: RawSecretObject,
    regions: &[String],
    translation: PathTranslation,
    default_mode: u32,
    driver_writes: bool,
    seen_aliases: &mut HashSet<String>,
) -> Result<SecretDescriptor> {
    let object_name = raw
        .object_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("objectName is required"))?
        .to_string();

    let arn = Arn::parse(&object_name);
    let kind = resolve_kind(&object_name, raw.object_type.as_deref(), arn.as_ref())?;

    if let Some(arn) = &arn {
        if !regions.iter().any(|region| region == &arn.region) {
            bail!(
                "objectName '{}' names region {} which is neither the mount region nor the failover region",
                object_name,
                arn.region
            );
        }
    }

    let base_name = match raw.object_alias.as_deref().map(str::trim) {
        Some(alias) if !alias.is_empty() => alias.to_string(),
        _ => arn
            .as_ref()
            .map_or_else(|| object_name.clone(), |a| a.resource_name().to_string()),
    };
    let alias = resolve_file_name(&base_name, translation, driver_writes)?;
    if !seen_aliases.insert(alias.clone()) {
        bail!("duplicate object alias '{alias}'");
    }

    let mode = match raw.file_permission.as_deref() {
        Some(raw_mode) => parse_octal_mode(raw_mode)?,
        None => default_mode,
    };

    let jmes_entries = build_jmes_entries(
        raw.jmes_path,
        mode,
        translation,
        driver_writes,
        seen_aliases,
    )?;

    let (failover_name, failover_version) = resolve_failover_view(
        &kind,
        raw.failover_object,
        raw.backup_arn,
        regions,
    )?;

    if raw.object_version_label.is_some() && raw.object_version.is_some() {
        bail!("objectVersion and objectVersionLabel are mutually exclusive");
    }

    Ok(SecretDescriptor {
        index,
        kind,
        object_name,
        alias,
        object_version: raw
            .object_version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        version_stage: raw
            .object_version_label
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        mode,
        jmes_entries,
        failover_name,
        failover_version,
    })
}

fn resolve_kind(
    object_name: &str,
    object_type: Option<&str>,
    arn: Option<&Arn>,
) -> Result<BackendKind> {
    let declared = object_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(BackendKind::parse)
        .transpose()?;
    let derived = arn.and_then(|a| BackendKind::from_arn_service(&a.service));

    match (declared, derived) {
        (Some(declared), Some(derived)) if declared != derived => Err(anyhow!(
            "objectType contradicts the service encoded in ARN '{object_name}'"
        )),
        (Some(kind), _) => Ok(kind),
        (None, Some(kind)) => Ok(kind),
        (None, None) => Err(anyhow!(
            "objectType is required when objectName '{object_name}' is not an ARN"
        )),
    }
}

fn build_jmes_entries(
    raw_entries: Vec<RawJmesEntry>,
    parent_mode: u32,
    translation: PathTranslation,
    driver_writes: bool,
    seen_aliases: &mut HashSet<String>,
) -> Result<Vec<JmesEntry>> {
    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw in raw_entries {
        let path = raw
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("jmesPath entry is missing a path"))?
            .to_string();
        let alias_raw = raw
            .object_alias
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| anyhow!("jmesPath entry for '{path}' is missing an objectAlias"))?;
        let alias = resolve_file_name(alias_raw, translation, driver_writes)?;
        if !seen_aliases.insert(alias.clone()) {
            bail!("duplicate object alias '{alias}'");
        }
        let mode = match raw.file_permission.as_deref() {
            Some(raw_mode) => parse_octal_mode(raw_mode)?,
            None => parent_mode,
        };
        entries.push(JmesEntry { path, alias, mode });
    }
    Ok(entries)
}

fn resolve_failover_view(
    kind: &BackendKind,
    failover_object: Option<RawFailoverObject>,
    backup_arn: Option<String>,
    regions: &[String],
) -> Result<(Option<String>, Option<String>)> {
    match kind {
        BackendKind::ParameterStore => {
            if backup_arn.is_some() {
                bail!("backupArn applies to secretsmanager objects; use failoverObject for parameters");
            }
            let Some(failover) = failover_object else {
                return Ok((None, None));
            };
            if regions.len() < 2 {
                bail!("failoverObject requires a failoverRegion on the mount");
            }
            let name = failover
                .object_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| anyhow!("failoverObject is missing an objectName"))?
                .to_string();
            if let Some(arn) = Arn::parse(&name) {
                if arn.region != regions[1] {
                    bail!(
                        "failoverObject '{name}' names region {} instead of the failover region {}",
                        arn.region,
                        regions[1]
                    );
                }
            }
            let version = failover
                .object_version
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            Ok((Some(name), version))
        }
        BackendKind::SecretsManager => {
            if failover_object.is_some() {
                bail!("failoverObject applies to parameters; use backupArn for secretsmanager objects");
            }
            let Some(backup) = backup_arn.map(|a| a.trim().to_string()).filter(|a| !a.is_empty())
            else {
                return Ok((None, None));
            };
            if regions.len() < 2 {
                bail!("backupArn requires a failoverRegion on the mount");
            }
            if let Some(arn) = Arn::parse(&backup) {
                if arn.region != regions[1] {
                    bail!(
                        "backupArn '{backup}' names region {} instead of the failover region {}",
                        arn.region,
                        regions[1]
                    );
                }
            }
            Ok((Some(backup), None))
        }
    }
}

/// Resolve the on-disk file name for a base name under the translation
/// rule. A single leading separator is stripped first; traversal segments
/// are rejected in every mode.
fn resolve_file_name(
    base: &str,
    translation: PathTranslation,
    driver_writes: bool,
) -> Result<String> {
    let stripped = base.strip_prefix('/').unwrap_or(base);
    if stripped.is_empty() {
        bail!("object name '{base}' leaves an empty file name");
    }

    let name = match translation {
        PathTranslation::Char(c) => stripped.replace('/', &c.to_string()),
        PathTranslation::Disabled => {
            if stripped.contains('/') && !driver_writes {
                bail!(
                    "file name '{base}' contains path separators and path translation is disabled"
                );
            }
            stripped.to_string()
        }
    };

    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            bail!("file name '{base}' contains an invalid path segment");
        }
    }
    Ok(name)
}
