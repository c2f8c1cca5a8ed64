//! Provisioning-tool backend references and parsed state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error validating a [`ProvisioningBackendRef`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackendRefError {
    #[error("root must not contain '.' or a newline: {0:?}")]
    InvalidRoot(String),
    #[error("workspace must not contain '.', '/' or a newline: {0:?}")]
    InvalidWorkspace(String),
}

/// Identifies one provisioning-tool state file: a root module plus a
/// workspace within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningBackendRef {
    pub root: String,
    pub workspace: String,
}

impl ProvisioningBackendRef {
    /// Default workspace name when none is supplied.
    pub const DEFAULT_WORKSPACE: &'static str = "default";

    /// Builds a validated ref. `workspace` defaults to `"default"` when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendRefError`] if `root` contains `.`/newline, or if
    /// `workspace` contains `.`, `/`, or a newline.
    pub fn new(root: impl Into<String>, workspace: Option<String>) -> Result<Self, BackendRefError> {
        let root = root.into();
        if root.contains('.') || root.contains('\n') {
            return Err(BackendRefError::InvalidRoot(root));
        }
        let workspace = workspace.unwrap_or_else(|| Self::DEFAULT_WORKSPACE.to_owned());
        if workspace.contains('.') || workspace.contains('/') || workspace.contains('\n') {
            return Err(BackendRefError::InvalidWorkspace(workspace));
        }
        Ok(Self { root, workspace })
    }

    /// The object-store key used by the object-store listing variant:
    /// `terraform-backends/<dotted root>/<workspace>.enc`.
    #[must_use]
    pub fn to_object_name(&self) -> String {
        let dotted_root = self.root.replace('/', ".");
        format!("terraform-backends/{dotted_root}/{}.enc", self.workspace)
    }

    /// Parses the object-store key produced by [`Self::to_object_name`] back
    /// into a ref. Returns `None` if the key doesn't match the pattern.
    #[must_use]
    pub fn from_object_name(name: &str) -> Option<Self> {
        let tail = name.strip_prefix("terraform-backends/")?;
        let tail = tail.strip_suffix(".enc")?;
        let (dotted_root, workspace) = tail.split_once('/')?;
        let root = dotted_root.replace('.', "/");
        Self::new(root, Some(workspace.to_owned())).ok()
    }
}

/// One output value inside a [`ProvisioningState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateOutput {
    #[serde(default)]
    pub sensitive: bool,
    pub value: serde_json::Value,
    #[serde(default)]
    pub r#type: Option<serde_json::Value>,
}

/// A module's resources within [`ProvisioningValues`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleValues {
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
    #[serde(default)]
    pub child_modules: Vec<ModuleValues>,
}

impl ModuleValues {
    fn resource_count(&self) -> usize {
        self.resources.len()
            + self
                .child_modules
                .iter()
                .map(Self::resource_count)
                .sum::<usize>()
    }
}

/// The `values` object inside [`ProvisioningState`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningValues {
    #[serde(default)]
    pub outputs: BTreeMap<String, StateOutput>,
    #[serde(default)]
    pub root_module: ModuleValues,
}

/// Parsed JSON state emitted by `terraform show -json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningState {
    pub format_version: String,
    #[serde(default)]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub values: ProvisioningValues,
}

/// Error retrieving a typed output from a [`ProvisioningState`].
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output '{0}' not found in provisioning state")]
    NotFound(String),
    #[error("output '{name}' could not be decoded: {reason}")]
    Invalid { name: String, reason: String },
}

impl ProvisioningState {
    /// `true` when the root module and every child module own zero resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.root_module.resource_count() == 0
    }

    /// Retrieves and decodes a named output.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::NotFound`] if the output is absent, or
    /// [`OutputError::Invalid`] if it fails to deserialize as `T`.
    pub fn output<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, OutputError> {
        let output = self
            .values
            .outputs
            .get(name)
            .ok_or_else(|| OutputError::NotFound(name.to_owned()))?;
        serde_json::from_value(output.value.clone()).map_err(|e| OutputError::Invalid {
            name: name.to_owned(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_ref_defaults_workspace() {
        let r = ProvisioningBackendRef::new("providers/aws", None).unwrap();
        assert_eq!(r.workspace, "default");
    }

    #[test]
    fn backend_ref_rejects_dot_in_root() {
        assert!(ProvisioningBackendRef::new("prov.aws", None).is_err());
    }

    #[test]
    fn object_name_round_trips() {
        let r = ProvisioningBackendRef::new("providers/aws", Some("dev".to_owned())).unwrap();
        let name = r.to_object_name();
        assert_eq!(name, "terraform-backends/providers.aws/dev.enc");
        assert_eq!(ProvisioningBackendRef::from_object_name(&name), Some(r));
    }

    #[test]
    fn empty_state_reports_empty() {
        let state = ProvisioningState {
            format_version: "1.0".to_owned(),
            terraform_version: None,
            values: ProvisioningValues::default(),
        };
        assert!(state.is_empty());
    }

    #[test]
    fn nonempty_state_reports_nonempty() {
        let mut state = ProvisioningState {
            format_version: "1.0".to_owned(),
            terraform_version: None,
            values: ProvisioningValues::default(),
        };
        state.values.root_module.resources.push(serde_json::json!({"type": "x"}));
        assert!(!state.is_empty());
    }

    #[test]
    fn output_not_found_is_reported() {
        let state = ProvisioningState {
            format_version: "1.0".to_owned(),
            terraform_version: None,
            values: ProvisioningValues::default(),
        };
        let err = state.output::<String>("missing").unwrap_err();
        assert!(matches!(err, OutputError::NotFound(_)));
    }
}
