//! Container and image identities.
//!
//! Every name is a pure function of the project namespace and the
//! sanitized sandbox name, so nothing here is ever persisted.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Label marking containers managed by this tool.
pub(crate) const MANAGED_LABEL: &str = "agent-sandbox.managed";

/// Label carrying the literal (unsanitized) sandbox name.
pub(crate) const NAME_LABEL: &str = "agent-sandbox.name";

/// Label carrying the project namespace.
pub(crate) const NAMESPACE_LABEL: &str = "agent-sandbox.namespace";

/// Label carrying the host path of the sandbox workspace.
pub(crate) const WORKSPACE_LABEL: &str = "agent-sandbox.workspace";

/// Prefix shared by all container and image names.
const NAME_PREFIX: &str = "sandbox-";

/// Hex characters of the path digest kept in the namespace.
const NAMESPACE_HASH_LEN: usize = 8;

/// Maximum length of the readable part of the namespace.
const NAMESPACE_LEAF_MAX: usize = 24;

/// Derive the namespace for a project root.
///
/// The canonical absolute path is hashed so that same-named projects in
/// different locations never share a namespace. The directory name is kept
/// in front of the hash for readability.
pub(crate) fn namespace(project_root: &Path) -> String {
    let canonical = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_os_str().as_encoded_bytes());
    let digest = hex::encode(hasher.finalize());

    let leaf = canonical
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().to_lowercase());
    let leaf = sanitize(&leaf);
    let leaf: String = leaf.chars().take(NAMESPACE_LEAF_MAX).collect();
    let leaf = leaf.trim_end_matches(['-', '.', '_']);

    format!("{leaf}-{}", &digest[..NAMESPACE_HASH_LEN])
}

/// Map an arbitrary sandbox name to a legal container identifier.
///
/// Legal identifiers start with an alphanumeric character followed by
/// alphanumerics, `_`, `.` or `-`. Already-legal names are returned as is.
pub(crate) fn sanitize(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if !out.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        out.insert(0, 'x');
    }
    out
}

/// Container name for a sandbox within a namespace.
pub(crate) fn container_name(namespace: &str, sandbox: &str) -> String {
    format!("{NAME_PREFIX}{namespace}-{}", sanitize(sandbox))
}

/// Image tag built for a sandbox within a namespace.
///
/// Image repositories must be lowercase and may not end in a separator.
pub(crate) fn image_name(namespace: &str, sandbox: &str) -> String {
    let repo: String = container_name(namespace, sandbox)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}:latest", repo.trim_end_matches('-'))
}

/// Labels attached to a sandbox container at creation.
pub(crate) fn labels(namespace: &str, sandbox: &str, workspace: &Path) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (NAME_LABEL.to_string(), sandbox.to_string()),
        (NAMESPACE_LABEL.to_string(), namespace.to_string()),
        (
            WORKSPACE_LABEL.to_string(),
            workspace.to_string_lossy().into_owned(),
        ),
    ])
}

/// Recover the sandbox name of a container.
///
/// The name label is authoritative. Parsing the container name is only a
/// fallback because sanitization is not reversible.
pub(crate) fn sandbox_name_from_container(
    container_name: &str,
    labels: &HashMap<String, String>,
) -> String {
    if let Some(name) = labels.get(NAME_LABEL) {
        return name.clone();
    }

    let name = container_name.trim_start_matches('/');
    if let Some(namespace) = labels.get(NAMESPACE_LABEL) {
        if let Some(rest) = name
            .strip_prefix(NAME_PREFIX)
            .and_then(|r| r.strip_prefix(namespace.as_str()))
            .and_then(|r| r.strip_prefix('-'))
        {
            return rest.to_string();
        }
    }
    name.strip_prefix(NAME_PREFIX).unwrap_or(name).to_string()
}
