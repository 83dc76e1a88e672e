//! Deterministic names (application names, index entries) and best-effort
//! unique ones (branches, checkout directories).

/// Kubernetes object name limit.
pub const MAX_NAME_LENGTH: usize = 63;

/// Length of the random token appended to branch and directory names.
pub const SUFFIX_LENGTH: usize = 8;

/// Returns a random lowercase alphanumeric token.
///
/// Collision avoidance only; not suitable for anything security related.
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LENGTH)
        .collect()
}

/// Maps arbitrary text onto DNS-1123 label characters.
pub fn sanitize_label(value: &str) -> String {
    let mapped: String = value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Throwaway branch for one publisher run, e.g. `api-payload-1a2b3c4d`.
pub fn branch_name(component: &str, role: &str, suffix: &str) -> String {
    format!("{}-{}-{}", sanitize_label(component), role, suffix)
}

/// ArgoCD application name: `namespace-component[-branch]`, capped at 63 chars.
///
/// When too long, the `namespace-component` prefix is cut so the branch suffix
/// survives verbatim; separators left dangling by the cut are stripped.
pub fn application_name(namespace: &str, component: &str, branch: Option<&str>) -> String {
    let prefix = sanitize_label(&format!("{}-{}", namespace, component));
    let mut suffix = branch
        .map(sanitize_label)
        .filter(|b| !b.is_empty())
        .map(|b| format!("-{}", b))
        .unwrap_or_default();

    // A suffix that cannot fit even alone loses its tail.
    if suffix.len() >= MAX_NAME_LENGTH {
        suffix.truncate(MAX_NAME_LENGTH - 1);
    }

    let name = if prefix.len() + suffix.len() > MAX_NAME_LENGTH {
        let keep = MAX_NAME_LENGTH - suffix.len();
        let cut = prefix[..keep].trim_end_matches('-');
        format!("{}{}", cut, suffix)
    } else {
        format!("{}{}", prefix, suffix)
    };

    name.trim_matches('-').to_string()
}

/// Index entry for an application file, relative to the overlay directory.
pub fn application_entry(layer: &str, application: &str) -> String {
    format!("{}/{}.yaml", layer, application)
}
