//! The change request flowing unmodified through one populate or delete run.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PropagateError, Result};
use crate::naming::sanitize_label;

/// Deployment layer selecting which repository pair a change lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Infrastructure,
    Services,
    Applications,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Infrastructure => "infrastructure",
            Layer::Services => "services",
            Layer::Applications => "applications",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = PropagateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "infrastructure" => Ok(Layer::Infrastructure),
            "services" => Ok(Layer::Services),
            "applications" => Ok(Layer::Applications),
            _ => Err(PropagateError::InvalidLayer(s.to_string())),
        }
    }
}

/// Helm chart wrapped by a generated umbrella chart in the payload repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmChart {
    pub name: String,
    pub version: String,
    pub repository: String,
    /// Local value-override files, rewritten under the chart's key.
    pub value_files: Vec<PathBuf>,
}

/// Where the component's deployment content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Local directory copied verbatim into the payload repository.
    Directory(PathBuf),
    /// Zip archive fetched over HTTP(S) and extracted into the payload repository.
    Archive { url: String },
    Helm(HelmChart),
}

/// One ArgoCD `ignoreDifferences` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoreDifference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_pointers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jq_path_expressions: Vec<String>,
}

/// A single "install X in namespace N" / "remove X" event.
///
/// Built once per invocation through [`ChangeRequestBuilder`] and only ever
/// passed by shared reference afterwards.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub component: String,
    pub namespace: String,
    pub namespace_scope: bool,
    pub layer: Layer,
    /// Destination cluster name; `None` targets the in-cluster server.
    pub server_name: Option<String>,
    /// Payload path override, relative to the layer's payload base path.
    pub application_path: Option<String>,
    /// Required for populate, ignored by delete.
    pub content: Option<ContentSource>,
    /// Payload base branch override; also suffixes the application name.
    pub branch: Option<String>,
    pub cascading_delete: bool,
    pub auto_merge: bool,
    pub rate_limited: bool,
    pub wait_for_blocked_merge: bool,
    pub ignore_differences: Vec<IgnoreDifference>,
}

impl ChangeRequest {
    pub fn builder(
        component: impl Into<String>,
        namespace: impl Into<String>,
        layer: Layer,
    ) -> ChangeRequestBuilder {
        ChangeRequestBuilder::new(component.into(), namespace.into(), layer)
    }

    /// Cluster overlay directory name inside the control repository.
    pub fn server_or_default(&self) -> &str {
        self.server_name.as_deref().unwrap_or("default")
    }
}

/// Builder for [`ChangeRequest`].
#[derive(Debug, Clone)]
pub struct ChangeRequestBuilder {
    inner: ChangeRequest,
}

impl ChangeRequestBuilder {
    fn new(component: String, namespace: String, layer: Layer) -> Self {
        Self {
            inner: ChangeRequest {
                component,
                namespace,
                namespace_scope: false,
                layer,
                server_name: None,
                application_path: None,
                content: None,
                branch: None,
                cascading_delete: false,
                auto_merge: false,
                rate_limited: false,
                wait_for_blocked_merge: false,
                ignore_differences: Vec::new(),
            },
        }
    }

    pub fn namespace_scope(mut self, enabled: bool) -> Self {
        self.inner.namespace_scope = enabled;
        self
    }

    pub fn server_name(mut self, server: impl Into<String>) -> Self {
        self.inner.server_name = Some(server.into());
        self
    }

    pub fn application_path(mut self, path: impl Into<String>) -> Self {
        self.inner.application_path = Some(path.into());
        self
    }

    pub fn content(mut self, source: ContentSource) -> Self {
        self.inner.content = Some(source);
        self
    }

    pub fn directory(self, path: impl Into<PathBuf>) -> Self {
        self.content(ContentSource::Directory(path.into()))
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.inner.branch = Some(branch.into());
        self
    }

    pub fn cascading_delete(mut self, enabled: bool) -> Self {
        self.inner.cascading_delete = enabled;
        self
    }

    pub fn auto_merge(mut self, enabled: bool) -> Self {
        self.inner.auto_merge = enabled;
        self
    }

    pub fn rate_limited(mut self, enabled: bool) -> Self {
        self.inner.rate_limited = enabled;
        self
    }

    pub fn wait_for_blocked_merge(mut self, enabled: bool) -> Self {
        self.inner.wait_for_blocked_merge = enabled;
        self
    }

    pub fn ignore_differences(mut self, entries: Vec<IgnoreDifference>) -> Self {
        self.inner.ignore_differences = entries;
        self
    }

    /// Validates identifiers and content references.
    pub fn build(self) -> Result<ChangeRequest> {
        let req = self.inner;

        if req.component.trim().is_empty() {
            return Err(PropagateError::InvalidRequest(
                "component name must not be empty".to_string(),
            ));
        }
        if req.namespace.trim().is_empty() {
            return Err(PropagateError::InvalidRequest(
                "namespace must not be empty".to_string(),
            ));
        }
        for (field, value) in [("component", &req.component), ("namespace", &req.namespace)] {
            if value.contains('/') || value.contains("..") {
                return Err(PropagateError::InvalidRequest(format!(
                    "{} '{}' must not contain path separators",
                    field, value
                )));
            }
        }
        if let Some(path) = &req.application_path {
            if path.trim_matches('/').is_empty() {
                return Err(PropagateError::InvalidRequest(
                    "application path must not be empty".to_string(),
                ));
            }
            if path.starts_with('/')
                || path
                    .trim_end_matches('/')
                    .split('/')
                    .any(|part| part.is_empty() || part == "." || part == "..")
            {
                return Err(PropagateError::InvalidRequest(format!(
                    "application path '{}' must be relative and stay inside the repository",
                    path
                )));
            }
        }
        if let Some(server) = &req.server_name {
            // Used as an overlay directory name in the control repository.
            if server.is_empty() || sanitize_label(server) != *server {
                return Err(PropagateError::InvalidRequest(format!(
                    "server name '{}' must be a DNS label",
                    server
                )));
            }
        }
        if let Some(branch) = &req.branch {
            if branch.trim().is_empty() {
                return Err(PropagateError::InvalidRequest(
                    "branch override must not be empty".to_string(),
                ));
            }
        }
        if let Some(ContentSource::Archive { url }) = &req.content {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PropagateError::InvalidRequest(format!(
                    "archive URL '{}' must use http or https",
                    url
                )));
            }
        }

        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_parse() {
        assert_eq!("applications".parse::<Layer>().unwrap(), Layer::Applications);
        assert_eq!(" Services ".parse::<Layer>().unwrap(), Layer::Services);
        assert_eq!(
            "infrastructure".parse::<Layer>().unwrap(),
            Layer::Infrastructure
        );
    }

    #[test]
    fn test_layer_parse_invalid() {
        let err = "platform".parse::<Layer>().unwrap_err();
        assert!(matches!(err, PropagateError::InvalidLayer(ref v) if v == "platform"));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_builder_defaults() {
        let req = ChangeRequest::builder("api", "dev", Layer::Applications)
            .build()
            .unwrap();
        assert_eq!(req.component, "api");
        assert!(!req.auto_merge);
        assert!(req.content.is_none());
        assert_eq!(req.server_or_default(), "default");
    }

    #[test]
    fn test_builder_rejects_empty_component() {
        let result = ChangeRequest::builder("  ", "dev", Layer::Services).build();
        assert!(matches!(result, Err(PropagateError::InvalidRequest(_))));
    }

    #[test]
    fn test_builder_rejects_escaping_application_path() {
        let result = ChangeRequest::builder("api", "dev", Layer::Services)
            .application_path("../other")
            .build();
        assert!(result.is_err());

        let result = ChangeRequest::builder("api", "dev", Layer::Services)
            .application_path("/")
            .build();
        assert!(result.is_err());

        for path in [".", "apps/./api", "apps//api"] {
            let result = ChangeRequest::builder("api", "dev", Layer::Services)
                .application_path(path)
                .build();
            assert!(
                matches!(result, Err(PropagateError::InvalidRequest(_))),
                "{} accepted",
                path
            );
        }

        let nested = ChangeRequest::builder("api", "dev", Layer::Services)
            .application_path("custom/api-v2/")
            .build();
        assert!(nested.is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_server_name() {
        for server in ["", "../../escape", "edge/1", "..", "Edge-1", "-edge"] {
            let result = ChangeRequest::builder("api", "dev", Layer::Applications)
                .server_name(server)
                .build();
            assert!(
                matches!(result, Err(PropagateError::InvalidRequest(_))),
                "'{}' accepted",
                server
            );
        }

        let req = ChangeRequest::builder("api", "dev", Layer::Applications)
            .server_name("edge-1")
            .build()
            .unwrap();
        assert_eq!(req.server_or_default(), "edge-1");
    }

    #[test]
    fn test_builder_rejects_non_http_archive() {
        let result = ChangeRequest::builder("api", "dev", Layer::Services)
            .content(ContentSource::Archive {
                url: "ftp://example.com/a.zip".to_string(),
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_ignore_difference_serialization() {
        let entry = IgnoreDifference {
            group: Some("apps".to_string()),
            kind: "Deployment".to_string(),
            json_pointers: vec!["/spec/replicas".to_string()],
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&entry).unwrap();
        assert!(yaml.contains("jsonPointers"));
        assert!(!yaml.contains("jqPathExpressions"));
        assert!(!yaml.contains("namespace"));
    }
}
