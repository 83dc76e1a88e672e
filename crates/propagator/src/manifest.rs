//! ArgoCD `Application` rendering.
//!
//! Output is a pure function of the descriptor: struct field order fixes key
//! order and nothing time- or environment-dependent is emitted, so unchanged
//! input produces byte-identical files and an empty git diff.

use serde::Serialize;

use crate::request::IgnoreDifference;

pub const API_VERSION: &str = "argoproj.io/v1alpha1";
pub const KIND: &str = "Application";
/// Namespace ArgoCD watches for `Application` objects.
pub const ARGOCD_NAMESPACE: &str = "argocd";
pub const DEFAULT_PROJECT: &str = "default";
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";
/// Finalizer that makes ArgoCD delete child resources with the application.
pub const CASCADE_FINALIZER: &str = "resources-finalizer.argocd.argoproj.io";

/// Everything needed to render one application file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    pub name: String,
    /// Destination namespace for the deployed resources.
    pub namespace: String,
    pub project: String,
    pub source_repo_url: String,
    pub source_path: String,
    pub source_branch: String,
    /// Named destination cluster; `None` deploys in-cluster.
    pub destination_name: Option<String>,
    pub is_helm: bool,
    pub value_files: Vec<String>,
    pub release_name: Option<String>,
    pub ignore_differences: Vec<IgnoreDifference>,
    pub cascading_delete: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Application<'a> {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata<'a>,
    spec: Spec<'a>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    name: &'a str,
    namespace: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    finalizers: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Spec<'a> {
    project: &'a str,
    source: Source<'a>,
    destination: Destination<'a>,
    sync_policy: SyncPolicy,
    #[serde(skip_serializing_if = "<[IgnoreDifference]>::is_empty")]
    ignore_differences: &'a [IgnoreDifference],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Source<'a> {
    #[serde(rename = "repoURL")]
    repo_url: &'a str,
    path: &'a str,
    target_revision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    helm: Option<Helm<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Helm<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    release_name: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    value_files: &'a [String],
}

#[derive(Serialize)]
struct Destination<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncPolicy {
    automated: Automated,
    sync_options: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Automated {
    prune: bool,
    self_heal: bool,
}

/// Renders the descriptor as canonical YAML.
pub fn build(descriptor: &ApplicationDescriptor) -> Result<String, serde_yaml::Error> {
    let helm = descriptor.is_helm.then(|| Helm {
        release_name: descriptor.release_name.as_deref(),
        value_files: &descriptor.value_files,
    });

    let destination = match descriptor.destination_name.as_deref() {
        Some(name) => Destination {
            server: None,
            name: Some(name),
            namespace: &descriptor.namespace,
        },
        None => Destination {
            server: Some(IN_CLUSTER_SERVER),
            name: None,
            namespace: &descriptor.namespace,
        },
    };

    let app = Application {
        api_version: API_VERSION,
        kind: KIND,
        metadata: Metadata {
            name: &descriptor.name,
            namespace: ARGOCD_NAMESPACE,
            finalizers: if descriptor.cascading_delete {
                vec![CASCADE_FINALIZER]
            } else {
                Vec::new()
            },
        },
        spec: Spec {
            project: &descriptor.project,
            source: Source {
                repo_url: &descriptor.source_repo_url,
                path: &descriptor.source_path,
                target_revision: &descriptor.source_branch,
                helm,
            },
            destination,
            sync_policy: SyncPolicy {
                automated: Automated {
                    prune: true,
                    self_heal: true,
                },
                sync_options: vec!["CreateNamespace=true"],
            },
            ignore_differences: &descriptor.ignore_differences,
        },
    };

    serde_yaml::to_string(&app)
}
