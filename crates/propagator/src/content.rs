//! Materialises component content into a payload checkout.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::ContentError;
use crate::request::{ContentSource, HelmChart};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// What the control side needs to know about materialised content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    pub is_helm: bool,
    /// Value files relative to the target directory, in precedence order.
    pub value_files: Vec<String>,
    pub release_name: Option<String>,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Replaces everything under `target` with the content of `source`.
    async fn materialize(
        &self,
        source: &ContentSource,
        component: &str,
        target: &Path,
    ) -> Result<Materialized, ContentError>;
}

/// Local directories, zip archives over HTTP(S), and Helm wrapper charts.
pub struct DefaultContentFetcher {
    client: Client,
}

impl DefaultContentFetcher {
    pub fn new() -> Result<Self, ContentError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ContentError::Fetch {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ContentError> {
        let fetch_error = |message: String| ContentError::Fetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ContentFetcher for DefaultContentFetcher {
    async fn materialize(
        &self,
        source: &ContentSource,
        component: &str,
        target: &Path,
    ) -> Result<Materialized, ContentError> {
        match source {
            ContentSource::Directory(dir) => {
                if !dir.is_dir() {
                    return Err(ContentError::MissingDirectory(dir.clone()));
                }
                reset_dir(target)?;
                let copied = copy_tree(dir, target)?;
                info!(files = copied, "Copied content directory");
                Ok(Materialized::default())
            }
            ContentSource::Archive { url } => {
                let bytes = self.download(url).await?;
                reset_dir(target)?;
                let extracted = extract_zip(&bytes, url, target)?;
                info!(files = extracted, "Extracted content archive");
                Ok(Materialized::default())
            }
            ContentSource::Helm(chart) => {
                validate_chart(chart)?;
                reset_dir(target)?;
                write_helm_wrapper(chart, component, target)
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ContentError {
    ContentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Empties `dir` so files dropped from the source disappear from the repo too.
fn reset_dir(dir: &Path) -> Result<(), ContentError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))
}

/// Copies a directory tree, skipping any `.git` metadata. Returns the file count.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize, ContentError> {
    let mut copied = 0;

    let walker = WalkDir::new(from)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| ContentError::Walk {
            path: from.to_path_buf(),
            source: e,
        })?;
        let relative = match entry.path().strip_prefix(from) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let dest = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| io_error(&dest, e))?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
            std::fs::copy(entry.path(), &dest).map_err(|e| ContentError::Copy {
                from: entry.path().to_path_buf(),
                to: dest.clone(),
                source: e,
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Extracts a zip archive into `target`.
///
/// When every entry lives under one top-level directory (as hosted
/// "download ZIP" archives do), that directory is stripped.
pub fn extract_zip(bytes: &[u8], url: &str, target: &Path) -> Result<usize, ContentError> {
    let archive_error = |message: String| ContentError::Archive {
        url: url.to_string(),
        message,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_error(e.to_string()))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index(i)
            .map_err(|e| archive_error(e.to_string()))?;
        let name = file
            .enclosed_name()
            .ok_or_else(|| ContentError::PathTraversal(file.name().to_string()))?;
        names.push((name, file.is_dir()));
    }

    let root = common_root(&names);
    let mut extracted = 0;

    for (i, (name, is_dir)) in names.iter().enumerate() {
        let relative = match &root {
            Some(root) => match name.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => name.clone(),
            },
            None => name.clone(),
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest = target.join(&relative);

        if *is_dir {
            std::fs::create_dir_all(&dest).map_err(|e| io_error(&dest, e))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let mut file = archive
            .by_index(i)
            .map_err(|e| archive_error(e.to_string()))?;
        let mut out = std::fs::File::create(&dest).map_err(|e| io_error(&dest, e))?;
        std::io::copy(&mut file, &mut out).map_err(|e| io_error(&dest, e))?;
        extracted += 1;
    }

    debug!(url = %url, files = extracted, stripped_root = root.is_some(), "Archive extracted");
    Ok(extracted)
}

fn common_root(names: &[(PathBuf, bool)]) -> Option<PathBuf> {
    let mut root: Option<PathBuf> = None;
    let mut saw_nested = false;

    for (name, is_dir) in names {
        let mut components = name.components();
        let first = match components.next() {
            Some(Component::Normal(first)) => PathBuf::from(first),
            _ => return None,
        };
        let nested = components.next().is_some();
        if !nested && !is_dir {
            // A file at the top level means there is no wrapping directory.
            return None;
        }
        saw_nested |= nested;

        match &root {
            None => root = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return None,
        }
    }

    root.filter(|_| saw_nested)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartFile<'a> {
    api_version: &'static str,
    name: &'a str,
    version: &'a str,
    dependencies: Vec<ChartDependency<'a>>,
}

#[derive(Serialize)]
struct ChartDependency<'a> {
    name: &'a str,
    version: &'a str,
    repository: &'a str,
}

fn validate_chart(chart: &HelmChart) -> Result<(), ContentError> {
    for (field, value) in [
        ("name", &chart.name),
        ("version", &chart.version),
        ("repository", &chart.repository),
    ] {
        if value.trim().is_empty() {
            return Err(ContentError::InvalidChart(format!("chart {} is empty", field)));
        }
    }
    if !(chart.repository.starts_with("https://")
        || chart.repository.starts_with("http://")
        || chart.repository.starts_with("oci://"))
    {
        return Err(ContentError::InvalidChart(format!(
            "unsupported chart repository '{}'",
            chart.repository
        )));
    }
    Ok(())
}

/// Writes `Chart.yaml` plus value files nested under the chart's key.
fn write_helm_wrapper(
    chart: &HelmChart,
    component: &str,
    target: &Path,
) -> Result<Materialized, ContentError> {
    let chart_file = ChartFile {
        api_version: "v2",
        name: component,
        version: &chart.version,
        dependencies: vec![ChartDependency {
            name: &chart.name,
            version: &chart.version,
            repository: &chart.repository,
        }],
    };
    let rendered = serde_yaml::to_string(&chart_file)
        .map_err(|e| ContentError::InvalidChart(e.to_string()))?;
    let chart_path = target.join("Chart.yaml");
    std::fs::write(&chart_path, rendered).map_err(|e| io_error(&chart_path, e))?;

    let mut value_files = Vec::with_capacity(chart.value_files.len());
    for (i, source) in chart.value_files.iter().enumerate() {
        let nested = nest_values(source, &chart.name)?;
        let file_name = if i == 0 {
            "values.yaml".to_string()
        } else {
            format!("values-{}.yaml", i)
        };
        let dest = target.join(&file_name);
        std::fs::write(&dest, nested).map_err(|e| io_error(&dest, e))?;
        value_files.push(file_name);
    }

    Ok(Materialized {
        is_helm: true,
        value_files,
        release_name: Some(component.to_string()),
    })
}

fn nest_values(source: &Path, chart_name: &str) -> Result<String, ContentError> {
    let values_error = |message: String| ContentError::ValuesFile {
        path: source.to_path_buf(),
        message,
    };

    let text = std::fs::read_to_string(source).map_err(|e| values_error(e.to_string()))?;
    let values: Value = if text.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(&text).map_err(|e| values_error(e.to_string()))?
    };

    let mut wrapped = Mapping::new();
    wrapped.insert(Value::String(chart_name.to_string()), values);
    serde_yaml::to_string(&wrapped).map_err(|e| values_error(e.to_string()))
}
