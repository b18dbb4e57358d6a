//! One-off invocation of an action on a local file.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use actionkit_core::runtime::sanitize_container_name;
use actionkit_core::{
    obs, ActionDescriptor, ActionRunner, ContainerRuntime, HarnessConfig, HarnessError,
    RunnerConfig,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{Result, SuiteError};
use crate::staging::StagingDirs;

/// Input of a single `run-worker` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: PathBuf,
    /// Where the rendition is written; its file name is the rendition name.
    pub rendition: PathBuf,
    /// Extra rendition instructions, merged into the rendition entry.
    pub params: Map<String, Value>,
    pub build_dir: PathBuf,
    pub run_id: String,
}

impl RunRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        rendition: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            rendition: rendition.into(),
            params: Map::new(),
            build_dir: build_dir.into(),
            run_id: run_id.into(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// `<build>/run-worker/<action>`
    pub fn staging_root(&self, action: &str) -> PathBuf {
        self.build_dir.join("run-worker").join(action)
    }

    /// Container name hint of the runner serving this request.
    pub fn container_name(&self, action: &str) -> String {
        format!("actionkit-runworker-{}-{}", action, self.run_id)
    }

    /// Invocation parameters: one rendition named after the target file.
    pub fn invocation_params(&self, request_id: &str) -> Value {
        let mut rendition = Map::new();
        rendition.insert("name".to_string(), Value::String(file_name(&self.rendition)));
        for (key, value) in &self.params {
            rendition.insert(key.clone(), value.clone());
        }
        json!({
            "source": file_name(&self.source),
            "renditions": [rendition],
            "requestId": request_id,
        })
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: Value,
    /// Renditions copied next to the requested target.
    pub renditions: Vec<PathBuf>,
}

/// Start the action, invoke it once on `request.source` and copy the
/// produced renditions to the target directory.
///
/// The container and staging directories are released on every path.
pub async fn run_once(
    action: ActionDescriptor,
    request: &RunRequest,
    harness: &HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<RunOutcome> {
    if !request.source.is_file() {
        return Err(HarnessError::InvalidFixture(format!(
            "source file not found: {}",
            request.source.display()
        ))
        .into());
    }

    let dirs = StagingDirs::new(request.staging_root(&action.name), &request.run_id);
    let config = RunnerConfig::from_harness(harness)
        .worker(&dirs.input, &dirs.output)
        .with_container_name(request.container_name(&action.name));
    let mut runner = ActionRunner::new(action, config, runtime);

    let outcome = invoke(&mut runner, &dirs, request).await;

    if let Err(e) = runner.stop().await {
        obs::emit_cleanup_warning("action container", &e);
    }
    if let Err(e) = dirs.cleanup() {
        obs::emit_cleanup_warning("staging directories", &e);
    }
    outcome
}

/// Best-effort removal of what an abandoned [`run_once`] left behind.
pub async fn release(action: &str, request: &RunRequest, runtime: &dyn ContainerRuntime) {
    let container = sanitize_container_name(&request.container_name(action));
    if let Err(e) = runtime.remove_force(&container).await {
        obs::emit_cleanup_warning("action container", &e);
    }
    let dirs = StagingDirs::new(request.staging_root(action), &request.run_id);
    if let Err(e) = dirs.cleanup() {
        obs::emit_cleanup_warning("staging directories", &e);
    }
}

async fn invoke(runner: &mut ActionRunner, dirs: &StagingDirs, request: &RunRequest) -> Result<RunOutcome> {
    dirs.prepare()?;
    dirs.stage_file(&request.source)?;
    runner
        .start()
        .await
        .map_err(|source| SuiteError::ActionStart {
            action: runner.action().name.clone(),
            source,
        })?;

    let cwd = std::env::current_dir()
        .ok()
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let params = request.invocation_params(&format!("run-worker in {cwd}"));
    info!(action = %runner.action().name, source = %request.source.display(), "invoking action");

    let result = runner.run(params).await?;
    let renditions = collect_renditions(&result, &dirs.output, &request.rendition)?;
    Ok(RunOutcome { result, renditions })
}

/// Copy each rendition named in the result from `out` to the target
/// directory. Missing renditions are reported and skipped.
pub fn collect_renditions(result: &Value, out_dir: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    let target_dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&target_dir)
        .map_err(|e| HarnessError::io("failed to create", &target_dir, e))?;

    let entries = result
        .get("renditions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut copied = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("rendition{idx}"));
        if !is_plain_file_name(&name) {
            warn!(rendition = %name, "ignoring rendition {}: name is not a plain file name", name);
            continue;
        }
        let produced = out_dir.join(&name);
        if !produced.is_file() {
            warn!(rendition = %name, "no rendition named {} found", name);
            continue;
        }
        let destination = target_dir.join(&name);
        std::fs::copy(&produced, &destination)
            .map_err(|e| HarnessError::io("failed to copy rendition", &produced, e))?;
        copied.push(destination);
    }
    Ok(copied)
}

/// A single normal path component: no separators, no `..`, not absolute.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
