use crate::ident::{sanitize, short_digest};
use crate::manifest::{ProjectManifest, ScriptEntry};
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

pub use crate::manifest::UnitKind;

pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OUT_DIR_NAME: &str = "script";

#[derive(Debug, Clone)]
pub struct TranspileOptions {
    pub unit_timeout: Duration,
    pub out_dir_name: String,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            out_dir_name: DEFAULT_OUT_DIR_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranspileUnit {
    pub object_id: String,
    pub object_name: String,
    pub raw_script: String,
    pub output_path: PathBuf,
    pub kind: UnitKind,
}

impl TranspileUnit {
    fn new(entry: ScriptEntry, out_dir: &Path) -> Self {
        let output_path = out_dir.join(output_file_name(entry.kind, &entry.id));
        Self {
            object_id: entry.id,
            object_name: entry.name,
            raw_script: entry.script,
            output_path,
            kind: entry.kind,
        }
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.output_path
            .with_file_name(format!("{}.error.log", file_stem(self.kind, &self.object_id)))
    }
}

// Manifest ids come from downloaded projects. Anything beyond plain name
// characters is sanitized and tagged with a digest; a tagged stem always holds
// a '.', which plain ids cannot, so the two forms never collide.
pub fn file_stem(kind: UnitKind, id: &str) -> String {
    let plain = !id.is_empty()
        && !id.starts_with("func_")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let stem = if plain {
        id.to_string()
    } else {
        format!("{}.{}", sanitize(id), short_digest(id))
    };
    match kind {
        UnitKind::Object => stem,
        UnitKind::Function => format!("func_{}", stem),
    }
}

pub fn output_file_name(kind: UnitKind, id: &str) -> String {
    format!("{}.js", file_stem(kind, id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Success { source: String },
    Failure { message: String, trace: String },
}

impl UnitOutcome {
    fn failure(message: impl Into<String>, trace: impl Into<String>) -> Self {
        UnitOutcome::Failure {
            message: message.into(),
            trace: trace.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranspileProgress {
    pub started: usize,
    pub processed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranspileReport {
    pub output_dir: PathBuf,
    pub succeeded: Vec<String>,
    // (id, message)
    pub failed: Vec<(String, String)>,
}

pub type UnitWorker = fn(&TranspileUnit) -> Result<String>;

pub fn transpile_unit(unit: &TranspileUnit) -> Result<String> {
    Ok(match unit.kind {
        UnitKind::Object => crate::transpile_script(&unit.raw_script, &unit.object_id),
        UnitKind::Function => crate::transpile_function(&unit.raw_script, &unit.object_id),
    })
}

pub struct Transpiler {
    options: TranspileOptions,
    worker: UnitWorker,
    progress: TranspileProgress,
}

impl Default for Transpiler {
    fn default() -> Self {
        Self::new(TranspileOptions::default())
    }
}

impl Transpiler {
    pub fn new(options: TranspileOptions) -> Self {
        Self {
            options,
            worker: transpile_unit,
            progress: TranspileProgress::default(),
        }
    }

    pub fn with_worker(mut self, worker: UnitWorker) -> Self {
        self.worker = worker;
        self
    }

    pub fn options(&self) -> &TranspileOptions {
        &self.options
    }

    pub fn progress(&self) -> TranspileProgress {
        self.progress
    }

    pub fn run(&mut self, manifest_path: &Path) -> Result<TranspileReport> {
        self.run_with_progress(
            manifest_path,
            Option::<&mut fn(&TranspileProgress, &str)>::None,
        )
    }

    // Blocks on a runtime of its own, so it refuses to run inside one.
    pub fn run_with_progress<F>(
        &mut self,
        manifest_path: &Path,
        progress: Option<&mut F>,
    ) -> Result<TranspileReport>
    where
        F: FnMut(&TranspileProgress, &str),
    {
        if Handle::try_current().is_ok() {
            bail!("Transpiler::run cannot block inside a tokio runtime; await Transpiler::run_async instead.");
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .context("Failed to start the transpiler runtime.")?;
        let report = runtime.block_on(self.run_async(manifest_path, progress));
        // Timed-out units may still be running on blocking threads.
        runtime.shutdown_background();
        report
    }

    // The caller's runtime needs its time driver. Timed-out units keep their
    // blocking thread there until they return.
    pub async fn run_async<F>(
        &mut self,
        manifest_path: &Path,
        mut progress: Option<&mut F>,
    ) -> Result<TranspileReport>
    where
        F: FnMut(&TranspileProgress, &str),
    {
        let mut manifest = ProjectManifest::load(manifest_path)?;
        let out_dir = manifest.dir().join(&self.options.out_dir_name);
        fs::create_dir_all(&out_dir).with_context(|| {
            format!("Failed to create output directory '{}'.", out_dir.display())
        })?;

        let units: Vec<TranspileUnit> = manifest
            .script_entries()
            .into_iter()
            .map(|entry| TranspileUnit::new(entry, &out_dir))
            .collect();
        info!(
            "Transpiling {} unit(s) from '{}'.",
            units.len(),
            manifest_path.display()
        );

        self.progress = TranspileProgress::default();
        let settled = self.dispatch(units, &mut progress).await;

        let mut report = TranspileReport {
            output_dir: out_dir,
            ..TranspileReport::default()
        };
        for (unit, outcome) in settled {
            match outcome {
                UnitOutcome::Success { .. } => {
                    let relative = format!(
                        "{}/{}",
                        self.options.out_dir_name,
                        output_file_name(unit.kind, &unit.object_id)
                    );
                    if !manifest.set_output_path(unit.kind, &unit.object_id, &relative) {
                        warn!("Manifest entry '{}' disappeared before annotation.", unit.object_id);
                    }
                    report.succeeded.push(unit.object_id);
                }
                UnitOutcome::Failure { message, .. } => {
                    manifest.clear_output_path(unit.kind, &unit.object_id);
                    report.failed.push((unit.object_id, message));
                }
            }
        }
        manifest.save()?;

        report.succeeded.sort();
        report.failed.sort();
        info!(
            "Transpiled {} unit(s), {} failed.",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn dispatch<F>(
        &mut self,
        units: Vec<TranspileUnit>,
        progress: &mut Option<&mut F>,
    ) -> Vec<(TranspileUnit, UnitOutcome)>
    where
        F: FnMut(&TranspileProgress, &str),
    {
        let mut set = JoinSet::new();
        for unit in units {
            let worker = self.worker;
            let limit = self.options.unit_timeout;
            set.spawn(async move {
                let job = unit.clone();
                let handle = tokio::task::spawn_blocking(move || worker(&job));
                let outcome = match tokio::time::timeout(limit, handle).await {
                    Ok(Ok(Ok(source))) => UnitOutcome::Success { source },
                    Ok(Ok(Err(err))) => UnitOutcome::failure(err.to_string(), format!("{:?}", err)),
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        let payload = panic_message(join_err.into_panic());
                        UnitOutcome::failure(format!("transpiler panicked: {}", payload), payload)
                    }
                    Ok(Err(join_err)) => {
                        UnitOutcome::failure("transpile task was cancelled", join_err.to_string())
                    }
                    Err(_) => UnitOutcome::failure(
                        format!("timed out after {:?}", limit),
                        format!("unit '{}' exceeded the per-unit timeout", unit.object_id),
                    ),
                };
                (unit, outcome)
            });
            self.progress.started += 1;
        }

        let mut settled = Vec::with_capacity(self.progress.started);
        while let Some(joined) = set.join_next().await {
            self.progress.processed += 1;
            let (unit, outcome) = match joined {
                Ok(result) => result,
                Err(err) => {
                    error!("Transpile task was lost: {}", err);
                    continue;
                }
            };
            let outcome = write_outcome(&unit, outcome);
            let label = match &outcome {
                UnitOutcome::Success { .. } => {
                    info!("Transpiled '{}' ({}).", unit.object_name, unit.object_id);
                    format!("Transpiled '{}'", unit.object_name)
                }
                UnitOutcome::Failure { message, .. } => {
                    warn!(
                        "Failed to transpile '{}' ({}): {}",
                        unit.object_name, unit.object_id, message
                    );
                    format!("Failed '{}': {}", unit.object_name, message)
                }
            };
            if let Some(cb) = progress.as_deref_mut() {
                cb(&self.progress, &label);
            }
            settled.push((unit, outcome));
        }
        settled
    }
}

// A success that cannot be written becomes a failure. Whatever a previous run
// left behind for the opposite outcome is removed.
fn write_outcome(unit: &TranspileUnit, outcome: UnitOutcome) -> UnitOutcome {
    let log_path = unit.error_log_path();
    let outcome = match outcome {
        UnitOutcome::Success { source } => match fs::write(&unit.output_path, &source) {
            Ok(()) => {
                remove_stale(&log_path);
                return UnitOutcome::Success { source };
            }
            Err(err) => UnitOutcome::failure(
                format!("failed to write '{}'", unit.output_path.display()),
                err.to_string(),
            ),
        },
        failure => failure,
    };
    if unit.output_path.is_file() {
        remove_stale(&unit.output_path);
    }
    if let UnitOutcome::Failure { message, trace } = &outcome {
        if let Err(err) = fs::write(&log_path, format!("{}\n\n{}\n", message, trace)) {
            error!("Failed to write '{}': {}", log_path.display(), err);
        }
    }
    outcome
}

fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove stale '{}': {}", path.display(), err),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
