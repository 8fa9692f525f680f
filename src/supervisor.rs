//! Runs an [`ExecutionPlan`] as a single shell process tree while the
//! resource monitor samples it.

use crate::{
    config::WorkerConfig,
    error::TaskError,
    monitor::{ProcFsInspector, ProcessInspector, ResourceMonitor},
    tool::ExecutionPlan,
};
use bluebase_protocol::ResourceUsageSummary;
use itertools::Itertools;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

/// Written to stderr before each stage starts.
const STAGE_MARKER: &str = "[bluebase] stage ";

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedRun {
    pub alignment_path: PathBuf,
    pub resource_usage: ResourceUsageSummary,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    sample_interval: Duration,
    log_excerpt_bytes: usize,
}

impl Supervisor {
    pub fn new(sample_interval: Duration, log_excerpt_bytes: usize) -> Self {
        Self {
            sample_interval,
            log_excerpt_bytes,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.sample_interval, config.log_excerpt_bytes)
    }

    pub fn run(&self, plan: &ExecutionPlan, log_path: &Path) -> Result<SupervisedRun, TaskError> {
        self.run_with_inspector(plan, log_path, ProcFsInspector::default())
    }

    pub fn run_with_inspector<I>(
        &self,
        plan: &ExecutionPlan,
        log_path: &Path,
        inspector: I,
    ) -> Result<SupervisedRun, TaskError>
    where
        I: ProcessInspector + Send + 'static,
    {
        for path in [plan.output_path.as_path(), log_path] {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
        }

        let header = log_header(plan);
        fs::write(log_path, &header)?;
        let stderr = OpenOptions::new().append(true).open(log_path)?;
        let stdout = if plan.stdout_is_alignment {
            File::create(&plan.output_path)?
        } else {
            OpenOptions::new().append(true).open(log_path)?
        };

        log::info!("Running {} command:\n{}", plan.variant, plan.script());
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(marked_script(plan))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;

        let monitor = ResourceMonitor::start(inspector, child.id(), self.sample_interval);
        let status = child.wait();
        let resource_usage = monitor.finish();
        let status = status?;

        if !status.success() {
            let written = fs::read(log_path)?;
            let body = written.get(header.len()..).unwrap_or_default();
            let body = String::from_utf8_lossy(body);
            // output of earlier, successful stages is not worth quoting
            let failing = body.rfind(STAGE_MARKER).map_or(&body[..], |i| &body[i..]);
            let err = TaskError::Execution {
                code: status.code(),
                stage: last_stage(&body),
                log_excerpt: excerpt(failing, self.log_excerpt_bytes).to_string(),
            };
            log::error!("{} failed: {err}", plan.variant);
            return Err(err);
        }

        log::info!(
            "{} completed in {:.2}s. Output: {}",
            plan.variant,
            resource_usage.elapsed_seconds,
            plan.output_path.display()
        );
        Ok(SupervisedRun {
            alignment_path: plan.output_path.clone(),
            resource_usage,
        })
    }
}

fn log_header(plan: &ExecutionPlan) -> String {
    let mut header = format!("# tool: {}\n", plan.variant);
    for (i, stage) in plan.stages.iter().enumerate() {
        header.push_str(&format!("# command {}: {stage}\n", i + 1));
    }
    header
}

/// The plan's stages chained with `&&`, each announced on stderr first.
fn marked_script(plan: &ExecutionPlan) -> String {
    let total = plan.stages.len();
    plan.stages
        .iter()
        .enumerate()
        .map(|(i, stage)| format!("echo '{STAGE_MARKER}{}/{total}' >&2 && {stage}", i + 1))
        .join(" && ")
}

/// One-based number of the last stage that announced itself in `log`.
fn last_stage(log: &str) -> Option<usize> {
    let start = log.rfind(STAGE_MARKER)? + STAGE_MARKER.len();
    log[start..]
        .split('/')
        .next()
        .and_then(|n| n.trim().parse().ok())
}

/// At most `limit` bytes from the start of `text`, cut on a char boundary.
fn excerpt(text: &str, limit: usize) -> &str {
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
