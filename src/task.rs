//! One worker invocation: plan, supervise, normalize, analyse, report.

use crate::{
    alignment::AlignmentMatrix,
    config::WorkerConfig,
    error::TaskError,
    normalize::normalize_alignment_file,
    notifier::Notifier,
    report::{report_file_name, write_column_report},
    stats::AlignmentStatistics,
    supervisor::Supervisor,
    tool::{split_options, CommandPlanner, ToolVariant},
};
use bluebase_protocol::{ResourceUsageSummary, Statistic, TaskNotification};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::{
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

pub const ALIGNMENT_EXTENSION: &str = "aln";
pub const LOG_EXTENSION: &str = "log";

/// What the caller asked for. Task queues hand it over as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskRequest {
    /// Task directory, relative to the data root.
    pub directory: String,
    /// Input FASTA file inside `directory`.
    pub base_file_name: String,
    pub tool: String,
    /// Free-form tool options, split with shell quoting rules.
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub alignment_file_name: String,
    pub stats_file_name: String,
    pub statistic: Statistic,
    pub resource_usage: ResourceUsageSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: String,
    pub request: TaskRequest,
}

/// Supplies the base name shared by a task's alignment and log files.
pub trait TokenProvider {
    fn token(&self, request: &TaskRequest) -> String;
}

pub const TOKEN_LENGTH: usize = 16;

/// Hex SHA-1 of the request and a per-call nonce, shortened.
#[derive(Debug, Default)]
pub struct HashTokenProvider {
    counter: AtomicU64,
}

impl TokenProvider for HashTokenProvider {
    fn token(&self, request: &TaskRequest) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha1::new();
        for part in [
            &request.directory,
            &request.base_file_name,
            &request.tool,
            &request.options,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(format!("{nanos}:{}:{count}", std::process::id()).as_bytes());
        let mut token = format!("{:x}", hasher.finalize());
        token.truncate(TOKEN_LENGTH);
        token
    }
}

/// Gets called once with the outcome of every task run by [`execute_task`].
pub trait CompletionHook {
    fn on_complete(&self, context: &TaskContext, result: &Result<TaskOutput, TaskError>);
}

/// Completion hook that turns the outcome into a [`TaskNotification`].
pub struct NotifyingHook<N: Notifier> {
    notifier: N,
}

impl<N: Notifier> NotifyingHook<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

impl<N: Notifier> CompletionHook for NotifyingHook<N> {
    fn on_complete(&self, context: &TaskContext, result: &Result<TaskOutput, TaskError>) {
        self.notifier.notify(&notification_for(context, result));
    }
}

pub fn notification_for(
    context: &TaskContext,
    result: &Result<TaskOutput, TaskError>,
) -> TaskNotification {
    let output_dir = Some(context.request.directory.clone());
    match result {
        Ok(output) => TaskNotification::success(
            &context.task_id,
            output_dir,
            output.alignment_file_name.clone(),
            output.stats_file_name.clone(),
            output.statistic.clone(),
            output.resource_usage.clone(),
        ),
        Err(e) => TaskNotification::error(&context.task_id, output_dir, e.to_string()),
    }
}

/// Resolves the request directory below the data root. Absolute paths and
/// `..` would escape it.
fn task_directory(data_dir: &Path, directory: &str) -> Result<PathBuf, TaskError> {
    let relative = Path::new(directory);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(TaskError::configuration(format!(
            "Task directory '{directory}' must stay inside the data directory"
        )));
    }
    Ok(data_dir.join(relative))
}

/// Runs the requested tool on `<data_dir>/<directory>/<base_file_name>` and
/// analyses the alignment it produces.
pub fn run_tool(
    config: &WorkerConfig,
    request: &TaskRequest,
    tokens: &dyn TokenProvider,
) -> Result<TaskOutput, TaskError> {
    let variant: ToolVariant = request.tool.parse()?;
    let args = split_options(&request.options)?;
    let output_dir = task_directory(&config.data_dir, &request.directory)?;
    let input = output_dir.join(&request.base_file_name);
    if !input.is_file() {
        return Err(TaskError::InputMissing { path: input });
    }

    let token = tokens.token(request);
    let alignment_file_name = format!("{token}.{ALIGNMENT_EXTENSION}");
    let alignment_path = output_dir.join(&alignment_file_name);
    let log_path = output_dir.join(format!("{token}.{LOG_EXTENSION}"));

    let plan = CommandPlanner::new(config.binaries.clone(), config.threads).plan(
        variant,
        &input,
        &alignment_path,
        &args,
    )?;
    let run = Supervisor::from_config(config).run(&plan, &log_path)?;
    // cluster tools can exit 0 without writing anything
    if !run.alignment_path.is_file() {
        return Err(TaskError::EmptyAlignment {
            path: run.alignment_path,
        });
    }

    let matrix = if variant.needs_normalization() {
        normalize_alignment_file(&run.alignment_path)?
    } else {
        AlignmentMatrix::from_fasta_file(&run.alignment_path)?
    };
    if matrix.is_empty() {
        return Err(TaskError::EmptyAlignment {
            path: run.alignment_path,
        });
    }
    let stats = AlignmentStatistics::compute(&matrix)?;

    let stats_file_name = report_file_name(&alignment_file_name);
    write_column_report(&output_dir.join(&stats_file_name), &stats.columns)?;
    log::info!(
        "{variant} alignment {alignment_file_name}: {} sequences, blue base ratio {:.4}",
        stats.statistic.total_seq,
        stats.statistic.blue_base_ratio
    );

    Ok(TaskOutput {
        alignment_file_name,
        stats_file_name,
        statistic: stats.statistic,
        resource_usage: run.resource_usage,
    })
}

/// Runs one task and hands its outcome to `hook`, exactly once, whether it
/// succeeded or not.
pub fn execute_task(
    config: &WorkerConfig,
    context: &TaskContext,
    tokens: &dyn TokenProvider,
    hook: &dyn CompletionHook,
) -> Result<TaskOutput, TaskError> {
    log::info!("Starting {}: {}", context.request.tool, context.task_id);
    let result = run_tool(config, &context.request, tokens);
    match &result {
        Ok(output) => log::info!(
            "Task {} finished: {} / {}",
            context.task_id,
            output.alignment_file_name,
            output.stats_file_name
        ),
        Err(e) => log::error!("Task {} failed ({}): {e}", context.task_id, e.kind()),
    }
    hook.on_complete(context, &result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, collections::HashSet, fs};
    use tempfile::tempdir;

    struct FixedToken;

    impl TokenProvider for FixedToken {
        fn token(&self, _request: &TaskRequest) -> String {
            "fixedtoken".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        calls: RefCell<Vec<TaskNotification>>,
    }

    impl CompletionHook for RecordingHook {
        fn on_complete(&self, context: &TaskContext, result: &Result<TaskOutput, TaskError>) {
            self.calls.borrow_mut().push(notification_for(context, result));
        }
    }

    fn request(tool: &str, options: &str) -> TaskRequest {
        TaskRequest {
            directory: "job1".to_string(),
            base_file_name: "input.fa".to_string(),
            tool: tool.to_string(),
            options: options.to_string(),
        }
    }

    fn config_in(root: &Path) -> WorkerConfig {
        WorkerConfig {
            data_dir: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_tool_fails_before_anything_runs() {
        let td = tempdir().unwrap();
        let config = config_in(td.path());
        let context = TaskContext {
            task_id: "t-1".to_string(),
            request: request("muscle", ""),
        };
        let hook = RecordingHook::default();
        let err = execute_task(&config, &context, &FixedToken, &hook).unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));

        let calls = hook.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].is_success());
        assert_eq!(calls[0].task_id, "t-1");
        assert_eq!(calls[0].output_dir.as_deref(), Some("job1"));
        assert_eq!(calls[0].message.as_deref(), Some("Invalid configuration: Invalid tool: 'muscle'"));
        assert!(!td.path().join("job1").exists());
    }

    #[test]
    fn test_missing_input() {
        let td = tempdir().unwrap();
        let err = run_tool(&config_in(td.path()), &request("mafft", ""), &FixedToken).unwrap_err();
        match err {
            TaskError::InputMissing { path } => assert!(path.ends_with("job1/input.fa")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_options_are_rejected() {
        let td = tempdir().unwrap();
        let err =
            run_tool(&config_in(td.path()), &request("vsearch", "--id '0.9"), &FixedToken).unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
    }

    #[test]
    fn test_directory_must_stay_below_data_root() {
        let td = tempdir().unwrap();
        let config = config_in(td.path());
        for directory in ["../elsewhere", "/etc"] {
            let mut req = request("mafft", "");
            req.directory = directory.to_string();
            let err = run_tool(&config, &req, &FixedToken).unwrap_err();
            assert!(matches!(err, TaskError::Configuration { .. }), "{directory}");
        }
        assert_eq!(
            task_directory(td.path(), "./a/b").unwrap(),
            td.path().join("./a/b")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_tool_output_is_empty_alignment() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join("job1")).unwrap();
        fs::write(td.path().join("job1/input.fa"), ">a\nACGT\n").unwrap();
        let mut config = config_in(td.path());
        // prints nothing and exits 0
        config.binaries.mafft = "true".to_string();
        let err = run_tool(&config, &request("mafft", ""), &FixedToken).unwrap_err();
        assert!(matches!(err, TaskError::EmptyAlignment { .. }));
        assert!(td.path().join("job1/fixedtoken.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cluster_tool_writing_nothing_is_empty_alignment() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join("job1")).unwrap();
        fs::write(td.path().join("job1/input.fa"), ">a\nACGT\n").unwrap();
        let mut config = config_in(td.path());
        // exits 0 and never creates the --msaout file
        config.binaries.vsearch = "true".to_string();
        let err = run_tool(&config, &request("vsearch", "--id 0.9"), &FixedToken).unwrap_err();
        match err {
            TaskError::EmptyAlignment { path } => assert!(path.ends_with("job1/fixedtoken.aln")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!td.path().join("job1/fixedtoken.aln").exists());
    }

    #[test]
    fn test_request_from_json() {
        let req: TaskRequest = serde_json::from_str(
            r#"{"directory": "job1", "base_file_name": "input.fa", "tool": "uclust"}"#,
        )
        .unwrap();
        assert_eq!(req, request("uclust", ""));
        assert!(serde_json::from_str::<TaskRequest>(r#"{"directory": "job1"}"#).is_err());
    }

    #[test]
    fn test_hash_tokens_are_short_hex_and_unique() {
        let tokens = HashTokenProvider::default();
        let req = request("mafft", "--auto");
        let seen: HashSet<String> = (0..50).map(|_| tokens.token(&req)).collect();
        assert_eq!(seen.len(), 50);
        for token in &seen {
            assert_eq!(token.len(), TOKEN_LENGTH);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_success_notification_fields() {
        let context = TaskContext {
            task_id: "t-9".to_string(),
            request: request("mafft", ""),
        };
        let output = TaskOutput {
            alignment_file_name: "abc.aln".to_string(),
            stats_file_name: "abc.aln.txt".to_string(),
            statistic: Statistic {
                total_seq: 2,
                gap_seq_count: 0,
                gap_count: 0,
                gap_frequency: 0.0,
                gap_sum_length: 0,
                gap_length: 0.0,
                sum_of_blue_bases: 4,
                no_blue_bases: 0,
                no_miss_bases: 4,
                blue_base_ratio: 1.0,
                blue_base_count: Statistic::empty_buckets(),
            },
            resource_usage: ResourceUsageSummary::default(),
        };
        let notification = notification_for(&context, &Ok(output));
        assert!(notification.is_success());
        assert_eq!(notification.align_file.as_deref(), Some("abc.aln"));
        assert_eq!(notification.stat_file.as_deref(), Some("abc.aln.txt"));
        assert_eq!(notification.output_dir.as_deref(), Some("job1"));
        assert!(notification.message.is_none());
    }
}
