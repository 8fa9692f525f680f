use anyhow::Context;
use bluebase::{
    config::WorkerConfig,
    notifier::WebhookNotifier,
    task::{
        execute_task, notification_for, HashTokenProvider, NotifyingHook, TaskContext, TaskRequest,
        TokenProvider,
    },
};
use clap::Parser;
use std::{fs, path::PathBuf};

#[derive(Parser)]
#[command(name = "bluebase_worker")]
#[command(about = "Run one alignment tool and compute blue base statistics", long_about = None)]
#[command(version)]
struct Cli {
    /// Task directory, relative to the data directory
    #[arg(value_name = "DIR", required_unless_present = "request")]
    directory: Option<String>,

    /// Input FASTA file inside DIR
    #[arg(value_name = "INPUT.FA", required_unless_present = "request")]
    base_file_name: Option<String>,

    /// Alignment tool: mafft, vsearch or uclust
    #[arg(value_name = "TOOL", required_unless_present = "request")]
    tool: Option<String>,

    /// Extra tool options, split with shell quoting rules
    #[arg(value_name = "OPTIONS", default_value = "", allow_hyphen_values = true)]
    options: String,

    /// Read the request from a JSON file instead of the positional arguments
    #[arg(long, value_name = "REQUEST.JSON", conflicts_with_all = ["directory", "base_file_name", "tool"])]
    request: Option<PathBuf>,

    /// Identifier reported in the notification (default: generated)
    #[arg(long, value_name = "ID")]
    task_id: Option<String>,

    /// Overrides BLUEBASE_DATA_DIR
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,
}

fn read_request(cli: Cli) -> anyhow::Result<TaskRequest> {
    if let Some(path) = cli.request {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading request file {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("parsing request file {}", path.display()));
    }
    Ok(TaskRequest {
        directory: cli.directory.unwrap_or_default(),
        base_file_name: cli.base_file_name.unwrap_or_default(),
        tool: cli.tool.unwrap_or_default(),
        options: cli.options,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let mut config = WorkerConfig::from_env().context("reading worker configuration")?;
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }

    let task_id = cli.task_id.clone();
    let request = read_request(cli)?;
    let tokens = HashTokenProvider::default();
    let context = TaskContext {
        task_id: task_id.unwrap_or_else(|| tokens.token(&request)),
        request,
    };

    let hook = NotifyingHook::new(WebhookNotifier::from_config(&config));
    let result = execute_task(&config, &context, &tokens, &hook);
    let payload = notification_for(&context, &result);
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("serializing the notification")?
    );
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
