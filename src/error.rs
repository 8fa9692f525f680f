use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Everything that can abort one task invocation.
///
/// Resource sampling problems and webhook delivery failures are deliberately
/// absent: those are logged where they happen and never change the outcome.
#[derive(Debug)]
pub enum TaskError {
    /// Unknown tool, unparsable options or invalid worker settings.
    Configuration { message: String },
    /// An expected input file did not exist.
    InputMissing { path: PathBuf },
    /// The external command chain exited unsuccessfully.
    Execution {
        code: Option<i32>,
        /// One-based stage that was running when the chain stopped.
        stage: Option<usize>,
        log_excerpt: String,
    },
    /// The tool succeeded but left no usable sequence data behind.
    EmptyAlignment { path: PathBuf },
    /// Statistics cannot be computed (no rows, no columns or no bases).
    DegenerateStatistics { reason: String },
    Io(std::io::Error),
}

impl TaskError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateStatistics {
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name of the error kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InputMissing { .. } => "input_missing",
            Self::Execution { .. } => "execution",
            Self::EmptyAlignment { .. } => "empty_alignment",
            Self::DegenerateStatistics { .. } => "degenerate_statistics",
            Self::Io(_) => "io",
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { message } => write!(f, "Invalid configuration: {message}"),
            Self::InputMissing { path } => {
                write!(f, "Input file not found: {}", path.display())
            }
            Self::Execution {
                code,
                stage,
                log_excerpt,
            } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                match stage {
                    Some(stage) => write!(
                        f,
                        "Alignment command failed at stage {stage} with rc={code}: {}",
                        log_excerpt.trim()
                    ),
                    None => write!(
                        f,
                        "Alignment command failed with rc={code}: {}",
                        log_excerpt.trim()
                    ),
                }
            }
            Self::EmptyAlignment { path } => write!(
                f,
                "Alignment '{}' contains no sequence data after normalization",
                path.display()
            ),
            Self::DegenerateStatistics { reason } => {
                write!(f, "Cannot compute alignment statistics: {reason}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Io(err)
    }
}

impl From<csv::Error> for TaskError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(e) => TaskError::Io(e),
            other => TaskError::Io(std::io::Error::other(format!("{other:?}"))),
        }
    }
}
