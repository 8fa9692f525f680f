use crate::{config::ToolBinaries, error::TaskError};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

/// The external alignment tools this worker knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolVariant {
    /// mafft: aligns everything, alignment on stdout.
    PrimaryAligner,
    /// vsearch: clusters and writes a per-cluster MSA with a consensus row.
    ClusterAligner,
    /// uclust: cluster, convert, then star-align in three chained steps.
    GreedyClusterAligner,
}

impl ToolVariant {
    pub const ALL: [ToolVariant; 3] = [
        ToolVariant::PrimaryAligner,
        ToolVariant::ClusterAligner,
        ToolVariant::GreedyClusterAligner,
    ];

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::PrimaryAligner => "mafft",
            Self::ClusterAligner => "vsearch",
            Self::GreedyClusterAligner => "uclust",
        }
    }

    /// Whether the tool output carries a consensus row, id markers and
    /// alternate gap characters that must be cleaned before statistics.
    pub fn needs_normalization(&self) -> bool {
        matches!(self, Self::ClusterAligner | Self::GreedyClusterAligner)
    }
}

impl fmt::Display for ToolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool_name())
    }
}

impl FromStr for ToolVariant {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.tool_name() == wanted)
            .ok_or_else(|| TaskError::configuration(format!("Invalid tool: '{}'", s.trim())))
    }
}

/// Shell command chain for one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub variant: ToolVariant,
    /// Each stage only runs if the one before it succeeded.
    pub stages: Vec<String>,
    /// Where the final alignment ends up.
    pub output_path: PathBuf,
    /// True when the alignment is the chain's standard output; otherwise the
    /// tool writes `output_path` itself and stdout goes to the log.
    pub stdout_is_alignment: bool,
}

impl ExecutionPlan {
    /// The stages joined into one shell script line.
    pub fn script(&self) -> String {
        self.stages.join(" && ")
    }
}

/// Splits a free-form option string with shell quoting rules.
pub fn split_options(options: &str) -> Result<Vec<String>, TaskError> {
    shlex::split(options)
        .ok_or_else(|| TaskError::configuration(format!("Could not parse tool options '{options}'")))
}

fn quote(value: &str) -> Result<String, TaskError> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|e| TaskError::configuration(format!("Cannot pass '{value}' to the shell: {e}")))
}

fn quote_path(path: &Path) -> Result<String, TaskError> {
    quote(&path.to_string_lossy())
}

fn quote_all(args: &[String]) -> Result<Vec<String>, TaskError> {
    args.iter().map(|a| quote(a)).collect()
}

#[derive(Debug, Clone)]
pub struct CommandPlanner {
    binaries: ToolBinaries,
    threads: i32,
}

impl CommandPlanner {
    pub fn new(binaries: ToolBinaries, threads: i32) -> Self {
        Self { binaries, threads }
    }

    pub fn plan(
        &self,
        variant: ToolVariant,
        input: &Path,
        output: &Path,
        args: &[String],
    ) -> Result<ExecutionPlan, TaskError> {
        let exe = quote(self.binaries.for_variant(variant))?;
        let stages = match variant {
            ToolVariant::PrimaryAligner => self.primary_stages(&exe, input, args)?,
            ToolVariant::ClusterAligner => cluster_stages(&exe, input, output, args)?,
            ToolVariant::GreedyClusterAligner => greedy_cluster_stages(&exe, input, output, args)?,
        };
        Ok(ExecutionPlan {
            variant,
            stages,
            output_path: output.to_path_buf(),
            stdout_is_alignment: variant == ToolVariant::PrimaryAligner,
        })
    }

    fn primary_stages(
        &self,
        exe: &str,
        input: &Path,
        args: &[String],
    ) -> Result<Vec<String>, TaskError> {
        let mut parts = vec![exe.to_string()];
        parts.extend(quote_all(args)?);
        parts.push("--thread".to_string());
        parts.push(self.threads.to_string());
        parts.push(quote_path(input)?);
        Ok(vec![parts.join(" ")])
    }
}

fn cluster_stages(
    exe: &str,
    input: &Path,
    output: &Path,
    args: &[String],
) -> Result<Vec<String>, TaskError> {
    let mut parts = vec![
        exe.to_string(),
        "--cluster_smallmem".to_string(),
        quote_path(input)?,
    ];
    parts.extend(quote_all(args)?);
    parts.push("--msaout".to_string());
    parts.push(quote_path(output)?);
    Ok(vec![parts.join(" ")])
}

/// Intermediate files of the three-step uclust run, named after the part of
/// the output file name before its first dot.
pub fn greedy_cluster_intermediates(output: &Path) -> (PathBuf, PathBuf) {
    let stem = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = stem.split('.').next().unwrap_or_default().to_string();
    let dir = output.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{stem}_pctid_0.uc")),
        dir.join(format!("{stem}_pctid_0.fa")),
    )
}

fn greedy_cluster_stages(
    exe: &str,
    input: &Path,
    output: &Path,
    args: &[String],
) -> Result<Vec<String>, TaskError> {
    let (uc_file, temp_fasta) = greedy_cluster_intermediates(output);
    let input = quote_path(input)?;
    let uc_file = quote_path(&uc_file)?;
    let temp_fasta = quote_path(&temp_fasta)?;

    let mut cluster = vec![
        exe.to_string(),
        "--input".to_string(),
        input.clone(),
        "--uc".to_string(),
        uc_file.clone(),
    ];
    cluster.extend(quote_all(args)?);
    let convert = format!("{exe} --uc2fasta {uc_file} --input {input} --output {temp_fasta}");
    let star_align = format!(
        "{exe} --staralign {temp_fasta} --output {}",
        quote_path(output)?
    );
    Ok(vec![cluster.join(" "), convert, star_align])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> CommandPlanner {
        CommandPlanner::new(ToolBinaries::default(), -1)
    }

    #[test]
    fn test_parse_variant() {
        assert_eq!(
            "MAFFT".parse::<ToolVariant>().unwrap(),
            ToolVariant::PrimaryAligner
        );
        assert_eq!(
            " vsearch ".parse::<ToolVariant>().unwrap(),
            ToolVariant::ClusterAligner
        );
        let err = "clustalw".parse::<ToolVariant>().unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
        assert!(err.to_string().contains("clustalw"));
    }

    #[test]
    fn test_primary_plan() {
        let plan = planner()
            .plan(
                ToolVariant::PrimaryAligner,
                Path::new("/data/run/in.fa"),
                Path::new("/data/run/word.aln"),
                &["--auto".to_string()],
            )
            .unwrap();
        assert_eq!(plan.stages, vec!["mafft --auto --thread -1 /data/run/in.fa"]);
        assert!(plan.stdout_is_alignment);
        assert!(!plan.variant.needs_normalization());
    }

    #[test]
    fn test_cluster_plan() {
        let plan = planner()
            .plan(
                ToolVariant::ClusterAligner,
                Path::new("/data/run/in.fa"),
                Path::new("/data/run/word.aln"),
                &["--id".to_string(), "0.9".to_string()],
            )
            .unwrap();
        assert_eq!(
            plan.script(),
            "vsearch --cluster_smallmem /data/run/in.fa --id 0.9 --msaout /data/run/word.aln"
        );
        assert!(!plan.stdout_is_alignment);
    }

    #[test]
    fn test_greedy_cluster_plan_has_three_stages() {
        let plan = planner()
            .plan(
                ToolVariant::GreedyClusterAligner,
                Path::new("/data/run/in.fa"),
                Path::new("/data/run/word.aln"),
                &["--id".to_string(), "0.8".to_string()],
            )
            .unwrap();
        assert_eq!(
            plan.stages,
            vec![
                "uclust --input /data/run/in.fa --uc /data/run/word_pctid_0.uc --id 0.8",
                "uclust --uc2fasta /data/run/word_pctid_0.uc --input /data/run/in.fa --output /data/run/word_pctid_0.fa",
                "uclust --staralign /data/run/word_pctid_0.fa --output /data/run/word.aln",
            ]
        );
        assert_eq!(plan.script().matches(" && ").count(), 2);
    }

    #[test]
    fn test_arguments_are_quoted() {
        let plan = planner()
            .plan(
                ToolVariant::PrimaryAligner,
                Path::new("/data/my run/in.fa"),
                Path::new("/data/my run/word.aln"),
                &["--op".to_string(), "1.53; rm -rf /".to_string()],
            )
            .unwrap();
        assert_eq!(
            plan.stages[0],
            "mafft --op '1.53; rm -rf /' --thread -1 '/data/my run/in.fa'"
        );
    }

    #[test]
    fn test_split_options() {
        assert_eq!(
            split_options("--id 0.9  --qmask 'none'").unwrap(),
            vec!["--id", "0.9", "--qmask", "none"]
        );
        assert!(split_options("").unwrap().is_empty());
        assert!(split_options("--title 'open").is_err());
    }
}
