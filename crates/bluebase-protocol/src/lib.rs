//! Machine-readable contracts shared between the bluebase worker and the
//! collaborators that consume its results (task runner, webhook receiver).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Majority-frequency thresholds of the identity buckets, highest first.
pub const IDENTITY_THRESHOLDS: [u32; 6] = [90, 80, 70, 60, 50, 40];

/// Aggregate gap and blue base statistics of one alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub total_seq: usize,
    pub gap_seq_count: usize,
    pub gap_count: usize,
    pub gap_frequency: f64,
    pub gap_sum_length: usize,
    /// Summed gap length divided by the number of gapped sequences.
    pub gap_length: f64,
    pub sum_of_blue_bases: usize,
    pub no_blue_bases: usize,
    pub no_miss_bases: usize,
    pub blue_base_ratio: f64,
    /// Identity threshold -> number of blue bases in that bucket. Always
    /// carries every entry of [`IDENTITY_THRESHOLDS`].
    pub blue_base_count: BTreeMap<u32, usize>,
}

impl Statistic {
    pub fn empty_buckets() -> BTreeMap<u32, usize> {
        IDENTITY_THRESHOLDS.iter().map(|t| (*t, 0)).collect()
    }
}

/// CPU and memory usage of an external tool run, summed over its process tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageSummary {
    /// Peak resident memory in bytes.
    pub max_memory: u64,
    /// Mean resident memory in bytes over all samples.
    pub avg_memory: u64,
    pub max_cpu: f64,
    pub avg_cpu: f64,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Flat outcome record delivered to the result webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub status: TaskStatus,
    pub task_id: String,
    pub align_file: Option<String>,
    pub stat_file: Option<String>,
    pub statistic: Option<Statistic>,
    pub output_dir: Option<String>,
    pub message: Option<String>,
    pub resource_usage: Option<ResourceUsageSummary>,
}

impl TaskNotification {
    pub fn success(
        task_id: &str,
        output_dir: Option<String>,
        align_file: String,
        stat_file: String,
        statistic: Statistic,
        resource_usage: ResourceUsageSummary,
    ) -> Self {
        Self {
            status: TaskStatus::Success,
            task_id: task_id.to_string(),
            align_file: Some(align_file),
            stat_file: Some(stat_file),
            statistic: Some(statistic),
            output_dir,
            message: None,
            resource_usage: Some(resource_usage),
        }
    }

    pub fn error(task_id: &str, output_dir: Option<String>, message: String) -> Self {
        Self {
            status: TaskStatus::Error,
            task_id: task_id.to_string(),
            align_file: None,
            stat_file: None,
            statistic: None,
            output_dir,
            message: Some(message),
            resource_usage: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_error_payload_shape() {
        let payload = TaskNotification::error("t-1", Some("run42".to_string()), "boom".to_string());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "ERROR",
                "task_id": "t-1",
                "align_file": null,
                "stat_file": null,
                "statistic": null,
                "output_dir": "run42",
                "message": "boom",
                "resource_usage": null,
            })
        );
    }

    #[test]
    fn test_success_payload_carries_all_buckets() {
        let statistic = Statistic {
            total_seq: 3,
            gap_seq_count: 0,
            gap_count: 0,
            gap_frequency: 0.0,
            gap_sum_length: 0,
            gap_length: 0.0,
            sum_of_blue_bases: 14,
            no_blue_bases: 1,
            no_miss_bases: 15,
            blue_base_ratio: 14.0 / 15.0,
            blue_base_count: Statistic::empty_buckets(),
        };
        let payload = TaskNotification::success(
            "t-2",
            Some("run42".to_string()),
            "word.aln".to_string(),
            "word.aln.txt".to_string(),
            statistic,
            ResourceUsageSummary::default(),
        );
        assert!(payload.is_success());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["status"], Value::from("SUCCESS"));
        let buckets = value["statistic"]["blue_base_count"].as_object().unwrap();
        let mut keys: Vec<&str> = buckets.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["40", "50", "60", "70", "80", "90"]);
        assert_eq!(value["resource_usage"]["sample_count"], Value::from(0));
    }
}
