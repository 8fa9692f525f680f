use crate::{error::TaskError, stats::ColumnProfile};
use csv::{QuoteStyle, WriterBuilder};
use std::path::Path;

/// Name of the column report written for `alignment_file_name`.
pub fn report_file_name(alignment_file_name: &str) -> String {
    format!("{alignment_file_name}.txt")
}

type Metric = (&'static str, fn(&ColumnProfile) -> String);

const METRICS: [Metric; 17] = [
    ("A count", |c| c.count(b'A').to_string()),
    ("T count", |c| c.count(b'T').to_string()),
    ("G count", |c| c.count(b'G').to_string()),
    ("C count", |c| c.count(b'C').to_string()),
    ("Miss count", |c| c.missing.to_string()),
    ("Gap count", |c| c.real_gaps().to_string()),
    ("etc count", |c| c.other.to_string()),
    ("MissGap count", |c| c.gaps.to_string()),
    ("A freq", |c| c.frequency(b'A').to_string()),
    ("T freq", |c| c.frequency(b'T').to_string()),
    ("G freq", |c| c.frequency(b'G').to_string()),
    ("C freq", |c| c.frequency(b'C').to_string()),
    ("Total count", |c| c.total().to_string()),
    ("Coverage", |c| c.coverage().to_string()),
    ("IUPAC", |c| c.iupac.symbol().to_string()),
    ("Major base", |c| {
        c.majority
            .map_or_else(|| "-".to_string(), |b| char::from(b).to_string())
    }),
    ("Major base count", |c| c.majority_count.to_string()),
];

/// Writes the per-column table: a `Position` header with 1-based column
/// numbers, then one tab-separated line per metric.
pub fn write_column_report(path: &Path, columns: &[ColumnProfile]) -> Result<(), TaskError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_path(path)?;

    let header = std::iter::once("Position".to_string())
        .chain((1..=columns.len()).map(|i| i.to_string()));
    writer.write_record(header)?;
    for (name, metric) in METRICS.iter() {
        let record = std::iter::once(name.to_string()).chain(columns.iter().map(metric));
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}
