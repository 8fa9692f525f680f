use crate::error::TaskError;
use bio::io::fasta;
use std::{fs::File, path::Path};

pub const GAP: u8 = b'-';

/// One aligned sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRow {
    pub id: String,
    pub description: Option<String>,
    pub sequence: Vec<u8>,
}

impl AlignmentRow {
    pub fn new(id: &str, sequence: &[u8]) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            sequence: sequence.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Rows of an alignment in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentMatrix {
    pub rows: Vec<AlignmentRow>,
}

impl AlignmentMatrix {
    pub fn from_rows(rows: Vec<AlignmentRow>) -> Self {
        Self { rows }
    }

    pub fn from_fasta_file(path: &Path) -> Result<Self, TaskError> {
        if !path.exists() {
            return Err(TaskError::InputMissing {
                path: path.to_path_buf(),
            });
        }
        let reader = fasta::Reader::new(File::open(path)?);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(AlignmentRow {
                id: record.id().to_string(),
                description: record.desc().map(ToString::to_string),
                sequence: record.seq().to_vec(),
            });
        }
        Ok(Self { rows })
    }

    pub fn write_fasta_file(&self, path: &Path) -> Result<(), TaskError> {
        let mut writer = fasta::Writer::new(File::create(path)?);
        for row in &self.rows {
            writer.write(&row.id, row.description.as_deref(), &row.sequence)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Length of the longest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(AlignmentRow::len).max().unwrap_or(0)
    }
}
