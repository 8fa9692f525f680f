//! Cleanup of cluster-tool alignments.
//!
//! vsearch and uclust emit a synthetic `consensus` record, flag centroid ids
//! with a leading `*`, use `.`/`~` for gaps and do not pad clusters to a
//! common width. Statistics expect none of that.

use crate::{
    alignment::{AlignmentMatrix, AlignmentRow, GAP},
    error::TaskError,
};
use std::{fs, path::Path};
use tempfile::NamedTempFile;

pub const CONSENSUS_ID: &str = "consensus";
pub const CENTROID_MARKER: char = '*';

fn is_consensus(row: &AlignmentRow) -> bool {
    row.id == CONSENSUS_ID
}

fn canonical_symbol(symbol: u8) -> u8 {
    match symbol {
        b'.' | b'~' => GAP,
        other => other.to_ascii_uppercase(),
    }
}

/// Returns the cleaned, rectangular form of `matrix`. Fails when no
/// non-consensus record carries any sequence.
pub fn normalize_matrix(matrix: AlignmentMatrix, source: &Path) -> Result<AlignmentMatrix, TaskError> {
    let max_length = matrix
        .rows
        .iter()
        .filter(|r| !is_consensus(r))
        .map(AlignmentRow::len)
        .max()
        .unwrap_or(0);
    if max_length == 0 {
        return Err(TaskError::EmptyAlignment {
            path: source.to_path_buf(),
        });
    }

    let rows = matrix
        .rows
        .into_iter()
        .filter(|r| !is_consensus(r))
        .map(|row| {
            let id = row
                .id
                .strip_prefix(CENTROID_MARKER)
                .unwrap_or(&row.id)
                .to_string();
            let mut sequence: Vec<u8> = row.sequence.iter().map(|s| canonical_symbol(*s)).collect();
            sequence.resize(max_length, GAP);
            AlignmentRow {
                id,
                description: row.description,
                sequence,
            }
        })
        .collect();
    Ok(AlignmentMatrix::from_rows(rows))
}

/// Normalizes the alignment file at `path` in place and returns the cleaned
/// matrix. The rewrite goes through a sibling temp file that replaces the
/// original in one rename and keeps its permissions.
pub fn normalize_alignment_file(path: &Path) -> Result<AlignmentMatrix, TaskError> {
    let matrix = normalize_matrix(AlignmentMatrix::from_fasta_file(path)?, path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(dir)?;
    matrix.write_fasta_file(temp.path())?;
    // temp files are created 0600; keep whatever mode the tool gave the original
    fs::set_permissions(temp.path(), fs::metadata(path)?.permissions())?;
    temp.persist(path).map_err(|e| e.error)?;
    log::debug!(
        "Normalized {} to {} rows of width {}",
        path.display(),
        matrix.len(),
        matrix.width()
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_cluster_output_is_cleaned() {
        let td = tempdir().unwrap();
        let path = td.path().join("word.aln");
        fs::write(
            &path,
            ">*seq1\nac.gt~\n>seq2\nACG\n>consensus\nACGTACGTAC\n>seq3\nA..T\n",
        )
        .unwrap();

        let matrix = normalize_alignment_file(&path).unwrap();
        let ids: Vec<&str> = matrix.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["seq1", "seq2", "seq3"]);
        assert_eq!(matrix.rows[0].sequence, b"AC-GT-".to_vec());
        assert_eq!(matrix.rows[1].sequence, b"ACG---".to_vec());
        assert_eq!(matrix.rows[2].sequence, b"A--T--".to_vec());
        assert!(matrix.rows.iter().all(|r| r.len() == 6));

        let reread = AlignmentMatrix::from_fasta_file(&path).unwrap();
        assert_eq!(reread, matrix);
        assert!(reread.rows.iter().all(|r| r.id != CONSENSUS_ID));
    }

    #[test]
    fn test_normalizing_twice_is_a_no_op() {
        let td = tempdir().unwrap();
        let path = td.path().join("word.aln");
        fs::write(&path, ">a\nAC-T\n>b\nACGT\n").unwrap();
        normalize_alignment_file(&path).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        normalize_alignment_file(&path).unwrap();
        let twice = fs::read_to_string(&path).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, ">a\nAC-T\n>b\nACGT\n");
    }

    #[test]
    fn test_only_consensus_is_empty_alignment() {
        let td = tempdir().unwrap();
        let path = td.path().join("word.aln");
        fs::write(&path, ">consensus\nACGT\n").unwrap();
        let err = normalize_alignment_file(&path).unwrap_err();
        assert!(matches!(err, TaskError::EmptyAlignment { .. }));
    }

    #[test]
    fn test_empty_file_is_empty_alignment() {
        let td = tempdir().unwrap();
        let path = td.path().join("word.aln");
        fs::write(&path, "").unwrap();
        let err = normalize_alignment_file(&path).unwrap_err();
        assert!(matches!(err, TaskError::EmptyAlignment { .. }));
        // the original stays untouched when normalization fails
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let td = tempdir().unwrap();
        let path = td.path().join("word.aln");
        fs::write(&path, ">consensus\nACGT\n>*a\nACGT\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        normalize_alignment_file(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert_eq!(fs::read_to_string(&path).unwrap(), ">a\nACGT\n");
    }

    #[test]
    fn test_only_first_marker_is_stripped() {
        let matrix = AlignmentMatrix::from_rows(vec![AlignmentRow::new("**x", b"A")]);
        let cleaned = normalize_matrix(matrix, Path::new("mem")).unwrap();
        assert_eq!(cleaned.rows[0].id, "*x");
    }
}
