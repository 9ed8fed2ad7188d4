//! plm-embed-test-data
//!
//! Small protein tables embedded in the crate for use in testing.
//!
//! The test files are represented as `TestFile` objects which package the raw binary data
//! and create temporary files for programs to operate on.
use std::fs;
use tempfile::{Builder, NamedTempFile};

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use plm_embed_test_data::TestFile;
/// let (csv_file, _temp) = TestFile::proteins_01().create_temp().unwrap();
/// ```
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Seven UniProt-style records with `name,sequence` columns.
    ///
    /// Includes a 541-residue spike fragment and one record with non-standard
    /// residue codes.
    pub fn proteins_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/proteins/uniprot_small.csv"),
            suffix: "csv",
        }
    }
    /// Header row only.
    pub fn proteins_empty() -> Self {
        Self {
            filebinary: include_bytes!("../data/proteins/empty.csv"),
            suffix: "csv",
        }
    }
    /// Integer labels under `id,seq` column names.
    pub fn proteins_numeric_labels() -> Self {
        Self {
            filebinary: include_bytes!("../data/proteins/numeric_labels.csv"),
            suffix: "csv",
        }
    }
    /// Three records, the second has an empty sequence field.
    pub fn proteins_missing_sequence() -> Self {
        Self {
            filebinary: include_bytes!("../data/proteins/missing_sequence.csv"),
            suffix: "csv",
        }
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }
}
