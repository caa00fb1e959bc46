use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecordsIntoIter, Writer};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::models::Row;

/// Writes a comma-delimited artifact with a header row.
///
/// Rows go to a uniquely named sibling `.tmp` file which is renamed over the
/// target only on [`commit`](Self::commit). Dropping an uncommitted writer
/// removes the temporary, so a failed stage never leaves a partial artifact
/// behind, and an abandoned attempt never shares a file with its retry.
pub struct ArtifactWriter {
    writer: Option<Writer<File>>,
    tmp_path: PathBuf,
    path: PathBuf,
    rows: usize,
}

impl ArtifactWriter {
    pub fn create(path: &Path, header: &[String]) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let tmp_path = tmp_path_for(path);
        let file = File::create(&tmp_path).map_err(|e| PipelineError::io(&tmp_path, e))?;
        let mut writer = Writer::from_writer(file);
        writer
            .write_record(header)
            .map_err(|e| PipelineError::from_csv(&tmp_path, e))?;

        Ok(Self {
            writer: Some(writer),
            tmp_path,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        self.write_values(row.values())
    }

    pub fn write_values(&mut self, values: &[String]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(PipelineError::io(
                &self.path,
                std::io::Error::other("artifact writer already closed"),
            ));
        };
        writer
            .write_record(values)
            .map_err(|e| PipelineError::from_csv(&self.tmp_path, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, excluding the header
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush, sync, and move the artifact into place
    pub fn commit(mut self) -> Result<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Ok(self.path.clone());
        };

        let committed = writer
            .into_inner()
            .map_err(|e| PipelineError::io(&self.tmp_path, e.into_error()))
            .and_then(|file| {
                file.sync_all()
                    .map_err(|e| PipelineError::io(&self.tmp_path, e))
            })
            .and_then(|()| {
                std::fs::rename(&self.tmp_path, &self.path)
                    .map_err(|e| PipelineError::io(&self.path, e))
            });

        if let Err(e) = committed {
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(e);
        }

        debug!("Committed {} rows to {:?}", self.rows, self.path);
        Ok(self.path.clone())
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn is_tmp_for(candidate: &Path, path: &Path) -> bool {
    let (Some(candidate), Some(name)) = (
        candidate.file_name().and_then(|n| n.to_str()),
        path.file_name().and_then(|n| n.to_str()),
    ) else {
        return false;
    };
    candidate
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|rest| rest.ends_with(".tmp"))
}

/// Reads an artifact written by [`ArtifactWriter`], header first
pub struct ArtifactReader {
    header: Arc<[String]>,
    rows: StringRecordsIntoIter<File>,
    path: PathBuf,
    failed: bool,
}

impl ArtifactReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| PipelineError::from_csv(path, e))?;

        let header: Arc<[String]> = reader
            .headers()
            .map_err(|e| PipelineError::from_csv(path, e))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();

        Ok(Self {
            header,
            rows: reader.into_records(),
            path: path.to_path_buf(),
            failed: false,
        })
    }

    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ArtifactReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Iterator for ArtifactReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let item = self
            .rows
            .next()?
            .map_err(|e| PipelineError::from_csv(&self.path, e))
            .map(|record| {
                Row::new(
                    Arc::clone(&self.header),
                    record.iter().map(str::to_string).collect(),
                )
            });

        self.failed = item.is_err();
        Some(item)
    }
}

/// Delete artifacts, and their temporaries, left over from a failed attempt
pub fn discard_artifacts(paths: &[PathBuf]) {
    for path in paths {
        let mut doomed = vec![path.clone()];
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if let Ok(entries) = std::fs::read_dir(dir) {
            doomed.extend(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| is_tmp_for(p, path)),
            );
        }

        for candidate in doomed.iter().filter(|p| p.exists()) {
            match std::fs::remove_file(candidate) {
                Ok(()) => debug!("Discarded {:?}", candidate),
                Err(e) => warn!("Could not discard {:?}: {}", candidate, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_commit_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csv_data.csv");

        let mut writer = ArtifactWriter::create(&path, &header(&["Rowid", "Vehicle type"])).unwrap();
        writer
            .write_values(&header(&["1", "car, small"]))
            .unwrap();
        writer.write_values(&header(&["2", "truck"])).unwrap();
        assert_eq!(writer.rows(), 2);
        writer.commit().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Rowid,Vehicle type\n1,\"car, small\"\n2,truck\n");

        let reader = ArtifactReader::open(&path).unwrap();
        assert_eq!(&reader.header()[..], ["Rowid", "Vehicle type"]);
        assert!(format!("{:?}", reader).contains("csv_data.csv"));
        let rows: Vec<Row> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Vehicle type"), Some("car, small"));
    }

    #[test]
    fn test_uncommitted_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extracted_data.csv");

        {
            let mut writer = ArtifactWriter::create(&path, &header(&["a"])).unwrap();
            writer.write_values(&header(&["1"])).unwrap();
            assert!(writer.tmp_path.exists());
        }

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_artifact_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactReader::open(&dir.path().join("nope.csv")).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
    }

    #[test]
    fn test_discard_removes_final_and_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsv_data.csv");
        let tmp = tmp_path_for(&path);
        let unrelated = dir.path().join("tsv_data.csv.bak");
        std::fs::write(&path, "x\n").unwrap();
        std::fs::write(&tmp, "x\n").unwrap();
        std::fs::write(&unrelated, "x\n").unwrap();

        discard_artifacts(&[path.clone()]);

        assert!(!path.exists());
        assert!(!tmp.exists());
        assert!(unrelated.exists());
    }
}
