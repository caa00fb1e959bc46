use std::fs::File;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Populates a directory with the raw source files from a compressed bundle
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// Unpacks a gzip-compressed tarball (`.tgz` / `.tar.gz`)
#[derive(Debug, Clone, Default)]
pub struct TarExtractor;

impl ArchiveExtractor for TarExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let unavailable = |reason: String| PipelineError::ArchiveUnavailable {
            path: archive.to_path_buf(),
            reason,
        };

        let file = File::open(archive).map_err(|e| unavailable(format!("cannot open: {}", e)))?;
        std::fs::create_dir_all(dest).map_err(|e| PipelineError::io(dest, e))?;

        info!("Unpacking {:?} into {:?}", archive, dest);
        Archive::new(GzDecoder::new(file))
            .unpack(dest)
            .map_err(|e| unavailable(format!("failed to unpack: {}", e)))?;

        debug!("Unpacked {:?}", archive);
        Ok(())
    }
}

/// Fail with `ArchiveUnavailable` unless every expected file exists
pub fn ensure_sources_present<'a>(
    archive: &Path,
    dir: &Path,
    files: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let missing: Vec<&str> = files
        .into_iter()
        .filter(|f| !dir.join(f).is_file())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::ArchiveUnavailable {
            path: archive.to_path_buf(),
            reason: format!("bundle did not provide {}", missing.join(", ")),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Write a `.tgz` holding the given (name, content) entries
    pub(crate) fn write_tgz(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_unpacks_sources_into_dest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tolldata.tgz");
        write_tgz(
            &archive,
            &[
                ("vehicle-data.csv", "1,t,n,car,2,VC965\n"),
                ("tollplaza-data.tsv", "1\tt\tn\tcar\t2\t4856\tPC7C042B7\n"),
                ("payment-data.txt", "PTEVC21\n"),
            ],
        );
        let dest = dir.path().join("work");

        TarExtractor.extract(&archive, &dest).unwrap();

        ensure_sources_present(
            &archive,
            &dest,
            ["vehicle-data.csv", "tollplaza-data.tsv", "payment-data.txt"],
        )
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("payment-data.txt")).unwrap(),
            "PTEVC21\n"
        );
    }

    #[test]
    fn test_missing_archive_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = TarExtractor
            .extract(&dir.path().join("tolldata.tgz"), dir.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveUnavailable { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_corrupt_archive_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tolldata.tgz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();
        let err = TarExtractor
            .extract(&archive, &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveUnavailable { .. }));
    }

    #[test]
    fn test_ensure_sources_present_names_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vehicle-data.csv"), "").unwrap();

        let err = ensure_sources_present(
            Path::new("tolldata.tgz"),
            dir.path(),
            ["vehicle-data.csv", "payment-data.txt"],
        )
        .unwrap_err();

        match err {
            PipelineError::ArchiveUnavailable { reason, .. } => {
                assert!(reason.contains("payment-data.txt"));
                assert!(!reason.contains("vehicle-data.csv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
