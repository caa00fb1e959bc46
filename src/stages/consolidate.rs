use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::io::{ArtifactReader, ArtifactWriter};
use crate::models::{ConsolidatedRow, ProjectedRecord, Row};
use crate::pipeline::{StageContext, StageOutput};

/// Concatenates one projected record from each of three sources into a
/// consolidated row.
///
/// Alignment is purely positional: row `i` of every source is paired with row
/// `i` of the others, no key is consulted, and the output stops at the
/// shortest source. If the sources drift apart (a dropped or reordered line
/// upstream) rows are silently mispaired and the longer tails are lost. Callers
/// that cannot trust the sources to be in lockstep need a key join instead.
#[derive(Debug, Clone)]
pub struct RowAligner {
    header: Arc<[String]>,
    widths: [usize; 3],
}

impl RowAligner {
    /// Build the consolidated layout: source A columns, then B, then C
    pub fn new(headers: [&[String]; 3]) -> Result<Self> {
        let mut header: Vec<String> = Vec::with_capacity(headers.iter().map(|h| h.len()).sum());
        for field in headers.iter().flat_map(|h| h.iter()) {
            if header.contains(field) {
                return Err(PipelineError::DuplicateField {
                    field: field.clone(),
                });
            }
            header.push(field.clone());
        }

        Ok(Self {
            header: header.into(),
            widths: headers.map(|h| h.len()),
        })
    }

    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    /// Concatenate three records into one row
    pub fn merge(
        &self,
        a: &ProjectedRecord,
        b: &ProjectedRecord,
        c: &ProjectedRecord,
    ) -> Result<ConsolidatedRow> {
        for (record, width) in [a, b, c].into_iter().zip(self.widths) {
            if record.len() != width {
                return Err(PipelineError::InvalidConfig {
                    reason: format!(
                        "record with {} fields does not fit a {}-column segment",
                        record.len(),
                        width
                    ),
                });
            }
        }

        let values = [a, b, c]
            .into_iter()
            .flat_map(|r| r.values().iter().cloned())
            .collect();
        Ok(Row::new(Arc::clone(&self.header), values))
    }

    /// Zip three record streams into consolidated rows.
    ///
    /// The first error from any source ends the alignment. Once it finishes,
    /// [`Alignment::dropped`] counts what the longer sources had left.
    pub fn align<A, B, C>(
        &self,
        a: A,
        b: B,
        c: C,
    ) -> Alignment<'_, A::IntoIter, B::IntoIter, C::IntoIter>
    where
        A: IntoIterator<Item = Result<ProjectedRecord>>,
        B: IntoIterator<Item = Result<ProjectedRecord>>,
        C: IntoIterator<Item = Result<ProjectedRecord>>,
    {
        Alignment {
            aligner: self,
            a: a.into_iter(),
            b: b.into_iter(),
            c: c.into_iter(),
            pending: [0; 3],
            done: false,
        }
    }
}

/// Iterator returned by [`RowAligner::align`]
pub struct Alignment<'a, A, B, C> {
    aligner: &'a RowAligner,
    a: A,
    b: B,
    c: C,
    /// Rows already pulled from each source when the shortest one ran out
    pending: [usize; 3],
    done: bool,
}

impl<A, B, C> Alignment<'_, A, B, C>
where
    A: Iterator<Item = Result<ProjectedRecord>>,
    B: Iterator<Item = Result<ProjectedRecord>>,
    C: Iterator<Item = Result<ProjectedRecord>>,
{
    fn step(&mut self) -> Result<Option<ConsolidatedRow>> {
        let next = (
            self.a.next().transpose()?,
            self.b.next().transpose()?,
            self.c.next().transpose()?,
        );
        match next {
            (Some(ra), Some(rb), Some(rc)) => self.aligner.merge(&ra, &rb, &rc).map(Some),
            (ra, rb, rc) => {
                self.pending = [ra.is_some(), rb.is_some(), rc.is_some()].map(usize::from);
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Rows each source had beyond the shortest one. Drains the sources.
    pub fn dropped(mut self) -> Result<[usize; 3]> {
        while self.next().is_some() {}
        Ok([
            self.pending[0] + remaining(&mut self.a)?,
            self.pending[1] + remaining(&mut self.b)?,
            self.pending[2] + remaining(&mut self.c)?,
        ])
    }
}

impl<A, B, C> Iterator for Alignment<'_, A, B, C>
where
    A: Iterator<Item = Result<ProjectedRecord>>,
    B: Iterator<Item = Result<ProjectedRecord>>,
    C: Iterator<Item = Result<ProjectedRecord>>,
{
    type Item = Result<ConsolidatedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Execute the consolidate stage over three projected artifacts
pub fn execute_consolidate(
    inputs: [&Path; 3],
    output: &Path,
    ctx: &StageContext,
) -> Result<StageOutput> {
    let [a, b, c] = [
        ArtifactReader::open(inputs[0])?,
        ArtifactReader::open(inputs[1])?,
        ArtifactReader::open(inputs[2])?,
    ];

    let aligner = RowAligner::new([&a.header()[..], &b.header()[..], &c.header()[..]])?;
    info!(
        "{}: aligning {} + {} + {} columns",
        ctx.stage(),
        a.header().len(),
        b.header().len(),
        c.header().len()
    );

    let mut writer = ArtifactWriter::create(output, aligner.header())?;

    let mut rows = aligner.align(a, b, c);
    for row in rows.by_ref() {
        ctx.checkpoint()?;
        writer.write_row(&row?)?;
    }
    let leftovers = rows.dropped()?;

    let mut dropped_rows = Vec::new();
    for (input, dropped) in inputs.iter().zip(leftovers) {
        if dropped > 0 {
            warn!(
                "{}: {:?} has {} more rows than the shortest source; they were dropped",
                ctx.stage(),
                input,
                dropped
            );
            dropped_rows.push((input.display().to_string(), dropped));
        }
    }

    let rows = writer.rows();
    let path = ctx.commit(writer)?;
    info!("{}: {} consolidated rows", ctx.stage(), rows);

    Ok(StageOutput {
        rows,
        artifacts: vec![path],
        dropped_rows,
    })
}

fn remaining<I: Iterator<Item = Result<ProjectedRecord>>>(rows: &mut I) -> Result<usize> {
    rows.try_fold(0, |n, row| row.map(|_| n + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }

    fn rows(header: &Arc<[String]>, values: &[&[&str]]) -> Vec<ProjectedRecord> {
        values
            .iter()
            .map(|v| Row::new(Arc::clone(header), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn ok(rows: &[ProjectedRecord]) -> Vec<Result<ProjectedRecord>> {
        rows.iter().cloned().map(Ok).collect()
    }

    fn aligner(a: &Arc<[String]>, b: &Arc<[String]>, c: &Arc<[String]>) -> RowAligner {
        RowAligner::new([&a[..], &b[..], &c[..]]).unwrap()
    }

    #[test]
    fn test_length_is_min_of_sources() {
        let (ha, hb, hc) = (header(&["type"]), header(&["axles"]), header(&["code"]));
        let al = aligner(&ha, &hb, &hc);

        for (la, lb, lc) in [(3, 3, 3), (5, 2, 4), (0, 4, 4), (4, 4, 1)] {
            let a = rows(&ha, &vec![&["CAR"][..]; la]);
            let b = rows(&hb, &vec![&["2"][..]; lb]);
            let c = rows(&hc, &vec![&["A1"][..]; lc]);
            let mut aligned = al.align(ok(&a), ok(&b), ok(&c));
            let merged: Vec<_> = aligned.by_ref().collect::<Result<_>>().unwrap();
            let shortest = la.min(lb).min(lc);
            assert_eq!(merged.len(), shortest);
            assert_eq!(
                aligned.dropped().unwrap(),
                [la - shortest, lb - shortest, lc - shortest]
            );
        }
    }

    #[test]
    fn test_row_i_is_concatenation_of_each_row_i() {
        let (ha, hb, hc) = (header(&["id", "type"]), header(&["axles"]), header(&["code"]));
        let a = rows(&ha, &[&["1", "car"], &["2", "truck"], &["3", "van"]]);
        let b = rows(&hb, &[&["2"], &["5"], &["2"], &["9"]]);
        let c = rows(&hc, &[&["A1"], &["B2"], &["A1"]]);

        let al = aligner(&ha, &hb, &hc);
        let merged: Vec<_> = al
            .align(ok(&a), ok(&b), ok(&c))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(&merged[0].header()[..], ["id", "type", "axles", "code"]);
        for (i, row) in merged.iter().enumerate() {
            let expected: Vec<String> = [&a[i], &b[i], &c[i]]
                .iter()
                .flat_map(|r| r.values().to_vec())
                .collect();
            assert_eq!(row.values(), expected.as_slice());
        }
    }

    #[test]
    fn test_source_error_ends_alignment() {
        let (ha, hb, hc) = (header(&["type"]), header(&["axles"]), header(&["code"]));
        let al = aligner(&ha, &hb, &hc);
        let mut b = ok(&rows(&hb, &[&["2"], &["5"]]));
        b[1] = Err(PipelineError::MalformedRecord {
            input: "tsv_data.csv".to_string(),
            line: 3,
            reason: "bad".to_string(),
        });

        let mut aligned = al.align(
            ok(&rows(&ha, &[&["CAR"], &["VAN"], &["BUS"]])),
            b,
            ok(&rows(&hc, &[&["A1"], &["B2"], &["C3"]])),
        );
        assert!(aligned.next().unwrap().is_ok());
        assert!(aligned.next().unwrap().is_err());
        assert!(aligned.next().is_none());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let (ha, hb) = (header(&["Rowid"]), header(&["Rowid"]));
        let hc = header(&["code"]);
        assert!(matches!(
            RowAligner::new([&ha[..], &hb[..], &hc[..]]),
            Err(PipelineError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_execute_consolidate_truncates_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ["csv_data.csv", "tsv_data.csv", "fixed_width_data.csv"]
            .map(|name| dir.path().join(name));
        std::fs::write(&paths[0], "type\nCAR\nTRUCK\nCAR\n").unwrap();
        std::fs::write(&paths[1], "axles\n2\n5\n2\n7\n8\n").unwrap();
        std::fs::write(&paths[2], "code\nA1\nB2\nA1\n").unwrap();
        let output = dir.path().join("extracted_data.csv");

        let out = execute_consolidate(
            [paths[0].as_path(), paths[1].as_path(), paths[2].as_path()],
            &output,
            &StageContext::new("consolidate", None),
        )
        .unwrap();

        assert_eq!(out.rows, 3);
        assert_eq!(out.dropped_rows.len(), 1);
        assert_eq!(out.dropped_rows[0].1, 2);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "type,axles,code\nCAR,2,A1\nTRUCK,5,B2\nCAR,2,A1\n"
        );
    }

    #[test]
    fn test_missing_input_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("csv_data.csv");
        std::fs::write(&present, "type\nCAR\n").unwrap();
        let missing = dir.path().join("tsv_data.csv");
        let output = dir.path().join("extracted_data.csv");

        let err = execute_consolidate(
            [present.as_path(), missing.as_path(), present.as_path()],
            &output,
            &StageContext::new("consolidate", None),
        )
        .unwrap_err();

        assert!(err.is_retryable());
        assert!(!output.exists());
    }
}
