//! Task-list and design-matrix files.
//!
//! K_i: Both files list respondents in ascending id and rows in build order.
//! K_i: The design matrix is always indicator coded, one column per element,
//!   whatever coding the gate used.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Certificate;
use crate::models::{AcceptedRespondent, ConjointError, Layout, Result, Slot, Task};

/// One line of the task-list JSONL.
#[derive(Debug, Serialize)]
struct TaskLine {
    respondent: usize,
    tasks: Vec<Task>,
}

/// Where a run's files land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub tasks: PathBuf,
    pub design_matrix: PathBuf,
    pub certificate_txt: PathBuf,
    pub certificate_json: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, slug: &str) -> Self {
        Self {
            tasks: dir.join(format!("{slug}_tasks.jsonl")),
            design_matrix: dir.join(format!("{slug}_design_matrix.csv")),
            certificate_txt: dir.join(format!("{slug}_qc_certificate.txt")),
            certificate_json: dir.join(format!("{slug}_qc_certificate.json")),
        }
    }
}

/// Combined design matrix: header `respondent,<element ids>`, one record per row.
///
/// Returns the exact bytes written to disk so the dataset id can be taken
/// from them.
pub fn design_matrix_csv(accepted: &[AcceptedRespondent], layout: &Layout) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["respondent"];
    header.extend(layout.element_ids());
    writer.write_record(&header).map_err(csv_error)?;

    let sizes = layout.sizes();
    let width = layout.total_elements() + 1;
    for respondent in accepted {
        let id = respondent.respondent().to_string();
        for row in &respondent.design.rows {
            let mut record = Vec::with_capacity(width);
            record.push(id.as_str());
            for (slot, &size) in row.slots.iter().zip(&sizes) {
                for j in 0..size {
                    let bit = matches!(slot, Slot::Active(e) if usize::from(*e) == j);
                    record.push(if bit { "1" } else { "0" });
                }
            }
            writer.write_record(&record).map_err(csv_error)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| ConjointError::Internal(format!("Flushing design matrix: {e}")))
}

fn csv_error(e: csv::Error) -> ConjointError {
    ConjointError::Internal(format!("Encoding design matrix: {e}"))
}

/// Hex SHA-256 of the design-matrix bytes, used as the dataset id.
pub fn dataset_id(csv: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(csv);
    format!("{:x}", hasher.finalize())
}

/// Write the task list as JSONL, one respondent per line.
pub fn write_tasks(path: &Path, accepted: &[AcceptedRespondent], layout: &Layout) -> Result<()> {
    let file = File::create(path).map_err(|e| ConjointError::io("creating task list", e))?;
    let mut writer = BufWriter::new(file);

    for respondent in accepted {
        let line = TaskLine {
            respondent: respondent.respondent(),
            tasks: respondent.design.to_tasks(layout),
        };
        let json = serde_json::to_string(&line)
            .map_err(|e| ConjointError::Internal(format!("Serializing task list: {e}")))?;
        writeln!(writer, "{json}").map_err(|e| ConjointError::io("writing task list", e))?;
    }

    writer
        .flush()
        .map_err(|e| ConjointError::io("flushing task list", e))
}

fn write_bytes(path: &Path, content: &[u8], context: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| ConjointError::io(context, e))
}

/// Write every output file for a finished run.
///
/// `csv` must be the bytes the certificate's dataset id was computed from.
pub fn write_outputs(
    dir: &Path,
    slug: &str,
    layout: &Layout,
    accepted: &[AcceptedRespondent],
    csv: &[u8],
    certificate: &Certificate,
) -> Result<OutputPaths> {
    fs::create_dir_all(dir).map_err(|e| ConjointError::io("creating output dir", e))?;
    let paths = OutputPaths::new(dir, slug);

    write_tasks(&paths.tasks, accepted, layout)?;
    write_bytes(&paths.design_matrix, csv, "writing design matrix")?;
    write_bytes(
        &paths.certificate_txt,
        certificate.to_string().as_bytes(),
        "writing certificate",
    )?;
    write_bytes(
        &paths.certificate_json,
        certificate.to_json()?.as_bytes(),
        "writing certificate",
    )?;

    info!(
        dir = %dir.display(),
        respondents = accepted.len(),
        dataset_id = %certificate.dataset_id,
        "Outputs written"
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, RespondentDesign, Row};
    use crate::output::fixtures;

    fn layout() -> Layout {
        Layout::from_sizes(&[("A", 2), ("B", 2)]).unwrap()
    }

    #[test]
    fn test_design_matrix_csv_layout() {
        let design = RespondentDesign::new(
            3,
            vec![
                Row::new(vec![Slot::Active(1), Slot::Absent]),
                Row::new(vec![Slot::Active(0), Slot::Active(1)]),
            ],
        );
        let accepted = fixtures::accepted(design);
        let csv = design_matrix_csv(&[accepted], &layout()).unwrap();
        assert_eq!(
            String::from_utf8(csv).unwrap(),
            "respondent,A_1,A_2,B_1,B_2\n3,0,1,0,0\n3,1,0,0,1\n"
        );
    }

    #[test]
    fn test_design_matrix_csv_quotes_element_ids() {
        let layout = Layout::new(vec![
            Category {
                name: "Size".to_string(),
                elements: vec!["small, red".to_string(), "big".to_string()],
            },
            Category {
                name: "Tone".to_string(),
                elements: vec!["say \"hi\"".to_string()],
            },
        ])
        .unwrap();
        let design = RespondentDesign::new(
            1,
            vec![
                Row::new(vec![Slot::Active(0), Slot::Absent]),
                Row::new(vec![Slot::Active(1), Slot::Active(0)]),
            ],
        );
        let bytes = design_matrix_csv(&[fixtures::accepted(design)], &layout).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("respondent,\"small, red\",big,\"say \"\"hi\"\"\"\n"));

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let header = reader.headers().unwrap().clone();
        assert_eq!(
            header.iter().collect::<Vec<_>>(),
            ["respondent", "small, red", "big", "say \"hi\""]
        );
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.len(), header.len());
        }
        assert_eq!(records[1].iter().collect::<Vec<_>>(), ["1", "0", "1", "1"]);
    }

    #[test]
    fn test_dataset_id_is_sha256_hex() {
        let id = dataset_id(b"");
        assert_eq!(
            id,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(dataset_id(b"respondent\n"), id);
    }

    #[test]
    fn test_write_tasks_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        let design = RespondentDesign::new(1, vec![Row::new(vec![Slot::Absent, Slot::Active(0)])]);
        write_tasks(&path, &[fixtures::accepted(design)], &layout()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["respondent"], 1);
        assert!(line["tasks"][0]["A"].is_null());
        assert_eq!(line["tasks"][0]["B"], "B_1");
        assert!(content.contains(r#"{"A":null,"B":"B_1"}"#));
    }
}
