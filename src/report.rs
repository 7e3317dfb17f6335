use std::fs::{File, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::BidsError;
use crate::store::DatasetStore;

pub const PARTICIPANT_ID: &str = "participant_id";

/// Participant listing built from the manifest, one row per manifest row.
/// Columns are the union of every key seen, `participant_id` first.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTable {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl ParticipantTable {
    pub fn new() -> Self {
        Self {
            columns: vec![PARTICIPANT_ID.to_string()],
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, participant_id: &str, infos: &Map<String, Value>) {
        let mut row = Map::new();
        row.insert(PARTICIPANT_ID.to_string(), Value::from(participant_id));
        for (key, value) in infos {
            if key == PARTICIPANT_ID {
                continue;
            }
            if !self.columns.iter().any(|column| column == key) {
                self.columns.push(key.clone());
            }
            row.insert(key.clone(), value.clone());
        }
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_tsv(&self) -> Result<Vec<u8>, BidsError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            let record = self
                .columns
                .iter()
                .map(|column| row.get(column).map(cell).unwrap_or_default());
            writer
                .write_record(record)
                .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| BidsError::Filesystem(err.to_string()))
    }

    /// Replaces any previous listing at `path`.
    pub fn write(&self, path: &Utf8Path) -> Result<(), BidsError> {
        DatasetStore::write_bytes_atomic(path, &self.to_tsv()?)
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Append-only CSV log of the download specification used per subject/session.
pub struct DownloadReport {
    path: Utf8PathBuf,
    writer: csv::Writer<File>,
}

impl DownloadReport {
    pub fn create(report_dir: &Utf8Path, now: DateTime<Utc>) -> Result<Self, BidsError> {
        DatasetStore::ensure_dir(report_dir)?;
        let path = report_dir.join(format!(
            "download_report_{}.csv",
            now.format("%d-%b-%Y-%H:%M:%S")
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| BidsError::Filesystem(format!("open {path}: {err}")))?;
        let mut report = Self {
            path,
            writer: csv::Writer::from_writer(file),
        };
        report.write_line(["subject_id", "session_id", "download_file"])?;
        Ok(report)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn record(
        &mut self,
        subject: &str,
        session: Option<&str>,
        download_file: Option<&Utf8Path>,
    ) -> Result<(), BidsError> {
        self.write_line([
            subject,
            session.unwrap_or_default(),
            download_file.map(Utf8Path::as_str).unwrap_or_default(),
        ])
    }

    fn write_line(&mut self, fields: [&str; 3]) -> Result<(), BidsError> {
        self.writer
            .write_record(fields)
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|err| BidsError::Filesystem(format!("write {}: {err}", self.path)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn columns_are_the_union_of_keys() {
        let mut table = ParticipantTable::new();
        table.push("sub-01", &object(json!({"age": 25, "sex": "F"})));
        table.push("sub-02", &object(json!({"age": 31, "handedness": "left"})));

        assert_eq!(table.columns(), ["participant_id", "age", "sex", "handedness"]);
        let tsv = String::from_utf8(table.to_tsv().unwrap()).unwrap();
        assert_eq!(
            tsv,
            "participant_id\tage\tsex\thandedness\nsub-01\t25\tF\t\nsub-02\t31\t\tleft\n"
        );
    }

    #[test]
    fn download_report_has_header_and_rows() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("report")).unwrap();
        let now = Utc.with_ymd_and_hms(2019, 10, 16, 13, 1, 46).unwrap();

        let mut report = DownloadReport::create(&dir, now).unwrap();
        assert!(report.path().ends_with("download_report_16-Oct-2019-13:01:46.csv"));
        report
            .record("sub-01", Some("02"), Some(Utf8Path::new("exp_info/download.tsv")))
            .unwrap();
        report.record("sub-02", None, None).unwrap();

        let content = std::fs::read_to_string(report.path().as_std_path()).unwrap();
        assert_eq!(
            content,
            "subject_id,session_id,download_file\nsub-01,02,exp_info/download.tsv\nsub-02,,\n"
        );
    }
}
