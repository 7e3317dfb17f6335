use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BidsError;

pub const SUBJECT_PREFIX: &str = "sub-";
pub const SESSION_PREFIX: &str = "ses-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Anat,
    Func,
    Dwi,
    Fmap,
    Meg,
}

impl Modality {
    pub fn folder(&self) -> &'static str {
        match self {
            Modality::Anat => "anat",
            Modality::Func => "func",
            Modality::Dwi => "dwi",
            Modality::Fmap => "fmap",
            Modality::Meg => "meg",
        }
    }

    /// Modalities acquired on the MRI scanners and converted from DICOM in batch.
    pub fn is_dicom(&self) -> bool {
        !matches!(self, Modality::Meg)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.folder())
    }
}

impl FromStr for Modality {
    type Err = BidsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anat" => Ok(Modality::Anat),
            "func" => Ok(Modality::Func),
            "dwi" => Ok(Modality::Dwi),
            "fmap" => Ok(Modality::Fmap),
            "meg" => Ok(Modality::Meg),
            _ => Err(BidsError::InvalidModality(value.to_string())),
        }
    }
}

/// Manifest subject id, `sub-` prefixed when numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The label without the `sub-` prefix.
    pub fn label(&self) -> &str {
        self.0.strip_prefix(SUBJECT_PREFIX).unwrap_or(&self.0)
    }

    /// Dataset folder of the subject, always `sub-<label>` so that it agrees
    /// with the file names built from the same id.
    pub fn folder(&self) -> String {
        format!("{SUBJECT_PREFIX}{}", self.label())
    }

    /// True when the id reads `sub-<alphanumeric label>`.
    pub fn is_conform(&self) -> bool {
        match self.0.strip_prefix(SUBJECT_PREFIX) {
            Some(label) => !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric()),
            None => false,
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = BidsError;

    /// Numeric ids get the `sub-` prefix, anything else passes through untouched.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(BidsError::InvalidSubjectId(value.to_string()));
        }
        if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Ok(Self(format!("{SUBJECT_PREFIX}{trimmed}")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Acquisition date in the server folder convention (`YYYYMMDD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcqDate(String);

impl AcqDate {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcqDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AcqDate {
    type Err = BidsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact = value
            .trim()
            .chars()
            .filter(|ch| *ch != '-' && *ch != '\n' && *ch != '\r')
            .collect::<String>();
        NaiveDate::parse_from_str(&compact, "%Y%m%d")
            .map_err(|_| BidsError::InvalidAcqDate(value.to_string()))?;
        Ok(Self(compact))
    }
}

/// Name fragment of an acquisition, e.g. `task-loc_run-1_bold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionLabel {
    pub raw: String,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub reconstruction: Option<String>,
    pub run: Option<String>,
    pub tag: String,
}

impl FromStr for AcquisitionLabel {
    type Err = BidsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let raw = value.trim();
        let mut segments = raw.split('_').collect::<Vec<_>>();
        let tag = segments.pop().unwrap_or_default();
        if tag.is_empty() || tag.contains('-') {
            return Err(BidsError::InvalidAcquisition(format!(
                "acquisition label {raw:?} does not end with a file tag"
            )));
        }

        let mut label = Self {
            raw: raw.to_string(),
            task: None,
            acquisition: None,
            reconstruction: None,
            run: None,
            tag: tag.to_string(),
        };
        for segment in segments {
            let Some((key, value)) = segment.split_once('-') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = Some(value.to_string());
            match key {
                "task" => label.task = value,
                "acq" => label.acquisition = value,
                "rec" => label.reconstruction = value,
                "run" => label.run = value,
                _ => {}
            }
        }
        Ok(label)
    }
}

/// One `(sequence_number, modality, acquisition_label)` entry of `to_import`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionEntry {
    pub sequence: String,
    pub modality: Modality,
    pub label: AcquisitionLabel,
}

impl AcquisitionEntry {
    pub fn new(sequence: &str, modality: &str, label: &str) -> Result<Self, BidsError> {
        let modality: Modality = modality.parse()?;
        let sequence = sequence.trim().to_string();
        if sequence.is_empty() {
            return Err(BidsError::InvalidAcquisition(
                "empty sequence number".to_string(),
            ));
        }
        let entry = Self {
            sequence,
            modality,
            label: label.parse()?,
        };
        if modality.is_dicom() {
            entry.sequence_number()?;
        }
        Ok(entry)
    }

    pub fn sequence_number(&self) -> Result<u32, BidsError> {
        self.sequence.parse::<u32>().map_err(|_| {
            BidsError::InvalidAcquisition(format!(
                "sequence number {:?} of a {} acquisition is not numeric",
                self.sequence, self.modality
            ))
        })
    }

    /// Prefix of the run folder on the MRI server, e.g. `000005_`.
    pub fn run_folder_prefix(&self) -> Result<String, BidsError> {
        Ok(format!("{:06}_", self.sequence_number()?))
    }

    pub fn descriptor(&self, subject: &SubjectId, session: Option<&str>) -> FileDescriptor {
        FileDescriptor::new(subject.as_str())
            .session(session)
            .task(self.label.task.as_deref())
            .acquisition(self.label.acquisition.as_deref())
            .reconstruction(self.label.reconstruction.as_deref())
            .run(self.label.run.as_deref())
    }
}

/// Structured view of a `[field-value_]*tag.type` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    path: Utf8PathBuf,
    tag: String,
    file_type: String,
    fields: Vec<(String, String)>,
}

impl FileReference {
    pub fn parse(path: impl AsRef<Utf8Path>) -> Result<Self, BidsError> {
        let path = path.as_ref();
        let basename = path
            .file_name()
            .ok_or_else(|| BidsError::MalformedReference(path.to_string()))?;
        let mut parts = basename.split('_').collect::<Vec<_>>();
        let last = parts.pop().unwrap_or_default();
        let (tag, file_type) = last.split_once('.').ok_or_else(|| {
            BidsError::MalformedReference(format!("{basename}: missing extension"))
        })?;

        let fields = parts
            .into_iter()
            .map(|part| match part.split_once('-') {
                Some((field, value))
                if !field.is_empty() && !value.is_empty() && !value.contains('-') =>
            {
                    Ok((field.to_string(), value.to_string()))
                }
                _ => Err(BidsError::MalformedReference(format!(
                    "{basename}: segment {part:?} is not field-value"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            tag: tag.to_string(),
            file_type: file_type.to_string(),
            fields,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn basename(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn fields_ordered(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(field, _)| field.as_str())
    }
}

/// Canonical BIDS name builder. Entities are always emitted in the order
/// `sub ses task acq rec run`, whatever order they were set in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDescriptor {
    subject: String,
    session: Option<String>,
    task: Option<String>,
    acquisition: Option<String>,
    reconstruction: Option<String>,
    run: Option<String>,
}

impl FileDescriptor {
    pub fn new(subject: &str) -> Self {
        let label = subject.strip_prefix(SUBJECT_PREFIX).unwrap_or(subject);
        Self {
            subject: label.to_string(),
            ..Self::default()
        }
    }

    pub fn session(mut self, value: Option<&str>) -> Self {
        self.session = value.map(str::to_string);
        self
    }

    pub fn task(mut self, value: Option<&str>) -> Self {
        self.task = value.map(str::to_string);
        self
    }

    pub fn acquisition(mut self, value: Option<&str>) -> Self {
        self.acquisition = value.map(str::to_string);
        self
    }

    pub fn reconstruction(mut self, value: Option<&str>) -> Self {
        self.reconstruction = value.map(str::to_string);
        self
    }

    pub fn run(mut self, value: Option<&str>) -> Self {
        self.run = value.map(str::to_string);
        self
    }

    pub fn task_name(&self) -> Option<&str> {
        self.task.as_deref()
    }

    /// Entity part of the name, without tag and extension.
    pub fn stem(&self) -> String {
        let mut descriptor = format!("{SUBJECT_PREFIX}{}", self.subject);
        let entities = [
            ("ses", &self.session),
            ("task", &self.task),
            ("acq", &self.acquisition),
            ("rec", &self.reconstruction),
            ("run", &self.run),
        ];
        for (key, value) in entities {
            if let Some(value) = value {
                descriptor.push_str(&format!("_{key}-{value}"));
            }
        }
        descriptor
    }

    pub fn basename(&self, tag: &str) -> String {
        format!("{}_{tag}", self.stem())
    }

    pub fn file_name(&self, tag: &str, file_type: &str) -> String {
        format!("{}.{file_type}", self.basename(tag))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn canonical_name_is_deterministic() {
        let name = FileDescriptor::new("01")
            .run(Some("1"))
            .task(Some("rest"))
            .session(Some("02"))
            .file_name("bold", "nii");
        assert_eq!(name, "sub-01_ses-02_task-rest_run-1_bold.nii");
    }

    #[test]
    fn descriptor_does_not_double_prefix() {
        let name = FileDescriptor::new("sub-07").file_name("T1w", "nii");
        assert_eq!(name, "sub-07_T1w.nii");
    }

    #[test]
    fn reference_round_trips_descriptor() {
        let name = FileDescriptor::new("01")
            .session(Some("02"))
            .task(Some("rest"))
            .acquisition(Some("mb3"))
            .run(Some("1"))
            .file_name("bold", "nii.gz");
        let reference = FileReference::parse(Utf8Path::new("func").join(&name)).unwrap();
        assert_eq!(reference.tag(), "bold");
        assert_eq!(reference.file_type(), "nii.gz");
        assert_eq!(reference.field("sub"), Some("01"));
        assert_eq!(reference.field("ses"), Some("02"));
        assert_eq!(reference.field("task"), Some("rest"));
        assert_eq!(reference.field("acq"), Some("mb3"));
        assert_eq!(reference.field("run"), Some("1"));
        assert_eq!(
            reference.fields_ordered().collect::<Vec<_>>(),
            vec!["sub", "ses", "task", "acq", "run"]
        );
    }

    #[test]
    fn reference_rejects_missing_separator() {
        let err = FileReference::parse("sub01_T1w.nii").unwrap_err();
        assert_matches!(err, BidsError::MalformedReference(_));

        let err = FileReference::parse("sub-01_T1w").unwrap_err();
        assert_matches!(err, BidsError::MalformedReference(_));

        let err = FileReference::parse("sub-01-x_T1w.nii").unwrap_err();
        assert_matches!(err, BidsError::MalformedReference(_));
    }

    #[test]
    fn subject_normalization() {
        let numeric: SubjectId = "12".parse().unwrap();
        assert_eq!(numeric.as_str(), "sub-12");
        assert!(numeric.is_conform());

        let prefixed: SubjectId = "sub-ab01".parse().unwrap();
        assert_eq!(prefixed.label(), "ab01");
        assert!(prefixed.is_conform());

        let loose: SubjectId = "patient_3".parse().unwrap();
        assert_eq!(loose.as_str(), "patient_3");
        assert!(!loose.is_conform());

        let bare: SubjectId = "ab01".parse().unwrap();
        assert_eq!(bare.as_str(), "ab01");
        assert_eq!(bare.folder(), "sub-ab01");
        assert_eq!(numeric.folder(), "sub-12");

        assert_matches!("  ".parse::<SubjectId>(), Err(BidsError::InvalidSubjectId(_)));
    }

    #[test]
    fn acq_date_strips_separators() {
        let date: AcqDate = "2019-10-16\n".parse().unwrap();
        assert_eq!(date.as_str(), "20191016");
        assert_matches!("2019-13-40".parse::<AcqDate>(), Err(BidsError::InvalidAcqDate(_)));
    }

    #[test]
    fn label_tokens() {
        let label: AcquisitionLabel = "task-loc_acq-mb3_run-02_bold".parse().unwrap();
        assert_eq!(label.task.as_deref(), Some("loc"));
        assert_eq!(label.acquisition.as_deref(), Some("mb3"));
        assert_eq!(label.run.as_deref(), Some("02"));
        assert_eq!(label.tag, "bold");

        let anat: AcquisitionLabel = "T1w".parse().unwrap();
        assert_eq!(anat.task, None);
        assert_eq!(anat.tag, "T1w");
    }

    #[test]
    fn dicom_entries_need_numeric_sequence() {
        let entry = AcquisitionEntry::new("5", "func", "task-rest_bold").unwrap();
        assert_eq!(entry.run_folder_prefix().unwrap(), "000005_");

        let err = AcquisitionEntry::new("five", "anat", "T1w").unwrap_err();
        assert_matches!(err, BidsError::InvalidAcquisition(_));

        let meg = AcquisitionEntry::new("run1_raw.fif", "meg", "task-rest_run-1_meg").unwrap();
        assert_eq!(meg.modality, Modality::Meg);
    }
}
