use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

use crate::domain::{Modality, SESSION_PREFIX, SubjectId};
use crate::error::BidsError;

pub const DEFAULT_DATASET_NAME: &str = "bids_dataset";
pub const COMPLETION_MARKER: &str = "downloaded";
pub const EXP_INFO_DIR: &str = "exp_info";
pub const REPORT_DIR: &str = "report";
pub const BATCH_FILE: &str = "batch_dcm2nii.yaml";

/// Layout of the working directory: `exp_info/` and `report/` next to the
/// dataset folder `<dataset_name>/`.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    data_root: Utf8PathBuf,
    dataset_root: Utf8PathBuf,
}

impl DatasetStore {
    pub fn new(data_root: Utf8PathBuf, dataset_name: Option<&str>) -> Self {
        let name = dataset_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_DATASET_NAME);
        let dataset_root = data_root.join(name);
        Self {
            data_root,
            dataset_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn dataset_root(&self) -> &Utf8Path {
        &self.dataset_root
    }

    pub fn exp_info_dir(&self) -> Utf8PathBuf {
        self.data_root.join(EXP_INFO_DIR)
    }

    pub fn batch_file_path(&self) -> Utf8PathBuf {
        self.exp_info_dir().join(BATCH_FILE)
    }

    pub fn report_dir(&self) -> Utf8PathBuf {
        self.data_root.join(REPORT_DIR)
    }

    pub fn participants_path(&self) -> Utf8PathBuf {
        self.dataset_root.join("participants.tsv")
    }

    pub fn description_path(&self) -> Utf8PathBuf {
        self.dataset_root.join("dataset_description.json")
    }

    pub fn readme_path(&self) -> Utf8PathBuf {
        self.dataset_root.join("README")
    }

    pub fn changes_path(&self) -> Utf8PathBuf {
        self.dataset_root.join("CHANGES")
    }

    /// `<dataset>/<subject>[/ses-<session>]`
    pub fn subject_dir(&self, subject: &SubjectId, session: Option<&str>) -> Utf8PathBuf {
        let dir = self.dataset_root.join(subject.folder());
        match session {
            Some(session) => dir.join(format!("{SESSION_PREFIX}{session}")),
            None => dir,
        }
    }

    pub fn modality_dir(
        &self,
        subject: &SubjectId,
        session: Option<&str>,
        modality: Modality,
    ) -> Utf8PathBuf {
        self.subject_dir(subject, session).join(modality.folder())
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), BidsError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| BidsError::Filesystem(format!("create {path}: {err}")))
    }

    /// Removes a directory tree if it exists. Returns whether anything was removed.
    pub fn clean_dir(path: &Utf8Path) -> Result<bool, BidsError> {
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_dir_all(path.as_std_path())
            .map_err(|err| BidsError::Filesystem(format!("remove {path}: {err}")))?;
        Ok(true)
    }

    pub fn marker_path(dir: &Utf8Path) -> Utf8PathBuf {
        dir.join(COMPLETION_MARKER)
    }

    pub fn is_done(dir: &Utf8Path) -> bool {
        Self::marker_path(dir).as_std_path().is_file()
    }

    pub fn mark_done(dir: &Utf8Path) -> Result<(), BidsError> {
        let marker = Self::marker_path(dir);
        fs::write(marker.as_std_path(), b"")
            .map_err(|err| BidsError::Filesystem(format!("write {marker}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BidsError> {
        let parent = path
            .parent()
            .ok_or_else(|| BidsError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".bids-import")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| BidsError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_json_object(path: &Utf8Path) -> Result<Map<String, Value>, BidsError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| sidecar_error(path, err))?;
        match serde_json::from_str::<Value>(&content).map_err(|err| sidecar_error(path, err))? {
            Value::Object(map) => Ok(map),
            _ => Err(sidecar_error(path, "content is not a JSON object")),
        }
    }

    pub fn write_json_object(path: &Utf8Path, object: &Map<String, Value>) -> Result<(), BidsError> {
        let mut content =
            serde_json::to_vec_pretty(object).map_err(|err| sidecar_error(path, err))?;
        content.push(b'\n');
        Self::write_bytes_atomic(path, &content)
    }

    /// Merges `patch` into the JSON object stored at `path`. Existing keys that
    /// the patch does not name are kept. Returns false when the file did not
    /// exist and was created from the patch alone.
    pub fn patch_sidecar(path: &Utf8Path, patch: &Map<String, Value>) -> Result<bool, BidsError> {
        let existed = path.as_std_path().is_file();
        let mut object = if existed {
            Self::read_json_object(path)?
        } else {
            Map::new()
        };
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
        Self::write_json_object(path, &object)?;
        Ok(existed)
    }

    pub fn copy_file(source: &Path, dest: &Path) -> Result<(), BidsError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| BidsError::Filesystem(err.to_string()))?;
        }
        fs::copy(source, dest).map_err(|err| {
            BidsError::Filesystem(format!(
                "copy {} -> {}: {err}",
                source.display(),
                dest.display()
            ))
        })?;
        Ok(())
    }
}

fn sidecar_error(path: &Utf8Path, err: impl ToString) -> BidsError {
    BidsError::Sidecar {
        path: PathBuf::from(path.as_std_path()),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = DatasetStore::new(Utf8PathBuf::from("/study"), None);
        let subject: SubjectId = "1".parse().unwrap();

        assert_eq!(store.dataset_root(), Utf8Path::new("/study/bids_dataset"));
        assert_eq!(
            store.modality_dir(&subject, Some("02"), Modality::Func),
            Utf8PathBuf::from("/study/bids_dataset/sub-1/ses-02/func")
        );
        assert_eq!(
            store.subject_dir(&subject, None),
            Utf8PathBuf::from("/study/bids_dataset/sub-1")
        );
        assert!(store.batch_file_path().ends_with("exp_info/batch_dcm2nii.yaml"));
        assert!(store.report_dir().ends_with("report"));
    }

    #[test]
    fn sidecar_patch_merges_keys() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("sub-01_task-rest_bold.json")).unwrap();
        fs::write(path.as_std_path(), br#"{"EchoTime": 0.03}"#).unwrap();

        let mut patch = Map::new();
        patch.insert("TaskName".to_string(), Value::from("rest"));
        assert!(DatasetStore::patch_sidecar(&path, &patch).unwrap());

        let merged = DatasetStore::read_json_object(&path).unwrap();
        assert_eq!(merged.get("EchoTime"), Some(&Value::from(0.03)));
        assert_eq!(merged.get("TaskName"), Some(&Value::from("rest")));
    }

    #[test]
    fn completion_marker_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        assert!(!DatasetStore::is_done(&dir));
        DatasetStore::mark_done(&dir).unwrap();
        assert!(DatasetStore::is_done(&dir));
        assert_eq!(fs::metadata(DatasetStore::marker_path(&dir)).unwrap().len(), 0);
    }
}
