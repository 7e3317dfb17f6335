use std::fs;

use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use bids_importer::domain::{Modality, SubjectId};
use bids_importer::scaffold::{FixedPrompter, ensure_dataset};
use bids_importer::store::DatasetStore;

fn temp_store(name: Option<&str>) -> (tempfile::TempDir, DatasetStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, DatasetStore::new(root, name))
}

#[test]
fn dataset_name_defaults_when_blank() {
    let (_temp, store) = temp_store(Some("  "));
    assert!(store.dataset_root().ends_with("bids_dataset"));
    assert_eq!(store.participants_path(), store.dataset_root().join("participants.tsv"));
}

#[test]
fn missing_sidecar_is_created_from_the_patch() {
    let (_temp, store) = temp_store(None);
    let subject: SubjectId = "4".parse().unwrap();
    let path = store
        .modality_dir(&subject, None, Modality::Func)
        .join("sub-4_task-rest_bold.json");

    let mut patch = Map::new();
    patch.insert("TaskName".to_string(), Value::from("rest"));
    assert!(!DatasetStore::patch_sidecar(&path, &patch).unwrap());
    assert_eq!(Value::Object(DatasetStore::read_json_object(&path).unwrap()), json!({"TaskName": "rest"}));
}

#[test]
fn patch_keeps_key_order_and_overrides_values() {
    let (_temp, store) = temp_store(None);
    DatasetStore::ensure_dir(store.dataset_root()).unwrap();
    let path = store.dataset_root().join("sub-1_task-a_bold.json");
    fs::write(&path, r#"{"RepetitionTime": 2.0, "TaskName": "old", "EchoTime": 0.03}"#).unwrap();

    let mut patch = Map::new();
    patch.insert("TaskName".to_string(), Value::from("a"));
    assert!(DatasetStore::patch_sidecar(&path, &patch).unwrap());

    let merged = DatasetStore::read_json_object(&path).unwrap();
    assert_eq!(
        merged.keys().map(String::as_str).collect::<Vec<_>>(),
        ["RepetitionTime", "TaskName", "EchoTime"]
    );
    assert_eq!(merged["TaskName"], Value::from("a"));
}

#[test]
fn clean_dir_reports_removal() {
    let (_temp, store) = temp_store(None);
    let subject: SubjectId = "sub-01".parse().unwrap();
    let anat = store.modality_dir(&subject, Some("01"), Modality::Anat);
    DatasetStore::ensure_dir(&anat).unwrap();
    fs::write(anat.join("sub-01_ses-01_T1w.nii"), b"").unwrap();

    assert!(DatasetStore::clean_dir(&anat).unwrap());
    assert!(!anat.as_std_path().exists());
    assert!(!DatasetStore::clean_dir(&anat).unwrap());
}

#[test]
fn scaffolding_twice_changes_nothing() {
    let (_temp, store) = temp_store(Some("study"));
    let prompter = FixedPrompter { answer: true };
    let first = ensure_dataset(&store, &prompter).unwrap();
    assert!(first.created_root);
    assert!(first.readme && first.changes && first.description);

    let description = fs::read_to_string(store.description_path()).unwrap();
    let second = ensure_dataset(&store, &prompter).unwrap();
    assert!(!second.created_root);
    assert_eq!(fs::read_to_string(store.description_path()).unwrap(), description);
    assert_eq!(fs::metadata(store.readme_path()).unwrap().len(), 0);
}
