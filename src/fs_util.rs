use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use walkdir::WalkDir;

use crate::error::BidsError;
use crate::store::DatasetStore;

/// Folders `sub-*/ses-*/func` under `events_root`, or `sub-*/func` when the
/// recordings are not split by session.
pub fn recorded_event_folders(events_root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, BidsError> {
    let with_sessions = glob_dirs(events_root, "sub-*/ses-*/func")?;
    if !with_sessions.is_empty() {
        return Ok(with_sessions);
    }
    glob_dirs(events_root, "sub-*/func")
}

/// Copies every file of every recorded-events folder to the same relative
/// folder of the dataset. Returns the written paths.
pub fn copy_recorded_events(
    events_root: &Utf8Path,
    dataset_root: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, BidsError> {
    let mut copied = Vec::new();
    for folder in recorded_event_folders(events_root)? {
        let relative = folder
            .strip_prefix(events_root)
            .map_err(|err| BidsError::Filesystem(format!("{folder}: {err}")))?;
        let destination = dataset_root.join(relative);
        let mut entries = fs::read_dir(folder.as_std_path())
            .map_err(|err| BidsError::Filesystem(format!("read {folder}: {err}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            if !entry.path().is_file() {
                continue;
            }
            let target = destination.as_std_path().join(entry.file_name());
            DatasetStore::copy_file(&entry.path(), &target)?;
            copied.push(to_utf8(target)?);
        }
    }
    Ok(copied)
}

/// Every regular file below `root`, as sorted `/`-rooted relative paths.
pub fn dataset_files(root: &Utf8Path) -> Result<Vec<String>, BidsError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
        let entry = entry.map_err(|err| BidsError::Filesystem(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root.as_std_path())
            .map_err(|err| BidsError::Filesystem(err.to_string()))?;
        let parts = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        files.push(format!("/{}", parts.join("/")));
    }
    Ok(files)
}

/// Directories of `root` matching the glob `pattern`, sorted.
pub fn glob_dirs(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, BidsError> {
    let full = format!("{}/{pattern}", Pattern::escape(root.as_str()));
    let entries =
        glob::glob(&full).map_err(|err| BidsError::Filesystem(format!("{full}: {err}")))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| BidsError::Filesystem(err.to_string()))?;
        if path.is_dir() {
            dirs.push(to_utf8(path)?);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn to_utf8(path: std::path::PathBuf) -> Result<Utf8PathBuf, BidsError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| BidsError::Filesystem(format!("non-utf8 path {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Utf8Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
    }

    #[test]
    fn events_mirror_the_recorded_layout() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let events = root.join("exp_info/recorded_events");
        let dataset = root.join("bids_dataset");
        write(
            &events.join("sub-01/ses-01/func/sub-01_ses-01_task-loc_events.tsv"),
            "onset\tduration\n",
        );
        write(&events.join("sub-02/func/ignored.tsv"), "x");

        let copied = copy_recorded_events(&events, &dataset).unwrap();
        assert_eq!(
            copied,
            vec![dataset.join("sub-01/ses-01/func/sub-01_ses-01_task-loc_events.tsv")]
        );
        assert_eq!(
            fs::read_to_string(copied[0].as_std_path()).unwrap(),
            "onset\tduration\n"
        );
    }

    #[test]
    fn no_event_folders_copies_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let copied = copy_recorded_events(&root.join("missing"), &root.join("dataset")).unwrap();
        assert!(copied.is_empty());
    }

    #[test]
    fn dataset_files_are_rooted_and_sorted() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write(&root.join("sub-01/anat/sub-01_T1w.nii"), "");
        write(&root.join("README"), "");

        assert_eq!(
            dataset_files(&root).unwrap(),
            vec!["/README".to_string(), "/sub-01/anat/sub-01_T1w.nii".to_string()]
        );
    }
}
