use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::BidsError;
use crate::store::DatasetStore;

pub const BIDS_VERSION: &str = "1.4.0";

pub trait Prompter {
    fn confirm(&self, question: &str) -> Result<bool, BidsError>;
    fn ask(&self, question: &str) -> Result<String, BidsError>;
}

/// Reads answers from stdin, asking again until a yes/no answer is given.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str) -> Result<bool, BidsError> {
        loop {
            let answer = self.ask(question)?.to_lowercase();
            match answer.chars().next() {
                Some('y') => return Ok(true),
                Some('n') => return Ok(false),
                _ => println!("Please respond with 'y/n'"),
            }
        }
    }

    fn ask(&self, question: &str) -> Result<String, BidsError> {
        let mut stdout = io::stdout();
        write!(stdout, "{question} ").map_err(|err| BidsError::Prompt(err.to_string()))?;
        stdout
            .flush()
            .map_err(|err| BidsError::Prompt(err.to_string()))?;
        let mut input = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut input)
            .map_err(|err| BidsError::Prompt(err.to_string()))?;
        if read == 0 {
            return Err(BidsError::Prompt("stdin closed".to_string()));
        }
        Ok(input.trim().to_string())
    }
}

/// Answers every question the same way; free-text questions get an empty answer.
pub struct FixedPrompter {
    pub answer: bool,
}

impl Prompter for FixedPrompter {
    fn confirm(&self, _question: &str) -> Result<bool, BidsError> {
        Ok(self.answer)
    }

    fn ask(&self, _question: &str) -> Result<String, BidsError> {
        Ok(String::new())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScaffoldResult {
    pub created_root: bool,
    pub description: bool,
    pub changes: bool,
    pub readme: bool,
}

const DESCRIPTION_FIELDS: &[(&str, &str, bool)] = &[
    (
        "Name",
        "Name of this BIDS dataset (leave any answer empty and edit the file later):",
        false,
    ),
    ("Authors", "Authors, comma separated:", true),
    ("Acknowledgements", "Acknowledgements:", false),
    (
        "HowToAcknowledge",
        "How to acknowledge this dataset (text or publications to cite):",
        false,
    ),
    ("Funding", "Sources of funding, comma separated:", true),
    (
        "ReferencesAndLinks",
        "References to publications or links, comma separated:",
        true,
    ),
    ("DatasetDOI", "DOI of the dataset:", false),
];

/// Creates the dataset folder if needed and offers to fill the top-level
/// descriptor files. Existing content is never truncated.
pub fn ensure_dataset(
    store: &DatasetStore,
    prompter: &dyn Prompter,
) -> Result<ScaffoldResult, BidsError> {
    let mut result = ScaffoldResult::default();
    let root = store.dataset_root();
    if !root.as_std_path().exists() {
        DatasetStore::ensure_dir(root)?;
        info!(%root, "created dataset folder");
        result.created_root = true;
    }

    if prompter.confirm("Do you want to create and complete the dataset_description.json ? (y/n)")? {
        let mut answers = Map::new();
        for (key, question, is_list) in DESCRIPTION_FIELDS {
            let answer = prompter.ask(question)?;
            if answer.is_empty() {
                continue;
            }
            let value = if *is_list {
                Value::from(split_list(&answer))
            } else {
                Value::from(answer)
            };
            answers.insert(key.to_string(), value);
        }
        write_description(store, answers)?;
        result.description = true;
    }

    if prompter.confirm("Do you want to create/complete the CHANGES file ? (y/n)")? {
        touch(&store.changes_path())?;
        result.changes = true;
    }

    if prompter.confirm("Do you want to create/complete the README file ? (y/n)")? {
        touch(&store.readme_path())?;
        result.readme = true;
    }

    Ok(result)
}

/// Writes `dataset_description.json`; keys already present in the file win.
pub fn write_description(
    store: &DatasetStore,
    answers: Map<String, Value>,
) -> Result<(), BidsError> {
    let path = store.description_path();
    let mut description = if path.as_std_path().is_file() {
        DatasetStore::read_json_object(&path)?
    } else {
        Map::new()
    };

    let dataset_name = store
        .dataset_root()
        .file_name()
        .unwrap_or_default()
        .to_string();
    let defaults = [
        ("Name", Value::from(dataset_name)),
        ("BIDSVersion", Value::from(BIDS_VERSION)),
    ];
    for (key, value) in answers.into_iter().chain(
        defaults
            .into_iter()
            .map(|(key, value)| (key.to_string(), value)),
    ) {
        description.entry(key).or_insert(value);
    }
    DatasetStore::write_json_object(&path, &description)
}

fn split_list(answer: &str) -> Vec<String> {
    answer
        .trim_matches(|ch: char| ch == '[' || ch == ']')
        .split(',')
        .map(|item| item.trim().trim_matches(|ch: char| ch == '\'' || ch == '"').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn touch(path: &camino::Utf8Path) -> Result<(), BidsError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| BidsError::Filesystem(format!("open {path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use camino::Utf8PathBuf;

    use super::*;

    struct ScriptedPrompter {
        confirms: RefCell<VecDeque<bool>>,
        answers: RefCell<VecDeque<String>>,
    }

    impl ScriptedPrompter {
        fn new(confirms: &[bool], answers: &[&str]) -> Self {
            Self {
                confirms: RefCell::new(confirms.iter().copied().collect()),
                answers: RefCell::new(answers.iter().map(|value| value.to_string()).collect()),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn confirm(&self, _question: &str) -> Result<bool, BidsError> {
            Ok(self.confirms.borrow_mut().pop_front().unwrap_or(false))
        }

        fn ask(&self, _question: &str) -> Result<String, BidsError> {
            Ok(self.answers.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    fn store() -> (tempfile::TempDir, DatasetStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, DatasetStore::new(root, Some("study")))
    }

    #[test]
    fn declining_everything_only_creates_the_root() {
        let (_temp, store) = store();
        let result = ensure_dataset(&store, &FixedPrompter { answer: false }).unwrap();
        assert!(result.created_root);
        assert!(store.dataset_root().as_std_path().is_dir());
        assert!(!store.description_path().as_std_path().exists());
        assert!(!store.readme_path().as_std_path().exists());

        let again = ensure_dataset(&store, &FixedPrompter { answer: false }).unwrap();
        assert!(!again.created_root);
    }

    #[test]
    fn description_collects_answers() {
        let (_temp, store) = store();
        let prompter = ScriptedPrompter::new(
            &[true, false, true],
            &["", "['a', 'b']", "", "", "ANR-1, ERC-2", "", "10.1/xyz"],
        );
        let result = ensure_dataset(&store, &prompter).unwrap();
        assert!(result.description);
        assert!(!result.changes);
        assert!(result.readme);

        let description = DatasetStore::read_json_object(&store.description_path()).unwrap();
        assert_eq!(description["Name"], Value::from("study"));
        assert_eq!(description["BIDSVersion"], Value::from(BIDS_VERSION));
        assert_eq!(description["Authors"], serde_json::json!(["a", "b"]));
        assert_eq!(description["Funding"], serde_json::json!(["ANR-1", "ERC-2"]));
        assert_eq!(description["DatasetDOI"], Value::from("10.1/xyz"));
    }

    #[test]
    fn existing_description_and_readme_are_kept() {
        let (_temp, store) = store();
        DatasetStore::ensure_dir(store.dataset_root()).unwrap();
        std::fs::write(store.readme_path().as_std_path(), "hello\n").unwrap();
        std::fs::write(
            store.description_path().as_std_path(),
            r#"{"Name": "Localizer", "License": "CC0"}"#,
        )
        .unwrap();

        let prompter = ScriptedPrompter::new(&[true, false, true], &["Other name"]);
        ensure_dataset(&store, &prompter).unwrap();

        let description = DatasetStore::read_json_object(&store.description_path()).unwrap();
        assert_eq!(description["Name"], Value::from("Localizer"));
        assert_eq!(description["License"], Value::from("CC0"));
        assert_eq!(
            std::fs::read_to_string(store.readme_path().as_std_path()).unwrap(),
            "hello\n"
        );
    }
}
