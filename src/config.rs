use std::collections::BTreeMap;
use std::fs;
use std::iter::Peekable;
use std::str::CharIndices;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{AcqDate, AcquisitionEntry};
use crate::error::BidsError;

pub const MANIFEST_FILE: &str = "participants.tsv";
pub const SETTINGS_FILE: &str = "bids_import.json";

/// Raw manifest line as it appears in `exp_info/participants.tsv`.
#[derive(Debug, Deserialize)]
pub struct ManifestRecord {
    pub participant_id: String,
    #[serde(rename = "NIP")]
    pub nip: String,
    #[serde(default)]
    pub infos_participant: Option<String>,
    #[serde(default)]
    pub session_label: Option<String>,
    pub acq_date: String,
    #[serde(default)]
    pub location: Option<String>,
    pub to_import: String,
}

#[derive(Debug, Clone)]
pub struct ManifestRow {
    pub participant_id: String,
    pub nip: String,
    pub acq_date: AcqDate,
    pub location: Option<String>,
    pub session: Option<String>,
    pub infos: Map<String, Value>,
    pub to_import: Vec<AcquisitionEntry>,
}

pub struct ManifestLoader;

impl ManifestLoader {
    /// Reads `<exp_info>/participants.tsv`, failing early when either is missing.
    pub fn resolve(exp_info: &Utf8Path) -> Result<Vec<ManifestRow>, BidsError> {
        if !exp_info.as_std_path().is_dir() {
            return Err(BidsError::MissingExpInfo(exp_info.as_std_path().to_path_buf()));
        }
        let manifest = exp_info.join(MANIFEST_FILE);
        if !manifest.as_std_path().is_file() {
            return Err(BidsError::MissingManifest(manifest.into_std_path_buf()));
        }
        let content = fs::read_to_string(manifest.as_std_path()).map_err(|err| {
            BidsError::ManifestRead {
                path: manifest.as_std_path().to_path_buf(),
                message: err.to_string(),
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Vec<ManifestRow>, BidsError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<ManifestRecord>().enumerate() {
            // header is line 1
            let row = index + 2;
            let record = record.map_err(|err| BidsError::ManifestParse {
                row,
                message: err.to_string(),
            })?;
            rows.push(Self::resolve_record(record).map_err(|err| match err {
                BidsError::ManifestParse { .. } => err,
                other => BidsError::ManifestParse {
                    row,
                    message: other.to_string(),
                },
            })?);
        }
        Ok(rows)
    }

    pub fn resolve_record(record: ManifestRecord) -> Result<ManifestRow, BidsError> {
        let infos = match non_empty(record.infos_participant) {
            None => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(BidsError::InvalidParticipantInfo(
                        "expected a JSON object".to_string(),
                    ));
                }
                Err(err) => {
                    return Err(BidsError::InvalidParticipantInfo(format!(
                        "not valid JSON: {err}"
                    )));
                }
            },
        };

        Ok(ManifestRow {
            participant_id: record.participant_id,
            nip: record.nip,
            acq_date: record.acq_date.parse()?,
            location: non_empty(record.location),
            session: non_empty(record.session_label),
            infos,
            to_import: parse_to_import(&record.to_import)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("nan"))
}

/// Parses the `to_import` column: a list of `(sequence, modality, label)`
/// triples written as a Python or JSON literal.
pub fn parse_to_import(raw: &str) -> Result<Vec<AcquisitionEntry>, BidsError> {
    let tuples = LiteralParser::new(raw).parse_list()?;
    tuples
        .into_iter()
        .map(|tuple| match tuple.as_slice() {
            [sequence, modality, label] => AcquisitionEntry::new(sequence, modality, label),
            _ => Err(BidsError::InvalidAcquisition(format!(
                "expected 3 values per acquisition, found {}: {tuple:?}",
                tuple.len()
            ))),
        })
        .collect()
}

struct LiteralParser<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Vec<String>>, BidsError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek().map(|(_, ch)| *ch) {
                Some(']') => {
                    self.chars.next();
                    break;
                }
                Some('(') | Some('[') => items.push(self.parse_tuple()?),
                _ => return Err(self.error("expected a tuple or ']'")),
            }
            self.skip_whitespace();
            match self.chars.next().map(|(_, ch)| ch) {
                Some(',') => continue,
                Some(']') => break,
                _ => return Err(self.error("expected ',' or ']' after a tuple")),
            }
        }
        self.skip_whitespace();
        if self.chars.peek().is_some() {
            return Err(self.error("trailing characters after the list"));
        }
        Ok(items)
    }

    fn parse_tuple(&mut self) -> Result<Vec<String>, BidsError> {
        let close = match self.chars.next().map(|(_, ch)| ch) {
            Some('(') => ')',
            Some('[') => ']',
            _ => return Err(self.error("expected '(' or '['")),
        };
        let mut values = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek().map(|(_, ch)| *ch) {
                Some(ch) if ch == close => {
                    self.chars.next();
                    return Ok(values);
                }
                Some(_) => values.push(self.parse_scalar()?),
                None => return Err(self.error("unterminated tuple")),
            }
            self.skip_whitespace();
            match self.chars.next().map(|(_, ch)| ch) {
                Some(',') => continue,
                Some(ch) if ch == close => return Ok(values),
                _ => return Err(self.error("expected ',' between tuple values")),
            }
        }
    }

    fn parse_scalar(&mut self) -> Result<String, BidsError> {
        match self.chars.peek().map(|(_, ch)| *ch) {
            Some(quote @ ('\'' | '"')) => {
                self.chars.next();
                let mut value = String::new();
                while let Some((_, ch)) = self.chars.next() {
                    match ch {
                        '\\' => {
                            let (_, escaped) = self
                                .chars
                                .next()
                                .ok_or_else(|| self.error("dangling escape"))?;
                            value.push(escaped);
                        }
                        ch if ch == quote => return Ok(value),
                        ch => value.push(ch),
                    }
                }
                Err(self.error("unterminated string"))
            }
            Some(_) => {
                let mut value = String::new();
                while let Some((_, ch)) = self.chars.peek() {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '+') {
                        value.push(*ch);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                if value.is_empty() {
                    return Err(self.error("expected a value"));
                }
                Ok(value)
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), BidsError> {
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, ch)) if ch == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .chars
            .peek()
            .map(|(_, ch)| ch.is_whitespace())
            .unwrap_or(false)
        {
            self.chars.next();
        }
    }

    fn error(&mut self, message: &str) -> BidsError {
        let offset = self
            .chars
            .peek()
            .map(|(offset, _)| *offset)
            .unwrap_or(self.source.len());
        BidsError::InvalidAcquisition(format!(
            "to_import {:?}: {message} at offset {offset}",
            self.source
        ))
    }
}

/// Known acquisition server roots, addressed by the manifest `location` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRegistry {
    entries: BTreeMap<String, Utf8PathBuf>,
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        let entries = [
            ("prisma", "/neurospin/acquisition/database/Prisma_fit"),
            ("trio", "/neurospin/acquisition/database/TrioTim"),
            ("meg", "/neurospin/acquisition/neuromag/data"),
        ]
        .into_iter()
        .map(|(name, root)| (name.to_string(), Utf8PathBuf::from(root)))
        .collect();
        Self { entries }
    }
}

impl DatabaseRegistry {
    pub fn insert(&mut self, name: &str, root: Utf8PathBuf) {
        self.entries.insert(name.to_string(), root);
    }

    /// Registered root for a short name, otherwise the value itself as a path.
    pub fn resolve(&self, location: &str) -> Utf8PathBuf {
        self.entries
            .get(location)
            .cloned()
            .unwrap_or_else(|| Utf8PathBuf::from(location))
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub databases: BTreeMap<String, String>,
    #[serde(default)]
    pub converter_program: Option<String>,
    #[serde(default)]
    pub meg_program: Option<String>,
    #[serde(default)]
    pub deface: Option<DefaceSettingsFile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DefaceSettingsFile {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub facemask: Option<String>,
    #[serde(default)]
    pub fsl_dir: Option<String>,
    #[serde(default)]
    pub fsl_output_type: Option<String>,
}

/// Defacing toolkit configuration, handed to the defacer process explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaceSettings {
    pub program: String,
    pub template: Option<Utf8PathBuf>,
    pub facemask: Option<Utf8PathBuf>,
    pub fsl_dir: Option<Utf8PathBuf>,
    pub fsl_output_type: String,
}

impl Default for DefaceSettings {
    fn default() -> Self {
        Self {
            program: "pydeface".to_string(),
            template: None,
            facemask: None,
            fsl_dir: Some(Utf8PathBuf::from("/i2bm/local/fsl/bin/")),
            fsl_output_type: "NIFTI_PAIR".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub databases: DatabaseRegistry,
    pub converter_program: String,
    pub meg_program: String,
    pub deface: DefaceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            databases: DatabaseRegistry::default(),
            converter_program: "dcm2niibatch".to_string(),
            meg_program: "mne_bids".to_string(),
            deface: DefaceSettings::default(),
        }
    }
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// Loads an explicit settings file, or `<exp_info>/bids_import.json` when
    /// present; defaults otherwise.
    pub fn resolve(path: Option<&Utf8Path>, exp_info: &Utf8Path) -> Result<Settings, BidsError> {
        let settings_path = match path {
            Some(path) => path.to_path_buf(),
            None => exp_info.join(SETTINGS_FILE),
        };

        if path.is_none() && !settings_path.as_std_path().exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(settings_path.as_std_path())
            .map_err(|_| BidsError::ConfigRead(settings_path.clone().into_std_path_buf()))?;
        let file: SettingsFile = serde_json::from_str(&content)
            .map_err(|err| BidsError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_settings(file))
    }

    pub fn resolve_settings(file: SettingsFile) -> Settings {
        let mut settings = Settings::default();
        for (name, root) in file.databases {
            settings.databases.insert(&name, Utf8PathBuf::from(root));
        }
        if let Some(program) = file.converter_program {
            settings.converter_program = program;
        }
        if let Some(program) = file.meg_program {
            settings.meg_program = program;
        }
        if let Some(deface) = file.deface {
            if let Some(program) = deface.program {
                settings.deface.program = program;
            }
            settings.deface.template = deface.template.map(Utf8PathBuf::from);
            settings.deface.facemask = deface.facemask.map(Utf8PathBuf::from);
            if let Some(fsl_dir) = deface.fsl_dir {
                settings.deface.fsl_dir = Some(Utf8PathBuf::from(fsl_dir)).filter(|dir| !dir.as_str().is_empty());
            }
            if let Some(output_type) = deface.fsl_output_type {
                settings.deface.fsl_output_type = output_type;
            }
        }
        settings
    }
}
