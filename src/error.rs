use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BidsError {
    #[error("exp_info directory not found at {0}")]
    #[diagnostic(help("create <root>/exp_info containing participants.tsv"))]
    MissingExpInfo(PathBuf),

    #[error("manifest not found at {0}")]
    MissingManifest(PathBuf),

    #[error("failed to read manifest {path}: {message}")]
    ManifestRead { path: PathBuf, message: String },

    #[error("manifest row {row}: {message}")]
    ManifestParse { row: usize, message: String },

    #[error("failed to read settings file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON settings: {0}")]
    ConfigParse(String),

    #[error("malformed file reference: {0}")]
    MalformedReference(String),

    #[error("invalid infos_participant: {0}")]
    InvalidParticipantInfo(String),

    #[error("invalid acquisition entry: {0}")]
    InvalidAcquisition(String),

    #[error("unsupported modality: {0}")]
    InvalidModality(String),

    #[error("invalid subject id: {0:?}")]
    InvalidSubjectId(String),

    #[error("invalid acquisition date: {0:?}")]
    InvalidAcqDate(String),

    #[error("no directory found for NIP {nip} on {date} (session {session})")]
    #[diagnostic(help("check the NIP and acq_date columns against the acquisition server"))]
    MissingSourceDirectory {
        nip: String,
        date: String,
        session: String,
    },

    #[error("{count} directories found for NIP {nip} on {date} (session {session})")]
    #[diagnostic(help(
        "two sessions of the same subject on the same day are possible: \
         add the session digits to the NIP (xxxxxxxx-ssss)"
    ))]
    AmbiguousSourceDirectory {
        nip: String,
        date: String,
        session: String,
        count: usize,
    },

    #[error("no run folder {prefix}* in {directory}")]
    MissingRun { directory: PathBuf, prefix: String },

    #[error("{count} run folders {prefix}* in {directory}")]
    AmbiguousRun {
        directory: PathBuf,
        prefix: String,
        count: usize,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("DICOM conversion failed: {0}")]
    Conversion(String),

    #[error("defacing failed: {0}")]
    Deface(String),

    #[error("MEG conversion failed: {0}")]
    MegWrite(String),

    #[error("failed to patch sidecar {path}: {message}")]
    Sidecar { path: PathBuf, message: String },

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
