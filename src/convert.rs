use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DefaceSettings, Settings};
use crate::error::BidsError;
use crate::store::DatasetStore;

/// One DICOM run folder to convert into `out_dir/filename.{nii,json}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionJob {
    pub in_dir: Utf8PathBuf,
    pub out_dir: Utf8PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOptions {
    #[serde(rename = "isGz")]
    pub compress: bool,
    #[serde(rename = "isFlipY")]
    pub flip_y: bool,
    #[serde(rename = "isVerbose")]
    pub verbose: bool,
    #[serde(rename = "isCreateBIDS")]
    pub create_bids: bool,
    #[serde(rename = "isOnlySingleFile")]
    pub only_single_file: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            compress: false,
            flip_y: false,
            verbose: false,
            create_bids: true,
            only_single_file: false,
        }
    }
}

/// The whole run's conversion work, submitted once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionBatch {
    #[serde(rename = "Options")]
    pub options: BatchOptions,
    #[serde(rename = "Files")]
    pub files: Vec<ConversionJob>,
}

impl ConversionBatch {
    pub fn new(files: Vec<ConversionJob>) -> Self {
        Self {
            options: BatchOptions::default(),
            files,
        }
    }

    pub fn to_yaml(&self) -> Result<String, BidsError> {
        serde_yaml::to_string(self).map_err(|err| BidsError::Conversion(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaceRequest {
    pub image: Utf8PathBuf,
    pub template: Option<Utf8PathBuf>,
    pub facemask: Option<Utf8PathBuf>,
}

/// One raw FIF recording and the BIDS entities it is written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegRequest {
    pub raw: Utf8PathBuf,
    pub bids_root: Utf8PathBuf,
    pub subject: String,
    pub session: Option<String>,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub run: Option<String>,
    /// Accept recordings still carrying MaxShield data (not maxfiltered).
    pub allow_maxshield: bool,
    pub overwrite: bool,
}

pub trait DicomConverter {
    fn convert_batch(&self, batch: ConversionBatch) -> Result<(), BidsError>;
}

/// Overwrites the image in place.
pub trait Defacer {
    fn deface(&self, request: &DefaceRequest) -> Result<(), BidsError>;
}

pub trait MegWriter {
    fn write_raw(&self, request: &MegRequest) -> Result<(), BidsError>;
}

/// Writes the batch description next to the manifest and runs `dcm2niibatch` on it.
#[derive(Debug, Clone)]
pub struct SystemDicomConverter {
    program: String,
    batch_file: Utf8PathBuf,
}

impl SystemDicomConverter {
    pub fn new(settings: &Settings, store: &DatasetStore) -> Self {
        Self {
            program: settings.converter_program.clone(),
            batch_file: store.batch_file_path(),
        }
    }
}

impl DicomConverter for SystemDicomConverter {
    fn convert_batch(&self, batch: ConversionBatch) -> Result<(), BidsError> {
        let yaml = batch.to_yaml()?;
        DatasetStore::write_bytes_atomic(&self.batch_file, yaml.as_bytes())?;
        info!(jobs = batch.files.len(), batch_file = %self.batch_file, "running DICOM batch conversion");

        let program = resolve_program(&self.program)?;
        let mut cmd = Command::new(program);
        cmd.arg(self.batch_file.as_std_path());
        run_cmd(cmd, BidsError::Conversion)
    }
}

/// Runs `pydeface` with the FSL toolkit location set on the child process only.
#[derive(Debug, Clone)]
pub struct SystemDefacer {
    settings: DefaceSettings,
}

impl SystemDefacer {
    pub fn new(settings: DefaceSettings) -> Self {
        Self { settings }
    }

    fn environment(&self) -> Vec<(String, OsString)> {
        let mut env = vec![(
            "FSLOUTPUTTYPE".to_string(),
            OsString::from(&self.settings.fsl_output_type),
        )];
        if let Some(fsl_dir) = &self.settings.fsl_dir {
            env.push(("FSLDIR".to_string(), OsString::from(fsl_dir.as_str())));
            let mut paths = vec![fsl_dir.as_std_path().to_path_buf()];
            if let Some(current) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&current));
            }
            if let Ok(joined) = std::env::join_paths(paths) {
                env.push(("PATH".to_string(), joined));
            }
        }
        env
    }

    fn search_path(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(fsl_dir) = &self.settings.fsl_dir {
            dirs.push(fsl_dir.as_std_path().to_path_buf());
        }
        dirs
    }
}

impl Defacer for SystemDefacer {
    fn deface(&self, request: &DefaceRequest) -> Result<(), BidsError> {
        let program = find_program(&self.settings.program, &self.search_path())
            .ok_or_else(|| BidsError::MissingTool(self.settings.program.clone()))?;
        let mut cmd = Command::new(program);
        cmd.arg(request.image.as_std_path())
            .arg("--outfile")
            .arg(request.image.as_std_path())
            .arg("--force");
        if let Some(template) = &request.template {
            cmd.arg("--template").arg(template.as_std_path());
        }
        if let Some(facemask) = &request.facemask {
            cmd.arg("--facemask").arg(facemask.as_std_path());
        }
        for (key, value) in self.environment() {
            cmd.env(key, value);
        }
        info!(image = %request.image, "defacing");
        run_cmd(cmd, BidsError::Deface)
    }
}

/// Converts one FIF recording with `mne_bids raw_to_bids`.
#[derive(Debug, Clone)]
pub struct SystemMegWriter {
    program: String,
}

impl SystemMegWriter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            program: settings.meg_program.clone(),
        }
    }
}

impl SystemMegWriter {
    fn arguments(request: &MegRequest) -> Vec<String> {
        let mut args = vec![
            "raw_to_bids".to_string(),
            format!("--subject_id={}", request.subject),
            format!("--raw={}", request.raw),
            format!("--bids_root={}", request.bids_root),
        ];
        if let Some(task) = &request.task {
            args.push(format!("--task={task}"));
        }
        if let Some(session) = &request.session {
            args.push(format!("--session_id={session}"));
        }
        if let Some(acquisition) = &request.acquisition {
            args.push(format!("--acq={acquisition}"));
        }
        if let Some(run) = &request.run {
            args.push(format!("--run={run}"));
        }
        if request.allow_maxshield {
            args.push("--allow_maxshield".to_string());
        }
        // `--overwrite` takes a value on the raw_to_bids command line
        if request.overwrite {
            args.push("--overwrite=True".to_string());
        }
        args
    }
}

impl MegWriter for SystemMegWriter {
    fn write_raw(&self, request: &MegRequest) -> Result<(), BidsError> {
        let program = resolve_program(&self.program)?;
        let mut cmd = Command::new(program);
        cmd.args(Self::arguments(request));
        info!(raw = %request.raw, "writing MEG recording");
        run_cmd(cmd, BidsError::MegWrite)
    }
}

fn run_cmd(mut cmd: Command, error: fn(String) -> BidsError) -> Result<(), BidsError> {
    debug!(command = ?cmd, "spawning");
    let output = cmd.output().map_err(|err| error(err.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed ({}): {:?}", output.status, cmd.get_program())
    } else {
        stderr
    };
    Err(error(message))
}

fn resolve_program(program: &str) -> Result<PathBuf, BidsError> {
    find_program(program, &[]).ok_or_else(|| BidsError::MissingTool(program.to_string()))
}

/// Absolute or relative paths are taken as given; bare names are searched in
/// `extra_dirs` and then `PATH`.
fn find_program(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    extra_dirs
        .iter()
        .cloned()
        .chain(std::env::split_paths(&path_var))
        .find_map(|dir| {
            let exe = dir.join(format!("{name}.exe"));
            if exe.exists() {
                return Some(exe);
            }
            let plain = dir.join(name);
            plain.exists().then_some(plain)
        })
}
