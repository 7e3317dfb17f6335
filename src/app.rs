use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use glob::Pattern;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{ManifestLoader, ManifestRow, Settings};
use crate::convert::{
    ConversionBatch, ConversionJob, DefaceRequest, Defacer, DicomConverter, MegRequest, MegWriter,
};
use crate::domain::{AcquisitionEntry, Modality, SubjectId};
use crate::error::BidsError;
use crate::fs_util;
use crate::locator::{FileQuery, most_specific_file};
use crate::report::{DownloadReport, ParticipantTable};
use crate::scaffold::{Prompter, ScaffoldResult, ensure_dataset};
use crate::store::DatasetStore;
use crate::validate::BidsValidator;

pub const DEFAULT_EVENTS_PATH: &str = "exp_info/recorded_events";
pub const DEFAULT_LOCATION: &str = "prisma";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Re-import rows whose completion marker is present.
    pub force: bool,
    pub deface: bool,
    pub copy_events: bool,
    /// Relative to the data root unless absolute.
    pub events_path: Utf8PathBuf,
    /// Location used for manifest rows with an empty `location`.
    pub default_location: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            force: false,
            deface: false,
            copy_events: false,
            events_path: Utf8PathBuf::from(DEFAULT_EVENTS_PATH),
            default_location: DEFAULT_LOCATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub level: EventLevel,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: EventLevel::Info,
            elapsed: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: EventLevel::Warning,
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Skipped,
    Imported,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectResult {
    pub participant_id: String,
    pub subject: String,
    pub session: Option<String>,
    pub directory: String,
    pub action: RowAction,
    pub acquisitions: usize,
    pub download_spec: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationEntry {
    pub path: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub dataset_root: String,
    pub scaffold: ScaffoldResult,
    pub subjects: Vec<SubjectResult>,
    pub converted: usize,
    pub meg_written: usize,
    pub defaced: Vec<String>,
    pub patched: Vec<String>,
    pub participants_path: String,
    pub report_path: String,
    pub events_copied: Vec<String>,
    pub validation: Vec<ValidationEntry>,
    pub warnings: Vec<String>,
}

impl ImportResult {
    pub fn imported(&self) -> usize {
        self.subjects
            .iter()
            .filter(|subject| subject.action == RowAction::Imported)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.subjects.len() - self.imported()
    }

    pub fn invalid_files(&self) -> impl Iterator<Item = &str> {
        self.validation
            .iter()
            .filter(|entry| !entry.valid)
            .map(|entry| entry.path.as_str())
    }
}

/// Work accumulated across manifest rows and consumed once the loop ends.
#[derive(Default)]
struct RunState {
    jobs: Vec<ConversionJob>,
    deface: Vec<Utf8PathBuf>,
    patches: BTreeMap<Utf8PathBuf, Map<String, Value>>,
    participants: ParticipantTable,
    subjects: Vec<SubjectResult>,
    meg_written: usize,
    warnings: Vec<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            participants: ParticipantTable::new(),
            ..Self::default()
        }
    }

    fn warn(&mut self, sink: &dyn ProgressSink, message: String) {
        warn!("{message}");
        sink.event(ProgressEvent::warning(message.clone()));
        self.warnings.push(message);
    }
}

pub struct App<C: DicomConverter, D: Defacer, M: MegWriter, V: BidsValidator> {
    store: DatasetStore,
    settings: Settings,
    converter: C,
    defacer: D,
    meg: M,
    validator: V,
}

impl<C: DicomConverter, D: Defacer, M: MegWriter, V: BidsValidator> App<C, D, M, V> {
    pub fn new(
        store: DatasetStore,
        settings: Settings,
        converter: C,
        defacer: D,
        meg: M,
        validator: V,
    ) -> Self {
        Self {
            store,
            settings,
            converter,
            defacer,
            meg,
            validator,
        }
    }

    /// Runs the whole import: every manifest row, then batch conversion,
    /// defacing, sidecar patches, participants table, recorded events and
    /// the naming sweep, in that order.
    pub fn import(
        &self,
        options: &ImportOptions,
        prompter: &dyn Prompter,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, BidsError> {
        let exp_info = self.store.exp_info_dir();
        sink.event(ProgressEvent::info(format!(
            "phase=Resolve; reading manifest in {exp_info}"
        )));
        let manifest = ManifestLoader::resolve(&exp_info)?;
        info!(rows = manifest.len(), "manifest loaded");

        let scaffold = ensure_dataset(&self.store, prompter)?;
        let mut report = DownloadReport::create(&self.store.report_dir(), Utc::now())?;
        let mut run = RunState::new();

        for row in &manifest {
            self.import_row(row, options, &mut run, &mut report, sink)?;
        }

        let converted = self.convert(&mut run, sink)?;
        let defaced = self.deface(&run, sink)?;
        let patched = self.apply_patches(&mut run, sink)?;

        let participants_path = self.store.participants_path();
        run.participants.write(&participants_path)?;
        info!(rows = run.participants.len(), path = %participants_path, "participants table written");

        let events_copied = if options.copy_events {
            self.copy_events(options, &mut run, sink)?
        } else {
            Vec::new()
        };

        let validation = self.validate(sink)?;

        Ok(ImportResult {
            dataset_root: self.store.dataset_root().to_string(),
            scaffold,
            subjects: run.subjects,
            converted,
            meg_written: run.meg_written,
            defaced,
            patched,
            participants_path: participants_path.to_string(),
            report_path: report.path().to_string(),
            events_copied,
            validation,
            warnings: run.warnings,
        })
    }

    fn import_row(
        &self,
        row: &ManifestRow,
        options: &ImportOptions,
        run: &mut RunState,
        report: &mut DownloadReport,
        sink: &dyn ProgressSink,
    ) -> Result<(), BidsError> {
        run.participants.push(&row.participant_id, &row.infos);

        let location = row
            .location
            .as_deref()
            .unwrap_or(options.default_location.as_str());
        let db_root = self.settings.databases.resolve(location);

        let subject: SubjectId = row.participant_id.parse()?;
        if !subject.is_conform() {
            run.warn(
                sink,
                format!("subject id '{subject}' does not follow the sub-<label> convention"),
            );
        }
        let session = row.session.as_deref();
        let subject_dir = self.store.subject_dir(&subject, session);
        DatasetStore::ensure_dir(&subject_dir)?;

        let mut result = SubjectResult {
            participant_id: row.participant_id.clone(),
            subject: subject.to_string(),
            session: row.session.clone(),
            directory: subject_dir.to_string(),
            action: RowAction::Skipped,
            acquisitions: row.to_import.len(),
            download_spec: None,
        };

        if !options.force && DatasetStore::is_done(&subject_dir) {
            info!(subject = %subject, session = ?session, "already downloaded, skipping");
            sink.event(ProgressEvent::info(format!(
                "phase=Resolve; {subject} already downloaded"
            )));
            run.subjects.push(result);
            return Ok(());
        }

        sink.event(ProgressEvent::info(format!(
            "phase=Resolve; {subject} from {db_root} ({} acquisitions)",
            row.to_import.len()
        )));

        let mut modalities: Vec<Modality> = Vec::new();
        for entry in &row.to_import {
            if !modalities.contains(&entry.modality) {
                modalities.push(entry.modality);
            }
        }
        for modality in modalities {
            let target = subject_dir.join(modality.folder());
            if DatasetStore::clean_dir(&target)? {
                debug!(path = %target, "removed previous import");
            }
        }

        let mut query = FileQuery::new("download", "tsv")
            .filter("sub", subject.label())
            .allow_other_fields(false);
        if let Some(session) = session {
            query = query.filter("ses", session);
        }
        let download_spec = most_specific_file(&self.store.exp_info_dir(), &query)?;
        report.record(subject.as_str(), session, download_spec.as_deref())?;
        result.download_spec = download_spec.map(|path| path.to_string());

        let mut source_dir: Option<Utf8PathBuf> = None;
        for entry in &row.to_import {
            let target = subject_dir.join(entry.modality.folder());
            match entry.modality {
                Modality::Meg => {
                    self.write_meg(row, entry, &subject, &db_root, &target)?;
                    run.meg_written += 1;
                }
                _ => {
                    let nip_dir = match &source_dir {
                        Some(dir) => dir.clone(),
                        None => {
                            let dir = resolve_source_dir(&db_root, row, session)?;
                            source_dir = Some(dir.clone());
                            dir
                        }
                    };
                    self.queue_dicom(entry, &subject, session, &nip_dir, &target, options, run)?;
                }
            }
        }

        DatasetStore::mark_done(&subject_dir)?;
        result.action = RowAction::Imported;
        run.subjects.push(result);
        Ok(())
    }

    fn write_meg(
        &self,
        row: &ManifestRow,
        entry: &AcquisitionEntry,
        subject: &SubjectId,
        db_root: &Utf8Path,
        target: &Utf8Path,
    ) -> Result<(), BidsError> {
        DatasetStore::ensure_dir(target)?;
        let raw = db_root
            .join(&row.nip)
            .join(row.acq_date.as_str())
            .join(&entry.sequence);
        let request = MegRequest {
            raw,
            bids_root: self.store.dataset_root().to_path_buf(),
            subject: subject.label().to_string(),
            session: row.session.clone(),
            task: entry.label.task.clone(),
            acquisition: entry.label.acquisition.clone(),
            run: entry.label.run.clone(),
            allow_maxshield: true,
            overwrite: true,
        };
        self.meg.write_raw(&request)
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_dicom(
        &self,
        entry: &AcquisitionEntry,
        subject: &SubjectId,
        session: Option<&str>,
        nip_dir: &Utf8Path,
        target: &Utf8Path,
        options: &ImportOptions,
        run: &mut RunState,
    ) -> Result<(), BidsError> {
        let run_dir = resolve_run_dir(nip_dir, entry)?;
        let descriptor = entry.descriptor(subject, session);
        let basename = descriptor.basename(&entry.label.tag);
        DatasetStore::ensure_dir(target)?;
        debug!(source = %run_dir, target = %target, %basename, "queued for conversion");

        if entry.modality == Modality::Anat && options.deface {
            run.deface.push(target.join(format!("{basename}.nii")));
        }
        if let Some(task) = descriptor.task_name() {
            run.patches
                .entry(target.join(format!("{basename}.json")))
                .or_default()
                .insert("TaskName".to_string(), Value::from(task));
        }
        run.jobs.push(ConversionJob {
            in_dir: run_dir,
            out_dir: target.to_path_buf(),
            filename: basename,
        });
        Ok(())
    }

    fn convert(&self, run: &mut RunState, sink: &dyn ProgressSink) -> Result<usize, BidsError> {
        let jobs = std::mem::take(&mut run.jobs);
        if jobs.is_empty() {
            info!("no DICOM acquisition queued, skipping conversion");
            return Ok(0);
        }
        let count = jobs.len();
        sink.event(ProgressEvent::info(format!(
            "phase=Convert; converting {count} DICOM series"
        )));
        let start = Instant::now();
        self.converter.convert_batch(ConversionBatch::new(jobs))?;
        sink.event(ProgressEvent {
            message: format!("phase=Convert; {count} series converted"),
            level: EventLevel::Info,
            elapsed: Some(start.elapsed()),
        });
        Ok(count)
    }

    fn deface(&self, run: &RunState, sink: &dyn ProgressSink) -> Result<Vec<String>, BidsError> {
        let mut defaced = Vec::new();
        for image in &run.deface {
            sink.event(ProgressEvent::info(format!("phase=Deface; {image}")));
            self.defacer.deface(&DefaceRequest {
                image: image.clone(),
                template: self.settings.deface.template.clone(),
                facemask: self.settings.deface.facemask.clone(),
            })?;
            defaced.push(image.to_string());
        }
        Ok(defaced)
    }

    fn apply_patches(
        &self,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, BidsError> {
        let patches = std::mem::take(&mut run.patches);
        let mut patched = Vec::new();
        for (path, patch) in patches {
            if !DatasetStore::patch_sidecar(&path, &patch)? {
                run.warn(
                    sink,
                    format!("sidecar {path} was not produced by the conversion, created it"),
                );
            }
            debug!(%path, keys = patch.len(), "sidecar patched");
            patched.push(path.to_string());
        }
        Ok(patched)
    }

    fn copy_events(
        &self,
        options: &ImportOptions,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, BidsError> {
        let events_root = self.store.data_root().join(&options.events_path);
        let copied = fs_util::copy_recorded_events(&events_root, self.store.dataset_root())?;
        if copied.is_empty() {
            run.warn(sink, format!("no recorded events found in {events_root}"));
        } else {
            info!(files = copied.len(), "recorded events copied");
        }
        Ok(copied.into_iter().map(|path| path.to_string()).collect())
    }

    fn validate(&self, sink: &dyn ProgressSink) -> Result<Vec<ValidationEntry>, BidsError> {
        sink.event(ProgressEvent::info("phase=Verify; checking file names"));
        let entries = fs_util::dataset_files(self.store.dataset_root())?
            .into_iter()
            .map(|path| {
                let valid = self.validator.is_bids(&path);
                if !valid {
                    info!(%path, "not a BIDS file name");
                }
                ValidationEntry { path, valid }
            })
            .collect();
        Ok(entries)
    }
}

/// The single `<db_root>/<acq_date>/<NIP>-*` folder of this row.
fn resolve_source_dir(
    db_root: &Utf8Path,
    row: &ManifestRow,
    session: Option<&str>,
) -> Result<Utf8PathBuf, BidsError> {
    let date_dir = db_root.join(row.acq_date.as_str());
    let mut found =
        fs_util::glob_dirs(&date_dir, &format!("{}-*", Pattern::escape(&row.nip)))?;
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(BidsError::MissingSourceDirectory {
            nip: row.nip.clone(),
            date: row.acq_date.to_string(),
            session: session.unwrap_or("-").to_string(),
        }),
        count => Err(BidsError::AmbiguousSourceDirectory {
            nip: row.nip.clone(),
            date: row.acq_date.to_string(),
            session: session.unwrap_or("-").to_string(),
            count,
        }),
    }
}

/// The single `<sequence:06>_*` run folder of an acquisition.
fn resolve_run_dir(nip_dir: &Utf8Path, entry: &AcquisitionEntry) -> Result<Utf8PathBuf, BidsError> {
    let prefix = entry.run_folder_prefix()?;
    let mut found = fs_util::glob_dirs(nip_dir, &format!("{prefix}*"))?;
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(BidsError::MissingRun {
            directory: nip_dir.as_std_path().to_path_buf(),
            prefix,
        }),
        count => Err(BidsError::AmbiguousRun {
            directory: nip_dir.as_std_path().to_path_buf(),
            prefix,
            count,
        }),
    }
}
