use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bids_importer::app::{
    App, DEFAULT_EVENTS_PATH, DEFAULT_LOCATION, ImportOptions, ImportResult, RowAction,
};
use bids_importer::config::SettingsLoader;
use bids_importer::convert::{SystemDefacer, SystemDicomConverter, SystemMegWriter};
use bids_importer::error::BidsError;
use bids_importer::output::{ConsoleOutput, JsonOutput, OutputMode};
use bids_importer::scaffold::{FixedPrompter, Prompter, StdinPrompter};
use bids_importer::store::{DEFAULT_DATASET_NAME, DatasetStore};
use bids_importer::validate::BidsNamingValidator;

#[derive(Parser)]
#[command(name = "bids-import")]
#[command(about = "Import NeuroSpin MRI/MEG acquisitions into a BIDS dataset, driven by exp_info/participants.tsv")]
#[command(version, author)]
struct Cli {
    /// Folder holding exp_info/ and the dataset folder.
    #[arg(short = 'r', long, default_value = ".")]
    root_path: Utf8PathBuf,

    #[arg(short = 'n', long, default_value = DEFAULT_DATASET_NAME)]
    dataset_name: String,

    /// Copy recorded events into the dataset.
    #[arg(long, value_enum, default_value_t = YesNo::N)]
    copy_events: YesNo,

    /// Database for manifest rows without a location.
    #[arg(short = 'd', long, default_value = DEFAULT_LOCATION)]
    database: String,

    #[arg(long, default_value = DEFAULT_EVENTS_PATH)]
    events_path: Utf8PathBuf,

    /// Settings file, defaults to exp_info/bids_import.json when present.
    #[arg(long)]
    settings: Option<Utf8PathBuf>,

    /// Re-import subjects already marked as downloaded.
    #[arg(long)]
    force: bool,

    /// Deface anatomical images without asking.
    #[arg(long, conflicts_with = "no_deface")]
    deface: bool,

    #[arg(long)]
    no_deface: bool,

    /// Answer no to every question and print the result as JSON.
    #[arg(long)]
    non_interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum YesNo {
    #[value(alias = "yes")]
    Y,
    #[value(alias = "no")]
    N,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BidsError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BidsError) -> u8 {
    match error {
        BidsError::MissingExpInfo(_)
        | BidsError::MissingManifest(_)
        | BidsError::ManifestRead { .. }
        | BidsError::ManifestParse { .. }
        | BidsError::ConfigRead(_)
        | BidsError::ConfigParse(_) => 2,
        BidsError::MissingSourceDirectory { .. }
        | BidsError::AmbiguousSourceDirectory { .. }
        | BidsError::MissingRun { .. }
        | BidsError::AmbiguousRun { .. } => 3,
        BidsError::MissingTool(_)
        | BidsError::Conversion(_)
        | BidsError::Deface(_)
        | BidsError::MegWrite(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let root_path = std::path::absolute(cli.root_path.as_std_path()).into_diagnostic()?;
    let root_path = Utf8PathBuf::from_path_buf(root_path)
        .map_err(|path| miette::miette!("root path {} is not valid UTF-8", path.display()))?;
    let store = DatasetStore::new(root_path, Some(&cli.dataset_name));
    let settings = SettingsLoader::resolve(cli.settings.as_deref(), &store.exp_info_dir())?;

    let prompter: Box<dyn Prompter> = match output_mode {
        OutputMode::NonInteractive => Box::new(FixedPrompter { answer: false }),
        OutputMode::Interactive => Box::new(StdinPrompter),
    };
    let deface = if cli.deface {
        true
    } else if cli.no_deface {
        false
    } else {
        prompter.confirm("Do you want deface T1? (y/n)")?
    };

    let options = ImportOptions {
        force: cli.force,
        deface,
        copy_events: cli.copy_events == YesNo::Y,
        events_path: cli.events_path,
        default_location: cli.database,
    };

    let app = App::new(
        store.clone(),
        settings.clone(),
        SystemDicomConverter::new(&settings, &store),
        SystemDefacer::new(settings.deface.clone()),
        SystemMegWriter::new(&settings),
        BidsNamingValidator,
    );

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.import(&options, prompter.as_ref(), &JsonOutput)?;
            JsonOutput::print_import(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.import(&options, prompter.as_ref(), &ConsoleOutput)?;
            print_import_summary(&result);
        }
    }
    Ok(())
}

fn print_import_summary(result: &ImportResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}BIDS import summary: {}{reset}", result.dataset_root);
    println!(
        "{green}Imported: {}  Skipped: {}  DICOM series: {}  MEG recordings: {}{reset}",
        result.imported(),
        result.skipped(),
        result.converted,
        result.meg_written
    );

    for subject in &result.subjects {
        let (label, color) = match subject.action {
            RowAction::Imported => ("imported", green),
            RowAction::Skipped => ("skipped", yellow),
        };
        let session = subject
            .session
            .as_deref()
            .map(|session| format!(" ses-{session}"))
            .unwrap_or_default();
        println!("{color}  {}{session} ({label}){reset}", subject.subject);
    }

    if !result.defaced.is_empty() {
        println!("{cyan}Defaced: {}{reset}", result.defaced.len());
    }
    if !result.patched.is_empty() {
        println!("{cyan}Sidecars patched: {}{reset}", result.patched.len());
    }
    if !result.events_copied.is_empty() {
        println!("{cyan}Event files copied: {}{reset}", result.events_copied.len());
    }
    println!("{cyan}Participants: {}{reset}", result.participants_path);
    println!("{cyan}Download report: {}{reset}", result.report_path);

    for entry in &result.validation {
        let color = if entry.valid { green } else { red };
        println!("{color}  {} {}{reset}", entry.path, entry.valid);
    }
    if !result.warnings.is_empty() {
        println!("{yellow}Warnings: {}{reset}", result.warnings.len());
    }
}
