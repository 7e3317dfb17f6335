use std::sync::LazyLock;

use regex::Regex;

/// Predicate over a dataset-relative path such as `/sub-01/anat/sub-01_T1w.nii`.
pub trait BidsValidator {
    fn is_bids(&self, path: &str) -> bool;
}

const ENTITY: &str = r"[a-zA-Z0-9]+";

static TOP_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/(dataset_description\.json|README(\.md|\.txt|\.rst)?|CHANGES|LICENSE|participants\.(tsv|json)|\.bidsignore|(task-[a-zA-Z0-9]+_)?(bold|events|meg)\.json)$",
    )
    .unwrap()
});

static SCANS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?_(scans\.(tsv|json)|sessions\.(tsv|json))$"
    ))
    .unwrap()
});

static ANAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/anat/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?(_acq-{ENTITY})?(_ce-{ENTITY})?(_rec-{ENTITY})?(_run-{ENTITY})?_(T1w|T2w|T1map|T2map|T2star|FLAIR|FLASH|PD|PDmap|PDT2|inplaneT1|inplaneT2|angio|defacemask)\.(nii(\.gz)?|json)$"
    ))
    .unwrap()
});

static FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/func/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?_task-{ENTITY}(_acq-{ENTITY})?(_ce-{ENTITY})?(_dir-{ENTITY})?(_rec-{ENTITY})?(_run-{ENTITY})?(_echo-[0-9]+)?_(bold|cbv|phase|sbref|events|physio|stim)\.(nii(\.gz)?|json|tsv(\.gz)?)$"
    ))
    .unwrap()
});

static DWI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/dwi/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?(_acq-{ENTITY})?(_dir-{ENTITY})?(_run-{ENTITY})?_(dwi|sbref)\.(nii(\.gz)?|json|bval|bvec)$"
    ))
    .unwrap()
});

static FMAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/fmap/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?(_acq-{ENTITY})?(_dir-{ENTITY})?(_run-{ENTITY})?_(phasediff|phase1|phase2|magnitude|magnitude1|magnitude2|fieldmap|epi)\.(nii(\.gz)?|json)$"
    ))
    .unwrap()
});

static MEG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/sub-(?P<sub>{ENTITY})(/ses-(?P<ses>{ENTITY}))?/meg/sub-(?P<sub2>{ENTITY})(_ses-(?P<ses2>{ENTITY}))?(_task-{ENTITY})?(_acq-{ENTITY})?(_run-{ENTITY})?(_proc-{ENTITY})?(_split-[0-9]+)?_(meg\.(fif|json)|channels\.tsv|events\.tsv|coordsystem\.json|photo\.jpg|headshape\.pos)$"
    ))
    .unwrap()
});

/// File naming rules of the BIDS layout this importer produces. The subject
/// and session in the file name must agree with their folders.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidsNamingValidator;

impl BidsValidator for BidsNamingValidator {
    fn is_bids(&self, path: &str) -> bool {
        if TOP_LEVEL.is_match(path) {
            return true;
        }
        [&*SCANS, &*ANAT, &*FUNC, &*DWI, &*FMAP, &*MEG]
            .iter()
            .filter_map(|pattern| pattern.captures(path))
            .any(|captures| {
                let folder_session = captures.name("ses").map(|value| value.as_str());
                let file_session = captures.name("ses2").map(|value| value.as_str());
                captures.name("sub").map(|value| value.as_str())
                    == captures.name("sub2").map(|value| value.as_str())
                    && folder_session == file_session
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_imported_layout() {
        let validator = BidsNamingValidator;
        for path in [
            "/dataset_description.json",
            "/participants.tsv",
            "/README",
            "/CHANGES",
            "/sub-01/anat/sub-01_T1w.nii",
            "/sub-01/ses-02/anat/sub-01_ses-02_acq-mprage_T1w.json",
            "/sub-01/ses-02/func/sub-01_ses-02_task-rest_run-1_bold.nii",
            "/sub-01/func/sub-01_task-loc_events.tsv",
            "/sub-01/meg/sub-01_task-rest_run-1_meg.fif",
            "/sub-01/meg/sub-01_task-rest_channels.tsv",
            "/sub-01/sub-01_scans.tsv",
        ] {
            assert!(validator.is_bids(path), "{path} should be valid");
        }
    }

    #[test]
    fn rejects_foreign_files() {
        let validator = BidsNamingValidator;
        for path in [
            "/sub-01/downloaded",
            "/sub-01/func/sub-01_bold.nii",
            "/sub-01/anat/sub-02_T1w.nii",
            "/sub-01/ses-02/anat/sub-01_T1w.nii",
            "/notes.txt",
        ] {
            assert!(!validator.is_bids(path), "{path} should be rejected");
        }
    }
}
