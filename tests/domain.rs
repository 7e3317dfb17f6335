use assert_matches::assert_matches;
use camino::Utf8Path;

use bids_importer::domain::{AcquisitionEntry, FileReference, Modality, SubjectId};
use bids_importer::error::BidsError;

#[test]
fn entry_descriptor_follows_the_grammar_order() {
    let subject: SubjectId = "3".parse().unwrap();
    let entry = AcquisitionEntry::new("12", "func", "run-2_rec-norm_acq-mb3_task-loc_bold").unwrap();

    let descriptor = entry.descriptor(&subject, Some("01"));
    assert_eq!(
        descriptor.file_name(&entry.label.tag, "nii"),
        "sub-3_ses-01_task-loc_acq-mb3_rec-norm_run-2_bold.nii"
    );
    assert_eq!(descriptor.task_name(), Some("loc"));
}

#[test]
fn descriptor_parses_back_to_the_same_fields() {
    let subject: SubjectId = "sub-01".parse().unwrap();
    let entry = AcquisitionEntry::new("5", "func", "task-rest_run-1_bold").unwrap();
    let name = entry
        .descriptor(&subject, Some("02"))
        .file_name(&entry.label.tag, "nii");
    assert_eq!(name, "sub-01_ses-02_task-rest_run-1_bold.nii");

    let reference = FileReference::parse(Utf8Path::new(&name)).unwrap();
    assert_eq!(reference.basename(), name);
    assert_eq!(reference.tag(), "bold");
    assert_eq!(reference.file_type(), "nii");
    assert_eq!(
        reference.fields(),
        [
            ("sub".to_string(), "01".to_string()),
            ("ses".to_string(), "02".to_string()),
            ("task".to_string(), "rest".to_string()),
            ("run".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn modalities_map_to_folders() {
    for (raw, folder, dicom) in [
        ("anat", "anat", true),
        ("func", "func", true),
        ("dwi", "dwi", true),
        ("fmap", "fmap", true),
        ("meg", "meg", false),
    ] {
        let modality: Modality = raw.parse().unwrap();
        assert_eq!(modality.folder(), folder);
        assert_eq!(modality.is_dicom(), dicom);
    }
    assert_matches!("pet".parse::<Modality>(), Err(BidsError::InvalidModality(_)));
}

#[test]
fn labels_need_a_trailing_tag() {
    assert_matches!(
        AcquisitionEntry::new("2", "anat", "task-rest"),
        Err(BidsError::InvalidAcquisition(_))
    );
    assert_matches!(
        AcquisitionEntry::new("2", "anat", ""),
        Err(BidsError::InvalidAcquisition(_))
    );
}
