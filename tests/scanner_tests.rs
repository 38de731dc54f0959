//! Folder Scanner Tests
//!
//! Tests for:
//! - Recursive discovery with the case-insensitive extension filter
//! - Batch delivery sizes
//! - Header metadata extraction (EXIF capture date, mtime fallback)
//! - Permission policy: subtree skip vs root abort
//! - Cancellation mid-walk

use literoom::catalog::model::Asset;
use literoom::catalog::scanner::Scanner;
use literoom::vfs::{HostFs, MemoryFs, PermissionState};
use literoom::{CancelToken, EngineSettings, Error};

fn scan_all(fs: &MemoryFs, root: &str) -> (Vec<Asset>, literoom::catalog::ScanOutcome) {
    let scanner = Scanner::new(&EngineSettings::default());
    let mut found = Vec::new();
    let outcome = scanner
        .scan(
            fs,
            &MemoryFs::handle_for(root),
            "folder-1",
            &CancelToken::new(),
            |batch| {
                found.extend(batch);
                Ok(())
            },
            |_| {},
        )
        .unwrap();
    (found, outcome)
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn discovers_recursively_with_extension_filter() {
    let fs = MemoryFs::new();
    fs.add_file("/photos/one.jpg", literoom::testing::grey_jpeg(4, 4, 50));
    fs.add_file("/photos/two.JPEG", literoom::testing::grey_jpeg(4, 4, 60));
    fs.add_file("/photos/raw/three.arw", literoom::testing::synthetic_arw());
    fs.add_file("/photos/notes.txt", b"not a photo".to_vec());
    fs.add_file("/photos/movie.mp4", vec![0; 32]);

    let (found, outcome) = scan_all(&fs, "/photos");
    assert_eq!(outcome.files_found, 3);
    assert_eq!(found.len(), 3);

    let mut paths: Vec<&str> = found.iter().map(|a| a.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["one.jpg", "raw/three.arw", "two.JPEG"]);

    let arw = found.iter().find(|a| a.path == "raw/three.arw").unwrap();
    assert_eq!(arw.extension, "arw");
    assert_eq!(arw.folder_id, "folder-1");
    assert!(arw.id.contains("raw/three.arw"));
}

#[test]
fn batches_are_bounded() {
    let fs = MemoryFs::new();
    let jpeg = literoom::testing::grey_jpeg(2, 2, 10);
    for i in 0..7 {
        fs.add_file(&format!("/photos/img-{i}.jpg"), jpeg.clone());
    }

    let scanner = Scanner::new(&EngineSettings {
        scan_batch: 3,
        ..Default::default()
    });
    let mut batch_sizes = Vec::new();
    scanner
        .scan(
            &fs,
            &MemoryFs::handle_for("/photos"),
            "folder-1",
            &CancelToken::new(),
            |batch| {
                batch_sizes.push(batch.len());
                Ok(())
            },
            |_| {},
        )
        .unwrap();
    assert_eq!(batch_sizes, vec![3, 3, 1]);
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn exif_capture_date_wins_over_mtime() {
    let fs = MemoryFs::new();
    let tagged = literoom::testing::jpeg_with_exif(
        &literoom::testing::grey_jpeg(4, 4, 50),
        6,
        literoom::testing::FIXTURE_DATETIME,
    );
    fs.add_file("/photos/tagged.jpg", tagged);
    fs.add_file("/photos/plain.jpg", literoom::testing::grey_jpeg(4, 4, 50));

    let (found, _) = scan_all(&fs, "/photos");
    let tagged = found.iter().find(|a| a.path == "tagged.jpg").unwrap();
    let plain = found.iter().find(|a| a.path == "plain.jpg").unwrap();

    let capture = tagged.capture_date.unwrap();
    assert_eq!(capture.format("%Y:%m:%d %H:%M:%S").to_string(), literoom::testing::FIXTURE_DATETIME);
    assert_eq!(tagged.orientation, Some(6));

    // No EXIF: capture date falls back to the file's modification time.
    assert_eq!(plain.capture_date, Some(plain.modified_at));
    assert_eq!(plain.width, Some(4));
    assert_eq!(plain.height, Some(4));
}

// ============================================================================
// Permission policy
// ============================================================================

#[test]
fn denied_subtree_is_skipped_and_reported() {
    let fs = MemoryFs::new();
    fs.add_file("/photos/ok.jpg", literoom::testing::grey_jpeg(2, 2, 10));
    fs.add_file("/photos/locked/secret.jpg", literoom::testing::grey_jpeg(2, 2, 10));
    fs.set_permission("/photos/locked", PermissionState::Denied);

    let (found, outcome) = scan_all(&fs, "/photos");
    assert_eq!(found.len(), 1);
    assert_eq!(outcome.skipped_subtrees, vec!["locked"]);
}

#[test]
fn denied_root_aborts() {
    let fs = MemoryFs::new();
    fs.add_dir("/photos");
    fs.set_permission("/photos", PermissionState::Denied);

    let scanner = Scanner::new(&EngineSettings::default());
    let result = scanner.scan(
        &fs,
        &MemoryFs::handle_for("/photos"),
        "folder-1",
        &CancelToken::new(),
        |_| Ok(()),
        |_| {},
    );
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

// ============================================================================
// Cancellation & progress
// ============================================================================

#[test]
fn cancellation_stops_the_walk() {
    let fs = MemoryFs::new();
    let jpeg = literoom::testing::grey_jpeg(2, 2, 10);
    for i in 0..20 {
        fs.add_file(&format!("/photos/img-{i:02}.jpg"), jpeg.clone());
    }

    let token = CancelToken::new();
    let scanner = Scanner::new(&EngineSettings {
        scan_batch: 5,
        ..Default::default()
    });
    let token_in_batch = token.clone();
    let result = scanner.scan(
        &fs,
        &MemoryFs::handle_for("/photos"),
        "folder-1",
        &token,
        move |_| {
            token_in_batch.cancel();
            Ok(())
        },
        |_| {},
    );
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn final_progress_report_is_marked_done() {
    let fs = MemoryFs::new();
    fs.add_file("/photos/a.jpg", literoom::testing::grey_jpeg(2, 2, 10));

    let scanner = Scanner::new(&EngineSettings::default());
    let mut reports = Vec::new();
    scanner
        .scan(
            &fs,
            &MemoryFs::handle_for("/photos"),
            "folder-1",
            &CancelToken::new(),
            |_| Ok(()),
            |progress| reports.push(progress.clone()),
        )
        .unwrap();

    let last = reports.last().unwrap();
    assert!(last.done);
    assert_eq!(last.files_found, 1);
}
