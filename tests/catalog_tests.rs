//! Asset Index Tests
//!
//! Tests for:
//! - Bulk ingest idempotency: re-scanning refreshes facts, keeps flags
//! - Filtered/sorted/paginated listing and flag counts
//! - Edit persistence with cache invalidation in the same transaction
//! - Edit-document schema migration on load
//! - Recent folders ordering

use chrono::{Duration, TimeZone, Utc};
use literoom::catalog::model::{
    Asset, Flag, FlagFilter, Folder, RenderKind, SortDirection, SortField, asset_id_for,
};
use literoom::catalog::{AssetIndex, EditState};

fn asset(folder: &str, path: &str, size: u64, days_ago: i64) -> Asset {
    let captured = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap() - Duration::days(days_ago);
    Asset {
        id: asset_id_for(folder, path),
        folder_id: folder.to_string(),
        path: path.to_string(),
        filename: path.rsplit('/').next().unwrap().to_string(),
        extension: path.rsplit('.').next().unwrap().to_lowercase(),
        file_size: size,
        modified_at: captured,
        capture_date: Some(captured),
        width: Some(6000),
        height: Some(4000),
        orientation: Some(1),
        flag: Flag::Unflagged,
    }
}

fn seeded_index() -> AssetIndex {
    let index = AssetIndex::open_in_memory().unwrap();
    index
        .upsert_folder(&Folder {
            id: "f1".into(),
            name: "Shoot".into(),
            handle_key: "f1".into(),
            last_scan_at: None,
        })
        .unwrap();
    index
        .bulk_put(&[
            asset("f1", "a.jpg", 100, 3),
            asset("f1", "b.arw", 300, 1),
            asset("f1", "sub/c.jpeg", 200, 2),
        ])
        .unwrap();
    index
}

// ============================================================================
// Ingest
// ============================================================================

#[test]
fn rescan_refreshes_facts_but_keeps_flags() {
    let index = seeded_index();
    let id = asset_id_for("f1", "a.jpg");
    index.set_flag(&id, Flag::Pick).unwrap();

    // Same path, new size — as a rescan would deliver.
    let mut updated = asset("f1", "a.jpg", 999, 3);
    updated.flag = Flag::Unflagged;
    index.bulk_put(&[updated]).unwrap();

    let stored = index.get_asset(&id).unwrap().unwrap();
    assert_eq!(stored.file_size, 999);
    assert_eq!(stored.flag, Flag::Pick, "rescan must not clobber culling");
}

#[test]
fn folder_and_path_are_unique() {
    let index = seeded_index();
    index.bulk_put(&[asset("f1", "a.jpg", 100, 3)]).unwrap();
    let counts = index.count_flags("f1").unwrap();
    assert_eq!(counts.total, 3, "duplicate path must not add a row");
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn listing_sorts_filters_and_paginates() {
    let index = seeded_index();

    let by_date = index
        .list_assets("f1", FlagFilter::All, SortField::CaptureDate, SortDirection::Ascending, 10, 0)
        .unwrap();
    let names: Vec<&str> = by_date.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "c.jpeg", "b.arw"]);

    let by_size_desc = index
        .list_assets("f1", FlagFilter::All, SortField::FileSize, SortDirection::Descending, 2, 0)
        .unwrap();
    assert_eq!(by_size_desc[0].filename, "b.arw");
    assert_eq!(by_size_desc.len(), 2);

    let page_two = index
        .list_assets("f1", FlagFilter::All, SortField::Filename, SortDirection::Ascending, 2, 2)
        .unwrap();
    assert_eq!(page_two.len(), 1);

    index.set_flag(&asset_id_for("f1", "b.arw"), Flag::Reject).unwrap();
    let rejects = index
        .list_assets("f1", FlagFilter::Reject, SortField::CaptureDate, SortDirection::Ascending, 10, 0)
        .unwrap();
    assert_eq!(rejects.len(), 1);
    assert_eq!(rejects[0].filename, "b.arw");
}

#[test]
fn flag_counts_feed_the_badges() {
    let index = seeded_index();
    index.set_flag(&asset_id_for("f1", "a.jpg"), Flag::Pick).unwrap();
    index.set_flag(&asset_id_for("f1", "b.arw"), Flag::Reject).unwrap();

    let counts = index.count_flags("f1").unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.picks, 1);
    assert_eq!(counts.rejects, 1);
    assert_eq!(counts.unflagged, 1);
}

#[test]
fn set_flag_on_missing_asset_is_not_found() {
    let index = seeded_index();
    assert!(matches!(
        index.set_flag("f1:ghost.jpg", Flag::Pick),
        Err(literoom::Error::NotFound(_))
    ));
}

// ============================================================================
// Edits & cache metadata
// ============================================================================

#[test]
fn saving_an_edit_invalidates_cached_renders() {
    let index = seeded_index();
    let id = asset_id_for("f1", "a.jpg");

    index.mark_cache_ready(&id, RenderKind::Thumbnail, "thumbnails/abc.jpg").unwrap();
    index.mark_cache_ready(&id, RenderKind::Preview1x, "previews/def.jpg").unwrap();
    assert!(index.cache_metadata(&id).unwrap().thumbnail_ready);

    let mut edit = EditState::default();
    edit.adjustments.exposure = 1.0;
    index.save_edit(&id, &edit).unwrap();

    let metadata = index.cache_metadata(&id).unwrap();
    assert!(!metadata.thumbnail_ready);
    assert!(!metadata.preview1x_ready);
    // Keys survive so reconcile can still find the blobs.
    assert_eq!(metadata.thumbnail_key.as_deref(), Some("thumbnails/abc.jpg"));

    let loaded = index.load_edit(&id).unwrap().unwrap();
    assert!((loaded.adjustments.exposure - 1.0).abs() < f32::EPSILON);
}

#[test]
fn old_edit_documents_migrate_on_load() {
    let index = seeded_index();
    let id = asset_id_for("f1", "a.jpg");

    // Write a v1-era document straight into the table via the public API:
    // save a default, then overwrite the JSON by saving a migrated form.
    // The migration path itself is covered through from_json.
    let v1 = serde_json::json!({
        "schemaVersion": 1,
        "adjustments": { "contrast": 25.0 }
    });
    let migrated = EditState::from_json_value(v1).unwrap();
    index.save_edit(&id, &migrated).unwrap();

    let loaded = index.load_edit(&id).unwrap().unwrap();
    assert_eq!(loaded.schema_version, literoom::catalog::EDIT_SCHEMA_VERSION);
    assert!((loaded.adjustments.contrast - 25.0).abs() < f32::EPSILON);
    assert!(loaded.masks.linear.is_empty());
}

// ============================================================================
// Folders
// ============================================================================

#[test]
fn recent_folders_order_by_last_scan() {
    let index = AssetIndex::open_in_memory().unwrap();
    for (id, days_ago) in [("old", 5), ("newest", 0), ("mid", 2)] {
        index
            .upsert_folder(&Folder {
                id: id.into(),
                name: id.into(),
                handle_key: id.into(),
                last_scan_at: None,
            })
            .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap() - Duration::days(days_ago);
        index.touch_folder_scanned(id, at).unwrap();
    }

    let recents = index.recent_folders(10).unwrap();
    let ids: Vec<&str> = recents.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["newest", "mid", "old"]);
}

#[test]
fn remove_folder_cascades() {
    let index = seeded_index();
    let id = asset_id_for("f1", "a.jpg");
    index.save_edit(&id, &EditState::default()).unwrap();
    index.mark_cache_ready(&id, RenderKind::Thumbnail, "thumbnails/x.jpg").unwrap();

    index.remove_folder("f1").unwrap();
    assert!(index.get_asset(&id).unwrap().is_none());
    assert!(index.load_edit(&id).unwrap().is_none());
    assert!(index.get_folder("f1").unwrap().is_none());
    assert!(index.all_cache_keys().unwrap().is_empty());
}
