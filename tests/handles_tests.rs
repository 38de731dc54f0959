//! Permission & Handle Store Tests
//!
//! Tests for:
//! - Handle persistence round-trips as opaque bytes
//! - Startup classification of saved folders
//! - The denial-and-recovery flow: prompt → deny → re-request → grant

use literoom::store::HandleStore;
use literoom::vfs::{HostFs, MemoryFs, PermissionState, UserGesture};

#[test]
fn handles_persist_as_opaque_bytes() {
    let store = HandleStore::open_in_memory().unwrap();
    let fs = MemoryFs::new();
    fs.add_dir("/photos/2024");

    let handle = MemoryFs::handle_for("/photos/2024");
    store.save("folder-a", &handle).unwrap();

    let loaded = store.load("folder-a").unwrap().unwrap();
    assert_eq!(loaded, handle);
    assert!(fs.read_dir(&loaded).is_ok());
}

#[test]
fn startup_classification_covers_all_states() {
    let store = HandleStore::open_in_memory().unwrap();
    let fs = MemoryFs::new();

    fs.add_dir("/granted");
    fs.add_dir("/prompted");
    fs.set_permission("/prompted", PermissionState::Prompt);
    fs.add_dir("/denied");
    fs.set_permission("/denied", PermissionState::Denied);

    for key in ["granted", "prompted", "denied", "gone"] {
        store
            .save(key, &MemoryFs::handle_for(&format!("/{key}")))
            .unwrap();
    }
    // "gone" points at a directory that never existed.

    assert_eq!(store.classify(&fs, "granted").unwrap(), PermissionState::Granted);
    assert_eq!(store.classify(&fs, "prompted").unwrap(), PermissionState::Prompt);
    assert_eq!(store.classify(&fs, "denied").unwrap(), PermissionState::Denied);
    assert_eq!(store.classify(&fs, "gone").unwrap(), PermissionState::Missing);
}

// ============================================================================
// Scenario: denial and recovery
// ============================================================================

#[test]
fn denial_then_regrant_unblocks_the_folder() {
    let store = HandleStore::open_in_memory().unwrap();
    let fs = MemoryFs::new();
    fs.add_file("/photos/a.jpg", vec![1, 2, 3]);
    fs.set_permission("/photos", PermissionState::Prompt);
    // The host will deny the first prompt and grant the second.
    fs.script_request(
        "/photos",
        vec![PermissionState::Denied, PermissionState::Granted],
    );

    let handle = MemoryFs::handle_for("/photos");
    store.save("folder-a", &handle).unwrap();
    assert_eq!(store.classify(&fs, "folder-a").unwrap(), PermissionState::Prompt);

    // First request under a user gesture: denied, and it sticks.
    let gesture = UserGesture::from_user_interaction();
    let state = store.request_access(&fs, "folder-a", &gesture).unwrap();
    assert_eq!(state, PermissionState::Denied);
    assert_eq!(store.classify(&fs, "folder-a").unwrap(), PermissionState::Denied);
    assert!(fs.read_dir(&handle).is_err(), "denied folders stay unreadable");

    // No auto-retry happened: a fresh classify still reports denied.
    assert_eq!(store.classify(&fs, "folder-a").unwrap(), PermissionState::Denied);

    // A second explicit request is granted and unblocks listing.
    let state = store.request_access(&fs, "folder-a", &gesture).unwrap();
    assert_eq!(state, PermissionState::Granted);
    assert_eq!(store.classify(&fs, "folder-a").unwrap(), PermissionState::Granted);
    assert_eq!(fs.read_dir(&handle).unwrap().len(), 1);
}

#[test]
fn removing_a_handle_forgets_the_folder() {
    let store = HandleStore::open_in_memory().unwrap();
    store.save("folder-a", &MemoryFs::handle_for("/photos")).unwrap();
    store.save("folder-b", &MemoryFs::handle_for("/other")).unwrap();

    store.remove("folder-a").unwrap();
    let keys: Vec<String> = store.list().unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["folder-b"]);
}
