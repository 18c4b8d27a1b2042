use loom_protocol::{DirectionControl, Pick, ReducedPattern, Settings};
use loom_server::store::{PatternStore, Progress, MAX_PATTERNS, SCHEMA_VERSION};
use loom_server::StoreError;
use tempfile::TempDir;

fn pattern(name: &str, picks: usize) -> ReducedPattern {
    ReducedPattern {
        name: name.to_string(),
        color_table: vec!["#ffffff".to_string(), "#202020".to_string()],
        warp_colors: vec![0, 1, 0, 1],
        threading: vec![1, 2, 3, 4],
        picks: (0..picks)
            .map(|i| Pick {
                color: 1,
                shaft_word: 1 << (i % 4),
            })
            .collect(),
        pick0: Pick::default(),
    }
}

#[test]
fn reopen_keeps_patterns_progress_and_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loom.sqlite");

    {
        let mut store = PatternStore::open(&path, MAX_PATTERNS).unwrap();
        let a = pattern("a", 8);
        let b = pattern("b", 30);
        store.put(&a, &Progress::initial(&a, 4), None).unwrap();
        store.put(&b, &Progress::initial(&b, 4), None).unwrap();

        let mut progress = Progress::initial(&a, 4);
        progress.pick_number = 5;
        progress.pick_repeat_number = 3;
        store.save_progress("a", &progress).unwrap();
        store.touch("a").unwrap();

        store
            .save_settings(&Settings {
                loom_name: "workshop".to_string(),
                direction_control: DirectionControl::SoftwareControlled,
                ..Settings::default()
            })
            .unwrap();
    }

    let store = PatternStore::open(&path, MAX_PATTERNS).unwrap();
    assert_eq!(store.names().unwrap(), vec!["b", "a"]);
    assert_eq!(store.most_recent().unwrap().as_deref(), Some("a"));

    let a = store.get("a").unwrap();
    assert_eq!(a.pattern, pattern("a", 8));
    assert_eq!(a.progress.pick_number, 5);
    assert_eq!(a.progress.pick_repeat_number, 3);
    assert!(!a.progress.separate_weaving_repeats);

    let b = store.get("b").unwrap();
    assert!(b.progress.separate_weaving_repeats);

    let settings = store.load_settings().unwrap().expect("saved settings");
    assert_eq!(settings.loom_name, "workshop");
    assert_eq!(
        settings.direction_control,
        DirectionControl::SoftwareControlled
    );
}

#[test]
fn foreign_schema_is_refused_until_reset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loom.sqlite");
    {
        let store = PatternStore::open(&path, MAX_PATTERNS).unwrap();
        drop(store);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '99' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();
    }

    match PatternStore::open(&path, MAX_PATTERNS) {
        Err(StoreError::SchemaMismatch { found, expected }) => {
            assert_eq!(found, 99);
            assert_eq!(expected, SCHEMA_VERSION);
        }
        Err(other) => panic!("expected schema mismatch, got {other:?}"),
        Ok(_) => panic!("expected schema mismatch"),
    }

    PatternStore::reset(&path).unwrap();
    let store = PatternStore::open(&path, MAX_PATTERNS).unwrap();
    assert!(store.names().unwrap().is_empty());
    assert!(store.load_settings().unwrap().is_none());
}

#[test]
fn unversioned_database_with_patterns_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.sqlite");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE patterns (pattern_name TEXT);")
            .unwrap();
    }
    assert!(matches!(
        PatternStore::open(&path, MAX_PATTERNS),
        Err(StoreError::SchemaMismatch { found: 0, .. })
    ));
}

#[test]
fn history_is_bounded_but_spares_the_current_pattern() {
    let dir = TempDir::new().unwrap();
    let mut store = PatternStore::open(dir.path().join("loom.sqlite"), 4).unwrap();

    let current = pattern("current", 4);
    store
        .put(&current, &Progress::initial(&current, 4), None)
        .unwrap();
    let mut evicted = Vec::new();
    for i in 0..6 {
        let p = pattern(&format!("p{i}"), 4);
        evicted.extend(
            store
                .put(&p, &Progress::initial(&p, 4), Some("current"))
                .unwrap(),
        );
    }

    assert_eq!(evicted, vec!["p0", "p1", "p2"]);
    assert_eq!(store.names().unwrap(), vec!["current", "p3", "p4", "p5"]);
}

#[test]
fn reset_of_missing_file_is_fine() {
    let dir = TempDir::new().unwrap();
    PatternStore::reset(dir.path().join("never-created.sqlite")).unwrap();
}
