//! Durable pattern history, per-pattern progress and global settings.
//!
//! Every mutating call commits before it returns, so the caller can
//! acknowledge the client knowing the change survives a power loss.

use crate::error::StoreError;
use crate::position::default_separate_repeats;
use crate::protocol::{ReducedPattern, Settings};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const SCHEMA_VERSION: i64 = 1;

/// Default bound on the recency list.
pub const MAX_PATTERNS: usize = 25;

/// Never prune below this, so the current pattern and the newest upload
/// can coexist.
const MIN_PATTERNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub pick_number: u32,
    pub pick_repeat_number: u32,
    pub end_number0: u32,
    pub end_number1: u32,
    pub end_repeat_number: u32,
    pub thread_group_size: u32,
    pub separate_weaving_repeats: bool,
    pub separate_threading_repeats: bool,
}

impl Progress {
    pub fn initial(pattern: &ReducedPattern, thread_group_size: u32) -> Self {
        Self {
            pick_number: 0,
            pick_repeat_number: 1,
            end_number0: 0,
            end_number1: 0,
            end_repeat_number: 1,
            thread_group_size: thread_group_size.max(1),
            separate_weaving_repeats: default_separate_repeats(pattern.num_picks()),
            separate_threading_repeats: default_separate_repeats(pattern.num_ends()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPattern {
    pub pattern: ReducedPattern,
    pub progress: Progress,
}

pub struct PatternStore {
    conn: Connection,
    max_entries: usize,
}

impl PatternStore {
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::with_connection(conn, max_entries)
    }

    pub fn open_in_memory(max_entries: usize) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, max_entries)
    }

    /// Delete the database file (and its WAL side files) if present.
    pub fn reset(path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        for suffix in ["", "-wal", "-shm"] {
            let mut p = path.as_os_str().to_owned();
            p.push(suffix);
            match std::fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn with_connection(conn: Connection, max_entries: usize) -> Result<Self, StoreError> {
        check_or_init_schema(&conn)?;
        Ok(Self {
            conn,
            max_entries: max_entries.max(MIN_PATTERNS),
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Store `pattern` with the given progress.
    ///
    /// An existing entry with the same name is replaced in place: it keeps
    /// its slot in the recency list but its body and progress are
    /// overwritten. A new name becomes the most recent entry. The list is
    /// then pruned, never removing `keep`. Returns the evicted names.
    pub fn put(
        &mut self,
        pattern: &ReducedPattern,
        progress: &Progress,
        keep: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let pattern_json = serde_json::to_string(pattern)?;
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE patterns SET pattern_json = ?1, pick_number = ?2, pick_repeat_number = ?3, \
             end_number0 = ?4, end_number1 = ?5, end_repeat_number = ?6, thread_group_size = ?7, \
             separate_weaving_repeats = ?8, separate_threading_repeats = ?9 \
             WHERE pattern_name = ?10",
            params![
                pattern_json,
                progress.pick_number,
                progress.pick_repeat_number,
                progress.end_number0,
                progress.end_number1,
                progress.end_repeat_number,
                progress.thread_group_size,
                progress.separate_weaving_repeats,
                progress.separate_threading_repeats,
                pattern.name,
            ],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO patterns (pattern_name, pattern_json, pick_number, pick_repeat_number, \
                 end_number0, end_number1, end_repeat_number, thread_group_size, \
                 separate_weaving_repeats, separate_threading_repeats, last_used) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 (SELECT COALESCE(MAX(last_used), 0) + 1 FROM patterns))",
                params![
                    pattern.name,
                    pattern_json,
                    progress.pick_number,
                    progress.pick_repeat_number,
                    progress.end_number0,
                    progress.end_number1,
                    progress.end_repeat_number,
                    progress.thread_group_size,
                    progress.separate_weaving_repeats,
                    progress.separate_threading_repeats,
                ],
            )?;
        }
        let evicted = prune(&tx, self.max_entries, keep)?;
        tx.commit()?;
        Ok(evicted)
    }

    pub fn get(&self, name: &str) -> Result<StoredPattern, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT pattern_json, pick_number, pick_repeat_number, end_number0, end_number1, \
                 end_repeat_number, thread_group_size, separate_weaving_repeats, \
                 separate_threading_repeats FROM patterns WHERE pattern_name = ?1",
                params![name],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        Progress {
                            pick_number: r.get(1)?,
                            pick_repeat_number: r.get(2)?,
                            end_number0: r.get(3)?,
                            end_number1: r.get(4)?,
                            end_repeat_number: r.get(5)?,
                            thread_group_size: r.get(6)?,
                            separate_weaving_repeats: r.get(7)?,
                            separate_threading_repeats: r.get(8)?,
                        },
                    ))
                },
            )
            .optional()?;
        let Some((pattern_json, progress)) = row else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        let mut pattern: ReducedPattern = serde_json::from_str(&pattern_json)?;
        pattern.name = name.to_string();
        Ok(StoredPattern { pattern, progress })
    }

    /// Pattern names, least recently used first.
    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT pattern_name FROM patterns ORDER BY last_used ASC, id ASC")?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn most_recent(&self) -> Result<Option<String>, StoreError> {
        let name = self
            .conn
            .query_row(
                "SELECT pattern_name FROM patterns ORDER BY last_used DESC, id DESC LIMIT 1",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Mark `name` as the most recently selected entry.
    pub fn touch(&mut self, name: &str) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE patterns SET last_used = (SELECT COALESCE(MAX(last_used), 0) + 1 FROM patterns) \
             WHERE pattern_name = ?1",
            params![name],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn save_progress(&mut self, name: &str, progress: &Progress) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE patterns SET pick_number = ?1, pick_repeat_number = ?2, end_number0 = ?3, \
             end_number1 = ?4, end_repeat_number = ?5, thread_group_size = ?6, \
             separate_weaving_repeats = ?7, separate_threading_repeats = ?8 \
             WHERE pattern_name = ?9",
            params![
                progress.pick_number,
                progress.pick_repeat_number,
                progress.end_number0,
                progress.end_number1,
                progress.end_repeat_number,
                progress.thread_group_size,
                progress.separate_weaving_repeats,
                progress.separate_threading_repeats,
                name,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Remove every pattern except `current`, whose progress is untouched.
    pub fn clear_all_except(&mut self, current: Option<&str>) -> Result<(), StoreError> {
        match current {
            Some(name) => self
                .conn
                .execute("DELETE FROM patterns WHERE pattern_name != ?1", params![name])?,
            None => self.conn.execute("DELETE FROM patterns", [])?,
        };
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        let json = self
            .conn
            .query_row("SELECT settings_json FROM settings WHERE id = 1", [], |r| {
                r.get::<_, String>(0)
            })
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_settings(&mut self, settings: &Settings) -> Result<(), StoreError> {
        let json = serde_json::to_string(settings)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (id, settings_json) VALUES (1, ?1)",
            params![json],
        )?;
        Ok(())
    }
}

fn check_or_init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |r| r.get(0),
        )
        .optional()?;

    match version {
        Some(v) => {
            let found = v.parse::<i64>().unwrap_or(-1);
            if found != SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            Ok(())
        }
        None => {
            let legacy: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'patterns'",
                    [],
                    |r| r.get(0),
                )
                .optional()?;
            if legacy.is_some() {
                return Err(StoreError::SchemaMismatch {
                    found: 0,
                    expected: SCHEMA_VERSION,
                });
            }
            // Tables and version land together or not at all.
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(
                "CREATE TABLE patterns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pattern_name TEXT NOT NULL UNIQUE,
                    pattern_json TEXT NOT NULL,
                    pick_number INTEGER NOT NULL,
                    pick_repeat_number INTEGER NOT NULL,
                    end_number0 INTEGER NOT NULL,
                    end_number1 INTEGER NOT NULL,
                    end_repeat_number INTEGER NOT NULL,
                    thread_group_size INTEGER NOT NULL,
                    separate_weaving_repeats INTEGER NOT NULL,
                    separate_threading_repeats INTEGER NOT NULL,
                    last_used INTEGER NOT NULL
                );
                CREATE TABLE settings (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    settings_json TEXT NOT NULL
                );",
            )?;
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        }
    }
}

fn prune(
    conn: &Connection,
    max_entries: usize,
    keep: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let names: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT pattern_name FROM patterns ORDER BY last_used ASC, id ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let mut excess = names.len().saturating_sub(max_entries);
    let mut evicted = Vec::new();
    for name in names {
        if excess == 0 {
            break;
        }
        if Some(name.as_str()) == keep {
            continue;
        }
        conn.execute("DELETE FROM patterns WHERE pattern_name = ?1", params![name])?;
        evicted.push(name);
        excess -= 1;
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Pick;

    fn pattern(name: &str, num_picks: usize, num_ends: usize) -> ReducedPattern {
        ReducedPattern {
            name: name.to_string(),
            color_table: vec!["#ffffff".into(), "#000000".into()],
            warp_colors: vec![0; num_ends],
            threading: (0..num_ends).map(|i| (i % 4) as u32 + 1).collect(),
            picks: (0..num_picks)
                .map(|i| Pick {
                    color: 1,
                    shaft_word: 1 << (i % 4),
                })
                .collect(),
            pick0: Pick::default(),
        }
    }

    fn put_new(store: &mut PatternStore, p: &ReducedPattern) {
        store.put(p, &Progress::initial(p, 4), None).unwrap();
    }

    #[test]
    fn initial_progress_uses_separator_threshold() {
        let p = Progress::initial(&pattern("a", 21, 20), 4);
        assert!(p.separate_weaving_repeats);
        assert!(!p.separate_threading_repeats);
        assert_eq!((p.pick_number, p.pick_repeat_number), (0, 1));
    }

    #[test]
    fn reupload_resets_progress_and_keeps_its_slot() {
        let mut store = PatternStore::open_in_memory(MAX_PATTERNS).unwrap();
        let a = pattern("a", 8, 8);
        put_new(&mut store, &a);
        put_new(&mut store, &pattern("b", 8, 8));

        let mut moved = Progress::initial(&a, 4);
        moved.pick_number = 5;
        moved.pick_repeat_number = 3;
        store.save_progress("a", &moved).unwrap();
        assert_eq!(store.get("a").unwrap().progress.pick_number, 5);

        let a2 = pattern("a", 12, 8);
        put_new(&mut store, &a2);
        assert_eq!(store.names().unwrap(), vec!["a", "b"]);
        let stored = store.get("a").unwrap();
        assert_eq!(stored.pattern.picks.len(), 12);
        assert_eq!(stored.progress, Progress::initial(&a2, 4));
    }

    #[test]
    fn eviction_drops_least_recently_selected_but_spares_keep() {
        let mut store = PatternStore::open_in_memory(3).unwrap();
        for name in ["a", "b", "c"] {
            put_new(&mut store, &pattern(name, 4, 4));
        }
        store.touch("a").unwrap();
        let d = pattern("d", 4, 4);
        let evicted = store.put(&d, &Progress::initial(&d, 4), Some("b")).unwrap();
        assert_eq!(evicted, vec!["c"]);
        assert_eq!(store.names().unwrap(), vec!["b", "a", "d"]);
        assert_eq!(store.most_recent().unwrap().as_deref(), Some("d"));
    }

    #[test]
    fn fresh_schema_is_versioned() {
        let store = PatternStore::open_in_memory(MAX_PATTERNS).unwrap();
        let version: String = store
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
        check_or_init_schema(&store.conn).unwrap();
    }

    #[test]
    fn bound_never_drops_below_two() {
        let store = PatternStore::open_in_memory(0).unwrap();
        assert_eq!(store.max_entries(), 2);
    }

    #[test]
    fn clear_all_except_current_preserves_its_progress() {
        let mut store = PatternStore::open_in_memory(MAX_PATTERNS).unwrap();
        let a = pattern("a", 4, 4);
        put_new(&mut store, &a);
        put_new(&mut store, &pattern("b", 4, 4));
        let mut progress = Progress::initial(&a, 4);
        progress.end_number0 = 2;
        progress.end_number1 = 4;
        store.save_progress("a", &progress).unwrap();

        store.clear_all_except(Some("a")).unwrap();
        assert_eq!(store.names().unwrap(), vec!["a"]);
        assert_eq!(store.get("a").unwrap().progress, progress);

        store.clear_all_except(None).unwrap();
        assert!(store.names().unwrap().is_empty());
    }

    #[test]
    fn missing_pattern_is_not_found() {
        let mut store = PatternStore::open_in_memory(MAX_PATTERNS).unwrap();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.touch("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn settings_round_trip() {
        let mut store = PatternStore::open_in_memory(MAX_PATTERNS).unwrap();
        assert_eq!(store.load_settings().unwrap(), None);
        let mut settings = Settings::default();
        settings.thread_group_size = 6;
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), Some(settings));
    }
}
