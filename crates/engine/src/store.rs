//! SQLite-backed flower repository.
//!
//! Holds only a path; every call opens its own connection, which keeps the
//! store `Clone + Send + Sync` and leaves serialization of writers to the
//! caller's lock. Absent ids are normal empty results, never errors.

use crate::now_ms;
use florafield_protocol::{FlowerPacket, Vec2};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the flower store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("create db dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("decode genome for flower {id}: {source}")]
    DecodeGenome {
        id: String,
        source: serde_json::Error,
    },
    #[error("encode genome for flower {id}: {source}")]
    EncodeGenome {
        id: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FlowerStore {
    db_path: PathBuf,
}

impl FlowerStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> Result<Connection, StoreError> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Durable + fast defaults.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

    pub fn get(&self, id: &str) -> Result<Option<FlowerPacket>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, x, y, genome_json FROM flowers WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(packet_from_row).transpose()
    }

    /// Fetch records for `ids`; absent ids are silently omitted.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<FlowerPacket>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, x, y, genome_json FROM flowers WHERE id = ?1")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = stmt
                .query_row([id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .optional()?;
            if let Some(row) = row {
                out.push(packet_from_row(row)?);
            }
        }
        Ok(out)
    }

    pub fn get_all(&self) -> Result<Vec<FlowerPacket>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, x, y, genome_json FROM flowers")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(packet_from_row(row?)?);
        }
        Ok(out)
    }

    /// Location projection used to rebuild the spatial index at startup.
    pub fn get_all_locations(&self) -> Result<Vec<(String, Vec2)>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, x, y FROM flowers")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Vec2::new(row.get::<_, f64>(1)?, row.get::<_, f64>(2)?),
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert one record. Duplicate ids are filtered upstream, before the
    /// spatial index is touched.
    pub fn insert(&self, packet: &FlowerPacket) -> Result<(), StoreError> {
        let genome_json =
            serde_json::to_string(&packet.genome).map_err(|source| StoreError::EncodeGenome {
                id: packet.id.clone(),
                source,
            })?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO flowers (id, x, y, genome_json, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &packet.id,
                packet.location.x,
                packet.location.y,
                &genome_json,
                now_ms(),
            ),
        )?;
        Ok(())
    }

    pub fn remove_many(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM flowers WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Up to `n` records chosen uniformly at random.
    pub fn random_sample(&self, n: usize) -> Result<Vec<FlowerPacket>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT id, x, y, genome_json FROM flowers ORDER BY RANDOM() LIMIT ?1")?;
        let rows = stmt.query_map([n as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(packet_from_row(row?)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.open()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM flowers", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Wipe every flower. Returns the number removed.
    pub fn erase(&self) -> Result<usize, StoreError> {
        let conn = self.open()?;
        Ok(conn.execute("DELETE FROM flowers", [])?)
    }
}

fn packet_from_row(
    (id, x, y, genome_json): (String, f64, f64, String),
) -> Result<FlowerPacket, StoreError> {
    let genome = serde_json::from_str(&genome_json)
        .map_err(|source| StoreError::DecodeGenome { id: id.clone(), source })?;
    Ok(FlowerPacket {
        id,
        location: Vec2::new(x, y),
        genome,
    })
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    // Lightweight migrations: user_version + IF NOT EXISTS, resilient to
    // re-opening older databases.
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS flowers (
  id TEXT PRIMARY KEY,
  x REAL NOT NULL,
  y REAL NOT NULL,
  genome_json TEXT NOT NULL DEFAULT '{}',
  created_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flowers_created_at ON flowers(created_at_ms);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use florafield_protocol::FlowerGenome;

    fn temp_store() -> FlowerStore {
        let p = std::env::temp_dir().join(format!(
            "florafield-store-test-{}.db",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let store = FlowerStore::new(p);
        let _ = store.open().expect("open db");
        store
    }

    fn packet(id: &str, x: f64, y: f64) -> FlowerPacket {
        FlowerPacket {
            id: id.to_string(),
            location: Vec2::new(x, y),
            genome: FlowerGenome::preset(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = temp_store();
        store.insert(&packet("f1", 1.5, -2.5)).unwrap();
        let got = store.get("f1").unwrap().expect("present");
        assert_eq!(got.location, Vec2::new(1.5, -2.5));
        assert_eq!(got.genome, FlowerGenome::preset());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn get_many_omits_absent_ids() {
        let store = temp_store();
        store.insert(&packet("f1", 0.0, 0.0)).unwrap();
        store.insert(&packet("f2", 1.0, 1.0)).unwrap();
        let got = store
            .get_many(&[
                "f1".to_string(),
                "ghost".to_string(),
                "f2".to_string(),
            ])
            .unwrap();
        let ids: Vec<&str> = got.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    #[test]
    fn remove_many_reports_removed_count() {
        let store = temp_store();
        store.insert(&packet("f1", 0.0, 0.0)).unwrap();
        store.insert(&packet("f2", 1.0, 1.0)).unwrap();
        let n = store
            .remove_many(&["f1".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn locations_projection_skips_genomes() {
        let store = temp_store();
        store.insert(&packet("f1", 3.0, 4.0)).unwrap();
        let locations = store.get_all_locations().unwrap();
        assert_eq!(locations, vec![("f1".to_string(), Vec2::new(3.0, 4.0))]);
    }

    #[test]
    fn random_sample_is_bounded() {
        let store = temp_store();
        for i in 0..5 {
            store.insert(&packet(&format!("f{i}"), i as f64, 0.0)).unwrap();
        }
        assert_eq!(store.random_sample(3).unwrap().len(), 3);
        assert_eq!(store.random_sample(99).unwrap().len(), 5);
        assert!(store.random_sample(0).unwrap().is_empty());
    }

    #[test]
    fn erase_wipes_everything() {
        let store = temp_store();
        store.insert(&packet("f1", 0.0, 0.0)).unwrap();
        store.insert(&packet("f2", 1.0, 0.0)).unwrap();
        assert_eq!(store.erase().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
