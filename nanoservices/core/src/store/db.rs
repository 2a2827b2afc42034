use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed store for pipeline run history.
///
/// This is bookkeeping for the scheduler only; it never holds pipeline data.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing and one-off runs).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                rows_loaded INTEGER,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER
            );
            CREATE TABLE IF NOT EXISTS stage_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id),
                attempt INTEGER NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_pipeline ON pipeline_runs(pipeline);
            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status);
            CREATE INDEX IF NOT EXISTS idx_stage_runs_run_id ON stage_runs(run_id);",
        )?;
        Ok(())
    }

    /// Record a new pipeline run as started.
    pub fn insert_pipeline_run(
        &self,
        id: &str,
        pipeline: &str,
        trigger_type: &str,
        started_at: &str,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO pipeline_runs (id, pipeline, trigger_type, status, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4)",
            params![id, pipeline, trigger_type, started_at],
        )?;
        Ok(())
    }

    /// Bump the attempt counter of a running pipeline run.
    pub fn start_attempt(&self, id: &str, attempt: u32) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE pipeline_runs SET attempts = ?2 WHERE id = ?1",
            params![id, attempt],
        )?;
        Ok(())
    }

    /// Complete a pipeline run.
    pub fn complete_pipeline_run(&self, done: &CompletedRun<'_>) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE pipeline_runs
             SET status = ?2, rows_loaded = ?3, error = ?4, finished_at = ?5, duration_ms = ?6
             WHERE id = ?1",
            params![done.id, done.status, done.rows, done.error, done.finished_at, done.duration_ms],
        )?;
        Ok(())
    }

    /// Record how one stage of one attempt ended.
    pub fn insert_stage_run(
        &self,
        run_id: &str,
        attempt: u32,
        stage: &str,
        error: Option<&str>,
        finished_at: &str,
        duration_ms: i64,
    ) -> Result<(), rusqlite::Error> {
        let status = if error.is_some() { "failed" } else { "completed" };
        self.conn.execute(
            "INSERT INTO stage_runs (run_id, attempt, stage, status, finished_at, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![run_id, attempt, stage, status, finished_at, duration_ms, error],
        )?;
        Ok(())
    }

    /// Mark in-flight runs as crashed (for crash recovery on startup).
    pub fn mark_inflight_as_crashed(&self) -> Result<usize, rusqlite::Error> {
        let count = self.conn.execute(
            "UPDATE pipeline_runs SET status = 'crashed' WHERE status = 'running'",
            [],
        )?;
        Ok(count)
    }

    /// Get recent pipeline runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<PipelineRunRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, pipeline, trigger_type, status, attempts, rows_loaded, error,
                    started_at, finished_at, duration_ms
             FROM pipeline_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], PipelineRunRow::from_row)?;
        rows.collect()
    }

    /// The most recent successful run of `pipeline`, if any.
    pub fn last_completed(&self, pipeline: &str) -> Result<Option<PipelineRunRow>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT id, pipeline, trigger_type, status, attempts, rows_loaded, error,
                        started_at, finished_at, duration_ms
                 FROM pipeline_runs WHERE pipeline = ?1 AND status = 'completed'
                 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                params![pipeline],
                PipelineRunRow::from_row,
            )
            .optional()
    }

    /// Get stage runs for a specific pipeline run, in execution order.
    pub fn stage_runs_for(&self, run_id: &str) -> Result<Vec<StageRunRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, attempt, stage, status, finished_at, duration_ms, error
             FROM stage_runs WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(StageRunRow {
                run_id: row.get(0)?,
                attempt: row.get(1)?,
                stage: row.get(2)?,
                status: row.get(3)?,
                finished_at: row.get(4)?,
                duration_ms: row.get(5)?,
                error: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}

/// Final state of a run, written by [`Store::complete_pipeline_run`].
#[derive(Debug)]
pub struct CompletedRun<'a> {
    pub id: &'a str,
    pub status: &'a str,
    pub rows: Option<i64>,
    pub error: Option<&'a str>,
    pub finished_at: &'a str,
    pub duration_ms: i64,
}

#[derive(Debug)]
pub struct PipelineRunRow {
    pub id: String,
    pub pipeline: String,
    pub trigger_type: String,
    pub status: String,
    pub attempts: u32,
    pub rows_loaded: Option<i64>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
}

impl PipelineRunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            pipeline: row.get(1)?,
            trigger_type: row.get(2)?,
            status: row.get(3)?,
            attempts: row.get(4)?,
            rows_loaded: row.get(5)?,
            error: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
            duration_ms: row.get(9)?,
        })
    }
}

#[derive(Debug)]
pub struct StageRunRow {
    pub run_id: String,
    pub attempt: u32,
    pub stage: String,
    pub status: String,
    pub finished_at: String,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete<'a>(id: &'a str, status: &'a str, rows: Option<i64>, error: Option<&'a str>) -> CompletedRun<'a> {
        CompletedRun { id, status, rows, error, finished_at: "2026-10-17T06:30:05Z", duration_ms: 5000 }
    }

    #[test]
    fn create_and_complete_pipeline_run() {
        let store = Store::in_memory().unwrap();

        store.insert_pipeline_run("run-1", "rest_countries", "cron", "2026-10-17T06:30:00Z").unwrap();
        store.start_attempt("run-1", 1).unwrap();

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "running");
        assert_eq!(runs[0].attempts, 1);

        store.complete_pipeline_run(&complete("run-1", "completed", Some(250), None)).unwrap();

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].rows_loaded, Some(250));
        assert_eq!(runs[0].duration_ms, Some(5000));
    }

    #[test]
    fn stage_runs_keep_attempt_and_order() {
        let store = Store::in_memory().unwrap();
        store.insert_pipeline_run("run-1", "rest_countries", "cron", "2026-10-17T06:30:00Z").unwrap();

        store.insert_stage_run("run-1", 1, "extract", Some("HTTP 503"), "2026-10-17T06:30:01Z", 1000).unwrap();
        store.insert_stage_run("run-1", 2, "extract", None, "2026-10-17T06:33:02Z", 900).unwrap();
        store.insert_stage_run("run-1", 2, "transform", None, "2026-10-17T06:33:02Z", 3).unwrap();
        store.insert_stage_run("run-1", 2, "load", None, "2026-10-17T06:33:04Z", 2000).unwrap();

        let stages = store.stage_runs_for("run-1").unwrap();
        assert_eq!(stages.len(), 4);
        assert_eq!((stages[0].attempt, stages[0].status.as_str()), (1, "failed"));
        assert_eq!(stages[0].error.as_deref(), Some("HTTP 503"));
        assert_eq!(stages[3].stage, "load");
        assert_eq!(stages[3].status, "completed");
    }

    #[test]
    fn mark_inflight_as_crashed() {
        let store = Store::in_memory().unwrap();

        store.insert_pipeline_run("run-1", "a", "cron", "2026-10-17T06:30:00Z").unwrap();
        store.insert_pipeline_run("run-2", "b", "manual", "2026-10-17T06:30:01Z").unwrap();
        store.complete_pipeline_run(&complete("run-2", "completed", Some(1), None)).unwrap();

        let crashed = store.mark_inflight_as_crashed().unwrap();
        assert_eq!(crashed, 1);

        let runs = store.recent_runs(10).unwrap();
        let run1 = runs.iter().find(|r| r.id == "run-1").unwrap();
        assert_eq!(run1.status, "crashed");
        let run2 = runs.iter().find(|r| r.id == "run-2").unwrap();
        assert_eq!(run2.status, "completed");
    }

    #[test]
    fn last_completed_ignores_failures() {
        let store = Store::in_memory().unwrap();
        assert!(store.last_completed("rest_countries").unwrap().is_none());

        store.insert_pipeline_run("run-1", "rest_countries", "cron", "2026-10-10T06:30:00Z").unwrap();
        store.complete_pipeline_run(&complete("run-1", "completed", Some(250), None)).unwrap();
        store.insert_pipeline_run("run-2", "rest_countries", "cron", "2026-10-17T06:30:00Z").unwrap();
        store.complete_pipeline_run(&complete("run-2", "failed", None, Some("HTTP 503"))).unwrap();

        let last = store.last_completed("rest_countries").unwrap().unwrap();
        assert_eq!(last.id, "run-1");
    }

    #[test]
    fn recent_runs_respects_limit() {
        let store = Store::in_memory().unwrap();

        for i in 0..5 {
            store.insert_pipeline_run(
                &format!("run-{i}"), "test", "interval",
                &format!("2026-10-17T10:00:{i:02}Z"),
            ).unwrap();
        }

        let runs = store.recent_runs(3).unwrap();
        assert_eq!(runs.len(), 3);
        // Most recent first
        assert_eq!(runs[0].id, "run-4");
    }
}
