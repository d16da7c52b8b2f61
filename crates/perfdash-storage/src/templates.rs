use std::collections::BTreeSet;

use chrono::Utc;

use crate::engine::SqliteStorageEngine;
use crate::error::Result;
use crate::ReportTemplateStore;

pub(crate) const TEMPLATES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS report_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS report_template_tests (
    template_id TEXT NOT NULL,
    test TEXT NOT NULL,
    PRIMARY KEY (template_id, test)
);
";

impl SqliteStorageEngine {
    /// Creates or replaces a report template and the tests it covers.
    pub fn upsert_report_template(&self, id: &str, name: &str, tests: &[String]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO report_templates (id, name, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, Utc::now().timestamp_millis()],
        )?;
        tx.execute(
            "DELETE FROM report_template_tests WHERE template_id = ?1",
            rusqlite::params![id],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO report_template_tests (template_id, test) VALUES (?1, ?2)",
            )?;
            for test in tests {
                stmt.execute(rusqlite::params![id, test])?;
            }
        }
        tx.commit()?;
        tracing::debug!(template = %id, tests = tests.len(), "Stored report template");
        Ok(())
    }
}

impl ReportTemplateStore for SqliteStorageEngine {
    fn test_keys_for_template(&self, template_id: &str) -> Result<BTreeSet<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached("SELECT test FROM report_template_tests WHERE template_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![template_id], |row| row.get::<_, String>(0))?;
        let mut tests = BTreeSet::new();
        for row in rows {
            tests.insert(row?);
        }
        Ok(tests)
    }
}
