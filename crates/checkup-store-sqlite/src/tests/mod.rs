//! Integration tests for the engine against in-memory databases and an
//! in-memory artifact store.

mod backup;
mod export;
mod introspect;

use std::sync::Arc;

use checkup_artifacts::ObjectArtifactStore;
use checkup_core::{Deadline, snapshot::Row};
use serde_json::Value;

use crate::{DatabaseHandle, EngineConfig};

/// Small pages and chunks so paging and chunking paths are exercised.
pub(crate) fn config() -> EngineConfig {
  EngineConfig { page_size: 2, chunk_size: 2, ..EngineConfig::default() }
}

pub(crate) async fn db() -> DatabaseHandle {
  DatabaseHandle::open_in_memory()
    .await
    .expect("in-memory database")
}

pub(crate) fn artifacts() -> Arc<ObjectArtifactStore> { Arc::new(ObjectArtifactStore::in_memory()) }

pub(crate) async fn exec(db: &DatabaseHandle, sql: impl Into<String>) {
  let sql = sql.into();
  db.call(Deadline::none(), move |conn| {
    conn.execute_batch(&sql)?;
    Ok(())
  })
  .await
  .unwrap();
}

pub(crate) async fn count(db: &DatabaseHandle, table: &'static str) -> usize {
  db.call(Deadline::none(), move |conn| {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(n as usize)
  })
  .await
  .unwrap()
}

/// Primary keys of `table`, sorted.
pub(crate) async fn ids(db: &DatabaseHandle, table: &'static str) -> Vec<String> {
  db.call(Deadline::none(), move |conn| {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table} ORDER BY id"))?;
    let ids = stmt
      .query_map([], |r| r.get::<_, String>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
  })
  .await
  .unwrap()
}

pub(crate) async fn text_column(
  db: &DatabaseHandle,
  table: &'static str,
  column: &'static str,
  id: &'static str,
) -> Option<String> {
  db.call(Deadline::none(), move |conn| {
    Ok(conn.query_row(
      &format!("SELECT {column} FROM {table} WHERE id = ?1"),
      [id],
      |r| r.get::<_, Option<String>>(0),
    )?)
  })
  .await
  .unwrap()
}

pub(crate) fn row(value: Value) -> Row {
  match value {
    Value::Object(map) => map,
    other => panic!("not an object: {other}"),
  }
}

/// A small but complete data set: three users (u3 has no dependents), a
/// course, an admin, and one row in every child table.
pub(crate) async fn seed(db: &DatabaseHandle) {
  exec(
    db,
    r#"
    INSERT INTO users (id, email, name, created_at, updated_at) VALUES
      ('u1', 'ann@example.com', 'Ann', '2026-01-01T00:00:01.000000Z', '2026-01-01T00:00:01.000000Z'),
      ('u2', 'bob@example.com', 'Bob', '2026-01-01T00:00:02.000000Z', '2026-01-01T00:00:02.000000Z'),
      ('u3', 'cat@example.com', 'Cat', '2026-01-01T00:00:03.000000Z', '2026-01-01T00:00:03.000000Z');

    INSERT INTO admins (id, username, password_hash, created_at, updated_at) VALUES
      ('a1', 'root', '$argon2id$stub', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z');

    INSERT INTO courses (id, title, metadata, created_at, updated_at) VALUES
      ('c1', 'Sleep basics', '{"weeks": 4}', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z');

    INSERT INTO requirements (id, user_id, answers, created_at, updated_at) VALUES
      ('r1', 'u1', '{"q1": "yes", "q2": "no"}', '2026-01-02T00:00:00.000000Z', '2026-01-02T00:00:00.000000Z');

    INSERT INTO symptom_checks (id, user_id, answers, checklist, created_at, updated_at) VALUES
      ('s1', 'u2', '{"answers": [{"questionId": "q1", "answer": "yes"}]}', '["fatigue"]',
       '2026-01-02T00:00:00.000000Z', '2026-01-02T00:00:00.000000Z');

    INSERT INTO health_analysis (id, user_id, symptom_check_id, score, summary, details, created_at, updated_at) VALUES
      ('h1', 'u2', 's1', 0.75, 'mild', '{"flags": ["sleep"]}',
       '2026-01-02T00:00:01.000000Z', '2026-01-02T00:00:01.000000Z');

    INSERT INTO user_choices (id, user_id, course_id, choice, created_at, updated_at) VALUES
      ('uc1', 'u1', 'c1', '{"enrolled": true}', '2026-01-03T00:00:00.000000Z', '2026-01-03T00:00:00.000000Z');

    INSERT INTO audit_logs (id, admin_id, action, detail, created_at, updated_at) VALUES
      ('l1', 'a1', 'login', '{}', '2026-01-03T00:00:00.000000Z', '2026-01-03T00:00:00.000000Z');
    "#,
  )
  .await;
}

/// Hold the migration guard as some other process would.
pub(crate) async fn hold_migration_guard(db: &DatabaseHandle, holder: &str) {
  let now = crate::encode::encode_dt(chrono::Utc::now());
  exec(
    db,
    format!(
      "INSERT INTO schema_migration_lock (id, holder, acquired_at) VALUES (1, '{holder}', '{now}')"
    ),
  )
  .await;
}
