//! The cross-process migration guard.
//!
//! A single row in `schema_migration_lock` names whoever is migrating. It is
//! taken inside an `IMMEDIATE` transaction so two processes can never both
//! see the table empty. A row older than the configured TTL belongs to a
//! process that died mid-migration and may be taken over.

use std::time::Duration;

use chrono::{DateTime, Utc};
use checkup_core::Deadline;
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use crate::{
  DatabaseHandle, Error, Result,
  encode::{decode_dt, encode_dt},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Holder {
  pub name:  String,
  pub since: DateTime<Utc>,
}

fn read_holder(conn: &rusqlite::Connection) -> Result<Option<Holder>> {
  let row: Option<(String, String)> = conn
    .query_row(
      "SELECT holder, acquired_at FROM schema_migration_lock WHERE id = 1",
      [],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;
  row
    .map(|(name, since)| Ok(Holder { name, since: decode_dt(&since)? }))
    .transpose()
}

fn is_stale(holder: &Holder, now: DateTime<Utc>, ttl: Duration) -> bool {
  let age = now.signed_duration_since(holder.since);
  age.to_std().is_ok_and(|age| age > ttl)
}

/// Take the guard for `me`, or fail with `MigrationInProgress`.
pub(crate) fn acquire(
  conn: &mut rusqlite::Connection,
  me: &str,
  now: DateTime<Utc>,
  ttl: Duration,
) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  match read_holder(&tx)? {
    Some(holder) if !is_stale(&holder, now, ttl) => {
      return Err(Error::MigrationInProgress {
        holder: holder.name,
        since:  encode_dt(holder.since),
      });
    }
    Some(holder) => {
      tracing::warn!(
        stale_holder = %holder.name,
        since = %encode_dt(holder.since),
        "taking over abandoned migration guard"
      );
      tx.execute(
        "UPDATE schema_migration_lock SET holder = ?1, acquired_at = ?2 WHERE id = 1",
        rusqlite::params![me, encode_dt(now)],
      )?;
    }
    None => {
      tx.execute(
        "INSERT INTO schema_migration_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)",
        rusqlite::params![me, encode_dt(now)],
      )?;
    }
  }

  tx.commit()?;
  tracing::debug!(holder = %me, "migration guard acquired");
  Ok(())
}

/// Drop the guard if `me` still holds it.
pub(crate) fn release(conn: &rusqlite::Connection, me: &str) -> Result<()> {
  conn.execute(
    "DELETE FROM schema_migration_lock WHERE id = 1 AND holder = ?1",
    rusqlite::params![me],
  )?;
  tracing::debug!(holder = %me, "migration guard released");
  Ok(())
}

/// Run `f` while holding the guard. The guard is released whatever `f`
/// returns; an error from `f` wins over an error releasing.
pub(crate) fn with_guard<R>(
  conn: &mut rusqlite::Connection,
  me: &str,
  ttl: Duration,
  f: impl FnOnce(&mut rusqlite::Connection) -> Result<R>,
) -> Result<R> {
  acquire(conn, me, Utc::now(), ttl)?;
  let outcome = f(conn);
  let released = release(conn, me);
  let value = outcome?;
  released?;
  Ok(value)
}

/// The live (non-stale) holder, if any.
pub(crate) async fn current_holder(
  db: &DatabaseHandle,
  ttl: Duration,
  deadline: Deadline,
) -> Result<Option<Holder>> {
  db.call(deadline, move |conn| {
    Ok(read_holder(conn)?.filter(|h| !is_stale(h, Utc::now(), ttl)))
  })
  .await
}

/// Fail with `MigrationInProgress` while a migration holds the guard.
pub(crate) async fn ensure_idle(
  db: &DatabaseHandle,
  ttl: Duration,
  deadline: Deadline,
) -> Result<()> {
  match current_holder(db, ttl, deadline).await? {
    Some(holder) => Err(Error::MigrationInProgress {
      holder: holder.name,
      since:  encode_dt(holder.since),
    }),
    None => Ok(()),
  }
}
