//! [`DatabaseHandle`]: the one way components reach the database.

use std::{future::Future, path::Path};

use checkup_core::Deadline;

use crate::{Error, Result, schema::BOOTSTRAP};

/// An open SQLite database with the bootstrap schema applied.
///
/// Cloning is cheap and every clone shares the same connection thread.
#[derive(Clone)]
pub struct DatabaseHandle {
  conn: tokio_rusqlite::Connection,
}

impl DatabaseHandle {
  /// Open (or create) the database at `path` and run the bootstrap DDL.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let handle = Self { conn };
    handle.bootstrap().await?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(handle)
  }

  /// Open an in-memory database, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let handle = Self { conn };
    handle.bootstrap().await?;
    Ok(handle)
  }

  /// Close the connection. Other clones of this handle fail afterwards.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    tracing::debug!("database closed");
    Ok(())
  }

  async fn bootstrap(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(BOOTSTRAP)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` on the connection thread, waiting at most until `deadline`.
  ///
  /// When the wait times out the closure may still run to completion, so
  /// this is for reads and single-statement writes only. Multi-step writes
  /// go through [`DatabaseHandle::call_cooperative`].
  pub(crate) async fn call<F, R>(&self, deadline: Deadline, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    bounded(deadline, self.call_cooperative(deadline, f)).await?
  }

  /// Run `f` on the connection thread without an outer timeout.
  ///
  /// The closure owns cancellation: it checks `deadline` between chunks and
  /// before committing, so whatever it reports is what happened.
  pub(crate) async fn call_cooperative<F, R>(&self, deadline: Deadline, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    deadline.check()?;
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

/// Await `fut`, giving up once `deadline` passes.
pub(crate) async fn bounded<T>(deadline: Deadline, fut: impl Future<Output = T>) -> Result<T> {
  match deadline.remaining() {
    None => Ok(fut.await),
    Some(left) => tokio::time::timeout(left, fut)
      .await
      .map_err(|_| Error::DeadlineExceeded),
  }
}
