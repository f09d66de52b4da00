//! Cursor-based replication from the local store to the remote store.
//!
//! ## What this does
//! 1. Read the cursor: the greatest `tile_key` already in the remote.
//! 2. Load up to `page_size` local rows after it, ascending.
//! 3. Upsert them into the remote in transactions of `commit_batch` rows.
//!
//! ## Failure and resume
//! A remote error rolls back only the open batch; committed batches stay and the
//! next attempt re-reads the cursor from the remote, so nothing is tracked
//! locally. Cancellation stops between rows and commits what was staged.
//!
//! ## Wake-ups
//! [`Replicator::run`] never polls. It waits on a hint channel fed by the
//! capture loop and re-arms itself while full pages keep coming back.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::{PgConnection, SqliteConnection};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::connection::connect_sqlite;
use crate::models::Observation;
use crate::schema::traffic;
use crate::schema::traffic::dsl as t;
use crate::store::{LocalStore, StoreError};

/// Capacity of the hint channel between the capture loop and the replicator.
pub const HINT_CAPACITY: usize = 10;

/// Write side of the replication target.
///
/// Implemented for `PgConnection` (production) and `SqliteConnection`.
pub trait RemoteStore {
    /// Greatest key present in byte order, `None` when empty. The Postgres
    /// column is `COLLATE "C"` so this matches local SQLite ordering.
    fn max_tile_key(&mut self) -> QueryResult<Option<String>>;

    /// Insert or replace one row by key.
    fn upsert_row(&mut self, row: &Observation) -> QueryResult<usize>;

    /// Run `f` inside a transaction; roll back if it returns an error.
    fn in_transaction(
        &mut self,
        f: &mut dyn FnMut(&mut Self) -> QueryResult<usize>,
    ) -> QueryResult<usize>;
}

macro_rules! impl_remote_store {
    ($conn:ty) => {
        impl RemoteStore for $conn {
            fn max_tile_key(&mut self) -> QueryResult<Option<String>> {
                t::traffic
                    .select(diesel::dsl::max(t::tile_key))
                    .get_result(self)
            }

            fn upsert_row(&mut self, row: &Observation) -> QueryResult<usize> {
                diesel::insert_into(traffic::table)
                    .values(row)
                    .on_conflict(t::tile_key)
                    .do_update()
                    .set(row)
                    .execute(self)
            }

            fn in_transaction(
                &mut self,
                f: &mut dyn FnMut(&mut Self) -> QueryResult<usize>,
            ) -> QueryResult<usize> {
                self.transaction(|conn| f(conn))
            }
        }
    };
}

impl_remote_store!(PgConnection);
impl_remote_store!(SqliteConnection);

/// Options for one replication pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Rows read from the local store per pass.
    pub page_size: usize,
    /// Rows per remote transaction.
    pub commit_batch: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            commit_batch: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("local store: {0}")]
    Local(#[from] StoreError),

    #[error("remote store: {0}")]
    Remote(#[source] diesel::result::Error),
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Greatest key known to be in the remote after the pass.
    pub cursor: Option<String>,
    pub copied: usize,
    /// Stopped early on cancellation.
    pub interrupted: bool,
    /// A full page was copied; more rows are probably waiting.
    pub rearm: bool,
}

/// Copy one page of rows after the remote cursor.
pub fn sync_once<R: RemoteStore>(
    local: &mut SqliteConnection,
    remote: &mut R,
    opts: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    let page_size = opts.page_size.max(1);
    let commit_batch = opts.commit_batch.max(1);

    let start = remote.max_tile_key().map_err(SyncError::Remote)?;
    let rows = LocalStore::new().rows_after(
        local,
        start.as_deref(),
        i64::try_from(page_size).unwrap_or(i64::MAX),
    )?;
    debug!(cursor = ?start, pending = rows.len(), "replication page loaded");

    let mut copied = 0usize;
    let mut interrupted = false;

    for batch in rows.chunks(commit_batch) {
        let mut stopped = false;
        let staged = remote
            .in_transaction(&mut |conn| {
                let mut n = 0;
                for row in batch {
                    if cancel.is_cancelled() {
                        stopped = true;
                        break;
                    }
                    conn.upsert_row(row)?;
                    n += 1;
                }
                Ok(n)
            })
            .map_err(|e| {
                warn!(copied, error = %e, "replication batch rolled back");
                SyncError::Remote(e)
            })?;
        copied += staged;
        if stopped {
            interrupted = true;
            break;
        }
    }

    let cursor = match copied {
        0 => start,
        n => Some(rows[n - 1].tile_key.clone()),
    };
    Ok(SyncOutcome {
        cursor,
        copied,
        interrupted,
        rearm: copied == page_size,
    })
}

/// Opens a fresh remote connection for each attempt.
pub type RemoteConnector<R> = Arc<dyn Fn() -> anyhow::Result<R> + Send + Sync>;

/// Long-lived replication task.
pub struct Replicator<R> {
    local_url: String,
    connect_remote: RemoteConnector<R>,
    opts: SyncOptions,
}

impl<R> Replicator<R>
where
    R: RemoteStore + Send + 'static,
{
    pub fn new(local_url: impl Into<String>, connect_remote: RemoteConnector<R>, opts: SyncOptions) -> Self {
        Self {
            local_url: local_url.into(),
            connect_remote,
            opts,
        }
    }

    /// One pass on the blocking pool with fresh connections.
    pub async fn attempt(&self, cancel: &CancellationToken) -> anyhow::Result<SyncOutcome> {
        let local_url = self.local_url.clone();
        let connect = Arc::clone(&self.connect_remote);
        let opts = self.opts;
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<SyncOutcome> {
            let mut local = connect_sqlite(&local_url)?;
            let mut remote = connect()?;
            Ok(sync_once(&mut local, &mut remote, &opts, &cancel)?)
        })
        .await?
    }

    /// Run until `cancel` fires or every hint sender is gone.
    ///
    /// `rearm` should feed the same channel as `hints`; a full page sends a
    /// hint so the backlog drains without waiting for the next capture. It is
    /// weak so dropping the last real sender still closes the channel.
    /// Returns the number of attempts made.
    pub async fn run(
        self,
        mut hints: mpsc::Receiver<()>,
        rearm: mpsc::WeakSender<()>,
        cancel: CancellationToken,
    ) -> usize {
        let mut attempts = 0;
        loop {
            let hint = tokio::select! {
                _ = cancel.cancelled() => break,
                hint = hints.recv() => hint,
            };
            if hint.is_none() {
                break;
            }
            // Coalesce hints that piled up while the last pass ran.
            while hints.try_recv().is_ok() {}

            attempts += 1;
            match self.attempt(&cancel).await {
                Ok(outcome) => {
                    info!(
                        copied = outcome.copied,
                        cursor = ?outcome.cursor,
                        interrupted = outcome.interrupted,
                        "replication pass finished"
                    );
                    if outcome.rearm && !cancel.is_cancelled() {
                        if let Some(tx) = rearm.upgrade() {
                            let _ = tx.try_send(());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "replication pass failed, waiting for next hint"),
            }
        }
        debug!(attempts, "replicator stopped");
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = SyncOptions::default();
        assert_eq!((opts.page_size, opts.commit_batch), (1000, 100));
    }
}
