//! Application-layer packages: multicast setup (TS005), fragmented data
//! block transport (TS004) and clock synchronization (TS003).
//!
//! Downlink requests of the first two are persisted as rows and emitted by a
//! [`Reconciler`] until the device acknowledges them or the retry budget is
//! spent. Acknowledgements arrive as uplinks on the package FPort and are
//! routed to the package `handle_command`.
pub mod clocksync;
pub mod fragmentation;
pub mod multicastsetup;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lora_as_error::ASResult;
use lora_as_models::settings::CommandSync;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Duration;
use tracing::{debug, error, instrument};

pub use clocksync::ClockSync;
pub use fragmentation::FragmentationSession;
pub use multicastsetup::{McClassCSession, MulticastSetup};

/// One family of persisted, retried downlink commands.
#[async_trait]
pub trait RetriedCommand: Send + Sync + 'static {
    type Row: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Human readable row key for logs.
    fn describe(&self, row: &Self::Row) -> String;

    /// Rows not provisioned, under the retry budget and due at `now`.
    /// Rows locked by another replica are skipped.
    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &DatabaseTransaction,
    ) -> ASResult<Vec<Self::Row>>;

    /// Builds the command for `row` and enqueues it.
    async fn emit(&self, row: &Self::Row, db: &DatabaseTransaction) -> ASResult<()>;

    /// Increments the retry counter and pushes `retry_after` one interval out.
    async fn schedule_retry(
        &self,
        row: Self::Row,
        now: DateTime<Utc>,
        db: &DatabaseTransaction,
    ) -> ASResult<()>;
}

/// Periodic emitter for one [`RetriedCommand`] family.
pub struct Reconciler<T: RetriedCommand> {
    db: DatabaseConnection,
    command: T,
    settings: CommandSync,
}

impl<T: RetriedCommand> Reconciler<T> {
    pub fn new(db: DatabaseConnection, command: T, settings: CommandSync) -> Self {
        Self {
            db,
            command,
            settings,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.settings.sync_interval()
    }

    #[inline]
    pub fn command(&self) -> &T {
        &self.command
    }

    /// Emits every due row in one transaction. A failing row is rolled back
    /// to its savepoint and still consumes a retry.
    #[instrument(name = "reconciler-tick", skip_all, fields(command = self.command.name()))]
    pub async fn tick(&self, now: DateTime<Utc>) -> ASResult<usize> {
        let max_retries = i32::try_from(self.settings.sync_retries)?;
        let txn = self.db.begin().await?;
        let rows = self
            .command
            .find_pending(now, max_retries, self.settings.sync_batch_size, &txn)
            .await?;
        let count = rows.len();

        for row in rows {
            let savepoint = txn.begin().await?;
            match self.command.emit(&row, &savepoint).await {
                Ok(()) => savepoint.commit().await?,
                Err(e) => {
                    error!(row = %self.command.describe(&row), error = %e, "Failed to emit command");
                    savepoint.rollback().await?;
                }
            }
            self.command.schedule_retry(row, now, &txn).await?;
        }

        txn.commit().await?;
        if count > 0 {
            debug!(count, "Commands emitted");
        }
        Ok(count)
    }
}
