use super::catalog::{Actor, CatalogManager};
use super::deposits::DepositEngine;
use super::scheduler::PeriodicTask;
use crate::domain::ports::SharedClock;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: usize,
    /// Expired reservations that were sold, renewed or released by someone else first.
    pub skipped: usize,
    pub failed: usize,
    pub expired_intents: usize,
}

/// Releases reservations past their deadline and expires stale deposit intents.
#[derive(Clone)]
pub struct ReservationSweeper {
    catalog: CatalogManager,
    deposits: DepositEngine,
    clock: SharedClock,
}

impl ReservationSweeper {
    pub fn new(catalog: CatalogManager, deposits: DepositEngine, clock: SharedClock) -> Self {
        Self {
            catalog,
            deposits,
            clock,
        }
    }

    /// One pass. Safe to run concurrently with purchases: each release re-checks the product
    /// under its row lock.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for product_id in self.catalog.expired_reservations(self.clock.now()).await? {
            match self.catalog.release(product_id, Actor::Sweeper).await {
                Ok(true) => report.released += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(product = %product_id, error = %e, "Failed to release expired reservation");
                    report.failed += 1;
                }
            }
        }
        report.expired_intents = self.deposits.expire_stale_intents().await?;

        if report != SweepReport::default() {
            info!(
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                expired_intents = report.expired_intents,
                "Sweep finished"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for ReservationSweeper {
    fn name(&self) -> &str {
        "reservation-sweeper"
    }

    async fn run_once(&self) -> Result<()> {
        self.sweep().await.map(|_| ())
    }
}
