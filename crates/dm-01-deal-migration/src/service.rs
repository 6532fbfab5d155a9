//! # Deal Migration Service
//!
//! Implements the `DealMigrationApi` port using injected dependencies.
//!
//! ## Migration Flow
//!
//! ```text
//! deals ──► classify ──► group by piece ──► claim piece
//!                                                │
//!       ┌────────────────────────────────────────┘
//!       ▼
//!   [index has it?] ──yes──► commit (reconciled)
//!       │ no
//!       ▼
//!   locate ──► probe unsealed ──► LazySectorMount ──► register_shard ──► commit
//! ```
//!
//! Pieces are processed concurrently, up to
//! `MigrationConfig::max_parallel_deals` at a time. Deals sharing a piece are
//! tried in input order until one settles the piece; the rest are reported as
//! duplicates. Per-deal failures are logged and skipped; only systemic
//! failures (index unreachable, registration state unreadable) and
//! cancellation abort the run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use shard_telemetry::{
    metric_inc, HistogramTimer, DEALS_PROCESSED, DEAL_FAILURES, MIGRATIONS_CANCELLED,
    MIGRATION_DURATION, SHARDS_REGISTERED, SHARD_RECOVERIES,
};
use shared_types::{DealId, DealRecord, PieceCid};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::adapters::{InMemoryRegistrationStore, LazySectorMount};
use crate::domain::{
    classify, Claim, ConfigError, DealDisposition, DealFailureKind, MigrationConfig,
    MigrationError, MigrationReport, RegisterOptions, RegistrationState, SectorAccessState,
    ShardIndexError, ShardState,
};
use crate::ports::{
    cancelled, CancelSignal, DealMigrationApi, Mount, PieceLocator, SectorAccessor, ShardIndex,
};

/// Migration coordinator.
///
/// One instance is shared by every caller; concurrent `migrate_deals` calls
/// over overlapping deal sets register each piece exactly once.
pub struct DealMigrationService<L, A, I>
where
    L: PieceLocator,
    A: SectorAccessor,
    I: ShardIndex,
{
    locator: Arc<L>,
    accessor: Arc<A>,
    index: Arc<I>,
    registrations: RegistrationState,
    config: MigrationConfig,
    /// Shared by every mount this service creates.
    unseal_throttle: Arc<Semaphore>,
}

enum Step<T> {
    Cancelled,
    Next(T),
    Done,
}

/// Eligible deals sharing one piece, in input order.
struct PieceGroup {
    piece_cid: PieceCid,
    deals: Vec<DealRecord>,
}

/// What happened to the deals of one piece group.
#[derive(Default)]
struct GroupOutcome {
    attempts: Vec<(DealRecord, DealDisposition)>,
    duplicates: Vec<DealId>,
}

impl<L, A, I> DealMigrationService<L, A, I>
where
    L: PieceLocator,
    A: SectorAccessor + 'static,
    I: ShardIndex,
{
    /// Create a service over the given collaborators.
    pub fn new(
        locator: Arc<L>,
        accessor: Arc<A>,
        index: Arc<I>,
        registrations: RegistrationState,
        config: MigrationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let unseal_throttle = Arc::new(Semaphore::new(config.max_concurrent_unseals));
        Ok(Self {
            locator,
            accessor,
            index,
            registrations,
            config,
            unseal_throttle,
        })
    }

    /// Create a service whose registration state lives only in memory.
    pub fn with_in_memory_registrations(
        locator: Arc<L>,
        accessor: Arc<A>,
        index: Arc<I>,
        config: MigrationConfig,
    ) -> Result<Self, ConfigError> {
        let registrations = RegistrationState::new(Arc::new(InMemoryRegistrationStore::new()));
        Self::new(locator, accessor, index, registrations, config)
    }

    /// Active configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Registration bookkeeping.
    pub fn registrations(&self) -> &RegistrationState {
        &self.registrations
    }

    async fn run(
        &self,
        deals: &[DealRecord],
        cancel: &CancelSignal,
    ) -> Result<MigrationReport, MigrationError> {
        let _timer = HistogramTimer::new(&MIGRATION_DURATION);
        let mut cancel = cancel.clone();
        let mut report = MigrationReport::default();

        if *cancel.borrow_and_update() {
            return Err(self.abort(&report));
        }

        let groups = self.group_candidates(deals, &mut report);
        info!(
            "[dm-01] Migrating {} deal(s): {} candidate piece(s), {} ineligible",
            deals.len(),
            groups.len(),
            report.ineligible.len()
        );

        let mut outcomes = stream::iter(groups)
            .map(|group| self.migrate_group(group))
            .buffer_unordered(self.config.max_parallel_deals);

        loop {
            let step = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => Step::Cancelled,
                next = outcomes.next() => next.map_or(Step::Done, Step::Next),
            };

            match step {
                Step::Cancelled => {
                    // In-flight deals are dropped here; their claims are released.
                    drop(outcomes);
                    return Err(self.abort(&report));
                }
                Step::Done => break,
                Step::Next(Ok(outcome)) => {
                    for (deal, disposition) in outcome.attempts {
                        report.record(deal.deal_id, deal.piece_cid, disposition);
                    }
                    report.duplicates.extend(outcome.duplicates);
                }
                Step::Next(Err(e)) => return Err(e),
            }
        }

        // Recovery failures never fail the run.
        if self.config.recover_errored_shards {
            if let Err(e) = self.recover_errored().await {
                warn!("[dm-01] Errored-shard recovery skipped: {}", e);
            }
        }

        report.finish();
        info!(
            "[dm-01] Migration finished: {} new ({} eager, {} lazy), {} reconciled, {} already registered, {} failed",
            report.newly_registered.len(),
            report.eager_count(),
            report.lazy_count(),
            report.reconciled.len(),
            report.already_registered.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Drop ineligible deals and group the rest by piece, keeping input order.
    fn group_candidates(
        &self,
        deals: &[DealRecord],
        report: &mut MigrationReport,
    ) -> Vec<PieceGroup> {
        let mut positions: HashMap<&PieceCid, usize> = HashMap::new();
        let mut groups: Vec<PieceGroup> = Vec::new();

        for deal in deals {
            let eligibility = classify(deal);
            if !eligibility.is_eligible() {
                debug!(
                    "[dm-01] Skipping deal {} in state {} ({})",
                    deal.deal_id,
                    deal.state,
                    eligibility.label()
                );
                metric_inc!(DEALS_PROCESSED, &["ineligible"]);
                report.record_ineligible(deal.deal_id, deal.state, eligibility);
                continue;
            }
            match positions.get(&deal.piece_cid) {
                Some(&at) => groups[at].deals.push(deal.clone()),
                None => {
                    positions.insert(&deal.piece_cid, groups.len());
                    groups.push(PieceGroup {
                        piece_cid: deal.piece_cid.clone(),
                        deals: vec![deal.clone()],
                    });
                }
            }
        }

        groups
    }

    /// Try the deals of one piece in order until one of them settles it.
    ///
    /// A failed deal does not stop the next deal for the same piece. Once a
    /// deal registers, reconciles or finds the piece taken, the remaining
    /// deals are duplicates and do no I/O.
    async fn migrate_group(&self, group: PieceGroup) -> Result<GroupOutcome, MigrationError> {
        let mut outcome = GroupOutcome::default();
        let mut deals = group.deals.into_iter();

        for deal in deals.by_ref() {
            let disposition = match self.migrate_one(&deal).await {
                Ok(disposition) => disposition,
                Err(e) => {
                    error!(
                        "[dm-01] Aborting migration at deal {} (piece {}): {}",
                        deal.deal_id, group.piece_cid, e
                    );
                    return Err(e);
                }
            };
            let settled = !matches!(disposition, DealDisposition::Failed(_));
            self.observe(&deal, &disposition);
            outcome.attempts.push((deal, disposition));
            if settled {
                break;
            }
        }

        for deal in deals {
            debug!(
                "[dm-01] Deal {} shares piece {} with an earlier deal",
                deal.deal_id, group.piece_cid
            );
            metric_inc!(DEALS_PROCESSED, &["duplicate"]);
            outcome.duplicates.push(deal.deal_id);
        }

        Ok(outcome)
    }

    /// Migrate a single eligible deal.
    ///
    /// `Ok` covers every per-deal outcome including failures; `Err` is
    /// reserved for systemic failures.
    async fn migrate_one(&self, deal: &DealRecord) -> Result<DealDisposition, MigrationError> {
        let claim = match self.registrations.try_claim(&deal.piece_cid)? {
            Claim::Claimed(claim) => claim,
            Claim::AlreadyRegistered => return Ok(DealDisposition::AlreadyRegistered),
            Claim::InFlight => return Ok(DealDisposition::InFlight),
        };
        let key = deal.shard_key();

        if self.config.reconcile_existing_shards {
            match self.index.shard_info(&key).await {
                Ok(Some(_)) => {
                    claim.commit()?;
                    return Ok(DealDisposition::Reconciled);
                }
                Ok(None) => {}
                Err(e) if e.is_systemic() => return Err(MigrationError::IndexUnavailable(e)),
                Err(e) => return Ok(DealDisposition::Failed(DealFailureKind::Rejected(e))),
            }
        }

        let location = match self
            .with_retry("locate", deal, move || {
                self.locator.locate(&deal.piece_cid, deal.sector)
            })
            .await
        {
            Ok(location) => location,
            Err(e) => return Ok(DealDisposition::Failed(DealFailureKind::Locate(e))),
        };

        let unsealed = match self
            .with_retry("probe", deal, move || {
                self.accessor
                    .is_unsealed(location.sector, location.offset, location.length)
            })
            .await
        {
            Ok(unsealed) => unsealed,
            Err(e) => return Ok(DealDisposition::Failed(DealFailureKind::Probe(e))),
        };

        let access = SectorAccessState::from_probe(unsealed);
        let opts = RegisterOptions::for_access(access);
        let mount: Arc<dyn Mount> = Arc::new(LazySectorMount::new(
            Arc::clone(&self.accessor),
            location,
            Arc::clone(&self.unseal_throttle),
        ));

        match self.index.register_shard(key, mount, opts).await {
            // The job is dropped: initialization continues inside the index.
            Ok(_job) => {
                claim.commit()?;
                Ok(DealDisposition::Registered { lazy: opts.lazy })
            }
            Err(ShardIndexError::AlreadyRegistered(_)) => {
                claim.commit()?;
                Ok(DealDisposition::Reconciled)
            }
            Err(e) if e.is_systemic() => Err(MigrationError::IndexUnavailable(e)),
            Err(e) => Ok(DealDisposition::Failed(DealFailureKind::Rejected(e))),
        }
    }

    async fn with_retry<T, E, F, Fut>(
        &self,
        op: &'static str,
        deal: &DealRecord,
        mut attempt: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if tries < max_attempts => {
                    debug!(
                        "[dm-01] {} for deal {} failed (attempt {}/{}): {}",
                        op, deal.deal_id, tries, max_attempts, e
                    );
                    tokio::time::sleep(self.config.retry.backoff()).await;
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn observe(&self, deal: &DealRecord, disposition: &DealDisposition) {
        match disposition {
            DealDisposition::Registered { lazy } => {
                let mode = if *lazy { "lazy" } else { "eager" };
                info!(
                    "[dm-01] Registered shard {} for deal {} ({})",
                    deal.piece_cid, deal.deal_id, mode
                );
                metric_inc!(SHARDS_REGISTERED, &[mode]);
                metric_inc!(DEALS_PROCESSED, &["registered"]);
            }
            DealDisposition::Reconciled => {
                debug!(
                    "[dm-01] Shard {} already in index, recorded as registered",
                    deal.piece_cid
                );
                metric_inc!(DEALS_PROCESSED, &["reconciled"]);
            }
            DealDisposition::AlreadyRegistered | DealDisposition::InFlight => {
                debug!(
                    "[dm-01] Piece {} already registered, skipping deal {}",
                    deal.piece_cid, deal.deal_id
                );
                metric_inc!(DEALS_PROCESSED, &["already_registered"]);
            }
            DealDisposition::Failed(kind) => {
                shard_telemetry::log_piece_event!(
                    warn,
                    "[dm-01] Skipping deal after failure",
                    deal.piece_cid,
                    deal.sector,
                    deal_id = deal.deal_id,
                    error = %kind
                );
                metric_inc!(DEAL_FAILURES, &[kind.label()]);
                metric_inc!(DEALS_PROCESSED, &["failed"]);
            }
        }
    }

    fn abort(&self, report: &MigrationReport) -> MigrationError {
        let registered = report.newly_registered.len();
        warn!("[dm-01] Migration cancelled after registering {} shard(s)", registered);
        metric_inc!(MIGRATIONS_CANCELLED);
        MigrationError::Cancelled { registered }
    }

    async fn recover_errored(&self) -> Result<usize, MigrationError> {
        let shards = self
            .index
            .list_shards()
            .await
            .map_err(MigrationError::IndexUnavailable)?;

        let mut submitted = 0;
        for shard in shards.iter().filter(|s| s.state == ShardState::Errored) {
            // Shards registered by someone else are left alone.
            if !self.registrations.is_registered(shard.key.piece_cid())? {
                continue;
            }
            match self.index.recover_shard(&shard.key).await {
                Ok(_job) => {
                    info!(
                        "[dm-01] Submitted shard {} for recovery (last error: {})",
                        shard.key,
                        shard.error.as_deref().unwrap_or("unknown")
                    );
                    metric_inc!(SHARD_RECOVERIES);
                    submitted += 1;
                }
                Err(e) if e.is_systemic() => return Err(MigrationError::IndexUnavailable(e)),
                Err(e) => warn!("[dm-01] Could not recover shard {}: {}", shard.key, e),
            }
        }
        Ok(submitted)
    }
}

#[async_trait]
impl<L, A, I> DealMigrationApi for DealMigrationService<L, A, I>
where
    L: PieceLocator + 'static,
    A: SectorAccessor + 'static,
    I: ShardIndex + 'static,
{
    async fn migrate_deals(
        &self,
        deals: &[DealRecord],
        cancel: &CancelSignal,
    ) -> Result<bool, MigrationError> {
        let report = self.run(deals, cancel).await?;
        Ok(report.any_newly_migrated())
    }

    async fn migrate_deals_with_report(
        &self,
        deals: &[DealRecord],
        cancel: &CancelSignal,
    ) -> Result<MigrationReport, MigrationError> {
        self.run(deals, cancel).await
    }

    async fn recover_errored_shards(&self) -> Result<usize, MigrationError> {
        self.recover_errored().await
    }

    fn registered_pieces(&self) -> Result<Vec<PieceCid>, MigrationError> {
        Ok(self.registrations.registered_pieces()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::never_cancelled;
    use crate::test_utils::{deal, generate_piece_cids, TestHarness};
    use shared_types::DealState;

    #[tokio::test]
    async fn test_zero_parallelism_rejected() {
        let harness = TestHarness::new();
        let config = MigrationConfig {
            max_parallel_deals: 0,
            ..MigrationConfig::for_testing()
        };
        let result = DealMigrationService::with_in_memory_registrations(
            Arc::clone(&harness.piece_store),
            Arc::clone(&harness.sectors),
            Arc::clone(&harness.index),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_input_returns_false() {
        let harness = TestHarness::new();
        let migrated = harness
            .service
            .migrate_deals(&[], &never_cancelled())
            .await
            .unwrap();
        assert!(!migrated);
        assert_eq!(harness.index.register_calls(), 0);
    }

    #[tokio::test]
    async fn test_ineligible_deals_do_no_io() {
        let harness = TestHarness::new();
        let pieces = generate_piece_cids(2);
        let deals = vec![
            deal(1, &pieces[0], DealState::Error, 1),
            deal(2, &pieces[1], DealState::FundsReserved, 2),
        ];

        let report = harness
            .service
            .migrate_deals_with_report(&deals, &never_cancelled())
            .await
            .unwrap();

        assert_eq!(report.ineligible.len(), 2);
        assert_eq!(harness.piece_store.lookups(), 0);
        assert_eq!(harness.sectors.probe_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_piece_registered_once() {
        let harness = TestHarness::new();
        let piece = generate_piece_cids(1).remove(0);
        harness.add_piece(&piece, 1, 10, true, 64);

        let deals = vec![
            deal(1, &piece, DealState::Active, 10),
            deal(2, &piece, DealState::Sealing, 10),
        ];
        let report = harness
            .service
            .migrate_deals_with_report(&deals, &never_cancelled())
            .await
            .unwrap();

        assert_eq!(report.newly_registered.len(), 1);
        assert_eq!(report.newly_registered[0].deal_id, 1);
        assert_eq!(report.duplicates, vec![2]);
        assert_eq!(harness.index.register_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_deal_falls_through_to_next_deal_for_piece() {
        let harness = TestHarness::new();
        let piece = generate_piece_cids(1).remove(0);
        // The piece only lives in sector 20; deal 1 points at a stale sector.
        harness.add_piece(&piece, 2, 20, true, 64);

        let deals = vec![
            deal(1, &piece, DealState::Active, 10),
            deal(2, &piece, DealState::Active, 20),
            deal(3, &piece, DealState::Sealing, 20),
        ];
        let report = harness
            .service
            .migrate_deals_with_report(&deals, &never_cancelled())
            .await
            .unwrap();

        assert!(report.any_newly_migrated());
        assert_eq!(report.newly_registered.len(), 1);
        assert_eq!(report.newly_registered[0].deal_id, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].deal_id, 1);
        assert!(matches!(
            report.failures[0].kind,
            DealFailureKind::Locate(crate::domain::LocatorError::NotInSector { .. })
        ));
        assert_eq!(report.duplicates, vec![3]);
        assert_eq!(harness.index.register_calls(), 1);
        assert_eq!(harness.piece_store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_every_deal_for_piece_failing_reports_each() {
        let harness = TestHarness::new();
        let piece = generate_piece_cids(1).remove(0);
        harness.add_piece(&piece, 9, 30, true, 64);

        let deals = vec![
            deal(1, &piece, DealState::Active, 10),
            deal(2, &piece, DealState::Active, 20),
        ];
        let report = harness
            .service
            .migrate_deals_with_report(&deals, &never_cancelled())
            .await
            .unwrap();

        assert!(!report.any_newly_migrated());
        assert_eq!(report.failures.len(), 2);
        assert!(report.duplicates.is_empty());
        assert_eq!(harness.service.registrations().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_locate_failure() {
        let harness = TestHarness::with_config(MigrationConfig {
            retry: crate::domain::RetryPolicy::attempts(3, std::time::Duration::ZERO),
            ..MigrationConfig::for_testing()
        });
        let piece = generate_piece_cids(1).remove(0);
        harness.add_piece(&piece, 1, 10, true, 64);
        harness.piece_store.fail_next(2);

        let migrated = harness
            .service
            .migrate_deals(&[deal(1, &piece, DealState::Active, 10)], &never_cancelled())
            .await
            .unwrap();

        assert!(migrated);
        assert_eq!(harness.piece_store.lookups(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let harness = TestHarness::new();
        let piece = generate_piece_cids(1).remove(0);
        harness.add_piece(&piece, 1, 10, true, 64);
        harness.piece_store.fail_next(1);

        let deals = [deal(1, &piece, DealState::Active, 10)];
        let report = harness
            .service
            .migrate_deals_with_report(&deals, &never_cancelled())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(harness.piece_store.lookups(), 1);
        assert!(harness.service.registered_pieces().unwrap().is_empty());
    }
}
