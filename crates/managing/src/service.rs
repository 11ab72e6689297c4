//! Managing service: atomic per-miner accounting and sampling over a write-through store.
//!
//! Every mutation follows the same sequence under the miner's write lock:
//! compute the next record on a copy, persist it, then commit it to memory.
//! A failed store write therefore leaves memory exactly as it was.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::allocation::stake_weighted_capacities;
use crate::clock::{Clock, SystemClock};
use crate::config::ManagingConfig;
use crate::error::ManagingError;
use crate::ratelimit::{ConsumeOutcome, RateLimitPolicy, RateLimitRecord};
use crate::registry::MinerRegistry;
use crate::sampler::{SampleMode, Sampler};
use crate::score::ScoreRecord;
use crate::state::{MinerEntry, MinerRecords, MinerState, MinerView};
use crate::store::MinerStore;
use crate::traits::MinerId;

/// Façade over the score ledger, rate limiter, registry and sampler.
pub struct ManagingService<Id: MinerId, S: MinerStore<Id>, C: Clock = SystemClock> {
    config: ManagingConfig,
    defaults: RateLimitPolicy,
    registry: MinerRegistry<Id>,
    sampler: Sampler,
    store: S,
    clock: C,
}

impl<Id: MinerId, S: MinerStore<Id>, C: Clock> ManagingService<Id, S, C> {
    /// Service with no miners. Use [`Self::open`] to restore from the store.
    pub fn new(config: ManagingConfig, store: S, clock: C) -> Self {
        Self {
            defaults: config.rate_limit.policy(),
            config,
            registry: MinerRegistry::new(),
            sampler: Sampler::new(),
            store,
            clock,
        }
    }

    /// Service restored from every record in `store`.
    ///
    /// Miners without a stored rate limit start with a full window. Stored
    /// windows that already elapsed are rolled over on first access. Records
    /// changed by the current defaults or history length are written back, and
    /// a failed write fails the whole open.
    pub fn open(config: ManagingConfig, store: S, clock: C) -> Result<Self, ManagingError> {
        let service = Self::new(config, store, clock);
        let snapshots = service.store.load_all()?;
        let count = snapshots.len();
        let now = service.clock.now_millis();

        let mut rebased = 0usize;
        for snapshot in snapshots {
            let rate_limit = match &snapshot.rate_limit {
                Some(stored) => {
                    let mut record = stored.clone();
                    record.inherit_defaults(service.defaults);
                    record
                }
                None => RateLimitRecord::new(service.defaults, now),
            };
            // Keep the store in step with defaults applied on restore.
            if snapshot.rate_limit.as_ref() != Some(&rate_limit) {
                service.store.save_rate_limit(&snapshot.id, &rate_limit)?;
                rebased += 1;
            }
            let score = ScoreRecord::from_snapshot(&snapshot.scores, service.config.history_len);
            if score.len() != snapshot.scores.entries.len() {
                service.store.save_score_history(&snapshot.id, &score.snapshot())?;
                rebased += 1;
            }
            let records = MinerRecords { score, rate_limit };
            service
                .registry
                .insert(snapshot.id, MinerState::new(records, true, now));
        }

        info!(count, rebased, "restored miners from store");
        Ok(service)
    }

    /// Replace the weighting policies used for sampling.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn config(&self) -> &ManagingConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn fresh_state(&self, now: u64) -> MinerState {
        let records = MinerRecords {
            score: ScoreRecord::new(self.config.history_len),
            rate_limit: RateLimitRecord::new(self.defaults, now),
        };
        MinerState::new(records, false, now)
    }

    /// Live state for a mutation, creating it unless registration is required.
    fn resolve(&self, id: &Id, now: u64) -> Result<Arc<MinerState>, ManagingError> {
        if self.config.require_registration {
            return self
                .registry
                .get(id)
                .ok_or_else(|| ManagingError::UnknownMiner(id.to_string()));
        }
        Ok(self.registry.get_or_insert_with(id, || self.fresh_state(now)).0)
    }

    /// Run `f` on the miner's entry under its write lock.
    ///
    /// `f` must persist before it commits, and must persist at least once for an
    /// entry that never reached the store. If it fails on such an entry, the
    /// miner is dropped again so a failed first write leaves no trace.
    fn update_miner<T>(
        &self,
        id: &Id,
        f: impl FnOnce(&mut MinerEntry, u64) -> Result<T, ManagingError>,
    ) -> Result<T, ManagingError> {
        loop {
            let now = self.clock.now_millis();
            let state = self.resolve(id, now)?;
            let mut entry = state.write();
            if entry.retired {
                // Deregistered between lookup and lock; resolve again.
                continue;
            }

            return match f(&mut *entry, now) {
                Ok(value) => {
                    entry.persisted = true;
                    Ok(value)
                }
                Err(e) => {
                    if !entry.persisted {
                        entry.retired = true;
                        self.registry.remove_if_same(id, &state);
                    }
                    Err(e)
                }
            };
        }
    }

    /// Append a score and return the recomputed representative score.
    pub fn update_score(&self, id: &Id, score: f64) -> Result<f64, ManagingError> {
        if !score.is_finite() {
            return Err(ManagingError::InvalidScore(score));
        }

        self.update_miner(id, |entry, now| {
            let mut next = entry.records.score.clone();
            let representative = next.push(score, now);
            self.store.save_score_history(id, &next.snapshot())?;
            entry.records.score = next;

            debug!(%id, score, representative, "updated miner score");
            Ok(representative)
        })
    }

    /// Apply a batch of score updates in order, stopping at the first failure.
    ///
    /// Each update is atomic on its own; updates before a failure stay applied.
    pub fn update_scores(&self, updates: &[(Id, f64)]) -> Result<Vec<f64>, ManagingError> {
        updates
            .iter()
            .map(|(id, score)| self.update_score(id, *score))
            .collect()
    }

    /// Atomically check and decrement the miner's quota.
    ///
    /// A denied request is not an error: `allowed` is false and `remaining` is unchanged.
    pub fn consume_rate_limit(&self, id: &Id, amount: u64) -> Result<ConsumeOutcome, ManagingError> {
        self.consume_with_reserve(id, amount, None)
    }

    /// Like [`Self::consume_rate_limit`], but only `threshold` of the miner's capacity
    /// may be used per window through this call. The rest stays in reserve.
    ///
    /// `threshold` must be in `(0, 1]`.
    pub fn consume_rate_limit_within(
        &self,
        id: &Id,
        amount: u64,
        threshold: f64,
    ) -> Result<ConsumeOutcome, ManagingError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ManagingError::InvalidThreshold(threshold));
        }
        self.consume_with_reserve(id, amount, Some(threshold))
    }

    fn consume_with_reserve(
        &self,
        id: &Id,
        amount: u64,
        threshold: Option<f64>,
    ) -> Result<ConsumeOutcome, ManagingError> {
        if amount == 0 {
            return Err(ManagingError::InvalidAmount(amount));
        }

        self.update_miner(id, |entry, now| {
            let mut next = entry.records.rate_limit.clone();
            let ceiling = match threshold {
                Some(threshold) => next.ceiling_for(threshold),
                None => next.capacity(),
            };
            let outcome = next.consume_up_to(amount, ceiling, now);
            if next != entry.records.rate_limit || !entry.persisted {
                self.store.save_rate_limit(id, &next)?;
                entry.records.rate_limit = next;
            }

            if outcome.allowed {
                trace!(%id, amount, remaining = outcome.remaining, "consumed quota");
            } else {
                debug!(%id, amount, ceiling, remaining = outcome.remaining, "rate limit exceeded");
            }
            Ok(outcome)
        })
    }

    /// Remaining quota with rollover applied. Does not register unknown miners.
    pub fn peek_remaining(&self, id: &Id) -> Result<u64, ManagingError> {
        let now = self.clock.now_millis();
        if let Some(view) = self.registry.get(id).and_then(|state| state.view(now)) {
            return Ok(view.remaining);
        }
        if self.config.require_registration {
            return Err(ManagingError::UnknownMiner(id.to_string()));
        }
        Ok(self.defaults.capacity)
    }

    /// Mean of the miner's recent scores, `None` if it has no history.
    pub fn representative_score(&self, id: &Id) -> Option<f64> {
        self.registry
            .get(id)
            .and_then(|state| state.records())
            .and_then(|records| records.score.representative_score())
    }

    /// Recent scores, most recent last.
    pub fn history(&self, id: &Id) -> Vec<f64> {
        self.registry
            .get(id)
            .and_then(|state| state.records())
            .map(|records| records.score.scores())
            .unwrap_or_default()
    }

    /// Representative score of every miner with history, best first.
    pub fn representative_scores(&self) -> Vec<(Id, f64)> {
        let mut scores: Vec<(Id, f64)> = self
            .registry
            .entries()
            .into_iter()
            .filter_map(|(id, state)| {
                let score = state.records()?.score.representative_score()?;
                Some((id, score))
            })
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }

    /// Create default records for the miner if absent. Idempotent.
    pub fn ensure_registered(&self, id: &Id) -> Result<(), ManagingError> {
        loop {
            let now = self.clock.now_millis();
            let (state, _) = self
                .registry
                .get_or_insert_with(id, || self.fresh_state(now));
            let mut entry = state.write();
            if entry.retired {
                continue;
            }
            if entry.persisted {
                return Ok(());
            }

            if let Err(e) = self.store.save_rate_limit(id, &entry.records.rate_limit) {
                warn!(%id, error = %e, "failed to persist new miner");
                entry.retired = true;
                self.registry.remove_if_same(id, &state);
                return Err(e.into());
            }
            entry.persisted = true;
            debug!(%id, "registered miner");
            return Ok(());
        }
    }

    /// Remove every record for the miner. Returns whether it was known.
    pub fn deregister(&self, id: &Id) -> Result<bool, ManagingError> {
        let Some(state) = self.registry.get(id) else {
            self.store.remove(id)?;
            return Ok(false);
        };

        let mut entry = state.write();
        if entry.retired {
            return Ok(false);
        }
        self.store.remove(id)?;
        entry.retired = true;
        self.registry.remove_if_same(id, &state);

        info!(%id, "deregistered miner");
        Ok(true)
    }

    /// Miners known at call time. The set may change right after.
    pub fn list_all(&self) -> Vec<Id> {
        self.registry.ids()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.registry.contains(id)
    }

    pub fn miner_count(&self) -> usize {
        self.registry.len()
    }

    /// Push any buffered store state to durable storage.
    pub fn flush(&self) -> Result<(), ManagingError> {
        self.store.flush()?;
        Ok(())
    }

    /// Set a per-miner capacity and window. Quota already used in the current window stays used.
    pub fn set_rate_limit(&self, id: &Id, policy: RateLimitPolicy) -> Result<(), ManagingError> {
        policy.validate().map_err(ManagingError::InvalidPolicy)?;

        self.update_miner(id, |entry, now| {
            let mut next = entry.records.rate_limit.clone();
            next.roll_over(now);
            next.set_policy(policy);
            self.store.save_rate_limit(id, &next)?;
            entry.records.rate_limit = next;

            debug!(%id, capacity = policy.capacity, window = ?policy.window, "set miner rate limit");
            Ok(())
        })
    }

    /// Set a per-miner capacity, keeping the miner's current window length.
    pub fn set_capacity(&self, id: &Id, capacity: u64) -> Result<(), ManagingError> {
        self.update_miner(id, |entry, now| {
            let mut next = entry.records.rate_limit.clone();
            next.roll_over(now);
            next.set_policy(RateLimitPolicy::new(capacity, next.window()));
            self.store.save_rate_limit(id, &next)?;
            entry.records.rate_limit = next;
            Ok(())
        })
    }

    /// Split the configured request budget by stake and apply it as per-miner capacities.
    ///
    /// Returns the number of miners updated. Stops at the first failed write.
    pub fn apply_stake_allocation(&self, stakes: &[(Id, u64)]) -> Result<usize, ManagingError> {
        let allocation = stake_weighted_capacities(
            stakes,
            self.config.allocation.min_stake,
            self.config.allocation.total_requests,
        );
        for (id, capacity) in &allocation {
            self.set_capacity(id, *capacity)?;
        }
        info!(miners = allocation.len(), "applied stake-weighted capacities");
        Ok(allocation.len())
    }

    /// Consistent per-miner views, each captured under that miner's read lock.
    pub fn views(&self) -> Vec<(Id, MinerView)> {
        let now = self.clock.now_millis();
        self.registry
            .entries()
            .into_iter()
            .filter_map(|(id, state)| state.view(now).map(|view| (id, view)))
            .collect()
    }

    /// Pick a miner for synthetic probing, weighted by headroom fraction.
    pub fn sample_for_synthetic(&self) -> Result<Id, ManagingError> {
        self.sample_with(SampleMode::Synthetic, &mut rand::rng())
    }

    /// Pick a miner scoring at least `top_score_threshold` for organic traffic,
    /// weighted by absolute remaining quota.
    pub fn sample_for_organic(&self, top_score_threshold: f64) -> Result<Id, ManagingError> {
        self.sample_with(SampleMode::organic(top_score_threshold), &mut rand::rng())
    }

    /// Sample with a caller-provided RNG.
    ///
    /// The result is a hint: quota is not reserved, so a later
    /// [`Self::consume_rate_limit`] may still be denied.
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        mode: SampleMode,
        rng: &mut R,
    ) -> Result<Id, ManagingError> {
        let views = self.views();
        let candidates = views.len();
        match self.sampler.sample(mode, views, rng) {
            Some(id) => {
                trace!(%id, ?mode, candidates, "sampled miner");
                Ok(id)
            }
            None => {
                debug!(?mode, candidates, "no eligible miner");
                Err(ManagingError::NoEligibleMiner)
            }
        }
    }

    /// Up to `n` distinct miners for `mode`. Empty when nothing qualifies.
    pub fn sample_many(&self, mode: SampleMode, n: usize) -> Vec<Id> {
        self.sampler
            .sample_many(mode, self.views(), n, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::clock::ManualClock;
    use crate::score::ScoreHistorySnapshot;
    use crate::store::{MemoryMinerStore, MinerSnapshot, MinerStoreError};
    use crate::traits::Hotkey;

    type TestService = ManagingService<Hotkey, Arc<FlakyStore>, Arc<ManualClock>>;

    /// Memory store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryMinerStore<Hotkey>,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), MinerStoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MinerStoreError::Storage("injected failure".into()));
            }
            Ok(())
        }
    }

    impl MinerStore<Hotkey> for FlakyStore {
        fn load_all(&self) -> Result<Vec<MinerSnapshot<Hotkey>>, MinerStoreError> {
            self.inner.load_all()
        }

        fn save_rate_limit(
            &self,
            id: &Hotkey,
            record: &RateLimitRecord,
        ) -> Result<(), MinerStoreError> {
            self.check()?;
            self.inner.save_rate_limit(id, record)
        }

        fn save_score_history(
            &self,
            id: &Hotkey,
            history: &ScoreHistorySnapshot,
        ) -> Result<(), MinerStoreError> {
            self.check()?;
            self.inner.save_score_history(id, history)
        }

        fn remove(&self, id: &Hotkey) -> Result<(), MinerStoreError> {
            self.check()?;
            self.inner.remove(id)
        }

        fn get(&self, id: &Hotkey) -> Result<Option<MinerSnapshot<Hotkey>>, MinerStoreError> {
            self.inner.get(id)
        }

        fn count(&self) -> Result<usize, MinerStoreError> {
            self.inner.count()
        }
    }

    fn config(capacity: u64, history_len: usize) -> ManagingConfig {
        let mut config = ManagingConfig::default();
        config.history_len = history_len;
        config.rate_limit.capacity = capacity;
        config.rate_limit.window_secs = 60;
        config
    }

    fn service(capacity: u64) -> (TestService, Arc<FlakyStore>, Arc<ManualClock>) {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let service = ManagingService::new(
            config(capacity, 3),
            Arc::clone(&store),
            Arc::clone(&clock),
        );
        (service, store, clock)
    }

    fn key(name: &str) -> Hotkey {
        Hotkey::from(name)
    }

    #[test]
    fn test_consume_and_peek() {
        let (service, store, _) = service(3);
        let miner = key("a");

        assert_eq!(service.peek_remaining(&miner).unwrap(), 3);
        assert!(!service.contains(&miner));

        let outcome = service.consume_rate_limit(&miner, 2).unwrap();
        assert_eq!(outcome, ConsumeOutcome { allowed: true, remaining: 1 });
        assert_eq!(service.peek_remaining(&miner).unwrap(), 1);

        let denied = service.consume_rate_limit(&miner, 2).unwrap();
        assert_eq!(denied, ConsumeOutcome { allowed: false, remaining: 1 });

        let stored = store.get(&miner).unwrap().unwrap().rate_limit.unwrap();
        assert_eq!(stored.remaining_at(0), 1);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let (service, _, _) = service(3);
        assert_matches!(
            service.consume_rate_limit(&key("a"), 0),
            Err(ManagingError::InvalidAmount(0))
        );
        assert!(!service.contains(&key("a")));
    }

    #[test]
    fn test_window_rollover_refills() {
        let (service, _, clock) = service(5);
        let miner = key("a");

        for _ in 0..5 {
            assert!(service.consume_rate_limit(&miner, 1).unwrap().allowed);
        }
        assert_eq!(service.peek_remaining(&miner).unwrap(), 0);

        clock.advance(Duration::from_secs(59));
        assert_eq!(service.peek_remaining(&miner).unwrap(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(service.peek_remaining(&miner).unwrap(), 5);
        assert_eq!(service.consume_rate_limit(&miner, 1).unwrap().remaining, 4);
    }

    #[test]
    fn test_score_history_bounded() {
        let (service, store, _) = service(5);
        let miner = key("a");

        assert_eq!(service.representative_score(&miner), None);
        service.update_score(&miner, 0.1).unwrap();
        service.update_score(&miner, 0.2).unwrap();
        service.update_score(&miner, 0.3).unwrap();
        let rep = service.update_score(&miner, 0.7).unwrap();

        assert_eq!(service.history(&miner), vec![0.2, 0.3, 0.7]);
        assert!((rep - 0.4).abs() < 1e-12);
        assert_eq!(service.representative_score(&miner), Some(rep));
        assert_eq!(store.get(&miner).unwrap().unwrap().scores.entries.len(), 3);
    }

    #[test]
    fn test_invalid_score_rejected() {
        let (service, _, _) = service(5);
        assert_matches!(
            service.update_score(&key("a"), f64::NAN),
            Err(ManagingError::InvalidScore(_))
        );
        assert_matches!(
            service.update_score(&key("a"), f64::INFINITY),
            Err(ManagingError::InvalidScore(_))
        );
    }

    #[test]
    fn test_failed_write_rolls_back_consume() {
        let (service, store, _) = service(5);
        let miner = key("a");
        service.consume_rate_limit(&miner, 1).unwrap();

        store.fail(true);
        assert_matches!(
            service.consume_rate_limit(&miner, 1),
            Err(ManagingError::StorageWriteFailed(_))
        );
        assert_eq!(service.peek_remaining(&miner).unwrap(), 4);

        store.fail(false);
        assert_eq!(service.consume_rate_limit(&miner, 1).unwrap().remaining, 3);
    }

    #[test]
    fn test_failed_write_rolls_back_score() {
        let (service, store, _) = service(5);
        let miner = key("a");
        service.update_score(&miner, 1.0).unwrap();

        store.fail(true);
        assert!(service.update_score(&miner, 0.0).is_err());
        assert_eq!(service.history(&miner), vec![1.0]);
        assert_eq!(service.representative_score(&miner), Some(1.0));
    }

    #[test]
    fn test_failed_first_write_leaves_no_miner() {
        let (service, store, _) = service(5);
        store.fail(true);

        assert!(service.update_score(&key("a"), 0.5).is_err());
        assert!(service.consume_rate_limit(&key("b"), 1).is_err());
        assert!(service.ensure_registered(&key("c")).is_err());
        assert_eq!(service.miner_count(), 0);

        store.fail(false);
        service.ensure_registered(&key("c")).unwrap();
        assert_eq!(service.list_all(), vec![key("c")]);
    }

    #[test]
    fn test_require_registration() {
        let store = Arc::new(FlakyStore::default());
        let mut config = config(5, 3);
        config.require_registration = true;
        let service = ManagingService::new(config, store, Arc::new(ManualClock::new(0)));
        let miner = key("a");

        assert_matches!(service.update_score(&miner, 0.5), Err(ManagingError::UnknownMiner(_)));
        assert_matches!(service.consume_rate_limit(&miner, 1), Err(ManagingError::UnknownMiner(_)));
        assert_matches!(service.peek_remaining(&miner), Err(ManagingError::UnknownMiner(_)));

        service.ensure_registered(&miner).unwrap();
        service.ensure_registered(&miner).unwrap();
        assert_eq!(service.miner_count(), 1);
        assert!(service.consume_rate_limit(&miner, 1).unwrap().allowed);
    }

    #[test]
    fn test_deregister_forgets_everything() {
        let (service, store, _) = service(5);
        let miner = key("a");
        service.update_score(&miner, 0.9).unwrap();
        service.consume_rate_limit(&miner, 5).unwrap();

        assert!(service.deregister(&miner).unwrap());
        assert!(!service.deregister(&miner).unwrap());
        assert!(!service.contains(&miner));
        assert!(!store.contains(&miner).unwrap());
        assert_eq!(service.representative_score(&miner), None);
        assert_eq!(service.peek_remaining(&miner).unwrap(), 5);
    }

    #[test]
    fn test_deregister_failure_keeps_miner() {
        let (service, store, _) = service(5);
        let miner = key("a");
        service.update_score(&miner, 0.9).unwrap();

        store.fail(true);
        assert!(service.deregister(&miner).is_err());
        assert_eq!(service.representative_score(&miner), Some(0.9));
    }

    #[test]
    fn test_sampling_empty_is_no_eligible_miner() {
        let (service, _, _) = service(1);
        let err = service.sample_for_synthetic().unwrap_err();
        assert!(err.is_no_eligible_miner());

        service.consume_rate_limit(&key("a"), 1).unwrap();
        assert!(service.sample_for_synthetic().unwrap_err().is_no_eligible_miner());
        assert!(service.sample_for_organic(0.0).unwrap_err().is_no_eligible_miner());
    }

    #[test]
    fn test_unscored_miner_only_synthetic() {
        let (service, _, _) = service(5);
        service.ensure_registered(&key("a")).unwrap();

        assert_eq!(service.representative_score(&key("a")), None);
        assert_eq!(service.sample_for_synthetic().unwrap(), key("a"));
        assert!(service.sample_for_organic(f64::MIN).is_err());
    }

    #[test]
    fn test_sampling_does_not_consume() {
        let (service, _, _) = service(5);
        service.update_score(&key("a"), 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            service.sample_with(SampleMode::organic(0.5), &mut rng).unwrap();
        }
        assert_eq!(service.peek_remaining(&key("a")).unwrap(), 5);
    }

    #[test]
    fn test_set_rate_limit_and_allocation() {
        let (service, store, _) = service(10);
        let miner = key("a");
        service.consume_rate_limit(&miner, 3).unwrap();

        service
            .set_rate_limit(&miner, RateLimitPolicy::new(4, Duration::from_secs(30)))
            .unwrap();
        assert_eq!(service.peek_remaining(&miner).unwrap(), 1);
        let stored = store.get(&miner).unwrap().unwrap().rate_limit.unwrap();
        assert_eq!(stored.capacity(), 4);
        assert_eq!(stored.window(), Duration::from_secs(30));

        let updated = service
            .apply_stake_allocation(&[(key("a"), 3_000), (key("b"), 1_000), (key("c"), 10)])
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(service.views().len(), 2);
        assert_eq!(service.peek_remaining(&key("a")).unwrap(), 189);
        assert_eq!(service.peek_remaining(&key("b")).unwrap(), 64);
        assert!(!service.contains(&key("c")));
    }

    #[test]
    fn test_representative_scores_sorted() {
        let (service, _, _) = service(5);
        service.update_score(&key("a"), 0.2).unwrap();
        service.update_score(&key("b"), 0.9).unwrap();
        service.update_score(&key("c"), 0.5).unwrap();
        service.ensure_registered(&key("d")).unwrap();

        let scores = service.representative_scores();
        let order: Vec<_> = scores.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_update_scores_batch() {
        let (service, _, _) = service(5);
        let reps = service
            .update_scores(&[(key("a"), 0.5), (key("a"), 1.0), (key("b"), 0.25)])
            .unwrap();
        assert_eq!(reps, vec![0.5, 0.75, 0.25]);

        assert!(service.update_scores(&[(key("c"), 0.1), (key("d"), f64::NAN)]).is_err());
        assert_eq!(service.history(&key("c")), vec![0.1]);
    }

    #[test]
    fn test_open_restores_records() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        {
            let service =
                ManagingService::new(config(5, 3), Arc::clone(&store), Arc::clone(&clock));
            service.update_score(&key("a"), 0.8).unwrap();
            service.consume_rate_limit(&key("a"), 2).unwrap();
            service.update_score(&key("b"), 0.4).unwrap();
        }

        let service = ManagingService::open(config(5, 3), store, Arc::clone(&clock)).unwrap();
        assert_eq!(service.miner_count(), 2);
        assert_eq!(service.representative_score(&key("a")), Some(0.8));
        assert_eq!(service.peek_remaining(&key("a")).unwrap(), 3);
        assert_eq!(service.peek_remaining(&key("b")).unwrap(), 5);

        clock.advance(Duration::from_secs(60));
        assert_eq!(service.peek_remaining(&key("a")).unwrap(), 5);
    }

    #[test]
    fn test_open_applies_new_defaults_to_inherited_limits() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        {
            let service =
                ManagingService::new(config(10, 3), Arc::clone(&store), Arc::clone(&clock));
            service.consume_rate_limit(&key("inherited"), 1).unwrap();
            service.set_capacity(&key("custom"), 50).unwrap();
        }

        let service =
            ManagingService::open(config(4, 3), Arc::clone(&store), clock).unwrap();
        assert_eq!(service.peek_remaining(&key("inherited")).unwrap(), 3);
        assert_eq!(service.peek_remaining(&key("custom")).unwrap(), 50);
        assert!(!service.consume_rate_limit(&key("inherited"), 5).unwrap().allowed);

        for id in [key("inherited"), key("custom")] {
            let memory = service.registry.get(&id).unwrap().records().unwrap().rate_limit;
            let stored = store.get(&id).unwrap().unwrap().rate_limit.unwrap();
            assert_eq!(stored, memory, "{id}");
        }
        let stored = store.get(&key("inherited")).unwrap().unwrap().rate_limit.unwrap();
        assert_eq!(stored.capacity(), 4);
        assert_eq!(stored.remaining_at(0), 3);
    }

    #[test]
    fn test_open_trims_stored_history_to_new_length() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        {
            let service =
                ManagingService::new(config(10, 5), Arc::clone(&store), Arc::clone(&clock));
            for score in [0.1, 0.2, 0.3, 0.4, 0.5] {
                service.update_score(&key("a"), score).unwrap();
            }
        }

        let service = ManagingService::open(config(10, 2), Arc::clone(&store), clock).unwrap();
        assert_eq!(service.history(&key("a")), vec![0.4, 0.5]);
        assert_eq!(store.get(&key("a")).unwrap().unwrap().scores.entries.len(), 2);
    }

    #[test]
    fn test_open_fails_when_write_back_fails() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        {
            let service =
                ManagingService::new(config(10, 3), Arc::clone(&store), Arc::clone(&clock));
            service.consume_rate_limit(&key("a"), 1).unwrap();
        }

        store.fail(true);
        assert_matches!(
            ManagingService::open(config(4, 3), Arc::clone(&store), Arc::clone(&clock)).err(),
            Some(ManagingError::StorageWriteFailed(_))
        );
        // Unchanged defaults need no write, so the same store opens fine.
        assert!(ManagingService::open(config(10, 3), store, clock).is_ok());
    }

    #[test]
    fn test_sub_millisecond_window_rejected() {
        let (service, store, _) = service(5);
        let miner = key("a");
        service.consume_rate_limit(&miner, 1).unwrap();

        for window in [Duration::ZERO, Duration::from_micros(500)] {
            assert_matches!(
                service.set_rate_limit(&miner, RateLimitPolicy::new(2, window)),
                Err(ManagingError::InvalidPolicy(_))
            );
        }
        assert_eq!(store.get(&miner).unwrap().unwrap().rate_limit.unwrap().capacity(), 5);

        service
            .set_rate_limit(&miner, RateLimitPolicy::new(2, Duration::from_millis(1)))
            .unwrap();
        let allowed = (0..100)
            .filter(|_| service.consume_rate_limit(&miner, 1).unwrap().allowed)
            .count();
        assert_eq!(allowed, 1);
    }

    #[test]
    fn test_consume_within_keeps_reserve() {
        let (service, _, clock) = service(10);
        let miner = key("a");

        let allowed = (0..10)
            .filter(|_| service.consume_rate_limit_within(&miner, 1, 0.8).unwrap().allowed)
            .count();
        assert_eq!(allowed, 8);
        assert_eq!(service.peek_remaining(&miner).unwrap(), 2);

        let denied = service.consume_rate_limit_within(&miner, 1, 0.8).unwrap();
        assert_eq!(denied, ConsumeOutcome { allowed: false, remaining: 2 });
        assert!(service.consume_rate_limit_within(&miner, 2, 1.0).unwrap().allowed);

        clock.advance(Duration::from_secs(60));
        assert!(service.consume_rate_limit_within(&miner, 8, 0.8).unwrap().allowed);
        assert!(!service.consume_rate_limit_within(&miner, 1, 0.8).unwrap().allowed);
    }

    #[test]
    fn test_consume_within_rejects_bad_threshold() {
        let (service, _, _) = service(10);
        for threshold in [0.0, -0.5, 1.01, f64::NAN, f64::INFINITY] {
            assert_matches!(
                service.consume_rate_limit_within(&key("a"), 1, threshold),
                Err(ManagingError::InvalidThreshold(_))
            );
        }
        assert!(!service.contains(&key("a")));
    }
}
