//! The live per-season runtime.
//!
//! One [`PassRuntime`] exists per season context; a rollover stops it and
//! constructs a new one -- there are no process-wide singletons.
//!
//! Threading rules:
//! - [`PassRuntime::apply_event`] runs on the ingestion path. It touches
//!   only the concurrent player map and per-player state; no storage I/O.
//! - Loads and flushes run on the tokio pool.
//! - Background tasks (periodic flush, premium refresh, storage probe)
//!   are children of the runtime's cancellation token and die with it.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use dashmap::DashMap;
use questline_core::{PassConfig, PeriodClock, PlayerProgress, ProgressEngine, QuestIndex};
use questline_core::engine::{CompletedQuest, boosted_amount};
use questline_core::tiers::RewardsTable;
use questline_db::{PostgresPool, ProgressStore};
use questline_types::{BoosterKind, PlayerId, ProgressEvent, QuestCadence, QuestDef, RewardTrack};
use tokio_util::sync::CancellationToken;

use crate::admin::AdminGate;
use crate::error::{ClaimError, EngineError};
use crate::sources::{BoosterSource, EntitlementSource};

/// The live runtime for one (server, season) context.
pub struct PassRuntime {
    pub(crate) config: PassConfig,
    pub(crate) server_id: String,
    pub(crate) season: u32,
    pub(crate) engine: ProgressEngine,
    pub(crate) clock: PeriodClock,
    pub(crate) db: PostgresPool,
    pub(crate) states: DashMap<PlayerId, Arc<PlayerProgress>>,
    pub(crate) entitlements: Arc<dyn EntitlementSource>,
    pub(crate) boosters: Arc<dyn BoosterSource>,
    pub(crate) gate: Arc<AdminGate>,
    /// Root token for this runtime's background tasks.
    pub(crate) shutdown: CancellationToken,
    /// Child token of the active event subscription, if any.
    pub(crate) ingest_token: parking_lot::Mutex<Option<CancellationToken>>,
    /// Serializes flush passes (periodic vs. admin-triggered).
    pub(crate) flush_lock: tokio::sync::Mutex<()>,
    /// Count of per-player flush write failures (accepted data loss).
    pub(crate) flush_failures: AtomicU64,
}

impl PassRuntime {
    /// Build a runtime from configuration and loaded catalogs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Period`] when the configured timezone is
    /// invalid.
    pub fn new(
        config: PassConfig,
        quests: Vec<QuestDef>,
        tiers: RewardsTable,
        db: PostgresPool,
        entitlements: Arc<dyn EntitlementSource>,
        boosters: Arc<dyn BoosterSource>,
        gate: Arc<AdminGate>,
    ) -> Result<Arc<Self>, EngineError> {
        let clock = PeriodClock::new(
            &config.season.timezone,
            config.season.week_reset_mode,
            config.season.pass_week(),
        )?;
        let engine = ProgressEngine::new(
            QuestIndex::new(quests),
            tiers,
            config.season.pass_week(),
        );
        let server_id = config.server.id.clone();
        let season = config.season.season();

        Ok(Arc::new(Self {
            server_id,
            season,
            engine,
            clock,
            db,
            states: DashMap::new(),
            entitlements,
            boosters,
            gate,
            shutdown: CancellationToken::new(),
            ingest_token: parking_lot::Mutex::new(None),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_failures: AtomicU64::new(0),
            config,
        }))
    }

    /// Start the background tasks (periodic flush, premium refresh,
    /// storage probe).
    pub fn start(self: &Arc<Self>) {
        self.spawn_periodic_flush();
        self.spawn_premium_refresh();
        self.spawn_storage_probe();
        tracing::info!(
            server_id = self.server_id.as_str(),
            season = self.season,
            week = self.engine.week(),
            quests = self.engine.index().all().len(),
            tiers = self.engine.tiers().max_tier(),
            "Runtime started"
        );
    }

    /// Subscribe to an event feed. Ingestion runs until
    /// [`Self::pause_ingestion`] or [`Self::stop`].
    pub fn subscribe(self: &Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>) {
        let token = self.shutdown.child_token();
        *self.ingest_token.lock() = Some(token.clone());

        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            let _ = runtime.apply_event(&event);
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Event ingestion stopped");
        });
    }

    /// Stop event ingestion immediately without clearing in-memory state
    /// (maintenance mode). Idempotent.
    pub fn pause_ingestion(&self) {
        if let Some(token) = self.ingest_token.lock().take() {
            token.cancel();
        }
    }

    /// Stop the runtime: pause ingestion, cancel background tasks, and
    /// (optionally) flush all deltas.
    ///
    /// Callers that already ran a flush-and-wait pass stop with
    /// `flush = false` so no stray writes race a following destructive
    /// operation.
    pub async fn stop(&self, flush: bool) {
        self.pause_ingestion();
        self.shutdown.cancel();
        if flush {
            let summary = self.flush_all_and_wait().await;
            tracing::info!(
                players = summary.players,
                flushed = summary.flushed,
                failures = summary.failures,
                "Final flush on stop"
            );
        }
        tracing::info!(season = self.season, "Runtime stopped");
    }

    /// Apply one gameplay event.
    ///
    /// Looks up the player's state, scales the amount by the progress
    /// booster (floor, minimum 1), and advances matching quests. Players
    /// without loaded state are skipped -- events before the async load
    /// completes are dropped by design.
    pub fn apply_event(&self, event: &ProgressEvent) -> Vec<CompletedQuest> {
        if event.amount == 0 {
            return Vec::new();
        }
        let Some(state) = self.state(event.player) else {
            return Vec::new();
        };

        let progress_mult = self
            .boosters
            .multiplier(event.player, BoosterKind::Progress);
        let boosted = boosted_amount(event.amount, progress_mult);
        let points_mult = self.boosters.multiplier(event.player, BoosterKind::Points);

        if boosted == event.amount {
            self.engine.apply(&state, event, points_mult)
        } else {
            self.engine.apply(&state, &event.with_amount(boosted), points_mult)
        }
    }

    /// The player's live state, if loaded.
    pub fn state(&self, player: PlayerId) -> Option<Arc<PlayerProgress>> {
        self.states.get(&player).map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every loaded player.
    pub fn loaded_players(&self) -> Vec<PlayerId> {
        self.states.iter().map(|entry| *entry.key()).collect()
    }

    /// Claim reward lanes at a tier.
    ///
    /// `track = None` claims both lanes. The core only decides
    /// eligibility and records the claim; executing the actual rewards
    /// is the caller's job, driven by the returned `(tier, track)` list.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] when the claim is refused; nothing is
    /// recorded in that case.
    pub fn claim(
        &self,
        player: PlayerId,
        tier: u32,
        track: Option<RewardTrack>,
    ) -> Result<Vec<(u32, RewardTrack)>, ClaimError> {
        if tier == 0 {
            return Err(ClaimError::InvalidTier(tier));
        }
        let state = self
            .state(player)
            .ok_or(ClaimError::StateNotLoaded(player))?;

        let current = state.tier();
        if current < tier {
            return Err(ClaimError::TierNotReached { tier, current });
        }
        if !self.engine.tiers().has_tier(tier) {
            return Err(ClaimError::UnknownTier(tier));
        }

        let mut granted = Vec::new();
        let want_free = !matches!(track, Some(RewardTrack::Premium));
        let want_premium = !matches!(track, Some(RewardTrack::Free));

        if want_free && state.mark_claim(RewardTrack::Free, tier) {
            granted.push((tier, RewardTrack::Free));
        }
        if want_premium && state.premium() && state.mark_claim(RewardTrack::Premium, tier) {
            granted.push((tier, RewardTrack::Premium));
        }

        if granted.is_empty() {
            return Err(ClaimError::AlreadyClaimed);
        }
        Ok(granted)
    }

    /// Claim every unclaimed lane up to the player's current tier.
    ///
    /// Returns the newly granted `(tier, track)` pairs (possibly empty).
    pub fn claim_all(&self, player: PlayerId) -> Vec<(u32, RewardTrack)> {
        let Some(state) = self.state(player) else {
            return Vec::new();
        };

        let mut granted = Vec::new();
        let current = state.tier();
        for tier in 1..=current {
            if !self.engine.tiers().has_tier(tier) {
                continue;
            }
            if state.mark_claim(RewardTrack::Free, tier) {
                granted.push((tier, RewardTrack::Free));
            }
            if state.premium() && state.mark_claim(RewardTrack::Premium, tier) {
                granted.push((tier, RewardTrack::Premium));
            }
        }
        granted
    }

    /// Admin override: adjust a player's points by a signed delta and
    /// resync the tier (the one path allowed to lower either).
    ///
    /// Returns the resulting `(points, tier)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StateNotLoaded`] when the player is not
    /// loaded.
    pub fn grant_points(&self, player: PlayerId, delta: i64) -> Result<(u64, u32), EngineError> {
        let state = self
            .state(player)
            .ok_or(EngineError::StateNotLoaded(player))?;
        state.adjust_points(delta);
        let _ = self.engine.resync_tier(&state);
        tracing::info!(%player, delta, points = state.points(), tier = state.tier(), "Admin point grant");
        Ok((state.points(), state.tier()))
    }

    /// Handle a player joining: load their state asynchronously.
    pub fn on_join(self: &Arc<Self>, player: PlayerId) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            runtime.load_player(player).await;
        });
    }

    /// Handle a player leaving: flush their delta, then drop the state.
    pub fn on_quit(self: &Arc<Self>, player: PlayerId) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            if runtime.db.is_available() {
                if let Err(e) = runtime.flush_player_now(player).await {
                    runtime.note_flush_failure(player, &e);
                }
            }
            runtime.states.remove(&player);
        });
    }

    /// Load a player's state from storage into the live map.
    ///
    /// Offline storage (or a failed load) falls back to fresh in-memory
    /// state so gameplay continues; nothing is persisted until storage
    /// returns. On a successful load this also performs the cadence
    /// reset (persisting the new period marker and the reset deltas
    /// immediately) and the tier self-heal.
    pub async fn load_player(self: &Arc<Self>, player: PlayerId) {
        if !self.db.is_available() {
            self.insert_fresh_state(player);
            self.refresh_premium_for(player).await;
            return;
        }

        let store = ProgressStore::new(self.db.pool());
        let loaded = match store.load_player(&self.server_id, self.season, player).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(%player, error = %e, "Player load failed; using fresh state");
                self.insert_fresh_state(player);
                self.refresh_premium_for(player).await;
                return;
            }
        };

        let state = Arc::new(PlayerProgress::new());
        state.seed_progress(loaded.tier, loaded.points);
        for step in &loaded.steps {
            state.seed_quest(&step.quest_id, step.step_idx, step.progress);
        }
        for &(track, tier) in &loaded.claims {
            state.seed_claim(track, tier);
        }
        self.ensure_all_quests(&state);

        // Cadence rollover from the persisted period markers. A failed
        // marker read skips the reset rather than resetting spuriously.
        match store.load_period(&self.server_id, self.season, player).await {
            Ok(period) => {
                let marker = self.clock.now_marker();
                let mut changed = false;

                if period.daily_day != marker.daily_day {
                    let reset = self
                        .engine
                        .reset_quests_of_cadence(&state, QuestCadence::Daily);
                    tracing::debug!(%player, reset, "Daily quests reset");
                    changed = changed || reset > 0;
                }
                if period.weekly_week != marker.weekly_week {
                    let reset = self
                        .engine
                        .reset_quests_of_cadence(&state, QuestCadence::Weekly);
                    tracing::debug!(%player, reset, "Weekly quests reset");
                    changed = changed || reset > 0;
                }

                if let Err(e) = store
                    .upsert_period(&self.server_id, self.season, player, marker)
                    .await
                {
                    tracing::warn!(%player, error = %e, "Period marker write failed");
                }

                // Resets must not be lost if the session ends before the
                // next flush cycle: persist them in the same load pass.
                if changed {
                    let delta = state.snapshot_and_clear();
                    if let Err(e) = store
                        .flush_delta(&self.server_id, self.season, player, &delta)
                        .await
                    {
                        self.note_flush_failure(player, &e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%player, error = %e, "Period load failed; skipping cadence reset");
            }
        }

        // Tier resync from points (self-heal if the tier table changed
        // between sessions).
        if self.engine.resync_tier(&state).is_some() {
            let delta = state.snapshot_and_clear();
            if let Err(e) = store
                .flush_delta(&self.server_id, self.season, player, &delta)
                .await
            {
                self.note_flush_failure(player, &e);
            }
        }

        self.states.insert(player, state);
        self.refresh_premium_for(player).await;
        tracing::debug!(%player, "Player loaded");
    }

    fn insert_fresh_state(&self, player: PlayerId) {
        let state = Arc::new(PlayerProgress::new());
        self.ensure_all_quests(&state);
        self.states.entry(player).or_insert(state);
    }

    fn ensure_all_quests(&self, state: &PlayerProgress) {
        for quest in self.engine.index().all() {
            state.ensure_quest(&quest.id);
        }
    }

    /// Refresh the premium flag for one player. A failed query leaves
    /// the cached flag untouched.
    pub async fn refresh_premium_for(&self, player: PlayerId) {
        let Some(state) = self.state(player) else {
            return;
        };
        let key = self.config.premium.entitlement_key.as_str();
        match self.entitlements.is_premium(key, player).await {
            Ok(premium) => state.set_premium(premium),
            Err(e) => {
                tracing::debug!(%player, error = %e, "Premium refresh failed");
            }
        }
    }

    /// Refresh the premium flag for every loaded player.
    pub async fn refresh_premium_all(&self) {
        for player in self.loaded_players() {
            self.refresh_premium_for(player).await;
        }
    }

    fn spawn_premium_refresh(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let period = Duration::from_secs(self.config.premium.refresh_seconds());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    () = runtime.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if !runtime.gate.is_maintenance() {
                            runtime.refresh_premium_all().await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_storage_probe(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let period = Duration::from_secs(self.config.storage.probe_seconds());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = runtime.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let _ = runtime.db.probe().await;
                    }
                }
            }
        });
    }
}
