//! Spawn Orchestration
//!
//! Host-authoritative sequencing of one spawn per roster participant, and
//! client-side mirroring of the host's decisions. Every wait in the
//! sequence (scene readiness, factory availability, the settle delay
//! between creations) is a discrete resumable step with an inspectable
//! deadline, advanced by `tick`; nothing here ever sleeps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::session::roster::SessionRoster;
use crate::sim::{CreationService, EntityHandle, Rotation, SceneProbe, Vec3};

/// Orchestration phase, host side only. Clients stay in `Idle` and just
/// apply what they are told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPhase {
    /// Nothing started.
    Idle,
    /// Polling the scene readiness probe.
    SceneWaiting,
    /// Polling the creation service for availability.
    FactoryWaiting,
    /// Walking the participant queue, one spawn per step.
    Spawning,
    /// Every participant processed; at most one run per session.
    Complete,
}

/// Timing and fallback knobs for orchestration.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Interval between scene readiness polls.
    pub scene_poll_interval: Duration,
    /// Scene polls before parking (manually retryable).
    pub scene_poll_attempts: u32,
    /// Interval between factory availability polls.
    pub factory_poll_interval: Duration,
    /// Factory polls before parking (manually retryable).
    pub factory_poll_attempts: u32,
    /// Pause between consecutive creations.
    pub settle_delay: Duration,
    /// Client-side pause before taking control of the local entity.
    pub control_delay: Duration,
    /// Process-wide fallback loadout for participants who never picked one.
    pub default_loadout: Option<String>,
    /// Fixed spawn anchor; jittered positions near the origin otherwise.
    pub spawn_anchor: Option<Vec3>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            scene_poll_interval: Duration::from_millis(250),
            scene_poll_attempts: 40,
            factory_poll_interval: Duration::from_millis(500),
            factory_poll_attempts: 10,
            settle_delay: Duration::from_millis(300),
            control_delay: Duration::from_millis(250),
            default_loadout: None,
            spawn_anchor: None,
        }
    }
}

/// A completed spawn the rest of the session should hear about
/// (`SPAWN:<nickname>:<loadout>` on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnNotice {
    /// Participant the entity belongs to.
    pub nickname: String,
    /// Loadout the entity was created from.
    pub loadout: String,
}

/// Drives the spawn sequence and owns the nickname -> entity records.
pub struct SpawnCoordinator {
    config: SpawnConfig,
    local_nickname: String,
    phase: SpawnPhase,
    records: HashMap<String, EntityHandle>,
    queue: Vec<String>,
    next_index: usize,
    next_step_at: Option<Instant>,
    attempts_left: u32,
    pending_control: Vec<(Instant, EntityHandle)>,
}

impl SpawnCoordinator {
    /// New coordinator in `Idle`.
    pub fn new(config: SpawnConfig, local_nickname: &str) -> Self {
        Self {
            config,
            local_nickname: local_nickname.to_string(),
            phase: SpawnPhase::Idle,
            records: HashMap::new(),
            queue: Vec::new(),
            next_index: 0,
            next_step_at: None,
            attempts_left: 0,
            pending_control: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SpawnPhase {
        self.phase
    }

    /// Entity recorded for `nickname`, if spawned.
    pub fn entity_for(&self, nickname: &str) -> Option<EntityHandle> {
        self.records.get(nickname).copied()
    }

    /// Number of recorded spawns.
    pub fn spawned_count(&self) -> usize {
        self.records.len()
    }

    /// Time until the next pending step, if one is scheduled.
    pub fn pending_wait(&self, now: Instant) -> Option<Duration> {
        self.next_step_at
            .map(|at| at.saturating_duration_since(now))
    }

    /// Begin orchestration. At most one run per session: any state other
    /// than `Idle` makes this a logged no-op.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.phase != SpawnPhase::Idle {
            warn!(phase = ?self.phase, "spawn orchestration already ran; ignoring start");
            return false;
        }
        info!("spawn orchestration started; waiting for scene");
        self.phase = SpawnPhase::SceneWaiting;
        self.attempts_left = self.config.scene_poll_attempts;
        self.next_step_at = Some(now);
        true
    }

    /// Re-arm a parked wait phase after its poll budget ran out.
    pub fn retry(&mut self, now: Instant) {
        if self.next_step_at.is_some() {
            debug!(phase = ?self.phase, "retry ignored; a step is already pending");
            return;
        }
        match self.phase {
            SpawnPhase::SceneWaiting => {
                info!("retrying scene wait");
                self.attempts_left = self.config.scene_poll_attempts;
                self.next_step_at = Some(now);
            }
            SpawnPhase::FactoryWaiting => {
                info!("retrying creation service wait");
                self.attempts_left = self.config.factory_poll_attempts;
                self.next_step_at = Some(now);
            }
            _ => debug!(phase = ?self.phase, "nothing to retry"),
        }
    }

    /// Advance the orchestration by at most one step. Returns a notice
    /// when a participant's entity was created this step.
    pub fn tick(
        &mut self,
        now: Instant,
        roster: &SessionRoster,
        factory: &mut dyn CreationService,
        probe: &dyn SceneProbe,
    ) -> Option<SpawnNotice> {
        self.dispatch_pending_control(now, factory);

        let due = matches!(self.next_step_at, Some(at) if now >= at);
        if !due {
            return None;
        }

        match self.phase {
            SpawnPhase::Idle | SpawnPhase::Complete => None,
            SpawnPhase::SceneWaiting => {
                self.step_scene_wait(now, probe);
                None
            }
            SpawnPhase::FactoryWaiting => {
                self.step_factory_wait(now, roster, factory);
                None
            }
            SpawnPhase::Spawning => self.step_spawn_one(now, roster, factory),
        }
    }

    fn step_scene_wait(&mut self, now: Instant, probe: &dyn SceneProbe) {
        if probe.scene_ready() {
            info!("scene ready; waiting for creation service");
            self.phase = SpawnPhase::FactoryWaiting;
            self.attempts_left = self.config.factory_poll_attempts;
            self.next_step_at = Some(now);
        } else if self.attempts_left <= 1 {
            warn!(
                attempts = self.config.scene_poll_attempts,
                "scene never became ready; orchestration parked, retry to continue"
            );
            self.attempts_left = 0;
            self.next_step_at = None;
        } else {
            self.attempts_left -= 1;
            self.next_step_at = Some(now + self.config.scene_poll_interval);
        }
    }

    fn step_factory_wait(
        &mut self,
        now: Instant,
        roster: &SessionRoster,
        factory: &mut dyn CreationService,
    ) {
        if factory.is_available() {
            // Host first, then remaining roster entries in slot order.
            let mut queue = vec![self.local_nickname.clone()];
            for nickname in roster.snapshot() {
                if nickname != self.local_nickname {
                    queue.push(nickname);
                }
            }
            info!(participants = queue.len(), "creation service available; spawning");
            self.queue = queue;
            self.next_index = 0;
            self.phase = SpawnPhase::Spawning;
            self.next_step_at = Some(now);
        } else if self.attempts_left <= 1 {
            warn!(
                attempts = self.config.factory_poll_attempts,
                "creation service unavailable; orchestration parked, retry to continue"
            );
            self.attempts_left = 0;
            self.next_step_at = None;
        } else {
            self.attempts_left -= 1;
            self.next_step_at = Some(now + self.config.factory_poll_interval);
        }
    }

    /// Process exactly one participant, then schedule the settle delay.
    /// Skips and failed creations consume a step like successes do.
    fn step_spawn_one(
        &mut self,
        now: Instant,
        roster: &SessionRoster,
        factory: &mut dyn CreationService,
    ) -> Option<SpawnNotice> {
        let nickname = self.queue[self.next_index].clone();
        self.next_index += 1;

        let notice = self.spawn_for(&nickname, roster, factory);

        if self.next_index >= self.queue.len() {
            info!(spawned = self.records.len(), "spawn sequence complete");
            self.phase = SpawnPhase::Complete;
            self.next_step_at = None;
        } else {
            self.next_step_at = Some(now + self.config.settle_delay);
        }
        notice
    }

    fn spawn_for(
        &mut self,
        nickname: &str,
        roster: &SessionRoster,
        factory: &mut dyn CreationService,
    ) -> Option<SpawnNotice> {
        if self.records.contains_key(nickname) {
            debug!(nickname, "entity already recorded; skipping");
            return None;
        }

        let loadout = match roster
            .get(nickname)
            .and_then(|entry| entry.loadout.clone())
            .or_else(|| self.config.default_loadout.clone())
        {
            Some(loadout) => loadout,
            None => {
                warn!(nickname, "no loadout selected and no default; skipping");
                return None;
            }
        };

        let (position, rotation) = self.resolve_spawn_point();
        match factory.create(&loadout, position, rotation) {
            None => {
                warn!(nickname, loadout, "creation service returned no entity; skipping");
                None
            }
            Some(handle) => {
                info!(nickname, loadout, handle = handle.0, "spawned entity");
                self.records.insert(nickname.to_string(), handle);
                if nickname == self.local_nickname {
                    factory.assign_control(handle);
                }
                Some(SpawnNotice {
                    nickname: nickname.to_string(),
                    loadout,
                })
            }
        }
    }

    /// Apply a `SPAWN` broadcast from the host. Idempotent: a nickname
    /// that already has an entity is ignored.
    pub fn apply_remote_spawn(
        &mut self,
        nickname: &str,
        loadout: &str,
        now: Instant,
        factory: &mut dyn CreationService,
    ) {
        if self.records.contains_key(nickname) {
            debug!(nickname, "already spawned; ignoring duplicate notification");
            return;
        }

        let (position, rotation) = self.resolve_spawn_point();
        match factory.create(loadout, position, rotation) {
            None => warn!(nickname, loadout, "could not mirror spawn locally"),
            Some(handle) => {
                info!(nickname, loadout, handle = handle.0, "mirrored spawn");
                self.records.insert(nickname.to_string(), handle);
                if nickname == self.local_nickname {
                    self.pending_control
                        .push((now + self.config.control_delay, handle));
                }
            }
        }
    }

    /// Tear the session's spawns down: every recorded entity is
    /// deregistered (and thereby destroyed), and orchestration returns to
    /// `Idle` so a future session can run again.
    pub fn reset(&mut self, factory: &mut dyn CreationService) {
        for (nickname, handle) in self.records.drain() {
            debug!(nickname, handle = handle.0, "deregistering entity");
            factory.deregister(handle);
        }
        self.queue.clear();
        self.next_index = 0;
        self.pending_control.clear();
        self.attempts_left = 0;
        self.next_step_at = None;
        self.phase = SpawnPhase::Idle;
        info!("spawn coordinator reset");
    }

    fn dispatch_pending_control(&mut self, now: Instant, factory: &mut dyn CreationService) {
        let mut due = Vec::new();
        self.pending_control.retain(|(at, handle)| {
            if now >= *at {
                due.push(*handle);
                false
            } else {
                true
            }
        });
        for handle in due {
            debug!(handle = handle.0, "assigning control after settle delay");
            factory.assign_control(handle);
        }
    }

    fn resolve_spawn_point(&self) -> (Vec3, Rotation) {
        let position = self.config.spawn_anchor.unwrap_or_else(|| {
            let mut rng = rand::thread_rng();
            Vec3::new(rng.gen_range(-10.0..10.0), 2.0, rng.gen_range(-10.0..10.0))
        });
        (position, Rotation::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Creation service with scripted availability and failures.
    #[derive(Default)]
    struct ScriptedFactory {
        unavailable_polls: Cell<u32>,
        availability_polls: Cell<u32>,
        fail_loadouts: Vec<String>,
        created: Vec<(String, EntityHandle)>,
        controlled: Vec<EntityHandle>,
        deregistered: Vec<EntityHandle>,
        next: u64,
    }

    impl ScriptedFactory {
        fn unavailable_for(polls: u32) -> Self {
            let factory = Self::default();
            factory.unavailable_polls.set(polls);
            factory
        }
    }

    impl CreationService for ScriptedFactory {
        fn is_available(&self) -> bool {
            self.availability_polls.set(self.availability_polls.get() + 1);
            if self.unavailable_polls.get() > 0 {
                self.unavailable_polls.set(self.unavailable_polls.get() - 1);
                false
            } else {
                true
            }
        }

        fn create(
            &mut self,
            loadout: &str,
            _position: Vec3,
            _rotation: Rotation,
        ) -> Option<EntityHandle> {
            if self.fail_loadouts.iter().any(|l| l == loadout) {
                return None;
            }
            self.next += 1;
            let handle = EntityHandle(self.next);
            self.created.push((loadout.to_string(), handle));
            Some(handle)
        }

        fn assign_control(&mut self, handle: EntityHandle) {
            self.controlled.push(handle);
        }

        fn deregister(&mut self, handle: EntityHandle) {
            self.deregistered.push(handle);
        }
    }

    struct ReadyProbe(bool);

    impl SceneProbe for ReadyProbe {
        fn scene_ready(&self) -> bool {
            self.0
        }
    }

    fn roster_with(entries: &[(&str, Option<&str>)]) -> SessionRoster {
        let mut roster = SessionRoster::default();
        for (nickname, loadout) in entries {
            roster.try_add(nickname);
            if let Some(loadout) = loadout {
                roster.set_loadout(nickname, loadout);
            }
        }
        roster
    }

    /// Drive ticks with synthetic time until the coordinator goes quiet
    /// or `limit` steps elapse, collecting every notice.
    fn run_until_idle(
        coordinator: &mut SpawnCoordinator,
        roster: &SessionRoster,
        factory: &mut ScriptedFactory,
        probe: &ReadyProbe,
        limit: u32,
    ) -> Vec<SpawnNotice> {
        let mut notices = Vec::new();
        let mut now = Instant::now();
        for _ in 0..limit {
            if let Some(notice) = coordinator.tick(now, roster, factory, probe) {
                notices.push(notice);
            }
            if coordinator.pending_wait(now).is_none() {
                break;
            }
            now += Duration::from_millis(600);
        }
        notices
    }

    #[test]
    fn test_spawns_host_first_then_slot_order() {
        let roster = roster_with(&[
            ("Host", Some("command_tank")),
            ("Alice", Some("light_scout")),
            ("Bob", Some("heavy_breacher")),
        ]);
        let mut factory = ScriptedFactory::default();
        let probe = ReadyProbe(true);
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Host");

        assert!(coordinator.start(Instant::now()));
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);

        let order: Vec<&str> = notices.iter().map(|n| n.nickname.as_str()).collect();
        assert_eq!(order, ["Host", "Alice", "Bob"]);
        assert_eq!(coordinator.phase(), SpawnPhase::Complete);

        // The host's own entity gets control immediately.
        assert_eq!(factory.controlled.len(), 1);
        assert_eq!(
            factory.controlled[0],
            coordinator.entity_for("Host").unwrap()
        );
    }

    #[test]
    fn test_factory_unavailable_then_recovers() {
        let roster = roster_with(&[("Host", Some("command_tank"))]);
        let mut factory = ScriptedFactory::unavailable_for(3);
        let probe = ReadyProbe(true);
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Host");

        coordinator.start(Instant::now());
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);

        // Three unavailable polls, then the fourth succeeds; no error surfaces.
        assert_eq!(factory.availability_polls.get(), 4);
        assert_eq!(notices.len(), 1);
        assert_eq!(coordinator.phase(), SpawnPhase::Complete);
    }

    #[test]
    fn test_factory_poll_budget_parks_then_retry() {
        let roster = roster_with(&[("Host", Some("command_tank"))]);
        let mut factory = ScriptedFactory::unavailable_for(100);
        let probe = ReadyProbe(true);
        let config = SpawnConfig {
            factory_poll_attempts: 3,
            ..Default::default()
        };
        let mut coordinator = SpawnCoordinator::new(config, "Host");

        coordinator.start(Instant::now());
        run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);

        // Budget exhausted: parked in FactoryWaiting with no pending step.
        assert_eq!(coordinator.phase(), SpawnPhase::FactoryWaiting);
        assert!(coordinator.pending_wait(Instant::now()).is_none());
        assert_eq!(factory.availability_polls.get(), 3);

        // A manual retry picks the wait back up; service recovered meanwhile.
        factory.unavailable_polls.set(0);
        coordinator.retry(Instant::now());
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);
        assert_eq!(notices.len(), 1);
        assert_eq!(coordinator.phase(), SpawnPhase::Complete);
    }

    #[test]
    fn test_per_participant_failure_continues() {
        let roster = roster_with(&[
            ("Host", Some("broken_blueprint")),
            ("Alice", Some("light_scout")),
        ]);
        let mut factory = ScriptedFactory {
            fail_loadouts: vec!["broken_blueprint".to_string()],
            ..Default::default()
        };
        let probe = ReadyProbe(true);
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Host");

        coordinator.start(Instant::now());
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);

        // Host's creation failed, Alice's still went through.
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].nickname, "Alice");
        assert_eq!(coordinator.phase(), SpawnPhase::Complete);
        assert!(coordinator.entity_for("Host").is_none());
    }

    #[test]
    fn test_missing_loadout_falls_back_then_skips() {
        let roster = roster_with(&[("Host", None), ("Alice", None)]);
        let probe = ReadyProbe(true);

        // With a process-wide default, everyone spawns with it.
        let mut factory = ScriptedFactory::default();
        let config = SpawnConfig {
            default_loadout: Some("trainer".to_string()),
            ..Default::default()
        };
        let mut coordinator = SpawnCoordinator::new(config, "Host");
        coordinator.start(Instant::now());
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.loadout == "trainer"));

        // Without one, participants are skipped but the run completes.
        let mut factory = ScriptedFactory::default();
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Host");
        coordinator.start(Instant::now());
        let notices = run_until_idle(&mut coordinator, &roster, &mut factory, &probe, 32);
        assert!(notices.is_empty());
        assert_eq!(coordinator.phase(), SpawnPhase::Complete);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Host");
        assert!(coordinator.start(Instant::now()));
        assert!(!coordinator.start(Instant::now()));
        assert_eq!(coordinator.phase(), SpawnPhase::SceneWaiting);
    }

    #[test]
    fn test_remote_spawn_applied_at_most_once() {
        let mut factory = ScriptedFactory::default();
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Alice");
        let now = Instant::now();

        coordinator.apply_remote_spawn("Bob", "light_scout", now, &mut factory);
        coordinator.apply_remote_spawn("Bob", "light_scout", now, &mut factory);

        assert_eq!(factory.created.len(), 1);
        assert_eq!(coordinator.spawned_count(), 1);
    }

    #[test]
    fn test_local_remote_spawn_takes_control_after_delay() {
        let mut factory = ScriptedFactory::default();
        let roster = SessionRoster::default();
        let probe = ReadyProbe(false);
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Alice");
        let now = Instant::now();

        coordinator.apply_remote_spawn("Alice", "light_scout", now, &mut factory);
        assert!(factory.controlled.is_empty());

        // Not yet due.
        coordinator.tick(now + Duration::from_millis(100), &roster, &mut factory, &probe);
        assert!(factory.controlled.is_empty());

        // Due after the control delay.
        coordinator.tick(now + Duration::from_millis(300), &roster, &mut factory, &probe);
        assert_eq!(factory.controlled.len(), 1);
    }

    #[test]
    fn test_reset_deregisters_everything_and_rearms() {
        let mut factory = ScriptedFactory::default();
        let mut coordinator = SpawnCoordinator::new(SpawnConfig::default(), "Alice");
        let now = Instant::now();

        coordinator.apply_remote_spawn("Alice", "light_scout", now, &mut factory);
        coordinator.apply_remote_spawn("Bob", "heavy_breacher", now, &mut factory);
        assert_eq!(coordinator.spawned_count(), 2);

        coordinator.reset(&mut factory);
        assert_eq!(factory.deregistered.len(), 2);
        assert_eq!(coordinator.spawned_count(), 0);
        assert_eq!(coordinator.phase(), SpawnPhase::Idle);

        // A fresh session may orchestrate again.
        assert!(coordinator.start(Instant::now()));
    }
}
