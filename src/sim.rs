//! Simulation Interfaces
//!
//! Trait contracts for everything the session layer needs from the
//! surrounding single-player simulation. The session core never goes
//! looking for these objects itself; the process entry point constructs
//! concrete implementations and passes them in by reference.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

/// Position in simulation space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    /// East-west axis.
    pub x: f32,
    /// Vertical axis.
    pub y: f32,
    /// North-south axis.
    pub z: f32,
}

impl Vec3 {
    /// World origin.
    pub const ORIGIN: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Construct from components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }
}

/// Orientation in simulation space, as an `(x, y, z, w)` quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation(pub [f32; 4]);

impl Rotation {
    /// No rotation.
    pub const IDENTITY: Rotation = Rotation([0.0, 0.0, 0.0, 1.0]);
}

/// Opaque handle to an entity the creation service spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u64);

/// The simulation's entity factory.
///
/// `create` returns `None` for an unknown loadout id or when the backing
/// system cannot produce an entity right now; callers treat that as a
/// per-participant failure, never a fatal one.
pub trait CreationService {
    /// Whether the factory is ready to create entities.
    fn is_available(&self) -> bool;

    /// Create one entity from a loadout definition.
    fn create(&mut self, loadout: &str, position: Vec3, rotation: Rotation)
        -> Option<EntityHandle>;

    /// Hand input control of an entity to the local participant.
    fn assign_control(&mut self, handle: EntityHandle);

    /// Deregister a previously created entity and request its destruction.
    fn deregister(&mut self, handle: EntityHandle);
}

/// Reports whether the surrounding simulation has finished loading the
/// current scene.
pub trait SceneProbe {
    /// True once the scene is ready for spawning.
    fn scene_ready(&self) -> bool;
}

/// Supplies the local participant's display nickname.
pub trait IdentityProvider {
    /// The nickname, or `None` when the underlying provider failed.
    fn nickname(&self) -> Option<String>;
}

/// Generated placeholder nickname, used when the identity provider fails
/// or a handshake arrives without a usable name.
pub fn placeholder_nickname() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("Player-{}", &id[..6])
}

// =============================================================================
// IN-PROCESS IMPLEMENTATIONS
// =============================================================================

/// Creation service backed by nothing but a counter; stands in for the
/// real factory when the session layer runs outside the simulation.
#[derive(Debug, Default)]
pub struct DemoFactory {
    next_handle: u64,
    live: HashSet<EntityHandle>,
    controlled: Option<EntityHandle>,
}

impl DemoFactory {
    /// New factory with no live entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities created and not yet deregistered.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Entity currently under local control, if any.
    pub fn controlled(&self) -> Option<EntityHandle> {
        self.controlled
    }
}

impl CreationService for DemoFactory {
    fn is_available(&self) -> bool {
        true
    }

    fn create(
        &mut self,
        loadout: &str,
        position: Vec3,
        _rotation: Rotation,
    ) -> Option<EntityHandle> {
        if loadout.is_empty() {
            warn!("demo factory refused empty loadout id");
            return None;
        }
        self.next_handle += 1;
        let handle = EntityHandle(self.next_handle);
        self.live.insert(handle);
        debug!(
            loadout,
            handle = handle.0,
            x = position.x,
            z = position.z,
            "demo factory created entity"
        );
        Some(handle)
    }

    fn assign_control(&mut self, handle: EntityHandle) {
        debug!(handle = handle.0, "demo factory assigned control");
        self.controlled = Some(handle);
    }

    fn deregister(&mut self, handle: EntityHandle) {
        if !self.live.remove(&handle) {
            debug!(handle = handle.0, "deregister for unknown handle");
        }
        if self.controlled == Some(handle) {
            self.controlled = None;
        }
    }
}

/// Scene probe that reports ready once a deadline has passed, imitating
/// a scene load that takes a moment to settle.
#[derive(Debug)]
pub struct DelayedSceneProbe {
    ready_at: std::time::Instant,
}

impl DelayedSceneProbe {
    /// Ready `delay` from now.
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            ready_at: std::time::Instant::now() + delay,
        }
    }
}

impl SceneProbe for DelayedSceneProbe {
    fn scene_ready(&self) -> bool {
        std::time::Instant::now() >= self.ready_at
    }
}

/// Identity provider with a fixed, possibly absent, nickname.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub Option<String>);

impl IdentityProvider for FixedIdentity {
    fn nickname(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_nicknames_are_distinct() {
        let a = placeholder_nickname();
        let b = placeholder_nickname();
        assert!(a.starts_with("Player-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_demo_factory_lifecycle() {
        let mut factory = DemoFactory::new();
        assert!(factory.is_available());

        let handle = factory
            .create("light_scout", Vec3::ORIGIN, Rotation::IDENTITY)
            .unwrap();
        assert_eq!(factory.live_count(), 1);

        factory.assign_control(handle);
        assert_eq!(factory.controlled(), Some(handle));

        factory.deregister(handle);
        assert_eq!(factory.live_count(), 0);
        assert_eq!(factory.controlled(), None);
    }

    #[test]
    fn test_demo_factory_rejects_empty_loadout() {
        let mut factory = DemoFactory::new();
        assert!(factory
            .create("", Vec3::ORIGIN, Rotation::IDENTITY)
            .is_none());
    }
}
