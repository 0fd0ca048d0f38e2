//! # Renderer Scene
//!
//! The core renderer's view of what is visible. Core halves announce
//! themselves through `notify_*` calls:
//!
//! - `added` / `removed` change set membership (activation toggles)
//! - `updated` only flags the payload for re-upload
//!
//! Kept in `BTreeSet`s so iteration order is deterministic.

use std::collections::BTreeSet;

use tandem_core::Handle;
use tracing::trace;

/// Notification counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Membership changes (added or removed).
    pub membership_changes: u64,
    /// Payload updates.
    pub updates: u64,
}

/// Visibility sets of the core renderer.
#[derive(Debug, Default)]
pub struct RendererScene {
    light_probe_volumes: BTreeSet<Handle>,
    dirty_volumes: BTreeSet<Handle>,
    coefficients_changed: BTreeSet<Handle>,
    skyboxes: Vec<Handle>,
    reflection_probes: BTreeSet<Handle>,
    stats: SceneStats,
}

impl RendererScene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // LIGHT PROBE VOLUMES
    // =========================================================================

    /// A volume became active.
    pub fn notify_light_probe_volume_added(&mut self, volume: Handle) {
        trace!(%volume, "light probe volume added");
        self.light_probe_volumes.insert(volume);
        self.dirty_volumes.insert(volume);
        self.stats.membership_changes += 1;
    }

    /// An active volume changed. `coefficients_only` is set when just the
    /// captured lighting changed (probe positions are unchanged).
    pub fn notify_light_probe_volume_updated(&mut self, volume: Handle, coefficients_only: bool) {
        if !self.light_probe_volumes.contains(&volume) {
            return;
        }
        if coefficients_only {
            self.coefficients_changed.insert(volume);
        } else {
            self.dirty_volumes.insert(volume);
        }
        self.stats.updates += 1;
    }

    /// A volume was deactivated or destroyed.
    pub fn notify_light_probe_volume_removed(&mut self, volume: Handle) {
        trace!(%volume, "light probe volume removed");
        if self.light_probe_volumes.remove(&volume) {
            self.stats.membership_changes += 1;
        }
        self.dirty_volumes.remove(&volume);
        self.coefficients_changed.remove(&volume);
    }

    /// Active volumes.
    pub fn light_probe_volumes(&self) -> impl Iterator<Item = Handle> + '_ {
        self.light_probe_volumes.iter().copied()
    }

    /// True if `volume` is active.
    #[must_use]
    pub fn contains_light_probe_volume(&self, volume: Handle) -> bool {
        self.light_probe_volumes.contains(&volume)
    }

    /// Takes the volumes whose probe layout needs uploading.
    pub fn take_dirty_volumes(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.dirty_volumes).into_iter().collect()
    }

    /// Takes the volumes whose captured coefficients changed.
    pub fn take_coefficient_changes(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.coefficients_changed)
            .into_iter()
            .collect()
    }

    // =========================================================================
    // SKYBOXES
    // =========================================================================

    /// A skybox became active. The most recently activated one is used.
    pub fn notify_skybox_added(&mut self, skybox: Handle) {
        self.skyboxes.retain(|s| *s != skybox);
        self.skyboxes.push(skybox);
        self.stats.membership_changes += 1;
    }

    /// A skybox was deactivated or destroyed.
    pub fn notify_skybox_removed(&mut self, skybox: Handle) {
        let before = self.skyboxes.len();
        self.skyboxes.retain(|s| *s != skybox);
        if self.skyboxes.len() != before {
            self.stats.membership_changes += 1;
        }
    }

    /// The skybox in use.
    #[must_use]
    pub fn active_skybox(&self) -> Option<Handle> {
        self.skyboxes.last().copied()
    }

    // =========================================================================
    // REFLECTION PROBES
    // =========================================================================

    /// A reflection probe became active.
    pub fn notify_reflection_probe_added(&mut self, probe: Handle) {
        self.reflection_probes.insert(probe);
        self.stats.membership_changes += 1;
    }

    /// An active reflection probe changed.
    pub fn notify_reflection_probe_updated(&mut self, probe: Handle) {
        if self.reflection_probes.contains(&probe) {
            self.stats.updates += 1;
        }
    }

    /// A reflection probe was deactivated or destroyed.
    pub fn notify_reflection_probe_removed(&mut self, probe: Handle) {
        if self.reflection_probes.remove(&probe) {
            self.stats.membership_changes += 1;
        }
    }

    /// Active reflection probes.
    pub fn reflection_probes(&self) -> impl Iterator<Item = Handle> + '_ {
        self.reflection_probes.iter().copied()
    }

    /// Notification counters.
    #[must_use]
    pub const fn stats(&self) -> SceneStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_membership_and_dirty_tracking() {
        let mut scene = RendererScene::new();
        let a = Handle::new(0, 0);
        let b = Handle::new(1, 0);

        scene.notify_light_probe_volume_updated(a, false);
        assert!(scene.take_dirty_volumes().is_empty(), "inactive volumes are ignored");

        scene.notify_light_probe_volume_added(a);
        scene.notify_light_probe_volume_added(b);
        assert_eq!(scene.take_dirty_volumes(), vec![a, b]);

        scene.notify_light_probe_volume_updated(b, true);
        assert!(scene.take_dirty_volumes().is_empty());
        assert_eq!(scene.take_coefficient_changes(), vec![b]);

        scene.notify_light_probe_volume_removed(a);
        assert_eq!(scene.light_probe_volumes().collect::<Vec<_>>(), vec![b]);
        assert_eq!(scene.stats().membership_changes, 3);
    }

    #[test]
    fn test_last_activated_skybox_wins() {
        let mut scene = RendererScene::new();
        let first = Handle::new(3, 0);
        let second = Handle::new(4, 0);
        scene.notify_skybox_added(first);
        scene.notify_skybox_added(second);
        assert_eq!(scene.active_skybox(), Some(second));

        scene.notify_skybox_removed(second);
        assert_eq!(scene.active_skybox(), Some(first));
        scene.notify_skybox_removed(first);
        assert_eq!(scene.active_skybox(), None);
    }
}
