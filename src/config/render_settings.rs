use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Minimum gap kept between the load and unload radii
pub const UNLOAD_MARGIN: u32 = 2;

/// Load and unload radii around the camera chunk, in chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSettings {
    load_distance: u32,
    unload_distance: u32,
}

impl RenderSettings {
    /// Create settings, raising the unload distance to at least `load_distance + 2`
    pub fn new(load_distance: u32, unload_distance: u32) -> Self {
        Self {
            load_distance,
            unload_distance: unload_distance.max(load_distance + UNLOAD_MARGIN),
        }
    }

    /// The radius around the camera within which chunks are meshed
    pub fn load_distance(&self) -> u32 {
        self.load_distance
    }

    /// The radius around the camera outside which chunks are evicted
    pub fn unload_distance(&self) -> u32 {
        self.unload_distance
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::new(5, 10)
    }
}

/// Delivered to every subscriber when the render distance changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettingsEvent {
    pub previous: RenderSettings,
    pub current: RenderSettings,
}

struct SettingsShared {
    settings: RwLock<RenderSettings>,
    subscribers: Mutex<Vec<Sender<RenderSettingsEvent>>>,
}

/// Shared, cloneable handle to the render settings.
///
/// Passed to the facade at construction. Changes are delivered as explicit
/// [`RenderSettingsEvent`]s on each subscriber's channel.
#[derive(Clone)]
pub struct RenderSettingsHandle {
    shared: Arc<SettingsShared>,
}

impl RenderSettingsHandle {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            shared: Arc::new(SettingsShared {
                settings: RwLock::new(settings),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current settings
    pub fn get(&self) -> RenderSettings {
        *self.shared.settings.read()
    }

    /// Receive an event every time the settings change
    pub fn subscribe(&self) -> Receiver<RenderSettingsEvent> {
        let (sender, receiver) = unbounded();
        self.shared.subscribers.lock().push(sender);
        receiver
    }

    /// Set the render distance. Returns the normalised settings that were stored.
    pub fn set_render_distance(&self, load_distance: u32, unload_distance: u32) -> RenderSettings {
        let current = RenderSettings::new(load_distance, unload_distance);
        let previous = {
            let mut settings = self.shared.settings.write();
            std::mem::replace(&mut *settings, current)
        };

        if previous != current {
            log::debug!(
                "[RenderSettingsHandle::set_render_distance] load {} -> {}, unload {} -> {}",
                previous.load_distance(),
                current.load_distance(),
                previous.unload_distance(),
                current.unload_distance()
            );
            let event = RenderSettingsEvent { previous, current };
            // Receivers that were dropped are forgotten
            self.shared
                .subscribers
                .lock()
                .retain(|sender| sender.send(event).is_ok());
        }

        current
    }
}

impl Default for RenderSettingsHandle {
    fn default() -> Self {
        Self::new(RenderSettings::default())
    }
}

impl std::fmt::Debug for RenderSettingsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSettingsHandle")
            .field("settings", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unload_distance_is_normalised() {
        let settings = RenderSettings::new(5, 3);
        assert_eq!(settings.load_distance(), 5);
        assert_eq!(settings.unload_distance(), 7);

        let settings = RenderSettings::new(2, 20);
        assert_eq!(settings.unload_distance(), 20);
    }

    #[test]
    fn test_subscribers_receive_changes() {
        let handle = RenderSettingsHandle::default();
        let events = handle.subscribe();

        let stored = handle.set_render_distance(3, 4);
        assert_eq!(stored, RenderSettings::new(3, 5));

        let event = events.try_recv().expect("event should be delivered");
        assert_eq!(event.previous, RenderSettings::default());
        assert_eq!(event.current, stored);
    }

    #[test]
    fn test_unchanged_settings_do_not_notify() {
        let handle = RenderSettingsHandle::new(RenderSettings::new(4, 8));
        let events = handle.subscribe();
        handle.set_render_distance(4, 8);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let handle = RenderSettingsHandle::default();
        drop(handle.subscribe());
        let live = handle.subscribe();
        handle.set_render_distance(1, 1);
        assert!(live.try_recv().is_ok());
        assert_eq!(handle.shared.subscribers.lock().len(), 1);
    }
}
