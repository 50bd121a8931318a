use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sensor::{
    SensorChannel, SensorError, SensorListener, SensorPlatform, SensorReading, Subscription,
};

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<SensorChannel, Vec<(u64, SensorListener)>>,
    unavailable: HashSet<SensorChannel>,
    last_rate: Option<f32>,
}

/// Sensor platform whose readings are pushed by the caller.
#[derive(Clone, Default)]
pub struct ManualSensorPlatform {
    registry: Arc<Mutex<Registry>>,
}

impl ManualSensorPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unavailable(&self, channel: SensorChannel) {
        self.registry.lock().unavailable.insert(channel);
    }

    /// Delivers `reading` to every listener on `channel`.
    pub fn emit(&self, channel: SensorChannel, reading: SensorReading) {
        let listeners: Vec<SensorListener> = self
            .registry
            .lock()
            .listeners
            .get(&channel)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(reading);
        }
    }

    pub fn listener_count(&self, channel: SensorChannel) -> usize {
        self.registry
            .lock()
            .listeners
            .get(&channel)
            .map_or(0, Vec::len)
    }

    pub fn last_rate(&self) -> Option<f32> {
        self.registry.lock().last_rate
    }
}

impl SensorPlatform for ManualSensorPlatform {
    fn subscribe(
        &self,
        channel: SensorChannel,
        rate_hz: f32,
        listener: SensorListener,
    ) -> Result<Subscription, SensorError> {
        let mut registry = self.registry.lock();
        if registry.unavailable.contains(&channel) {
            return Err(SensorError::Unavailable(channel));
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.last_rate = Some(rate_hz);
        registry
            .listeners
            .entry(channel)
            .or_default()
            .push((id, listener));

        let registry = Arc::clone(&self.registry);
        Ok(Subscription::new(move || {
            if let Some(entries) = registry.lock().listeners.get_mut(&channel) {
                entries.retain(|(entry, _)| *entry != id);
            }
        }))
    }
}
