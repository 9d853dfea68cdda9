//! Records work in flight per identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Flights {
    in_flight: HashMap<String, usize>,
    completed: HashMap<String, usize>,
    overlaps: Vec<String>,
    max_parallel: usize,
}

/// Counts concurrent flights per key and remembers every overlap.
#[derive(Default)]
pub struct FlightRecorder {
    flights: Arc<Mutex<Flights>>,
}

impl FlightRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Flights> {
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a flight for `key`. It ends when the guard drops.
    pub fn enter(&self, key: &str) -> FlightGuard {
        let mut flights = self.lock();
        let count = flights.in_flight.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            flights.overlaps.push(key.to_string());
        }
        let parallel = flights.in_flight.values().sum();
        flights.max_parallel = flights.max_parallel.max(parallel);

        FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.to_string(),
        }
    }

    /// Keys that ever had two flights at once.
    pub fn overlaps(&self) -> Vec<String> {
        self.lock().overlaps.clone()
    }

    /// Most flights in the air at once across all keys.
    pub fn max_parallel(&self) -> usize {
        self.lock().max_parallel
    }

    /// Finished flights for `key`.
    pub fn completed(&self, key: &str) -> usize {
        self.lock().completed.get(key).copied().unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.values().sum()
    }
}

pub struct FlightGuard {
    flights: Arc<Mutex<Flights>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = flights.in_flight.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        *flights.completed.entry(self.key.clone()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_recorded() {
        let recorder = FlightRecorder::new();
        let a = recorder.enter("a");
        let b = recorder.enter("b");
        assert!(recorder.overlaps().is_empty());
        assert_eq!(recorder.max_parallel(), 2);

        let a2 = recorder.enter("a");
        assert_eq!(recorder.overlaps(), vec!["a".to_string()]);
        drop((a, a2, b));

        assert_eq!(recorder.in_flight(), 0);
        assert_eq!(recorder.completed("a"), 2);
    }
}
