//! Pending reads waiting for a matching report
//!
//! A confirmed read first waits for its control key (a Firmata control pin
//! or a telegram channel) to report the requested state, then for the next
//! sample on its channel. Queues fire last-in first-out and every entry is
//! removed before its reply runs, so a reply can never fire twice.

use std::collections::HashMap;
use std::fmt;

/// Full-scale raw reading of a 10-bit converter
pub const ADC_MAX: f64 = 1023.0;

/// Supply voltage across the divider
pub const DIVIDER_VIN: f64 = 5.0;

/// Continuation invoked with the converted value
pub type ReadReply = Box<dyn FnOnce(f64) + Send>;

/// How a raw sample becomes the value handed to the reader
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// `raw * 100 / 1023`
    Percent,
    /// `round(raw * 100 / 1023)`
    RoundedPercent,
    /// Unknown resistance in kΩ against a known resistor
    Resistance { known_kohm: f64 },
}

impl Conversion {
    pub fn apply(&self, raw: u16) -> f64 {
        match *self {
            Conversion::Percent => raw_to_percent(raw),
            Conversion::RoundedPercent => raw_to_percent(raw).round(),
            Conversion::Resistance { known_kohm } => divider_resistance(raw, known_kohm),
        }
    }
}

/// Scale a raw sample to 0..100
pub fn raw_to_percent(raw: u16) -> f64 {
    raw as f64 * 100.0 / ADC_MAX
}

/// Solve a resistive divider for the unknown resistor
///
/// `R = R_known / (Vin / Vout - 1)` with `Vout = raw / 1023 * Vin`.
pub fn divider_resistance(raw: u16, known_kohm: f64) -> f64 {
    let vout = raw as f64 / ADC_MAX * DIVIDER_VIN;
    known_kohm / (DIVIDER_VIN / vout - 1.0)
}

/// One outstanding confirmed read
pub struct PendingRead {
    /// Channel whose sample resolves the read
    pub channel: u8,
    pub conversion: Conversion,
    reply: ReadReply,
}

impl PendingRead {
    pub fn new(channel: u8, conversion: Conversion, reply: ReadReply) -> Self {
        Self {
            channel,
            conversion,
            reply,
        }
    }

    /// Resolve with a raw sample
    pub fn resolve(self, raw: u16) {
        (self.reply)(self.conversion.apply(raw));
    }
}

impl fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("channel", &self.channel)
            .field("conversion", &self.conversion)
            .field("reply", &"<reply>")
            .finish()
    }
}

/// Per-key state queues and per-channel sample queues
#[derive(Debug, Default)]
pub struct WaiterTable {
    /// Indexed by key, then `[low/normal, high/sensitive]`
    states: HashMap<u8, [Vec<PendingRead>; 2]>,
    samples: HashMap<u8, Vec<PendingRead>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `key` to report `state`
    pub fn push_state(&mut self, key: u8, state: bool, read: PendingRead) {
        self.states.entry(key).or_default()[state as usize].push(read);
    }

    /// Remove every waiter for `(key, state)`, newest first
    pub fn take_state(&mut self, key: u8, state: bool) -> Vec<PendingRead> {
        let Some(queues) = self.states.get_mut(&key) else {
            return Vec::new();
        };
        let queue = &mut queues[state as usize];
        let mut taken = Vec::with_capacity(queue.len());
        while let Some(read) = queue.pop() {
            taken.push(read);
        }
        taken
    }

    /// Whether `key` still has waiters for either state
    pub fn has_state_waiters(&self, key: u8) -> bool {
        self.states
            .get(&key)
            .is_some_and(|queues| queues.iter().any(|q| !q.is_empty()))
    }

    /// Whether `key` has waiters for `state`
    pub fn has_waiters_for(&self, key: u8, state: bool) -> bool {
        self.states
            .get(&key)
            .is_some_and(|queues| !queues[state as usize].is_empty())
    }

    /// Wait for the next sample on the read's channel
    pub fn push_sample(&mut self, read: PendingRead) {
        self.samples.entry(read.channel).or_default().push(read);
    }

    /// Resolve every read waiting on `channel`, newest first
    ///
    /// Returns how many fired.
    pub fn fire_sample(&mut self, channel: u8, raw: u16) -> usize {
        let mut fired = 0;
        while let Some(read) = self
            .samples
            .get_mut(&channel)
            .and_then(|queue| queue.pop())
        {
            read.resolve(raw);
            fired += 1;
        }
        fired
    }

    /// Reads waiting on `channel`'s next sample
    #[cfg(test)]
    fn sample_waiters(&self, channel: u8) -> usize {
        self.samples.get(&channel).map_or(0, Vec::len)
    }

    /// Total outstanding reads
    pub fn len(&self) -> usize {
        let states: usize = self
            .states
            .values()
            .map(|[low, high]| low.len() + high.len())
            .sum();
        let samples: usize = self.samples.values().map(Vec::len).sum();
        states + samples
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every waiter; their replies never run
    pub fn clear(&mut self) {
        self.states.clear();
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<(u32, f64)>>>, impl Fn(u32) -> ReadReply) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: u32| -> ReadReply {
                let log = log.clone();
                Box::new(move |value| log.lock().unwrap().push((tag, value)))
            }
        };
        (log, make)
    }

    #[test]
    fn test_percent_conversions() {
        assert_eq!(Conversion::Percent.apply(1023), 100.0);
        assert!((Conversion::Percent.apply(512) - 50.048).abs() < 0.001);
        assert_eq!(Conversion::RoundedPercent.apply(512), 50.0);
    }

    #[test]
    fn test_divider_resistance_midpoint() {
        let r = divider_resistance(512, 10.0);
        // Vout = 2.5024, Vin/Vout - 1 = 0.99805
        assert!((r - 10.0 * 512.0 / 511.0).abs() < 1e-9);
        assert!((r - 10.02).abs() < 0.01);
    }

    #[test]
    fn test_divider_extremes() {
        assert_eq!(divider_resistance(0, 10.0), 0.0);
        assert!(divider_resistance(1023, 10.0).is_infinite());
    }

    #[test]
    fn test_sample_waiters_fire_lifo_with_same_value() {
        let (log, reply) = recorder();
        let mut table = WaiterTable::new();
        table.push_sample(PendingRead::new(2, Conversion::RoundedPercent, reply(1)));
        table.push_sample(PendingRead::new(2, Conversion::RoundedPercent, reply(2)));

        assert_eq!(table.fire_sample(2, 1023), 2);
        assert_eq!(*log.lock().unwrap(), vec![(2, 100.0), (1, 100.0)]);
        assert_eq!(table.sample_waiters(2), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_sample_on_other_channel_fires_nothing() {
        let (log, reply) = recorder();
        let mut table = WaiterTable::new();
        table.push_sample(PendingRead::new(2, Conversion::Percent, reply(1)));

        assert_eq!(table.fire_sample(3, 100), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_take_state_is_newest_first() {
        let (_log, reply) = recorder();
        let mut table = WaiterTable::new();
        table.push_state(5, true, PendingRead::new(5, Conversion::Percent, reply(1)));
        table.push_state(5, true, PendingRead::new(4, Conversion::Percent, reply(2)));
        table.push_state(5, false, PendingRead::new(5, Conversion::Percent, reply(3)));

        let taken = table.take_state(5, true);
        assert_eq!(taken.iter().map(|r| r.channel).collect::<Vec<_>>(), vec![4, 5]);
        assert!(table.has_state_waiters(5));
        assert!(table.has_waiters_for(5, false));
        assert!(!table.has_waiters_for(5, true));
    }

    #[test]
    fn test_clear_drops_replies() {
        let (log, reply) = recorder();
        let mut table = WaiterTable::new();
        table.push_state(1, false, PendingRead::new(1, Conversion::Percent, reply(1)));
        table.push_sample(PendingRead::new(1, Conversion::Percent, reply(2)));

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.fire_sample(1, 10), 0);
        assert!(log.lock().unwrap().is_empty());
    }
}
