use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::domain::Bucket;
use crate::filter::FilterResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Empty,
    Accumulating,
    Full,
    FlushedOnExhaustion,
    Merging,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowTrigger {
    Full,
    Exhausted,
}

/// A filter result tagged with the object's position in the sorted listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub index: usize,
    pub result: FilterResult,
}

/// Working set of at most `capacity` slots for one bucket.
#[derive(Debug)]
pub struct Window {
    bucket: Bucket,
    capacity: usize,
    sequence: usize,
    slots: Vec<Slot>,
    state: WindowState,
}

impl Window {
    pub fn new(bucket: Bucket, capacity: usize) -> Self {
        Self {
            bucket,
            capacity: capacity.max(1),
            sequence: 0,
            slots: Vec::with_capacity(capacity),
            state: WindowState::Empty,
        }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Appends a slot. A full or merging window hands the slot back.
    pub fn add(&mut self, slot: Slot) -> Result<WindowState, Slot> {
        if self.is_full() || self.state == WindowState::Merging {
            return Err(slot);
        }
        if self.state == WindowState::Cleared {
            self.open_next();
        }
        self.slots.push(slot);
        self.state = if self.is_full() {
            WindowState::Full
        } else {
            WindowState::Accumulating
        };
        Ok(self.state)
    }

    /// Hands the slots over for merging. An empty window yields nothing.
    pub fn complete(&mut self, trigger: WindowTrigger) -> Option<CompletedWindow> {
        if self.slots.is_empty() {
            return None;
        }
        if trigger == WindowTrigger::Exhausted {
            self.state = WindowState::FlushedOnExhaustion;
        }
        trace!(bucket = %self.bucket, window = self.sequence, state = ?self.state, "window completed");
        self.state = WindowState::Merging;
        Some(CompletedWindow {
            bucket: self.bucket,
            sequence: self.sequence,
            trigger,
            slots: std::mem::take(&mut self.slots),
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.state = WindowState::Cleared;
    }

    /// Starts the next cycle of the same bucket.
    pub fn open_next(&mut self) {
        if self.state == WindowState::Cleared {
            self.sequence += 1;
        }
        self.slots.clear();
        self.state = WindowState::Empty;
    }
}

#[derive(Debug, Clone)]
pub struct CompletedWindow {
    pub bucket: Bucket,
    pub sequence: usize,
    pub trigger: WindowTrigger,
    pub slots: Vec<Slot>,
}

impl CompletedWindow {
    pub fn source_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn kept_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.result.is_kept()).count()
    }
}

/// Routes results arriving in any order into the bucket's window.
///
/// The sorted listing is cut into consecutive groups of `capacity`; group
/// `k` always fills window `k`. A result for a later group is parked until
/// its window opens, so window contents do not depend on completion order.
#[derive(Debug)]
pub struct BatchAccumulator {
    window: Window,
    current_group: usize,
    pending: BTreeMap<usize, Vec<Slot>>,
}

impl BatchAccumulator {
    pub fn new(bucket: Bucket, capacity: usize) -> Self {
        Self {
            window: Window::new(bucket, capacity),
            current_group: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn add<F>(&mut self, index: usize, result: FilterResult, emit: &mut F)
    where
        F: FnMut(CompletedWindow),
    {
        let group = index / self.window.capacity();
        let slot = Slot { index, result };
        if group != self.current_group {
            trace!(index, group, "parking result for a later window");
            self.pending.entry(group).or_default().push(slot);
            return;
        }
        self.push(slot, emit);
    }

    /// Flushes whatever the window still holds once the listing is
    /// exhausted, then any parked groups in order.
    pub fn finish<F>(&mut self, emit: &mut F)
    where
        F: FnMut(CompletedWindow),
    {
        self.flush(emit);
        while let Some((group, slots)) = self.pending.pop_first() {
            self.current_group = group;
            self.window.open_next();
            for slot in slots {
                self.push(slot, emit);
            }
            self.flush(emit);
        }
    }

    fn push<F>(&mut self, slot: Slot, emit: &mut F)
    where
        F: FnMut(CompletedWindow),
    {
        if let Err(slot) = self.window.add(slot) {
            // a group never holds more than `capacity` indices
            debug_assert!(false, "window {} rejected slot {}", self.window.sequence(), slot.index);
            warn!(
                bucket = %self.window.bucket(),
                window = self.window.sequence(),
                index = slot.index,
                "window rejected a slot of its own group"
            );
            return;
        }
        if self.window.is_full() {
            if let Some(completed) = self.window.complete(WindowTrigger::Full) {
                debug!(bucket = %completed.bucket, window = completed.sequence, "window full");
                emit(completed);
            }
            self.window.clear();
            self.advance(emit);
        }
    }

    fn advance<F>(&mut self, emit: &mut F)
    where
        F: FnMut(CompletedWindow),
    {
        self.current_group += 1;
        self.window.open_next();
        if let Some(slots) = self.pending.remove(&self.current_group) {
            for slot in slots {
                self.push(slot, emit);
            }
        }
    }

    fn flush<F>(&mut self, emit: &mut F)
    where
        F: FnMut(CompletedWindow),
    {
        if let Some(completed) = self.window.complete(WindowTrigger::Exhausted) {
            debug!(
                bucket = %completed.bucket,
                window = completed.sequence,
                slots = completed.slots.len(),
                "flushing partial window"
            );
            emit(completed);
            self.window.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::ObjectKey;
    use crate::filter::DropReason;

    fn bucket() -> Bucket {
        Bucket::new(NaiveDate::from_ymd_opt(2023, 11, 18).unwrap(), 14).unwrap()
    }

    fn placeholder(index: usize) -> FilterResult {
        let key: ObjectKey = format!(
            "OR_GLM-L2-LCFA_G16_s20233221400{:02}0_e20233221401000_c20233221401000.nc",
            index % 60
        )
        .parse()
        .unwrap();
        FilterResult::placeholder(key, DropReason::NoEventsInRegion)
    }

    #[test]
    fn window_walks_state_machine() {
        let mut window = Window::new(bucket(), 2);
        assert_eq!(window.state(), WindowState::Empty);

        let state = window
            .add(Slot {
                index: 0,
                result: placeholder(0),
            })
            .unwrap();
        assert_eq!(state, WindowState::Accumulating);
        let state = window
            .add(Slot {
                index: 1,
                result: placeholder(1),
            })
            .unwrap();
        assert_eq!(state, WindowState::Full);
        assert!(
            window
                .add(Slot {
                    index: 2,
                    result: placeholder(2),
                })
                .is_err()
        );

        let completed = window.complete(WindowTrigger::Full).unwrap();
        assert_eq!(completed.source_slots(), 2);
        assert_eq!(window.state(), WindowState::Merging);
        window.clear();
        assert_eq!(window.state(), WindowState::Cleared);
        window.open_next();
        assert_eq!(window.state(), WindowState::Empty);
        assert_eq!(window.sequence(), 1);
    }

    #[test]
    fn out_of_order_results_keep_group_membership() {
        let mut accumulator = BatchAccumulator::new(bucket(), 3);
        let mut emitted = Vec::new();
        let mut emit = |window: CompletedWindow| emitted.push(window);

        for index in [4, 0, 3, 1, 6, 2, 5] {
            accumulator.add(index, placeholder(index), &mut emit);
        }
        accumulator.finish(&mut emit);

        let groups = emitted
            .iter()
            .map(|window| {
                let mut indices = window.slots.iter().map(|slot| slot.index).collect::<Vec<_>>();
                indices.sort();
                (window.sequence, window.trigger, indices)
            })
            .collect::<Vec<_>>();
        assert_eq!(
            groups,
            vec![
                (0, WindowTrigger::Full, vec![0, 1, 2]),
                (1, WindowTrigger::Full, vec![3, 4, 5]),
                (2, WindowTrigger::Exhausted, vec![6]),
            ]
        );
        assert_eq!(accumulator.pending_len(), 0);
    }

    #[test]
    fn exact_multiple_leaves_nothing_to_flush() {
        let mut accumulator = BatchAccumulator::new(bucket(), 2);
        let mut count = 0;
        let mut emit = |_: CompletedWindow| count += 1;
        for index in 0..4 {
            accumulator.add(index, placeholder(index), &mut emit);
        }
        accumulator.finish(&mut emit);
        assert_eq!(count, 2);
    }

    #[test]
    fn reversed_arrival_never_overfills_a_window() {
        let mut accumulator = BatchAccumulator::new(bucket(), 2);
        let mut emitted = Vec::new();
        let mut emit = |window: CompletedWindow| emitted.push(window);
        for index in (0..5).rev() {
            accumulator.add(index, placeholder(index), &mut emit);
        }
        accumulator.finish(&mut emit);

        let sizes = emitted
            .iter()
            .map(|window| (window.sequence, window.source_slots()))
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![(0, 2), (1, 2), (2, 1)]);
        assert_eq!(accumulator.pending_len(), 0);
    }
}
