//! Live show control: preset slots, the slot loop and the show/blackout switch.
//!
//! This only decides *what* to restore and when. The caller restores the
//! returned project path silently.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{MapperError, MapperResult};

pub const SLOT_COUNT: usize = 5;
pub const DEFAULT_LOOP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct SlotLoop {
    order: Vec<usize>,
    position: usize,
    next_at: Instant,
}

#[derive(Debug)]
pub struct LiveControl {
    slots: [Option<PathBuf>; SLOT_COUNT],
    in_loop: [bool; SLOT_COUNT],
    show_enabled: bool,
    slot_loop: Option<SlotLoop>,
    loop_interval: Duration,
}

impl Default for LiveControl {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_INTERVAL)
    }
}

impl LiveControl {
    pub fn new(loop_interval: Duration) -> Self {
        Self {
            slots: Default::default(),
            in_loop: [false; SLOT_COUNT],
            show_enabled: true,
            slot_loop: None,
            loop_interval,
        }
    }

    fn check_slot(slot: usize) -> MapperResult<()> {
        if slot < SLOT_COUNT {
            Ok(())
        } else {
            Err(MapperError::InvalidOperation("no such slot"))
        }
    }

    fn check_show(&self) -> MapperResult<()> {
        if self.show_enabled {
            Ok(())
        } else {
            Err(MapperError::InvalidOperation("show is disabled"))
        }
    }

    pub fn slot(&self, slot: usize) -> Option<&Path> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    pub fn slots(&self) -> &[Option<PathBuf>; SLOT_COUNT] {
        &self.slots
    }

    pub fn assign_slot(&mut self, slot: usize, path: impl Into<PathBuf>) -> MapperResult<()> {
        Self::check_slot(slot)?;
        self.check_show()?;
        let path = path.into();
        log::info!("Slot {}: {}", slot + 1, path.display());
        self.slots[slot] = Some(path);
        Ok(())
    }

    pub fn clear_slot(&mut self, slot: usize) -> MapperResult<()> {
        Self::check_slot(slot)?;
        self.slots[slot] = None;
        Ok(())
    }

    /// Project to restore for `slot`.
    pub fn trigger(&self, slot: usize) -> MapperResult<PathBuf> {
        Self::check_slot(slot)?;
        self.check_show()?;
        let path = self.slots[slot]
            .clone()
            .ok_or(MapperError::InvalidOperation("slot is empty"))?;
        log::info!("Triggering slot {}", slot + 1);
        Ok(path)
    }

    pub fn in_loop(&self, slot: usize) -> bool {
        self.in_loop.get(slot).copied().unwrap_or(false)
    }

    pub fn toggle_in_loop(&mut self, slot: usize) -> MapperResult<bool> {
        Self::check_slot(slot)?;
        self.in_loop[slot] = !self.in_loop[slot];
        Ok(self.in_loop[slot])
    }

    pub fn is_looping(&self) -> bool {
        self.slot_loop.is_some()
    }

    /// Start cycling through the selected, assigned slots from the first one.
    /// Returns the project to restore right away.
    pub fn start_loop(&mut self, now: Instant) -> MapperResult<PathBuf> {
        self.check_show()?;
        let order: Vec<usize> = (0..SLOT_COUNT)
            .filter(|&i| self.in_loop[i] && self.slots[i].is_some())
            .collect();
        if order.is_empty() {
            return Err(MapperError::InvalidOperation(
                "select at least one assigned slot to loop",
            ));
        }
        log::info!(
            "Slot loop started over {} slot(s), every {:.1}s",
            order.len(),
            self.loop_interval.as_secs_f32()
        );
        let mut slot_loop = SlotLoop {
            order,
            position: 0,
            next_at: now,
        };
        let path = self.next_in_loop(&mut slot_loop, now);
        self.slot_loop = Some(slot_loop);
        path.ok_or(MapperError::InvalidOperation("slot is empty"))
    }

    pub fn stop_loop(&mut self) {
        if self.slot_loop.take().is_some() {
            log::info!("Slot loop stopped");
        }
    }

    /// Start or stop the loop. `Some(path)` when a restore is due now.
    pub fn toggle_loop(&mut self, now: Instant) -> MapperResult<Option<PathBuf>> {
        if self.is_looping() {
            self.stop_loop();
            Ok(None)
        } else {
            self.start_loop(now).map(Some)
        }
    }

    /// Called every tick. Returns the next project when the interval elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<PathBuf> {
        let mut slot_loop = self.slot_loop.take()?;
        let due = if now >= slot_loop.next_at {
            self.next_in_loop(&mut slot_loop, now)
        } else {
            None
        };
        self.slot_loop = Some(slot_loop);
        due
    }

    fn next_in_loop(&self, slot_loop: &mut SlotLoop, now: Instant) -> Option<PathBuf> {
        let slot = slot_loop.order[slot_loop.position];
        slot_loop.position = (slot_loop.position + 1) % slot_loop.order.len();
        slot_loop.next_at = now + self.loop_interval;
        let path = self.slots[slot].clone();
        if path.is_none() {
            log::warn!("Slot {} emptied while looping, skipping", slot + 1);
        }
        path
    }

    pub fn show_enabled(&self) -> bool {
        self.show_enabled
    }

    /// Disabling the show blacks out the output and stops the loop.
    pub fn set_show_enabled(&mut self, enabled: bool) {
        self.show_enabled = enabled;
        if !enabled {
            self.stop_loop();
        }
        log::info!(
            "Show {}",
            if enabled { "enabled" } else { "disabled (blackout)" }
        );
    }

    pub fn toggle_show(&mut self) -> bool {
        self.set_show_enabled(!self.show_enabled);
        self.show_enabled
    }

    /// Whether the fullscreen output must draw nothing.
    pub fn blackout(&self) -> bool {
        !self.show_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> LiveControl {
        let mut c = LiveControl::new(Duration::from_secs(10));
        c.assign_slot(0, "a.json").unwrap();
        c.assign_slot(2, "c.json").unwrap();
        c
    }

    #[test]
    fn trigger_returns_assigned_path() {
        let c = control();
        assert_eq!(c.trigger(2).unwrap(), PathBuf::from("c.json"));
    }

    #[test]
    fn empty_or_unknown_slot_is_invalid() {
        let c = control();
        assert!(matches!(c.trigger(1), Err(MapperError::InvalidOperation(_))));
        assert!(matches!(c.trigger(7), Err(MapperError::InvalidOperation(_))));
    }

    #[test]
    fn loop_cycles_selected_assigned_slots() {
        let mut c = control();
        c.toggle_in_loop(0).unwrap();
        c.toggle_in_loop(1).unwrap(); // selected but empty
        c.toggle_in_loop(2).unwrap();

        let t0 = Instant::now();
        assert_eq!(c.start_loop(t0).unwrap(), PathBuf::from("a.json"));
        assert!(c.poll(t0 + Duration::from_secs(9)).is_none());
        assert_eq!(
            c.poll(t0 + Duration::from_secs(10)),
            Some(PathBuf::from("c.json"))
        );
        assert_eq!(
            c.poll(t0 + Duration::from_secs(20)),
            Some(PathBuf::from("a.json"))
        );
    }

    #[test]
    fn loop_restarts_from_first_slot() {
        let mut c = control();
        c.toggle_in_loop(0).unwrap();
        c.toggle_in_loop(2).unwrap();
        let t0 = Instant::now();
        c.start_loop(t0).unwrap();
        c.poll(t0 + Duration::from_secs(10));
        assert_eq!(c.toggle_loop(t0).unwrap(), None);
        assert!(!c.is_looping());
        assert_eq!(c.toggle_loop(t0).unwrap(), Some(PathBuf::from("a.json")));
    }

    #[test]
    fn loop_needs_a_selected_slot() {
        let mut c = control();
        assert!(c.start_loop(Instant::now()).is_err());
        assert!(!c.is_looping());
    }

    #[test]
    fn disabling_show_blacks_out_and_locks_controls() {
        let mut c = control();
        c.toggle_in_loop(0).unwrap();
        c.start_loop(Instant::now()).unwrap();

        assert!(!c.toggle_show());
        assert!(c.blackout());
        assert!(!c.is_looping());
        assert!(c.trigger(0).is_err());
        assert!(c.start_loop(Instant::now()).is_err());
        assert!(c.assign_slot(1, "b.json").is_err());

        assert!(c.toggle_show());
        assert!(!c.blackout());
        assert!(c.trigger(0).is_ok());
    }
}
