use std::time::{Duration, Instant};

use crate::error::{MapperError, MapperResult};
use crate::media::SharedFrame;
use crate::stage::Stage;
use crate::surface::MediaRef;

use super::types::{
    ContinuousSet, PlaybackMode, PlaylistStep, continuous_without_surface,
    playlist_without_surface, retain_live_steps,
};

pub const DEFAULT_IMAGE_DURATION: Duration = Duration::from_secs(5);

/// Decides which surfaces are visible and which media advances.
///
/// Lives on the render thread. Every edit to the playlist, the continuous set
/// or a surface's media goes through a full `reset`; nothing is patched
/// incrementally.
pub struct PlaybackScheduler {
    mode: PlaybackMode,
    playlist: Vec<PlaylistStep>,
    continuous: ContinuousSet,
    cursor: usize,
    /// Playlist index of the started step. `None` while idle.
    active: Option<usize>,
    clip_start: Option<Instant>,
    image_duration: Duration,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_DURATION)
    }
}

impl PlaybackScheduler {
    pub fn new(image_duration: Duration) -> Self {
        Self {
            mode: PlaybackMode::default(),
            playlist: Vec::new(),
            continuous: ContinuousSet::new(),
            cursor: 0,
            active: None,
            clip_start: None,
            image_duration,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn playlist(&self) -> &[PlaylistStep] {
        &self.playlist
    }

    pub fn continuous(&self) -> &ContinuousSet {
        &self.continuous
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn image_duration(&self) -> Duration {
        self.image_duration
    }

    /// The started step, if the sequence is running.
    pub fn active_step(&self) -> Option<&PlaylistStep> {
        self.active.and_then(|i| self.playlist.get(i))
    }

    pub fn is_idle(&self) -> bool {
        self.mode == PlaybackMode::Sequential && self.active.is_none()
    }

    /// Back to step 0 and reapply the mode's rules to every source.
    pub fn reset(&mut self, stage: &mut Stage, now: Instant) {
        self.cursor = 0;
        self.active = None;
        self.clip_start = None;

        for index in 0..stage.surfaces().len() {
            let Some(source) = stage.video(index) else {
                continue;
            };
            let free_running =
                self.mode == PlaybackMode::Concurrent || self.continuous.contains(&index);
            source.set_looping(free_running);
            if free_running {
                source.play();
            } else {
                source.stop();
            }
        }

        log::info!(
            "Playback reset: {} mode, {} steps, {} continuous",
            self.mode,
            self.playlist.len(),
            self.continuous.len()
        );

        if self.mode == PlaybackMode::Sequential && !stage.surfaces().is_empty() {
            self.play_next(stage, now);
        }
    }

    pub fn restart(&mut self, stage: &mut Stage, now: Instant) {
        self.reset(stage, now);
    }

    pub fn set_mode(&mut self, mode: PlaybackMode, stage: &mut Stage, now: Instant) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.reset(stage, now);
    }

    /// Replace the playlist and continuous set. Entries naming surfaces that
    /// do not exist are dropped.
    pub fn set_playlist(
        &mut self,
        steps: Vec<PlaylistStep>,
        continuous: ContinuousSet,
        stage: &mut Stage,
        now: Instant,
    ) {
        let count = stage.surfaces().len();
        let before = steps.len();
        self.playlist = retain_live_steps(steps, count);
        if self.playlist.len() != before {
            log::warn!(
                "Dropped {} playlist step(s) naming missing surfaces",
                before - self.playlist.len()
            );
        }
        self.continuous = continuous.into_iter().filter(|i| *i < count).collect();
        self.reset(stage, now);
    }

    /// Mode, playlist and continuous set in one go, with a single reset.
    pub fn configure(
        &mut self,
        mode: PlaybackMode,
        steps: Vec<PlaylistStep>,
        continuous: ContinuousSet,
        stage: &mut Stage,
        now: Instant,
    ) {
        self.mode = mode;
        self.set_playlist(steps, continuous, stage, now);
    }

    pub fn append_step(
        &mut self,
        step: PlaylistStep,
        stage: &mut Stage,
        now: Instant,
    ) -> MapperResult<()> {
        if step.surface_index >= stage.surfaces().len() {
            return Err(MapperError::InvalidOperation("no such surface"));
        }
        let mut steps = self.playlist.clone();
        steps.push(step);
        self.set_playlist(steps, self.continuous.clone(), stage, now);
        Ok(())
    }

    pub fn remove_step(&mut self, index: usize, stage: &mut Stage, now: Instant) -> MapperResult<()> {
        if index >= self.playlist.len() {
            return Err(MapperError::InvalidOperation("no such playlist step"));
        }
        let mut steps = self.playlist.clone();
        steps.remove(index);
        self.set_playlist(steps, self.continuous.clone(), stage, now);
        Ok(())
    }

    /// Swap step `index` with its neighbour. `up` moves it toward the start.
    pub fn move_step(
        &mut self,
        index: usize,
        up: bool,
        stage: &mut Stage,
        now: Instant,
    ) -> MapperResult<()> {
        let other = if up {
            index.checked_sub(1)
        } else {
            Some(index + 1)
        };
        let Some(other) = other.filter(|o| *o < self.playlist.len() && index < self.playlist.len())
        else {
            return Err(MapperError::InvalidOperation("cannot move playlist step"));
        };
        let mut steps = self.playlist.clone();
        steps.swap(index, other);
        self.set_playlist(steps, self.continuous.clone(), stage, now);
        Ok(())
    }

    pub fn toggle_continuous(
        &mut self,
        surface_index: usize,
        stage: &mut Stage,
        now: Instant,
    ) -> MapperResult<()> {
        if surface_index >= stage.surfaces().len() {
            return Err(MapperError::InvalidOperation("no such surface"));
        }
        let mut continuous = self.continuous.clone();
        if !continuous.remove(&surface_index) {
            continuous.insert(surface_index);
        }
        self.set_playlist(self.playlist.clone(), continuous, stage, now);
        Ok(())
    }

    /// Shift playlist and continuous indices after surface `removed` was deleted.
    pub fn on_surface_removed(&mut self, removed: usize, stage: &mut Stage, now: Instant) {
        let steps = playlist_without_surface(&self.playlist, removed);
        let continuous = continuous_without_surface(&self.continuous, removed);
        self.set_playlist(steps, continuous, stage, now);
    }

    /// Start the first startable step at or after the cursor, wrapping once.
    /// Returns the started playlist index, or `None` when the scheduler idles.
    pub fn play_next(&mut self, stage: &mut Stage, now: Instant) -> Option<usize> {
        let len = self.playlist.len();
        let start = self.cursor.min(len);
        let order = (start..len).chain(0..start);

        for index in order {
            if index == 0 && start > 0 {
                log::debug!("Playlist wrapped");
            }
            if self.start_step(index, stage, now) {
                self.cursor = index;
                self.active = Some(index);
                return Some(index);
            }
        }

        if len > 0 {
            log::warn!("No playable step in playlist, sequence idle");
        }
        self.cursor = 0;
        self.active = None;
        None
    }

    fn start_step(&mut self, index: usize, stage: &mut Stage, now: Instant) -> bool {
        let step = self.playlist[index].clone();
        let surface = step.surface_index;
        if surface >= stage.surfaces().len() {
            return false;
        }

        if !stage.shows_path(surface, &step.media_path) {
            if let Err(e) = stage.assign(surface, &step.media_path, step.media_kind, false) {
                log::warn!("Skipping step {index}: {e}");
                return false;
            }
        }

        let started = match stage.surfaces().get(surface).map(|s| &s.media) {
            Some(MediaRef::Video(_)) => match stage.video(surface) {
                Some(source) => {
                    source.set_looping(false);
                    source.play();
                    true
                }
                None => false,
            },
            Some(MediaRef::Image(_)) => true,
            _ => false,
        };

        if started {
            self.clip_start = Some(now);
            log::info!(
                "Step {index}: surface {surface} <- {} {}",
                step.media_kind.display_name(),
                step.media_path.display()
            );
        }
        started
    }

    /// Once per render frame. Moves to the next step when the active one is
    /// done; at most one transition per call. Returns true on a transition.
    pub fn tick(&mut self, stage: &mut Stage, now: Instant) -> bool {
        if self.mode != PlaybackMode::Sequential {
            return false;
        }
        let Some(step) = self.active_step() else {
            return false;
        };
        let surface = step.surface_index;

        let done = match stage.surfaces().get(surface).map(|s| &s.media) {
            Some(MediaRef::Video(_)) => stage
                .video(surface)
                .is_none_or(|v| v.is_finished() || v.is_disabled()),
            Some(MediaRef::Image(_)) => self
                .clip_start
                .is_none_or(|t| now.saturating_duration_since(t) > self.image_duration),
            _ => true,
        };

        if !done {
            return false;
        }
        self.cursor += 1;
        self.play_next(stage, now);
        true
    }

    pub fn is_visible(&self, surface_index: usize) -> bool {
        match self.mode {
            PlaybackMode::Concurrent => true,
            PlaybackMode::Sequential => {
                self.continuous.contains(&surface_index)
                    || self
                        .active_step()
                        .is_some_and(|s| s.surface_index == surface_index)
            }
        }
    }

    /// What surface `surface_index` should show right now.
    pub fn frame_for(&self, surface_index: usize, stage: &Stage) -> Option<SharedFrame> {
        if self.is_visible(surface_index) {
            stage.frame_of(surface_index)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::media::MediaKind;
    use crate::media::testing::FakeOpener;
    use crate::surface::CanvasSize;

    fn stage(surfaces: usize) -> Stage {
        let opener = FakeOpener::new()
            .with_video("clipA.mp4", 3)
            .with_video("clipB.mp4", 2)
            .with_image("img.png", [1, 2, 3, 255]);
        let mut st = Stage::new(CanvasSize::default(), Box::new(opener));
        for _ in 0..surfaces {
            st.add_surface();
        }
        st
    }

    fn video(i: usize, path: &str) -> PlaylistStep {
        PlaylistStep::new(i, path, MediaKind::Video)
    }

    fn image(i: usize, path: &str) -> PlaylistStep {
        PlaylistStep::new(i, path, MediaKind::Image)
    }

    fn decode_to_end(st: &Stage, surface: usize) {
        let src = st.video(surface).unwrap();
        for _ in 0..100 {
            if src.is_finished() {
                return;
            }
            src.advance();
        }
        panic!("source never finished");
    }

    fn sequential(st: &mut Stage, steps: Vec<PlaylistStep>, continuous: &[usize], t0: Instant) -> PlaybackScheduler {
        let mut sched = PlaybackScheduler::default();
        sched.set_mode(PlaybackMode::Sequential, st, t0);
        sched.set_playlist(steps, continuous.iter().copied().collect(), st, t0);
        sched
    }

    #[test]
    fn video_then_image_then_wrap() {
        let mut st = stage(2);
        let t0 = Instant::now();
        let mut sched = sequential(
            &mut st,
            vec![video(0, "clipA.mp4"), image(1, "img.png")],
            &[],
            t0,
        );

        assert_eq!(sched.cursor(), 0);
        st.video(0).unwrap().advance();
        assert!(sched.frame_for(0, &st).is_some());
        assert!(sched.frame_for(1, &st).is_none());

        // Not finished yet: no transition.
        assert!(!sched.tick(&mut st, t0 + Duration::from_millis(16)));

        decode_to_end(&st, 0);
        let t1 = t0 + Duration::from_secs(1);
        assert!(sched.tick(&mut st, t1));
        assert_eq!(sched.cursor(), 1);
        assert!(sched.frame_for(1, &st).is_some());
        assert!(sched.frame_for(0, &st).is_none());

        assert!(!sched.tick(&mut st, t1 + Duration::from_secs(5)));
        assert!(sched.tick(&mut st, t1 + Duration::from_millis(5001)));
        assert_eq!(sched.cursor(), 0);
        let src = st.video(0).unwrap();
        assert!(!src.is_finished());
        assert!(src.rewind_pending());
        assert!(!src.transport().looping);
    }

    #[test]
    fn one_transition_per_tick() {
        let mut st = stage(3);
        let t0 = Instant::now();
        let mut sched = sequential(
            &mut st,
            vec![image(0, "img.png"), image(1, "img.png"), image(2, "img.png")],
            &[],
            t0,
        );
        let late = t0 + Duration::from_secs(60);
        assert!(sched.tick(&mut st, late));
        assert_eq!(sched.cursor(), 1);
        // The new step's clock starts at the transition.
        assert!(!sched.tick(&mut st, late + Duration::from_secs(1)));
    }

    #[test]
    fn broken_steps_are_skipped_in_one_scan() {
        let mut st = stage(2);
        let t0 = Instant::now();
        let sched = sequential(
            &mut st,
            vec![video(0, "gone.mp4"), video(1, "missing.mp4"), image(1, "img.png")],
            &[],
            t0,
        );
        assert_eq!(sched.cursor(), 2);
        assert_eq!(sched.active_step().unwrap().media_path, Path::new("img.png"));
        assert!(st.surfaces().get(0).unwrap().media.is_none());
    }

    #[test]
    fn unplayable_playlist_idles() {
        let mut st = stage(1);
        let t0 = Instant::now();
        let mut sched = sequential(&mut st, vec![video(0, "gone.mp4")], &[], t0);
        assert!(sched.is_idle());
        assert!(!sched.tick(&mut st, t0 + Duration::from_secs(10)));
        assert!(sched.frame_for(0, &st).is_none());

        let mut empty = sequential(&mut st, vec![], &[], t0);
        assert!(empty.is_idle());
        assert!(!empty.tick(&mut st, t0));
    }

    #[test]
    fn sequential_stops_non_continuous_and_loops_continuous() {
        let mut st = stage(3);
        st.assign_video(1, Path::new("clipB.mp4"), true).unwrap();
        st.assign_video(2, Path::new("clipB.mp4"), true).unwrap();
        let t0 = Instant::now();
        let sched = sequential(&mut st, vec![video(0, "clipA.mp4")], &[2], t0);

        let stopped = st.video(1).unwrap().transport();
        assert!(!stopped.playing);
        assert!(!stopped.looping);
        let cont = st.video(2).unwrap().transport();
        assert!(cont.playing);
        assert!(cont.looping);

        st.video(2).unwrap().advance();
        st.video(1).unwrap().advance();
        assert!(sched.frame_for(2, &st).is_some());
        assert!(sched.frame_for(1, &st).is_none());
    }

    #[test]
    fn at_most_one_gated_surface_visible() {
        let mut st = stage(4);
        let t0 = Instant::now();
        let mut sched = sequential(
            &mut st,
            vec![
                video(0, "clipA.mp4"),
                image(1, "img.png"),
                video(2, "clipB.mp4"),
                image(1, "img.png"),
            ],
            &[3],
            t0,
        );
        st.assign_image(3, Path::new("img.png")).unwrap();

        let mut now = t0;
        for _ in 0..200 {
            for src in st.registry().snapshot() {
                src.advance();
            }
            now += Duration::from_millis(100);
            sched.tick(&mut st, now);
            let gated_visible = (0..3)
                .filter(|i| sched.frame_for(*i, &st).is_some())
                .count();
            assert!(gated_visible <= 1);
            assert!(sched.frame_for(3, &st).is_some());
        }
    }

    #[test]
    fn switching_to_concurrent_lifts_gating() {
        let mut st = stage(2);
        st.assign_video(1, Path::new("clipB.mp4"), false).unwrap();
        let t0 = Instant::now();
        let mut sched = sequential(&mut st, vec![video(0, "clipA.mp4")], &[], t0);
        for i in 0..2 {
            st.video(i).unwrap().advance();
        }
        decode_to_end(&st, 0);
        assert!(sched.frame_for(1, &st).is_none());

        sched.set_mode(PlaybackMode::Concurrent, &mut st, t0);
        for i in 0..2 {
            let src = st.video(i).unwrap();
            let t = src.transport();
            assert!(t.playing && t.looping && !t.finished);
            src.advance();
            assert!(sched.frame_for(i, &st).is_some());
        }
        // Looping sources never finish.
        for _ in 0..20 {
            st.video(0).unwrap().advance();
            assert!(!st.video(0).unwrap().is_finished());
        }
        assert!(!sched.tick(&mut st, t0 + Duration::from_secs(100)));
    }

    #[test]
    fn removing_surface_shifts_playlist() {
        let mut st = stage(3);
        let t0 = Instant::now();
        let mut sched = sequential(
            &mut st,
            vec![image(0, "img.png"), image(1, "img.png"), image(2, "img.png")],
            &[1, 2],
            t0,
        );
        st.remove_surface(1).unwrap();
        sched.on_surface_removed(1, &mut st, t0);
        let indices: Vec<_> = sched.playlist().iter().map(|s| s.surface_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(sched.continuous().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(sched.cursor(), 0);
    }

    #[test]
    fn set_playlist_drops_stale_entries() {
        let mut st = stage(1);
        let t0 = Instant::now();
        let sched = sequential(&mut st, vec![image(0, "img.png"), image(4, "img.png")], &[7], t0);
        assert_eq!(sched.playlist().len(), 1);
        assert!(sched.continuous().is_empty());
    }

    #[test]
    fn playlist_edits_reset_to_start() {
        let mut st = stage(2);
        let t0 = Instant::now();
        let mut sched = sequential(&mut st, vec![image(0, "img.png"), image(1, "img.png")], &[], t0);
        sched.tick(&mut st, t0 + Duration::from_secs(6));
        assert_eq!(sched.cursor(), 1);

        sched.append_step(video(1, "clipA.mp4"), &mut st, t0).unwrap();
        assert_eq!(sched.cursor(), 0);
        assert_eq!(sched.playlist().len(), 3);

        sched.move_step(2, true, &mut st, t0).unwrap();
        assert_eq!(sched.playlist()[1].media_kind, MediaKind::Video);
        assert!(sched.move_step(0, true, &mut st, t0).is_err());
        assert!(sched.move_step(2, false, &mut st, t0).is_err());

        sched.remove_step(1, &mut st, t0).unwrap();
        assert_eq!(sched.playlist().len(), 2);
        assert!(sched.remove_step(5, &mut st, t0).is_err());

        sched.toggle_continuous(1, &mut st, t0).unwrap();
        assert!(sched.continuous().contains(&1));
        sched.toggle_continuous(1, &mut st, t0).unwrap();
        assert!(sched.continuous().is_empty());
        assert!(sched.toggle_continuous(9, &mut st, t0).is_err());
        assert!(sched.append_step(image(9, "img.png"), &mut st, t0).is_err());
    }

    #[test]
    fn disabled_source_does_not_stall_sequence() {
        let mut st = stage(2);
        let t0 = Instant::now();
        let mut sched = sequential(
            &mut st,
            vec![video(0, "clipA.mp4"), image(1, "img.png")],
            &[],
            t0,
        );
        st.video(0).unwrap().disable();
        assert!(sched.tick(&mut st, t0));
        assert_eq!(sched.cursor(), 1);
    }

    #[test]
    fn same_path_is_not_reopened() {
        let mut st = stage(1);
        let t0 = Instant::now();
        let mut sched = sequential(&mut st, vec![video(0, "clipA.mp4")], &[], t0);
        let first = st.video(0).unwrap();
        decode_to_end(&st, 0);
        assert!(sched.tick(&mut st, t0));
        let again = st.video(0).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &again));
        assert!(again.transport().playing);
    }
}
