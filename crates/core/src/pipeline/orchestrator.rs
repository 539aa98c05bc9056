//! Runs the stage list once per frame at a fixed rate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::pipeline::PipelineStage;
use crate::state::FrameState;
use crate::timing::sleep_until;

const LOG_EVERY: u64 = 100;

/// Clonable handle that ends [`Orchestrator::run_loop`] from any thread,
/// including a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub overruns: u64,
    pub stage_failures: BTreeMap<String, u64>,
    pub last_frame_time: Duration,
}

pub struct Orchestrator {
    stages: Vec<Box<dyn PipelineStage>>,
    state: FrameState,
    target_fps: f64,
    hybrid_pacing: bool,
    started: usize,
    running: Arc<AtomicBool>,
    stats: LoopStats,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>, target_fps: f64, hybrid_pacing: bool) -> Self {
        let target_fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps
        } else {
            log::warn!("Invalid target fps {}, using 50", target_fps);
            50.0
        };

        Self {
            stages,
            state: FrameState::initial(),
            target_fps,
            hybrid_pacing,
            started: 0,
            running: Arc::new(AtomicBool::new(true)),
            stats: LoopStats::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Start every stage in order. On failure the stages already started stay
    /// started until [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<()> {
        while self.started < self.stages.len() {
            let stage = &mut self.stages[self.started];
            log::debug!("Starting stage {}", stage.name());
            if let Err(e) = stage.start() {
                log::error!("Stage '{}' failed to start: {}", stage.name(), e);
                return Err(e);
            }
            self.started += 1;
        }
        log::info!(
            "Pipeline started with {} stages at {} fps",
            self.stages.len(),
            self.target_fps
        );
        Ok(())
    }

    /// Stop started stages in reverse order. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.started == 0 {
            return;
        }
        for stage in self.stages[..self.started].iter_mut().rev() {
            log::debug!("Stopping stage {}", stage.name());
            stage.stop();
        }
        self.started = 0;
        log::info!(
            "Pipeline stopped after {} frames ({} overruns)",
            self.stats.frames,
            self.stats.overruns
        );
    }

    /// Run one frame through every stage.
    ///
    /// A stage that errors leaves the frame as it was before that stage ran;
    /// a failing safety-critical stage also discards the frame's commands.
    pub fn step(&mut self) -> &FrameState {
        let started = Instant::now();
        let mut state = self.state.next_frame();

        for stage in self.stages.iter_mut() {
            let backup = state.clone();
            let stage_started = Instant::now();

            match stage.process(&mut state) {
                Ok(()) => state.record_time(stage.name(), stage_started.elapsed()),
                Err(e) => {
                    state = backup;
                    if stage.safety_critical() {
                        state.fixture_commands.clear();
                    }

                    let failures = self
                        .stats
                        .stage_failures
                        .entry(stage.name().to_string())
                        .or_insert(0);
                    *failures += 1;
                    if *failures % LOG_EVERY == 1 {
                        log::warn!(
                            "Stage '{}' failed ({} times): {:#}",
                            stage.name(),
                            failures,
                            e
                        );
                    }
                }
            }
        }

        self.state = state;
        self.stats.frames += 1;
        self.stats.last_frame_time = started.elapsed();
        &self.state
    }

    /// Start, tick until stopped, then stop. Stages are always stopped, even
    /// when starting fails.
    pub fn run_loop(&mut self) -> Result<()> {
        self.run_until(None)
    }

    /// Like [`run_loop`](Self::run_loop) but also ends at `deadline`.
    pub fn run_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        let result = self.start().map(|_| self.tick_loop(deadline));
        self.stop();
        result
    }

    fn tick_loop(&mut self, deadline: Option<Instant>) {
        let frame_time = Duration::from_secs_f64(1.0 / self.target_fps);

        while self.running.load(Ordering::SeqCst) {
            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                break;
            }

            let frame_started = Instant::now();
            self.step();

            let elapsed = frame_started.elapsed();
            if elapsed < frame_time {
                sleep_until(frame_started + frame_time, self.hybrid_pacing);
            } else {
                self.stats.overruns += 1;
                if self.stats.overruns % LOG_EVERY == 1 {
                    log::warn!(
                        "Frame {} overran: {:.2}ms (budget {:.2}ms)",
                        self.state.frame_number,
                        elapsed.as_secs_f64() * 1000.0,
                        frame_time.as_secs_f64() * 1000.0
                    );
                }
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use prism_fixtures::FixtureType;

    use super::*;
    use crate::error::FatalError;
    use crate::state::FixtureCommand;

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        stopped: AtomicUsize,
        processed: AtomicUsize,
    }

    struct Probe {
        name: &'static str,
        counters: Arc<Counters>,
        fail_start: bool,
    }

    impl PipelineStage for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
            self.counters.processed.fetch_add(1, Ordering::SeqCst);
            state
                .fixture_commands
                .push(FixtureCommand::new(self.name, FixtureType::Panel).with_value(1, 10.0));
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(FatalError::Config("stage refused to start".to_string()).into());
            }
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Broken {
        critical: bool,
    }

    impl PipelineStage for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
            state.director.energy_level = 99.0;
            anyhow::bail!("sensor unplugged")
        }

        fn safety_critical(&self) -> bool {
            self.critical
        }
    }

    fn counting_stage(name: &'static str, counters: &Arc<Counters>) -> Box<dyn PipelineStage> {
        Box::new(Probe {
            name,
            counters: Arc::clone(counters),
            fail_start: false,
        })
    }

    #[test]
    fn test_failed_stage_is_rolled_back() {
        let counters = Arc::new(Counters::default());
        let mut orchestrator = Orchestrator::new(
            vec![
                counting_stage("first", &counters),
                Box::new(Broken { critical: false }),
                counting_stage("second", &counters),
            ],
            50.0,
            true,
        );

        let state = orchestrator.step();
        assert_eq!(state.director.energy_level, 0.0);
        assert_eq!(state.fixture_commands.len(), 2);
        assert!(state.processing_times.contains_key("first"));
        assert!(!state.processing_times.contains_key("broken"));
        assert_eq!(orchestrator.stats().stage_failures.get("broken"), Some(&1));
    }

    #[test]
    fn test_failed_safety_stage_drops_commands() {
        let counters = Arc::new(Counters::default());
        let mut orchestrator = Orchestrator::new(
            vec![counting_stage("first", &counters), Box::new(Broken { critical: true })],
            50.0,
            true,
        );

        let state = orchestrator.step();
        assert!(state.fixture_commands.is_empty());
    }

    #[test]
    fn test_frame_number_advances() {
        let mut orchestrator = Orchestrator::new(vec![], 50.0, false);
        orchestrator.step();
        orchestrator.step();
        assert_eq!(orchestrator.state().frame_number, 2);
        assert_eq!(orchestrator.stats().frames, 2);
    }

    #[test]
    fn test_start_failure_still_stops_started_stages() {
        let counters = Arc::new(Counters::default());
        let failing = Box::new(Probe {
            name: "failing",
            counters: Arc::clone(&counters),
            fail_start: true,
        });
        let mut orchestrator = Orchestrator::new(
            vec![counting_stage("a", &counters), failing, counting_stage("b", &counters)],
            50.0,
            true,
        );

        assert!(orchestrator.run_loop().is_err());
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(counters.processed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_handle_ends_loop() {
        let counters = Arc::new(Counters::default());
        let mut orchestrator = Orchestrator::new(vec![counting_stage("a", &counters)], 100.0, true);
        let handle = orchestrator.stop_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.stop();
        });

        orchestrator.run_loop().unwrap();
        stopper.join().unwrap();

        let frames = orchestrator.stats().frames;
        assert!(frames >= 3, "only {} frames", frames);
        assert!(frames <= 20, "{} frames at 100 fps in ~100ms", frames);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);

        // stopping again is a no-op
        orchestrator.stop();
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_until_deadline() {
        let mut orchestrator = Orchestrator::new(vec![], 200.0, true);
        let started = Instant::now();
        orchestrator
            .run_until(Some(started + Duration::from_millis(50)))
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(orchestrator.stats().frames >= 5);
    }

    #[test]
    fn test_drop_stops_stages() {
        let counters = Arc::new(Counters::default());
        {
            let mut orchestrator = Orchestrator::new(vec![counting_stage("a", &counters)], 50.0, true);
            orchestrator.start().unwrap();
        }
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_fps_falls_back() {
        let orchestrator = Orchestrator::new(vec![], f64::NAN, true);
        assert_eq!(orchestrator.target_fps(), 50.0);
    }
}
