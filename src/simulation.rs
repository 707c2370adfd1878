use airborne_core::config::SimulationConfig;
use airborne_plugin_api::{PluginContext, PluginLoader};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Fixed-timestep driver: physics ticks at `physics_hz`, the message bus is
/// drained once per frame.
pub struct Simulation {
    loader: PluginLoader,
    context: PluginContext,
    config: SimulationConfig,
    physics_dt: Duration,
    accumulator: Duration,
    ticks: u64,
    frames: u64,
    paused: bool,
}

impl Simulation {
    pub fn new(loader: PluginLoader, context: PluginContext, config: SimulationConfig) -> Self {
        Self {
            physics_dt: config.physics_dt(),
            loader,
            context,
            config,
            accumulator: Duration::ZERO,
            ticks: 0,
            frames: 0,
            paused: false,
        }
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Physics ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pause(&mut self) {
        self.paused = true;
        info!("Simulation paused");
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.accumulator = Duration::ZERO;
        info!("Simulation resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advances the simulation by `elapsed` wall-clock time. Returns the
    /// number of physics ticks executed.
    pub fn frame(&mut self, elapsed: Duration) -> u32 {
        self.frames += 1;
        if self.paused {
            return 0;
        }

        self.accumulator += elapsed;
        let max_accumulator = self.physics_dt * self.config.max_catch_up_steps;
        if self.accumulator > max_accumulator {
            warn!(
                "Physics accumulator clamped: {:.3}s",
                self.accumulator.as_secs_f64()
            );
            self.accumulator = max_accumulator;
        }

        let mut steps = 0;
        while self.accumulator >= self.physics_dt {
            self.loader.update_all(self.physics_dt.as_secs_f64());
            self.accumulator -= self.physics_dt;
            self.ticks += 1;
            steps += 1;
        }

        self.context
            .message_bus()
            .process(self.config.max_messages_per_tick);
        steps
    }

    /// Runs real-time frames until `max_ticks` physics ticks have executed,
    /// or forever without a limit.
    pub fn run(&mut self, max_ticks: Option<u64>) {
        let frame_time = self.config.frame_time();
        let mut last = Instant::now();

        info!(
            "Simulation started: {} Hz physics, {} fps target",
            self.config.physics_hz, self.config.target_fps
        );

        loop {
            let now = Instant::now();
            self.frame(now - last);
            last = now;

            if max_ticks.is_some_and(|max| self.ticks >= max) {
                break;
            }

            if let Some(remaining) = frame_time.checked_sub(last.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        info!(
            "Simulation stopped after {} ticks ({} frames)",
            self.ticks, self.frames
        );
    }

    /// Unloads every plugin and drops anything left on the bus.
    pub fn shutdown(&mut self) {
        self.loader.shutdown_all();
        let bus = self.context.message_bus();
        let pending = bus.pending_count();
        if pending > 0 {
            info!("Discarding {} undelivered messages", pending);
        }
        bus.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_plugins;
    use airborne_core::ConfigTree;

    fn simulation() -> Simulation {
        let context = PluginContext::standalone(ConfigTree::new());
        let mut loader = PluginLoader::new(demo_plugins::catalog());
        loader.discover_catalog();
        loader
            .load_all(&["annunciator"], &context)
            .expect("demo plugins load");
        Simulation::new(loader, context, SimulationConfig::default())
    }

    #[test]
    fn test_fixed_timestep_accumulates() {
        let mut sim = simulation();
        let dt = sim.config.physics_dt();

        assert_eq!(sim.frame(dt / 2), 0);
        assert_eq!(sim.frame(dt / 2 + Duration::from_micros(1)), 1);
        assert_eq!(sim.frame(dt * 2), 2);
        assert_eq!(sim.ticks(), 3);
        assert_eq!(sim.frames(), 3);
    }

    #[test]
    fn test_accumulator_is_clamped() {
        let mut sim = simulation();
        let steps = sim.frame(Duration::from_secs(10));
        assert_eq!(steps, sim.config.max_catch_up_steps);
    }

    #[test]
    fn test_paused_simulation_does_not_tick() {
        let mut sim = simulation();
        sim.pause();
        assert_eq!(sim.frame(Duration::from_secs(1)), 0);
        sim.resume();
        assert!(!sim.is_paused());
        assert_eq!(sim.ticks(), 0);
    }

    #[test]
    fn test_run_stops_after_tick_limit() {
        let mut sim = simulation();
        sim.run(Some(3));
        assert!(sim.ticks() >= 3);

        sim.shutdown();
        assert!(sim.loader().list_loaded().is_empty());
        assert_eq!(sim.context().message_bus().pending_count(), 0);
    }
}
