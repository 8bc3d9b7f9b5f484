//! Per-frame telemetry: timings, residual, and command/rebuild counters,
//! exposed to callers through `telemetry_query_frame`. Collection is gated
//! by `ExecPolicy::telemetry` and costs nothing when disabled.

use std::time::Duration;

/// One frame's recorded telemetry: step duration, average per-edge residual,
/// the last structural-rebuild duration and its rolling average, the two
/// lifetime counters, and the substep/iteration counts used this frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryFrame {
    pub step_duration_ms: f32,
    pub residual: f32,
    pub last_rebuild_duration_ms: f32,
    pub rolling_avg_rebuild_duration_ms: f32,
    pub applied_command_counter: u64,
    pub structural_rebuild_counter: u64,
    pub substeps_used: u32,
    pub iterations_used: u32,
}

/// Rolling exponential average: weights the previous average at 0.9 and the
/// new sample at 0.1. Used for `rolling_avg_rebuild_duration_ms` only --
/// this formula applies to rebuild duration, not to per-frame step
/// duration (which is reported as a plain instantaneous value each frame).
pub fn rolling_average(previous: f32, sample: f32) -> f32 {
    0.9 * previous + 0.1 * sample
}

/// Accumulates telemetry across the lifetime of one Solver: the latest
/// frame plus the running rolling average of rebuild duration (which
/// persists across frames that don't themselves trigger a rebuild).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    pub latest: TelemetryFrame,
    has_rebuilt: bool,
}

impl Telemetry {
    /// Records one `step` call's timing, residual, and substep/iteration
    /// counts. Rebuild fields and counters are left untouched -- they are
    /// updated separately by `record_rebuild`/`set_counters` since a
    /// `step` call and a `flush_commands` rebuild are reported
    /// independently within one frame's `step()`.
    pub fn record_step(&mut self, step_duration: Duration, residual: f32, substeps_used: u32, iterations_used: u32) {
        self.latest.step_duration_ms = duration_ms(step_duration);
        self.latest.residual = residual;
        self.latest.substeps_used = substeps_used;
        self.latest.iterations_used = iterations_used;
    }

    /// Records one structural rebuild's duration, updating the rolling
    /// average via the `0.9*avg_prev + 0.1*new` formula above. The first
    /// rebuild seeds the average directly rather than blending against
    /// zero.
    pub fn record_rebuild(&mut self, rebuild_duration: Duration) {
        let ms = duration_ms(rebuild_duration);
        self.latest.rolling_avg_rebuild_duration_ms =
            if self.has_rebuilt { rolling_average(self.latest.rolling_avg_rebuild_duration_ms, ms) } else { ms };
        self.has_rebuilt = true;
        self.latest.last_rebuild_duration_ms = ms;
    }

    /// Updates the two lifetime counters the Solver tracks.
    pub fn set_counters(&mut self, applied_command_counter: u64, structural_rebuild_counter: u64) {
        self.latest.applied_command_counter = applied_command_counter;
        self.latest.structural_rebuild_counter = structural_rebuild_counter;
    }
}

fn duration_ms(d: Duration) -> f32 {
    d.as_secs_f32() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_matches_formula() {
        assert!((rolling_average(10.0, 20.0) - 11.0).abs() < 1e-6);
    }

    #[test]
    fn first_rebuild_seeds_the_rolling_average_directly() {
        let mut t = Telemetry::default();
        t.record_rebuild(Duration::from_millis(5));
        assert!((t.latest.rolling_avg_rebuild_duration_ms - 5.0).abs() < 0.5);
    }

    #[test]
    fn subsequent_rebuilds_blend_with_the_previous_average() {
        let mut t = Telemetry::default();
        t.record_rebuild(Duration::from_secs_f32(0.010));
        t.record_rebuild(Duration::from_secs_f32(0.020));
        assert!((t.latest.rolling_avg_rebuild_duration_ms - 11.0).abs() < 0.5);
    }

    #[test]
    fn record_step_does_not_disturb_rebuild_fields() {
        let mut t = Telemetry::default();
        t.record_rebuild(Duration::from_secs_f32(0.010));
        t.record_step(Duration::from_secs_f32(0.002), 0.5, 2, 8);
        assert!((t.latest.last_rebuild_duration_ms - 10.0).abs() < 0.5);
        assert_eq!(t.latest.substeps_used, 2);
        assert_eq!(t.latest.iterations_used, 8);
        assert!((t.latest.residual - 0.5).abs() < 1e-6);
    }

    #[test]
    fn counters_are_independently_settable() {
        let mut t = Telemetry::default();
        t.set_counters(3, 1);
        assert_eq!(t.latest.applied_command_counter, 3);
        assert_eq!(t.latest.structural_rebuild_counter, 1);
    }
}
