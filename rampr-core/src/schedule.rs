use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// 0-based stage index.
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear target concurrency over elapsed run time.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

struct Position {
    index: usize,
    stage_start: Duration,
    stage_end: Duration,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn start_target_of(&self, index: usize) -> u64 {
        match index.checked_sub(1) {
            Some(prev) => self.stages.get(prev).map_or(self.start, |s| s.target),
            None => self.start,
        }
    }

    /// Stage containing `elapsed` (clamped to the last stage). Stage ends are exclusive except
    /// for the final one.
    fn locate(&self, elapsed: Duration) -> Option<Position> {
        if self.stages.is_empty() {
            return None;
        }

        let last = self.stages.len() - 1;
        let index = self
            .cumulative_ends
            .partition_point(|end| *end <= elapsed)
            .min(last);

        let stage_end = self.cumulative_ends.get(index).copied()?;
        let stage_start = match index.checked_sub(1) {
            Some(prev) => self.cumulative_ends.get(prev).copied()?,
            None => Duration::ZERO,
        };

        Some(Position {
            index,
            stage_start,
            stage_end,
        })
    }

    /// Linear interpolation inside the active stage; the last target holds after the final stage.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(pos) = self.locate(elapsed) else {
            return self.start;
        };

        if elapsed >= self.total_duration() {
            return self.stages.last().map_or(self.start, |s| s.target);
        }

        let start_target = self.start_target_of(pos.index);
        let end_target = self
            .stages
            .get(pos.index)
            .map_or(start_target, |s| s.target);

        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }
        let stage_elapsed = elapsed.saturating_sub(pos.stage_start);

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + delta.saturating_mul(num) / den.max(1);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let clamped = elapsed.min(self.total_duration());
        let pos = self.locate(clamped)?;

        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        let stage_elapsed = clamped.saturating_sub(pos.stage_start);
        let start_target = self.start_target_of(pos.index);

        Some(StageSnapshot {
            index: pos.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target: self
                .stages
                .get(pos.index)
                .map_or(start_target, |s| s.target),
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ramp_up_down() -> RampSchedule {
        RampSchedule::new(
            0,
            vec![Stage::new(secs(10), 10), Stage::new(secs(10), 0)],
        )
    }

    #[test]
    fn target_interpolates_linearly_within_a_stage() {
        let s = ramp_up_down();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(5)), 5);
        assert_eq!(s.target_at(secs(10)), 10);
        assert_eq!(s.target_at(secs(15)), 5);
        // Ramp-down truncates toward the previous target.
        assert_eq!(s.target_at(Duration::from_millis(19_999)), 1);
    }

    #[test]
    fn target_holds_last_value_after_final_stage() {
        let s = RampSchedule::new(2, vec![Stage::new(secs(1), 7)]);
        assert_eq!(s.target_at(secs(1)), 7);
        assert_eq!(s.target_at(secs(100)), 7);
        assert!(s.is_done(secs(1)));
        assert!(!s.is_done(Duration::from_millis(999)));
    }

    #[test]
    fn zero_length_stage_jumps_to_its_target() {
        let s = RampSchedule::new(
            0,
            vec![Stage::new(Duration::ZERO, 4), Stage::new(secs(2), 4)],
        );
        assert_eq!(s.target_at(Duration::ZERO), 4);
        assert_eq!(s.target_at(secs(1)), 4);
    }

    #[test]
    fn empty_schedule_stays_at_start() {
        let s = RampSchedule::new(3, Vec::new());
        assert_eq!(s.target_at(secs(5)), 3);
        assert!(s.stage_snapshot_at(secs(5)).is_none());
        assert_eq!(s.total_duration(), Duration::ZERO);
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = ramp_up_down();
        let snap = s
            .stage_snapshot_at(secs(12))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_elapsed, secs(2));
        assert_eq!(snap.stage_remaining, secs(8));
        assert_eq!(snap.start_target, 10);
        assert_eq!(snap.end_target, 0);
        assert_eq!(snap.current_target, 8);

        let end = s
            .stage_snapshot_at(secs(30))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 1);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 0);
    }
}
