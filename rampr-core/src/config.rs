use std::time::Duration;

use crate::thresholds::Threshold;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    #[must_use]
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Everything the lifecycle runner needs to drive one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub stages: Vec<Stage>,
    pub start_vus: u64,
    /// Scheduler granularity.
    pub tick: Duration,
    /// How long retired VUs may keep running after the last stage before they are aborted.
    pub graceful_stop: Duration,
    /// Run seed; a random one is drawn (and reported) when unset.
    pub seed: Option<u64>,
    pub base_url: String,
    pub thresholds: Vec<Threshold>,
}

impl RunPlan {
    pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
    pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            stages,
            start_vus: 0,
            tick: Self::DEFAULT_TICK,
            graceful_stop: Self::DEFAULT_GRACEFUL_STOP,
            seed: None,
            base_url: base_url.into(),
            thresholds: Vec::new(),
        }
    }

    /// `vus` users for `duration`, no ramp.
    pub fn constant(base_url: impl Into<String>, vus: u64, duration: Duration) -> Self {
        Self {
            start_vus: vus,
            ..Self::new(base_url, vec![Stage::new(duration, vus)])
        }
    }

    #[must_use]
    pub fn with_start_vus(mut self, start_vus: u64) -> Self {
        self.start_vus = start_vus;
        self
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    #[must_use]
    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }

    /// Base URL joined with a path; absolute URLs pass through untouched.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() || self.total_duration().is_zero() {
            return Err(Error::InvalidStages);
        }
        if self.tick.is_zero() {
            return Err(Error::InvalidTick);
        }

        match url::Url::parse(&self.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
            _ => Err(Error::InvalidBaseUrl(self.base_url.clone())),
        }
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_plan_is_a_flat_stage() {
        let plan = RunPlan::constant("http://localhost:8080", 3, Duration::from_secs(30));
        assert_eq!(plan.start_vus, 3);
        assert_eq!(plan.stages, vec![Stage::new(Duration::from_secs(30), 3)]);
        assert_eq!(plan.max_vus(), 3);
        assert_eq!(plan.total_duration(), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_empty_or_zero_length_stages() {
        let plan = RunPlan::new("http://localhost", Vec::new());
        assert!(matches!(plan.validate(), Err(Error::InvalidStages)));

        let plan = RunPlan::new("http://localhost", vec![Stage::new(Duration::ZERO, 5)]);
        assert!(matches!(plan.validate(), Err(Error::InvalidStages)));
    }

    #[test]
    fn validate_rejects_bad_base_url_and_tick() {
        let stages = vec![Stage::new(Duration::from_secs(1), 1)];

        let plan = RunPlan::new("ftp://example.com", stages.clone());
        assert!(matches!(plan.validate(), Err(Error::InvalidBaseUrl(_))));

        let plan = RunPlan::new("http://localhost", stages).with_tick(Duration::ZERO);
        assert!(matches!(plan.validate(), Err(Error::InvalidTick)));
    }

    #[test]
    fn join_url_handles_slashes_and_absolute_urls() {
        assert_eq!(join_url("http://h:1/", "/health"), "http://h:1/health");
        assert_eq!(join_url("http://h:1", "health"), "http://h:1/health");
        assert_eq!(join_url("http://h:1", "https://other/x"), "https://other/x");
        assert_eq!(join_url("http://h:1/", ""), "http://h:1");
    }
}
