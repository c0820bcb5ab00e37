//! Quality assurance over the long-form statistics table.

mod report;
mod rules;

pub use report::{QaFlag, QaReport, QaStatus};
pub use rules::{ExtentRule, NullRateRule, PctSumRule, ValueRangeRule};

use crate::{config::QaConfig, zonal::StatsTable};

/// A self-contained check over a complete statistics table.
pub trait QaRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, stats: &StatsTable) -> Vec<QaFlag>;
}

/// Runs a set of rules; flags never abort the pipeline.
pub struct QaChecker {
    rules: Vec<Box<dyn QaRule>>,
}

impl QaChecker {
    /// The built-in rules configured from `config`.
    pub fn new(config: &QaConfig) -> Self {
        Self::empty()
            .with_rule(ValueRangeRule::new(config.value_ranges.clone()))
            .with_rule(PctSumRule::new(config.pct_sum_tolerance))
            .with_rule(NullRateRule::new(config.null_rate_threshold))
            .with_rule(ExtentRule)
    }

    pub fn empty() -> Self { Self { rules: Vec::new() } }

    pub fn with_rule(mut self, rule: impl QaRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn check(&self, stats: &StatsTable) -> QaReport {
        let mut flags = Vec::new();
        for rule in &self.rules {
            let found = rule.check(stats);
            log::debug!("[qa] {}: {} flags", rule.name(), found.len());
            flags.extend(found);
        }
        let report = QaReport::new(flags);
        let (pass, warn, fail) = report.counts();
        log::info!("[qa] overall {} ({pass} pass, {warn} warn, {fail} fail)", report.overall());
        report
    }
}
