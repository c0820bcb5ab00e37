use std::collections::BTreeMap;

use super::{QaFlag, QaRule, QaStatus};
use crate::{
    config::ValueRange,
    zonal::{Stat, StatsTable, Status},
};

/// Slack below 1 before a bbox counts as partially covered.
const FULL_COVERAGE_EPS: f64 = 1e-9;

/// Values outside their allowed range.
///
/// Built in: `pct` in `[0, 1]`, `count` and `std` non-negative. Configured
/// ranges apply to value-like stats (`mean`, `min`, `max`, quantiles) and are
/// keyed by `source.variable` or by bare variable name.
pub struct ValueRangeRule {
    ranges: BTreeMap<String, ValueRange>,
}

impl ValueRangeRule {
    pub fn new(ranges: BTreeMap<String, ValueRange>) -> Self { Self { ranges } }

    fn range_for(&self, source: &str, variable: &str, stat: Stat) -> Option<ValueRange> {
        match stat {
            Stat::Pct => Some(ValueRange { min: Some(0.0), max: Some(1.0) }),
            Stat::Count | Stat::Std => Some(ValueRange { min: Some(0.0), max: None }),
            Stat::Mean | Stat::Min | Stat::Max | Stat::Median | Stat::Q25 | Stat::Q75 => {
                self.ranges.get(&format!("{source}.{variable}"))
                    .or_else(|| self.ranges.get(variable))
                    .copied()
            }
            Stat::Iqr | Stat::Coverage | Stat::BboxCoverage => None,
        }
    }
}

impl QaRule for ValueRangeRule {
    fn name(&self) -> &str { "value_range" }

    fn check(&self, stats: &StatsTable) -> Vec<QaFlag> {
        let mut checked = BTreeMap::<(&str, &str), usize>::new();
        let mut flags = Vec::new();

        for r in stats.iter().filter(|r| r.status == Status::Ok) {
            let (Some(value), Some(range)) = (r.value, self.range_for(&r.source, &r.variable, r.stat)) else {
                continue;
            };
            let failures = checked.entry((r.source.as_str(), r.variable.as_str())).or_insert(0);
            if !range.contains(value) {
                *failures += 1;
                let category = r.category.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default();
                flags.push(QaFlag::new(
                    Some(&r.region_uid),
                    self.name(),
                    QaStatus::Fail,
                    format!(
                        "{}/{} band {} {}{category} = {value} outside [{}, {}]",
                        r.source, r.variable, r.band, r.stat,
                        range.min.map_or("-inf".into(), |v| v.to_string()),
                        range.max.map_or("inf".into(), |v| v.to_string()),
                    ),
                ));
            }
        }
        for ((source, variable), failures) in checked {
            if failures == 0 {
                flags.push(QaFlag::new(None, self.name(), QaStatus::Pass, format!("{source}/{variable} within range")));
            }
        }
        flags
    }
}

/// Categorical `pct` records of one (region, source, variable, band) must sum to 1.
pub struct PctSumRule {
    tolerance: f64,
}

impl PctSumRule {
    pub fn new(tolerance: f64) -> Self { Self { tolerance } }
}

impl QaRule for PctSumRule {
    fn name(&self) -> &str { "pct_sum" }

    fn check(&self, stats: &StatsTable) -> Vec<QaFlag> {
        let mut sums = BTreeMap::<(&str, &str, &str, &str), f64>::new();
        for r in stats.iter().filter(|r| r.stat == Stat::Pct && r.status == Status::Ok) {
            *sums.entry(r.group()).or_insert(0.0) += r.value.unwrap_or(0.0);
        }
        sums.into_iter().map(|((region, source, variable, band), sum)| {
            let status = if (sum - 1.0).abs() <= self.tolerance { QaStatus::Pass } else { QaStatus::Fail };
            QaFlag::new(
                Some(region),
                self.name(),
                status,
                format!("{source}/{variable} band {band} pct sum {sum:.6} (tolerance {})", self.tolerance),
            )
        }).collect()
    }
}

/// Share of (region, variable, band) groups per source without usable statistics.
pub struct NullRateRule {
    threshold: f64,
}

impl NullRateRule {
    pub fn new(threshold: f64) -> Self { Self { threshold } }
}

impl QaRule for NullRateRule {
    fn name(&self) -> &str { "null_rate" }

    fn check(&self, stats: &StatsTable) -> Vec<QaFlag> {
        let mut groups = BTreeMap::<&str, BTreeMap<(&str, &str, &str), bool>>::new();
        for r in stats.iter() {
            let null = groups.entry(r.source.as_str()).or_default()
                .entry((r.region_uid.as_str(), r.variable.as_str(), r.band.as_str()))
                .or_insert(false);
            *null |= r.status != Status::Ok;
        }

        groups.into_iter().map(|(source, groups)| {
            let nulls = groups.values().filter(|&&null| null).count();
            let rate = nulls as f64 / groups.len() as f64;
            let status = if nulls == 0 {
                QaStatus::Pass
            } else if rate <= self.threshold {
                QaStatus::Warn
            } else {
                QaStatus::Fail
            };
            QaFlag::new(
                None,
                self.name(),
                status,
                format!("{source}: {nulls}/{} groups without coverage ({rate:.3}, threshold {})", groups.len(), self.threshold),
            )
        }).collect()
    }
}

/// Raster windows that do not fully cover a region's bbox.
pub struct ExtentRule;

impl QaRule for ExtentRule {
    fn name(&self) -> &str { "extent" }

    fn check(&self, stats: &StatsTable) -> Vec<QaFlag> {
        let mut worst = BTreeMap::<(&str, &str), f64>::new();
        for r in stats.iter().filter(|r| r.stat == Stat::BboxCoverage) {
            let Some(coverage) = r.value else { continue };
            let entry = worst.entry((r.region_uid.as_str(), r.source.as_str())).or_insert(coverage);
            *entry = entry.min(coverage);
        }

        worst.into_iter().map(|((region, source), coverage)| {
            let status = if coverage <= 0.0 {
                QaStatus::Fail
            } else if coverage < 1.0 - FULL_COVERAGE_EPS {
                QaStatus::Warn
            } else {
                QaStatus::Pass
            };
            QaFlag::new(Some(region), self.name(), status, format!("{source}: bbox coverage {coverage:.4}"))
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{ExtentRule, NullRateRule, PctSumRule, ValueRangeRule};
    use crate::{
        config::ValueRange,
        qa::{QaRule, QaStatus},
        zonal::{Stat, StatsTable, Status, ZonalRecord},
    };

    fn rec(uid: &str, source: &str, stat: Stat, category: Option<&str>, value: Option<f64>, status: Status) -> ZonalRecord {
        ZonalRecord {
            region_uid: uid.into(),
            source: source.into(),
            variable: "v".into(),
            band: "b".into(),
            stat,
            category: category.map(str::to_string),
            value,
            status,
        }
    }

    #[test]
    fn value_range_flags_each_offender_and_passes_clean_variables() {
        let ranges = BTreeMap::from([("v".to_string(), ValueRange { min: Some(0.0), max: None })]);
        let stats = StatsTable::new(vec![
            rec("a", "prism", Stat::Mean, None, Some(-2.0), Status::Ok),
            rec("b", "prism", Stat::Mean, None, Some(3.0), Status::Ok),
            rec("a", "nlcd", Stat::Pct, Some("forest"), Some(0.5), Status::Ok),
        ]);
        let flags = ValueRangeRule::new(ranges).check(&stats);
        let fails = flags.iter().filter(|f| f.status == QaStatus::Fail).collect::<Vec<_>>();
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].region_uid.as_deref(), Some("a"));
        assert!(flags.iter().any(|f| f.status == QaStatus::Pass && f.detail.starts_with("nlcd/v")));
    }

    #[test]
    fn pct_sum_respects_tolerance() {
        let stats = StatsTable::new(vec![
            rec("a", "nlcd", Stat::Pct, Some("x"), Some(0.6), Status::Ok),
            rec("a", "nlcd", Stat::Pct, Some("y"), Some(0.4), Status::Ok),
            rec("b", "nlcd", Stat::Pct, Some("x"), Some(0.6), Status::Ok),
            rec("b", "nlcd", Stat::Pct, Some("y"), Some(0.3), Status::Ok),
        ]);
        let flags = PctSumRule::new(1e-3).check(&stats);
        assert_eq!(flags.len(), 2);
        assert_eq!(flags[0].status, QaStatus::Pass);
        assert_eq!(flags[1].status, QaStatus::Fail);
    }

    #[test]
    fn null_rate_grades_against_threshold() {
        let mut records = (0..10)
            .map(|i| rec(&format!("r{i}"), "prism", Stat::Mean, None, Some(1.0), Status::Ok))
            .collect::<Vec<_>>();
        records.push(rec("gap", "prism", Stat::Coverage, None, None, Status::CoverageGap));
        records.push(rec("gap", "nlcd", Stat::Coverage, None, None, Status::InsufficientCoverage));
        let flags = NullRateRule::new(0.1).check(&StatsTable::new(records));
        let by_source = |s: &str| flags.iter().find(|f| f.detail.starts_with(s)).map(|f| f.status);
        assert_eq!(by_source("prism"), Some(QaStatus::Warn));
        assert_eq!(by_source("nlcd"), Some(QaStatus::Fail));
    }

    #[test]
    fn extent_uses_worst_band_per_region_source() {
        let stats = StatsTable::new(vec![
            rec("a", "s", Stat::BboxCoverage, None, Some(1.0), Status::Ok),
            rec("a", "s", Stat::BboxCoverage, None, Some(0.8), Status::Ok),
            rec("b", "s", Stat::BboxCoverage, None, Some(0.0), Status::CoverageGap),
            rec("c", "s", Stat::BboxCoverage, None, Some(1.0), Status::Ok),
        ]);
        let statuses = ExtentRule.check(&stats).into_iter().map(|f| f.status).collect::<Vec<_>>();
        assert_eq!(statuses, vec![QaStatus::Warn, QaStatus::Fail, QaStatus::Pass]);
    }
}
