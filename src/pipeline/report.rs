use std::{fmt, time::Duration};

use crate::{
    qa::{QaReport, QaStatus},
    raster::{CoverageGap, GapReason},
    region::DroppedFeature,
};

/// A region x raster unit that was aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub region_uid: String,
    /// `source/variable` of the raster.
    pub raster: String,
    /// True when the cause is a configuration error.
    pub config: bool,
    pub message: String,
}

/// End-of-run summary of everything that did not go to plan.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub regions: usize,
    pub rasters: usize,
    pub dropped: Vec<DroppedFeature>,
    /// `(region_uid, gap)` pairs.
    pub gaps: Vec<(String, CoverageGap)>,
    pub failures: Vec<UnitFailure>,
    pub qa_overall: QaStatus,
    /// `(pass, warn, fail)` flag counts.
    pub qa_counts: (usize, usize, usize),
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(regions: usize, rasters: usize) -> Self {
        Self { regions, rasters, ..Self::default() }
    }

    pub(crate) fn record_qa(&mut self, qa: &QaReport) {
        self.qa_overall = qa.overall();
        self.qa_counts = qa.counts();
    }

    /// True when every unit completed (gaps and QA flags are not failures).
    pub fn is_success(&self) -> bool { self.failures.is_empty() }

    pub fn headline(&self) -> String {
        format!(
            "{} regions x {} rasters in {:.1?}: {} gaps, {} failed units, {} dropped features, QA {}",
            self.regions, self.rasters, self.elapsed,
            self.gaps.len(), self.failures.len(), self.dropped.len(), self.qa_overall,
        )
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        for d in &self.dropped {
            writeln!(f, "  dropped  {} ({} feature #{}): {}", d.uid, d.source, d.index, d.reason)?;
        }
        for (uid, gap) in &self.gaps {
            let reason = match gap.reason {
                GapReason::NoOverlap => "no overlap",
                GapReason::Timeout => "timeout",
            };
            writeln!(f, "  gap      {uid} x {}/{}: {reason}", gap.source, gap.variable)?;
        }
        for failure in &self.failures {
            let kind = if failure.config { "config" } else { "error" };
            writeln!(f, "  failed   {} x {} [{kind}]: {}", failure.region_uid, failure.raster, failure.message)?;
        }
        let (pass, warn, fail) = self.qa_counts;
        writeln!(f, "  qa       {pass} pass, {warn} warn, {fail} fail")
    }
}

#[cfg(test)]
mod tests {
    use super::{RunReport, UnitFailure};
    use crate::raster::{CoverageGap, GapReason};

    #[test]
    fn summary_lists_gaps_and_failures() {
        let mut report = RunReport::new(2, 1);
        report.gaps.push(("a".into(), CoverageGap {
            source: "s".into(),
            variable: "v".into(),
            bands: vec!["1".into()],
            reason: GapReason::Timeout,
            detail: String::new(),
        }));
        report.failures.push(UnitFailure {
            region_uid: "b".into(),
            raster: "s/v".into(),
            config: true,
            message: "missing crs".into(),
        });
        let text = report.to_string();
        assert!(!report.is_success());
        assert!(text.contains("gap      a x s/v: timeout"));
        assert!(text.contains("failed   b x s/v [config]: missing crs"));
    }
}
