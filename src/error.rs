use thiserror::Error;

/// Failures callers need to tell apart from generic I/O errors.
///
/// Coverage gaps are not errors: they travel as data (see `WindowOutcome`
/// and `Status`). Everything else goes through `anyhow` with context.
#[derive(Debug, Error)]
pub enum EdenError {
    /// Missing or inconsistent configuration for a region or raster.
    #[error("configuration error for {subject}: {detail}")]
    Config { subject: String, detail: String },

    /// Configured region uids that matched no raw boundary feature.
    #[error("no boundary features matched configured regions: {}", uids.join(", "))]
    UnmatchedRegions { uids: Vec<String> },

    /// A single feature whose geometry could not be repaired.
    #[error("geometry repair failed for {feature}: {detail}")]
    GeometryRepair { feature: String, detail: String },
}

impl EdenError {
    pub(crate) fn config(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Config { subject: subject.into(), detail: detail.into() }
    }

    /// True when the error should abort only the affected unit of work.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
