//! Transfer progress

use std::fmt;

/// Progress of a transfer.
///
/// `Fraction(1.0)` means all bytes have moved, not that the transfer is done;
/// completion is signalled by the transfer's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Length not announced
    Indeterminate,
    /// Fraction of bytes moved, in `[0.0, 1.0]`
    Fraction(f32),
}

impl Progress {
    /// Progress for `done` bytes out of an optional `total`
    #[must_use]
    pub fn from_counts(done: u64, total: Option<u64>) -> Self {
        match total {
            None => Progress::Indeterminate,
            Some(0) => Progress::Fraction(1.0),
            Some(total) => Progress::Fraction((done as f64 / total as f64).clamp(0.0, 1.0) as f32),
        }
    }

    /// The fraction, if known
    #[must_use]
    pub fn fraction(&self) -> Option<f32> {
        match self {
            Progress::Indeterminate => None,
            Progress::Fraction(f) => Some(*f),
        }
    }

    /// Returns true if the length is unknown
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Progress::Indeterminate)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => write!(f, "--"),
            Progress::Fraction(fraction) => write!(f, "{:.1}%", fraction * 100.0),
        }
    }
}
