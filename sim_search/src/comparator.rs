//! The comparable/comparator pair: a comparable is the parsed form of an
//! input record, a comparator is the similarity-capable view of it.

use std::fmt;

use crate::data::{Fingerprint, ItemRecord};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorKind {
    Tanimoto,
    MaxTanimoto,
}

impl fmt::Display for ComparatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComparatorKind::Tanimoto => write!(f, "tanimoto"),
            ComparatorKind::MaxTanimoto => write!(f, "max-tanimoto"),
        }
    }
}

/// Pairwise similarity between two values of the same concrete kind.
///
/// A comparator only has to support its own kind; comparing mismatched
/// kinds is reported as `Error::IncompatibleComparators` and is fatal for
/// the run that triggered it.
pub trait SimComparator: Send + Sync {
    fn similarity(&self, other: &Self) -> Result<f64, Error>;

    /// Thresholded similarity. Implementations may return 0 without
    /// computing the exact value when it is provably below `min_sim`.
    fn similarity_above(&self, other: &Self, min_sim: f64) -> Result<f64, Error> {
        let _ = min_sim;
        return self.similarity(other);
    }
}

/// The closed set of fingerprint comparator kinds.
#[derive(Debug, Clone)]
pub enum FpComparator {
    Tanimoto(Fingerprint),
    MaxTanimoto(Fingerprint),
}

impl FpComparator {
    pub fn kind(&self) -> ComparatorKind {
        match self {
            FpComparator::Tanimoto(_) => ComparatorKind::Tanimoto,
            FpComparator::MaxTanimoto(_) => ComparatorKind::MaxTanimoto,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            FpComparator::Tanimoto(fp) => fp,
            FpComparator::MaxTanimoto(fp) => fp,
        }
    }

    fn mismatch(&self, other: &FpComparator) -> Error {
        return Error::IncompatibleComparators {
            left: self.kind(),
            right: other.kind(),
        };
    }
}

impl SimComparator for FpComparator {
    fn similarity(&self, other: &Self) -> Result<f64, Error> {
        match (self, other) {
            (FpComparator::Tanimoto(a), FpComparator::Tanimoto(b)) => Ok(a.tanimoto(b)),
            (FpComparator::MaxTanimoto(a), FpComparator::MaxTanimoto(b)) => Ok(a.max_tanimoto(b)),
            _ => Err(self.mismatch(other)),
        }
    }

    fn similarity_above(&self, other: &Self, min_sim: f64) -> Result<f64, Error> {
        match (self, other) {
            (FpComparator::Tanimoto(a), FpComparator::Tanimoto(b)) => {
                Ok(a.tanimoto_with_min(b, min_sim))
            }
            // no early out known for the size-corrected form
            (FpComparator::MaxTanimoto(a), FpComparator::MaxTanimoto(b)) => Ok(a.max_tanimoto(b)),
            _ => Err(self.mismatch(other)),
        }
    }
}

/// Creates comparables from raw records and comparators from comparables.
///
/// Both steps are fallible; any resources a factory acquires are released
/// when it is dropped.
pub trait ComparatorFactory: Send + Sync {
    type Comparable;
    type Comparator: SimComparator;

    fn create_comparable(&self, record: &ItemRecord) -> Result<Self::Comparable, Error>;

    fn create_comparator(&self, comparable: &Self::Comparable) -> Result<Self::Comparator, Error>;
}

/// Factory for the fingerprint kinds; `use_max_tanimoto` selects the
/// size-corrected similarity for every comparator it creates.
pub struct FpComparatorFactory {
    pub use_max_tanimoto: bool,
}

impl FpComparatorFactory {
    pub fn new(use_max_tanimoto: bool) -> Self {
        return Self { use_max_tanimoto };
    }
}

impl ComparatorFactory for FpComparatorFactory {
    type Comparable = Fingerprint;
    type Comparator = FpComparator;

    fn create_comparable(&self, record: &ItemRecord) -> Result<Fingerprint, Error> {
        return Fingerprint::from_hex(&record.fp_hex);
    }

    // for fingerprints the comparator is the comparable itself
    fn create_comparator(&self, comparable: &Fingerprint) -> Result<FpComparator, Error> {
        match self.use_max_tanimoto {
            true => Ok(FpComparator::MaxTanimoto(comparable.clone())),
            false => Ok(FpComparator::Tanimoto(comparable.clone())),
        }
    }
}
