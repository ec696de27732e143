use std::fs::File;
use std::io::prelude::*;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Settings for a nearest-neighbor run, streaming or matrix.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NnConfig {
    pub n_workers: usize,
    pub max_neighbors: usize,
    pub min_similarity: f64,
    /// When set, additionally count the candidates at or above this
    /// similarity for every query.
    pub count_above_similarity: Option<f64>,
    /// Emit a result record even when no neighbor was retained.
    pub print_all: bool,
    pub use_max_tanimoto: bool,
}

impl NnConfig {
    pub fn default() -> Self {
        return Self {
            n_workers: 4,
            max_neighbors: 1,
            min_similarity: 0.0,
            count_above_similarity: None,
            print_all: false,
            use_max_tanimoto: false,
        };
    }

    pub fn from_file(filename: &str) -> Result<Self, Error> {
        let serialized = std::fs::read_to_string(filename)?;

        let deserialized: Self = serde_yaml::from_str(&serialized)
            .map_err(|e| Error::Config(format!("{}: {}", filename, e)))?;

        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &str) -> Result<(), Error> {
        let serialized = serde_yaml::to_string(&self)
            .map_err(|e| Error::Config(format!("{}", e)))?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;
        return Ok(());
    }
}

/// Settings for a sphere-exclusion run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SphereConfig {
    /// Candidates with similarity >= radius are members of the sphere.
    pub radius: f64,
    /// Scan centroids newest first. Faster when consecutive input records
    /// are similar; first-added-first assigns to the earliest centroid.
    pub reverse_match: bool,
    /// Record membership against every matching centroid, not only the
    /// first. A candidate can then be emitted several times.
    pub record_all_matches: bool,
    /// Emit member records, not only new centroids.
    pub print_all: bool,
    pub use_max_tanimoto: bool,
}

impl SphereConfig {
    pub fn default() -> Self {
        return Self {
            radius: 0.8,
            reverse_match: true,
            record_all_matches: false,
            print_all: false,
            use_max_tanimoto: false,
        };
    }

    pub fn from_file(filename: &str) -> Result<Self, Error> {
        let serialized = std::fs::read_to_string(filename)?;

        let deserialized: Self = serde_yaml::from_str(&serialized)
            .map_err(|e| Error::Config(format!("{}: {}", filename, e)))?;

        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &str) -> Result<(), Error> {
        let serialized = serde_yaml::to_string(&self)
            .map_err(|e| Error::Config(format!("{}", e)))?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nn_config_file_round_trip() {
        let mut config = NnConfig::default();
        config.max_neighbors = 25;
        config.min_similarity = 0.35;
        config.count_above_similarity = Some(0.7);

        let filename = "/tmp/sim_search_nn_config.yaml";
        config.to_file(filename).unwrap();
        let read_back = NnConfig::from_file(filename).unwrap();

        assert_eq!(read_back.max_neighbors, 25);
        assert_eq!(read_back.min_similarity, 0.35);
        assert_eq!(read_back.count_above_similarity, Some(0.7));
        assert_eq!(read_back.print_all, false);
    }

    #[test]
    fn sphere_config_file_round_trip() {
        let mut config = SphereConfig::default();
        config.radius = 0.65;
        config.record_all_matches = true;

        let filename = "/tmp/sim_search_sphere_config.yaml";
        config.to_file(filename).unwrap();
        let read_back = SphereConfig::from_file(filename).unwrap();

        assert_eq!(read_back.radius, 0.65);
        assert!(read_back.record_all_matches);
        assert!(read_back.reverse_match);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(NnConfig::from_file("/tmp/does_not_exist_anywhere.yaml").is_err());
    }
}
