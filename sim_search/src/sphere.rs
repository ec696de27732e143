//! Greedy sphere-exclusion clustering.
//!
//! Records are processed strictly in input order: each one is compared
//! against the existing centroids and becomes a member of the first one
//! within the similarity radius, or a new centroid if none is. Later
//! assignments depend on which centroids exist when a record arrives, so
//! this never runs on more than one thread.

use std::io::Write;
use std::sync::{Arc, Mutex};

use log::info;
use serde::Serialize;

use crate::comparator::{ComparatorFactory, SimComparator};
use crate::config::SphereConfig;
use crate::error::Error;
use crate::io::{RecordSource, ThreadedLineWriter};

/// One emitted assignment. New centroids always produce a record; members
/// are emitted depending on the output flags, and with
/// `record_all_matches` the same item appears once per matching centroid,
/// `match_ordinal` counting its matches so far (0 for new centroids).
#[derive(Debug, Clone, Serialize)]
pub struct SphereAssignment {
    pub item_idx: usize,
    pub item_id: Option<String>,
    pub sphere_idx: usize,
    pub max_sim: f64,
    pub is_centroid: bool,
    pub match_ordinal: usize,
}

impl SphereAssignment {
    pub fn to_json(&self) -> String {
        return serde_json::to_string(self).unwrap();
    }
}

/// Counters for one clustering pass. `excluded` counts matches, not items:
/// with `record_all_matches` one item can add several.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereSummary {
    pub read: usize,
    pub included: usize,
    pub excluded: usize,
}

pub trait SphereConsumer {
    fn consume(&self, assignment: SphereAssignment);

    fn close(&self) {}
}

impl<T: SphereConsumer + ?Sized> SphereConsumer for Arc<T> {
    fn consume(&self, assignment: SphereAssignment) {
        (**self).consume(assignment);
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Collects assignments into a vector, for aggregation and tests.
pub struct CollectSphereConsumer {
    assignments: Mutex<Vec<SphereAssignment>>,
}

impl CollectSphereConsumer {
    pub fn new() -> Self {
        return Self {
            assignments: Mutex::new(Vec::new()),
        };
    }

    pub fn take_assignments(&self) -> Vec<SphereAssignment> {
        return std::mem::take(&mut *self.assignments.lock().unwrap());
    }
}

impl SphereConsumer for CollectSphereConsumer {
    fn consume(&self, assignment: SphereAssignment) {
        self.assignments.lock().unwrap().push(assignment);
    }
}

/// Writes one tab-separated line per assignment.
pub struct TabSphereConsumer {
    writer: ThreadedLineWriter,
}

impl TabSphereConsumer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        let writer = ThreadedLineWriter::new(out);
        writer.println("item_idx\tsphere_idx\tmax_sim\tis_centroid".to_string());

        return Self { writer };
    }
}

impl SphereConsumer for TabSphereConsumer {
    fn consume(&self, assignment: SphereAssignment) {
        self.writer.println(format!(
            "{}\t{}\t{:.3}\t{}",
            assignment.item_idx, assignment.sphere_idx, assignment.max_sim, assignment.is_centroid
        ));
    }

    fn close(&self) {
        self.writer.close();
    }
}

/// The clusterer itself. Centroids are append-only for the lifetime of the
/// run; their index is their creation order.
pub struct SphereExclusion<F: ComparatorFactory> {
    factory: F,
    consumer: Box<dyn SphereConsumer>,
    radius: f64,
    reverse_match: bool,
    record_all_matches: bool,
    print_all: bool,
    centroids: Vec<F::Comparator>,
    read_count: usize,
    included_count: usize,
    excluded_count: usize,
}

impl<F: ComparatorFactory> SphereExclusion<F> {
    pub fn new(factory: F, consumer: Box<dyn SphereConsumer>, config: &SphereConfig) -> Self {
        return Self {
            factory,
            consumer,
            radius: config.radius,
            reverse_match: config.reverse_match,
            record_all_matches: config.record_all_matches,
            print_all: config.print_all,
            centroids: Vec::with_capacity(2000),
            read_count: 0,
            included_count: 0,
            excluded_count: 0,
        };
    }

    /// Pre-loads centroids from a reference source. They occupy the lowest
    /// sphere indices and produce no output records.
    pub fn seed_reference(&mut self, source: &mut dyn RecordSource) -> Result<usize, Error> {
        let mut seeded = 0usize;
        while let Some(record) = source.read_next()? {
            let comparable = self.factory.create_comparable(&record)?;
            self.centroids.push(self.factory.create_comparator(&comparable)?);
            seeded += 1;
        }
        info!("{} reference centroids read", seeded);

        return Ok(seeded);
    }

    pub fn centroid_count(&self) -> usize {
        return self.centroids.len();
    }

    pub fn close(&self) {
        self.consumer.close();
    }

    /// Clusters every record of `source` in order.
    pub fn run(&mut self, source: &mut dyn RecordSource) -> Result<SphereSummary, Error> {
        self.read_count = 0;
        self.included_count = 0;
        self.excluded_count = 0;

        while let Some(record) = source.read_next()? {
            let item_idx = self.read_count;
            self.read_count += 1;

            let comparable = self.factory.create_comparable(&record)?;
            let current = self.factory.create_comparator(&comparable)?;
            let item_id = record.identifier.as_ref().map(|id| id.to_string());

            let mut max_sim = -1.0f64;
            let mut match_count = 0usize;

            let n = self.centroids.len();
            // newest-first is usually faster since consecutive input records
            // tend to be similar; oldest-first assigns to the earliest
            // matching centroid
            let scan: Box<dyn Iterator<Item = usize>> = match self.reverse_match {
                true => Box::new((0..n).rev()),
                false => Box::new(0..n),
            };

            for cent_idx in scan {
                let sim = self.centroids[cent_idx].similarity(&current)?;
                if sim > max_sim {
                    max_sim = sim;
                }

                if sim >= self.radius {
                    self.excluded_count += 1;
                    match_count += 1;

                    let assignment = SphereAssignment {
                        item_idx,
                        item_id: item_id.clone(),
                        sphere_idx: cent_idx,
                        max_sim,
                        is_centroid: false,
                        match_ordinal: match_count,
                    };

                    match self.record_all_matches {
                        true => {
                            self.consumer.consume(assignment);
                        }
                        false => {
                            // single-cluster assignment: stop at the first hit
                            if self.print_all {
                                self.consumer.consume(assignment);
                            }
                            break;
                        }
                    }
                }
            }

            if match_count == 0 {
                // not inside any sphere: this record anchors a new one
                let sphere_idx = self.centroids.len();
                self.consumer.consume(SphereAssignment {
                    item_idx,
                    item_id,
                    sphere_idx,
                    max_sim: 1.0,
                    is_centroid: true,
                    match_ordinal: 0,
                });

                self.centroids.push(current);
                self.included_count += 1;
            }
        }

        let summary = SphereSummary {
            read: self.read_count,
            included: self.included_count,
            excluded: self.excluded_count,
        };
        info!(
            "sphere exclusion: read {} records, {} included, {} excluded",
            summary.read, summary.included, summary.excluded
        );

        return Ok(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ItemIdentifier, ItemRecord};
    use crate::io::VecSource;
    use assert_approx_eq::assert_approx_eq;

    #[derive(Clone)]
    struct TableComparator {
        idx: usize,
        table: Arc<Vec<Vec<f64>>>,
    }

    impl SimComparator for TableComparator {
        fn similarity(&self, other: &Self) -> Result<f64, Error> {
            return Ok(self.table[self.idx][other.idx]);
        }
    }

    struct TableFactory {
        table: Arc<Vec<Vec<f64>>>,
    }

    impl ComparatorFactory for TableFactory {
        type Comparable = usize;
        type Comparator = TableComparator;

        fn create_comparable(&self, record: &ItemRecord) -> Result<usize, Error> {
            return record
                .fp_hex
                .parse::<usize>()
                .map_err(|e| Error::Input(format!("{}", e)));
        }

        fn create_comparator(&self, comparable: &usize) -> Result<TableComparator, Error> {
            return Ok(TableComparator {
                idx: *comparable,
                table: Arc::clone(&self.table),
            });
        }
    }

    fn table_record(idx: usize, id: &str) -> ItemRecord {
        return ItemRecord::new(idx.to_string(), Some(ItemIdentifier::from_str(id)));
    }

    fn clusterer(
        table: Arc<Vec<Vec<f64>>>,
        config: &SphereConfig,
    ) -> (SphereExclusion<TableFactory>, Arc<CollectSphereConsumer>) {
        let consumer = Arc::new(CollectSphereConsumer::new());
        let clusterer = SphereExclusion::new(
            TableFactory { table },
            Box::new(Arc::clone(&consumer)),
            config,
        );
        return (clusterer, consumer);
    }

    #[test]
    fn single_item_becomes_the_only_centroid() {
        for radius in [0.0, 0.4, 1.0] {
            let table = Arc::new(vec![vec![1.0]]);
            let mut config = SphereConfig::default();
            config.radius = radius;

            let (mut clusterer, consumer) = clusterer(table, &config);
            let summary = clusterer
                .run(&mut VecSource::new(vec![table_record(0, "ONLY")]))
                .unwrap();

            assert_eq!(
                summary,
                SphereSummary {
                    read: 1,
                    included: 1,
                    excluded: 0
                }
            );
            assert_eq!(clusterer.centroid_count(), 1);

            let assignments = consumer.take_assignments();
            assert_eq!(assignments.len(), 1);
            assert!(assignments[0].is_centroid);
            assert_eq!(assignments[0].sphere_idx, 0);
        }
    }

    #[test]
    fn radius_080_scenario() {
        // sim(X,Y) = 0.85, sim(X,Z) = 0.3, sim(Y,Z) = 0.3
        let table = Arc::new(vec![
            vec![1.0, 0.85, 0.3],
            vec![0.85, 1.0, 0.3],
            vec![0.3, 0.3, 1.0],
        ]);

        let mut config = SphereConfig::default();
        config.radius = 0.8;
        config.reverse_match = true;
        config.print_all = true;

        let (mut clusterer, consumer) = clusterer(table, &config);
        let summary = clusterer
            .run(&mut VecSource::new(vec![
                table_record(0, "X"),
                table_record(1, "Y"),
                table_record(2, "Z"),
            ]))
            .unwrap();

        assert_eq!(
            summary,
            SphereSummary {
                read: 3,
                included: 2,
                excluded: 1
            }
        );
        assert_eq!(clusterer.centroid_count(), 2);

        let assignments = consumer.take_assignments();
        assert_eq!(assignments.len(), 3);

        assert!(assignments[0].is_centroid);
        assert_eq!(assignments[0].item_id, Some("X".to_string()));
        assert_eq!(assignments[0].sphere_idx, 0);

        assert!(!assignments[1].is_centroid);
        assert_eq!(assignments[1].item_id, Some("Y".to_string()));
        assert_eq!(assignments[1].sphere_idx, 0);
        assert_approx_eq!(assignments[1].max_sim, 0.85);

        assert!(assignments[2].is_centroid);
        assert_eq!(assignments[2].item_id, Some("Z".to_string()));
        assert_eq!(assignments[2].sphere_idx, 1);
    }

    /// Two centroids inside the radius: the scan direction decides which
    /// one the candidate is assigned to.
    #[test]
    fn scan_direction_selects_the_first_match() {
        let table = Arc::new(vec![
            vec![1.0, 0.1, 0.85],
            vec![0.1, 1.0, 0.9],
            vec![0.85, 0.9, 1.0],
        ]);
        let records = || {
            VecSource::new(vec![
                table_record(0, "A"),
                table_record(1, "B"),
                table_record(2, "C"),
            ])
        };

        let mut config = SphereConfig::default();
        config.radius = 0.8;
        config.print_all = true;

        config.reverse_match = false;
        let (mut forward, consumer) = clusterer(Arc::clone(&table), &config);
        forward.run(&mut records()).unwrap();
        let assignments = consumer.take_assignments();
        let c = &assignments[2];
        assert_eq!(c.item_id, Some("C".to_string()));
        assert_eq!(c.sphere_idx, 0); // earliest centroid wins
        assert_approx_eq!(c.max_sim, 0.85);

        config.reverse_match = true;
        let (mut reverse, consumer) = clusterer(table, &config);
        reverse.run(&mut records()).unwrap();
        let assignments = consumer.take_assignments();
        let c = &assignments[2];
        assert_eq!(c.sphere_idx, 1); // newest centroid wins
        assert_approx_eq!(c.max_sim, 0.9);
    }

    #[test]
    fn record_all_matches_emits_one_record_per_matching_centroid() {
        let table = Arc::new(vec![
            vec![1.0, 0.1, 0.85],
            vec![0.1, 1.0, 0.9],
            vec![0.85, 0.9, 1.0],
        ]);

        let mut config = SphereConfig::default();
        config.radius = 0.8;
        config.reverse_match = false;
        config.record_all_matches = true;

        let (mut clusterer, consumer) = clusterer(table, &config);
        let summary = clusterer
            .run(&mut VecSource::new(vec![
                table_record(0, "A"),
                table_record(1, "B"),
                table_record(2, "C"),
            ]))
            .unwrap();

        assert_eq!(summary.excluded, 2); // C matched twice

        let assignments = consumer.take_assignments();
        let c_matches: Vec<&SphereAssignment> = assignments
            .iter()
            .filter(|a| a.item_id == Some("C".to_string()))
            .collect();

        assert_eq!(c_matches.len(), 2);
        assert_eq!(c_matches[0].sphere_idx, 0);
        assert_eq!(c_matches[0].match_ordinal, 1);
        assert_approx_eq!(c_matches[0].max_sim, 0.85);
        assert_eq!(c_matches[1].sphere_idx, 1);
        assert_eq!(c_matches[1].match_ordinal, 2);
        // the running maximum has grown by the second match
        assert_approx_eq!(c_matches[1].max_sim, 0.9);
    }

    #[test]
    fn members_are_silent_without_print_all() {
        let table = Arc::new(vec![vec![1.0, 0.95], vec![0.95, 1.0]]);

        let mut config = SphereConfig::default();
        config.radius = 0.8;
        config.print_all = false;

        let (mut clusterer, consumer) = clusterer(table, &config);
        let summary = clusterer
            .run(&mut VecSource::new(vec![
                table_record(0, "A"),
                table_record(1, "B"),
            ]))
            .unwrap();

        assert_eq!(summary.excluded, 1);

        // only the centroid record for A is emitted
        let assignments = consumer.take_assignments();
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].is_centroid);
    }

    #[test]
    fn centroid_growth_is_monotonic_and_bounded() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let m = 120;

        // random symmetric similarity table
        let mut rows = vec![vec![0.0; m]; m];
        for i in 0..m {
            rows[i][i] = 1.0;
            for j in 0..i {
                let sim = rng.gen_range(0.0..1.0);
                rows[i][j] = sim;
                rows[j][i] = sim;
            }
        }
        let table = Arc::new(rows);

        let mut config = SphereConfig::default();
        config.radius = 0.85;

        let (mut clusterer, consumer) = clusterer(table, &config);
        let records: Vec<ItemRecord> = (0..m).map(|i| table_record(i, "M")).collect();
        let summary = clusterer.run(&mut VecSource::new(records)).unwrap();

        assert!(summary.included <= m);
        assert_eq!(summary.included, clusterer.centroid_count());

        // new centroids appear with strictly increasing sphere indices
        let centroid_idxs: Vec<usize> = consumer
            .take_assignments()
            .iter()
            .filter(|a| a.is_centroid)
            .map(|a| a.sphere_idx)
            .collect();
        let expected: Vec<usize> = (0..centroid_idxs.len()).collect();
        assert_eq!(centroid_idxs, expected);
    }

    #[test]
    fn seeded_centroids_claim_members_without_output() {
        let table = Arc::new(vec![vec![1.0, 0.9], vec![0.9, 1.0]]);

        let mut config = SphereConfig::default();
        config.radius = 0.8;
        config.print_all = true;

        let (mut clusterer, consumer) = clusterer(table, &config);
        let seeded = clusterer
            .seed_reference(&mut VecSource::new(vec![table_record(0, "SEED")]))
            .unwrap();
        assert_eq!(seeded, 1);

        let summary = clusterer
            .run(&mut VecSource::new(vec![table_record(1, "B")]))
            .unwrap();

        assert_eq!(summary.included, 0);
        assert_eq!(summary.excluded, 1);
        assert_eq!(clusterer.centroid_count(), 1);

        let assignments = consumer.take_assignments();
        assert_eq!(assignments.len(), 1);
        assert!(!assignments[0].is_centroid);
        assert_eq!(assignments[0].sphere_idx, 0);
    }
}
