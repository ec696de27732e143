//! Nearest-neighbor search in two topologies: every input record against a
//! fixed reference set (streaming), or one input set against itself
//! (matrix).

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::Serialize;

use crate::comparator::{ComparatorFactory, SimComparator};
use crate::config::NnConfig;
use crate::data::{ItemIdentifier, ItemIndex};
use crate::engine::{MatrixAlgorithm, StreamAlgorithm};
use crate::error::Error;
use crate::io::{RecordSource, ThreadedLineWriter};
use crate::neighbor::{NeighborRecord, NeighborSet};

/// Everything found for one query: the retained neighbors best first, and
/// the number of candidates at or above the secondary count threshold.
#[derive(Debug, Clone, Serialize)]
pub struct NnResult {
    pub query_idx: ItemIndex,
    pub query_id: Option<String>,
    pub neighbors: Vec<NeighborRecord>,
    pub count_above: usize,
}

impl NnResult {
    pub fn to_json(&self) -> String {
        return serde_json::to_string(self).unwrap();
    }
}

/// Receives per-query results. `consume` is called from worker threads and
/// must not assume any ordering between queries; results carry `query_idx`
/// so callers can re-sort.
pub trait NnConsumer: Send + Sync {
    fn consume(&self, result: NnResult);

    fn close(&self) {}
}

impl<T: NnConsumer + ?Sized> NnConsumer for Arc<T> {
    fn consume(&self, result: NnResult) {
        (**self).consume(result);
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Collects results into a vector, for aggregation and tests.
pub struct CollectConsumer {
    results: Mutex<Vec<NnResult>>,
}

impl CollectConsumer {
    pub fn new() -> Self {
        return Self {
            results: Mutex::new(Vec::new()),
        };
    }

    pub fn take_results(&self) -> Vec<NnResult> {
        return std::mem::take(&mut *self.results.lock().unwrap());
    }
}

impl NnConsumer for CollectConsumer {
    fn consume(&self, result: NnResult) {
        self.results.lock().unwrap().push(result);
    }
}

/// Writes one tab-separated line per retained neighbor.
pub struct TabConsumer {
    writer: ThreadedLineWriter,
}

impl TabConsumer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        let writer = ThreadedLineWriter::new(out);
        writer.println("query_idx\tref_idx\tsimilarity".to_string());

        return Self { writer };
    }
}

impl NnConsumer for TabConsumer {
    fn consume(&self, result: NnResult) {
        for neighbor in result.neighbors.iter() {
            self.writer.println(format!(
                "{}\t{}\t{:.4}",
                result.query_idx, neighbor.ref_idx, neighbor.similarity
            ));
        }
    }

    fn close(&self) {
        self.writer.close();
    }
}

struct InputCursor {
    source: Box<dyn RecordSource>,
    next_idx: ItemIndex,
}

/// Streaming reference search: the reference set is loaded up front, then
/// every unit of work pulls one record from the shared input cursor and
/// compares it against all references.
pub struct NnFinder<F: ComparatorFactory> {
    factory: F,
    reference: Vec<F::Comparator>,
    reference_ids: Vec<Option<ItemIdentifier>>,
    input: Mutex<InputCursor>,
    consumer: Box<dyn NnConsumer>,
    max_neighbors: usize,
    min_similarity: f64,
    count_above_similarity: Option<f64>,
    print_all: bool,
}

impl<F: ComparatorFactory> NnFinder<F> {
    pub fn new(
        factory: F,
        consumer: Box<dyn NnConsumer>,
        config: &NnConfig,
        mut reference_source: Box<dyn RecordSource>,
        input_source: Box<dyn RecordSource>,
    ) -> Result<Self, Error> {
        assert!(config.max_neighbors >= 1, "max_neighbors must be > 0");

        let mut reference = Vec::with_capacity(2000);
        let mut reference_ids = Vec::with_capacity(2000);

        while let Some(record) = reference_source.read_next()? {
            let comparable = factory.create_comparable(&record)?;
            reference.push(factory.create_comparator(&comparable)?);
            reference_ids.push(record.identifier);
        }
        info!("{} reference records read", reference.len());

        let with_id = reference_ids.iter().filter(|id| id.is_some()).count();
        if with_id != 0 && with_id != reference_ids.len() {
            warn!(
                "{} reference records have no identifier",
                reference_ids.len() - with_id
            );
        }

        return Ok(Self {
            factory,
            reference,
            reference_ids,
            input: Mutex::new(InputCursor {
                source: input_source,
                next_idx: 0,
            }),
            consumer,
            max_neighbors: config.max_neighbors,
            min_similarity: config.min_similarity,
            count_above_similarity: config.count_above_similarity,
            print_all: config.print_all,
        });
    }

    pub fn reference_count(&self) -> usize {
        return self.reference.len();
    }

    pub fn close(&self) {
        self.consumer.close();
    }

    fn resolve_id(&self, idx: usize) -> Option<String> {
        return self.reference_ids[idx].as_ref().map(|id| id.to_string());
    }
}

impl<F: ComparatorFactory> StreamAlgorithm for NnFinder<F> {
    /// Reads one record and compares it against every reference.
    fn run_unit(&self) -> Result<bool, Error> {
        let (query_idx, record) = {
            let mut cursor = self.input.lock().unwrap();
            match cursor.source.read_next()? {
                None => return Ok(false),
                Some(record) => {
                    let idx = cursor.next_idx;
                    cursor.next_idx += 1;
                    (idx, record)
                }
            }
        };

        let comparable = self.factory.create_comparable(&record)?;
        let query = self.factory.create_comparator(&comparable)?;

        let mut set = NeighborSet::new(self.max_neighbors, self.min_similarity);
        let mut count_above = 0usize;

        for (i, reference) in self.reference.iter().enumerate() {
            let sim = match self.count_above_similarity {
                Some(threshold) => {
                    // the count needs exact values, no early out possible
                    let sim = reference.similarity(&query)?;
                    if sim >= threshold {
                        count_above += 1;
                    }
                    sim
                }
                None => reference.similarity_above(&query, self.min_similarity)?,
            };
            set.offer(sim, i);
        }

        let neighbors: Vec<NeighborRecord> = set
            .results()
            .into_iter()
            .map(|n| NeighborRecord {
                similarity: n.similarity,
                ref_idx: n.ref_idx,
                ref_id: self.resolve_id(n.ref_idx),
            })
            .collect();

        let result = NnResult {
            query_idx,
            query_id: record.identifier.as_ref().map(|id| id.to_string()),
            neighbors,
            count_above,
        };

        if self.print_all || !result.neighbors.is_empty() {
            self.consumer.consume(result);
        }

        return Ok(true);
    }
}

/// All-vs-all search over one input set, decomposed into triangular
/// columns: the unit for column `i` scores `i` against every index below
/// it, so each unordered pair is scored exactly once across the run. Every
/// score feeds the collectors of both endpoints; the collectors make the
/// retained set independent of the order those offers arrive in.
pub struct MatrixNnFinder<Y: SimComparator> {
    comparators: Vec<Y>,
    ids: Vec<Option<ItemIdentifier>>,
    sets: Vec<Mutex<NeighborSet>>,
    counts: Vec<AtomicUsize>,
    consumer: Box<dyn NnConsumer>,
    min_similarity: f64,
    count_above_similarity: Option<f64>,
    print_all: bool,
    comparisons: AtomicUsize,
}

impl<Y: SimComparator> MatrixNnFinder<Y> {
    pub fn new<F>(
        factory: &F,
        consumer: Box<dyn NnConsumer>,
        config: &NnConfig,
        mut source: Box<dyn RecordSource>,
    ) -> Result<Self, Error>
    where
        F: ComparatorFactory<Comparator = Y>,
    {
        assert!(config.max_neighbors >= 1, "max_neighbors must be > 0");

        let mut comparators = Vec::with_capacity(2000);
        let mut ids = Vec::with_capacity(2000);

        while let Some(record) = source.read_next()? {
            let comparable = factory.create_comparable(&record)?;
            comparators.push(factory.create_comparator(&comparable)?);
            ids.push(record.identifier);
        }
        info!("{} records read", comparators.len());

        let sets = (0..comparators.len())
            .map(|_| Mutex::new(NeighborSet::new(config.max_neighbors, config.min_similarity)))
            .collect();
        let counts = (0..comparators.len()).map(|_| AtomicUsize::new(0)).collect();

        return Ok(Self {
            comparators,
            ids,
            sets,
            counts,
            consumer,
            min_similarity: config.min_similarity,
            count_above_similarity: config.count_above_similarity,
            print_all: config.print_all,
            comparisons: AtomicUsize::new(0),
        });
    }

    /// Total pairwise similarity evaluations so far; N*(N-1)/2 after a
    /// complete run.
    pub fn comparison_count(&self) -> usize {
        return self.comparisons.load(Ordering::SeqCst);
    }

    /// Hands every per-query result to the consumer, in index order. Must
    /// only be called after the runner has drained all columns.
    pub fn emit_results(&self) {
        for i in 0..self.comparators.len() {
            let retained = self.sets[i].lock().unwrap().results();

            let neighbors: Vec<NeighborRecord> = retained
                .into_iter()
                .map(|n| NeighborRecord {
                    similarity: n.similarity,
                    ref_idx: n.ref_idx,
                    ref_id: self.ids[n.ref_idx].as_ref().map(|id| id.to_string()),
                })
                .collect();

            let result = NnResult {
                query_idx: i,
                query_id: self.ids[i].as_ref().map(|id| id.to_string()),
                neighbors,
                count_above: self.counts[i].load(Ordering::SeqCst),
            };

            if self.print_all || !result.neighbors.is_empty() {
                self.consumer.consume(result);
            }
        }
    }

    pub fn close(&self) {
        self.consumer.close();
    }
}

impl<Y: SimComparator> MatrixAlgorithm for MatrixNnFinder<Y> {
    fn object_count(&self) -> usize {
        return self.comparators.len();
    }

    fn run_column(&self, idx: usize) -> Result<(), Error> {
        let base = &self.comparators[idx];

        for j in 0..idx {
            let other = &self.comparators[j];

            let sim = match self.count_above_similarity {
                Some(threshold) => {
                    let sim = base.similarity(other)?;
                    if sim >= threshold {
                        self.counts[idx].fetch_add(1, Ordering::SeqCst);
                        self.counts[j].fetch_add(1, Ordering::SeqCst);
                    }
                    sim
                }
                None => base.similarity_above(other, self.min_similarity)?,
            };
            self.comparisons.fetch_add(1, Ordering::SeqCst);

            self.sets[idx].lock().unwrap().offer(sim, j);
            self.sets[j].lock().unwrap().offer(sim, idx);
        }

        return Ok(());
    }
}
