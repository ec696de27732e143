//! Observability hooks for long runs. Never correctness-relevant: a silent
//! observer changes nothing about a run's results.

use log::info;

pub trait ProgressObserver: Send + Sync {
    /// Called periodically with the number of completed units so far.
    fn on_tick(&self, completed: usize);

    /// Called once after a successful run.
    fn on_finished(&self, label: &str, completed: usize, n_workers: usize, elapsed_secs: f64);
}

/// Reports through the `log` facade.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_tick(&self, completed: usize) {
        info!("{} units completed", completed);
    }

    fn on_finished(&self, label: &str, completed: usize, n_workers: usize, elapsed_secs: f64) {
        info!(
            "{}: processed {} units on {} workers in {:.1}s",
            label, completed, n_workers, elapsed_secs
        );
    }
}

/// Discards everything.
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_tick(&self, _completed: usize) {}

    fn on_finished(&self, _label: &str, _completed: usize, _n_workers: usize, _elapsed_secs: f64) {}
}
