//! Input and output plumbing shared by the finders: a pull-based record
//! reader and a writer that hands lines to a dedicated printer thread.

use std::io::Write;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Mutex;
use std::thread;

use log::warn;

use crate::data::ItemRecord;
use crate::error::Error;

/// Pull-based input: one record per call, `None` once exhausted.
pub trait RecordSource: Send {
    fn read_next(&mut self) -> Result<Option<ItemRecord>, Error>;
}

/// In-memory source over a pre-built record list.
pub struct VecSource {
    records: Vec<ItemRecord>,
    cursor: usize,
}

impl VecSource {
    pub fn new(records: Vec<ItemRecord>) -> Self {
        return Self { records, cursor: 0 };
    }

    pub fn random(n_records: usize, n_words: usize) -> Self {
        let records = (0..n_records).map(|_| ItemRecord::random(n_words)).collect();
        return Self::new(records);
    }
}

impl RecordSource for VecSource {
    fn read_next(&mut self) -> Result<Option<ItemRecord>, Error> {
        if self.cursor >= self.records.len() {
            return Ok(None);
        }

        let record = self.records[self.cursor].clone();
        self.cursor += 1;
        return Ok(Some(record));
    }
}

const LINE_QUEUE_LENGTH: usize = 200;

/// Prints lines deposited by any thread from a single printer thread.
///
/// Lines go through a bounded queue, so producers block once the printer
/// falls `LINE_QUEUE_LENGTH` lines behind. `close` flushes and joins; it is
/// idempotent and also runs on drop.
pub struct ThreadedLineWriter {
    sender: Mutex<Option<SyncSender<String>>>,
    printer_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadedLineWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        let (sender, receiver) = sync_channel::<String>(LINE_QUEUE_LENGTH);

        let printer_thread = thread::spawn(move || {
            let mut out = out;
            for line in receiver {
                if let Err(e) = writeln!(out, "{}", line) {
                    warn!("dropping output line: {}", e);
                }
            }
            if let Err(e) = out.flush() {
                warn!("flush failed: {}", e);
            }
        });

        return Self {
            sender: Mutex::new(Some(sender)),
            printer_thread: Mutex::new(Some(printer_thread)),
        };
    }

    pub fn println(&self, line: String) {
        let guard = self.sender.lock().unwrap();
        match &*guard {
            Some(sender) => {
                if sender.send(line).is_err() {
                    warn!("printer thread is gone, line dropped");
                }
            }
            None => {
                warn!("writer already closed, line dropped");
            }
        }
    }

    /// Closing the queue is the end-of-output marker for the printer thread.
    pub fn close(&self) {
        let sender = self.sender.lock().unwrap().take();
        drop(sender);

        let handle = self.printer_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadedLineWriter {
    fn drop(&mut self) {
        self.close();
    }
}
