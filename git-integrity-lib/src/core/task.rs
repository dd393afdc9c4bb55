//! Fan-out of batched jobs over a fixed pool of worker threads, with buffered
//! fan-in to a single collector.
//!
//! The topology is: one producer thread reads the job iterator and pushes
//! fixed-size batches onto a bounded channel; worker threads consume batches
//! and push their results onto a result channel; the calling thread drains
//! the result channel through a [`BufferedCollector`]. Because the collect
//! callback runs on the calling thread only, it may mutate shared state
//! without locking.

use crossbeam::channel::{bounded, unbounded};
use tracing::{debug, instrument, warn};

/// Default number of worker threads. Each in-flight batch holds subprocess
/// output in memory, so the pool is kept small.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default number of jobs per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of worker results accumulated before the collect callback
/// is invoked.
pub const DEFAULT_COLLECTOR_BUFFER: usize = 10;

/// Options for [`dispatch_batches`].
#[derive(Clone, Copy, Debug)]
pub struct DispatchOptions {
    /// Number of jobs delivered to a worker at a time.
    pub batch_size: usize,

    /// Number of worker threads.
    pub num_workers: usize,

    /// Number of worker results buffered before the collect callback runs.
    pub collector_buffer: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            num_workers: DEFAULT_NUM_WORKERS,
            collector_buffer: DEFAULT_COLLECTOR_BUFFER,
        }
    }
}

/// Accumulates items and hands them to a callback in chunks of at most the
/// configured buffer size. Call [`BufferedCollector::flush`] at end of input
/// to deliver any residual items.
pub struct BufferedCollector<T, F: FnMut(Vec<T>) -> eyre::Result<()>> {
    buffer_size: usize,
    buffer: Vec<T>,
    collect: F,
}

impl<T, F: FnMut(Vec<T>) -> eyre::Result<()>> BufferedCollector<T, F> {
    /// Construct a collector delivering chunks of at most `buffer_size` items.
    pub fn new(buffer_size: usize, collect: F) -> Self {
        BufferedCollector {
            buffer_size: buffer_size.max(1),
            buffer: Vec::new(),
            collect,
        }
    }

    /// Add an item, delivering the buffered chunk first if it is full.
    pub fn push(&mut self, item: T) -> eyre::Result<()> {
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        self.buffer.push(item);
        Ok(())
    }

    /// Deliver any buffered items to the callback.
    pub fn flush(&mut self) -> eyre::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        (self.collect)(chunk)?;
        debug!("flushed collector buffer");
        Ok(())
    }
}

/// Read jobs from `jobs`, deliver them to `worker_fn` in batches across a
/// pool of worker threads, and drain every result through `collect` on the
/// calling thread.
///
/// Batches may complete out of order. A worker error is logged and its batch
/// skipped; the dispatch as a whole does not abort. An error from `collect`
/// does abort the dispatch.
#[instrument(skip_all, fields(batch_size = options.batch_size, num_workers = options.num_workers))]
pub fn dispatch_batches<J, R>(
    jobs: impl Iterator<Item = J> + Send,
    worker_fn: impl Fn(&[J]) -> eyre::Result<R> + Sync,
    collect: impl FnMut(Vec<R>) -> eyre::Result<()>,
    options: &DispatchOptions,
) -> eyre::Result<()>
where
    J: Send,
    R: Send,
{
    let DispatchOptions {
        batch_size,
        num_workers,
        collector_buffer,
    } = *options;
    let batch_size = batch_size.max(1);
    let num_workers = num_workers.max(1);

    let (batch_tx, batch_rx) = bounded::<Vec<J>>(num_workers * 2);
    let (result_tx, result_rx) = unbounded::<R>();

    crossbeam::thread::scope(|scope| -> eyre::Result<()> {
        scope.spawn(move |_| {
            let mut batch = Vec::with_capacity(batch_size);
            for job in jobs {
                batch.push(job);
                if batch.len() == batch_size {
                    let full_batch = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if batch_tx.send(full_batch).is_err() {
                        debug!("batch channel disconnected; producer exiting");
                        return;
                    }
                }
            }
            if !batch.is_empty() {
                batch_tx.send(batch).ok();
            }
            // Dropping the sender closes the channel, terminating the workers
            // once the remaining batches are drained.
        });

        for worker_id in 0..num_workers {
            let batch_rx = batch_rx.clone();
            let result_tx = result_tx.clone();
            let worker_fn = &worker_fn;
            scope.spawn(move |_| {
                debug!(worker_id, "worker spawned");
                for batch in batch_rx.iter() {
                    match worker_fn(&batch) {
                        Ok(result) => {
                            if result_tx.send(result).is_err() {
                                debug!(worker_id, "result channel disconnected; worker exiting");
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(worker_id, %err, "worker failed; skipping batch");
                        }
                    }
                }
                debug!(worker_id, "worker exiting");
            });
        }
        drop(batch_rx);
        drop(result_tx);

        let mut collector = BufferedCollector::new(collector_buffer, collect);
        for result in result_rx.iter() {
            collector.push(result)?;
        }
        collector.flush()?;
        Ok(())
    })
    .map_err(|panic| eyre::eyre!("dispatch thread panicked: {panic:?}"))?
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn sum_with_workers(num_workers: usize) -> eyre::Result<i64> {
        let mut total = 0i64;
        dispatch_batches(
            0..100i64,
            |batch: &[i64]| Ok(batch.iter().sum::<i64>()),
            |results: Vec<i64>| {
                total += results.into_iter().sum::<i64>();
                Ok(())
            },
            &DispatchOptions {
                batch_size: 7,
                num_workers,
                collector_buffer: 3,
            },
        )?;
        Ok(total)
    }

    #[test]
    fn test_dispatch_result_is_worker_count_independent() -> eyre::Result<()> {
        for num_workers in [1, 2, 8] {
            assert_eq!(sum_with_workers(num_workers)?, 4950);
        }
        Ok(())
    }

    #[test]
    fn test_dispatch_empty_input_never_collects() -> eyre::Result<()> {
        let mut num_calls = 0usize;
        dispatch_batches(
            std::iter::empty::<i64>(),
            |batch: &[i64]| Ok(batch.len()),
            |_results| {
                num_calls += 1;
                Ok(())
            },
            &DispatchOptions::default(),
        )?;
        assert_eq!(num_calls, 0);
        Ok(())
    }

    #[test]
    fn test_dispatch_skips_failed_batches() -> eyre::Result<()> {
        // Batches are formed sequentially, so with a batch size of 10 the
        // values 10..20 always share a batch.
        let mut total = 0i64;
        dispatch_batches(
            0..100i64,
            |batch: &[i64]| {
                if batch.contains(&13) {
                    eyre::bail!("injected failure");
                }
                Ok(batch.iter().sum::<i64>())
            },
            |results: Vec<i64>| {
                total += results.into_iter().sum::<i64>();
                Ok(())
            },
            &DispatchOptions {
                batch_size: 10,
                num_workers: 4,
                collector_buffer: 2,
            },
        )?;
        assert_eq!(total, 4950 - (10..20).sum::<i64>());
        Ok(())
    }

    #[test]
    fn test_dispatch_propagates_collector_errors() {
        let result = dispatch_batches(
            0..100i64,
            |batch: &[i64]| Ok(batch.len()),
            |_results| eyre::bail!("collector failure"),
            &DispatchOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_buffered_collector_chunking() -> eyre::Result<()> {
        let chunk_sizes = std::cell::RefCell::new(Vec::new());
        let mut collector = BufferedCollector::new(3, |chunk: Vec<i64>| {
            chunk_sizes.borrow_mut().push(chunk.len());
            Ok(())
        });
        for item in 0..10 {
            collector.push(item)?;
        }
        collector.flush()?;
        assert_eq!(*chunk_sizes.borrow(), vec![3, 3, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_dispatch_single_item_batches() -> eyre::Result<()> {
        let num_started = AtomicUsize::new(0);
        let mut num_results = 0usize;
        dispatch_batches(
            0..8i64,
            |batch: &[i64]| {
                num_started.fetch_add(batch.len(), Ordering::SeqCst);
                Ok(batch.len())
            },
            |results: Vec<usize>| {
                num_results += results.len();
                Ok(())
            },
            &DispatchOptions {
                batch_size: 1,
                num_workers: 8,
                collector_buffer: 4,
            },
        )?;
        assert_eq!(num_started.load(Ordering::SeqCst), 8);
        assert_eq!(num_results, 8);
        Ok(())
    }
}
