//! Bounded worker pool whose results are consumed in submission order.
//!
//! Workers run the mapper concurrently and hand `(index, output)` pairs back
//! to the calling thread. The caller parks each output in its slot and
//! reduces the longest complete prefix, so the reducer sees outputs in
//! exactly the order the inputs were given, whatever order they finish in.
//! The reducer runs only on the calling thread.

use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel;

/// Worker pool configuration.
#[derive(Clone, Copy, Debug)]
pub struct OrderedPool {
    /// Maximum number of concurrent workers
    threads: usize,
}

impl OrderedPool {
    /// Creates a pool of at most `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    /// Maps every input on the pool and reduces the outputs in input order.
    ///
    /// If `reduce` fails, inputs not yet started are skipped, running ones are
    /// waited for, and the error is returned.
    pub fn run<I, O, E>(
        self,
        inputs: Vec<I>,
        mapper: impl Fn(I) -> O + Sync,
        mut reduce: impl FnMut(O) -> Result<(), E>,
    ) -> Result<Result<(), E>, Error>
    where
        I: Send,
        O: Send,
    {
        let total = inputs.len();
        if total == 0 {
            return Ok(Ok(()));
        }

        let (job_send, job_recv) = channel::unbounded::<(usize, I)>();
        let (out_send, out_recv) = channel::unbounded::<(usize, O)>();
        for job in inputs.into_iter().enumerate() {
            // Cannot fail, the receiver is alive.
            drop(job_send.send(job));
        }
        drop(job_send);

        let halted = AtomicBool::new(false);
        let workers = self.threads.min(total);

        crossbeam::scope(|scope| {
            for _ in 0..workers {
                let job_recv = job_recv.clone();
                let out_send = out_send.clone();
                let mapper = &mapper;
                let halted = &halted;
                scope.spawn(move |_| {
                    for (index, input) in job_recv.iter() {
                        if halted.load(Ordering::Relaxed) {
                            break;
                        }
                        if out_send.send((index, mapper(input))).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(out_send);

            let mut slots = (0..total).map(|_| None).collect::<Vec<Option<O>>>();
            let mut next = 0;
            for (index, output) in out_recv.iter() {
                slots[index] = Some(output);
                while let Some(output) = slots.get_mut(next).and_then(Option::take) {
                    next += 1;
                    if let Err(err) = reduce(output) {
                        halted.store(true, Ordering::Relaxed);
                        return Err(err);
                    }
                }
            }
            Ok(())
        })
        .map_err(|_| Error::WorkerPanicked)
    }
}

/// Errors of the worker pool itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker thread panicked.
    #[error("a fetch worker panicked")]
    WorkerPanicked,
}
