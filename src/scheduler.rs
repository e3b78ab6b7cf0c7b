use std::sync::{Mutex, mpsc};
use std::thread;

use tracing::trace;

/// Fixed-size pool of worker threads, sized once per run.
#[derive(Debug, Clone, Copy)]
pub struct FetchScheduler {
    workers: usize,
}

impl FetchScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work` over every job on at most `workers` threads.
    ///
    /// Jobs are taken from a shared queue in submission order; each output
    /// comes back over a channel tagged with the job's index and is handed
    /// to `on_result` on the calling thread, in completion order. `work`
    /// must turn its own failures into an output value, so one job cannot
    /// stop the others.
    pub fn run<J, T, W, R>(&self, jobs: Vec<J>, work: W, mut on_result: R)
    where
        J: Send,
        T: Send,
        W: Fn(usize, J) -> T + Sync,
        R: FnMut(usize, T),
    {
        if jobs.is_empty() {
            return;
        }
        let worker_count = self.workers.min(jobs.len());
        let queue = Mutex::new(jobs.into_iter().enumerate());
        let (result_tx, result_rx) = mpsc::channel::<(usize, T)>();

        thread::scope(|scope| {
            for worker in 0..worker_count {
                let result_tx = result_tx.clone();
                let queue = &queue;
                let work = &work;
                scope.spawn(move || {
                    loop {
                        let next = match queue.lock() {
                            Ok(mut jobs) => jobs.next(),
                            Err(poisoned) => poisoned.into_inner().next(),
                        };
                        let Some((index, job)) = next else {
                            break;
                        };
                        trace!(worker, index, "job started");
                        let output = work(index, job);
                        if result_tx.send((index, output)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, output) in result_rx {
                on_result(index, output);
            }
        });
    }
}
