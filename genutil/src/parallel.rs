use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::{prettyprint_usize, PROGRESS_FREQUENCY_SECONDS};

/// How many threads a parallel map may use.
#[derive(Clone, Copy, Debug)]
pub enum Parallelism {
    /// One thread per available CPU.
    Fastest,
    /// A fixed number of threads.
    Polite(usize),
}

impl Parallelism {
    fn num_threads(self) -> usize {
        match self {
            Parallelism::Fastest => num_cpus::get(),
            Parallelism::Polite(n) => n.max(1),
        }
    }
}

/// Fan `requests` out over a bounded worker pool and return results in input
/// order. The whole batch completes before this returns, so callers can
/// submit fixed-size chunks to bound peak in-flight work.
pub fn parallel_map<I, O, F: Fn(I) -> O>(
    parallelism: Parallelism,
    label: &str,
    requests: Vec<I>,
    cb: F,
) -> Vec<O>
where
    I: Send,
    O: Send,
    F: Send + Sync,
{
    let total = requests.len();
    let done = AtomicUsize::new(0);
    let started_at = Instant::now();

    scoped_threadpool::Pool::new(parallelism.num_threads() as u32).scoped(|scope| {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut results: Vec<Option<O>> = std::iter::repeat_with(|| None).take(total).collect();
        let cb = &cb;
        let done = &done;
        for (idx, req) in requests.into_iter().enumerate() {
            let tx = tx.clone();
            scope.execute(move || {
                tx.send((idx, cb(req))).unwrap();
                done.fetch_add(1, Ordering::Relaxed);
            });
        }
        drop(tx);

        let mut last_printed_at = Instant::now();
        for (idx, result) in rx.iter() {
            results[idx] = Some(result);
            if last_printed_at.elapsed().as_secs_f64() >= PROGRESS_FREQUENCY_SECONDS {
                last_printed_at = Instant::now();
                info!(
                    "{}: {}/{} done after {:.1}s",
                    label,
                    prettyprint_usize(done.load(Ordering::Relaxed)),
                    prettyprint_usize(total),
                    started_at.elapsed().as_secs_f64()
                );
            }
        }
        results.into_iter().map(|x| x.unwrap()).collect()
    })
}
