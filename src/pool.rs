use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use dashmap::DashMap;

/// Applies `work` to every input on at most `limit` threads and returns the
/// results in input order. Returns only once every unit has finished.
pub fn run_bounded<T, R, F>(inputs: &[T], limit: usize, work: F) -> Vec<R>
where
    T: Sync,
    R: Send + Sync,
    F: Fn(&T) -> R + Sync,
{
    let results: DashMap<usize, R> = DashMap::with_capacity(inputs.len());
    let cursor = AtomicUsize::new(0);
    let workers = limit.max(1).min(inputs.len());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(input) = inputs.get(index) else {
                        break;
                    };
                    results.insert(index, work(input));
                }
            });
        }
    });

    let mut ordered: Vec<(usize, R)> = results.into_iter().collect();
    ordered.sort_unstable_by_key(|(index, _)| *index);
    ordered.into_iter().map(|(_, result)| result).collect()
}
