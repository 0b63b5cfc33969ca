//! Bounded concurrency executor
//!
//! Runs a fixed number of cooperative workers on the current task. Each
//! worker pulls the next index from a shared counter until the input is
//! exhausted, so at most `concurrency` calls are in flight at once.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Map `f` over `items` with at most `concurrency` calls in flight
///
/// `result[i]` always corresponds to `items[i]`, whatever order the calls
/// complete in. A concurrency of zero is treated as one.
pub async fn map_bounded<'a, T, R, F, Fut>(items: &'a [T], concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = R>,
{
    let workers = concurrency.max(1).min(items.len());
    let next = AtomicUsize::new(0);
    let next = &next;
    let f = &f;

    let batches = join_all((0..workers).map(|_| async move {
        let mut done = Vec::new();
        loop {
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(item) = items.get(index) else {
                break;
            };
            done.push((index, f(item).await));
        }
        done
    }))
    .await;

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (index, result) in batches.into_iter().flatten() {
        slots[index] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
