#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Best-effort Rayon thread pool for partition building and sharded reduction.
///
/// Rayon normally uses a **global** thread pool. Under extreme resource constraints (e.g. many test
/// binaries running concurrently on one host), global pool initialization can fail and Rayon will
/// panic on first use.
///
/// We build and use a crate-local pool instead. If no pool can be created, callers fall back to
/// single-threaded execution.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static RAYON_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// One thread per core. Queries choose how many of them a reduction uses through
/// `AggregationOptions::reduce_workers`; the process environment is not consulted.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_rayon_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_rayon_pool() -> Option<ThreadPool> {
    let requested = desired_rayon_threads().max(1);
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("olap-aggregate-{i}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(err) if requested > 1 => {
            log::warn!("failed to build {requested}-thread aggregation pool ({err}); retrying with 1");
            try_build(1).ok()
        }
        Err(err) => {
            log::warn!("aggregation runs single-threaded: {err}");
            None
        }
    }
}

/// Returns the crate-local Rayon thread pool, if one could be created.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn rayon_pool() -> Option<&'static ThreadPool> {
    RAYON_POOL.get_or_init(build_rayon_pool).as_ref()
}

/// Number of workers parallel code paths may use; `1` when running single-threaded.
pub(crate) fn available_workers() -> usize {
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    {
        rayon_pool().map_or(1, |pool| pool.current_num_threads())
    }
    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    {
        1
    }
}

/// Applies `f` to every item, on the pool when one is available, preserving input order.
pub(crate) fn map_collect<T, R, F>(items: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    {
        if items.len() > 1 {
            if let Some(pool) = rayon_pool() {
                use rayon::prelude::*;
                return pool.install(|| items.into_par_iter().map(&f).collect());
            }
        }
    }
    items.into_iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_collect_preserves_input_order() {
        let out = map_collect((0..100).collect(), |i: u32| i * 2);
        assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    #[test]
    fn pool_is_sized_from_the_machine() {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(desired_rayon_threads(), cores);
        assert!(available_workers() >= 1);
        assert!(available_workers() <= cores);
    }
}
