use rayon::prelude::*;

use crate::Result;

pub trait ParallelProcessor {
    fn init_parallel_processing() {
        // build_global fails once a pool exists, which is fine
        if rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build_global()
            .is_ok()
        {
            log::debug!("Using {} CPU threads for processing", rayon::current_num_threads());
        }
    }

    /// Runs `f` over `items` in parallel; the first error wins, otherwise the
    /// results keep the input order.
    fn try_map_parallel<T, F, R>(items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Send + Sync,
    {
        items.par_iter().map(f).collect()
    }
}
