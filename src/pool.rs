/// Runs `action` inside a dedicated rayon pool of `threads` workers so nested
/// `par_iter` calls never exceed that many concurrent requests. Falls back to
/// the caller's thread if the pool cannot be built.
pub fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("fcrank-fetch-{idx}"))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(err) => {
            tracing::warn!(error = %err, "fetch pool unavailable, running inline");
            action()
        }
    }
}
