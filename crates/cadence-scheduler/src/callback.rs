use std::sync::Arc;

/// Work bound to a job. Invoked once per fire on a blocking worker thread.
///
/// Any `Fn() -> anyhow::Result<()>` closure is a callback; captured state takes
/// the place of a per-job data map. Use [`action`] for closures that cannot fail.
pub trait Callback: Send + Sync + 'static {
    fn invoke(&self) -> anyhow::Result<()>;
}

impl<F> Callback for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn invoke(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Shared handle stored in the registry and cloned into each run.
pub type SharedCallback = Arc<dyn Callback>;

/// Adapter for infallible closures.
pub struct Action<F>(F);

impl<F> Callback for Action<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn invoke(&self) -> anyhow::Result<()> {
        (self.0)();
        Ok(())
    }
}

/// Wrap a plain `Fn()` so it can be scheduled.
pub fn action<F>(f: F) -> Action<F>
where
    F: Fn() + Send + Sync + 'static,
{
    Action(f)
}
