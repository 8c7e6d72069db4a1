//! Shared scaffolding for the integration tests.

use eyre::Result;
use numadb::{EngineOptions, ImpersonateTask, ThreadContext};

/// Small single-node options: enough pool for the given worker count
/// plus the storages the tests create.
pub fn tiny_options(threads_per_group: u8) -> EngineOptions {
    let mut options = EngineOptions::default();
    options.thread.group_count = 1;
    options.thread.thread_count_per_group = threads_per_group;
    options.memory.page_pool_size_per_node = 2 << 20;
    options.memory.private_initial_grab = 8;
    options
}

/// Wraps a closure as an impersonation task.
pub struct FnTask<F>(pub F);

impl<F> ImpersonateTask for FnTask<F>
where
    F: Fn(&mut ThreadContext) -> Result<()> + Send + Sync,
{
    fn run(&self, context: &mut ThreadContext) -> Result<()> {
        (self.0)(context)
    }
}
