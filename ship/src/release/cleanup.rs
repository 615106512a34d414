//! Scoped release of transient local resources

use std::fmt;

use tracing::debug;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Release actions run in reverse registration order
///
/// Dropping the stack runs whatever has not run yet, so actions execute
/// whether the owner finished, failed or unwound.
#[derive(Default)]
pub struct Cleanups {
    actions: Vec<(String, Cleanup)>,
}

impl Cleanups {
    pub fn push(&mut self, name: impl Into<String>, action: impl FnOnce() + Send + 'static) {
        self.actions.push((name.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run and forget every registered action, last first
    pub fn run_all(&mut self) {
        while let Some((name, action)) = self.actions.pop() {
            debug!("Cleanup: {}", name);
            action();
        }
    }
}

impl fmt::Debug for Cleanups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Drop for Cleanups {
    fn drop(&mut self) {
        self.run_all();
    }
}
