/// Wrap protocol state in a lock for shared access.
///
/// The lock is only ever held inside the closures passed to [`Share::read`]
/// and [`Share::write`], so it can never be held across an `.await`.
#[derive(Default)]
pub struct Share<S>(std::sync::Arc<parking_lot::RwLock<S>>);

impl<S> Clone for Share<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S> Share<S> {
    /// Constructor
    pub fn new(s: S) -> Self {
        Self(std::sync::Arc::new(parking_lot::RwLock::new(s)))
    }

    /// Acquire read-only access to the shared state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let g = self.0.read();
        f(&g)
    }

    /// Acquire write access to the shared state, returning whatever the
    /// closure computes under the same lock acquisition.
    pub fn write<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.0.write())
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Share<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.read(|s| f.debug_tuple("Share").field(s).finish())
    }
}
