use std::fmt;

/// A claim against storage capacity.
///
/// The capacity is handed back exactly once: either by an explicit [`Reservation::release`]
/// or when the value is dropped, whichever comes first.
pub struct Reservation {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Reservation {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Reservation {
            release: Some(Box::new(release)),
        }
    }

    /// A reservation that holds nothing.
    pub fn empty() -> Self {
        Reservation { release: None }
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("held", &self.release.is_some())
            .finish()
    }
}
