//! Progress notification for batch runs.

/// Receives a notification after every batch attempt, successful or not.
///
/// `processed` is cumulative and never decreases; the final call of a run
/// reports `processed == total`.
pub trait ProgressObserver {
    fn on_progress(&self, processed: usize, total: usize);
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _processed: usize, _total: usize) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize),
{
    fn on_progress(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn closures_are_observers() {
        let seen = RefCell::new(Vec::new());
        let observer = |processed: usize, total: usize| seen.borrow_mut().push((processed, total));
        observer.on_progress(10, 30);
        observer.on_progress(30, 30);
        assert_eq!(*seen.borrow(), vec![(10, 30), (30, 30)]);
    }

    #[test]
    fn no_progress_is_silent() {
        let observer: &dyn ProgressObserver = &NoProgress;
        observer.on_progress(1, 1);
    }
}
