use std::future::Future;

use tracing::debug;

/// A value shown to the user before the change behind it is confirmed.
///
/// `apply` switches the visible value right away; `confirm` makes it stick
/// and `rollback` restores the last confirmed value.
#[derive(Debug, Clone)]
pub struct Optimistic<T> {
    confirmed: T,
    current: T,
    pending: bool,
}

impl<T: Clone + PartialEq> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            confirmed: value.clone(),
            current: value,
            pending: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Replace the value from an authoritative source, dropping anything pending.
    pub fn reset(&mut self, value: T) {
        self.confirmed = value.clone();
        self.current = value;
        self.pending = false;
    }

    pub fn apply(&mut self, next: T) {
        self.current = next;
        self.pending = true;
    }

    pub fn confirm(&mut self) {
        self.confirmed = self.current.clone();
        self.pending = false;
    }

    pub fn rollback(&mut self) {
        self.current = self.confirmed.clone();
        self.pending = false;
    }

    /// Apply `next`, run `commit`, then confirm or roll back on its result.
    pub async fn reconcile<F, Fut, E>(&mut self, next: T, commit: F) -> Result<(), E>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if next == self.current && !self.pending {
            return Ok(());
        }
        self.apply(next.clone());
        match commit(next).await {
            Ok(()) => {
                self.confirm();
                Ok(())
            }
            Err(e) => {
                debug!("optimistic change rolled back");
                self.rollback();
                Err(e)
            }
        }
    }
}
