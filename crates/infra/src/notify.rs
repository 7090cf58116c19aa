use std::sync::{Arc, Mutex, PoisonError};

use permgraph_core::EntityName;

/// Sink for cache invalidation after a committed mutation.
///
/// Fire-and-forget: implementations must not fail the mutation that
/// triggered them, and are only called once the change is durable.
pub trait RefreshNotifier: Send + Sync {
    /// Every subject inheriting from `group` may have changed.
    fn refresh_affected_players(&self, group: &EntityName);

    fn refresh_player(&self, subject: &EntityName);

    /// The set of expiring memberships of `subject` changed.
    fn refresh_expirations(&self, subject: &EntityName);
}

impl<N> RefreshNotifier for Arc<N>
where
    N: RefreshNotifier + ?Sized,
{
    fn refresh_affected_players(&self, group: &EntityName) {
        (**self).refresh_affected_players(group)
    }

    fn refresh_player(&self, subject: &EntityName) {
        (**self).refresh_player(subject)
    }

    fn refresh_expirations(&self, subject: &EntityName) {
        (**self).refresh_expirations(subject)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl RefreshNotifier for NoopNotifier {
    fn refresh_affected_players(&self, _group: &EntityName) {}

    fn refresh_player(&self, _subject: &EntityName) {}

    fn refresh_expirations(&self, _subject: &EntityName) {}
}

/// A single notification, as captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    AffectedPlayers(EntityName),
    Player(EntityName),
    Expirations(EntityName),
}

/// In-memory notifier for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    inner: Mutex<Vec<Refresh>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Refresh> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Refresh> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, refresh: Refresh) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(refresh);
    }
}

impl RefreshNotifier for RecordingNotifier {
    fn refresh_affected_players(&self, group: &EntityName) {
        self.push(Refresh::AffectedPlayers(group.clone()));
    }

    fn refresh_player(&self, subject: &EntityName) {
        self.push(Refresh::Player(subject.clone()));
    }

    fn refresh_expirations(&self, subject: &EntityName) {
        self.push(Refresh::Expirations(subject.clone()));
    }
}
