//! Identity of the execution unit running the current code.

use std::fmt;
use std::thread::ThreadId;

/// Stable identity of an execution unit.
///
/// Inside a tokio task the unit is the task itself, so the identity stays the
/// same when a multi-threaded runtime moves the task between worker threads.
/// Code that is not running in a task (`block_on`, plain threads) is keyed by
/// its OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl UnitId {
    /// Returns the identity of the unit executing this call.
    #[must_use]
    pub fn current() -> Self {
        tokio::task::try_id().map_or_else(|| Self::Thread(std::thread::current().id()), Self::Task)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task-{id}"),
            Self::Thread(id) => write!(f, "{id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_thread_uses_thread_identity() {
        assert!(matches!(UnitId::current(), UnitId::Thread(_)));
        let here = UnitId::current();
        let other = std::thread::spawn(UnitId::current).join().unwrap();
        assert_ne!(here, other);
    }

    #[tokio::test]
    async fn spawned_tasks_are_distinct_units() {
        let a = tokio::spawn(async { UnitId::current() }).await.unwrap();
        let b = tokio::spawn(async { UnitId::current() }).await.unwrap();
        assert!(matches!(a, UnitId::Task(_)));
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_identity_survives_yields() {
        let (first, second) = tokio::spawn(async {
            let first = UnitId::current();
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            (first, UnitId::current())
        })
        .await
        .unwrap();
        assert_eq!(first, second);
    }
}
