//! Collaborator hooks
//!
//! The core implements downloading only; par repair, unpacking, dupe-history
//! bookkeeping and post-processing scripts are external collaborators. They
//! plug in through the [`Collaborators`] trait; [`NoOpCollaborators`] is the
//! default when nothing is attached.

use async_trait::async_trait;

use crate::queue::Job;
use crate::types::{DeleteStatus, FileId, JobId};

/// What external dedup decided about an incoming job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupeAction {
    /// Enqueue normally
    Accept,
    /// Mark deleted with the given status before it starts
    Delete(DeleteStatus),
}

/// External collaborators observing the queue.
///
/// Implementations must not block for long: the engine calls these outside
/// the queue lock but on its own tasks.
#[async_trait]
pub trait Collaborators: Send + Sync {
    /// A parsed NZB is about to enter the queue. External dedup can reject
    /// it by returning a delete action.
    async fn on_nzb_file_found(&self, job: &Job) -> DupeAction {
        let _ = job;
        DupeAction::Accept
    }

    /// A file finished assembly (complete or broken).
    async fn on_file_completed(&self, job_id: JobId, file_id: FileId, path: &std::path::Path) {
        let _ = (job_id, file_id, path);
    }

    /// A job retired its last file; par/unpack/move collaborators take over.
    async fn on_job_completed(&self, job: &Job) {
        let _ = job;
    }
}

/// Default no-op collaborator set.
pub struct NoOpCollaborators;

#[async_trait]
impl Collaborators for NoOpCollaborators {}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn noop_collaborators_accept_everything() {
        let hooks = NoOpCollaborators;
        let job = Job::new(
            JobId::new(1),
            "x".to_string(),
            "x.nzb".to_string(),
            PathBuf::from("/dst"),
            String::new(),
            JobKind::NzbCollection,
            0,
        );
        assert_eq!(hooks.on_nzb_file_found(&job).await, DupeAction::Accept);
    }
}
