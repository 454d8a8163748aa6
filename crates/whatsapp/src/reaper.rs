//! Startup reconciliation of persisted credential records.
//!
//! Records without an identity are leftovers of pairings that never
//! completed; they are purged. Records with an identity are re-armed, so
//! their sessions reconnect without a new scan.

use {
    chatmap_sessions::{SessionId, StoreError},
    futures::future::join_all,
    tracing::{info, warn},
};

use crate::manager::{CreateOutcome, SessionManager};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub purged: Vec<SessionId>,
    pub rearmed: Vec<SessionId>,
    /// Records that could not be probed; left untouched.
    pub failed: Vec<(SessionId, String)>,
}

pub async fn reconcile(manager: &SessionManager) -> Result<ReconcileReport, StoreError> {
    let store = manager.store();
    let ids = store.list().await?;
    let probes = join_all(ids.into_iter().map(|id| async move {
        let probe = store.has_identity(&id).await;
        (id, probe)
    }))
    .await;

    let mut report = ReconcileReport::default();
    for (id, probe) in probes {
        match probe {
            Ok(true) => report.rearmed.push(id),
            Ok(false) => {
                manager.logout(&id).await;
                report.purged.push(id);
            },
            Err(e) => {
                warn!(session = %id, error = %e, "cannot probe credential record, leaving it");
                report.failed.push((id, e.to_string()));
            },
        }
    }

    for id in &report.rearmed {
        if manager.create_session(id).await == CreateOutcome::Started {
            info!(session = %id, "re-armed persisted session");
        }
    }
    info!(
        purged = report.purged.len(),
        rearmed = report.rearmed.len(),
        failed = report.failed.len(),
        "credential records reconciled"
    );
    Ok(report)
}
