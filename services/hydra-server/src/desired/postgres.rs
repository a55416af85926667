use std::time::Duration;

use async_trait::async_trait;
use hydra_id::SandboxId;
use hydra_quota::{DeviceKind, SandboxRequest};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{DesiredListing, DesiredSandbox, DesiredState, InvalidSandbox, Rejection};
use crate::db::DbError;

/// Channel the `sandbox_requests` trigger notifies on.
pub const NOTIFY_CHANNEL: &str = "sandbox_requests";

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Desired state in the `sandbox_requests` table.
#[derive(Debug, Clone)]
pub struct PgDesiredState {
    pool: PgPool,
}

#[derive(Debug)]
struct SandboxRow {
    sandbox_id: String,
    owner: String,
    device_count: i32,
    device_type: String,
    gpu_vendor: Option<String>,
    image: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SandboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            sandbox_id: row.try_get("sandbox_id")?,
            owner: row.try_get("owner")?,
            device_count: row.try_get("device_count")?,
            device_type: row.try_get("device_type")?,
            gpu_vendor: row.try_get("gpu_vendor")?,
            image: row.try_get("image")?,
        })
    }
}

impl TryFrom<SandboxRow> for DesiredSandbox {
    type Error = DbError;

    fn try_from(row: SandboxRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| DbError::InvalidRow {
            id: row.sandbox_id.clone(),
            reason,
        };

        let id = SandboxId::parse(&row.sandbox_id).map_err(|e| invalid(e.to_string()))?;
        let device_count = u32::try_from(row.device_count)
            .map_err(|_| invalid(format!("negative device count {}", row.device_count)))?;
        let device = match row.device_type.as_str() {
            "cpu" => DeviceKind::Cpu,
            "gpu" => DeviceKind::Gpu {
                vendor: row.gpu_vendor.clone(),
            },
            other => return Err(invalid(format!("unknown device type {other:?}"))),
        };

        Ok(Self {
            id,
            owner: row.owner,
            request: SandboxRequest {
                device_count,
                device,
            },
            image: row.image,
        })
    }
}

const SELECT_LIVE: &str = "SELECT sandbox_id, owner, device_count, device_type, gpu_vendor, image \
     FROM sandbox_requests WHERE deleted_at IS NULL";

impl PgDesiredState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DesiredState for PgDesiredState {
    async fn list(&self) -> Result<DesiredListing, DbError> {
        let rows: Vec<SandboxRow> = sqlx::query_as(&format!("{SELECT_LIVE} ORDER BY sandbox_id"))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        let mut listing = DesiredListing::default();
        for row in rows {
            match DesiredSandbox::try_from(row) {
                Ok(sandbox) => listing.sandboxes.push(sandbox),
                Err(DbError::InvalidRow { id, reason }) => {
                    warn!(sandbox_id = %id, reason = %reason, "Skipping invalid sandbox request");
                    listing.invalid.push(InvalidSandbox { id, reason });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(listing)
    }

    async fn get(&self, id: &SandboxId) -> Result<Option<DesiredSandbox>, DbError> {
        let row: Option<SandboxRow> = sqlx::query_as(&format!("{SELECT_LIVE} AND sandbox_id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        row.map(DesiredSandbox::try_from).transpose()
    }

    async fn report_rejection(
        &self,
        id: &SandboxId,
        rejection: &Rejection,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE sandbox_requests \
             SET rejection_class = $2, rejection_reason = $3, rejected_at = now(), updated_at = now() \
             WHERE sandbox_id = $1",
        )
        .bind(id.to_string())
        .bind(rejection.class.as_str())
        .bind(&rejection.reason)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}

/// Forward `sandbox_requests` notifications into `tx` until shutdown.
///
/// Lost notifications are tolerated: the periodic resync covers them.
pub fn spawn_notification_forwarder(
    pool: PgPool,
    tx: mpsc::Sender<SandboxId>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(forward_notifications(pool, tx, shutdown))
}

#[instrument(skip_all, name = "notification_forwarder", fields(channel = NOTIFY_CHANNEL))]
async fn forward_notifications(
    pool: PgPool,
    tx: mpsc::Sender<SandboxId>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting notification forwarder");

    loop {
        let mut listener = match subscribe(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Failed to listen for sandbox changes");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };

        loop {
            tokio::select! {
                received = listener.recv() => match received {
                    Ok(notification) => match SandboxId::parse(notification.payload()) {
                        Ok(id) => {
                            if tx.send(id).await.is_err() {
                                debug!("Controller gone, stopping forwarder");
                                return;
                            }
                        }
                        Err(e) => warn!(payload = notification.payload(), error = %e, "Ignoring malformed notification"),
                    },
                    Err(e) => {
                        warn!(error = %e, "Notification stream failed, resubscribing");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Notification forwarder shutting down");
                        return;
                    }
                }
            }
        }
    }
}

async fn subscribe(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(device_type: &str, device_count: i32) -> SandboxRow {
        SandboxRow {
            sandbox_id: SandboxId::new().to_string(),
            owner: "alice".into(),
            device_count,
            device_type: device_type.into(),
            gpu_vendor: Some("amd.com/gpu".into()),
            image: None,
        }
    }

    #[test]
    fn test_row_conversion() {
        let sandbox = DesiredSandbox::try_from(row("gpu", 1)).unwrap();
        assert_eq!(sandbox.request, SandboxRequest::gpu(1, Some("amd.com/gpu")));

        let sandbox = DesiredSandbox::try_from(row("cpu", 2)).unwrap();
        assert_eq!(sandbox.request, SandboxRequest::cpu(2));
    }

    #[test]
    fn test_invalid_rows() {
        assert!(matches!(
            DesiredSandbox::try_from(row("tpu", 1)),
            Err(DbError::InvalidRow { .. })
        ));
        assert!(matches!(
            DesiredSandbox::try_from(row("cpu", -1)),
            Err(DbError::InvalidRow { .. })
        ));

        let mut bad_id = row("cpu", 1);
        bad_id.sandbox_id = "rep_01H".into();
        assert!(matches!(
            DesiredSandbox::try_from(bad_id),
            Err(DbError::InvalidRow { .. })
        ));
    }
}
