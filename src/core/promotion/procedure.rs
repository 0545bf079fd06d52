// src/core/promotion/procedure.rs

//! The coordinated failover: drain proxied traffic, wait for the target
//! replica to catch up to the primary's replication offset, demote the
//! replica, and repoint the dialer at it.

use super::command::PromoteRequest;
use super::info::ReplicationInfo;
use crate::core::BerylError;
use crate::core::upstream::{Dialer, UpstreamClient, UpstreamRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Delay between replication-offset probes against the primary.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one promotion to completion. At most one runs at a time: the
/// dialer's writer lock is taken first and held until return, so a second
/// `PROMOTE` blocks behind it and every new dial waits out the switch.
///
/// On success the originating client has already received `+OK` by the
/// time this returns; on failure the endpoint is untouched and the caller
/// relays the error. Either way every previously proxied upstream
/// connection was severed once the procedure passed its drain step.
pub async fn run(
    dialer: &Dialer,
    registry: &UpstreamRegistry,
    client_writer: &Arc<AsyncMutex<OwnedWriteHalf>>,
    request: &PromoteRequest,
) -> Result<(), BerylError> {
    // --- Step 1: take the promotion gate. Held until this function
    // returns, which blocks all new dials.
    let mut endpoint = dialer.begin_update().await;

    let target = request.endpoint();
    info!(replica = %target, primary = %*endpoint, "starting promotion");

    // --- Step 2: connect to the replica being promoted. This connection
    // belongs to the procedure and is never registered.
    let mut replica = UpstreamClient::connect(&target).await?;

    // --- Step 3: connect to the current primary for offset probing.
    let mut primary = UpstreamClient::connect(&endpoint).await?;

    // --- Step 4: sever every proxied upstream connection before probing,
    // so no in-flight write can widen the primary's offset underneath us.
    registry.close_all().await;

    // --- Step 5: poll replication progress until the target catches up.
    tokio::time::timeout(request.timeout, wait_for_catch_up(&mut primary, request))
        .await
        .map_err(|_| BerylError::Timeout)??;

    // --- Step 6: convert the replica into a standalone server.
    replica.demote().await?;

    // --- Step 7: acknowledge the originating client. Its session winds
    // down after this reply; its own upstream was severed in step 4.
    client_writer.lock().await.write_all(b"+OK\r\n").await?;

    // --- Step 8: repoint the dialer. Dials queued on the gate will
    // connect to the promoted server.
    info!(new_primary = %target, "promotion complete, endpoint updated");
    *endpoint = target;

    Ok(())
}

/// Probes `INFO replication` until the target replica's reported offset
/// has reached the primary's. A replica measured ahead of the primary is
/// treated as caught up.
async fn wait_for_catch_up(
    primary: &mut UpstreamClient,
    request: &PromoteRequest,
) -> Result<(), BerylError> {
    loop {
        let text = primary.info_replication().await?;
        let info = ReplicationInfo::parse(&text);

        let master_offset = info.master_repl_offset().ok_or_else(|| {
            BerylError::ReplicationError("no master_repl_offset in INFO reply".to_string())
        })?;
        let replica = info
            .find_replica(&request.host, request.port)
            .ok_or_else(|| BerylError::NotASlave(request.host.clone(), request.port))?;

        if replica.offset >= master_offset {
            return Ok(());
        }
        debug!(
            lag = master_offset - replica.offset,
            "replica still catching up"
        );
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}
