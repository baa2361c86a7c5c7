//! Poll-until-settled loop shared by all motion commands
//!
//! Every motion command follows the same shape: issue the controller
//! command, then repeatedly wait one poll interval (waking early on a stop
//! signal), re-poll status and classify, until the mount leaves the
//! in-flight state or the timeout elapses. Timed-out and wrong-terminal
//! exits issue a controller stop as a safety action.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::Controller;
use crate::error::CommandResult;
use crate::serializer::CommandSerializer;
use crate::status::{classify, MountState};

/// Issue a motion command and poll until the mount settles.
///
/// `homing` selects `Homing` as the in-flight state (and must match the
/// orchestrator's homing flag); otherwise the loop treats `Slewing` as
/// in-flight. The command is considered successful only if the final
/// classified state equals `expected`.
pub(crate) async fn run_to_state(
    controller: &dyn Controller,
    serializer: &CommandSerializer,
    command: &str,
    params: &[(&str, String)],
    expected: MountState,
    interval: Duration,
    timeout: Duration,
    homing: bool,
) -> CommandResult {
    // The controller may act on a partially received request, so a failed
    // issue does not abort the loop; polling decides the outcome.
    if let Err(err) = controller.exchange(command, params).await {
        warn!(command, %err, "motion command issue failed, polling anyway");
    }

    let in_flight = if homing {
        MountState::Homing
    } else {
        MountState::Slewing
    };
    let started = Instant::now();

    let (final_state, timed_out) = loop {
        if serializer.wait_poll(interval).await {
            info!(command, elapsed = ?started.elapsed(), "motion aborted by stop request");
            return CommandResult::Failed;
        }

        let snapshot = controller.status().await.ok();
        let state = classify(snapshot.as_ref(), homing);
        if state != in_flight {
            break (state, false);
        }
        if started.elapsed() > timeout {
            break (state, true);
        }
    };

    if timed_out {
        warn!(command, elapsed = ?started.elapsed(), "motion timed out, stopping mount");
        let _ = controller.exchange("mount/stop", &[]).await;
        return CommandResult::Failed;
    }

    if final_state == expected {
        return CommandResult::Succeeded;
    }

    warn!(
        command,
        observed = final_state.label(),
        expected = expected.label(),
        "motion settled in unexpected state, stopping mount"
    );
    let _ = controller.exchange("mount/stop", &[]).await;
    CommandResult::Failed
}
