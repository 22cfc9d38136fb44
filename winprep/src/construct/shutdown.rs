//! Wait for the guest to power itself off after the post-reboot script.

use super::types::ConstructContext;
use crate::errors::WinprepResult;
use crate::poller::IntervalPoller;

pub(crate) async fn wait_for_power_off(ctx: &ConstructContext) -> WinprepResult<()> {
    tracing::info!(
        host = %ctx.session.guest_address,
        interval_secs = ctx.timings.shutdown_poll_interval.as_secs(),
        "Waiting for guest to power off"
    );

    let poller = IntervalPoller::new(ctx.timings.shutdown_poll_interval, ctx.token.clone());
    poller
        .poll(ctx.timings.shutdown_timeout, || async move {
            let powered_off = ctx.guest.is_powered_off().await?;
            ctx.messenger.restart_in_progress();
            Ok(powered_off)
        })
        .await
        .map_err(|e| e.context("error waiting for VM shutdown"))
        .inspect_err(|e| tracing::error!("{}", e))?;

    tracing::info!(host = %ctx.session.guest_address, "Guest powered off");
    ctx.messenger.shutdown_completed();
    Ok(())
}
