/// Background task implementations
use crate::{context::AppContext, error::AuthResult, metrics};

/// Purge expired sessions and one-time codes; returns (sessions, codes)
pub async fn cleanup_expired(ctx: &AppContext) -> AuthResult<(u64, u64)> {
    let (sessions, codes) = ctx.account_manager.purge_expired().await?;

    metrics::record_purged("session", sessions);
    metrics::record_purged("one_time_code", codes);

    Ok((sessions, codes))
}

/// Forget rate-limiter keys that have fully recovered; returns keys left
pub fn prune_rate_limiter(ctx: &AppContext) -> usize {
    ctx.rate_limiter.retain_recent();
    ctx.rate_limiter.tracked_keys()
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> AuthResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.account_db).await?;

    Ok(())
}
