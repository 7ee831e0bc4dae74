use chrono::Utc;
use std::time::Duration;

use super::sweep::{SweepSummary, close_expired_votes};
use crate::db::DbPool;

pub fn spawn_scheduler(pool: DbPool, period: Duration) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            log::debug!("Running vote sweep");
            let run_pool = pool.clone();
            // contain panics to this tick
            match actix_web::rt::spawn(async move { run_once(&run_pool).await }).await {
                Ok(_) => {}
                Err(e) => log::error!("Vote sweep panicked: {}", e),
            }
        }
    });
}

/// One sweep; errors are logged and left for the next tick.
pub async fn run_once(pool: &DbPool) -> Option<SweepSummary> {
    match close_expired_votes(pool, Utc::now()).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::error!("Vote sweep failed: {} ({:?})", e, e);
            None
        }
    }
}
