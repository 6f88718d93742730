// VACUUM of the rollup database on a configurable schedule (cron expression or fixed interval).
// Cron expressions are evaluated in local time.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use super::repo::RollupRepo;

#[derive(Debug, Clone)]
pub enum VacuumSchedule {
    /// Cron expression with seconds field, e.g. "0 0 3 * * *" = 03:00 daily.
    Cron(String),
    Every(Duration),
}

/// Delay until the next run after `now`. `None` when the cron expression is invalid or exhausted.
pub fn next_delay(schedule: &VacuumSchedule, now: DateTime<Local>) -> Option<Duration> {
    match schedule {
        VacuumSchedule::Cron(expr) => {
            let parsed = cron::Schedule::from_str(expr).ok()?;
            let next = parsed.after(&now).next()?;
            Some((next - now).to_std().unwrap_or(Duration::from_secs(1)))
        }
        VacuumSchedule::Every(interval) => Some(*interval),
    }
}

pub fn spawn(repo: Arc<RollupRepo>, schedule: VacuumSchedule) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, schedule).await;
    })
}

async fn run(repo: Arc<RollupRepo>, schedule: VacuumSchedule) {
    loop {
        let Some(delay) = next_delay(&schedule, Local::now()) else {
            warn!(schedule = ?schedule, "invalid or exhausted vacuum schedule; VACUUM will not run");
            return;
        };
        tokio::time::sleep(delay).await;
        if let Err(e) = repo.vacuum().await {
            warn!(error = %e, "vacuum failed");
        } else {
            info!("vacuum complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_is_returned_as_is() {
        let d = next_delay(&VacuumSchedule::Every(Duration::from_secs(90)), Local::now());
        assert_eq!(d, Some(Duration::from_secs(90)));
    }

    #[test]
    fn daily_cron_fires_within_a_day() {
        let d = next_delay(&VacuumSchedule::Cron("0 0 3 * * *".into()), Local::now()).unwrap();
        assert!(d <= Duration::from_secs(24 * 3600 + 3600));
    }

    #[test]
    fn invalid_cron_yields_none() {
        assert!(next_delay(&VacuumSchedule::Cron("not a schedule".into()), Local::now()).is_none());
    }
}
