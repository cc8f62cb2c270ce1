//! Cron-driven daily runs.
//!
//! The schedule uses the six-field `cron` crate syntax
//! (`sec min hour day-of-month month day-of-week`), evaluated in UTC:
//!
//! ```json
//! { "run": { "cron": "0 30 22 * * Mon-Fri" } }
//! ```

use std::future::Future;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{error, info};

use crate::pipeline::{DailyOrchestrator, RunOptions};

/// Parsed run schedule.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    expression: String,
    schedule: Schedule,
}

impl DailySchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("Invalid run cron expression: {}", expression))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run the orchestrator at every fire time until `shutdown` resolves.
    ///
    /// A failed run is logged and the loop carries on with the next slot.
    pub async fn run_loop<F>(&self, orchestrator: &DailyOrchestrator, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(cron = %self.expression, "Scheduler started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_after(now) else {
                info!("Schedule has no further fire times, stopping");
                return Ok(());
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, wait_secs = wait.as_secs(), "Waiting for next run");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let options = RunOptions {
                as_of: next.date_naive(),
                force_run: false,
            };
            match orchestrator.run(options).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    status = ?report.status,
                    calls = report.budget.used,
                    "Scheduled run finished"
                ),
                Err(e) => error!(error = %e, "Scheduled run failed"),
            }
        }
    }
}
