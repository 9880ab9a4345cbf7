//! Loan pipeline: stage bookkeeping and loan-number generation.
//!
//! A loan has exactly one open stage-history row (exited_at null) at any
//! time outside the transition transaction; both the open/close pair and
//! the loan row itself are written in a single transaction.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::NewStageHistoryEntry;
use crate::schema::{loans, stage_history};

pub const STAGE_NEW_LEAD: &str = "New Lead";
pub const STAGE_CLOSED: &str = "Closed";

/// Known pipeline order, used for sorting stage aggregates. currentStage is
/// free-form; stages outside this list sort after it alphabetically.
pub const PIPELINE_STAGES: &[&str] = &[
    "New Lead",
    "Contacted",
    "Pre-Approved",
    "Application",
    "Processing",
    "Underwriting",
    "Clear to Close",
    "Closed",
];

pub fn stage_order(stage: &str) -> usize {
    PIPELINE_STAGES
        .iter()
        .position(|known| *known == stage)
        .unwrap_or(PIPELINE_STAGES.len())
}

/// `LN-<year>-<6 digits>`, the suffix taken from the creation instant's
/// millisecond clock.
pub fn generate_loan_number(now: DateTime<Utc>) -> String {
    let suffix = now.timestamp_millis().rem_euclid(1_000_000);
    format!("LN-{}-{:06}", now.year(), suffix)
}

/// Opens the initial history row for a freshly inserted loan. Runs inside
/// the caller's transaction.
pub fn open_initial_stage(
    conn: &mut PgConnection,
    loan_id: Uuid,
    stage: &str,
    now: NaiveDateTime,
) -> AppResult<()> {
    diesel::insert_into(stage_history::table)
        .values(&NewStageHistoryEntry {
            id: Uuid::new_v4(),
            loan_id,
            stage: stage.to_string(),
            entered_at: now,
        })
        .execute(conn)?;
    Ok(())
}

/// Moves a loan to `new_stage`. Closes the open history row (duration in
/// whole days since it was entered), opens the new one, and resets the
/// loan's stage clock. Returns false without touching anything when the
/// loan is already in `new_stage`. Runs inside the caller's transaction.
pub fn transition_stage(
    conn: &mut PgConnection,
    loan_id: Uuid,
    current_stage: &str,
    new_stage: &str,
    now: NaiveDateTime,
) -> AppResult<bool> {
    if new_stage == current_stage {
        return Ok(false);
    }

    let open_entry: Option<(Uuid, NaiveDateTime)> = stage_history::table
        .filter(stage_history::loan_id.eq(loan_id))
        .filter(stage_history::exited_at.is_null())
        .select((stage_history::id, stage_history::entered_at))
        .first(conn)
        .optional()?;

    if let Some((entry_id, entered_at)) = open_entry {
        let duration = days_between(entered_at, now);
        diesel::update(stage_history::table.find(entry_id))
            .set((
                stage_history::exited_at.eq(Some(now)),
                stage_history::duration.eq(Some(duration)),
            ))
            .execute(conn)?;
    }

    diesel::insert_into(stage_history::table)
        .values(&NewStageHistoryEntry {
            id: Uuid::new_v4(),
            loan_id,
            stage: new_stage.to_string(),
            entered_at: now,
        })
        .execute(conn)?;

    diesel::update(loans::table.find(loan_id))
        .set((
            loans::current_stage.eq(new_stage),
            loans::time_in_stage.eq(0),
            loans::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(true)
}

/// Whole days from `from` to `to`, floor-rounded.
pub fn days_between(from: NaiveDateTime, to: NaiveDateTime) -> i32 {
    (to - from).num_days() as i32
}
