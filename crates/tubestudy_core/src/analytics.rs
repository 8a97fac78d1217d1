//! crates/tubestudy_core/src/analytics.rs
//!
//! Longitudinal study statistics derived from the session collection.
//! Everything here is a pure function of its inputs.

use crate::domain::VideoSession;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of sessions shown on the dashboard.
pub const RECENT_SESSION_LIMIT: usize = 5;

/// Largest gap between two activity dates that keeps a streak alive.
const MAX_STREAK_GAP_HOURS: i64 = 36;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_videos: usize,
    pub total_quizzes: usize,
    pub total_questions: u32,
    pub average_score: u32,
    pub best_score: u32,
    /// Local calendar date → number of quiz completions on that date.
    pub activity_dates: BTreeMap<NaiveDate, u32>,
    pub current_streak: u32,
    pub recent_sessions: Vec<VideoSession>,
}

/// Computes dashboard statistics relative to `now`, bucketing by `now`'s time zone.
pub fn compute_stats<Tz: TimeZone>(sessions: &[VideoSession], now: &DateTime<Tz>) -> DashboardStats {
    let results: Vec<_> = sessions.iter().flat_map(|s| &s.quiz_results).collect();

    let percentages: Vec<u32> = results.iter().map(|r| r.percentage()).collect();
    let average_score = if percentages.is_empty() {
        0
    } else {
        let total: u32 = percentages.iter().sum();
        (f64::from(total) / percentages.len() as f64).round() as u32
    };

    let tz = now.timezone();
    let mut activity_dates = BTreeMap::new();
    for result in &results {
        let date = result.completed_at.with_timezone(&tz).date_naive();
        *activity_dates.entry(date).or_insert(0) += 1;
    }

    let mut recent_sessions = sessions.to_vec();
    recent_sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_sessions.truncate(RECENT_SESSION_LIMIT);

    DashboardStats {
        total_videos: sessions.len(),
        total_quizzes: results.len(),
        total_questions: results.iter().map(|r| r.total_questions).sum(),
        average_score,
        best_score: percentages.iter().copied().max().unwrap_or(0),
        current_streak: current_streak(&activity_dates, now.date_naive()),
        activity_dates,
        recent_sessions,
    }
}

/// `compute_stats` against the local clock.
pub fn compute_stats_now(sessions: &[VideoSession]) -> DashboardStats {
    compute_stats(sessions, &Local::now())
}

/// Counts consecutive activity days ending today or yesterday.
pub fn current_streak(activity_dates: &BTreeMap<NaiveDate, u32>, today: NaiveDate) -> u32 {
    let mut dates = activity_dates
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(date, _)| *date)
        .rev();

    let Some(mut previous) = dates.next() else {
        return 0;
    };
    // A date after `today` comes from clock skew and counts as today.
    let since_last = (today - previous).num_days();
    if since_last > 1 {
        return 0;
    }

    let mut streak = 1;
    for date in dates {
        if (previous - date).num_hours() > MAX_STREAK_GAP_HOURS {
            break;
        }
        streak += 1;
        previous = date;
    }
    streak
}
