//! Theme digest preparation.
//!
//! Gathers one user's recent entries, groups them into themes and tallies
//! their emotion tags. The result is the raw material a text generator turns
//! into a written summary; producing the prose is left to the caller.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use journal_core::entry::{recent_for_user, Entry};

use crate::cluster::Clusterer;
use crate::error::InsightError;
use crate::trends::{EmotionTrend, TrendAggregator};

/// Themes and emotion trends for one user over a trailing window of days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeDigest {
    pub user_id: String,
    pub window_days: u32,
    /// Texts per theme. Themes no entry fell into are omitted.
    pub themes: Vec<Vec<String>>,
    pub emotion_trends: EmotionTrend,
    /// Texts of every entry in the window, in journal order.
    pub entries_used: Vec<String>,
}

impl ThemeDigest {
    /// Build a digest from `user_id`'s entries dated within `days` of `today`.
    ///
    /// Fails with `InsufficientData` when the window holds no entries.
    pub async fn prepare(
        clusterer: &Clusterer,
        entries: &[Entry],
        user_id: &str,
        days: u32,
        k: usize,
        top_n: usize,
        today: NaiveDate,
    ) -> Result<Self, InsightError> {
        let recent = recent_for_user(entries, user_id, days, today);
        if recent.is_empty() {
            return Err(InsightError::InsufficientData(format!(
                "no entries for user '{}' in the last {} days",
                user_id, days
            )));
        }

        let partition = clusterer.cluster(recent.iter().copied(), k).await?;
        let themes: Vec<Vec<String>> = partition
            .non_empty()
            .map(|cluster| cluster.texts().into_iter().map(str::to_string).collect())
            .collect();

        let emotion_trends = TrendAggregator::new().top_trends(recent.iter().copied(), top_n);

        info!(
            user = user_id,
            days,
            entries = recent.len(),
            themes = themes.len(),
            "Prepared theme digest"
        );

        Ok(Self {
            user_id: user_id.to_string(),
            window_days: days,
            themes,
            emotion_trends,
            entries_used: recent.iter().map(|e| e.text.clone()).collect(),
        })
    }
}
