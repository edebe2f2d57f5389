use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::ParticipantRole;

/// One fetchable unit of work: a single event detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarvestJob {
    /// Stable identifier taken from the listing hyperlink. Unique within a run.
    pub external_id: String,
    pub context_date: NaiveDate,
    pub away: String,
    pub home: String,
    /// Fully qualified detail page URL.
    pub url: String,
    pub retry_count: u32,
}

impl HarvestJob {
    pub fn new(
        external_id: impl Into<String>,
        context_date: NaiveDate,
        matchup: Matchup,
        url: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            context_date,
            away: matchup.away,
            home: matchup.home,
            url: url.into(),
            retry_count: 0,
        }
    }

    pub fn participant(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Home => &self.home,
            ParticipantRole::Away => &self.away,
        }
    }

    pub fn opponent(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Home => &self.away,
            ParticipantRole::Away => &self.home,
        }
    }
}

/// Home/away pairing parsed from a listing matchup cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Matchup {
    pub home: String,
    pub away: String,
}

impl Matchup {
    const AWAY_SEPARATOR: &'static str = " @ ";
    const HOME_SEPARATOR: &'static str = " vs. ";

    /// `"A @ B"` means A visits B; `"A vs. B"` means A hosts B.
    ///
    /// Returns `None` when neither separator is present or a side is empty.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();

        let (home, away) = if let Some((a, b)) = text.split_once(Self::AWAY_SEPARATOR) {
            (b.trim(), a.trim())
        } else if let Some((a, b)) = text.split_once(Self::HOME_SEPARATOR) {
            (a.trim(), b.trim())
        } else {
            return None;
        };

        if home.is_empty() || away.is_empty() {
            return None;
        }

        Some(Self {
            home: home.to_string(),
            away: away.to_string(),
        })
    }
}
