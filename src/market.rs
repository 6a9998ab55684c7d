//! Market catalog and market-family classification.
//!
//! Every market belongs to exactly one family, and the family decides which
//! exposure model and which settlement rule applies. Feeds only give us free
//! text ("Match Odds", "BOOKMAKER 0 COMM", "6 over runs IND"), so the family is
//! classified once, at the boundary, by [`MarketFamily::resolve`]. Nothing deeper
//! in the pipeline looks at market names again.

use crate::types::{EventId, MarketId, SelectionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural family of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketFamily {
    /// Fixed-odds, multi-runner, exactly one runner wins.
    MatchOdds,
    /// Two-outcome bookmaker market, exposure nets BACK stakes against LAY liability.
    Bookmaker,
    /// Spread/line market settled as YES/NO against a declared number.
    Fancy,
}

impl MarketFamily {
    /// Short kind used as the first segment of a settlement key.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketFamily::MatchOdds => "match_odds",
            MarketFamily::Bookmaker => "bookmaker",
            MarketFamily::Fancy => "fancy",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "match_odds" => Some(MarketFamily::MatchOdds),
            "bookmaker" => Some(MarketFamily::Bookmaker),
            "fancy" => Some(MarketFamily::Fancy),
            _ => None,
        }
    }

    /// Whether BACK and LAY on the same selection offset each other when pricing.
    pub fn nets_opposite_sides(&self) -> bool {
        !matches!(self, MarketFamily::Fancy)
    }

    /// Classify free text into a family. `None` when nothing recognisable is present.
    pub fn classify(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return None;
        }
        let joined: String = tokens.concat();
        let has_token = |t: &str| tokens.iter().any(|tok| *tok == t);

        // bookmaker names often also contain "match odds", so check it first
        if joined.contains("bookmaker") || joined.contains("bookmarker") || has_token("bm") {
            return Some(MarketFamily::Bookmaker);
        }
        if joined.contains("fancy")
            || joined.contains("session")
            || has_token("line")
            || has_token("runs")
            || has_token("over")
        {
            return Some(MarketFamily::Fancy);
        }
        if joined.contains("matchodds")
            || joined.contains("match")
            || joined.contains("winner")
            || has_token("odds")
            || has_token("mo")
        {
            return Some(MarketFamily::MatchOdds);
        }
        None
    }

    /// Total classification: hint first, then market name, then match odds.
    pub fn resolve(hint: Option<&str>, market_name: &str) -> Self {
        hint.and_then(Self::classify)
            .or_else(|| Self::classify(market_name))
            .unwrap_or(MarketFamily::MatchOdds)
    }
}

impl fmt::Display for MarketFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Deterministic settlement key: `{kind}:{event}:{market}`.
///
/// Fancy markets are registered one per line, so for them the market id is
/// also the line's selection id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(String);

impl SettlementId {
    pub fn new(family: MarketFamily, event_id: &EventId, market_id: &MarketId) -> Self {
        Self(format!("{}:{}:{}", family.kind(), event_id, market_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a key back into its parts. Event ids may not contain ':'.
    pub fn parse(raw: &str) -> Option<(MarketFamily, EventId, MarketId)> {
        let mut parts = raw.splitn(3, ':');
        let family = MarketFamily::from_kind(parts.next()?)?;
        let event = parts.next().filter(|s| !s.is_empty())?;
        let market = parts.next().filter(|s| !s.is_empty())?;
        Some((family, EventId::new(event), MarketId::new(market)))
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub event_id: EventId,
    pub market_id: MarketId,
    pub name: String,
    pub family: MarketFamily,
    /// Known runners. Empty when the feed did not publish a runner list.
    pub runners: Vec<SelectionId>,
    pub registered_at: Timestamp,
}

impl Market {
    pub fn new(
        event_id: EventId,
        market_id: MarketId,
        name: impl Into<String>,
        type_hint: Option<&str>,
        runners: Vec<SelectionId>,
        registered_at: Timestamp,
    ) -> Self {
        let name = name.into();
        let family = MarketFamily::resolve(type_hint, &name);
        Self {
            event_id,
            market_id,
            name,
            family,
            runners,
            registered_at,
        }
    }

    pub fn settlement_id(&self) -> SettlementId {
        SettlementId::new(self.family, &self.event_id, &self.market_id)
    }

    pub fn runners_known(&self) -> bool {
        !self.runners.is_empty()
    }

    pub fn has_runner(&self, selection: &SelectionId) -> bool {
        self.runners.iter().any(|r| r == selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_common_feed_names() {
        assert_eq!(MarketFamily::classify("Match Odds"), Some(MarketFamily::MatchOdds));
        assert_eq!(MarketFamily::classify("MATCH_ODDS"), Some(MarketFamily::MatchOdds));
        assert_eq!(MarketFamily::classify("Bookmaker 0 Comm"), Some(MarketFamily::Bookmaker));
        assert_eq!(MarketFamily::classify("bm"), Some(MarketFamily::Bookmaker));
        assert_eq!(MarketFamily::classify("6 over runs IND"), Some(MarketFamily::Fancy));
        assert_eq!(MarketFamily::classify("FANCY"), Some(MarketFamily::Fancy));
        assert_eq!(MarketFamily::classify("session"), Some(MarketFamily::Fancy));
        assert_eq!(MarketFamily::classify("???"), None);
        assert_eq!(MarketFamily::classify(""), None);
    }

    #[test]
    fn bookmaker_wins_over_match_in_mixed_names() {
        assert_eq!(
            MarketFamily::classify("Bookmaker Match Odds"),
            Some(MarketFamily::Bookmaker)
        );
    }

    #[test]
    fn resolve_prefers_hint_then_name_then_default() {
        assert_eq!(MarketFamily::resolve(Some("fancy"), "Match Odds"), MarketFamily::Fancy);
        assert_eq!(MarketFamily::resolve(Some("xyz"), "Bookmaker"), MarketFamily::Bookmaker);
        assert_eq!(MarketFamily::resolve(None, "Something else"), MarketFamily::MatchOdds);
    }

    #[test]
    fn hint_is_case_insensitive() {
        assert_eq!(MarketFamily::resolve(Some("BookMaker"), ""), MarketFamily::Bookmaker);
        assert_eq!(MarketFamily::resolve(Some("Fancy"), ""), MarketFamily::Fancy);
    }

    #[test]
    fn settlement_id_round_trip_parts() {
        let id = SettlementId::new(
            MarketFamily::Bookmaker,
            &EventId::new("evt-9"),
            &MarketId::new("1.77"),
        );
        assert_eq!(id.as_str(), "bookmaker:evt-9:1.77");

        let (family, event, market) = SettlementId::parse(id.as_str()).unwrap();
        assert_eq!(family, MarketFamily::Bookmaker);
        assert_eq!(event.as_str(), "evt-9");
        assert_eq!(market.as_str(), "1.77");
        assert!(SettlementId::parse("tennis:1:2").is_none());
        assert!(SettlementId::parse("fancy::2").is_none());
    }

    #[test]
    fn market_resolves_family_once() {
        let market = Market::new(
            EventId::new("e1"),
            MarketId::new("m1"),
            "Match Odds",
            None,
            vec![SelectionId::new("a"), SelectionId::new("b")],
            Timestamp::from_millis(0),
        );
        assert_eq!(market.family, MarketFamily::MatchOdds);
        assert!(market.has_runner(&SelectionId::new("a")));
        assert!(!market.has_runner(&SelectionId::new("c")));
        assert_eq!(market.settlement_id().as_str(), "match_odds:e1:m1");
    }
}
