use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One ladder entry as served by the ranking API.
///
/// Only the fields the search and the driver read are typed; anything else the
/// API sends is kept in `extra` and written back untouched by the caches.
/// Typed fields decode leniently so one odd record never sinks a whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "lenient_country",
        skip_serializing_if = "Option::is_none"
    )]
    pub country: Option<Country>,
    #[serde(
        default,
        deserialize_with = "lenient_gameinfo",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub gameinfo: BTreeMap<String, GameStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_stats: Option<ReplayStats>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country: None,
            gameinfo: BTreeMap::new(),
            replay_stats: None,
            extra: Map::new(),
        }
    }

    /// Cache key: the lower-cased name.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        normalize_name(&self.name) == normalize_name(name)
    }

    pub fn stats_for(&self, game_id: &str) -> Option<&GameStats> {
        self.gameinfo.get(game_id)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Either `{iso_code, full_name}` or, in older payloads, a bare country code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    #[serde(default)]
    pub iso_code: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Per-game ladder statistics nested under `gameinfo.<game_id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    #[serde(default, deserialize_with = "lenient_total")]
    pub num_matches: u64,
    #[serde(default, deserialize_with = "lenient_total")]
    pub wins: u64,
    #[serde(default, deserialize_with = "lenient_total")]
    pub losses: u64,
    #[serde(default, deserialize_with = "lenient_total")]
    pub time_played: u64,
    #[serde(default, deserialize_with = "lenient_tier")]
    pub rank: Option<u8>,
}

impl GameStats {
    pub fn tier(&self) -> RankTier {
        RankTier(self.rank)
    }
}

/// Ladder tier as the numeric code the API reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankTier(pub Option<u8>);

impl RankTier {
    pub fn label(self) -> &'static str {
        match self.0 {
            Some(1) => "E",
            Some(2) => "D",
            Some(3) => "C",
            Some(4) => "B",
            Some(5) => "A",
            Some(6) => "S",
            _ => "?",
        }
    }
}

/// A replay exactly as the API returned it. Interpretation is left to the
/// aggregator, which picks one schema per integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReplay(pub Value);

impl RawReplay {
    /// Identifier used in log lines; `quarkid` or `quark` when present.
    pub fn label(&self) -> String {
        self.0
            .get("quarkid")
            .or_else(|| self.0.get("quark"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Win/loss figures derived from a player's replays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub total_matches: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opponents: Vec<UsageCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<UsageCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCount {
    pub name: String,
    pub count: u64,
}

/// Accepts counts sent as integers, floats, booleans or numeric strings;
/// anything else reads as absent.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(u64::from(flag)),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    })
}

fn lenient_total<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_count(deserializer)?.unwrap_or(0))
}

fn lenient_tier<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_count(deserializer)?.and_then(|n| u8::try_from(n).ok()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_country<'de, D>(deserializer: D) -> Result<Option<Country>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(code)) if !code.trim().is_empty() => Some(Country {
            iso_code: Some(code.trim().to_string()),
            full_name: None,
        }),
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

/// Keeps the per-game blocks that decode and drops the rest.
fn lenient_gameinfo<'de, D>(deserializer: D) -> Result<BTreeMap<String, GameStats>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Object(games)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(games
        .into_iter()
        .filter_map(|(game, stats)| {
            GameStats::deserialize(stats)
                .map(|stats| (game, stats))
                .ok()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{"name":"Zeku","country":{"iso_code":"BR","full_name":"Brazil"},
            "gameinfo":{"kof2002":{"num_matches":40,"wins":25,"losses":15,"time_played":3600,"rank":4}},
            "avatar":"x.png","elo":1811}"#;
        let player: PlayerRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(player.key(), "zeku");
        assert_eq!(player.stats_for("kof2002").unwrap().tier().label(), "B");
        assert_eq!(player.extra.get("elo"), Some(&Value::from(1811)));

        let back = serde_json::to_value(&player).unwrap();
        assert_eq!(back.get("avatar"), Some(&Value::from("x.png")));
        assert!(back.get("replay_stats").is_none());
    }

    #[test]
    fn odd_field_types_do_not_reject_the_record() {
        let raw = r#"{"name":"MrTerry","country":"PE",
            "gameinfo":{"kof2002":{"num_matches":"12","wins":null,"losses":4.0,"rank":"3"},
                        "broken":"n/a"}}"#;
        let player: PlayerRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(
            player.country,
            Some(Country {
                iso_code: Some("PE".to_string()),
                full_name: None
            })
        );
        let stats = player.stats_for("kof2002").unwrap();
        assert_eq!((stats.num_matches, stats.wins, stats.losses), (12, 0, 4));
        assert_eq!(stats.tier().label(), "C");
        assert_eq!(player.gameinfo.len(), 1);

        let nameless: PlayerRecord = serde_json::from_str(r#"{"name":null,"country":7}"#).unwrap();
        assert!(nameless.key().is_empty());
        assert!(nameless.country.is_none());
    }

    #[test]
    fn name_match_ignores_case() {
        let player = PlayerRecord::new("MrTerry");
        assert!(player.matches_name("mrterry"));
        assert!(!player.matches_name("mrterr"));
    }

    #[test]
    fn unknown_tier_renders_question_mark() {
        assert_eq!(RankTier(None).label(), "?");
        assert_eq!(RankTier(Some(9)).label(), "?");
        assert_eq!(RankTier(Some(6)).label(), "S");
    }
}
