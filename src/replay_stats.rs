use std::collections::HashMap;
use std::str::FromStr;

use chrono::DateTime;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{RawReplay, ReplayStats, UsageCount, lenient_count, normalize_name};

/// Which replay schema an integration speaks. Chosen once from configuration,
/// never guessed per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayShape {
    /// A replay is a set of games; each participant carries a `score` (games
    /// won) and the replay carries `num_matches` and a `ranked` game count.
    #[default]
    ScoreSum,
    /// A replay is one game with a `winner` of 1 or 2.
    Winner,
}

impl FromStr for ReplayShape {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "score" | "score_sum" | "score-sum" | "scoresum" => Ok(Self::ScoreSum),
            "winner" => Ok(Self::Winner),
            other => Err(anyhow::anyhow!("unknown replay shape: {other}")),
        }
    }
}

#[derive(Debug, Error)]
enum Skip {
    #[error("malformed replay: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("replay does not carry two players")]
    MissingPlayers,
    #[error("player is not a participant")]
    NotAParticipant,
    #[error("unranked")]
    Unranked,
    #[error("replay reports no games")]
    NoGames,
    #[error("winner {0} is neither player")]
    BadWinner(u64),
}

#[derive(Debug, Deserialize)]
struct ReplayView {
    #[serde(default)]
    players: Vec<Participant>,
    #[serde(default)]
    p1: Option<Participant>,
    #[serde(default)]
    p2: Option<Participant>,
    #[serde(default, deserialize_with = "lenient_count")]
    num_matches: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    ranked: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    winner: Option<u64>,
    #[serde(default)]
    date: Option<f64>,
    #[serde(default)]
    ts: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Participant {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient_count")]
    score: Option<u64>,
    #[serde(default, alias = "char")]
    character: Option<String>,
}

impl ReplayView {
    fn participants(&self) -> Option<(&Participant, &Participant)> {
        if let [first, second, ..] = self.players.as_slice() {
            return Some((first, second));
        }
        match (&self.p1, &self.p2) {
            (Some(p1), Some(p2)) => Some((p1, p2)),
            _ => None,
        }
    }

    fn played_at(&self) -> Option<f64> {
        let raw = self.date.or(self.ts).filter(|t| *t > 0.0)?;
        // Millisecond stamps are far beyond any plausible seconds value.
        Some(if raw > 1e11 { raw / 1000.0 } else { raw })
    }
}

#[derive(Debug, Default)]
struct Tally {
    total_matches: u64,
    wins: u64,
    losses: u64,
    last_played: Option<f64>,
    opponents: HashMap<String, u64>,
    characters: HashMap<String, u64>,
}

impl Tally {
    fn add(&mut self, replay: &RawReplay, target: &str, shape: ReplayShape) -> Result<(), Skip> {
        let view = ReplayView::deserialize(&replay.0)?;
        let (first, second) = view.participants().ok_or(Skip::MissingPlayers)?;
        let (me, opponent, me_is_p1) = if normalize_name(&first.name) == target {
            (first, second, true)
        } else if normalize_name(&second.name) == target {
            (second, first, false)
        } else {
            return Err(Skip::NotAParticipant);
        };

        if let Some(at) = view.played_at() {
            self.last_played = Some(self.last_played.map_or(at, |prev| prev.max(at)));
        }

        match shape {
            ReplayShape::ScoreSum => self.add_score_sum(&view, me, opponent)?,
            ReplayShape::Winner => self.add_winner(&view, me_is_p1)?,
        }

        *self
            .opponents
            .entry(normalize_name(&opponent.name))
            .or_default() += 1;
        if let Some(character) = me.character.as_deref().filter(|c| !c.trim().is_empty()) {
            *self.characters.entry(character.to_string()).or_default() += 1;
        }
        Ok(())
    }

    fn add_score_sum(
        &mut self,
        view: &ReplayView,
        me: &Participant,
        opponent: &Participant,
    ) -> Result<(), Skip> {
        let ranked = view.ranked.unwrap_or(0);
        if ranked == 0 {
            return Err(Skip::Unranked);
        }
        let my_score = me.score.unwrap_or(0);
        let their_score = opponent.score.unwrap_or(0);
        let games = view
            .num_matches
            .filter(|n| *n > 0)
            .unwrap_or(my_score + their_score);
        if games == 0 {
            return Err(Skip::NoGames);
        }

        let ranked = ranked.min(games);
        let ranked_wins = if ranked == games {
            my_score.min(ranked)
        } else {
            let scaled = (my_score as f64) * (ranked as f64) / (games as f64);
            (scaled.round() as u64).min(ranked)
        };
        // Losses are derived so wins + losses is exactly the ranked count.
        let ranked_losses = ranked - ranked_wins;

        self.total_matches += ranked;
        self.wins += ranked_wins;
        self.losses += ranked_losses;
        Ok(())
    }

    fn add_winner(&mut self, view: &ReplayView, me_is_p1: bool) -> Result<(), Skip> {
        // Single-game records predate the ranked flag; no flag means ranked.
        if view.ranked == Some(0) {
            return Err(Skip::Unranked);
        }
        let winner = view.winner.unwrap_or(0);
        if winner != 1 && winner != 2 {
            return Err(Skip::BadWinner(winner));
        }

        self.total_matches += 1;
        if (winner == 1) == me_is_p1 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        Ok(())
    }

    fn finish(self) -> ReplayStats {
        let win_rate = if self.total_matches > 0 {
            round2(100.0 * self.wins as f64 / self.total_matches as f64)
        } else {
            0.0
        };
        ReplayStats {
            total_matches: self.total_matches,
            wins: self.wins,
            losses: self.losses,
            win_rate,
            last_played: self.last_played.and_then(format_timestamp),
            opponents: sorted_counts(self.opponents),
            characters: sorted_counts(self.characters),
        }
    }
}

/// Folds a player's raw replays into win/loss statistics.
///
/// Records the player is not part of, unranked records and records that do not
/// decode under `shape` are skipped; nothing here fails the whole run.
pub fn calculate_stats(replays: &[RawReplay], username: &str, shape: ReplayShape) -> ReplayStats {
    if replays.is_empty() {
        tracing::debug!(username, "no replays to aggregate");
        return ReplayStats::default();
    }

    let target = normalize_name(username);
    let mut tally = Tally::default();
    let mut skipped = 0usize;
    for replay in replays {
        match tally.add(replay, &target, shape) {
            Ok(()) => {}
            Err(Skip::Unranked) => skipped += 1,
            Err(err) => {
                skipped += 1;
                tracing::warn!(replay = %replay.label(), username, error = %err, "skipping replay");
            }
        }
    }

    let stats = tally.finish();
    tracing::info!(
        username,
        replays = replays.len(),
        skipped,
        total_matches = stats.total_matches,
        wins = stats.wins,
        losses = stats.losses,
        win_rate = stats.win_rate,
        "replay stats calculated"
    );
    stats
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn format_timestamp(secs: f64) -> Option<String> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs.fract()) * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos).map(|dt| dt.to_rfc3339())
}

fn sorted_counts(counts: HashMap<String, u64>) -> Vec<UsageCount> {
    let mut out: Vec<UsageCount> = counts
        .into_iter()
        .map(|(name, count)| UsageCount { name, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out
}
