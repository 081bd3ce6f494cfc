mod common;

use serde_json::{Value, json};

use fcrank::models::{RawReplay, ReplayStats, UsageCount};
use fcrank::replay_stats::{ReplayShape, calculate_stats};

use common::fixture_json;

fn score_replay(me: (&str, u64), them: (&str, u64), total: u64, ranked: u64) -> RawReplay {
    RawReplay(json!({
        "quarkid": "q",
        "num_matches": total,
        "ranked": ranked,
        "players": [
            {"name": me.0, "score": me.1},
            {"name": them.0, "score": them.1}
        ]
    }))
}

fn fixture_replays(name: &str) -> Vec<RawReplay> {
    let value = fixture_json(name);
    let list = match value.pointer("/results/results") {
        Some(Value::Array(list)) => list.clone(),
        _ => value.as_array().cloned().expect("fixture should hold replays"),
    };
    list.into_iter().map(RawReplay).collect()
}

#[test]
fn no_replays_gives_zeroed_stats() {
    let stats = calculate_stats(&[], "anyone", ReplayShape::ScoreSum);
    assert_eq!(stats, ReplayStats::default());
    assert_eq!(stats.total_matches, 0);
    assert_eq!(stats.wins, 0);
    assert_eq!(stats.losses, 0);
    assert_eq!(stats.win_rate, 0.0);
}

#[test]
fn fully_ranked_replay_adds_scores_directly() {
    let replays = [score_replay(("alice", 7), ("bob", 3), 10, 10)];
    let stats = calculate_stats(&replays, "alice", ReplayShape::ScoreSum);
    assert_eq!(stats.wins, 7);
    assert_eq!(stats.losses, 3);
    assert_eq!(stats.total_matches, 10);
    assert_eq!(stats.win_rate, 70.0);
}

#[test]
fn partially_ranked_replay_derives_losses_from_wins() {
    let replays = [score_replay(("alice", 6), ("bob", 4), 10, 4)];
    let stats = calculate_stats(&replays, "alice", ReplayShape::ScoreSum);
    assert_eq!(stats.wins + stats.losses, 4);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 2);
    assert_eq!(stats.total_matches, 4);
}

#[test]
fn partial_ratio_never_overshoots_ranked_count() {
    // 9 * 5/10 = 4.5 rounds up to 5, leaving exactly 0 ranked losses.
    let replays = [score_replay(("alice", 9), ("bob", 1), 10, 5)];
    let stats = calculate_stats(&replays, "ALICE", ReplayShape::ScoreSum);
    assert_eq!(stats.wins, 5);
    assert_eq!(stats.losses, 0);
    assert_eq!(stats.total_matches, 5);
}

#[test]
fn score_fixture_skips_unranked_foreign_and_malformed_replays() {
    let replays = fixture_replays("searchquarks_score.json");
    let stats = calculate_stats(&replays, "MrTerry", ReplayShape::ScoreSum);

    assert_eq!(stats.total_matches, 17);
    assert_eq!(stats.wins, 10);
    assert_eq!(stats.losses, 7);
    assert_eq!(stats.win_rate, 58.82);
    assert_eq!(stats.last_played.as_deref(), Some("2024-10-15T14:28:20+00:00"));
    assert_eq!(
        stats.opponents,
        vec![
            UsageCount {
                name: "zeku".to_string(),
                count: 2
            },
            UsageCount {
                name: "xiaohai_fan".to_string(),
                count: 1
            },
        ]
    );
    assert!(stats.characters.is_empty());
}

#[test]
fn winner_fixture_counts_one_match_per_replay() {
    let replays = fixture_replays("replays_winner.json");
    let stats = calculate_stats(&replays, "mrterry", ReplayShape::Winner);

    assert_eq!(stats.total_matches, 3);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.win_rate, 66.67);
    assert_eq!(stats.last_played.as_deref(), Some("2024-10-08T15:06:40+00:00"));
    assert_eq!(stats.opponents[0].name, "zeku");
    assert_eq!(stats.opponents[0].count, 2);
    assert_eq!(
        stats.characters,
        vec![
            UsageCount {
                name: "Iori".to_string(),
                count: 2
            },
            UsageCount {
                name: "Athena".to_string(),
                count: 1
            },
        ]
    );
}

#[test]
fn shape_is_not_guessed_per_record() {
    // Winner-shaped records carry no scores, so under the score-sum reading
    // they are unranked (no `ranked` count) and contribute nothing.
    let replays = fixture_replays("replays_winner.json");
    let stats = calculate_stats(&replays, "mrterry", ReplayShape::ScoreSum);
    assert_eq!(stats.total_matches, 0);
    assert_eq!(stats.win_rate, 0.0);
}

#[test]
fn p1_p2_layout_is_accepted_for_score_sums() {
    let replays = [RawReplay(json!({
        "num_matches": 5,
        "ranked": 5,
        "p1": {"name": "bob", "score": 2},
        "p2": {"name": "alice", "score": 3}
    }))];
    let stats = calculate_stats(&replays, "alice", ReplayShape::ScoreSum);
    assert_eq!((stats.wins, stats.losses, stats.total_matches), (3, 2, 5));
}
