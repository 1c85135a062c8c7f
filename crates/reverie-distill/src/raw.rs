//! Raw episodes: the unreduced baseline stored for every attempt.

use reverie_types::{AttemptLog, RawEpisode, ScenarioDetails};

use crate::reducers::{focus_position, join_sequence};

/// Build the terse factual record of `log`, identified `<runId>_<attemptIndex>`.
pub fn raw_episode(log: &AttemptLog) -> RawEpisode {
    let status = if log.success { "Successful" } else { "Failed" };
    let text = match &log.details {
        ScenarioDetails::LeverPuzzle { sequence } if sequence.is_empty() => {
            format!("{status} lever sequence unknown")
        }
        ScenarioDetails::LeverPuzzle { sequence } => {
            format!("{status} lever sequence {}", join_sequence(sequence))
        }
        ScenarioDetails::KeyFinder {
            target_pos,
            key_pos,
            search_path,
            ..
        } => {
            let status = if log.success { "Key found" } else { "Key not found" };
            match focus_position(*key_pos, *target_pos, search_path) {
                Some(focus) => format!("{status} at {focus}"),
                None => format!("{status} at unknown position"),
            }
        }
        ScenarioDetails::Maze {
            step_count,
            turn_sequence,
            ..
        } => {
            let steps = step_count.unwrap_or(turn_sequence.len() as u32);
            format!("{status} maze navigation with {steps} steps")
        }
    };
    RawEpisode {
        id: format!("{}_{}", log.run_id, log.attempt_index),
        scenario_id: log.scenario_id.clone(),
        kind: log.details.kind(),
        text,
        success: log.success,
        timestamp: log.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_types::{Position, ScenarioKind};

    #[test]
    fn lever_episode() {
        let log = AttemptLog::new(
            "lever_puzzle_3",
            "run-1",
            4,
            true,
            ScenarioDetails::LeverPuzzle { sequence: vec![2, 3, 1] },
        );
        let episode = raw_episode(&log);
        assert_eq!(episode.id, "run-1_4");
        assert_eq!(episode.text, "Successful lever sequence 2-3-1");
        assert_eq!(episode.kind, ScenarioKind::LeverPuzzle);
        assert!(episode.success);
    }

    #[test]
    fn key_episode_reports_focus() {
        let log = AttemptLog::new(
            "key_unlock_1",
            "run-2",
            1,
            false,
            ScenarioDetails::KeyFinder {
                target_pos: Some(Position::new(4.0, 64.0, -1.0)),
                key_pos: None,
                search_path: vec![],
                visited_cells: vec![],
                actions: vec![],
            },
        );
        assert_eq!(raw_episode(&log).text, "Key not found at (4,64,-1)");
    }

    #[test]
    fn maze_episode_counts_turns_without_step_count() {
        let log = AttemptLog::new(
            "maze_v1",
            "run-3",
            2,
            false,
            ScenarioDetails::Maze {
                step_count: None,
                turn_sequence: vec![Position::new(1.0, 64.0, 0.0); 3],
                actions: vec![],
            },
        );
        let episode = raw_episode(&log);
        assert_eq!(episode.text, "Failed maze navigation with 3 steps");
        assert_eq!(episode.id, "run-3_2");
    }
}
