//! Round-robin queue construction.
//!
//! The queue is the precomputed answer to "who receives line `i`". It is built
//! once when a job is created and the tick scheduler reproduces the same
//! assignment as it delivers: runs of `lines_per_tick` lines go to each target
//! in turn, one full pass over the targets per round.

use crate::job::{LineStatus, LinesPerTick, QueueItem};

/// Lines in one round: `max(targets, 1) * lines_per_tick`.
pub fn round_size(target_count: usize, lines_per_tick: usize) -> usize {
    target_count.max(1) * lines_per_tick.max(1)
}

/// Index into the target list for the 0-based line `index`.
pub fn target_index(index: usize, target_count: usize, lines_per_tick: usize) -> usize {
    let lines_per_tick = lines_per_tick.max(1);
    (index % round_size(target_count, lines_per_tick)) / lines_per_tick
}

/// Recipient of the 0-based line `index`.
///
/// Falls back to the first target if the computed slot is out of range, and to
/// an empty id when there are no targets at all.
pub fn assigned_target(targets: &[String], lines_per_tick: usize, index: usize) -> &str {
    let slot = target_index(index, targets.len(), lines_per_tick);
    targets
        .get(slot)
        .or_else(|| targets.first())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Build the full per-line assignment for a job. Pure and deterministic.
pub fn build_queue(
    targets: &[String],
    lines_per_tick: LinesPerTick,
    text_lines: &[String],
) -> Vec<QueueItem> {
    text_lines
        .iter()
        .enumerate()
        .map(|(index, line)| QueueItem {
            line_number: index + 1,
            line: line.clone(),
            user_id: assigned_target(targets, lines_per_tick.get(), index).to_string(),
            status: LineStatus::Pending,
            sent_at: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn lpt(n: i64) -> LinesPerTick {
        LinesPerTick::new(n).unwrap()
    }

    #[test]
    fn test_alternates_single_lines() {
        let queue = build_queue(&strings(&["u1", "u2"]), lpt(1), &strings(&["a", "b", "c", "d"]));
        let pairs: Vec<(&str, &str)> = queue
            .iter()
            .map(|q| (q.line.as_str(), q.user_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "u1"), ("b", "u2"), ("c", "u1"), ("d", "u2")]);
    }

    #[test]
    fn test_contiguous_runs_per_target() {
        let lines: Vec<String> = (0..14).map(|i| format!("line {}", i)).collect();
        let queue = build_queue(&strings(&["u1", "u2"]), lpt(3), &lines);
        let users: Vec<&str> = queue.iter().map(|q| q.user_id.as_str()).collect();
        assert_eq!(
            users,
            vec![
                "u1", "u1", "u1", "u2", "u2", "u2", // round 1
                "u1", "u1", "u1", "u2", "u2", "u2", // round 2
                "u1", "u1", // partial round
            ]
        );
    }

    #[test]
    fn test_single_target_gets_everything_in_order() {
        let lines = strings(&["a", "b", "c", "d", "e"]);
        let queue = build_queue(&strings(&["only"]), lpt(3), &lines);
        assert!(queue.iter().all(|q| q.user_id == "only"));
        let texts: Vec<&str> = queue.iter().map(|q| q.line.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_matches_assignment_formula() {
        let targets = strings(&["t0", "t1", "t2"]);
        let lines: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        for l in LinesPerTick::ALLOWED {
            let queue = build_queue(&targets, lpt(i64::from(l)), &lines);
            let l = l as usize;
            for (i, item) in queue.iter().enumerate() {
                assert_eq!(item.user_id, targets[(i % (targets.len() * l)) / l]);
            }
        }
    }

    #[test]
    fn test_queue_is_deterministic() {
        let targets = strings(&["a", "b", "c"]);
        let lines: Vec<String> = (0..37).map(|i| format!("{}", i)).collect();
        assert_eq!(
            build_queue(&targets, lpt(5), &lines),
            build_queue(&targets, lpt(5), &lines)
        );
    }

    #[test]
    fn test_line_numbers_and_initial_state() {
        let queue = build_queue(&strings(&["u1"]), lpt(1), &strings(&["x", "y"]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].line_number, 1);
        assert_eq!(queue[1].line_number, 2);
        assert!(queue
            .iter()
            .all(|q| q.status == LineStatus::Pending && q.sent_at.is_none()));
    }

    #[test]
    fn test_empty_text_builds_empty_queue() {
        assert!(build_queue(&strings(&["u1"]), lpt(1), &[]).is_empty());
    }

    #[test]
    fn test_empty_targets_fall_back_to_empty_id() {
        let queue = build_queue(&[], lpt(3), &strings(&["a", "b"]));
        assert!(queue.iter().all(|q| q.user_id.is_empty()));
    }

    #[test]
    fn test_round_size() {
        assert_eq!(round_size(2, 3), 6);
        assert_eq!(round_size(0, 5), 5);
        assert_eq!(target_index(7, 2, 3), 0);
        assert_eq!(target_index(4, 2, 3), 1);
    }
}
