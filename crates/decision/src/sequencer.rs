//! Execution ordering for a validated batch.

use perp_guard_core::Decision;

/// Orders decisions so capital is released before it is committed.
///
/// Closes and partial closes run first, then stop/take updates, then opens, then holds and
/// waits. The sort is stable, so decisions of equal priority keep their original order.
pub fn sort_by_priority(decisions: &mut [Decision]) {
    decisions.sort_by_key(|d| d.action.priority());
}

/// Sorted copy of `decisions`.
#[must_use]
pub fn sorted_by_priority(decisions: &[Decision]) -> Vec<Decision> {
    let mut sorted = decisions.to_vec();
    sort_by_priority(&mut sorted);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_guard_core::Action;

    fn actions(decisions: &[Decision]) -> Vec<Action> {
        decisions.iter().map(|d| d.action.clone()).collect()
    }

    #[test]
    fn test_close_runs_before_open() {
        let decisions = vec![
            Decision::new("BTCUSDT", Action::OpenLong),
            Decision::new("ETHUSDT", Action::CloseShort),
            Decision::new("SOLUSDT", Action::Hold),
        ];
        assert_eq!(
            actions(&sorted_by_priority(&decisions)),
            vec![Action::CloseShort, Action::OpenLong, Action::Hold]
        );
    }

    #[test]
    fn test_sort_is_stable_and_unknown_last() {
        let mut decisions = vec![
            Decision::new("A", "mystery"),
            Decision::new("B", Action::OpenShort),
            Decision::new("C", Action::UpdateStopLoss),
            Decision::new("D", Action::OpenLong),
            Decision::new("E", Action::PartialClose),
            Decision::new("F", Action::Wait),
            Decision::new("G", Action::UpdateTakeProfit),
        ];
        sort_by_priority(&mut decisions);
        let symbols: Vec<&str> = decisions.iter().map(|d| d.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["E", "C", "G", "B", "D", "F", "A"]);
    }
}
