//! End-to-end checks on realistic model responses.

use perp_guard_core::{Action, MarketSnapshot};
use perp_guard_decision::{parse_response, sorted_by_priority, validate_batch, LeverageCaps};
use std::collections::HashMap;

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_fenced_hold() {
    let raw = "```json\n{\"decisions\":[{\"symbol\":\"BTCUSDT\",\"action\":\"hold\",\"reasoning\":\"x\"}]}\n```";
    let parsed = parse_response(raw).unwrap();
    assert_eq!(parsed.decisions.len(), 1);
    assert_eq!(parsed.decisions[0].symbol, "BTCUSDT");
    assert_eq!(parsed.decisions[0].action, Action::Hold);
    assert_eq!(parsed.decisions[0].reasoning, "x");
}

#[test]
fn test_full_width_punctuation() {
    let raw = "分析完成。\n｛\"decisions\"：［｛\"symbol\"：\"ETHUSDT\"，\"action\"：\"wait\"｝］｝";
    let parsed = parse_response(raw).unwrap();
    assert_eq!(parsed.decisions[0].symbol, "ETHUSDT");
    assert_eq!(parsed.decisions[0].action, Action::Wait);
}

#[test]
fn test_reasoning_and_tagged_decisions() {
    let raw = "\u{FEFF}<reasoning>BTC rejected 100k twice; fading the move.</reasoning>\n\
               <decision>\n[\n  // short with tight stop\n  {\"symbol\": \"BTCUSDT\", \"action\": \"open_short\", \
               \"leverage\": \"5\", \"position_size_usd\": 800, \"stop_loss\": 101000, \
               \"take_profit\": 93000, \"confidence\": 72}\n]\n</decision>";
    let parsed = parse_response(raw).unwrap();
    assert_eq!(parsed.cot_trace, "BTC rejected 100k twice; fading the move.");
    let decision = &parsed.decisions[0];
    assert_eq!(decision.action, Action::OpenShort);
    assert_eq!(decision.leverage, 5);
    assert_eq!(decision.confidence, 72);
}

#[test]
fn test_unparsable_response_keeps_reasoning() {
    let raw = "The market is closed for maintenance, I will check again later.";
    let failure = parse_response(raw).unwrap_err();
    assert_eq!(failure.cot_trace, raw);
    assert_eq!(failure.error.preview, raw);
}

#[test]
fn test_nan_size_string_is_not_a_decision() {
    let raw = r#"{"decisions":[{"symbol":"BTCUSDT","action":"open_long","leverage":5,
        "position_size_usd":"NaN","stop_loss":100000,"take_profit":140000}]}"#;
    assert!(parse_response(raw).is_err());
}

// =============================================================================
// Validation and Sequencing
// =============================================================================

#[test]
fn test_parsed_batch_is_sequenced_and_validated() {
    let raw = r#"{"decisions": [
        {"symbol": "SOLUSDT", "action": "open_long", "leverage": 3, "position_size_usd": 150,
         "stop_loss": 140, "take_profit": 190, "risk_usd": 12},
        {"symbol": "ETHUSDT", "action": "close_short"},
        {"symbol": "BTCUSDT", "action": "hold"}
    ]}"#;
    let parsed = parse_response(raw).unwrap();
    let ordered = sorted_by_priority(&parsed.decisions);
    let actions: Vec<Action> = ordered.iter().map(|d| d.action.clone()).collect();
    assert_eq!(actions, vec![Action::CloseShort, Action::OpenLong, Action::Hold]);

    let mut markets = HashMap::new();
    markets.insert(
        "SOLUSDT".to_string(),
        MarketSnapshot {
            symbol: "SOLUSDT".to_string(),
            current_price: 150.0,
            atr14: Some(2.5),
        },
    );
    assert!(validate_batch(&ordered, 1000.0, &LeverageCaps::default(), &markets).is_ok());
}

#[test]
fn test_one_bad_decision_rejects_batch() {
    let raw = r#"[{"symbol": "BTCUSDT", "action": "hold"},
                  {"symbol": "DOGEUSDT", "action": "open_long", "leverage": 20,
                   "position_size_usd": 50, "stop_loss": 0.1, "take_profit": 0.2}]"#;
    let parsed = parse_response(raw).unwrap();
    let err = validate_batch(&parsed.decisions, 1000.0, &LeverageCaps::default(), &HashMap::new()).unwrap_err();
    assert_eq!(err.index, 1);
    assert!(err.to_string().starts_with("Decision #2 failed validation: leverage must be within 1-5"));
}
