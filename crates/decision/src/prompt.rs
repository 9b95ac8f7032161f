//! System and user prompts sent to the decision maker.

use perp_guard_core::{LeverageConfig, PositionSnapshot, PromptConfig, TradingContext};
use std::fmt::Write;

const BASE_STRATEGY: &str = "\
You are a disciplined crypto perpetual futures trader. Decide on every open position and \
every candidate symbol using the market data provided.
Core principles:
- Strict risk control: per-trade risk at most 2% of equity
- Trade with the trend and avoid counter-trend entries
- Always set a stop-loss and a take-profit";

const OUTPUT_SCHEMA: &str = r#"{
  "decisions": [
    {
      "symbol": "BTCUSDT",
      "action": "open_long|open_short|close_long|close_short|update_stop_loss|update_take_profit|partial_close|hold|wait",
      "leverage": <int>,
      "position_size_usd": <number>,
      "stop_loss": <number>,
      "take_profit": <number>,
      "new_stop_loss": <number>,
      "new_take_profit": <number>,
      "close_percentage": <number>,
      "confidence": <int>,
      "risk_usd": <number>,
      "reasoning": "short rationale"
    }
  ]
}"#;

fn hard_constraints(equity: f64, leverage: &LeverageConfig) -> String {
    format!(
        "# Hard Constraints (Risk Control)\n\n\
         1) Risk-Reward: target >= 3.0:1.\n\
         2) Max positions: 3 symbols.\n\
         3) Position size caps: Alt {:.0}-{:.0} USDT | BTC/ETH {:.0}-{:.0} USDT\n\
         4) Leverage caps: Alt <= {}x | BTC/ETH <= {}x (hard limit).\n\
         5) Margin usage: total <= 90%.\n\
         6) Min notional: >= 12 USDT (BTC/ETH >= 60 USDT).\n\
         7) Volatility-aware stops: SL/TP at least 1x ATR14 from entry.\n\
         8) Stop-loss and take-profit placement:\n   \
            - LONG: stop_loss < entry_price < take_profit\n   \
            - SHORT: take_profit < entry_price < stop_loss\n",
        equity * 0.8,
        equity * 1.5,
        equity * 5.0,
        equity * 10.0,
        leverage.altcoin,
        leverage.major,
    )
}

/// Builds the system prompt.
///
/// With `override_base` set and a non-empty custom prompt, the custom prompt is sent alone.
/// Otherwise the custom prompt, if any, is appended to the base strategy, constraints and
/// output schema.
#[must_use]
pub fn build_system_prompt(equity: f64, leverage: &LeverageConfig, prompt: &PromptConfig) -> String {
    let custom = prompt.custom_prompt.trim();
    if prompt.override_base && !custom.is_empty() {
        return custom.to_string();
    }

    let mut out = String::with_capacity(2048);
    out.push_str(BASE_STRATEGY);
    out.push_str("\n\n");
    out.push_str(&hard_constraints(equity, leverage));
    out.push_str("\n# Output Format (strict)\n\n");
    out.push_str("Return ONLY a single JSON object with key 'decisions'. No extra text.\n");
    out.push_str("Example (schema only, not a suggestion):\n");
    out.push_str(OUTPUT_SCHEMA);
    out.push_str("\n\nRequired fields for opens: leverage, position_size_usd, stop_loss, take_profit, confidence, risk_usd, reasoning.\n");

    if !custom.is_empty() {
        out.push_str("\n# Custom Strategy\n\n");
        out.push_str(custom);
        out.push_str("\n\nThe custom strategy supplements the rules above and cannot override the risk constraints.\n");
    }
    out
}

fn holding_duration(position: &PositionSnapshot, ctx: &TradingContext) -> String {
    let minutes = (ctx.current_time - position.first_seen).num_minutes().max(0);
    if minutes < 60 {
        format!("{minutes}m")
    } else {
        format!("{}h{}m", minutes / 60, minutes % 60)
    }
}

/// Builds the user prompt summarizing account, positions and candidates for this cycle.
#[must_use]
pub fn build_user_prompt(ctx: &TradingContext) -> String {
    let mut out = String::with_capacity(4096);
    let account = &ctx.account;

    // Writing to a String cannot fail
    let _ = writeln!(
        out,
        "Time: {} | Cycle: #{} | Runtime: {} min\n",
        ctx.current_time.format("%Y-%m-%d %H:%M:%S UTC"),
        ctx.cycle,
        ctx.runtime_minutes
    );

    if let Some(btc) = ctx.markets.get("BTCUSDT") {
        let _ = writeln!(out, "BTC: {:.2}\n", btc.current_price);
    }

    let available_pct = if account.total_equity > 0.0 {
        account.available_balance / account.total_equity * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Account: equity {:.2} | available {:.2} ({:.1}%) | P&L {:+.2}% | margin {:.1}% | positions {}\n",
        account.total_equity,
        account.available_balance,
        available_pct,
        account.total_pnl_pct,
        account.margin_used_pct,
        account.position_count
    );

    if ctx.positions.is_empty() {
        out.push_str("Current positions: none\n\n");
    } else {
        out.push_str("## Current Positions\n");
        for (i, position) in ctx.positions.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} {} | entry {:.4} mark {:.4} | P&L {:+.2}% ({:+.2} USDT) | peak {:.2}% | {}x | margin {:.0} | liq {:.4} | held {}",
                i + 1,
                position.symbol,
                position.side.as_str().to_uppercase(),
                position.entry_price,
                position.mark_price,
                position.unrealized_pnl_pct,
                position.unrealized_pnl,
                position.peak_pnl_pct,
                position.leverage,
                position.margin_used,
                position.liquidation_price,
                holding_duration(position, ctx),
            );
            if let Some(market) = ctx.markets.get(&position.symbol) {
                let _ = writeln!(out, "   price {:.4}{}", market.current_price, atr_suffix(market.atr14));
            }
        }
        out.push('\n');
    }

    let listed: Vec<_> = ctx.candidates_with_market().collect();
    let _ = writeln!(out, "## Candidates ({})\n", listed.len());
    for (i, (coin, market)) in listed.iter().enumerate() {
        let sources = if coin.sources.len() > 1 {
            format!(" ({})", coin.sources.join("+"))
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "### {}. {}{}\nprice {:.4}{}\n",
            i + 1,
            coin.symbol,
            sources,
            market.current_price,
            atr_suffix(market.atr14)
        );
    }

    if let Some(performance) = &ctx.performance {
        let _ = writeln!(
            out,
            "## Performance\nwin rate {:.1}% | profit factor {:.2} | sharpe {:.2}\n",
            performance.win_rate, performance.profit_factor, performance.sharpe_ratio
        );
    }

    out.push_str("---\n\nAnalyze and output your decisions (reasoning, then JSON).\n");
    out
}

fn atr_suffix(atr14: Option<f64>) -> String {
    atr14.map_or_else(String::new, |atr| format!(" | ATR14 {atr:.4}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use perp_guard_core::{AccountSnapshot, CandidateCoin, MarketSnapshot, PerformanceWindow, Side};

    fn context() -> TradingContext {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut ctx = TradingContext::new(now, 7);
        ctx.runtime_minutes = 42;
        ctx.account = AccountSnapshot {
            total_equity: 1000.0,
            available_balance: 800.0,
            total_pnl_pct: 2.5,
            margin_used_pct: 20.0,
            position_count: 1,
            ..AccountSnapshot::default()
        };
        ctx.positions = vec![PositionSnapshot {
            symbol: "ETHUSDT".to_string(),
            side: Side::Short,
            entry_price: 3000.0,
            mark_price: 2950.0,
            quantity: 0.5,
            leverage: 5,
            unrealized_pnl: 25.0,
            unrealized_pnl_pct: 8.33,
            peak_pnl_pct: 10.0,
            liquidation_price: 3550.0,
            margin_used: 295.0,
            first_seen: now - TimeDelta::minutes(135),
        }];
        ctx.candidates = vec![
            CandidateCoin::from_coin("SOL", "static"),
            CandidateCoin {
                symbol: "XRPUSDT".to_string(),
                sources: vec!["ai500".to_string(), "oi_top".to_string()],
            },
        ];
        ctx.markets.insert(
            "XRPUSDT".to_string(),
            MarketSnapshot {
                symbol: "XRPUSDT".to_string(),
                current_price: 0.62,
                atr14: Some(0.01),
            },
        );
        ctx
    }

    #[test]
    fn test_system_prompt_reflects_caps() {
        let leverage = LeverageConfig { major: 10, altcoin: 3 };
        let prompt = build_system_prompt(2000.0, &leverage, &PromptConfig::default());
        assert!(prompt.contains("Alt 1600-3000 USDT | BTC/ETH 10000-20000 USDT"));
        assert!(prompt.contains("Alt <= 3x | BTC/ETH <= 10x"));
        assert!(prompt.contains("\"decisions\""));
        assert!(!prompt.contains("Custom Strategy"));
    }

    #[test]
    fn test_custom_prompt_appended_or_overriding() {
        let leverage = LeverageConfig::default();
        let mut config = PromptConfig {
            custom_prompt: "Only trade breakouts.".to_string(),
            override_base: false,
        };
        let appended = build_system_prompt(1000.0, &leverage, &config);
        assert!(appended.starts_with(BASE_STRATEGY));
        assert!(appended.contains("# Custom Strategy\n\nOnly trade breakouts."));

        config.override_base = true;
        assert_eq!(build_system_prompt(1000.0, &leverage, &config), "Only trade breakouts.");

        config.custom_prompt = "   ".to_string();
        assert!(build_system_prompt(1000.0, &leverage, &config).starts_with(BASE_STRATEGY));
    }

    #[test]
    fn test_user_prompt_sections() {
        let prompt = build_user_prompt(&context());
        assert!(prompt.starts_with("Time: 2025-03-01 12:00:00 UTC | Cycle: #7 | Runtime: 42 min"));
        assert!(prompt.contains("available 800.00 (80.0%)"));
        assert!(prompt.contains("1. ETHUSDT SHORT | entry 3000.0000 mark 2950.0000"));
        assert!(prompt.contains("held 2h15m"));
        // SOL has no market data and is left out
        assert!(prompt.contains("## Candidates (1)"));
        assert!(prompt.contains("### 1. XRPUSDT (ai500+oi_top)\nprice 0.6200 | ATR14 0.0100"));
        assert!(!prompt.contains("SOLUSDT"));
        assert!(!prompt.contains("## Performance"));
    }

    #[test]
    fn test_user_prompt_performance_and_empty_book() {
        let mut ctx = context();
        ctx.positions.clear();
        ctx.performance = Some(PerformanceWindow {
            win_rate: 55.0,
            profit_factor: 1.4,
            sharpe_ratio: 0.8,
            recent_trades: Vec::new(),
        });
        let prompt = build_user_prompt(&ctx);
        assert!(prompt.contains("Current positions: none"));
        assert!(prompt.contains("win rate 55.0% | profit factor 1.40 | sharpe 0.80"));
    }
}
