//! Size CLI command: one run of the sizing engine with explicit inputs.

use clap::Args;
use perp_guard_risk::{adjusted_size, margin_limit};

#[derive(Args, Debug, Clone)]
pub struct SizeArgs {
    /// Proposed position size in USD
    #[arg(long)]
    pub base: f64,

    #[arg(long)]
    pub leverage: f64,

    /// Available balance in USDT
    #[arg(long)]
    pub available: f64,

    /// Taker fee rate
    #[arg(long, default_value_t = 0.0004)]
    pub fee_rate: f64,

    /// Rolling win rate, percent
    #[arg(long, default_value_t = 50.0)]
    pub win_rate: f64,

    #[arg(long, default_value_t = 1.0)]
    pub profit_factor: f64,

    /// Decision confidence, 0 when not stated
    #[arg(long, default_value_t = 0)]
    pub confidence: i32,

    /// A recent large loss on the same symbol and side
    #[arg(long)]
    pub cooldown: bool,
}

pub(crate) fn describe(args: &SizeArgs) -> String {
    let size = adjusted_size(
        args.base,
        args.leverage,
        args.available,
        args.fee_rate,
        args.win_rate,
        args.profit_factor,
        args.confidence,
        args.cooldown,
    );
    let limit = margin_limit(args.available, args.leverage, args.fee_rate)
        .map_or_else(|| "n/a".to_string(), |l| format!("{l:.2}"));
    let ratio = if args.base > 0.0 { size / args.base } else { 1.0 };
    format!(
        "adjusted size: {size:.2} USD (x{ratio:.3} of {:.2}), margin limit: {limit}",
        args.base
    )
}

pub fn run_size(args: &SizeArgs) {
    println!("{}", describe(args));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SizeArgs {
        SizeArgs {
            base: 100.0,
            leverage: 5.0,
            available: 10_000.0,
            fee_rate: 0.0004,
            win_rate: 70.0,
            profit_factor: 2.0,
            confidence: 80,
            cooldown: false,
        }
    }

    #[test]
    fn test_describe_strong_performance() {
        assert!(describe(&args()).starts_with("adjusted size: 110.00 USD (x1.100 of 100.00)"));
    }

    #[test]
    fn test_describe_without_margin_limit() {
        let text = describe(&SizeArgs {
            available: 0.0,
            ..args()
        });
        assert!(text.ends_with("margin limit: n/a"));
    }
}
