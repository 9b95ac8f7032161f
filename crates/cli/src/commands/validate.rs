//! Validate CLI command.
//!
//! Parses a saved model response and checks the batch the way a live cycle would, printing
//! the first offending decision when the batch is rejected.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use perp_guard_core::raw::decode_balance;
use perp_guard_core::{normalize_symbol, ConfigLoader, LeverageConfig, MarketSnapshot};
use perp_guard_decision::{parse_response, sorted_by_priority, validate_batch, LeverageCaps};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// File holding the raw response; reads stdin when omitted
    pub file: Option<PathBuf>,

    /// Account equity in USDT
    #[arg(long, required_unless_present = "account", conflicts_with = "account")]
    pub equity: Option<f64>,

    /// Exchange balance record (JSON); equity is wallet plus unrealized P&L
    #[arg(long)]
    pub account: Option<PathBuf>,

    /// Config file supplying the leverage caps
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Override the leverage cap for BTC and ETH
    #[arg(long)]
    pub major_cap: Option<u32>,

    /// Override the leverage cap for every other symbol
    #[arg(long)]
    pub altcoin_cap: Option<u32>,

    /// Market data as SYMBOL=PRICE or SYMBOL=PRICE:ATR, repeatable
    #[arg(long = "market", value_name = "SYMBOL=PRICE[:ATR]")]
    pub markets: Vec<String>,
}

/// Parses `SYMBOL=PRICE[:ATR]` into a market snapshot.
pub(crate) fn parse_market(spec: &str) -> Result<MarketSnapshot> {
    let (symbol, rest) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("expected SYMBOL=PRICE[:ATR], got {spec:?}"))?;
    let (price, atr) = match rest.split_once(':') {
        Some((price, atr)) => (price, Some(atr)),
        None => (rest, None),
    };
    let current_price: f64 = price
        .trim()
        .parse()
        .with_context(|| format!("invalid price in {spec:?}"))?;
    if current_price <= 0.0 {
        bail!("price must be positive in {spec:?}");
    }
    let atr14 = atr
        .map(|a| a.trim().parse::<f64>().with_context(|| format!("invalid ATR in {spec:?}")))
        .transpose()?;

    Ok(MarketSnapshot {
        symbol: normalize_symbol(symbol),
        current_price,
        atr14,
    })
}

/// Equity from `--equity`, or from the decoded balance record given with `--account`.
pub(crate) fn resolve_equity(args: &ValidateArgs) -> Result<f64> {
    if let Some(equity) = args.equity {
        return Ok(equity);
    }
    let path = args
        .account
        .as_deref()
        .ok_or_else(|| anyhow!("either --equity or --account is required"))?;
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(decode_balance(&value)?.equity())
}

/// Runs the validate command.
///
/// # Errors
/// Returns an error if the input cannot be read, the configuration cannot be loaded, or the
/// response fails parsing or validation.
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let leverage = LeverageConfig {
        major: args.major_cap.unwrap_or(config.leverage.major),
        altcoin: args.altcoin_cap.unwrap_or(config.leverage.altcoin),
    };
    let markets: HashMap<String, MarketSnapshot> = args
        .markets
        .iter()
        .map(|spec| parse_market(spec).map(|m| (m.symbol.clone(), m)))
        .collect::<Result<_>>()?;

    let equity = resolve_equity(args)?;
    let raw = super::read_input(args.file.as_deref())?;
    let parsed = parse_response(&raw)?;

    validate_batch(&parsed.decisions, equity, &LeverageCaps::from(&leverage), &markets)?;

    println!(
        "OK: {} decision(s) valid (equity {:.2}, caps {}x/{}x)",
        parsed.decisions.len(),
        equity,
        leverage.major,
        leverage.altcoin
    );
    for (i, decision) in sorted_by_priority(&parsed.decisions).iter().enumerate() {
        println!("  [{}] {} {}", i + 1, decision.symbol, decision.action);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_market_with_and_without_atr() {
        let btc = parse_market("btc=100000:1500").unwrap();
        assert_eq!(btc.symbol, "BTCUSDT");
        assert!((btc.current_price - 100_000.0).abs() < f64::EPSILON);
        assert_eq!(btc.atr14, Some(1500.0));

        let sol = parse_market("SOLUSDT=150.5").unwrap();
        assert!(sol.atr14.is_none());
    }

    #[test]
    fn test_equity_from_balance_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"totalWalletBalance": "1000.50", "availableBalance": "800", "totalUnrealizedProfit": "-12.25"}"#,
        )
        .unwrap();
        let args = ValidateArgs {
            file: None,
            equity: None,
            account: Some(file.path().to_path_buf()),
            config: PathBuf::from("config/Config.toml"),
            major_cap: None,
            altcoin_cap: None,
            markets: Vec::new(),
        };
        assert!((resolve_equity(&args).unwrap() - 988.25).abs() < 1e-9);

        let explicit = ValidateArgs {
            equity: Some(500.0),
            account: None,
            ..args
        };
        assert!((resolve_equity(&explicit).unwrap() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_market_rejects_garbage() {
        assert!(parse_market("BTCUSDT").is_err());
        assert!(parse_market("BTCUSDT=abc").is_err());
        assert!(parse_market("BTCUSDT=-5").is_err());
        assert!(parse_market("BTCUSDT=100:x").is_err());
    }
}
