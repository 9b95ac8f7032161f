//! Paper CLI command.
//!
//! Runs the full decision cycle against the paper exchange, replaying model responses from a
//! file. With `--cycles` it runs that many cycles back to back; otherwise it starts the
//! session loop and the drawdown monitor, hot-reloads risk limits from the config file, and
//! stops on Ctrl+C.

use super::validate::parse_market;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use perp_guard_core::raw::decode_positions;
use perp_guard_core::{AppConfig, ConfigLoader, ConfigWatcher, DecisionRecord, ExchangePosition, ExecutionAdapter};
use perp_guard_risk::RiskLimits;
use perp_guard_trader::{InMemoryJournal, PaperExchange, ScriptedDecisionMaker, TradingSession};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Line separating two scripted responses in the responses file.
pub const RESPONSE_SEPARATOR: &str = "---";

#[derive(Args, Debug, Clone)]
pub struct PaperArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// File of model responses separated by lines containing only `---`
    #[arg(long)]
    pub responses: PathBuf,

    /// Starting wallet in USDT; defaults to the configured initial balance
    #[arg(long)]
    pub wallet: Option<Decimal>,

    /// Paper prices as SYMBOL=PRICE or SYMBOL=PRICE:ATR, repeatable
    #[arg(long = "price", value_name = "SYMBOL=PRICE[:ATR]")]
    pub prices: Vec<String>,

    /// JSON array of exchange position records to start from
    #[arg(long)]
    pub positions: Option<PathBuf>,

    /// Run this many cycles and exit; runs until Ctrl+C when omitted
    #[arg(long)]
    pub cycles: Option<u32>,

    /// Keep answering with the last response once the file is exhausted
    #[arg(long)]
    pub repeat: bool,
}

/// Splits a responses file on separator lines, dropping empty blocks.
pub(crate) fn split_responses(text: &str) -> Vec<String> {
    let mut responses = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim() == RESPONSE_SEPARATOR {
            responses.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    responses.push(current);
    responses
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

/// One-line outcome of a cycle.
pub(crate) fn summarize(record: &DecisionRecord) -> String {
    let status = if record.success { "ok" } else { "failed" };
    let executed = record.actions.iter().filter(|a| a.success).count();
    let mut line = format!(
        "cycle #{} {status}: equity {:.2}, {executed}/{} action(s) succeeded",
        record.cycle,
        record.account.snapshot.total_equity,
        record.actions.len()
    );
    if let Some(error) = &record.error_message {
        line.push_str(&format!(" ({error})"));
    }
    line
}

/// Reads exchange position records (numbers may be strings) from a JSON file.
pub(crate) fn load_positions(path: &Path) -> Result<Vec<ExchangePosition>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    let positions = decode_positions(&value)?;
    Ok(positions.into_iter().filter(ExchangePosition::is_open).collect())
}

fn paper_exchange(args: &PaperArgs, config: &AppConfig, journal: Arc<InMemoryJournal>) -> Result<PaperExchange> {
    let wallet = match args.wallet {
        Some(wallet) => wallet,
        None => Decimal::from_f64(config.trader.initial_balance)
            .ok_or_else(|| anyhow!("initial balance {} is not representable", config.trader.initial_balance))?,
    };
    let fee_rate = Decimal::from_f64(config.trader.taker_fee_rate)
        .ok_or_else(|| anyhow!("fee rate {} is not representable", config.trader.taker_fee_rate))?;
    let exchange = PaperExchange::new(wallet).with_fee_rate(fee_rate).with_journal(journal);

    if let Some(path) = &args.positions {
        for position in load_positions(path)? {
            exchange
                .seed_position(&position)
                .with_context(|| format!("Failed to seed {} {}", position.symbol, position.side))?;
        }
    }

    for spec in &args.prices {
        let market = parse_market(spec)?;
        let price = Decimal::from_f64(market.current_price)
            .ok_or_else(|| anyhow!("price {} is not representable", market.current_price))?;
        exchange.set_price(&market.symbol, price);
        if let Some(atr) = market.atr14 {
            exchange.set_atr(&market.symbol, atr);
        }
    }
    Ok(exchange)
}

/// Runs the paper command.
///
/// # Errors
/// Returns an error if the configuration or responses cannot be loaded, or a background task
/// fails during shutdown.
pub async fn run_paper(args: PaperArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let text = std::fs::read_to_string(&args.responses)
        .with_context(|| format!("Failed to read {}", args.responses.display()))?;
    let responses = split_responses(&text);
    tracing::info!(
        responses = responses.len(),
        config = %args.config.display(),
        "Starting paper session"
    );

    let journal = Arc::new(InMemoryJournal::new(config.trader.performance_window_cycles.max(1) * 2));
    let exchange = Arc::new(paper_exchange(&args, &config, journal.clone())?);
    let mut maker = ScriptedDecisionMaker::new(responses).with_name("paper-script");
    if args.repeat {
        maker = maker.repeating();
    }

    let session = Arc::new(TradingSession::new(
        config.clone(),
        exchange.clone(),
        exchange.clone(),
        Arc::new(maker),
        journal,
    ));

    match args.cycles {
        Some(cycles) => {
            for _ in 0..cycles {
                let record = match session.run_cycle().await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cycle stopped early");
                        continue;
                    }
                };
                println!("{}", summarize(&record));
                for line in &record.execution_log {
                    println!("    {line}");
                }
            }
        }
        None => run_until_interrupted(session, &args, config).await?,
    }

    let balance = exchange.balance().await?;
    println!(
        "final: wallet {:.2}, equity {:.2}, available {:.2}",
        balance.total_wallet,
        balance.equity(),
        balance.available
    );
    Ok(())
}

async fn run_until_interrupted(session: Arc<TradingSession>, args: &PaperArgs, config: AppConfig) -> Result<()> {
    let (watcher, rx) = ConfigWatcher::new(args.config.clone(), config);
    let watch_task = tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            tracing::warn!(error = %e, "Config watcher stopped");
        }
    });
    let apply_task = tokio::spawn(apply_config_updates(session.clone(), rx));

    let handle = session.start();
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down");

    handle.stop().await?;
    // Dropping the last receiver lets the watcher's blocking loop exit.
    apply_task.abort();
    let _ = apply_task.await;
    watch_task.await.context("Config watcher task panicked")?;
    Ok(())
}

/// Pushes reloaded risk limits and leverage caps into the running session.
async fn apply_config_updates(session: Arc<TradingSession>, mut rx: watch::Receiver<AppConfig>) {
    while rx.changed().await.is_ok() {
        let config = rx.borrow_and_update().clone();
        session.set_risk_limits(RiskLimits::from(&config.risk));
        session.set_leverage_caps(config.leverage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_split_responses() {
        let text = "first line\nstill first\n---\n\n  ---  \nsecond\n---\n";
        assert_eq!(split_responses(text), vec!["first line\nstill first", "second"]);
        assert_eq!(split_responses("only one"), vec!["only one"]);
        assert!(split_responses("---\n---").is_empty());
    }

    #[test]
    fn test_load_positions_skips_flat_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"[{"symbol": "BTCUSDT", "positionAmt": "0.5", "entryPrice": "60000", "leverage": "3"},
                 {"symbol": "SOLUSDT", "positionAmt": "0", "entryPrice": "0"}]"#,
        )
        .unwrap();

        let positions = load_positions(file.path()).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTCUSDT");
        assert_eq!(positions[0].leverage, 3);
    }

    #[test]
    fn test_summarize_failed_cycle() {
        let mut record = DecisionRecord::new(4, Utc::now());
        record.fail("decision call failed: timeout");
        assert_eq!(
            summarize(&record),
            "cycle #4 failed: equity 0.00, 0/0 action(s) succeeded (decision call failed: timeout)"
        );
    }
}
