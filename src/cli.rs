//! CLI definition and dispatch.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_adapter::{self, AccountTrade, CsvAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::static_sector_adapter::StaticSectorAdapter;
use crate::domain::account::{AccountConfig, AccountLedger};
use crate::domain::adjustment::{AdjustedSeries, AdjustmentMode, PriceAdjustmentEngine};
use crate::domain::aggregator::{ConcentrationThresholds, PortfolioAggregator, PortfolioReport};
use crate::domain::config_validation::validate_config;
use crate::domain::corporate_action::DividendEvent;
use crate::domain::cost::{CostConfig, StampDutyBasis, TradingCostCalculator, TransferFeeRule};
use crate::domain::error::LedgerError;
use crate::domain::registry::AccountRegistry;
use crate::domain::trade::{Direction, Offset};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "ledgercore", about = "Price adjustment, trading costs and account ledgers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a dividend-adjusted bar series as CSV
    Adjust {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// CSV data directory; falls back to the [sqlite] database
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        symbol: String,
        /// none, forward or backward; overrides [adjustment] mode
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// First date the corporate-action data is known to be complete for
        #[arg(long, requires = "coverage_end")]
        coverage_start: Option<NaiveDate>,
        #[arg(long, requires = "coverage_start")]
        coverage_end: Option<NaiveDate>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the cost breakdown of a single trade
    Cost {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        volume: i64,
        #[arg(long, default_value = "buy")]
        direction: String,
        /// Defaults to open for buys and close for sells
        #[arg(long)]
        offset: Option<String>,
        #[arg(long)]
        exchange: String,
        /// Also show the round-trip cost and breakeven sell price
        #[arg(long)]
        round_trip: bool,
    },
    /// Replay trades, marks and corporate actions through account ledgers
    Replay {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        trades: PathBuf,
        #[arg(long)]
        marks: Option<PathBuf>,
        /// Directory holding events/<symbol>.csv corporate-action files;
        /// falls back to the [sqlite] database when configured
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Adjust {
            config,
            data_dir,
            symbol,
            mode,
            start,
            end,
            coverage_start,
            coverage_end,
            output,
        } => run_adjust(
            config.as_ref(),
            data_dir.as_deref(),
            &symbol,
            mode.as_deref(),
            (start, end),
            coverage_start.zip(coverage_end),
            output.as_ref(),
        ),
        Command::Cost {
            config,
            price,
            volume,
            direction,
            offset,
            exchange,
            round_trip,
        } => run_cost(
            config.as_ref(),
            price,
            volume,
            &direction,
            offset.as_deref(),
            &exchange,
            round_trip,
        ),
        Command::Replay {
            config,
            trades,
            marks,
            data_dir,
        } => run_replay(config.as_ref(), &trades, marks.as_ref(), data_dir.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: &LedgerError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

/// Load and validate a config file; without a path every documented
/// default applies.
pub fn load_config(path: Option<&PathBuf>) -> Result<FileConfigAdapter, LedgerError> {
    let adapter = match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            FileConfigAdapter::from_file(path)?
        }
        None => FileConfigAdapter::from_string("")?,
    };
    validate_config(&adapter)?;
    Ok(adapter)
}

pub fn build_cost_config(config: &dyn ConfigPort) -> Result<CostConfig, LedgerError> {
    let defaults = CostConfig::default();

    let stamp_duty_basis = match config.get_string("costs", "stamp_duty_basis") {
        None => defaults.stamp_duty_basis,
        Some(raw) => StampDutyBasis::parse(&raw).ok_or_else(|| LedgerError::ConfigInvalid {
            section: "costs".into(),
            key: "stamp_duty_basis".into(),
            reason: format!("unknown basis {raw:?}"),
        })?,
    };

    let exchanges = config.section_keys("transfer_fee");
    let transfer_fees = if exchanges.is_empty() {
        defaults.transfer_fees.clone()
    } else {
        let mut fees = BTreeMap::new();
        for exchange in exchanges {
            let rate = config.get_decimal("transfer_fee", &exchange, Decimal::ZERO)?;
            let min_fee = config.get_decimal("transfer_fee_min", &exchange, Decimal::ZERO)?;
            fees.insert(exchange.to_uppercase(), TransferFeeRule { rate, min_fee });
        }
        fees
    };
    for exchange in config.section_keys("transfer_fee_min") {
        if !transfer_fees.contains_key(&exchange.to_uppercase()) {
            warn!(
                exchange = %exchange,
                "minimum transfer fee set for an exchange without a transfer fee rate"
            );
        }
    }

    Ok(CostConfig {
        commission_rate: config.get_decimal("costs", "commission_rate", defaults.commission_rate)?,
        min_commission: config.get_decimal("costs", "min_commission", defaults.min_commission)?,
        stamp_duty_rate: config.get_decimal("costs", "stamp_duty_rate", defaults.stamp_duty_rate)?,
        stamp_duty_basis,
        transfer_fees,
    })
}

pub fn build_account_config(config: &dyn ConfigPort) -> Result<AccountConfig, LedgerError> {
    Ok(AccountConfig {
        id: config
            .get_string("account", "id")
            .map(|id| id.trim().to_string())
            .unwrap_or_else(|| "default".to_string()),
        initial_cash: config.get_decimal("account", "initial_cash", dec!(1000000))?,
    })
}

pub fn build_concentration_thresholds(
    config: &dyn ConfigPort,
) -> Result<ConcentrationThresholds, LedgerError> {
    let defaults = ConcentrationThresholds::default();
    Ok(ConcentrationThresholds {
        max_symbol_weight: config.get_decimal(
            "concentration",
            "max_symbol_weight",
            defaults.max_symbol_weight,
        )?,
        max_sector_weight: config.get_decimal(
            "concentration",
            "max_sector_weight",
            defaults.max_sector_weight,
        )?,
        warning_level: config.get_decimal(
            "concentration",
            "warning_level",
            defaults.warning_level,
        )?,
    })
}

/// `override_mode` (from the command line) wins over `[adjustment] mode`.
pub fn build_adjustment_mode(
    config: &dyn ConfigPort,
    override_mode: Option<&str>,
) -> Result<AdjustmentMode, LedgerError> {
    let raw = override_mode
        .map(str::to_string)
        .or_else(|| config.get_string("adjustment", "mode"));
    match raw {
        None => Ok(AdjustmentMode::Backward),
        Some(raw) => AdjustmentMode::parse(&raw).ok_or_else(|| LedgerError::ConfigInvalid {
            section: "adjustment".into(),
            key: "mode".into(),
            reason: format!("unknown mode {raw:?}"),
        }),
    }
}

/// Fetch bars and events for `symbol` and adjust them.
pub fn run_adjust_pipeline(
    data_port: &dyn DataPort,
    symbol: &str,
    mode: AdjustmentMode,
    range: (Option<NaiveDate>, Option<NaiveDate>),
    coverage: Option<(NaiveDate, NaiveDate)>,
) -> Result<AdjustedSeries, LedgerError> {
    let start = range.0.unwrap_or(NaiveDate::MIN);
    let end = range.1.unwrap_or(NaiveDate::MAX);
    if start > end {
        return Err(LedgerError::validation("start", "start must not be after end"));
    }

    let mut engine = PriceAdjustmentEngine::new();
    let registered = engine.register_events(data_port.fetch_dividend_events(symbol)?)?;
    if let Some((from, to)) = coverage {
        engine.mark_coverage(symbol, from, to)?;
    }

    // Reference closes come from the full history so events just before
    // `start` still find their prior close.
    let history = data_port.fetch_bars(symbol, NaiveDate::MIN, NaiveDate::MAX)?;
    engine.register_history(symbol, &history)?;

    let bars: Vec<_> = history
        .into_iter()
        .filter(|bar| bar.date() >= start && bar.date() <= end)
        .collect();
    info!(symbol, events = registered, bars = bars.len(), mode = mode.as_str(), "adjusting");
    engine.apply(&bars, symbol, mode)
}

/// Pick the bar and corporate-action source: an explicit CSV directory
/// wins, otherwise the configured SQLite database.
pub fn open_data_source(
    config: &dyn ConfigPort,
    data_dir: Option<&Path>,
) -> Result<Box<dyn DataPort>, LedgerError> {
    if let Some(dir) = data_dir {
        return Ok(Box::new(CsvAdapter::new(dir.to_path_buf())));
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteAdapter;

        let adapter = SqliteAdapter::from_config(config)?;
        adapter.initialize_schema()?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = config;
        Err(LedgerError::ConfigMissing {
            section: "data".into(),
            key: "data_dir".into(),
        })
    }
}

fn run_adjust(
    config_path: Option<&PathBuf>,
    data_dir: Option<&Path>,
    symbol: &str,
    mode_override: Option<&str>,
    range: (Option<NaiveDate>, Option<NaiveDate>),
    coverage: Option<(NaiveDate, NaiveDate)>,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    let result = (|| -> Result<AdjustedSeries, LedgerError> {
        let config = load_config(config_path)?;
        let mode = build_adjustment_mode(&config, mode_override)?;
        let source = open_data_source(&config, data_dir)?;
        let series = run_adjust_pipeline(source.as_ref(), symbol, mode, range, coverage)?;
        match output_path {
            Some(path) => csv_adapter::write_adjusted_bars(File::create(path)?, &series)?,
            None => csv_adapter::write_adjusted_bars(io::stdout().lock(), &series)?,
        }
        Ok(series)
    })();

    match result {
        Ok(series) => {
            if series.incomplete {
                eprintln!(
                    "warning: {} adjustment is incomplete ({} data gap(s)):",
                    series.symbol,
                    series.gaps.len()
                );
                for gap in &series.gaps {
                    eprintln!("  {gap:?}");
                }
            }
            if let Some(path) = output_path {
                eprintln!("Wrote {} bars to {}", series.bars.len(), path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_cost(
    config_path: Option<&PathBuf>,
    price: Decimal,
    volume: i64,
    direction: &str,
    offset: Option<&str>,
    exchange: &str,
    round_trip: bool,
) -> ExitCode {
    let result = (|| -> Result<(), LedgerError> {
        let config = load_config(config_path)?;
        let calculator = TradingCostCalculator::new(build_cost_config(&config)?)?;

        let direction = Direction::parse(direction).ok_or_else(|| {
            LedgerError::validation("direction", format!("expected buy or sell, got {direction:?}"))
        })?;
        let offset = match offset {
            Some(raw) => Offset::parse(raw).ok_or_else(|| {
                LedgerError::validation("offset", format!("expected open or close, got {raw:?}"))
            })?,
            None => match direction {
                Direction::Buy => Offset::Open,
                Direction::Sell => Offset::Close,
            },
        };

        let cost = calculator.calculate_cost(price, volume, direction, offset, exchange)?;
        println!("notional:     {}", cost.notional);
        println!("commission:   {}", cost.commission);
        println!("stamp_duty:   {}", cost.stamp_duty);
        println!("transfer_fee: {}", cost.transfer_fee);
        println!("total:        {}", cost.total);
        println!("cost_rate:    {:.6}", cost.cost_rate());

        if round_trip {
            let rt = calculator.round_trip_cost(price, volume, exchange)?;
            let breakeven = calculator.breakeven_price(price, volume, exchange)?;
            println!("round_trip:   {}", rt.total);
            println!("round_rate:   {:.6}", rt.cost_rate());
            println!("breakeven:    {}", breakeven);
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
    pub invariant_breaches: usize,
    pub marks: usize,
    pub dividends_credited: Decimal,
}

enum ReplayStep<'a> {
    CorporateAction(&'a DividendEvent),
    Trade(&'a AccountTrade),
    Mark(NaiveDateTime, &'a HashMap<String, Decimal>),
}

impl ReplayStep<'_> {
    /// Corporate actions take effect before the ex-date session; marks
    /// close a timestamp after its trades.
    fn sort_key(&self) -> (NaiveDateTime, u8) {
        match self {
            ReplayStep::CorporateAction(event) => (event.ex_date.and_time(NaiveTime::MIN), 0),
            ReplayStep::Trade(row) => (row.trade.timestamp, 1),
            ReplayStep::Mark(ts, _) => (*ts, 2),
        }
    }
}

/// Drive every step through `registry` in time order. Business rejections
/// and invariant breaches are counted, not fatal; anything else aborts.
pub fn run_replay_pipeline(
    registry: &AccountRegistry,
    trades: &[AccountTrade],
    events: &[DividendEvent],
    marks: &BTreeMap<NaiveDateTime, HashMap<String, Decimal>>,
) -> Result<ReplaySummary, LedgerError> {
    let mut steps: Vec<ReplayStep> = events
        .iter()
        .map(ReplayStep::CorporateAction)
        .chain(trades.iter().map(ReplayStep::Trade))
        .chain(marks.iter().map(|(ts, prices)| ReplayStep::Mark(*ts, prices)))
        .collect();
    steps.sort_by_key(|step| step.sort_key());

    let account_ids = registry.account_ids()?;
    let mut summary = ReplaySummary::default();
    for step in steps {
        match step {
            ReplayStep::CorporateAction(event) => {
                summary.dividends_credited += registry.apply_corporate_action(event)?;
            }
            ReplayStep::Trade(row) => match registry.apply_trade(&row.account_id, &row.trade) {
                Ok(_) => summary.applied += 1,
                Err(e @ LedgerError::InternalInvariant { .. }) => {
                    eprintln!("error: {e}");
                    summary.invariant_breaches += 1;
                }
                Err(
                    e @ (LedgerError::InsufficientFunds { .. }
                    | LedgerError::InsufficientPosition { .. }
                    | LedgerError::Validation { .. }
                    | LedgerError::AccountHalted { .. }),
                ) => {
                    warn!(
                        account = %row.account_id,
                        symbol = %row.trade.symbol,
                        error = %e,
                        "trade rejected"
                    );
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            },
            ReplayStep::Mark(ts, prices) => {
                for id in &account_ids {
                    registry.mark_to_market(id, ts, prices)?;
                }
                summary.marks += 1;
            }
        }
    }
    Ok(summary)
}

fn run_replay(
    config_path: Option<&PathBuf>,
    trades_path: &Path,
    marks_path: Option<&PathBuf>,
    data_dir: Option<&Path>,
) -> ExitCode {
    let result = (|| -> Result<(ReplaySummary, PortfolioReport), LedgerError> {
        let config = load_config(config_path)?;
        let calculator = TradingCostCalculator::new(build_cost_config(&config)?)?;
        let account_config = build_account_config(&config)?;
        let aggregator = PortfolioAggregator::new(build_concentration_thresholds(&config)?)?;
        let sectors = StaticSectorAdapter::from_config(&config);

        let trades = csv_adapter::read_trades(trades_path)?;
        let marks = match marks_path {
            Some(path) => csv_adapter::read_marks(path)?,
            None => BTreeMap::new(),
        };

        let mut events = Vec::new();
        if data_dir.is_some() || config.get_string("sqlite", "path").is_some() {
            let source = open_data_source(&config, data_dir)?;
            let symbols: BTreeSet<&str> = trades.iter().map(|t| t.trade.symbol.as_str()).collect();
            for symbol in symbols {
                events.extend(source.fetch_dividend_events(symbol)?);
            }
        }

        let registry = AccountRegistry::new();
        let mut ids: BTreeSet<&str> = trades.iter().map(|t| t.account_id.as_str()).collect();
        if ids.is_empty() {
            ids.insert(account_config.id.as_str());
        }
        for id in ids {
            let ledger = AccountLedger::new(
                AccountConfig {
                    id: id.to_string(),
                    initial_cash: account_config.initial_cash,
                },
                calculator.clone(),
            )?;
            registry.open_account(ledger)?;
        }

        info!(
            trades = trades.len(),
            marks = marks.len(),
            events = events.len(),
            "replaying"
        );
        let summary = run_replay_pipeline(&registry, &trades, &events, &marks)?;
        let report = aggregator.aggregate(&registry, &sectors)?;
        Ok((summary, report))
    })();

    match result {
        Ok((summary, report)) => {
            print_replay_report(&summary, &report);
            if summary.invariant_breaches > 0 {
                eprintln!(
                    "error: {} ledger invariant breach(es); affected accounts are halted",
                    summary.invariant_breaches
                );
                ExitCode::from(6)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => fail(&e),
    }
}

fn print_replay_report(summary: &ReplaySummary, report: &PortfolioReport) {
    println!(
        "Trades applied: {}  rejected: {}  invariant breaches: {}",
        summary.applied, summary.rejected, summary.invariant_breaches
    );
    println!(
        "Marks: {}  dividends credited: {}",
        summary.marks, summary.dividends_credited
    );

    let totals = &report.totals;
    println!();
    println!("Accounts:        {} ({} halted)", totals.accounts, totals.halted_accounts);
    println!("Cash:            {}", totals.cash);
    println!("Market value:    {}", totals.market_value);
    println!("Equity:          {}", totals.equity);
    println!("Unrealized PnL:  {}", totals.unrealized_pnl);
    println!("Realized PnL:    {}", totals.realized_pnl);

    for (title, lines) in [
        ("Symbol exposure", &report.symbol_exposure),
        ("Sector exposure", &report.sector_exposure),
    ] {
        if lines.is_empty() {
            continue;
        }
        println!();
        println!("{title}:");
        for line in lines {
            println!(
                "  {:<14} {:>16} {:>8.2}%  limit {:>6.2}%  {}",
                line.key,
                line.market_value,
                line.weight * dec!(100),
                line.limit * dec!(100),
                line.status.as_str()
            );
        }
    }
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    match load_config(Some(config_path)) {
        Ok(config) => {
            let sectors = StaticSectorAdapter::from_config(&config);
            println!("Config valid: {}", config_path.display());
            println!("  sectors classified: {}", sectors.len());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
