//! Persistence gateway over SQLite.
//!
//! Prices and indicators are stored as scaled fixed-point integers that must
//! fit a signed 32-bit column. Prices and price-denominated indicators (EMA,
//! MACD, Bollinger bands, ATR, support/resistance) use x10^4; oscillators and
//! the Bollinger multiplier use x10^2. Volume is stored unscaled as a 64-bit
//! integer. Out-of-range values are clamped to
//! the bound with a warning rather than rejected. Bounded indicators (RSI,
//! ADX, stochastic in [0, 100], ATR >= 0) are corrected to the nearest valid
//! bound before encoding.
//!
//! Every write for one symbol runs in a single transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use thiserror::Error;
use tickwise_common::{StorageSettings, SymbolEntry};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::data::PriceBar;
use crate::indicators::IndicatorSet;

pub const PRICE_SCALE: f64 = 10_000.0;
pub const INDICATOR_SCALE: f64 = 100.0;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    symbol TEXT PRIMARY KEY,
    name TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS price_bars (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open INTEGER NOT NULL,
    high INTEGER NOT NULL,
    low INTEGER NOT NULL,
    close INTEGER NOT NULL,
    volume INTEGER NOT NULL,
    rsi_14 INTEGER,
    ema_12 INTEGER,
    ema_26 INTEGER,
    ema_50 INTEGER,
    macd_line INTEGER,
    macd_signal INTEGER,
    macd_histogram INTEGER,
    bb_upper INTEGER,
    bb_middle INTEGER,
    bb_lower INTEGER,
    bb_k INTEGER,
    atr_14 INTEGER,
    adx_14 INTEGER,
    plus_di INTEGER,
    minus_di INTEGER,
    cci_20 INTEGER,
    stoch_k INTEGER,
    stoch_d INTEGER,
    support_1 INTEGER,
    support_2 INTEGER,
    support_3 INTEGER,
    resistance_1 INTEGER,
    resistance_2 INTEGER,
    resistance_3 INTEGER,
    low_confidence INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (symbol, date)
);

CREATE INDEX IF NOT EXISTS idx_price_bars_date ON price_bars(date);
"#;

const INDICATOR_COLUMNS: &str = "rsi_14, ema_12, ema_26, ema_50, macd_line, macd_signal, \
    macd_histogram, bb_upper, bb_middle, bb_lower, bb_k, atr_14, adx_14, plus_di, minus_di, \
    cci_20, stoch_k, stoch_d, support_1, support_2, support_3, resistance_1, resistance_2, \
    resistance_3, low_confidence";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no stored bar for {symbol} on {date}")]
    MissingBar { symbol: String, date: NaiveDate },

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

// ============================================================================
// Fixed-Point Encoding
// ============================================================================

/// Scale and round into the i32 range, clamping with a warning.
pub fn to_fixed(value: f64, scale: f64, column: &'static str) -> i32 {
    let scaled = (value * scale).round();
    if scaled.is_nan() {
        warn!(column, "Non-finite value stored as 0");
        return 0;
    }
    if scaled > f64::from(i32::MAX) {
        warn!(column, value, "Value above storage range, clamped");
        i32::MAX
    } else if scaled < f64::from(i32::MIN) {
        warn!(column, value, "Value below storage range, clamped");
        i32::MIN
    } else {
        scaled as i32
    }
}

pub fn from_fixed(value: i32, scale: f64) -> f64 {
    f64::from(value) / scale
}

/// Volume as a whole number of shares in the i64 range.
pub fn volume_to_stored(volume: f64) -> i64 {
    let rounded = volume.round();
    if rounded.is_nan() {
        warn!("Non-finite volume stored as 0");
        return 0;
    }
    if rounded >= i64::MAX as f64 {
        warn!(volume, "Volume above storage range, clamped");
        i64::MAX
    } else if rounded <= i64::MIN as f64 {
        warn!(volume, "Volume below storage range, clamped");
        i64::MIN
    } else {
        rounded as i64
    }
}

/// Pull a bounded indicator back inside `[min, max]`.
pub fn correct_bounded(value: f64, min: f64, max: f64, column: &'static str) -> f64 {
    if value < min {
        warn!(column, value, min, "Indicator below valid range, corrected");
        min
    } else if value > max {
        warn!(column, value, max, "Indicator above valid range, corrected");
        max
    } else {
        value
    }
}

fn price(value: f64, column: &'static str) -> i32 {
    to_fixed(value, PRICE_SCALE, column)
}

fn indicator(value: f64, column: &'static str) -> i32 {
    to_fixed(value, INDICATOR_SCALE, column)
}

fn percent(value: f64, column: &'static str) -> i32 {
    indicator(correct_bounded(value, 0.0, 100.0, column), column)
}

/// Encode the support/resistance tiers at price scale, keeping them strictly
/// ordered after rounding: support descending, resistance ascending, and
/// resistance 1 above support 1.
fn encode_tiers(support: [f64; 3], resistance: [f64; 3]) -> ([i32; 3], [i32; 3]) {
    let mut s = [
        price(support[0], "support_1"),
        price(support[1], "support_2"),
        price(support[2], "support_3"),
    ];
    let mut r = [
        price(resistance[0], "resistance_1"),
        price(resistance[1], "resistance_2"),
        price(resistance[2], "resistance_3"),
    ];
    if r[0] <= s[0] {
        debug!(support = s[0], resistance = r[0], "Tier 1 collapsed after rounding, separated");
        if s[0] == i32::MAX {
            s[0] = i32::MAX - 1;
        }
        r[0] = s[0] + 1;
    }
    for i in 1..3 {
        if s[i] >= s[i - 1] {
            s[i] = s[i - 1].saturating_sub(1);
        }
        if r[i] <= r[i - 1] {
            r[i] = r[i - 1].saturating_add(1);
        }
    }
    (s, r)
}

fn parse_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// Gateway
// ============================================================================

/// SQLite-backed store for symbols, bars and indicator sets.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so it sits behind an
/// async mutex; statements run on the blocking pool while the guard is held.
#[derive(Clone)]
pub struct PersistenceGateway {
    db: Arc<Mutex<Connection>>,
}

impl PersistenceGateway {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(db_path = %path.display(), "Opened price store");
        Self::init(conn)
    }

    pub fn from_settings(settings: &StorageSettings) -> Result<Self> {
        Self::open(&settings.db_path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = Arc::clone(&self.db).lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut guard)).await?
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    /// Insert or refresh symbols; each is (re)marked active.
    pub async fn upsert_symbols(&self, entries: &[SymbolEntry]) -> Result<usize> {
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO symbols (symbol, name, active) VALUES (?1, ?2, 1)
                     ON CONFLICT(symbol) DO UPDATE SET
                        name = COALESCE(excluded.name, symbols.name),
                        active = 1",
                )?;
                for entry in &entries {
                    stmt.execute(params![entry.symbol, entry.name])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
        .await
    }

    pub async fn set_active(&self, symbol: &str, active: bool) -> Result<bool> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE symbols SET active = ?2 WHERE symbol = ?1",
                params![symbol, active],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn active_symbols(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT symbol FROM symbols WHERE active = 1 ORDER BY symbol")?;
            let symbols = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(symbols)
        })
        .await
    }

    // ========================================================================
    // Bars
    // ========================================================================

    /// Insert or update bars for one symbol; indicator columns are kept.
    pub async fn upsert_bars(&self, symbol: &str, bars: &[PriceBar], low_confidence: bool) -> Result<usize> {
        let symbol = symbol.to_string();
        let bars = bars.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = write_bars(&tx, &symbol, &bars, low_confidence)?;
            tx.commit()?;
            debug!(symbol = %symbol, count, "Stored bars");
            Ok(count)
        })
        .await
    }

    /// Attach indicator sets to existing bars of one symbol.
    ///
    /// Fails with `MissingBar` (writing nothing) when a set has no bar row.
    pub async fn upsert_indicators(&self, symbol: &str, sets: &[IndicatorSet]) -> Result<usize> {
        let symbol = symbol.to_string();
        let sets = sets.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = write_indicators(&tx, &symbol, &sets)?;
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    /// Bars and their indicator sets for one symbol in one transaction.
    pub async fn persist_symbol(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        low_confidence: bool,
        sets: &[IndicatorSet],
    ) -> Result<usize> {
        let symbol = symbol.to_string();
        let bars = bars.to_vec();
        let sets = sets.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = write_bars(&tx, &symbol, &bars, low_confidence)?;
            write_indicators(&tx, &symbol, &sets)?;
            tx.commit()?;
            debug!(symbol = %symbol, bars = count, indicators = sets.len(), "Persisted symbol");
            Ok(count)
        })
        .await
    }

    /// Most recent `limit` bars (all when `None`), oldest first.
    pub async fn load_bars(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<PriceBar>> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            let mut stmt = conn.prepare(
                "SELECT symbol, date, open, high, low, close, volume FROM price_bars
                 WHERE symbol = ?1 ORDER BY date DESC LIMIT ?2",
            )?;
            let mut bars = stmt
                .query_map(params![symbol, limit], row_to_bar)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            bars.reverse();
            Ok(bars)
        })
        .await
    }

    pub async fn load_indicators(&self, symbol: &str, date: NaiveDate) -> Result<Option<IndicatorSet>> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT symbol, date, {} FROM price_bars
                 WHERE symbol = ?1 AND date = ?2 AND rsi_14 IS NOT NULL",
                INDICATOR_COLUMNS
            );
            let set = conn
                .query_row(&sql, params![symbol, date.to_string()], row_to_indicators)
                .optional()?;
            Ok(set)
        })
        .await
    }

    pub async fn bar_count(&self, symbol: &str) -> Result<usize> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM price_bars WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    pub async fn latest_bar_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(date) FROM price_bars WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )?;
            latest
                .map(|text| parse_date(0, &text))
                .transpose()
                .map_err(PersistenceError::from)
        })
        .await
    }
}

// ============================================================================
// Row Writers / Readers
// ============================================================================

fn write_bars(tx: &Transaction<'_>, symbol: &str, bars: &[PriceBar], low_confidence: bool) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(
        "INSERT INTO price_bars
            (symbol, date, open, high, low, close, volume, low_confidence, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(symbol, date) DO UPDATE SET
            open = excluded.open,
            high = excluded.high,
            low = excluded.low,
            close = excluded.close,
            volume = excluded.volume,
            low_confidence = excluded.low_confidence,
            updated_at = excluded.updated_at",
    )?;
    for bar in bars {
        stmt.execute(params![
            symbol,
            bar.date.to_string(),
            price(bar.open, "open"),
            price(bar.high, "high"),
            price(bar.low, "low"),
            price(bar.close, "close"),
            volume_to_stored(bar.volume),
            low_confidence,
            now,
        ])?;
    }
    Ok(bars.len())
}

fn write_indicators(tx: &Transaction<'_>, symbol: &str, sets: &[IndicatorSet]) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(
        "UPDATE price_bars SET
            rsi_14 = ?3, ema_12 = ?4, ema_26 = ?5, ema_50 = ?6,
            macd_line = ?7, macd_signal = ?8, macd_histogram = ?9,
            bb_upper = ?10, bb_middle = ?11, bb_lower = ?12, bb_k = ?13,
            atr_14 = ?14, adx_14 = ?15, plus_di = ?16, minus_di = ?17,
            cci_20 = ?18, stoch_k = ?19, stoch_d = ?20,
            support_1 = ?21, support_2 = ?22, support_3 = ?23,
            resistance_1 = ?24, resistance_2 = ?25, resistance_3 = ?26,
            low_confidence = ?27, updated_at = ?28
         WHERE symbol = ?1 AND date = ?2",
    )?;
    for set in sets {
        let (support, resistance) = encode_tiers(set.support, set.resistance);
        let changed = stmt.execute(params![
            symbol,
            set.date.to_string(),
            percent(set.rsi_14, "rsi_14"),
            price(set.ema_12, "ema_12"),
            price(set.ema_26, "ema_26"),
            price(set.ema_50, "ema_50"),
            price(set.macd_line, "macd_line"),
            price(set.macd_signal, "macd_signal"),
            price(set.macd_histogram, "macd_histogram"),
            price(set.bb_upper, "bb_upper"),
            price(set.bb_middle, "bb_middle"),
            price(set.bb_lower, "bb_lower"),
            indicator(set.bb_k, "bb_k"),
            price(correct_bounded(set.atr_14, 0.0, f64::INFINITY, "atr_14"), "atr_14"),
            percent(set.adx_14, "adx_14"),
            indicator(set.plus_di, "plus_di"),
            indicator(set.minus_di, "minus_di"),
            indicator(set.cci_20, "cci_20"),
            percent(set.stoch_k, "stoch_k"),
            percent(set.stoch_d, "stoch_d"),
            support[0],
            support[1],
            support[2],
            resistance[0],
            resistance[1],
            resistance[2],
            set.low_confidence,
            now,
        ])?;
        if changed == 0 {
            return Err(PersistenceError::MissingBar {
                symbol: symbol.to_string(),
                date: set.date,
            });
        }
    }
    Ok(sets.len())
}

fn row_to_bar(row: &Row<'_>) -> rusqlite::Result<PriceBar> {
    let date: String = row.get(1)?;
    let volume: i64 = row.get(6)?;
    Ok(PriceBar {
        symbol: row.get(0)?,
        date: parse_date(1, &date)?,
        open: from_fixed(row.get(2)?, PRICE_SCALE),
        high: from_fixed(row.get(3)?, PRICE_SCALE),
        low: from_fixed(row.get(4)?, PRICE_SCALE),
        close: from_fixed(row.get(5)?, PRICE_SCALE),
        volume: volume as f64,
    })
}

fn row_to_indicators(row: &Row<'_>) -> rusqlite::Result<IndicatorSet> {
    let date: String = row.get(1)?;
    let scaled = |idx: usize, scale: f64| -> rusqlite::Result<f64> {
        let stored: Option<i32> = row.get(idx)?;
        Ok(stored.map(|v| from_fixed(v, scale)).unwrap_or(0.0))
    };
    let value = |idx: usize| scaled(idx, INDICATOR_SCALE);
    let level = |idx: usize| scaled(idx, PRICE_SCALE);
    Ok(IndicatorSet {
        symbol: row.get(0)?,
        date: parse_date(1, &date)?,
        rsi_14: value(2)?,
        ema_12: level(3)?,
        ema_26: level(4)?,
        ema_50: level(5)?,
        macd_line: level(6)?,
        macd_signal: level(7)?,
        macd_histogram: level(8)?,
        bb_upper: level(9)?,
        bb_middle: level(10)?,
        bb_lower: level(11)?,
        bb_k: value(12)?,
        atr_14: level(13)?,
        adx_14: value(14)?,
        plus_di: value(15)?,
        minus_di: value(16)?,
        cci_20: value(17)?,
        stoch_k: value(18)?,
        stoch_d: value(19)?,
        support: [level(20)?, level(21)?, level(22)?],
        resistance: [level(23)?, level(24)?, level(25)?],
        low_confidence: row.get(26)?,
        defaulted: Vec::new(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorEngine;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(symbol: &str, d: u32, close: f64) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date: day(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_234_567.0,
        }
    }

    fn indicator_set(symbol: &str, d: u32) -> IndicatorSet {
        IndicatorSet {
            symbol: symbol.to_string(),
            date: day(d),
            rsi_14: 55.55,
            ema_12: 101.25,
            ema_26: 100.5,
            ema_50: 99.75,
            macd_line: 0.75,
            macd_signal: 0.5,
            macd_histogram: 0.25,
            bb_upper: 105.0,
            bb_middle: 100.0,
            bb_lower: 95.0,
            bb_k: 2.0,
            atr_14: 1.5,
            adx_14: 30.0,
            plus_di: 25.0,
            minus_di: 10.0,
            cci_20: -120.5,
            stoch_k: 80.0,
            stoch_d: 75.0,
            support: [98.0, 97.0, 96.0],
            resistance: [102.0, 103.0, 104.0],
            low_confidence: false,
            defaulted: Vec::new(),
        }
    }

    #[test]
    fn test_fixed_point_round_trip() {
        assert_eq!(to_fixed(123.4567, PRICE_SCALE, "close"), 1_234_567);
        assert!((from_fixed(1_234_567, PRICE_SCALE) - 123.4567).abs() < 1e-9);
        assert_eq!(to_fixed(-12.345, INDICATOR_SCALE, "cci"), -1_235);
    }

    #[test]
    fn test_out_of_range_clamped() {
        assert_eq!(to_fixed(1e9, PRICE_SCALE, "close"), i32::MAX);
        assert_eq!(to_fixed(-1e9, PRICE_SCALE, "close"), i32::MIN);
        assert_eq!(to_fixed(f64::INFINITY, INDICATOR_SCALE, "ema"), i32::MAX);
        assert_eq!(to_fixed(f64::NAN, INDICATOR_SCALE, "ema"), 0);
        assert_eq!(volume_to_stored(1e30), i64::MAX);
        assert_eq!(volume_to_stored(1_000.4), 1_000);
    }

    #[test]
    fn test_bounded_correction() {
        assert_eq!(correct_bounded(104.0, 0.0, 100.0, "rsi_14"), 100.0);
        assert_eq!(correct_bounded(-0.5, 0.0, 100.0, "stoch_k"), 0.0);
        assert_eq!(correct_bounded(42.0, 0.0, 100.0, "adx_14"), 42.0);
    }

    #[tokio::test]
    async fn test_bars_round_trip() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        let bars = vec![bar("AAPL", 1, 180.1234), bar("AAPL", 4, 181.5)];
        assert_eq!(store.upsert_bars("AAPL", &bars, false).await.unwrap(), 2);

        let loaded = store.load_bars("AAPL", None).await.unwrap();
        assert_eq!(loaded, bars);
        assert_eq!(store.bar_count("AAPL").await.unwrap(), 2);
        assert_eq!(store.latest_bar_date("AAPL").await.unwrap(), Some(day(4)));
        assert_eq!(store.latest_bar_date("MSFT").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        let bars = vec![bar("AAPL", 1, 100.0), bar("AAPL", 4, 101.0)];
        store.upsert_bars("AAPL", &bars, false).await.unwrap();
        store.upsert_bars("AAPL", &bars, false).await.unwrap();
        assert_eq!(store.bar_count("AAPL").await.unwrap(), 2);

        let revised = vec![bar("AAPL", 4, 102.0)];
        store.upsert_bars("AAPL", &revised, false).await.unwrap();
        let loaded = store.load_bars("AAPL", Some(1)).await.unwrap();
        assert_eq!(loaded[0].close, 102.0);
    }

    #[tokio::test]
    async fn test_indicators_require_bar() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        store.upsert_bars("AAPL", &[bar("AAPL", 1, 100.0)], false).await.unwrap();

        let sets = vec![indicator_set("AAPL", 1), indicator_set("AAPL", 2)];
        let err = store.upsert_indicators("AAPL", &sets).await.unwrap_err();
        assert!(matches!(err, PersistenceError::MissingBar { date, .. } if date == day(2)));

        // the failed transaction wrote nothing
        assert!(store.load_indicators("AAPL", day(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_indicators_round_trip_and_bar_update_keeps_them() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        let bars = vec![bar("AAPL", 1, 100.0)];
        let set = indicator_set("AAPL", 1);
        store.persist_symbol("AAPL", &bars, false, &[set.clone()]).await.unwrap();

        store.upsert_bars("AAPL", &bars, false).await.unwrap();
        let loaded = store.load_indicators("AAPL", day(1)).await.unwrap().unwrap();
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn test_sub_dollar_levels_survive_storage() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        let bars: Vec<PriceBar> = (1..=30)
            .map(|d| PriceBar {
                high: 0.8008,
                low: 0.7992,
                ..bar("PENNY", d, 0.80)
            })
            .collect();
        let set = IndicatorEngine::default().compute("PENNY", &bars, false).unwrap();
        store.persist_symbol("PENNY", &bars, false, &[set.clone()]).await.unwrap();

        let loaded = store.load_indicators("PENNY", day(30)).await.unwrap().unwrap();
        let s = loaded.support;
        let r = loaded.resistance;
        assert!(s[0] > s[1] && s[1] > s[2], "support {:?}", s);
        assert!(r[0] < r[1] && r[1] < r[2], "resistance {:?}", r);
        assert!(s[0] < r[0]);
        for (stored, computed) in s.iter().chain(&r).zip(set.support.iter().chain(&set.resistance)) {
            assert!((stored - computed).abs() <= 1e-4, "{} vs {}", stored, computed);
        }
        assert!((loaded.ema_12 - set.ema_12).abs() <= 1e-4);
        assert!((loaded.bb_lower - set.bb_lower).abs() <= 1e-4);
    }

    #[test]
    fn test_tiers_kept_apart_after_rounding() {
        let (s, r) = encode_tiers([0.50001, 0.50002, 0.5], [0.50001, 0.5, 0.50003]);
        assert_eq!(s, [5_000, 4_999, 4_998]);
        assert_eq!(r, [5_001, 5_002, 5_003]);
    }

    #[tokio::test]
    async fn test_out_of_bounds_indicator_corrected_on_write() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        store.upsert_bars("AAPL", &[bar("AAPL", 1, 100.0)], false).await.unwrap();
        let mut set = indicator_set("AAPL", 1);
        set.rsi_14 = 101.0;
        set.atr_14 = -2.0;
        store.upsert_indicators("AAPL", &[set]).await.unwrap();

        let loaded = store.load_indicators("AAPL", day(1)).await.unwrap().unwrap();
        assert_eq!(loaded.rsi_14, 100.0);
        assert_eq!(loaded.atr_14, 0.0);
    }

    #[tokio::test]
    async fn test_symbols() {
        let store = PersistenceGateway::open_in_memory().unwrap();
        let entries = vec![
            SymbolEntry {
                symbol: "MSFT".to_string(),
                name: Some("Microsoft".to_string()),
            },
            SymbolEntry {
                symbol: "AAPL".to_string(),
                name: None,
            },
        ];
        assert_eq!(store.upsert_symbols(&entries).await.unwrap(), 2);
        assert_eq!(store.active_symbols().await.unwrap(), vec!["AAPL", "MSFT"]);

        assert!(store.set_active("MSFT", false).await.unwrap());
        assert_eq!(store.active_symbols().await.unwrap(), vec!["AAPL"]);

        // re-seeding reactivates
        store.upsert_symbols(&entries).await.unwrap();
        assert_eq!(store.active_symbols().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("prices.db");
        {
            let store = PersistenceGateway::open(&path).unwrap();
            store.upsert_bars("AAPL", &[bar("AAPL", 1, 100.0)], false).await.unwrap();
        }
        let store = PersistenceGateway::open(&path).unwrap();
        assert_eq!(store.bar_count("AAPL").await.unwrap(), 1);
    }
}
