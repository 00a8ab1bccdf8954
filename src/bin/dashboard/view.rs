use std::sync::Arc;

use crate::app::Coin;

/// Display strings for one coin row.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinLine {
    pub symbol: String,
    pub name: String,
    pub price: String,
    pub change: String,
    /// `None` when the 24h change is unknown.
    pub rising: Option<bool>,
    pub volume: String,
    pub market_cap: String,
    pub index: String,
}

impl From<&Coin> for CoinLine {
    fn from(c: &Coin) -> Self {
        Self {
            symbol: c.symbol.clone(),
            name: c.name.clone(),
            price: c.current_price.map_or("—".to_string(), format_price),
            change: c.price_change_pct_24h.map_or("—".to_string(), format_change),
            rising: c.price_change_pct_24h.map(|p| p >= 0.0),
            volume: c.volume_24h.map_or("—".to_string(), format_compact),
            market_cap: c.market_cap.map_or("—".to_string(), format_compact),
            index: c.ai_index_value.map_or("—".to_string(), |v| format!("{v:.1}/10")),
        }
    }
}

/// Memoized formatting of the coin list. Rows are rebuilt only when handed a
/// different list allocation; the same `Arc` yields the same rows `Arc`.
#[derive(Default)]
pub struct CoinListView {
    source: Option<Arc<Vec<Coin>>>,
    rows: Arc<Vec<CoinLine>>,
    computations: u64,
}

impl CoinListView {
    pub fn rows(&mut self, coins: &Arc<Vec<Coin>>) -> Arc<Vec<CoinLine>> {
        if let Some(source) = &self.source {
            if Arc::ptr_eq(source, coins) {
                return Arc::clone(&self.rows);
            }
        }
        self.rows = Arc::new(coins.iter().map(CoinLine::from).collect());
        self.source = Some(Arc::clone(coins));
        self.computations += 1;
        Arc::clone(&self.rows)
    }

    /// How many times rows were rebuilt.
    pub fn computations(&self) -> u64 {
        self.computations
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `$64,250.12` for prices of a dollar or more, six decimals below that.
pub fn format_price(v: f64) -> String {
    if v.abs() < 1.0 {
        return format!("${v:.6}");
    }
    let fixed = format!("{:.2}", v.abs());
    let (whole, frac) = fixed.split_once('.').unwrap_or((&fixed, "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if v < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac}")
}

pub fn format_change(pct: f64) -> String {
    format!("{pct:+.2}%")
}

/// `1.23T`, `4.56B`, `7.89M`, `1.2K`.
pub fn format_compact(v: f64) -> String {
    let abs = v.abs();
    if abs >= 1e12 {
        format!("{:.2}T", v / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else {
        format!("{v:.0}")
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
