//! Row-level access policies.
//!
//! SQLite has no native row-level security, so every repository call is
//! checked here first. Anonymous callers get the public read policies; the
//! service role (requests bearing `SERVICE_KEY`, and the background tasks)
//! may read and write everything.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Anon,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Coins,
    CoinPriceHistory,
    CoinNews,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Coins, Table::CoinPriceHistory, Table::CoinNews];

    pub fn name(self) -> &'static str {
        match self {
            Table::Coins => "coins",
            Table::CoinPriceHistory => "coin_price_history",
            Table::CoinNews => "coin_news",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Select => "select",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Row filter a policy attaches to an allowed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    All,
    /// Only rows with `is_active = 1`.
    ActiveOnly,
}

pub struct Policy {
    pub name: &'static str,
    pub table: Table,
    pub role: Role,
    pub actions: &'static [Action],
    pub filter: RowFilter,
}

const ALL_ACTIONS: &[Action] = &[Action::Select, Action::Insert, Action::Update, Action::Delete];

pub const POLICIES: &[Policy] = &[
    Policy {
        name: "Public read access to active coins",
        table: Table::Coins,
        role: Role::Anon,
        actions: &[Action::Select],
        filter: RowFilter::ActiveOnly,
    },
    Policy {
        name: "Service role full access to coins",
        table: Table::Coins,
        role: Role::Service,
        actions: ALL_ACTIONS,
        filter: RowFilter::All,
    },
    Policy {
        name: "Public read access to price history",
        table: Table::CoinPriceHistory,
        role: Role::Anon,
        actions: &[Action::Select],
        filter: RowFilter::All,
    },
    Policy {
        name: "Service role full access to price history",
        table: Table::CoinPriceHistory,
        role: Role::Service,
        actions: ALL_ACTIONS,
        filter: RowFilter::All,
    },
    Policy {
        name: "Public read access to news",
        table: Table::CoinNews,
        role: Role::Anon,
        actions: &[Action::Select],
        filter: RowFilter::All,
    },
    Policy {
        name: "Service role full access to news",
        table: Table::CoinNews,
        role: Role::Service,
        actions: ALL_ACTIONS,
        filter: RowFilter::All,
    },
];

/// Whether row-level security is enabled for `table`: at least one policy
/// is attached to it.
pub fn rls_enabled(table: Table) -> bool {
    POLICIES.iter().any(|p| p.table == table)
}

/// Names of the policies attached to `table`.
pub fn policy_names(table: Table) -> impl Iterator<Item = &'static str> {
    POLICIES.iter().filter(move |p| p.table == table).map(|p| p.name)
}

/// Check `role` may perform `action` on `table`. Returns the row filter the
/// caller must apply; callers with no matching policy are refused.
pub fn authorize(role: Role, table: Table, action: Action) -> Result<RowFilter> {
    POLICIES
        .iter()
        .find(|p| p.table == table && p.role == role && p.actions.contains(&action))
        .map(|p| p.filter)
        .ok_or_else(|| {
            AppError::Forbidden(format!("{action} on {table} is not permitted for this role"))
        })
}
