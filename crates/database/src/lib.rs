pub mod activities;
pub mod balances;
pub mod floor_prices;
pub mod indexed_status;
pub mod integral_sums;
pub mod items;
pub mod orders;
pub mod testing;

// Design:
//
// Functions that execute multiple statements take `&mut PgTransaction` so the
// whole function succeeds or fails together. Functions that execute a single
// statement take `&mut PgConnection`. We usually call the parameter `ex` for
// `Executor`. PgTransaction derefs to PgConnection so callers decide whether
// a call participates in a bigger transaction; they are responsible for
// calling `commit`.
//
// Every table except `indexed_status` is per chain (`orders_eth`,
// `orders_base`, ...), so queries interpolate the table name from a `Tables`
// value built once at startup and bind everything else. Only `Tables` ever
// produces a table name; no user input reaches `format!`d SQL.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// Resolved per-chain table names.
#[derive(Clone, Debug)]
pub struct Tables {
    orders: String,
    activities: String,
    items: String,
    floor_prices: String,
    balances: String,
    balance_sums: String,
    integral_sums: String,
}

impl Tables {
    pub fn new(chain: &str) -> Self {
        // `zksync-era` style names are quoted wherever they are interpolated.
        let suffix = chain.replace('-', "_");
        Self {
            orders: format!("orders_{suffix}"),
            activities: format!("activities_{suffix}"),
            items: format!("items_{suffix}"),
            floor_prices: format!("collection_floor_price_{suffix}"),
            balances: format!("erc_balance_{suffix}"),
            balance_sums: format!("erc_balance_sum_{suffix}"),
            integral_sums: format!("erc_integral_sum_{suffix}"),
        }
    }

    pub fn orders(&self) -> &str {
        &self.orders
    }

    pub fn activities(&self) -> &str {
        &self.activities
    }

    pub fn items(&self) -> &str {
        &self.items
    }

    pub fn floor_prices(&self) -> &str {
        &self.floor_prices
    }

    pub fn balances(&self) -> &str {
        &self.balances
    }

    pub fn balance_sums(&self) -> &str {
        &self.balance_sums
    }

    pub fn integral_sums(&self) -> &str {
        &self.integral_sums
    }
}

/// The cursor table shared by all scanners, partitioned by `index_type`.
pub const INDEXED_STATUS_TABLE: &str = "indexed_status";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_use_chain_suffix() {
        let tables = Tables::new("sepolia");
        assert_eq!(tables.orders(), "orders_sepolia");
        assert_eq!(tables.balance_sums(), "erc_balance_sum_sepolia");

        let tables = Tables::new("zksync-era");
        assert_eq!(tables.integral_sums(), "erc_integral_sum_zksync_era");
    }
}
