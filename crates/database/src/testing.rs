//! Schema bootstrap for integration tests.
//!
//! Production tables are provisioned by the deployment's migration tooling;
//! tests create an equivalent schema on the fly (chain suffix `test`) so the
//! Postgres tests can run against an empty local database in parallel
//! transactions.

use {
    crate::{INDEXED_STATUS_TABLE, Tables},
    sqlx::{Executor, PgConnection},
};

pub async fn create_schema(ex: &mut PgConnection, tables: &Tables) -> Result<(), sqlx::Error> {
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {INDEXED_STATUS_TABLE} ( \
               chain_id bigint NOT NULL, \
               index_type bigint NOT NULL, \
               last_indexed_block bigint NOT NULL, \
               last_indexed_time bigint NOT NULL, \
               PRIMARY KEY (chain_id, index_type) \
             );"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               order_id text PRIMARY KEY, \
               collection_address text NOT NULL, \
               token_id text NOT NULL, \
               marketplace_id int NOT NULL, \
               currency_address text NOT NULL, \
               maker text NOT NULL, \
               taker text NOT NULL, \
               price numeric(78, 0) NOT NULL, \
               quantity_remaining bigint NOT NULL, \
               size bigint NOT NULL, \
               order_type int NOT NULL, \
               order_status int NOT NULL, \
               expire_time bigint NOT NULL, \
               event_time bigint NOT NULL, \
               salt bigint NOT NULL \
             );",
            tables.orders()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               id bigserial PRIMARY KEY, \
               activity_type int NOT NULL, \
               maker text NOT NULL, \
               taker text NOT NULL, \
               collection_address text NOT NULL, \
               token_id text NOT NULL, \
               currency_address text NOT NULL, \
               price numeric(78, 0) NOT NULL, \
               block_number bigint NOT NULL, \
               tx_hash text NOT NULL, \
               event_index bigint NOT NULL, \
               event_time bigint NOT NULL, \
               UNIQUE (tx_hash, event_index) \
             );",
            tables.activities()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               collection_address text NOT NULL, \
               token_id text NOT NULL, \
               owner text NOT NULL, \
               PRIMARY KEY (collection_address, token_id) \
             );",
            tables.items()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               collection_address text NOT NULL, \
               price numeric(78, 0) NOT NULL, \
               event_time bigint NOT NULL, \
               PRIMARY KEY (collection_address, event_time) \
             );",
            tables.floor_prices()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               id bigserial PRIMARY KEY, \
               chain_id bigint NOT NULL, \
               owner text NOT NULL, \
               quantity bigint NOT NULL, \
               change_time bigint NOT NULL, \
               event_type text NOT NULL, \
               whether_integral text NOT NULL DEFAULT 'N', \
               tx_hash text NOT NULL, \
               event_index bigint NOT NULL, \
               leg int NOT NULL, \
               create_time bigint NOT NULL DEFAULT (extract(epoch FROM now()) * 1000)::bigint, \
               update_time bigint NOT NULL DEFAULT (extract(epoch FROM now()) * 1000)::bigint, \
               UNIQUE (tx_hash, event_index, leg) \
             );",
            tables.balances()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               owner text PRIMARY KEY, \
               chain_id bigint NOT NULL, \
               quantity bigint NOT NULL, \
               change_time bigint NOT NULL \
             );",
            tables.balance_sums()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               owner text PRIMARY KEY, \
               chain_id bigint NOT NULL, \
               integral numeric(38, 2) NOT NULL, \
               deadline_time bigint NOT NULL \
             );",
            tables.integral_sums()
        ),
    ];
    for statement in &statements {
        ex.execute(statement.as_str()).await?;
    }
    Ok(())
}

/// Empties every table of the given chain plus the shared cursor table.
/// Only used by tests that cannot run inside a rolled-back transaction.
pub async fn clear(ex: &mut PgConnection, tables: &Tables) -> Result<(), sqlx::Error> {
    for table in [
        INDEXED_STATUS_TABLE,
        tables.orders(),
        tables.activities(),
        tables.items(),
        tables.floor_prices(),
        tables.balances(),
        tables.balance_sums(),
        tables.integral_sums(),
    ] {
        ex.execute(format!("TRUNCATE \"{table}\";").as_str()).await?;
    }
    Ok(())
}
