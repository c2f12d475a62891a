use {
    alloy_primitives::Address,
    chain::Chain,
    std::{net::SocketAddr, time::Duration},
    url::Url,
};

#[derive(clap::Parser)]
pub struct Arguments {
    /// Url of the Postgres database. By default connects to locally running
    /// postgres.
    #[clap(long, env, default_value = "postgresql://")]
    pub db_url: Url,

    /// JSON-RPC endpoint of the chain node to poll.
    #[clap(long, env)]
    pub node_url: Url,

    /// The chain this instance indexes. Determines the confirmation lag and
    /// the per-chain table names.
    #[clap(long, env)]
    pub chain: Chain,

    /// Overrides the chain id stored in cursor and balance rows; defaults to
    /// the chain's canonical id.
    #[clap(long, env)]
    pub chain_id: Option<i64>,

    /// Address of the order-book exchange contract whose logs are indexed.
    #[clap(long, env)]
    pub dex_address: Address,

    /// Address recorded as the currency of on-chain orders.
    #[clap(long, env)]
    pub eth_address: Address,

    /// Redis instance backing the order-manager queue.
    #[clap(long, env, default_value = "redis://localhost:6379")]
    pub redis_url: String,

    #[clap(long, env, default_value = "0.0.0.0:9586")]
    pub metrics_address: SocketAddr,

    #[clap(long, env, default_value = "debug,hyper=warn,sqlx=warn")]
    pub log_filter: String,

    /// Backoff between head polls and after transient RPC errors.
    #[clap(long, env, default_value = "10s", value_parser = humantime::parse_duration)]
    pub scan_sleep_interval: Duration,

    /// Maximum number of blocks fetched per `eth_getLogs` window.
    #[clap(long, env, default_value = "10")]
    pub scan_block_window: u64,

    /// Time between points accrual passes.
    #[clap(long, env, default_value = "1h", value_parser = humantime::parse_duration)]
    pub accrual_interval: Duration,

    /// Hour boundaries of the accrual buckets are computed in a zone this
    /// many hours east of UTC.
    #[clap(long, env, default_value = "0")]
    pub accrual_utc_offset_hours: i64,

    /// Whether this deployment computes collection floor snapshots.
    #[clap(long, env)]
    pub floor_price_enabled: bool,

    /// Time between floor price snapshots.
    #[clap(long, env, default_value = "1h", value_parser = humantime::parse_duration)]
    pub floor_price_interval: Duration,

    /// How long floor price snapshots are retained.
    #[clap(long, env, default_value = "7days", value_parser = humantime::parse_duration)]
    pub floor_price_retention: Duration,

    /// Number of floor snapshots inserted per statement.
    #[clap(long, env, default_value = "500")]
    pub floor_price_batch_size: usize,
}

impl Arguments {
    pub fn chain_id(&self) -> i64 {
        self.chain_id
            .unwrap_or_else(|| i64::try_from(self.chain.id()).expect("chain id fits i64"))
    }

    pub fn accrual_utc_offset(&self) -> i64 {
        self.accrual_utc_offset_hours * 3_600
    }
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            db_url: _,
            node_url,
            chain,
            chain_id,
            dex_address,
            eth_address,
            redis_url: _,
            metrics_address,
            log_filter,
            scan_sleep_interval,
            scan_block_window,
            accrual_interval,
            accrual_utc_offset_hours,
            floor_price_enabled,
            floor_price_interval,
            floor_price_retention,
            floor_price_batch_size,
        } = self;
        writeln!(f, "db_url: SECRET")?;
        writeln!(f, "node_url: {node_url}")?;
        writeln!(f, "chain: {chain}")?;
        writeln!(f, "chain_id: {:?}", chain_id)?;
        writeln!(f, "dex_address: {dex_address}")?;
        writeln!(f, "eth_address: {eth_address}")?;
        writeln!(f, "redis_url: SECRET")?;
        writeln!(f, "metrics_address: {metrics_address}")?;
        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "scan_sleep_interval: {scan_sleep_interval:?}")?;
        writeln!(f, "scan_block_window: {scan_block_window}")?;
        writeln!(f, "accrual_interval: {accrual_interval:?}")?;
        writeln!(f, "accrual_utc_offset_hours: {accrual_utc_offset_hours}")?;
        writeln!(f, "floor_price_enabled: {floor_price_enabled}")?;
        writeln!(f, "floor_price_interval: {floor_price_interval:?}")?;
        writeln!(f, "floor_price_retention: {floor_price_retention:?}")?;
        writeln!(f, "floor_price_batch_size: {floor_price_batch_size}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn parses_minimal_arguments() {
        let args = Arguments::parse_from([
            "syncer",
            "--node-url",
            "http://localhost:8545",
            "--chain",
            "sepolia",
            "--dex-address",
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "--eth-address",
            "0x0000000000000000000000000000000000000000",
        ]);
        assert_eq!(args.chain, Chain::Sepolia);
        assert_eq!(args.chain_id(), 11155111);
        assert_eq!(args.scan_block_window, 10);
        assert_eq!(args.scan_sleep_interval, Duration::from_secs(10));
        assert_eq!(args.accrual_interval, Duration::from_secs(3_600));
        assert!(!args.floor_price_enabled);
    }
}
