//! Access to the chain node, reduced to the three calls the indexer needs.

use {
    alloy_primitives::{Address, B256},
    alloy_provider::{DynProvider, Provider, ProviderBuilder},
    alloy_rpc_types_eth::{BlockNumberOrTag, Filter},
    anyhow::{Context, Result},
    async_trait::async_trait,
    url::Url,
};

/// A confirmed contract log, already stripped down to what projection needs.
#[derive(Clone, Debug)]
pub struct EventLog {
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl EventLog {
    /// The transaction hash in the format persisted to activity rows.
    pub fn tx_hash_hex(&self) -> String {
        format!("{:?}", self.tx_hash)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The current head of the chain.
    async fn block_number(&self) -> Result<u64>;

    /// All logs the contract emitted in `[from, to]`, in block-then-index
    /// order as returned by the node.
    async fn filter_logs(&self, from: u64, to: u64, address: Address) -> Result<Vec<EventLog>>;

    /// Unix timestamp of the given block.
    async fn block_time(&self, block: u64) -> Result<i64>;
}

/// A [`ChainClient`] backed by a JSON-RPC HTTP endpoint.
pub struct RpcNode {
    provider: DynProvider,
}

impl RpcNode {
    pub fn new(url: Url) -> Self {
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Self { provider }
    }
}

#[async_trait]
impl ChainClient for RpcNode {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("eth_blockNumber")
    }

    async fn filter_logs(&self, from: u64, to: u64, address: Address) -> Result<Vec<EventLog>> {
        let filter = Filter::new().from_block(from).to_block(to).address(address);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .context("eth_getLogs")?;
        logs.into_iter()
            .map(|log| {
                Ok(EventLog {
                    topics: log.inner.data.topics().to_vec(),
                    data: log.inner.data.data.to_vec(),
                    block_number: log.block_number.context("log without block number")?,
                    tx_hash: log.transaction_hash.context("log without transaction hash")?,
                    log_index: log.log_index.context("log without log index")?,
                })
            })
            .collect()
    }

    async fn block_time(&self, number: u64) -> Result<i64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .context("eth_getBlockByNumber")?
            .with_context(|| format!("block {number} not found"))?;
        i64::try_from(block.header.timestamp).context("block timestamp overflows i64")
    }
}
