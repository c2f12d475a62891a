//! The downstream order-manager queue.
//!
//! The indexer is the producer only: it pushes compact JSON records onto
//! per-chain redis lists that the order manager drains for price updates and
//! expiry tracking.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    redis::AsyncCommands,
    serde::Serialize,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum TradeKind {
    Buy,
    Cancel,
}

/// Tells the order manager that an order left the book, so collection floors
/// may need recomputing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TradeEvent {
    pub order_id: String,
    pub collection_address: String,
    pub token_id: String,
    pub event_type: TradeKind,
    pub from: String,
    pub to: String,
}

/// A freshly made order, queued for expiry tracking and floor updates.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub collection_address: String,
    pub token_id: String,
    pub price: String,
    pub maker: String,
    pub expire_time: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn push_trade(&self, event: TradeEvent) -> Result<()>;
    async fn push_order(&self, record: OrderRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisQueue {
    conn: redis::aio::ConnectionManager,
    trade_key: String,
    order_key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, chain: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("connect redis")?;
        Ok(Self {
            conn,
            trade_key: format!("update_price_events:{chain}"),
            order_key: format!("order_manager_queue:{chain}"),
        })
    }

    async fn push(&self, key: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, payload)
            .await
            .with_context(|| format!("lpush {key}"))?;
        Ok(())
    }
}

#[async_trait]
impl EventQueue for RedisQueue {
    async fn push_trade(&self, event: TradeEvent) -> Result<()> {
        let payload = serde_json::to_string(&event).context("serialize trade event")?;
        self.push(&self.trade_key, payload).await
    }

    async fn push_order(&self, record: OrderRecord) -> Result<()> {
        let payload = serde_json::to_string(&record).context("serialize order record")?;
        self.push(&self.order_key, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_event_wire_format() {
        let event = TradeEvent {
            order_id: "0xab".to_string(),
            collection_address: "0xcd".to_string(),
            token_id: "5".to_string(),
            event_type: TradeKind::Buy,
            from: "0x01".to_string(),
            to: "0x02".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"order_id":"0xab","collection_address":"0xcd","token_id":"5","event_type":"Buy","from":"0x01","to":"0x02"}"#
        );
    }
}
