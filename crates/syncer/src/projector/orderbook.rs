//! Projects `LogMake` / `LogCancel` / `LogMatch` into the order, activity
//! and item tables and feeds the order manager queue.

use {
    crate::{
        events::{self, DexEvent, LogCancel, LogMake, LogMatch, SALE_KIND_FIX_FOR_COLLECTION, SIDE_BID},
        node::{ChainClient, EventLog},
        queue::{EventQueue, OrderRecord, TradeEvent, TradeKind},
        scanner::EventSink,
    },
    alloy_primitives::{Address, B256, U256},
    anyhow::{Context, Result},
    async_trait::async_trait,
    bigdecimal::BigDecimal,
    database::{
        Tables,
        activities::{self, Activity, ActivityKind},
        items,
        orders::{self, MARKETPLACE_ORDER_BOOK, Order, OrderStatus, OrderType},
    },
    sqlx::PgPool,
    std::sync::Arc,
};

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub struct OrderbookProjector<Q> {
    pool: PgPool,
    tables: Tables,
    client: Arc<dyn ChainClient>,
    queue: Q,
    /// The native currency every on-chain order is denominated in.
    currency_address: String,
}

/// Lower-case `0x` hex of the on-chain order key, the stored order id.
fn encode_order_key(key: &B256) -> String {
    format!("0x{}", hex::encode(key))
}

fn classify(side: u8, sale_kind: u8) -> OrderType {
    if side == SIDE_BID {
        if sale_kind == SALE_KIND_FIX_FOR_COLLECTION {
            OrderType::CollectionBid
        } else {
            OrderType::ItemBid
        }
    } else {
        OrderType::Listing
    }
}

fn make_activity_kind(order_type: OrderType) -> ActivityKind {
    match order_type {
        OrderType::Listing => ActivityKind::Listing,
        OrderType::CollectionBid => ActivityKind::CollectionBid,
        OrderType::ItemBid => ActivityKind::ItemBid,
    }
}

fn cancel_activity_kind(order_type: OrderType) -> ActivityKind {
    match order_type {
        OrderType::Listing => ActivityKind::CancelListing,
        OrderType::CollectionBid => ActivityKind::CancelCollectionBid,
        OrderType::ItemBid => ActivityKind::CancelItemBid,
    }
}

/// Who is buying and which of the matched orders is the sell side.
///
/// A bid-side make order means the seller initiated the match against a
/// standing bid, so the traded NFT is described by the take order; a
/// list-side make order is the mirror case.
#[derive(Debug, Eq, PartialEq)]
struct MatchRoles {
    buyer: Address,
    seller: Address,
    collection: Address,
    token_id: U256,
    sell_order_id: String,
    buy_order_id: String,
}

fn resolve_roles(event: &LogMatch) -> MatchRoles {
    let make_order_id = encode_order_key(&event.makeOrderKey);
    let take_order_id = encode_order_key(&event.takeOrderKey);
    if event.makeOrder.side == SIDE_BID {
        MatchRoles {
            buyer: event.makeOrder.maker,
            seller: event.takeOrder.maker,
            collection: event.takeOrder.nft.collection,
            token_id: event.takeOrder.nft.tokenId,
            sell_order_id: take_order_id,
            buy_order_id: make_order_id,
        }
    } else {
        MatchRoles {
            buyer: event.takeOrder.maker,
            seller: event.makeOrder.maker,
            collection: event.makeOrder.nft.collection,
            token_id: event.makeOrder.nft.tokenId,
            sell_order_id: make_order_id,
            buy_order_id: take_order_id,
        }
    }
}

impl<Q: EventQueue> OrderbookProjector<Q> {
    pub fn new(
        pool: PgPool,
        tables: Tables,
        client: Arc<dyn ChainClient>,
        queue: Q,
        currency_address: String,
    ) -> Self {
        Self {
            pool,
            tables,
            client,
            queue,
            currency_address,
        }
    }

    fn activity(&self, log: &EventLog, event_time: i64) -> Result<Activity> {
        Ok(Activity {
            currency_address: self.currency_address.clone(),
            block_number: i64::try_from(log.block_number).context("block number overflows i64")?,
            tx_hash: log.tx_hash_hex(),
            event_index: i64::try_from(log.log_index).context("log index overflows i64")?,
            event_time,
            ..Default::default()
        })
    }

    async fn on_make(&self, event: LogMake, log: &EventLog) -> Result<()> {
        let order_id = encode_order_key(&event.orderKey);
        let order_type = classify(event.side, event.saleKind);
        let size = i64::try_from(event.nft.amount)
            .ok()
            .context("asset amount overflows i64")?;

        let order = Order {
            order_id: order_id.clone(),
            collection_address: event.nft.collection.to_string(),
            token_id: event.nft.tokenId.to_string(),
            marketplace_id: MARKETPLACE_ORDER_BOOK,
            currency_address: self.currency_address.clone(),
            maker: event.maker.to_string(),
            taker: ZERO_ADDRESS.to_string(),
            price: BigDecimal::from(event.price),
            quantity_remaining: size,
            size,
            order_type,
            order_status: OrderStatus::Active,
            expire_time: event.expiry.cast_signed(),
            event_time: chrono::Utc::now().timestamp(),
            salt: event.salt.cast_signed(),
        };

        let mut ex = self.pool.acquire().await?;
        if let Err(err) = orders::insert_ignore_conflicts(&mut ex, &self.tables, &order).await {
            tracing::error!(?err, order_id, "failed to insert order");
        }

        let event_time = self
            .client
            .block_time(log.block_number)
            .await
            .context("failed to get block time")?;
        let activity = Activity {
            activity_type: make_activity_kind(order_type),
            maker: order.maker.clone(),
            taker: ZERO_ADDRESS.to_string(),
            collection_address: order.collection_address.clone(),
            token_id: order.token_id.clone(),
            price: order.price.clone(),
            ..self.activity(log, event_time)?
        };
        if let Err(err) = activities::insert_ignore_conflicts(&mut ex, &self.tables, &activity).await
        {
            tracing::warn!(?err, order_id, "failed to insert activity");
        }

        if let Err(err) = self
            .queue
            .push_order(OrderRecord {
                order_id: order.order_id.clone(),
                collection_address: order.collection_address.clone(),
                token_id: order.token_id.clone(),
                price: order.price.to_string(),
                maker: order.maker.clone(),
                expire_time: order.expire_time,
            })
            .await
        {
            tracing::error!(?err, order_id, "failed to enqueue order record");
        }
        Ok(())
    }

    async fn on_cancel(&self, event: LogCancel, log: &EventLog) -> Result<()> {
        let order_id = encode_order_key(&event.orderKey);

        let mut ex = self.pool.acquire().await?;
        orders::set_cancelled(&mut ex, &self.tables, &order_id)
            .await
            .context("failed to cancel order")?;
        let Some(order) = orders::fetch(&mut ex, &self.tables, &order_id)
            .await
            .context("failed to read cancelled order")?
        else {
            // Cancels of orders this marketplace never saw carry no
            // information for downstream tables.
            tracing::warn!(order_id, "cancelled order is unknown");
            return Ok(());
        };

        let event_time = self
            .client
            .block_time(log.block_number)
            .await
            .context("failed to get block time")?;
        let activity = Activity {
            activity_type: cancel_activity_kind(order.order_type),
            maker: order.maker.clone(),
            taker: ZERO_ADDRESS.to_string(),
            collection_address: order.collection_address.clone(),
            token_id: order.token_id.clone(),
            price: order.price.clone(),
            ..self.activity(log, event_time)?
        };
        if let Err(err) = activities::insert_ignore_conflicts(&mut ex, &self.tables, &activity).await
        {
            tracing::warn!(?err, order_id, "failed to insert activity");
        }

        if let Err(err) = self
            .queue
            .push_trade(TradeEvent {
                order_id: order.order_id.clone(),
                collection_address: order.collection_address,
                token_id: order.token_id,
                event_type: TradeKind::Cancel,
                from: String::new(),
                to: String::new(),
            })
            .await
        {
            tracing::error!(?err, order_id, "failed to enqueue cancel event");
        }
        Ok(())
    }

    async fn on_match(&self, event: LogMatch, log: &EventLog) -> Result<()> {
        let roles = resolve_roles(&event);
        let buyer = roles.buyer.to_string();
        let seller = roles.seller.to_string();
        let collection = roles.collection.to_string();
        let token_id = roles.token_id.to_string();

        let mut ex = self.pool.acquire().await?;
        orders::fill_sell_side(&mut ex, &self.tables, &roles.sell_order_id, &buyer)
            .await
            .context("failed to fill sell order")?;

        match orders::fetch(&mut ex, &self.tables, &roles.buy_order_id).await {
            Ok(Some(buy_order)) => {
                let updated = if buy_order.quantity_remaining > 1 {
                    orders::set_remaining(
                        &mut ex,
                        &self.tables,
                        &roles.buy_order_id,
                        buy_order.quantity_remaining - 1,
                    )
                    .await
                } else {
                    orders::fill_buy_side(&mut ex, &self.tables, &roles.buy_order_id).await
                };
                if let Err(err) = updated {
                    tracing::error!(
                        ?err,
                        order_id = roles.buy_order_id,
                        "failed to update buy order"
                    );
                }
            }
            // The buyer matched directly on chain without a standing order.
            Ok(None) => tracing::info!(
                order_id = roles.buy_order_id,
                "buy order not on platform, skipping buyer-side update"
            ),
            Err(err) => tracing::warn!(
                ?err,
                order_id = roles.buy_order_id,
                "failed to read buy order, treating buyer as off-platform"
            ),
        }

        let event_time = self
            .client
            .block_time(log.block_number)
            .await
            .context("failed to get block time")?;
        let activity = Activity {
            activity_type: ActivityKind::Sale,
            maker: event.makeOrder.maker.to_string(),
            taker: event.takeOrder.maker.to_string(),
            collection_address: collection.clone(),
            token_id: token_id.clone(),
            price: BigDecimal::from(event.fillPrice),
            ..self.activity(log, event_time)?
        };
        if let Err(err) = activities::insert_ignore_conflicts(&mut ex, &self.tables, &activity).await
        {
            tracing::warn!(?err, tx_hash = %log.tx_hash, "failed to insert sale activity");
        }

        if let Err(err) = items::update_owner(
            &mut ex,
            &self.tables,
            &collection.to_lowercase(),
            &token_id,
            &buyer.to_lowercase(),
        )
        .await
        {
            tracing::error!(?err, collection, token_id, "failed to update item owner");
        }

        if let Err(err) = self
            .queue
            .push_trade(TradeEvent {
                order_id: roles.sell_order_id.clone(),
                collection_address: collection,
                token_id,
                event_type: TradeKind::Buy,
                from: seller,
                to: buyer,
            })
            .await
        {
            tracing::error!(
                ?err,
                order_id = roles.sell_order_id,
                "failed to enqueue buy event"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<Q: EventQueue> EventSink for OrderbookProjector<Q> {
    async fn on_log(&self, log: &EventLog) -> Result<()> {
        match events::decode(log)? {
            Some(DexEvent::Make(event)) => self.on_make(event, log).await,
            Some(DexEvent::Cancel(event)) => self.on_cancel(event, log).await,
            Some(DexEvent::Match(event)) => self.on_match(event, log).await,
            // Token events belong to the balance scanner.
            Some(_) | None => Ok(()),
        }
    }
}
