//! The exchange contract's event surface.
//!
//! The `sol!` declarations below reproduce the deployed contract's events;
//! enums appear as `uint8` so the computed selectors match the on-chain
//! topics. Everything else the contract emits (pause/ownership admin events)
//! is irrelevant to projection and falls through as `None`.

use {
    crate::node::EventLog,
    alloy_sol_types::{SolEvent, sol},
    anyhow::{Context, Result},
};

sol! {
    #[derive(Debug, PartialEq)]
    struct Asset {
        uint256 tokenId;
        address collection;
        uint96 amount;
    }

    #[derive(Debug, PartialEq)]
    struct OrderData {
        uint8 side;
        uint8 saleKind;
        address maker;
        Asset nft;
        uint128 price;
        uint64 expiry;
        uint64 salt;
    }

    #[derive(Debug, PartialEq)]
    event LogMake(
        bytes32 orderKey,
        uint8 indexed side,
        uint8 indexed saleKind,
        address indexed maker,
        Asset nft,
        uint128 price,
        uint64 expiry,
        uint64 salt
    );

    #[derive(Debug, PartialEq)]
    event LogCancel(bytes32 indexed orderKey, address indexed maker);

    #[derive(Debug, PartialEq)]
    event LogMatch(
        bytes32 indexed makeOrderKey,
        bytes32 indexed takeOrderKey,
        OrderData makeOrder,
        OrderData takeOrder,
        uint128 fillPrice
    );

    #[derive(Debug, PartialEq)]
    event TokensMinted(address indexed to, uint256 amount, address indexed by);

    #[derive(Debug, PartialEq)]
    event TokensBurned(address indexed from, uint256 amount, address indexed by);

    #[derive(Debug, PartialEq)]
    event TokensTransferred(address indexed from, address indexed to, uint256 amount);
}

/// `LibOrder.Side`
pub const SIDE_LIST: u8 = 0;
pub const SIDE_BID: u8 = 1;

/// `LibOrder.SaleKind`
pub const SALE_KIND_FIX_FOR_COLLECTION: u8 = 0;
pub const SALE_KIND_FIX_FOR_ITEM: u8 = 1;

#[derive(Debug)]
pub enum DexEvent {
    Make(LogMake),
    Cancel(LogCancel),
    Match(LogMatch),
    Minted(TokensMinted),
    Burned(TokensBurned),
    Transferred(TokensTransferred),
}

/// Decodes a raw log by its `topics[0]`. Unknown topics are not an error;
/// the contract emits administrative events nobody projects.
pub fn decode(log: &EventLog) -> Result<Option<DexEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let event = if *topic0 == LogMake::SIGNATURE_HASH {
        DexEvent::Make(decoded::<LogMake>(log)?)
    } else if *topic0 == LogCancel::SIGNATURE_HASH {
        DexEvent::Cancel(decoded::<LogCancel>(log)?)
    } else if *topic0 == LogMatch::SIGNATURE_HASH {
        DexEvent::Match(decoded::<LogMatch>(log)?)
    } else if *topic0 == TokensMinted::SIGNATURE_HASH {
        DexEvent::Minted(decoded::<TokensMinted>(log)?)
    } else if *topic0 == TokensBurned::SIGNATURE_HASH {
        DexEvent::Burned(decoded::<TokensBurned>(log)?)
    } else if *topic0 == TokensTransferred::SIGNATURE_HASH {
        DexEvent::Transferred(decoded::<TokensTransferred>(log)?)
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

fn decoded<E: SolEvent>(log: &EventLog) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data).with_context(|| {
        format!(
            "malformed {} log, data 0x{}",
            E::SIGNATURE,
            hex::encode(&log.data)
        )
    })
}
