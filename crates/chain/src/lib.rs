use thiserror::Error;

/// Represents each chain the indexer can be deployed against.
///
/// The enum variant doubles as the table-name suffix used by the database
/// crate, so renaming a variant is a schema migration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Chain {
    Eth,
    Optimism,
    Arbitrum,
    Base,
    ZksyncEra,
    Starknet,
    Sepolia,
    Basepolia,
}

impl Chain {
    /// Returns the chain's chain ID.
    pub fn id(&self) -> u64 {
        match self {
            Self::Eth => 1,
            Self::Optimism => 10,
            Self::Arbitrum => 42161,
            Self::Base => 8453,
            Self::ZksyncEra => 324,
            Self::Starknet => 0,
            Self::Sepolia => 11155111,
            Self::Basepolia => 84532,
        }
    }

    /// The canonical short name. Also the suffix of every per-chain table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eth => "eth",
            Self::Optimism => "optimism",
            Self::Arbitrum => "arbitrum",
            Self::Base => "base",
            Self::ZksyncEra => "zksync-era",
            Self::Starknet => "starknet",
            Self::Sepolia => "sepolia",
            Self::Basepolia => "basepolia",
        }
    }

    /// Number of blocks below the head that are still considered unstable.
    /// The scanner never indexes past `head - confirmation_lag()`.
    pub fn confirmation_lag(&self) -> u64 {
        match self {
            Self::Eth | Self::Starknet => 1,
            Self::Optimism | Self::Arbitrum | Self::Base | Self::ZksyncEra => 2,
            Self::Sepolia | Self::Basepolia => 6,
        }
    }

}

impl std::str::FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth" => Ok(Self::Eth),
            "optimism" => Ok(Self::Optimism),
            "arbitrum" => Ok(Self::Arbitrum),
            "base" => Ok(Self::Base),
            "zksync-era" => Ok(Self::ZksyncEra),
            "starknet" => Ok(Self::Starknet),
            "sepolia" => Ok(Self::Sepolia),
            "basepolia" => Ok(Self::Basepolia),
            other => Err(Error::UnsupportedChain(other.to_string())),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names() {
        for chain in [
            Chain::Eth,
            Chain::Optimism,
            Chain::Arbitrum,
            Chain::Base,
            Chain::ZksyncEra,
            Chain::Starknet,
            Chain::Sepolia,
            Chain::Basepolia,
        ] {
            assert_eq!(chain.name().parse::<Chain>().unwrap(), chain);
        }
        assert!("goerli".parse::<Chain>().is_err());
    }

    #[test]
    fn confirmation_lags() {
        assert_eq!(Chain::Eth.confirmation_lag(), 1);
        assert_eq!(Chain::Optimism.confirmation_lag(), 2);
        assert_eq!(Chain::Arbitrum.confirmation_lag(), 2);
        assert_eq!(Chain::Base.confirmation_lag(), 2);
        assert_eq!(Chain::ZksyncEra.confirmation_lag(), 2);
        assert_eq!(Chain::Starknet.confirmation_lag(), 1);
        assert_eq!(Chain::Sepolia.confirmation_lag(), 6);
        assert_eq!(Chain::Basepolia.confirmation_lag(), 6);
    }
}
