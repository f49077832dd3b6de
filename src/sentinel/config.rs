use crate::core_types::{ChainFamily, ChainId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use super::error::SentinelError;

/// Per-chain configuration block (one entry of `chains:` in the app config)
#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    /// Operator-facing label, e.g. "solana-mainnet" or "base"
    pub name: String,
    pub family: ChainFamily,
    /// EIP-155 id, required for EVM chains
    #[serde(default)]
    pub evm_chain_id: Option<u64>,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub scanning: ScanningConfig,
    pub sweep: ChainSweepConfig,
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanningConfig {
    /// Defaults: 1 for Solana, 12 for EVM
    #[serde(default)]
    pub required_confirmations: Option<u64>,
    /// Defaults: 10s for Solana, 12s for EVM
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub address_concurrency: Option<usize>,
    /// Upper bound on the EVM block window scanned per tick
    #[serde(default)]
    pub max_blocks_per_tick: Option<u64>,
    /// How far behind the tip the very first tick starts when no cursor exists
    #[serde(default)]
    pub initial_lookback: Option<u64>,
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Max signatures fetched per Solana address per tick
    #[serde(default)]
    pub signature_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSweepConfig {
    pub treasury_address: String,
    /// Name of the env var holding the sponsor key (hex, or a JSON byte array for Solana)
    pub sponsor_key_env: String,
    /// Multiplier applied to the estimated EVM gas cost when funding a deposit wallet
    #[serde(default = "default_gas_buffer_multiplier")]
    pub gas_buffer_multiplier: Decimal,
    /// Sponsor balance (native units) below which an alert is emitted
    #[serde(default)]
    pub sponsor_min_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    pub symbol: String,
    /// Native gas asset (SOL, ETH); otherwise `contract` is required
    #[serde(default)]
    pub native: bool,
    /// SPL mint or ERC-20 contract address
    #[serde(default)]
    pub contract: Option<String>,
    pub decimals: u32,
    /// Confirmed deposits below this amount are never swept
    pub sweep_threshold: Decimal,
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_gas_buffer_multiplier() -> Decimal {
    Decimal::TWO
}

impl ChainConfig {
    pub fn chain_id(&self) -> Result<ChainId, SentinelError> {
        match self.family {
            ChainFamily::Solana => Ok(ChainId::Solana),
            ChainFamily::Evm => self.evm_chain_id.map(ChainId::Evm).ok_or_else(|| {
                SentinelError::Config(format!("{}: evm_chain_id is required", self.name))
            }),
        }
    }

    pub fn required_confirmations(&self) -> u64 {
        self.scanning
            .required_confirmations
            .unwrap_or(match self.family {
                ChainFamily::Solana => 1,
                ChainFamily::Evm => 12,
            })
    }

    pub fn poll_interval(&self) -> Duration {
        let secs = self.scanning.poll_interval_secs.unwrap_or(match self.family {
            ChainFamily::Solana => 10,
            ChainFamily::Evm => 12,
        });
        Duration::from_secs(secs)
    }

    pub fn address_concurrency(&self) -> usize {
        self.scanning.address_concurrency.unwrap_or(5).clamp(1, 10)
    }

    /// Defaults: 5000 slots for Solana (signature listing is the real bound), 100 EVM blocks
    pub fn max_blocks_per_tick(&self) -> u64 {
        let default = match self.family {
            ChainFamily::Solana => 5000,
            ChainFamily::Evm => 100,
        };
        self.scanning.max_blocks_per_tick.unwrap_or(default).max(1)
    }

    pub fn initial_lookback(&self) -> u64 {
        self.scanning.initial_lookback.unwrap_or(0)
    }

    pub fn signature_limit(&self) -> usize {
        self.scanning.signature_limit.unwrap_or(25)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    /// Native gas asset of this chain, if configured
    pub fn native_asset(&self) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.native)
    }

    /// Reject configurations that would only fail later at sweep time
    pub fn validate(&self) -> Result<(), SentinelError> {
        self.chain_id()?;
        if self.required_confirmations() == 0 {
            return Err(SentinelError::Config(format!(
                "{}: required_confirmations must be at least 1",
                self.name
            )));
        }
        if self.sweep.gas_buffer_multiplier < Decimal::ONE {
            return Err(SentinelError::Config(format!(
                "{}: gas_buffer_multiplier must be >= 1",
                self.name
            )));
        }
        if self.assets.is_empty() {
            return Err(SentinelError::Config(format!(
                "{}: no assets configured",
                self.name
            )));
        }
        for asset in &self.assets {
            if !asset.native && asset.contract.is_none() {
                return Err(SentinelError::Config(format!(
                    "{}/{}: non-native asset needs a contract",
                    self.name, asset.symbol
                )));
            }
            if asset.decimals > crate::money::MAX_DECIMALS {
                return Err(SentinelError::Config(format!(
                    "{}/{}: {} decimals not supported",
                    self.name, asset.symbol, asset.decimals
                )));
            }
            if asset.sweep_threshold.is_sign_negative()
                || asset.sweep_threshold.normalize().scale() > asset.decimals
            {
                return Err(SentinelError::Config(format!(
                    "{}/{}: invalid sweep_threshold {}",
                    self.name, asset.symbol, asset.sweep_threshold
                )));
            }
        }
        if self.assets.iter().filter(|a| a.native).count() > 1 {
            return Err(SentinelError::Config(format!(
                "{}: more than one native asset",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const BASE_YAML: &str = r#"
name: "base"
family: evm
evm_chain_id: 8453
rpc:
  url: "https://mainnet.base.org"
scanning:
  max_blocks_per_tick: 50
sweep:
  treasury_address: "0x1111111111111111111111111111111111111111"
  sponsor_key_env: "BASE_SPONSOR_KEY"
assets:
  - symbol: "USDC"
    contract: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
    decimals: 6
    sweep_threshold: "10"
  - symbol: "ETH"
    native: true
    decimals: 18
    sweep_threshold: "0.01"
"#;

    #[test]
    fn test_evm_chain_config_deserialize_with_defaults() {
        let config: ChainConfig = serde_yaml::from_str(BASE_YAML).unwrap();

        assert_eq!(config.chain_id().unwrap(), ChainId::Evm(8453));
        assert_eq!(config.required_confirmations(), 12);
        assert_eq!(config.poll_interval(), Duration::from_secs(12));
        assert_eq!(config.max_blocks_per_tick(), 50);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep.gas_buffer_multiplier, Decimal::TWO);
        assert_eq!(
            config.asset("USDC").unwrap().sweep_threshold,
            Decimal::from(10)
        );
        assert_eq!(config.native_asset().unwrap().symbol, "ETH");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_solana_defaults() {
        let yaml = r#"
name: "solana"
family: solana
rpc:
  url: "https://api.mainnet-beta.solana.com"
sweep:
  treasury_address: "11111111111111111111111111111111"
  sponsor_key_env: "SOLANA_SPONSOR_KEY"
assets:
  - symbol: "SOL"
    native: true
    decimals: 9
    sweep_threshold: "0.05"
"#;
        let config: ChainConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chain_id().unwrap(), ChainId::Solana);
        assert_eq!(config.required_confirmations(), 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.address_concurrency(), 5);
        assert_eq!(
            config.asset("SOL").unwrap().sweep_threshold,
            Decimal::from_str("0.05").unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_missing_evm_chain_id() {
        let mut config: ChainConfig = serde_yaml::from_str(BASE_YAML).unwrap();
        config.evm_chain_id = None;
        assert!(matches!(config.validate(), Err(SentinelError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_token_without_contract() {
        let mut config: ChainConfig = serde_yaml::from_str(BASE_YAML).unwrap();
        config.assets[0].contract = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_threshold_finer_than_decimals() {
        let mut config: ChainConfig = serde_yaml::from_str(BASE_YAML).unwrap();
        config.assets[0].sweep_threshold = Decimal::from_str("0.0000001").unwrap();
        assert!(config.validate().is_err());
    }
}
