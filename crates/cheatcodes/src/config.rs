use crate::Result;
use alloy_primitives::{Address, U256};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use sandbox_evm_core::{
    backend::Backend,
    constants::DEFAULT_PERSISTENT_ACCOUNTS,
    fork::ForkSources,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};

/// Additional, configurable context the `Cheatcodes` inspector has access to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheatsConfig {
    /// Optional seed for the RNG backing arbitrary storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<U256>,
    /// Address labels.
    pub labels: HashMap<Address, String>,
    /// Fork source aliases, `alias => url`.
    pub fork_aliases: HashMap<String, String>,
    /// Chain id reported in recorded accesses and delegations.
    pub chain_id: u64,
    /// Whether the cheatcode address, the CREATE2 deployer and the default caller start out
    /// persistent.
    pub persistent_defaults: bool,
}

impl Default for CheatsConfig {
    fn default() -> Self {
        Self {
            seed: None,
            labels: HashMap::new(),
            fork_aliases: HashMap::new(),
            chain_id: 31337,
            persistent_defaults: true,
        }
    }
}

impl CheatsConfig {
    /// The table of the configuration file the settings are read from.
    pub const PROFILE: &'static str = "sandbox";

    /// Prefix of the environment variables overriding file settings.
    pub const ENV_PREFIX: &'static str = "SANDBOX_";

    /// Returns the default figment: defaults, then the `[sandbox]` table of `file` if it
    /// exists, then `SANDBOX_*` environment variables.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file).nested());
        }
        figment.merge(Env::prefixed(Self::ENV_PREFIX).global()).select(Self::PROFILE)
    }

    /// Loads the configuration from the default sources.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(Self::figment(file))
    }

    /// Extracts the configuration from `figment`.
    pub fn load_with(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|err| fmt_err!("failed to extract sandbox config: {err}"))?;
        trace!(target: "cheatcodes", ?config, "loaded config");
        Ok(config)
    }

    /// Creates a backend over `sources` set up with these settings.
    pub fn backend(&self, mut sources: ForkSources) -> Backend {
        for (alias, url) in &self.fork_aliases {
            sources.alias(alias.clone(), url.clone());
        }
        let mut backend = Backend::new(sources, self.seed);
        if !self.persistent_defaults {
            for account in DEFAULT_PERSISTENT_ACCOUNTS {
                backend.remove_persistent_account(&account);
            }
        }
        backend
    }
}
