//! Forked environments: identifiers, the provider registry and the shared remote cache.

use crate::{
    backend::{BackendError, BackendResult},
    env::ChainClock,
};
use alloy_primitives::map::HashMap;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

mod cache;
pub use cache::{ForkCache, RemoteState, SharedForkCache};

mod provider;
pub use provider::{MemoryProvider, StateProvider};

/// Represents a _fork_ of a remote chain whose data is available only via the `url` endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateFork {
    /// The URL or alias of a registered source.
    pub url: String,
    /// The block to pin, or the latest block if `None`.
    pub block: Option<u64>,
}

impl CreateFork {
    pub fn new(url: impl Into<String>, block: Option<u64>) -> Self {
        Self { url: url.into(), block }
    }
}

/// Unique identifier of a remote state: `<url>@<block>`.
///
/// Two environments with the same `ForkId` share one [`ForkCache`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForkId(pub String);

impl ForkId {
    /// Returns the identifier of `url` pinned at `block`.
    pub fn new(url: &str, block: u64) -> Self {
        Self(format!("{url}@{block}"))
    }

    /// Returns the URL part of the identifier.
    pub fn url(&self) -> &str {
        self.0.rsplit_once('@').map_or(self.0.as_str(), |(url, _)| url)
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry of the chains environments can be forked from.
///
/// A source is addressed by its URL or by an alias of it. Remote caches are handed out per
/// [`ForkId`], so every environment pinned to the same block of the same source reads through
/// the same cache.
#[derive(Clone, Debug, Default)]
pub struct ForkSources {
    providers: HashMap<String, Arc<dyn StateProvider>>,
    aliases: HashMap<String, String>,
    caches: HashMap<ForkId, SharedForkCache>,
}

impl ForkSources {
    /// Registers `provider` under `url`.
    pub fn register(
        &mut self,
        url: impl Into<String>,
        provider: impl StateProvider + 'static,
    ) -> &mut Self {
        self.providers.insert(url.into(), Arc::new(provider));
        self
    }

    /// Makes `alias` resolve to `url`.
    pub fn alias(&mut self, alias: impl Into<String>, url: impl Into<String>) -> &mut Self {
        self.aliases.insert(alias.into(), url.into());
        self
    }

    /// Resolves a URL or alias to the registered URL.
    pub fn resolve<'a>(&'a self, descriptor: &'a str) -> Option<&'a str> {
        if self.providers.contains_key(descriptor) {
            return Some(descriptor);
        }
        self.aliases
            .get(descriptor)
            .map(String::as_str)
            .filter(|url| self.providers.contains_key(*url))
    }

    /// Pins the source of `fork` at its block and returns the remote half of the new
    /// environment together with the block values it starts with.
    pub fn create_fork(&mut self, fork: &CreateFork) -> BackendResult<(RemoteState, ChainClock)> {
        let url = self
            .resolve(&fork.url)
            .ok_or_else(|| BackendError::UnknownSource(fork.url.clone()))?
            .to_string();
        let provider = self.providers[&url].clone();
        let block = match fork.block {
            Some(block) => block,
            None => provider.latest_block().wrap_err("failed to get latest block number")?,
        };
        self.pin(&url, provider, block)
    }

    /// Pins the source behind an existing fork at another block.
    pub fn roll_fork(&mut self, fork_id: &ForkId, block: u64) -> BackendResult<(RemoteState, ChainClock)> {
        let url = fork_id.url();
        let provider = self
            .providers
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::UnknownSource(url.to_string()))?;
        self.pin(url, provider, block)
    }

    fn pin(
        &mut self,
        url: &str,
        provider: Arc<dyn StateProvider>,
        block: u64,
    ) -> BackendResult<(RemoteState, ChainClock)> {
        let clock = provider
            .block_clock(block)
            .wrap_err_with(|| format!("failed to get block {block} of {url}"))?;
        let fork_id = ForkId::new(url, block);
        let cache = self.caches.entry(fork_id.clone()).or_default().clone();
        debug!(target: "backend::fork", %fork_id, "pinned fork");
        Ok((RemoteState::new(fork_id, block, provider, cache), clock))
    }

    /// Returns the number of distinct remote caches.
    pub fn caches(&self) -> usize {
        self.caches.len()
    }
}
