//! Everything a pipeline stage needs, assembled once per process.

use crate::cleanup::{CleanupPolicy, Probabilistic};
use crate::config::HooksConfig;
use crate::error::HookResult;
use crate::mailbox::{FsMailbox, Mailbox};
use crate::matching::MatchStrategy;
use std::sync::Arc;

pub struct HookContext {
    pub mailbox: Arc<dyn Mailbox>,
    pub config: HooksConfig,
    pub match_strategy: Box<dyn MatchStrategy>,
    /// Consulted after every pre capture (routine TTL)
    pub pre_cleanup: Box<dyn CleanupPolicy>,
    /// Consulted after every post capture (aggressive TTL)
    pub post_cleanup: Box<dyn CleanupPolicy>,
}

impl HookContext {
    /// Context over the directory mailbox named by `config`.
    ///
    /// Fails only when the mailbox directory cannot be created.
    pub fn from_config(config: HooksConfig) -> HookResult<Self> {
        let mailbox = FsMailbox::open(config.mailbox_dir(), config.lock_timeout())?;
        Ok(Self::new(Arc::new(mailbox), config))
    }

    pub fn new(mailbox: Arc<dyn Mailbox>, config: HooksConfig) -> Self {
        Self {
            match_strategy: config.match_strategy.build(),
            pre_cleanup: Box::new(Probabilistic::new(config.pre_sweep_probability)),
            post_cleanup: Box::new(Probabilistic::new(config.post_sweep_probability)),
            mailbox,
            config,
        }
    }

    pub fn with_match_strategy(mut self, strategy: Box<dyn MatchStrategy>) -> Self {
        self.match_strategy = strategy;
        self
    }

    pub fn with_cleanup(
        mut self,
        pre: Box<dyn CleanupPolicy>,
        post: Box<dyn CleanupPolicy>,
    ) -> Self {
        self.pre_cleanup = pre;
        self.post_cleanup = post;
        self
    }

    pub fn mailbox(&self) -> &dyn Mailbox {
        self.mailbox.as_ref()
    }
}

impl std::fmt::Debug for HookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContext")
            .field("config", &self.config)
            .field("match_strategy", &self.match_strategy.name())
            .field("pre_cleanup", &self.pre_cleanup)
            .field("post_cleanup", &self.post_cleanup)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{MatchStrategyKind, UniqueOnly};
    use tempfile::TempDir;

    #[test]
    fn from_config_creates_mailbox_dir() {
        let dir = TempDir::new().unwrap();
        let config = HooksConfig {
            mailbox_dir: Some(dir.path().join("nested").join("mailbox")),
            ..Default::default()
        };
        let ctx = HookContext::from_config(config).unwrap();
        assert!(dir.path().join("nested").join("mailbox").is_dir());
        assert_eq!(ctx.match_strategy.name(), "most_recent");
    }

    #[test]
    fn strategy_follows_config_and_can_be_replaced() {
        let dir = TempDir::new().unwrap();
        let config = HooksConfig {
            mailbox_dir: Some(dir.path().to_path_buf()),
            match_strategy: MatchStrategyKind::OldestFirst,
            ..Default::default()
        };
        let ctx = HookContext::from_config(config).unwrap();
        assert_eq!(ctx.match_strategy.name(), "oldest_first");
        let ctx = ctx.with_match_strategy(Box::new(UniqueOnly));
        assert_eq!(ctx.match_strategy.name(), "unique_only");
    }
}
