//! Shared node state: both the server and the sync client hold a read-only
//! `Arc<NodeState>` wrapping the local account, mirroring the teacher's
//! `AppState` but owning an account instead of a bare config.

use std::sync::Arc;

use mau_core::Account;

use crate::config::NodeConfig;

pub struct NodeState {
    account: Account,
    config: NodeConfig,
}

impl NodeState {
    pub fn new(account: Account, config: NodeConfig) -> Arc<Self> {
        Arc::new(Self { account, config })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
