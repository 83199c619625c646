use cadenza_xform_core::Value;

use super::report::FactSnapshot;
use super::{Lifetime, Token};
use crate::medialib::{EntryId, SERVER_SOURCE};

#[derive(Debug, Clone)]
pub(super) struct TokenNode {
    pub(super) token: Token,
    /// Last token issued when the node was appended. Equals `token` for
    /// versioned facts; origin facts use it to place themselves in time.
    pub(super) stamp: Token,
    pub(super) order: u8,
    pub(super) source: String,
    pub(super) key: String,
    pub(super) value: Value,
    pub(super) lifetime: Lifetime,
}

impl TokenNode {
    fn visible_to(&self, token: Token, order: u8, source: &str) -> bool {
        match self.lifetime {
            Lifetime::Origin => {
                self.source == source || self.source == SERVER_SOURCE || source == SERVER_SOURCE
            },
            Lifetime::Persistent | Lifetime::Volatile => self.token <= token && self.order <= order,
        }
    }
}

/// Append-only fact log, oldest first.
///
/// `reacted` and `persisted` count the prefix of `nodes` already handled by
/// `react` and already written to the media library.
#[derive(Debug, Default)]
pub(super) struct TokenLog {
    pub(super) nodes: Vec<TokenNode>,
    pub(super) last_token: Token,
    pub(super) reacted: usize,
    pub(super) persisted: usize,
    pub(super) entry: Option<EntryId>,
}

impl TokenLog {
    pub(super) fn clear(&mut self) {
        *self = Self::default();
    }

    pub(super) fn append(
        &mut self,
        order: u8,
        source: &str,
        key: &str,
        value: Value,
        lifetime: Lifetime,
    ) -> Token {
        let token = match lifetime {
            Lifetime::Origin => Token::ORIGIN,
            Lifetime::Persistent | Lifetime::Volatile => {
                self.last_token = self.last_token.next();
                self.last_token
            },
        };
        self.nodes.push(TokenNode {
            token,
            stamp: self.last_token,
            order,
            source: source.to_string(),
            key: key.to_string(),
            value,
            lifetime,
        });
        token
    }

    /// Newest visible fact for `key`.
    pub(super) fn find(&self, token: Token, order: u8, source: &str, key: &str) -> Option<&Value> {
        self.nodes
            .iter()
            .rev()
            .filter(|node| node.visible_to(token, order, source))
            .find(|node| node.key == key)
            .map(|node| &node.value)
    }

    /// End of the prefix whose facts were issued at or before `token`.
    pub(super) fn horizon(&self, token: Token) -> usize {
        self.nodes
            .partition_point(|node| node.stamp <= token)
            .max(self.reacted)
    }

    /// Newest-first snapshot of `nodes[from..to]`.
    pub(super) fn collect(&self, from: usize, to: usize, persistent_only: bool) -> FactSnapshot {
        let mut snapshot = FactSnapshot::default();
        let Some(range) = self.nodes.get(from..to) else {
            return snapshot;
        };
        for node in range.iter().rev() {
            if persistent_only && node.lifetime != Lifetime::Persistent {
                continue;
            }
            snapshot.add_if_missing(&node.key, &node.source, &node.value);
        }
        snapshot
    }
}
