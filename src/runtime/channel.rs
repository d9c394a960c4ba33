//! Bidirectional socket pairing.
//!
//! Every relayed socket maps to exactly one peer. Entries are always
//! inserted and removed two at a time so that the event loop never sees
//! a one-directional mapping between iterations.

use mio::Token;
use std::collections::HashMap;
use tracing::warn;

/// Peer lookup table for live connection pairs.
#[derive(Debug, Default)]
pub(crate) struct ChannelTable {
    peers: HashMap<Token, Token>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `a` and `b` to each other.
    pub fn pair(&mut self, a: Token, b: Token) {
        self.peers.insert(a, b);
        self.peers.insert(b, a);
    }

    /// The socket paired with `token`, if any.
    pub fn peer(&self, token: Token) -> Option<Token> {
        self.peers.get(&token).copied()
    }

    /// Remove both directions of `token`'s pair.
    ///
    /// Returns the peer that was removed. Unknown tokens are a no-op, and a
    /// dangling reverse entry is cleaned up rather than left behind.
    pub fn unpair(&mut self, token: Token) -> Option<Token> {
        match self.peers.remove(&token) {
            Some(peer) => {
                if self.peers.get(&peer) == Some(&token) {
                    self.peers.remove(&peer);
                } else {
                    warn!(
                        token = token.0,
                        peer = peer.0,
                        "Channel table missing reverse entry"
                    );
                }
                Some(peer)
            }
            None => {
                let before = self.peers.len();
                self.peers.retain(|_, p| *p != token);
                if self.peers.len() != before {
                    warn!(token = token.0, "Removed dangling channel entry");
                }
                None
            }
        }
    }

    /// Check if `token` is part of a pair.
    #[cfg(test)]
    pub fn contains(&self, token: Token) -> bool {
        self.peers.contains_key(&token)
    }

    /// Number of mapping entries (two per pair).
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if there are no pairs.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of live pairs.
    pub fn pairs(&self) -> usize {
        self.peers.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_symmetric() {
        let mut table = ChannelTable::new();
        table.pair(Token(1), Token(2));

        assert_eq!(table.peer(Token(1)), Some(Token(2)));
        assert_eq!(table.peer(Token(2)), Some(Token(1)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.pairs(), 1);
    }

    #[test]
    fn test_unpair_removes_both_directions() {
        let mut table = ChannelTable::new();
        table.pair(Token(1), Token(2));
        table.pair(Token(3), Token(4));

        assert_eq!(table.unpair(Token(2)), Some(Token(1)));
        assert!(!table.contains(Token(1)));
        assert!(!table.contains(Token(2)));
        assert_eq!(table.peer(Token(3)), Some(Token(4)));
        assert_eq!(table.pairs(), 1);
    }

    #[test]
    fn test_unpair_twice_is_noop() {
        let mut table = ChannelTable::new();
        table.pair(Token(1), Token(2));

        assert_eq!(table.unpair(Token(1)), Some(Token(2)));
        assert_eq!(table.unpair(Token(1)), None);
        assert_eq!(table.unpair(Token(2)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unpair_cleans_dangling_entry() {
        let mut table = ChannelTable::new();
        table.peers.insert(Token(5), Token(6));

        // 6 has no forward entry, but the stale 5 -> 6 must go
        assert_eq!(table.unpair(Token(6)), None);
        assert!(table.is_empty());

        table.peers.insert(Token(7), Token(8));
        assert_eq!(table.unpair(Token(7)), Some(Token(8)));
        assert!(table.is_empty());
    }
}
