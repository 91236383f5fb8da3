//! Merge logs for the replicated collections.
//!
//! Every collection is a grow-only log keyed by a string. Inserting an
//! entry whose key is already present is a duplicate and leaves the log
//! untouched, so the first accepted write for a key wins. Insertion order
//! is preserved and never rewritten.
//!
//! | collection   | key                        | same-key rule          |
//! |--------------|----------------------------|------------------------|
//! | messages     | message id                 | duplicate, rejected    |
//! | channels     | channel address            | first write wins       |
//! | certificates | certificate fingerprint    | all variants kept      |
//! | files        | content id                 | first write wins       |
//! | dm directory | public key / payload hash  | first write wins       |
//!
//! Certificates key on the fingerprint of the whole certificate, so two
//! different certificates for the same username coexist; which of them
//! counts is decided at read time by [`MembershipRegistry`].
//!
//! [`MembershipRegistry`]: crate::MembershipRegistry

use std::collections::HashMap;

use hearth_shared::{ChannelMessage, FileMetadata, PublicChannel};

use crate::models::{file_key, Conversation, DirectMessage, DmUser, StoredCertificate};

pub trait LogEntry: Clone {
    fn log_key(&self) -> String;
}

impl LogEntry for ChannelMessage {
    fn log_key(&self) -> String {
        self.id.clone()
    }
}

impl LogEntry for PublicChannel {
    fn log_key(&self) -> String {
        self.address.as_str().to_string()
    }
}

impl LogEntry for StoredCertificate {
    fn log_key(&self) -> String {
        self.fingerprint.clone()
    }
}

impl LogEntry for FileMetadata {
    fn log_key(&self) -> String {
        file_key(&self.cid)
    }
}

impl LogEntry for DmUser {
    fn log_key(&self) -> String {
        self.public_key.clone()
    }
}

impl LogEntry for Conversation {
    fn log_key(&self) -> String {
        self.public_key.clone()
    }
}

impl LogEntry for DirectMessage {
    fn log_key(&self) -> String {
        format!("{}/{}", self.conversation, self.digest())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct GrowOnlyLog<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for GrowOnlyLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: LogEntry> GrowOnlyLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from entries in their original order.
    pub fn from_entries(entries: impl IntoIterator<Item = T>) -> Self {
        let mut log = Self::new();
        for entry in entries {
            log.insert(entry);
        }
        log
    }

    pub fn insert(&mut self, entry: T) -> Merge {
        let key = entry.log_key();
        if self.index.contains_key(&key) {
            return Merge::Duplicate;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        Merge::Inserted
    }

    /// Merge every entry of `other` into `self`; returns how many were new.
    pub fn merge_from(&mut self, other: &GrowOnlyLog<T>) -> usize {
        other
            .iter()
            .filter(|entry| self.insert((*entry).clone()) == Merge::Inserted)
            .count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    /// In-place access for the few permitted post-acceptance updates.
    /// The key of the entry must not change.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        match self.index.get(key) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Keys from `known` that this log does not hold, in `known` order.
    pub fn missing<'a>(&self, known: &'a [String]) -> Vec<&'a String> {
        let mut seen = std::collections::HashSet::new();
        known
            .iter()
            .filter(|k| !self.contains(k) && seen.insert(*k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shared::identity::Identity;
    use hearth_shared::message::MessageType;
    use hearth_shared::types::{ChannelAddress, Timestamp};
    use std::collections::BTreeSet;

    fn message(identity: &Identity, text: &str) -> ChannelMessage {
        ChannelMessage::new_signed(
            identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            text.into(),
            None,
        )
    }

    fn key_set<T: LogEntry>(log: &GrowOnlyLog<T>) -> BTreeSet<String> {
        log.keys().map(str::to_string).collect()
    }

    #[test]
    fn test_duplicate_id_is_not_overwritten() {
        let identity = Identity::generate();
        let original = message(&identity, "first");
        let mut forged = message(&identity, "second");
        forged.id = original.id.clone();

        let mut log = GrowOnlyLog::new();
        assert_eq!(log.insert(original.clone()), Merge::Inserted);
        assert_eq!(log.insert(forged), Merge::Duplicate);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(&original.id), Some(&original));
    }

    #[test]
    fn test_merge_converges_regardless_of_order() {
        let identity = Identity::generate();
        let shared = message(&identity, "shared");
        let a_only = message(&identity, "a");
        let b_only = message(&identity, "b");

        let mut a = GrowOnlyLog::from_entries([shared.clone(), a_only]);
        let mut b = GrowOnlyLog::from_entries([b_only, shared]);
        let a_before = a.clone();

        assert_eq!(a.merge_from(&b), 1);
        assert_eq!(b.merge_from(&a_before), 1);
        assert_eq!(key_set(&a), key_set(&b));
        assert_eq!(a.len(), 3);

        // Merging again changes nothing.
        assert_eq!(a.merge_from(&b), 0);
    }

    #[test]
    fn test_merge_preserves_existing_order() {
        let identity = Identity::generate();
        let first = message(&identity, "1");
        let second = message(&identity, "2");
        let mut log = GrowOnlyLog::from_entries([first.clone()]);
        log.merge_from(&GrowOnlyLog::from_entries([second.clone(), first.clone()]));
        let ids: Vec<_> = log.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_channel_first_write_wins() {
        let original = PublicChannel::new("general", "first", "owner", Timestamp::from_secs(1));
        let mut rewrite = original.clone();
        rewrite.description = "second".into();

        let mut log = GrowOnlyLog::new();
        log.insert(original.clone());
        assert_eq!(log.insert(rewrite), Merge::Duplicate);
        assert_eq!(log.get(original.address.as_str()).unwrap().description, "first");
    }

    #[test]
    fn test_missing_keys() {
        let identity = Identity::generate();
        let known = message(&identity, "known");
        let log = GrowOnlyLog::from_entries([known.clone()]);
        let advertised = vec![known.id, "x".to_string(), "y".to_string(), "x".to_string()];
        assert_eq!(log.missing(&advertised), vec!["x", "y"]);
    }
}
