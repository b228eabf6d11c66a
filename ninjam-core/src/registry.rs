//! Remote users and their channels, as announced by the server.
//!
//! Users are keyed by full identity (`name@ip`) and kept in registration order; channels
//! are kept in index order. Each channel holds a queue of decoded intervals waiting
//! for the next interval boundary. `A` is the host's decoded-audio handle.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::protocol::ChannelUpdate;

/// Display name used when the server sends an empty channel name.
pub const UNNAMED_CHANNEL: &str = "No name";

#[derive(Debug)]
pub struct RemoteChannel<A> {
    pub name: String,
    /// Volume hint from the server (not applied by the engine).
    pub volume: i16,
    /// Pan hint from the server (not applied by the engine).
    pub pan: i8,
    ready: VecDeque<A>,
}

impl<A> RemoteChannel<A> {
    fn new(name: &str, volume: i16, pan: i8) -> Self {
        let mut channel = Self {
            name: String::new(),
            volume,
            pan,
            ready: VecDeque::new(),
        };
        channel.update(name, volume, pan);
        channel
    }

    fn update(&mut self, name: &str, volume: i16, pan: i8) {
        self.name = if name.is_empty() {
            UNNAMED_CHANNEL.to_string()
        } else {
            name.to_string()
        };
        self.volume = volume;
        self.pan = pan;
    }

    /// Number of decoded intervals waiting to play.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }
}

#[derive(Debug)]
pub struct RemoteUser<A> {
    /// Name part of the identity.
    pub name: String,
    /// Identity as sent by the server, `name@ip`.
    pub full_name: String,
    /// Address part of the identity; empty if the server sent none.
    pub ip: String,
    channels: BTreeMap<u8, RemoteChannel<A>>,
}

impl<A> RemoteUser<A> {
    fn new(full_name: &str) -> Self {
        let (name, ip) = full_name.split_once('@').unwrap_or((full_name, ""));
        Self {
            name: name.to_string(),
            full_name: full_name.to_string(),
            ip: ip.to_string(),
            channels: BTreeMap::new(),
        }
    }

    pub fn channel(&self, index: u8) -> Option<&RemoteChannel<A>> {
        self.channels.get(&index)
    }

    pub fn channels(&self) -> impl Iterator<Item = (u8, &RemoteChannel<A>)> {
        self.channels.iter().map(|(&i, c)| (i, c))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// What a userinfo record did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelChange {
    /// First time this (user, channel) was seen.
    Added { new_user: bool },
    Updated,
    Removed,
    /// Deactivation of a channel we did not know about.
    Unchanged,
}

/// One decoded interval to hand to the playback side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback<A> {
    pub user: String,
    pub channel_index: u8,
    pub audio: A,
}

#[derive(Debug)]
pub struct Registry<A> {
    users: Vec<RemoteUser<A>>,
    /// Full identity to position in `users`.
    index: HashMap<String, usize>,
}

impl<A> Default for Registry<A> {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<A> Registry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, full_name: &str) -> Option<&RemoteUser<A>> {
        self.index.get(full_name).map(|&i| &self.users[i])
    }

    fn user_mut(&mut self, full_name: &str) -> Option<&mut RemoteUser<A>> {
        let i = *self.index.get(full_name)?;
        self.users.get_mut(i)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.index.contains_key(full_name)
    }

    pub fn users(&self) -> impl Iterator<Item = &RemoteUser<A>> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Add a user with no channels. Returns false if already known (left untouched).
    pub fn join(&mut self, full_name: &str) -> bool {
        if self.contains(full_name) {
            return false;
        }
        self.index.insert(full_name.to_string(), self.users.len());
        self.users.push(RemoteUser::new(full_name));
        true
    }

    /// Remove a user and everything queued on its channels.
    pub fn part(&mut self, full_name: &str) -> Option<RemoteUser<A>> {
        let pos = self.index.remove(full_name)?;
        let user = self.users.remove(pos);
        for later in &self.users[pos..] {
            if let Some(i) = self.index.get_mut(&later.full_name) {
                *i -= 1;
            }
        }
        Some(user)
    }

    /// Apply one userinfo record. Deactivating removes the channel but keeps the user.
    pub fn apply(&mut self, update: &ChannelUpdate) -> ChannelChange {
        if !update.active {
            let removed = self
                .user_mut(&update.username)
                .and_then(|u| u.channels.remove(&update.channel_index))
                .is_some();
            return if removed {
                ChannelChange::Removed
            } else {
                ChannelChange::Unchanged
            };
        }

        let new_user = self.join(&update.username);
        let Some(user) = self.user_mut(&update.username) else {
            return ChannelChange::Unchanged;
        };
        match user.channels.get_mut(&update.channel_index) {
            Some(channel) => {
                channel.update(&update.channel_name, update.volume, update.pan);
                ChannelChange::Updated
            }
            None => {
                user.channels.insert(
                    update.channel_index,
                    RemoteChannel::new(&update.channel_name, update.volume, update.pan),
                );
                ChannelChange::Added { new_user }
            }
        }
    }

    /// Queue decoded audio on a channel. Returns the audio back if the user or channel is gone.
    pub fn enqueue_ready(&mut self, full_name: &str, channel_index: u8, audio: A) -> Result<(), A> {
        match self
            .user_mut(full_name)
            .and_then(|u| u.channels.get_mut(&channel_index))
        {
            Some(channel) => {
                channel.ready.push_back(audio);
                Ok(())
            }
            None => Err(audio),
        }
    }

    /// Pop the next ready interval of every channel, users in registration order and
    /// channels in index order.
    pub fn take_next_interval(&mut self) -> Vec<Playback<A>> {
        let mut out = Vec::new();
        for user in &mut self.users {
            for (&channel_index, channel) in &mut user.channels {
                if let Some(audio) = channel.ready.pop_front() {
                    out.push(Playback {
                        user: user.full_name.clone(),
                        channel_index,
                        audio,
                    });
                }
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(active: bool, user: &str, index: u8, name: &str) -> ChannelUpdate {
        ChannelUpdate {
            active,
            channel_index: index,
            volume: 0,
            pan: 0,
            flags: 0,
            username: user.to_string(),
            channel_name: name.to_string(),
        }
    }

    #[test]
    fn identity_is_split_on_at() {
        let mut r: Registry<u32> = Registry::new();
        r.join("alice@10.0.0.x");
        r.join("bob");
        let alice = r.user("alice@10.0.0.x").unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.ip, "10.0.0.x");
        assert_eq!(r.user("bob").unwrap().ip, "");
    }

    #[test]
    fn activation_creates_then_updates() {
        let mut r: Registry<u32> = Registry::new();
        assert_eq!(
            r.apply(&update(true, "alice@x", 0, "gtr")),
            ChannelChange::Added { new_user: true }
        );
        assert_eq!(
            r.apply(&update(true, "alice@x", 1, "")),
            ChannelChange::Added { new_user: false }
        );
        r.enqueue_ready("alice@x", 0, 7).unwrap();
        let mut renamed = update(true, "alice@x", 0, "bass");
        renamed.volume = -6;
        assert_eq!(r.apply(&renamed), ChannelChange::Updated);

        let alice = r.user("alice@x").unwrap();
        let ch0 = alice.channel(0).unwrap();
        assert_eq!(ch0.name, "bass");
        assert_eq!(ch0.volume, -6);
        // Queue survives an update.
        assert_eq!(ch0.ready_len(), 1);
        assert_eq!(alice.channel(1).unwrap().name, UNNAMED_CHANNEL);
    }

    #[test]
    fn deactivation_removes_channel_keeps_user() {
        let mut r: Registry<u32> = Registry::new();
        r.apply(&update(true, "alice@x", 0, "gtr"));
        assert_eq!(
            r.apply(&update(false, "alice@x", 0, "")),
            ChannelChange::Removed
        );
        let alice = r.user("alice@x").unwrap();
        assert_eq!(alice.channel_count(), 0);
    }

    #[test]
    fn deactivating_unknown_channel_is_noop() {
        let mut r: Registry<u32> = Registry::new();
        assert_eq!(
            r.apply(&update(false, "ghost@x", 2, "")),
            ChannelChange::Unchanged
        );
        assert!(r.is_empty());
        r.join("alice@x");
        assert_eq!(
            r.apply(&update(false, "alice@x", 2, "")),
            ChannelChange::Unchanged
        );
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn enqueue_for_departed_user_returns_audio() {
        let mut r: Registry<u32> = Registry::new();
        r.apply(&update(true, "alice@x", 0, "gtr"));
        assert!(r.part("alice@x").is_some());
        assert_eq!(r.enqueue_ready("alice@x", 0, 9), Err(9));
        assert_eq!(r.enqueue_ready("nobody", 0, 9), Err(9));
    }

    #[test]
    fn next_interval_pops_one_per_channel_in_order() {
        let mut r: Registry<&str> = Registry::new();
        r.apply(&update(true, "bob@y", 0, "drums"));
        r.apply(&update(true, "alice@x", 1, "keys"));
        r.apply(&update(true, "alice@x", 0, "gtr"));
        r.enqueue_ready("alice@x", 1, "a1-first").unwrap();
        r.enqueue_ready("alice@x", 1, "a1-second").unwrap();
        r.enqueue_ready("alice@x", 0, "a0").unwrap();
        r.enqueue_ready("bob@y", 0, "b0").unwrap();

        let first: Vec<_> = r.take_next_interval().into_iter().map(|p| p.audio).collect();
        assert_eq!(first, vec!["b0", "a0", "a1-first"]);
        let second = r.take_next_interval();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].user, "alice@x");
        assert_eq!(second[0].channel_index, 1);
        assert!(r.take_next_interval().is_empty());
    }

    #[test]
    fn lookups_survive_part_from_the_middle() {
        let mut r: Registry<u32> = Registry::new();
        for name in ["a@x", "b@x", "c@x", "d@x"] {
            r.apply(&update(true, name, 0, name));
        }
        assert!(r.part("b@x").is_some());
        assert!(r.part("b@x").is_none());
        for name in ["a@x", "c@x", "d@x"] {
            assert_eq!(r.user(name).unwrap().full_name, name);
            r.enqueue_ready(name, 0, 1).unwrap();
        }
        let order: Vec<_> = r.users().map(|u| u.full_name.as_str()).collect();
        assert_eq!(order, vec!["a@x", "c@x", "d@x"]);

        // Rejoining goes to the end of registration order.
        r.join("b@x");
        assert_eq!(r.users().last().unwrap().full_name, "b@x");
        assert_eq!(r.user("d@x").unwrap().channel(0).unwrap().ready_len(), 1);
        r.clear();
        assert!(!r.contains("a@x"));
    }

    #[test]
    fn join_does_not_clobber_existing_user() {
        let mut r: Registry<u32> = Registry::new();
        r.apply(&update(true, "alice@x", 0, "gtr"));
        assert!(!r.join("alice@x"));
        assert_eq!(r.user("alice@x").unwrap().channel_count(), 1);
    }
}
