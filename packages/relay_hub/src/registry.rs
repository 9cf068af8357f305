//! Connection Registry
//!
//! Index of live connections by owning user and by subscribed group. A single
//! read-write lock guards both maps; snapshots are cloned out so callers never
//! hold the lock across a send.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionState};

type Bucket = HashMap<ConnectionId, ConnectionHandle>;

#[derive(Default)]
struct Indices {
    by_user: HashMap<String, Bucket>,
    by_group: HashMap<String, Bucket>,
}

/// Result of purging a connection from every index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Purged {
    pub from_user: bool,
    pub groups: Vec<String>,
}

fn insert(map: &mut HashMap<String, Bucket>, key: &str, conn: &ConnectionHandle) -> bool {
    map.entry(key.to_string())
        .or_default()
        .insert(conn.id(), conn.clone())
        .is_none()
}

fn remove(map: &mut HashMap<String, Bucket>, key: &str, id: ConnectionId) -> bool {
    let Some(bucket) = map.get_mut(key) else {
        return false;
    };
    let removed = bucket.remove(&id).is_some();
    if bucket.is_empty() {
        map.remove(key);
    }
    removed
}

fn purge_groups(map: &mut HashMap<String, Bucket>, id: ConnectionId) -> Vec<String> {
    let mut groups = Vec::new();
    map.retain(|group_id, bucket| {
        if bucket.remove(&id).is_some() {
            groups.push(group_id.clone());
        }
        !bucket.is_empty()
    });
    groups.sort();
    groups
}

/// Connections that are closing or closed are never (re)indexed.
fn indexable(conn: &ConnectionHandle) -> bool {
    conn.state() < ConnectionState::Closing
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Indices>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `conn` under `user_id`. Returns false if it was already present
    /// or is already shutting down.
    pub async fn add_user(&self, user_id: &str, conn: &ConnectionHandle) -> bool {
        let mut inner = self.inner.write().await;
        indexable(conn) && insert(&mut inner.by_user, user_id, conn)
    }

    /// Remove `conn` from `user_id`'s bucket, dropping the bucket once empty.
    pub async fn remove_user(&self, user_id: &str, conn: &ConnectionHandle) -> bool {
        let mut inner = self.inner.write().await;
        remove(&mut inner.by_user, user_id, conn.id())
    }

    /// Subscribe `conn` to `group_id`. Returns false if already subscribed or
    /// the connection is shutting down.
    pub async fn add_group_sub(&self, group_id: &str, conn: &ConnectionHandle) -> bool {
        let mut inner = self.inner.write().await;
        indexable(conn) && insert(&mut inner.by_group, group_id, conn)
    }

    /// Purge `conn` from every group bucket. Returns the groups it left.
    pub async fn remove_all_group_subs(&self, conn: &ConnectionHandle) -> Vec<String> {
        let mut inner = self.inner.write().await;
        purge_groups(&mut inner.by_group, conn.id())
    }

    /// Remove `conn` from its user bucket and all group buckets in one critical section.
    pub async fn purge(&self, user_id: &str, conn: &ConnectionHandle) -> Purged {
        let mut inner = self.inner.write().await;
        let from_user = remove(&mut inner.by_user, user_id, conn.id());
        let groups = purge_groups(&mut inner.by_group, conn.id());
        Purged { from_user, groups }
    }

    pub async fn snapshot_user(&self, user_id: &str) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn snapshot_group(&self, group_id: &str) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_group
            .get(group_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_user_online(&self, user_id: &str) -> bool {
        self.inner.read().await.by_user.contains_key(user_id)
    }

    /// Number of users with at least one live connection.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }

    /// Number of groups with at least one subscriber.
    pub async fn group_count(&self) -> usize {
        self.inner.read().await.by_group.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner
            .read()
            .await
            .by_user
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Groups `conn` is currently subscribed to, sorted.
    pub async fn groups_of(&self, conn: &ConnectionHandle) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut groups: Vec<String> = inner
            .by_group
            .iter()
            .filter(|(_, bucket)| bucket.contains_key(&conn.id()))
            .map(|(group_id, _)| group_id.clone())
            .collect();
        groups.sort();
        groups
    }

    /// True when no bucket is present in either index.
    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.read().await;
        inner.by_user.is_empty() && inner.by_group.is_empty()
    }

    /// Checks the index invariants: user buckets only hold connections owned
    /// by that user, and no bucket is empty.
    pub async fn invariants_hold(&self) -> bool {
        let inner = self.inner.read().await;
        let users_ok = inner.by_user.iter().all(|(user_id, bucket)| {
            !bucket.is_empty() && bucket.values().all(|c| c.user_id() == user_id)
        });
        let groups_ok = inner.by_group.values().all(|bucket| !bucket.is_empty());
        users_ok && groups_ok
    }
}
