//! 在线连接注册表
//!
//! 维护 用户 -> 连接 的映射，任一时刻每个用户最多登记一条连接。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, Timestamp, UserId};
use tokio::sync::RwLock;

use crate::transport::ConnectionHandle;

/// 一条已登记的连接
#[derive(Clone)]
pub struct Connection {
    pub user_id: UserId,
    pub handle: Arc<dyn ConnectionHandle>,
    pub connected_at: Timestamp,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.user_id)
            .field("connection_id", &self.id())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// 诊断用的在线状态条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub live: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记连接，同一用户的旧连接被覆盖并返回给调用方，但不会被关闭
    pub async fn register(
        &self,
        user_id: UserId,
        handle: Arc<dyn ConnectionHandle>,
        connected_at: Timestamp,
    ) -> Option<Connection> {
        let connection = Connection {
            user_id,
            handle,
            connected_at,
        };
        let mut connections = self.connections.write().await;
        let previous = connections.insert(user_id, connection);
        if let Some(previous) = &previous {
            tracing::debug!(
                user_id = %user_id,
                replaced = %previous.id(),
                "同一用户的新连接覆盖了旧连接"
            );
        }
        previous
    }

    /// 无条件移除，重复调用无副作用
    pub async fn unregister(&self, user_id: UserId) -> Option<Connection> {
        self.connections.write().await.remove(&user_id)
    }

    /// 仅当登记的仍是这条连接时才移除，避免旧连接断开时把新连接也踢掉
    pub async fn unregister_connection(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id() == connection_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<Connection> {
        self.connections.read().await.get(&user_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<PresenceEntry> {
        self.connections
            .read()
            .await
            .values()
            .map(|connection| PresenceEntry {
                user_id: connection.user_id,
                connection_id: connection.id(),
                live: connection.is_live(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// 清空注册表并交出所有连接，停机时使用
    pub async fn drain(&self) -> Vec<Connection> {
        self.connections
            .write()
            .await
            .drain()
            .map(|(_, connection)| connection)
            .collect()
    }
}
