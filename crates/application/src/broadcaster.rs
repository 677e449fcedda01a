use async_trait::async_trait;
use domain::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;

/// 每个连接的出站队列，由该连接的写任务负责消费
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// 广播组能力：按组加入、离开、发布。
///
/// 组名是不透明字符串，不校验对应房间是否存在。
#[async_trait]
pub trait BroadcastGroups: Send + Sync {
    /// 加入组；已是成员时不改变状态。返回成员关系是否发生变化。
    async fn join(&self, connection_id: ConnectionId, group: &str) -> bool;

    /// 离开组；不是成员时不改变状态。不会关闭连接。
    async fn leave(&self, connection_id: ConnectionId, group: &str) -> bool;

    /// 投递给组内所有成员（包括发送者本身），返回成功入队的数量
    async fn publish(&self, group: &str, event: ServerEvent) -> usize;

    /// 投递给除 `excluded` 以外的所有连接（不限房间）
    async fn publish_except(&self, excluded: ConnectionId, event: ServerEvent) -> usize;
}
