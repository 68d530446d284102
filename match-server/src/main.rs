use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use match_server::{
    server, ArchiveStore, InMemoryStore, ResultCommitter, ScriptedOracle, ServerState,
    TimeoutArbiter,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("match_server=debug".parse()?))
        .init();

    let addr =
        std::env::var("MATCH_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:9527".to_string());

    info!("对局服务启动中...");

    // 单副本部署用进程内存储；多副本部署替换为外部共享存储实现
    let store = Arc::new(InMemoryStore::new());
    let arbiter = TimeoutArbiter::new(store);
    let committer = ResultCommitter::new(ArchiveStore::new()?);
    // 规则引擎由宿主接入；默认的脚本化裁决器拒绝一切走法
    let oracle = Arc::new(ScriptedOracle::new());

    let state = ServerState::new(oracle, arbiter, committer);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    server::run(&addr, state, cmd_rx, cmd_tx).await
}
