//! 服务器主逻辑
//!
//! 所有对局状态由单个状态循环独占，连接任务只做帧收发并通过
//! 命令通道投递：同一局的走棋、超时、断线判负天然串行，
//! 不需要细粒度锁。节拍驱动钟面超时、弃局宽限与补提交三个巡检。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use protocol::{
    ClientMessage, Color, Connection, ErrorCode, Listener, MatchError, MatchId, MatchOutcome,
    MatchStatus, PlayerId, ServerMessage, TcpListener, WinReason, TICK_INTERVAL_MS,
};

use crate::arbiter::{TerminalNotice, TimeoutArbiter};
use crate::committer::ResultCommitter;
use crate::oracle::RulesOracle;
use crate::presence;
use crate::session::{MatchSession, SessionManager, TerminalReport};

/// 提交失败后同一节拍内的重试次数
const COMMIT_ATTEMPTS: u32 = 3;

/// 服务器状态
pub struct ServerState {
    pub sessions: SessionManager,
    /// 玩家 ID -> 消息发送通道
    pub connections: HashMap<PlayerId, mpsc::Sender<ServerMessage>>,
    pub oracle: Arc<dyn RulesOracle>,
    pub arbiter: TimeoutArbiter,
    pub committer: ResultCommitter,
}

impl ServerState {
    pub fn new(
        oracle: Arc<dyn RulesOracle>,
        arbiter: TimeoutArbiter,
        committer: ResultCommitter,
    ) -> Self {
        Self {
            sessions: SessionManager::new(),
            connections: HashMap::new(),
            oracle,
            arbiter,
            committer,
        }
    }

    /// 发送消息给玩家
    pub async fn send_to_player(&self, player_id: PlayerId, msg: ServerMessage) {
        if let Some(tx) = self.connections.get(&player_id) {
            let _ = tx.send(msg).await;
        }
    }
}

/// 待发送的消息
///
/// 收件人在入队时解析：终局流程会在冲刷前移除会话，
/// 冲刷时已无法再从会话反查参与者。
struct PendingMessages {
    messages: Vec<(PlayerId, ServerMessage)>,
}

impl PendingMessages {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    fn send(&mut self, player_id: PlayerId, msg: ServerMessage) {
        self.messages.push((player_id, msg));
    }

    /// 广播给对局双方
    fn broadcast(&mut self, session: &MatchSession, msg: ServerMessage) {
        self.messages.push((session.white, msg.clone()));
        self.messages.push((session.black, msg));
    }

    async fn flush(self, state: &ServerState) {
        for (player_id, msg) in self.messages {
            state.send_to_player(player_id, msg).await;
        }
    }
}

/// 状态循环命令
pub enum Command {
    /// 连接任务绑定玩家的下行通道
    Attach {
        player_id: PlayerId,
        tx: mpsc::Sender<ServerMessage>,
    },
    /// 客户端消息
    Client {
        player_id: PlayerId,
        msg: ClientMessage,
    },
    /// 连接断开（携带该连接的下行通道，用于识别已被重连取代的旧连接）
    Detach {
        player_id: PlayerId,
        tx: mpsc::Sender<ServerMessage>,
    },
    /// 配对服务创建对局
    CreateMatch {
        white: PlayerId,
        black: PlayerId,
        initial_time_ms: u64,
        reply: Option<oneshot::Sender<MatchId>>,
    },
    /// 其他副本发布的终局通知
    RemoteTerminal(TerminalNotice),
}

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理客户端消息
    pub async fn handle(
        state: &mut ServerState,
        player_id: PlayerId,
        msg: ClientMessage,
    ) -> Option<ServerMessage> {
        let mut pending = PendingMessages::new();

        let result = match msg {
            // Hello 在连接任务里消费，这里再收到视为协议误用
            ClientMessage::Hello { .. } => Some(ServerMessage::Error {
                code: ErrorCode::BadRequest,
                message: "Already authenticated".to_string(),
            }),
            ClientMessage::JoinMatch { match_id } => {
                Self::handle_join(state, &mut pending, player_id, match_id)
            }
            ClientMessage::SubmitMove {
                match_id,
                from,
                to,
                promotion,
            } => {
                Self::handle_submit_move(state, &mut pending, player_id, match_id, from, to, promotion)
                    .await
            }
            ClientMessage::GetSnapshot { match_id } => {
                Self::handle_get_snapshot(state, player_id, match_id)
            }
            ClientMessage::OfferDraw { match_id } => {
                Self::handle_offer_draw(state, &mut pending, player_id, match_id)
            }
            ClientMessage::RespondDraw { match_id, accept } => {
                Self::handle_respond_draw(state, &mut pending, player_id, match_id, accept).await
            }
            ClientMessage::Resign { match_id } => {
                Self::handle_resign(state, &mut pending, player_id, match_id).await
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        };

        pending.flush(state).await;

        result
    }

    fn error_message(err: &MatchError) -> ServerMessage {
        ServerMessage::Error {
            code: err.code(),
            message: err.client_message(),
        }
    }

    /// 拒绝请求
    ///
    /// 越权与寻址类错误只回发起方；对局语境内的错误（错轮次、
    /// 非法走法、终局后操作等）同时通知对手，双方对局面认知保持一致。
    fn reject(
        pending: &mut PendingMessages,
        session: &MatchSession,
        origin: PlayerId,
        err: MatchError,
    ) -> Option<ServerMessage> {
        let msg = Self::error_message(&err);
        let private = matches!(
            err,
            MatchError::NotAParticipant | MatchError::Unauthorized | MatchError::MatchNotFound(_)
        );
        if !private {
            if let Some(opponent) = session.opponent_of(origin) {
                pending.send(opponent, msg.clone());
            }
        }
        Some(msg)
    }

    fn not_found(match_id: MatchId) -> Option<ServerMessage> {
        Some(Self::error_message(&MatchError::MatchNotFound(match_id)))
    }

    /// 处理加入对局（首连与重连同一入口）
    fn handle_join(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        match_id: MatchId,
    ) -> Option<ServerMessage> {
        let Some(session) = state.sessions.get_mut(match_id) else {
            return Self::not_found(match_id);
        };
        let Some(color) = session.player_color(player_id) else {
            return Some(Self::error_message(&MatchError::NotAParticipant));
        };

        let was_disconnected = session.presence.mark_connected(color);
        if was_disconnected {
            pending.send(session.player_id(color.opponent()), ServerMessage::OpponentReconnected);
        }

        let snapshot = session.snapshot();
        Some(ServerMessage::MatchSnapshot {
            match_id: snapshot.match_id,
            position: snapshot.position,
            white_time_ms: snapshot.white_time_ms,
            black_time_ms: snapshot.black_time_ms,
            status: snapshot.status,
            winner: snapshot.winner,
            draw_offered_by: snapshot.draw_offered_by,
            your_color: color,
        })
    }

    /// 处理只读快照查询
    fn handle_get_snapshot(
        state: &mut ServerState,
        player_id: PlayerId,
        match_id: MatchId,
    ) -> Option<ServerMessage> {
        let Some(session) = state.sessions.get(match_id) else {
            return Self::not_found(match_id);
        };
        let Some(color) = session.player_color(player_id) else {
            return Some(Self::error_message(&MatchError::NotAParticipant));
        };

        let snapshot = session.snapshot();
        Some(ServerMessage::MatchSnapshot {
            match_id: snapshot.match_id,
            position: snapshot.position,
            white_time_ms: snapshot.white_time_ms,
            black_time_ms: snapshot.black_time_ms,
            status: snapshot.status,
            winner: snapshot.winner,
            draw_offered_by: snapshot.draw_offered_by,
            your_color: color,
        })
    }

    /// 处理走棋
    async fn handle_submit_move(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        match_id: MatchId,
        from: String,
        to: String,
        promotion: Option<char>,
    ) -> Option<ServerMessage> {
        let oracle = Arc::clone(&state.oracle);

        let (ack, report) = {
            let Some(session) = state.sessions.get_mut(match_id) else {
                return Self::not_found(match_id);
            };

            let applied =
                match session.submit_move(player_id, &from, &to, promotion, oracle.as_ref()) {
                    Ok(applied) => applied,
                    Err(err) => return Self::reject(pending, session, player_id, err),
                };

            let winner = session.outcome.map(|o| o.winner());
            let game_over = applied.terminal.is_some();
            let ack = ServerMessage::MoveAck {
                success: true,
                position: session.position.clone(),
                game_over,
                winner,
            };
            // 非终局时在这里广播局面更新；终局广播由 finish 统一发出
            let update = if game_over {
                None
            } else {
                Some(ServerMessage::PositionUpdate {
                    position: session.position.clone(),
                    white_time_ms: applied.record.white_time_ms,
                    black_time_ms: applied.record.black_time_ms,
                    game_over: false,
                    winner: None,
                    rating_change: None,
                })
            };
            if let Some(update) = update {
                pending.broadcast(session, update);
            }
            (ack, applied.terminal)
        };

        if let Some(report) = report {
            Self::finish(state, pending, &report, false).await;
        }

        Some(ack)
    }

    /// 处理提和
    fn handle_offer_draw(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        match_id: MatchId,
    ) -> Option<ServerMessage> {
        let Some(session) = state.sessions.get_mut(match_id) else {
            return Self::not_found(match_id);
        };
        let Some(color) = session.player_color(player_id) else {
            return Some(Self::error_message(&MatchError::NotAParticipant));
        };

        if let Err(err) = session.offer_draw(color) {
            return Self::reject(pending, session, player_id, err);
        }

        pending.send(
            session.player_id(color.opponent()),
            ServerMessage::DrawOffered { by: color },
        );
        Some(ServerMessage::ActionOk)
    }

    /// 处理提和响应
    async fn handle_respond_draw(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        match_id: MatchId,
        accept: bool,
    ) -> Option<ServerMessage> {
        let report = {
            let Some(session) = state.sessions.get_mut(match_id) else {
                return Self::not_found(match_id);
            };
            let Some(color) = session.player_color(player_id) else {
                return Some(Self::error_message(&MatchError::NotAParticipant));
            };

            match session.respond_draw(color, accept) {
                Ok(report) => {
                    if report.is_none() {
                        // 拒绝：通知对方（即提和方）
                        pending.send(
                            session.player_id(color.opponent()),
                            ServerMessage::DrawDeclined,
                        );
                    }
                    report
                }
                Err(err) => return Self::reject(pending, session, player_id, err),
            }
        };

        if let Some(report) = report {
            Self::finish(state, pending, &report, false).await;
        }
        Some(ServerMessage::ActionOk)
    }

    /// 处理认输
    async fn handle_resign(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        match_id: MatchId,
    ) -> Option<ServerMessage> {
        let report = {
            let Some(session) = state.sessions.get_mut(match_id) else {
                return Self::not_found(match_id);
            };
            let Some(color) = session.player_color(player_id) else {
                return Some(Self::error_message(&MatchError::NotAParticipant));
            };

            match session.resign(color) {
                Ok(report) => report,
                Err(err) => return Self::reject(pending, session, player_id, err),
            }
        };

        if let Some(report) = report {
            Self::finish(state, pending, &report, false).await;
        }
        Some(ServerMessage::ActionOk)
    }

    /// 终局收尾：提交归档、广播终局事件、通知其他副本、移除会话
    ///
    /// 终局广播整局恰好一次，由本函数统一发出。提交失败时广播
    /// 不带等级分变动的终局事件并保留会话，后续节拍补提交。
    async fn finish(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        report: &TerminalReport,
        timed_out: bool,
    ) {
        let Some(session) = state.sessions.get(report.match_id) else {
            return;
        };

        let mut changes = None;
        for attempt in 1..=COMMIT_ATTEMPTS {
            match state.committer.commit(session, report) {
                Ok(c) => {
                    changes = Some(c);
                    break;
                }
                Err(e) => warn!("对局 {} 提交失败（第 {} 次）: {}", report.match_id, attempt, e),
            }
        }

        let winner = report.outcome.winner();
        let (white_time_ms, black_time_ms) = session.clock.times();
        let msg = if timed_out {
            ServerMessage::TimeExpired {
                winner,
                rating_change: changes,
            }
        } else {
            ServerMessage::PositionUpdate {
                position: report.final_position.clone(),
                white_time_ms,
                black_time_ms,
                game_over: true,
                winner: Some(winner),
                rating_change: changes,
            }
        };
        pending.broadcast(session, msg);

        match changes {
            Some(changes) => {
                let notice = TerminalNotice {
                    match_id: report.match_id,
                    outcome: report.outcome,
                    final_position: report.final_position.clone(),
                    rating_changes: Some(changes),
                    timed_out,
                };
                if let Err(e) = state.arbiter.publish_terminal(&notice).await {
                    warn!("对局 {} 终局通知发布失败: {}", report.match_id, e);
                }
                state.sessions.remove(report.match_id);
                info!("对局 {} 终局: {:?}", report.match_id, report.outcome);
            }
            None => {
                let internal = Self::error_message(&MatchError::Internal(String::new()));
                pending.broadcast(session, internal);
            }
        }
    }

    /// 处理其他副本发布的终局通知
    pub async fn handle_remote_terminal(
        state: &mut ServerState,
        notice: TerminalNotice,
    ) {
        let mut pending = PendingMessages::new();

        if let Some(session) = state.sessions.get_mut(notice.match_id) {
            // 首次转换才广播；发布方已完成提交，本地不再落盘
            if session.end_match(notice.outcome).is_some() {
                session.position = notice.final_position.clone();
                let msg = if notice.timed_out {
                    ServerMessage::TimeExpired {
                        winner: notice.outcome.winner(),
                        rating_change: notice.rating_changes,
                    }
                } else {
                    let (white_time_ms, black_time_ms) = session.clock.times();
                    ServerMessage::PositionUpdate {
                        position: notice.final_position.clone(),
                        white_time_ms,
                        black_time_ms,
                        game_over: true,
                        winner: Some(notice.outcome.winner()),
                        rating_change: notice.rating_changes,
                    }
                };
                pending.broadcast(session, msg);
            }
            state.sessions.remove(notice.match_id);
        }

        pending.flush(state).await;
    }

    /// 处理玩家断线：启动弃局宽限并通知对手
    ///
    /// 只有当断开的连接仍是该玩家的当前连接时才生效：重连后才
    /// 到达的旧连接断开命令不得移除新通道或启动宽限计时。
    pub async fn handle_disconnect(
        state: &mut ServerState,
        player_id: PlayerId,
        tx: &mpsc::Sender<ServerMessage>,
    ) {
        let current = state
            .connections
            .get(&player_id)
            .map_or(false, |cur| cur.same_channel(tx));
        if !current {
            debug!("玩家 {} 的旧连接断开命令已被重连取代，忽略", player_id);
            return;
        }

        let mut pending = PendingMessages::new();

        state.connections.remove(&player_id);

        if let Some(match_id) = state.sessions.find_player_match(player_id) {
            if let Some(session) = state.sessions.get_mut(match_id) {
                if !session.status.is_terminal() {
                    if let Some(color) = session.player_color(player_id) {
                        let grace = presence::grace_for(session.both_moved());
                        session.presence.mark_disconnected(color, Instant::now(), grace);
                        pending.send(
                            session.player_id(color.opponent()),
                            ServerMessage::OpponentDisconnected {
                                grace_secs: grace.as_secs(),
                            },
                        );
                        debug!(
                            "玩家 {} 从对局 {} 断线，宽限 {} 秒",
                            player_id,
                            match_id,
                            grace.as_secs()
                        );
                    }
                }
            }
        }

        pending.flush(state).await;
    }

    /// 巡检钟面超时
    ///
    /// 超时观测到后先抢终局裁决权再转换；没抢到说明另一副本
    /// 在处理，重新武装上报，持锁方若崩溃则 TTL 过后由下个节拍接手。
    pub async fn check_clocks(state: &mut ServerState, pending: &mut PendingMessages) {
        let arbiter = state.arbiter.clone();

        for match_id in state.sessions.ids() {
            let expired = match state.sessions.get_mut(match_id) {
                Some(session) if !session.status.is_terminal() => session.clock.take_expiry(),
                _ => None,
            };
            let Some(color) = expired else { continue };

            if arbiter.try_claim(match_id).await {
                let report = state
                    .sessions
                    .get_mut(match_id)
                    .and_then(|s| s.end_match(MatchOutcome::win(color.opponent(), WinReason::Timeout)));
                if let Some(report) = report {
                    Self::finish(state, pending, &report, true).await;
                }
                arbiter.release(match_id).await;
            } else if let Some(session) = state.sessions.get_mut(match_id) {
                session.clock.rearm_expiry();
            }
        }
    }

    /// 巡检弃局宽限
    ///
    /// 宽限由持有连接的副本独占监测，不需要跨副本抢锁。
    pub async fn check_presence(state: &mut ServerState, pending: &mut PendingMessages) {
        let now = Instant::now();

        for match_id in state.sessions.ids() {
            let report = state.sessions.get_mut(match_id).and_then(|session| {
                if session.status.is_terminal() {
                    return None;
                }
                let color = session.presence.expired(now)?;
                info!("玩家 {} 宽限耗尽，对局 {} 判弃局", session.player_id(color), match_id);
                session.end_match(MatchOutcome::win(color.opponent(), WinReason::Abandon))
            });

            if let Some(report) = report {
                Self::finish(state, pending, &report, false).await;
            }
        }
    }

    /// 补提交：终局后仍留在管理器里的会话即提交未完成
    pub async fn retry_commits(state: &mut ServerState) {
        for match_id in state.sessions.ids() {
            let report = match state.sessions.get(match_id) {
                Some(session) if session.status.is_terminal() => {
                    match (session.outcome, session.ended_at) {
                        (Some(outcome), Some(ended_at)) => Some(TerminalReport {
                            match_id,
                            outcome,
                            final_position: session.position.clone(),
                            ended_at,
                        }),
                        _ => None,
                    }
                }
                _ => None,
            };
            let Some(report) = report else { continue };

            let committed = state
                .sessions
                .get(match_id)
                .and_then(|session| match state.committer.commit(session, &report) {
                    Ok(changes) => Some(changes),
                    Err(e) => {
                        warn!("对局 {} 补提交失败: {}", match_id, e);
                        None
                    }
                });

            if let Some(changes) = committed {
                let notice = TerminalNotice {
                    match_id,
                    outcome: report.outcome,
                    final_position: report.final_position.clone(),
                    rating_changes: Some(changes),
                    timed_out: report.outcome.status() == MatchStatus::TimedOut,
                };
                if let Err(e) = state.arbiter.publish_terminal(&notice).await {
                    warn!("对局 {} 终局通知发布失败: {}", match_id, e);
                }
                state.sessions.remove(match_id);
                info!("对局 {} 补提交成功", match_id);
            }
        }
    }
}

/// 分发状态循环命令
async fn dispatch(state: &mut ServerState, cmd: Command, cmd_tx: &mpsc::Sender<Command>) {
    match cmd {
        Command::Attach { player_id, tx } => {
            state.connections.insert(player_id, tx);
            debug!("玩家 {} 已绑定下行通道", player_id);
        }
        Command::Client { player_id, msg } => {
            if let Some(reply) = MessageHandler::handle(state, player_id, msg).await {
                state.send_to_player(player_id, reply).await;
            }
        }
        Command::Detach { player_id, tx } => {
            MessageHandler::handle_disconnect(state, player_id, &tx).await;
        }
        Command::CreateMatch {
            white,
            black,
            initial_time_ms,
            reply,
        } => {
            let match_id = state.sessions.create(white, black, initial_time_ms);
            info!("创建对局 {}: 白方 {} 对 黑方 {}", match_id, white, black);

            // 订阅其他副本对本局的终局裁决
            let mut sub = state.arbiter.subscribe(match_id).await;
            let tx = cmd_tx.clone();
            tokio::spawn(async move {
                while let Ok(payload) = sub.recv().await {
                    match TerminalNotice::decode(&payload) {
                        Ok(notice) => {
                            if tx.send(Command::RemoteTerminal(notice)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("终局通知解码失败: {}", e),
                    }
                }
            });

            if let Some(reply) = reply {
                let _ = reply.send(match_id);
            }
        }
        Command::RemoteTerminal(notice) => {
            MessageHandler::handle_remote_terminal(state, notice).await;
        }
    }
}

/// 连接任务：首帧必须是 Hello，之后读写分离
fn spawn_connection(conn: protocol::TcpConnection, cmd_tx: mpsc::Sender<Command>) {
    tokio::spawn(async move {
        let peer = conn.peer_addr();
        let (mut reader, mut writer) = conn.split();

        let player_id = match reader.read_frame::<ClientMessage>().await {
            Ok(ClientMessage::Hello { player_id }) => player_id,
            Ok(_) => {
                let _ = writer
                    .write_frame(&ServerMessage::Error {
                        code: ErrorCode::Unauthorized,
                        message: "Expected Hello".to_string(),
                    })
                    .await;
                return;
            }
            Err(e) => {
                debug!("连接 {:?} 握手失败: {}", peer, e);
                return;
            }
        };

        if writer
            .write_frame(&ServerMessage::HelloOk { player_id })
            .await
            .is_err()
        {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);
        if cmd_tx
            .send(Command::Attach {
                player_id,
                tx: tx.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        // 下行任务：把状态循环的消息写回连接
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.write_frame(&msg).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match reader.read_frame::<ClientMessage>().await {
                Ok(msg) => {
                    if cmd_tx.send(Command::Client { player_id, msg }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("玩家 {} 连接读取结束: {}", player_id, e);
                    break;
                }
            }
        }

        let _ = cmd_tx.send(Command::Detach { player_id, tx }).await;
        write_task.abort();
    });
}

/// 服务器主循环
pub async fn run(
    addr: &str,
    mut state: ServerState,
    mut cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: mpsc::Sender<Command>,
) -> anyhow::Result<()> {
    let mut listener = TcpListener::bind(addr).await?;
    info!("对局服务监听于 {:?}", listener.local_addr());

    let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));

    loop {
        tokio::select! {
            conn = listener.accept() => match conn {
                Ok(conn) => spawn_connection(conn, cmd_tx.clone()),
                Err(e) => warn!("接受连接失败: {}", e),
            },
            _ = tick.tick() => {
                let mut pending = PendingMessages::new();
                MessageHandler::check_clocks(&mut state, &mut pending).await;
                MessageHandler::check_presence(&mut state, &mut pending).await;
                MessageHandler::retry_commits(&mut state).await;
                pending.flush(&state).await;
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => dispatch(&mut state, cmd, &cmd_tx).await,
                None => break,
            },
        }
    }

    Ok(())
}
