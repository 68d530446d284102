//! 传输层抽象与帧编解码
//!
//! Connection/Listener traits 使对局服务与具体传输实现解耦；
//! 默认提供 TCP 实现，帧格式为 1 字节版本号 + 4 字节大端长度 + bincode 载荷。

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 连接抽象 trait
#[async_trait]
pub trait Connection: Send + Sync {
    /// 发送消息
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()>;

    /// 接收消息
    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M>;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;
}

/// 连接器 trait（客户端与测试使用）
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// 建立连接
    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 监听器 trait（服务端使用）
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    /// 绑定地址
    async fn bind(addr: &str) -> Result<Self>;

    /// 接受连接
    async fn accept(&mut self) -> Result<Self::Conn>;

    /// 获取本地地址
    fn local_addr(&self) -> Option<String>;
}

/// TCP 连接器
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    /// 从 TcpStream 创建（服务端接受连接后使用）
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        })
    }

    /// 分离读写端（服务端为每个连接分别起读写任务）
    pub fn split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()> {
        self.writer.write_frame(msg).await
    }

    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        self.reader.read_frame().await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ProtocolError::Io)?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}

/// 帧头大小: 1 字节版本 + 4 字节长度
const HEADER_SIZE: usize = 5;

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// 读取并解码一帧消息
    pub async fn read_frame<M: DeserializeOwned>(&mut self) -> Result<M> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader
            .read_exact(&mut header)
            .await
            .map_err(map_eof)?;

        let version = header[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buffer.len() < length {
            self.buffer.resize(length, 0);
        }
        self.reader
            .read_exact(&mut self.buffer[..length])
            .await
            .map_err(map_eof)?;

        let msg = bincode::deserialize(&self.buffer[..length])?;
        Ok(msg)
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一帧消息
    pub async fn write_frame<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let payload = bincode::serialize(msg)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let length = payload.len() as u32;
        let mut header = [0u8; HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[1..5].copy_from_slice(&length.to_be_bytes());

        self.writer.write_all(&header).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// 对端正常断开映射为 ConnectionClosed
fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, ServerMessage};

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_handle = tokio::spawn(async move {
            let connector = TcpConnector;
            let mut conn = connector.connect(&addr).await.unwrap();

            conn.send(&ClientMessage::Hello { player_id: 11 }).await.unwrap();

            let msg: ServerMessage = conn.recv().await.unwrap();
            match msg {
                ServerMessage::HelloOk { player_id } => assert_eq!(player_id, 11),
                _ => panic!("Unexpected message"),
            }
        });

        let mut conn = listener.accept().await.unwrap();

        let msg: ClientMessage = conn.recv().await.unwrap();
        match msg {
            ClientMessage::Hello { player_id } => assert_eq!(player_id, 11),
            _ => panic!("Unexpected message"),
        }

        conn.send(&ServerMessage::HelloOk { player_id: 11 })
            .await
            .unwrap();

        client_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_handle = tokio::spawn(async move {
            let connector = TcpConnector;
            let conn = connector.connect(&addr).await.unwrap();
            drop(conn);
        });

        let mut conn = listener.accept().await.unwrap();
        client_handle.await.unwrap();

        let result: Result<ClientMessage> = conn.recv().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
