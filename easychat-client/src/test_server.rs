//! Loopback server used by the client and correlator tests.

use crate::connection::ConnectionConfig;
use easychat_protocol::{encode, Decoder, Frame, LoginRequest, MessageKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub type Reply = (MessageKind, i32, String);

pub struct FakeServer {
    pub port: u16,
    pub received: Arc<Mutex<Vec<Frame>>>,
}

impl FakeServer {
    /// Accepts connections and answers every frame with `respond`.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&Frame) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);
        let log = received.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, respond.clone(), log.clone()));
            }
        });

        Self { port, received }
    }

    /// A server that behaves like the real one for a small user table:
    /// alice (7, password "pw"), bob (8) and carol (9, offline).
    pub async fn chat() -> Self {
        Self::start(chat_replies).await
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
    }

    pub fn received_kinds(&self) -> Vec<MessageKind> {
        self.received.lock().iter().map(|f| f.kind()).collect()
    }
}

async fn serve<F>(mut socket: TcpStream, respond: Arc<F>, log: Arc<Mutex<Vec<Frame>>>)
where
    F: Fn(&Frame) -> Vec<Reply>,
{
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.decode_frame().unwrap() {
            log.lock().push(frame.clone());
            for (kind, subject_id, payload) in (*respond)(&frame) {
                let bytes = encode(kind, subject_id, &payload);
                if socket.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn chat_replies(frame: &Frame) -> Vec<Reply> {
    let payload = frame.payload_str().unwrap_or_default().to_string();
    let subject_id = frame.subject_id();

    match frame.kind() {
        MessageKind::Login => match LoginRequest::parse(&payload) {
            Ok(req) if req.username == "alice" && req.password == "pw" => vec![
                (MessageKind::LoginResponse, 7, "Login successful".into()),
                (MessageKind::OfflineMessage, 8, "missed you".into()),
            ],
            _ => vec![(MessageKind::Error, -1, "Login failed".into())],
        },
        MessageKind::Register => {
            if payload.starts_with("alice:") {
                vec![(MessageKind::Error, -1, "Register failed".into())]
            } else {
                vec![(MessageKind::RegisterResponse, -1, "Register successful".into())]
            }
        }
        MessageKind::GetUsers => vec![(
            MessageKind::GetUsersResponse,
            subject_id,
            "7:alice,8:bob".into(),
        )],
        MessageKind::GetUserByName => {
            let found = match payload.as_str() {
                "alice" => "7:alice",
                "bob" => "8:bob",
                "carol" => "9:carol",
                _ => "",
            };
            vec![(MessageKind::GetUserByNameResponse, subject_id, found.into())]
        }
        MessageKind::History => vec![(
            MessageKind::HistoryResponse,
            subject_id,
            "7:hi bob|8:hi alice|7:how are you?".into(),
        )],
        MessageKind::Heartbeat => vec![(MessageKind::Heartbeat, subject_id, "Pong".into())],
        _ => Vec::new(),
    }
}
