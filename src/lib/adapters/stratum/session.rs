//! The Stratum session runner: owns the socket, drives [`StratumSession`]'s
//! state machine off the wire, and reconnects with backoff (spec §4.4.1,
//! §5 "Cancellation and timeouts").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::StratumError;

use super::protocol::{self, parse_line};
use super::StratumSession;

/// Reconnect backoff: `min(30, 2^min(attempt, 4))` seconds (spec §5).
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let exp = attempt.min(4);
    Duration::from_secs((1u64 << exp).min(30))
}

/// Read one line with a 5-second timeout, returning a tri-state:
/// `Ok(Some(line))`, `Ok(None)` on a clean EOF, `Err` on timeout
/// or I/O failure (spec §5 "Socket reads use a 5-second timeout").
async fn read_line_with_timeout<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, StratumError> {
    let mut line = String::new();
    match tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await {
        Ok(Ok(0)) => Ok(None),
        Ok(Ok(_)) => Ok(Some(line)),
        Ok(Err(e)) => Err(StratumError::Connect(e.to_string())),
        Err(_) => Err(StratumError::ReadTimeout),
    }
}

/// Run one connect/subscribe/authorize/notify-loop lifecycle against
/// `endpoint`, looping with backoff on failure until `stop` is set (spec
/// §4.4.1, §4.11 "Stratum session").
pub async fn run_session(
    session: Arc<Mutex<StratumSession>>,
    endpoint: (String, u16),
    user_agent: String,
    username: String,
    password: String,
    stop: Arc<AtomicBool>,
) {
    let mut attempt = 0u32;

    while !stop.load(Ordering::Relaxed) {
        match connect_and_run(&session, &endpoint, &user_agent, &username, &password, &stop).await {
            Ok(()) => attempt = 0,
            Err(_) => {
                attempt += 1;
            }
        }

        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(reconnect_backoff(attempt)).await;
    }
}

async fn connect_and_run(
    session: &Arc<Mutex<StratumSession>>,
    endpoint: &(String, u16),
    user_agent: &str,
    username: &str,
    password: &str,
    stop: &Arc<AtomicBool>,
) -> Result<(), StratumError> {
    let stream = TcpStream::connect((endpoint.0.as_str(), endpoint.1))
        .await
        .map_err(|e| StratumError::Connect(e.to_string()))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    send(&mut write_half, &protocol::subscribe_request(user_agent)).await?;
    send(&mut write_half, &protocol::configure_request()).await?;
    send(&mut write_half, &protocol::authorize_request(username, password)).await?;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }

        let pending: Vec<_> = {
            let mut guard = session.lock().expect("session mutex poisoned");
            guard.drain_outgoing_submits()
        };
        for submit in pending {
            let req = protocol::submit_request(&submit.worker, &submit.job_id, &submit.extranonce2, submit.ntime, submit.nonce);
            send(&mut write_half, &req).await?;
        }

        match read_line_with_timeout(&mut reader).await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(msg) = parse_line(&line) {
                    let mut guard = session.lock().expect("session mutex poisoned");
                    let _ = guard.handle_message(msg);
                }
            }
            Ok(None) => return Err(StratumError::Closed),
            Err(StratumError::ReadTimeout) => continue,
            Err(e) => return Err(e),
        }
    }
}

async fn send(write_half: &mut (impl AsyncWriteExt + Unpin), value: &serde_json::Value) -> Result<(), StratumError> {
    let mut line = serde_json::to_string(value).map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
    line.push('\n');
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(|e| StratumError::Connect(e.to_string()))
}
