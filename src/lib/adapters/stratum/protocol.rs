//! Stratum V1 wire protocol: line-delimited JSON-RPC (spec §6.1) plus the
//! pure state-transition functions the session runner drives. Kept free of
//! I/O so the state machine is exercised directly in tests.

use serde_json::{json, Value};

use crate::error::StratumError;

/// `Disconnected -> Connecting -> Subscribed -> Authorized` (spec §4.4.1,
/// §4.11). Any I/O failure loops back to `Disconnected` with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumState {
    Disconnected,
    Connecting,
    Subscribed,
    Authorized,
}

/// One parsed line from the server (spec §6.1).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SubscribeReply {
        extranonce1: Vec<u8>,
        extranonce2_size: u8,
    },
    AuthorizeReply {
        ok: bool,
    },
    ConfigureReply {
        version_rolling: bool,
        mask: Option<u32>,
    },
    SetDifficulty {
        diff: f64,
    },
    Notify {
        job_id: String,
        prevhash_be: [u8; 32],
        coinb1: Vec<u8>,
        coinb2: Vec<u8>,
        merkle_branch: Vec<[u8; 32]>,
        version: u32,
        nbits: u32,
        ntime: u32,
        clean_jobs: bool,
    },
    SubmitReply {
        accepted: bool,
    },
    Unknown,
}

fn hex32(v: &str) -> Result<[u8; 32], StratumError> {
    let bytes = hex::decode(v).map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StratumError::MalformedMessage("expected 32 bytes".to_string()))
}

fn hex_u32_be(v: &str) -> Result<u32, StratumError> {
    let bytes = hex::decode(v).map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StratumError::MalformedMessage("expected 4 bytes".to_string()))?;
    Ok(u32::from_be_bytes(arr))
}

/// Parse one JSON-RPC line, classifying it by `id`/`method` the way the
/// session runner needs to dispatch (spec §4.4.1 transition table).
pub fn parse_line(line: &str) -> Result<ServerMessage, StratumError> {
    let v: Value = serde_json::from_str(line.trim()).map_err(|e| StratumError::MalformedMessage(e.to_string()))?;

    if let Some(method) = v.get("method").and_then(Value::as_str) {
        return match method {
            "mining.set_difficulty" => {
                let diff = v["params"][0]
                    .as_f64()
                    .ok_or_else(|| StratumError::MalformedMessage("set_difficulty missing diff".into()))?;
                Ok(ServerMessage::SetDifficulty { diff })
            }
            "mining.notify" => parse_notify(&v["params"]),
            _ => Ok(ServerMessage::Unknown),
        };
    }

    let id = v.get("id").and_then(Value::as_i64);
    match id {
        Some(1) => {
            let result = &v["result"];
            let extranonce1 = result
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| StratumError::MalformedMessage("subscribe reply missing extranonce1".into()))?;
            let extranonce1 = hex::decode(extranonce1).map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
            let extranonce2_size = result
                .get(2)
                .and_then(Value::as_u64)
                .ok_or_else(|| StratumError::MalformedMessage("subscribe reply missing extranonce2_size".into()))?
                as u8;
            Ok(ServerMessage::SubscribeReply {
                extranonce1,
                extranonce2_size,
            })
        }
        Some(2) => {
            let ok = v["result"].as_bool().unwrap_or(false);
            Ok(ServerMessage::AuthorizeReply { ok })
        }
        Some(3) => {
            let accepted = v["result"].as_bool().unwrap_or(false);
            Ok(ServerMessage::SubmitReply { accepted })
        }
        Some(100) => {
            let result = &v["result"];
            let version_rolling = result
                .get("version-rolling")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let mask = result
                .get("version-rolling.mask")
                .and_then(Value::as_str)
                .and_then(|s| u32::from_str_radix(s, 16).ok());
            Ok(ServerMessage::ConfigureReply { version_rolling, mask })
        }
        _ => Ok(ServerMessage::Unknown),
    }
}

fn parse_notify(params: &Value) -> Result<ServerMessage, StratumError> {
    let arr = params
        .as_array()
        .ok_or_else(|| StratumError::MalformedMessage("notify params not an array".into()))?;
    if arr.len() < 9 {
        return Err(StratumError::MalformedMessage("notify missing params".into()));
    }
    let job_id = arr[0]
        .as_str()
        .ok_or_else(|| StratumError::MalformedMessage("notify job_id not a string".into()))?
        .to_string();
    let prevhash_be = hex32(arr[1].as_str().unwrap_or_default())?;
    let coinb1 = hex::decode(arr[2].as_str().unwrap_or_default())
        .map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
    let coinb2 = hex::decode(arr[3].as_str().unwrap_or_default())
        .map_err(|e| StratumError::MalformedMessage(e.to_string()))?;
    let merkle_branch = arr[4]
        .as_array()
        .ok_or_else(|| StratumError::MalformedMessage("notify merkle_branch not an array".into()))?
        .iter()
        .map(|h| hex32(h.as_str().unwrap_or_default()))
        .collect::<Result<Vec<_>, _>>()?;
    let version = hex_u32_be(arr[5].as_str().unwrap_or_default())?;
    let nbits = hex_u32_be(arr[6].as_str().unwrap_or_default())?;
    let ntime = hex_u32_be(arr[7].as_str().unwrap_or_default())?;
    let clean_jobs = arr[8].as_bool().unwrap_or(false);

    Ok(ServerMessage::Notify {
        job_id,
        prevhash_be,
        coinb1,
        coinb2,
        merkle_branch,
        version,
        nbits,
        ntime,
        clean_jobs,
    })
}

/// Apply one [`ServerMessage`] to `state`, returning the new state (spec
/// §4.4.1's transition table). Side effects the transition implies
/// (recording `extranonce1`, bumping counters, enqueuing a job) are the
/// caller's responsibility — this function owns only the state machine.
pub fn next_state(state: StratumState, msg: &ServerMessage) -> StratumState {
    match (state, msg) {
        (_, ServerMessage::SubscribeReply { .. }) => StratumState::Subscribed,
        (StratumState::Subscribed, ServerMessage::AuthorizeReply { ok: true }) => StratumState::Authorized,
        (other, _) => other,
    }
}

/// Client request builders (spec §6.1).
pub fn subscribe_request(user_agent: &str) -> Value {
    json!({ "id": 1, "method": "mining.subscribe", "params": [user_agent] })
}

pub fn authorize_request(username: &str, password: &str) -> Value {
    json!({ "id": 2, "method": "mining.authorize", "params": [username, password] })
}

pub fn configure_request() -> Value {
    json!({
        "id": 100,
        "method": "mining.configure",
        "params": [["version-rolling"], { "version-rolling.mask": "ffffffff" }],
    })
}

/// `mining.submit [worker, job_id, extranonce2_hex, ntime_hex, nonce_hex]`
/// (spec §4.4.1). The 4-byte fields are big-endian hex.
pub fn submit_request(worker: &str, job_id: &str, extranonce2: &[u8], ntime: u32, nonce: u32) -> Value {
    json!({
        "id": 3,
        "method": "mining.submit",
        "params": [
            worker,
            job_id,
            hex::encode(extranonce2),
            hex::encode(ntime.to_be_bytes()),
            hex::encode(nonce.to_be_bytes()),
        ],
    })
}

/// Convert a floating-point pool difficulty to a compact `nBits` such that
/// `decode(nbits) * d ~= decode(0x1d00ffff)` (spec §4.4.1, resolved per the
/// spec's own open question: a real conversion, not a placeholder).
pub fn difficulty_to_compact(diff: f64) -> u32 {
    if diff <= 0.0 || !diff.is_finite() {
        return 0x1d00_ffff;
    }

    // Unit-difficulty target as a 256-bit big-endian buffer, same shape
    // `compact_to_target_le` would hand back but we need it as a big number
    // divided by `diff`; do the division in the mantissa/exponent domain
    // directly, matching Bitcoin Core's `GetDifficulty` inverse.
    const UNIT_EXPONENT: i32 = 0x1d;
    const UNIT_MANTISSA: f64 = 0x00ffff as f64;

    let target = UNIT_MANTISSA * 2f64.powi(8 * (UNIT_EXPONENT - 3)) / diff;
    if target <= 0.0 {
        return 0x1d00_ffff;
    }

    let mut exponent = (target.log2() / 8.0).floor() as i32 + 1;
    exponent = exponent.clamp(3, 0x1d);
    let mut mantissa = (target / 2f64.powi(8 * (exponent - 3))).round() as u32;

    if mantissa > 0x007f_ffff {
        mantissa >>= 8;
        exponent += 1;
    }
    if mantissa == 0 {
        mantissa = 1;
    }

    ((exponent as u32) << 24) | (mantissa & 0x007f_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::compact_to_target_le;
    use crate::primitives::target::le_words_cmp;

    #[test]
    fn parses_subscribe_reply() {
        let line = r#"{"id":1,"result":[[["mining.set_difficulty","1"],["mining.notify","1"]],"08000002",4],"error":null}"#;
        let msg = parse_line(line).unwrap();
        match msg {
            ServerMessage::SubscribeReply {
                extranonce1,
                extranonce2_size,
            } => {
                assert_eq!(extranonce1, hex::decode("08000002").unwrap());
                assert_eq!(extranonce2_size, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_authorize_reply() {
        let line = r#"{"id":2,"result":true,"error":null}"#;
        assert_eq!(parse_line(line).unwrap(), ServerMessage::AuthorizeReply { ok: true });
    }

    #[test]
    fn parses_configure_reply() {
        let line = r#"{"id":100,"result":{"version-rolling":true,"version-rolling.mask":"1fffe000"},"error":null}"#;
        assert_eq!(
            parse_line(line).unwrap(),
            ServerMessage::ConfigureReply {
                version_rolling: true,
                mask: Some(0x1fff_e000)
            }
        );
    }

    #[test]
    fn parses_set_difficulty() {
        let line = r#"{"id":null,"method":"mining.set_difficulty","params":[1024.0]}"#;
        assert_eq!(parse_line(line).unwrap(), ServerMessage::SetDifficulty { diff: 1024.0 });
    }

    #[test]
    fn parses_notify() {
        let prevhash = "00".repeat(32);
        let merkle = "11".repeat(32);
        let line = format!(
            r#"{{"id":null,"method":"mining.notify","params":["job1","{prevhash}","aa","bb",["{merkle}"],"20000000","1d00ffff","05f5e100",true]}}"#
        );
        let msg = parse_line(&line).unwrap();
        match msg {
            ServerMessage::Notify {
                job_id,
                version,
                nbits,
                ntime,
                clean_jobs,
                merkle_branch,
                ..
            } => {
                assert_eq!(job_id, "job1");
                assert_eq!(version, 0x2000_0000);
                assert_eq!(nbits, 0x1d00_ffff);
                assert_eq!(ntime, 0x05f5_e100);
                assert!(clean_jobs);
                assert_eq!(merkle_branch.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn state_machine_follows_the_transition_table() {
        let s = StratumState::Disconnected;
        let s = next_state(
            s,
            &ServerMessage::SubscribeReply {
                extranonce1: vec![],
                extranonce2_size: 4,
            },
        );
        assert_eq!(s, StratumState::Subscribed);
        let s = next_state(s, &ServerMessage::AuthorizeReply { ok: true });
        assert_eq!(s, StratumState::Authorized);
    }

    #[test]
    fn authorize_failure_does_not_advance_state() {
        let s = StratumState::Subscribed;
        let s = next_state(s, &ServerMessage::AuthorizeReply { ok: false });
        assert_eq!(s, StratumState::Subscribed);
    }

    #[test]
    fn difficulty_one_is_close_to_unit_target() {
        let nbits = difficulty_to_compact(1.0);
        assert_eq!(nbits, 0x1d00_ffff);
    }

    #[test]
    fn higher_difficulty_yields_a_harder_smaller_target() {
        let easy = compact_to_target_le(difficulty_to_compact(1.0));
        let hard = compact_to_target_le(difficulty_to_compact(1000.0));
        assert_eq!(le_words_cmp(&hard, &easy), std::cmp::Ordering::Less);
    }

    #[test]
    fn submit_request_encodes_big_endian_hex_fields() {
        let req = submit_request("worker1", "job1", &[0xAB, 0xCD], 0x0102_0304, 0x0506_0708);
        assert_eq!(req["params"][3], "01020304");
        assert_eq!(req["params"][4], "05060708");
        assert_eq!(req["params"][2], "abcd");
    }
}
