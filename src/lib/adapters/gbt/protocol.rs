//! Bitcoin Core JSON-RPC surface the GBT adapter needs (spec §6.2):
//! `getblocktemplate` and `submitblock`.

use serde::{Deserialize, Serialize};

use crate::error::GbtError;

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTx {
    pub data: String,
    #[serde(default)]
    pub fee: i64,
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseTxn {
    pub data: String,
}

/// The subset of `getblocktemplate`'s response this adapter consumes (spec
/// §6.2).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTemplate {
    pub version: i64,
    pub previousblockhash: String,
    #[serde(default)]
    pub transactions: Vec<TemplateTx>,
    pub coinbasetxn: Option<CoinbaseTxn>,
    pub default_witness_commitment: Option<String>,
    pub curtime: i64,
    pub bits: String,
    pub height: i64,
    pub merkleroot: Option<String>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, T> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

/// How the client authenticates to `bitcoind` (spec §6.2).
#[derive(Debug, Clone)]
pub enum RpcAuth {
    Userpass { username: String, password: String },
    CookieFile { path: String },
}

fn read_cookie(path: &str) -> Result<(String, String), GbtError> {
    let content = std::fs::read_to_string(path).map_err(|e| GbtError::Rpc(e.to_string()))?;
    let mut parts = content.trim().splitn(2, ':');
    let user = parts
        .next()
        .ok_or_else(|| GbtError::Rpc("empty cookie file".to_string()))?
        .to_string();
    let pass = parts
        .next()
        .ok_or_else(|| GbtError::Rpc("malformed cookie file".to_string()))?
        .to_string();
    Ok((user, pass))
}

/// The collaborator this adapter dispatches RPC calls through. Abstracted
/// behind a trait so tests can substitute a fixture without a live node.
pub trait BitcoinRpcClient {
    fn get_block_template(&self, rules: &[String]) -> Result<BlockTemplate, GbtError>;
    fn submit_block(&self, hex_block: &str) -> Result<(), GbtError>;
}

/// Blocking `reqwest`-backed client (spec §1 "the JSON-RPC HTTP client" is
/// explicitly out of scope for re-specification; this is the concrete glue
/// the adapter needs to actually call out).
pub struct ReqwestRpcClient {
    url: String,
    auth: RpcAuth,
    client: reqwest::blocking::Client,
}

impl ReqwestRpcClient {
    pub fn new(url: String, auth: RpcAuth) -> Self {
        ReqwestRpcClient {
            url,
            auth,
            client: reqwest::blocking::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(3))
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("building the RPC http client should never fail"),
        }
    }

    fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T, GbtError> {
        let (user, pass) = match &self.auth {
            RpcAuth::Userpass { username, password } => (username.clone(), password.clone()),
            RpcAuth::CookieFile { path } => read_cookie(path)?,
        };

        let body = RpcRequest {
            jsonrpc: "1.0",
            id: "work_coordinator",
            method,
            params,
        };

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(user, Some(pass))
            .json(&body)
            .send()
            .map_err(|e| GbtError::Rpc(e.to_string()))?;

        let parsed: RpcResponse<T> = resp.json().map_err(|e| GbtError::Rpc(e.to_string()))?;
        if let Some(err) = parsed.error {
            if !err.is_null() {
                return Err(GbtError::Rpc(err.to_string()));
            }
        }
        parsed.result.ok_or_else(|| GbtError::Rpc("missing result".to_string()))
    }
}

impl BitcoinRpcClient for ReqwestRpcClient {
    fn get_block_template(&self, rules: &[String]) -> Result<BlockTemplate, GbtError> {
        self.call(
            "getblocktemplate",
            serde_json::json!([{ "rules": rules }]),
        )
    }

    fn submit_block(&self, hex_block: &str) -> Result<(), GbtError> {
        // A non-error response (including an empty-string success) is
        // treated as acceptance (spec §6.2).
        let _: serde_json::Value = self.call("submitblock", serde_json::json!([hex_block]))?;
        Ok(())
    }
}
