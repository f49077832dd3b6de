//! JSON-RPC 2.0 over HTTP, shared by the EVM and Solana clients

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::error::ClientError;

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

pub struct JsonRpcTransport {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    /// Every request is bounded by `timeout`
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ClientError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call that must return a non-null result
    pub async fn call<T, R>(&self, method: &'static str, params: T) -> Result<R, ClientError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| ClientError::Parse(format!("{}: null result", method)))
    }

    /// Call whose `null` result is meaningful (pending receipt, unknown tx)
    pub async fn call_optional<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, ClientError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(method.to_string())
                } else {
                    ClientError::RpcConnection(format!("HTTP request failed: {}", e))
                }
            })?;

        let rpc_response: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            ClientError::Parse(format!("{}: failed to parse response: {}", method, e))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }
}

/// Parse an EVM quantity such as `"0x1f"`
pub fn parse_hex_u64(value: &str) -> Result<u64, ClientError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ClientError::Parse(format!("invalid hex quantity {}: {}", value, e)))
}

/// Parse an EVM quantity that may exceed u64 (wei values, log data)
pub fn parse_hex_u128(value: &str) -> Result<u128, ClientError> {
    let digits = value.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ClientError::Parse(format!("invalid hex amount {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1f").unwrap(), 31);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_parse_hex_u128_handles_padded_words() {
        let word = format!("0x{:0>64}", "2faf080");
        assert_eq!(parse_hex_u128(&word).unwrap(), 50_000_000);
        assert_eq!(parse_hex_u128(&format!("0x{}", "0".repeat(64))).unwrap(), 0);
        assert_eq!(parse_hex_u128("0x").unwrap(), 0);
        // more than 128 significant bits
        assert!(parse_hex_u128(&format!("0x1{}", "0".repeat(32))).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let rpc = JsonRpcTransport::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result: Result<String, _> = rpc.call("eth_blockNumber", ()).await;
        assert!(matches!(
            result,
            Err(ClientError::RpcConnection(_)) | Err(ClientError::Timeout(_))
        ));
    }
}
