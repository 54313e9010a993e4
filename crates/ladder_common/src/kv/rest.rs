//! Redis-over-REST client.
//!
//! A command is POSTed to the base URL as a JSON argument array, a batch as an
//! array of arrays to `<base>/pipeline`. Replies look like `{"result": ...}` or
//! `{"error": "..."}`.

use super::{Command, KvStore};
use crate::config::KvConfig;
use crate::error::{LadderError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub struct RestKv {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestKv {
    pub fn new(config: &KvConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LadderError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.resolve_token()?,
        })
    }

    async fn post(&self, url: String, body: Value) -> Result<Value> {
        let mut request = self.client.post(url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if let Some(err) = status_error(response.status()) {
            return Err(err);
        }
        // Other 4xx replies still carry an {"error": ...} body worth surfacing.
        Ok(response.json::<Value>().await?)
    }

    async fn exec(&self, command: &Command) -> Result<Value> {
        let args = command.to_args();
        debug!("KV {} {}", command.name(), args.get(1).map(String::as_str).unwrap_or(""));
        let body = Value::from(args);
        let reply = self.post(self.base_url.clone(), body).await?;
        unwrap_reply(command, reply)
    }

    /// Send several commands in one request. Each reply is decoded on its own;
    /// the backend gives no atomicity across them.
    pub async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Result<Value>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let body = Value::Array(
            commands
                .iter()
                .map(|c| Value::from(c.to_args()))
                .collect(),
        );
        let reply = self
            .post(format!("{}/pipeline", self.base_url), body)
            .await?;
        decode_pipeline(commands, reply)
    }
}

/// Statuses that fail a request before its body is read.
pub fn status_error(status: StatusCode) -> Option<LadderError> {
    if status.is_server_error() {
        return Some(LadderError::Transient(format!("store returned {}", status)));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(LadderError::Backend(format!(
            "store rejected credentials ({})",
            status
        )));
    }
    None
}

/// Extract `result` from a reply envelope, or turn `error` into `Backend`.
pub fn unwrap_reply(command: &Command, reply: Value) -> Result<Value> {
    match reply {
        Value::Object(mut map) => {
            if let Some(err) = map.remove("error") {
                let msg = match err {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Err(LadderError::Backend(msg));
            }
            match map.remove("result") {
                Some(result) => Ok(result),
                None => Err(LadderError::unexpected(command.name(), Value::Object(map))),
            }
        }
        other => Err(LadderError::unexpected(command.name(), other)),
    }
}

pub fn decode_pipeline(commands: &[Command], reply: Value) -> Result<Vec<Result<Value>>> {
    match reply {
        Value::Array(items) if items.len() == commands.len() => Ok(items
            .into_iter()
            .zip(commands)
            .map(|(item, cmd)| unwrap_reply(cmd, item))
            .collect()),
        other => Err(LadderError::unexpected("PIPELINE", other)),
    }
}

pub fn decode_opt_string(command: &Command, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(LadderError::unexpected(command.name(), other)),
    }
}

pub fn decode_int(command: &Command, value: Value) -> Result<i64> {
    match &value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| LadderError::unexpected(command.name(), &value)),
        Value::String(s) => s
            .parse()
            .map_err(|_| LadderError::unexpected(command.name(), &value)),
        _ => Err(LadderError::unexpected(command.name(), &value)),
    }
}

/// HGETALL comes back as a flat `[field, value, field, value, ...]` array;
/// some gateways send an object instead.
pub fn decode_hash(command: &Command, value: Value) -> Result<HashMap<String, String>> {
    fn text(v: Value) -> String {
        match v {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(LadderError::unexpected(command.name(), Value::Array(items)));
            }
            let mut map = HashMap::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
                map.insert(text(field), text(val));
            }
            Ok(map)
        }
        Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, text(v))).collect()),
        other => Err(LadderError::unexpected(command.name(), other)),
    }
}

/// SET ... NX EX answers "OK" when written and null when the key existed.
pub fn decode_set_nx(command: &Command, value: Value) -> Result<bool> {
    match value {
        Value::String(s) if s == "OK" => Ok(true),
        Value::Null => Ok(false),
        other => Err(LadderError::unexpected(command.name(), other)),
    }
}

fn decode_ok(command: &Command, value: Value) -> Result<()> {
    match value {
        Value::String(s) if s == "OK" => Ok(()),
        other => Err(LadderError::unexpected(command.name(), other)),
    }
}

#[async_trait]
impl KvStore for RestKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cmd = Command::Get { key: key.to_string() };
        let value = self.exec(&cmd).await?;
        decode_opt_string(&cmd, value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let cmd = Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        };
        let reply = self.exec(&cmd).await?;
        decode_ok(&cmd, reply)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let cmd = Command::IncrBy {
            key: key.to_string(),
            delta,
        };
        let value = self.exec(&cmd).await?;
        decode_int(&cmd, value)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let cmd = Command::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        };
        let value = self.exec(&cmd).await?;
        decode_int(&cmd, value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let cmd = Command::HGetAll { key: key.to_string() };
        let value = self.exec(&cmd).await?;
        decode_hash(&cmd, value)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let cmd = Command::SetNxEx {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs,
        };
        let reply = self.exec(&cmd).await?;
        decode_set_nx(&cmd, reply)
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let commands: Vec<Command> = keys
            .iter()
            .map(|k| Command::Get { key: k.to_string() })
            .collect();
        let replies = self.pipeline(&commands).await?;
        replies
            .into_iter()
            .zip(&commands)
            .map(|(reply, cmd)| decode_opt_string(cmd, reply?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get_cmd() -> Command {
        Command::Get { key: "k".into() }
    }

    #[test]
    fn test_unwrap_reply_result_and_error() {
        assert_eq!(unwrap_reply(&get_cmd(), json!({"result": "7"})).unwrap(), json!("7"));
        let err = unwrap_reply(&get_cmd(), json!({"error": "WRONGTYPE"})).unwrap_err();
        assert!(matches!(err, LadderError::Backend(ref m) if m == "WRONGTYPE"));
        assert!(matches!(
            unwrap_reply(&get_cmd(), json!([1, 2])),
            Err(LadderError::UnexpectedReply { .. })
        ));
    }

    #[test]
    fn test_decode_scalars() {
        let cmd = get_cmd();
        assert_eq!(decode_opt_string(&cmd, json!(null)).unwrap(), None);
        assert_eq!(decode_opt_string(&cmd, json!("abc")).unwrap().as_deref(), Some("abc"));
        assert_eq!(decode_int(&cmd, json!(42)).unwrap(), 42);
        assert_eq!(decode_int(&cmd, json!("-3")).unwrap(), -3);
        assert!(decode_int(&cmd, json!("x")).is_err());
        assert!(decode_set_nx(&cmd, json!("OK")).unwrap());
        assert!(!decode_set_nx(&cmd, json!(null)).unwrap());
    }

    #[test]
    fn test_decode_hash_flat_and_object() {
        let cmd = Command::HGetAll { key: "ledger".into() };
        let flat = decode_hash(&cmd, json!(["u1", "10", "u2", "5"])).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["u2"], "5");

        let obj = decode_hash(&cmd, json!({"u1": 3, "u2": "x"})).unwrap();
        assert_eq!(obj["u1"], "3");
        assert_eq!(obj["u2"], "x");

        assert!(decode_hash(&cmd, json!(["dangling"])).is_err());
        assert!(decode_hash(&cmd, json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_decode_pipeline_keeps_per_command_errors() {
        let cmds = vec![
            Command::Get { key: "a".into() },
            Command::Get { key: "b".into() },
        ];
        let replies =
            decode_pipeline(&cmds, json!([{"result": "1"}, {"error": "boom"}])).unwrap();
        assert_eq!(replies[0].as_ref().unwrap(), &json!("1"));
        assert!(replies[1].is_err());

        assert!(decode_pipeline(&cmds, json!([{"result": "1"}])).is_err());
    }

    #[test]
    fn test_new_strips_trailing_slash() {
        let config = KvConfig {
            url: "https://kv.example.test/".into(),
            ..KvConfig::default()
        };
        let kv = RestKv::new(&config).unwrap();
        assert_eq!(kv.base_url, "https://kv.example.test");
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::OK).is_none());
        assert!(status_error(StatusCode::BAD_REQUEST).is_none());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE)
            .unwrap()
            .is_transient());
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            Some(LadderError::Backend(_))
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN),
            Some(LadderError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let kv = RestKv::new(&KvConfig {
            url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..KvConfig::default()
        })
        .unwrap();
        let err = kv.get("xp:total").await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
