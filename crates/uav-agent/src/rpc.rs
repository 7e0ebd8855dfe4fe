//! Motion-command RPC: line-delimited JSON over loopback TCP.
//!
//! Each request is one JSON object per line:
//!
//! ```text
//! {"method": "setWaypoint", "params": {"x": 400.0, "y": 300.0}}
//! ```
//!
//! and is answered by one line, `{"result": ...}` or `{"error": "..."}`.
//! The server binds again after a transport failure; the client reconnects
//! on the next call after a broken connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use swarm_kernel::{Point, TargetId};

use crate::config::RpcConfig;
use crate::motion::MotionInterface;

/// Attempts per client call; a failed attempt drops the connection.
const CALL_ATTEMPTS: usize = 2;

/// A motion command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Request {
    GetPosition,
    SetPosition(Point),
    GetClaim,
    SetClaim(Option<TargetId>),
    GetWaypoint,
    SetWaypoint(Point),
    GetOriginalWaypoint,
    SetOriginalWaypoint(Point),
    #[serde(rename_all = "camelCase")]
    GetCandidateTargets {
        coverage_zone_x: f64,
        pursuit_range: f64,
    },
}

/// Answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Result(Value),
    Error(String),
}

impl Reply {
    pub fn into_result(self) -> Result<Value> {
        match self {
            Reply::Result(value) => Ok(value),
            Reply::Error(message) => Err(anyhow::anyhow!("Remote error: {}", message)),
        }
    }
}

/// Run a request against a motion interface.
pub async fn dispatch(motion: &dyn MotionInterface, request: Request) -> Result<Value> {
    let value = match request {
        Request::GetPosition => serde_json::to_value(motion.position().await?)?,
        Request::SetPosition(position) => {
            motion.set_position(position).await?;
            Value::Bool(true)
        }
        Request::GetClaim => serde_json::to_value(motion.claim().await?)?,
        Request::SetClaim(claim) => Value::String(motion.set_claim(claim).await?),
        Request::GetWaypoint => serde_json::to_value(motion.waypoint().await?)?,
        Request::SetWaypoint(waypoint) => {
            motion.set_waypoint(waypoint).await?;
            Value::Bool(true)
        }
        Request::GetOriginalWaypoint => serde_json::to_value(motion.original_waypoint().await?)?,
        Request::SetOriginalWaypoint(waypoint) => {
            motion.set_original_waypoint(waypoint).await?;
            Value::Bool(true)
        }
        Request::GetCandidateTargets {
            coverage_zone_x,
            pursuit_range,
        } => serde_json::to_value(
            motion
                .candidate_targets(coverage_zone_x, pursuit_range)
                .await?,
        )?,
    };
    Ok(value)
}

async fn answer(motion: &dyn MotionInterface, line: &str) -> Reply {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Reply::Error(format!("invalid request: {}", e)),
    };
    debug!(request = ?request, "RPC request");
    match dispatch(motion, request).await {
        Ok(value) => Reply::Result(value),
        Err(e) => Reply::Error(format!("{:#}", e)),
    }
}

async fn handle_connection(stream: TcpStream, motion: Arc<dyn MotionInterface>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = answer(motion.as_ref(), &line).await;
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

/// Accept connections on `listener` until accepting fails.
pub async fn accept_loop(listener: TcpListener, motion: Arc<dyn MotionInterface>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Failed to accept RPC connection")?;
        debug!(peer = %peer, "RPC client connected");

        let motion = motion.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, motion).await {
                debug!(peer = %peer, error = %e, "RPC connection closed");
            }
        });
    }
}

/// Serve the motion interface forever, binding again after any failure.
pub async fn serve(config: RpcConfig, motion: Arc<dyn MotionInterface>) {
    loop {
        match TcpListener::bind(config.bind).await {
            Ok(listener) => {
                info!(addr = %config.bind, "Serving motion RPC");
                if let Err(e) = accept_loop(listener, motion.clone()).await {
                    warn!(error = %e, "Motion RPC server failed, restarting");
                }
            }
            Err(e) => warn!(addr = %config.bind, error = %e, "Failed to bind motion RPC"),
        }
        tokio::time::sleep(config.restart_delay()).await;
    }
}

/// Motion interface of a vehicle in another process.
pub struct RpcClient {
    addr: SocketAddr,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").field("addr", &self.addr).finish()
    }
}

impl RpcClient {
    /// Create a client; the connection is made on the first call.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            conn: Mutex::new(None),
        }
    }

    /// Wait until the server accepts a connection.
    pub async fn wait_ready(&self, attempts: usize, delay: Duration) -> Result<()> {
        for attempt in 1..=attempts {
            match TcpStream::connect(self.addr).await {
                Ok(stream) => {
                    *self.conn.lock().await = Some(BufReader::new(stream));
                    return Ok(());
                }
                Err(e) => {
                    debug!(addr = %self.addr, attempt = attempt, error = %e, "Motion RPC not ready");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        anyhow::bail!("Motion RPC at {} unreachable after {} attempts", self.addr, attempts)
    }

    async fn exchange(
        addr: SocketAddr,
        conn: &mut Option<BufReader<TcpStream>>,
        line: &str,
    ) -> Result<Reply> {
        if conn.is_none() {
            let stream = TcpStream::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to motion RPC at {}", addr))?;
            *conn = Some(BufReader::new(stream));
        }
        let Some(stream) = conn.as_mut() else {
            anyhow::bail!("Motion RPC connection missing");
        };

        stream.get_mut().write_all(line.as_bytes()).await?;

        let mut response = String::new();
        if stream.read_line(&mut response).await? == 0 {
            anyhow::bail!("Motion RPC connection closed");
        }
        serde_json::from_str(&response).context("Failed to parse motion RPC reply")
    }

    /// Send one request and wait for its reply.
    pub async fn call(&self, request: &Request) -> Result<Value> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let mut conn = self.conn.lock().await;
        let mut last_error = None;
        for attempt in 1..=CALL_ATTEMPTS {
            match Self::exchange(self.addr, &mut conn, &line).await {
                Ok(reply) => return reply.into_result(),
                Err(e) => {
                    debug!(addr = %self.addr, attempt = attempt, error = %e, "Motion RPC call failed, reconnecting");
                    *conn = None;
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Motion RPC call not attempted")))
    }

    async fn call_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let value = self.call(&request).await?;
        serde_json::from_value(value).context("Unexpected motion RPC result")
    }
}

#[async_trait]
impl MotionInterface for RpcClient {
    async fn position(&self) -> Result<Point> {
        self.call_as(Request::GetPosition).await
    }

    async fn set_position(&self, position: Point) -> Result<()> {
        self.call(&Request::SetPosition(position)).await.map(drop)
    }

    async fn claim(&self) -> Result<Option<TargetId>> {
        self.call_as(Request::GetClaim).await
    }

    async fn set_claim(&self, claim: Option<TargetId>) -> Result<String> {
        self.call_as(Request::SetClaim(claim)).await
    }

    async fn waypoint(&self) -> Result<Point> {
        self.call_as(Request::GetWaypoint).await
    }

    async fn set_waypoint(&self, waypoint: Point) -> Result<()> {
        self.call(&Request::SetWaypoint(waypoint)).await.map(drop)
    }

    async fn original_waypoint(&self) -> Result<Point> {
        self.call_as(Request::GetOriginalWaypoint).await
    }

    async fn set_original_waypoint(&self, waypoint: Point) -> Result<()> {
        self.call(&Request::SetOriginalWaypoint(waypoint))
            .await
            .map(drop)
    }

    async fn candidate_targets(
        &self,
        coverage_zone_x: f64,
        pursuit_range: f64,
    ) -> Result<Vec<TargetId>> {
        self.call_as(Request::GetCandidateTargets {
            coverage_zone_x,
            pursuit_range,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        assert_eq!(
            serde_json::to_value(Request::GetPosition).unwrap(),
            json!({"method": "getPosition"})
        );
        assert_eq!(
            serde_json::to_value(Request::SetWaypoint(Point::new(1.0, 2.0))).unwrap(),
            json!({"method": "setWaypoint", "params": {"x": 1.0, "y": 2.0}})
        );
        assert_eq!(
            serde_json::to_value(Request::SetClaim(None)).unwrap(),
            json!({"method": "setClaim", "params": null})
        );
        assert_eq!(
            serde_json::to_value(Request::GetCandidateTargets {
                coverage_zone_x: 1200.0,
                pursuit_range: 600.0
            })
            .unwrap(),
            json!({
                "method": "getCandidateTargets",
                "params": {"coverageZoneX": 1200.0, "pursuitRange": 600.0}
            })
        );
    }

    #[test]
    fn test_request_parsing() {
        let request: Request = serde_json::from_str(r#"{"method": "getClaim"}"#).unwrap();
        assert_eq!(request, Request::GetClaim);

        let request: Request =
            serde_json::from_str(r#"{"method": "setClaim", "params": 12}"#).unwrap();
        assert_eq!(request, Request::SetClaim(Some(12)));

        assert!(serde_json::from_str::<Request>(r#"{"method": "selfDestruct"}"#).is_err());
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            serde_json::to_string(&Reply::Result(json!(true))).unwrap(),
            r#"{"result":true}"#
        );
        assert_eq!(
            serde_json::to_string(&Reply::Error("boom".to_string())).unwrap(),
            r#"{"error":"boom"}"#
        );
        assert!(Reply::Error("boom".to_string()).into_result().is_err());
    }
}
