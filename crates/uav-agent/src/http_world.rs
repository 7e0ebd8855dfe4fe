//! HTTP client for the position & annotation service.
//!
//! Talks JSON to the emulator's session API:
//! - `GET /sessions` lists sessions; the first one is used
//! - `GET /sessions/{sid}/nodes/{id}` reads a node
//! - `PATCH /sessions/{sid}/nodes/{id}` moves a node or changes its icon

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use swarm_kernel::Point;
use swarm_kernel::marker::MarkerKind;

use crate::config::PositionServiceConfig;
use crate::world::{NodeId, PositionService};

#[derive(Debug, Deserialize)]
struct SessionSummary {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    position: Point,
}

/// Body of a node edit. Only the fields being changed are sent.
#[derive(Debug, Default, Serialize, PartialEq)]
struct NodeEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

/// Position service reached over HTTP.
#[derive(Clone)]
pub struct HttpPositionService {
    client: reqwest::Client,
    base_url: String,
    icon_dir: String,
    session: u64,
}

impl HttpPositionService {
    /// Connect and pick the first running session.
    ///
    /// Fails when the service is unreachable or has no session.
    pub async fn connect(config: &PositionServiceConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let response = client
            .get(format!("{}/sessions", base_url))
            .send()
            .await
            .context("Failed to reach position service")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Session listing failed with status {}: {}", status, body);
        }
        let sessions: Vec<SessionSummary> = response
            .json()
            .await
            .context("Failed to parse session listing")?;
        let session = sessions
            .first()
            .map(|s| s.id)
            .context("No current simulation sessions")?;

        info!(session = session, base_url = %base_url, "Connected to position service");
        Ok(Self::with_session(config, session, client))
    }

    fn with_session(config: &PositionServiceConfig, session: u64, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            icon_dir: config.icon_dir.trim_end_matches('/').to_string(),
            session,
        }
    }

    fn node_url(&self, node: NodeId) -> String {
        format!("{}/sessions/{}/nodes/{}", self.base_url, self.session, node)
    }

    fn icon_path(&self, color: &str, kind: MarkerKind) -> String {
        format!("{}/{}", self.icon_dir, kind.icon(color))
    }

    async fn edit(&self, node: NodeId, edit: &NodeEdit) -> Result<()> {
        let response = self
            .client
            .patch(self.node_url(node))
            .json(edit)
            .send()
            .await
            .with_context(|| format!("Failed to send edit for node {}", node))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Edit of node {} failed with status {}: {}", node, status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl PositionService for HttpPositionService {
    async fn check_session(&self) -> Result<()> {
        let url = format!("{}/sessions/{}", self.base_url, self.session);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach position service")?;
        if !response.status().is_success() {
            anyhow::bail!("Session {} unavailable: {}", self.session, response.status());
        }
        Ok(())
    }

    async fn position(&self, node: NodeId) -> Result<Point> {
        let response = self
            .client
            .get(self.node_url(node))
            .send()
            .await
            .with_context(|| format!("Failed to read node {}", node))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Read of node {} failed with status {}: {}", node, status, body);
        }

        let node_response: NodeResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse node {}", node))?;
        Ok(node_response.position)
    }

    async fn set_position(&self, node: NodeId, position: Point) -> Result<()> {
        self.edit(
            node,
            &NodeEdit {
                position: Some(position),
                ..NodeEdit::default()
            },
        )
        .await
    }

    async fn set_marker(&self, node: NodeId, color: &str, kind: MarkerKind) -> Result<()> {
        let icon = self.icon_path(color, kind);
        debug!(node = node, icon = %icon, "Setting marker");
        self.edit(
            node,
            &NodeEdit {
                icon: Some(icon),
                ..NodeEdit::default()
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base_url: &str, icon_dir: &str) -> HttpPositionService {
        let config = PositionServiceConfig {
            base_url: base_url.to_string(),
            icon_dir: icon_dir.to_string(),
        };
        HttpPositionService::with_session(&config, 3, reqwest::Client::new())
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let svc = service("http://localhost:9000/", "/icons/");
        assert_eq!(svc.node_url(11), "http://localhost:9000/sessions/3/nodes/11");
        assert_eq!(svc.icon_path("red", MarkerKind::Target), "/icons/red_dot.png");
        assert_eq!(svc.icon_path("grey", MarkerKind::Vehicle), "/icons/grey_plane.png");
    }

    #[test]
    fn test_edit_body_only_carries_changed_fields() {
        let edit = NodeEdit {
            position: Some(Point::new(1.5, 2.0)),
            ..NodeEdit::default()
        };
        assert_eq!(
            serde_json::to_value(&edit).unwrap(),
            serde_json::json!({"position": {"x": 1.5, "y": 2.0}})
        );

        let edit = NodeEdit {
            icon: Some("/icons/blue_dot.png".to_string()),
            ..NodeEdit::default()
        };
        assert_eq!(
            serde_json::to_value(&edit).unwrap(),
            serde_json::json!({"icon": "/icons/blue_dot.png"})
        );
    }

    #[test]
    fn test_node_response_parsing() {
        let node: NodeResponse = serde_json::from_str(
            r#"{"id": 11, "position": {"x": 300.0, "y": 250.5}, "icon": "x.png"}"#,
        )
        .unwrap();
        assert_eq!(node.position, Point::new(300.0, 250.5));
    }
}
