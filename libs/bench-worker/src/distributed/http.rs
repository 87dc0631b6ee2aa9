use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WorkerError;

/// Таймаут одного RPC вызова к узлу.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP клиент к worker-узлам.
///
/// Один вызов = один запрос, без повторов. Любой ответ кроме 200 —
/// ошибка. Fan-out идёт параллельно и падает на первой ошибке.
pub(crate) struct NodeClient {
    http: RwLock<Option<reqwest::Client>>,
}

impl NodeClient {
    pub(crate) fn new() -> Result<Self, WorkerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::Topology(format!("http client: {e}")))?;
        Ok(Self { http: RwLock::new(Some(http)) })
    }

    fn client(&self) -> Result<reqwest::Client, WorkerError> {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WorkerError::Closed)
    }

    /// Закрыть пул соединений. Дальнейшие вызовы вернут `Closed`.
    pub(crate) fn close(&self) {
        self.http.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub(crate) async fn post(&self, node: &str, path: &'static str, body: Vec<u8>) -> Result<Vec<u8>, WorkerError> {
        let client = self.client()?;
        let response = client
            .post(url(node, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| WorkerError::Transport { method: "POST", node: node.to_string(), path, source })?;
        read_ok(response, "POST", node, path).await
    }

    pub(crate) async fn post_json<T: Serialize + ?Sized>(
        &self,
        node: &str,
        path: &'static str,
        body: &T,
    ) -> Result<Vec<u8>, WorkerError> {
        self.post(node, path, encode(path, body)?).await
    }

    /// POST на все узлы; успех только если ответили все.
    pub(crate) async fn post_all(&self, nodes: &[String], path: &'static str, body: Vec<u8>) -> Result<(), WorkerError> {
        try_join_all(nodes.iter().map(|node| self.post(node, path, body.clone()))).await?;
        Ok(())
    }

    pub(crate) async fn post_all_json<T: Serialize + ?Sized>(
        &self,
        nodes: &[String],
        path: &'static str,
        body: &T,
    ) -> Result<(), WorkerError> {
        self.post_all(nodes, path, encode(path, body)?).await
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, node: &str, path: &'static str) -> Result<T, WorkerError> {
        let client = self.client()?;
        let response = client
            .get(url(node, path))
            .send()
            .await
            .map_err(|source| WorkerError::Transport { method: "GET", node: node.to_string(), path, source })?;
        let bytes = read_ok(response, "GET", node, path).await?;
        serde_json::from_slice(&bytes).map_err(|e| WorkerError::Decode {
            node: node.to_string(),
            path,
            detail: e.to_string(),
        })
    }

    pub(crate) async fn get_all<T: DeserializeOwned>(
        &self,
        nodes: &[String],
        path: &'static str,
    ) -> Result<Vec<T>, WorkerError> {
        try_join_all(nodes.iter().map(|node| self.get(node, path))).await
    }
}

fn url(node: &str, path: &str) -> String {
    format!("{}{path}", node.trim_end_matches('/'))
}

fn encode<T: Serialize + ?Sized>(path: &'static str, body: &T) -> Result<Vec<u8>, WorkerError> {
    serde_json::to_vec(body).map_err(|detail| WorkerError::Encode { path, detail })
}

async fn read_ok(
    response: reqwest::Response,
    method: &'static str,
    node: &str,
    path: &'static str,
) -> Result<Vec<u8>, WorkerError> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(node, path, status = status.as_u16(), body = %body, "worker call failed");
        return Err(WorkerError::Status {
            method,
            node: node.to_string(),
            path,
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|source| WorkerError::Transport { method, node: node.to_string(), path, source })?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(url("http://w1:8080/", "/stop-all"), "http://w1:8080/stop-all");
        assert_eq!(url("http://w1:8080", "/stop-all"), "http://w1:8080/stop-all");
    }

    #[tokio::test]
    async fn closed_client_refuses_calls() {
        let client = NodeClient::new().unwrap();
        client.close();
        client.close();
        assert!(matches!(client.post("http://127.0.0.1:1", "/stop-all", vec![]).await, Err(WorkerError::Closed)));
    }
}
