use std::time::Duration;

use async_trait::async_trait;
use common::{MapperTask, ReducerTask, RunReducerRequest};
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// No se llegó al worker: conexión rechazada, timeout, o el worker no
    /// atiende esa ruta / no está disponible (404 y 5xx).
    #[error("no se pudo contactar a {address}: {message}")]
    Transport { address: String, message: String },

    /// El worker respondió pero rechazó el pedido.
    #[error("{address} rechazó el pedido ({status}): {body}")]
    Remote {
        address: String,
        status: u16,
        body: String,
    },
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// Llamadas que el master hace sobre los workers.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    async fn run_mapper_task(&self, address: &str, task: &MapperTask) -> Result<(), RpcError>;

    /// Entrega la salida de un mapper a un lote de reducers del mismo worker.
    async fn run_reducer_task(
        &self,
        address: &str,
        mapper: &MapperTask,
        reducers: &[ReducerTask],
    ) -> Result<(), RpcError>;
}

/// Cliente HTTP sin estado: un `reqwest::Client` compartido (pool de
/// conexiones) y la URL base del worker resuelta por llamada.
#[derive(Clone)]
pub struct HttpWorkerRpc {
    client: Client,
}

impl HttpWorkerRpc {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        address: &str,
        path: &str,
        body: &T,
    ) -> Result<(), RpcError> {
        let url = format!("{}{}", address.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            return Err(RpcError::Transport {
                address: address.to_string(),
                message: format!("status {status}: {body}"),
            });
        }
        Err(RpcError::Remote {
            address: address.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkerRpc for HttpWorkerRpc {
    async fn run_mapper_task(&self, address: &str, task: &MapperTask) -> Result<(), RpcError> {
        self.post(address, "/api/v1/mapper/run", task).await
    }

    async fn run_reducer_task(
        &self,
        address: &str,
        mapper: &MapperTask,
        reducers: &[ReducerTask],
    ) -> Result<(), RpcError> {
        let req = RunReducerRequest {
            mapper: mapper.clone(),
            reducers: reducers.to_vec(),
        };
        self.post(address, "/api/v1/reducer/run", &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FileBlock, TaskHeader};

    #[tokio::test]
    async fn unreachable_worker_is_a_transport_error() {
        let rpc = HttpWorkerRpc::new(Duration::from_millis(500)).unwrap();
        let task = MapperTask {
            header: TaskHeader::new(1, 0, "w1".into()),
            block: FileBlock {
                path: "/tmp/x".into(),
                offset: 0,
                length: 1,
            },
            reducer_amount: 1,
            program: "wordcount".into(),
            output_address: None,
        };

        // puerto 9 (discard) en loopback: nadie escucha
        let err = rpc
            .run_mapper_task("http://127.0.0.1:9", &task)
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}
