use std::time::Duration;

use anyhow::{bail, Context, Result};
use common::{HeartbeatRequest, MapperTask, ReducerFailedOnMapperRequest, ReducerTask};
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

/// Cliente HTTP hacia el master y hacia los otros workers (para bajar
/// particiones de mappers).
#[derive(Clone)]
pub struct MasterClient {
    client: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        if !resp.status().is_success() {
            bail!("POST {} devolvió {}", url, resp.status());
        }
        Ok(())
    }

    /// Los reportes no se reintentan: si se pierden, el master termina
    /// migrando la tarea por la vía de liveness o de reintento.
    async fn report<T: Serialize + ?Sized>(&self, path: &str, body: &T) {
        if let Err(e) = self.post(path, body).await {
            warn!("no se pudo reportar al master: {:?}", e);
        }
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<()> {
        self.post("/api/v1/workers/heartbeat", req).await
    }

    pub async fn mapper_succeed(&self, task: &MapperTask) {
        self.report("/api/v1/tasks/mapper/succeed", task).await
    }

    pub async fn mapper_failed(&self, task: &MapperTask) {
        self.report("/api/v1/tasks/mapper/failed", task).await
    }

    pub async fn reducer_succeed(&self, task: &ReducerTask) {
        self.report("/api/v1/tasks/reducer/succeed", task).await
    }

    pub async fn reducer_failed(&self, task: &ReducerTask) {
        self.report("/api/v1/tasks/reducer/failed", task).await
    }

    pub async fn reducer_failed_on_mapper(&self, reducer: &ReducerTask, mapper: &MapperTask) {
        let req = ReducerFailedOnMapperRequest {
            reducer: reducer.clone(),
            mapper: mapper.clone(),
        };
        self.report("/api/v1/tasks/reducer/failed-on-mapper", &req)
            .await
    }

    /// Baja la partición `partition` de la salida de `mapper` desde el
    /// worker que la produjo.
    pub async fn fetch_partition(&self, mapper: &MapperTask, partition: u32) -> Result<String> {
        let Some(address) = mapper.output_address.as_deref() else {
            bail!(
                "mapper {} del job {} no tiene dirección de salida",
                mapper.header.task_id,
                mapper.header.job_id
            );
        };
        let url = format!(
            "{}/api/v1/partitions/{}/{}/{}/{}",
            address.trim_end_matches('/'),
            mapper.header.job_id,
            mapper.header.task_id,
            mapper.header.attempt,
            partition
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            bail!("GET {} devolvió {}", url, resp.status());
        }
        Ok(resp.text().await?)
    }
}
