use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{FileServerInfo, JobConfig, JobId, JobInfo, SubmitJobResponse, WorkerMetrics};
use reqwest::Client;
use std::env;

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Envía un job map/reduce nuevo
    Submit {
        /// Archivo de entrada, ej: /data/input/libro.txt
        #[arg(long)]
        input: String,

        /// Directorio de salida de los reducers
        #[arg(long)]
        output: String,

        /// Cantidad de mappers (pista para el split)
        #[arg(long, default_value_t = 4)]
        mappers: u32,

        /// Cantidad de reducers / particiones
        #[arg(long, default_value_t = 2)]
        reducers: u32,

        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Programa registrado en los workers
        #[arg(long, default_value = "wordcount")]
        program: String,

        /// Líneas por bloque de salida
        #[arg(long, default_value_t = 1000)]
        chunk_size: u32,

        #[arg(long, default_value_t = 1)]
        replicas: u32,
    },
    /// Resumen de todos los jobs (texto del master)
    Jobs,
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: JobId,
    },
    /// Lista los workers registrados con sus cargas
    Workers,
    /// Dónde leer la salida de los jobs
    FileServer,
}

impl Commands {
    fn job_config(&self) -> Option<JobConfig> {
        match self {
            Commands::Submit {
                input,
                output,
                mappers,
                reducers,
                max_attempts,
                program,
                chunk_size,
                replicas,
            } => Some(JobConfig {
                input_path: input.clone(),
                output_path: output.clone(),
                mapper_amount: *mappers,
                reducer_amount: *reducers,
                max_attempt_count: *max_attempts,
                program: program.clone(),
                output_chunk_size: *chunk_size,
                output_replicas: *replicas,
            }),
            _ => None,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match &cli.command {
        Commands::Submit { .. } => {
            if let Some(config) = cli.command.job_config() {
                submit(&client, &base_url, &config).await?;
            }
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let text = client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("no se pudo contactar al master en {base_url}"))?
                .text()
                .await?;
            println!("{}", text);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let job: JobInfo = resp.json().await?;
                print_job(&job);
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("error consultando /api/v1/workers (status {})", resp.status());
            }
            let workers: Vec<WorkerMetrics> = resp.json().await?;
            if workers.is_empty() {
                println!("No hay workers registrados.");
            }
            for w in workers {
                print_worker(&w);
            }
        }

        Commands::FileServer => {
            let url = format!("{}/api/v1/file-server", base_url);
            let info: FileServerInfo = client.get(&url).send().await?.json().await?;
            println!("Servidor de archivos: {}:{}", info.host, info.port);
        }
    }

    Ok(())
}

async fn submit(client: &Client, base_url: &str, config: &JobConfig) -> Result<()> {
    let url = format!("{}/api/v1/jobs", base_url);
    let resp = client
        .post(&url)
        .json(config)
        .send()
        .await
        .with_context(|| format!("no se pudo contactar al master en {base_url}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("el master rechazó el job ({}): {}", status, body);
    }

    let created: SubmitJobResponse = resp.json().await?;
    println!("Job creado:");
    println!("  id: {}", created.job_id);
    println!("  entrada: {}", config.input_path);
    println!("  salida: {}", config.output_path);
    println!(
        "  mappers={}, reducers={}, max_attempts={}",
        config.mapper_amount, config.reducer_amount, config.max_attempt_count
    );
    Ok(())
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  estado: {}", job.status);
    println!("  programa: {}", job.config.program);
    println!(
        "  mappers: {}/{} ok, reducers: {}/{} ok, fallidas: {}",
        job.mappers_succeeded,
        job.mapper_tasks,
        job.reducers_succeeded,
        job.reducer_tasks,
        job.failed_tasks
    );

    // progreso calculado localmente sobre los reducers
    if job.reducer_tasks > 0 {
        let pct = (job.reducers_succeeded as f64 / job.reducer_tasks as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    } else {
        println!("  progreso: (sin tareas)");
    }

    println!("  entrada: {}", job.config.input_path);
    println!("  salida: {}", job.config.output_path);
    println!("  creado: {}", job.created_at);
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
}

fn print_worker(w: &WorkerMetrics) {
    println!("Worker {}", w.name);
    println!("  address        : {}", w.address);
    println!("  valid          : {}", w.valid);
    println!("  last_heartbeat : {} ms ago", w.last_heartbeat_ms_ago);
    println!(
        "  cargas         : mappers={}, reducers={}",
        w.mapper_load, w.reducer_load
    );
    println!(
        "  pendientes     : mappers={}, reducers={}",
        w.pending_mappers, w.pending_reducers
    );
    match w.cpu_percent {
        Some(cpu) => println!("  cpu_percent    : {:.1}%", cpu),
        None => println!("  cpu_percent    : (sin datos)"),
    }
    match w.mem_bytes {
        Some(mem) => println!("  mem_bytes      : {}", mem),
        None => println!("  mem_bytes      : (sin datos)"),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_flags_build_a_valid_config() {
        let cli = Cli::try_parse_from([
            "client",
            "submit",
            "--input",
            "/data/input/libro.txt",
            "--output",
            "/data/output/libro",
            "--reducers",
            "3",
        ])
        .unwrap();

        let config = cli.command.job_config().unwrap();
        assert_eq!(config.reducer_amount, 3);
        assert_eq!(config.mapper_amount, 4);
        assert_eq!(config.program, "wordcount");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn status_needs_numeric_id() {
        assert!(Cli::try_parse_from(["client", "status", "abc"]).is_err());
        let cli = Cli::try_parse_from(["client", "status", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { id: 7 }));
        assert!(cli.command.job_config().is_none());
    }

    #[test]
    fn file_server_is_kebab_case() {
        let cli = Cli::try_parse_from(["client", "file-server"]).unwrap();
        assert!(matches!(cli.command, Commands::FileServer));
    }
}
