use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use talent_ai::config::AppConfig;
use talent_ai::error::AppError;
use talent_ai::telemetry;
use talent_ai::workflows::hiring::{
    pipeline_router, AdvanceOutcome, ApplicationIntake, CandidateId, CredentialSigner,
    HiringPipelineService, HttpAgentGateway, InMemoryStore, JobId, MemoryPublisher,
    PipelineConfig, ScriptedGateway, TracingPublisher,
};
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Talent Pipeline Orchestrator",
    about = "Run the agent-driven hiring pipeline from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect and demo the hiring pipeline
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum PipelineCommand {
    /// Walk one scripted application through every stage and print each step
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
struct DemoArgs {
    /// Candidate identifier for the demo application
    #[arg(long, default_value = "cand-demo")]
    candidate: String,
    /// Job identifier for the demo application
    #[arg(long, default_value = "job-demo")]
    job: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Pipeline {
            command: PipelineCommand::Demo(args),
        } => run_pipeline_demo(args).await,
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let gateway = Arc::new(HttpAgentGateway::new(
        &config.agents.base_url,
        config.agents.timeout_seconds,
    )?);
    let publisher = Arc::new(TracingPublisher::new(config.event_bus.address()));
    let signer = config.credential_signer()?;
    let service = Arc::new(HiringPipelineService::new(
        Arc::new(InMemoryStore::default()),
        gateway,
        publisher,
        signer,
        config.pipeline.clone(),
    ));

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(pipeline_router(service))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "talent pipeline orchestrator ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_pipeline_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    // Single-application demo: a batch of one keeps the bias stage moving.
    let pipeline = PipelineConfig {
        bias_batch_size: 1,
        ..config.pipeline.clone()
    };

    let gateway = Arc::new(ScriptedGateway::with_defaults());
    let publisher = Arc::new(MemoryPublisher::new());
    let service = Arc::new(HiringPipelineService::new(
        Arc::new(InMemoryStore::default()),
        gateway,
        publisher.clone(),
        CredentialSigner::ephemeral(),
        pipeline,
    ));

    let record = service.register(ApplicationIntake {
        application_id: None,
        candidate_id: CandidateId(args.candidate),
        job_id: JobId(args.job),
    })?;
    println!("Registered application {}", record.application_id);

    loop {
        let outcome = service.advance(&record.application_id).await?;
        match outcome {
            AdvanceOutcome::Progressed(credential) => {
                println!(
                    "Stage completed; now at {} (stages done: {})",
                    credential.document.current_stage.label(),
                    credential.document.stages_completed.len()
                );
                if credential.document.current_stage.is_terminal() {
                    break;
                }
            }
            AdvanceOutcome::AwaitingBiasBatch(_) => {
                let batch = service.run_bias_batch().await?;
                println!(
                    "Bias batch processed: {} claimed, {} completed",
                    batch.claimed,
                    batch.completed.len()
                );
            }
            AdvanceOutcome::Unchanged(_) => break,
        }
    }

    let view = service.status(&record.application_id)?;
    println!(
        "Final status: {} at {} (signature valid: {})",
        view.status, view.current_stage, view.verified
    );
    println!("Stages completed: {}", view.stages_completed.join(", "));

    println!("\nPublished events");
    for event in publisher.events() {
        println!("- {}: {}", event.channel.label(), event.payload);
    }

    println!("\nRecorded agent runs");
    for run in service.list_runs(&record.application_id)? {
        println!("- {} via {:?}: {:?}", run.agent, run.source, run.status);
    }

    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
