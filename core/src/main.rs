//! Mintbridge settlement node
//!
//! Serves the HTTP API over a local ledger, a proving backend and the
//! configured storage backend.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal;

use mintbridge_config::{MintbridgeConfig, ProverMode};
use mintbridge_core::api::{ApiState, create_router};
use mintbridge_core::ledger::{
    LocalLedger, LocalLedgerConfig, MockProofVerifier, NonEmptyProofVerifier, ProofVerifier,
};
use mintbridge_core::settlement::{
    CircuitArtifacts, DenominationSet, MockProver, Orchestrator, OrchestratorConfig,
    ProverBackend, RemoteProver, RemoteProverConfig, WitnessAssembler,
};
use mintbridge_core::storage::{InstitutionRegistry, open_backend};
use mintbridge_privacy::SealingKey;

struct Args {
    config_path: Option<PathBuf>,
    print_config: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            config_path: None,
            print_config: false,
        };
        let mut iter = env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = iter.next().context("--config needs a path")?;
                    args.config_path = Some(PathBuf::from(path));
                }
                "--print-config" => args.print_config = true,
                other => bail!("unknown argument: {}", other),
            }
        }
        Ok(args)
    }
}

fn load_config(args: &Args) -> Result<MintbridgeConfig> {
    match &args.config_path {
        Some(path) => MintbridgeConfig::load_from(path),
        None => MintbridgeConfig::load(),
    }
}

fn sealing_key(config: &MintbridgeConfig) -> Result<SealingKey> {
    match &config.settlement.sealing_key {
        Some(encoded) => {
            let bytes: [u8; 32] = hex::decode(encoded.trim_start_matches("0x"))
                .context("sealing key is not hex")?
                .try_into()
                .map_err(|_| anyhow::anyhow!("sealing key must be 32 bytes"))?;
            Ok(SealingKey::from_bytes(bytes))
        }
        None => {
            warn!("No sealing key configured, generated an ephemeral one");
            warn!("Journaled transfers will not survive a restart");
            Ok(SealingKey::generate())
        }
    }
}

fn circuit_artifacts(config: &MintbridgeConfig) -> Result<CircuitArtifacts> {
    match (&config.prover.circuit_path, &config.prover.proving_key_path) {
        (Some(circuit), Some(key)) => {
            CircuitArtifacts::load(Path::new(circuit), Path::new(key))
        }
        (None, None) => Ok(CircuitArtifacts::default()),
        _ => bail!("circuit_path and proving_key_path must be set together"),
    }
}

async fn prover_backend(config: &MintbridgeConfig) -> Result<ProverBackend> {
    match config.prover.mode {
        ProverMode::Mock => Ok(ProverBackend::Mock(MockProver::new())),
        ProverMode::Remote => {
            let prover = RemoteProver::new(RemoteProverConfig {
                coordinator_url: config.prover.coordinator_url.clone(),
                proof_timeout: config.settlement.prove_timeout(),
                poll_interval: std::time::Duration::from_millis(config.prover.poll_interval_ms),
            })?;
            if !prover.health_check().await {
                warn!(
                    "Prover coordinator at {} is not healthy yet",
                    prover.coordinator_url()
                );
            }
            Ok(ProverBackend::Remote(prover))
        }
    }
}

/// Open ledger accounts for institutions that outlived the last process
async fn restore_accounts(ledger: &LocalLedger, registry: &dyn InstitutionRegistry) -> Result<()> {
    let records = registry.list()?;
    for record in &records {
        ledger
            .register_institution(&record.id, record.settlement_address, 0)
            .await?;
    }
    for record in &records {
        for peer in &record.connected {
            ledger.connect(&record.id, peer).await?;
        }
    }
    if !records.is_empty() {
        info!("Restored {} institution accounts", records.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse()?;
    if args.print_config {
        println!("{}", MintbridgeConfig::generate_sample());
        return Ok(());
    }
    let config = load_config(&args)?;

    info!("============================================");
    info!(
        "          MINTBRIDGE v{}             ",
        env!("CARGO_PKG_VERSION")
    );
    info!("============================================");
    info!("Storage           : {:?} ({})", config.database.backend, config.database.path);
    info!("Prover            : {:?}", config.prover.mode);
    info!("Denominations     : {:?}", config.settlement.denominations);
    info!("Tree height       : {}", config.settlement.tree_height);
    info!("Visibility lag    : {}ms", config.ledger.visibility_lag_ms);
    info!("Dev mode          : {}", config.api.dev_mode);
    info!("============================================");

    let denominations = DenominationSet::new(config.settlement.denominations.iter().copied())
        .context("invalid denomination set")?;
    if !denominations.is_complete() {
        warn!("Denomination set has no 1, some amounts cannot be split");
    }

    let (registry, journal) = open_backend(&config.database)?;
    let prover = prover_backend(&config).await?;
    let prover_name = prover.name();

    let verifier: Arc<dyn ProofVerifier> = match prover {
        ProverBackend::Mock(_) => Arc::new(MockProofVerifier),
        ProverBackend::Remote(_) => Arc::new(NonEmptyProofVerifier),
    };
    let ledger = Arc::new(LocalLedger::new(
        LocalLedgerConfig::from_config(&config),
        verifier,
    )?);
    restore_accounts(&ledger, registry.as_ref()).await?;

    let artifacts = circuit_artifacts(&config)?;
    info!("Circuit artifacts : {}", artifacts.fingerprint());
    let assembler = WitnessAssembler::new(
        Arc::new(prover),
        Arc::new(artifacts),
        config.settlement.tree_height,
    );

    let orchestrator = Orchestrator::new(
        ledger.clone(),
        assembler,
        registry.clone(),
        journal,
        sealing_key(&config)?,
        denominations,
        OrchestratorConfig::from_config(&config),
    );

    // Resume transfers committed before the last shutdown
    let unfinished = orchestrator.unfinished()?;
    if !unfinished.is_empty() {
        info!("Resuming {} unfinished transfers", unfinished.len());
    }
    for id in unfinished {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.settle(&id).await {
                error!("Resumed transfer {} failed: {}", id, e);
            }
        });
    }

    let api_state = ApiState {
        orchestrator,
        ledger,
        registry,
        prover: prover_name,
        dev_mode: config.api.dev_mode,
        start_time: Instant::now(),
    };

    let router = create_router(api_state);
    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .context("invalid API listen address")?;
    let listener = TcpListener::bind(addr).await?;

    info!("============================================");
    info!("  Mintbridge is ready!");
    info!("  API: http://{}", addr);
    info!("============================================");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("Mintbridge stopped");
    Ok(())
}
