//! FX agreement engine - operator entry point
//!
//! Commands: `bootstrap`, `portfolio` (default), `balances`, `accounts`,
//! `recompile`, and the single steps `permit`, `create`, `register`,
//! `sign <a|b>`, `kill <a|b>`, `evaluate` over the ids recorded under
//! `[deployment]`. Configuration is read from `FX_ENGINE_CONFIG`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use fx_agreement_engine::artifacts::FsContractSource;
use fx_agreement_engine::chain::{ChainClient, EthersChainClient};
use fx_agreement_engine::config::{DeploymentConfig, Settings};
use fx_agreement_engine::correlation::TransactionCorrelator;
use fx_agreement_engine::deploy::DeploymentTracker;
use fx_agreement_engine::metrics::MetricsServer;
use fx_agreement_engine::agreement::{AgreementId, ContractId};
use fx_agreement_engine::workflow::{self, Accounts, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting FX agreement engine v{}", env!("CARGO_PKG_VERSION"));

    let command = std::env::args().nth(1).unwrap_or_else(|| "portfolio".to_string());
    let party = std::env::args().nth(2);

    // Load configuration
    let settings = Settings::load()?;
    let source = Arc::new(FsContractSource::new(&settings.artifacts.dir));

    if command == "recompile" {
        let script = settings
            .artifacts
            .compile_script
            .as_deref()
            .context("No compile_script configured under [artifacts]")?;
        source.recompile(script).await?;
        info!("Contracts recompiled into {:?}", source.dir());
        return Ok(());
    }

    // Initialize chain client
    let client = Arc::new(EthersChainClient::new(&settings.chain)?);
    if let Some(password) = settings
        .chain
        .unlock_password
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        client.unlock_all(password).await?;
    }
    let node_accounts = client.accounts().await?;
    let accounts = Accounts::resolve(&node_accounts, &settings.accounts)?;
    info!(
        "Master {:?}, party A {:?}, party B {:?}",
        accounts.master, accounts.party_a, accounts.party_b
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let chain: Arc<dyn ChainClient> = client.clone();
    let tracker = DeploymentTracker::new(
        chain.clone(),
        source,
        settings.bounds.deploy_poll_interval(),
        settings.bounds.deploy_timeout(),
    );
    let correlator = TransactionCorrelator::new(chain, settings.bounds.correlation_timeout())
        .with_receipt_poll(settings.bounds.receipt_poll_interval());

    let run = run_command(
        &command,
        party.as_deref(),
        &settings,
        &tracker,
        correlator,
        &accounts,
    );
    tokio::select! {
        result = run => {
            if let Err(e) = &result {
                error!("{} failed: {:#}", command, e);
            }
            result?;
        }
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning {}", command);
        }
    }

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("FX agreement engine stopped");
    Ok(())
}

async fn run_command(
    command: &str,
    party: Option<&str>,
    settings: &Settings,
    tracker: &DeploymentTracker,
    correlator: TransactionCorrelator,
    accounts: &Accounts,
) -> Result<()> {
    match command {
        "accounts" => {
            println!("master  = {:?}", accounts.master);
            println!("party_a = {:?}", accounts.party_a);
            println!("party_b = {:?}", accounts.party_b);
        }
        "bootstrap" => {
            let session = workflow::bootstrap(settings, tracker, correlator, accounts).await?;
            print_record(&session)?;
        }
        "portfolio" => {
            let session = session(settings, tracker, correlator, accounts).await?;
            let outcomes = workflow::run_portfolio(
                &session,
                &settings.portfolio.forwards,
                &settings.bootstrap,
                accounts,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        "balances" => {
            let session = session(settings, tracker, correlator, accounts).await?;
            let lines = workflow::balances(&session, accounts).await?;
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        "permit" => {
            let session = recorded(settings, tracker, correlator)?;
            let granted = workflow::permit_engine(&session, accounts).await?;
            println!("{} permission(s) granted", granted);
        }
        "create" => {
            let session = recorded(settings, tracker, correlator)?;
            let ids = workflow::create_forwards(&session, &settings.portfolio.forwards, accounts)
                .await?;
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            println!("# Record under [deployment]\ncontracts = [{}]", ids.join(", "));
        }
        "register" => {
            let session = recorded(settings, tracker, correlator)?;
            let contracts: Vec<ContractId> =
                recorded_ids(settings, |d| &d.contracts, "contracts")?
                    .into_iter()
                    .map(ContractId::from)
                    .collect();
            let ids = workflow::register_forwards(
                &session,
                &contracts,
                &settings.portfolio.forwards,
                &settings.bootstrap,
                accounts,
            )
            .await?;
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            println!("# Record under [deployment]\nagreements = [{}]", ids.join(", "));
        }
        "sign" | "kill" => {
            let session = recorded(settings, tracker, correlator)?;
            let ids = agreement_ids(settings)?;
            let sender = party_account(accounts, party)?;
            let outcomes = if command == "sign" {
                workflow::sign_agreements(&session, &ids, sender).await?
            } else {
                workflow::kill_agreements(&session, &ids, sender).await?
            };
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        "evaluate" => {
            let session = recorded(settings, tracker, correlator)?;
            let ids = agreement_ids(settings)?;
            let outcomes = workflow::evaluate_agreements(&session, &ids, accounts.party_a).await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        other => anyhow::bail!(
            "Unknown command {}; expected bootstrap, portfolio, balances, accounts, recompile, \
             permit, create, register, sign, kill or evaluate",
            other
        ),
    }
    Ok(())
}

/// Bind the recorded deployment, or bootstrap a fresh one
async fn session(
    settings: &Settings,
    tracker: &DeploymentTracker,
    correlator: TransactionCorrelator,
    accounts: &Accounts,
) -> Result<Session> {
    match &settings.deployment {
        Some(record) => Ok(Session::bind(
            record,
            tracker,
            correlator,
            &settings.bounds,
            &settings.artifacts,
        )?),
        None => {
            info!("No [deployment] recorded, bootstrapping");
            let session = workflow::bootstrap(settings, tracker, correlator, accounts).await?;
            print_record(&session)?;
            Ok(session)
        }
    }
}

/// Bind the recorded deployment; single steps never bootstrap
fn recorded(
    settings: &Settings,
    tracker: &DeploymentTracker,
    correlator: TransactionCorrelator,
) -> Result<Session> {
    let record = settings
        .deployment
        .as_ref()
        .context("No [deployment] recorded; run bootstrap first")?;
    Ok(Session::bind(
        record,
        tracker,
        correlator,
        &settings.bounds,
        &settings.artifacts,
    )?)
}

fn recorded_ids(
    settings: &Settings,
    pick: impl Fn(&DeploymentConfig) -> &Vec<u64>,
    what: &str,
) -> Result<Vec<u64>> {
    let ids = settings.deployment.as_ref().map(pick).cloned().unwrap_or_default();
    if ids.is_empty() {
        anyhow::bail!("No {} recorded under [deployment]", what);
    }
    Ok(ids)
}

fn agreement_ids(settings: &Settings) -> Result<Vec<AgreementId>> {
    Ok(recorded_ids(settings, |d| &d.agreements, "agreements")?
        .into_iter()
        .map(AgreementId::from)
        .collect())
}

fn party_account(accounts: &Accounts, party: Option<&str>) -> Result<ethers::types::Address> {
    match party {
        Some("a") => Ok(accounts.party_a),
        Some("b") => Ok(accounts.party_b),
        other => anyhow::bail!("Expected party a or b, got {:?}", other),
    }
}

fn print_record(session: &Session) -> Result<()> {
    #[derive(Serialize)]
    struct Recorded {
        deployment: DeploymentConfig,
    }

    let record = toml::to_string(&Recorded {
        deployment: session.record(),
    })
    .context("Failed to render deployment")?;
    println!("# Add to the configuration to reuse these contracts\n{}", record);
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fx_agreement_engine=debug,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
