//! Deployment tracker implementation

use crate::artifacts::ContractSource;
use crate::chain::{ChainClient, ContractHandle, DeploymentStatus, PendingDeployment};
use crate::error::{EngineError, EngineResult};

use ethers::abi::Token;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Materialises contracts on chain and binds them to their interface
#[derive(Clone)]
pub struct DeploymentTracker {
    client: Arc<dyn ChainClient>,
    source: Arc<dyn ContractSource>,
    poll_interval: Duration,
    deploy_timeout: Duration,
}

impl DeploymentTracker {
    pub fn new(
        client: Arc<dyn ChainClient>,
        source: Arc<dyn ContractSource>,
        poll_interval: Duration,
        deploy_timeout: Duration,
    ) -> Self {
        Self {
            client,
            source,
            poll_interval,
            deploy_timeout,
        }
    }

    /// Deploy `artifact_name` and wait until it has an address.
    ///
    /// Submission failures are returned immediately. Pending polls are not
    /// errors; the wait as a whole is bounded by the deploy timeout.
    pub async fn deploy(
        &self,
        artifact_name: &str,
        constructor_args: &[Token],
        creator: Address,
        gas_limit: U256,
    ) -> EngineResult<ContractHandle> {
        let artifact = self.source.artifact(artifact_name)?;
        let started = Instant::now();

        let pending = match self
            .client
            .deploy(&artifact, constructor_args, creator, gas_limit)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!("Deployment of {} failed at submission: {}", artifact_name, e);
                crate::metrics::record_deployment(artifact_name, "rejected");
                return Err(e);
            }
        };
        info!(
            "{} submitted in {:?}, waiting to be mined",
            artifact_name, pending.submitted_tx
        );

        let address = match timeout(self.deploy_timeout, self.await_address(&pending)).await {
            Ok(Ok(address)) => address,
            Ok(Err(e)) => {
                crate::metrics::record_deployment(artifact_name, "failed");
                return Err(e);
            }
            Err(_) => {
                crate::metrics::record_deployment(artifact_name, "timeout");
                error!(
                    "{} not mined within {:?} (tx {:?})",
                    artifact_name, self.deploy_timeout, pending.submitted_tx
                );
                return Err(EngineError::PendingTimeout {
                    target: artifact_name.to_string(),
                    operation: "deploy".to_string(),
                    waited: self.deploy_timeout,
                });
            }
        };

        crate::metrics::record_deployment(artifact_name, "deployed");
        info!(
            "{} mined at {:?} after {:?}",
            artifact_name,
            address,
            started.elapsed()
        );
        Ok(ContractHandle::new(artifact_name, address, artifact.abi))
    }

    /// Bind an already deployed contract
    pub fn at(&self, artifact_name: &str, address: Address) -> EngineResult<ContractHandle> {
        let abi = self.source.abi(artifact_name)?;
        Ok(ContractHandle::new(artifact_name, address, abi))
    }

    async fn await_address(&self, pending: &PendingDeployment) -> EngineResult<Address> {
        let mut polls: u64 = 0;
        loop {
            match self.client.poll_deployment(pending).await? {
                DeploymentStatus::Deployed(address) => return Ok(address),
                DeploymentStatus::Failed(reason) => {
                    error!("Deployment of {} failed: {}", pending.artifact, reason);
                    return Err(EngineError::Submission {
                        target: pending.artifact.clone(),
                        operation: "deploy".to_string(),
                        reason,
                    });
                }
                DeploymentStatus::Pending => {
                    polls += 1;
                    crate::metrics::record_deploy_pending(&pending.artifact);
                    debug!(
                        "{} waiting to be mined ({} polls)",
                        pending.artifact, polls
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
