//! Compiled contract artifacts
//!
//! Artifacts live on disk as `<Name>.abi` (JSON interface) and `<Name>.bin`
//! (hex creation code), the layout solc's `--abi --bin` output produces.

use crate::error::{EngineError, EngineResult};

use ethers::abi::Abi;
use ethers::types::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Interface and creation code of a contract
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: Arc<Abi>,
    pub bytecode: Bytes,
}

/// Hands out compiled artifacts by contract name
pub trait ContractSource: Send + Sync {
    fn abi(&self, name: &str) -> EngineResult<Arc<Abi>>;

    fn bytecode(&self, name: &str) -> EngineResult<Bytes>;

    fn artifact(&self, name: &str) -> EngineResult<ContractArtifact> {
        Ok(ContractArtifact {
            name: name.to_string(),
            abi: self.abi(name)?,
            bytecode: self.bytecode(name)?,
        })
    }
}

/// Artifacts read from a directory
#[derive(Debug, Clone)]
pub struct FsContractSource {
    dir: PathBuf,
}

impl FsContractSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, name: &str, extension: &str) -> EngineResult<String> {
        let path = self.dir.join(format!("{}.{}", name, extension));
        debug!("Reading artifact {:?}", path);
        std::fs::read_to_string(&path).map_err(|e| EngineError::Artifact {
            name: name.to_string(),
            message: format!("cannot read {:?}: {}", path, e),
        })
    }

    /// Run an external compile script, e.g. `./recompile.sh`, in the artifact directory's parent
    pub async fn recompile(&self, script: &str) -> EngineResult<()> {
        let workdir = self.dir.parent().unwrap_or_else(|| Path::new("."));
        info!("Recompiling contracts with {}", script);

        let output = tokio::process::Command::new("bash")
            .arg(script)
            .current_dir(workdir)
            .output()
            .await
            .map_err(|e| EngineError::Artifact {
                name: script.to_string(),
                message: format!("cannot run compile script: {}", e),
            })?;

        if !output.status.success() {
            return Err(EngineError::Artifact {
                name: script.to_string(),
                message: format!(
                    "compile script exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

impl ContractSource for FsContractSource {
    fn abi(&self, name: &str) -> EngineResult<Arc<Abi>> {
        let raw = self.read(name, "abi")?;
        let abi: Abi = serde_json::from_str(&raw).map_err(|e| EngineError::Artifact {
            name: name.to_string(),
            message: format!("invalid ABI: {}", e),
        })?;
        Ok(Arc::new(abi))
    }

    fn bytecode(&self, name: &str) -> EngineResult<Bytes> {
        let raw = self.read(name, "bin")?;
        parse_bytecode(raw.trim()).map_err(|message| EngineError::Artifact {
            name: name.to_string(),
            message,
        })
    }
}

/// Decode hex creation code, with or without a `0x` prefix
fn parse_bytecode(raw: &str) -> Result<Bytes, String> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Err("empty bytecode".to_string());
    }
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| format!("invalid bytecode hex: {}", e))
}
