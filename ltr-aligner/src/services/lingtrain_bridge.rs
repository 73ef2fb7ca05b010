//! External alignment bridge client
//!
//! Embedding models, conflict detection and plotting run in an external
//! program. Each call spawns it once, writes one JSON request to stdin and
//! reads one JSON response from stdout:
//!
//! ```text
//! request:  {"op": "align", ...payload}
//! response: {"result": ...}  or  {"error": "message"}
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

use super::collaborators::{
    AlignedGroups, AlignmentEngine, AlignmentTask, ConflictChain, ConflictResolver, CorrectParams,
    DetectParams, DetectedConflicts, RenderOptions, ResolveOptions, Visualizer,
};

/// Bridge client errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bridge executable not found in PATH
    #[error("Bridge program not found: {0}")]
    ProgramNotFound(String),

    /// Failed to execute the bridge
    #[error("Failed to execute bridge: {0}")]
    ExecutionError(String),

    /// Bridge exited with a non-zero status
    #[error("Bridge exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    /// Bridge reported an error for the operation
    #[error("Bridge operation '{op}' failed: {message}")]
    OperationFailed { op: String, message: String },

    /// Failed to encode the request or parse the response
    #[error("Failed to parse bridge output: {0}")]
    ParseError(String),
}

#[derive(Serialize)]
struct BridgeRequest<'a, P: Serialize> {
    op: &'a str,
    #[serde(flatten)]
    payload: P,
}

#[derive(Deserialize)]
struct BridgeResponse<T> {
    result: Option<T>,
    error: Option<String>,
}

/// Client for the external `lingtrain-bridge` program
#[derive(Debug, Clone)]
pub struct LingtrainBridge {
    program: String,
    args: Vec<String>,
}

impl LingtrainBridge {
    /// Build from a command line such as `python3 /opt/lingtrain/bridge.py`
    ///
    /// The first word is the program, the rest are passed before every request.
    pub fn new(command: impl AsRef<str>) -> Self {
        let mut words = command.as_ref().split_whitespace().map(str::to_string);
        Self {
            program: words.next().unwrap_or_default(),
            args: words.collect(),
        }
    }

    /// Run one bridge operation
    pub async fn call<P, T>(&self, op: &str, payload: P) -> Result<T, BridgeError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = serde_json::to_vec(&BridgeRequest { op, payload })
            .map_err(|e| BridgeError::ParseError(e.to_string()))?;

        tracing::debug!(op, program = %self.program, bytes = request.len(), "Calling bridge");

        let output = tokio::task::spawn_blocking({
            let program = self.program.clone();
            let args = self.args.clone();

            move || -> std::io::Result<std::process::Output> {
                let mut child = Command::new(&program)
                    .args(&args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;

                // Feed stdin from its own thread while stdout and stderr drain,
                // so neither side blocks on a full pipe
                let writer = child.stdin.take().map(|mut stdin| {
                    std::thread::spawn(move || stdin.write_all(&request))
                });

                let output = child.wait_with_output()?;
                if let Some(writer) = writer {
                    match writer.join() {
                        Ok(Ok(())) => {}
                        // The bridge may exit without reading everything
                        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                        Ok(Err(e)) => return Err(e),
                        Err(_) => {
                            return Err(std::io::Error::other("stdin writer panicked"))
                        }
                    }
                }
                Ok(output)
            }
        })
        .await
        .map_err(|e| BridgeError::ExecutionError(format!("Task join error: {}", e)))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::ProgramNotFound(self.program.clone())
            } else {
                BridgeError::ExecutionError(e.to_string())
            }
        })?;

        if !output.status.success() {
            return Err(BridgeError::ExitStatus {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        parse_response(op, &output.stdout)
    }
}

fn parse_response<T: DeserializeOwned>(op: &str, stdout: &[u8]) -> Result<T, BridgeError> {
    let response: BridgeResponse<T> =
        serde_json::from_slice(stdout).map_err(|e| BridgeError::ParseError(e.to_string()))?;

    if let Some(message) = response.error {
        return Err(BridgeError::OperationFailed {
            op: op.to_string(),
            message,
        });
    }

    response
        .result
        .ok_or_else(|| BridgeError::ParseError(format!("Response to '{}' has no result", op)))
}

#[derive(Serialize)]
struct StorePayload<'a, P: Serialize> {
    store: &'a Path,
    #[serde(flatten)]
    params: P,
}

#[async_trait]
impl AlignmentEngine for LingtrainBridge {
    async fn compute_alignment(&self, task: AlignmentTask) -> anyhow::Result<AlignedGroups> {
        Ok(self.call("align", task).await?)
    }
}

#[async_trait]
impl ConflictResolver for LingtrainBridge {
    async fn detect_conflicts(
        &self,
        store: &Path,
        params: &DetectParams,
    ) -> anyhow::Result<DetectedConflicts> {
        Ok(self
            .call("detect_conflicts", StorePayload { store, params })
            .await?)
    }

    async fn resolve_conflicts(
        &self,
        store: &Path,
        chains: &[ConflictChain],
        options: &ResolveOptions,
    ) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Params<'a> {
            conflicts: &'a [ConflictChain],
            #[serde(flatten)]
            options: &'a ResolveOptions,
        }

        let _: serde_json::Value = self
            .call(
                "resolve_conflicts",
                StorePayload {
                    store,
                    params: Params {
                        conflicts: chains,
                        options,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn correct_conflicts(
        &self,
        store: &Path,
        chains: &[ConflictChain],
        params: &CorrectParams,
    ) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Params<'a> {
            conflicts: &'a [ConflictChain],
            #[serde(flatten)]
            params: &'a CorrectParams,
        }

        let _: serde_json::Value = self
            .call(
                "correct_conflicts",
                StorePayload {
                    store,
                    params: Params {
                        conflicts: chains,
                        params,
                    },
                },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Visualizer for LingtrainBridge {
    async fn render(
        &self,
        store: &Path,
        image: &Path,
        batch_ids: &[u32],
        options: &RenderOptions,
    ) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Params<'a> {
            image: &'a Path,
            batch_ids: &'a [u32],
            #[serde(flatten)]
            options: &'a RenderOptions,
        }

        let _: serde_json::Value = self
            .call(
                "render",
                StorePayload {
                    store,
                    params: Params {
                        image,
                        batch_ids,
                        options,
                    },
                },
            )
            .await?;
        Ok(())
    }
}
