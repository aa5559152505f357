//! Boundary to the remote inference service.
//!
//! The inference itself happens outside this crate. [`CommandEstimator`]
//! hands each request to an external program as JSON on stdin and reads
//! the estimate text from its stdout.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EstimationConfig;
use crate::encoder::EncodedImage;
use crate::errors::EstimationError;

pub const DEFAULT_PROMPT: &str = "Analyze the food in this image. Provide an estimated total \
     calorie count. If possible, list the food items you identify and their individual calorie \
     estimates. Format the response as plain text, for example: 'Total Estimated Calories: X kcal. \
     Identified items: Item A (Y kcal), Item B (Z kcal).' If you cannot identify food or estimate \
     calories, please state that clearly.";

#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(&self, image: &EncodedImage) -> Result<String, EstimationError>;
}

/// The service credential, read from the environment at startup.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var).ok().and_then(Self::new)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EstimationRequest<'a> {
    mime_type: &'a str,
    data: &'a str,
    model: &'a str,
    prompt: &'a str,
}

pub struct CommandEstimator {
    program: String,
    args: Vec<String>,
    credential_env: String,
    credential: Option<Credential>,
    model: String,
    prompt: String,
}

impl CommandEstimator {
    pub fn new(config: &EstimationConfig, credential: Option<Credential>) -> Self {
        let mut parts = config.command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
            credential_env: config.credential_env.clone(),
            credential,
            model: config.model.clone(),
            prompt: config.prompt.clone(),
        }
    }
}

#[async_trait]
impl Estimator for CommandEstimator {
    async fn estimate(&self, image: &EncodedImage) -> Result<String, EstimationError> {
        let Some(credential) = &self.credential else {
            return Err(EstimationError::ConfigurationMissing);
        };

        let request = serde_json::to_vec(&EstimationRequest {
            mime_type: image.media_type(),
            data: image.payload(),
            model: &self.model,
            prompt: &self.prompt,
        })
        .map_err(|e| EstimationError::Failed(e.to_string()))?;

        log::info!(
            "Requesting estimate from {} ({}, {} bytes)",
            self.program,
            image.media_type(),
            image.payload().len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(&self.credential_env, credential.expose())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EstimationError::Failed(format!("could not start {}: {}", self.program, e)))?;

        // The program may answer (and exit) before reading the whole request,
        // so feed stdin while collecting its output.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request).await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| EstimationError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("Estimator failed with {}: {}", output.status, stderr.trim());
            return Err(classify_failure(&stderr));
        }
        if let Err(e) = fed {
            log::error!("Estimator did not take the full request: {}", e);
            return Err(EstimationError::Failed(e.to_string()));
        }

        parse_estimate(&String::from_utf8_lossy(&output.stdout))
    }
}

fn classify_failure(stderr: &str) -> EstimationError {
    if stderr.contains("API key not valid") {
        EstimationError::InvalidCredential
    } else {
        EstimationError::Failed(stderr.trim().to_string())
    }
}

fn parse_estimate(stdout: &str) -> Result<String, EstimationError> {
    let text = stdout.trim();
    if text.is_empty() {
        Err(EstimationError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}
