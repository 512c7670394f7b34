//! Etherscan-compatible block explorer client: source verification and ABI lookup.

use std::time::Duration;

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes},
};
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use futures::future::BoxFuture;
use serde::Deserialize;
use url::Url;

use crate::error::ExplorerError;

/// Delay between two `checkverifystatus` requests.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of status checks before giving up on a pending verification.
const STATUS_MAX_CHECKS: usize = 24;

/// Everything an explorer needs to match deployed bytecode to source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub address: Address,
    /// `<source>:<name>`.
    pub contract_name: String,
    /// `v0.8.19+commit.7dd6d404`.
    pub compiler_version: String,
    /// Standard JSON input, serialized.
    pub source: String,
    /// ABI-encoded constructor arguments, exactly as deployed.
    pub constructor_args: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
}

/// Registers contract sources with an explorer.
pub trait SourceVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        request: &'a VerificationRequest,
    ) -> BoxFuture<'a, Result<VerificationOutcome>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

impl ApiResponse {
    fn ok(&self) -> bool {
        self.status == "1"
    }

    fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

enum Status {
    Pending,
    Done(VerificationOutcome),
}

#[derive(Debug, thiserror::Error)]
#[error("verification pending")]
struct StillPending;

/// Client for an Etherscan-compatible API (`module=contract`).
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    api_url: Url,
    api_key: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl ExplorerClient {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_url,
            api_key: api_key.into(),
            client,
            poll_interval: STATUS_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Fetch the verified ABI of a contract.
    pub async fn fetch_abi(&self, address: Address) -> Result<JsonAbi> {
        let address = address.to_string();
        let response = self
            .get(&[
                ("module", "contract"),
                ("action", "getabi"),
                ("address", address.as_str()),
            ])
            .await?;

        if !response.ok() {
            return Err(ExplorerError::Rejected(format!(
                "{}: {}",
                response.message,
                response.result_text()
            ))
            .into());
        }

        serde_json::from_str(&response.result_text()).context("Failed to parse ABI returned by explorer")
    }

    /// Submit sources and return the verification GUID.
    async fn submit(&self, request: &VerificationRequest) -> Result<SubmitResult> {
        let address = request.address.to_string();
        let constructor_args = hex::encode(&request.constructor_args);

        let response: ApiResponse = self
            .client
            .post(self.api_url.clone())
            .query(&[("apikey", self.api_key.as_str())])
            .form(&[
                ("module", "contract"),
                ("action", "verifysourcecode"),
                ("contractaddress", address.as_str()),
                ("sourceCode", request.source.as_str()),
                ("codeformat", "solidity-standard-json-input"),
                ("contractname", request.contract_name.as_str()),
                ("compilerversion", request.compiler_version.as_str()),
                // Misspelling is part of the Etherscan API.
                ("constructorArguements", constructor_args.as_str()),
            ])
            .send()
            .await
            .context("Failed to send verification request")?
            .json()
            .await
            .context("Failed to parse verification response")?;

        let result = response.result_text();
        if response.ok() {
            return Ok(SubmitResult::Guid(result));
        }
        if is_already_verified(&result) {
            return Ok(SubmitResult::AlreadyVerified);
        }

        Err(ExplorerError::Rejected(format!("{}: {}", response.message, result)).into())
    }

    async fn check_status(&self, guid: &str, address: Address) -> Result<Status> {
        let response = self
            .get(&[
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .await?;

        let result = response.result_text();
        tracing::debug!(%address, guid, status = %result, "Verification status");

        if result.starts_with("Pending") {
            return Ok(Status::Pending);
        }
        if is_already_verified(&result) {
            return Ok(Status::Done(VerificationOutcome::AlreadyVerified));
        }
        if response.ok() || result.starts_with("Pass") {
            return Ok(Status::Done(VerificationOutcome::Verified));
        }

        Err(ExplorerError::VerificationFailed {
            address,
            reason: result,
        }
        .into())
    }

    async fn get(&self, query: &[(&str, &str)]) -> Result<ApiResponse> {
        self.client
            .get(self.api_url.clone())
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to send explorer request")?
            .json()
            .await
            .context("Failed to parse explorer response")
    }

    async fn verify_inner(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        let guid = match self.submit(request).await? {
            SubmitResult::AlreadyVerified => return Ok(VerificationOutcome::AlreadyVerified),
            SubmitResult::Guid(guid) => guid,
        };

        tracing::info!(address = %request.address, %guid, "Verification submitted");

        let address = request.address;
        let guid = guid.as_str();
        let check = move || async move {
            match self.check_status(guid, address).await? {
                Status::Pending => Err(anyhow::Error::new(StillPending)),
                Status::Done(outcome) => Ok(outcome),
            }
        };

        let outcome = check
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(STATUS_MAX_CHECKS),
            )
            .when(|e| e.is::<StillPending>())
            .await;

        match outcome {
            Err(e) if e.is::<StillPending>() => Err(ExplorerError::StillPending {
                address,
                attempts: STATUS_MAX_CHECKS + 1,
            }
            .into()),
            other => other,
        }
    }
}

enum SubmitResult {
    Guid(String),
    AlreadyVerified,
}

fn is_already_verified(message: &str) -> bool {
    message.to_lowercase().contains("already verified")
}

impl SourceVerifier for ExplorerClient {
    fn verify<'a>(
        &'a self,
        request: &'a VerificationRequest,
    ) -> BoxFuture<'a, Result<VerificationOutcome>> {
        Box::pin(self.verify_inner(request))
    }
}
