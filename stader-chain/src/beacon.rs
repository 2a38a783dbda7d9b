//! Beacon node REST client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use stader_core::collaborators::{BeaconReader, BeaconValidator, CallError, ValidatorPubkey};
use stader_core::status::BeaconStatus;
use url::Url;

/// Epoch the beacon API reports for events that are not scheduled.
const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Body of `GET /eth/v1/beacon/states/{state}/validators/{id}`.
#[derive(Debug, Deserialize)]
struct ValidatorResponse {
    /// The validator.
    data: ValidatorData,
}

/// Validator entry of a state query. Numbers are decimal strings.
#[derive(Debug, Deserialize)]
struct ValidatorData {
    /// Validator index.
    index: String,
    /// Status string.
    status: String,
    /// Validator record.
    validator: ValidatorRecord,
}

/// Subset of the validator record the client uses.
#[derive(Debug, Deserialize)]
struct ValidatorRecord {
    /// Activation epoch, far future when unscheduled.
    activation_epoch: String,
}

/// Parses a validator state response body.
pub fn parse_validator_response(body: &[u8]) -> Result<BeaconValidator, CallError> {
    let response: ValidatorResponse =
        serde_json::from_slice(body).map_err(CallError::transport)?;
    let data = response.data;

    let status: BeaconStatus = data.status.parse().map_err(CallError::transport)?;
    let index = data.index.parse::<u64>().map_err(CallError::transport)?;
    let activation_epoch = data
        .validator
        .activation_epoch
        .parse::<u64>()
        .map_err(CallError::transport)?;

    Ok(BeaconValidator {
        status,
        index: Some(index),
        activation_epoch: (activation_epoch != FAR_FUTURE_EPOCH).then_some(activation_epoch),
    })
}

/// [`BeaconReader`] over the standard beacon node HTTP API.
#[derive(Clone, Debug)]
pub struct HttpBeaconReader {
    /// HTTP client.
    client: reqwest::Client,
    /// Beacon node base URL.
    base: Url,
}

impl HttpBeaconReader {
    /// Creates a reader for the beacon node at `base`.
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    /// URL of the head-state query for `pubkey`.
    pub fn validator_url(&self, pubkey: &ValidatorPubkey) -> Result<Url, CallError> {
        self.base
            .join(&format!(
                "eth/v1/beacon/states/head/validators/0x{}",
                hex::encode(pubkey)
            ))
            .map_err(CallError::transport)
    }
}

#[async_trait]
impl BeaconReader for HttpBeaconReader {
    async fn validator_status(
        &self,
        pubkey: &ValidatorPubkey,
    ) -> Result<BeaconValidator, CallError> {
        let url = self.validator_url(pubkey)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(CallError::transport)?;

        // Keys the beacon node has not seen a deposit for yet.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BeaconValidator::unknown());
        }

        let body = response
            .error_for_status()
            .map_err(CallError::transport)?
            .bytes()
            .await
            .map_err(CallError::transport)?;
        parse_validator_response(&body)
    }
}
