//! Long-running operation tracking.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::time::sleep;

use super::{AzureError, AzureProvider};

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";

/// How the service lets callers follow an accepted request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Tracking {
    /// Status document at the given URL reports `status`.
    AsyncOperation(String),
    /// The given URL answers 202 until the operation completes.
    Location(String),
    /// The response was final.
    Complete,
}

impl Tracking {
    /// Picks the tracking mode advertised by a response. The operation
    /// header wins over `Location` when both are present.
    pub(crate) fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        if let Some(url) = header(ASYNC_OPERATION_HEADER) {
            return Self::AsyncOperation(url);
        }
        let accepted = status == StatusCode::ACCEPTED || status == StatusCode::CREATED;
        header(LOCATION_HEADER)
            .filter(|_| accepted)
            .map_or(Self::Complete, Self::Location)
    }
}

/// Progress reported by a status document or a provisioning state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Progress {
    Running,
    Succeeded,
    Failed { status: String, message: String },
}

impl Progress {
    fn from_state(state: &str, body: &Value) -> Self {
        if state.eq_ignore_ascii_case("succeeded") {
            Self::Succeeded
        } else if state.eq_ignore_ascii_case("failed") || state.eq_ignore_ascii_case("canceled") {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error details reported")
                .to_owned();
            Self::Failed {
                status: state.to_owned(),
                message,
            }
        } else {
            Self::Running
        }
    }

    /// Reads the `status` field of an operation status document.
    pub(crate) fn of_operation(body: &Value) -> Self {
        body.get("status")
            .and_then(Value::as_str)
            .map_or(Self::Running, |state| Self::from_state(state, body))
    }

    /// Reads `properties.provisioningState`. Resources without one are
    /// treated as settled.
    pub(crate) fn of_resource(body: &Value) -> Self {
        body.pointer("/properties/provisioningState")
            .and_then(Value::as_str)
            .map_or(Self::Succeeded, |state| Self::from_state(state, body))
    }
}

/// Instant after which polling gives up, or `None` when `budget` reaches
/// past what the clock can represent. Polling then runs until the operation
/// settles.
fn deadline_after(budget: Duration) -> Option<Instant> {
    Instant::now().checked_add(budget)
}

fn passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|limit| Instant::now() > limit)
}

impl AzureProvider {
    /// Follows `tracking` until the operation settles and returns the last
    /// body seen (`Value::Null` when it was empty).
    pub(super) async fn wait_for_operation(
        &self,
        tracking: Tracking,
        operation: &str,
        resource: &str,
    ) -> Result<Value, AzureError> {
        let deadline = deadline_after(self.operation_timeout);
        loop {
            if passed(deadline) {
                return Err(AzureError::Timeout {
                    operation: operation.to_owned(),
                    resource: resource.to_owned(),
                });
            }

            match &tracking {
                Tracking::Complete => return Ok(Value::Null),
                Tracking::AsyncOperation(url) => {
                    let (_, _, body) = self.get_absolute(url).await?;
                    match Progress::of_operation(&body) {
                        Progress::Succeeded => return Ok(body),
                        Progress::Failed { status, message } => {
                            return Err(AzureError::OperationFailed {
                                resource: resource.to_owned(),
                                status,
                                message,
                            });
                        }
                        Progress::Running => {}
                    }
                }
                Tracking::Location(url) => {
                    let (status, _, body) = self.get_absolute(url).await?;
                    if status != StatusCode::ACCEPTED {
                        return Ok(body);
                    }
                }
            }

            tracing::debug!(operation, resource, "operation still running");
            sleep(self.poll_interval).await;
        }
    }

    /// Fetches the resource at `url` until its provisioning state settles.
    pub(super) async fn wait_for_provisioning(
        &self,
        url: &str,
        resource: &str,
    ) -> Result<Value, AzureError> {
        let deadline = deadline_after(self.operation_timeout);
        loop {
            if passed(deadline) {
                return Err(AzureError::Timeout {
                    operation: String::from("provisioning"),
                    resource: resource.to_owned(),
                });
            }

            let (_, _, body) = self.get_absolute(url).await?;
            match Progress::of_resource(&body) {
                Progress::Succeeded => return Ok(body),
                Progress::Failed { status, message } => {
                    return Err(AzureError::OperationFailed {
                        resource: resource.to_owned(),
                        status,
                        message,
                    });
                }
                Progress::Running => {
                    tracing::debug!(resource, "provisioning still in progress");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }
}
