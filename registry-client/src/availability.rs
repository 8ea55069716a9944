//! Registry availability probing.

use std::time::Duration;

use log::trace;

use crate::client::{decode_problem, join_url, RegistryClient};
use crate::error::RegistryError;
use crate::registry::Registry;
use crate::transport::Method;

/// Health of a registry endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AvailabilityStatus {
    /// The registry answers its availability probe.
    Available,
    /// The registry does not serve this client (probe 404 or 501).
    Unavailable,
    /// The probe failed with a server-reported message.
    Error(String),
}

impl RegistryClient {
    /// Probe the health of `registry`, serving cached results within
    /// the TTL.
    ///
    /// Registries without availability support pass trivially. Probe
    /// results are cached whether they succeed or fail; a failed probe
    /// is an actionable short-term fact.
    pub async fn check_availability(
        &self,
        registry: &Registry,
        timeout: Option<Duration>,
    ) -> Result<AvailabilityStatus, RegistryError> {
        if !registry.supports_availability {
            return Ok(AvailabilityStatus::Available);
        }

        if let Some(cached) = self.availability_cache.get(&registry.url).await {
            trace!("serving availability of {} from cache", registry.url);
            return Ok(cached);
        }

        let url = join_url(&registry.url, &["availability"])?;
        let request = self.new_request(Method::Get, url, None, timeout);
        let response = self.transport.execute(request).await?;

        let status = match response.status {
            200 => AvailabilityStatus::Available,
            404 | 501 => AvailabilityStatus::Unavailable,
            code => {
                let detail = decode_problem(&response).and_then(|problem| problem.detail);
                AvailabilityStatus::Error(
                    detail.unwrap_or_else(|| format!("unknown server error ({})", code)),
                )
            }
        };

        self.availability_cache
            .put(registry.url.clone(), status.clone())
            .await;

        Ok(status)
    }

    /// Gate an operation on `registry` being available.
    pub(crate) async fn ensure_available(
        &self,
        registry: &Registry,
        timeout: Option<Duration>,
    ) -> Result<(), RegistryError> {
        match self.check_availability(registry, timeout).await? {
            AvailabilityStatus::Available => Ok(()),
            AvailabilityStatus::Unavailable => {
                Err(RegistryError::RegistryNotAvailable(registry.url.clone()))
            }
            AvailabilityStatus::Error(message) => Err(RegistryError::AvailabilityError {
                registry: registry.url.clone(),
                message,
            }),
        }
    }
}
