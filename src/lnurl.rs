// SPDX-License-Identifier: AGPL-3.0-or-later

//! LNURL-pay resolution for `name@domain` Lightning addresses.
//!
//! Two GETs per resolution: the well-known lnurlp descriptor, then the
//! callback with the amount in millisats. An `{"status":"ERROR"}` body at
//! either step fails the request with the upstream's reason.

use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct LnurlPayDescriptor {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    callback: Option<String>,
    #[serde(default, rename = "minSendable")]
    min_sendable: Option<u64>,
    #[serde(default, rename = "maxSendable")]
    max_sendable: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LnurlPayInvoice {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    pr: Option<String>,
}

/// Resolver for LNURL-pay addresses.
pub struct LnurlClient {
    http: reqwest::Client,
    scheme: &'static str,
}

impl LnurlClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: "https",
        }
    }

    /// A resolver that speaks plain HTTP, for tests against a local server.
    #[cfg(test)]
    fn over_http() -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: "http",
        }
    }

    /// Resolve `name@domain` into a bolt11 invoice for `amount_msat`.
    pub async fn resolve_address(
        &self,
        address: &str,
        amount_msat: u64,
    ) -> Result<String, AppError> {
        let (name, domain) = split_address(address)?;

        let descriptor_url = format!(
            "{}://{domain}/.well-known/lnurlp/{name}",
            self.scheme
        );
        let descriptor: LnurlPayDescriptor = self.get_json(&descriptor_url).await?;
        if let Some(reason) = upstream_error(&descriptor.status, &descriptor.reason) {
            return Err(AppError::connection_bad_request(format!(
                "lightning address rejected: {reason}"
            )));
        }

        let callback = descriptor.callback.ok_or_else(|| {
            AppError::connection_bad_request("lnurlp descriptor has no callback")
        })?;

        if let Some(min) = descriptor.min_sendable {
            if amount_msat < min {
                return Err(AppError::validation(format!(
                    "amount below the recipient's minimum of {min} msat"
                )));
            }
        }
        if let Some(max) = descriptor.max_sendable {
            if amount_msat > max {
                return Err(AppError::validation(format!(
                    "amount above the recipient's maximum of {max} msat"
                )));
            }
        }

        let separator = if callback.contains('?') { '&' } else { '?' };
        let invoice_url = format!("{callback}{separator}amount={amount_msat}");
        let invoice: LnurlPayInvoice = self.get_json(&invoice_url).await?;
        if let Some(reason) = upstream_error(&invoice.status, &invoice.reason) {
            return Err(AppError::connection_bad_request(format!(
                "lightning address rejected: {reason}"
            )));
        }

        invoice
            .pr
            .filter(|pr| !pr.trim().is_empty())
            .ok_or_else(|| {
                AppError::connection_bad_request("lnurlp callback returned no invoice")
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                AppError::connection_bad_request(format!("lnurl request failed: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(AppError::connection_bad_request(format!(
                "lnurl endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::connection_bad_request(format!("invalid lnurl response: {e}")))
    }
}

impl Default for LnurlClient {
    fn default() -> Self {
        Self::new()
    }
}

fn split_address(address: &str) -> Result<(&str, &str), AppError> {
    let trimmed = address.trim();
    let mut parts = trimmed.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(domain), None) if !name.is_empty() && !domain.is_empty() => {
            Ok((name, domain))
        }
        _ => Err(AppError::validation(format!(
            "not a lightning address: {address}"
        ))),
    }
}

fn upstream_error(status: &Option<String>, reason: &Option<String>) -> Option<String> {
    if status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("ERROR")) {
        Some(
            reason
                .clone()
                .unwrap_or_else(|| "no reason given".to_string()),
        )
    } else {
        None
    }
}
