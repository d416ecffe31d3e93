//! Attaching the webhook backend to a phone number, and detaching it again.

use std::sync::Arc;

use dev_phone_core::{PhoneNumber, PhoneNumberBinding, WebhookUrls};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::provisioner::TeardownReport;
use crate::remote::TelephonyApi;

/// Digits of a phone number, so `+1 (555) 123-4567` matches `+15551234567`.
fn normalize(phone_number: &str) -> String {
    phone_number.chars().filter(char::is_ascii_digit).collect()
}

pub struct WebhookBinder {
    api: Arc<dyn TelephonyApi>,
}

impl WebhookBinder {
    pub fn new(api: Arc<dyn TelephonyApi>) -> Self {
        Self { api }
    }

    /// Refuse to bind over existing webhooks unless `force` is set.
    ///
    /// Webhooks owned by the `owner` session are not a conflict: either they
    /// are exactly `urls`, or they point at a backend an earlier run of the
    /// same session deployed and has since been replaced.
    pub fn check(
        number: &PhoneNumber,
        urls: &WebhookUrls,
        owner: &str,
        force: bool,
    ) -> Result<()> {
        if force || number.urls() == *urls || number.points_at_prefix(owner) {
            return Ok(());
        }
        let configured = number.configured_fields();
        if configured.is_empty() {
            Ok(())
        } else {
            Err(Error::Conflict {
                phone_number: number.phone_number.clone(),
                configured,
            })
        }
    }

    /// The single account number matching `phone_number`.
    pub async fn find_number(&self, phone_number: &str) -> Result<PhoneNumber> {
        let wanted = normalize(phone_number);
        let mut matches: Vec<PhoneNumber> = self
            .api
            .list_phone_numbers()
            .await?
            .into_iter()
            .filter(|n| !wanted.is_empty() && normalize(&n.phone_number) == wanted)
            .collect();
        if matches.len() == 1 {
            Ok(matches.remove(0))
        } else {
            Err(Error::NotFound {
                phone_number: phone_number.to_string(),
                matches: matches.len(),
            })
        }
    }

    /// Point `number`'s webhooks at `urls`, capturing what was there before.
    pub async fn bind(
        &self,
        number: &PhoneNumber,
        urls: WebhookUrls,
        owner: &str,
        force: bool,
    ) -> Result<PhoneNumberBinding> {
        Self::check(number, &urls, owner, force)?;
        if force && !number.configured_fields().is_empty() {
            warn!(
                phone_number = %number.phone_number,
                sms_url = %number.sms_url,
                voice_url = %number.voice_url,
                "Overwriting existing webhooks"
            );
        }
        let binding = PhoneNumberBinding::capture(number, urls);
        self.api.update_phone_number(&number.sid, &binding.urls).await?;
        info!(phone_number = %number.phone_number, "Webhooks bound");
        Ok(binding)
    }

    /// Clear every webhook field. Calling it on an unbound number is a no-op.
    pub async fn unbind(&self, binding: &PhoneNumberBinding) -> Result<()> {
        self.api
            .update_phone_number(&binding.sid, &WebhookUrls::empty())
            .await?;
        info!(phone_number = %binding.phone_number, "Webhooks reset");
        Ok(())
    }

    /// Put a previously unbound binding's URLs back.
    pub async fn restore(&self, binding: &PhoneNumberBinding) -> Result<()> {
        self.api
            .update_phone_number(&binding.sid, &binding.urls)
            .await?;
        info!(phone_number = %binding.phone_number, "Webhooks restored");
        Ok(())
    }

    /// Reset every number whose webhooks point at a backend labeled with
    /// `prefix`. Best-effort.
    pub async fn reset_numbers_pointing_at(&self, prefix: &str) -> TeardownReport {
        let mut report = TeardownReport::default();
        let numbers = match self.api.list_phone_numbers().await {
            Ok(numbers) => numbers,
            Err(e) => {
                warn!(error = %e, "Failed to list phone numbers; skipping webhook reset");
                report.numbers_failed.push(("*".to_string(), e.to_string()));
                return report;
            }
        };
        for number in numbers.into_iter().filter(|n| n.points_at_prefix(prefix)) {
            match self
                .api
                .update_phone_number(&number.sid, &WebhookUrls::empty())
                .await
            {
                Ok(_) => {
                    info!(phone_number = %number.phone_number, "Webhooks reset");
                    report.numbers_reset.push(number.phone_number);
                }
                Err(e) => {
                    warn!(phone_number = %number.phone_number, error = %e, "Failed to reset webhooks");
                    report.numbers_failed.push((number.phone_number, e.to_string()));
                }
            }
        }
        report
    }
}
