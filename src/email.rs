//! Outbound email capability boundary.
//!
//! Transport (SMTP, OAuth provisioning) lives outside this process; the core
//! only needs one operation. Deployments inject a real sender; the default
//! build ships [`DisabledEmailSender`] so the send tool reports a clear
//! configuration error instead of silently dropping mail.

use anyhow::{bail, Result};
use async_trait::async_trait;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Sender used when no transport is configured; always errors.
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<()> {
        bail!("email transport is not configured")
    }
}
