//! Notification collaborator interface.
//!
//! Actual delivery (mail relay, chat hook) lives outside this crate. The
//! orchestrator only emits (recipient, subject, body) triples, best-effort:
//! the signature is infallible so a broken relay can never abort the
//! operation that triggered the message.

/// Fire-and-forget user notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &str, subject: &str, body: &str);
}

/// Emits notifications to the log, for deployments where an external
/// process tails the audit log, and as a sane default.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, recipient: &str, subject: &str, body: &str) {
        tracing::info!(recipient, subject, body, "user notification");
    }
}

/// Swallows notifications. For tests and one-off tooling.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _recipient: &str, _subject: &str, _body: &str) {}
}
