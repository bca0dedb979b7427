pub mod dispatch;
pub mod lifecycle;
pub mod orders;
pub mod progression;
pub mod registry;
pub mod scheduler;
pub mod tracking;

#[cfg(test)]
pub(crate) mod test_support;

/// Flips to `true` at shutdown; long scans check it between documents.
pub type CancelSignal = tokio::sync::watch::Receiver<bool>;
