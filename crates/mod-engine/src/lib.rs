mod normalize;
mod service;

pub use normalize::{normalize, NormalizeOptions, NormalizedMail};
pub use service::{decide, run_mailbox, Action};
