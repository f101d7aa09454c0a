//! PDF Mailer: stage per-recipient documents and mail them over one SMTP session.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod producer;
