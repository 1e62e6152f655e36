//! services/mod.rs
//! Módulo que agrupa los componentes del scheduler.

pub mod business_hours;
pub mod campaign_store;
pub mod dispatch_coordinator;
pub mod mail_transport;
pub mod sender_pool;
pub mod sequence_clock;
pub mod template_renderer;
pub mod tracking_ledger;
