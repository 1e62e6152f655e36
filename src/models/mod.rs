//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod campaign_model;
pub mod dispatch_model;
pub mod sender_model;
pub mod sequence_model;
pub mod tracking_model;
