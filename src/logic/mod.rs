//! Pipeline Logic
//!
//! detection (decoy, integrity) -> correlation/response (containment)
//! -> audit (forensics), coordinated only through the event streams.

pub mod containment;
pub mod decoy;
pub mod events;
pub mod forensics;
pub mod integrity;
