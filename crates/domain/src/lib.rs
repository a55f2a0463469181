//! # sensortag-domain
//!
//! Pure domain model for the sensortag client.
//!
//! ## Responsibilities
//! - Foundational types: peripheral addresses, session generations, error conventions
//! - Define the **SensorTag GATT profile** (service, characteristic and descriptor UUIDs)
//! - Decode raw sensor payloads into physical quantities (**codec**)
//! - Define **readings** handed to consumers
//! - Model the **GATT table** a peripheral exposes after service discovery
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;

pub mod codec;
pub mod gatt;
pub mod peripheral;
pub mod profile;
pub mod reading;
