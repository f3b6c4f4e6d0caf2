//! Business logic services
//!
//! The codec is pure and stateless, the sync controller owns the record and
//! talks to the device through a [`crate::device_transport::DeviceTransport`].

pub mod codec;
pub mod sync;
