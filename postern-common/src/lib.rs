//! Shared types for the postern deliverability daemon
//!
//! Everything that crosses a process or crate boundary lives here: the
//! normalized [`Address`], the [`DomainClassification`] derived from the
//! delivery configuration, and the three-way [`Verdict`] handed back to the
//! integration layer.

pub mod address;
pub mod domain;
pub mod error;
pub mod logging;
pub mod verdict;

pub use tracing;

pub use self::{
    address::Address,
    domain::{Domain, DomainClassification},
    error::AddressError,
    verdict::{Diagnostic, Resolution, Verdict, VerdictKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
