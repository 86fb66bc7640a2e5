//! IEC 60870-5-104 type definitions.
//!
//! This module contains all the wire-level types for the IEC 104 protocol:
//!
//! - `Apci` - Application Protocol Control Information
//! - `Asdu` - Application Service Data Unit
//! - `TypeId` - Type identification (M_SP_NA_1, etc.)
//! - `Cot` - Cause of transmission
//! - `Element` - Typed information elements
//! - `PointValue` - Register value model

mod apci;
mod asdu;
mod cot;
mod element;
mod type_id;
mod value;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use element::*;
pub use type_id::*;
pub use value::*;
