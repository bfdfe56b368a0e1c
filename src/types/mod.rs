//! IEC 60870-5-104 type definitions.
//!
//! - `TypeId` - Type identification (M_SP_NA_1, etc.)
//! - `Cot` - Cause of transmission
//! - `Apci` - Application Protocol Control Information
//! - `Asdu` - Application Service Data Unit
//! - `InformationObject` / `InformationElement` - Typed information objects
//! - Quality descriptors, value encodings and binary time formats

mod apci;
mod asdu;
mod cot;
mod elements;
mod object;
mod quality;
mod time;
mod type_id;
mod values;
mod wire;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use elements::*;
pub use object::{catalog_entry, CatalogEntry, InformationElement, InformationObject};
pub use quality::*;
pub use time::*;
pub use type_id::*;
pub use values::*;
