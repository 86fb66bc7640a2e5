//! Register table: address-indexed device state.
//!
//! The table is built once from register definitions plus a live value source
//! and then only mutated in place by command handlers. It is the one piece of
//! state shared by all connections, so access goes through the narrow
//! [`RegisterStore`] trait and a single lock.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Iec104Error, Result};
use crate::types::{Element, Ioa, PointValue, TypeId};

/// Structured register address.
///
/// `page` holds the upper two IOA octets and `offset` the lowest one, so the
/// derived ordering is ascending IOA order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub page: u16,
    pub offset: u8,
}

impl Address {
    pub const fn new(page: u16, offset: u8) -> Self {
        Self { page, offset }
    }

    /// Split a 24-bit IOA into page and offset.
    pub const fn from_ioa(ioa: u32) -> Self {
        Self {
            page: ((ioa >> 8) & 0xFFFF) as u16,
            offset: (ioa & 0xFF) as u8,
        }
    }

    /// Join page and offset back into an IOA.
    pub const fn ioa(&self) -> u32 {
        ((self.page as u32) << 8) | self.offset as u32
    }
}

impl From<Ioa> for Address {
    fn from(ioa: Ioa) -> Self {
        Self::from_ioa(ioa.value())
    }
}

impl From<Address> for Ioa {
    fn from(address: Address) -> Self {
        Ioa::new(address.ioa())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.page, self.offset)
    }
}

/// One emulated data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Register {
    /// Unique address
    pub address: Address,
    /// Category, the monitoring or command type id this register reports as
    pub category: TypeId,
    /// Current value
    pub value: PointValue,
    /// Register mirrored by commands written to this one
    pub relation: Option<Address>,
}

impl Register {
    pub fn new(address: Address, category: TypeId, value: PointValue) -> Self {
        Self {
            address,
            category,
            value,
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: Address) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Information element carrying the current value in this register's encoding.
    pub fn element(&self) -> Result<Element> {
        Element::for_category(self.category, &self.value)
    }
}

/// Read/write access to device state.
///
/// Implementations must be safe to share between connection tasks.
pub trait RegisterStore: Send + Sync {
    /// Look up a register.
    fn get_register(&self, address: Address) -> Option<Register>;

    /// Overwrite the value of an existing register.
    fn set_register(&self, address: Address, value: PointValue) -> Result<()>;

    /// All registers of one category, ascending by address.
    fn registers_of_category(&self, category: TypeId) -> Vec<Register>;
}

/// In-memory register table behind a read/write lock.
#[derive(Debug, Default)]
pub struct RegisterTable {
    registers: RwLock<BTreeMap<Address, Register>>,
}

impl RegisterTable {
    /// Build a table, rejecting duplicate addresses and dangling relations.
    pub fn from_registers(registers: impl IntoIterator<Item = Register>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for register in registers {
            element_check(&register)?;
            if map.insert(register.address, register).is_some() {
                return Err(Iec104Error::Register(format!(
                    "duplicate register address {}",
                    register.address
                )));
            }
        }

        for register in map.values() {
            if let Some(relation) = register.relation {
                if !map.contains_key(&relation) {
                    return Err(Iec104Error::Register(format!(
                        "register {} relates to missing register {}",
                        register.address, relation
                    )));
                }
            }
        }

        Ok(Self {
            registers: RwLock::new(map),
        })
    }

    /// Build a table from definitions, resolving value keys through `lookup`.
    ///
    /// A definition's value comes from the live store when its key resolves,
    /// then from its literal value, then from the category's zero value.
    pub fn from_definitions<F>(definitions: &[RegisterDef], lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<PointValue>,
    {
        let registers = definitions
            .iter()
            .map(|def| def.resolve(&lookup))
            .collect::<Result<Vec<_>>>()?;
        Self::from_registers(registers)
    }

    pub fn len(&self) -> usize {
        self.registers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.read().is_empty()
    }

    /// Copy of every register, ascending by address.
    pub fn snapshot(&self) -> Vec<Register> {
        self.registers.read().values().copied().collect()
    }
}

fn element_check(register: &Register) -> Result<()> {
    register.element().map(|_| ()).map_err(|_| {
        Iec104Error::Register(format!(
            "register {} has unsupported category {}",
            register.address,
            register.category.as_u8()
        ))
    })
}

impl RegisterStore for RegisterTable {
    fn get_register(&self, address: Address) -> Option<Register> {
        self.registers.read().get(&address).copied()
    }

    fn set_register(&self, address: Address, value: PointValue) -> Result<()> {
        match self.registers.write().get_mut(&address) {
            Some(register) => {
                register.value = value;
                Ok(())
            }
            None => Err(Iec104Error::UnknownObjectAddress(address.ioa())),
        }
    }

    fn registers_of_category(&self, category: TypeId) -> Vec<Register> {
        self.registers
            .read()
            .values()
            .filter(|r| r.category == category)
            .copied()
            .collect()
    }
}

/// Register definition as found in device templates.
///
/// ```json
/// { "ioa": 5121, "category": 45, "key": "breaker_1", "relation": 1025 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDef {
    /// Information object address
    pub ioa: u32,
    /// Category type id
    pub category: u8,
    /// Key of the value in the live data store
    #[serde(default)]
    pub key: Option<String>,
    /// Literal value used when the key is absent or unresolved
    #[serde(default)]
    pub value: Option<PointValue>,
    /// IOA of the related register
    #[serde(default)]
    pub relation: Option<u32>,
}

impl RegisterDef {
    fn resolve<F>(&self, lookup: &F) -> Result<Register>
    where
        F: Fn(&str) -> Option<PointValue>,
    {
        let category = TypeId::from_u8(self.category).map_err(|_| {
            Iec104Error::Register(format!(
                "register {} has unknown category {}",
                self.ioa, self.category
            ))
        })?;
        if self.ioa > 0x00FF_FFFF {
            return Err(Iec104Error::Register(format!(
                "IOA {} does not fit in three octets",
                self.ioa
            )));
        }

        let value = self
            .key
            .as_deref()
            .and_then(lookup)
            .or(self.value)
            .unwrap_or_else(|| zero_value(category));

        Ok(Register {
            address: Address::from_ioa(self.ioa),
            category,
            value,
            relation: self.relation.map(Address::from_ioa),
        })
    }
}

fn zero_value(category: TypeId) -> PointValue {
    match category {
        TypeId::SinglePoint | TypeId::SingleCommand => PointValue::Bool(false),
        TypeId::MeasuredFloat | TypeId::SetpointFloat => PointValue::Float(0.0),
        _ => PointValue::Int(0),
    }
}
