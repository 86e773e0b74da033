//! This module contains the constant pool abstraction through which the
//! instruction mapping resolves class, field and method references.

use crate::{
    bytecode::program::ClassId,
    error::program::{Error, Result},
    value::known::KnownValue,
};

/// A reference to a field of a class, keyed by the owning class and the
/// field's index in that class's own (non-inherited) field list.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FieldRef {
    /// The class that declares the field.
    pub class: ClassId,

    /// The index of the field in the declaring class's field list.
    pub index: usize,
}

/// A reference to a method of a class, keyed by the owning class and the
/// method's index in that class's method list.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MethodRef {
    /// The class against which the call is made.
    pub class: ClassId,

    /// The index of the method in that class's method list.
    pub index: usize,
}

/// A single entry in the constant pool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PoolEntry {
    /// A reference to a class.
    Class(ClassId),

    /// A reference to a field.
    Field(FieldRef),

    /// A reference to a method.
    Method(MethodRef),

    /// A loadable constant value.
    Value(KnownValue),
}

impl PoolEntry {
    /// Gets a short name for the kind of this entry, for error reporting.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Class(_) => "class",
            Self::Field(_) => "field",
            Self::Method(_) => "method",
            Self::Value(_) => "value",
        }
    }
}

/// The constant pool of the input program.
///
/// Entries are resolved by numeric index; requesting an index that does not
/// exist, or an entry of the wrong kind, is an incoherent-program condition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    /// Creates a new, empty constant pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` to the pool, returning the index at which it can be
    /// resolved.
    #[allow(clippy::cast_possible_truncation)] // Pools are far below u16::MAX
    pub fn push(&mut self, entry: PoolEntry) -> u16 {
        self.entries.push(entry);
        (self.entries.len() - 1) as u16
    }

    /// Resolves the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no entry exists at `index`.
    pub fn get(&self, index: u16, pc: u32) -> Result<&PoolEntry> {
        self.entries.get(index as usize).ok_or_else(|| {
            use crate::error::container::Locatable;
            Error::NoSuchPoolEntry { index }.locate(pc)
        })
    }

    /// Resolves the entry at `index` as a class reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry does not exist or is of the wrong kind.
    pub fn class_at(&self, index: u16, pc: u32) -> Result<ClassId> {
        match self.get(index, pc)? {
            PoolEntry::Class(id) => Ok(*id),
            other => Err(self.wrong_kind(index, "class", other, pc)),
        }
    }

    /// Resolves the entry at `index` as a field reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry does not exist or is of the wrong kind.
    pub fn field_at(&self, index: u16, pc: u32) -> Result<FieldRef> {
        match self.get(index, pc)? {
            PoolEntry::Field(field) => Ok(*field),
            other => Err(self.wrong_kind(index, "field", other, pc)),
        }
    }

    /// Resolves the entry at `index` as a method reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry does not exist or is of the wrong kind.
    pub fn method_at(&self, index: u16, pc: u32) -> Result<MethodRef> {
        match self.get(index, pc)? {
            PoolEntry::Method(method) => Ok(*method),
            other => Err(self.wrong_kind(index, "method", other, pc)),
        }
    }

    /// Resolves the entry at `index` as a loadable constant.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry does not exist or is of the wrong kind.
    pub fn value_at(&self, index: u16, pc: u32) -> Result<KnownValue> {
        match self.get(index, pc)? {
            PoolEntry::Value(value) => Ok(*value),
            other => Err(self.wrong_kind(index, "value", other, pc)),
        }
    }

    fn wrong_kind(
        &self,
        index: u16,
        expected: &'static str,
        found: &PoolEntry,
        pc: u32,
    ) -> crate::error::program::LocatedError {
        use crate::error::container::Locatable;
        Error::WrongPoolEntryKind {
            index,
            expected,
            found: found.kind_name(),
        }
        .locate(pc)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bytecode::{
            pool::{ConstantPool, PoolEntry},
            program::ClassId,
        },
        value::known::KnownValue,
    };

    #[test]
    fn can_resolve_an_entry_of_the_right_kind() -> anyhow::Result<()> {
        let mut pool = ConstantPool::new();
        let index = pool.push(PoolEntry::Class(ClassId(7)));

        assert_eq!(pool.class_at(index, 0)?, ClassId(7));
        Ok(())
    }

    #[test]
    fn cannot_resolve_an_entry_of_the_wrong_kind() {
        let mut pool = ConstantPool::new();
        let index = pool.push(PoolEntry::Value(KnownValue::Int(3)));

        pool.class_at(index, 0)
            .expect_err("Resolved a value entry as a class");
    }

    #[test]
    fn cannot_resolve_a_missing_entry() {
        let pool = ConstantPool::new();
        pool.get(0, 0).expect_err("Resolved an entry in an empty pool");
    }
}
