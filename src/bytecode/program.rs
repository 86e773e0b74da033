//! This module contains the closed-world program model: the classes, fields
//! and methods that participate in the problem being compiled.
//!
//! Dynamic dispatch is modelled without a vtable by materializing it as a
//! case split over every concrete type known to appear in the program, so
//! the program carries an explicit enumeration of its classes, each with a
//! distinct runtime type tag assigned once up front.

use bimap::BiMap;

use crate::{
    bytecode::{
        instruction::MethodBody,
        pool::{ConstantPool, FieldRef, MethodRef},
    },
    error::{
        container::Locatable,
        program::{Error, Result},
    },
    value::types::ValueType,
};

/// The identity of a class within the program.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClassId(pub usize);

/// The identity of a method within the program.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MethodId(pub usize);

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A field declared by a class.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    /// The name of the field.
    pub name: String,

    /// The declared type of the field.
    pub ty: ValueType,
}

/// A method declared by a class.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    /// The name of the method.
    pub name: String,

    /// The class that declares the method.
    pub owner: ClassId,

    /// The declared parameter types, excluding the receiver.
    pub params: Vec<ValueType>,

    /// The declared return type, or [`None`] for void methods.
    pub ret: Option<ValueType>,

    /// Whether the method is static (has no receiver).
    pub is_static: bool,

    /// The disassembled body of the method, if it has one.
    pub body: Option<MethodBody>,
}

/// A class participating in the program.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassInfo {
    /// The name of the class.
    pub name: String,

    /// The superclass, if any.
    pub superclass: Option<ClassId>,

    /// The fields the class itself declares, excluding inherited ones.
    pub fields: Vec<FieldInfo>,

    /// The methods the class itself declares.
    pub methods: Vec<MethodId>,
}

/// The closed-world input program.
///
/// The program is the contract with the disassembler: everything the
/// symbolic executor needs to know about the code being compiled is resolved
/// through it.
#[derive(Clone, Debug, Default)]
pub struct Program {
    classes: Vec<ClassInfo>,
    methods: Vec<MethodInfo>,
    pool: ConstantPool,
    entry_points: Vec<MethodId>,
    type_tags: BiMap<ClassId, i32>,
}

impl Program {
    /// Creates a new, empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class to the program, assigning it the next free runtime type
    /// tag.
    ///
    /// Tags start at 1; tag 0 is never assigned so that a zero-valued tag
    /// slot always means "no object".
    #[allow(clippy::cast_possible_wrap)] // Class counts are far below i32::MAX
    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        superclass: Option<ClassId>,
        fields: Vec<FieldInfo>,
    ) -> ClassId {
        let id = ClassId(self.classes.len());
        self.classes.push(ClassInfo {
            name: name.into(),
            superclass,
            fields,
            methods: Vec::new(),
        });
        self.type_tags.insert(id, self.classes.len() as i32);
        id
    }

    /// Adds a method to the program under the class `owner`.
    pub fn add_method(&mut self, owner: ClassId, mut method: MethodInfo) -> MethodId {
        let id = MethodId(self.methods.len());
        method.owner = owner;
        self.methods.push(method);
        if let Some(class) = self.classes.get_mut(owner.0) {
            class.methods.push(id);
        }
        id
    }

    /// Marks `method` as a constraint entry point.
    pub fn add_entry_point(&mut self, method: MethodId) {
        self.entry_points.push(method);
    }

    /// Gets mutable access to the constant pool, for program construction.
    pub fn pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    /// Gets the constant pool of the program.
    #[must_use]
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// Gets the constraint entry points of the program, in declaration order.
    #[must_use]
    pub fn entry_points(&self) -> &[MethodId] {
        &self.entry_points
    }

    /// Gets the class with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the class does not exist in the program.
    pub fn class(&self, id: ClassId) -> Result<&ClassInfo> {
        self.classes.get(id.0).ok_or_else(|| {
            Error::NoSuchClass {
                name: format!("#{}", id.0),
            }
            .locate(0)
        })
    }

    /// Gets the method with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the method does not exist in the program.
    pub fn method(&self, id: MethodId) -> Result<&MethodInfo> {
        self.methods.get(id.0).ok_or_else(|| {
            Error::NoSuchMethod {
                class: String::new(),
                method: format!("#{}", id.0),
            }
            .locate(0)
        })
    }

    /// Gets the runtime type tag of the class `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the class does not exist in the program.
    pub fn type_tag(&self, id: ClassId) -> Result<i32> {
        self.type_tags.get_by_left(&id).copied().ok_or_else(|| {
            Error::NoSuchClass {
                name: format!("#{}", id.0),
            }
            .locate(0)
        })
    }

    /// Gets the class that carries the runtime type `tag`, if one exists.
    #[must_use]
    pub fn class_for_tag(&self, tag: i32) -> Option<ClassId> {
        self.type_tags.get_by_right(&tag).copied()
    }

    /// Gets every field of the class `id` in the fixed traversal order:
    /// inherited fields first (root-most superclass outward), then the
    /// class's own fields.
    ///
    /// The position of a field in this list is its slot index past the type
    /// tag on the symbolic heap.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the class or one of its ancestors does not exist.
    pub fn all_fields(&self, id: ClassId) -> Result<Vec<(FieldRef, &FieldInfo)>> {
        let mut chain = vec![id];
        let mut current = self.class(id)?;
        while let Some(superclass) = current.superclass {
            chain.push(superclass);
            current = self.class(superclass)?;
        }

        let mut fields = Vec::new();
        for class_id in chain.into_iter().rev() {
            let class = self.class(class_id)?;
            for (index, field) in class.fields.iter().enumerate() {
                fields.push((
                    FieldRef {
                        class: class_id,
                        index,
                    },
                    field,
                ));
            }
        }
        Ok(fields)
    }

    /// Gets the heap slot index (past the type tag) at which the field
    /// `field` lives in instances of class `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the field is not found in the instance class or its
    /// ancestors.
    pub fn field_slot(&self, instance: ClassId, field: FieldRef) -> Result<usize> {
        let fields = self.all_fields(instance)?;
        fields
            .iter()
            .position(|(candidate, _)| *candidate == field)
            .ok_or_else(|| {
                let class = self
                    .classes
                    .get(instance.0)
                    .map_or_else(|| format!("#{}", instance.0), |c| c.name.clone());
                let name = self
                    .classes
                    .get(field.class.0)
                    .and_then(|c| c.fields.get(field.index))
                    .map_or_else(|| format!("#{}", field.index), |f| f.name.clone());
                Error::NoSuchField { class, field: name }.locate(0)
            })
    }

    /// Resolves the method that a call to `method_ref` dispatches to on an
    /// instance of class `receiver`, walking up the superclass chain.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no implementation exists anywhere in the chain.
    pub fn resolve_method(&self, receiver: ClassId, method_ref: MethodRef) -> Result<MethodId> {
        let target = self.method_name(method_ref)?;

        let mut current = Some(receiver);
        while let Some(class_id) = current {
            let class = self.class(class_id)?;
            for candidate in &class.methods {
                if self.methods[candidate.0].name == target {
                    return Ok(*candidate);
                }
            }
            current = class.superclass;
        }

        Err(Error::NoSuchMethod {
            class: self.class(receiver)?.name.clone(),
            method: target,
        }
        .locate(0))
    }

    /// Gets every concrete class in the program on which a call to
    /// `method_ref` can resolve, paired with the implementation it resolves
    /// to, ordered by runtime type tag.
    ///
    /// This is the closed-world enumeration that the dispatch lowering turns
    /// into a chain of type-tag-guarded conditionals.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if class metadata is inconsistent.
    pub fn implementations(&self, method_ref: MethodRef) -> Result<Vec<(ClassId, MethodId)>> {
        let mut implementations = Vec::new();
        for index in 0..self.classes.len() {
            let class_id = ClassId(index);
            if !self.is_subtype(class_id, method_ref.class)? {
                continue;
            }
            if let Ok(method) = self.resolve_method(class_id, method_ref) {
                implementations.push((class_id, method));
            }
        }
        Ok(implementations)
    }

    /// Checks whether `candidate` is `ancestor` or one of its subclasses.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if class metadata is inconsistent.
    pub fn is_subtype(&self, candidate: ClassId, ancestor: ClassId) -> Result<bool> {
        let mut current = Some(candidate);
        while let Some(class_id) = current {
            if class_id == ancestor {
                return Ok(true);
            }
            current = self.class(class_id)?.superclass;
        }
        Ok(false)
    }

    /// Gets the identity of the method referenced by `method_ref`, without
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the reference points outside the program.
    pub fn method_at(&self, method_ref: MethodRef) -> Result<MethodId> {
        let class = self.class(method_ref.class)?;
        class.methods.get(method_ref.index).copied().ok_or_else(|| {
            Error::NoSuchMethod {
                class: class.name.clone(),
                method: format!("#{}", method_ref.index),
            }
            .locate(0)
        })
    }

    /// Gets the name of the method referenced by `method_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the reference points outside the program.
    pub fn method_name(&self, method_ref: MethodRef) -> Result<String> {
        let class = self.class(method_ref.class)?;
        let method_id = class.methods.get(method_ref.index).ok_or_else(|| {
            Error::NoSuchMethod {
                class: class.name.clone(),
                method: format!("#{}", method_ref.index),
            }
            .locate(0)
        })?;
        Ok(self.methods[method_id.0].name.clone())
    }

    /// Gets the number of classes in the program.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bytecode::{
            pool::{FieldRef, MethodRef},
            program::{FieldInfo, MethodInfo, Program},
        },
        value::types::ValueType,
    };

    fn int_field(name: &str) -> FieldInfo {
        FieldInfo {
            name: name.into(),
            ty: ValueType::Int,
        }
    }

    fn method(name: &str) -> MethodInfo {
        MethodInfo {
            name: name.into(),
            owner: crate::bytecode::program::ClassId(0),
            params: vec![],
            ret: Some(ValueType::Int),
            is_static: false,
            body: None,
        }
    }

    #[test]
    fn inherited_fields_come_before_own_fields() -> anyhow::Result<()> {
        let mut program = Program::new();
        let base = program.add_class("Base", None, vec![int_field("a")]);
        let derived = program.add_class("Derived", Some(base), vec![int_field("b")]);

        let fields = program.all_fields(derived)?;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].1.name, "a");
        assert_eq!(fields[1].1.name, "b");
        assert_eq!(
            program.field_slot(derived, FieldRef { class: base, index: 0 })?,
            0
        );
        assert_eq!(
            program.field_slot(
                derived,
                FieldRef {
                    class: derived,
                    index: 0
                }
            )?,
            1
        );
        Ok(())
    }

    #[test]
    fn dispatch_resolves_through_the_superclass_chain() -> anyhow::Result<()> {
        let mut program = Program::new();
        let base = program.add_class("Base", None, vec![]);
        let derived = program.add_class("Derived", Some(base), vec![]);
        let base_method = program.add_method(base, method("check"));
        let override_method = program.add_method(derived, method("check"));

        let method_ref = MethodRef {
            class: base,
            index: 0,
        };
        assert_eq!(program.resolve_method(base, method_ref)?, base_method);
        assert_eq!(program.resolve_method(derived, method_ref)?, override_method);

        let implementations = program.implementations(method_ref)?;
        assert_eq!(implementations.len(), 2);
        Ok(())
    }

    #[test]
    fn type_tags_are_distinct_and_start_at_one() -> anyhow::Result<()> {
        let mut program = Program::new();
        let first = program.add_class("A", None, vec![]);
        let second = program.add_class("B", None, vec![]);

        assert_eq!(program.type_tag(first)?, 1);
        assert_eq!(program.type_tag(second)?, 2);
        assert_eq!(program.class_for_tag(2), Some(second));
        Ok(())
    }
}
