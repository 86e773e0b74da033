//! This module contains the live object graph that heap materialization
//! walks and that solved values are written back into.
//!
//! The compiler does not perform reflection itself: the client constructs a
//! mirror of the objects it wants constraints solved over, annotating the
//! fields and arrays whose values the solver is free to choose.

use std::{cell::RefCell, rc::Rc};

use crate::value::{known::KnownValue, types::ValueType};

/// A shared, mutable handle to a live object or array.
///
/// Handles are reference-counted so that the object graph can be cyclic and
/// so that insert points can write solved values back into the same objects
/// the client holds.
pub type ObjectHandle = Rc<RefCell<LiveObject>>;

/// The variability annotation of a field or array.
///
/// Variability decides whether a primitive value is materialized as a
/// literal constant or as a free variable the solver may choose.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Variability {
    /// The value is fixed: it materializes as a constant.
    #[default]
    Constant,

    /// The value is free at this field or array only.
    Flat,

    /// The value is free here and in every object reachable from here,
    /// unless explicitly suppressed at an inner field.
    Deep,

    /// Variability propagation from an enclosing [`Self::Deep`] annotation
    /// stops here.
    Suppressed,
}

impl Variability {
    /// Computes the effective variability of a member given the variability
    /// `inherited` from the enclosing object.
    #[must_use]
    pub fn effective(self, inherited: Variability) -> Variability {
        match (self, inherited) {
            (Self::Suppressed, _) => Self::Suppressed,
            (Self::Constant, Self::Deep) => Self::Deep,
            (own, _) => own,
        }
    }

    /// Checks whether a primitive at this variability becomes a free
    /// variable.
    #[must_use]
    pub fn is_free(self) -> bool {
        matches!(self, Self::Flat | Self::Deep)
    }
}

/// A single value held by a field or array element.
#[derive(Clone, Debug)]
pub enum LiveValue {
    /// A primitive value.
    Primitive(KnownValue),

    /// A reference to another live object.
    Object(ObjectHandle),

    /// The null reference.
    Null,
}

/// One field of a live object: its value plus its variability annotation.
#[derive(Clone, Debug)]
pub struct LiveField {
    /// The current value of the field.
    pub value: LiveValue,

    /// The declared type of the field.
    pub ty: ValueType,

    /// The variability annotation of the field.
    pub variability: Variability,
}

/// A live object or array that heap materialization can walk.
#[derive(Clone, Debug)]
pub enum LiveObject {
    /// An instance of a program class.
    Instance {
        /// The runtime type tag of the instance's class.
        type_tag: i32,

        /// The instance's fields, in the fixed traversal order (inherited
        /// fields first).
        fields: Vec<LiveField>,
    },

    /// An array.
    Array(LiveArray),
}

/// A live array: a uniform element type, an element-level variability
/// annotation, and the elements themselves.
#[derive(Clone, Debug)]
pub struct LiveArray {
    /// The runtime type tag of the array.
    pub type_tag: i32,

    /// The element type of the array.
    pub element_ty: ValueType,

    /// The variability applied to every element slot.
    pub variability: Variability,

    /// The elements of the array.
    pub elements: Vec<LiveValue>,
}

impl LiveObject {
    /// Wraps the object into a shared handle.
    #[must_use]
    pub fn into_handle(self) -> ObjectHandle {
        Rc::new(RefCell::new(self))
    }

    /// Gets the runtime type tag of the object.
    #[must_use]
    pub fn type_tag(&self) -> i32 {
        match self {
            Self::Instance { type_tag, .. } => *type_tag,
            Self::Array(array) => array.type_tag,
        }
    }

    /// Writes `value` into field `index` of an instance, or element `index`
    /// of an array.
    ///
    /// Writes to indices that do not exist are ignored: an insert point may
    /// outlive a client-side restructuring of the object, and write-back is
    /// best-effort by design.
    pub fn put(&mut self, index: usize, value: KnownValue) {
        match self {
            Self::Instance { fields, .. } => {
                if let Some(field) = fields.get_mut(index) {
                    field.value = LiveValue::Primitive(value);
                }
            }
            Self::Array(array) => {
                if let Some(element) = array.elements.get_mut(index) {
                    *element = LiveValue::Primitive(value);
                }
            }
        }
    }

    /// Reads the primitive at field or element `index`, if one is there.
    #[must_use]
    pub fn get_primitive(&self, index: usize) -> Option<KnownValue> {
        match self {
            Self::Instance { fields, .. } => match fields.get(index)?.value {
                LiveValue::Primitive(value) => Some(value),
                _ => None,
            },
            Self::Array(array) => match array.elements.get(index)? {
                LiveValue::Primitive(value) => Some(*value),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        heap::object::{LiveField, LiveObject, LiveValue, Variability},
        value::{known::KnownValue, types::ValueType},
    };

    #[test]
    fn deep_variability_propagates_through_constant_members() {
        assert_eq!(
            Variability::Constant.effective(Variability::Deep),
            Variability::Deep
        );
        assert_eq!(
            Variability::Suppressed.effective(Variability::Deep),
            Variability::Suppressed
        );
        assert_eq!(
            Variability::Flat.effective(Variability::Constant),
            Variability::Flat
        );
    }

    #[test]
    fn can_write_a_solved_value_back() {
        let mut object = LiveObject::Instance {
            type_tag: 1,
            fields: vec![LiveField {
                value: LiveValue::Primitive(KnownValue::Int(0)),
                ty: ValueType::Int,
                variability: Variability::Flat,
            }],
        };

        object.put(0, KnownValue::Int(99));
        assert_eq!(object.get_primitive(0), Some(KnownValue::Int(99)));
    }
}
