//! This module contains the heap materializer: the walk that encodes a live
//! object graph into a symbolic heap snapshot before execution starts.
//!
//! The walk is breadth-first: each distinct object or array is assigned a
//! heap address on first encounter and its contents are expanded later from
//! a worklist, so that cyclic object graphs terminate naturally. Fields and
//! elements under a variability annotation become free heap-parameter
//! variables with recorded insert points instead of constants.

use std::collections::{HashMap, VecDeque};

use crate::{
    constant::HEAP_BASE_ADDRESS,
    heap::object::{LiveObject, LiveValue, ObjectHandle, Variability},
    value::{known::KnownValue, types::ValueType, Expression, Variable},
};

/// A callback that writes a solver-produced constant back into the live
/// object graph.
///
/// Insert points with no external effect are valid by design: a solved
/// value that only fed a call-site parameter has nowhere to be written.
#[derive(Clone, Debug)]
pub enum InsertPoint {
    /// Writes into field `index` of an instance.
    Field {
        /// The object to write into.
        object: ObjectHandle,

        /// The field index, in fixed traversal order.
        index: usize,
    },

    /// Writes into element `index` of an array.
    Element {
        /// The array to write into.
        array: ObjectHandle,

        /// The element index.
        index: usize,
    },

    /// A write-back with no external effect.
    NoEffect,
}

impl InsertPoint {
    /// Writes the solved `value` through the insert point.
    pub fn put(&self, value: KnownValue) {
        match self {
            Self::Field { object, index } | Self::Element { array: object, index } => {
                object.borrow_mut().put(*index, value);
            }
            Self::NoEffect => (),
        }
    }
}

/// The result of materializing a live object graph.
#[derive(Clone, Debug)]
pub struct HeapImage {
    /// The symbolic heap snapshot.
    pub heap: Expression,

    /// The next free heap address after the materialized objects.
    pub heapsize: Expression,

    /// The heap address of the root object, as a reference constant.
    pub root: Expression,

    /// The free variables created by variability annotations, each paired
    /// with the insert point that writes its solved value back.
    pub variables: Vec<(Variable, InsertPoint)>,
}

/// The breadth-first encoder from live object graphs to symbolic heap
/// snapshots.
#[derive(Debug, Default)]
pub struct Materializer {
    slots: Vec<Expression>,
    addresses: HashMap<*const std::cell::RefCell<LiveObject>, i64>,
    worklist: VecDeque<(ObjectHandle, i64, Variability)>,
    variables: Vec<(Variable, InsertPoint)>,
}

impl Materializer {
    /// Creates a new materializer with an empty heap.
    #[must_use]
    pub fn new() -> Self {
        let mut materializer = Self::default();
        // Slot 0 is reserved: address 0 is the null reference, and the slot
        // holds the allocation cursor once the walk completes.
        materializer.slots.push(Expression::int(0, 0));
        materializer
    }

    /// Materializes the object graph rooted at `root`, with `variability`
    /// applied at the root.
    ///
    /// Consumes the materializer: each walk encodes one heap.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn materialize(mut self, root: &ObjectHandle, variability: Variability) -> HeapImage {
        let root_address = self.assign_address(root, variability);

        while let Some((handle, address, inherited)) = self.worklist.pop_front() {
            self.expand(&handle, address, inherited);
        }

        let heapsize = self.slots.len() as i64;
        self.slots[0] = Expression::int(0, heapsize as i32);

        HeapImage {
            heap: Expression::snapshot(0, self.slots),
            heapsize: Expression::int(0, heapsize as i32),
            root: Expression::constant(0, KnownValue::Reference(root_address)),
            variables: self.variables,
        }
    }

    /// Assigns a heap address to `handle` on first encounter, reserving its
    /// slots and deferring content expansion to the worklist.
    #[allow(clippy::cast_possible_wrap)]
    fn assign_address(&mut self, handle: &ObjectHandle, inherited: Variability) -> i64 {
        let key = std::rc::Rc::as_ptr(handle);
        if let Some(existing) = self.addresses.get(&key) {
            return *existing;
        }

        let address = self.slots.len() as i64;
        debug_assert!(address >= HEAP_BASE_ADDRESS as i64);
        self.addresses.insert(key, address);

        let slot_count = match &*handle.borrow() {
            LiveObject::Instance { fields, .. } => 1 + fields.len(),
            LiveObject::Array(array) => 2 + array.elements.len(),
        };
        self.slots
            .extend((0..slot_count).map(|_| Expression::int(0, 0)));

        self.worklist.push_back((handle.clone(), address, inherited));
        address
    }

    /// Expands the contents of one object into its reserved slots.
    #[allow(clippy::cast_possible_truncation)]
    fn expand(&mut self, handle: &ObjectHandle, address: i64, inherited: Variability) {
        let object = handle.borrow().clone();
        let base = address as usize;

        match object {
            LiveObject::Instance { type_tag, fields } => {
                self.slots[base] = Expression::int(0, type_tag);
                for (index, field) in fields.iter().enumerate() {
                    let slot = base + crate::constant::FIELD_SLOT_OFFSET + index;
                    let effective = field.variability.effective(inherited);
                    self.slots[slot] = self.encode(
                        &field.value,
                        field.ty,
                        effective,
                        slot,
                        InsertPoint::Field {
                            object: handle.clone(),
                            index,
                        },
                    );
                }
            }
            LiveObject::Array(array) => {
                self.slots[base] = Expression::int(0, array.type_tag);
                self.slots[base + 1] = Expression::int(0, array.elements.len() as i32);
                for (index, element) in array.elements.iter().enumerate() {
                    let slot = base + crate::constant::ELEMENT_SLOT_OFFSET + index;
                    let effective = array.variability.effective(inherited);
                    self.slots[slot] = self.encode(
                        element,
                        array.element_ty,
                        effective,
                        slot,
                        InsertPoint::Element {
                            array: handle.clone(),
                            index,
                        },
                    );
                }
            }
        }
    }

    /// Encodes one field or element value into its slot expression.
    ///
    /// Free primitives become named heap-parameter variables with recorded
    /// insert points. Reference-typed members recurse, except at flat
    /// (non-array) depth where they become free reference parameters whose
    /// write-back has no external effect.
    fn encode(
        &mut self,
        value: &LiveValue,
        ty: ValueType,
        variability: Variability,
        slot: usize,
        insert_point: InsertPoint,
    ) -> Expression {
        match value {
            LiveValue::Primitive(primitive) => {
                if variability.is_free() {
                    let variable = Variable::new(format!("hp{slot}"), ty);
                    self.variables.push((variable.clone(), insert_point));
                    Expression::variable(0, variable)
                } else {
                    Expression::constant(0, *primitive)
                }
            }
            LiveValue::Object(referee) => {
                let is_array = matches!(&*referee.borrow(), LiveObject::Array(_));
                if variability == Variability::Flat && !is_array {
                    let variable = Variable::new(format!("hp{slot}"), ValueType::Reference);
                    self.variables.push((variable.clone(), InsertPoint::NoEffect));
                    return Expression::variable(0, variable);
                }

                // Deep variability keeps propagating; flat does not reach
                // past the object boundary.
                let propagated = match variability {
                    Variability::Deep => Variability::Deep,
                    _ => Variability::Constant,
                };
                let address = self.assign_address(referee, propagated);
                Expression::constant(0, KnownValue::Reference(address))
            }
            LiveValue::Null => Expression::constant(
                0,
                KnownValue::Reference(crate::constant::NULL_REFERENCE_ADDRESS),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        heap::{
            materialize::Materializer,
            object::{LiveArray, LiveField, LiveObject, LiveValue, Variability},
        },
        value::{known::KnownValue, types::ValueType, ExprData, Expression},
    };

    fn int_field(value: i32, variability: Variability) -> LiveField {
        LiveField {
            value: LiveValue::Primitive(KnownValue::Int(value)),
            ty: ValueType::Int,
            variability,
        }
    }

    #[test]
    fn objects_get_a_tag_slot_followed_by_field_slots() {
        let object = LiveObject::Instance {
            type_tag: 3,
            fields: vec![
                int_field(7, Variability::Constant),
                int_field(8, Variability::Constant),
            ],
        }
        .into_handle();

        let image = Materializer::new().materialize(&object, Variability::Constant);

        let ExprData::Snapshot(slots) = image.heap.data() else {
            panic!("Heap is not a snapshot");
        };
        // Reserved slot + tag + two fields.
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[1], Expression::int(0, 3));
        assert_eq!(slots[2], Expression::int(0, 7));
        assert_eq!(slots[3], Expression::int(0, 8));
        assert_eq!(image.root.as_constant(), Some(KnownValue::Reference(1)));
        assert!(image.variables.is_empty());
    }

    #[test]
    fn flat_variability_turns_fields_into_free_variables() {
        let object = LiveObject::Instance {
            type_tag: 1,
            fields: vec![int_field(7, Variability::Flat)],
        }
        .into_handle();

        let image = Materializer::new().materialize(&object, Variability::Constant);

        let ExprData::Snapshot(slots) = image.heap.data() else {
            panic!("Heap is not a snapshot");
        };
        assert!(matches!(slots[2].data(), ExprData::Variable(_)));
        assert_eq!(image.variables.len(), 1);
    }

    #[test]
    fn deep_variability_reaches_nested_objects() {
        let inner = LiveObject::Instance {
            type_tag: 2,
            fields: vec![int_field(5, Variability::Constant)],
        }
        .into_handle();
        let outer = LiveObject::Instance {
            type_tag: 1,
            fields: vec![LiveField {
                value: LiveValue::Object(inner),
                ty: ValueType::Reference,
                variability: Variability::Deep,
            }],
        }
        .into_handle();

        let image = Materializer::new().materialize(&outer, Variability::Constant);

        // The inner object's constant field became free through the deep
        // annotation on the reference that reaches it.
        assert_eq!(image.variables.len(), 1);
    }

    #[test]
    fn arrays_get_tag_length_and_element_slots() {
        let array = LiveObject::Array(LiveArray {
            type_tag: -3,
            element_ty: ValueType::Int,
            variability: Variability::Constant,
            elements: vec![
                LiveValue::Primitive(KnownValue::Int(10)),
                LiveValue::Primitive(KnownValue::Int(20)),
            ],
        })
        .into_handle();

        let image = Materializer::new().materialize(&array, Variability::Constant);

        let ExprData::Snapshot(slots) = image.heap.data() else {
            panic!("Heap is not a snapshot");
        };
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[1], Expression::int(0, -3));
        assert_eq!(slots[2], Expression::int(0, 2));
        assert_eq!(slots[3], Expression::int(0, 10));
        assert_eq!(slots[4], Expression::int(0, 20));
    }

    #[test]
    fn shared_objects_are_materialized_once() {
        let shared = LiveObject::Instance {
            type_tag: 2,
            fields: vec![int_field(1, Variability::Constant)],
        }
        .into_handle();
        let root = LiveObject::Instance {
            type_tag: 1,
            fields: vec![
                LiveField {
                    value: LiveValue::Object(shared.clone()),
                    ty: ValueType::Reference,
                    variability: Variability::Constant,
                },
                LiveField {
                    value: LiveValue::Object(shared),
                    ty: ValueType::Reference,
                    variability: Variability::Constant,
                },
            ],
        }
        .into_handle();

        let image = Materializer::new().materialize(&root, Variability::Constant);

        let ExprData::Snapshot(slots) = image.heap.data() else {
            panic!("Heap is not a snapshot");
        };
        // Reserved + (tag + 2 fields) + (tag + 1 field): the shared object
        // appears exactly once.
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[2], slots[3]);
    }

    #[test]
    fn insert_points_write_back_into_the_live_graph() {
        let object = LiveObject::Instance {
            type_tag: 1,
            fields: vec![int_field(0, Variability::Flat)],
        }
        .into_handle();

        let image = Materializer::new().materialize(&object, Variability::Constant);
        let (_, insert_point) = &image.variables[0];
        insert_point.put(KnownValue::Int(77));

        assert_eq!(object.borrow().get_primitive(0), Some(KnownValue::Int(77)));
    }
}
