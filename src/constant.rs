//! This module contains constants that are needed throughout the codebase.

/// The maximum depth of the operand stack in a single frame.
///
/// This matches the limit that class-file verification places on a method's
/// declared `max_stack`.
pub const MAXIMUM_STACK_DEPTH: usize = 65_535;

/// The maximum number of local variable slots in a single frame.
pub const MAXIMUM_LOCAL_SLOTS: usize = 65_535;

/// The number of heap slots that precede the fields of an object.
///
/// Every object on the symbolic heap starts with a runtime type tag slot, so
/// field `i` of an object at address `a` lives at `a + FIELD_SLOT_OFFSET + i`.
pub const FIELD_SLOT_OFFSET: usize = 1;

/// The number of heap slots that precede the elements of an array.
///
/// Every array on the symbolic heap starts with a runtime type tag slot
/// followed by a length slot, so element `i` of an array at address `a` lives
/// at `a + ELEMENT_SLOT_OFFSET + i`.
pub const ELEMENT_SLOT_OFFSET: usize = 2;

/// The value pushed by the `G`-variant floating point comparisons when either
/// operand is a constant NaN.
pub const NAN_COMPARISON_GREATER_SENTINEL: i32 = 1;

/// The value pushed by the `L`-variant floating point comparisons when either
/// operand is a constant NaN.
pub const NAN_COMPARISON_LESS_SENTINEL: i32 = -1;

/// The default number of times the cheap reduction-round sequence is repeated
/// in search of a local fixed point.
pub const DEFAULT_REDUCTION_ROUNDS: usize = 3;

/// The default depth to which strongly recursive units are unrolled.
pub const DEFAULT_RECURSION_UNROLL_DEPTH: usize = 2;

/// The multiplier applied to the number of discovered units to size the step
/// budget for the transformation pipeline's graph traversals.
pub const STEP_BUDGET_UNIT_MULTIPLIER: usize = 160;

/// The default number of loop iterations the compiler will wait before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The symbolic heap address that represents the null reference.
pub const NULL_REFERENCE_ADDRESS: i64 = 0;

/// The first symbolic heap address at which objects are materialized.
///
/// Address zero is reserved for the null reference.
pub const HEAP_BASE_ADDRESS: usize = 1;
