//! This module contains the unit graph: the arena that owns every symbolic
//! execution unit and the frozen call-site states that parameter
//! back-propagation consults.

use std::collections::HashMap;

use crate::{
    bytecode::pool::FieldRef,
    error::execution::{Error, Result},
    unit::{CallSiteId, SEFunction, UnitId},
    value::Expression,
    vm::frame::FrameId,
};

/// The caller's state at the moment a call site was constructed.
///
/// The imperative contexts that build units are dropped once a unit's body
/// is finalized, so the values a callee might later request are frozen here,
/// keyed under the call site. Anything the frozen state cannot answer
/// escalates to a parameter of the caller itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrozenState {
    /// The caller's operand stack at the call, bottom first.
    pub stack: Vec<Expression>,

    /// The local variable values known at the call, keyed by frame and slot.
    ///
    /// For invoke calls this holds both the callee frame's argument slots
    /// and the caller frame's current locals, so that requests propagating
    /// back out of the callee can be answered here.
    pub locals: HashMap<(FrameId, u16), Expression>,

    /// The static field values known at the call.
    pub statics: HashMap<FieldRef, Expression>,

    /// The heap expression threaded to the call, if the caller touched the
    /// heap.
    pub heap: Option<Expression>,
}

/// A call site: the calling unit plus its frozen state.
#[derive(Clone, Debug, PartialEq)]
pub struct CallSite {
    /// The unit whose body contains the call.
    pub caller: UnitId,

    /// The caller's frozen state at the call.
    pub state: FrozenState,
}

/// The arena that owns every unit in a problem.
///
/// Units are addressed by [`UnitId`] and looked up by name for caching and
/// deduplication. Units are never removed: passes that supersede a unit
/// leave the original in place.
#[derive(Clone, Debug, Default)]
pub struct UnitGraph {
    units: Vec<SEFunction>,
    names: HashMap<String, UnitId>,
    sites: Vec<CallSite>,
}

impl UnitGraph {
    /// Creates a new, empty unit graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the unit with the provided `name`, creating it empty if it does
    /// not exist yet.
    pub fn get_or_create(&mut self, name: &str) -> UnitId {
        if let Some(existing) = self.names.get(name) {
            return *existing;
        }
        let id = UnitId(self.units.len());
        self.units.push(SEFunction::new(name));
        self.names.insert(name.to_string(), id);
        id
    }

    /// Gets the identity of the unit with the provided `name`, if one
    /// exists.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<UnitId> {
        self.names.get(name).copied()
    }

    /// Adds a generated unit to the graph directly.
    pub fn insert(&mut self, unit: SEFunction) -> UnitId {
        let id = UnitId(self.units.len());
        self.names.insert(unit.name().to_string(), id);
        self.units.push(unit);
        id
    }

    /// Gets the unit with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no unit with that id exists.
    pub fn unit(&self, id: UnitId) -> Result<&SEFunction> {
        self.units.get(id.0).ok_or_else(|| {
            use crate::error::container::Locatable;
            Error::NoSuchUnit { id: id.0 }.locate(0)
        })
    }

    /// Gets mutable access to the unit with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no unit with that id exists.
    pub fn unit_mut(&mut self, id: UnitId) -> Result<&mut SEFunction> {
        self.units.get_mut(id.0).ok_or_else(|| {
            use crate::error::container::Locatable;
            Error::NoSuchUnit { id: id.0 }.locate(0)
        })
    }

    /// Records a call site, returning its identity.
    pub fn add_site(&mut self, site: CallSite) -> CallSiteId {
        let id = CallSiteId(self.sites.len());
        self.sites.push(site);
        id
    }

    /// Gets the call site with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no call site with that id exists.
    pub fn site(&self, id: CallSiteId) -> Result<&CallSite> {
        self.sites.get(id.0).ok_or_else(|| {
            use crate::error::container::Locatable;
            Error::NoSuchCallSite { id: id.0 }.locate(0)
        })
    }

    /// Gets the number of units in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Checks whether the graph holds no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Gets the identity of every unit in the graph, in creation order.
    #[must_use]
    pub fn ids(&self) -> Vec<UnitId> {
        (0..self.units.len()).map(UnitId).collect()
    }

    /// Gets the identity of every unit whose body calls `callee`.
    #[must_use]
    pub fn callers_of(&self, callee: UnitId) -> Vec<UnitId> {
        self.ids()
            .into_iter()
            .filter(|id| {
                self.units[id.0]
                    .body()
                    .is_some_and(|body| body.call_targets().contains(&callee))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::unit::{CallSite, FrozenState, UnitGraph, UnitId};

    #[test]
    fn get_or_create_deduplicates_by_name() {
        let mut graph = UnitGraph::new();
        let first = graph.get_or_create("m0_b0_f0");
        let second = graph.get_or_create("m0_b0_f0");
        let third = graph.get_or_create("m0_b1_f0");

        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn can_record_and_resolve_call_sites() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let caller = graph.get_or_create("caller");
        let site = graph.add_site(CallSite {
            caller,
            state: FrozenState::default(),
        });

        assert_eq!(graph.site(site)?.caller, caller);
        Ok(())
    }

    #[test]
    fn cannot_resolve_a_missing_unit() {
        let graph = UnitGraph::new();
        graph
            .unit(UnitId(0))
            .expect_err("Resolved a unit in an empty graph");
    }
}
