//! Ownership transfer model
//!
//! Answers, for one value occurrence, who allocates it, who frees its
//! skeleton and elements after the call, and how long a borrowed view stays
//! valid. Transfer is declared per call-site and direction, never per type:
//! the same record can cross with `none` in one signature and `full` in the
//! next.

use crate::descriptor::TypeDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who owns a marshalled value after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Giver keeps ownership; receiver only borrows
    None,
    /// Receiver owns the skeleton, not the elements
    Container,
    /// Receiver owns everything transitively
    Full,
}

impl TransferMode {
    /// Transfer applied to each element of a container
    pub fn element_mode(self) -> TransferMode {
        match self {
            TransferMode::Full => TransferMode::Full,
            TransferMode::None | TransferMode::Container => TransferMode::None,
        }
    }

    /// Container transfer only makes sense where a skeleton exists
    pub fn applies_to(self, ty: &TypeDescriptor) -> bool {
        self != TransferMode::Container || ty.is_container()
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::None => write!(f, "none"),
            TransferMode::Container => write!(f, "container"),
            TransferMode::Full => write!(f, "full"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TransferMode::None),
            "container" => Ok(TransferMode::Container),
            "full" => Ok(TransferMode::Full),
            other => Err(format!(
                "expected 'none', 'container' or 'full', got '{}'",
                other
            )),
        }
    }
}

/// Direction of a value relative to the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    /// Callee allocates; transfer to caller per mode
    OutCalleeAllocates,
    /// Caller provides storage sized by the descriptor; callee writes into it
    OutCallerAllocates,
    InOut,
}

impl Direction {
    /// Caller supplies a value
    pub fn is_input(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// Caller receives a value
    pub fn is_output(self) -> bool {
        !matches!(self, Direction::In)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::OutCalleeAllocates => write!(f, "out"),
            Direction::OutCallerAllocates => write!(f, "out-caller-allocates"),
            Direction::InOut => write!(f, "inout"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" | "out-callee-allocates" => Ok(Direction::OutCalleeAllocates),
            "out-caller-allocates" | "caller-allocates" => Ok(Direction::OutCallerAllocates),
            "inout" | "in-out" => Ok(Direction::InOut),
            other => Err(format!(
                "expected 'in', 'out', 'out-caller-allocates' or 'inout', got '{}'",
                other
            )),
        }
    }
}

/// How long a value stays readable by the side that does not own it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifetime {
    /// Until the current call returns
    CallDuration,
    /// Until the next boundary call of any kind
    UntilNextCall,
    /// Until the owning object is destroyed or called again
    WhileSourceAlive,
    /// Receiver owns it; no expiry
    Owned,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::CallDuration => write!(f, "call-duration"),
            Lifetime::UntilNextCall => write!(f, "until-next-call"),
            Lifetime::WhileSourceAlive => write!(f, "while-source-alive"),
            Lifetime::Owned => write!(f, "owned"),
        }
    }
}

/// What the caller must free once the call has returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerFrees {
    pub skeleton: bool,
    pub elements: bool,
}

/// Resolved obligations for one value occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    /// A fresh allocation is made on behalf of the receiver
    pub allocates: bool,
    pub caller_frees: CallerFrees,
    /// Callee becomes responsible for releasing (part of) the value
    pub callee_frees: bool,
    /// Caller provides the storage
    pub caller_storage: bool,
    pub lifetime: Lifetime,
}

impl TransferPlan {
    fn owned_copy(caller_storage: bool) -> Self {
        Self {
            allocates: false,
            caller_frees: CallerFrees::default(),
            callee_frees: false,
            caller_storage,
            lifetime: Lifetime::Owned,
        }
    }
}

/// Both halves of an inout occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InOutPlan {
    /// In-rule applied to the old value
    pub release_old: TransferPlan,
    /// Out-rule applied to the new value
    pub acquire_new: TransferPlan,
}

/// Resolve the obligations of a value occurrence
///
/// Value types (scalars, enums, inline records) are copied and never owned.
/// `container` on a leaf pointer type is rejected at registration; if it
/// reaches here it is resolved like `full`, since a leaf is its own skeleton.
pub fn resolve_transfer(direction: Direction, mode: TransferMode, ty: &TypeDescriptor) -> TransferPlan {
    if !ty.is_pointer() {
        return TransferPlan::owned_copy(direction == Direction::OutCallerAllocates);
    }

    let mode = if ty.is_container() || mode != TransferMode::Container {
        mode
    } else {
        TransferMode::Full
    };

    match direction {
        Direction::In => resolve_in(mode),
        Direction::OutCalleeAllocates => resolve_out(mode),
        Direction::OutCallerAllocates => TransferPlan {
            allocates: false,
            caller_frees: CallerFrees {
                skeleton: false,
                elements: mode == TransferMode::Full,
            },
            callee_frees: false,
            caller_storage: true,
            lifetime: Lifetime::Owned,
        },
        Direction::InOut => {
            let both = resolve_inout(mode, ty);
            TransferPlan {
                allocates: both.release_old.allocates || both.acquire_new.allocates,
                caller_frees: both.acquire_new.caller_frees,
                callee_frees: both.release_old.callee_frees,
                caller_storage: false,
                lifetime: both.acquire_new.lifetime,
            }
        }
    }
}

/// Split an inout occurrence into its in-rule and out-rule halves
pub fn resolve_inout(mode: TransferMode, ty: &TypeDescriptor) -> InOutPlan {
    InOutPlan {
        release_old: resolve_transfer(Direction::In, mode, ty),
        acquire_new: resolve_transfer(Direction::OutCalleeAllocates, mode, ty),
    }
}

fn resolve_in(mode: TransferMode) -> TransferPlan {
    match mode {
        TransferMode::None => TransferPlan {
            allocates: true,
            caller_frees: CallerFrees {
                skeleton: true,
                elements: true,
            },
            callee_frees: false,
            caller_storage: false,
            lifetime: Lifetime::CallDuration,
        },
        TransferMode::Container => TransferPlan {
            allocates: true,
            caller_frees: CallerFrees {
                skeleton: false,
                elements: true,
            },
            callee_frees: true,
            caller_storage: false,
            lifetime: Lifetime::CallDuration,
        },
        TransferMode::Full => TransferPlan {
            allocates: true,
            caller_frees: CallerFrees::default(),
            callee_frees: true,
            caller_storage: false,
            lifetime: Lifetime::Owned,
        },
    }
}

fn resolve_out(mode: TransferMode) -> TransferPlan {
    match mode {
        TransferMode::None => TransferPlan {
            allocates: false,
            caller_frees: CallerFrees::default(),
            callee_frees: false,
            caller_storage: false,
            lifetime: Lifetime::WhileSourceAlive,
        },
        TransferMode::Container => TransferPlan {
            allocates: true,
            caller_frees: CallerFrees {
                skeleton: true,
                elements: false,
            },
            callee_frees: false,
            caller_storage: false,
            lifetime: Lifetime::Owned,
        },
        TransferMode::Full => TransferPlan {
            allocates: true,
            caller_frees: CallerFrees {
                skeleton: true,
                elements: true,
            },
            callee_frees: false,
            caller_storage: false,
            lifetime: Lifetime::Owned,
        },
    }
}

impl fmt::Display for TransferPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "allocates:      {}", self.allocates)?;
        writeln!(
            f,
            "caller frees:   skeleton={} elements={}",
            self.caller_frees.skeleton, self.caller_frees.elements
        )?;
        writeln!(f, "callee frees:   {}", self.callee_frees)?;
        writeln!(f, "caller storage: {}", self.caller_storage)?;
        write!(f, "lifetime:       {}", self.lifetime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings() -> TypeDescriptor {
        TypeDescriptor::list(TypeDescriptor::Utf8)
    }

    #[test]
    fn test_in_none_caller_keeps_everything() {
        let plan = resolve_transfer(Direction::In, TransferMode::None, &TypeDescriptor::Utf8);
        assert!(plan.caller_frees.skeleton);
        assert!(plan.caller_frees.elements);
        assert!(!plan.callee_frees);
        assert_eq!(plan.lifetime, Lifetime::CallDuration);
    }

    #[test]
    fn test_in_full_callee_takes_everything() {
        let plan = resolve_transfer(Direction::In, TransferMode::Full, &strings());
        assert_eq!(plan.caller_frees, CallerFrees::default());
        assert!(plan.callee_frees);
    }

    #[test]
    fn test_out_container_frees_skeleton_only() {
        let plan = resolve_transfer(Direction::OutCalleeAllocates, TransferMode::Container, &strings());
        assert!(plan.allocates);
        assert!(plan.caller_frees.skeleton);
        assert!(!plan.caller_frees.elements);
    }

    #[test]
    fn test_out_none_is_borrowed() {
        let plan = resolve_transfer(Direction::OutCalleeAllocates, TransferMode::None, &TypeDescriptor::Utf8);
        assert!(!plan.allocates);
        assert_eq!(plan.caller_frees, CallerFrees::default());
        assert_eq!(plan.lifetime, Lifetime::WhileSourceAlive);
    }

    #[test]
    fn test_caller_allocates_never_allocates() {
        for mode in [TransferMode::None, TransferMode::Container, TransferMode::Full] {
            let plan = resolve_transfer(Direction::OutCallerAllocates, mode, &strings());
            assert!(!plan.allocates);
            assert!(plan.caller_storage);
            assert!(!plan.caller_frees.skeleton);
            assert_eq!(plan.caller_frees.elements, mode == TransferMode::Full);
        }
    }

    #[test]
    fn test_inout_composes_in_then_out() {
        let both = resolve_inout(TransferMode::Full, &TypeDescriptor::Utf8);
        assert!(both.release_old.callee_frees);
        assert!(both.acquire_new.caller_frees.skeleton);

        let plan = resolve_transfer(Direction::InOut, TransferMode::Full, &TypeDescriptor::Utf8);
        assert!(plan.callee_frees);
        assert!(plan.caller_frees.skeleton);
    }

    #[test]
    fn test_value_types_are_copied() {
        let plan = resolve_transfer(Direction::OutCalleeAllocates, TransferMode::Full, &TypeDescriptor::int32());
        assert!(!plan.allocates);
        assert_eq!(plan.lifetime, Lifetime::Owned);
    }

    #[test]
    fn test_container_on_leaf_resolves_as_full() {
        let container = resolve_transfer(Direction::OutCalleeAllocates, TransferMode::Container, &TypeDescriptor::Utf8);
        let full = resolve_transfer(Direction::OutCalleeAllocates, TransferMode::Full, &TypeDescriptor::Utf8);
        assert_eq!(container, full);
        assert!(!TransferMode::Container.applies_to(&TypeDescriptor::Utf8));
    }

    #[test]
    fn test_element_mode() {
        assert_eq!(TransferMode::Container.element_mode(), TransferMode::None);
        assert_eq!(TransferMode::Full.element_mode(), TransferMode::Full);
    }

    #[test]
    fn test_parse_direction_and_mode() {
        assert_eq!("inout".parse::<Direction>(), Ok(Direction::InOut));
        assert_eq!("out".parse::<Direction>(), Ok(Direction::OutCalleeAllocates));
        assert_eq!("FULL".parse::<TransferMode>(), Ok(TransferMode::Full));
        assert!("borrowed".parse::<TransferMode>().is_err());
    }
}
