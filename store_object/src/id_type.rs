//! Id Type module
//!
//! Entity identities are 32-bit integers wrapped in one newtype per entity
//! kind, so an order id can never be passed where a customer id is expected.
//! The value 0 stands for "no identity yet" and binds as NULL.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// Typed identity of one entity kind
pub trait EntityId:
    Copy + Eq + Hash + Debug + Display + Default + Send + Sync + 'static
{
    /// Name of the entity kind, used for nominal comparison
    const KIND: &'static str;

    fn new(value: i32) -> Self;

    fn value(&self) -> i32;

    fn set_value(&mut self, value: i32);

    /// Zero is the null identity
    fn is_null(&self) -> bool {
        self.value() == 0
    }

    /// Kind-tagged form for comparing identities of unknown kind
    fn erase(&self) -> ErasedId {
        ErasedId {
            kind: Self::KIND,
            value: self.value(),
        }
    }
}

/// An identity whose kind is only known at runtime. Two erased ids are
/// equal only when both kind and value match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErasedId {
    pub kind: &'static str,
    pub value: i32,
}

impl ErasedId {
    pub fn is_null(&self) -> bool {
        self.value == 0
    }
}

impl Display for ErasedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Declare a newtype identity implementing [`EntityId`].
///
/// ```rust
/// store_object::entity_id!(pub OrderId);
///
/// use store_object::EntityId;
/// let id = OrderId::new(42);
/// assert_eq!(id.to_string(), "42");
/// assert!(OrderId::default().is_null());
/// ```
#[macro_export]
macro_rules! entity_id {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        $vis struct $name(i32);

        impl $crate::id_type::EntityId for $name {
            const KIND: &'static str = stringify!($name);

            fn new(value: i32) -> Self {
                Self(value)
            }

            fn value(&self) -> i32 {
                self.0
            }

            fn set_value(&mut self, value: i32) {
                self.0 = value;
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::convert::From<i32> for $name {
            fn from(value: i32) -> Self {
                Self(value)
            }
        }

        impl ::std::convert::From<$name> for i32 {
            fn from(id: $name) -> i32 {
                id.0
            }
        }
    };
}
