//! Type-safe ASIC object handle wrappers.
//!
//! A handle is a 64-bit opaque id assigned by the ASIC layer. The phantom
//! kind parameter prevents accidental mixing of handle types across the
//! orchestrators' caches.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw ASIC object id (matches the C interface's object id type).
pub type RawAsicObjectId = u64;

/// Marker trait for ASIC object kinds.
pub trait AsicObjectKind: Send + Sync + 'static {
    /// Object type name, for logging.
    fn type_name() -> &'static str;
}

/// A type-safe ASIC object handle.
///
/// The zero id is the null handle; [`AsicObjectId::from_raw`] refuses it so
/// a handle obtained through it is always valid.
#[derive(Clone, Copy)]
pub struct AsicObjectId<T: AsicObjectKind> {
    raw: RawAsicObjectId,
    _marker: PhantomData<T>,
}

impl<T: AsicObjectKind> AsicObjectId<T> {
    /// The null object handle.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates a handle from a raw id; `None` for the null id.
    pub fn from_raw(raw: RawAsicObjectId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Creates a handle from a raw id, allowing null.
    pub const fn from_raw_unchecked(raw: RawAsicObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw id.
    pub const fn as_raw(&self) -> RawAsicObjectId {
        self.raw
    }

    /// Returns true if this is the null handle.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Returns true if this is a valid (non-null) handle.
    pub const fn is_valid(&self) -> bool {
        self.raw != 0
    }
}

impl<T: AsicObjectKind> fmt::Debug for AsicObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:016x})", T::type_name(), self.raw)
    }
}

impl<T: AsicObjectKind> fmt::Display for AsicObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.raw)
    }
}

impl<T: AsicObjectKind> PartialEq for AsicObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: AsicObjectKind> Eq for AsicObjectId<T> {}

impl<T: AsicObjectKind> Hash for AsicObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: AsicObjectKind> Default for AsicObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $oid_alias:ident) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl AsicObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        pub type $oid_alias = AsicObjectId<$name>;
    };
}

// Object kinds used by the orchestration layer.
define_object_kind!(SwitchKind, "Switch", SwitchOid);
define_object_kind!(PortKind, "Port", PortOid);
define_object_kind!(VlanKind, "Vlan", VlanOid);
define_object_kind!(BridgePortKind, "BridgePort", BridgePortOid);
define_object_kind!(NeighborEntryKind, "NeighborEntry", NeighborEntryOid);
define_object_kind!(PolicerKind, "Policer", PolicerOid);
define_object_kind!(HostifTrapKind, "HostifTrap", HostifTrapOid);
define_object_kind!(HostifTrapGroupKind, "HostifTrapGroup", HostifTrapGroupOid);
define_object_kind!(HostifChannelKind, "HostifChannel", HostifChannelOid);
define_object_kind!(DebugCounterKind, "DebugCounter", DebugCounterOid);
define_object_kind!(TunnelKind, "Tunnel", TunnelOid);
define_object_kind!(TunnelMapEntryKind, "TunnelMapEntry", TunnelMapEntryOid);
