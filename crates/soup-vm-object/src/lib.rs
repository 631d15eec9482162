//! # Soup VM object model
//!
//! The uniform representation of every runtime value in the soup VM:
//! tagged machine words, single-word object headers, and a closed family
//! of heap layouts with one pointer-enumeration entry point.
//!
//! ## Design
//!
//! - **One word per value**: the low bit picks immediate small integer
//!   (even) or heap reference (odd, pointing one byte past the header).
//! - **One header word**: flag bits, size in alignment units, class id,
//!   followed by a lazily assigned identity hash word.
//! - **One traversal**: [`object::HeapObject::pointers`] collapses every
//!   kind into an inclusive slot-address range, so the collector and the
//!   snapshot loader never dispatch on kinds.
//!
//! This crate is pure layout arithmetic; the heap, the allocator and the
//! collectors live in `soup-vm-heap`.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod bitfield;
pub mod globals;
pub mod object;
pub mod wellknown;

pub use globals::{
    allocation_size, KB, MB, NEW_OBJECT_ALIGNMENT_OFFSET, OBJECT_ALIGNMENT, OBJECT_ALIGNMENT_LOG2,
    OBJECT_ALIGNMENT_MASK, OLD_OBJECT_ALIGNMENT_OFFSET, SMI_BITS, SMI_MAX, SMI_MIN, WORD_SIZE,
    WORD_SIZE_LOG2,
};
pub use object::{
    Activation, Array, ByteArray, ByteString, Cid, Closure, Ephemeron, Float64, ForwardingCorpse,
    HeapObject, LargeInteger, MediumInteger, ObjectRef, PointerRange, RegularObject, WeakArray,
    WideString,
};
pub use object::{
    ACTIVATION_CID, ARRAY_CID, BYTE_ARRAY_CID, BYTE_STRING_CID, CLOSURE_CID, EPHEMERON_CID,
    FIRST_LEGAL_CID, FIRST_REGULAR_OBJECT_CID, FLOAT64_CID, FORWARDING_CORPSE_CID, ILLEGAL_CID,
    LARGE_INTEGER_CID, MEDIUM_INTEGER_CID, SMI_CID, WEAK_ARRAY_CID, WIDE_STRING_CID,
};
pub use wellknown::{
    AbstractMixin, Behavior, Class, Metaclass, Method, MethodAccess, Message, ObjectStore,
    Scheduler, Thread,
};
