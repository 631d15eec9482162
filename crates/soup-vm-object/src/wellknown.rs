//! Regular objects with well-known slot assignments.
//!
//! Behaviors, methods, messages, threads and the object store are plain
//! regular objects to the collector; the interpreter and the analyzer
//! address their slots by the fixed indices below. Slot order is part of
//! the snapshot format and must not be rearranged.

use crate::globals::WORD_SIZE;
use crate::object::{FIRST_REGULAR_OBJECT_CID, HeapObject, ObjectRef, RegularObject};

macro_rules! regular_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name(RegularObject);

        impl $name {
            /// View `obj` under this layout. Any regular object qualifies
            /// structurally; the caller vouches for the actual class.
            pub fn cast(obj: HeapObject) -> $name {
                debug_assert!(obj.class_id() >= FIRST_REGULAR_OBJECT_CID);
                $name(RegularObject::unchecked(obj))
            }
        }

        impl core::ops::Deref for $name {
            type Target = RegularObject;
            fn deref(&self) -> &RegularObject {
                &self.0
            }
        }
    };
}

macro_rules! slot_accessors {
    ($($(#[$meta:meta])* $getter:ident / $setter:ident = $index:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $getter(self) -> ObjectRef {
                self.0.slot($index)
            }

            /// Corresponding slot write.
            pub fn $setter(self, value: ObjectRef) {
                self.0.set_slot($index, value);
            }
        )*
    };
}

/// Does this object have the footprint of a Behavior?
///
/// A bare behavior occupies 8 words; classes and metaclasses occupy 10
/// after alignment (counts include the two header words). The counts are
/// pinned by the allocation sites; nothing else is derived from this check.
pub fn could_be_behavior(obj: HeapObject) -> bool {
    if obj.class_id() < FIRST_REGULAR_OBJECT_CID {
        return false;
    }
    let heap_words = obj.heap_size() / WORD_SIZE;
    heap_words == 8 || heap_words == 10
}

regular_view! {
    /// Describes the layout and method dictionary of a kind of object.
    /// Superclass of Class and Metaclass.
    Behavior
}

impl Behavior {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 6;

    slot_accessors! {
        /// The inherited behavior, or nil at the root.
        superclass / set_superclass = 0;
        /// Method dictionary array.
        methods / set_methods = 1;
        /// The object this behavior is nested in.
        enclosing_object / set_enclosing_object = 2;
        /// The mixin this behavior applies.
        mixin / set_mixin = 3;
        /// The class identifier instances carry (a small integer).
        class_id_slot / set_class_id_slot = 4;
        /// Instance format (a small integer).
        format / set_format = 5;
    }
}

regular_view! {
    /// A named behavior with tracked subclasses.
    Class
}

impl Class {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = Behavior::NUM_SLOTS + 2;

    /// The Behavior slots of this class.
    pub fn behavior(self) -> Behavior {
        Behavior::cast(*self.0)
    }

    slot_accessors! {
        /// Class name (a byte string; nil while uninitialized).
        name / set_name = Behavior::NUM_SLOTS;
        /// Weak array of subclasses.
        subclasses / set_subclasses = Behavior::NUM_SLOTS + 1;
    }
}

regular_view! {
    /// The behavior of a class object itself.
    Metaclass
}

impl Metaclass {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = Behavior::NUM_SLOTS + 1;

    /// The Behavior slots of this metaclass.
    pub fn behavior(self) -> Behavior {
        Behavior::cast(*self.0)
    }

    slot_accessors! {
        /// The class this metaclass describes.
        this_class / set_this_class = Behavior::NUM_SLOTS;
    }
}

regular_view! {
    /// A named bundle of methods, applied by behaviors.
    AbstractMixin
}

impl AbstractMixin {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 3;

    slot_accessors! {
        /// Mixin name (a byte string).
        name / set_name = 0;
        /// Method dictionary array.
        methods / set_methods = 1;
        /// The mixin this one is nested in.
        enclosing_mixin / set_enclosing_mixin = 2;
    }
}

/// Method access mode, decoded from the packed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodAccess {
    /// Callable by anyone.
    Public,
    /// Callable by the defining hierarchy.
    Protected,
    /// Callable by the defining class only.
    Private,
}

regular_view! {
    /// A compiled method: packed header smi, literals, bytecode, owning
    /// mixin, selector and source.
    Method
}

impl Method {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 6;

    slot_accessors! {
        /// Packed header (a small integer; see the bit accessors below).
        header / set_header_slot = 0;
        /// Literal array.
        literals / set_literals = 1;
        /// Bytecode byte array.
        bytecode / set_bytecode = 2;
        /// The mixin the method was defined in.
        mixin / set_mixin = 3;
        /// Selector (a byte string).
        selector / set_selector = 4;
        /// Source text, or nil when stripped.
        source / set_source = 5;
    }

    /// Argument count: packed header bits [0, 8).
    pub fn num_args(self) -> usize {
        (self.header().small_value() as usize) & 255
    }

    /// Temporary count: packed header bits [8, 16).
    pub fn num_temps(self) -> usize {
        ((self.header().small_value() as usize) >> 8) & 255
    }

    /// Primitive number: packed header bits [16, 26); 0 means none.
    pub fn primitive(self) -> usize {
        ((self.header().small_value() as usize) >> 16) & 1023
    }

    /// Access mode: packed header bits [28, 30).
    pub fn access(self) -> MethodAccess {
        match (self.header().small_value() as usize) >> 28 & 3 {
            0 => MethodAccess::Public,
            1 => MethodAccess::Protected,
            2 => MethodAccess::Private,
            mode => panic!("corrupt method access mode {mode}"),
        }
    }

    /// Is the method public?
    pub fn is_public(self) -> bool {
        self.access() == MethodAccess::Public
    }

    /// Is the method protected?
    pub fn is_protected(self) -> bool {
        self.access() == MethodAccess::Protected
    }

    /// Is the method private?
    pub fn is_private(self) -> bool {
        self.access() == MethodAccess::Private
    }
}

regular_view! {
    /// A reified message send, built for `doesNotUnderstand:` and friends.
    Message
}

impl Message {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 2;

    slot_accessors! {
        /// Selector (a byte string).
        selector / set_selector = 0;
        /// Argument array.
        arguments / set_arguments = 1;
    }
}

regular_view! {
    /// A green thread: its suspended activation chain.
    Thread
}

impl Thread {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 1;

    slot_accessors! {
        /// The activation to resume.
        suspended_activation / set_suspended_activation = 0;
    }
}

regular_view! {
    /// The cooperative scheduler. Its slots belong to the interpreter; the
    /// core only moves it.
    Scheduler
}

regular_view! {
    /// The system's well-known constants: nil, the booleans, the
    /// scheduler, per-kind behaviors and the special selectors.
    ObjectStore
}

impl ObjectStore {
    /// Number of named slots.
    pub const NUM_SLOTS: usize = 28;

    slot_accessors! {
        /// Capacity hint for the store array (a small integer).
        array_size / set_array_size = 0;
        /// The nil object.
        nil / set_nil = 1;
        /// The false object.
        false_object / set_false_object = 2;
        /// The true object.
        true_object / set_true_object = 3;
        /// The scheduler.
        scheduler / set_scheduler = 4;
        /// Quick-selector dispatch array.
        quick_selectors / set_quick_selectors = 5;
        /// Selector sent on dispatch failure.
        does_not_understand / set_does_not_understand = 6;
        /// Selector sent on a non-boolean branch.
        must_be_boolean / set_must_be_boolean = 7;
        /// Selector sent on a dead non-local return.
        cannot_return / set_cannot_return = 8;
        /// Selector sent when unwinding through a frame.
        about_to_return_through / set_about_to_return_through = 9;
        /// Selector sent on an unused bytecode.
        unused_bytecode / set_unused_bytecode = 10;
        /// Entry-point selector.
        start / set_start = 11;
        /// Behavior of arrays.
        behavior_array / set_behavior_array = 12;
        /// Behavior of byte arrays.
        behavior_byte_array / set_behavior_byte_array = 13;
        /// Behavior of byte strings.
        behavior_byte_string / set_behavior_byte_string = 14;
        /// Behavior of wide strings.
        behavior_wide_string / set_behavior_wide_string = 15;
        /// Behavior of closures.
        behavior_closure / set_behavior_closure = 16;
        /// Behavior of ephemerons.
        behavior_ephemeron / set_behavior_ephemeron = 17;
        /// Behavior of boxed doubles.
        behavior_float64 / set_behavior_float64 = 18;
        /// Behavior of large integers.
        behavior_large_integer / set_behavior_large_integer = 19;
        /// Behavior of medium integers.
        behavior_medium_integer / set_behavior_medium_integer = 20;
        /// Behavior of messages.
        behavior_message / set_behavior_message = 21;
        /// Behavior of small integers.
        behavior_small_integer / set_behavior_small_integer = 22;
        /// Behavior of threads.
        behavior_thread / set_behavior_thread = 23;
        /// Behavior of weak arrays.
        behavior_weak_array / set_behavior_weak_array = 24;
        /// Behavior of activations.
        behavior_activation / set_behavior_activation = 25;
        /// Behavior of methods.
        behavior_method / set_behavior_method = 26;
        /// Behavior of the scheduler.
        behavior_scheduler / set_behavior_scheduler = 27;
    }
}
