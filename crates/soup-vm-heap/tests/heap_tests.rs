//! Heap integration tests: allocation, walking, scavenging, compaction,
//! weak references and ephemerons.
//!
//! Tests root objects through a shared [`Handles`] list registered on the
//! heap, then re-read the rewritten references after each collection the
//! way an embedder would.

use std::collections::{BTreeMap, HashSet, VecDeque};

use soup_vm_heap::{Handles, Heap, HeapConfig};
use soup_vm_object::*;

fn test_heap() -> (Heap, Handles) {
    let mut heap = Heap::new();
    let handles = Handles::new();
    heap.register_roots(Box::new(handles.clone()));
    (heap, handles)
}

fn as_object(reference: ObjectRef) -> HeapObject {
    // SAFETY: tests only pass references rooted across collections.
    unsafe { HeapObject::from_ref(reference) }
}

fn as_array(reference: ObjectRef) -> Array {
    Array::cast(as_object(reference))
}

fn slot_value(slot_addr: usize) -> ObjectRef {
    // SAFETY: slot addresses come from pointer enumeration of live objects.
    unsafe { object::load_ref(slot_addr) }
}

// ===========================================================================
// Small integers (S1)
// ===========================================================================

#[test]
fn small_integer_round_trip() {
    for value in [0isize, 1, -1, SMI_MAX, SMI_MIN] {
        let encoded = ObjectRef::small(value);
        assert_eq!(encoded.raw() & 1, 0, "smi tag is the low bit clear");
        assert_eq!(encoded.small_value(), value);
    }
    assert_eq!(ObjectRef::small(SMI_MAX).raw(), (SMI_MAX as usize) << 1);
}

#[test]
fn small_integer_sweep_round_trips() {
    for value in (-1000..1000).chain([SMI_MAX - 1, SMI_MIN + 1]) {
        assert_eq!(ObjectRef::small(value).small_value(), value);
    }
}

// ===========================================================================
// Allocation and walking (S2)
// ===========================================================================

#[test]
fn allocate_and_walk() {
    let (mut heap, _handles) = test_heap();
    let array = heap.new_array(3);
    for index in 0..3 {
        array.set_element(index, ObjectRef::small(index as isize + 1));
    }

    let mut visited = Vec::new();
    heap.walk(|object| visited.push(object));

    // The walk sees the bootstrap nil and the array, nothing else.
    assert_eq!(visited.len(), 2);
    let arrays: Vec<_> = visited.iter().filter(|o| o.class_id() == ARRAY_CID).collect();
    assert_eq!(arrays.len(), 1);
    let walked = *arrays[0];
    assert_eq!(walked.addr(), HeapObject::from(array).addr());

    assert_eq!(walked.pointers().len(), 3);
    assert!(walked.heap_size() >= allocation_size(2 * WORD_SIZE + 4 * WORD_SIZE));
}

#[test]
fn allocated_objects_report_their_class_and_tag() {
    let (mut heap, _handles) = test_heap();
    let array = heap.new_array(2).as_ref();
    let string = heap.new_byte_string(b"abc").as_ref();
    let mint = heap.new_medium_integer(-5).as_ref();
    for (reference, cid) in [(array, ARRAY_CID), (string, BYTE_STRING_CID), (mint, MEDIUM_INTEGER_CID)] {
        assert!(reference.is_heap_object());
        assert!(reference.is_new_object());
        assert_eq!(as_object(reference).class_id(), cid);
    }
}

#[test]
fn walk_visits_every_object_exactly_once() {
    let (mut heap, handles) = test_heap();
    let mut expected = 1; // bootstrap nil
    for length in 0..10 {
        handles.push(heap.new_array(length).as_ref());
        expected += 1;
    }
    let mut seen = HashSet::new();
    heap.walk(|object| {
        assert_ne!(object.class_id(), FORWARDING_CORPSE_CID);
        assert!(seen.insert(object.addr()), "object visited twice");
    });
    assert_eq!(seen.len(), expected);

    heap.scavenge();
    let mut seen = HashSet::new();
    heap.walk(|object| {
        assert_ne!(object.class_id(), FORWARDING_CORPSE_CID);
        assert!(seen.insert(object.addr()));
    });
    assert_eq!(seen.len(), expected, "the walk after a scavenge sees the survivors");
}

// ===========================================================================
// Identity hashes
// ===========================================================================

#[test]
fn identity_hash_is_nonzero_and_stable() {
    let (mut heap, handles) = test_heap();
    let slot = handles.push(heap.new_array(1).as_ref());

    let first = heap.identity_hash(handles.get(slot));
    assert_ne!(first.small_value(), 0);
    assert_eq!(heap.identity_hash(handles.get(slot)), first);

    heap.scavenge();
    assert_eq!(heap.identity_hash(handles.get(slot)), first, "hash survives a move");
    heap.scavenge();
    heap.mark_compact();
    assert_eq!(heap.identity_hash(handles.get(slot)), first, "hash survives promotion and compaction");
}

#[test]
fn distinct_objects_get_distinct_hashes() {
    let (mut heap, handles) = test_heap();
    let mut hashes = HashSet::new();
    for _ in 0..64 {
        let reference = heap.new_array(0).as_ref();
        handles.push(reference);
        hashes.insert(heap.identity_hash(reference).small_value());
    }
    assert!(hashes.len() >= 60, "xorshift hashes should essentially never collide here");
}

#[test]
fn string_content_hash_is_cached_and_move_stable() {
    let (mut heap, handles) = test_heap();
    let salt = heap.string_hash_salt();
    let slot = handles.push(heap.new_byte_string(b"selector").as_ref());

    let hash = ByteString::cast(as_object(handles.get(slot))).ensure_hash(salt);
    assert_ne!(hash.small_value(), 0);

    heap.scavenge();
    let moved = ByteString::cast(as_object(handles.get(slot)));
    assert_eq!(moved.hash(), hash, "content hash travels with the payload");
    assert_eq!(moved.ensure_hash(salt), hash);
}

// ===========================================================================
// Scavenging (S3, S6)
// ===========================================================================

#[test]
fn scavenge_preserves_a_cycle() {
    let (mut heap, handles) = test_heap();
    let a = heap.new_array(1);
    let b = heap.new_array(1);
    a.set_element(0, b.as_ref());
    b.set_element(0, a.as_ref());
    let slot = handles.push(a.as_ref());

    let hash_a = heap.identity_hash(a.as_ref());
    let hash_b = heap.identity_hash(b.as_ref());

    heap.scavenge();

    let a2 = as_array(handles.get(slot));
    let b2 = as_array(a2.element(0));
    assert_eq!(b2.element(0), a2.as_ref(), "cycle closes on the new addresses");
    assert_eq!(heap.identity_hash(a2.as_ref()), hash_a);
    assert_eq!(heap.identity_hash(b2.as_ref()), hash_b);
}

#[test]
fn roots_observe_forwarded_addresses_not_corpses() {
    let (mut heap, handles) = test_heap();
    let array = heap.new_array(2);
    array.set_element(0, ObjectRef::small(17));
    let slot = handles.push(array.as_ref());
    let before = handles.get(slot);

    heap.scavenge();

    let after = handles.get(slot);
    assert_ne!(after, before, "the root was rewritten to the copy");
    assert_ne!(as_object(after).class_id(), FORWARDING_CORPSE_CID);
    assert_eq!(as_array(after).element(0).small_value(), 17);
    heap.walk(|object| assert_ne!(object.class_id(), FORWARDING_CORPSE_CID));
}

#[test]
fn unreferenced_objects_do_not_survive_a_scavenge() {
    let (mut heap, handles) = test_heap();
    let keep = handles.push(heap.new_byte_string(b"keep").as_ref());
    for _ in 0..100 {
        heap.new_byte_string(b"garbage");
    }
    let used_before = heap.new_space_used();

    heap.scavenge();

    assert!(heap.new_space_used() < used_before, "garbage was reclaimed");
    let survivor = ByteString::cast(as_object(handles.get(keep)));
    assert_eq!(survivor.bytes(), b"keep");
}

#[test]
fn payloads_survive_collection_bit_exactly() {
    let (mut heap, handles) = test_heap();
    let mint = handles.push(heap.new_medium_integer(i64::MIN + 1).as_ref());
    let float = handles.push(heap.new_float64(-0.1).as_ref());
    let big = handles.push(heap.new_large_integer(true, &[usize::MAX, 3]).as_ref());
    let wide = handles.push(heap.new_wide_string(&[0x1F600, 65]).as_ref());

    heap.scavenge();
    heap.scavenge();
    heap.mark_compact();

    assert_eq!(MediumInteger::cast(as_object(handles.get(mint))).value(), i64::MIN + 1);
    assert_eq!(Float64::cast(as_object(handles.get(float))).value(), -0.1);
    let big = LargeInteger::cast(as_object(handles.get(big)));
    assert!(big.negative());
    assert_eq!(big.digit(0), usize::MAX);
    assert_eq!(big.digit(1), 3);
    assert_eq!(WideString::cast(as_object(handles.get(wide))).code_units(), &[0x1F600, 65]);
}

#[test]
fn old_space_references_keep_new_objects_alive() {
    let (mut heap, handles) = test_heap();
    let slot = handles.push(heap.new_array(1).as_ref());
    heap.scavenge();
    heap.scavenge();
    let old_array = as_array(handles.get(slot));
    assert!(old_array.as_ref().is_old_object(), "two scavenges promote");

    // A fresh object referenced only from old space; no remembered set,
    // so the scavenger must find it by scanning old space.
    let young = heap.new_byte_string(b"young");
    old_array.set_element(0, young.as_ref());
    heap.scavenge();

    let kept = ByteString::cast(as_object(as_array(handles.get(slot)).element(0)));
    assert_eq!(kept.bytes(), b"young");
}

#[test]
fn activation_frames_scavenge_with_live_stack_only() {
    let (mut heap, handles) = test_heap();
    let target = heap.new_byte_string(b"receiver");
    let activation = heap.new_activation();
    activation.set_receiver(target.as_ref());
    activation.push(ObjectRef::small(1));
    activation.push(heap.new_byte_string(b"top").as_ref());
    let slot = handles.push(HeapObject::from(activation).as_ref());

    heap.scavenge();

    let moved = Activation::cast(as_object(handles.get(slot)));
    assert_eq!(moved.stack_depth(), 2);
    assert_eq!(ByteString::cast(as_object(moved.receiver())).bytes(), b"receiver");
    assert_eq!(ByteString::cast(as_object(moved.stack_at(0))).bytes(), b"top");
    assert_eq!(moved.stack_at(1).small_value(), 1);
}

// ===========================================================================
// Weak arrays (S4)
// ===========================================================================

#[test]
fn weak_only_referents_are_cleared_to_nil() {
    let (mut heap, handles) = test_heap();
    let weak = heap.new_weak_array(1);
    let x = heap.new_byte_string(b"doomed");
    weak.set_element(0, x.as_ref());
    let slot = handles.push(HeapObject::from(weak).as_ref());

    heap.scavenge();

    let weak = WeakArray::cast(as_object(handles.get(slot)));
    assert_eq!(weak.element(0), heap.nil_ref(), "weak-only referent died");
}

#[test]
fn strongly_held_weak_referents_are_forwarded() {
    let (mut heap, handles) = test_heap();
    let weak = heap.new_weak_array(2);
    let kept = heap.new_byte_string(b"kept");
    let doomed = heap.new_byte_string(b"doomed");
    weak.set_element(0, kept.as_ref());
    weak.set_element(1, doomed.as_ref());
    let weak_slot = handles.push(HeapObject::from(weak).as_ref());
    let kept_slot = handles.push(kept.as_ref());

    heap.scavenge();

    let weak = WeakArray::cast(as_object(handles.get(weak_slot)));
    assert_eq!(weak.element(0), handles.get(kept_slot), "same post-scavenge address");
    assert_eq!(weak.element(1), heap.nil_ref());
}

#[test]
fn weak_arrays_clear_under_mark_compact_too() {
    let (mut heap, handles) = test_heap();
    let weak_slot = handles.push(HeapObject::from(heap.new_weak_array(1)).as_ref());
    let doomed_slot = handles.push(heap.new_byte_string(b"doomed").as_ref());
    // Promote everything to old space.
    heap.scavenge();
    heap.scavenge();
    let weak = WeakArray::cast(as_object(handles.get(weak_slot)));
    assert!(weak.as_ref().is_old_object());
    weak.set_element(0, handles.get(doomed_slot));

    handles.set(doomed_slot, ObjectRef::small(0)); // unroot
    heap.mark_compact();

    let weak = WeakArray::cast(as_object(handles.get(weak_slot)));
    assert_eq!(weak.element(0), heap.nil_ref());
}

// ===========================================================================
// Ephemerons (S5)
// ===========================================================================

#[test]
fn ephemeron_with_dead_key_clears_key_and_value() {
    let (mut heap, handles) = test_heap();
    let ephemeron = heap.new_ephemeron();
    let key = heap.new_byte_string(b"key");
    let value = heap.new_byte_string(b"value");
    ephemeron.set_key(key.as_ref());
    ephemeron.set_value(value.as_ref());
    let slot = handles.push(HeapObject::from(ephemeron).as_ref());

    heap.scavenge();

    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert_eq!(ephemeron.key(), heap.nil_ref());
    assert_eq!(ephemeron.value(), heap.nil_ref());
}

#[test]
fn ephemeron_with_live_key_keeps_key_and_value() {
    let (mut heap, handles) = test_heap();
    let ephemeron = heap.new_ephemeron();
    let key = heap.new_byte_string(b"key");
    let value = heap.new_byte_string(b"value");
    ephemeron.set_key(key.as_ref());
    ephemeron.set_value(value.as_ref());
    let slot = handles.push(HeapObject::from(ephemeron).as_ref());
    let key_slot = handles.push(key.as_ref());

    heap.scavenge();

    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert_eq!(ephemeron.key(), handles.get(key_slot), "key forwarded, not cleared");
    assert_eq!(ByteString::cast(as_object(ephemeron.value())).bytes(), b"value");
}

#[test]
fn ephemeron_value_reaches_its_own_key_at_the_fixpoint() {
    // value -> key edge: the key is only reachable through the value,
    // which is only reachable if the key is reached. Both must die.
    let (mut heap, handles) = test_heap();
    let ephemeron = heap.new_ephemeron();
    let key = heap.new_array(1);
    let value = heap.new_array(1);
    value.set_element(0, key.as_ref());
    ephemeron.set_key(key.as_ref());
    ephemeron.set_value(value.as_ref());
    let slot = handles.push(HeapObject::from(ephemeron).as_ref());

    heap.scavenge();

    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert_eq!(ephemeron.key(), heap.nil_ref());
    assert_eq!(ephemeron.value(), heap.nil_ref());
}

#[test]
fn chained_ephemerons_resolve_through_the_fixpoint() {
    // e2's key is e1's value: once k1 is found live, v1 revives k2, which
    // revives v2.
    let (mut heap, handles) = test_heap();
    let e1 = heap.new_ephemeron();
    let e2 = heap.new_ephemeron();
    let k1 = heap.new_byte_string(b"k1");
    let v1 = heap.new_byte_string(b"v1");
    let v2 = heap.new_byte_string(b"v2");
    e1.set_key(k1.as_ref());
    e1.set_value(v1.as_ref());
    e2.set_key(v1.as_ref());
    e2.set_value(v2.as_ref());
    let s1 = handles.push(HeapObject::from(e1).as_ref());
    let s2 = handles.push(HeapObject::from(e2).as_ref());
    handles.push(k1.as_ref());

    heap.scavenge();

    let e1 = Ephemeron::cast(as_object(handles.get(s1)));
    let e2 = Ephemeron::cast(as_object(handles.get(s2)));
    assert_eq!(ByteString::cast(as_object(e1.value())).bytes(), b"v1");
    assert_eq!(e2.key(), e1.value(), "chained key forwarded to the same copy");
    assert_eq!(ByteString::cast(as_object(e2.value())).bytes(), b"v2");
}

#[test]
fn mourned_ephemeron_finalizer_survives_to_fire_once() {
    let (mut heap, handles) = test_heap();
    let ephemeron = heap.new_ephemeron();
    let key = heap.new_byte_string(b"key");
    let finalizer = heap.new_byte_string(b"finalizer");
    ephemeron.set_key(key.as_ref());
    ephemeron.set_value(key.as_ref());
    ephemeron.set_finalizer(finalizer.as_ref());
    let slot = handles.push(HeapObject::from(ephemeron).as_ref());

    heap.scavenge();

    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert_eq!(ephemeron.key(), heap.nil_ref());
    assert_eq!(ephemeron.value(), heap.nil_ref());
    assert_eq!(ByteString::cast(as_object(ephemeron.finalizer())).bytes(), b"finalizer");
}

#[test]
fn ephemerons_mourn_under_mark_compact_too() {
    let (mut heap, handles) = test_heap();
    let slot = handles.push(HeapObject::from(heap.new_ephemeron()).as_ref());
    let key_slot = handles.push(heap.new_byte_string(b"key").as_ref());
    let value_slot = handles.push(heap.new_byte_string(b"value").as_ref());
    heap.scavenge();
    heap.scavenge();
    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert!(ephemeron.as_ref().is_old_object());
    ephemeron.set_key(handles.get(key_slot));
    ephemeron.set_value(handles.get(value_slot));

    handles.set(key_slot, ObjectRef::small(0));
    handles.set(value_slot, ObjectRef::small(0));
    heap.mark_compact();

    let ephemeron = Ephemeron::cast(as_object(handles.get(slot)));
    assert_eq!(ephemeron.key(), heap.nil_ref());
    assert_eq!(ephemeron.value(), heap.nil_ref());
}

// ===========================================================================
// Promotion and compaction
// ===========================================================================

#[test]
fn two_scavenges_promote_and_compaction_reclaims_old_garbage() {
    let (mut heap, handles) = test_heap();
    let keeper = handles.push(heap.new_byte_string(b"keeper").as_ref());
    let mut doomed = Vec::new();
    for _ in 0..50 {
        doomed.push(handles.push(heap.new_array(8).as_ref()));
    }

    heap.scavenge();
    heap.scavenge();
    assert!(handles.get(keeper).is_old_object());
    let old_used_full = heap.old_space_used();

    for slot in doomed {
        handles.set(slot, ObjectRef::small(0));
    }
    heap.mark_compact();

    assert!(heap.old_space_used() < old_used_full, "dead promoted arrays were reclaimed");
    assert!(handles.get(keeper).is_old_object());
    assert_eq!(ByteString::cast(as_object(handles.get(keeper))).bytes(), b"keeper");
    assert!(heap.stats().compactions >= 1);
}

#[test]
fn compaction_rewrites_references_between_old_objects() {
    let (mut heap, handles) = test_heap();
    let filler = handles.push(heap.new_array(64).as_ref());
    let a = handles.push(heap.new_array(1).as_ref());
    let b = handles.push(heap.new_byte_string(b"pointee").as_ref());
    heap.scavenge();
    heap.scavenge();
    as_array(handles.get(a)).set_element(0, handles.get(b));

    // Kill the filler so the survivors slide left.
    handles.set(filler, ObjectRef::small(0));
    let b_before = handles.get(b);
    heap.mark_compact();

    assert_ne!(handles.get(b), b_before, "pointee moved during the slide");
    let a = as_array(handles.get(a));
    assert_eq!(a.element(0), handles.get(b), "old-to-old reference rewritten");
    assert_eq!(ByteString::cast(as_object(a.element(0))).bytes(), b"pointee");
}

#[test]
fn oversized_objects_use_the_class_size_path_end_to_end() {
    let (mut heap, handles) = test_heap();
    // More alignment units than the header size field encodes: forces the
    // overflow sentinel and a direct old-space allocation.
    let length = 2 * MB;
    let big = heap.new_byte_array(length);
    let object = HeapObject::from(big);
    assert!(object.as_ref().is_old_object());
    assert_eq!(object.size_tag(), 0);
    assert_eq!(object.heap_size(), ByteArray::footprint(length));
    big.set_element(0, 0xAB);
    big.set_element(length - 1, 0xCD);
    let slot = handles.push(object.as_ref());

    // An unreferenced oversized neighbor exercises the corpse
    // overflow-size path during the compaction sweep.
    heap.new_byte_array(MB);
    heap.mark_compact();

    let big = ByteArray::cast(as_object(handles.get(slot)));
    assert_eq!(big.length(), length);
    assert_eq!(big.element(0), 0xAB);
    assert_eq!(big.element(length - 1), 0xCD);

    let mut oversized = 0;
    heap.walk(|object| {
        if object.class_id() == BYTE_ARRAY_CID {
            oversized += 1;
        }
    });
    assert_eq!(oversized, 1, "the dead oversized array was swept");
}

#[test]
fn scavenge_triggered_by_exhaustion_keeps_allocating() {
    let (mut heap, handles) = test_heap();
    let keep = handles.push(heap.new_byte_string(b"anchor").as_ref());
    // Allocate several times the nursery capacity.
    let config = HeapConfig::default();
    let rounds = 4 * config.new_space_size / Array::footprint(32);
    for _ in 0..rounds {
        heap.new_array(32);
    }
    assert!(heap.stats().scavenges >= 3);
    assert_eq!(ByteString::cast(as_object(handles.get(keep))).bytes(), b"anchor");
}

// ===========================================================================
// Full round trip (graph preservation)
// ===========================================================================

/// The reference graph reachable from `root`, keyed by identity hash:
/// class id plus the out-edge list (smi values, or target hashes).
fn graph_by_identity(heap: &mut Heap, root: ObjectRef) -> BTreeMap<isize, (Cid, Vec<String>)> {
    let mut graph = BTreeMap::new();
    let mut queue = VecDeque::new();
    let mut seen = HashSet::new();
    queue.push_back(root);
    while let Some(reference) = queue.pop_front() {
        if !reference.is_heap_object() || !seen.insert(reference.raw()) {
            continue;
        }
        let hash = heap.identity_hash(reference).small_value();
        let object = as_object(reference);
        let mut edges = Vec::new();
        for slot_addr in object.pointers().iter() {
            let value = slot_value(slot_addr);
            if value.is_small_integer() {
                edges.push(format!("smi:{}", value.small_value()));
            } else {
                edges.push(format!("obj:{}", heap.identity_hash(value).small_value()));
                queue.push_back(value);
            }
        }
        graph.insert(hash, (object.class_id(), edges));
    }
    graph
}

#[test]
fn graph_survives_scavenges_then_compaction() {
    let (mut heap, handles) = test_heap();
    let a = heap.new_array(3);
    let b = heap.new_array(1);
    let label = heap.new_byte_string(b"label");
    a.set_element(0, b.as_ref());
    a.set_element(1, ObjectRef::small(7));
    a.set_element(2, label.as_ref());
    b.set_element(0, a.as_ref()); // cycle
    let slot = handles.push(a.as_ref());

    let before = graph_by_identity(&mut heap, handles.get(slot));
    assert_eq!(before.len(), 3);

    heap.scavenge();
    heap.scavenge();
    assert!(handles.get(slot).is_old_object(), "fully promoted");
    heap.mark_compact();

    let after = graph_by_identity(&mut heap, handles.get(slot));
    assert_eq!(before, after, "same identities, classes and out-edges");
}

// ===========================================================================
// Class table and object store plumbing
// ===========================================================================

#[test]
fn class_table_entries_are_roots_and_get_rewritten() {
    let (mut heap, _handles) = test_heap();
    let cid = heap.next_class_id();
    let behavior = heap.new_regular_object(cid, Class::NUM_SLOTS);
    heap.register_class(cid, HeapObject::from(behavior).as_ref());

    let instance_slots = 2;
    let instance = heap.new_regular_object(cid, instance_slots);
    let instance_ref = HeapObject::from(instance).as_ref();
    assert_eq!(heap.behavior_of(instance_ref), heap.class_at(cid));

    heap.scavenge();

    let behavior_after = heap.class_at(cid);
    assert!(behavior_after.is_heap_object());
    assert_ne!(as_object(behavior_after).class_id(), FORWARDING_CORPSE_CID);
    assert_eq!(RegularObject::cast(as_object(behavior_after)).num_slots(), Class::NUM_SLOTS);
    assert_eq!(heap.class_at(9999), heap.nil_ref(), "unknown cids answer nil");
}

#[test]
fn object_store_is_rooted_and_its_slots_survive() {
    let (mut heap, _handles) = test_heap();
    let store = heap.new_regular_object(FIRST_REGULAR_OBJECT_CID, ObjectStore::NUM_SLOTS);
    let store_view = ObjectStore::cast(HeapObject::from(store));
    store_view.set_nil(heap.nil_ref());
    store_view.set_start(heap.new_byte_string(b"start").as_ref());
    heap.set_object_store(HeapObject::from(store).as_ref());

    heap.scavenge();

    let store = ObjectStore::cast(as_object(heap.object_store()));
    assert_eq!(store.nil(), heap.nil_ref());
    assert_eq!(ByteString::cast(as_object(store.start())).bytes(), b"start");
}
