//! Offline analyses over a soup VM heap.
//!
//! Everything here runs against the core's walking interface only:
//! [`Heap::walk`], `class_at`/`behavior_of`, and pointer enumeration. The
//! analyses are per-class instance and byte counts, an inter-object
//! reference graph in CSV form, and a breadth-first search for a
//! reference path between two named classes. Uninitialized classes (name
//! slot still nil) are reported with placeholder names rather than
//! aborting, since a half-rehydrated heap is a normal analyzer input.

#![warn(clippy::all)]
#![warn(missing_docs)]

use std::collections::VecDeque;
use std::io::Write;

use rustc_hash::{FxHashMap, FxHashSet};
use soup_vm_heap::Heap;
use soup_vm_object::{object, wellknown};
use soup_vm_object::{
    BYTE_STRING_CID, ByteString, Cid, FIRST_REGULAR_OBJECT_CID, HeapObject, ObjectRef,
    RegularObject, SMI_CID,
};
use thiserror::Error;
use tracing::debug;

/// Analyzer failures. Heap-shape oddities are tolerated and reported in
/// the output instead.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// Writing analysis output failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A named class has no instances in the heap.
    #[error("no instances of class {0:?}")]
    UnknownClass(String),
}

fn is_byte_string(reference: ObjectRef) -> bool {
    // SAFETY: analyzer references come from walking a quiescent heap.
    reference.is_heap_object() && unsafe { HeapObject::from_ref(reference) }.class_id() == BYTE_STRING_CID
}

fn byte_string_text(reference: ObjectRef) -> String {
    // SAFETY: checked by the caller via `is_byte_string`.
    let string = ByteString::cast(unsafe { HeapObject::from_ref(reference) });
    String::from_utf8_lossy(string.bytes()).into_owned()
}

/// Human-readable name of the class registered for `cid`.
///
/// Metaclasses answer `"Something class"`, matching their printed form;
/// classes answer their name slot; anything uninitialized answers a
/// placeholder.
pub fn class_name(heap: &Heap, cid: Cid) -> String {
    let cls = heap.class_at(cid);
    if !cls.is_heap_object() || cls == heap.nil_ref() {
        return format!("<class {cid}>");
    }
    // SAFETY: class-table entries are live heap objects.
    let cls_object = unsafe { HeapObject::from_ref(cls) };
    if cls_object.class_id() < FIRST_REGULAR_OBJECT_CID
        || RegularObject::unchecked(cls_object).num_slots() < wellknown::Metaclass::NUM_SLOTS
    {
        return format!("<class {cid}>");
    }

    // The metaclass of any metaclass is the class table's fixed point:
    // class-of(class-of(SmallInteger behavior)).
    let the_metaclass = heap.behavior_of(heap.behavior_of(heap.class_at(SMI_CID)));
    if the_metaclass != heap.nil_ref() && heap.behavior_of(cls) == the_metaclass {
        let this_class = wellknown::Metaclass::cast(cls_object).this_class();
        if !this_class.is_heap_object() || this_class == heap.nil_ref() {
            return "Uninitialized metaclass?".to_string();
        }
        // SAFETY: as above.
        let class_object = unsafe { HeapObject::from_ref(this_class) };
        if class_object.class_id() < FIRST_REGULAR_OBJECT_CID
            || RegularObject::unchecked(class_object).num_slots() < wellknown::Class::NUM_SLOTS
        {
            return "Uninitialized metaclass?".to_string();
        }
        let name = wellknown::Class::cast(class_object).name();
        if is_byte_string(name) {
            format!("{} class", byte_string_text(name))
        } else {
            "Uninitialized metaclass?".to_string()
        }
    } else {
        if RegularObject::unchecked(cls_object).num_slots() < wellknown::Class::NUM_SLOTS {
            return "Uninitialized class?".to_string();
        }
        let name = wellknown::Class::cast(cls_object).name();
        if is_byte_string(name) {
            byte_string_text(name)
        } else {
            "Uninitialized class?".to_string()
        }
    }
}

/// Per-class totals for one heap walk.
#[derive(Debug, Clone)]
pub struct ClassStat {
    /// Class identifier.
    pub cid: Cid,
    /// Resolved class name.
    pub name: String,
    /// Live instances.
    pub instances: usize,
    /// Bytes occupied by those instances.
    pub bytes: usize,
}

/// Count instances and bytes per class, sorted by bytes descending.
pub fn instance_counts(heap: &Heap) -> Vec<ClassStat> {
    let mut totals: FxHashMap<Cid, (usize, usize)> = FxHashMap::default();
    heap.walk(|object| {
        let entry = totals.entry(object.class_id()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += object.heap_size();
    });

    let mut stats: Vec<ClassStat> = totals
        .into_iter()
        .map(|(cid, (instances, bytes))| ClassStat {
            cid,
            name: class_name(heap, cid),
            instances,
            bytes,
        })
        .collect();
    stats.sort_by(|a, b| b.bytes.cmp(&a.bytes).then(a.cid.cmp(&b.cid)));
    debug!(classes = stats.len(), "instance counts computed");
    stats
}

/// Write the instance-count table with totals.
pub fn print_instance_counts(heap: &Heap, out: &mut impl Write) -> Result<(), AnalyzeError> {
    let stats = instance_counts(heap);
    writeln!(out, "{:>60} {:>10} {:>10}", "Class", "Instances", "Bytes")?;
    let mut total_instances = 0;
    let mut total_bytes = 0;
    for stat in &stats {
        writeln!(out, "{:>60} {:>10} {:>10}", stat.name, stat.instances, stat.bytes)?;
        total_instances += stat.instances;
        total_bytes += stat.bytes;
    }
    writeln!(out, "{:>60} {:>10} {:>10}", "Total", total_instances, total_bytes)?;
    Ok(())
}

/// Emit the inter-object reference graph as `source,target` CSV rows,
/// each endpoint rendered as `ClassName@address`.
pub fn write_reference_graph(heap: &Heap, out: &mut impl Write) -> Result<(), AnalyzeError> {
    let mut names: FxHashMap<Cid, String> = FxHashMap::default();
    let mut rows = vec!["source,target".to_string()];
    heap.walk(|source| {
        let source_name = names
            .entry(source.class_id())
            .or_insert_with(|| class_name(heap, source.class_id()))
            .clone();
        for slot_addr in source.pointers().iter() {
            // SAFETY: slot addresses come from pointer enumeration over a
            // quiescent heap.
            let target = unsafe { object::load_ref(slot_addr) };
            if !target.is_heap_object() {
                continue;
            }
            // SAFETY: as above.
            let target_object = unsafe { HeapObject::from_ref(target) };
            let target_name = names
                .entry(target_object.class_id())
                .or_insert_with(|| class_name(heap, target_object.class_id()))
                .clone();
            rows.push(format!(
                "{}@{:x},{}@{:x}",
                source_name,
                source.addr(),
                target_name,
                target_object.addr()
            ));
        }
    });
    for row in rows {
        writeln!(out, "{row}")?;
    }
    Ok(())
}

/// Every live instance whose class name equals `name`.
pub fn find_instances(heap: &Heap, name: &str) -> Vec<HeapObject> {
    let mut names: FxHashMap<Cid, String> = FxHashMap::default();
    let mut found = Vec::new();
    heap.walk(|object| {
        let class = names
            .entry(object.class_id())
            .or_insert_with(|| class_name(heap, object.class_id()));
        if class == name {
            found.push(object);
        }
    });
    found
}

/// Breadth-first search for a reference path from any instance of
/// `from_class` to any instance of `to_class`, following outbound
/// references. Returns the path source-first.
pub fn find_reference_path(heap: &Heap, from_class: &str, to_class: &str) -> Option<Vec<HeapObject>> {
    let mut names: FxHashMap<Cid, String> = FxHashMap::default();
    let mut name_of = |heap: &Heap, cid: Cid| -> String {
        names.entry(cid).or_insert_with(|| class_name(heap, cid)).clone()
    };

    let mut queue: VecDeque<HeapObject> = VecDeque::new();
    let mut seen: FxHashSet<usize> = FxHashSet::default();
    let mut parents: FxHashMap<usize, usize> = FxHashMap::default();
    for root in find_instances(heap, from_class) {
        seen.insert(root.addr());
        queue.push_back(root);
    }
    if queue.is_empty() {
        return None;
    }

    let mut steps = 0usize;
    while let Some(next) = queue.pop_front() {
        steps += 1;
        if name_of(heap, next.class_id()) == to_class {
            debug!(steps, "reference path found");
            let mut path = vec![next];
            let mut cursor = next.addr();
            while let Some(&parent) = parents.get(&cursor) {
                // SAFETY: parent addresses were visited live objects.
                path.push(unsafe { HeapObject::at(parent) });
                cursor = parent;
            }
            path.reverse();
            return Some(path);
        }
        for slot_addr in next.pointers().iter() {
            // SAFETY: as in `write_reference_graph`.
            let target = unsafe { object::load_ref(slot_addr) };
            if !target.is_heap_object() {
                continue;
            }
            // SAFETY: as above.
            let target_object = unsafe { HeapObject::from_ref(target) };
            if seen.insert(target_object.addr()) {
                parents.insert(target_object.addr(), next.addr());
                queue.push_back(target_object);
            }
        }
    }
    debug!(steps, "no reference path");
    None
}

/// Write the result of a path search, target-first with `<-` separators,
/// the way the path reads as an ownership chain.
pub fn print_reference_path(
    heap: &Heap,
    from_class: &str,
    to_class: &str,
    out: &mut impl Write,
) -> Result<(), AnalyzeError> {
    match find_reference_path(heap, from_class, to_class) {
        Some(path) => {
            let rendered: Vec<String> = path
                .iter()
                .rev()
                .map(|object| format!("{}@{:x}", class_name(heap, object.class_id()), object.addr()))
                .collect();
            writeln!(out, "Found path: {}", rendered.join(" <- "))?;
            Ok(())
        }
        None => {
            writeln!(out, "No path from {from_class} to {to_class}")?;
            Ok(())
        }
    }
}
