//! Object-graph queries over a completed store: instance projection,
//! reachability, and ownership attribution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::heap_dump::{Class, FieldDescriptor, FieldType, FieldValue};
use crate::store::{HeapIndex, InstanceRec, ObjectStore, OwnerKind, OwnerRef};
use crate::{HprofError, Id, Result};

/// How many queue operations a walk performs between cancellation checks.
/// Small enough to keep cancel latency bounded, large enough to stay off the
/// hot path.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Cooperative cancellation for long-running walks. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Instance field declarations for a class, supertype fields first, in the
/// order instance payloads are decoded.
///
/// Classes are not dumped superclass-first, so this can only be asked of a
/// completed store. A broken chain (missing superclass, or a cycle in a
/// corrupt dump) ends the walk early; projection then reports the instance
/// as truncated rather than misreading the payload.
pub fn descriptor_chain<S: ObjectStore + ?Sized>(store: &S, class_obj_id: Id) -> Vec<FieldDescriptor> {
    let mut lineage: Vec<&Class> = Vec::new();
    let mut seen: HashSet<Id> = HashSet::new();
    let mut cursor = Some(class_obj_id);

    while let Some(id) = cursor {
        if !seen.insert(id) {
            warn!(class = %id, "class hierarchy cycle; stopping chain walk");
            break;
        }
        match store.class_dump(id) {
            Some(class) => {
                cursor = class.super_class_obj_id();
                lineage.push(class);
            }
            None => {
                debug!(class = %id, "class dump missing while walking hierarchy");
                break;
            }
        }
    }

    lineage
        .iter()
        .rev()
        .flat_map(|class| class.instance_field_descriptors().iter().copied())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectedField {
    pub name_id: Id,
    pub field_type: FieldType,
    pub value: FieldValue,
}

/// The result of slicing an instance payload through its class chain.
#[derive(Debug, Clone)]
pub struct ProjectedInstance {
    pub fields: Vec<ProjectedField>,
    /// Payload bytes consumed; equals the payload length when the chain is
    /// consistent.
    pub consumed: usize,
    /// Declared fields left undecoded because the payload ran out.
    pub missing_fields: usize,
}

impl ProjectedInstance {
    pub fn is_truncated(&self) -> bool {
        self.missing_fields > 0
    }
}

/// Walk the class chain supertype-first and slice the payload left-to-right
/// by declared field widths. Never over-reads: if the cumulative offset
/// would pass the payload end, decoding stops and the remaining fields are
/// reported via `missing_fields` (the `TruncatedInstance` condition).
pub fn project_instance<S: ObjectStore + ?Sized>(
    store: &S,
    instance: &InstanceRec,
) -> ProjectedInstance {
    let chain = descriptor_chain(store, instance.class_obj_id);
    let id_size = store.id_size();
    let payload: &[u8] = &instance.payload;

    let mut fields = Vec::with_capacity(chain.len());
    let mut offset = 0_usize;
    let mut missing_fields = 0_usize;

    for (position, descriptor) in chain.iter().enumerate() {
        let width = descriptor.field_type().size_bytes(id_size);
        if offset + width > payload.len() {
            missing_fields = chain.len() - position;
            break;
        }
        match descriptor
            .field_type()
            .parse_value(&payload[offset..], id_size)
        {
            Ok((_, value)) => fields.push(ProjectedField {
                name_id: descriptor.name_id(),
                field_type: descriptor.field_type(),
                value,
            }),
            Err(_) => {
                missing_fields = chain.len() - position;
                break;
            }
        }
        offset += width;
    }

    ProjectedInstance {
        fields,
        consumed: offset,
        missing_fields,
    }
}

/// Non-null object-typed field values of an instance, in field order.
pub fn instance_reference_targets<S: ObjectStore + ?Sized>(
    store: &S,
    instance: &InstanceRec,
) -> Vec<Id> {
    let projected = project_instance(store, instance);
    if projected.is_truncated() {
        warn!(
            instance = %instance.obj_id,
            missing = projected.missing_fields,
            "instance payload shorter than class chain declares"
        );
    }
    projected
        .fields
        .iter()
        .filter_map(|f| f.value.as_object_id())
        .collect()
}

/// Shallow size of whatever `obj_id` resolves to. Class objects and
/// unresolved ids occupy no dumped bytes and count as zero.
pub fn shallow_size<S: ObjectStore + ?Sized>(store: &S, obj_id: Id) -> u64 {
    if let Some(instance) = store.instance(obj_id) {
        instance.shallow_size()
    } else if let Some(array) = store.object_array(obj_id) {
        array.shallow_size(store.id_size())
    } else if let Some(array) = store.primitive_array(obj_id) {
        array.shallow_size()
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureStats {
    pub visited: u64,
    pub total_bytes: u64,
}

/// FIFO reachability from a seed set with a visited set keyed by object id.
///
/// Referents are the object-typed field values of instances and the non-null
/// elements of object arrays; primitive arrays are leaves. Cycles terminate
/// because of the visited set, so the walk is idempotent over any seed set.
pub fn retained_closure<S: ObjectStore + ?Sized>(
    store: &S,
    seeds: impl IntoIterator<Item = Id>,
    cancel: &CancelToken,
) -> Result<ClosureStats> {
    let mut visited: HashSet<Id> = HashSet::new();
    let mut queue: VecDeque<Id> = VecDeque::new();
    let mut ops = 0_u64;

    let enqueue = |id: Id,
                       visited: &mut HashSet<Id>,
                       queue: &mut VecDeque<Id>,
                       ops: &mut u64|
     -> Result<()> {
        if visited.insert(id) {
            queue.push_back(id);
        }
        *ops += 1;
        if *ops % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(HprofError::Cancelled);
        }
        Ok(())
    };

    for seed in seeds {
        enqueue(seed, &mut visited, &mut queue, &mut ops)?;
    }

    let mut stats = ClosureStats {
        visited: 0,
        total_bytes: 0,
    };

    while let Some(obj_id) = queue.pop_front() {
        stats.visited += 1;
        stats.total_bytes += shallow_size(store, obj_id);

        if let Some(instance) = store.instance(obj_id) {
            for target in instance_reference_targets(store, instance) {
                enqueue(target, &mut visited, &mut queue, &mut ops)?;
            }
        } else if let Some(array) = store.object_array(obj_id) {
            for element in array.elements.iter().flatten() {
                enqueue(*element, &mut visited, &mut queue, &mut ops)?;
            }
        }
        // primitive arrays have no referents
    }

    Ok(stats)
}

/// Retained size of a class: every static field's declared width, plus the
/// closure over all instances of the class and all non-null reference-typed
/// static values.
pub fn class_retained_size<S: ObjectStore + ?Sized>(
    store: &S,
    class: &Class,
    cancel: &CancelToken,
) -> Result<u64> {
    let id_size = store.id_size();
    let static_bytes: u64 = class
        .static_fields()
        .iter()
        .map(|sf| sf.field_type().size_bytes(id_size) as u64)
        .sum();

    let seeds: Vec<Id> = store
        .instances_of(class.obj_id())
        .iter()
        .copied()
        .chain(
            class
                .static_fields()
                .iter()
                .filter_map(|sf| sf.value().as_object_id()),
        )
        .collect();

    let closure = retained_closure(store, seeds, cancel)?;
    Ok(static_bytes + closure.total_bytes)
}

/// Reverse edges of the whole heap, built once per snapshot by inverting
/// instance fields, static fields and object-array elements.
pub struct ReverseIndex {
    instance_fields: HashMap<Id, Vec<OwnerRef>>,
    static_fields: HashMap<Id, Vec<OwnerRef>>,
    array_elements: HashMap<Id, Vec<OwnerRef>>,
}

static NO_REFS: &[OwnerRef] = &[];

impl ReverseIndex {
    pub(crate) fn build(ix: &HeapIndex) -> ReverseIndex {
        let missing_utf8 = "(missing utf8)";
        let mut instance_fields: HashMap<Id, Vec<OwnerRef>> = HashMap::new();
        let mut static_fields: HashMap<Id, Vec<OwnerRef>> = HashMap::new();
        let mut array_elements: HashMap<Id, Vec<OwnerRef>> = HashMap::new();

        for instance in ix.instances() {
            let projected = project_instance(ix, instance);
            for field in &projected.fields {
                if let Some(target) = field.value.as_object_id() {
                    let via = ix
                        .interned_string(field.name_id)
                        .unwrap_or(missing_utf8)
                        .to_owned();
                    instance_fields.entry(target).or_default().push(OwnerRef {
                        kind: OwnerKind::InstanceField,
                        owner_id: instance.obj_id,
                        via,
                    });
                }
            }
        }

        for class in ix.classes() {
            for static_field in class.static_fields() {
                if let Some(target) = static_field.value().as_object_id() {
                    let via = ix
                        .interned_string(static_field.name_id())
                        .unwrap_or(missing_utf8)
                        .to_owned();
                    static_fields.entry(target).or_default().push(OwnerRef {
                        kind: OwnerKind::StaticField,
                        owner_id: class.obj_id(),
                        via,
                    });
                }
            }
        }

        for array in ix.object_arrays() {
            for (index, element) in array.elements.iter().enumerate() {
                if let Some(target) = element {
                    array_elements.entry(*target).or_default().push(OwnerRef {
                        kind: OwnerKind::ArrayElement,
                        owner_id: array.obj_id,
                        via: format!("[{}]", index),
                    });
                }
            }
        }

        ReverseIndex {
            instance_fields,
            static_fields,
            array_elements,
        }
    }

    pub(crate) fn refs(&self, kind: OwnerKind, target: Id) -> &[OwnerRef] {
        let map = match kind {
            OwnerKind::InstanceField => &self.instance_fields,
            OwnerKind::StaticField => &self.static_fields,
            OwnerKind::ArrayElement => &self.array_elements,
        };
        map.get(&target).map(|v| v.as_slice()).unwrap_or(NO_REFS)
    }
}

/// One deduplicated owner of a target object: when a single owner holds the
/// target through several fields or indices, they are merged into one record
/// with the access paths joined in `via`.
#[derive(Debug, Clone)]
pub struct ArrayOwner {
    pub kind: OwnerKind,
    pub owner_id: Id,
    pub owner_label: String,
    pub via: Vec<String>,
}

/// Every owner of `target`, across instance fields, static fields and array
/// elements, deduplicated by `(kind, owner id)`.
pub fn owners_of<S: ObjectStore + ?Sized>(store: &S, target: Id) -> Vec<ArrayOwner> {
    let mut owners: Vec<ArrayOwner> = Vec::new();
    let mut by_owner: HashMap<(OwnerKind, Id), usize> = HashMap::new();

    let all_refs = store
        .instance_field_refs_to(target)
        .iter()
        .chain(store.static_field_refs_to(target))
        .chain(store.array_element_refs_to(target));

    for reference in all_refs {
        match by_owner.entry((reference.kind, reference.owner_id)) {
            std::collections::hash_map::Entry::Occupied(slot) => {
                owners[*slot.get()].via.push(reference.via.clone());
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(owners.len());
                owners.push(ArrayOwner {
                    kind: reference.kind,
                    owner_id: reference.owner_id,
                    owner_label: owner_label(store, reference.kind, reference.owner_id),
                    via: vec![reference.via.clone()],
                });
            }
        }
    }

    owners.sort_by(|a, b| a.kind.cmp(&b.kind).then(b.owner_id.cmp(&a.owner_id)));
    owners
}

fn owner_label<S: ObjectStore + ?Sized>(store: &S, kind: OwnerKind, owner_id: Id) -> String {
    match kind {
        OwnerKind::InstanceField => store
            .instance(owner_id)
            .map(|i| store.class_name(i.class_obj_id))
            .unwrap_or_else(|| format!("Unknown class {}", owner_id)),
        OwnerKind::StaticField => store.class_name(owner_id),
        OwnerKind::ArrayElement => store
            .object_array(owner_id)
            .map(|a| store.class_name(a.array_class_obj_id))
            .unwrap_or_else(|| format!("Unknown class {}", owner_id)),
    }
}
