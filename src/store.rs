//! Backend-neutral index over a fully decoded snapshot.
//!
//! [`HeapIndex`] is the in-process backend: one pass over the record stream
//! fills maps keyed by object id, and everything is immutable afterwards.
//! Analyses depend only on the [`ObjectStore`] contract, so a backend that
//! serves the same surface from an external relational store is equally
//! legal.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::warn;

use crate::graph::ReverseIndex;
use crate::heap_dump::{Class, PrimitiveArrayType, SubRecord};
use crate::{
    Hprof, HprofError, Id, IdSize, LoadClass, RecordTag, Result, Serial, StackFrame, StartThread,
};

/// Fixed header bytes added to every array's reported size.
pub const ARRAY_HEADER_BYTES: u64 = 16;

/// Ingest knobs. Arrays above the element cap keep their metadata but skip
/// per-element indexing.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub max_indexed_elements: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_indexed_elements: 10_000_000,
        }
    }
}

/// An instance dump with its opaque payload copied out of the input buffer.
#[derive(Debug, Clone)]
pub struct InstanceRec {
    pub obj_id: Id,
    pub stack_trace_serial: Serial,
    pub class_obj_id: Id,
    pub payload: Box<[u8]>,
}

impl InstanceRec {
    pub fn number_of_bytes(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn shallow_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct ObjectArrayRec {
    pub obj_id: Id,
    pub stack_trace_serial: Serial,
    pub array_class_obj_id: Id,
    pub num_elements: u32,
    /// Element slots in index order; `None` is a null slot. Empty when
    /// `elements_indexed` is false.
    pub elements: Vec<Option<Id>>,
    pub elements_indexed: bool,
}

impl ObjectArrayRec {
    pub fn shallow_size(&self, id_size: IdSize) -> u64 {
        ARRAY_HEADER_BYTES + u64::from(self.num_elements) * id_size.size_in_bytes() as u64
    }
}

#[derive(Debug, Clone)]
pub struct PrimitiveArrayRec {
    pub obj_id: Id,
    pub stack_trace_serial: Serial,
    pub elem_type: PrimitiveArrayType,
    pub num_elements: u32,
    /// Raw big-endian element bytes. Empty when `contents_indexed` is false.
    pub contents: Box<[u8]>,
    pub contents_indexed: bool,
}

impl PrimitiveArrayRec {
    pub fn shallow_size(&self) -> u64 {
        ARRAY_HEADER_BYTES + u64::from(self.num_elements) * self.elem_type.size_bytes() as u64
    }
}

/// GC roots, normalized out of their sub-record forms.
#[derive(Debug, Clone, Copy)]
pub enum GcRoot {
    Unknown {
        obj_id: Id,
    },
    JniGlobal {
        obj_id: Id,
        jni_global_ref_id: Id,
    },
    JniLocalRef {
        obj_id: Id,
        thread_serial: Serial,
        frame_index: u32,
    },
    JavaStackFrame {
        obj_id: Id,
        thread_serial: Serial,
        frame_index: u32,
    },
    NativeStack {
        obj_id: Id,
        thread_serial: Serial,
    },
    SystemClass {
        obj_id: Id,
    },
    ThreadBlock {
        obj_id: Id,
        thread_serial: Serial,
    },
    BusyMonitor {
        obj_id: Id,
    },
    ThreadObj {
        thread_obj_id: Option<Id>,
        thread_serial: Serial,
        stack_trace_serial: Serial,
    },
}

impl GcRoot {
    pub fn obj_id(&self) -> Option<Id> {
        match *self {
            GcRoot::Unknown { obj_id }
            | GcRoot::JniGlobal { obj_id, .. }
            | GcRoot::JniLocalRef { obj_id, .. }
            | GcRoot::JavaStackFrame { obj_id, .. }
            | GcRoot::NativeStack { obj_id, .. }
            | GcRoot::SystemClass { obj_id }
            | GcRoot::ThreadBlock { obj_id, .. }
            | GcRoot::BusyMonitor { obj_id } => Some(obj_id),
            GcRoot::ThreadObj { thread_obj_id, .. } => thread_obj_id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            GcRoot::Unknown { .. } => "unknown",
            GcRoot::JniGlobal { .. } => "JNI global",
            GcRoot::JniLocalRef { .. } => "JNI local",
            GcRoot::JavaStackFrame { .. } => "Java frame",
            GcRoot::NativeStack { .. } => "native stack",
            GcRoot::SystemClass { .. } => "sticky class",
            GcRoot::ThreadBlock { .. } => "thread block",
            GcRoot::BusyMonitor { .. } => "busy monitor",
            GcRoot::ThreadObj { .. } => "thread object",
        }
    }
}

/// A stack trace with its frame id list copied out of the input buffer.
#[derive(Debug, Clone)]
pub struct TraceRec {
    pub serial: Serial,
    pub thread_serial: Serial,
    pub frame_ids: Vec<Id>,
}

/// How an owner holds a reference to a target object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerKind {
    InstanceField,
    StaticField,
    ArrayElement,
}

impl OwnerKind {
    pub fn label(&self) -> &'static str {
        match self {
            OwnerKind::InstanceField => "instance field",
            OwnerKind::StaticField => "static field",
            OwnerKind::ArrayElement => "array element",
        }
    }
}

/// One reverse edge: `owner_id` references the target through `via`
/// (a field name or an `[index]`).
#[derive(Debug, Clone)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub owner_id: Id,
    pub via: String,
}

/// Read-only contract the analytics run against. Both the in-process
/// [`HeapIndex`] and an external relational backend can serve it.
pub trait ObjectStore: Sync {
    fn id_size(&self) -> IdSize;

    fn interned_string(&self, id: Id) -> Option<&str>;

    fn load_class(&self, class_obj_id: Id) -> Option<&LoadClass>;

    fn class_dump(&self, class_obj_id: Id) -> Option<&Class>;

    /// The class-dump for an id that is expected to resolve.
    fn class_of(&self, class_obj_id: Id) -> Result<&Class> {
        self.class_dump(class_obj_id)
            .ok_or(HprofError::UnresolvedReference(class_obj_id.id()))
    }

    /// Class name resolved through LoadClass → interned string, with `/`
    /// normalized to `.`; unresolved ids get a placeholder instead of an
    /// error.
    fn class_name(&self, class_obj_id: Id) -> String {
        self.load_class(class_obj_id)
            .and_then(|lc| self.interned_string(lc.class_name_id()))
            .map(|s| s.replace('/', "."))
            .unwrap_or_else(|| format!("Unknown class {}", class_obj_id))
    }

    fn instance(&self, obj_id: Id) -> Option<&InstanceRec>;

    fn object_array(&self, obj_id: Id) -> Option<&ObjectArrayRec>;

    fn primitive_array(&self, obj_id: Id) -> Option<&PrimitiveArrayRec>;

    fn instances_of(&self, class_obj_id: Id) -> &[Id];

    fn classes(&self) -> Box<dyn Iterator<Item = &Class> + Send + '_>;

    fn instances(&self) -> Box<dyn Iterator<Item = &InstanceRec> + Send + '_>;

    fn object_arrays(&self) -> Box<dyn Iterator<Item = &ObjectArrayRec> + Send + '_>;

    fn primitive_arrays(&self) -> Box<dyn Iterator<Item = &PrimitiveArrayRec> + Send + '_>;

    fn gc_roots(&self) -> &[GcRoot];

    /// Instances whose projected object fields hold `target`.
    fn instance_field_refs_to(&self, target: Id) -> &[OwnerRef];

    /// Classes whose static fields hold `target`.
    fn static_field_refs_to(&self, target: Id) -> &[OwnerRef];

    /// Object arrays with `target` in an element slot.
    fn array_element_refs_to(&self, target: Id) -> &[OwnerRef];
}

/// Per-entity counts, used for the ingest log line and to compare two
/// decodes of the same file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub strings: usize,
    pub load_classes: usize,
    pub class_dumps: usize,
    pub instances: usize,
    pub object_arrays: usize,
    pub primitive_arrays: usize,
    pub gc_roots: usize,
    pub stack_frames: usize,
    pub stack_traces: usize,
    pub threads: usize,
    pub corrupt_segments: u32,
}

/// The in-memory backend: everything decoded from one snapshot, keyed by id.
pub struct HeapIndex {
    id_size: IdSize,
    timestamp_millis: i64,
    strings: HashMap<Id, Box<str>>,
    load_classes_by_obj_id: HashMap<Id, LoadClass>,
    load_classes_by_serial: HashMap<Serial, LoadClass>,
    class_dumps: HashMap<Id, Class>,
    instances: HashMap<Id, InstanceRec>,
    instances_by_class: HashMap<Id, Vec<Id>>,
    object_arrays: HashMap<Id, ObjectArrayRec>,
    primitive_arrays: HashMap<Id, PrimitiveArrayRec>,
    gc_roots: Vec<GcRoot>,
    stack_frames: HashMap<Id, StackFrame>,
    stack_traces: HashMap<Serial, TraceRec>,
    threads: HashMap<Serial, StartThread>,
    thread_alive: HashMap<Serial, bool>,
    record_counts: HashMap<u8, u64>,
    corrupt_segments: u32,
    reverse: OnceLock<ReverseIndex>,
}

impl HeapIndex {
    /// Single consuming pass over the record stream. A corrupt heap-dump
    /// segment is abandoned with a warning and ingest resumes at the next
    /// top-level record; any other decode error aborts.
    pub fn from_hprof(hprof: &Hprof, opts: &DecodeOptions) -> Result<HeapIndex> {
        let header = hprof.header();
        let mut ix = HeapIndex {
            id_size: header.id_size(),
            timestamp_millis: header.timestamp_millis(),
            strings: HashMap::new(),
            load_classes_by_obj_id: HashMap::new(),
            load_classes_by_serial: HashMap::new(),
            class_dumps: HashMap::new(),
            instances: HashMap::new(),
            instances_by_class: HashMap::new(),
            object_arrays: HashMap::new(),
            primitive_arrays: HashMap::new(),
            gc_roots: Vec::new(),
            stack_frames: HashMap::new(),
            stack_traces: HashMap::new(),
            threads: HashMap::new(),
            thread_alive: HashMap::new(),
            record_counts: HashMap::new(),
            corrupt_segments: 0,
            reverse: OnceLock::new(),
        };

        for record in hprof.records_iter() {
            let record = record?;
            *ix.record_counts.entry(record.tag_byte()).or_insert(0) += 1;

            match record.tag() {
                Some(RecordTag::Utf8) => {
                    if let Some(utf8) = record.as_utf_8() {
                        let utf8 = utf8?;
                        let text = String::from_utf8_lossy(utf8.text()).into_owned();
                        ix.strings.insert(utf8.name_id(), text.into_boxed_str());
                    }
                }
                Some(RecordTag::LoadClass) => {
                    if let Some(lc) = record.as_load_class() {
                        let lc = lc?;
                        ix.load_classes_by_obj_id.insert(lc.class_obj_id(), lc);
                        ix.load_classes_by_serial.insert(lc.class_serial(), lc);
                    }
                }
                Some(RecordTag::StackFrame) => {
                    if let Some(frame) = record.as_stack_frame() {
                        let frame = frame?;
                        ix.stack_frames.insert(frame.id(), frame);
                    }
                }
                Some(RecordTag::StackTrace) => {
                    if let Some(trace) = record.as_stack_trace() {
                        let trace = trace?;
                        let frame_ids = trace.frame_ids().collect::<Result<Vec<Id>>>()?;
                        ix.stack_traces.insert(
                            trace.stack_trace_serial(),
                            TraceRec {
                                serial: trace.stack_trace_serial(),
                                thread_serial: trace.thread_serial(),
                                frame_ids,
                            },
                        );
                    }
                }
                Some(RecordTag::StartThread) => {
                    if let Some(start) = record.as_start_thread() {
                        let start = start?;
                        // lifecycle records observed later supersede earlier
                        // ones for the same serial
                        ix.thread_alive.insert(start.thread_serial(), true);
                        ix.threads.insert(start.thread_serial(), start);
                    }
                }
                Some(RecordTag::EndThread) => {
                    if let Some(end) = record.as_end_thread() {
                        let end = end?;
                        ix.thread_alive.insert(end.thread_serial(), false);
                    }
                }
                Some(RecordTag::HeapDump) | Some(RecordTag::HeapDumpSegment) => {
                    if let Some(segment) = record.as_heap_dump_segment() {
                        ix.ingest_segment(segment, opts);
                    }
                }
                // recognized but not materialized: alloc sites, heap
                // summaries, cpu samples, control settings, unload class,
                // heap dump end
                Some(_) | None => {}
            }
        }

        Ok(ix)
    }

    fn ingest_segment(&mut self, segment: crate::HeapDumpSegment<'_>, opts: &DecodeOptions) {
        for sub in segment.sub_records() {
            let applied = sub.and_then(|s| self.apply_sub_record(s, opts));
            if let Err(e) = applied {
                warn!(error = %e, "abandoning heap dump segment, resuming at next record");
                self.corrupt_segments += 1;
                return;
            }
        }
    }

    fn apply_sub_record(&mut self, sub: SubRecord<'_>, opts: &DecodeOptions) -> Result<()> {
        match sub {
            SubRecord::GcRootUnknown(r) => self.gc_roots.push(GcRoot::Unknown {
                obj_id: r.obj_id(),
            }),
            SubRecord::GcRootJniGlobal(r) => self.gc_roots.push(GcRoot::JniGlobal {
                obj_id: r.obj_id(),
                jni_global_ref_id: r.jni_global_ref_id(),
            }),
            SubRecord::GcRootJniLocalRef(r) => self.gc_roots.push(GcRoot::JniLocalRef {
                obj_id: r.obj_id(),
                thread_serial: r.thread_serial(),
                frame_index: r.frame_index(),
            }),
            SubRecord::GcRootJavaStackFrame(r) => self.gc_roots.push(GcRoot::JavaStackFrame {
                obj_id: r.obj_id(),
                thread_serial: r.thread_serial(),
                frame_index: r.frame_index(),
            }),
            SubRecord::GcRootNativeStack(r) => self.gc_roots.push(GcRoot::NativeStack {
                obj_id: r.obj_id(),
                thread_serial: r.thread_serial(),
            }),
            SubRecord::GcRootSystemClass(r) => self.gc_roots.push(GcRoot::SystemClass {
                obj_id: r.obj_id(),
            }),
            SubRecord::GcRootThreadBlock(r) => self.gc_roots.push(GcRoot::ThreadBlock {
                obj_id: r.obj_id(),
                thread_serial: r.thread_serial(),
            }),
            SubRecord::GcRootBusyMonitor(r) => self.gc_roots.push(GcRoot::BusyMonitor {
                obj_id: r.obj_id(),
            }),
            SubRecord::GcRootThreadObj(r) => self.gc_roots.push(GcRoot::ThreadObj {
                thread_obj_id: r.thread_obj_id(),
                thread_serial: r.thread_serial(),
                stack_trace_serial: r.stack_trace_serial(),
            }),
            SubRecord::Class(class) => {
                self.class_dumps.insert(class.obj_id(), class);
            }
            SubRecord::Instance(instance) => {
                self.instances_by_class
                    .entry(instance.class_obj_id())
                    .or_default()
                    .push(instance.obj_id());
                self.instances.insert(
                    instance.obj_id(),
                    InstanceRec {
                        obj_id: instance.obj_id(),
                        stack_trace_serial: instance.stack_trace_serial(),
                        class_obj_id: instance.class_obj_id(),
                        payload: instance.fields().to_vec().into_boxed_slice(),
                    },
                );
            }
            SubRecord::ObjectArray(array) => {
                let indexed = array.num_elements() <= opts.max_indexed_elements;
                let elements = if indexed {
                    array
                        .elements(self.id_size)
                        .collect::<Result<Vec<Option<Id>>>>()?
                } else {
                    Vec::new()
                };
                self.object_arrays.insert(
                    array.obj_id(),
                    ObjectArrayRec {
                        obj_id: array.obj_id(),
                        stack_trace_serial: array.stack_trace_serial(),
                        array_class_obj_id: array.array_class_obj_id(),
                        num_elements: array.num_elements(),
                        elements,
                        elements_indexed: indexed,
                    },
                );
            }
            SubRecord::PrimitiveArray(array) => {
                let indexed = array.num_elements() <= opts.max_indexed_elements;
                let contents = if indexed {
                    array.contents().to_vec().into_boxed_slice()
                } else {
                    Box::default()
                };
                self.primitive_arrays.insert(
                    array.obj_id(),
                    PrimitiveArrayRec {
                        obj_id: array.obj_id(),
                        stack_trace_serial: array.stack_trace_serial(),
                        elem_type: array.primitive_type(),
                        num_elements: array.num_elements(),
                        contents,
                        contents_indexed: indexed,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn load_class_by_serial(&self, serial: Serial) -> Option<&LoadClass> {
        self.load_classes_by_serial.get(&serial)
    }

    pub fn stack_frame(&self, frame_id: Id) -> Option<&StackFrame> {
        self.stack_frames.get(&frame_id)
    }

    pub fn stack_traces(&self) -> impl Iterator<Item = &TraceRec> {
        self.stack_traces.values()
    }

    pub fn thread(&self, serial: Serial) -> Option<&StartThread> {
        self.threads.get(&serial)
    }

    /// A serial marked ended is dead; anything else counts as alive.
    pub fn thread_alive(&self, serial: Serial) -> bool {
        self.thread_alive.get(&serial).copied().unwrap_or(true)
    }

    pub fn record_count(&self, tag: RecordTag) -> u64 {
        self.record_counts
            .get(&tag.tag_byte())
            .copied()
            .unwrap_or(0)
    }

    pub fn corrupt_segments(&self) -> u32 {
        self.corrupt_segments
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            strings: self.strings.len(),
            load_classes: self.load_classes_by_obj_id.len(),
            class_dumps: self.class_dumps.len(),
            instances: self.instances.len(),
            object_arrays: self.object_arrays.len(),
            primitive_arrays: self.primitive_arrays.len(),
            gc_roots: self.gc_roots.len(),
            stack_frames: self.stack_frames.len(),
            stack_traces: self.stack_traces.len(),
            threads: self.threads.len(),
            corrupt_segments: self.corrupt_segments,
        }
    }

    fn reverse(&self) -> &ReverseIndex {
        self.reverse.get_or_init(|| ReverseIndex::build(self))
    }
}

static EMPTY_IDS: &[Id] = &[];

impl ObjectStore for HeapIndex {
    fn id_size(&self) -> IdSize {
        self.id_size
    }

    fn interned_string(&self, id: Id) -> Option<&str> {
        self.strings.get(&id).map(|s| s.as_ref())
    }

    fn load_class(&self, class_obj_id: Id) -> Option<&LoadClass> {
        self.load_classes_by_obj_id.get(&class_obj_id)
    }

    fn class_dump(&self, class_obj_id: Id) -> Option<&Class> {
        self.class_dumps.get(&class_obj_id)
    }

    fn instance(&self, obj_id: Id) -> Option<&InstanceRec> {
        self.instances.get(&obj_id)
    }

    fn object_array(&self, obj_id: Id) -> Option<&ObjectArrayRec> {
        self.object_arrays.get(&obj_id)
    }

    fn primitive_array(&self, obj_id: Id) -> Option<&PrimitiveArrayRec> {
        self.primitive_arrays.get(&obj_id)
    }

    fn instances_of(&self, class_obj_id: Id) -> &[Id] {
        self.instances_by_class
            .get(&class_obj_id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY_IDS)
    }

    fn classes(&self) -> Box<dyn Iterator<Item = &Class> + Send + '_> {
        Box::new(self.class_dumps.values())
    }

    fn instances(&self) -> Box<dyn Iterator<Item = &InstanceRec> + Send + '_> {
        Box::new(self.instances.values())
    }

    fn object_arrays(&self) -> Box<dyn Iterator<Item = &ObjectArrayRec> + Send + '_> {
        Box::new(self.object_arrays.values())
    }

    fn primitive_arrays(&self) -> Box<dyn Iterator<Item = &PrimitiveArrayRec> + Send + '_> {
        Box::new(self.primitive_arrays.values())
    }

    fn gc_roots(&self) -> &[GcRoot] {
        &self.gc_roots
    }

    fn instance_field_refs_to(&self, target: Id) -> &[OwnerRef] {
        self.reverse().refs(OwnerKind::InstanceField, target)
    }

    fn static_field_refs_to(&self, target: Id) -> &[OwnerRef] {
        self.reverse().refs(OwnerKind::StaticField, target)
    }

    fn array_element_refs_to(&self, target: Id) -> &[OwnerRef] {
        self.reverse().refs(OwnerKind::ArrayElement, target)
    }
}
