//! Decoding of the sub-record stream embedded in heap-dump records.
//!
//! A heap-dump body is a sequence of `sub-tag:u8` + sub-tag-specific bytes
//! with no per-sub-record length prefix, so decoding must understand every
//! recognized shape exactly; an unknown sub-tag makes the rest of the
//! segment undecodable and aborts it with
//! [`CorruptHeapSegment`](crate::HprofError::CorruptHeapSegment).

use getset::CopyGetters;
use nom::bytes::complete as bytes;
use nom::number::complete as number;

use crate::parsing_iterator::Counted;
use crate::{HprofError, Id, IdSize, Result, Serial};

mod primitive_array;
pub use primitive_array::{PrimitiveArray, PrimitiveArrayType};

// https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L132
const TAG_GC_ROOT_JNI_GLOBAL: u8 = 0x01;
const TAG_GC_ROOT_JNI_LOCAL: u8 = 0x02;
const TAG_GC_ROOT_JAVA_FRAME: u8 = 0x03;
const TAG_GC_ROOT_NATIVE_STACK: u8 = 0x04;
const TAG_GC_ROOT_STICKY_CLASS: u8 = 0x05;
const TAG_GC_ROOT_THREAD_BLOCK: u8 = 0x06;
const TAG_GC_ROOT_MONITOR_USED: u8 = 0x07;
const TAG_GC_ROOT_THREAD_OBJ: u8 = 0x08;
const TAG_CLASS_DUMP: u8 = 0x20;
const TAG_INSTANCE_DUMP: u8 = 0x21;
const TAG_OBJECT_ARRAY_DUMP: u8 = 0x22;
const TAG_PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
const TAG_GC_ROOT_UNKNOWN: u8 = 0xFF;

pub enum SubRecord<'a> {
    GcRootUnknown(GcRootUnknown),
    GcRootThreadObj(GcRootThreadObj),
    GcRootJniGlobal(GcRootJniGlobal),
    GcRootJniLocalRef(GcRootJniLocalRef),
    GcRootJavaStackFrame(GcRootJavaStackFrame),
    GcRootNativeStack(GcRootNativeStack),
    GcRootSystemClass(GcRootSystemClass),
    GcRootThreadBlock(GcRootThreadBlock),
    GcRootBusyMonitor(GcRootBusyMonitor),
    Class(Class),
    Instance(Instance<'a>),
    ObjectArray(ObjectArray<'a>),
    PrimitiveArray(PrimitiveArray<'a>),
}

impl<'a> SubRecord<'a> {
    pub(crate) fn parse<'i: 'r, 'r>(
        input: &'i [u8],
        id_size: IdSize,
    ) -> Result<(&'i [u8], SubRecord<'r>)> {
        let (input, sub_tag) = number::be_u8::<_, nom::error::Error<&[u8]>>(input)?;

        Ok(match sub_tag {
            TAG_GC_ROOT_UNKNOWN => {
                let (input, root) = GcRootUnknown::parse(input, id_size)?;
                (input, SubRecord::GcRootUnknown(root))
            }
            TAG_GC_ROOT_JNI_GLOBAL => {
                let (input, root) = GcRootJniGlobal::parse(input, id_size)?;
                (input, SubRecord::GcRootJniGlobal(root))
            }
            TAG_GC_ROOT_JNI_LOCAL => {
                let (input, root) = GcRootJniLocalRef::parse(input, id_size)?;
                (input, SubRecord::GcRootJniLocalRef(root))
            }
            TAG_GC_ROOT_JAVA_FRAME => {
                let (input, root) = GcRootJavaStackFrame::parse(input, id_size)?;
                (input, SubRecord::GcRootJavaStackFrame(root))
            }
            TAG_GC_ROOT_NATIVE_STACK => {
                let (input, root) = GcRootNativeStack::parse(input, id_size)?;
                (input, SubRecord::GcRootNativeStack(root))
            }
            TAG_GC_ROOT_STICKY_CLASS => {
                let (input, root) = GcRootSystemClass::parse(input, id_size)?;
                (input, SubRecord::GcRootSystemClass(root))
            }
            TAG_GC_ROOT_THREAD_BLOCK => {
                let (input, root) = GcRootThreadBlock::parse(input, id_size)?;
                (input, SubRecord::GcRootThreadBlock(root))
            }
            TAG_GC_ROOT_MONITOR_USED => {
                let (input, root) = GcRootBusyMonitor::parse(input, id_size)?;
                (input, SubRecord::GcRootBusyMonitor(root))
            }
            TAG_GC_ROOT_THREAD_OBJ => {
                let (input, root) = GcRootThreadObj::parse(input, id_size)?;
                (input, SubRecord::GcRootThreadObj(root))
            }
            TAG_CLASS_DUMP => {
                let (input, class) = Class::parse(input, id_size)?;
                (input, SubRecord::Class(class))
            }
            TAG_INSTANCE_DUMP => {
                let (input, instance) = Instance::parse(input, id_size)?;
                (input, SubRecord::Instance(instance))
            }
            TAG_OBJECT_ARRAY_DUMP => {
                let (input, array) = ObjectArray::parse(input, id_size)?;
                (input, SubRecord::ObjectArray(array))
            }
            TAG_PRIMITIVE_ARRAY_DUMP => {
                let (input, array) = PrimitiveArray::parse(input, id_size)?;
                (input, SubRecord::PrimitiveArray(array))
            }
            other => {
                return Err(HprofError::CorruptHeapSegment(format!(
                    "unknown heap dump sub-tag {:#04x}",
                    other
                )))
            }
        })
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootUnknown {
    #[get_copy = "pub"]
    obj_id: Id,
}

impl GcRootUnknown {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootUnknown> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        Ok((input, GcRootUnknown { obj_id }))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootThreadObj {
    /// May be missing for a thread newly attached through JNI.
    #[get_copy = "pub"]
    thread_obj_id: Option<Id>,
    #[get_copy = "pub"]
    thread_serial: Serial,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
}

impl GcRootThreadObj {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootThreadObj> {
        let (input, thread_obj_id) = Id::parse_nullable(input, id_size)?;
        let (input, thread_serial) = number::be_u32(input)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        Ok((
            input,
            GcRootThreadObj {
                thread_obj_id,
                thread_serial,
                stack_trace_serial,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootJniGlobal {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    jni_global_ref_id: Id,
}

impl GcRootJniGlobal {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootJniGlobal> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, jni_global_ref_id) = Id::parse(input, id_size)?;
        Ok((
            input,
            GcRootJniGlobal {
                obj_id,
                jni_global_ref_id,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootJniLocalRef {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    thread_serial: Serial,
    #[get_copy = "pub"]
    frame_index: u32,
}

impl GcRootJniLocalRef {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootJniLocalRef> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, thread_serial) = number::be_u32(input)?;
        let (input, frame_index) = number::be_u32(input)?;
        Ok((
            input,
            GcRootJniLocalRef {
                obj_id,
                thread_serial,
                frame_index,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootJavaStackFrame {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    thread_serial: Serial,
    #[get_copy = "pub"]
    frame_index: u32,
}

impl GcRootJavaStackFrame {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootJavaStackFrame> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, thread_serial) = number::be_u32(input)?;
        let (input, frame_index) = number::be_u32(input)?;
        Ok((
            input,
            GcRootJavaStackFrame {
                obj_id,
                thread_serial,
                frame_index,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootNativeStack {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    thread_serial: Serial,
}

impl GcRootNativeStack {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootNativeStack> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, thread_serial) = number::be_u32(input)?;
        Ok((
            input,
            GcRootNativeStack {
                obj_id,
                thread_serial,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootSystemClass {
    #[get_copy = "pub"]
    obj_id: Id,
}

impl GcRootSystemClass {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootSystemClass> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        Ok((input, GcRootSystemClass { obj_id }))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootThreadBlock {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    thread_serial: Serial,
}

impl GcRootThreadBlock {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootThreadBlock> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, thread_serial) = number::be_u32(input)?;
        Ok((
            input,
            GcRootThreadBlock {
                obj_id,
                thread_serial,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRootBusyMonitor {
    #[get_copy = "pub"]
    obj_id: Id,
}

impl GcRootBusyMonitor {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], GcRootBusyMonitor> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        Ok((input, GcRootBusyMonitor { obj_id }))
    }
}

/// Java field types as they appear in class dumps, with the one-byte codes
/// from the format: object=2, boolean=4, char=5, float=6, double=7, byte=8,
/// short=9, int=10, long=11.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    ObjectId,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl FieldType {
    pub fn from_type_code(code: u8) -> Option<FieldType> {
        Some(match code {
            0x02 => FieldType::ObjectId,
            0x04 => FieldType::Boolean,
            0x05 => FieldType::Char,
            0x06 => FieldType::Float,
            0x07 => FieldType::Double,
            0x08 => FieldType::Byte,
            0x09 => FieldType::Short,
            0x0A => FieldType::Int,
            0x0B => FieldType::Long,
            _ => return None,
        })
    }

    /// Stored width of a value of this type; object references are id-sized.
    pub fn size_bytes(&self, id_size: IdSize) -> usize {
        match self {
            FieldType::ObjectId => id_size.size_in_bytes(),
            FieldType::Boolean | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Float | FieldType::Int => 4,
            FieldType::Double | FieldType::Long => 8,
        }
    }

    pub fn java_type_name(&self) -> &'static str {
        match self {
            FieldType::ObjectId => "object",
            FieldType::Boolean => "boolean",
            FieldType::Char => "char",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Byte => "byte",
            FieldType::Short => "short",
            FieldType::Int => "int",
            FieldType::Long => "long",
        }
    }

    pub fn parse_value<'a>(
        &self,
        input: &'a [u8],
        id_size: IdSize,
    ) -> nom::IResult<&'a [u8], FieldValue> {
        match self {
            FieldType::ObjectId => {
                Id::parse_nullable(input, id_size).map(|(i, v)| (i, FieldValue::ObjectId(v)))
            }
            FieldType::Boolean => {
                number::be_u8(input).map(|(i, v)| (i, FieldValue::Boolean(v != 0)))
            }
            FieldType::Char => number::be_u16(input).map(|(i, v)| (i, FieldValue::Char(v))),
            FieldType::Float => number::be_f32(input).map(|(i, v)| (i, FieldValue::Float(v))),
            FieldType::Double => number::be_f64(input).map(|(i, v)| (i, FieldValue::Double(v))),
            FieldType::Byte => number::be_i8(input).map(|(i, v)| (i, FieldValue::Byte(v))),
            FieldType::Short => number::be_i16(input).map(|(i, v)| (i, FieldValue::Short(v))),
            FieldType::Int => number::be_i32(input).map(|(i, v)| (i, FieldValue::Int(v))),
            FieldType::Long => number::be_i64(input).map(|(i, v)| (i, FieldValue::Long(v))),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    ObjectId(Option<Id>),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl FieldValue {
    /// The referenced id when this is a non-null object value.
    pub fn as_object_id(&self) -> Option<Id> {
        match self {
            FieldValue::ObjectId(id) => *id,
            _ => None,
        }
    }
}

/// Instance field declaration: the payload layout key for instance dumps.
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct FieldDescriptor {
    #[get_copy = "pub"]
    name_id: Id,
    #[get_copy = "pub"]
    field_type: FieldType,
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct StaticFieldEntry {
    #[get_copy = "pub"]
    name_id: Id,
    #[get_copy = "pub"]
    field_type: FieldType,
    #[get_copy = "pub"]
    value: FieldValue,
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct ConstantPoolEntry {
    #[get_copy = "pub"]
    index: u16,
    #[get_copy = "pub"]
    field_type: FieldType,
    #[get_copy = "pub"]
    value: FieldValue,
}

/// A decoded class-dump sub-record. Owns its field tables, so the store can
/// keep it without copying.
#[derive(CopyGetters, Clone, Debug)]
pub struct Class {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    super_class_obj_id: Option<Id>,
    #[get_copy = "pub"]
    class_loader_obj_id: Option<Id>,
    #[get_copy = "pub"]
    signers_obj_id: Option<Id>,
    #[get_copy = "pub"]
    protection_domain_obj_id: Option<Id>,
    #[get_copy = "pub"]
    instance_size_bytes: u32,
    constant_pool: Vec<ConstantPoolEntry>,
    static_fields: Vec<StaticFieldEntry>,
    instance_field_descriptors: Vec<FieldDescriptor>,
}

impl Class {
    pub fn constant_pool(&self) -> &[ConstantPoolEntry] {
        &self.constant_pool
    }

    pub fn static_fields(&self) -> &[StaticFieldEntry] {
        &self.static_fields
    }

    /// Just this class's declared instance fields, not the superclasses'.
    pub fn instance_field_descriptors(&self) -> &[FieldDescriptor] {
        &self.instance_field_descriptors
    }

    fn parse(input: &[u8], id_size: IdSize) -> Result<(&[u8], Class)> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L231
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, super_class_obj_id) = Id::parse_nullable(input, id_size)?;
        let (input, class_loader_obj_id) = Id::parse_nullable(input, id_size)?;
        let (input, signers_obj_id) = Id::parse_nullable(input, id_size)?;
        let (input, protection_domain_obj_id) = Id::parse_nullable(input, id_size)?;
        // two reserved identifiers, read and ignored
        let (input, _reserved_1) = Id::parse(input, id_size)?;
        let (input, _reserved_2) = Id::parse(input, id_size)?;
        let (input, instance_size_bytes) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;

        let (input, constant_pool_len) = number::be_u16::<_, nom::error::Error<&[u8]>>(input)?;
        let mut input = input;
        let mut constant_pool = Vec::with_capacity(constant_pool_len as usize);
        for _ in 0..constant_pool_len {
            let (rest, index) = number::be_u16::<_, nom::error::Error<&[u8]>>(input)?;
            let (rest, field_type) = parse_field_type(rest)?;
            let (rest, value) = field_type.parse_value(rest, id_size)?;
            constant_pool.push(ConstantPoolEntry {
                index,
                field_type,
                value,
            });
            input = rest;
        }

        let (rest, static_len) = number::be_u16::<_, nom::error::Error<&[u8]>>(input)?;
        input = rest;
        let mut static_fields = Vec::with_capacity(static_len as usize);
        for _ in 0..static_len {
            let (rest, name_id) = Id::parse(input, id_size)?;
            let (rest, field_type) = parse_field_type(rest)?;
            let (rest, value) = field_type.parse_value(rest, id_size)?;
            static_fields.push(StaticFieldEntry {
                name_id,
                field_type,
                value,
            });
            input = rest;
        }

        let (rest, field_len) = number::be_u16::<_, nom::error::Error<&[u8]>>(input)?;
        input = rest;
        let mut instance_field_descriptors = Vec::with_capacity(field_len as usize);
        for _ in 0..field_len {
            let (rest, name_id) = Id::parse(input, id_size)?;
            let (rest, field_type) = parse_field_type(rest)?;
            instance_field_descriptors.push(FieldDescriptor {
                name_id,
                field_type,
            });
            input = rest;
        }

        Ok((
            input,
            Class {
                obj_id,
                stack_trace_serial,
                super_class_obj_id,
                class_loader_obj_id,
                signers_obj_id,
                protection_domain_obj_id,
                instance_size_bytes,
                constant_pool,
                static_fields,
                instance_field_descriptors,
            },
        ))
    }
}

fn parse_field_type(input: &[u8]) -> Result<(&[u8], FieldType)> {
    let (input, code) = number::be_u8::<_, nom::error::Error<&[u8]>>(input)?;
    match FieldType::from_type_code(code) {
        Some(t) => Ok((input, t)),
        None => Err(HprofError::CorruptHeapSegment(format!(
            "unknown field type code {:#04x}",
            code
        ))),
    }
}

/// An instance dump: the payload is opaque until projected through the
/// class-dump chain (see [`crate::graph::project_instance`]).
#[derive(CopyGetters, Copy, Clone)]
pub struct Instance<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    class_obj_id: Id,
    fields: &'a [u8],
}

impl<'a> Instance<'a> {
    /// Raw instance field bytes, `number_of_bytes` long.
    pub fn fields(&self) -> &'a [u8] {
        self.fields
    }

    fn parse<'i: 'r, 'r>(input: &'i [u8], id_size: IdSize) -> Result<(&'i [u8], Instance<'r>)> {
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, class_obj_id) = Id::parse(input, id_size)?;
        let (input, num_bytes) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, fields) = bytes::take::<_, _, nom::error::Error<&[u8]>>(num_bytes)(input)?;

        Ok((
            input,
            Instance {
                obj_id,
                stack_trace_serial,
                class_obj_id,
                fields,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct ObjectArray<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    array_class_obj_id: Id,
    #[get_copy = "pub"]
    num_elements: u32,
    elements_bytes: &'a [u8],
}

impl<'a> ObjectArray<'a> {
    /// Element ids in index order; `None` is a null slot.
    pub fn elements(&self, id_size: IdSize) -> impl Iterator<Item = Result<Option<Id>>> + 'a {
        Counted::new(self.elements_bytes, self.num_elements, move |i| {
            Id::parse_nullable(i, id_size)
        })
    }

    fn parse<'i: 'r, 'r>(input: &'i [u8], id_size: IdSize) -> Result<(&'i [u8], ObjectArray<'r>)> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L271
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, num_elements) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, array_class_obj_id) = Id::parse(input, id_size)?;
        let (input, elements_bytes) = bytes::take::<_, _, nom::error::Error<&[u8]>>(
            num_elements as usize * id_size.size_in_bytes(),
        )(input)?;

        Ok((
            input,
            ObjectArray {
                obj_id,
                stack_trace_serial,
                array_class_obj_id,
                num_elements,
                elements_bytes,
            },
        ))
    }
}
