//! Byte-level builder for synthetic hprof files used by the integration
//! tests. Mirrors the record framing the decoder expects: header, framed
//! top-level records, and heap-dump segments holding sub-records.
#![allow(dead_code)]

use hprof_inspect::store::{DecodeOptions, HeapIndex};

pub const TAG_UTF8: u8 = 0x01;
pub const TAG_LOAD_CLASS: u8 = 0x02;
pub const TAG_STACK_FRAME: u8 = 0x04;
pub const TAG_STACK_TRACE: u8 = 0x05;
pub const TAG_START_THREAD: u8 = 0x0A;
pub const TAG_END_THREAD: u8 = 0x0B;
pub const TAG_HEAP_DUMP_SEGMENT: u8 = 0x1C;
pub const TAG_HEAP_DUMP_END: u8 = 0x2C;

pub const SUB_CLASS_DUMP: u8 = 0x20;
pub const SUB_INSTANCE_DUMP: u8 = 0x21;
pub const SUB_OBJECT_ARRAY_DUMP: u8 = 0x22;
pub const SUB_PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
pub const SUB_ROOT_JAVA_FRAME: u8 = 0x03;

pub const TYPE_OBJECT: u8 = 0x02;
pub const TYPE_CHAR: u8 = 0x05;
pub const TYPE_BYTE: u8 = 0x08;
pub const TYPE_INT: u8 = 0x0A;
pub const TYPE_LONG: u8 = 0x0B;

/// Big-endian byte accumulator with id-size-aware identifier writes.
pub struct Payload {
    id_size: u32,
    pub buf: Vec<u8>,
}

impl Payload {
    pub fn new(id_size: u32) -> Payload {
        Payload {
            id_size,
            buf: Vec::new(),
        }
    }

    pub fn u1(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u2(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u4(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i4(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn id(&mut self, v: u64) -> &mut Self {
        if self.id_size == 4 {
            self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }
}

pub struct DumpBuilder {
    id_size: u32,
    buf: Vec<u8>,
}

impl DumpBuilder {
    pub fn new(id_size: u32) -> DumpBuilder {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"JAVA PROFILE 1.0.2");
        buf.push(0);
        buf.extend_from_slice(&id_size.to_be_bytes());
        buf.extend_from_slice(&0_i64.to_be_bytes());
        DumpBuilder { id_size, buf }
    }

    pub fn id_size(&self) -> u32 {
        self.id_size
    }

    pub fn record(&mut self, tag: u8, payload: &[u8]) -> &mut Self {
        self.buf.push(tag);
        self.buf.extend_from_slice(&0_u32.to_be_bytes());
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn utf8(&mut self, id: u64, text: &str) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.id(id).bytes(text.as_bytes());
        let buf = p.buf;
        self.record(TAG_UTF8, &buf)
    }

    pub fn load_class(&mut self, serial: u32, class_obj_id: u64, name_id: u64) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u4(serial).id(class_obj_id).u4(0).id(name_id);
        let buf = p.buf;
        self.record(TAG_LOAD_CLASS, &buf)
    }

    pub fn stack_frame(
        &mut self,
        frame_id: u64,
        method_name_id: u64,
        source_file_id: u64,
        class_serial: u32,
        line: i32,
    ) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.id(frame_id)
            .id(method_name_id)
            .id(0) // method signature
            .id(source_file_id)
            .u4(class_serial)
            .i4(line);
        let buf = p.buf;
        self.record(TAG_STACK_FRAME, &buf)
    }

    pub fn stack_trace(&mut self, serial: u32, thread_serial: u32, frame_ids: &[u64]) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u4(serial).u4(thread_serial).u4(frame_ids.len() as u32);
        for id in frame_ids {
            p.id(*id);
        }
        let buf = p.buf;
        self.record(TAG_STACK_TRACE, &buf)
    }

    pub fn start_thread(&mut self, serial: u32, thread_obj_id: u64, name_id: u64) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u4(serial).id(thread_obj_id).u4(0).id(name_id).id(0).id(0);
        let buf = p.buf;
        self.record(TAG_START_THREAD, &buf)
    }

    pub fn end_thread(&mut self, serial: u32) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u4(serial);
        let buf = p.buf;
        self.record(TAG_END_THREAD, &buf)
    }

    pub fn heap_segment(&mut self, segment: &HeapSegment) -> &mut Self {
        let buf = segment.buf.clone();
        self.record(TAG_HEAP_DUMP_SEGMENT, &buf)
    }

    pub fn heap_dump_end(&mut self) -> &mut Self {
        self.record(TAG_HEAP_DUMP_END, &[])
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// Declared field for class-dump construction.
pub struct Field {
    pub name_id: u64,
    pub type_code: u8,
}

/// Static field with its raw value bytes (already the declared width).
pub struct StaticField {
    pub name_id: u64,
    pub type_code: u8,
    pub value: Vec<u8>,
}

impl StaticField {
    pub fn object(name_id: u64, target: u64, id_size: u32) -> StaticField {
        let mut p = Payload::new(id_size);
        p.id(target);
        StaticField {
            name_id,
            type_code: TYPE_OBJECT,
            value: p.buf,
        }
    }
}

/// Accumulates heap-dump sub-record bytes.
pub struct HeapSegment {
    id_size: u32,
    buf: Vec<u8>,
}

impl HeapSegment {
    pub fn new(id_size: u32) -> HeapSegment {
        HeapSegment {
            id_size,
            buf: Vec::new(),
        }
    }

    pub fn class_dump(
        &mut self,
        class_obj_id: u64,
        super_class_obj_id: u64,
        class_loader_obj_id: u64,
        instance_size: u32,
        statics: &[StaticField],
        fields: &[Field],
    ) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u1(SUB_CLASS_DUMP)
            .id(class_obj_id)
            .u4(0) // stack trace serial
            .id(super_class_obj_id)
            .id(class_loader_obj_id)
            .id(0) // signers
            .id(0) // protection domain
            .id(0) // reserved
            .id(0) // reserved
            .u4(instance_size)
            .u2(0); // constant pool
        p.u2(statics.len() as u16);
        for sf in statics {
            p.id(sf.name_id).u1(sf.type_code).bytes(&sf.value);
        }
        p.u2(fields.len() as u16);
        for f in fields {
            p.id(f.name_id).u1(f.type_code);
        }
        self.buf.extend_from_slice(&p.buf);
        self
    }

    pub fn instance(&mut self, obj_id: u64, class_obj_id: u64, payload: &[u8]) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u1(SUB_INSTANCE_DUMP)
            .id(obj_id)
            .u4(0)
            .id(class_obj_id)
            .u4(payload.len() as u32)
            .bytes(payload);
        self.buf.extend_from_slice(&p.buf);
        self
    }

    pub fn object_array(
        &mut self,
        obj_id: u64,
        array_class_obj_id: u64,
        elements: &[u64],
    ) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u1(SUB_OBJECT_ARRAY_DUMP)
            .id(obj_id)
            .u4(0)
            .u4(elements.len() as u32)
            .id(array_class_obj_id);
        for el in elements {
            p.id(*el);
        }
        self.buf.extend_from_slice(&p.buf);
        self
    }

    pub fn primitive_array(&mut self, obj_id: u64, type_code: u8, elements: &[u8]) -> &mut Self {
        let width = match type_code {
            TYPE_CHAR => 2,
            TYPE_BYTE => 1,
            TYPE_INT => 4,
            TYPE_LONG => 8,
            0x04 => 1,
            0x09 => 2,
            0x06 => 4,
            0x07 => 8,
            other => panic!("unsupported test element type {:#x}", other),
        };
        assert_eq!(0, elements.len() % width);
        let mut p = Payload::new(self.id_size);
        p.u1(SUB_PRIMITIVE_ARRAY_DUMP)
            .id(obj_id)
            .u4(0)
            .u4((elements.len() / width) as u32)
            .u1(type_code)
            .bytes(elements);
        self.buf.extend_from_slice(&p.buf);
        self
    }

    pub fn root_java_frame(&mut self, obj_id: u64, thread_serial: u32) -> &mut Self {
        let mut p = Payload::new(self.id_size);
        p.u1(SUB_ROOT_JAVA_FRAME).id(obj_id).u4(thread_serial).u4(0);
        self.buf.extend_from_slice(&p.buf);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }
}

/// Decode a built dump into the in-memory store, panicking on any ingest
/// failure.
pub fn decode(bytes: &[u8]) -> HeapIndex {
    let hprof = hprof_inspect::parse_hprof(bytes).expect("header should parse");
    HeapIndex::from_hprof(&hprof, &DecodeOptions::default()).expect("ingest should succeed")
}

/// UTF-16BE encode a string for char-array construction.
pub fn utf16_be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}
