//! Decoder and analysis engine for JVM heap snapshots in the binary hprof
//! format (`JAVA PROFILE 1.0.2`).
//!
//! The decoder is a single pass over the file: [`parse_hprof`] frames the
//! top-level records lazily, [`heap_dump`] decodes the sub-record stream
//! embedded in heap-dump records, and [`store::HeapIndex`] collects the
//! decoded entities into an immutable snapshot that the [`analysis`] and
//! [`graph`] modules query read-only.

use getset::CopyGetters;
use nom::bytes::complete as bytes;
use nom::number::complete as number;
use std::cmp::Ordering;
use std::fmt::{self, Formatter};

pub mod analysis;
pub mod errors;
pub mod graph;
pub mod heap_dump;
mod parsing_iterator;
pub mod store;
pub mod threads;
pub mod web;

pub use errors::{HprofError, Result};

use parsing_iterator::Counted;

/// An object identifier within a single dump.
#[derive(CopyGetters, Copy, Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Id {
    // 4-byte ids are zero-extended; a heap small enough for 32-bit ids does
    // not care about the extra half word
    #[get_copy = "pub"]
    id: u64,
}

impl From<u64> for Id {
    fn from(id: u64) -> Id {
        Id { id }
    }
}

impl Id {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Id> {
        let (input, id) = match id_size {
            IdSize::U32 => number::be_u32(input).map(|(i, id)| (i, u64::from(id)))?,
            IdSize::U64 => number::be_u64(input)?,
        };

        Ok((input, Id { id }))
    }

    /// Id `0` is the null reference.
    fn parse_nullable(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Option<Id>> {
        Id::parse(input, id_size).map(|(i, id)| (i, if id.id == 0 { None } else { Some(id) }))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::UpperHex for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.id, f)
    }
}

pub type Serial = u32;

/// Identifier width declared in the header; affects every id read and every
/// size computation involving object references. Never hardcode 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSize {
    U32,
    U64,
}

impl IdSize {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            IdSize::U32 => 4,
            IdSize::U64 => 8,
        }
    }
}

const HEADER_MAGIC: &[u8] = b"JAVA PROFILE 1.0.2";

// https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp

/// A parsed dump: the header plus a lazy view of the record stream.
#[derive(CopyGetters)]
pub struct Hprof<'a> {
    #[get_copy = "pub"]
    header: Header,
    records: &'a [u8],
}

impl<'a> Hprof<'a> {
    pub fn records_iter<'i>(&self) -> Records<'i>
    where
        'a: 'i,
    {
        Records {
            remaining: self.records,
            id_size: self.header.id_size,
        }
    }
}

pub fn parse_hprof(input: &[u8]) -> Result<Hprof> {
    let (input, header) = Header::parse(input)?;

    Ok(Hprof {
        header,
        records: input,
    })
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct Header {
    #[get_copy = "pub"]
    id_size: IdSize,
    /// Millis since epoch, signed big-endian.
    #[get_copy = "pub"]
    timestamp_millis: i64,
}

impl Header {
    fn parse(input: &[u8]) -> Result<(&[u8], Header)> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L63
        let (input, label) = bytes::take_until::<_, _, nom::error::Error<&[u8]>>(&b"\0"[..])(
            input,
        )
        .map_err(|_| HprofError::BadMagic)?;
        if label != HEADER_MAGIC {
            return Err(HprofError::BadMagic);
        }
        let (input, _) = bytes::take::<_, _, nom::error::Error<&[u8]>>(1_usize)(input)?;

        let (input, id_size_num) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, timestamp_millis) = number::be_i64::<_, nom::error::Error<&[u8]>>(input)?;

        let id_size = match id_size_num {
            4 => IdSize::U32,
            8 => IdSize::U64,
            other => return Err(HprofError::UnsupportedIdSize(other)),
        };

        Ok((
            input,
            Header {
                id_size,
                timestamp_millis,
            },
        ))
    }
}

/// Lazy iterator over top-level record frames.
///
/// A clean end of stream is exactly "no bytes remain before the next tag";
/// content that cannot form a complete frame is [`HprofError::TrailingBytes`].
pub struct Records<'a> {
    remaining: &'a [u8],
    id_size: IdSize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        match Record::parse(self.remaining, self.id_size) {
            Ok((input, record)) => {
                self.remaining = input;
                Some(Ok(record))
            }
            Err(_) => {
                let trailing = self.remaining.len();
                self.remaining = &[];
                Some(Err(HprofError::TrailingBytes(trailing)))
            }
        }
    }
}

/// A framed top-level record: `(tag, micros-since-header, length, body)`.
///
/// The body is a bounded slice; typed accessors decode it on demand, and a
/// decoder that runs past the body fails with [`HprofError::ShortRecord`]
/// instead of reading into the next record.
#[derive(CopyGetters, Copy, Clone)]
pub struct Record<'a> {
    #[get_copy = "pub"]
    tag_byte: u8,
    #[get_copy = "pub"]
    micros_since_header_ts: u32,
    id_size: IdSize,
    body: &'a [u8],
}

impl<'a> Record<'a> {
    /// `None` for tags this crate does not recognize; the framer has already
    /// consumed their `length` bytes, so they are skipped for free.
    pub fn tag(&self) -> Option<RecordTag> {
        RecordTag::from_byte(self.tag_byte)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn as_utf_8(&self) -> Option<Result<Utf8<'a>>> {
        match self.tag() {
            Some(RecordTag::Utf8) => Some(Utf8::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    pub fn as_load_class(&self) -> Option<Result<LoadClass>> {
        match self.tag() {
            Some(RecordTag::LoadClass) => Some(finish_body(
                "LoadClass",
                LoadClass::parse(self.body, self.id_size),
            )),
            _ => None,
        }
    }

    pub fn as_stack_frame(&self) -> Option<Result<StackFrame>> {
        match self.tag() {
            Some(RecordTag::StackFrame) => Some(finish_body(
                "StackFrame",
                StackFrame::parse(self.body, self.id_size),
            )),
            _ => None,
        }
    }

    pub fn as_stack_trace(&self) -> Option<Result<StackTrace<'a>>> {
        match self.tag() {
            Some(RecordTag::StackTrace) => Some(StackTrace::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    pub fn as_start_thread(&self) -> Option<Result<StartThread>> {
        match self.tag() {
            Some(RecordTag::StartThread) => Some(finish_body(
                "StartThread",
                StartThread::parse(self.body, self.id_size),
            )),
            _ => None,
        }
    }

    pub fn as_end_thread(&self) -> Option<Result<EndThread>> {
        match self.tag() {
            Some(RecordTag::EndThread) => {
                Some(finish_body("EndThread", EndThread::parse(self.body)))
            }
            _ => None,
        }
    }

    pub fn as_heap_dump_segment(&self) -> Option<HeapDumpSegment<'a>> {
        match self.tag() {
            Some(RecordTag::HeapDump) | Some(RecordTag::HeapDumpSegment) => {
                Some(HeapDumpSegment {
                    id_size: self.id_size,
                    records: self.body,
                })
            }
            _ => None,
        }
    }

    fn parse<'i: 'r, 'r>(input: &'i [u8], id_size: IdSize) -> nom::IResult<&'i [u8], Record<'r>> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L76
        let (input, tag_byte) = number::be_u8(input)?;
        let (input, micros) = number::be_u32(input)?;
        let (input, len) = number::be_u32(input)?;
        let (input, body) = bytes::take(len)(input)?;

        Ok((
            input,
            Record {
                tag_byte,
                micros_since_header_ts: micros,
                id_size,
                body,
            },
        ))
    }
}

/// Map nom failures in a bounded body to `ShortRecord`, and note bodies the
/// decoder did not fully drain.
fn finish_body<T>(record_name: &str, parsed: nom::IResult<&[u8], T>) -> Result<T> {
    match parsed {
        Ok((rest, value)) => {
            if !rest.is_empty() {
                tracing::warn!(
                    record = record_name,
                    leftover = rest.len(),
                    "record body not fully consumed; skipping remainder"
                );
            }
            Ok(value)
        }
        Err(_) => Err(HprofError::ShortRecord),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RecordTag {
    Utf8,
    LoadClass,
    UnloadClass,
    StackFrame,
    StackTrace,
    AllocSites,
    HeapSummary,
    StartThread,
    EndThread,
    HeapDump,
    CpuSamples,
    ControlSettings,
    HeapDumpSegment,
    HeapDumpEnd,
}

impl RecordTag {
    pub fn from_byte(b: u8) -> Option<RecordTag> {
        Some(match b {
            0x01 => RecordTag::Utf8,
            0x02 => RecordTag::LoadClass,
            0x03 => RecordTag::UnloadClass,
            0x04 => RecordTag::StackFrame,
            0x05 => RecordTag::StackTrace,
            0x06 => RecordTag::AllocSites,
            0x07 => RecordTag::HeapSummary,
            0x0A => RecordTag::StartThread,
            0x0B => RecordTag::EndThread,
            0x0C => RecordTag::HeapDump,
            0x0D => RecordTag::CpuSamples,
            0x0E => RecordTag::ControlSettings,
            0x1C => RecordTag::HeapDumpSegment,
            0x2C => RecordTag::HeapDumpEnd,
            _ => return None,
        })
    }

    pub fn tag_byte(&self) -> u8 {
        match self {
            RecordTag::Utf8 => 0x01,
            RecordTag::LoadClass => 0x02,
            RecordTag::UnloadClass => 0x03,
            RecordTag::StackFrame => 0x04,
            RecordTag::StackTrace => 0x05,
            RecordTag::AllocSites => 0x06,
            RecordTag::HeapSummary => 0x07,
            RecordTag::StartThread => 0x0A,
            RecordTag::EndThread => 0x0B,
            RecordTag::HeapDump => 0x0C,
            RecordTag::CpuSamples => 0x0D,
            RecordTag::ControlSettings => 0x0E,
            RecordTag::HeapDumpSegment => 0x1C,
            RecordTag::HeapDumpEnd => 0x2C,
        }
    }
}

impl Ord for RecordTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag_byte().cmp(&other.tag_byte())
    }
}

impl PartialOrd for RecordTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct Utf8<'a> {
    #[get_copy = "pub"]
    name_id: Id,
    #[get_copy = "pub"]
    text: &'a [u8],
}

impl<'a> Utf8<'a> {
    fn parse(input: &'a [u8], id_size: IdSize) -> Result<Utf8<'a>> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L88
        let (input, id) = Id::parse(input, id_size).map_err(|_| HprofError::ShortRecord)?;

        Ok(Utf8 {
            name_id: id,
            text: input,
        })
    }

    /// In practice, dumps contain the occasional Utf8 record with invalid
    /// UTF-8 bytes.
    pub fn text_as_str(&self) -> std::result::Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.text)
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct LoadClass {
    #[get_copy = "pub"]
    class_serial: Serial,
    #[get_copy = "pub"]
    class_obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    class_name_id: Id,
}

impl LoadClass {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], LoadClass> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L93
        let (input, class_serial) = number::be_u32(input)?;
        let (input, class_obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, class_name_id) = Id::parse(input, id_size)?;

        Ok((
            input,
            LoadClass {
                class_serial,
                class_obj_id,
                stack_trace_serial,
                class_name_id,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct StackFrame {
    #[get_copy = "pub"]
    id: Id,
    #[get_copy = "pub"]
    method_name_id: Id,
    #[get_copy = "pub"]
    method_signature_id: Id,
    #[get_copy = "pub"]
    source_file_name_id: Id,
    #[get_copy = "pub"]
    class_serial: Serial,
    #[get_copy = "pub"]
    line_num: LineNum,
}

impl StackFrame {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L104
        let (input, id) = Id::parse(input, id_size)?;
        let (input, method_name_id) = Id::parse(input, id_size)?;
        let (input, method_signature_id) = Id::parse(input, id_size)?;
        let (input, source_file_name_id) = Id::parse(input, id_size)?;
        let (input, class_serial) = number::be_u32(input)?;
        let (input, line_num) = LineNum::parse(input)?;

        Ok((
            input,
            StackFrame {
                id,
                method_name_id,
                method_signature_id,
                source_file_name_id,
                class_serial,
                line_num,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct StackTrace<'a> {
    id_size: IdSize,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    thread_serial: Serial,
    #[get_copy = "pub"]
    num_frame_ids: u32,
    frame_ids: &'a [u8],
}

impl<'a> StackTrace<'a> {
    fn parse(input: &'a [u8], id_size: IdSize) -> Result<StackTrace<'a>> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L116
        let parsed: nom::IResult<&[u8], StackTrace<'a>> = (|| {
            let (input, stack_trace_serial) = number::be_u32(input)?;
            let (input, thread_serial) = number::be_u32(input)?;
            let (input, num_frame_ids) = number::be_u32(input)?;
            let (input, frame_ids) =
                bytes::take(num_frame_ids as usize * id_size.size_in_bytes())(input)?;

            Ok((
                input,
                StackTrace {
                    id_size,
                    stack_trace_serial,
                    thread_serial,
                    num_frame_ids,
                    frame_ids,
                },
            ))
        })();

        finish_body("StackTrace", parsed)
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = Result<Id>> + 'a {
        let id_size = self.id_size;
        Counted::new(self.frame_ids, self.num_frame_ids, move |i| {
            Id::parse(i, id_size)
        })
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct StartThread {
    #[get_copy = "pub"]
    thread_serial: Serial,
    #[get_copy = "pub"]
    thread_obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    thread_name_id: Id,
    #[get_copy = "pub"]
    thread_group_name_id: Id,
    #[get_copy = "pub"]
    thread_group_parent_name_id: Id,
}

impl StartThread {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], StartThread> {
        let (input, thread_serial) = number::be_u32(input)?;
        let (input, thread_obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, thread_name_id) = Id::parse(input, id_size)?;
        let (input, thread_group_name_id) = Id::parse(input, id_size)?;
        let (input, thread_group_parent_name_id) = Id::parse(input, id_size)?;

        Ok((
            input,
            StartThread {
                thread_serial,
                thread_obj_id,
                stack_trace_serial,
                thread_name_id,
                thread_group_name_id,
                thread_group_parent_name_id,
            },
        ))
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct EndThread {
    #[get_copy = "pub"]
    thread_serial: Serial,
}

impl EndThread {
    fn parse(input: &[u8]) -> nom::IResult<&[u8], EndThread> {
        let (input, thread_serial) = number::be_u32(input)?;
        Ok((input, EndThread { thread_serial }))
    }
}

/// Either a HPROF_HEAP_DUMP or HPROF_HEAP_DUMP_SEGMENT record body.
pub struct HeapDumpSegment<'a> {
    id_size: IdSize,
    records: &'a [u8],
}

impl<'a> HeapDumpSegment<'a> {
    pub fn sub_records(&self) -> SubRecords<'a> {
        SubRecords {
            id_size: self.id_size,
            remaining: self.records,
        }
    }
}

/// The sub-record loop ends when the bounded heap-dump payload is exhausted.
/// An unknown sub-tag or a length inconsistency yields one `Err` and then
/// the iterator fuses; the caller abandons the segment and resumes at the
/// next top-level record.
pub struct SubRecords<'a> {
    id_size: IdSize,
    remaining: &'a [u8],
}

impl<'a> Iterator for SubRecords<'a> {
    type Item = Result<heap_dump::SubRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        match heap_dump::SubRecord::parse(self.remaining, self.id_size) {
            Ok((input, record)) => {
                self.remaining = input;
                Some(Ok(record))
            }
            Err(e) => {
                self.remaining = &[];
                Some(Err(e.in_bounded_body()))
            }
        }
    }
}

/// Line information of a stack frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineNum {
    Normal(u32),
    /// The frame carries no line information at all.
    NoInfo,
    Unknown,
    CompiledMethod,
    NativeMethod,
}

impl LineNum {
    fn parse(input: &[u8]) -> nom::IResult<&[u8], Self> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L111
        let (input, num) = number::be_i32(input)?;

        Ok((
            input,
            match num {
                num if num > 0 => LineNum::Normal(num as u32),
                0 => LineNum::NoInfo,
                -1 => LineNum::Unknown,
                -2 => LineNum::CompiledMethod,
                -3 => LineNum::NativeMethod,
                _ => LineNum::Unknown,
            },
        ))
    }
}

impl fmt::Display for LineNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LineNum::Normal(n) => write!(f, "{}", n),
            LineNum::NoInfo => write!(f, "no line info"),
            LineNum::Unknown => write!(f, "unknown line number"),
            LineNum::CompiledMethod => write!(f, "compiled method"),
            LineNum::NativeMethod => write!(f, "native method"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(id_size: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(HEADER_MAGIC);
        buf.push(0);
        buf.extend_from_slice(&id_size.to_be_bytes());
        buf.extend_from_slice(&0_i64.to_be_bytes());
        buf
    }

    #[test]
    fn parses_minimal_header() {
        let buf = header_bytes(8);
        let hprof = parse_hprof(&buf).unwrap();
        assert_eq!(IdSize::U64, hprof.header().id_size());
        assert_eq!(0, hprof.header().timestamp_millis());
        assert_eq!(0, hprof.records_iter().count());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = header_bytes(8);
        buf[0] = b'X';
        assert!(matches!(parse_hprof(&buf), Err(HprofError::BadMagic)));
    }

    #[test]
    fn rejects_unsupported_id_size() {
        let buf = header_bytes(2);
        assert!(matches!(
            parse_hprof(&buf),
            Err(HprofError::UnsupportedIdSize(2))
        ));
    }

    #[test]
    fn frames_records_and_skips_unknown_tags() {
        let mut buf = header_bytes(8);
        // unknown tag 0x42, 3-byte body
        buf.push(0x42);
        buf.extend_from_slice(&0_u32.to_be_bytes());
        buf.extend_from_slice(&3_u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        // Utf8 record: id 1, text "foo"
        buf.push(0x01);
        buf.extend_from_slice(&0_u32.to_be_bytes());
        buf.extend_from_slice(&11_u32.to_be_bytes());
        buf.extend_from_slice(&1_u64.to_be_bytes());
        buf.extend_from_slice(b"foo");

        let hprof = parse_hprof(&buf).unwrap();
        let records: Vec<_> = hprof.records_iter().map(|r| r.unwrap()).collect();
        assert_eq!(2, records.len());
        assert_eq!(None, records[0].tag());
        let utf8 = records[1].as_utf_8().unwrap().unwrap();
        assert_eq!(1, utf8.name_id().id());
        assert_eq!(Ok("foo"), utf8.text_as_str());
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let mut buf = header_bytes(8);
        // 5 bytes that cannot form a record frame
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]);

        let hprof = parse_hprof(&buf).unwrap();
        let results: Vec<_> = hprof.records_iter().collect();
        assert_eq!(1, results.len());
        assert!(matches!(results[0], Err(HprofError::TrailingBytes(5))));
    }

    #[test]
    fn record_length_overrun_is_trailing_bytes() {
        let mut buf = header_bytes(8);
        buf.push(0x01);
        buf.extend_from_slice(&0_u32.to_be_bytes());
        buf.extend_from_slice(&100_u32.to_be_bytes()); // longer than remaining
        buf.extend_from_slice(&[0; 10]);

        let hprof = parse_hprof(&buf).unwrap();
        let results: Vec<_> = hprof.records_iter().collect();
        assert!(matches!(results[0], Err(HprofError::TrailingBytes(_))));
    }

    #[test]
    fn line_num_codes() {
        assert_eq!(
            LineNum::Normal(7),
            LineNum::parse(&7_i32.to_be_bytes()).unwrap().1
        );
        assert_eq!(
            LineNum::NoInfo,
            LineNum::parse(&0_i32.to_be_bytes()).unwrap().1
        );
        assert_eq!(
            LineNum::Unknown,
            LineNum::parse(&(-1_i32).to_be_bytes()).unwrap().1
        );
        assert_eq!(
            LineNum::CompiledMethod,
            LineNum::parse(&(-2_i32).to_be_bytes()).unwrap().1
        );
        assert_eq!(
            LineNum::NativeMethod,
            LineNum::parse(&(-3_i32).to_be_bytes()).unwrap().1
        );
    }
}
