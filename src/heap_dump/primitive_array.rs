use getset::CopyGetters;
use nom::bytes::complete as bytes;
use nom::number::complete as number;

use crate::parsing_iterator::Counted;
use crate::{HprofError, Id, IdSize, Result, Serial};

/// A primitive-array dump. Element accessors return `Some` only for the
/// method matching the array type (e.g. if it's a
/// `PrimitiveArrayType::Float`, `floats()` will always be `Some`).
#[derive(CopyGetters, Copy, Clone)]
pub struct PrimitiveArray<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    primitive_type: PrimitiveArrayType,
    #[get_copy = "pub"]
    num_elements: u32,
    contents: &'a [u8],
}

macro_rules! iterator_method {
    ($method_name:tt, $type_variant:tt, $item_type:ty, $parser:expr) => {
        pub fn $method_name(&self) -> Option<impl Iterator<Item = Result<$item_type>> + 'a> {
            match self.primitive_type {
                PrimitiveArrayType::$type_variant => {
                    Some(Counted::new(self.contents, self.num_elements, $parser))
                }
                _ => None,
            }
        }
    };
}

impl<'a> PrimitiveArray<'a> {
    /// Raw big-endian element bytes, `num_elements * element width` long.
    pub fn contents(&self) -> &'a [u8] {
        self.contents
    }

    pub(crate) fn parse<'i: 'r, 'r>(
        input: &'i [u8],
        id_size: IdSize,
    ) -> Result<(&'i [u8], PrimitiveArray<'r>)> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L279
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, num_elements) = number::be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        let (input, type_byte) = number::be_u8::<_, nom::error::Error<&[u8]>>(input)?;

        let array_type = PrimitiveArrayType::from_type_code(type_byte).ok_or_else(|| {
            HprofError::CorruptHeapSegment(format!(
                "unexpected primitive array type {:#04x}",
                type_byte
            ))
        })?;

        // zero-length arrays are legal
        let (input, contents) = bytes::take::<_, _, nom::error::Error<&[u8]>>(
            num_elements as usize * array_type.size_bytes(),
        )(input)?;

        Ok((
            input,
            PrimitiveArray {
                obj_id,
                stack_trace_serial,
                primitive_type: array_type,
                num_elements,
                contents,
            },
        ))
    }

    iterator_method!(booleans, Boolean, bool, |i| number::be_u8(i)
        .map(|(i, b)| (i, b != 0)));
    iterator_method!(chars, Char, u16, number::be_u16);
    iterator_method!(floats, Float, f32, number::be_f32);
    iterator_method!(doubles, Double, f64, number::be_f64);
    iterator_method!(bytes, Byte, i8, number::be_i8);
    iterator_method!(shorts, Short, i16, number::be_i16);
    iterator_method!(ints, Int, i32, number::be_i32);
    iterator_method!(longs, Long, i64, number::be_i64);
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum PrimitiveArrayType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl PrimitiveArrayType {
    pub fn from_type_code(code: u8) -> Option<PrimitiveArrayType> {
        Some(match code {
            0x04 => PrimitiveArrayType::Boolean,
            0x05 => PrimitiveArrayType::Char,
            0x06 => PrimitiveArrayType::Float,
            0x07 => PrimitiveArrayType::Double,
            0x08 => PrimitiveArrayType::Byte,
            0x09 => PrimitiveArrayType::Short,
            0x0A => PrimitiveArrayType::Int,
            0x0B => PrimitiveArrayType::Long,
            _ => return None,
        })
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            PrimitiveArrayType::Boolean | PrimitiveArrayType::Byte => 1,
            PrimitiveArrayType::Char | PrimitiveArrayType::Short => 2,
            PrimitiveArrayType::Float | PrimitiveArrayType::Int => 4,
            PrimitiveArrayType::Double | PrimitiveArrayType::Long => 8,
        }
    }

    pub fn java_type_name(&self) -> &'static str {
        match self {
            PrimitiveArrayType::Boolean => "boolean",
            PrimitiveArrayType::Char => "char",
            PrimitiveArrayType::Float => "float",
            PrimitiveArrayType::Double => "double",
            PrimitiveArrayType::Byte => "byte",
            PrimitiveArrayType::Short => "short",
            PrimitiveArrayType::Int => "int",
            PrimitiveArrayType::Long => "long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_bytes(obj_id: u64, type_code: u8, elements: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&obj_id.to_be_bytes());
        buf.extend_from_slice(&0_u32.to_be_bytes());
        let width = PrimitiveArrayType::from_type_code(type_code)
            .unwrap()
            .size_bytes();
        buf.extend_from_slice(&((elements.len() / width) as u32).to_be_bytes());
        buf.push(type_code);
        buf.extend_from_slice(elements);
        buf
    }

    #[test]
    fn parses_int_array() {
        let mut elements = Vec::new();
        for v in [1_i32, -2, 300] {
            elements.extend_from_slice(&v.to_be_bytes());
        }
        let buf = array_bytes(0x50, 0x0A, &elements);

        let (rest, array) = PrimitiveArray::parse(&buf, IdSize::U64).unwrap();
        assert!(rest.is_empty());
        assert_eq!(0x50, array.obj_id().id());
        assert_eq!(PrimitiveArrayType::Int, array.primitive_type());
        assert_eq!(3, array.num_elements());
        let ints: Vec<i32> = array.ints().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(vec![1, -2, 300], ints);
        assert!(array.longs().is_none());
    }

    #[test]
    fn zero_length_array_is_legal() {
        let buf = array_bytes(0x51, 0x08, &[]);
        let (rest, array) = PrimitiveArray::parse(&buf, IdSize::U64).unwrap();
        assert!(rest.is_empty());
        assert_eq!(0, array.num_elements());
        assert_eq!(0, array.bytes().unwrap().count());
    }

    #[test]
    fn bad_type_code_is_corrupt_segment() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x52_u64.to_be_bytes());
        buf.extend_from_slice(&0_u32.to_be_bytes());
        buf.extend_from_slice(&1_u32.to_be_bytes());
        buf.push(0x0C);
        assert!(matches!(
            PrimitiveArray::parse(&buf, IdSize::U64),
            Err(HprofError::CorruptHeapSegment(_))
        ));
    }
}
