//! The named analyses over a completed store, and the uniform result model
//! they all return.
//!
//! Every analysis is a pure function of an [`ObjectStore`]; none of them
//! mutate anything, and none of them abort on a single unresolved reference
//! (placeholders are substituted instead).

use std::collections::HashMap;

use itertools::Itertools;
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::graph::{self, CancelToken};
use crate::heap_dump::FieldType;
use crate::store::{ObjectStore, OwnerKind};
use crate::{Id, Result};

/// A header plus ordered body lines. Rendering knows nothing about the
/// analysis that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub header: String,
    pub body: Vec<String>,
}

impl AnalysisResult {
    pub fn new(header: impl Into<String>) -> AnalysisResult {
        AnalysisResult {
            header: header.into(),
            body: Vec::new(),
        }
    }

    pub fn render_text(&self) -> String {
        let separator = "=".repeat(50);
        let mut out = String::new();
        out.push_str(&separator);
        out.push('\n');
        out.push_str(&self.header);
        out.push('\n');
        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&separator);
        out
    }

    pub fn render_html(&self) -> String {
        let mut out = String::new();
        out.push_str("<h1>");
        out.push_str(&html_escape(&self.header));
        out.push_str("</h1><ul>");
        for line in &self.body {
            out.push_str("<li>");
            out.push_str(&html_escape(line));
            out.push_str("</li>");
        }
        out.push_str("</ul>");
        out
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Top `max` classes by the summed `number_of_bytes` of their instances.
pub fn size_classes<S: ObjectStore>(store: &S, max: usize) -> AnalysisResult {
    let mut result = AnalysisResult::new(format!("Top {} classes by size", max));

    let ranked = store
        .classes()
        .map(|class| {
            let total: u64 = store
                .instances_of(class.obj_id())
                .iter()
                .filter_map(|id| store.instance(*id))
                .map(|i| i.shallow_size())
                .sum();
            (class.obj_id(), total)
        })
        .sorted_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)))
        .take(max);

    for (position, (class_id, total)) in ranked.enumerate() {
        result.body.push(format!(
            "{}. Class ID: {}, Size: {}, Name: {}",
            position + 1,
            class_id,
            total,
            store.class_name(class_id)
        ));
    }
    result
}

/// Top `max` classes by instance count.
pub fn count_instances<S: ObjectStore>(store: &S, max: usize) -> AnalysisResult {
    let mut result = AnalysisResult::new(format!("Top {} classes by instance count", max));

    let ranked = store
        .classes()
        .map(|class| (class.obj_id(), store.instances_of(class.obj_id()).len()))
        .sorted_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)))
        .take(max);

    for (position, (class_id, count)) in ranked.enumerate() {
        result.body.push(format!(
            "{}. Class ID: {}, Count: {}, Name: {}",
            position + 1,
            class_id,
            count,
            store.class_name(class_id)
        ));
    }
    result
}

const BOOTSTRAP_LOADER_ID: u64 = 0;

/// Classes grouped by their class loader, up to `max_per_loader` classes
/// listed per group. Loader 0 is the bootstrap loader; others are named by
/// the loader instance's class.
pub fn object_loaders_info<S: ObjectStore>(store: &S, max_per_loader: usize) -> AnalysisResult {
    let mut result = AnalysisResult::new("Object loaders info");

    let mut groups: HashMap<u64, Vec<Id>> = HashMap::new();
    for class in store.classes() {
        let loader = class
            .class_loader_obj_id()
            .map(|id| id.id())
            .unwrap_or(BOOTSTRAP_LOADER_ID);
        groups.entry(loader).or_default().push(class.obj_id());
    }

    let ordered = groups
        .into_iter()
        .sorted_by(|a, b| b.1.len().cmp(&a.1.len()).then(b.0.cmp(&a.0)));

    for (loader, mut class_ids) in ordered {
        let loader_name = if loader == BOOTSTRAP_LOADER_ID {
            "Bootstrap ClassLoader (System)".to_owned()
        } else {
            let loader_id = Id::from(loader);
            store
                .instance(loader_id)
                .map(|i| store.class_name(i.class_obj_id))
                .unwrap_or_else(|| format!("Unknown loader {}", loader_id))
        };
        result.body.push(format!(
            "Loader ID: {}, Name: {}, Number of classes: {}",
            loader,
            loader_name,
            class_ids.len()
        ));

        class_ids.sort_by(|a, b| b.cmp(a));
        let truncated = class_ids.len() > max_per_loader;
        for class_id in class_ids.into_iter().take(max_per_loader) {
            result.body.push(format!(
                "\t\tClass ID: {}, Name: {}",
                class_id,
                store.class_name(class_id)
            ));
        }
        if truncated {
            result.body.push("\t\t...".to_owned());
        }
    }
    result
}

/// Top `max` classes by retained size (instances plus everything reachable
/// from them and from static fields).
pub fn full_class_size<S: ObjectStore>(
    store: &S,
    max: usize,
    cancel: &CancelToken,
) -> Result<AnalysisResult> {
    let mut result = AnalysisResult::new(format!(
        "Top {} classes by full size (with all dependent objects)",
        max
    ));

    let mut ranked: Vec<(Id, u64)> = Vec::new();
    for class in store.classes() {
        ranked.push((class.obj_id(), graph::class_retained_size(store, class, cancel)?));
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

    for (position, (class_id, total)) in ranked.into_iter().take(max).enumerate() {
        result.body.push(format!(
            "{}. Class ID: {}, Size: {}, Name: {}",
            position + 1,
            class_id,
            total,
            store.class_name(class_id)
        ));
    }
    Ok(result)
}

/// Total bytes per array type: per element type for primitive arrays, per
/// array class for object arrays.
pub fn array_info<S: ObjectStore>(store: &S, max: usize) -> AnalysisResult {
    let mut result = AnalysisResult::new(format!("Top {} array types by size", max));

    // label -> (total bytes, highest contributing class id for tie-breaks)
    let mut labeled: HashMap<String, (u64, u64)> = HashMap::new();
    for array in store.object_arrays() {
        let label = format!(
            "{}[]",
            clean_array_class_name(&store.class_name(array.array_class_obj_id))
        );
        let entry = labeled.entry(label).or_insert((0, 0));
        entry.0 += array.shallow_size(store.id_size());
        entry.1 = entry.1.max(array.array_class_obj_id.id());
    }
    for array in store.primitive_arrays() {
        let label = format!("{}[]", array.elem_type.java_type_name());
        let entry = labeled.entry(label).or_insert((0, 0));
        entry.0 += array.shallow_size();
    }

    let ranked = labeled
        .into_iter()
        .sorted_by(|a, b| (b.1).0.cmp(&(a.1).0).then((b.1).1.cmp(&(a.1).1)).then(b.0.cmp(&a.0)))
        .take(max);

    for (position, (label, (total, _))) in ranked.enumerate() {
        result.body.push(format!(
            "{}. Array: {}, Size: {}",
            position + 1,
            label,
            total
        ));
    }
    result
}

/// Strip the `[L...;` descriptor decoration off object-array class names.
fn clean_array_class_name(raw: &str) -> String {
    for prefix in ["[[L", "[L"] {
        if let Some(stripped) = raw.strip_prefix(prefix).and_then(|s| s.strip_suffix(';')) {
            return stripped.to_owned();
        }
    }
    raw.to_owned()
}

/// Every array with at least `min_elements` elements, largest total size
/// first.
pub fn long_arrays<S: ObjectStore>(store: &S, min_elements: u32) -> AnalysisResult {
    let mut result =
        AnalysisResult::new(format!("Long arrays (min elements = {})", min_elements));

    let mut rows: Vec<(Id, String, u32, u64)> = Vec::new();
    for array in store.object_arrays() {
        if array.num_elements >= min_elements {
            rows.push((
                array.obj_id,
                format!(
                    "ObjectArray: {}",
                    clean_array_class_name(&store.class_name(array.array_class_obj_id))
                ),
                array.num_elements,
                array.shallow_size(store.id_size()),
            ));
        }
    }
    for array in store.primitive_arrays() {
        if array.num_elements >= min_elements {
            rows.push((
                array.obj_id,
                format!("PrimitiveArray: {}", array.elem_type.java_type_name()),
                array.num_elements,
                array.shallow_size(),
            ));
        }
    }
    rows.sort_by(|a, b| b.3.cmp(&a.3).then(b.0.cmp(&a.0)));

    for (position, (obj_id, kind, elements, size)) in rows.into_iter().enumerate() {
        result.body.push(format!(
            "{}. ID: {}, Kind: {}, Elements: {}, Size: {} bytes",
            position + 1,
            obj_id,
            kind,
            elements,
            size
        ));
    }
    result
}

/// Instances whose class name contains `HashMap`, largest first. A crude but
/// effective overhead indicator.
pub fn hash_map_overheads<S: ObjectStore>(store: &S, max_shown: usize) -> AnalysisResult {
    let mut result =
        AnalysisResult::new(format!("HashMap overhead candidates (max shown = {})", max_shown));

    let hash_map_classes: HashMap<Id, String> = store
        .classes()
        .map(|c| (c.obj_id(), store.class_name(c.obj_id())))
        .filter(|(_, name)| name.contains("HashMap"))
        .collect();

    let ranked = store
        .instances()
        .filter(|i| hash_map_classes.contains_key(&i.class_obj_id))
        .map(|i| (i.obj_id, i.class_obj_id, i.shallow_size()))
        .sorted_by(|a, b| b.2.cmp(&a.2).then(b.0.cmp(&a.0)))
        .take(max_shown);

    for (position, (obj_id, class_id, size)) in ranked.enumerate() {
        result.body.push(format!(
            "{}. ID: {}, Class: {}, Size: {} bytes",
            position + 1,
            obj_id,
            &hash_map_classes[&class_id],
            size
        ));
    }
    result
}

/// Groups of `java.lang.String` instances with identical decoded contents,
/// groups of at least two, most duplicated first.
pub fn duplicate_strings<S: ObjectStore>(store: &S) -> AnalysisResult {
    let mut result = AnalysisResult::new("Duplicate strings");

    let string_class_ids: Vec<Id> = store
        .classes()
        .filter(|c| store.class_name(c.obj_id()) == "java.lang.String")
        .map(|c| c.obj_id())
        .collect();
    if string_class_ids.is_empty() {
        return result;
    }

    let contents: Vec<String> = store
        .instances()
        .par_bridge()
        .filter(|i| string_class_ids.contains(&i.class_obj_id))
        .filter_map(|i| string_value_content(store, i))
        .collect();

    let mut frequency: HashMap<String, u64> = HashMap::new();
    for content in contents {
        *frequency.entry(content).or_insert(0) += 1;
    }

    let groups = frequency
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for (position, (content, count)) in groups.enumerate() {
        result.body.push(format!(
            "{}. Count: {}, String: {}",
            position + 1,
            count,
            content
        ));
    }
    result
}

/// Follow a String instance's `value` field to its backing primitive array
/// and decode it: char arrays as UTF-16BE, anything else as raw bytes.
fn string_value_content<S: ObjectStore>(
    store: &S,
    instance: &crate::store::InstanceRec,
) -> Option<String> {
    let projected = graph::project_instance(store, instance);
    let value_field = projected.fields.iter().find(|f| {
        f.field_type == FieldType::ObjectId && store.interned_string(f.name_id) == Some("value")
    })?;
    let target = value_field.value.as_object_id()?;
    let array = store.primitive_array(target)?;
    if !array.contents_indexed {
        return None;
    }

    Some(match array.elem_type {
        crate::heap_dump::PrimitiveArrayType::Char => decode_utf16_be(&array.contents),
        _ => String::from_utf8_lossy(&array.contents).into_owned(),
    })
}

/// UTF-16BE decode with an odd trailing byte dropped.
fn decode_utf16_be(data: &[u8]) -> String {
    let even = &data[..data.len() & !1];
    let units: Vec<u16> = even
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Every array with at least `min_elements` elements together with all of
/// its owners, sorted by element count descending.
pub fn array_owners<S: ObjectStore>(
    store: &S,
    min_elements: u32,
    cancel: &CancelToken,
) -> Result<AnalysisResult> {
    let mut result =
        AnalysisResult::new(format!("Array owners (min elements = {})", min_elements));

    let mut rows: Vec<(Id, String, u32, u64)> = Vec::new();
    for array in store.object_arrays() {
        if array.num_elements >= min_elements {
            rows.push((
                array.obj_id,
                format!(
                    "ObjectArray: {}",
                    clean_array_class_name(&store.class_name(array.array_class_obj_id))
                ),
                array.num_elements,
                array.shallow_size(store.id_size()),
            ));
        }
    }
    for array in store.primitive_arrays() {
        if array.num_elements >= min_elements {
            rows.push((
                array.obj_id,
                format!("PrimitiveArray: {}", array.elem_type.java_type_name()),
                array.num_elements,
                array.shallow_size(),
            ));
        }
    }
    rows.sort_by(|a, b| b.2.cmp(&a.2).then(b.0.cmp(&a.0)));

    for (position, (obj_id, kind, elements, size)) in rows.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(crate::HprofError::Cancelled);
        }
        result.body.push(format!(
            "{}. ID: {}, Kind: {}, Elements: {}, Size: {} bytes",
            position + 1,
            obj_id,
            kind,
            elements,
            size
        ));
        let owners = graph::owners_of(store, obj_id);
        if owners.is_empty() {
            result.body.push("\t\tno owners found".to_owned());
        }
        for owner in owners {
            result.body.push(format!(
                "\t\theld by {} {} ({}) via {}",
                owner.kind.label(),
                owner.owner_id,
                owner.owner_label,
                owner.via.join(", ")
            ));
        }
    }
    Ok(result)
}

struct OwnerAggregate {
    kind: OwnerKind,
    owner_id: Id,
    label: String,
    total_arrays: u64,
    total_elements: u64,
    total_size: u64,
    arrays: Vec<(Id, u64)>,
}

const TOP_OWNER_ARRAYS_SHOWN: usize = 10;

/// Invert array ownership: aggregate arrays per owner and rank owners by
/// the total size of the arrays they hold. Each owner is shown with at most
/// its ten largest arrays.
pub fn top_array_owners<S: ObjectStore>(
    store: &S,
    top_k: usize,
    cancel: &CancelToken,
) -> Result<AnalysisResult> {
    let mut result = AnalysisResult::new(format!("Top {} array owners", top_k));

    let arrays: Vec<(Id, u32, u64)> = store
        .object_arrays()
        .map(|a| (a.obj_id, a.num_elements, a.shallow_size(store.id_size())))
        .chain(
            store
                .primitive_arrays()
                .map(|a| (a.obj_id, a.num_elements, a.shallow_size())),
        )
        .collect();

    let mut aggregates: HashMap<(OwnerKind, Id), OwnerAggregate> = HashMap::new();
    for (position, (obj_id, num_elements, size)) in arrays.into_iter().enumerate() {
        if position % 1024 == 0 && cancel.is_cancelled() {
            return Err(crate::HprofError::Cancelled);
        }
        for owner in graph::owners_of(store, obj_id) {
            let aggregate = aggregates
                .entry((owner.kind, owner.owner_id))
                .or_insert_with(|| OwnerAggregate {
                    kind: owner.kind,
                    owner_id: owner.owner_id,
                    label: owner.owner_label.clone(),
                    total_arrays: 0,
                    total_elements: 0,
                    total_size: 0,
                    arrays: Vec::new(),
                });
            aggregate.total_arrays += 1;
            aggregate.total_elements += u64::from(num_elements);
            aggregate.total_size += size;
            aggregate.arrays.push((obj_id, size));
        }
    }

    let ranked = aggregates
        .into_values()
        .sorted_by(|a, b| {
            b.total_size
                .cmp(&a.total_size)
                .then(b.owner_id.cmp(&a.owner_id))
        })
        .take(top_k);

    for (position, mut aggregate) in ranked.enumerate() {
        result.body.push(format!(
            "{}. Owner: {} {} ({}), Arrays: {}, Elements: {}, Total size: {} bytes",
            position + 1,
            aggregate.kind.label(),
            aggregate.owner_id,
            aggregate.label,
            aggregate.total_arrays,
            aggregate.total_elements,
            aggregate.total_size
        ));
        aggregate
            .arrays
            .sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        for (array_id, size) in aggregate.arrays.into_iter().take(TOP_OWNER_ARRAYS_SHOWN) {
            result
                .body
                .push(format!("\t\tArray ID: {}, Size: {} bytes", array_id, size));
        }
    }
    Ok(result)
}

/// One entry of the interactive catalog. The numbers are part of the CLI
/// contract.
pub struct CommandSpec {
    pub number: i32,
    pub name: &'static str,
    pub prompt: Option<&'static str>,
}

pub const CATALOG: &[CommandSpec] = &[
    CommandSpec {
        number: 1,
        name: "sizeClasses",
        prompt: Some("max count of classes"),
    },
    CommandSpec {
        number: 2,
        name: "countInstances",
        prompt: Some("max count of classes"),
    },
    CommandSpec {
        number: 3,
        name: "objectLoadersInfo",
        prompt: Some("max classes per loader"),
    },
    CommandSpec {
        number: 4,
        name: "fullClassSize",
        prompt: Some("max count of classes"),
    },
    CommandSpec {
        number: 5,
        name: "arrayInfo",
        prompt: Some("max count of array types"),
    },
    CommandSpec {
        number: 6,
        name: "analyzeLongArrays",
        prompt: Some("min elements"),
    },
    CommandSpec {
        number: 7,
        name: "analyzeHashMapOverheads",
        prompt: Some("max count shown"),
    },
    CommandSpec {
        number: 8,
        name: "analyzeDuplicateStrings",
        prompt: None,
    },
    CommandSpec {
        number: 9,
        name: "analyzeArrayOwners",
        prompt: Some("min elements"),
    },
    CommandSpec {
        number: 10,
        name: "analyzeTopArrayOwners",
        prompt: Some("top owners"),
    },
];

pub fn command_spec(number: i32) -> Option<&'static CommandSpec> {
    CATALOG.iter().find(|spec| spec.number == number)
}

/// A fully parameterized analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SizeClasses(usize),
    CountInstances(usize),
    ObjectLoadersInfo(usize),
    FullClassSize(usize),
    ArrayInfo(usize),
    LongArrays(u32),
    HashMapOverheads(usize),
    DuplicateStrings,
    ArrayOwners(u32),
    TopArrayOwners(usize),
}

impl Command {
    /// Build a command from its catalog number and the user-supplied option.
    /// Commands other than `analyzeDuplicateStrings` require a non-negative
    /// option.
    pub fn from_number(number: i32, option: Option<i64>) -> Option<Command> {
        if number == 8 {
            return Some(Command::DuplicateStrings);
        }
        let option = match option {
            Some(v) if v >= 0 => v,
            _ => return None,
        };
        Some(match number {
            1 => Command::SizeClasses(option as usize),
            2 => Command::CountInstances(option as usize),
            3 => Command::ObjectLoadersInfo(option as usize),
            4 => Command::FullClassSize(option as usize),
            5 => Command::ArrayInfo(option as usize),
            6 => Command::LongArrays(option.min(u32::MAX as i64) as u32),
            7 => Command::HashMapOverheads(option as usize),
            9 => Command::ArrayOwners(option.min(u32::MAX as i64) as u32),
            10 => Command::TopArrayOwners(option as usize),
            _ => return None,
        })
    }

    pub fn run<S: ObjectStore>(&self, store: &S, cancel: &CancelToken) -> Result<AnalysisResult> {
        Ok(match *self {
            Command::SizeClasses(max) => size_classes(store, max),
            Command::CountInstances(max) => count_instances(store, max),
            Command::ObjectLoadersInfo(max) => object_loaders_info(store, max),
            Command::FullClassSize(max) => full_class_size(store, max, cancel)?,
            Command::ArrayInfo(max) => array_info(store, max),
            Command::LongArrays(min) => long_arrays(store, min),
            Command::HashMapOverheads(max) => hash_map_overheads(store, max),
            Command::DuplicateStrings => duplicate_strings(store),
            Command::ArrayOwners(min) => array_owners(store, min, cancel)?,
            Command::TopArrayOwners(k) => top_array_owners(store, k, cancel)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_metacharacters() {
        assert_eq!(
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;",
            html_escape("<a href=\"x\">&'</a>")
        );
    }

    #[test]
    fn render_html_wraps_header_and_lines() {
        let result = AnalysisResult {
            header: "Top 1 <classes>".to_owned(),
            body: vec!["a & b".to_owned()],
        };
        assert_eq!(
            "<h1>Top 1 &lt;classes&gt;</h1><ul><li>a &amp; b</li></ul>",
            result.render_html()
        );
    }

    #[test]
    fn utf16_decode_handles_odd_trailing_byte() {
        // "hi" in UTF-16BE plus a dangling byte
        let data = [0x00, b'h', 0x00, b'i', 0x00];
        assert_eq!("hi", decode_utf16_be(&data));
        assert_eq!("", decode_utf16_be(&[0x00]));
        assert_eq!("", decode_utf16_be(&[]));
    }

    #[test]
    fn clean_array_class_name_strips_descriptor() {
        assert_eq!("java.lang.String", clean_array_class_name("[Ljava.lang.String;"));
        assert_eq!("java.lang.Object", clean_array_class_name("[[Ljava.lang.Object;"));
        assert_eq!("[C", clean_array_class_name("[C"));
    }

    #[test]
    fn command_from_number_enforces_options() {
        assert_eq!(
            Some(Command::SizeClasses(10)),
            Command::from_number(1, Some(10))
        );
        assert_eq!(None, Command::from_number(1, None));
        assert_eq!(None, Command::from_number(1, Some(-3)));
        assert_eq!(
            Some(Command::DuplicateStrings),
            Command::from_number(8, None)
        );
        assert_eq!(None, Command::from_number(11, Some(1)));
        assert_eq!(None, Command::from_number(0, Some(1)));
        assert_eq!(
            Some(Command::TopArrayOwners(3)),
            Command::from_number(10, Some(3))
        );
    }

    #[test]
    fn catalog_numbers_are_stable() {
        let numbers: Vec<i32> = CATALOG.iter().map(|s| s.number).collect();
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10], numbers);
        assert!(command_spec(8).unwrap().prompt.is_none());
        assert_eq!(
            Some("max classes per loader"),
            command_spec(3).unwrap().prompt
        );
    }
}
