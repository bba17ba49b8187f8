//! End-to-end scenarios over synthetic dumps: literal inputs, expected
//! outputs.

mod common;

use common::*;
use hprof_inspect::analysis::{self, Command};
use hprof_inspect::graph::{self, CancelToken};
use hprof_inspect::store::ObjectStore;
use hprof_inspect::Id;

fn run(cmd: Command, ix: &hprof_inspect::store::HeapIndex) -> analysis::AnalysisResult {
    cmd.run(ix, &CancelToken::new()).expect("analysis should run")
}

#[test]
fn minimal_file_decodes_to_empty_store() {
    let ix = decode(&DumpBuilder::new(8).build());

    let stats = ix.stats();
    assert_eq!(0, stats.instances);
    assert_eq!(0, stats.class_dumps);
    assert_eq!(0, stats.strings);

    let commands = [
        Command::SizeClasses(10),
        Command::CountInstances(10),
        Command::ObjectLoadersInfo(10),
        Command::FullClassSize(10),
        Command::ArrayInfo(10),
        Command::LongArrays(0),
        Command::HashMapOverheads(10),
        Command::DuplicateStrings,
        Command::ArrayOwners(0),
        Command::TopArrayOwners(10),
    ];
    for command in commands {
        let result = run(command, &ix);
        assert!(
            result.body.is_empty(),
            "{:?} should have an empty body, got {:?}",
            command,
            result.body
        );
    }
}

#[test]
fn single_string_is_interned() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x01, "foo");
    let ix = decode(&b.build());

    assert_eq!(Some("foo"), ix.interned_string(Id::from(0x01)));
    assert!(run(Command::SizeClasses(10), &ix).body.is_empty());
}

#[test]
fn one_class_one_instance() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.utf8(0x03, "x");
    b.load_class(1, 0x10, 0x02);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(
        0x10,
        0,
        0,
        4,
        &[],
        &[Field {
            name_id: 0x03,
            type_code: TYPE_INT,
        }],
    );
    seg.instance(0x20, 0x10, &[0x00, 0x00, 0x00, 0x2A]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let counts = run(Command::CountInstances(10), &ix);
    assert_eq!(
        vec!["1. Class ID: 16, Count: 1, Name: A".to_owned()],
        counts.body
    );

    let instance = ix.instance(Id::from(0x20)).expect("instance should exist");
    assert_eq!(4, instance.number_of_bytes());
    let projected = graph::project_instance(&ix, instance);
    assert!(!projected.is_truncated());
    assert_eq!(instance.payload.len(), projected.consumed);
    assert_eq!(1, projected.fields.len());
    assert_eq!(Some("x"), ix.interned_string(projected.fields[0].name_id));
    assert_eq!(
        hprof_inspect::heap_dump::FieldValue::Int(42),
        projected.fields[0].value
    );
}

/// Class R holds an object array whose three slots all point at the same
/// 4-byte instance: the closure must visit each object exactly once.
#[test]
fn object_array_reachability() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "R");
    b.utf8(0x03, "A");
    b.utf8(0x04, "r");
    b.utf8(0x05, "x");
    b.utf8(0x06, "[LA;");
    b.load_class(1, 0x10, 0x02);
    b.load_class(2, 0x11, 0x03);
    b.load_class(3, 0x12, 0x06);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(
        0x10,
        0,
        0,
        8,
        &[],
        &[Field {
            name_id: 0x04,
            type_code: TYPE_OBJECT,
        }],
    );
    seg.class_dump(
        0x11,
        0,
        0,
        4,
        &[],
        &[Field {
            name_id: 0x05,
            type_code: TYPE_INT,
        }],
    );
    seg.class_dump(0x12, 0, 0, 0, &[], &[]);
    // R instance -> array
    seg.instance(0x20, 0x10, &0x30_u64.to_be_bytes());
    // array of three slots, all the same instance
    seg.object_array(0x30, 0x12, &[0x40, 0x40, 0x40]);
    // the shared instance
    seg.instance(0x40, 0x11, &[0, 0, 0, 1]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let stats = graph::retained_closure(&ix, [Id::from(0x20)], &CancelToken::new())
        .expect("closure should run");
    assert_eq!(3, stats.visited);
    // size(R) + array header + 3 slots * 8 + size(A instance)
    assert_eq!(8 + 16 + 24 + 4, stats.total_bytes);

    // idempotent: a second walk sees the same set and the same sum
    let again = graph::retained_closure(&ix, [Id::from(0x20)], &CancelToken::new())
        .expect("closure should run");
    assert_eq!(stats, again);
}

#[test]
fn duplicate_strings_group_by_content() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "java/lang/String");
    b.utf8(0x03, "value");
    b.load_class(1, 0x10, 0x02);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(
        0x10,
        0,
        0,
        8,
        &[],
        &[Field {
            name_id: 0x03,
            type_code: TYPE_OBJECT,
        }],
    );
    // two String instances with distinct backing char arrays, same content
    seg.instance(0x20, 0x10, &0x30_u64.to_be_bytes());
    seg.instance(0x21, 0x10, &0x31_u64.to_be_bytes());
    seg.primitive_array(0x30, TYPE_CHAR, &utf16_be("hello"));
    seg.primitive_array(0x31, TYPE_CHAR, &utf16_be("hello"));
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::duplicate_strings(&ix);
    assert_eq!(vec!["1. Count: 2, String: hello".to_owned()], result.body);
}

/// An array referenced once through an instance field and once through
/// another array's element slot reports two distinct owners.
#[test]
fn owner_inversion() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "I");
    b.utf8(0x03, "f");
    b.utf8(0x04, "[Ljava/lang/Object;");
    b.load_class(1, 0x10, 0x02);
    b.load_class(2, 0x12, 0x04);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(
        0x10,
        0,
        0,
        8,
        &[],
        &[Field {
            name_id: 0x03,
            type_code: TYPE_OBJECT,
        }],
    );
    seg.class_dump(0x12, 0, 0, 0, &[], &[]);
    // i.f -> a
    seg.instance(0x20, 0x10, &0x30_u64.to_be_bytes());
    // a: 100 slots, all null
    seg.object_array(0x30, 0x12, &[0; 100]);
    // b[3] -> a
    seg.object_array(0x31, 0x12, &[0, 0, 0, 0x30]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let owners = graph::owners_of(&ix, Id::from(0x30));
    assert_eq!(2, owners.len());
    let field_owner = owners
        .iter()
        .find(|o| o.kind == hprof_inspect::store::OwnerKind::InstanceField)
        .expect("instance-field owner");
    assert_eq!(0x20, field_owner.owner_id.id());
    assert_eq!(vec!["f".to_owned()], field_owner.via);
    let element_owner = owners
        .iter()
        .find(|o| o.kind == hprof_inspect::store::OwnerKind::ArrayElement)
        .expect("array-element owner");
    assert_eq!(0x31, element_owner.owner_id.id());
    assert_eq!(vec!["[3]".to_owned()], element_owner.via);

    // round-trip: each owner really references the array through the named
    // field or index
    let holder = ix.instance(field_owner.owner_id).unwrap();
    let projected = graph::project_instance(&ix, holder);
    let through_f = projected
        .fields
        .iter()
        .find(|f| ix.interned_string(f.name_id) == Some("f"))
        .unwrap();
    assert_eq!(Some(Id::from(0x30)), through_f.value.as_object_id());
    let holder_array = ix.object_array(element_owner.owner_id).unwrap();
    assert_eq!(Some(Id::from(0x30)), holder_array.elements[3]);

    // only array `a` passes the 50-element floor; it lists both owners
    let report = analysis::array_owners(&ix, 50, &CancelToken::new()).unwrap();
    assert!(report.body[0].contains("ID: 48"));
    assert_eq!(
        2,
        report
            .body
            .iter()
            .filter(|line| line.contains("held by"))
            .count()
    );

    // two distinct owner rows; top-1 keeps only the tie-break winner
    let top = analysis::top_array_owners(&ix, 1, &CancelToken::new()).unwrap();
    let owner_rows: Vec<&String> = top
        .body
        .iter()
        .filter(|line| line.contains("Owner:"))
        .collect();
    assert_eq!(1, owner_rows.len());
    assert!(owner_rows[0].contains("Elements: 100"));
    assert!(owner_rows[0].contains("Arrays: 1"));

    let top2 = analysis::top_array_owners(&ix, 2, &CancelToken::new()).unwrap();
    assert_eq!(
        2,
        top2.body
            .iter()
            .filter(|line| line.contains("Owner:"))
            .count()
    );
}

#[test]
fn size_classes_ranks_and_ties_deterministically() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.utf8(0x03, "B");
    b.load_class(1, 0x10, 0x02);
    b.load_class(2, 0x11, 0x03);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(0x10, 0, 0, 4, &[], &[]);
    seg.class_dump(0x11, 0, 0, 4, &[], &[]);
    // A: two instances of 4 bytes; B: one instance of 8 bytes (tie at 8)
    seg.instance(0x20, 0x10, &[0; 4]);
    seg.instance(0x21, 0x10, &[0; 4]);
    seg.instance(0x22, 0x11, &[0; 8]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::size_classes(&ix, 10);
    // equal totals: descending class id wins, so B (0x11) first
    assert_eq!(
        vec![
            "1. Class ID: 17, Size: 8, Name: B".to_owned(),
            "2. Class ID: 16, Size: 8, Name: A".to_owned(),
        ],
        result.body
    );

    // top-N truncation keeps the ranking prefix
    let top1 = analysis::size_classes(&ix, 1);
    assert_eq!(vec!["1. Class ID: 17, Size: 8, Name: B".to_owned()], top1.body);

    // totals equal the in-store instance byte sums
    let in_store: u64 = ix.instances().map(|i| i.shallow_size()).sum();
    assert_eq!(16, in_store);
}

#[test]
fn count_instances_totals_match_store() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.load_class(1, 0x10, 0x02);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(0x10, 0, 0, 4, &[], &[]);
    for obj in 0x20..0x25_u64 {
        seg.instance(obj, 0x10, &[0; 4]);
    }
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    assert_eq!(5, ix.stats().instances);
    let result = analysis::count_instances(&ix, 10);
    assert_eq!(vec!["1. Class ID: 16, Count: 5, Name: A".to_owned()], result.body);
}

#[test]
fn decode_is_deterministic() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.utf8(0x03, "x");
    b.load_class(1, 0x10, 0x02);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(
        0x10,
        0,
        0,
        8,
        &[],
        &[Field {
            name_id: 0x03,
            type_code: TYPE_OBJECT,
        }],
    );
    seg.instance(0x20, 0x10, &0x30_u64.to_be_bytes());
    seg.object_array(0x30, 0x10, &[0x20, 0]);
    seg.primitive_array(0x40, TYPE_BYTE, b"abc");
    b.heap_segment(&seg);
    let bytes = b.build();

    let first = decode(&bytes);
    let second = decode(&bytes);
    assert_eq!(first.stats(), second.stats());

    let mut first_ids: Vec<u64> = first.instances().map(|i| i.obj_id.id()).collect();
    let mut second_ids: Vec<u64> = second.instances().map(|i| i.obj_id.id()).collect();
    first_ids.sort_unstable();
    second_ids.sort_unstable();
    assert_eq!(first_ids, second_ids);

    for command in [
        Command::SizeClasses(10),
        Command::ArrayInfo(10),
        Command::LongArrays(0),
    ] {
        assert_eq!(run(command, &first).body, run(command, &second).body);
    }
}

#[test]
fn loaders_grouped_with_bootstrap_label() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.utf8(0x03, "B");
    b.utf8(0x04, "java/net/URLClassLoader");
    b.load_class(1, 0x10, 0x02);
    b.load_class(2, 0x11, 0x03);
    b.load_class(3, 0x12, 0x04);
    let mut seg = HeapSegment::new(8);
    // loader class itself is loaded by the bootstrap loader
    seg.class_dump(0x12, 0, 0, 8, &[], &[]);
    // the loader instance
    seg.instance(0x50, 0x12, &[0; 8]);
    // A loaded by the bootstrap loader, B by the URLClassLoader instance
    seg.class_dump(0x10, 0, 0, 4, &[], &[]);
    seg.class_dump(0x11, 0, 0x50, 4, &[], &[]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::object_loaders_info(&ix, 10);
    let text = result.body.join("\n");
    assert!(text.contains("Bootstrap ClassLoader (System)"));
    assert!(text.contains("java.net.URLClassLoader"));
    // bootstrap group holds two classes, the URL loader group one
    assert!(text.contains("Number of classes: 2"));
    assert!(text.contains("Number of classes: 1"));
}

#[test]
fn full_class_size_includes_static_references() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "A");
    b.utf8(0x03, "CACHE");
    b.load_class(1, 0x10, 0x02);
    let mut seg = HeapSegment::new(8);
    // one static object field pointing at a byte array, no instances
    seg.class_dump(
        0x10,
        0,
        0,
        0,
        &[StaticField::object(0x03, 0x30, 8)],
        &[],
    );
    seg.primitive_array(0x30, TYPE_BYTE, &[0; 10]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let class = ix.class_of(Id::from(0x10)).expect("class should exist");
    let retained =
        graph::class_retained_size(&ix, class, &CancelToken::new()).expect("walk should run");
    // static field width (8) + array header (16) + 10 payload bytes
    assert_eq!(8 + 16 + 10, retained);

    let result = analysis::full_class_size(&ix, 10, &CancelToken::new()).unwrap();
    assert_eq!(vec!["1. Class ID: 16, Size: 34, Name: A".to_owned()], result.body);
}

#[test]
fn array_info_aggregates_by_type() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x04, "[Ljava/lang/String;");
    b.load_class(1, 0x12, 0x04);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(0x12, 0, 0, 0, &[], &[]);
    seg.object_array(0x30, 0x12, &[0, 0]); // 16 + 2*8 = 32
    seg.object_array(0x31, 0x12, &[0]); // 16 + 8 = 24
    seg.primitive_array(0x40, TYPE_INT, &[0; 8]); // 16 + 2*4 = 24
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::array_info(&ix, 10);
    assert_eq!(
        vec![
            "1. Array: java.lang.String[], Size: 56".to_owned(),
            "2. Array: int[], Size: 24".to_owned(),
        ],
        result.body
    );
}

#[test]
fn hash_map_overheads_filters_by_name() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x02, "java/util/HashMap");
    b.utf8(0x03, "java/util/ArrayList");
    b.load_class(1, 0x10, 0x02);
    b.load_class(2, 0x11, 0x03);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(0x10, 0, 0, 16, &[], &[]);
    seg.class_dump(0x11, 0, 0, 16, &[], &[]);
    seg.instance(0x20, 0x10, &[0; 16]);
    seg.instance(0x21, 0x10, &[0; 32]);
    seg.instance(0x22, 0x11, &[0; 64]);
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::hash_map_overheads(&ix, 10);
    assert_eq!(
        vec![
            "1. ID: 33, Class: java.util.HashMap, Size: 32 bytes".to_owned(),
            "2. ID: 32, Class: java.util.HashMap, Size: 16 bytes".to_owned(),
        ],
        result.body
    );

    let capped = analysis::hash_map_overheads(&ix, 1);
    assert_eq!(1, capped.body.len());
}

#[test]
fn long_arrays_sorted_by_size() {
    let mut b = DumpBuilder::new(8);
    b.utf8(0x04, "[I");
    b.load_class(1, 0x12, 0x04);
    let mut seg = HeapSegment::new(8);
    seg.class_dump(0x12, 0, 0, 0, &[], &[]);
    seg.primitive_array(0x40, TYPE_INT, &[0; 40]); // 10 elements, 56 bytes
    seg.primitive_array(0x41, TYPE_BYTE, &[0; 10]); // 10 elements, 26 bytes
    seg.primitive_array(0x42, TYPE_BYTE, &[0; 2]); // below the floor
    b.heap_segment(&seg);
    let ix = decode(&b.build());

    let result = analysis::long_arrays(&ix, 10);
    assert_eq!(2, result.body.len());
    assert!(result.body[0].starts_with("1. ID: 64, Kind: PrimitiveArray: int"));
    assert!(result.body[1].starts_with("2. ID: 65, Kind: PrimitiveArray: byte"));
}
