//! spec.md §8 end-to-end scenario 6: a table with `t.self = t` serializes
//! and deserializes (into a fresh VM) without stack overflow, and the
//! round-tripped table's `self` field is identical to the table itself.

mod common;

use common::*;

use croc_runtime::objects::table::TableObj;
use croc_runtime::Value;
use croc_serialize::{GraphReader, GraphWriter, NoTransients};

#[test]
fn self_referential_table_round_trips_with_identity_preserved() {
    let mut writer_vm = new_vm();
    let table = writer_vm.gc.alloc(TableObj::new());
    let self_key = writer_vm.gc.intern_string("self");
    unsafe { croc_runtime::Gc::payload_mut::<TableObj>(table) }.set(Value::Ref(self_key), Value::Ref(table));

    let mut bytes: Vec<u8> = Vec::new();
    GraphWriter::new(&NoTransients).write(&mut bytes, Value::Ref(table)).expect("cyclic graph must serialize without overflowing the writer's stack");

    let mut reader_vm = new_vm();
    let mut cursor: &[u8] = &bytes;
    let root = GraphReader::new(&mut reader_vm.gc, &NoTransients).read(&mut cursor).expect("cyclic graph must deserialize without overflowing the reader's stack");

    let root_table = root.as_ref().expect("root must deserialize to a heap object");
    assert_eq!(croc_runtime::Gc::header(root_table).kind(), croc_runtime::ValueKind::Table);

    let self_key_2 = reader_vm.gc.intern_string("self");
    let self_field = unsafe { croc_runtime::Gc::payload::<TableObj>(root_table) }.get(&Value::Ref(self_key_2));
    assert_eq!(self_field.as_ref(), Some(root_table), "the deserialized table's `self` field must be identical to the table itself, not a copy");
}
