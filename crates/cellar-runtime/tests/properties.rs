//! Quantified properties of the allocator, nodes and cells.

use std::ptr::NonNull;

use cellar_runtime::cell::CellFlags;
use cellar_runtime::pool::Pool;
use cellar_runtime::{Cell, Heap, HeapConfig, PoolSpec, Value};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum PoolOp {
    Alloc,
    /// Frees the live unit at this index, modulo the number of live units.
    Free(usize),
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => Just(PoolOp::Alloc),
        2 => any::<usize>().prop_map(PoolOp::Free),
    ]
}

fn plain_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::integer),
        any::<bool>().prop_map(Value::logic),
        any::<char>().prop_map(Value::char),
        (-1.0e9..1.0e9f64).prop_map(Value::decimal),
        Just(()).prop_map(|_| Value::blank()),
    ]
}

proptest! {
    /// Units on the free list plus units in use always add up to the units carved.
    #[test]
    fn pool_accounts_for_every_unit(ops in prop::collection::vec(pool_op(), 0..200)) {
        let mut pool = Pool::new(PoolSpec::new(32, 4));
        let mut live: Vec<NonNull<u8>> = Vec::new();

        for op in ops {
            match op {
                PoolOp::Alloc => live.push(pool.alloc()),
                PoolOp::Free(_) if live.is_empty() => {}
                PoolOp::Free(index) => {
                    let unit = live.swap_remove(index % live.len());
                    unsafe { pool.free(unit) };
                }
            }

            let stats = pool.stats();
            prop_assert_eq!(pool.free_list_len() + live.len(), stats.carved);
            prop_assert_eq!(stats.in_use, live.len());
        }
    }

    /// Growing twice to the same capacity neither moves nor changes the content.
    #[test]
    fn grow_is_idempotent(text in "[a-z]{0,64}", extra in 0usize..200) {
        let mut heap = Heap::new(HeapConfig::small());
        let value = heap.make_text(&text);
        let node = value.node().unwrap();
        let capacity = text.len() + extra;

        heap.grow(node, capacity).unwrap();
        let first = heap.node(node).capacity();
        let data = heap.node(node).bytes().unwrap().as_ptr();

        heap.grow(node, capacity).unwrap();
        prop_assert_eq!(heap.node(node).capacity(), first);
        prop_assert_eq!(heap.node(node).bytes().unwrap().as_ptr(), data);
        prop_assert_eq!(heap.text_of(&value).unwrap(), text);
    }

    /// Copying keeps the destination's persistent bits and takes only copyable bits from the
    /// source.
    #[test]
    fn copy_masks_header_bits(
        source_bits in any::<u16>(),
        dest_bits in any::<u16>(),
        n in any::<i64>()
    ) {
        let source_flags = CellFlags::from_bits_truncate(source_bits);
        let dest_flags = CellFlags::from_bits_truncate(dest_bits) - CellFlags::PROTECTED;

        let mut source = Value::integer(n).into_cell();
        source.set_flag(source_flags);

        let mut dest = Cell::erased();
        dest.set_flag(dest_flags);
        dest.copy_from(&source).unwrap();

        prop_assert_eq!(dest.flags() & CellFlags::PERSIST, dest_flags & CellFlags::PERSIST);
        prop_assert_eq!(dest.flags() - CellFlags::PERSIST, source_flags & CellFlags::COPY);
        prop_assert_eq!(dest.as_integer().unwrap(), n);
    }

    /// Quoting k times and unquoting k times gives the value back, inline or paired.
    #[test]
    fn quoting_round_trips(value in plain_value(), depth in 0u32..8) {
        let mut heap = Heap::new(HeapConfig::small());
        let mut quoted = value.copied();

        for _ in 0..depth {
            heap.quote(&mut quoted).unwrap();
        }
        prop_assert_eq!(quoted.quote_depth(), depth);

        for _ in 0..depth {
            heap.unquote(&mut quoted).unwrap();
        }

        prop_assert_eq!(quoted.quote_depth(), 0);
        prop_assert_eq!(quoted.type_of(), value.type_of());
        prop_assert_eq!(quoted, value);
    }
}
