//! Property-based tests for the buffer window invariants.

use proptest::prelude::*;
use switchyard_buffer::Buffer;

/// One step of a randomised buffer workout.
#[derive(Debug, Clone)]
enum Op {
    Append { length: usize, fill: u8 },
    Prepend { length: usize, fill: u8 },
    TrimFront { length: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..32, any::<u8>()).prop_map(|(length, fill)| Op::Append { length, fill }),
        (1usize..32, any::<u8>()).prop_map(|(length, fill)| Op::Prepend { length, fill }),
        (1usize..32).prop_map(|length| Op::TrimFront { length }),
    ]
}

/// Property: any sequence of prepend/append/trim keeps the payload window
/// inside the allocation and byte-identical to a naive model.
#[test]
fn prop_window_invariant_holds_under_random_ops() {
    proptest!(|(ops in prop::collection::vec(op_strategy(), 1..64))| {
        let buffer = Buffer::new();
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                Op::Append { length, fill } => {
                    buffer.append(length).fill(fill);
                    model.extend(std::iter::repeat_n(fill, length));
                }
                Op::Prepend { length, fill } => {
                    buffer.prepend(length).fill(fill);
                    let mut front = vec![fill; length];
                    front.extend_from_slice(&model);
                    model = front;
                }
                Op::TrimFront { length } => {
                    let length = length.min(model.len());
                    if length > 0 {
                        drop(buffer.trim_front(length));
                        model.drain(..length);
                    }
                }
            }

            prop_assert_eq!(buffer.len(), model.len());
            prop_assert!(buffer.headroom() + buffer.len() <= buffer.capacity());
            prop_assert_eq!(buffer.to_vec(), model.clone());
        }
    });
}

/// Property: appending a byte string and dumping yields its lowercase hex.
#[test]
fn prop_dump_is_lowercase_hex_of_payload() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 1..256))| {
        let buffer = Buffer::new();
        buffer.append(bytes.len()).copy_from_slice(&bytes);

        let mut dumped = String::new();
        buffer.dump(|hex| dumped.push_str(hex));

        let expected: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        prop_assert_eq!(dumped, expected);
    });
}

/// Property: a duplicate reads identically and mutations on it leave the
/// original untouched.
#[test]
fn prop_duplicate_is_deep() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 1..128),
                extra in prop::collection::vec(any::<u8>(), 1..32))| {
        let buffer = Buffer::new();
        buffer.append(bytes.len()).copy_from_slice(&bytes);

        let copy = buffer.duplicate();
        prop_assert_eq!(copy.to_vec(), bytes.clone());

        copy.append(extra.len()).copy_from_slice(&extra);

        prop_assert_eq!(buffer.to_vec(), bytes.clone());
        prop_assert_eq!(copy.len(), bytes.len() + extra.len());
    });
}

/// Property: prepending `n` bytes and trimming `n` bytes from the front is
/// the identity on the payload.
#[test]
fn prop_prepend_then_trim_is_identity() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 1..128),
                n in 1usize..64)| {
        let buffer = Buffer::new();
        buffer.append(bytes.len()).copy_from_slice(&bytes);

        buffer.prepend(n).fill(0xa5);
        drop(buffer.trim_front(n));

        prop_assert_eq!(buffer.to_vec(), bytes);
    });
}
