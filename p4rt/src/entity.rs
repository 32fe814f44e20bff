/*
Copyright (c) 2021 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Helpers for building the table-entry updates that get written through a [`Client`].
//!
//! [`Client`]: crate::Client

use byteorder::{BigEndian, ByteOrder};

use proto::p4runtime::{
    Action,
    Action_Param,
    Entity,
    FieldMatch,
    FieldMatch_Exact,
    TableAction,
    TableEntry,
    Update,
    Update_Type,
};

use protobuf::RepeatedField;

/// Encodes the low `bit_width` bits of `value` as a P4Runtime bytestring: big-endian, in
/// `(bit_width + 7) / 8` bytes.  Higher bits of `value` are dropped.  Widths beyond 64 bits are
/// zero-padded on the left.
pub fn encode_value(value: u64, bit_width: u32) -> Vec<u8> {
    let num_bytes = ((bit_width + 7) / 8) as usize;
    let value = match bit_width {
        0..=63 => value & ((1 << bit_width) - 1),
        _ => value,
    };
    let mut enc_val = [0; 8];
    BigEndian::write_u64(&mut enc_val, value);

    if num_bytes <= enc_val.len() {
        enc_val[enc_val.len() - num_bytes..].to_vec()
    } else {
        let mut padded = vec![0; num_bytes - enc_val.len()];
        padded.extend_from_slice(&enc_val);
        padded
    }
}

/// A table entry that matches exactly on each `(field id, value)` of `matches` and runs
/// `action_id` with the `(param id, value)` pairs of `params`.
pub fn exact_table_entry(
    table_id: u32,
    matches: &[(u32, Vec<u8>)],
    action_id: u32,
    params: &[(u32, Vec<u8>)],
) -> TableEntry {
    let field_matches = matches
        .iter()
        .map(|(field_id, value)| {
            let mut exact = FieldMatch_Exact::new();
            exact.set_value(value.clone());
            let mut field_match = FieldMatch::new();
            field_match.set_field_id(*field_id);
            field_match.set_exact(exact);
            field_match
        })
        .collect();

    let params = params
        .iter()
        .map(|(param_id, value)| {
            let mut param = Action_Param::new();
            param.set_param_id(*param_id);
            param.set_value(value.clone());
            param
        })
        .collect();
    let mut action = Action::new();
    action.set_action_id(action_id);
    action.set_params(RepeatedField::from_vec(params));
    let mut table_action = TableAction::new();
    table_action.set_action(action);

    let mut table_entry = TableEntry::new();
    table_entry.set_table_id(table_id);
    table_entry.set_field_match(RepeatedField::from_vec(field_matches));
    table_entry.set_action(table_action);
    table_entry
}

pub fn table_entry_update(update_type: Update_Type, table_entry: TableEntry) -> Update {
    let mut entity = Entity::new();
    entity.set_table_entry(table_entry);

    let mut update = Update::new();
    update.set_field_type(update_type);
    update.set_entity(entity);
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_minimal_width() {
        assert_eq!(encode_value(0x0abc, 12), vec![0x0a, 0xbc]);
        assert_eq!(encode_value(0xfffff, 20), vec![0x0f, 0xff, 0xff]);
        assert_eq!(encode_value(1, 1), vec![1]);
        assert_eq!(encode_value(0, 32), vec![0, 0, 0, 0]);
        assert_eq!(encode_value(0x0102, 80), vec![0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn drops_bits_beyond_width() {
        assert_eq!(encode_value(0xffff, 12), vec![0x0f, 0xff]);
        assert_eq!(encode_value(0x1f, 4), vec![0x0f]);
        assert_eq!(encode_value(0x12_3456, 20), vec![0x02, 0x34, 0x56]);
        assert_eq!(encode_value(u64::MAX, 64), vec![0xff; 8]);
        assert_eq!(encode_value(u64::MAX, 0), Vec::<u8>::new());
    }

    #[test]
    fn builds_exact_entry() {
        let entry = exact_table_entry(
            33574274,
            &[(1, encode_value(17, 20))],
            16827758,
            &[(1, encode_value(0, 32))],
        );
        let update = table_entry_update(Update_Type::INSERT, entry);

        assert_eq!(update.get_field_type(), Update_Type::INSERT);
        let entry = update.get_entity().get_table_entry();
        assert_eq!(entry.get_table_id(), 33574274);
        assert_eq!(entry.get_field_match()[0].get_field_id(), 1);
        assert_eq!(entry.get_field_match()[0].get_exact().get_value(), &[0, 0, 17]);
        let action = entry.get_action().get_action();
        assert_eq!(action.get_action_id(), 16827758);
        assert_eq!(action.get_params()[0].get_value(), &[0, 0, 0, 0]);
    }
}
