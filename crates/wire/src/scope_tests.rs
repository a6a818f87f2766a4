// SPDX-License-Identifier: MIT

use super::*;
use yare::parameterized;

#[parameterized(
    uid = { "UID", Some(SelectionScope::Uid) },
    rid = { "rid", Some(SelectionScope::Rid) },
    hrid = { "HRID", Some(SelectionScope::Hrid) },
    gid = { "GID", Some(SelectionScope::Gid) },
    tag = { "TAG", Some(SelectionScope::Tag) },
    verb = { "FETCH", None },
)]
fn parse_scope_prefix(atom: &str, expected: Option<SelectionScope>) {
    assert_eq!(SelectionScope::parse(atom), expected);
}
