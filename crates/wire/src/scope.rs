// SPDX-License-Identifier: MIT

//! Selection scopes: how an item set resolves to primary keys.

/// Scope prefix accepted by item-addressing commands.
///
/// `None` means the command addresses sequence numbers in the selected
/// collection (treated as uids here, matching the server's flat id space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionScope {
    #[default]
    None,
    /// Database ids.
    Uid,
    /// Remote ids assigned by the owning resource.
    Rid,
    /// Hierarchical remote id path, innermost first.
    Hrid,
    /// Global ids extracted from payloads.
    Gid,
    /// Tag ids; the set addresses all items carrying the tags.
    Tag,
}

impl SelectionScope {
    /// Parses a scope prefix atom. Returns `None` for regular verbs.
    pub fn parse(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "UID" => Some(SelectionScope::Uid),
            "RID" => Some(SelectionScope::Rid),
            "HRID" => Some(SelectionScope::Hrid),
            "GID" => Some(SelectionScope::Gid),
            "TAG" => Some(SelectionScope::Tag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionScope::None => "",
            SelectionScope::Uid => "UID",
            SelectionScope::Rid => "RID",
            SelectionScope::Hrid => "HRID",
            SelectionScope::Gid => "GID",
            SelectionScope::Tag => "TAG",
        }
    }
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
