/*!
  The label table: symbolic names bound to absolute program addresses.

  Declaration order is semantically significant — addresses are the running
  sum of instruction lengths up to the declaration — so the table keeps an
  explicit ordered list of bindings alongside a name index. Two labels can
  legally share one address (consecutive declarations with no instruction
  between them), which is why the index is one-directional.

  Names are case-insensitive and stored normalized to uppercase.
*/

use std::collections::HashMap;

use string_cache::DefaultAtom;

#[derive(Clone, Debug, Default)]
pub struct LabelTable {
  /// Every binding in declaration order, duplicates included.
  order: Vec<(DefaultAtom, usize)>,
  /// Name to address; on duplicate declaration the later binding wins.
  index: HashMap<DefaultAtom, usize>,
}

/// The interned, normalized form of a label name.
pub fn normalize(name: &str) -> DefaultAtom {
  DefaultAtom::from(name.to_uppercase())
}

impl LabelTable {
  pub fn new() -> LabelTable {
    LabelTable::default()
  }

  /**
    Binds `name` to `address`. Returns `false` if the name was already bound —
    the new binding still wins, and the caller is expected to warn.
  */
  pub fn bind(&mut self, name: &str, address: usize) -> bool {
    let atom = normalize(name);
    self.order.push((atom.clone(), address));
    self.index.insert(atom, address).is_none()
  }

  pub fn address_of(&self, name: &str) -> Option<usize> {
    self.index.get(&normalize(name)).copied()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(&normalize(name))
  }

  /// The first label declared at `address`, if any. Used to annotate listings.
  pub fn name_at(&self, address: usize) -> Option<&DefaultAtom> {
    self
      .order
      .iter()
      .find(|(_, a)| *a == address)
      .map(|(name, _)| name)
  }

  /// Bindings in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = (&DefaultAtom, usize)> {
    self.order.iter().map(|(name, address)| (name, *address))
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}
