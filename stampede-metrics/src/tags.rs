use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// An immutable set of `key:value` tags attached to a sample.
///
/// Tag sets are interned: all sets created from the same registry root share
/// structure through a trie of `(key, value)` edges, and two handles compare
/// equal if and only if they refer to the same trie node. Deriving the same
/// final set of pairs through [`TagSet::with`], in any order, always yields
/// the same node.
///
/// Comparing tag sets that descend from different roots is undefined and will
/// simply report inequality.
#[derive(Clone)]
pub struct TagSet(Arc<TagNode>);

struct TagNode {
    parent: Option<TagSet>,
    key: String,
    value: String,
    interner: Arc<Interner>,
}

/// Find-or-insert table for trie nodes, shared by everything descending from
/// one root. Values are weak so dropping every handle to a branch releases it;
/// the guarantee is only that *live* handles for the same pair set are one
/// node.
#[derive(Default)]
struct Interner {
    children: Mutex<HashMap<(usize, String, String), Weak<TagNode>>>,
}

impl TagSet {
    /// Creates the root node of a fresh trie.
    ///
    /// All tag sets of one registry must branch out from its root, otherwise
    /// comparing them won't work correctly.
    pub(crate) fn new_root() -> TagSet {
        TagSet(Arc::new(TagNode {
            parent: None,
            key: String::new(),
            value: String::new(),
            interner: Arc::new(Interner::default()),
        }))
    }

    /// Returns the set with `key` bound to `value`.
    ///
    /// An existing binding for `key` is replaced. The result is interned: any
    /// sequence of `with` calls arriving at the same pairs returns the same
    /// node.
    pub fn with(&self, key: &str, value: &str) -> TagSet {
        let mut pairs = self.to_map();
        if pairs.get(key).map(String::as_str) == Some(value) {
            return self.clone();
        }
        pairs.insert(key.to_string(), value.to_string());

        // Rebuild along the canonical (key-sorted) path so insertion order
        // cannot influence node identity.
        let mut current = self.root();
        for (k, v) in &pairs {
            current = current.child(k, v);
        }
        current
    }

    /// Looks up the value bound to `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut node: &TagNode = &self.0;
        loop {
            if node.parent.is_some() && node.key == key {
                return Some(&node.value);
            }
            match &node.parent {
                Some(parent) => node = &parent.0,
                None => return None,
            }
        }
    }

    /// Returns `true` if every pair of `other` is also present in this set.
    ///
    /// The empty (root) set is contained in everything.
    pub fn contains(&self, other: &TagSet) -> bool {
        let mut node: &TagNode = &other.0;
        while let Some(parent) = &node.parent {
            if self.get(&node.key) != Some(node.value.as_str()) {
                return false;
            }
            node = &parent.0;
        }
        true
    }

    /// Returns `true` if this is a root node, i.e. the set holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.parent.is_none()
    }

    /// Collects the pairs into a sorted map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        let mut node: &TagNode = &self.0;
        while let Some(parent) = &node.parent {
            pairs.entry(node.key.clone()).or_insert_with(|| node.value.clone());
            node = &parent.0;
        }
        pairs
    }

    fn root(&self) -> TagSet {
        let mut current = self.clone();
        while let Some(parent) = &current.0.parent {
            let parent = parent.clone();
            current = parent;
        }
        current
    }

    fn child(&self, key: &str, value: &str) -> TagSet {
        let entry = (Arc::as_ptr(&self.0) as usize, key.to_string(), value.to_string());
        let mut children = self.0.interner.children.lock();
        if let Some(existing) = children.get(&entry).and_then(Weak::upgrade) {
            return TagSet(existing);
        }

        let node = Arc::new(TagNode {
            parent: Some(self.clone()),
            key: key.to_string(),
            value: value.to_string(),
            interner: Arc::clone(&self.0.interner),
        });
        children.insert(entry, Arc::downgrade(&node));
        TagSet(node)
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TagSet {}

impl Hash for TagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.0) as usize);
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.to_map()).finish()
    }
}
