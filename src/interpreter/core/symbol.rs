use std::collections::HashMap;

/// Handle to an interned spelling. Two spellings that differ only by case
/// share a canon symbol; words compare by canon.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SymId(pub u32);

struct Entry {
    spelling: String,
    lower: String,
    canon: SymId,
    // next synonym in the circular ring of case variants
    synonym: SymId,
}

/// Append-only interner.
#[derive(Default)]
pub struct Symbols {
    entries: Vec<Entry>,
    by_spelling: HashMap<String, SymId>,
    by_lower: HashMap<String, SymId>,
}

impl Symbols {
    pub fn new() -> Symbols { Symbols::default() }

    pub fn intern(&mut self, text: &str) -> SymId {
        if let Some(&id) = self.by_spelling.get(text) {
            return id;
        }
        let id = SymId(self.entries.len() as u32);
        let lower = text.to_lowercase();
        let (canon, synonym) = match self.by_lower.get(&lower) {
            Some(&canon) => {
                // splice into the ring right after the canon
                let after = self.entries[canon.0 as usize].synonym;
                self.entries[canon.0 as usize].synonym = id;
                (canon, after)
            }
            None => {
                self.by_lower.insert(lower.clone(), id);
                (id, id)
            }
        };
        self.entries.push(Entry { spelling: text.to_string(), lower, canon, synonym });
        self.by_spelling.insert(text.to_string(), id);
        id
    }

    pub fn lookup(&self, text: &str) -> Option<SymId> { self.by_lower.get(&text.to_lowercase()).copied() }

    pub fn spelling(&self, id: SymId) -> &str { &self.entries[id.0 as usize].spelling }

    /// Lowercased spelling, used for keyword tables.
    pub fn lower(&self, id: SymId) -> &str { &self.entries[id.0 as usize].lower }

    pub fn canon(&self, id: SymId) -> SymId { self.entries[id.0 as usize].canon }

    pub fn same(&self, a: SymId, b: SymId) -> bool { self.canon(a) == self.canon(b) }

    pub fn synonyms(&self, id: SymId) -> Vec<SymId> {
        let mut out = vec![id];
        let mut at = self.entries[id.0 as usize].synonym;
        while at != id {
            out.push(at);
            at = self.entries[at.0 as usize].synonym;
        }
        out
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod test_symbols {
    use super::*;

    #[test]
    fn test_case_variants_share_canon() {
        let mut syms = Symbols::new();
        let a = syms.intern("Append");
        let b = syms.intern("append");
        let c = syms.intern("APPEND");
        assert_ne!(a, b);
        assert!(syms.same(a, b));
        assert_eq!(syms.canon(c), a);
        assert_eq!(syms.spelling(b), "append");
        assert_eq!(syms.intern("append"), b);
    }

    #[test]
    fn test_synonym_ring_is_circular() {
        let mut syms = Symbols::new();
        let a = syms.intern("x");
        let b = syms.intern("X");
        let ring = syms.synonyms(b);
        assert_eq!(ring.len(), 2);
        assert!(ring.contains(&a));
        assert_eq!(syms.lookup("x"), Some(a));
        assert_eq!(syms.lookup("y"), None);
    }
}
