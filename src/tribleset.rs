//! A set of [`Trible`]s indexed under every permutation of their three
//! fields.
//!
//! Each insert writes the trible into six tries, one per byte order, so
//! any access pattern a query needs (bound or unbound entity, attribute
//! and value in any combination) has an index whose prefix matches it.
//! The six tries stay in lockstep; counts and equality can be answered
//! from any one of them.

mod tribleconstraint;

pub use tribleconstraint::TribleConstraint;


use crate::query::VariableId;
use crate::trible::{
    AEVSegmentation, AVESegmentation, EAVSegmentation, EVASegmentation, Trible,
    VAESegmentation, VEASegmentation, TRIBLE_LEN,
};
use crate::trie::PACT;

#[derive(Debug, Clone)]
pub struct TribleSet {
    pub eav: PACT<TRIBLE_LEN, (), EAVSegmentation>,
    pub eva: PACT<TRIBLE_LEN, (), EVASegmentation>,
    pub aev: PACT<TRIBLE_LEN, (), AEVSegmentation>,
    pub ave: PACT<TRIBLE_LEN, (), AVESegmentation>,
    pub vea: PACT<TRIBLE_LEN, (), VEASegmentation>,
    pub vae: PACT<TRIBLE_LEN, (), VAESegmentation>,
}

impl TribleSet {
    pub fn new() -> TribleSet {
        TribleSet {
            eav: PACT::new(),
            eva: PACT::new(),
            aev: PACT::new(),
            ave: PACT::new(),
            vea: PACT::new(),
            vae: PACT::new(),
        }
    }

    /// The number of tribles in the set. All six indices agree.
    pub fn len(&self) -> u64 {
        self.eav.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eav.is_empty()
    }

    pub fn add(&mut self, trible: &Trible) {
        self.eav.put(&trible.order_eav(), ());
        self.eva.put(&trible.order_eva(), ());
        self.aev.put(&trible.order_aev(), ());
        self.ave.put(&trible.order_ave(), ());
        self.vea.put(&trible.order_vea(), ());
        self.vae.put(&trible.order_vae(), ());
    }

    pub fn contains(&self, trible: &Trible) -> bool {
        self.eav.get(&trible.order_eav()).is_some()
    }

    /// An O(1) snapshot sharing all six indices.
    pub fn branch(&self) -> TribleSet {
        self.clone()
    }

    /// The union of the given sets, index by index.
    pub fn union<I>(sets: I) -> TribleSet
    where
        I: IntoIterator<Item = TribleSet>,
    {
        let sets: Vec<TribleSet> = sets.into_iter().collect();
        TribleSet {
            eav: PACT::union(sets.iter().map(|set| set.eav.clone())),
            eva: PACT::union(sets.iter().map(|set| set.eva.clone())),
            aev: PACT::union(sets.iter().map(|set| set.aev.clone())),
            ave: PACT::union(sets.iter().map(|set| set.ave.clone())),
            vea: PACT::union(sets.iter().map(|set| set.vea.clone())),
            vae: PACT::union(sets.iter().map(|set| set.vae.clone())),
        }
    }

    /// The tribles present in both sets.
    pub fn intersect(&self, other: &TribleSet) -> TribleSet {
        TribleSet {
            eav: self.eav.intersect(&other.eav),
            eva: self.eva.intersect(&other.eva),
            aev: self.aev.intersect(&other.aev),
            ave: self.ave.intersect(&other.ave),
            vea: self.vea.intersect(&other.vea),
            vae: self.vae.intersect(&other.vae),
        }
    }

    pub fn is_subset_of(&self, other: &TribleSet) -> bool {
        self.eav.is_subset_of(&other.eav)
    }

    pub fn is_intersecting(&self, other: &TribleSet) -> bool {
        self.eav.is_intersecting(&other.eav)
    }

    /// A constraint binding the three variables to this set's tribles,
    /// for use by a join engine. The variables must be distinct.
    pub fn constraint(
        &self,
        e: VariableId,
        a: VariableId,
        v: VariableId,
    ) -> TribleConstraint {
        TribleConstraint::new(self, e, a, v)
    }
}

impl Default for TribleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TribleSet {
    fn eq(&self, other: &Self) -> bool {
        self.eav == other.eav
    }
}

impl Eq for TribleSet {}

impl FromIterator<Trible> for TribleSet {
    fn from_iter<I: IntoIterator<Item = Trible>>(iter: I) -> Self {
        let mut set = TribleSet::new();
        for trible in iter {
            set.add(&trible);
        }
        set
    }
}

impl Extend<Trible> for TribleSet {
    fn extend<I: IntoIterator<Item = Trible>>(&mut self, iter: I) {
        for trible in iter {
            self.add(&trible);
        }
    }
}
