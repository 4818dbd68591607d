use pact::bitset::ByteBitset;
use pact::query::{ByteCursor, VariableConstraint};
use pact::trible::Trible;
use pact::tribleset::TribleSet;

fn trible(e: u8, a: u8, v: u8) -> Trible {
    Trible::new(&[e; 16], &[a; 16], &[v; 32])
}

#[test]
fn add_union_and_subset_stay_in_lockstep() {
    let mut facts = TribleSet::new();
    facts.add(&trible(1, 1, 1));
    facts.add(&trible(1, 2, 3));

    let mut more = TribleSet::new();
    more.add(&trible(1, 2, 3));
    more.add(&trible(2, 2, 2));

    let all = TribleSet::union([facts.clone(), more.clone()]);
    assert_eq!(all.len(), 3);
    assert!(facts.is_subset_of(&all));
    assert!(more.is_subset_of(&all));

    let shared = facts.intersect(&more);
    assert_eq!(shared.len(), 1);
    assert!(shared.contains(&trible(1, 2, 3)));
    assert!(facts.is_intersecting(&more));
}

/// Solves `{ ?e attribute ?v }` against the set the way a join engine
/// would: pick the cheapest variable, bind it byte by byte from the
/// constraint's proposals, and recurse.
#[test]
fn constraint_enumerates_matching_tribles() {
    let mut facts = TribleSet::new();
    facts.add(&trible(1, 10, 100));
    facts.add(&trible(2, 10, 200));
    facts.add(&trible(2, 20, 201));

    let mut constraint = facts.constraint(0, 1, 2);

    let mut variables = ByteBitset::new_empty();
    constraint.variables(&mut variables);
    assert_eq!(variables.count(), 3);

    // The attribute is the most selective variable: two distinct
    // attributes against three entities-and-values combinations.
    assert_eq!(constraint.estimate(1), 2);

    // Bind a = 10 and count the (e, v) pairs below it.
    constraint.explore(1);
    let mut candidates = ByteBitset::new_empty();
    for depth in 0..32 {
        constraint.propose(&mut candidates);
        let byte = if depth < 16 { 0 } else { 10 };
        assert!(candidates.is_set(byte));
        constraint.push(byte);
    }

    assert_eq!(constraint.estimate(0), 2);

    constraint.explore(0);
    let mut entities = ByteBitset::new_empty();
    for _ in 0..16 {
        constraint.push(0);
    }
    constraint.propose(&mut entities);
    assert!(entities.is_set(1));
    assert!(entities.is_set(2));
    assert_eq!(entities.count(), 2);
}
