use std::{collections::BTreeMap, ops::Bound};

use quickcheck::{Arbitrary, Gen};

use blinkmap::{Config, Error, Tree};

#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct Key(pub u16);

fn range(g: &mut Gen, min_inclusive: usize, max_exclusive: usize) -> usize {
    assert!(max_exclusive > min_inclusive);
    let range = max_exclusive - min_inclusive;
    let generated = usize::arbitrary(g) % range;
    min_inclusive + generated
}

impl Arbitrary for Key {
    fn arbitrary(g: &mut Gen) -> Self {
        // a key space not much larger than the op count, so that
        // operations keep landing on keys that already exist
        let space = g.size().max(1) * 2;
        Key(range(g, 0, space) as u16)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.0.shrink().map(Key))
    }
}

#[derive(Debug, Clone)]
pub enum Op {
    Set(Key, u8),
    SetIfAbsent(Key, u8),
    Get(Key),
    GetLt(Key),
    GetGt(Key),
    Floor(Key),
    Ceiling(Key),
    Del(Key),
    Cas(Key, u8, u8),
    Scan(Key, isize),
    PopFirst,
    PopLast,
    Window(Key, bool, Key, bool),
    Reopen,
}

use self::Op::*;

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        if range(g, 0, 20) == 0 {
            return Reopen;
        }

        let choice = range(g, 0, 13);

        match choice {
            0 => Set(Key::arbitrary(g), u8::arbitrary(g)),
            1 => SetIfAbsent(Key::arbitrary(g), u8::arbitrary(g)),
            2 => Get(Key::arbitrary(g)),
            3 => GetLt(Key::arbitrary(g)),
            4 => GetGt(Key::arbitrary(g)),
            5 => Floor(Key::arbitrary(g)),
            6 => Ceiling(Key::arbitrary(g)),
            7 => Del(Key::arbitrary(g)),
            8 => Cas(Key::arbitrary(g), u8::arbitrary(g), u8::arbitrary(g)),
            9 => Scan(Key::arbitrary(g), range(g, 0, 80) as isize - 40),
            10 => PopFirst,
            11 => PopLast,
            12 => Window(
                Key::arbitrary(g),
                bool::arbitrary(g),
                Key::arbitrary(g),
                bool::arbitrary(g),
            ),
            _ => panic!("impossible choice"),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match *self {
            Set(ref k, v) => Box::new(k.shrink().map(move |sk| Set(sk, v))),
            SetIfAbsent(ref k, v) => {
                Box::new(k.shrink().map(move |sk| SetIfAbsent(sk, v)))
            }
            Get(ref k) => Box::new(k.shrink().map(Get)),
            GetLt(ref k) => Box::new(k.shrink().map(GetLt)),
            GetGt(ref k) => Box::new(k.shrink().map(GetGt)),
            Floor(ref k) => Box::new(k.shrink().map(Floor)),
            Ceiling(ref k) => Box::new(k.shrink().map(Ceiling)),
            Cas(ref k, old, new) => {
                Box::new(k.shrink().map(move |k| Cas(k, old, new)))
            }
            Scan(ref k, len) => Box::new(k.shrink().map(move |k| Scan(k, len))),
            Del(ref k) => Box::new(k.shrink().map(Del)),
            Window(lo, lo_incl, hi, hi_incl) => Box::new(
                lo.shrink().map(move |lo| Window(lo, lo_incl, hi, hi_incl)),
            ),
            PopFirst | PopLast | Reopen => Box::new(vec![].into_iter()),
        }
    }
}

fn bound(key: Key, inclusive: bool) -> Bound<Key> {
    if inclusive { Bound::Included(key) } else { Bound::Excluded(key) }
}

fn within(k: &Key, lo: &Bound<Key>, hi: &Bound<Key>) -> bool {
    let above = match lo {
        Bound::Included(lo) => k >= lo,
        Bound::Excluded(lo) => k > lo,
        Bound::Unbounded => true,
    };
    let below = match hi {
        Bound::Included(hi) => k <= hi,
        Bound::Excluded(hi) => k < hi,
        Bound::Unbounded => true,
    };
    above && below
}

pub fn prop_tree_matches_btreemap(
    ops: Vec<Op>,
    fanout: u8,
    counted: bool,
) -> bool {
    if let Err(e) = prop_tree_matches_btreemap_inner(ops, fanout, counted) {
        eprintln!("hit error while running quickcheck on tree: {:?}", e);
        false
    } else {
        true
    }
}

fn prop_tree_matches_btreemap_inner(
    ops: Vec<Op>,
    fanout: u8,
    counted: bool,
) -> blinkmap::Result<()> {
    super::common::setup_logger();

    let config = Config::new()
        .fanout(3 + usize::from(fanout % 8))
        .counted(counted);

    let mut tree: Tree<u16, u16> = config.tree()?;
    let mut reference: BTreeMap<Key, u16> = BTreeMap::new();

    for op in ops {
        match op {
            Set(k, v) => {
                let old_actual = tree.insert(k.0, u16::from(v))?;
                let old_reference = reference.insert(k, u16::from(v));
                assert_eq!(
                    old_actual, old_reference,
                    "when setting key {:?}, expected old returned value \
                     to be {:?}\n{:?}",
                    k, old_reference, tree
                );
            }
            SetIfAbsent(k, v) => {
                let existing = tree.insert_if_absent(k.0, u16::from(v))?;
                let expected = reference.get(&k).copied();
                if expected.is_none() {
                    reference.insert(k, u16::from(v));
                }
                assert_eq!(existing, expected);
            }
            Get(k) => {
                let res1 = tree.get(&k.0)?;
                let res2 = reference.get(&k).cloned();
                assert_eq!(res1, res2);
            }
            GetLt(k) => {
                let res1 = tree.lower_entry(&k.0)?;
                let res2 =
                    reference.range(..k).next_back().map(|(k, v)| (k.0, *v));
                assert_eq!(
                    res1, res2,
                    "lower_entry({:?}) should have returned {:?} \
                     but it returned {:?} instead. \
                     \n Tree: {:?}",
                    k, res2, res1, tree
                );
            }
            GetGt(k) => {
                let res1 = tree.higher_key(&k.0)?;
                let res2 = reference
                    .range((Bound::Excluded(k), Bound::Unbounded))
                    .next()
                    .map(|(k, _)| k.0);
                assert_eq!(
                    res1, res2,
                    "higher_key({:?}) expected {:?} in tree {:?}",
                    k, res2, tree
                );
            }
            Floor(k) => {
                let res1 = tree.floor_key(&k.0)?;
                let res2 = reference.range(..=k).next_back().map(|(k, _)| k.0);
                assert_eq!(res1, res2);
            }
            Ceiling(k) => {
                let res1 = tree.ceiling_entry(&k.0)?;
                let res2 = reference.range(k..).next().map(|(k, v)| (k.0, *v));
                assert_eq!(res1, res2);
            }
            Del(k) => {
                assert_eq!(tree.remove(&k.0)?, reference.remove(&k));
            }
            Cas(k, old, new) => {
                let tree_res = tree.compare_and_swap(
                    &k.0,
                    Some(&u16::from(old)),
                    Some(u16::from(new)),
                )?;

                let ref_old = reference.get(&k).cloned();
                if ref_old == Some(u16::from(old)) {
                    reference.insert(k, u16::from(new));
                    assert_eq!(tree_res, Ok(()));
                } else {
                    let err = tree_res.unwrap_err();
                    assert_eq!(err.current, ref_old);
                }
            }
            Scan(k, len) => {
                let n: usize = len.unsigned_abs();
                let (actual, expected): (Vec<(u16, u16)>, Vec<(u16, u16)>) =
                    if len > 0 {
                        (
                            tree.range(k.0..)?
                                .take(n)
                                .collect::<blinkmap::Result<_>>()?,
                            reference
                                .range(k..)
                                .take(n)
                                .map(|(rk, rv)| (rk.0, *rv))
                                .collect(),
                        )
                    } else {
                        (
                            tree.tail_map(k.0)?
                                .descending_map()
                                .iter()
                                .take(n)
                                .collect::<blinkmap::Result<_>>()?,
                            reference
                                .range(k..)
                                .rev()
                                .take(n)
                                .map(|(rk, rv)| (rk.0, *rv))
                                .collect(),
                        )
                    };
                assert_eq!(
                    actual, expected,
                    "scan of {} from {:?} disagreed on tree: {:?}",
                    len, k, tree
                );
            }
            PopFirst => {
                let expected = reference.pop_first().map(|(k, v)| (k.0, v));
                assert_eq!(tree.pop_first()?, expected);
            }
            PopLast => {
                let expected = reference.pop_last().map(|(k, v)| (k.0, v));
                assert_eq!(tree.pop_last()?, expected);
            }
            Window(lo, lo_incl, hi, hi_incl) => {
                let window = tree.sub_map_with(lo.0, lo_incl, hi.0, hi_incl);
                if lo > hi {
                    assert!(matches!(window, Err(Error::InvalidRange(_))));
                    continue;
                }
                let window = window?;
                let (lo, hi) = (bound(lo, lo_incl), bound(hi, hi_incl));
                let expected: Vec<u16> = reference
                    .keys()
                    .filter(|k| within(k, &lo, &hi))
                    .map(|k| k.0)
                    .collect();

                assert_eq!(window.len()?, expected.len());
                assert_eq!(window.first_key().ok(), expected.first().copied());
                assert_eq!(window.last_key().ok(), expected.last().copied());
                let backward: Vec<u16> = window
                    .descending_map()
                    .keys()
                    .iter()
                    .collect::<blinkmap::Result<_>>()?;
                assert!(backward.iter().rev().eq(expected.iter()));
            }
            Reopen => {
                tree = config.open_tree(tree.root_cell())?;
            }
        }

        tree.verify_integrity()?;
    }

    assert_eq!(tree.len()?, reference.len());

    Ok(())
}
