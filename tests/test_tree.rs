mod common;
mod tree;

use std::{
    sync::{Arc, Barrier},
    thread,
};

#[allow(unused_imports)]
use log::{debug, warn};

use quickcheck::{Gen, QuickCheck};
use rand::Rng;

use blinkmap::{
    BincodeSerializer, Config, Datum, DatumOrder, DeltaU64, Error,
    PrefixStrings, Result, Tree,
};

use tree::{
    Key,
    Op::{self, *},
    prop_tree_matches_btreemap,
};

const N_THREADS: usize = 10;
const N_PER_THREAD: usize = 100;
// NB N should be multiple of N_THREADS
const N: usize = N_THREADS * N_PER_THREAD;

fn small_tree<V>() -> Tree<u32, V>
where
    V: blinkmap::Value + serde::Serialize + serde::de::DeserializeOwned,
{
    Config::new().fanout(4).counted(true).tree().unwrap()
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_tree_pops() -> Result<()> {
    common::setup_logger();

    let tree = small_tree::<()>();

    for x in 0..N as u32 {
        tree.insert(x, ())?;
    }

    let mut threads = vec![];

    for _ in 0..N_THREADS {
        let tree = tree.clone();
        threads.push(thread::spawn(move || {
            let mut popped = vec![];
            for _ in 0..N_PER_THREAD {
                popped.push(tree.pop_first().unwrap().unwrap().0);
            }
            popped
        }));
    }

    let mut all = vec![];
    for thread in threads.into_iter() {
        let popped = thread.join().unwrap();
        assert!(
            popped.windows(2).all(|w| w[0] < w[1]),
            "each thread pops in ascending order"
        );
        all.extend(popped);
    }
    all.sort_unstable();

    assert_eq!(
        all,
        (0..N as u32).collect::<Vec<_>>(),
        "every key popped exactly once"
    );
    assert!(
        tree.is_empty()?,
        "elements left in tree: {:?}",
        tree.iter().collect::<Vec<_>>()
    );
    assert_eq!(tree.len()?, 0);
    tree.verify_integrity()?;

    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_tree_ops() {
    common::setup_logger();

    let tree = small_tree::<u32>();
    let barrier = Arc::new(Barrier::new(N_THREADS));

    macro_rules! par {
        ($t:ident, $f:expr) => {
            let mut threads = vec![];
            for tn in 0..N_THREADS {
                let tree = $t.clone();
                let barrier = barrier.clone();
                let thread = thread::Builder::new()
                    .name(format!("t({})", tn))
                    .spawn(move || {
                        barrier.wait();
                        // interleave the threads' keys so they fight
                        // over the same leaves
                        for i in 0..N_PER_THREAD {
                            let k = (i * N_THREADS + tn) as u32;
                            $f(&*tree, k);
                        }
                    })
                    .expect("should be able to spawn thread");
                threads.push(thread);
            }
            while let Some(thread) = threads.pop() {
                if let Err(e) = thread.join() {
                    panic!("thread failure: {:?}", e);
                }
            }
        };
    }

    debug!("========== initial sets ==========");
    let t = Arc::new(tree);
    par! {t, |tree: &Tree<u32, u32>, k: u32| {
        assert_eq!(tree.get(&k).unwrap(), None);
        tree.insert(k, k).unwrap();
        assert_eq!(
            tree.get(&k).unwrap(),
            Some(k),
            "failed to read key {} that we just wrote",
            k
        );
    }};
    t.verify_integrity().unwrap();
    assert_eq!(t.len().unwrap(), N);

    let n_scanned = t.iter().count();
    if n_scanned != N {
        warn!(
            "WARNING: test_concurrent_tree_ops only iterated over {} keys, \
             expected {}",
            n_scanned, N
        );
        panic!("expected {} keys in the tree, found {:?}", N, t);
    }

    debug!("========== reading sets ==========");
    par! {t, |tree: &Tree<u32, u32>, k: u32| {
        assert_eq!(tree.get(&k).unwrap(), Some(k), "failed to read key {}", k);
        assert_eq!(tree.floor_key(&k).unwrap(), Some(k));
    }};

    debug!("========== CAS test ==========");
    par! {t, |tree: &Tree<u32, u32>, k: u32| {
        tree.compare_and_swap(&k, Some(&k), Some(k + 1)).unwrap().unwrap();
        let stale = tree.compare_and_swap(&k, Some(&k), Some(k + 2));
        assert!(stale.unwrap().is_err());
    }};

    debug!("========== deleting ==========");
    par! {t, |tree: &Tree<u32, u32>, k: u32| {
        assert_eq!(tree.remove(&k).unwrap(), Some(k + 1));
    }};

    assert!(t.is_empty().unwrap());
    assert_eq!(t.len().unwrap(), 0);
    t.verify_integrity().unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_tree_iter() -> Result<()> {
    common::setup_logger();

    const N_FORWARD: usize = 4;
    const N_REVERSE: usize = 4;

    // even keys are never touched, odd ones churn underneath the readers
    let tree = small_tree::<u32>();
    for k in (0..N as u32).step_by(2) {
        tree.insert(k, k)?;
    }
    let stable: Vec<u32> = (0..N as u32).step_by(2).collect();

    let barrier = Arc::new(Barrier::new(N_FORWARD + N_REVERSE + 2));
    let mut threads = vec![];

    for i in 0..N_FORWARD + N_REVERSE {
        let tree = tree.clone();
        let barrier = barrier.clone();
        let stable = stable.clone();
        let reverse = i >= N_FORWARD;
        threads.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..20 {
                let keys = if reverse {
                    tree.descending_map().keys()
                } else {
                    tree.keys()
                };
                let seen: Vec<u32> = keys.iter().collect::<Result<_>>()?;
                let evens: Vec<u32> =
                    seen.iter().copied().filter(|k| k % 2 == 0).collect();
                if reverse {
                    assert!(evens.iter().rev().eq(stable.iter()));
                    assert!(seen.windows(2).all(|w| w[0] > w[1]));
                } else {
                    assert_eq!(evens, stable);
                    assert!(seen.windows(2).all(|w| w[0] < w[1]));
                }
            }
            Ok(())
        }));
    }

    for _ in 0..2 {
        let tree = tree.clone();
        let barrier = barrier.clone();
        threads.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            let mut rng = rand::rng();
            for _ in 0..N * 4 {
                let k = rng.random_range(0..N as u32) | 1;
                if rng.random_bool(0.5) {
                    tree.insert(k, k)?;
                } else {
                    tree.remove(&k)?;
                }
            }
            Ok(())
        }));
    }

    for thread in threads.into_iter() {
        thread.join().expect("thread should not have crashed")?;
    }

    tree.verify_integrity()?;
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_fetch_and_update() -> Result<()> {
    let tree = small_tree::<u64>();
    let mut threads = vec![];

    for _ in 0..N_THREADS {
        let tree = tree.clone();
        threads.push(thread::spawn(move || {
            for i in 0..N_PER_THREAD as u32 {
                tree.fetch_and_update(&(i % 7), |v| {
                    Some(v.copied().unwrap_or(0) + 1)
                })
                .unwrap();
            }
        }));
    }

    for thread in threads.into_iter() {
        thread.join().unwrap();
    }

    let total: u64 =
        tree.values().iter().collect::<Result<Vec<_>>>()?.into_iter().sum();
    assert_eq!(total, N as u64);
    assert_eq!(tree.len()?, 7);
    Ok(())
}

#[test]
fn tree_range() -> Result<()> {
    common::setup_logger();

    let tree = Config::new().fanout(3).tree::<String, u32>()?;

    for c in 'a'..='z' {
        tree.insert(c.to_string(), c as u32)?;
    }

    let keys = |it: blinkmap::Iter<String, u32>| -> Result<String> {
        it.map(|res| res.map(|(k, _)| k))
            .collect::<Result<Vec<_>>>()
            .map(|v| v.concat())
    };

    assert_eq!(keys(tree.range("b".to_string().."e".into())?)?, "bcd");
    assert_eq!(keys(tree.range("b".to_string()..="e".into())?)?, "bcde");
    assert_eq!(keys(tree.range("x".to_string()..)?)?, "xyz");
    assert_eq!(keys(tree.range(.."c".to_string())?)?, "ab");
    assert_eq!(keys(tree.range("bb".to_string().."c".into())?)?, "");
    assert!(matches!(
        tree.range("e".to_string().."b".into()),
        Err(Error::InvalidRange(_))
    ));

    Ok(())
}

#[test]
fn tree_crud() -> Result<()> {
    let tree = Config::new().fanout(3).tree::<u32, String>()?;

    assert_eq!(tree.get(&1)?, None);
    assert_eq!(tree.insert(1, "one".into())?, None);
    assert_eq!(tree.insert(1, "uno".into())?, Some("one".into()));
    assert_eq!(tree.replace(&2, "two".into())?, None);
    assert_eq!(tree.get(&2)?, None);
    assert_eq!(tree.insert_if_absent(2, "two".into())?, None);
    assert_eq!(tree.insert_if_absent(2, "dos".into())?, Some("two".into()));
    assert_eq!(tree.replace(&2, "dos".into())?, Some("two".into()));

    assert!(!tree.replace_if_equal(&1, &"one".into(), "ein".into())?);
    assert!(tree.replace_if_equal(&1, &"uno".into(), "ein".into())?);
    assert!(!tree.remove_if_equal(&2, &"two".into())?);
    assert!(tree.remove_if_equal(&2, &"dos".into())?);
    assert!(!tree.contains_key(&2)?);

    assert_eq!(
        tree.update_and_fetch(&3, |v| Some(format!("{:?}", v)))?,
        Some("None".into())
    );
    assert_eq!(tree.fetch_and_update(&3, |_| None)?, Some("None".into()));
    assert_eq!(tree.update_and_fetch(&3, |_| None)?, None);

    assert_eq!(tree.first_key()?, 1);
    assert_eq!(tree.last_key()?, 1);
    assert_eq!(tree.remove(&1)?, Some("ein".into()));
    assert_eq!(tree.first_key(), Err(Error::NotFound));
    assert_eq!(tree.last_entry()?, None);
    assert_eq!(tree.remove(&1)?, None);

    Ok(())
}

#[test]
fn checksum_follows_contents() -> Result<()> {
    let a = small_tree::<u32>();
    let b = Config::new().fanout(16).tree::<u32, u32>()?;
    let mut rng = rand::rng();
    let mut keys: Vec<u32> = (0..300).collect();
    for i in (1..keys.len()).rev() {
        keys.swap(i, rng.random_range(0..=i));
    }

    for &k in &keys {
        a.insert(k, k * 3)?;
    }
    for k in 0..300 {
        b.insert(k, k * 3)?;
    }
    assert_eq!(a.checksum()?, b.checksum()?);

    b.insert(7, 0)?;
    assert_ne!(a.checksum()?, b.checksum()?);
    Ok(())
}

#[test]
fn compact_key_encodings() -> Result<()> {
    let config = Config::new().fanout(5);

    let strings = config.tree_with::<String, u64>(
        Arc::new(blinkmap::NaturalOrder),
        Arc::new(PrefixStrings),
        Arc::new(DeltaU64),
    )?;
    for i in 0..200_u64 {
        strings.insert(format!("user/{:05}", i * 7), i)?;
    }
    assert_eq!(strings.get(&"user/00700".to_string())?, Some(100));
    assert_eq!(
        strings.ceiling_key(&"user/00701".to_string())?,
        Some("user/00707".into())
    );
    strings.verify_integrity()?;

    let numbers = config.tree_with::<u64, Vec<u8>>(
        Arc::new(blinkmap::NaturalOrder),
        Arc::new(DeltaU64),
        Arc::new(BincodeSerializer::default()),
    )?;
    for i in (0..1000_u64).rev().step_by(3) {
        numbers.insert(i * 1_000_003, i.to_be_bytes().to_vec())?;
    }
    assert_eq!(numbers.len()?, 334);
    assert_eq!(numbers.first_key()?, 0);
    assert_eq!(numbers.lower_key(&(999 * 1_000_003))?, Some(996 * 1_000_003));
    numbers.verify_integrity()?;

    Ok(())
}

#[test]
fn dynamic_keys() -> Result<()> {
    let strict = Config::new().fanout(3).tree_with::<Datum, u8>(
        Arc::new(DatumOrder::natural()),
        Arc::new(BincodeSerializer::default()),
        Arc::new(BincodeSerializer::default()),
    )?;
    assert!(strict.comparator().is_none());

    strict.insert(Datum::Int(5), 5)?;
    assert_eq!(strict.insert(Datum::Null, 0), Err(Error::NullKey));
    assert_eq!(strict.get(&Datum::Null), Err(Error::NullKey));
    assert!(matches!(
        strict.insert("five".into(), 5),
        Err(Error::TypeMismatch(_))
    ));
    assert!(matches!(strict.tail_map(Datum::Null), Err(Error::NullKey)));
    assert_eq!(strict.len()?, 1);

    let lenient = Config::new().fanout(3).tree_with::<Datum, u8>(
        Arc::new(DatumOrder::nulls_first()),
        Arc::new(BincodeSerializer::default()),
        Arc::new(BincodeSerializer::default()),
    )?;
    assert!(lenient.comparator().is_some());
    for i in 0..10 {
        lenient.insert(Datum::Int(i), i as u8)?;
    }
    lenient.insert(Datum::Null, 99)?;
    assert_eq!(lenient.first_entry()?, Some((Datum::Null, 99)));
    assert_eq!(lenient.higher_key(&Datum::Null)?, Some(Datum::Int(0)));
    assert_eq!(lenient.tail_map_with(Datum::Null, false)?.len()?, 10);

    Ok(())
}

#[test]
fn reopen_keeps_contents() -> Result<()> {
    let config = Config::new().fanout(3).counted(true);
    let tree = config.tree::<u32, u32>()?;
    for i in 0..100 {
        tree.insert(i, i)?;
    }
    let root_cell = tree.root_cell();
    drop(tree);

    let tree = config.open_tree::<u32, u32>(root_cell)?;
    assert_eq!(tree.len()?, 100);
    assert_eq!(tree.last_entry()?, Some((99, 99)));
    tree.verify_integrity()?;
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn quickcheck_tree_matches_btreemap() {
    let n_tests = 100;

    QuickCheck::new()
        .r#gen(Gen::new(100))
        .tests(n_tests)
        .max_tests(n_tests * 10)
        .quickcheck(
            prop_tree_matches_btreemap as fn(Vec<Op>, u8, bool) -> bool,
        );
}

#[test]
fn tree_bug_00() {
    // postmortem: a pop had to look past leaves emptied by earlier pops
    assert!(prop_tree_matches_btreemap(
        vec![
            Set(Key(1), 1),
            Set(Key(2), 2),
            Set(Key(3), 3),
            Set(Key(4), 4),
            Set(Key(5), 5),
            PopFirst,
            PopFirst,
            PopFirst,
            GetLt(Key(5)),
            PopFirst,
            PopFirst,
            PopFirst,
        ],
        0,
        true,
    ))
}

#[test]
fn tree_bug_01() {
    // postmortem: a reverse scan starting inside an emptied leaf
    assert!(prop_tree_matches_btreemap(
        vec![
            Set(Key(10), 0),
            Set(Key(20), 0),
            Set(Key(30), 0),
            Set(Key(40), 0),
            Set(Key(50), 0),
            Del(Key(30)),
            Del(Key(40)),
            Scan(Key(0), -10),
            Scan(Key(35), -10),
            Window(Key(25), false, Key(45), true),
        ],
        0,
        false,
    ))
}

#[test]
fn tree_bug_02() {
    // postmortem: exclusive windows whose ends are the same key
    assert!(prop_tree_matches_btreemap(
        vec![
            Set(Key(5), 0),
            Window(Key(5), false, Key(5), false),
            Window(Key(5), true, Key(5), true),
            Window(Key(6), true, Key(5), true),
            Reopen,
            Floor(Key(4)),
            Ceiling(Key(6)),
        ],
        1,
        true,
    ))
}

#[test]
fn tree_bug_03() {
    // postmortem: cas on a missing key reported the wrong current value
    assert!(prop_tree_matches_btreemap(
        vec![Cas(Key(0), 0, 1), Set(Key(0), 0), Cas(Key(0), 0, 1), Get(Key(0))],
        0,
        false,
    ))
}
