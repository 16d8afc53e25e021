use std::collections::BTreeMap;

/// Group the items of `iter` by the key `f` computes, in ascending key order.
/// Items keep their relative order within a group.
pub fn group_by_key<T, K, F>(iter: impl Iterator<Item = T>, mut f: F) -> Vec<(K, Vec<T>)>
where
    F: FnMut(&T) -> K,
    K: Ord,
{
    let mut groups: BTreeMap<K, Vec<T>> = Default::default();
    for i in iter {
        let key = f(&i);
        groups.entry(key).or_default().push(i);
    }
    groups.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_in_key_order() {
        let groups = group_by_key(vec![5, 2, 8, 3, 4].into_iter(), |x| x % 2);
        assert_eq!(groups, vec![(0, vec![2, 8, 4]), (1, vec![5, 3])]);
    }

    #[test]
    fn empty_input() {
        let groups = group_by_key(std::iter::empty::<u32>(), |&x| x);
        assert!(groups.is_empty());
    }
}
