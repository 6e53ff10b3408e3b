//! Key Expansion Module
//!
//! Turns arbitrary key objects into cache key strings and applies namespaces.

use std::collections::{BTreeMap, HashMap};

// == Cache Key ==
/// Anything that can be expanded into a cache key string.
///
/// Sequences join their elements with `/`; maps are sorted by key and
/// rendered as `key=value` pairs joined with `/`.
pub trait CacheKey {
    fn cache_key(&self) -> String;
}

impl CacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

macro_rules! display_key {
    ($($t:ty),*) => {
        $(impl CacheKey for $t {
            fn cache_key(&self) -> String {
                self.to_string()
            }
        })*
    };
}

display_key!(i32, i64, u32, u64, usize, bool, char);

impl<T: CacheKey> CacheKey for [T] {
    fn cache_key(&self) -> String {
        self.iter()
            .map(CacheKey::cache_key)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl<T: CacheKey> CacheKey for Vec<T> {
    fn cache_key(&self) -> String {
        self.as_slice().cache_key()
    }
}

impl<K: CacheKey, V: CacheKey> CacheKey for BTreeMap<K, V> {
    fn cache_key(&self) -> String {
        pairs_key(self.iter())
    }
}

impl<K: CacheKey, V: CacheKey, S> CacheKey for HashMap<K, V, S> {
    fn cache_key(&self) -> String {
        pairs_key(self.iter())
    }
}

fn pairs_key<'a, K, V, I>(pairs: I) -> String
where
    K: CacheKey + 'a,
    V: CacheKey + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let mut rendered: Vec<(String, String)> = pairs
        .map(|(k, v)| (k.cache_key(), v.cache_key()))
        .collect();
    rendered.sort_by(|a, b| a.0.cmp(&b.0));
    rendered
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("/")
}

// == Namespace Key ==
/// Expands `key` and prepends `namespace:` when a namespace is given.
pub fn namespace_key<K: CacheKey + ?Sized>(key: &K, namespace: Option<&str>) -> String {
    let expanded = key.cache_key();
    match namespace {
        Some(ns) => format!("{}:{}", ns, expanded),
        None => expanded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record {
        id: u64,
    }

    impl CacheKey for Record {
        fn cache_key(&self) -> String {
            format!("records/{}", self.id)
        }
    }

    #[test]
    fn test_namespaces_a_plain_string() {
        assert_eq!(namespace_key("thing", Some("space")), "space:thing");
        assert_eq!(namespace_key("thing", None), "thing");
    }

    #[test]
    fn test_expands_custom_keys() {
        assert_eq!(namespace_key(&Record { id: 5 }, None), "records/5");
    }

    #[test]
    fn test_expands_sequences() {
        assert_eq!(namespace_key(&vec!["alpha", "beta"], None), "alpha/beta");
        let records = vec![Record { id: 1 }, Record { id: 2 }];
        assert_eq!(records.cache_key(), "records/1/records/2");
    }

    #[test]
    fn test_expands_maps_sorted_by_key() {
        let mut map = HashMap::new();
        map.insert("beta", 2);
        map.insert("alpha", 1);
        assert_eq!(map.cache_key(), "alpha=1/beta=2");
    }
}
