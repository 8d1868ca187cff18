//! Argsort, gather and prefix-sum primitives.

/// Keys wider than this range fall back to a comparison sort rather than
/// allocating a bucket per distinct value.
const MAX_COUNTING_RANGE: u64 = 1 << 24;

/// Stable argsort of an integer key column.
///
/// Two-pass counting sort over the observed `[min, max]` range: suited to
/// small-range columns such as symbol ids, sides or bucketed timestamps.
/// Returns the indices that would sort `keys` ascending; equal keys keep
/// their original order.
pub fn counting_argsort(keys: &[i64]) -> Vec<u32> {
    if keys.is_empty() {
        return Vec::new();
    }
    let mut min = keys[0];
    let mut max = keys[0];
    for &k in &keys[1..] {
        min = min.min(k);
        max = max.max(k);
    }

    let range = max.abs_diff(min);
    if range >= MAX_COUNTING_RANGE {
        let mut idx: Vec<u32> = (0..keys.len() as u32).collect();
        idx.sort_by_key(|&i| keys[i as usize]);
        return idx;
    }

    let buckets = range as usize + 1;
    let mut counts = vec![0u32; buckets];
    for &k in keys {
        counts[(k - min) as usize] += 1;
    }
    // Exclusive prefix sums turn counts into starting offsets.
    let mut total = 0u32;
    for c in counts.iter_mut() {
        let n = *c;
        *c = total;
        total += n;
    }

    let mut out = vec![0u32; keys.len()];
    for (i, &k) in keys.iter().enumerate() {
        let bucket = (k - min) as usize;
        out[counts[bucket] as usize] = i as u32;
        counts[bucket] += 1;
    }
    out
}

/// `out[i] = src[idx[i]]`. Panics if an index is out of range.
pub fn gather<T: Copy>(src: &[T], idx: &[u32]) -> Vec<T> {
    idx.iter().map(|&i| src[i as usize]).collect()
}

/// Inclusive prefix sums.
pub fn prefix_sum<T>(xs: &[T]) -> Vec<T>
where
    T: Copy + std::ops::Add<Output = T>,
{
    let mut out = Vec::with_capacity(xs.len());
    let mut iter = xs.iter();
    let Some(&first) = iter.next() else {
        return out;
    };
    let mut acc = first;
    out.push(acc);
    for &x in iter {
        acc = acc + x;
        out.push(acc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argsort_small_range() {
        let keys = [3i64, 1, 2, 1, 3, 0];
        assert_eq!(counting_argsort(&keys), vec![5, 1, 3, 2, 0, 4]);
    }

    #[test]
    fn test_argsort_is_stable() {
        let keys = [5i64, 5, 5, 1, 1];
        assert_eq!(counting_argsort(&keys), vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn test_argsort_empty_and_singleton() {
        assert!(counting_argsort(&[]).is_empty());
        assert_eq!(counting_argsort(&[9]), vec![0]);
    }

    #[test]
    fn test_argsort_wide_range_fallback() {
        let keys = [i64::MAX, 0, i64::MIN, 7];
        assert_eq!(counting_argsort(&keys), vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_argsort_negative_keys() {
        let keys = [-2i64, -7, -2, 0];
        assert_eq!(counting_argsort(&keys), vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_gather() {
        let src = [10.0f64, 20.0, 30.0];
        assert_eq!(gather(&src, &[2, 0, 0, 1]), vec![30.0, 10.0, 10.0, 20.0]);
    }

    #[test]
    fn test_prefix_sum() {
        assert_eq!(prefix_sum(&[1i64, 2, 3, 4]), vec![1, 3, 6, 10]);
        assert!(prefix_sum::<i64>(&[]).is_empty());
        assert_eq!(prefix_sum(&[0.5f64, 0.25]), vec![0.5, 0.75]);
    }

    #[test]
    fn test_argsort_then_gather_sorts() {
        let keys = [4i64, 2, 9, 2, 0];
        let idx = counting_argsort(&keys);
        assert_eq!(gather(&keys, &idx), vec![0, 2, 2, 4, 9]);
    }
}
