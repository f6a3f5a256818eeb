use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
/// Most-recent-N sequence; pushing past capacity drops the oldest entry.
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The `n` newest entries, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }

    /// Newest entry
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

/// Least-squares slope of evenly spaced samples.
///
/// Two samples give the endpoint delta, fewer give zero.
pub fn trend(values: &[f64]) -> f64 {
    match values.len() {
        0 | 1 => 0.0,
        2 => values[1] - values[0],
        n => {
            let n = n as f64;
            let x_mean = (n - 1.0) / 2.0;
            let y_mean = values.iter().sum::<f64>() / n;
            let (num, den) = values
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(num, den), (i, y)| {
                    let dx = i as f64 - x_mean;
                    (num + dx * (y - y_mean), den + dx * dx)
                });
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
    }
}
