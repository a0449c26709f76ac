//! A min-max heap: supports O(log n) insert, peek/pop-min, and peek/pop-max
//! in the same structure (Atkinson, Sack, Santoro & Strothotte, 1986).
//!
//! Used by the sorter stage for bounded top-K accumulation. The heap holds
//! owned values, not pointers; dropping a non-empty heap drops every
//! remaining element exactly once, so disposing a sorter with buffered
//! results releases all of them with no extra code.
//!
//! The comparator is passed to each operation rather than stored, so the
//! heap stays reusable for any element type and any ordering a caller wants
//! (the sorter switches between by-score and by-fields orderings without
//! needing two heap types). `cmp(a, b) == Greater` means `a` ranks ahead of
//! `b`, i.e. closer to the max end, which `pop_max` yields first.

use std::cmp::Ordering;

use smallvec::SmallVec;

#[derive(Debug, Default)]
pub struct MinMaxHeap<T> {
    data: Vec<T>,
}

impl<T> MinMaxHeap<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { data: Vec::with_capacity(cap) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn peek_min(&self) -> Option<&T> {
        self.data.first()
    }

    pub fn peek_max(&self, cmp: &impl Fn(&T, &T) -> Ordering) -> Option<&T> {
        self.max_index(cmp).map(|i| &self.data[i])
    }

    pub fn push(&mut self, value: T, cmp: &impl Fn(&T, &T) -> Ordering) {
        self.data.push(value);
        let i = self.data.len() - 1;
        self.push_up(i, cmp);
    }

    pub fn pop_min(&mut self, cmp: &impl Fn(&T, &T) -> Ordering) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let min = self.data.pop();
        if !self.data.is_empty() {
            self.trickle_down(0, cmp);
        }
        min
    }

    pub fn pop_max(&mut self, cmp: &impl Fn(&T, &T) -> Ordering) -> Option<T> {
        let idx = self.max_index(cmp)?;
        let last = self.data.len() - 1;
        self.data.swap(idx, last);
        let max = self.data.pop();
        if idx < self.data.len() {
            self.trickle_down(idx, cmp);
        }
        max
    }

    fn max_index(&self, cmp: &impl Fn(&T, &T) -> Ordering) -> Option<usize> {
        match self.data.len() {
            0 => None,
            1 => Some(0),
            2 => Some(1),
            _ => Some(if cmp(&self.data[1], &self.data[2]) == Ordering::Greater { 1 } else { 2 }),
        }
    }

    fn push_up(&mut self, i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        if i == 0 {
            return;
        }
        let p = (i - 1) / 2;
        if is_min_level(i) {
            if cmp(&self.data[i], &self.data[p]) == Ordering::Greater {
                self.data.swap(i, p);
                self.push_up_max(p, cmp);
            } else {
                self.push_up_min(i, cmp);
            }
        } else if cmp(&self.data[i], &self.data[p]) == Ordering::Less {
            self.data.swap(i, p);
            self.push_up_min(p, cmp);
        } else {
            self.push_up_max(i, cmp);
        }
    }

    fn push_up_min(&mut self, mut i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        loop {
            if i == 0 {
                break;
            }
            let p = (i - 1) / 2;
            if p == 0 {
                break;
            }
            let gp = (p - 1) / 2;
            if cmp(&self.data[i], &self.data[gp]) == Ordering::Less {
                self.data.swap(i, gp);
                i = gp;
            } else {
                break;
            }
        }
    }

    fn push_up_max(&mut self, mut i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        loop {
            if i == 0 {
                break;
            }
            let p = (i - 1) / 2;
            if p == 0 {
                break;
            }
            let gp = (p - 1) / 2;
            if cmp(&self.data[i], &self.data[gp]) == Ordering::Greater {
                self.data.swap(i, gp);
                i = gp;
            } else {
                break;
            }
        }
    }

    fn trickle_down(&mut self, i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        if is_min_level(i) {
            self.trickle_down_min(i, cmp);
        } else {
            self.trickle_down_max(i, cmp);
        }
    }

    fn trickle_down_min(&mut self, mut i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        loop {
            let len = self.data.len();
            let Some((m, is_grandchild)) = smallest_descendant(&self.data, i, len, cmp) else {
                break;
            };
            if cmp(&self.data[m], &self.data[i]) == Ordering::Less {
                self.data.swap(m, i);
                if is_grandchild {
                    let p = (m - 1) / 2;
                    if cmp(&self.data[m], &self.data[p]) == Ordering::Greater {
                        self.data.swap(m, p);
                    }
                    i = m;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }

    fn trickle_down_max(&mut self, mut i: usize, cmp: &impl Fn(&T, &T) -> Ordering) {
        loop {
            let len = self.data.len();
            let Some((m, is_grandchild)) = largest_descendant(&self.data, i, len, cmp) else {
                break;
            };
            if cmp(&self.data[m], &self.data[i]) == Ordering::Greater {
                self.data.swap(m, i);
                if is_grandchild {
                    let p = (m - 1) / 2;
                    if cmp(&self.data[m], &self.data[p]) == Ordering::Less {
                        self.data.swap(m, p);
                    }
                    i = m;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }
}

fn level_of(mut i: usize) -> u32 {
    let mut lvl = 0u32;
    while i > 0 {
        i = (i - 1) / 2;
        lvl += 1;
    }
    lvl
}

fn is_min_level(i: usize) -> bool {
    level_of(i) % 2 == 0
}

/// Children and grandchildren of `i`, each tagged with whether it is a
/// grandchild (depth 2) rather than a direct child (depth 1).
fn descendants(i: usize, len: usize) -> SmallVec<[(usize, bool); 6]> {
    let mut v = SmallVec::new();
    let l = 2 * i + 1;
    let r = 2 * i + 2;
    for c in [l, r] {
        if c < len {
            v.push((c, false));
        }
    }
    for c in [l, r] {
        if c < len {
            let gl = 2 * c + 1;
            let gr = 2 * c + 2;
            for g in [gl, gr] {
                if g < len {
                    v.push((g, true));
                }
            }
        }
    }
    v
}

fn smallest_descendant<T>(
    data: &[T],
    i: usize,
    len: usize,
    cmp: &impl Fn(&T, &T) -> Ordering,
) -> Option<(usize, bool)> {
    descendants(i, len).into_iter().min_by(|a, b| cmp(&data[a.0], &data[b.0]))
}

fn largest_descendant<T>(
    data: &[T],
    i: usize,
    len: usize,
    cmp: &impl Fn(&T, &T) -> Ordering,
) -> Option<(usize, bool)> {
    descendants(i, len).into_iter().max_by(|a, b| cmp(&data[a.0], &data[b.0]))
}
